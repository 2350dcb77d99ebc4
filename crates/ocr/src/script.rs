use std::{fmt, ops::RangeInclusive};

use serde::{Deserialize, Serialize};

/// Writing systems we know how to recognize and to spot in extracted text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Script {
	Latin,
	Devanagari,
	Han,
	Japanese,
	Hangul,
	Arabic,
}

const LATIN: &[RangeInclusive<char>] = &[
	'A'..='Z',
	'a'..='z',
	'\u{00C0}'..='\u{024F}',
];
const DEVANAGARI: &[RangeInclusive<char>] = &['\u{0900}'..='\u{097F}'];
const HAN: &[RangeInclusive<char>] = &['\u{4E00}'..='\u{9FFF}'];
const JAPANESE: &[RangeInclusive<char>] = &['\u{3040}'..='\u{309F}', '\u{30A0}'..='\u{30FF}'];
const HANGUL: &[RangeInclusive<char>] = &[
	'\u{AC00}'..='\u{D7AF}',
	'\u{1100}'..='\u{11FF}',
	'\u{3130}'..='\u{318F}',
];
const ARABIC: &[RangeInclusive<char>] = &['\u{0600}'..='\u{06FF}', '\u{0750}'..='\u{077F}'];

impl Script {
	pub const ALL: [Self; 6] = [
		Self::Latin,
		Self::Devanagari,
		Self::Han,
		Self::Japanese,
		Self::Hangul,
		Self::Arabic,
	];

	#[must_use]
	pub const fn ranges(self) -> &'static [RangeInclusive<char>] {
		match self {
			Self::Latin => LATIN,
			Self::Devanagari => DEVANAGARI,
			Self::Han => HAN,
			Self::Japanese => JAPANESE,
			Self::Hangul => HANGUL,
			Self::Arabic => ARABIC,
		}
	}

	#[must_use]
	pub fn contains(self, c: char) -> bool {
		self.ranges().iter().any(|range| range.contains(&c))
	}

	/// Language data name used by Tesseract for this script.
	#[must_use]
	pub const fn tesseract_language(self) -> &'static str {
		match self {
			Self::Latin => "eng",
			Self::Devanagari => "hin",
			Self::Han => "chi_sim",
			Self::Japanese => "jpn",
			Self::Hangul => "kor",
			Self::Arabic => "ara",
		}
	}
}

impl fmt::Display for Script {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			Self::Latin => "latin",
			Self::Devanagari => "devanagari",
			Self::Han => "han",
			Self::Japanese => "japanese",
			Self::Hangul => "hangul",
			Self::Arabic => "arabic",
		};

		f.write_str(name)
	}
}

/// How many characters of `text` belong to `script`.
#[must_use]
pub fn count_matches(text: &str, script: Script) -> usize {
	text.chars().filter(|c| script.contains(*c)).count()
}

/// Picks, among `candidates`, the script with the most characters in `text`.
///
/// Ties go to the earliest candidate. Returns `None` when no candidate has a single character.
#[must_use]
pub fn detect(text: &str, candidates: impl IntoIterator<Item = Script>) -> Option<Script> {
	candidates
		.into_iter()
		.map(|script| (script, count_matches(text, script)))
		.filter(|(_, count)| *count > 0)
		.fold(None, |best: Option<(Script, usize)>, (script, count)| match best {
			Some((_, best_count)) if best_count >= count => best,
			_ => Some((script, count)),
		})
		.map(|(script, _)| script)
}
