use sd_core_text_indexer::{Command, EngineTag};

use std::{
	io::{self, BufRead},
	str::FromStr,
	thread,
};

use async_channel as chan;
use tracing::{debug, warn};

/// A line typed on the console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleInput {
	Command(EngineTag, Command),
	Status,
	Quit,
}

impl FromStr for ConsoleInput {
	type Err = String;

	fn from_str(line: &str) -> Result<Self, Self::Err> {
		let mut words = line.split_whitespace();

		match (words.next(), words.next(), words.next()) {
			(Some("status"), None, None) => Ok(Self::Status),
			(Some("quit" | "exit"), None, None) => Ok(Self::Quit),
			(Some(command), Some(engine), None) => command
				.parse()
				.map(|command| Self::Command(EngineTag::new(engine.to_string()), command))
				.map_err(|e| e.to_string()),
			_ => Err(format!(
				"expected `<pause|resume|cancel|view> <engine>`, `status` or `quit`, got `{line}`"
			)),
		}
	}
}

/// Forwards console lines until stdin closes or the receiver goes away.
///
/// Reads happen on a dedicated thread, a blocking stdin read would otherwise hold the runtime back
/// on shutdown.
pub fn spawn_console_reader(input_tx: chan::Sender<ConsoleInput>) -> io::Result<()> {
	thread::Builder::new()
		.name("console-input".to_string())
		.spawn(move || {
			for line in io::stdin().lock().lines() {
				let line = match line {
					Ok(line) => line,
					Err(e) => {
						warn!(?e, "Failed to read console input;");
						break;
					}
				};

				if line.trim().is_empty() {
					continue;
				}

				match line.parse::<ConsoleInput>() {
					Ok(input) => {
						if input_tx.send_blocking(input).is_err() {
							break;
						}
					}
					Err(e) => warn!("{e}"),
				}
			}

			debug!("Console input closed");
		})
		.map(|_| ())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_console_lines() {
		assert_eq!(
			"pause latin".parse(),
			Ok(ConsoleInput::Command(EngineTag::LATIN, Command::Pause))
		);
		assert_eq!(
			"  view   devanagari ".parse(),
			Ok(ConsoleInput::Command(EngineTag::DEVANAGARI, Command::ViewProgress))
		);
		assert_eq!("status".parse(), Ok(ConsoleInput::Status));
		assert_eq!("quit".parse(), Ok(ConsoleInput::Quit));

		assert!("pause".parse::<ConsoleInput>().is_err());
		assert!("explode latin".parse::<ConsoleInput>().is_err());
	}
}
