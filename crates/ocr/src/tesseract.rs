use std::{
	collections::BTreeMap,
	path::{Path, PathBuf},
	process::Stdio,
};

use async_trait::async_trait;
use tokio::{io::AsyncWriteExt, process::Command};
use tracing::{instrument, trace};

use super::{
	backend::{BackendOutput, RecognitionBackend},
	decode::OcrImage,
	error::BackendError,
	script::Script,
};

/// Offline backend that shells out to the `tesseract` command line tool.
#[derive(Debug, Clone)]
pub struct TesseractCli {
	program: PathBuf,
	language: &'static str,
}

impl TesseractCli {
	#[must_use]
	pub fn new(program: impl AsRef<Path>, script: Script) -> Self {
		Self {
			program: program.as_ref().to_path_buf(),
			language: script.tesseract_language(),
		}
	}
}

#[async_trait]
impl RecognitionBackend for TesseractCli {
	fn name(&self) -> &'static str {
		"tesseract"
	}

	#[instrument(skip_all, fields(language = self.language), err)]
	async fn recognize(&self, image: &OcrImage) -> Result<BackendOutput, BackendError> {
		let png = image.to_png()?;

		let mut child = Command::new(&self.program)
			.args(["stdin", "stdout", "-l", self.language, "tsv"])
			.stdin(Stdio::piped())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			// The engine layer drops us on timeout, the process must go with us
			.kill_on_drop(true)
			.spawn()
			.map_err(|source| BackendError::Spawn {
				program: self.program.display().to_string(),
				source,
			})?;

		if let Some(mut stdin) = child.stdin.take() {
			stdin.write_all(&png).await?;
			stdin.shutdown().await?;
		}

		let output = child.wait_with_output().await?;

		if !output.status.success() {
			return Err(BackendError::Exit {
				status: output.status,
				stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
			});
		}

		let tsv = String::from_utf8(output.stdout)
			.map_err(|e| BackendError::MalformedOutput(e.to_string()))?;

		parse_tsv(&tsv)
	}
}

const LEVEL_BLOCK: u32 = 2;
const LEVEL_WORD: u32 = 5;

/// Turns tesseract's TSV report into text, mean word confidence and block count.
///
/// Words are joined by spaces inside a line and lines are joined by newlines, in reading order.
pub fn parse_tsv(tsv: &str) -> Result<BackendOutput, BackendError> {
	let mut lines = BTreeMap::<(u32, u32, u32, u32), Vec<&str>>::new();
	let mut confidences = Vec::new();
	let mut block_count = 0_u32;

	for (idx, row) in tsv.lines().enumerate() {
		if idx == 0 && row.starts_with("level") {
			continue;
		}
		if row.trim().is_empty() {
			continue;
		}

		let columns = row.splitn(12, '\t').collect::<Vec<_>>();
		if columns.len() < 11 {
			return Err(BackendError::MalformedOutput(format!(
				"expected at least 11 columns at row {idx}, found {}",
				columns.len()
			)));
		}

		let number = |col: usize| {
			columns[col].trim().parse::<u32>().map_err(|e| {
				BackendError::MalformedOutput(format!("column {col} at row {idx}: {e}"))
			})
		};

		let level = number(0)?;
		if level == LEVEL_BLOCK {
			block_count += 1;
		}
		if level != LEVEL_WORD {
			continue;
		}

		let text = columns.get(11).map_or("", |text| text.trim());
		if text.is_empty() {
			continue;
		}

		let confidence = columns[10].trim().parse::<f32>().map_err(|e| {
			BackendError::MalformedOutput(format!("confidence at row {idx}: {e}"))
		})?;
		if confidence >= 0.0 {
			confidences.push(confidence);
		}

		lines
			.entry((number(1)?, number(2)?, number(3)?, number(4)?))
			.or_default()
			.push(text);
	}

	trace!(words = confidences.len(), block_count, "Parsed tesseract output");

	Ok(BackendOutput {
		text: lines
			.into_values()
			.map(|words| words.join(" "))
			.collect::<Vec<_>>()
			.join("\n"),
		confidence: mean(&confidences) / 100.0,
		block_count,
	})
}

#[allow(clippy::cast_precision_loss)] // word counts are tiny
fn mean(values: &[f32]) -> f32 {
	if values.is_empty() {
		0.0
	} else {
		values.iter().sum::<f32>() / values.len() as f32
	}
}
