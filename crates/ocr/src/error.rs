use std::{io, path::Path, process::ExitStatus, time::Duration};

use thiserror::Error;

/// Why a recognition attempt produced no text for an image.
///
/// These are values, never panics: callers record the item as failed and move on.
#[derive(Debug, Error)]
pub enum EngineError {
	#[error("recognition timed out after {0:?}")]
	Timeout(Duration),
	#[error("recognition backend <name='{name}'> failed: {source}")]
	Backend {
		name: &'static str,
		#[source]
		source: BackendError,
	},
	#[error("recognition backend <name='{0}'> panicked")]
	BackendPanic(&'static str),
	#[error("failed to load image <path='{}'>: {source}", .path.display())]
	ImageLoad {
		path: Box<Path>,
		#[source]
		source: image::ImageError,
	},
	#[error("image loader for <path='{}'> was aborted", .0.display())]
	ImageLoaderAborted(Box<Path>),
	#[error("image has no pixels")]
	EmptyImage,
}

#[derive(Debug, Error)]
pub enum BackendError {
	#[error("failed to spawn recognition process <program='{program}'>: {source}")]
	Spawn {
		program: String,
		#[source]
		source: io::Error,
	},
	#[error("recognition process I/O error: {0}")]
	Io(#[from] io::Error),
	#[error("recognition process exited with {status}: {stderr}")]
	Exit { status: ExitStatus, stderr: String },
	#[error("failed to encode image for the recognition process: {0}")]
	Encode(#[from] image::ImageError),
	#[error("malformed recognition output: {0}")]
	MalformedOutput(String),
	#[error("{0}")]
	Other(String),
}
