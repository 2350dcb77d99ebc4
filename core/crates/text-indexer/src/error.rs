use sd_ocr::EngineTag;
use sd_task_system::TaskSystemError;

use thiserror::Error;

use super::media::EnumerationError;

#[derive(Debug, Error)]
pub enum Error {
	#[error(transparent)]
	Store(#[from] StoreError),
	#[error(transparent)]
	Enumeration(#[from] EnumerationError),
	#[error("no recognition engine registered for <tag='{0}'>")]
	EngineUnavailable(EngineTag),
	#[error(transparent)]
	TaskSystem(#[from] TaskSystemError),
}

#[derive(Debug, Error)]
pub enum StoreError {
	#[error("database error: {0}")]
	Database(#[from] sqlx::Error),
	#[error("stored value out of range <column='{column}'>: {value}")]
	OutOfRange { column: &'static str, value: i64 },
}
