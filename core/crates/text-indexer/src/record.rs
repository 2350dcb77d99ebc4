use std::{collections::HashSet, time::Duration};

use sd_ocr::{EngineTag, Extraction};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{error::StoreError, media::ItemId};

/// Text extracted from one item by one engine. Written once, never updated in place.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionRecord {
	pub engine: EngineTag,
	pub item_id: ItemId,
	pub text: String,
	pub confidence: f32,
	pub block_count: u32,
	pub extracted_at: DateTime<Utc>,
	pub processing_time: Duration,
}

impl ExtractionRecord {
	#[must_use]
	pub fn from_extraction(engine: EngineTag, item_id: ItemId, extraction: Extraction) -> Self {
		Self {
			engine,
			item_id,
			text: extraction.text,
			confidence: extraction.confidence,
			block_count: extraction.block_count,
			extracted_at: Utc::now(),
			processing_time: extraction.processing_time,
		}
	}
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordStats {
	pub count: u64,
	pub avg_confidence: f32,
	pub avg_processing_time: Duration,
}

/// Completed extractions, unique by `(engine, item_id)`.
#[async_trait]
pub trait ExtractionRecordStore: Send + Sync + 'static {
	/// Returns `false`, leaving the stored record untouched, when the item was already recorded.
	async fn insert_if_absent(&self, record: &ExtractionRecord) -> Result<bool, StoreError>;

	async fn recorded_ids(&self, engine: &EngineTag) -> Result<HashSet<ItemId>, StoreError>;

	async fn count(&self, engine: &EngineTag) -> Result<u64, StoreError>;

	async fn get_record(
		&self,
		engine: &EngineTag,
		item_id: ItemId,
	) -> Result<Option<ExtractionRecord>, StoreError>;

	async fn is_recorded(&self, engine: &EngineTag, item_id: ItemId) -> Result<bool, StoreError>;

	/// Case-insensitive substring search over the extracted text, most recent first.
	async fn search(
		&self,
		engine: &EngineTag,
		query: &str,
		limit: u32,
	) -> Result<Vec<ExtractionRecord>, StoreError>;

	async fn stats(&self, engine: &EngineTag) -> Result<RecordStats, StoreError>;

	/// Used when items leave the media source, returns how many records were removed.
	async fn delete(&self, engine: &EngineTag, item_ids: &[ItemId]) -> Result<u64, StoreError>;
}
