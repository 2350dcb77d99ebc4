use std::time::Duration;

use sd_ocr::EngineTag;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::WatchStream;

use super::error::StoreError;

/// Durable summary of the indexing status of one engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressState {
	pub engine: EngineTag,
	pub total_items: u64,
	pub processed_items: u64,
	pub failed_items: u64,
	pub is_processing: bool,
	pub is_paused: bool,
	/// The user sent the progress indicator to the background.
	pub dismissed: bool,
	pub last_updated: DateTime<Utc>,
	pub avg_processing_time_ms: u64,
	/// How many samples went into [`Self::avg_processing_time_ms`].
	pub timing_samples: u64,
	pub estimated_completion_at: Option<DateTime<Utc>>,
}

impl ProgressState {
	#[must_use]
	pub fn new(engine: EngineTag, now: DateTime<Utc>) -> Self {
		Self {
			engine,
			total_items: 0,
			processed_items: 0,
			failed_items: 0,
			is_processing: false,
			is_paused: false,
			dismissed: false,
			last_updated: now,
			avg_processing_time_ms: 0,
			timing_samples: 0,
			estimated_completion_at: None,
		}
	}

	#[must_use]
	#[allow(clippy::cast_precision_loss)] // item counts are way below f64 precision
	pub fn percentage(&self) -> f64 {
		if self.total_items == 0 {
			0.0
		} else {
			(self.processed_items as f64 / self.total_items as f64 * 100.0).min(100.0)
		}
	}

	#[must_use]
	pub const fn remaining(&self) -> u64 {
		self.total_items.saturating_sub(self.processed_items)
	}

	#[must_use]
	pub const fn is_complete(&self) -> bool {
		self.total_items > 0 && self.processed_items >= self.total_items
	}

	/// Remaining items times the mean time per item, when there is a mean to go with.
	#[must_use]
	pub fn estimated_time_remaining(&self) -> Option<Duration> {
		(self.avg_processing_time_ms > 0 && self.remaining() > 0).then(|| {
			Duration::from_millis(self.avg_processing_time_ms.saturating_mul(self.remaining()))
		})
	}

	/// Same state, ignoring bookkeeping timestamps.
	#[must_use]
	pub fn same_progress(&self, other: &Self) -> bool {
		self.total_items == other.total_items
			&& self.processed_items == other.processed_items
			&& self.failed_items == other.failed_items
			&& self.is_processing == other.is_processing
			&& self.is_paused == other.is_paused
			&& self.dismissed == other.dismissed
	}

	/// Applies `update` and re-derives the timing fields, keeping `processed_items <= total_items`.
	pub fn apply(&mut self, update: &ProgressUpdate, now: DateTime<Utc>) {
		if let Some(total) = update.total_items {
			self.total_items = total;
		}
		if let Some(processed) = update.processed_items {
			self.processed_items = processed;
		}
		self.processed_items = self.processed_items.min(self.total_items);

		if update.reset_failed {
			self.failed_items = 0;
		}
		self.failed_items = self.failed_items.saturating_add(update.failed_delta);

		if let Some(is_processing) = update.is_processing {
			self.is_processing = is_processing;
		}
		if let Some(is_paused) = update.is_paused {
			self.is_paused = is_paused;
		}
		if let Some(dismissed) = update.dismissed {
			self.dismissed = dismissed;
		}

		if let Some(sample) = update.processing_time_sample {
			let sample_ms = u64::try_from(sample.as_millis()).unwrap_or(u64::MAX);
			self.timing_samples = self.timing_samples.saturating_add(1);
			self.avg_processing_time_ms = self
				.avg_processing_time_ms
				.saturating_mul(self.timing_samples - 1)
				.saturating_add(sample_ms)
				/ self.timing_samples;
		}

		self.estimated_completion_at = if self.is_processing {
			self.estimated_time_remaining()
				.and_then(|eta| chrono::Duration::from_std(eta).ok())
				.and_then(|eta| now.checked_add_signed(eta))
		} else {
			None
		};

		self.last_updated = now;
	}
}

/// A partial update to a [`ProgressState`].
///
/// Writers send deltas instead of whole states, so the worker and the monitor never overwrite each
/// other's fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressUpdate {
	pub total_items: Option<u64>,
	pub processed_items: Option<u64>,
	pub failed_delta: u64,
	pub reset_failed: bool,
	pub is_processing: Option<bool>,
	pub is_paused: Option<bool>,
	pub dismissed: Option<bool>,
	pub processing_time_sample: Option<Duration>,
}

impl ProgressUpdate {
	#[must_use]
	pub const fn counts(total_items: u64, processed_items: u64) -> Self {
		Self {
			total_items: Some(total_items),
			processed_items: Some(processed_items),
			failed_delta: 0,
			reset_failed: false,
			is_processing: None,
			is_paused: None,
			dismissed: None,
			processing_time_sample: None,
		}
	}

	#[must_use]
	pub fn processing(is_processing: bool) -> Self {
		Self {
			is_processing: Some(is_processing),
			..Default::default()
		}
	}

	#[must_use]
	pub fn flags(is_processing: bool, is_paused: bool) -> Self {
		Self {
			is_processing: Some(is_processing),
			is_paused: Some(is_paused),
			..Default::default()
		}
	}

	#[must_use]
	pub fn failed_item() -> Self {
		Self {
			failed_delta: 1,
			..Default::default()
		}
	}

	#[must_use]
	pub fn dismissed(dismissed: bool) -> Self {
		Self {
			dismissed: Some(dismissed),
			..Default::default()
		}
	}

	#[must_use]
	pub const fn with_total(mut self, total_items: u64) -> Self {
		self.total_items = Some(total_items);
		self
	}

	#[must_use]
	pub const fn with_processed(mut self, processed_items: u64) -> Self {
		self.processed_items = Some(processed_items);
		self
	}

	#[must_use]
	pub const fn with_processing(mut self, is_processing: bool) -> Self {
		self.is_processing = Some(is_processing);
		self
	}

	#[must_use]
	pub const fn with_sample(mut self, sample: Duration) -> Self {
		self.processing_time_sample = Some(sample);
		self
	}
}

/// Whether subscribers hear about a write that didn't change anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Emission {
	OnChange,
	Forced,
}

/// Per engine progress, the single source of truth for control and observability.
///
/// Writes for the same engine are serialized by the store.
#[async_trait]
pub trait ProgressStore: Send + Sync + 'static {
	async fn get(&self, engine: &EngineTag) -> Result<Option<ProgressState>, StoreError>;

	/// Every stored state, one per engine ever activated.
	async fn all(&self) -> Result<Vec<ProgressState>, StoreError>;

	/// Applies `update`, creating the state on first use, and returns the new state.
	async fn upsert(
		&self,
		engine: &EngineTag,
		update: ProgressUpdate,
		emission: Emission,
	) -> Result<ProgressState, StoreError>;

	/// Current state first, then one item per write.
	async fn subscribe(&self, engine: &EngineTag) -> WatchStream<Option<ProgressState>>;

	async fn clear(&self, engine: &EngineTag) -> Result<(), StoreError>;
}
