//! Background text indexing.
//!
//! Every image the [`MediaEnumerator`] knows about goes through a recognition engine once per
//! [`EngineTag`], and the extracted text lands in an [`ExtractionRecordStore`]. Work runs in batches
//! on the task system, can be paused, resumed or canceled at any time and survives restarts: the
//! [`ProgressStore`] is the single source of truth, reconciled against the stores by a
//! [`ProgressMonitor`] that also clears engines stuck as processing without progress.

#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::cast_possible_truncation,
	clippy::cast_possible_wrap,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::dbg_macro,
	clippy::deprecated_cfg_attr,
	clippy::separated_literal_suffix,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

use sd_ocr::EngineRegistry;

use std::sync::Arc;

mod config;
mod db;
mod error;
mod gateway;
mod keep_alive;
mod listener;
mod manager;
mod media;
mod monitor;
mod progress;
mod record;
mod scheduler;
mod worker;

pub use config::{EngineConfig, IndexerConfig};
pub use db::IndexDb;
pub use error::{Error, StoreError};
pub use gateway::{
	Command, CommandGateway, DisplayState, NotificationSurface, ProgressView, Renderer,
	UnknownCommand,
};
pub use keep_alive::{KeepAliveFacility, KeepAliveSupervisor};
pub use listener::ChangeListener;
pub use manager::TextIndexer;
pub use media::{
	EnumerationError, IndexableItem, ItemId, MediaChange, MediaEnumerator, UniverseCounts,
};
pub use monitor::{MonitorExit, Monitors, ProgressMonitor, StallDetector, Verdict};
pub use progress::{Emission, ProgressState, ProgressStore, ProgressUpdate};
pub use record::{ExtractionRecord, ExtractionRecordStore, RecordStats};
pub use scheduler::{watch_dispatched, WorkScheduler};
pub use worker::{BatchMode, BatchOutcome, BatchReport, IndexingWorker};

pub use sd_ocr::EngineTag;

/// Everything the pipeline components share. Built once, then only read.
pub struct IndexerContext {
	pub enumerator: Arc<dyn MediaEnumerator>,
	pub records: Arc<dyn ExtractionRecordStore>,
	pub progress: Arc<dyn ProgressStore>,
	pub engines: EngineRegistry,
	pub config: IndexerConfig,
}

impl IndexerContext {
	/// Context backed by a single [`IndexDb`] for both stores.
	#[must_use]
	pub fn new(
		enumerator: Arc<dyn MediaEnumerator>,
		db: Arc<IndexDb>,
		engines: EngineRegistry,
		config: IndexerConfig,
	) -> Self {
		let records: Arc<dyn ExtractionRecordStore> = db.clone();

		Self {
			enumerator,
			records,
			progress: db,
			engines,
			config,
		}
	}

	/// Ground truth for `engine`, read from the media source and the record store.
	pub async fn universe_counts(&self, engine: &EngineTag) -> Result<UniverseCounts, Error> {
		let universe = self.enumerator.list_all().await?;
		let recorded = self.records.recorded_ids(engine).await?;

		Ok(UniverseCounts::of(&universe, &recorded))
	}
}
