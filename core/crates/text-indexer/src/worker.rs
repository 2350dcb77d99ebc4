use crate::{
	error::Error,
	media::{IndexableItem, ItemId, UniverseCounts},
	progress::{Emission, ProgressUpdate},
	record::ExtractionRecord,
	IndexerContext,
};

use sd_ocr::{load_image, EngineError, EngineTag, Extraction, RecognitionEngine};
use sd_task_system::{
	check_interruption, ExecStatus, Interrupter, InterruptionKind, IntoAnyTaskOutput, Task, TaskId,
};

use std::{collections::HashSet, sync::Arc, time::Duration};

use tokio::time::{sleep, Instant};
use tracing::{debug, info, instrument, trace, warn};

/// How much of the backlog one worker execution goes through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchMode {
	/// A single slice of at most `batch_size` items.
	Batch { batch_size: usize },
	/// Slices of `batch_size` items until the backlog is gone, the engine is paused or canceled, or
	/// slices keep failing.
	Continuous { batch_size: usize },
	/// Just this item, usually one that was just added to the media source.
	Single(IndexableItem),
}

/// How a worker execution ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BatchOutcome {
	/// Nothing left to do, the engine was marked as not processing.
	#[default]
	Completed,
	/// A slice was processed and there is more to do.
	Sliced,
	/// The engine was paused between two items.
	Paused,
	/// A continuous run got a slice that neither wrote nor failed anything.
	NoProgress,
}

/// What a worker execution did, handed back as the task output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
	pub engine: Option<EngineTag>,
	pub written: u64,
	pub failed: u64,
	/// Items found already recorded when we went to write them.
	pub skipped: u64,
	pub slices: u32,
	pub outcome: BatchOutcome,
	pub elapsed: Duration,
}

enum SliceOutcome {
	Exhausted,
	Sliced { written: u64, failed: u64 },
	Paused,
	Interrupted(InterruptionKind),
}

/// One execution of the indexing algorithm for one engine.
pub struct IndexingWorker {
	id: TaskId,
	engine: EngineTag,
	mode: BatchMode,
	ctx: Arc<IndexerContext>,
	// Items that failed during this execution, never retried before it ends
	attempted: HashSet<ItemId>,
	// Progress only counts records of items in here
	universe: Vec<IndexableItem>,
	report: BatchReport,
}

impl IndexingWorker {
	#[must_use]
	pub fn new(engine: EngineTag, mode: BatchMode, ctx: Arc<IndexerContext>) -> Self {
		Self {
			id: TaskId::new_v4(),
			report: BatchReport {
				engine: Some(engine.clone()),
				..Default::default()
			},
			engine,
			mode,
			ctx,
			attempted: HashSet::new(),
			universe: Vec::new(),
		}
	}

	#[must_use]
	pub const fn engine(&self) -> &EngineTag {
		&self.engine
	}

	#[must_use]
	pub const fn mode(&self) -> &BatchMode {
		&self.mode
	}

	async fn run_single(
		&mut self,
		item: IndexableItem,
		recognizer: &dyn RecognitionEngine,
		interrupter: &Interrupter,
	) -> Result<SliceOutcome, Error> {
		let ctx = Arc::clone(&self.ctx);
		let IndexerContext {
			enumerator,
			records,
			progress,
			..
		} = &*ctx;

		if records.is_recorded(&self.engine, item.id).await? {
			trace!(item_id = item.id, "Item already recorded");
			self.report.skipped += 1;
			return Ok(SliceOutcome::Exhausted);
		}

		if let Some(kind) = interrupter.try_check_interrupt() {
			return Ok(SliceOutcome::Interrupted(kind));
		}

		if progress
			.get(&self.engine)
			.await?
			.is_some_and(|state| state.is_paused)
		{
			return Ok(SliceOutcome::Paused);
		}

		self.universe = enumerator.list_all().await?;

		let (written, failed) = match self
			.process_item(&item, recognizer, interrupter)
			.await?
		{
			Processed::Written => (1, 0),
			Processed::Skipped => (0, 0),
			Processed::Failed => (0, 1),
			Processed::Interrupted(kind) => return Ok(SliceOutcome::Interrupted(kind)),
		};

		Ok(SliceOutcome::Sliced { written, failed })
	}

	#[instrument(skip(self, recognizer, interrupter), fields(engine = %self.engine), err)]
	async fn run_slice(
		&mut self,
		batch_size: usize,
		recognizer: &dyn RecognitionEngine,
		interrupter: &Interrupter,
	) -> Result<SliceOutcome, Error> {
		let ctx = Arc::clone(&self.ctx);
		let IndexerContext {
			enumerator,
			records,
			progress,
			config,
			..
		} = &*ctx;

		self.universe = enumerator.list_all().await?;
		let recorded = records.recorded_ids(&self.engine).await?;

		let UniverseCounts {
			total_items,
			processed_items,
		} = UniverseCounts::of(&self.universe, &recorded);

		let mut unprocessed = self
			.universe
			.iter()
			.filter(|item| !recorded.contains(&item.id) && !self.attempted.contains(&item.id))
			.cloned()
			.collect::<Vec<_>>();

		if unprocessed.is_empty() {
			progress
				.upsert(
					&self.engine,
					ProgressUpdate::counts(total_items, processed_items).with_processing(false),
					Emission::OnChange,
				)
				.await?;

			return Ok(SliceOutcome::Exhausted);
		}

		progress
			.upsert(
				&self.engine,
				ProgressUpdate::counts(total_items, processed_items),
				Emission::OnChange,
			)
			.await?;

		// Newest first, so what the user just added becomes searchable first
		unprocessed.sort_unstable_by(|a, b| {
			b.added_at
				.cmp(&a.added_at)
				.then_with(|| b.id.cmp(&a.id))
		});

		let remaining = unprocessed.len().saturating_sub(batch_size);
		unprocessed.truncate(batch_size);

		debug!(
			slice_len = unprocessed.len(),
			remaining, total_items, "Starting batch slice"
		);

		self.report.slices += 1;

		let (mut written, mut failed) = (0, 0);
		let slice_len = unprocessed.len();

		for (idx, item) in unprocessed.into_iter().enumerate() {
			if let Some(kind) = interrupter.try_check_interrupt() {
				return Ok(SliceOutcome::Interrupted(kind));
			}

			if progress
				.get(&self.engine)
				.await?
				.is_some_and(|state| state.is_paused)
			{
				info!(engine = %self.engine, written, failed, "Engine paused, stopping batch");
				return Ok(SliceOutcome::Paused);
			}

			match self
				.process_item(&item, recognizer, interrupter)
				.await?
			{
				Processed::Written => written += 1,
				Processed::Skipped => {}
				Processed::Failed => failed += 1,
				Processed::Interrupted(kind) => return Ok(SliceOutcome::Interrupted(kind)),
			}

			if idx + 1 < slice_len {
				sleep(config.item_delay).await;
			}
		}

		if remaining == 0 && failed == 0 {
			progress
				.upsert(
					&self.engine,
					ProgressUpdate::processing(false),
					Emission::OnChange,
				)
				.await?;

			return Ok(SliceOutcome::Exhausted);
		}

		Ok(SliceOutcome::Sliced { written, failed })
	}

	#[instrument(skip_all, fields(item_id = item.id, locator = %item.locator.display()))]
	async fn process_item(
		&mut self,
		item: &IndexableItem,
		recognizer: &dyn RecognitionEngine,
		interrupter: &Interrupter,
	) -> Result<Processed, Error> {
		let IndexerContext {
			records,
			progress,
			config,
			..
		} = &*self.ctx;

		let start = Instant::now();

		let processed = match extract(item, recognizer, config.max_image_dimension).await {
			Ok(extraction) => {
				// The record write is the point of no return for this item
				if let Some(kind) = interrupter.try_check_interrupt() {
					return Ok(Processed::Interrupted(kind));
				}

				let record = ExtractionRecord::from_extraction(self.engine.clone(), item.id, extraction);

				if records.insert_if_absent(&record).await? {
					trace!(chars = record.text.chars().count(), "Extraction recorded");
					self.report.written += 1;
					Processed::Written
				} else {
					trace!("Item was recorded while we were extracting it");
					self.report.skipped += 1;
					Processed::Skipped
				}
			}

			Err(e) => {
				warn!(?e, "Failed to extract text from item");

				self.attempted.insert(item.id);
				self.report.failed += 1;

				progress
					.upsert(&self.engine, ProgressUpdate::failed_item(), Emission::OnChange)
					.await?;

				Processed::Failed
			}
		};

		let counts = UniverseCounts::of(
			&self.universe,
			&records.recorded_ids(&self.engine).await?,
		);
		let mut update = ProgressUpdate::counts(counts.total_items, counts.processed_items);

		if matches!(processed, Processed::Written) {
			update = update.with_sample(start.elapsed());
		}

		progress
			.upsert(&self.engine, update, Emission::OnChange)
			.await?;

		Ok(processed)
	}
}

enum Processed {
	Written,
	Skipped,
	Failed,
	Interrupted(InterruptionKind),
}

async fn extract(
	item: &IndexableItem,
	recognizer: &dyn RecognitionEngine,
	max_image_dimension: u32,
) -> Result<Extraction, EngineError> {
	let image = load_image(&item.locator, max_image_dimension).await?;

	recognizer.extract(&image).await
}

const fn interrupted(kind: InterruptionKind) -> ExecStatus {
	match kind {
		InterruptionKind::Cancel => ExecStatus::Canceled,
		InterruptionKind::Pause => ExecStatus::Paused,
	}
}

#[async_trait::async_trait]
impl Task<Error> for IndexingWorker {
	fn id(&self) -> TaskId {
		self.id
	}

	#[instrument(skip_all, fields(task_id = %self.id, engine = %self.engine, mode = ?self.mode), err)]
	async fn run(&mut self, interrupter: &Interrupter) -> Result<ExecStatus, Error> {
		check_interruption!(interrupter);

		let recognizer = self
			.ctx
			.engines
			.get(&self.engine)
			.ok_or_else(|| Error::EngineUnavailable(self.engine.clone()))?;

		let start = Instant::now();

		self.report.outcome = match self.mode.clone() {
			BatchMode::Single(item) => {
				match self.run_single(item, &*recognizer, interrupter).await? {
					SliceOutcome::Exhausted | SliceOutcome::Sliced { .. } => BatchOutcome::Completed,
					SliceOutcome::Paused => BatchOutcome::Paused,
					SliceOutcome::Interrupted(kind) => return Ok(interrupted(kind)),
				}
			}

			BatchMode::Batch { batch_size } => {
				match self.run_slice(batch_size, &*recognizer, interrupter).await? {
					SliceOutcome::Exhausted => BatchOutcome::Completed,
					SliceOutcome::Sliced { .. } => BatchOutcome::Sliced,
					SliceOutcome::Paused => BatchOutcome::Paused,
					SliceOutcome::Interrupted(kind) => return Ok(interrupted(kind)),
				}
			}

			BatchMode::Continuous { batch_size } => {
				let max_failures = self.ctx.config.max_consecutive_batch_failures;
				let mut consecutive_failures = 0;

				loop {
					check_interruption!(interrupter);

					match self.run_slice(batch_size, &*recognizer, interrupter).await {
						Ok(SliceOutcome::Exhausted) => break BatchOutcome::Completed,
						Ok(SliceOutcome::Paused) => break BatchOutcome::Paused,
						Ok(SliceOutcome::Interrupted(kind)) => return Ok(interrupted(kind)),
						Ok(SliceOutcome::Sliced {
							written: 0,
							failed: 0,
						}) => {
							warn!("Batch slice made no progress, stopping continuous run");
							break BatchOutcome::NoProgress;
						}
						Ok(SliceOutcome::Sliced { written, failed }) => {
							consecutive_failures = 0;
							debug!(written, failed, "Batch slice done, taking the next one");
						}
						Err(e) => {
							consecutive_failures += 1;
							if consecutive_failures >= max_failures {
								warn!(
									consecutive_failures,
									"Too many failed batch slices, giving up continuous run",
								);
								return Err(e);
							}

							warn!(?e, consecutive_failures, "Batch slice failed, retrying");
							sleep(self.ctx.config.monitor_error_backoff).await;
						}
					}
				}
			}
		};

		self.report.elapsed = start.elapsed();

		info!(
			written = self.report.written,
			failed = self.report.failed,
			skipped = self.report.skipped,
			slices = self.report.slices,
			outcome = ?self.report.outcome,
			elapsed = ?self.report.elapsed,
			"Indexing worker finished",
		);

		Ok(ExecStatus::Done(self.report.clone().into_output()))
	}
}
