use crate::{
	error::Error,
	gateway::{run_commands, Command, CommandGateway, NotificationSurface, Renderer},
	keep_alive::{KeepAliveFacility, KeepAliveSupervisor},
	listener::{run_changes, ChangeListener},
	media::{ItemId, MediaChange, UniverseCounts},
	monitor::Monitors,
	progress::{Emission, ProgressState, ProgressUpdate},
	record::{ExtractionRecord, RecordStats},
	scheduler::{watch_dispatched, WorkScheduler},
	IndexerContext,
};

use sd_ocr::EngineTag;
use sd_task_system::{Constraints, WorkInfo};

use std::sync::Arc;

use async_channel as chan;
use futures_concurrency::future::Join;
use tokio::{spawn, sync::Mutex, task::JoinHandle};
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, error, info, instrument, warn};

/// The text indexing pipeline, wired together.
///
/// Commands and media changes can be sent through the channels returned by [`TextIndexer::commands`]
/// and [`TextIndexer::changes`], or by calling the matching methods directly.
pub struct TextIndexer {
	ctx: Arc<IndexerContext>,
	scheduler: Arc<WorkScheduler>,
	monitors: Arc<Monitors>,
	keep_alive: Arc<KeepAliveSupervisor>,
	gateway: Arc<CommandGateway>,
	commands_tx: chan::Sender<(EngineTag, Command)>,
	changes_tx: chan::Sender<MediaChange>,
	loops: Mutex<Vec<JoinHandle<()>>>,
}

impl TextIndexer {
	/// Must be called within a tokio runtime, the command and change loops are spawned right away.
	#[must_use]
	pub fn new(
		ctx: IndexerContext,
		surface: Arc<dyn NotificationSurface>,
		keep_alive: Arc<dyn KeepAliveFacility>,
	) -> Self {
		Self::with_constraints(ctx, surface, keep_alive, Constraints::default())
	}

	#[must_use]
	pub fn with_constraints(
		ctx: IndexerContext,
		surface: Arc<dyn NotificationSurface>,
		keep_alive: Arc<dyn KeepAliveFacility>,
		constraints: Constraints,
	) -> Self {
		let ctx = Arc::new(ctx);

		let renderer = Arc::new(Renderer::new(surface));
		let scheduler =
			Arc::new(WorkScheduler::new(Arc::clone(&ctx)).with_constraints(constraints));
		let monitors = Arc::new(Monitors::new(Arc::clone(&ctx), Arc::clone(&renderer)));
		let keep_alive = Arc::new(KeepAliveSupervisor::new(
			keep_alive,
			Arc::clone(&ctx.progress),
			ctx.config.wake_lock_duration,
		));

		let gateway = Arc::new(CommandGateway::new(
			Arc::clone(&ctx),
			Arc::clone(&scheduler),
			Arc::clone(&monitors),
			Arc::clone(&keep_alive),
			renderer,
		));

		let listener = Arc::new(ChangeListener::new(
			Arc::clone(&ctx),
			Arc::clone(&scheduler),
			Arc::clone(&gateway),
		));

		let (commands_tx, commands_rx) = chan::unbounded();
		let (changes_tx, changes_rx) = chan::unbounded();

		let loops = vec![
			spawn(run_commands(Arc::clone(&gateway), commands_rx)),
			spawn(run_changes(listener, changes_rx)),
		];

		Self {
			ctx,
			scheduler,
			monitors,
			keep_alive,
			gateway,
			commands_tx,
			changes_tx,
			loops: Mutex::new(loops),
		}
	}

	#[must_use]
	pub fn commands(&self) -> chan::Sender<(EngineTag, Command)> {
		self.commands_tx.clone()
	}

	#[must_use]
	pub fn changes(&self) -> chan::Sender<MediaChange> {
		self.changes_tx.clone()
	}

	#[must_use]
	pub fn engines(&self) -> Vec<EngineTag> {
		self.ctx.engines.tags().cloned().collect()
	}

	/// Starts indexing with `engine`, or keeps it going if it already is.
	pub async fn start(&self, engine: &EngineTag) -> Result<ProgressState, Error> {
		self.gateway.activate(engine).await
	}

	pub async fn pause(&self, engine: &EngineTag) -> Result<(), Error> {
		self.gateway.handle(engine, Command::Pause).await
	}

	pub async fn resume(&self, engine: &EngineTag) -> Result<(), Error> {
		self.gateway.handle(engine, Command::Resume).await
	}

	pub async fn cancel(&self, engine: &EngineTag) -> Result<(), Error> {
		self.gateway.handle(engine, Command::Cancel).await
	}

	pub async fn dismiss_progress(&self, engine: &EngineTag) -> Result<ProgressState, Error> {
		self.gateway.dismiss_progress(engine).await
	}

	pub async fn show_progress(&self, engine: &EngineTag) -> Result<ProgressState, Error> {
		self.gateway.show_progress(engine).await
	}

	pub async fn progress(&self, engine: &EngineTag) -> Result<Option<ProgressState>, Error> {
		Ok(self.ctx.progress.get(engine).await?)
	}

	pub async fn subscribe(&self, engine: &EngineTag) -> WatchStream<Option<ProgressState>> {
		self.ctx.progress.subscribe(engine).await
	}

	pub async fn stats(&self, engine: &EngineTag) -> Result<RecordStats, Error> {
		Ok(self.ctx.records.stats(engine).await?)
	}

	pub async fn search(
		&self,
		engine: &EngineTag,
		query: &str,
		limit: u32,
	) -> Result<Vec<ExtractionRecord>, Error> {
		Ok(self.ctx.records.search(engine, query, limit).await?)
	}

	pub async fn get_record(
		&self,
		engine: &EngineTag,
		item_id: ItemId,
	) -> Result<Option<ExtractionRecord>, Error> {
		Ok(self.ctx.records.get_record(engine, item_id).await?)
	}

	pub async fn work(&self, engine: &EngineTag) -> Vec<WorkInfo> {
		self.scheduler.work(engine).await
	}

	pub async fn is_monitoring(&self, engine: &EngineTag) -> bool {
		self.monitors.is_running(engine).await
	}

	pub async fn is_kept_alive(&self, engine: &EngineTag) -> bool {
		self.keep_alive.is_active(engine).await
	}

	/// Throws away the engine's progress and starts over from the media source. Records are kept,
	/// so recorded items aren't extracted again.
	#[instrument(skip(self), fields(%engine), err)]
	pub async fn force_restart(&self, engine: &EngineTag) -> Result<ProgressState, Error> {
		self.scheduler.cancel_all(engine).await;
		self.monitors.stop(engine).await;

		let progress = &self.ctx.progress;

		progress.clear(engine).await?;

		let UniverseCounts {
			total_items,
			processed_items,
		} = self.ctx.universe_counts(engine).await?;

		progress
			.upsert(
				engine,
				ProgressUpdate::counts(total_items, processed_items),
				Emission::Forced,
			)
			.await?;

		warn!("Text indexing force restarted");

		self.gateway.activate(engine).await
	}

	/// Restarts monitoring for every engine stored as processing or paused, re-enqueuing work for
	/// the processing ones. Meant to be called once the host comes back up.
	#[instrument(skip(self), err)]
	pub async fn ensure_monitoring(&self) -> Result<usize, Error> {
		let mut resumed = 0;

		for state in self.ctx.progress.all().await? {
			if !state.is_processing && !state.is_paused {
				continue;
			}

			let engine = &state.engine;

			if self.ctx.engines.get(engine).is_none() {
				warn!(%engine, "Stored progress for an engine that isn't registered, skipping");
				continue;
			}

			self.monitors.ensure_running(engine).await;

			if state.is_processing {
				self.keep_alive.start(engine).await;
				watch_dispatched(
					self.scheduler
						.enqueue_batch(engine, self.ctx.config.batch_size, true)
						.await?,
				);
			}

			debug!(%engine, is_paused = state.is_paused, "Monitoring restored");
			resumed += 1;
		}

		if resumed > 0 {
			info!(engines_count = resumed, "Restored text indexing after restart");
		}

		Ok(resumed)
	}

	/// Stops every loop and worker. Stored progress is left as is, so [`Self::ensure_monitoring`]
	/// picks it up on the next start.
	#[instrument(skip(self))]
	pub async fn shutdown(&self) {
		self.commands_tx.close();
		self.changes_tx.close();

		let loops = std::mem::take(&mut *self.loops.lock().await);
		for res in loops.join().await {
			if let Err(e) = res {
				error!(?e, "Text indexer loop panicked");
			}
		}

		(
			self.monitors.stop_all(),
			self.keep_alive.shutdown(),
			self.scheduler.shutdown(),
		)
			.join()
			.await;

		info!("Text indexer shutdown");
	}
}
