use crate::{
	error::Error,
	media::IndexableItem,
	worker::{BatchMode, BatchReport, IndexingWorker},
	IndexerContext,
};

use sd_ocr::EngineTag;
use sd_task_system::{
	Constraints, Dispatched, ExistingWorkPolicy, TaskDispatcher, TaskHandle, TaskOutput,
	TaskStatus, TaskSystem, WorkInfo, WorkRequest,
};

use std::sync::Arc;

use tokio::spawn;
use tracing::{debug, error, info, instrument, trace, warn};

const BATCH_KEY: &str = "batch";

/// Deduplicates and enqueues indexing work, one lane per engine.
///
/// Single items are keyed by item id and keep the outstanding request, batches are keyed by engine
/// and replace a queued batch. A running batch is never replaced, only the worker's own pause check
/// stops it.
pub struct WorkScheduler {
	system: TaskSystem<Error>,
	dispatcher: TaskDispatcher<Error>,
	ctx: Arc<IndexerContext>,
	constraints: Constraints,
}

impl WorkScheduler {
	#[must_use]
	pub fn new(ctx: Arc<IndexerContext>) -> Self {
		let system = TaskSystem::new();

		Self {
			dispatcher: system.get_dispatcher(),
			system,
			ctx,
			constraints: Constraints::default(),
		}
	}

	/// Constraints attached to every request from now on, handed untouched to the executor.
	#[must_use]
	pub const fn with_constraints(mut self, constraints: Constraints) -> Self {
		self.constraints = constraints;
		self
	}

	fn request(&self, engine: &EngineTag, key: String, policy: ExistingWorkPolicy) -> WorkRequest {
		WorkRequest::new(engine.as_str(), key)
			.with_tag(engine.as_str())
			.with_policy(policy)
			.with_constraints(self.constraints)
	}

	#[instrument(skip(self, item), fields(%engine, item_id = item.id), err)]
	pub async fn enqueue_single(
		&self,
		engine: &EngineTag,
		item: IndexableItem,
	) -> Result<Dispatched<Error>, Error> {
		let request = self.request(engine, format!("item-{}", item.id), ExistingWorkPolicy::Keep);

		let dispatched = self
			.dispatcher
			.dispatch(
				request,
				IndexingWorker::new(engine.clone(), BatchMode::Single(item), Arc::clone(&self.ctx)),
			)
			.await?;

		if let Dispatched::Kept(task_id) = &dispatched {
			debug!(%task_id, "Item already has outstanding work, dropping request");
		}

		Ok(dispatched)
	}

	#[instrument(skip(self), fields(%engine), err)]
	pub async fn enqueue_batch(
		&self,
		engine: &EngineTag,
		batch_size: usize,
		continuous: bool,
	) -> Result<Dispatched<Error>, Error> {
		let mode = if continuous {
			BatchMode::Continuous { batch_size }
		} else {
			BatchMode::Batch { batch_size }
		};

		let request = self.request(engine, BATCH_KEY.to_string(), ExistingWorkPolicy::Replace);

		Ok(self
			.dispatcher
			.dispatch(
				request,
				IndexingWorker::new(engine.clone(), mode, Arc::clone(&self.ctx)),
			)
			.await?)
	}

	/// Cancels every queued or running piece of work for `engine`, returning how many were hit.
	#[instrument(skip(self), fields(%engine))]
	pub async fn cancel_all(&self, engine: &EngineTag) -> usize {
		let count = self.dispatcher.cancel_by_tag(engine.as_str()).await;

		if count > 0 {
			info!(count, "Canceled outstanding indexing work");
		}

		count
	}

	pub async fn work(&self, engine: &EngineTag) -> Vec<WorkInfo> {
		self.dispatcher.work_by_tag(engine.as_str()).await
	}

	pub async fn shutdown(&self) {
		self.system.shutdown().await;
	}
}

/// Awaits a dispatched worker in the background, only logging how it ended.
pub fn watch_dispatched(dispatched: Dispatched<Error>) {
	if let Some(handle) = dispatched.into_handle() {
		spawn(log_outcome(handle));
	}
}

async fn log_outcome(handle: TaskHandle<Error>) {
	let task_id = handle.task_id();

	match handle.await {
		Ok(TaskStatus::Done((_, TaskOutput::Out(out)))) => match out.downcast::<BatchReport>() {
			Ok(report) => trace!(%task_id, ?report, "Indexing work done"),
			Err(_) => warn!(%task_id, "Indexing work returned an unexpected output"),
		},
		Ok(TaskStatus::Done((_, TaskOutput::Empty))) => trace!(%task_id, "Indexing work done"),
		Ok(TaskStatus::Canceled) => debug!(%task_id, "Indexing work canceled"),
		Ok(TaskStatus::Shutdown(_)) => debug!(%task_id, "Indexing work dropped on shutdown"),
		Ok(TaskStatus::Error(e)) => error!(%task_id, ?e, "Indexing work failed"),
		Err(e) => error!(%task_id, ?e, "Indexing work was lost"),
	}
}
