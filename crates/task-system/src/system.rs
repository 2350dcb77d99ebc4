use std::{
	collections::{HashMap, VecDeque},
	fmt,
	panic::AssertUnwindSafe,
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
};

use async_channel as chan;
use futures::FutureExt;
use futures_concurrency::future::Join;
use tokio::{
	spawn,
	sync::{oneshot, Mutex, Notify, RwLock},
	task::JoinHandle,
};
use tracing::{debug, error, instrument, trace, warn};

use super::{
	error::{RunError, SystemError},
	policy::{ExistingWorkPolicy, WorkInfo, WorkRequest, WorkState},
	task::{
		ExecStatus, Interrupter, InterruptionKind, IntoTask, Task, TaskHandle, TaskId,
		TaskRemoteController, TaskStatus,
	},
};

type DoneTx<E> = oneshot::Sender<Result<TaskStatus<E>, SystemError>>;

/// The task system's main entry point.
///
/// Tasks are placed in named lanes. Each lane runs a single task at a time, in dispatch order,
/// while different lanes run concurrently with each other. Lanes are created on their first dispatch.
pub struct System<E: RunError> {
	inner: Arc<Inner<E>>,
	dispatcher: Dispatcher<E>,
}

struct Inner<E: RunError> {
	lanes: RwLock<HashMap<String, Arc<Lane<E>>>>,
	runners: Mutex<Vec<JoinHandle<()>>>,
	is_shutting_down: AtomicBool,
}

impl<E: RunError> fmt::Debug for System<E> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("System")
			.field(
				"is_shutting_down",
				&self.inner.is_shutting_down.load(Ordering::Relaxed),
			)
			.finish_non_exhaustive()
	}
}

impl<E: RunError> Default for System<E> {
	fn default() -> Self {
		Self::new()
	}
}

impl<E: RunError> System<E> {
	#[must_use]
	pub fn new() -> Self {
		let inner = Arc::new(Inner {
			lanes: RwLock::new(HashMap::new()),
			runners: Mutex::new(Vec::new()),
			is_shutting_down: AtomicBool::new(false),
		});

		Self {
			dispatcher: Dispatcher {
				inner: Arc::clone(&inner),
			},
			inner,
		}
	}

	pub async fn dispatch(
		&self,
		request: WorkRequest,
		into_task: impl IntoTask<E>,
	) -> Result<Dispatched<E>, SystemError> {
		self.dispatcher.dispatch(request, into_task).await
	}

	#[must_use]
	pub fn get_dispatcher(&self) -> Dispatcher<E> {
		self.dispatcher.clone()
	}

	/// Stops every lane. Queued tasks and running tasks that honor their [`Interrupter`] are handed
	/// back to their dispatchers as [`TaskStatus::Shutdown`].
	#[instrument(skip(self))]
	pub async fn shutdown(&self) {
		if self.inner.is_shutting_down.swap(true, Ordering::AcqRel) {
			warn!("Task system already shutting down");
			return;
		}

		let lanes = self
			.inner
			.lanes
			.read()
			.await
			.values()
			.cloned()
			.collect::<Vec<_>>();

		lanes
			.iter()
			.map(|lane| lane.shutdown())
			.collect::<Vec<_>>()
			.join()
			.await;

		let runners = std::mem::take(&mut *self.inner.runners.lock().await);

		for res in runners.join().await {
			if let Err(e) = res {
				error!(?e, "Lane runner failed to stop gracefully");
			}
		}

		debug!(lanes_count = lanes.len(), "Task system shutdown");
	}
}

/// Outcome of a dispatch.
#[derive(Debug)]
pub enum Dispatched<E: RunError> {
	/// The task was placed in its lane, possibly superseding a queued task with the same key.
	Enqueued(TaskHandle<E>),
	/// A task with the same key is already queued or running and the request asked to keep it,
	/// so the new task was dropped.
	Kept(TaskId),
}

impl<E: RunError> Dispatched<E> {
	#[must_use]
	pub fn into_handle(self) -> Option<TaskHandle<E>> {
		match self {
			Self::Enqueued(handle) => Some(handle),
			Self::Kept(_) => None,
		}
	}
}

/// A cheaply clonable front to the [`System`], to be handed to whoever needs to dispatch or cancel work.
pub struct Dispatcher<E: RunError> {
	inner: Arc<Inner<E>>,
}

impl<E: RunError> Clone for Dispatcher<E> {
	fn clone(&self) -> Self {
		Self {
			inner: Arc::clone(&self.inner),
		}
	}
}

impl<E: RunError> fmt::Debug for Dispatcher<E> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Dispatcher").finish_non_exhaustive()
	}
}

impl<E: RunError> Dispatcher<E> {
	#[instrument(skip_all, fields(lane = %request.lane, key = %request.key, policy = ?request.policy))]
	pub async fn dispatch(
		&self,
		request: WorkRequest,
		into_task: impl IntoTask<E>,
	) -> Result<Dispatched<E>, SystemError> {
		if self.inner.is_shutting_down.load(Ordering::Acquire) {
			warn!("Refusing dispatch, task system is shutting down");
			return Err(SystemError::Shutdown);
		}

		let lane = self.lane(&request.lane).await;

		lane.enqueue(request, into_task.into_task()).await
	}

	/// Cancels every queued or running task carrying `tag`, in every lane, returning how many were hit.
	pub async fn cancel_by_tag(&self, tag: &str) -> usize {
		let lanes = self
			.inner
			.lanes
			.read()
			.await
			.values()
			.cloned()
			.collect::<Vec<_>>();

		let mut count = 0;
		for lane in lanes {
			count += lane.cancel_by_tag(tag).await;
		}

		debug!(%tag, count, "Canceled work by tag");

		count
	}

	pub async fn work_by_tag(&self, tag: &str) -> Vec<WorkInfo> {
		let lanes = self
			.inner
			.lanes
			.read()
			.await
			.values()
			.cloned()
			.collect::<Vec<_>>();

		let mut infos = Vec::new();
		for lane in lanes {
			infos.extend(lane.work_by_tag(tag).await);
		}

		infos
	}

	async fn lane(&self, name: &str) -> Arc<Lane<E>> {
		if let Some(lane) = self.inner.lanes.read().await.get(name) {
			return Arc::clone(lane);
		}

		let mut lanes = self.inner.lanes.write().await;
		// Someone may have created it while we were waiting for the write lock
		if let Some(lane) = lanes.get(name) {
			return Arc::clone(lane);
		}

		let lane = Arc::new(Lane::new(name.to_string()));
		lanes.insert(name.to_string(), Arc::clone(&lane));

		self.inner
			.runners
			.lock()
			.await
			.push(spawn(Arc::clone(&lane).run()));

		trace!(lane = %name, "New lane created");

		lane
	}
}

struct PendingWork<E: RunError> {
	task_id: TaskId,
	request: WorkRequest,
	task: Box<dyn Task<E>>,
	done_tx: DoneTx<E>,
}

struct RunningWork {
	task_id: TaskId,
	request: WorkRequest,
	interrupt_tx: chan::Sender<InterruptionKind>,
}

impl RunningWork {
	fn interrupt(&self, kind: InterruptionKind) {
		if self.interrupt_tx.try_send(kind).is_err() {
			trace!(task_id = %self.task_id, "Running task already finished its run");
		}
	}
}

struct LaneState<E: RunError> {
	queue: VecDeque<PendingWork<E>>,
	running: Option<RunningWork>,
	is_shutting_down: bool,
}

pub struct Lane<E: RunError> {
	name: String,
	state: Mutex<LaneState<E>>,
	wake: Notify,
}

impl<E: RunError> fmt::Debug for Lane<E> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Lane")
			.field("name", &self.name)
			.finish_non_exhaustive()
	}
}

impl<E: RunError> Lane<E> {
	fn new(name: String) -> Self {
		Self {
			name,
			state: Mutex::new(LaneState {
				queue: VecDeque::new(),
				running: None,
				is_shutting_down: false,
			}),
			wake: Notify::new(),
		}
	}

	async fn enqueue(
		self: &Arc<Self>,
		request: WorkRequest,
		task: Box<dyn Task<E>>,
	) -> Result<Dispatched<E>, SystemError> {
		let task_id = task.id();
		let (done_tx, done_rx) = oneshot::channel();

		let mut state = self.state.lock().await;

		if state.is_shutting_down {
			return Err(SystemError::Shutdown);
		}

		let running_id = state
			.running
			.as_ref()
			.filter(|running| running.request.key == request.key)
			.map(|running| running.task_id);

		let queued_pos = state
			.queue
			.iter()
			.position(|pending| pending.request.key == request.key);

		match (request.policy, running_id, queued_pos) {
			(ExistingWorkPolicy::Keep, Some(existing), _) => {
				trace!(%existing, "Work with the same key is running, keeping it");
				return Ok(Dispatched::Kept(existing));
			}

			(ExistingWorkPolicy::Keep, None, Some(pos)) => {
				let existing = state.queue[pos].task_id;
				trace!(%existing, "Work with the same key is queued, keeping it");
				return Ok(Dispatched::Kept(existing));
			}

			(ExistingWorkPolicy::Replace, _, Some(pos)) => {
				let superseded = std::mem::replace(
					&mut state.queue[pos],
					PendingWork {
						task_id,
						request,
						task,
						done_tx,
					},
				);

				debug!(superseded = %superseded.task_id, %task_id, "Replaced queued work");

				if superseded.done_tx.send(Ok(TaskStatus::Canceled)).is_err() {
					trace!("Superseded task handle was already dropped");
				}
			}

			(_, _, None) => {
				state.queue.push_back(PendingWork {
					task_id,
					request,
					task,
					done_tx,
				});

				trace!(%task_id, queue_len = state.queue.len(), "Task enqueued");
			}
		}

		drop(state);
		self.wake.notify_one();

		Ok(Dispatched::Enqueued(TaskHandle {
			done_rx,
			controller: TaskRemoteController {
				lane: Arc::clone(self),
				task_id,
			},
		}))
	}

	pub(crate) async fn cancel(&self, task_id: TaskId) -> bool {
		let mut state = self.state.lock().await;

		if let Some(pos) = state
			.queue
			.iter()
			.position(|pending| pending.task_id == task_id)
		{
			if let Some(pending) = state.queue.remove(pos) {
				if pending.done_tx.send(Ok(TaskStatus::Canceled)).is_err() {
					trace!(%task_id, "Canceled queued task handle was already dropped");
				}
			}

			return true;
		}

		if let Some(running) = state
			.running
			.as_ref()
			.filter(|running| running.task_id == task_id)
		{
			running.interrupt(InterruptionKind::Cancel);
			return true;
		}

		false
	}

	async fn cancel_by_tag(&self, tag: &str) -> usize {
		let mut state = self.state.lock().await;

		let (canceled, kept) = state
			.queue
			.drain(..)
			.partition::<VecDeque<_>, _>(|pending| pending.request.has_tag(tag));

		state.queue = kept;

		let mut count = canceled.len();
		for pending in canceled {
			if pending.done_tx.send(Ok(TaskStatus::Canceled)).is_err() {
				trace!(task_id = %pending.task_id, "Canceled queued task handle was already dropped");
			}
		}

		if let Some(running) = state
			.running
			.as_ref()
			.filter(|running| running.request.has_tag(tag))
		{
			running.interrupt(InterruptionKind::Cancel);
			count += 1;
		}

		count
	}

	async fn work_by_tag(&self, tag: &str) -> Vec<WorkInfo> {
		let state = self.state.lock().await;

		state
			.running
			.iter()
			.filter(|running| running.request.has_tag(tag))
			.map(|running| {
				WorkInfo::from_request(running.task_id, &running.request, WorkState::Running)
			})
			.chain(
				state
					.queue
					.iter()
					.filter(|pending| pending.request.has_tag(tag))
					.map(|pending| {
						WorkInfo::from_request(pending.task_id, &pending.request, WorkState::Queued)
					}),
			)
			.collect()
	}

	async fn shutdown(&self) {
		let mut state = self.state.lock().await;
		state.is_shutting_down = true;

		for pending in state.queue.drain(..) {
			if pending
				.done_tx
				.send(Ok(TaskStatus::Shutdown(pending.task)))
				.is_err()
			{
				trace!(task_id = %pending.task_id, "Queued task handle was already dropped");
			}
		}

		if let Some(running) = &state.running {
			running.interrupt(InterruptionKind::Pause);
		}

		drop(state);
		self.wake.notify_one();
	}

	async fn run(self: Arc<Self>) {
		loop {
			let next = {
				let mut state = self.state.lock().await;

				match state.queue.pop_front() {
					Some(pending) => {
						let (interrupt_tx, interrupt_rx) = chan::unbounded();
						state.running = Some(RunningWork {
							task_id: pending.task_id,
							request: pending.request.clone(),
							interrupt_tx,
						});

						Some((pending, interrupt_rx))
					}
					None if state.is_shutting_down => break,
					None => None,
				}
			};

			if let Some((pending, interrupt_rx)) = next {
				self.execute(pending, interrupt_rx).await;
			} else {
				self.wake.notified().await;
			}
		}

		trace!(lane = %self.name, "Lane runner stopped");
	}

	#[instrument(skip_all, fields(lane = %self.name, task_id = %pending.task_id, key = %pending.request.key))]
	async fn execute(
		&self,
		pending: PendingWork<E>,
		interrupt_rx: chan::Receiver<InterruptionKind>,
	) {
		let PendingWork {
			task_id,
			mut task,
			done_tx,
			..
		} = pending;

		let interrupter = Interrupter::new(interrupt_rx);

		trace!("Running task");

		let res = AssertUnwindSafe(task.run(&interrupter))
			.catch_unwind()
			.await;

		self.state.lock().await.running = None;

		let status = match res {
			Ok(Ok(ExecStatus::Done(out))) => {
				trace!("Task done");
				Ok(TaskStatus::Done((task_id, out)))
			}
			Ok(Ok(ExecStatus::Canceled)) => {
				trace!("Task canceled");
				Ok(TaskStatus::Canceled)
			}
			Ok(Ok(ExecStatus::Paused)) => {
				trace!("Task paused, handing it back");
				Ok(TaskStatus::Shutdown(task))
			}
			Ok(Err(e)) => {
				warn!(?e, "Task failed");
				Ok(TaskStatus::Error(e))
			}
			Err(_) => {
				error!("Task unexpectedly panicked");
				Err(SystemError::TaskPanicked(task_id))
			}
		};

		if done_tx.send(status).is_err() {
			trace!("Task handle was dropped before completion");
		}
	}
}
