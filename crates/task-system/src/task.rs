use std::{
	fmt,
	future::{Future, IntoFuture},
	pin::Pin,
	sync::Arc,
	task::{Context, Poll},
};

use async_channel as chan;
use async_trait::async_trait;
use downcast_rs::{impl_downcast, Downcast};
use tokio::sync::oneshot;
use tracing::{instrument, trace, warn};
use uuid::Uuid;

use super::{
	error::{RunError, SystemError},
	system::Lane,
};

/// A unique identifier for a task using the [`uuid`](https://docs.rs/uuid) crate.
pub type TaskId = Uuid;

/// A trait that represents any kind of output that a task can return.
///
/// The user will downcast it to the concrete type that the task returns. Most of the time,
/// tasks will not return anything, so it isn't a costly abstraction, as only a heap allocation
/// is needed when the user wants to return a [`Box<dyn AnyTaskOutput>`].
pub trait AnyTaskOutput: Send + Downcast + 'static {}

impl fmt::Debug for Box<dyn AnyTaskOutput> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "<AnyTaskOutput>")
	}
}

impl_downcast!(AnyTaskOutput);

/// Blanket implementation for all types that implements `Send + 'static`
impl<T: Send + 'static> AnyTaskOutput for T {}

/// A helper trait to convert any type that implements [`AnyTaskOutput`] into a [`TaskOutput`], boxing it.
pub trait IntoAnyTaskOutput {
	fn into_output(self) -> TaskOutput;
}

impl<T: AnyTaskOutput + 'static> IntoAnyTaskOutput for T {
	fn into_output(self) -> TaskOutput {
		TaskOutput::Out(Box::new(self))
	}
}

/// An enum representing whether a task returned anything or not.
#[derive(Debug)]
pub enum TaskOutput {
	Out(Box<dyn AnyTaskOutput>),
	Empty,
}

impl From<()> for TaskOutput {
	fn from((): ()) -> Self {
		Self::Empty
	}
}

/// An enum representing all possible outcomes for a task.
#[derive(Debug)]
pub enum TaskStatus<E: RunError> {
	/// The task has finished successfully and maybe has some output for the user.
	Done((TaskId, TaskOutput)),
	/// Task was gracefully cancelled, either by its handle, by a tag cancellation or because a
	/// newer request replaced it while it was still queued.
	Canceled,
	/// The task system was shutdown and we give back the task to the user so they can downcast it
	/// back to the original concrete type and re-dispatch it later.
	Shutdown(Box<dyn Task<E>>),
	/// Task had and error so we return it back and the user can handle it appropriately.
	Error(E),
}

/// Represents whether the current [`Task::run`] method on a task finished successfully or was interrupted.
#[derive(Debug)]
pub enum ExecStatus {
	Done(TaskOutput),
	/// Only meaningful while the system is shutting down, the task will be handed back to its dispatcher.
	Paused,
	Canceled,
}

/// A helper trait to convert any type that implements [`Task<E>`] into a [`Box<dyn Task<E>>`], boxing it.
pub trait IntoTask<E>: Send {
	fn into_task(self) -> Box<dyn Task<E>>;
}

impl<T: Task<E> + 'static, E: RunError> IntoTask<E> for T {
	fn into_task(self) -> Box<dyn Task<E>> {
		Box::new(self)
	}
}

/// The main trait that represents a task that can be dispatched to the task system.
///
/// All tasks in the task system must return the same generic error type, so we can have a unified
/// error handling.
#[async_trait]
pub trait Task<E: RunError>: Downcast + Send + Sync + 'static {
	/// An unique identifier for the task, it will be used to identify the task on the system and also to the user.
	fn id(&self) -> TaskId;

	/// The work itself. The [`interrupter`](Interrupter) should be checked at safe points, so
	/// cancellation never leaves half written state behind.
	async fn run(&mut self, interrupter: &Interrupter) -> Result<ExecStatus, E>;
}

impl_downcast!(Task<E> where E: RunError);

impl<E: RunError> fmt::Debug for Box<dyn Task<E>> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "<Task>")
	}
}

pin_project_lite::pin_project! {
	/// Intermediate struct to wait until a pause or a cancel request reaches the running task.
	#[must_use = "`InterrupterFuture` does nothing unless polled"]
	pub struct InterrupterFuture<'recv> {
		#[pin]
		fut: chan::Recv<'recv, InterruptionKind>,
	}
}

impl Future for InterrupterFuture<'_> {
	type Output = InterruptionKind;

	fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		let this = self.project();

		match this.fut.poll(cx) {
			Poll::Ready(Ok(kind)) => {
				trace!(?kind, "Running task received interruption request");
				Poll::Ready(kind)
			}
			Poll::Ready(Err(chan::RecvError)) => {
				// The lane dropped its sender, nobody can interrupt us anymore
				warn!("Task interrupter channel closed, will run task until it finishes!");
				Poll::Pending
			}
			Poll::Pending => Poll::Pending,
		}
	}
}

/// Allows `interrupter.await` inside a task, resolving once a pause or a cancel is requested.
impl<'recv> IntoFuture for &'recv Interrupter {
	type Output = InterruptionKind;

	type IntoFuture = InterrupterFuture<'recv>;

	fn into_future(self) -> Self::IntoFuture {
		InterrupterFuture {
			fut: self.interrupt_rx.recv(),
		}
	}
}

/// A helper object that can be used to check if a pause or a cancel was requested, so the task `run`
/// implementation can decide the appropriated moment to stop.
#[derive(Debug)]
pub struct Interrupter {
	interrupt_rx: chan::Receiver<InterruptionKind>,
}

impl Interrupter {
	pub(crate) const fn new(interrupt_rx: chan::Receiver<InterruptionKind>) -> Self {
		Self { interrupt_rx }
	}

	/// Non-blocking check for a pending interruption request.
	pub fn try_check_interrupt(&self) -> Option<InterruptionKind> {
		self.interrupt_rx.try_recv().ok().inspect(|kind| {
			trace!(?kind, "Interrupter received interruption request");
		})
	}
}

#[macro_export]
macro_rules! check_interruption {
	($interrupter:ident) => {
		let interrupter: &$crate::Interrupter = $interrupter;

		match interrupter.try_check_interrupt() {
			Some($crate::InterruptionKind::Cancel) => {
				::tracing::trace!("Task was canceled by the user");
				return Ok($crate::ExecStatus::Canceled);
			}
			Some($crate::InterruptionKind::Pause) => {
				::tracing::trace!("Task was paused by the task system shutdown");
				return Ok($crate::ExecStatus::Paused);
			}
			None => { /* Everything is Awesome! */ }
		}
	};
}

/// The kind of interruption that can be requested, a pause (issued on shutdown) or a cancel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptionKind {
	Pause,
	Cancel,
}

/// A remote controller of a task that can be used to cancel it, even after its handle was awaited elsewhere.
#[derive(Debug)]
pub struct TaskRemoteController<E: RunError> {
	pub(crate) lane: Arc<Lane<E>>,
	pub(crate) task_id: TaskId,
}

impl<E: RunError> Clone for TaskRemoteController<E> {
	fn clone(&self) -> Self {
		Self {
			lane: Arc::clone(&self.lane),
			task_id: self.task_id,
		}
	}
}

impl<E: RunError> TaskRemoteController<E> {
	/// Get the unique identifier of the task
	#[must_use]
	pub const fn task_id(&self) -> TaskId {
		self.task_id
	}

	/// Gracefully cancel the task. A queued task is removed from its lane right away, a running one
	/// receives a cancel request through its [`Interrupter`].
	#[instrument(skip(self), fields(task_id = %self.task_id))]
	pub async fn cancel(&self) -> Result<(), SystemError> {
		if self.lane.cancel(self.task_id).await {
			Ok(())
		} else {
			trace!("Task is not queued nor running anymore");
			Err(SystemError::TaskNotFound(self.task_id))
		}
	}
}

/// A handle returned when a task is dispatched to the task system, it can be used to cancel the task or
/// wait until it gets completed.
#[derive(Debug)]
pub struct TaskHandle<E: RunError> {
	pub(crate) done_rx: oneshot::Receiver<Result<TaskStatus<E>, SystemError>>,
	pub(crate) controller: TaskRemoteController<E>,
}

impl<E: RunError> Future for TaskHandle<E> {
	type Output = Result<TaskStatus<E>, SystemError>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		let task_id = self.controller.task_id;

		Pin::new(&mut self.done_rx)
			.poll(cx)
			.map(|res| res.unwrap_or(Err(SystemError::HandleClosed(task_id))))
	}
}

impl<E: RunError> TaskHandle<E> {
	/// Get the unique identifier of the task
	#[must_use]
	pub const fn task_id(&self) -> TaskId {
		self.controller.task_id
	}

	/// Gracefully cancel the task at a safe point defined by the task using the [`Interrupter`]
	pub async fn cancel(&self) -> Result<(), SystemError> {
		self.controller.cancel().await
	}

	/// Gets the [`TaskRemoteController`] object that can be used to cancel the task remotely.
	#[must_use]
	pub fn remote_controller(&self) -> TaskRemoteController<E> {
		self.controller.clone()
	}
}
