//!
//! # Task System
//!
//! A small executor for background work that must never run twice at the same time for the same
//! subject. Work is dispatched together with a [`WorkRequest`], which names:
//! - the lane that runs it, each lane runs one task at a time in dispatch order;
//! - the deduplication key and the [`ExistingWorkPolicy`] applied when that key is already present;
//! - tags that can later be used to cancel or inspect work in bulk;
//! - opaque [`Constraints`] that are carried along untouched.
//!
//! Tasks cooperate with cancellation through the [`Interrupter`], and when the system is shutdown every
//! queued or interrupted task is handed back to its dispatcher.
//!
//! ## Basic example
//!
//! ```
//! use sd_task_system::{
//! 	Dispatched, ExecStatus, Interrupter, Task, TaskId, TaskOutput, TaskStatus, TaskSystem, WorkRequest,
//! };
//! use async_trait::async_trait;
//! use thiserror::Error;
//!
//! #[derive(Debug, Error)]
//! pub enum SampleError {
//!     #[error("Sample error")]
//!     SampleError,
//! }
//!
//! #[derive(Debug)]
//! pub struct ReadyTask {
//!     id: TaskId,
//! }
//!
//! #[async_trait]
//! impl Task<SampleError> for ReadyTask {
//!     fn id(&self) -> TaskId {
//!         self.id
//!     }
//!
//!     async fn run(&mut self, _interrupter: &Interrupter) -> Result<ExecStatus, SampleError> {
//!         Ok(ExecStatus::Done(TaskOutput::Empty))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let system = TaskSystem::<SampleError>::new();
//!
//!     let Ok(Dispatched::Enqueued(handle)) = system
//!         .dispatch(WorkRequest::new("lane", "ready"), ReadyTask { id: TaskId::new_v4() })
//!         .await
//!     else {
//!         panic!("first dispatch on an empty lane is always enqueued");
//!     };
//!
//!     assert!(matches!(handle.await, Ok(TaskStatus::Done((_, TaskOutput::Empty)))));
//!
//!     system.shutdown().await;
//! }
//! ```

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

mod error;
mod policy;
mod system;
mod task;

pub use error::{RunError, SystemError as TaskSystemError};
pub use policy::{Constraints, ExistingWorkPolicy, WorkInfo, WorkRequest, WorkState};
pub use system::{Dispatched, Dispatcher as TaskDispatcher, System as TaskSystem};
pub use task::{
	AnyTaskOutput, ExecStatus, Interrupter, InterrupterFuture, InterruptionKind, IntoAnyTaskOutput,
	IntoTask, Task, TaskHandle, TaskId, TaskOutput, TaskRemoteController, TaskStatus,
};
