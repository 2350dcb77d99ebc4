use sd_task_system::{
	check_interruption, ExecStatus, Interrupter, InterruptionKind, IntoAnyTaskOutput, Task, TaskId,
	TaskOutput,
};

use std::{
	sync::{
		atomic::{AtomicUsize, Ordering},
		Arc,
	},
	time::Duration,
};

use async_trait::async_trait;
use thiserror::Error;
use tokio::{sync::Notify, time::sleep};
use tracing::info;

#[derive(Debug, Error)]
pub enum SampleError {
	#[error("Sample error")]
	SampleError,
}

#[derive(Debug)]
pub struct NeverTask {
	id: TaskId,
}

impl Default for NeverTask {
	fn default() -> Self {
		Self {
			id: TaskId::new_v4(),
		}
	}
}

#[async_trait]
impl Task<SampleError> for NeverTask {
	fn id(&self) -> TaskId {
		self.id
	}

	async fn run(&mut self, interrupter: &Interrupter) -> Result<ExecStatus, SampleError> {
		match interrupter.await {
			InterruptionKind::Pause => {
				info!("Pausing NeverTask <id='{}'>", self.id);
				Ok(ExecStatus::Paused)
			}
			InterruptionKind::Cancel => {
				info!("Canceling NeverTask <id='{}'>", self.id);
				Ok(ExecStatus::Canceled)
			}
		}
	}
}

#[derive(Debug)]
pub struct ReadyTask {
	id: TaskId,
	value: u32,
}

impl ReadyTask {
	pub fn new(value: u32) -> Self {
		Self {
			id: TaskId::new_v4(),
			value,
		}
	}
}

#[async_trait]
impl Task<SampleError> for ReadyTask {
	fn id(&self) -> TaskId {
		self.id
	}

	async fn run(&mut self, _interrupter: &Interrupter) -> Result<ExecStatus, SampleError> {
		Ok(ExecStatus::Done(self.value.into_output()))
	}
}

#[derive(Debug, Default)]
pub struct BrokenTask;

#[async_trait]
impl Task<SampleError> for BrokenTask {
	fn id(&self) -> TaskId {
		TaskId::nil()
	}

	async fn run(&mut self, _interrupter: &Interrupter) -> Result<ExecStatus, SampleError> {
		Err(SampleError::SampleError)
	}
}

#[derive(Debug, Default)]
pub struct PanicTask;

#[async_trait]
impl Task<SampleError> for PanicTask {
	fn id(&self) -> TaskId {
		TaskId::nil()
	}

	async fn run(&mut self, _interrupter: &Interrupter) -> Result<ExecStatus, SampleError> {
		panic!("on purpose");
	}
}

/// Blocks until signaled, then counts one run.
#[derive(Debug)]
pub struct WaitSignalTask {
	id: TaskId,
	signal: Arc<Notify>,
	runs: Arc<AtomicUsize>,
}

impl WaitSignalTask {
	pub fn new(signal: Arc<Notify>, runs: Arc<AtomicUsize>) -> Self {
		Self {
			id: TaskId::new_v4(),
			signal,
			runs,
		}
	}
}

#[async_trait]
impl Task<SampleError> for WaitSignalTask {
	fn id(&self) -> TaskId {
		self.id
	}

	async fn run(&mut self, _interrupter: &Interrupter) -> Result<ExecStatus, SampleError> {
		self.signal.notified().await;
		self.runs.fetch_add(1, Ordering::SeqCst);
		Ok(ExecStatus::Done(TaskOutput::Empty))
	}
}

/// Sleeps in small steps, checking for interruption between each of them.
#[derive(Debug)]
pub struct SteppingTask {
	id: TaskId,
	steps: usize,
	pub completed: Arc<AtomicUsize>,
}

impl SteppingTask {
	pub fn new(steps: usize, completed: Arc<AtomicUsize>) -> Self {
		Self {
			id: TaskId::new_v4(),
			steps,
			completed,
		}
	}
}

#[async_trait]
impl Task<SampleError> for SteppingTask {
	fn id(&self) -> TaskId {
		self.id
	}

	async fn run(&mut self, interrupter: &Interrupter) -> Result<ExecStatus, SampleError> {
		for _ in 0..self.steps {
			check_interruption!(interrupter);
			sleep(Duration::from_millis(10)).await;
			self.completed.fetch_add(1, Ordering::SeqCst);
		}

		Ok(ExecStatus::Done(TaskOutput::Empty))
	}
}
