use crate::{
	error::Error,
	gateway::Renderer,
	media::UniverseCounts,
	progress::{Emission, ProgressUpdate},
	IndexerContext,
};

use sd_ocr::EngineTag;

use std::{collections::HashMap, sync::Arc};

use tokio::{
	select, spawn,
	sync::Mutex,
	task::JoinHandle,
	time::{interval, sleep, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

/// What the watchdog made of one poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
	/// The engine isn't supposed to be making progress.
	Idle,
	Progressing,
	Waiting { unchanged_polls: u32 },
	/// No progress for `threshold` polls while processing, the worker is considered dead.
	Stalled,
}

/// Counts consecutive polls where an active engine didn't move.
#[derive(Debug, Clone)]
pub struct StallDetector {
	threshold: u32,
	last_processed: Option<u64>,
	unchanged_polls: u32,
}

impl StallDetector {
	#[must_use]
	pub const fn new(threshold: u32) -> Self {
		Self {
			threshold,
			last_processed: None,
			unchanged_polls: 0,
		}
	}

	pub fn observe(&mut self, processed_items: u64, is_active: bool) -> Verdict {
		let unchanged = self.last_processed == Some(processed_items);
		self.last_processed = Some(processed_items);

		if !is_active || !unchanged {
			self.unchanged_polls = 0;
			return if is_active {
				Verdict::Progressing
			} else {
				Verdict::Idle
			};
		}

		self.unchanged_polls += 1;

		if self.unchanged_polls >= self.threshold {
			self.unchanged_polls = 0;
			Verdict::Stalled
		} else {
			Verdict::Waiting {
				unchanged_polls: self.unchanged_polls,
			}
		}
	}
}

/// Why a monitor loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorExit {
	Completed,
	/// Neither processing nor paused anymore.
	Idle,
	/// The engine has no stored progress.
	Absent,
	Stopped,
}

enum Poll {
	Continue,
	Finished(MonitorExit),
}

/// Periodic reconciliation of one engine's progress against the stores, with the stall watchdog.
pub struct ProgressMonitor {
	engine: EngineTag,
	ctx: Arc<IndexerContext>,
	renderer: Arc<Renderer>,
	detector: StallDetector,
}

impl ProgressMonitor {
	#[must_use]
	pub fn new(engine: EngineTag, ctx: Arc<IndexerContext>, renderer: Arc<Renderer>) -> Self {
		Self {
			detector: StallDetector::new(ctx.config.stall_threshold_polls),
			engine,
			ctx,
			renderer,
		}
	}

	#[instrument(skip_all, fields(engine = %self.engine))]
	pub async fn run(mut self, stop: CancellationToken) -> MonitorExit {
		let mut ticker = interval(self.ctx.config.monitor_period);
		ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

		debug!("Progress monitor started");

		let exit = loop {
			select! {
				() = stop.cancelled() => break MonitorExit::Stopped,
				_ = ticker.tick() => {}
			}

			match self.poll().await {
				Ok(Poll::Continue) => {}
				Ok(Poll::Finished(exit)) => break exit,
				Err(e) => {
					warn!(?e, "Progress monitor poll failed, backing off");

					select! {
						() = stop.cancelled() => break MonitorExit::Stopped,
						() = sleep(self.ctx.config.monitor_error_backoff) => {}
					}
				}
			}
		};

		debug!(?exit, "Progress monitor finished");

		exit
	}

	async fn poll(&mut self) -> Result<Poll, Error> {
		let progress = &self.ctx.progress;

		let Some(state) = progress.get(&self.engine).await? else {
			return Ok(Poll::Finished(MonitorExit::Absent));
		};

		let UniverseCounts {
			total_items,
			processed_items,
		} = self.ctx.universe_counts(&self.engine).await?;

		let mut update = ProgressUpdate::counts(total_items, processed_items);

		let is_complete = total_items > 0 && processed_items >= total_items;

		match self
			.detector
			.observe(processed_items, state.is_processing && !state.is_paused)
		{
			Verdict::Stalled => {
				warn!(
					processed_items,
					total_items,
					threshold = self.ctx.config.stall_threshold_polls,
					"Indexing stalled, clearing processing flag",
				);
				update = update.with_processing(false);
			}
			Verdict::Waiting { unchanged_polls } => {
				trace!(unchanged_polls, "No progress since last poll");
			}
			Verdict::Idle | Verdict::Progressing => {}
		}

		if is_complete && state.is_processing {
			update = update.with_processing(false);
		}

		let state = progress
			.upsert(&self.engine, update, Emission::Forced)
			.await?;

		if is_complete {
			info!(total_items, "Text indexing completed");
			self.renderer.render(&state).await;
			return Ok(Poll::Finished(MonitorExit::Completed));
		}

		if state.dismissed || state.is_processing {
			self.renderer.render(&state).await;
		}

		if !state.is_processing && !state.is_paused {
			self.renderer.hide(&self.engine).await;
			return Ok(Poll::Finished(MonitorExit::Idle));
		}

		Ok(Poll::Continue)
	}
}

struct RunningMonitor {
	stop: CancellationToken,
	handle: JoinHandle<MonitorExit>,
}

/// At most one [`ProgressMonitor`] per engine.
pub struct Monitors {
	ctx: Arc<IndexerContext>,
	renderer: Arc<Renderer>,
	running: Mutex<HashMap<EngineTag, RunningMonitor>>,
}

impl Monitors {
	#[must_use]
	pub fn new(ctx: Arc<IndexerContext>, renderer: Arc<Renderer>) -> Self {
		Self {
			ctx,
			renderer,
			running: Mutex::new(HashMap::new()),
		}
	}

	/// Starts a monitor for `engine` unless one is still running, returns whether one was started.
	pub async fn ensure_running(&self, engine: &EngineTag) -> bool {
		let mut running = self.running.lock().await;

		if running
			.get(engine)
			.is_some_and(|monitor| !monitor.handle.is_finished())
		{
			return false;
		}

		let stop = CancellationToken::new();
		let monitor = ProgressMonitor::new(
			engine.clone(),
			Arc::clone(&self.ctx),
			Arc::clone(&self.renderer),
		);

		running.insert(
			engine.clone(),
			RunningMonitor {
				handle: spawn(monitor.run(stop.clone())),
				stop,
			},
		);

		true
	}

	pub async fn is_running(&self, engine: &EngineTag) -> bool {
		self.running
			.lock()
			.await
			.get(engine)
			.is_some_and(|monitor| !monitor.handle.is_finished())
	}

	pub async fn stop(&self, engine: &EngineTag) -> Option<MonitorExit> {
		let monitor = self.running.lock().await.remove(engine)?;

		stop_monitor(engine, monitor).await
	}

	pub async fn stop_all(&self) {
		let running = std::mem::take(&mut *self.running.lock().await);

		for (engine, monitor) in running {
			stop_monitor(&engine, monitor).await;
		}
	}
}

async fn stop_monitor(engine: &EngineTag, monitor: RunningMonitor) -> Option<MonitorExit> {
	monitor.stop.cancel();

	match monitor.handle.await {
		Ok(exit) => Some(exit),
		Err(e) => {
			error!(%engine, ?e, "Progress monitor panicked");
			None
		}
	}
}
