use crate::{
	error::Error,
	keep_alive::KeepAliveSupervisor,
	media::UniverseCounts,
	monitor::Monitors,
	progress::{Emission, ProgressState, ProgressUpdate},
	scheduler::{watch_dispatched, WorkScheduler},
	IndexerContext,
};

use sd_ocr::EngineTag;

use std::{collections::HashSet, fmt, str::FromStr, sync::Arc, time::Duration};

use async_channel as chan;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument};

/// User commands relayed by the notification surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
	Pause,
	Resume,
	Cancel,
	ViewProgress,
}

#[derive(Debug, thiserror::Error)]
#[error("unknown command: {0}")]
pub struct UnknownCommand(String);

impl FromStr for Command {
	type Err = UnknownCommand;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"pause" => Ok(Self::Pause),
			"resume" => Ok(Self::Resume),
			"cancel" => Ok(Self::Cancel),
			"view" | "view_progress" | "view-progress" => Ok(Self::ViewProgress),
			other => Err(UnknownCommand(other.to_string())),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayState {
	Processing,
	Paused,
	Completed,
}

impl DisplayState {
	#[must_use]
	pub const fn of(state: &ProgressState) -> Self {
		if state.is_complete() {
			Self::Completed
		} else if state.is_paused {
			Self::Paused
		} else {
			Self::Processing
		}
	}
}

impl fmt::Display for DisplayState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Processing => write!(f, "processing"),
			Self::Paused => write!(f, "paused"),
			Self::Completed => write!(f, "ready for search"),
		}
	}
}

/// What a progress indicator shows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressView {
	pub engine: EngineTag,
	pub display: DisplayState,
	pub processed_items: u64,
	pub total_items: u64,
	pub failed_items: u64,
	pub percentage: f64,
	pub estimated_time_remaining: Option<Duration>,
	/// Shown as a background notification instead of the in-app indicator.
	pub dismissed: bool,
}

impl From<&ProgressState> for ProgressView {
	fn from(state: &ProgressState) -> Self {
		Self {
			engine: state.engine.clone(),
			display: DisplayState::of(state),
			processed_items: state.processed_items,
			total_items: state.total_items,
			failed_items: state.failed_items,
			percentage: state.percentage(),
			estimated_time_remaining: state.estimated_time_remaining(),
			dismissed: state.dismissed,
		}
	}
}

/// Where progress indicators are drawn.
#[async_trait]
pub trait NotificationSurface: Send + Sync + 'static {
	async fn show(&self, view: &ProgressView);

	async fn hide(&self, engine: &EngineTag);
}

/// Draws progress on a [`NotificationSurface`], showing the completion notice only once per engine.
pub struct Renderer {
	surface: Arc<dyn NotificationSurface>,
	completed_shown: Mutex<HashSet<EngineTag>>,
}

impl Renderer {
	#[must_use]
	pub fn new(surface: Arc<dyn NotificationSurface>) -> Self {
		Self {
			surface,
			completed_shown: Mutex::new(HashSet::new()),
		}
	}

	pub async fn render(&self, state: &ProgressState) {
		let view = ProgressView::from(state);

		{
			let mut completed_shown = self.completed_shown.lock().await;

			if view.display == DisplayState::Completed {
				if !completed_shown.insert(view.engine.clone()) {
					return;
				}
			} else {
				completed_shown.remove(&view.engine);
			}
		}

		self.surface.show(&view).await;
	}

	pub async fn hide(&self, engine: &EngineTag) {
		self.surface.hide(engine).await;
	}
}

/// Turns user commands into progress transitions and scheduler calls.
pub struct CommandGateway {
	ctx: Arc<IndexerContext>,
	scheduler: Arc<WorkScheduler>,
	monitors: Arc<Monitors>,
	keep_alive: Arc<KeepAliveSupervisor>,
	renderer: Arc<Renderer>,
}

impl CommandGateway {
	#[must_use]
	pub fn new(
		ctx: Arc<IndexerContext>,
		scheduler: Arc<WorkScheduler>,
		monitors: Arc<Monitors>,
		keep_alive: Arc<KeepAliveSupervisor>,
		renderer: Arc<Renderer>,
	) -> Self {
		Self {
			ctx,
			scheduler,
			monitors,
			keep_alive,
			renderer,
		}
	}

	#[instrument(skip(self), fields(%engine), err)]
	pub async fn handle(&self, engine: &EngineTag, command: Command) -> Result<(), Error> {
		match command {
			Command::Pause => self.pause(engine).await,
			Command::Resume => self.activate(engine).await.map(|_| ()),
			Command::Cancel => self.cancel(engine).await,
			Command::ViewProgress => self.show_progress(engine).await.map(|_| ()),
		}
	}

	async fn pause(&self, engine: &EngineTag) -> Result<(), Error> {
		let state = self
			.ctx
			.progress
			.upsert(engine, ProgressUpdate::flags(false, true), Emission::OnChange)
			.await?;

		self.scheduler.cancel_all(engine).await;
		self.renderer.render(&state).await;

		info!(
			processed_items = state.processed_items,
			total_items = state.total_items,
			"Text indexing paused",
		);

		Ok(())
	}

	async fn cancel(&self, engine: &EngineTag) -> Result<(), Error> {
		self.scheduler.cancel_all(engine).await;

		self.ctx
			.progress
			.upsert(engine, ProgressUpdate::flags(false, false), Emission::OnChange)
			.await?;

		self.renderer.hide(engine).await;

		info!("Text indexing canceled");

		Ok(())
	}

	/// Marks `engine` as processing and gets everything around a running engine going: keep-alive,
	/// progress monitor, indicator and a continuous batch.
	#[instrument(skip(self), fields(%engine), err)]
	pub async fn activate(&self, engine: &EngineTag) -> Result<ProgressState, Error> {
		if self.ctx.engines.get(engine).is_none() {
			return Err(Error::EngineUnavailable(engine.clone()));
		}

		let IndexerContext {
			progress, config, ..
		} = &*self.ctx;

		let UniverseCounts {
			total_items,
			processed_items,
		} = self.ctx.universe_counts(engine).await?;

		let state = progress
			.upsert(
				engine,
				ProgressUpdate {
					is_paused: Some(false),
					..ProgressUpdate::counts(total_items, processed_items)
				}
				.with_processing(true),
				Emission::Forced,
			)
			.await?;

		self.keep_alive.start(engine).await;
		self.monitors.ensure_running(engine).await;
		self.renderer.render(&state).await;

		watch_dispatched(
			self.scheduler
				.enqueue_batch(engine, config.batch_size, true)
				.await?,
		);

		info!(
			processed_items = state.processed_items,
			total_items = state.total_items,
			"Text indexing active",
		);

		Ok(state)
	}

	/// Sends the indicator to the background, it keeps being updated as a notification.
	pub async fn dismiss_progress(&self, engine: &EngineTag) -> Result<ProgressState, Error> {
		let state = self
			.ctx
			.progress
			.upsert(engine, ProgressUpdate::dismissed(true), Emission::OnChange)
			.await?;

		if state.is_processing || state.is_paused {
			self.renderer.render(&state).await;
		}

		Ok(state)
	}

	/// Brings the indicator back to the foreground, hiding the background notification.
	pub async fn show_progress(&self, engine: &EngineTag) -> Result<ProgressState, Error> {
		let state = self
			.ctx
			.progress
			.upsert(engine, ProgressUpdate::dismissed(false), Emission::OnChange)
			.await?;

		self.renderer.hide(engine).await;

		Ok(state)
	}
}

/// Drains the inbound command channel until every sender is gone.
pub(crate) async fn run_commands(
	gateway: Arc<CommandGateway>,
	commands_rx: chan::Receiver<(EngineTag, Command)>,
) {
	while let Ok((engine, command)) = commands_rx.recv().await {
		debug!(%engine, ?command, "Received command");

		if let Err(e) = gateway.handle(&engine, command).await {
			error!(%engine, ?command, ?e, "Failed to handle command");
		}
	}

	debug!("Command channel closed");
}
