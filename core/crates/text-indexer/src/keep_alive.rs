use crate::progress::{ProgressState, ProgressStore};

use sd_ocr::EngineTag;

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::{select, spawn, sync::Mutex, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace};

/// Whatever the host offers to keep the process alive and the machine awake.
#[async_trait]
pub trait KeepAliveFacility: Send + Sync + 'static {
	/// Holds the assertion for at most `duration`, calling it again renews it.
	async fn acquire(&self, duration: Duration);

	async fn release(&self);
}

#[derive(Default)]
struct SupervisorState {
	active: HashMap<EngineTag, CancellationToken>,
	renewal: Option<CancellationToken>,
}

/// Holds the [`KeepAliveFacility`] while any engine is processing.
///
/// Engines are tracked in memory only. After a restart, engines come back through
/// [`TextIndexer::ensure_monitoring`](crate::TextIndexer::ensure_monitoring), driven by the stored
/// progress.
pub struct KeepAliveSupervisor {
	facility: Arc<dyn KeepAliveFacility>,
	progress: Arc<dyn ProgressStore>,
	wake_lock_duration: Duration,
	state: Mutex<SupervisorState>,
}

impl KeepAliveSupervisor {
	#[must_use]
	pub fn new(
		facility: Arc<dyn KeepAliveFacility>,
		progress: Arc<dyn ProgressStore>,
		wake_lock_duration: Duration,
	) -> Self {
		Self {
			facility,
			progress,
			wake_lock_duration,
			state: Mutex::default(),
		}
	}

	/// Tracks `engine` as active, acquiring the facility if it is the first one. The engine is
	/// dropped by itself once its stored progress stops processing.
	#[instrument(skip(self), fields(%engine))]
	pub async fn start(self: &Arc<Self>, engine: &EngineTag) {
		let mut state = self.state.lock().await;

		if state.active.contains_key(engine) {
			return;
		}

		let stop = CancellationToken::new();
		state.active.insert(engine.clone(), stop.clone());

		spawn(Arc::clone(self).watch_engine(engine.clone(), stop));

		if state.renewal.is_none() {
			let renewal = CancellationToken::new();
			state.renewal = Some(renewal.clone());

			self.facility.acquire(self.wake_lock_duration).await;
			spawn(Arc::clone(self).renew(renewal));

			info!("Keep-alive acquired");
		}

		debug!(active_engines = state.active.len(), "Engine is now kept alive");
	}

	/// Drops `engine`, releasing the facility when no engine is left.
	#[instrument(skip(self), fields(%engine))]
	pub async fn stop(&self, engine: &EngineTag) {
		let mut state = self.state.lock().await;
		self.drop_engine(&mut state, engine).await;
	}

	async fn drop_engine(&self, state: &mut SupervisorState, engine: &EngineTag) {
		if let Some(stop) = state.active.remove(engine) {
			stop.cancel();
			debug!(%engine, active_engines = state.active.len(), "Engine no longer kept alive");
		}

		if state.active.is_empty() {
			if let Some(renewal) = state.renewal.take() {
				renewal.cancel();
				self.facility.release().await;
				info!("No engine active, keep-alive released");
			}
		}
	}

	pub async fn is_active(&self, engine: &EngineTag) -> bool {
		self.state.lock().await.active.contains_key(engine)
	}

	pub async fn is_holding(&self) -> bool {
		self.state.lock().await.renewal.is_some()
	}

	pub async fn shutdown(&self) {
		let engines = self
			.state
			.lock()
			.await
			.active
			.keys()
			.cloned()
			.collect::<Vec<_>>();

		for engine in engines {
			self.stop(&engine).await;
		}
	}

	async fn watch_engine(self: Arc<Self>, engine: EngineTag, stop: CancellationToken) {
		let mut states = self.progress.subscribe(&engine).await;

		loop {
			select! {
				() = stop.cancelled() => return,
				state = states.next() => match state {
					Some(Some(ProgressState { is_processing: true, .. })) => {}
					Some(_) => {
						if self.stop_if_idle(&engine).await {
							return;
						}
					}
					None => {
						self.stop(&engine).await;
						return;
					}
				},
			}
		}
	}

	/// Checked under the state lock, so an engine re-activated meanwhile is never dropped.
	async fn stop_if_idle(&self, engine: &EngineTag) -> bool {
		let mut state = self.state.lock().await;

		match self.progress.get(engine).await {
			Ok(Some(ProgressState {
				is_processing: true,
				..
			})) => return false,
			Ok(_) => {}
			Err(e) => debug!(%engine, ?e, "Failed to re-read progress, dropping engine anyway"),
		}

		trace!(%engine, "Engine stopped processing");
		self.drop_engine(&mut state, engine).await;

		true
	}

	async fn renew(self: Arc<Self>, stop: CancellationToken) {
		loop {
			select! {
				() = stop.cancelled() => return,
				() = sleep(self.wake_lock_duration) => {
					trace!("Renewing keep-alive");
					self.facility.acquire(self.wake_lock_duration).await;
				}
			}
		}
	}
}
