use crate::{
	error::Error,
	gateway::CommandGateway,
	media::{MediaChange, UniverseCounts},
	progress::{Emission, ProgressUpdate},
	scheduler::{watch_dispatched, WorkScheduler},
	IndexerContext,
};

use std::sync::Arc;

use async_channel as chan;
use tracing::{debug, error, instrument, trace};

/// Reacts to media source changes for every engine that was ever activated.
pub struct ChangeListener {
	ctx: Arc<IndexerContext>,
	scheduler: Arc<WorkScheduler>,
	gateway: Arc<CommandGateway>,
}

impl ChangeListener {
	#[must_use]
	pub fn new(
		ctx: Arc<IndexerContext>,
		scheduler: Arc<WorkScheduler>,
		gateway: Arc<CommandGateway>,
	) -> Self {
		Self {
			ctx,
			scheduler,
			gateway,
		}
	}

	#[instrument(skip(self), err)]
	pub async fn handle(&self, change: &MediaChange) -> Result<(), Error> {
		let IndexerContext {
			enumerator,
			records,
			progress,
			..
		} = &*self.ctx;

		let states = progress.all().await?;
		if states.is_empty() {
			trace!("No engine was ever activated, ignoring change");
			return Ok(());
		}

		let total_items = enumerator.count().await?;

		for state in states {
			let engine = &state.engine;

			if self.ctx.engines.get(engine).is_none() {
				trace!(%engine, "Stored progress for an engine that isn't registered");
				continue;
			}

			match change {
				MediaChange::Added(item) => {
					if records.is_recorded(engine, item.id).await? {
						continue;
					}

					let state = progress
						.upsert(
							engine,
							ProgressUpdate::default().with_total(total_items),
							Emission::OnChange,
						)
						.await?;

					if state.is_paused {
						debug!(%engine, item_id = item.id, "Engine paused, new item waits for resume");
						continue;
					}

					watch_dispatched(self.scheduler.enqueue_single(engine, item.clone()).await?);
				}

				MediaChange::Unknown => {
					let UniverseCounts {
						total_items,
						processed_items,
					} = self.ctx.universe_counts(engine).await?;

					let state = progress
						.upsert(
							engine,
							ProgressUpdate::counts(total_items, processed_items),
							Emission::OnChange,
						)
						.await?;

					if processed_items < total_items && !state.is_paused {
						debug!(
							%engine,
							processed_items,
							total_items,
							"Index fell behind the media source, catching up",
						);
						self.gateway.activate(engine).await?;
					}
				}
			}
		}

		Ok(())
	}
}

/// Drains the inbound change channel until every sender is gone.
pub(crate) async fn run_changes(
	listener: Arc<ChangeListener>,
	changes_rx: chan::Receiver<MediaChange>,
) {
	while let Ok(change) = changes_rx.recv().await {
		if let Err(e) = listener.handle(&change).await {
			error!(?change, ?e, "Failed to handle media change");
		}
	}

	debug!("Change channel closed");
}
