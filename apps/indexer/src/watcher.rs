use sd_core_text_indexer::{EngineTag, ExtractionRecordStore, IndexDb, MediaChange};

use std::{
	collections::HashMap,
	path::{Path, PathBuf},
	sync::Arc,
	time::Duration,
};

use async_channel as chan;
use notify::{
	event::{AccessKind, AccessMode, CreateKind, ModifyKind, RenameMode},
	Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
};
use tokio::{
	select, spawn,
	task::JoinHandle,
	time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::{debug, error, info, instrument, trace, warn};

use super::media::{is_image, item_for, item_id};

/// How long an image must go without writes before it is handed to the indexer.
const SETTLE_TIMEOUT: Duration = Duration::from_millis(250);
const TICK_PERIOD: Duration = Duration::from_millis(100);

/// Turns file system events under the media folders into [`MediaChange`]s.
pub struct MediaWatcher {
	watcher: RecommendedWatcher,
	handle: JoinHandle<()>,
}

impl MediaWatcher {
	#[instrument(skip_all, fields(roots = ?roots))]
	pub fn new(
		roots: &[PathBuf],
		db: Arc<IndexDb>,
		engines: Vec<EngineTag>,
		changes_tx: chan::Sender<MediaChange>,
	) -> notify::Result<Self> {
		let (events_tx, events_rx) = chan::unbounded();

		let mut watcher = RecommendedWatcher::new(
			move |result| {
				// SAFETY: we are not blocking the thread as this is an unbounded channel
				if events_tx.send_blocking(result).is_err() {
					error!("Tried to send file system events to a closed channel;");
				}
			},
			Config::default(),
		)?;

		for root in roots {
			watcher.watch(root, RecursiveMode::Recursive)?;
			info!(path = %root.display(), "Watching media folder");
		}

		let handle = spawn(handle_events(events_rx, db, engines, changes_tx));

		Ok(Self { watcher, handle })
	}

	pub fn stop(self) {
		drop(self.watcher);
		self.handle.abort();
	}
}

/// Images still being written. Creation fires before the contents land, so an image is only
/// reported once it stopped changing for a while.
#[derive(Debug, Default)]
struct SettlingImages {
	pending: HashMap<PathBuf, Instant>,
}

impl SettlingImages {
	fn touch(&mut self, path: PathBuf, now: Instant) {
		self.pending.insert(path, now);
	}

	fn forget(&mut self, path: &Path) {
		self.pending.remove(path);
	}

	fn evict(&mut self, now: Instant, timeout: Duration) -> Vec<PathBuf> {
		let mut settled = Vec::new();

		self.pending.retain(|path, touched_at| {
			if now.saturating_duration_since(*touched_at) > timeout {
				trace!(path = %path.display(), "Image settled");
				settled.push(path.clone());
				false
			} else {
				true
			}
		});

		settled
	}
}

#[derive(Debug, PartialEq, Eq)]
enum Reaction {
	/// Written to, report once no more writes come in.
	Settling(Vec<PathBuf>),
	Removed(Vec<PathBuf>),
	Unknown,
}

fn react(event: &Event) -> Option<Reaction> {
	let images = event
		.paths
		.iter()
		.filter(|path| is_image(path))
		.cloned()
		.collect::<Vec<_>>();

	if images.is_empty() {
		return None;
	}

	match event.kind {
		EventKind::Create(CreateKind::File | CreateKind::Any)
		| EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any)
		| EventKind::Access(AccessKind::Close(AccessMode::Write)) => Some(Reaction::Settling(images)),

		EventKind::Modify(ModifyKind::Name(RenameMode::To)) if images.len() == 1 => {
			Some(Reaction::Settling(images))
		}

		EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
			Some(Reaction::Removed(images))
		}

		EventKind::Access(_) => None,

		_ => Some(Reaction::Unknown),
	}
}

async fn handle_events(
	events_rx: chan::Receiver<notify::Result<Event>>,
	db: Arc<IndexDb>,
	engines: Vec<EngineTag>,
	changes_tx: chan::Sender<MediaChange>,
) {
	let mut settling = SettlingImages::default();

	let mut tick = interval_at(Instant::now() + TICK_PERIOD, TICK_PERIOD);
	tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

	loop {
		let changes = select! {
			result = events_rx.recv() => {
				let Ok(result) = result else {
					break;
				};

				match result {
					Ok(event) => apply(&event, &mut settling, &db, &engines).await,
					Err(e) => {
						error!(?e, "Watcher error;");
						continue;
					}
				}
			}

			_ = tick.tick() => settling
				.evict(Instant::now(), SETTLE_TIMEOUT)
				.iter()
				.filter_map(|path| item_for(path))
				.map(MediaChange::Added)
				.collect(),
		};

		for change in changes {
			if changes_tx.send(change).await.is_err() {
				debug!("Indexer stopped listening to media changes");
				return;
			}
		}
	}

	trace!("Media watcher events loop finished");
}

async fn apply(
	event: &Event,
	settling: &mut SettlingImages,
	db: &IndexDb,
	engines: &[EngineTag],
) -> Vec<MediaChange> {
	match react(event) {
		None => vec![],

		Some(Reaction::Settling(images)) => {
			let now = Instant::now();
			for image in images {
				settling.touch(image, now);
			}
			vec![]
		}

		Some(Reaction::Removed(images)) => {
			for image in &images {
				settling.forget(image);
			}

			let ids = images.iter().map(|path| item_id(path)).collect::<Vec<_>>();

			for engine in engines {
				match db.delete(engine, &ids).await {
					Ok(0) => {}
					Ok(removed) => debug!(%engine, removed, "Dropped records of removed images"),
					Err(e) => warn!(%engine, ?e, "Failed to drop records of removed images;"),
				}
			}

			vec![MediaChange::Unknown]
		}

		Some(Reaction::Unknown) => vec![MediaChange::Unknown],
	}
}
