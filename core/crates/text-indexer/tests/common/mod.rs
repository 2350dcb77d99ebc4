#![allow(dead_code)]

use sd_core_text_indexer::{
	EngineTag, EnumerationError, IndexDb, IndexableItem, IndexerConfig, IndexerContext, ItemId,
	KeepAliveFacility, MediaEnumerator, NotificationSurface, ProgressView, TextIndexer,
};
use sd_ocr::{
	BackendError, BackendOutput, EngineRegistry, EngineStrategy, OcrImage, RecognitionBackend,
	Script,
};

use std::{
	future::Future,
	path::{Path, PathBuf},
	sync::{
		atomic::{AtomicBool, AtomicUsize, Ordering},
		Arc, Mutex,
	},
	time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use image::{ImageBuffer, Luma};
use tempfile::TempDir;
use tokio::{
	sync::Semaphore,
	time::{sleep, timeout},
};

pub fn test_config() -> IndexerConfig {
	IndexerConfig {
		batch_size: 10,
		item_delay: Duration::ZERO,
		monitor_period: Duration::from_millis(20),
		// Gated backends hold items for a while, only the watchdog tests want short stalls
		stall_threshold_polls: 500,
		monitor_error_backoff: Duration::from_millis(20),
		wake_lock_duration: Duration::from_secs(3600),
		fast_timeout: Duration::from_secs(10),
		detailed_timeout: Duration::from_secs(10),
		..Default::default()
	}
}

/// Items added later get a later `added_at`, so ids double as age.
pub fn added_at(id: ItemId) -> DateTime<Utc> {
	DateTime::from_timestamp(1_700_000_000 + id, 0).unwrap()
}

#[derive(Debug, Default)]
pub struct FakeEnumerator {
	items: Mutex<Vec<IndexableItem>>,
	unavailable: AtomicBool,
}

impl FakeEnumerator {
	pub fn push(&self, item: IndexableItem) {
		self.items.lock().unwrap().push(item);
	}

	pub fn set_unavailable(&self, unavailable: bool) {
		self.unavailable.store(unavailable, Ordering::SeqCst);
	}
}

#[async_trait]
impl MediaEnumerator for FakeEnumerator {
	async fn list_all(&self) -> Result<Vec<IndexableItem>, EnumerationError> {
		if self.unavailable.load(Ordering::SeqCst) {
			return Err(EnumerationError::Unavailable("storage unmounted".to_string()));
		}

		Ok(self.items.lock().unwrap().clone())
	}

	async fn count(&self) -> Result<u64, EnumerationError> {
		if self.unavailable.load(Ordering::SeqCst) {
			return Err(EnumerationError::Unavailable("storage unmounted".to_string()));
		}

		Ok(self.items.lock().unwrap().len() as u64)
	}
}

/// Answers `text of <file stem>`, optionally waiting for a permit on every call.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
	gate: Option<Arc<Semaphore>>,
	calls: AtomicUsize,
}

impl ScriptedBackend {
	pub fn open() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn gated() -> (Arc<Self>, Arc<Semaphore>) {
		let gate = Arc::new(Semaphore::new(0));
		(
			Arc::new(Self {
				gate: Some(Arc::clone(&gate)),
				calls: AtomicUsize::new(0),
			}),
			gate,
		)
	}

	pub fn calls(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}
}

pub fn text_for(id: ItemId) -> String {
	format!("text of {id}")
}

#[async_trait]
impl RecognitionBackend for ScriptedBackend {
	fn name(&self) -> &'static str {
		"scripted"
	}

	async fn recognize(&self, image: &OcrImage) -> Result<BackendOutput, BackendError> {
		self.calls.fetch_add(1, Ordering::SeqCst);

		if let Some(gate) = &self.gate {
			gate.acquire()
				.await
				.map_err(|e| BackendError::Other(e.to_string()))?
				.forget();
		}

		let stem = image
			.source()
			.and_then(Path::file_stem)
			.and_then(|stem| stem.to_str())
			.ok_or_else(|| BackendError::Other("image without source".to_string()))?;

		Ok(BackendOutput {
			text: format!("text of {stem}"),
			confidence: 0.9,
			block_count: 1,
		})
	}
}

#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceEvent {
	Show(ProgressView),
	Hide(EngineTag),
}

#[derive(Debug, Default)]
pub struct RecordingSurface {
	events: Mutex<Vec<SurfaceEvent>>,
}

impl RecordingSurface {
	pub fn events(&self) -> Vec<SurfaceEvent> {
		self.events.lock().unwrap().clone()
	}
}

#[async_trait]
impl NotificationSurface for RecordingSurface {
	async fn show(&self, view: &ProgressView) {
		self.events
			.lock()
			.unwrap()
			.push(SurfaceEvent::Show(view.clone()));
	}

	async fn hide(&self, engine: &EngineTag) {
		self.events
			.lock()
			.unwrap()
			.push(SurfaceEvent::Hide(engine.clone()));
	}
}

#[derive(Debug, Default)]
pub struct FakeKeepAlive {
	pub acquired: AtomicUsize,
	pub released: AtomicUsize,
	pub holding: AtomicBool,
}

impl FakeKeepAlive {
	pub fn is_holding(&self) -> bool {
		self.holding.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl KeepAliveFacility for FakeKeepAlive {
	async fn acquire(&self, _duration: Duration) {
		self.acquired.fetch_add(1, Ordering::SeqCst);
		self.holding.store(true, Ordering::SeqCst);
	}

	async fn release(&self) {
		self.released.fetch_add(1, Ordering::SeqCst);
		self.holding.store(false, Ordering::SeqCst);
	}
}

pub struct Harness {
	pub dir: TempDir,
	pub enumerator: Arc<FakeEnumerator>,
	pub db: Arc<IndexDb>,
	pub backend: Arc<ScriptedBackend>,
	pub surface: Arc<RecordingSurface>,
	pub keep_alive: Arc<FakeKeepAlive>,
	pub config: IndexerConfig,
}

impl Harness {
	pub async fn new() -> Self {
		Self::with(ScriptedBackend::open(), test_config()).await
	}

	pub async fn with(backend: Arc<ScriptedBackend>, config: IndexerConfig) -> Self {
		let dir = tempfile::tempdir().unwrap();
		let db = Arc::new(IndexDb::open(dir.path().join("index.db")).await.unwrap());

		Self {
			dir,
			enumerator: Arc::default(),
			db,
			backend,
			surface: Arc::default(),
			keep_alive: Arc::default(),
			config,
		}
	}

	fn image_path(&self, id: ItemId) -> PathBuf {
		self.dir.path().join(format!("{id}.png"))
	}

	/// Adds items backed by real images on disk.
	pub fn add_items(&self, ids: impl IntoIterator<Item = ItemId>) -> Vec<IndexableItem> {
		ids.into_iter()
			.map(|id| {
				let locator = self.image_path(id);
				ImageBuffer::from_pixel(16, 16, Luma([255_u8]))
					.save(&locator)
					.unwrap();

				let item = IndexableItem {
					id,
					locator,
					added_at: added_at(id),
				};
				self.enumerator.push(item.clone());
				item
			})
			.collect()
	}

	/// Adds an item whose image can't be decoded, so extraction always fails.
	pub fn add_broken(&self, id: ItemId) -> IndexableItem {
		let locator = self.image_path(id);
		std::fs::write(&locator, b"not an image").unwrap();

		let item = IndexableItem {
			id,
			locator,
			added_at: added_at(id),
		};
		self.enumerator.push(item.clone());
		item
	}

	pub fn registry(&self) -> EngineRegistry {
		let backend = Arc::clone(&self.backend);

		EngineRegistry::new().with_strategy(
			EngineTag::LATIN,
			&EngineStrategy::SingleScript {
				script: Script::Latin,
			},
			self.config.fast_timeout,
			move |_| Arc::clone(&backend) as Arc<dyn RecognitionBackend>,
		)
	}

	pub fn context(&self) -> IndexerContext {
		IndexerContext::new(
			Arc::clone(&self.enumerator) as Arc<dyn MediaEnumerator>,
			Arc::clone(&self.db),
			self.registry(),
			self.config.clone(),
		)
	}

	pub fn indexer(&self) -> TextIndexer {
		TextIndexer::new(
			self.context(),
			Arc::clone(&self.surface) as Arc<dyn NotificationSurface>,
			Arc::clone(&self.keep_alive) as Arc<dyn KeepAliveFacility>,
		)
	}
}

/// Polls `check` until it holds, failing the test after a few seconds.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
	F: FnMut() -> Fut,
	Fut: Future<Output = bool>,
{
	timeout(Duration::from_secs(10), async {
		while !check().await {
			sleep(Duration::from_millis(10)).await;
		}
	})
	.await
	.unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}
