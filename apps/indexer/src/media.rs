use sd_core_text_indexer::{EnumerationError, IndexableItem, ItemId, MediaEnumerator};

use std::{
	fs,
	path::{Path, PathBuf},
	sync::Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::task::spawn_blocking;
use tracing::{trace, warn};
use walkdir::WalkDir;

const IMAGE_EXTENSIONS: [&str; 9] = [
	"png", "jpg", "jpeg", "webp", "bmp", "gif", "tif", "tiff", "pnm",
];

/// Every image found, recursively, under a set of folders.
#[derive(Debug, Clone)]
pub struct DirectoryEnumerator {
	roots: Arc<[PathBuf]>,
}

impl DirectoryEnumerator {
	pub fn new(roots: impl IntoIterator<Item = PathBuf>) -> Self {
		Self {
			roots: roots.into_iter().collect(),
		}
	}

	fn walk(roots: &[PathBuf]) -> Result<Vec<IndexableItem>, EnumerationError> {
		let mut items = Vec::new();

		for root in roots {
			if !root.is_dir() {
				return Err(EnumerationError::Unavailable(format!(
					"media folder <path='{}'> is missing",
					root.display()
				)));
			}

			for entry in WalkDir::new(root).follow_links(false) {
				let entry = match entry {
					Ok(entry) => entry,
					// An unreadable root is an error, anything unreadable below it is skipped
					Err(e) if e.depth() == 0 => {
						return Err(EnumerationError::Io {
							path: root.clone(),
							source: e.into(),
						});
					}
					Err(e) => {
						warn!(?e, "Skipping unreadable entry;");
						continue;
					}
				};

				if !entry.file_type().is_file() {
					trace!(path = %entry.path().display(), "Ignoring entry");
					continue;
				}

				if let Some(item) = item_for(entry.path()) {
					items.push(item);
				}
			}
		}

		Ok(items)
	}
}

#[async_trait]
impl MediaEnumerator for DirectoryEnumerator {
	async fn list_all(&self) -> Result<Vec<IndexableItem>, EnumerationError> {
		let roots = Arc::clone(&self.roots);

		spawn_blocking(move || Self::walk(&roots))
			.await
			.map_err(|e| EnumerationError::Unavailable(format!("folder walk panicked: {e}")))?
	}

	async fn count(&self) -> Result<u64, EnumerationError> {
		self.list_all().await.map(|items| items.len() as u64)
	}
}

pub fn is_image(path: &Path) -> bool {
	path.extension()
		.and_then(|ext| ext.to_str())
		.is_some_and(|ext| {
			IMAGE_EXTENSIONS
				.iter()
				.any(|known| known.eq_ignore_ascii_case(ext))
		})
}

/// Items are identified by their path, so moving a file makes it a new item.
pub fn item_id(path: &Path) -> ItemId {
	let hash = blake3::hash(path.as_os_str().as_encoded_bytes());
	let mut bytes = [0; 8];
	bytes.copy_from_slice(&hash.as_bytes()[..8]);

	// Masking the sign bit keeps ids positive, SQLite integers are signed
	i64::from_le_bytes(bytes) & i64::MAX
}

pub fn item_for(path: &Path) -> Option<IndexableItem> {
	if !is_image(path) {
		return None;
	}

	let metadata = fs::metadata(path).ok()?;
	let added_at = metadata
		.created()
		.or_else(|_| metadata.modified())
		.map_or_else(|_| Utc::now(), DateTime::<Utc>::from);

	Some(IndexableItem {
		id: item_id(path),
		locator: path.to_path_buf(),
		added_at,
	})
}
