use std::{collections::HashSet, path::PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Stable identifier of an indexable item, as given by the [`MediaEnumerator`].
pub type ItemId = i64;

/// An image we may extract text from. The pipeline never mutates these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexableItem {
	pub id: ItemId,
	pub locator: PathBuf,
	pub added_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum EnumerationError {
	#[error("media source unavailable: {0}")]
	Unavailable(String),
	#[error("failed to read media source <path='{}'>: {source}", .path.display())]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},
}

/// The current universe of indexable items.
///
/// Called on every monitor poll, so implementations must be cheap enough to be called frequently.
#[async_trait]
pub trait MediaEnumerator: Send + Sync + 'static {
	async fn list_all(&self) -> Result<Vec<IndexableItem>, EnumerationError>;

	async fn count(&self) -> Result<u64, EnumerationError>;
}

/// What the media source told us changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaChange {
	/// A specific new item showed up.
	Added(IndexableItem),
	/// Something changed but we can't tell what.
	Unknown,
}

/// How many items the media source holds and how many of those already have a record.
///
/// Records of items that left the media source are not counted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UniverseCounts {
	pub total_items: u64,
	pub processed_items: u64,
}

impl UniverseCounts {
	#[must_use]
	pub fn of(universe: &[IndexableItem], recorded: &HashSet<ItemId>) -> Self {
		Self {
			total_items: universe.len() as u64,
			processed_items: universe
				.iter()
				.filter(|item| recorded.contains(&item.id))
				.count() as u64,
		}
	}
}
