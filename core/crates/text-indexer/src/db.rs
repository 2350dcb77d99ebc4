use std::{
	collections::{HashMap, HashSet},
	path::Path,
	str::FromStr,
	sync::Arc,
	time::Duration,
};

use sd_ocr::EngineTag;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
	sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions},
	FromRow,
};
use tokio::sync::{watch, Mutex};
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, instrument, trace, warn};

use super::{
	error::StoreError,
	media::ItemId,
	progress::{Emission, ProgressState, ProgressStore, ProgressUpdate},
	record::{ExtractionRecord, ExtractionRecordStore, RecordStats},
};

const SCHEMA: &[&str] = &[
	"CREATE TABLE IF NOT EXISTS text_index_progress (
		engine TEXT PRIMARY KEY NOT NULL,
		total_items INTEGER NOT NULL DEFAULT 0,
		processed_items INTEGER NOT NULL DEFAULT 0,
		failed_items INTEGER NOT NULL DEFAULT 0,
		is_processing INTEGER NOT NULL DEFAULT 0,
		is_paused INTEGER NOT NULL DEFAULT 0,
		dismissed INTEGER NOT NULL DEFAULT 0,
		last_updated INTEGER NOT NULL,
		avg_processing_time_ms INTEGER NOT NULL DEFAULT 0,
		timing_samples INTEGER NOT NULL DEFAULT 0,
		estimated_completion_at INTEGER
	)",
	"CREATE TABLE IF NOT EXISTS text_index_record (
		engine TEXT NOT NULL,
		item_id INTEGER NOT NULL,
		text TEXT NOT NULL,
		confidence REAL NOT NULL,
		block_count INTEGER NOT NULL,
		extracted_at INTEGER NOT NULL,
		processing_time_ms INTEGER NOT NULL,
		PRIMARY KEY (engine, item_id)
	)",
	"CREATE INDEX IF NOT EXISTS text_index_record_extracted_at
		ON text_index_record (engine, extracted_at)",
];

const PROGRESS_COLUMNS: &str = "engine, total_items, processed_items, failed_items, is_processing, \
	is_paused, dismissed, last_updated, avg_processing_time_ms, timing_samples, estimated_completion_at";

const RECORD_COLUMNS: &str =
	"engine, item_id, text, confidence, block_count, extracted_at, processing_time_ms";

/// SQLite backed [`ProgressStore`] and [`ExtractionRecordStore`].
pub struct IndexDb {
	pool: SqlitePool,
	write_locks: Mutex<HashMap<EngineTag, Arc<Mutex<()>>>>,
	watchers: Mutex<HashMap<EngineTag, watch::Sender<Option<ProgressState>>>>,
}

impl IndexDb {
	#[instrument(skip_all, fields(path = %path.as_ref().display()), err)]
	pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
		let options = SqliteConnectOptions::new()
			.filename(path.as_ref())
			.create_if_missing(true)
			.journal_mode(SqliteJournalMode::Wal)
			.busy_timeout(Duration::from_secs(5));

		let pool = SqlitePoolOptions::new()
			.max_connections(4)
			.connect_with(options)
			.await?;

		Self::init(pool).await
	}

	/// A private database living as long as this value, for tests and dry runs.
	pub async fn in_memory() -> Result<Self, StoreError> {
		let pool = SqlitePoolOptions::new()
			// Every connection to `:memory:` is a different database
			.max_connections(1)
			.idle_timeout(None)
			.max_lifetime(None)
			.connect_with(SqliteConnectOptions::from_str("sqlite::memory:")?)
			.await?;

		Self::init(pool).await
	}

	async fn init(pool: SqlitePool) -> Result<Self, StoreError> {
		for statement in SCHEMA {
			sqlx::query(statement).execute(&pool).await?;
		}

		debug!("Text index database ready");

		Ok(Self {
			pool,
			write_locks: Mutex::new(HashMap::new()),
			watchers: Mutex::new(HashMap::new()),
		})
	}

	pub async fn close(&self) {
		self.pool.close().await;
	}

	async fn write_lock(&self, engine: &EngineTag) -> Arc<Mutex<()>> {
		Arc::clone(
			self.write_locks
				.lock()
				.await
				.entry(engine.clone())
				.or_default(),
		)
	}

	async fn fetch_progress(&self, engine: &EngineTag) -> Result<Option<ProgressState>, StoreError> {
		sqlx::query_as::<_, ProgressRow>(&format!(
			"SELECT {PROGRESS_COLUMNS} FROM text_index_progress WHERE engine = ?"
		))
		.bind(engine.as_str())
		.fetch_optional(&self.pool)
		.await?
		.map(ProgressState::try_from)
		.transpose()
	}

	async fn watcher(
		&self,
		engine: &EngineTag,
	) -> Result<watch::Sender<Option<ProgressState>>, StoreError> {
		let mut watchers = self.watchers.lock().await;

		if let Some(sender) = watchers.get(engine) {
			return Ok(sender.clone());
		}

		let (sender, _) = watch::channel(self.fetch_progress(engine).await?);
		watchers.insert(engine.clone(), sender.clone());

		Ok(sender)
	}
}

#[async_trait]
impl ProgressStore for IndexDb {
	async fn get(&self, engine: &EngineTag) -> Result<Option<ProgressState>, StoreError> {
		self.fetch_progress(engine).await
	}

	async fn all(&self) -> Result<Vec<ProgressState>, StoreError> {
		sqlx::query_as::<_, ProgressRow>(&format!(
			"SELECT {PROGRESS_COLUMNS} FROM text_index_progress ORDER BY engine"
		))
		.fetch_all(&self.pool)
		.await?
		.into_iter()
		.map(ProgressState::try_from)
		.collect()
	}

	#[instrument(skip(self), fields(%engine), err)]
	async fn upsert(
		&self,
		engine: &EngineTag,
		update: ProgressUpdate,
		emission: Emission,
	) -> Result<ProgressState, StoreError> {
		let lock = self.write_lock(engine).await;
		let _guard = lock.lock().await;

		let mut tx = self.pool.begin().await?;

		// Rows store milliseconds, so hand out exactly what a later read returns
		let now = DateTime::from_timestamp_millis(Utc::now().timestamp_millis())
			.unwrap_or_else(Utc::now);

		let mut state = sqlx::query_as::<_, ProgressRow>(&format!(
			"SELECT {PROGRESS_COLUMNS} FROM text_index_progress WHERE engine = ?"
		))
		.bind(engine.as_str())
		.fetch_optional(&mut *tx)
		.await?
		.map(ProgressState::try_from)
		.transpose()?
		.unwrap_or_else(|| ProgressState::new(engine.clone(), now));

		state.apply(&update, now);

		sqlx::query(&format!(
			"INSERT INTO text_index_progress ({PROGRESS_COLUMNS})
			VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
			ON CONFLICT (engine) DO UPDATE SET
				total_items = excluded.total_items,
				processed_items = excluded.processed_items,
				failed_items = excluded.failed_items,
				is_processing = excluded.is_processing,
				is_paused = excluded.is_paused,
				dismissed = excluded.dismissed,
				last_updated = excluded.last_updated,
				avg_processing_time_ms = excluded.avg_processing_time_ms,
				timing_samples = excluded.timing_samples,
				estimated_completion_at = excluded.estimated_completion_at"
		))
		.bind(engine.as_str())
		.bind(to_db(state.total_items))
		.bind(to_db(state.processed_items))
		.bind(to_db(state.failed_items))
		.bind(state.is_processing)
		.bind(state.is_paused)
		.bind(state.dismissed)
		.bind(state.last_updated.timestamp_millis())
		.bind(to_db(state.avg_processing_time_ms))
		.bind(to_db(state.timing_samples))
		.bind(state.estimated_completion_at.map(|at| at.timestamp_millis()))
		.execute(&mut *tx)
		.await?;

		tx.commit().await?;

		let sender = self.watcher(engine).await?;
		match emission {
			Emission::Forced => {
				sender.send_replace(Some(state.clone()));
			}
			Emission::OnChange => {
				sender.send_if_modified(|current| {
					if current
						.as_ref()
						.is_some_and(|current| current.same_progress(&state))
					{
						false
					} else {
						*current = Some(state.clone());
						true
					}
				});
			}
		}

		trace!(?state, "Progress updated");

		Ok(state)
	}

	async fn subscribe(&self, engine: &EngineTag) -> WatchStream<Option<ProgressState>> {
		let receiver = match self.watcher(engine).await {
			Ok(sender) => sender.subscribe(),
			Err(e) => {
				// Subscribers still get every future write, just not the stored value
				warn!(?e, %engine, "Failed to read progress for a new subscriber");
				let (sender, receiver) = watch::channel(None);
				self.watchers.lock().await.insert(engine.clone(), sender);
				receiver
			}
		};

		WatchStream::new(receiver)
	}

	#[instrument(skip(self), fields(%engine), err)]
	async fn clear(&self, engine: &EngineTag) -> Result<(), StoreError> {
		let lock = self.write_lock(engine).await;
		let _guard = lock.lock().await;

		sqlx::query("DELETE FROM text_index_progress WHERE engine = ?")
			.bind(engine.as_str())
			.execute(&self.pool)
			.await?;

		self.watcher(engine).await?.send_replace(None);

		debug!("Progress cleared");

		Ok(())
	}
}

#[async_trait]
impl ExtractionRecordStore for IndexDb {
	async fn insert_if_absent(&self, record: &ExtractionRecord) -> Result<bool, StoreError> {
		let inserted = sqlx::query(&format!(
			"INSERT OR IGNORE INTO text_index_record ({RECORD_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?)"
		))
		.bind(record.engine.as_str())
		.bind(record.item_id)
		.bind(&record.text)
		.bind(record.confidence)
		.bind(i64::from(record.block_count))
		.bind(record.extracted_at.timestamp_millis())
		.bind(duration_to_db(record.processing_time))
		.execute(&self.pool)
		.await?
		.rows_affected() == 1;

		Ok(inserted)
	}

	async fn recorded_ids(&self, engine: &EngineTag) -> Result<HashSet<ItemId>, StoreError> {
		Ok(
			sqlx::query_scalar::<_, i64>("SELECT item_id FROM text_index_record WHERE engine = ?")
				.bind(engine.as_str())
				.fetch_all(&self.pool)
				.await?
				.into_iter()
				.collect(),
		)
	}

	async fn count(&self, engine: &EngineTag) -> Result<u64, StoreError> {
		let count = sqlx::query_scalar::<_, i64>(
			"SELECT COUNT(*) FROM text_index_record WHERE engine = ?",
		)
		.bind(engine.as_str())
		.fetch_one(&self.pool)
		.await?;

		from_db("count", count)
	}

	async fn get_record(
		&self,
		engine: &EngineTag,
		item_id: ItemId,
	) -> Result<Option<ExtractionRecord>, StoreError> {
		sqlx::query_as::<_, RecordRow>(&format!(
			"SELECT {RECORD_COLUMNS} FROM text_index_record WHERE engine = ? AND item_id = ?"
		))
		.bind(engine.as_str())
		.bind(item_id)
		.fetch_optional(&self.pool)
		.await?
		.map(ExtractionRecord::try_from)
		.transpose()
	}

	async fn is_recorded(&self, engine: &EngineTag, item_id: ItemId) -> Result<bool, StoreError> {
		Ok(sqlx::query_scalar::<_, bool>(
			"SELECT EXISTS (SELECT 1 FROM text_index_record WHERE engine = ? AND item_id = ?)",
		)
		.bind(engine.as_str())
		.bind(item_id)
		.fetch_one(&self.pool)
		.await?)
	}

	async fn search(
		&self,
		engine: &EngineTag,
		query: &str,
		limit: u32,
	) -> Result<Vec<ExtractionRecord>, StoreError> {
		let pattern = format!(
			"%{}%",
			query
				.replace('\\', "\\\\")
				.replace('%', "\\%")
				.replace('_', "\\_")
		);

		sqlx::query_as::<_, RecordRow>(&format!(
			"SELECT {RECORD_COLUMNS} FROM text_index_record
			WHERE engine = ? AND text LIKE ? ESCAPE '\\'
			ORDER BY extracted_at DESC, item_id DESC
			LIMIT ?"
		))
		.bind(engine.as_str())
		.bind(pattern)
		.bind(i64::from(limit))
		.fetch_all(&self.pool)
		.await?
		.into_iter()
		.map(ExtractionRecord::try_from)
		.collect()
	}

	#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // means of f32s and positive millis
	async fn stats(&self, engine: &EngineTag) -> Result<RecordStats, StoreError> {
		let (count, avg_confidence, avg_processing_time_ms) =
			sqlx::query_as::<_, (i64, Option<f64>, Option<f64>)>(
				"SELECT COUNT(*), AVG(confidence), AVG(processing_time_ms)
				FROM text_index_record WHERE engine = ?",
			)
			.bind(engine.as_str())
			.fetch_one(&self.pool)
			.await?;

		Ok(RecordStats {
			count: from_db("count", count)?,
			avg_confidence: avg_confidence.unwrap_or_default() as f32,
			avg_processing_time: Duration::from_millis(
				avg_processing_time_ms.unwrap_or_default().max(0.0) as u64,
			),
		})
	}

	#[instrument(skip(self, item_ids), fields(%engine, items_count = item_ids.len()), err)]
	async fn delete(&self, engine: &EngineTag, item_ids: &[ItemId]) -> Result<u64, StoreError> {
		let mut tx = self.pool.begin().await?;
		let mut deleted = 0;

		for item_id in item_ids {
			deleted += sqlx::query("DELETE FROM text_index_record WHERE engine = ? AND item_id = ?")
				.bind(engine.as_str())
				.bind(item_id)
				.execute(&mut *tx)
				.await?
				.rows_affected();
		}

		tx.commit().await?;

		Ok(deleted)
	}
}

#[derive(FromRow)]
struct ProgressRow {
	engine: String,
	total_items: i64,
	processed_items: i64,
	failed_items: i64,
	is_processing: bool,
	is_paused: bool,
	dismissed: bool,
	last_updated: i64,
	avg_processing_time_ms: i64,
	timing_samples: i64,
	estimated_completion_at: Option<i64>,
}

impl TryFrom<ProgressRow> for ProgressState {
	type Error = StoreError;

	fn try_from(row: ProgressRow) -> Result<Self, Self::Error> {
		Ok(Self {
			engine: EngineTag::new(row.engine),
			total_items: from_db("total_items", row.total_items)?,
			processed_items: from_db("processed_items", row.processed_items)?,
			failed_items: from_db("failed_items", row.failed_items)?,
			is_processing: row.is_processing,
			is_paused: row.is_paused,
			dismissed: row.dismissed,
			last_updated: timestamp_from_db("last_updated", row.last_updated)?,
			avg_processing_time_ms: from_db("avg_processing_time_ms", row.avg_processing_time_ms)?,
			timing_samples: from_db("timing_samples", row.timing_samples)?,
			estimated_completion_at: row
				.estimated_completion_at
				.map(|at| timestamp_from_db("estimated_completion_at", at))
				.transpose()?,
		})
	}
}

#[derive(FromRow)]
struct RecordRow {
	engine: String,
	item_id: i64,
	text: String,
	confidence: f32,
	block_count: i64,
	extracted_at: i64,
	processing_time_ms: i64,
}

impl TryFrom<RecordRow> for ExtractionRecord {
	type Error = StoreError;

	fn try_from(row: RecordRow) -> Result<Self, Self::Error> {
		Ok(Self {
			engine: EngineTag::new(row.engine),
			item_id: row.item_id,
			text: row.text,
			confidence: row.confidence,
			block_count: u32::try_from(row.block_count).map_err(|_| StoreError::OutOfRange {
				column: "block_count",
				value: row.block_count,
			})?,
			extracted_at: timestamp_from_db("extracted_at", row.extracted_at)?,
			processing_time: Duration::from_millis(from_db(
				"processing_time_ms",
				row.processing_time_ms,
			)?),
		})
	}
}

fn to_db(value: u64) -> i64 {
	i64::try_from(value).unwrap_or(i64::MAX)
}

fn duration_to_db(duration: Duration) -> i64 {
	i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

fn from_db(column: &'static str, value: i64) -> Result<u64, StoreError> {
	u64::try_from(value).map_err(|_| StoreError::OutOfRange { column, value })
}

fn timestamp_from_db(column: &'static str, value: i64) -> Result<DateTime<Utc>, StoreError> {
	DateTime::from_timestamp_millis(value).ok_or(StoreError::OutOfRange { column, value })
}
