use std::time::Duration;

use sd_ocr::{EngineStrategy, EngineTag, Script, DEFAULT_MAX_IMAGE_DIMENSION};

use serde::{Deserialize, Serialize};

/// Tunables of the whole pipeline.
///
/// Every constant here was picked empirically, none of them is an invariant of the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
	/// Items handled by one batch, continuous runs take slices of this size.
	pub batch_size: usize,
	/// Pause between two items of a batch, so recognition doesn't saturate the machine.
	#[serde(with = "millis")]
	pub item_delay: Duration,
	#[serde(with = "millis")]
	pub monitor_period: Duration,
	/// Consecutive polls without progress before a processing engine is declared stalled.
	pub stall_threshold_polls: u32,
	#[serde(with = "millis")]
	pub monitor_error_backoff: Duration,
	/// Bounded duration of each keep-alive assertion, renewed while an engine stays active.
	#[serde(with = "millis")]
	pub wake_lock_duration: Duration,
	pub max_consecutive_batch_failures: u32,
	pub max_image_dimension: u32,
	#[serde(with = "millis")]
	pub fast_timeout: Duration,
	#[serde(with = "millis")]
	pub detailed_timeout: Duration,
	pub engines: Vec<EngineConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
	pub tag: EngineTag,
	pub strategy: EngineStrategy,
	/// Detailed engines get [`IndexerConfig::detailed_timeout`], the others [`IndexerConfig::fast_timeout`].
	#[serde(default)]
	pub detailed: bool,
}

impl Default for IndexerConfig {
	fn default() -> Self {
		Self {
			batch_size: 50,
			item_delay: Duration::from_millis(100),
			monitor_period: Duration::from_secs(2),
			stall_threshold_polls: 30,
			monitor_error_backoff: Duration::from_secs(5),
			wake_lock_duration: Duration::from_secs(10 * 60),
			max_consecutive_batch_failures: 5,
			max_image_dimension: DEFAULT_MAX_IMAGE_DIMENSION,
			fast_timeout: Duration::from_secs(3),
			detailed_timeout: Duration::from_secs(30),
			engines: vec![
				EngineConfig {
					tag: EngineTag::LATIN,
					strategy: EngineStrategy::SingleScript {
						script: Script::Latin,
					},
					detailed: false,
				},
				EngineConfig {
					tag: EngineTag::DEVANAGARI,
					strategy: EngineStrategy::AutoDetect {
						default: Script::Latin,
						dedicated: vec![Script::Devanagari],
					},
					detailed: true,
				},
			],
		}
	}
}

impl IndexerConfig {
	#[must_use]
	pub const fn time_budget(&self, engine: &EngineConfig) -> Duration {
		if engine.detailed {
			self.detailed_timeout
		} else {
			self.fast_timeout
		}
	}
}

mod millis {
	use std::time::Duration;

	use serde::{Deserialize, Deserializer, Serializer};

	#[allow(clippy::cast_possible_truncation)] // u64 millis covers half a billion years
	pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_u64(duration.as_millis() as u64)
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
		u64::deserialize(deserializer).map(Duration::from_millis)
	}
}
