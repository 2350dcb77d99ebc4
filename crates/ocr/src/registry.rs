use std::{borrow::Cow, collections::BTreeMap, fmt, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
	auto_detect::AutoDetectEngine,
	backend::RecognitionBackend,
	engine::{RecognitionEngine, SingleScriptEngine},
	script::Script,
};

/// Name of a recognition pipeline variant, used as the key for everything tracked per engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EngineTag(Cow<'static, str>);

impl EngineTag {
	pub const LATIN: Self = Self(Cow::Borrowed("latin"));
	pub const DEVANAGARI: Self = Self(Cow::Borrowed("devanagari"));

	#[must_use]
	pub fn new(tag: impl Into<Cow<'static, str>>) -> Self {
		Self(tag.into())
	}

	#[must_use]
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for EngineTag {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// How an engine is assembled out of backends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EngineStrategy {
	SingleScript {
		script: Script,
	},
	AutoDetect {
		default: Script,
		/// Scripts that get their own engine, in fallback order.
		dedicated: Vec<Script>,
	},
}

/// Maps each [`EngineTag`] to the engine serving it. Built once at startup and read only afterwards.
#[derive(Default, Clone)]
pub struct EngineRegistry {
	engines: BTreeMap<EngineTag, Arc<dyn RecognitionEngine>>,
}

impl fmt::Debug for EngineRegistry {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("EngineRegistry")
			.field("tags", &self.engines.keys().collect::<Vec<_>>())
			.finish()
	}
}

impl EngineRegistry {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers `engine` under `tag`, replacing any previous one.
	#[must_use]
	pub fn with_engine(mut self, tag: EngineTag, engine: Arc<dyn RecognitionEngine>) -> Self {
		debug!(%tag, script = %engine.script(), "Registering recognition engine");
		self.engines.insert(tag, engine);
		self
	}

	/// Builds and registers an engine following `strategy`, asking `backend_for` for one backend per
	/// script involved.
	#[must_use]
	pub fn with_strategy(
		self,
		tag: EngineTag,
		strategy: &EngineStrategy,
		time_budget: Duration,
		backend_for: impl Fn(Script) -> Arc<dyn RecognitionBackend>,
	) -> Self {
		let single = |script: Script| -> Arc<dyn RecognitionEngine> {
			Arc::new(SingleScriptEngine::new(
				script,
				backend_for(script),
				time_budget,
			))
		};

		let engine = match strategy {
			EngineStrategy::SingleScript { script } => single(*script),
			EngineStrategy::AutoDetect { default, dedicated } => Arc::new(AutoDetectEngine::new(
				single(*default),
				dedicated.iter().copied().map(single),
			)),
		};

		self.with_engine(tag, engine)
	}

	#[must_use]
	pub fn get(&self, tag: &EngineTag) -> Option<Arc<dyn RecognitionEngine>> {
		self.engines.get(tag).cloned()
	}

	pub fn tags(&self) -> impl Iterator<Item = &EngineTag> {
		self.engines.keys()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.engines.is_empty()
	}
}
