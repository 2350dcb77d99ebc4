use sd_core_text_indexer::IndexerConfig;

use std::{
	fs,
	path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

const CONFIG_FILE_NAME: &str = "indexer.json";
const DATABASE_FILE_NAME: &str = "text_index.db";

/// Application level configuration, persisted as JSON in the data directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
	/// Config schema version
	pub version: u32,

	/// Data directory path
	pub data_dir: PathBuf,

	/// Used when `RUST_LOG` isn't set
	pub log_level: String,

	/// Folders whose images get indexed
	#[serde(default)]
	pub media_dirs: Vec<PathBuf>,

	/// Tesseract executable, looked up in `PATH` when relative
	pub tesseract: PathBuf,

	#[serde(default)]
	pub indexer: IndexerConfig,
}

impl AppConfig {
	pub fn default_with_dir(data_dir: PathBuf) -> Self {
		Self {
			version: 1,
			data_dir,
			log_level: "info".to_string(),
			media_dirs: Vec::new(),
			tesseract: PathBuf::from("tesseract"),
			indexer: IndexerConfig::default(),
		}
	}

	/// Load configuration from the data directory, creating a default one on first run.
	pub fn load_from(data_dir: &Path) -> Result<Self> {
		let config_path = data_dir.join(CONFIG_FILE_NAME);

		if config_path.exists() {
			let json = fs::read_to_string(&config_path).with_context(|| {
				format!("Failed to read config file {}", config_path.display())
			})?;

			let mut config: Self = serde_json::from_str(&json).with_context(|| {
				format!("Failed to parse config file {}", config_path.display())
			})?;

			// The folder may have been moved since the config was written
			config.data_dir = data_dir.to_path_buf();

			Ok(config)
		} else {
			info!(path = %config_path.display(), "No config found, creating default");
			let config = Self::default_with_dir(data_dir.to_path_buf());
			config.save()?;
			Ok(config)
		}
	}

	pub fn save(&self) -> Result<()> {
		fs::create_dir_all(&self.data_dir).with_context(|| {
			format!("Failed to create data directory {}", self.data_dir.display())
		})?;

		let json = serde_json::to_string_pretty(self)?;
		fs::write(self.data_dir.join(CONFIG_FILE_NAME), json)?;

		Ok(())
	}

	pub fn logs_dir(&self) -> PathBuf {
		self.data_dir.join("logs")
	}

	pub fn database_path(&self) -> PathBuf {
		self.data_dir.join(DATABASE_FILE_NAME)
	}
}
