use sd_core_text_indexer::{
	EngineTag, ExtractionRecordStore, IndexDb, IndexerContext, ProgressStore, ProgressView,
	TextIndexer,
};
use sd_ocr::{EngineRegistry, RecognitionBackend, TesseractCli};

use std::{env, path::PathBuf, sync::Arc};

use anyhow::{bail, Context, Result};
use async_channel as chan;
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{error, info, warn};

mod config;
mod logging;
mod media;
mod stdin;
mod surface;
mod watcher;

use config::AppConfig;
use media::DirectoryEnumerator;
use stdin::{spawn_console_reader, ConsoleInput};
use surface::{LogSurface, ProcessKeepAlive};
use watcher::MediaWatcher;

#[derive(Parser, Debug)]
#[command(name = "sd-indexer", about = "Index the text found in your images", version)]
struct Cli {
	/// Where the configuration, the index database and the logs live
	#[arg(long, env = "SD_INDEXER_DATA_DIR", global = true)]
	data_dir: Option<PathBuf>,

	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
	/// Index media folders, keeping an eye on them until interrupted
	Run {
		/// Folders to index, remembered for the next runs
		#[arg(long = "media-dir", env = "SD_INDEXER_MEDIA_DIRS", value_delimiter = ',')]
		media_dirs: Vec<PathBuf>,

		/// Engines to start, all configured engines by default
		#[arg(long = "engine")]
		engines: Vec<String>,

		#[arg(long)]
		batch_size: Option<usize>,

		/// Don't react to changes in the media folders
		#[arg(long)]
		no_watch: bool,

		/// Throw away the progress of the started engines and count again from the records
		#[arg(long)]
		force_restart: bool,
	},

	/// Print the stored progress of every engine as JSON
	Status,

	/// Search extracted text
	Search {
		query: String,

		#[arg(long, default_value = "latin")]
		engine: String,

		#[arg(long, default_value_t = 20)]
		limit: u32,
	},
}

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();

	let data_dir = match cli.data_dir {
		Some(dir) => dir,
		None => env::current_dir()
			.context("Failed to get current directory")?
			.join("sd_indexer_data"),
	};

	let mut config = AppConfig::load_from(&data_dir)?;

	match cli.command {
		Commands::Run {
			media_dirs,
			engines,
			batch_size,
			no_watch,
			force_restart,
		} => {
			if !media_dirs.is_empty() && media_dirs != config.media_dirs {
				config.media_dirs = media_dirs;
				config.save()?;
			}

			if let Some(batch_size) = batch_size {
				config.indexer.batch_size = batch_size;
			}

			logging::init(&config.logs_dir(), &config.log_level)?;

			let engines = engines.into_iter().map(EngineTag::new).collect::<Vec<_>>();

			run(config, engines, !no_watch, force_restart).await
		}

		Commands::Status => status(&config).await,

		Commands::Search {
			query,
			engine,
			limit,
		} => search(&config, EngineTag::new(engine), &query, limit).await,
	}
}

fn build_registry(config: &AppConfig) -> EngineRegistry {
	config
		.indexer
		.engines
		.iter()
		.fold(EngineRegistry::new(), |registry, engine| {
			registry.with_strategy(
				engine.tag.clone(),
				&engine.strategy,
				config.indexer.time_budget(engine),
				|script| -> Arc<dyn RecognitionBackend> {
					Arc::new(TesseractCli::new(&config.tesseract, script))
				},
			)
		})
}

async fn run(
	config: AppConfig,
	requested: Vec<EngineTag>,
	watch: bool,
	force_restart: bool,
) -> Result<()> {
	if config.media_dirs.is_empty() {
		bail!("No media folders to index, pass at least one with --media-dir");
	}

	let registry = build_registry(&config);
	let engines = if requested.is_empty() {
		registry.tags().cloned().collect::<Vec<_>>()
	} else {
		for engine in &requested {
			if registry.get(engine).is_none() {
				bail!("Engine {engine} is not configured");
			}
		}
		requested
	};

	info!(
		data_dir = %config.data_dir.display(),
		media_dirs = ?config.media_dirs,
		?engines,
		"Starting text indexer",
	);

	let db = Arc::new(IndexDb::open(config.database_path()).await?);

	let indexer = TextIndexer::new(
		IndexerContext::new(
			Arc::new(DirectoryEnumerator::new(config.media_dirs.clone())),
			Arc::clone(&db),
			registry,
			config.indexer.clone(),
		),
		Arc::new(LogSurface),
		Arc::new(ProcessKeepAlive),
	);

	let resumed = indexer.ensure_monitoring().await?;
	if resumed > 0 {
		info!(resumed, "Resumed engines interrupted by the last shutdown");
	}

	for engine in &engines {
		let result = if force_restart {
			indexer.force_restart(engine).await.map(|_| ())
		} else {
			match indexer.progress(engine).await? {
				Some(state) if state.is_paused => {
					info!(%engine, "Engine is paused, type `resume {engine}` to continue");
					Ok(())
				}
				Some(state) if state.is_processing => Ok(()),
				_ => indexer.start(engine).await.map(|_| ()),
			}
		};

		if let Err(e) = result {
			error!(%engine, ?e, "Failed to start engine;");
		}
	}

	let media_watcher = if watch {
		match MediaWatcher::new(
			&config.media_dirs,
			Arc::clone(&db),
			indexer.engines(),
			indexer.changes(),
		) {
			Ok(media_watcher) => Some(media_watcher),
			Err(e) => {
				warn!(?e, "Failed to watch media folders, new images won't be picked up;");
				None
			}
		}
	} else {
		None
	};

	let (input_tx, input_rx) = chan::bounded(8);
	spawn_console_reader(input_tx).context("Failed to read console input")?;

	loop {
		tokio::select! {
			res = signal::ctrl_c() => {
				if let Err(e) = res {
					error!(?e, "Failed to listen for ctrl-c;");
				}
				break;
			}

			input = input_rx.recv() => match input {
				Ok(ConsoleInput::Command(engine, command)) => {
					if indexer.commands().send((engine, command)).await.is_err() {
						break;
					}
				}
				Ok(ConsoleInput::Status) => {
					for engine in indexer.engines() {
						match indexer.progress(&engine).await {
							Ok(Some(state)) => {
								let view = ProgressView::from(&state);
								info!(
									%engine,
									state = %view.display,
									processed = view.processed_items,
									total = view.total_items,
									failed = view.failed_items,
									"Status",
								);
							}
							Ok(None) => info!(%engine, "Never started"),
							Err(e) => error!(%engine, ?e, "Failed to read progress;"),
						}
					}
				}
				Ok(ConsoleInput::Quit) => break,
				// Closed stdin means we run detached, keep going until a signal arrives
				Err(_) => {
					if let Err(e) = signal::ctrl_c().await {
						error!(?e, "Failed to listen for ctrl-c;");
					}
					break;
				}
			},
		}
	}

	info!("Shutting down text indexer");

	if let Some(media_watcher) = media_watcher {
		media_watcher.stop();
	}

	indexer.shutdown().await;
	db.close().await;

	info!("Text indexer gracefully shutdown");

	Ok(())
}

async fn status(config: &AppConfig) -> Result<()> {
	let db = IndexDb::open(config.database_path()).await?;

	let mut engines = Vec::new();
	for state in ProgressStore::all(&db).await? {
		let records = ExtractionRecordStore::count(&db, &state.engine).await?;
		engines.push(serde_json::json!({
			"progress": state,
			"view": ProgressView::from(&state),
			"records": records,
		}));
	}

	println!("{}", serde_json::to_string_pretty(&engines)?);

	db.close().await;

	Ok(())
}

async fn search(config: &AppConfig, engine: EngineTag, query: &str, limit: u32) -> Result<()> {
	let db = IndexDb::open(config.database_path()).await?;

	let records = db.search(&engine, query, limit).await?;
	if records.is_empty() {
		println!("No match for `{query}` in {engine}");
	}

	for record in records {
		let first_line = record.text.lines().next().unwrap_or_default();
		println!(
			"{:>20}  {:.2}  {}  {first_line}",
			record.item_id,
			record.confidence,
			record.extracted_at.format("%Y-%m-%d %H:%M"),
		);
	}

	db.close().await;

	Ok(())
}
