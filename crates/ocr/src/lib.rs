//! Text recognition for the indexing pipeline.
//!
//! Recognition goes through [`RecognitionEngine`]s, which wrap black box [`RecognitionBackend`]s with a
//! hard time budget and turn every failure into an [`EngineError`] value. The [`AutoDetectEngine`]
//! sniffs extracted text for other scripts and re-runs recognition with a dedicated engine when it
//! finds one. Engines are looked up by [`EngineTag`] in an [`EngineRegistry`] built at startup.

#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::cast_possible_truncation,
	clippy::cast_possible_wrap,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::dbg_macro,
	clippy::deprecated_cfg_attr,
	clippy::separated_literal_suffix,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

mod auto_detect;
mod backend;
mod decode;
mod engine;
mod error;
mod registry;
pub mod script;
mod tesseract;

pub use auto_detect::AutoDetectEngine;
pub use backend::{BackendOutput, RecognitionBackend};
pub use decode::{load_image, OcrImage};
pub use engine::{Extraction, RecognitionEngine, SingleScriptEngine};
pub use error::{BackendError, EngineError};
pub use registry::{EngineRegistry, EngineStrategy, EngineTag};
pub use script::Script;
pub use tesseract::{parse_tsv, TesseractCli};

/// Longest side, in pixels, images are shrunk to before recognition.
pub const DEFAULT_MAX_IMAGE_DIMENSION: u32 = 1024;
