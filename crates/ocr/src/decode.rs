use std::{
	io::Cursor,
	path::{Path, PathBuf},
};

use image::{imageops::FilterType, DynamicImage, GenericImageView, ImageFormat};
use tokio::task::spawn_blocking;
use tracing::{instrument, trace};

use super::error::{BackendError, EngineError};

/// A decoded image, ready to be handed to a recognition backend.
#[derive(Debug, Clone)]
pub struct OcrImage {
	image: DynamicImage,
	source: Option<PathBuf>,
}

impl OcrImage {
	#[must_use]
	pub fn dimensions(&self) -> (u32, u32) {
		self.image.dimensions()
	}

	/// Where this image was loaded from, if it came from disk.
	#[must_use]
	pub fn source(&self) -> Option<&Path> {
		self.source.as_deref()
	}

	#[must_use]
	pub const fn as_dynamic(&self) -> &DynamicImage {
		&self.image
	}

	/// Lossless encoding used to pipe the image into external recognizers.
	pub fn to_png(&self) -> Result<Vec<u8>, BackendError> {
		let mut buf = Cursor::new(Vec::new());
		self.image.write_to(&mut buf, ImageFormat::Png)?;
		Ok(buf.into_inner())
	}
}

impl From<DynamicImage> for OcrImage {
	fn from(image: DynamicImage) -> Self {
		Self {
			image,
			source: None,
		}
	}
}

/// Decodes the image at `path` on a blocking thread, shrinking it so its longest side is at most
/// `max_dimension` pixels.
#[instrument(skip_all, fields(path = %path.as_ref().display(), %max_dimension), err)]
pub async fn load_image(path: impl AsRef<Path>, max_dimension: u32) -> Result<OcrImage, EngineError> {
	let path = path.as_ref().to_path_buf();

	spawn_blocking({
		let path = path.clone();
		move || decode_and_downscale(path, max_dimension)
	})
	.await
	.map_err(|_| EngineError::ImageLoaderAborted(path.into_boxed_path()))?
}

fn decode_and_downscale(path: PathBuf, max_dimension: u32) -> Result<OcrImage, EngineError> {
	let image = image::open(&path).map_err(|source| EngineError::ImageLoad {
		path: path.clone().into_boxed_path(),
		source,
	})?;

	let (width, height) = image.dimensions();
	if width == 0 || height == 0 {
		return Err(EngineError::EmptyImage);
	}

	let image = if width.max(height) > max_dimension {
		trace!(%width, %height, "Downscaling image before recognition");
		image.resize(max_dimension, max_dimension, FilterType::Triangle)
	} else {
		image
	};

	Ok(OcrImage {
		image,
		source: Some(path),
	})
}
