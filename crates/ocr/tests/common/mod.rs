use sd_ocr::{BackendError, BackendOutput, OcrImage, RecognitionBackend};

use std::{
	sync::{
		atomic::{AtomicUsize, Ordering},
		Arc,
	},
	time::Duration,
};

use async_trait::async_trait;
use image::DynamicImage;
use tokio::time::sleep;

pub fn blank_image() -> OcrImage {
	DynamicImage::new_luma8(8, 8).into()
}

#[derive(Debug, Clone)]
pub enum Behavior {
	Text(&'static str),
	Fail,
	Hang,
	Panic,
}

/// Backend that always behaves the same way and counts how many times it was called.
#[derive(Debug)]
pub struct FakeBackend {
	behavior: Behavior,
	pub calls: Arc<AtomicUsize>,
}

impl FakeBackend {
	pub fn new(behavior: Behavior) -> Arc<Self> {
		Arc::new(Self {
			behavior,
			calls: Arc::new(AtomicUsize::new(0)),
		})
	}

	pub fn calls(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl RecognitionBackend for FakeBackend {
	fn name(&self) -> &'static str {
		"fake"
	}

	async fn recognize(&self, _image: &OcrImage) -> Result<BackendOutput, BackendError> {
		self.calls.fetch_add(1, Ordering::SeqCst);

		match &self.behavior {
			Behavior::Text(text) => Ok(BackendOutput {
				text: (*text).to_string(),
				confidence: 0.8,
				block_count: 1,
			}),
			Behavior::Fail => Err(BackendError::Other("no luck".to_string())),
			Behavior::Hang => {
				sleep(Duration::from_secs(3600)).await;
				Ok(BackendOutput::default())
			}
			Behavior::Panic => panic!("backend exploded"),
		}
	}
}
