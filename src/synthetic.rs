use crate::camera::{CameraDriver, Completion, FrameSink};
use crate::error::{Error, Result};
use crate::models::{EncodingType, StreamConfig};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, RgbImage};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Software camera that renders a moving test pattern and encodes it the
/// way the hardware encoder would, at the configured frame rate.
#[derive(Default)]
pub struct SyntheticCamera {
    paused: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl SyntheticCamera {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Render frame number `index` of the test pattern.
pub fn render_frame(config: &StreamConfig, index: u64) -> Result<Vec<u8>> {
    let shift = (index * 8 % 256) as u32;
    let (width, height) = (config.width, config.height);
    let image = RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([
            ((x * 255 / width.max(1) + shift) % 256) as u8,
            ((y * 255 / height.max(1)) % 256) as u8,
            (shift as u8).wrapping_mul(3),
        ])
    });
    encode(DynamicImage::ImageRgb8(image), config)
}

fn encode(image: DynamicImage, config: &StreamConfig) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let result = match config.encoding {
        EncodingType::Jpeg => {
            let encoder = JpegEncoder::new_with_quality(&mut buffer, config.quality);
            image.write_with_encoder(encoder)
        }
        other => image.write_to(&mut Cursor::new(&mut buffer), image_format(other)),
    };
    result.map_err(|e| {
        Error::CameraError(format!("Failed to encode {} frame: {}", config.encoding, e))
    })?;
    Ok(buffer)
}

fn image_format(encoding: EncodingType) -> ImageFormat {
    match encoding {
        EncodingType::Jpeg => ImageFormat::Jpeg,
        EncodingType::Gif => ImageFormat::Gif,
        EncodingType::Png => ImageFormat::Png,
        EncodingType::Ppm => ImageFormat::Pnm,
        EncodingType::Tga => ImageFormat::Tga,
        EncodingType::Bmp => ImageFormat::Bmp,
    }
}

impl CameraDriver for SyntheticCamera {
    fn start(&mut self, config: &StreamConfig, frames: FrameSink, ready: Completion) {
        if self.worker.is_some() {
            ready.fail("synthetic camera is already running");
            return;
        }
        // Surface encoder problems through the ready callback.
        let first = match render_frame(config, 0) {
            Ok(frame) => frame,
            Err(e) => {
                ready.complete(Err(e));
                return;
            }
        };

        let config = config.clone();
        let paused = self.paused.clone();
        let period = Duration::from_secs_f64(1.0 / config.fps.max(1) as f64);
        self.worker = Some(tokio::spawn(async move {
            frames.push(first);
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            let mut index = 1u64;
            loop {
                ticker.tick().await;
                if paused.load(Ordering::Acquire) {
                    continue;
                }
                let frame_config = config.clone();
                let rendered =
                    tokio::task::spawn_blocking(move || render_frame(&frame_config, index)).await;
                match rendered {
                    Ok(Ok(frame)) => {
                        frames.push(frame);
                    }
                    Ok(Err(e)) => log::error!("Synthetic camera: {}", e),
                    Err(e) => log::error!("Synthetic camera render task failed: {}", e),
                }
                index += 1;
            }
        }));
        ready.succeed();
    }

    fn pause(&mut self, done: Completion) {
        self.paused.store(true, Ordering::Release);
        done.succeed();
    }

    fn resume(&mut self, done: Completion) {
        self.paused.store(false, Ordering::Release);
        done.succeed();
    }

    fn stop(&mut self, done: Completion) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
        done.succeed();
    }
}

impl Drop for SyntheticCamera {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}
