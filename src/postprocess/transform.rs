// ~/src/postprocess/transform.rs

use std::path::{Path, PathBuf};

use image::{
    imageops::{self, FilterType},
    RgbaImage,
};
use rand::Rng;
use tracing::{debug, warn};

use super::{
    adjust::ColorAdjustments, average_brightness, noise_image, overlay, scaled_opacity,
    ADAPTIVE_MAX_BRIGHTNESS, ADAPTIVE_MIN_BRIGHTNESS,
};
use crate::{
    data_loaders::config::{Dimensions, ImageProcessingSettings, InputSettings, PipelineConfig, RuntimeConfig},
    error::ImageError,
    DEBUG_NAME,
};

pub const MAX_WATERMARK_HEIGHT: u32 = 50;
pub const WATERMARK_MARGIN: i64 = 20;
const WATERMARK_MIN_OPACITY: f64 = 0.2;
const WATERMARK_MAX_OPACITY: f64 = 0.8;
const NOISE_MIN_OPACITY: f64 = 0.01;
/// Noise is only laid over images brighter than this.
pub const NOISE_BRIGHTNESS_THRESHOLD: f64 = 0.0;

/* =========================
   INDIVIDUAL STAGES
   ========================= */

/// Centered crop of `1/factor` of each dimension, shifted by fractions of the
/// image size and clipped to the image bounds.
pub fn crop(img: &RgbaImage, factor: f64, offset_x: f64, offset_y: f64) -> Result<RgbaImage, ImageError> {
    let (w, h) = (i64::from(img.width()), i64::from(img.height()));
    let factor = if factor > 0.0 { factor } else { 1.0 };

    let cw = (w as f64 / factor) as i64;
    let ch = (h as f64 / factor) as i64;
    let dx = (offset_x * w as f64) as i64;
    let dy = (offset_y * h as f64) as i64;

    let x0 = ((w - cw) / 2 + dx).clamp(0, w);
    let y0 = ((h - ch) / 2 + dy).clamp(0, h);
    let x1 = ((w + cw) / 2 + dx).clamp(0, w);
    let y1 = ((h + ch) / 2 + dy).clamp(0, h);

    if x1 <= x0 || y1 <= y0 {
        return Err(ImageError::EmptyCrop {
            width: img.width(),
            height: img.height(),
        });
    }

    Ok(imageops::crop_imm(img, x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32).to_image())
}

pub fn sharpen(img: RgbaImage, strength: f64) -> RgbaImage {
    if strength <= 0.0 {
        return img;
    }
    imageops::unsharpen(&img, strength as f32, 0)
}

pub fn blur(img: RgbaImage, strength: f64) -> RgbaImage {
    if strength <= 0.0 {
        return img;
    }
    imageops::blur(&img, strength as f32)
}

pub fn resize_to(img: &RgbaImage, target: Dimensions) -> RgbaImage {
    if img.dimensions() == (target.width, target.height) {
        return img.clone();
    }
    imageops::resize(img, target.width, target.height, FilterType::Lanczos3)
}

/// Lays blocky grey grain over `img`. Returns whether anything was drawn.
pub fn apply_noise(img: &mut RgbaImage, max_opacity: f64, scale: u32, rng: &mut impl Rng) -> bool {
    if max_opacity <= 0.0 || img.width() == 0 || img.height() == 0 {
        return false;
    }

    let avg = average_brightness(img);
    let opacity = scaled_opacity(
        avg,
        ADAPTIVE_MIN_BRIGHTNESS,
        ADAPTIVE_MAX_BRIGHTNESS,
        NOISE_MIN_OPACITY,
        max_opacity,
    );
    debug!(avg_brightness = avg, opacity, "[{}][TRANSFORM] Scaled noise opacity", DEBUG_NAME);

    if avg <= NOISE_BRIGHTNESS_THRESHOLD {
        debug!("[{}][TRANSFORM] Image too dark for noise", DEBUG_NAME);
        return false;
    }

    let scale = scale.max(1);
    let (w, h) = img.dimensions();
    let low = noise_image((w / scale).max(1), (h / scale).max(1), rng);
    let grain = imageops::resize(&low, w, h, FilterType::Nearest);

    overlay(img, &grain, 0, 0, opacity);
    true
}

/// Composites `mark` into the bottom-right corner of `img`, shrinking it to
/// [`MAX_WATERMARK_HEIGHT`] first. `reference_brightness` drives the opacity.
pub fn apply_watermark(img: &mut RgbaImage, mark: &RgbaImage, reference_brightness: f64) {
    let mark = if mark.height() > MAX_WATERMARK_HEIGHT {
        let ratio = f64::from(MAX_WATERMARK_HEIGHT) / f64::from(mark.height());
        let width = ((f64::from(mark.width()) * ratio) as u32).max(1);
        imageops::resize(mark, width, MAX_WATERMARK_HEIGHT, FilterType::Lanczos3)
    } else {
        mark.clone()
    };

    let x = i64::from(img.width()) - i64::from(mark.width()) - WATERMARK_MARGIN;
    let y = i64::from(img.height()) - i64::from(mark.height()) - WATERMARK_MARGIN;
    let opacity = scaled_opacity(
        reference_brightness,
        ADAPTIVE_MIN_BRIGHTNESS,
        ADAPTIVE_MAX_BRIGHTNESS,
        WATERMARK_MIN_OPACITY,
        WATERMARK_MAX_OPACITY,
    );

    overlay(img, &mark, x, y, opacity);
}

fn load_watermark(path: &Path) -> Option<RgbaImage> {
    if !crate::utility::file_exists(path) {
        return None;
    }
    match image::open(path) {
        Ok(img) => Some(img.to_rgba8()),
        Err(e) => {
            warn!(error = %e, "[{}][TRANSFORM] Ignoring unreadable watermark {}", DEBUG_NAME, path.display());
            None
        }
    }
}

/* =========================
   CHAIN
   ========================= */

/// The fixed processing order applied to every fetched image.
#[derive(Debug, Clone)]
pub struct TransformChain {
    input: InputSettings,
    processing: ImageProcessingSettings,
    target: Dimensions,
    watermark: Option<PathBuf>,
}

impl TransformChain {
    pub fn new(pipeline: &PipelineConfig, runtime: &RuntimeConfig) -> Self {
        Self {
            input: pipeline.input.clone(),
            processing: pipeline.image_processing.clone(),
            target: runtime.target,
            watermark: pipeline.watermark_path(),
        }
    }

    pub fn run(&self, source: &RgbaImage) -> Result<RgbaImage, ImageError> {
        self.run_with_rng(source, &mut rand::rng())
    }

    pub fn run_with_rng(&self, source: &RgbaImage, rng: &mut impl Rng) -> Result<RgbaImage, ImageError> {
        let p = &self.processing;

        let mut img = crop(source, self.input.crop_factor, self.input.offset_x, self.input.offset_y)?;
        ColorAdjustments::from(p).apply(&mut img);
        let img = sharpen(img, p.sharpen_strength);
        let img = resize_to(&img, self.target);
        let mut img = blur(img, p.blur_strength);

        apply_noise(&mut img, p.max_noise_opacity, p.noise_scale, rng);

        if let Some(mark) = self.watermark.as_deref().and_then(load_watermark) {
            apply_watermark(&mut img, &mark, average_brightness(source));
            debug!("[{}][TRANSFORM] Watermark applied", DEBUG_NAME);
        }

        Ok(img)
    }
}
