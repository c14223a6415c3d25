// ~/src/postprocess/mod.rs

pub mod adjust;
pub mod clock;
pub mod transform;

use image::{Rgba, RgbaImage};
use rand::Rng;

/// Brightness window used by every adaptive opacity in the pipeline.
pub const ADAPTIVE_MIN_BRIGHTNESS: f64 = 0.0;
pub const ADAPTIVE_MAX_BRIGHTNESS: f64 = 0.4;

/// Mean perceptual luma (`0.299R + 0.587G + 0.114B`) in `[0, 1]`.
pub fn average_brightness(img: &RgbaImage) -> f64 {
    let count = u64::from(img.width()) * u64::from(img.height());
    if count == 0 {
        return 0.0;
    }

    let total: f64 = img
        .pixels()
        .map(|p| 0.299 * f64::from(p[0]) + 0.587 * f64::from(p[1]) + 0.114 * f64::from(p[2]))
        .sum();

    total / 255.0 / count as f64
}

/// Clamps `avg` into the brightness window, maps it linearly onto the
/// opacity range and clamps the result to `[0, 1]`.
pub fn scaled_opacity(avg: f64, min_brightness: f64, max_brightness: f64, min_opacity: f64, max_opacity: f64) -> f64 {
    let span = max_brightness - min_brightness;
    let t = if span.abs() < f64::EPSILON {
        0.0
    } else {
        (avg.clamp(min_brightness, max_brightness) - min_brightness) / span
    };

    (min_opacity * (1.0 - t) + max_opacity * t).clamp(0.0, 1.0)
}

/// Source-over for straight-alpha pixels, with the source alpha scaled by
/// `opacity`.
pub fn over_pixel(dst: Rgba<u8>, src: Rgba<u8>, opacity: f32) -> Rgba<u8> {
    let opacity = opacity.clamp(0.0, 1.0);
    if opacity <= 0.0 || src[3] == 0 {
        return dst;
    }

    let sa = f32::from(src[3]) / 255.0 * opacity;
    let da = f32::from(dst[3]) / 255.0;
    let out_a = sa + da * (1.0 - sa);
    if out_a <= f32::EPSILON {
        return Rgba([0, 0, 0, 0]);
    }

    let mut out = [0u8; 4];
    for i in 0..3 {
        let c = (f32::from(src[i]) * sa + f32::from(dst[i]) * da * (1.0 - sa)) / out_a;
        out[i] = c.round().clamp(0.0, 255.0) as u8;
    }
    out[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
    Rgba(out)
}

/// Draws `top` onto `base` with its top-left corner at `(x, y)`. Parts
/// outside `base` are clipped.
pub fn overlay(base: &mut RgbaImage, top: &RgbaImage, x: i64, y: i64, opacity: f64) {
    if opacity <= 0.0 {
        return;
    }

    let (bw, bh) = (i64::from(base.width()), i64::from(base.height()));
    for (tx, ty, src) in top.enumerate_pixels() {
        let (px, py) = (x + i64::from(tx), y + i64::from(ty));
        if px < 0 || py < 0 || px >= bw || py >= bh {
            continue;
        }
        let dst = base.get_pixel_mut(px as u32, py as u32);
        *dst = over_pixel(*dst, *src, opacity as f32);
    }
}

/// Opaque grey noise, one random value per pixel.
pub fn noise_image(width: u32, height: u32, rng: &mut impl Rng) -> RgbaImage {
    RgbaImage::from_fn(width, height, |_, _| {
        let v: u8 = rng.random();
        Rgba([v, v, v, 255])
    })
}
