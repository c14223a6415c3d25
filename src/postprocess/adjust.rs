// ~/src/postprocess/adjust.rs

use image::{Rgba, RgbaImage};

use crate::data_loaders::config::ImageProcessingSettings;

/* =========================
   PER-CHANNEL HELPERS
   ========================= */

pub fn clamp(value: f64, min: f64, max: f64) -> f64 {
    value.max(min).min(max)
}

pub fn adjust_brightness(c: f64, brightness: f64) -> f64 {
    clamp(c + brightness, 0.0, 1.0)
}

pub fn adjust_black_point(c: f64, black_point: f64) -> f64 {
    let span = 1.0 - black_point;
    if span <= f64::EPSILON {
        return if c >= black_point { 1.0 } else { 0.0 };
    }
    clamp((c - black_point) / span, 0.0, 1.0)
}

pub fn adjust_white_point(c: f64, white_point: f64) -> f64 {
    if white_point <= f64::EPSILON {
        return if c > 0.0 { 1.0 } else { 0.0 };
    }
    clamp(c * (1.0 / white_point), 0.0, 1.0)
}

pub fn adjust_shadow_strength(c: f64, strength: f64) -> f64 {
    clamp(c * strength, 0.0, 1.0)
}

pub fn apply_gamma(c: f64, gamma: f64) -> f64 {
    if gamma <= 0.0 {
        return c;
    }
    c.max(0.0).powf(1.0 / gamma)
}

/// YIQ hue rotation by `angle` degrees.
pub fn rotate_hue(r: f64, g: f64, b: f64, angle: f64) -> (f64, f64, f64) {
    let (w, u) = angle.to_radians().sin_cos();

    let nr = (0.299 + 0.701 * u + 0.168 * w) * r
        + (0.587 - 0.587 * u + 0.330 * w) * g
        + (0.114 - 0.114 * u - 0.497 * w) * b;
    let ng = (0.299 - 0.299 * u - 0.328 * w) * r
        + (0.587 + 0.413 * u + 0.035 * w) * g
        + (0.114 - 0.114 * u + 0.292 * w) * b;
    let nb = (0.299 - 0.3 * u + 1.25 * w) * r
        + (0.587 - 0.588 * u - 1.05 * w) * g
        + (0.114 + 0.886 * u - 0.203 * w) * b;

    (nr, ng, nb)
}

/* =========================
   WHOLE-IMAGE ADJUSTMENT
   ========================= */

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorAdjustments {
    pub contrast: f64,
    pub saturation: f64,
    pub brightness: f64,
    pub hue: f64,
    pub gamma: f64,
    pub black_point: f64,
    pub white_point: f64,
    pub shadow_strength: f64,
}

impl Default for ColorAdjustments {
    fn default() -> Self {
        Self::from(&ImageProcessingSettings::default())
    }
}

impl From<&ImageProcessingSettings> for ColorAdjustments {
    fn from(s: &ImageProcessingSettings) -> Self {
        Self {
            contrast: s.contrast,
            saturation: s.saturation,
            brightness: s.brightness,
            hue: s.hue,
            gamma: s.gamma,
            black_point: s.black_point,
            white_point: s.white_point,
            shadow_strength: s.shadow_strength,
        }
    }
}

impl ColorAdjustments {
    /// Runs every stage on one normalized RGB triple. The stage order is
    /// fixed; each one consumes the previous result.
    pub fn adjust_rgb(&self, rgb: [f64; 3]) -> [f64; 3] {
        let [mut r, mut g, mut b] = rgb;

        for c in [&mut r, &mut g, &mut b] {
            *c = adjust_black_point(*c, self.black_point);
            *c = adjust_white_point(*c, self.white_point);
            *c = (*c - 0.5) * self.contrast + 0.5;
        }

        let avg = (r + g + b) / 3.0;
        for c in [&mut r, &mut g, &mut b] {
            *c = avg + (*c - avg) * self.saturation;
            *c = adjust_brightness(*c, self.brightness);
        }

        if self.hue != 0.0 {
            (r, g, b) = rotate_hue(r, g, b, self.hue);
        }

        for c in [&mut r, &mut g, &mut b] {
            *c = apply_gamma(*c, self.gamma);
            *c = adjust_shadow_strength(*c, self.shadow_strength);
            *c = clamp(*c, 0.0, 1.0);
        }

        [r, g, b]
    }

    pub fn adjust_pixel(&self, px: Rgba<u8>) -> Rgba<u8> {
        let [r, g, b] = self.adjust_rgb([
            f64::from(px[0]) / 255.0,
            f64::from(px[1]) / 255.0,
            f64::from(px[2]) / 255.0,
        ]);
        Rgba([to_channel(r), to_channel(g), to_channel(b), px[3]])
    }

    /// Adjusts `img` in place. Alpha is left untouched.
    pub fn apply(&self, img: &mut RgbaImage) {
        for px in img.pixels_mut() {
            *px = self.adjust_pixel(*px);
        }
    }
}

fn to_channel(v: f64) -> u8 {
    (v * 255.0).round().clamp(0.0, 255.0) as u8
}
