// ~/src/postprocess/clock.rs

use std::{fmt::Write as _, path::Path, sync::Arc};

use chrono::{DateTime, Local};
use image::{Rgba, RgbaImage};
use resvg::tiny_skia;
use tracing::{debug, warn};
use usvg::fontdb;

use super::{average_brightness, overlay, scaled_opacity, ADAPTIVE_MAX_BRIGHTNESS, ADAPTIVE_MIN_BRIGHTNESS};
use crate::{
    data_loaders::config::{FontConfig, FontPosition, FontStyle, HorizontalAlignment, VerticalAlignment},
    error::ImageError,
    DEBUG_NAME,
};

const FALLBACK_FAMILY: &str = "sans-serif";

/// Bottom-left corner of the text's ink box, in image pixels.
pub fn anchor(image: (u32, u32), text: (i64, i64), pos: &FontPosition) -> (i64, i64) {
    let (iw, ih) = (i64::from(image.0), i64::from(image.1));
    let (tw, th) = text;

    let x = match pos.horizontal {
        HorizontalAlignment::Left => i64::from(pos.padding_left),
        HorizontalAlignment::Right => iw - tw - i64::from(pos.padding_right),
        HorizontalAlignment::Center => (iw - tw) / 2 + i64::from(pos.horizontal_offset),
    };

    let y = match pos.vertical {
        VerticalAlignment::Top => i64::from(pos.padding_top) + th,
        VerticalAlignment::Bottom => ih - i64::from(pos.padding_bottom),
        VerticalAlignment::Middle => (ih + th) / 2 + i64::from(pos.vertical_offset),
    };

    (x, y)
}

/// Formats `now` with a strftime pattern without panicking on bad patterns.
pub fn format_time(now: &DateTime<Local>, pattern: &str) -> Result<String, ImageError> {
    let mut text = String::new();
    write!(text, "{}", now.format(pattern))
        .map_err(|_| ImageError::Clock(format!("invalid time format '{pattern}'")))?;
    Ok(text)
}

fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

/* =========================
   OVERLAY
   ========================= */

/// Renders the current time onto wallpapers. The font database is built once
/// and reused for every cycle.
pub struct ClockOverlay {
    font: FontConfig,
    family: String,
    fontdb: Arc<fontdb::Database>,
}

impl ClockOverlay {
    pub fn new(font: FontConfig) -> Self {
        let mut db = fontdb::Database::new();
        let family = font
            .font_path
            .as_deref()
            .and_then(|path| load_custom_font(&mut db, path))
            .unwrap_or_else(|| FALLBACK_FAMILY.to_string());
        db.load_system_fonts();
        debug!(faces = db.len(), family = %family, "[{}][CLOCK] Font database ready", DEBUG_NAME);

        Self::with_fontdb(font, family, Arc::new(db))
    }

    pub fn with_fontdb(font: FontConfig, family: impl Into<String>, fontdb: Arc<fontdb::Database>) -> Self {
        Self {
            font,
            family: family.into(),
            fontdb,
        }
    }

    fn svg_markup(&self, text: &str, width: u32, height: u32) -> String {
        let [r, g, b] = self.font.color.0;
        let (style, weight) = match self.font.style {
            FontStyle::Regular => ("normal", "normal"),
            FontStyle::Italic => ("italic", "normal"),
            FontStyle::Bold => ("normal", "bold"),
        };

        format!(
            r##"<svg xmlns="http://www.w3.org/2000/svg" width="{width}" height="{height}"><text x="0" y="0" font-family="{family}, {fallback}" font-size="{size}" font-style="{style}" font-weight="{weight}" fill="#{r:02x}{g:02x}{b:02x}">{text}</text></svg>"##,
            family = escape_xml(&self.family),
            fallback = FALLBACK_FAMILY,
            size = self.font.pixel_size(),
            text = escape_xml(text),
        )
    }

    fn options(&self) -> usvg::Options<'static> {
        usvg::Options {
            fontdb: Arc::clone(&self.fontdb),
            font_resolver: font_resolver(),
            ..Default::default()
        }
    }

    /// Returns a copy of `base` with `now` drawn on it. When no font can
    /// shape the text the copy is returned unchanged.
    pub fn render(&self, base: &RgbaImage, now: &DateTime<Local>) -> Result<RgbaImage, ImageError> {
        let text = format_time(now, &self.font.time_format)?;
        let (w, h) = base.dimensions();
        let mut out = base.clone();
        if w == 0 || h == 0 || text.trim().is_empty() {
            return Ok(out);
        }

        let markup = self.svg_markup(&text, w, h);
        let tree = usvg::Tree::from_str(&markup, &self.options())
            .map_err(|e| ImageError::Clock(e.to_string()))?;

        let bbox = tree.root().abs_bounding_box();
        if !tree.root().has_children() || bbox.width() <= 0.0 {
            warn!("[{}][CLOCK] No usable font for '{}', clock skipped", DEBUG_NAME, text);
            return Ok(out);
        }

        let text_size = (bbox.width().ceil() as i64, bbox.height().ceil() as i64);
        let (x, y) = anchor((w, h), text_size, &self.font.position);

        let mut pixmap = tiny_skia::Pixmap::new(w, h)
            .ok_or_else(|| ImageError::Clock(format!("cannot allocate {w}x{h} text layer")))?;
        // the anchor marks the bottom-left corner of the ink box
        let transform = tiny_skia::Transform::from_translate(x as f32 - bbox.left(), y as f32 - bbox.bottom());
        resvg::render(&tree, transform, &mut pixmap.as_mut());

        let layer = pixmap_to_image(&pixmap);
        let opacity = scaled_opacity(
            average_brightness(base),
            ADAPTIVE_MIN_BRIGHTNESS,
            ADAPTIVE_MAX_BRIGHTNESS,
            self.font.min_opacity,
            self.font.max_opacity,
        );
        overlay(&mut out, &layer, 0, 0, opacity);

        debug!(x, y, opacity, "[{}][CLOCK] Drew '{}'", DEBUG_NAME, text);
        Ok(out)
    }
}

fn load_custom_font(db: &mut fontdb::Database, path: &Path) -> Option<String> {
    let before = db.len();
    if let Err(e) = db.load_font_file(path) {
        warn!(error = %e, "[{}][CLOCK] Cannot read font {}, using system fonts", DEBUG_NAME, path.display());
        return None;
    }

    let family = db
        .faces()
        .skip(before)
        .find_map(|face| face.families.first().map(|(name, _)| name.clone()));
    if family.is_none() {
        warn!("[{}][CLOCK] {} holds no usable face", DEBUG_NAME, path.display());
    }
    family
}

fn pixmap_to_image(pixmap: &tiny_skia::Pixmap) -> RgbaImage {
    let mut img = RgbaImage::new(pixmap.width(), pixmap.height());
    for (dst, src) in img.pixels_mut().zip(pixmap.pixels()) {
        let c = src.demultiply();
        *dst = Rgba([c.red(), c.green(), c.blue(), c.alpha()]);
    }
    img
}

/// Named family first, then the generic families, then any face at all.
fn font_resolver() -> usvg::FontResolver<'static> {
    usvg::FontResolver {
        select_font: Box::new(|font, fontdb| {
            let mut families: Vec<fontdb::Family<'_>> = font
                .families()
                .iter()
                .map(|family| match family {
                    usvg::FontFamily::Serif => fontdb::Family::Serif,
                    usvg::FontFamily::SansSerif => fontdb::Family::SansSerif,
                    usvg::FontFamily::Cursive => fontdb::Family::Cursive,
                    usvg::FontFamily::Fantasy => fontdb::Family::Fantasy,
                    usvg::FontFamily::Monospace => fontdb::Family::Monospace,
                    usvg::FontFamily::Named(s) => fontdb::Family::Name(s),
                })
                .collect();
            families.push(fontdb::Family::SansSerif);
            families.push(fontdb::Family::Serif);

            let style = match font.style() {
                usvg::FontStyle::Normal => fontdb::Style::Normal,
                usvg::FontStyle::Italic => fontdb::Style::Italic,
                usvg::FontStyle::Oblique => fontdb::Style::Oblique,
            };

            let query = fontdb::Query {
                families: &families,
                weight: fontdb::Weight(font.weight()),
                stretch: fontdb::Stretch::Normal,
                style,
            };

            fontdb.query(&query).or_else(|| fontdb.faces().next().map(|f| f.id))
        }),
        select_fallback: usvg::FontResolver::default_fallback_selector(),
    }
}
