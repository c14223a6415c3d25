// ~/src/data_loaders/config.rs

use std::{
    path::{Path, PathBuf},
    str::FromStr,
};

use image::Rgb;
use serde_yaml::{Mapping, Value};

use super::yaml::{bool_at, f64_any, f64_at, i64_at, load_yaml, mapping_at, str_at};
use crate::error::ConfigError;

pub const WATERMARK_FILE_NAME: &str = "watermark.png";

/* =========================
   PIPELINE (YAML PROFILE)
   ========================= */

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub input: InputSettings,
    pub image_processing: ImageProcessingSettings,
    pub scheduling: SchedulingSettings,
    pub output: OutputSettings,
    /// Directory of the profile file; the optional watermark lives next to it.
    pub profile_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct InputSettings {
    pub url: String,
    pub crop_factor: f64,
    pub offset_x: f64,
    pub offset_y: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageProcessingSettings {
    pub contrast: f64,
    pub saturation: f64,
    pub brightness: f64,
    pub hue: f64,
    pub gamma: f64,
    pub black_point: f64,
    pub white_point: f64,
    pub shadow_strength: f64,
    pub blur_strength: f64,
    pub sharpen_strength: f64,
    pub max_noise_opacity: f64,
    pub noise_scale: u32,
}

#[derive(Debug, Clone)]
pub struct SchedulingSettings {
    /// Kept verbatim; the scheduler rejects values below one minute.
    pub update_interval_minutes: i64,
}

#[derive(Debug, Clone, Default)]
pub struct OutputSettings {
    pub blend: bool,
    pub save_path: Option<PathBuf>,
}

impl Default for ImageProcessingSettings {
    fn default() -> Self {
        Self {
            contrast: 1.0,
            saturation: 1.0,
            brightness: 0.0,
            hue: 0.0,
            gamma: 1.0,
            black_point: 0.0,
            white_point: 1.0,
            shadow_strength: 1.0,
            blur_strength: 0.0,
            sharpen_strength: 0.0,
            max_noise_opacity: 0.0,
            noise_scale: 1,
        }
    }
}

impl Default for SchedulingSettings {
    fn default() -> Self {
        Self {
            update_interval_minutes: 10,
        }
    }
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let value = load_yaml(path)?;
        let mut config = Self::from_yaml(&value)?;
        config.profile_dir = path.parent().map(Path::to_path_buf);
        Ok(config)
    }

    pub fn from_yaml(root: &Value) -> Result<Self, ConfigError> {
        let map = root.as_mapping().ok_or(ConfigError::NotAMapping)?;

        let input_map = mapping_at(map, "input").ok_or(ConfigError::MissingKey("input.url"))?;
        let url = str_at(input_map, "url")
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or(ConfigError::MissingKey("input.url"))?
            .to_string();

        let crop_factor = f64_at(input_map, "crop_factor")
            .filter(|f| *f > 0.0)
            .unwrap_or(1.0);

        let input = InputSettings {
            url,
            crop_factor,
            offset_x: f64_at(input_map, "offset_x").unwrap_or(0.0),
            offset_y: f64_at(input_map, "offset_y").unwrap_or(0.0),
        };

        let image_processing = mapping_at(map, "image_processing")
            .map(parse_image_processing)
            .unwrap_or_default();

        let mut scheduling = SchedulingSettings::default();
        if let Some(sched) = mapping_at(map, "scheduling") {
            scheduling.update_interval_minutes = i64_at(sched, "update_interval_minutes")
                .unwrap_or(scheduling.update_interval_minutes);
        }

        let mut output = OutputSettings::default();
        if let Some(out) = mapping_at(map, "output") {
            output.blend = bool_at(out, "blend").unwrap_or(false);
            output.save_path = str_at(out, "save_path")
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(PathBuf::from);
        }

        Ok(Self {
            input,
            image_processing,
            scheduling,
            output,
            profile_dir: None,
        })
    }

    pub fn watermark_path(&self) -> Option<PathBuf> {
        self.profile_dir
            .as_ref()
            .map(|dir| dir.join(WATERMARK_FILE_NAME))
    }
}

fn parse_image_processing(map: &Mapping) -> ImageProcessingSettings {
    let d = ImageProcessingSettings::default();

    ImageProcessingSettings {
        contrast: f64_at(map, "contrast").unwrap_or(d.contrast),
        saturation: f64_at(map, "saturation").unwrap_or(d.saturation),
        brightness: f64_at(map, "brightness").unwrap_or(d.brightness),
        hue: f64_at(map, "hue").unwrap_or(d.hue),
        gamma: f64_at(map, "gamma").unwrap_or(d.gamma),
        black_point: f64_at(map, "black_point").unwrap_or(d.black_point),
        white_point: f64_at(map, "white_point").unwrap_or(d.white_point),
        shadow_strength: f64_at(map, "shadow_strength").unwrap_or(d.shadow_strength),
        blur_strength: f64_at(map, "blur_strength").unwrap_or(d.blur_strength).max(0.0),
        sharpen_strength: f64_at(map, "sharpen_strength")
            .unwrap_or(d.sharpen_strength)
            .max(0.0),
        max_noise_opacity: f64_any(map, &["max_noise_opacity", "noise_opacity"])
            .unwrap_or(d.max_noise_opacity)
            .clamp(0.0, 1.0),
        noise_scale: i64_at(map, "noise_scale")
            .map(|v| v.max(1) as u32)
            .unwrap_or(d.noise_scale),
    }
}

/* =========================
   RUNTIME (COMMAND LINE)
   ========================= */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Default for Dimensions {
    fn default() -> Self {
        Self {
            width: 3840,
            height: 2160,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Application-private root (`files/`, `latest.png`, `archive/` live here).
    pub app_dir: PathBuf,
    pub target: Dimensions,
    pub clock_enabled: bool,
    /// Skip the desktop call and publish `latest.png`/`latest.jpg` instead.
    pub headless: bool,
    pub font: FontConfig,
}

impl RuntimeConfig {
    pub fn new(app_dir: impl Into<PathBuf>) -> Self {
        Self {
            app_dir: app_dir.into(),
            target: Dimensions::default(),
            clock_enabled: true,
            headless: false,
            font: FontConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HorizontalAlignment {
    Left,
    #[default]
    Center,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerticalAlignment {
    Top,
    #[default]
    Middle,
    Bottom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FontStyle {
    #[default]
    Regular,
    Italic,
    Bold,
}

impl FromStr for HorizontalAlignment {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "left" | "start" => Ok(Self::Left),
            "center" | "centre" => Ok(Self::Center),
            "right" | "end" => Ok(Self::Right),
            other => Err(ConfigError::invalid(
                "clock_halign",
                format!("expected left, center or right, got '{other}'"),
            )),
        }
    }
}

impl FromStr for VerticalAlignment {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "top" => Ok(Self::Top),
            "middle" | "center" | "centre" => Ok(Self::Middle),
            "bottom" => Ok(Self::Bottom),
            other => Err(ConfigError::invalid(
                "clock_valign",
                format!("expected top, middle or bottom, got '{other}'"),
            )),
        }
    }
}

impl FromStr for FontStyle {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "regular" | "normal" => Ok(Self::Regular),
            "italic" => Ok(Self::Italic),
            "bold" => Ok(Self::Bold),
            other => Err(ConfigError::invalid(
                "clock_font_style",
                format!("expected regular, italic or bold, got '{other}'"),
            )),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FontPosition {
    pub horizontal: HorizontalAlignment,
    pub vertical: VerticalAlignment,
    pub padding_top: i32,
    pub padding_bottom: i32,
    pub padding_left: i32,
    pub padding_right: i32,
    pub horizontal_offset: i32,
    pub vertical_offset: i32,
}

#[derive(Debug, Clone)]
pub struct FontConfig {
    /// Font file to prefer; system fonts are used when unset or unreadable.
    pub font_path: Option<PathBuf>,
    pub size: f64,
    pub dpi: f64,
    pub color: Rgb<u8>,
    pub style: FontStyle,
    pub min_opacity: f64,
    pub max_opacity: f64,
    /// chrono `strftime` pattern.
    pub time_format: String,
    pub position: FontPosition,
}

impl Default for FontConfig {
    fn default() -> Self {
        Self {
            font_path: None,
            size: 112.0,
            dpi: 144.0,
            color: Rgb([0xFF, 0xFF, 0xFF]),
            style: FontStyle::Regular,
            min_opacity: 0.2,
            max_opacity: 0.92,
            time_format: "%H:%M".to_string(),
            position: FontPosition::default(),
        }
    }
}

impl FontConfig {
    /// Pixel size of the glyph em box at the configured DPI.
    pub fn pixel_size(&self) -> f64 {
        self.size * self.dpi / 72.0
    }
}
