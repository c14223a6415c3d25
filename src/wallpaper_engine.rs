// ~/src/wallpaper_engine.rs

use std::{
    fs::{self, File},
    io::BufWriter,
    path::{Path, PathBuf},
    sync::{mpsc, Mutex, PoisonError},
    time::{Duration, Instant},
};

use chrono::{Local, Utc};
use image::{
    codecs::{
        jpeg::JpegEncoder,
        png::{CompressionType, FilterType, PngEncoder},
    },
    DynamicImage, ImageReader, RgbaImage,
};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::{
    data_loaders::config::{PipelineConfig, RuntimeConfig},
    desktop::DesktopBackground,
    error::{CycleError, ImageError},
    fetcher::Fetch,
    janitor::Janitor,
    paths::{CyclePaths, OUTPUT_EXT},
    postprocess::{clock::ClockOverlay, overlay, transform::TransformChain},
    sanitizer::sanitize_image,
    utility::{copy_file, file_exists},
    DEBUG_NAME,
};

/// Processed outputs kept per source; the newest ones survive every pass.
pub const RETAINED_OUTPUTS: usize = 2;
/// Headless history size; older archive entries are pruned first.
pub const ARCHIVED_OUTPUTS: usize = 60;
const BLEND_OPACITY: f64 = 0.5;
const JPEG_QUALITY: u8 = 100;

/// Published after every successful cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub fetch_source: bool,
    pub deep_clean: bool,
    pub update_count: u64,
    pub elapsed: Duration,
    pub output_path: PathBuf,
}

/// Owns the configuration and runs update cycles. All cycles are serialized
/// on one lock, which also guards the cumulative update counter.
pub struct WallpaperEngine {
    pipeline: PipelineConfig,
    runtime: RuntimeConfig,
    fetcher: Box<dyn Fetch>,
    desktop: Box<dyn DesktopBackground>,
    chain: TransformChain,
    clock: Option<ClockOverlay>,
    janitor: Janitor,
    cycle_lock: Mutex<u64>,
    subscribers: Mutex<Vec<mpsc::Sender<CycleReport>>>,
}

impl WallpaperEngine {
    pub fn new(
        pipeline: PipelineConfig,
        runtime: RuntimeConfig,
        fetcher: Box<dyn Fetch>,
        desktop: Box<dyn DesktopBackground>,
    ) -> Self {
        let chain = TransformChain::new(&pipeline, &runtime);
        let clock = runtime
            .clock_enabled
            .then(|| ClockOverlay::new(runtime.font.clone()));

        Self {
            pipeline,
            runtime,
            fetcher,
            desktop,
            chain,
            clock,
            janitor: Janitor::default(),
            cycle_lock: Mutex::new(0),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Replaces the clock renderer, e.g. with one backed by a fixed font set.
    pub fn with_clock(mut self, clock: Option<ClockOverlay>) -> Self {
        self.clock = clock;
        self
    }

    pub fn pipeline(&self) -> &PipelineConfig {
        &self.pipeline
    }

    pub fn runtime(&self) -> &RuntimeConfig {
        &self.runtime
    }

    pub fn update_count(&self) -> u64 {
        *self.cycle_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every later successful cycle is delivered to the returned receiver.
    /// Dropped receivers are pruned on the next delivery.
    pub fn subscribe(&self) -> mpsc::Receiver<CycleReport> {
        let (tx, rx) = mpsc::channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /* =========================
       CYCLE
       ========================= */

    pub fn run_cycle(&self, fetch_source: bool, deep_clean: bool) -> Result<CycleReport, CycleError> {
        debug!(fetch_source, deep_clean, "[{}][ENGINE] Updating wallpaper", DEBUG_NAME);

        if deep_clean && !fetch_source {
            error!("[{}][ENGINE] Deep clean requires source fetch", DEBUG_NAME);
            return Err(CycleError::InvalidRequest);
        }
        self.janitor.check_scope(&self.runtime.app_dir).inspect_err(|e| {
            error!(error = %e, "[{}][ENGINE] Application directory cannot be cleaned", DEBUG_NAME);
        })?;

        let mut update_count = self.cycle_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let started = Instant::now();

        let timestamp = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let paths = CyclePaths::new(&self.runtime.app_dir, &self.pipeline.input.url, timestamp);

        self.clean_up(&paths, deep_clean)?;
        prepare_dir(&paths.temp_dir)?;
        prepare_dir(&paths.output_dir)?;

        let candidate = if fetch_source {
            let candidate = self.fetch_and_process(&paths)?;
            save_png(&candidate, &paths.cache_image)?;
            candidate
        } else {
            load_cache(&paths.cache_image)?
        };

        let output = match &self.clock {
            Some(clock) => clock.render(&candidate, &Local::now())?,
            None => candidate,
        };
        save_png(&output, &paths.output_image)?;

        self.apply(&output, &paths)?;
        self.copy_to_save_path(&paths.output_image)?;

        *update_count += 1;
        let report = CycleReport {
            fetch_source,
            deep_clean,
            update_count: *update_count,
            elapsed: started.elapsed(),
            output_path: paths.output_image.clone(),
        };
        drop(update_count);

        info!(
            fetch_source,
            deep_clean,
            update_count = report.update_count,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "[{}][ENGINE] Wallpaper updated", DEBUG_NAME
        );
        self.publish(&report);
        Ok(report)
    }

    fn clean_up(&self, paths: &CyclePaths, deep_clean: bool) -> Result<(), CycleError> {
        if paths.output_dir.is_dir() {
            if deep_clean {
                self.janitor.wipe(&paths.output_dir)?;
            } else {
                let removed = self.janitor.retain(&paths.output_dir, OUTPUT_EXT, RETAINED_OUTPUTS)?;
                debug!(removed, "[{}][ENGINE] Retention pass done", DEBUG_NAME);
            }
        } else {
            debug!("[{}][ENGINE] {} does not exist, skipping cleanup", DEBUG_NAME, paths.output_dir.display());
        }

        if deep_clean && paths.temp_dir.is_dir() {
            self.janitor.wipe(&paths.temp_dir)?;
        }
        Ok(())
    }

    fn fetch_and_process(&self, paths: &CyclePaths) -> Result<RgbaImage, CycleError> {
        let url = &self.pipeline.input.url;
        debug!(url = %url, temp = %paths.temp_image.display(), "[{}][ENGINE] Fetching new image from source", DEBUG_NAME);

        self.fetcher.download(url, &paths.temp_image).inspect_err(|e| {
            warn!(error = %e, "[{}][ENGINE] Failed to download image", DEBUG_NAME);
        })?;
        sanitize_image(&paths.temp_image)?;

        let source = open_rgba(&paths.temp_image)?;
        let mut candidate = self.chain.run(&source)?;

        if self.pipeline.output.blend && file_exists(&paths.cache_image) {
            match open_rgba(&paths.cache_image) {
                Ok(previous) => {
                    overlay(&mut candidate, &previous, 0, 0, BLEND_OPACITY);
                    debug!("[{}][ENGINE] Blended with previous cache", DEBUG_NAME);
                }
                Err(e) => warn!(error = %e, "[{}][ENGINE] Failed to load previous processed image", DEBUG_NAME),
            }
        }

        Ok(candidate)
    }

    fn apply(&self, output: &RgbaImage, paths: &CyclePaths) -> Result<(), CycleError> {
        if !self.runtime.headless {
            debug!(path = %paths.output_image.display(), "[{}][ENGINE] Setting desktop background", DEBUG_NAME);
            self.desktop.set_desktop_background(&paths.output_image)?;
            return Ok(());
        }

        copy_atomically(&paths.output_image, &paths.latest_png)?;
        save_jpeg(output, &paths.latest_jpg)?;

        prepare_dir(&paths.archive_dir)?;
        let pruned = self.janitor.retain(&paths.archive_dir, ".jpg", ARCHIVED_OUTPUTS - 1)?;
        if pruned > 0 {
            debug!(pruned, "[{}][ENGINE] Pruned archive", DEBUG_NAME);
        }
        copy_atomically(&paths.latest_jpg, &paths.archive_jpg)?;

        debug!(latest = %paths.latest_png.display(), "[{}][ENGINE] Published headless outputs", DEBUG_NAME);
        Ok(())
    }

    fn copy_to_save_path(&self, output: &Path) -> Result<(), CycleError> {
        let Some(target) = self.pipeline.output.save_path.as_deref() else {
            return Ok(());
        };

        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            prepare_dir(parent)?;
        }
        copy_atomically(output, target)?;
        debug!(target = %target.display(), "[{}][ENGINE] Copied output to save path", DEBUG_NAME);
        Ok(())
    }

    fn publish(&self, report: &CycleReport) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| tx.send(report.clone()).is_ok());
    }
}

/* =========================
   FILE HELPERS
   ========================= */

fn prepare_dir(dir: &Path) -> Result<(), CycleError> {
    fs::create_dir_all(dir).map_err(|source| CycleError::Prepare {
        path: dir.to_path_buf(),
        source,
    })
}

fn load_cache(path: &Path) -> Result<RgbaImage, CycleError> {
    if !file_exists(path) {
        warn!("[{}][ENGINE] No processed cache yet at {}", DEBUG_NAME, path.display());
        return Err(CycleError::MissingCache(path.to_path_buf()));
    }
    Ok(open_rgba(path)?)
}

/// Decodes by content; the raw download has no extension to go by.
fn open_rgba(path: &Path) -> Result<RgbaImage, ImageError> {
    let reader = ImageReader::open(path)
        .and_then(|reader| reader.with_guessed_format())
        .map_err(|source| ImageError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    reader.decode().map(|img| img.to_rgba8()).map_err(|source| ImageError::Open {
        path: path.to_path_buf(),
        source,
    })
}

fn part_path(path: &Path) -> PathBuf {
    let mut part = path.as_os_str().to_owned();
    part.push(".part");
    PathBuf::from(part)
}

fn copy_atomically(src: &Path, dst: &Path) -> Result<(), ImageError> {
    let part = part_path(dst);
    let copied = copy_file(src, &part).and_then(|_| fs::rename(&part, dst));
    if let Err(source) = copied {
        let _ = fs::remove_file(&part);
        return Err(ImageError::Io {
            path: dst.to_path_buf(),
            source,
        });
    }
    Ok(())
}

/// Writes next to `path` and renames into place, so readers never see a
/// half-written file.
fn write_atomically(
    path: &Path,
    encode: impl FnOnce(&mut BufWriter<File>) -> Result<(), image::ImageError>,
) -> Result<(), ImageError> {
    let part = part_path(path);

    let io_err = |p: &Path, source| ImageError::Io {
        path: p.to_path_buf(),
        source,
    };

    let file = File::create(&part).map_err(|e| io_err(&part, e))?;
    let mut writer = BufWriter::new(file);
    let written = encode(&mut writer).map_err(|source| ImageError::Save {
        path: path.to_path_buf(),
        source,
    });
    let synced = written.and_then(|_| {
        let file = writer.into_inner().map_err(|e| io_err(&part, e.into_error()))?;
        file.sync_all().map_err(|e| io_err(&part, e))
    });

    if let Err(e) = synced {
        let _ = fs::remove_file(&part);
        return Err(e);
    }
    fs::rename(&part, path).map_err(|e| io_err(path, e))
}

/// PNG at the fastest compression level.
pub fn save_png(img: &RgbaImage, path: &Path) -> Result<(), ImageError> {
    write_atomically(path, |w| {
        img.write_with_encoder(PngEncoder::new_with_quality(w, CompressionType::Fast, FilterType::Adaptive))
    })
}

pub fn save_jpeg(img: &RgbaImage, path: &Path) -> Result<(), ImageError> {
    let rgb = DynamicImage::ImageRgba8(img.clone()).to_rgb8();
    write_atomically(path, |w| rgb.write_with_encoder(JpegEncoder::new_with_quality(w, JPEG_QUALITY)))
}
