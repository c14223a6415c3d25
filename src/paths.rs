// ~/src/paths.rs

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::{utility::short_hash, APP_DIR_NAME, DEBUG_NAME};

pub const REPOS_DIR: &str = "repos";
pub const FILES_DIR: &str = "files";
pub const LOG_DIR: &str = "log";
pub const TEMP_DIR: &str = ".tmp";
pub const PROC_DIR: &str = "proc";
pub const ARCHIVE_DIR: &str = "archive";
pub const OUTPUT_EXT: &str = ".png";

pub fn user_home_dir() -> Option<PathBuf> {
    let vars: &[&str] = if cfg!(windows) {
        &["USERPROFILE", "HOME"]
    } else {
        &["HOME", "USERPROFILE"]
    };

    for var in vars {
        if let Some(home) = std::env::var_os(var).filter(|v| !v.is_empty()) {
            return Some(PathBuf::from(home));
        }
    }

    // Fallback for older Windows setups
    let drive = std::env::var("HOMEDRIVE").ok();
    let path = std::env::var("HOMEPATH").ok();
    match (drive, path) {
        (Some(d), Some(p)) => {
            let full = PathBuf::from(format!("{}{}", d, p));
            info!("[{}] Resolved home directory from HOMEDRIVE/HOMEPATH: {}", DEBUG_NAME, full.display());
            Some(full)
        }
        _ => None,
    }
}

/// The application root is `~/.alpenglow_wallpaper/`. An override is used
/// as the parent of `.alpenglow_wallpaper/` unless it already names it, since
/// cleanup refuses to touch anything outside that directory.
pub fn app_dir(override_dir: Option<&Path>) -> PathBuf {
    if let Some(dir) = override_dir {
        if is_app_scoped(dir) {
            return dir.to_path_buf();
        }
        let scoped = dir.join(APP_DIR_NAME);
        info!("[{}] Using {} below the requested directory", DEBUG_NAME, scoped.display());
        return scoped;
    }

    if let Some(home) = user_home_dir() {
        return home.join(APP_DIR_NAME);
    }

    warn!("[{}] Could not resolve home directory, falling back to working directory", DEBUG_NAME);
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

/// Whether `path` lies inside an application-private directory.
pub fn is_app_scoped(path: &Path) -> bool {
    path.components().any(|c| c.as_os_str() == APP_DIR_NAME)
}

pub fn repos_dir(app_dir: &Path) -> PathBuf {
    app_dir.join(REPOS_DIR)
}

pub fn log_dir(app_dir: &Path) -> PathBuf {
    app_dir.join(LOG_DIR)
}

/* =========================
   PER-CYCLE LAYOUT
   ========================= */

/// Every file one update cycle touches, derived from the source URL and the
/// cycle timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CyclePaths {
    /// `files/<urlHash>`
    pub wallpaper_dir: PathBuf,
    /// `files/<urlHash>/.tmp`
    pub temp_dir: PathBuf,
    /// Raw download, sanitized in place.
    pub temp_image: PathBuf,
    /// Processed cache without the clock. One per source URL.
    pub cache_image: PathBuf,
    /// `files/<urlHash>/proc`
    pub output_dir: PathBuf,
    /// `proc/<hash(url + timestamp)>.png`
    pub output_image: PathBuf,
    pub latest_png: PathBuf,
    pub latest_jpg: PathBuf,
    pub archive_dir: PathBuf,
    /// `archive/<cycleHash>.jpg`
    pub archive_jpg: PathBuf,
}

impl CyclePaths {
    pub fn new(app_dir: &Path, url: &str, timestamp_nanos: i64) -> Self {
        let url_hash = short_hash(url, "");
        let cycle_hash = short_hash(url, &timestamp_nanos.to_string());

        let wallpaper_dir = app_dir.join(FILES_DIR).join(url_hash);
        let temp_dir = wallpaper_dir.join(TEMP_DIR);
        let output_dir = wallpaper_dir.join(PROC_DIR);

        Self {
            temp_image: temp_dir.join("image"),
            cache_image: temp_dir.join(format!("cache{OUTPUT_EXT}")),
            output_image: output_dir.join(format!("{cycle_hash}{OUTPUT_EXT}")),
            latest_png: app_dir.join(format!("latest{OUTPUT_EXT}")),
            latest_jpg: app_dir.join("latest.jpg"),
            archive_jpg: app_dir.join(ARCHIVE_DIR).join(format!("{cycle_hash}.jpg")),
            archive_dir: app_dir.join(ARCHIVE_DIR),
            wallpaper_dir,
            temp_dir,
            output_dir,
        }
    }
}
