// ~/src/lib.rs

pub mod bootstrap;
pub mod data_loaders;
pub mod desktop;
pub mod error;
pub mod extractor;
pub mod fetcher;
pub mod janitor;
pub mod logging;
pub mod paths;
pub mod postprocess;
pub mod retry;
pub mod sanitizer;
pub mod scheduler;
pub mod utility;
pub mod wallpaper_engine;

pub const APP_NAME: &str = "alpenglow-wallpaper";
pub const DEBUG_NAME: &str = "ALPENGLOW";

/// Name of the application-private directory. Destructive cleanup refuses
/// any path that does not contain it.
pub const APP_DIR_NAME: &str = ".alpenglow_wallpaper";

pub use data_loaders::config::{PipelineConfig, RuntimeConfig};
pub use wallpaper_engine::{CycleReport, WallpaperEngine};
