// ~/src/main.rs

use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use clap::Parser;
use tracing::{error, info};

use alpenglow_wallpaper::{
    bootstrap::{self, DEFAULT_PROFILE_NAME, DEFAULT_PROFILE_TYPE, DEFAULT_REPOSITORY},
    data_loaders::config::{
        Dimensions, FontConfig, FontPosition, FontStyle, HorizontalAlignment, VerticalAlignment,
    },
    desktop::{self, DesktopBackground, NoopDesktop},
    fetcher::ResilientFetcher,
    logging::{self, LogSettings},
    paths,
    retry::RetryPolicy,
    scheduler::Scheduler,
    utility::parse_hex_color,
    PipelineConfig, RuntimeConfig, WallpaperEngine, APP_NAME, DEBUG_NAME,
};

#[derive(Parser, Debug)]
#[command(name = "alpenglow", version, about = "Graded photo wallpapers with a live clock")]
struct Cli {
    /// Profile name inside the configuration repository.
    #[arg(short = 'n', long, default_value = DEFAULT_PROFILE_NAME)]
    name: String,

    /// Profile variant (`<type>.yaml`).
    #[arg(short = 't', long = "type", default_value = DEFAULT_PROFILE_TYPE)]
    profile_type: String,

    /// Use this profile file and skip the repository download.
    #[arg(long)]
    config_path: Option<PathBuf>,

    /// Zip archive of the configuration repository.
    #[arg(long, default_value = DEFAULT_REPOSITORY)]
    config_repository: String,

    /// Directory to hold `.alpenglow_wallpaper/` (defaults to the home directory).
    #[arg(long)]
    app_dir: Option<PathBuf>,

    #[arg(long, default_value_t = 3840)]
    wallpaper_width: u32,

    #[arg(long, default_value_t = 2160)]
    wallpaper_height: u32,

    #[arg(long)]
    clock_disable: bool,

    /// strftime pattern.
    #[arg(long, default_value = "%H:%M")]
    clock_time_format: String,

    #[arg(long)]
    clock_font_path: Option<PathBuf>,

    #[arg(long, default_value_t = 112.0)]
    clock_font_size: f64,

    #[arg(long, default_value_t = 144.0)]
    clock_font_dpi: f64,

    #[arg(long, default_value = "regular")]
    clock_font_style: FontStyle,

    #[arg(long, default_value_t = 0.2)]
    clock_font_opacity_min: f64,

    #[arg(long, default_value_t = 0.92)]
    clock_font_opacity_max: f64,

    #[arg(long, default_value = "#FFFFFF")]
    clock_font_color: String,

    #[arg(long, default_value = "center")]
    clock_halign: HorizontalAlignment,

    #[arg(long, default_value = "middle")]
    clock_valign: VerticalAlignment,

    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    clock_horizontal_offset: i32,

    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    clock_vertical_offset: i32,

    #[arg(long, default_value_t = 0)]
    clock_padding_top: i32,

    #[arg(long, default_value_t = 0)]
    clock_padding_bottom: i32,

    #[arg(long, default_value_t = 0)]
    clock_padding_left: i32,

    #[arg(long, default_value_t = 0)]
    clock_padding_right: i32,

    /// Download the configuration repository and exit.
    #[arg(long)]
    prepare: bool,

    /// Do not touch the desktop; publish latest.png/latest.jpg instead.
    #[arg(long)]
    runtime_headless: bool,

    /// 0 = warn, 1 = info, 2 = debug, 3 = trace.
    #[arg(long, default_value_t = 1)]
    loglevel: u8,
}

impl Cli {
    fn runtime_config(&self, app_dir: PathBuf) -> anyhow::Result<RuntimeConfig> {
        let color = parse_hex_color(&self.clock_font_color).context("invalid font color")?;

        let mut runtime = RuntimeConfig::new(app_dir);
        runtime.target = Dimensions {
            width: self.wallpaper_width,
            height: self.wallpaper_height,
        };
        runtime.clock_enabled = !self.clock_disable;
        runtime.headless = self.runtime_headless;
        runtime.font = FontConfig {
            font_path: self.clock_font_path.clone(),
            size: self.clock_font_size,
            dpi: self.clock_font_dpi,
            color,
            style: self.clock_font_style,
            min_opacity: self.clock_font_opacity_min,
            max_opacity: self.clock_font_opacity_max,
            time_format: self.clock_time_format.clone(),
            position: FontPosition {
                horizontal: self.clock_halign,
                vertical: self.clock_valign,
                padding_top: self.clock_padding_top,
                padding_bottom: self.clock_padding_bottom,
                padding_left: self.clock_padding_left,
                padding_right: self.clock_padding_right,
                horizontal_offset: self.clock_horizontal_offset,
                vertical_offset: self.clock_vertical_offset,
            },
        };

        if runtime.target.width == 0 || runtime.target.height == 0 {
            anyhow::bail!("wallpaper dimensions must be non-zero");
        }
        Ok(runtime)
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let app_dir = paths::app_dir(cli.app_dir.as_deref());

    let _log = logging::init(LogSettings {
        app_dir: app_dir.clone(),
        verbosity: cli.loglevel,
        console: true,
    })
    .context("initialize logging")?;

    std::panic::set_hook(Box::new(|panic_info| {
        error!("[{}] Panic: {}", DEBUG_NAME, panic_info);
    }));

    info!("!---------- [{}] Starting {} {} ----------!", DEBUG_NAME, APP_NAME, env!("CARGO_PKG_VERSION"));
    info!("[{}] Application directory: {}", DEBUG_NAME, app_dir.display());

    let fetcher = ResilientFetcher::new(RetryPolicy::default()).context("create http client")?;

    let config_path = match &cli.config_path {
        Some(path) => {
            bootstrap::prepare_app_dirs(&app_dir)?;
            path.clone()
        }
        None => bootstrap::prepare(&app_dir, &fetcher, &cli.config_repository, &cli.name, &cli.profile_type)
            .context("failed to load configuration")?,
    };

    if cli.prepare {
        info!("[{}] Prepare only complete. Exiting.", DEBUG_NAME);
        return Ok(());
    }

    let pipeline = PipelineConfig::load(&config_path)
        .with_context(|| format!("load profile '{}'", config_path.display()))?;
    info!("[{}] Config loaded from {}", DEBUG_NAME, config_path.display());

    let runtime = cli.runtime_config(app_dir)?;
    let desktop: Box<dyn DesktopBackground> = if runtime.headless {
        Box::new(NoopDesktop)
    } else {
        desktop::platform_default()
    };

    let engine = Arc::new(WallpaperEngine::new(pipeline, runtime, Box::new(fetcher), desktop));
    let handle = Scheduler::new(engine).start().context("start updater")?;
    handle.join();

    Ok(())
}
