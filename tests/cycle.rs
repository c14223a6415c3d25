// ~/tests/cycle.rs

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    thread,
    time::Duration,
};

use alpenglow_wallpaper::{
    data_loaders::config::{Dimensions, FontConfig},
    desktop::DesktopBackground,
    error::{CycleError, DesktopError, FetchError, JanitorError, ScheduleError},
    fetcher::Fetch,
    paths::{FILES_DIR, PROC_DIR},
    postprocess::clock::ClockOverlay,
    scheduler::Scheduler,
    PipelineConfig, RuntimeConfig, WallpaperEngine, APP_DIR_NAME,
};
use image::{ImageFormat, Rgb, RgbImage};

const SOURCE_URL: &str = "https://images.example.com/peak.png";

/* =========================
   STUBS
   ========================= */

#[derive(Default)]
struct StubFetch {
    color: Mutex<[u8; 3]>,
    fail_next: AtomicBool,
    calls: AtomicUsize,
}

impl StubFetch {
    fn set_color(&self, color: [u8; 3]) {
        *self.color.lock().unwrap() = color;
    }
}

struct SharedFetch(Arc<StubFetch>);

impl Fetch for SharedFetch {
    fn download(&self, url: &str, dest: &Path) -> Result<u64, FetchError> {
        self.0.calls.fetch_add(1, Ordering::SeqCst);
        if self.0.fail_next.swap(false, Ordering::SeqCst) {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: 503,
            });
        }

        let color = *self.0.color.lock().unwrap();
        RgbImage::from_pixel(128, 72, Rgb(color))
            .save_with_format(dest, ImageFormat::Png)
            .map_err(|e| FetchError::Request {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        Ok(fs::metadata(dest).map(|m| m.len()).unwrap_or(0))
    }

    fn fetch_bytes(&self, url: &str, _limit: u64) -> Result<Vec<u8>, FetchError> {
        Err(FetchError::Status {
            url: url.to_string(),
            status: 404,
        })
    }
}

#[derive(Default)]
struct RecordingDesktop {
    applied: Mutex<Vec<PathBuf>>,
    undecodable: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    hold: Duration,
}

struct SharedDesktop(Arc<RecordingDesktop>);

impl DesktopBackground for SharedDesktop {
    fn set_desktop_background(&self, path: &Path) -> Result<(), DesktopError> {
        let d = &self.0;
        let now = d.active.fetch_add(1, Ordering::SeqCst) + 1;
        d.max_active.fetch_max(now, Ordering::SeqCst);

        if image::open(path).is_err() {
            d.undecodable.fetch_add(1, Ordering::SeqCst);
        }
        thread::sleep(d.hold);
        d.applied.lock().unwrap().push(path.to_path_buf());

        d.active.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Fixture {
    _tmp: tempfile::TempDir,
    app: PathBuf,
    fetch: Arc<StubFetch>,
    desktop: Arc<RecordingDesktop>,
}

impl Fixture {
    fn new() -> Self {
        Self::with_hold(Duration::ZERO)
    }

    fn with_hold(hold: Duration) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let app = tmp.path().join(APP_DIR_NAME);
        Self {
            _tmp: tmp,
            app,
            fetch: Arc::new(StubFetch::default()),
            desktop: Arc::new(RecordingDesktop {
                hold,
                ..RecordingDesktop::default()
            }),
        }
    }

    fn pipeline(&self, extra: &str) -> PipelineConfig {
        let yaml = format!("input:\n  url: {SOURCE_URL}\n{extra}");
        let value: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();
        PipelineConfig::from_yaml(&value).unwrap()
    }

    fn runtime(&self) -> RuntimeConfig {
        let mut runtime = RuntimeConfig::new(&self.app);
        runtime.target = Dimensions { width: 64, height: 36 };
        runtime.clock_enabled = false;
        runtime
    }

    fn engine_with(&self, pipeline: PipelineConfig, runtime: RuntimeConfig) -> WallpaperEngine {
        WallpaperEngine::new(
            pipeline,
            runtime,
            Box::new(SharedFetch(Arc::clone(&self.fetch))),
            Box::new(SharedDesktop(Arc::clone(&self.desktop))),
        )
    }

    fn engine(&self) -> WallpaperEngine {
        self.engine_with(self.pipeline(""), self.runtime())
    }

    fn proc_pngs(&self) -> Vec<PathBuf> {
        let files = self.app.join(FILES_DIR);
        let mut out = Vec::new();
        for url_dir in fs::read_dir(files).unwrap() {
            let proc = url_dir.unwrap().path().join(PROC_DIR);
            for entry in fs::read_dir(proc).unwrap() {
                let path = entry.unwrap().path();
                if path.extension().is_some_and(|e| e == "png") {
                    out.push(path);
                }
            }
        }
        out
    }
}

/// A clock renderer with no fonts: draws nothing, but still runs every step.
fn fontless_clock() -> ClockOverlay {
    ClockOverlay::with_fontdb(Default::default(), "sans-serif", Arc::new(usvg::fontdb::Database::new()))
}

/// A small, fully opaque clock drawn with the bundled DejaVu Sans.
fn dejavu_clock() -> ClockOverlay {
    let mut db = usvg::fontdb::Database::new();
    db.load_font_file(Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/DejaVuSans.ttf"))
        .unwrap();
    let font = FontConfig {
        size: 12.0,
        dpi: 72.0,
        min_opacity: 1.0,
        max_opacity: 1.0,
        ..FontConfig::default()
    };
    ClockOverlay::with_fontdb(font, "DejaVu Sans", Arc::new(db))
}

/* =========================
   CYCLES
   ========================= */

#[test]
fn full_cycle_persists_cache_and_output_and_applies_it() -> anyhow::Result<()> {
    let fx = Fixture::new();
    let engine = fx.engine();

    let report = engine.run_cycle(true, true)?;

    assert!(report.fetch_source);
    assert!(report.deep_clean);
    assert_eq!(report.update_count, 1);
    assert!(report.output_path.starts_with(fx.app.join(FILES_DIR)));

    let output = image::open(&report.output_path)?;
    assert_eq!((output.width(), output.height()), (64, 36));

    let cache = report.output_path.parent().unwrap().parent().unwrap().join(".tmp").join("cache.png");
    assert!(cache.is_file());

    assert_eq!(*fx.desktop.applied.lock().unwrap(), vec![report.output_path.clone()]);
    assert_eq!(fx.fetch.calls.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn clock_only_cycle_needs_a_cache() -> anyhow::Result<()> {
    let fx = Fixture::new();
    let engine = fx.engine_with(fx.pipeline(""), fx.runtime()).with_clock(Some(fontless_clock()));

    let err = engine.run_cycle(false, false).unwrap_err();
    assert!(matches!(err, CycleError::MissingCache(_)));
    assert!(!err.is_fatal());

    engine.run_cycle(true, false)?;
    let report = engine.run_cycle(false, false)?;

    assert!(!report.fetch_source);
    assert_eq!(report.update_count, 2);
    assert_eq!(fx.fetch.calls.load(Ordering::SeqCst), 1);
    assert!(image::open(&report.output_path).is_ok());
    Ok(())
}

#[test]
fn cache_never_carries_the_clock() -> anyhow::Result<()> {
    let fx = Fixture::new();
    fx.fetch.set_color([60, 60, 60]);
    let engine = fx.engine_with(fx.pipeline(""), fx.runtime()).with_clock(Some(dejavu_clock()));

    let full = engine.run_cycle(true, true)?;
    let cache = full.output_path.parent().unwrap().parent().unwrap().join(".tmp").join("cache.png");
    let cached_bytes = fs::read(&cache)?;
    let cached = image::open(&cache)?.to_rgba8();

    assert_ne!(image::open(&full.output_path)?.to_rgba8(), cached, "clock missing from output");

    let clock_only = engine.run_cycle(false, false)?;
    assert_eq!(fs::read(&cache)?, cached_bytes);
    assert_ne!(image::open(&clock_only.output_path)?.to_rgba8(), cached);
    Ok(())
}

#[test]
fn app_dir_outside_private_directory_is_rejected_up_front() {
    let fx = Fixture::new();
    let mut runtime = fx.runtime();
    runtime.app_dir = fx.app.parent().unwrap().join("wall");
    let engine = fx.engine_with(fx.pipeline(""), runtime);

    for (fetch, deep) in [(true, true), (true, false), (false, false)] {
        let err = engine.run_cycle(fetch, deep).unwrap_err();
        assert!(matches!(err, CycleError::Janitor(JanitorError::OutsideAppDir { .. })));
        assert!(err.is_fatal());
    }
    assert!(!fx.app.parent().unwrap().join("wall").exists());
    assert_eq!(fx.fetch.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn deep_clean_without_fetch_touches_nothing() {
    let fx = Fixture::new();
    let engine = fx.engine();

    let err = engine.run_cycle(false, true).unwrap_err();
    assert!(matches!(err, CycleError::InvalidRequest));
    assert!(err.is_fatal());
    assert!(!fx.app.exists());
    assert_eq!(engine.update_count(), 0);
    assert!(fx.desktop.applied.lock().unwrap().is_empty());
}

#[test]
fn failed_fetch_aborts_only_that_cycle() -> anyhow::Result<()> {
    let fx = Fixture::new();
    let engine = fx.engine();

    fx.fetch.fail_next.store(true, Ordering::SeqCst);
    let err = engine.run_cycle(true, false).unwrap_err();
    assert!(matches!(err, CycleError::Fetch(FetchError::Status { status: 503, .. })));
    assert!(fx.desktop.applied.lock().unwrap().is_empty());

    let report = engine.run_cycle(true, false)?;
    assert_eq!(report.update_count, 1);
    Ok(())
}

#[test]
fn retention_keeps_two_previous_outputs() -> anyhow::Result<()> {
    let fx = Fixture::new();
    let engine = fx.engine();

    let mut last = None;
    for _ in 0..5 {
        last = Some(engine.run_cycle(true, false)?);
        thread::sleep(Duration::from_millis(15));
    }

    let remaining = fx.proc_pngs();
    assert_eq!(remaining.len(), 3);
    let last = last.unwrap();
    assert!(remaining.contains(&last.output_path));

    // a deep clean starts from an empty output directory
    let fresh = engine.run_cycle(true, true)?;
    assert_eq!(fx.proc_pngs(), vec![fresh.output_path]);
    Ok(())
}

#[test]
fn blend_mixes_with_previous_cache() -> anyhow::Result<()> {
    let fx = Fixture::new();
    let engine = fx.engine_with(fx.pipeline("output:\n  blend: true\n"), fx.runtime());

    fx.fetch.set_color([0, 0, 0]);
    engine.run_cycle(true, true)?;

    fx.fetch.set_color([255, 255, 255]);
    let report = engine.run_cycle(true, false)?;

    let px = image::open(&report.output_path)?.to_rgba8().get_pixel(32, 18).0;
    for channel in &px[..3] {
        assert!((127..=128).contains(channel), "unexpected blend result {px:?}");
    }
    assert_eq!(px[3], 255);
    Ok(())
}

#[test]
fn headless_publishes_latest_files_and_archive() -> anyhow::Result<()> {
    let fx = Fixture::new();
    let mut runtime = fx.runtime();
    runtime.headless = true;
    let engine = fx.engine_with(fx.pipeline(""), runtime);

    engine.run_cycle(true, true)?;

    let latest_png = image::open(fx.app.join("latest.png"))?;
    assert_eq!(latest_png.width(), 64);
    let latest_jpg = image::open(fx.app.join("latest.jpg"))?;
    assert_eq!(latest_jpg.height(), 36);
    assert!(fx.desktop.applied.lock().unwrap().is_empty());

    engine.run_cycle(false, false)?;
    let mut archived: Vec<_> = fs::read_dir(fx.app.join("archive"))?
        .map(|e| e.map(|e| e.file_name().to_string_lossy().into_owned()))
        .collect::<Result<_, _>>()?;
    archived.sort();
    assert_eq!(archived.len(), 2, "archive keeps one entry per cycle: {archived:?}");
    assert!(archived.iter().all(|name| name.ends_with(".jpg")));

    let partial = fs::read_dir(&fx.app)?
        .filter_map(Result::ok)
        .any(|e| e.file_name().to_string_lossy().ends_with(".part"));
    assert!(!partial);
    Ok(())
}

#[test]
fn save_path_receives_a_copy() -> anyhow::Result<()> {
    let fx = Fixture::new();
    let target = fx.app.parent().unwrap().join("exports").join("wallpaper.png");
    let extra = format!("output:\n  save_path: {}\n", target.display());
    let engine = fx.engine_with(fx.pipeline(&extra), fx.runtime());

    let report = engine.run_cycle(true, true)?;

    assert_eq!(fs::read(&target)?, fs::read(&report.output_path)?);
    Ok(())
}

#[test]
fn subscribers_receive_reports() -> anyhow::Result<()> {
    let fx = Fixture::new();
    let engine = fx.engine();
    let rx = engine.subscribe();
    let dropped = engine.subscribe();
    drop(dropped);

    let report = engine.run_cycle(true, true)?;
    let received = rx.try_recv()?;
    assert_eq!(received, report);

    let json = serde_json::to_value(&received)?;
    assert_eq!(json["update_count"], 1);
    assert_eq!(json["fetch_source"], true);
    Ok(())
}

#[test]
fn concurrent_cycles_never_overlap() -> anyhow::Result<()> {
    let fx = Fixture::with_hold(Duration::from_millis(25));
    let engine = Arc::new(fx.engine_with(fx.pipeline(""), fx.runtime()).with_clock(Some(fontless_clock())));
    engine.run_cycle(true, true)?;

    let full = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || (0..3).map(|_| engine.run_cycle(true, false).is_ok()).collect::<Vec<_>>())
    };
    let clock = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || (0..3).map(|_| engine.run_cycle(false, false).is_ok()).collect::<Vec<_>>())
    };

    assert!(full.join().unwrap().into_iter().all(|ok| ok));
    assert!(clock.join().unwrap().into_iter().all(|ok| ok));

    assert_eq!(fx.desktop.max_active.load(Ordering::SeqCst), 1);
    assert_eq!(fx.desktop.undecodable.load(Ordering::SeqCst), 0);
    assert_eq!(engine.update_count(), 7);

    let proc_dir = fx.proc_pngs()[0].parent().unwrap().to_path_buf();
    let leftovers = fs::read_dir(proc_dir)?
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().ends_with(".part"))
        .count();
    assert_eq!(leftovers, 0);
    Ok(())
}

/* =========================
   SCHEDULER
   ========================= */

#[test]
fn scheduler_runs_initial_deep_clean_and_stops_on_cancel() -> anyhow::Result<()> {
    let fx = Fixture::new();
    let engine = Arc::new(fx.engine_with(fx.pipeline("scheduling:\n  update_interval_minutes: 1\n"), fx.runtime()));
    let rx = engine.subscribe();

    let handle = Scheduler::new(Arc::clone(&engine)).start()?;
    let first = rx.recv_timeout(Duration::from_secs(30))?;
    assert!(first.fetch_source);
    assert!(first.deep_clean);

    handle.cancel();
    handle.join();
    assert!(engine.update_count() >= 1);
    Ok(())
}

#[test]
fn scheduler_rejects_short_interval_before_any_cycle() {
    let fx = Fixture::new();
    let engine = Arc::new(fx.engine_with(fx.pipeline("scheduling:\n  update_interval_minutes: 0\n"), fx.runtime()));

    let err = Scheduler::new(Arc::clone(&engine)).start().err().unwrap();
    assert!(matches!(err, ScheduleError::IntervalTooShort { minimum: 1, actual: 0 }));
    assert_eq!(engine.update_count(), 0);
    assert_eq!(fx.fetch.calls.load(Ordering::SeqCst), 0);
}
