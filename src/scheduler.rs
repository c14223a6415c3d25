// ~/src/scheduler.rs

use std::{
    sync::{Arc, Condvar, Mutex, PoisonError},
    thread::{self, JoinHandle},
    time::Duration,
};

use chrono::{DateTime, Local, TimeZone, Timelike};
use tracing::{debug, error, info, warn};

use crate::{error::ScheduleError, wallpaper_engine::WallpaperEngine, DEBUG_NAME};

pub const MIN_UPDATE_INTERVAL_MINUTES: i64 = 1;
/// Added to every full-refresh wait so the wake lands after the boundary.
pub const SETTLE_BUFFER: Duration = Duration::from_secs(30);
const CLOCK_INTERVAL: Duration = Duration::from_secs(60);

/* =========================
   CANCELLATION
   ========================= */

/// Shared stop flag. Waiting threads wake as soon as it is set.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (flag, cvar) = &*self.inner;
        *flag.lock().unwrap_or_else(PoisonError::into_inner) = true;
        cvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleeps for `timeout` or until cancelled. Returns `true` when cancelled.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        let (flag, cvar) = &*self.inner;
        let guard = flag.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = cvar
            .wait_timeout_while(guard, timeout, |cancelled| !*cancelled)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

/* =========================
   ALIGNMENT
   ========================= */

fn since_top_of_hour<Tz: TimeZone>(now: &DateTime<Tz>) -> Duration {
    Duration::from_secs(u64::from(now.minute()) * 60 + u64::from(now.second()))
        + Duration::from_nanos(u64::from(now.nanosecond().min(999_999_999)))
}

fn until_boundary(elapsed: Duration, interval: Duration) -> Duration {
    let interval_ns = interval.as_nanos().max(1);
    let rem = elapsed.as_nanos() % interval_ns;
    Duration::from_nanos((interval_ns - rem) as u64)
}

/// Wait before the next full refresh: to the next multiple of the interval
/// counted from the top of the hour, plus [`SETTLE_BUFFER`]. Intervals that
/// do not divide an hour restart their cadence at every hour.
pub fn delay_until_next_full<Tz: TimeZone>(now: &DateTime<Tz>, interval_minutes: i64) -> Duration {
    let interval = Duration::from_secs(interval_minutes.max(MIN_UPDATE_INTERVAL_MINUTES) as u64 * 60);
    until_boundary(since_top_of_hour(now), interval) + SETTLE_BUFFER
}

/// Wait until the next wall-clock minute.
pub fn delay_until_next_clock<Tz: TimeZone>(now: &DateTime<Tz>) -> Duration {
    let into_minute =
        Duration::from_secs(u64::from(now.second())) + Duration::from_nanos(u64::from(now.nanosecond().min(999_999_999)));
    until_boundary(into_minute, CLOCK_INTERVAL)
}

pub fn validate_interval(minutes: i64) -> Result<(), ScheduleError> {
    if minutes < MIN_UPDATE_INTERVAL_MINUTES {
        return Err(ScheduleError::IntervalTooShort {
            minimum: MIN_UPDATE_INTERVAL_MINUTES,
            actual: minutes,
        });
    }
    Ok(())
}

/* =========================
   SCHEDULER
   ========================= */

/// Drives the engine on two cadences: full refreshes on the configured
/// interval and clock-only refreshes every minute.
pub struct Scheduler {
    engine: Arc<WallpaperEngine>,
    interval_minutes: i64,
    clock_enabled: bool,
    cancel: CancelToken,
}

pub struct SchedulerHandle {
    cancel: CancelToken,
    full: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Requests a stop. Running cycles finish first.
    pub fn cancel(&self) {
        info!("[{}][SCHEDULER] Cancellation requested", DEBUG_NAME);
        self.cancel.cancel();
    }

    /// Blocks until both loops have exited.
    pub fn join(mut self) {
        if let Some(handle) = self.full.take() {
            if handle.join().is_err() {
                error!("[{}][SCHEDULER] Full-refresh thread panicked", DEBUG_NAME);
            }
        }
    }
}

impl Scheduler {
    pub fn new(engine: Arc<WallpaperEngine>) -> Self {
        let interval_minutes = engine.pipeline().scheduling.update_interval_minutes;
        let clock_enabled = engine.runtime().clock_enabled;
        Self {
            engine,
            interval_minutes,
            clock_enabled,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn start(self) -> Result<SchedulerHandle, ScheduleError> {
        validate_interval(self.interval_minutes).inspect_err(|e| {
            error!(interval = self.interval_minutes, "[{}][SCHEDULER] {}", DEBUG_NAME, e);
        })?;
        info!(
            update_interval_minutes = self.interval_minutes,
            clock = self.clock_enabled,
            "[{}][SCHEDULER] Starting updater", DEBUG_NAME
        );

        let cancel = self.cancel.clone();
        let full = thread::Builder::new()
            .name("full-refresh".into())
            .spawn(move || self.run_full())
            .map_err(|e| ScheduleError::Spawn("full-refresh", e))?;

        Ok(SchedulerHandle {
            cancel,
            full: Some(full),
        })
    }

    fn run_full(self) {
        info!("[{}][SCHEDULER] Performing initial update", DEBUG_NAME);
        run_logged(&self.engine, true, true);

        let clock = if self.clock_enabled {
            let engine = Arc::clone(&self.engine);
            let cancel = self.cancel.clone();
            match thread::Builder::new()
                .name("clock-refresh".into())
                .spawn(move || run_clock(engine, cancel))
            {
                Ok(handle) => Some(handle),
                Err(e) => {
                    error!(error = %e, "[{}][SCHEDULER] Failed to start clock updater", DEBUG_NAME);
                    None
                }
            }
        } else {
            None
        };

        loop {
            let delay = delay_until_next_full(&Local::now(), self.interval_minutes);
            debug!(delay_ms = delay.as_millis() as u64, "[{}][SCHEDULER] Full updater waiting", DEBUG_NAME);
            if self.cancel.wait_for(delay) {
                break;
            }
            run_logged(&self.engine, true, false);
        }
        info!("[{}][SCHEDULER] Full updater stopped", DEBUG_NAME);

        if let Some(handle) = clock {
            if handle.join().is_err() {
                error!("[{}][SCHEDULER] Clock thread panicked", DEBUG_NAME);
            }
        }
    }
}

fn run_clock(engine: Arc<WallpaperEngine>, cancel: CancelToken) {
    loop {
        let delay = delay_until_next_clock(&Local::now());
        debug!(delay_ms = delay.as_millis() as u64, "[{}][SCHEDULER] Clock updater waiting", DEBUG_NAME);
        if cancel.wait_for(delay) {
            break;
        }
        run_logged(&engine, false, false);
    }
    info!("[{}][SCHEDULER] Clock updater stopped", DEBUG_NAME);
}

/// A failed cycle is logged and the loop keeps its cadence.
fn run_logged(engine: &WallpaperEngine, fetch_source: bool, deep_clean: bool) {
    if let Err(e) = engine.run_cycle(fetch_source, deep_clean) {
        if e.is_fatal() {
            error!(fetch_source, deep_clean, error = %e, "[{}][SCHEDULER] Invalid cycle request", DEBUG_NAME);
        } else {
            warn!(fetch_source, deep_clean, error = %e, "[{}][SCHEDULER] Update cycle failed", DEBUG_NAME);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::time::Instant;

    fn at(h: u32, m: u32, s: u32, nanos: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 17, h, m, s)
            .single()
            .and_then(|t| t.with_nanosecond(nanos))
            .expect("valid timestamp")
    }

    #[test]
    fn full_refresh_aligns_to_interval_plus_buffer() {
        assert_eq!(delay_until_next_full(&at(10, 7, 20, 0), 10), Duration::from_secs(190));
        assert_eq!(delay_until_next_full(&at(10, 0, 0, 0), 10), Duration::from_secs(630));
        assert_eq!(delay_until_next_full(&at(10, 59, 0, 0), 60), Duration::from_secs(90));
    }

    #[test]
    fn odd_intervals_restart_at_the_hour() {
        // 58 minutes in, 58 % 7 = 2, so five minutes remain
        assert_eq!(delay_until_next_full(&at(10, 58, 0, 0), 7), Duration::from_secs(330));
    }

    #[test]
    fn clock_refresh_waits_for_next_minute() {
        assert_eq!(delay_until_next_clock(&at(10, 7, 20, 500_000_000)), Duration::from_millis(39_500));
        assert_eq!(delay_until_next_clock(&at(10, 8, 0, 0)), Duration::from_secs(60));
        assert_eq!(delay_until_next_clock(&at(10, 8, 59, 999_000_000)), Duration::from_millis(1));
    }

    #[test]
    fn sub_minute_interval_is_rejected() {
        assert!(validate_interval(1).is_ok());
        assert!(matches!(
            validate_interval(0),
            Err(ScheduleError::IntervalTooShort { minimum: 1, actual: 0 })
        ));
        assert!(validate_interval(-5).is_err());
    }

    #[test]
    fn cancel_wakes_waiters_early() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let started = Instant::now();
        let handle = thread::spawn(move || waiter.wait_for(Duration::from_secs(30)));

        thread::sleep(Duration::from_millis(20));
        token.cancel();

        assert!(handle.join().expect("waiter thread"));
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(token.is_cancelled());
    }

    #[test]
    fn wait_times_out_without_cancel() {
        let token = CancelToken::new();
        assert!(!token.wait_for(Duration::from_millis(5)));
    }
}
