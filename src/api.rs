//! The crate's public surface (section 6): six callable operations backed by
//! a process-wide singleton [`CaptureController`], mirroring the original's
//! module-level session — `start`/`stop` are inherently singletons because
//! the underlying tracing session is itself a process singleton (section 9,
//! "Process-wide mutable state"). The three read operations copy out of the
//! ring buffer into caller-supplied slices and return the count filled,
//! preserving the "raw arrays at the boundary" contract (section 9) without
//! requiring unsafe pointers — a caller embedding this crate behind an actual
//! `extern "C"` shim copies from raw pointers into a stack slice at the call
//! site and hands that slice here.

use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::capture_controller::{CaptureController, CaptureRuntimeConfig, FeedFactory};
use crate::config::Config;
use crate::correlator::{CorrelatorConfig, SystemWallClock};
use crate::error::{CoreError, CoreResult, StatusCode};
use crate::lsr_correlator::LsrConfig;
use crate::privilege::CapsPrivilegeChecker;
use crate::process_lookup::ProcfsLookup;
use crate::trace_session::EventFeed;
use crate::types::EventScores;

/// Builds the [`FeedFactory`] bound into the production singleton. Binding a
/// real OS event provider is outside the portable core (section 1); with the
/// `demo-events` feature this drives the deterministic synthetic generator
/// instead, so the crate is still exercisable end-to-end without one.
fn default_feed_factory() -> Arc<FeedFactory> {
    Arc::new(move || -> CoreResult<Box<dyn EventFeed>> {
        #[cfg(feature = "demo-events")]
        {
            Ok(Box::new(crate::demo_feed::SyntheticFeed::new(crate::demo_feed::SyntheticConfig::default())))
        }
        #[cfg(not(feature = "demo-events"))]
        {
            Err(CoreError::resource(
                "no OS event provider binding configured; rebuild with --features demo-events or supply a custom feed factory",
            ))
        }
    })
}

fn build_controller(cfg: &Config) -> CaptureController {
    CaptureController::new(
        default_feed_factory(),
        Arc::new(ProcfsLookup),
        Arc::new(CapsPrivilegeChecker),
        Arc::new(SystemWallClock),
        CaptureRuntimeConfig {
            worker_poll_interval_ms: cfg.capture.worker_poll_interval_ms,
            consume_thread_join_timeout_ms: cfg.capture.consume_thread_join_timeout_ms,
            max_buffer_size: cfg.capture.max_buffer_size,
        },
        CorrelatorConfig {
            history_cap: cfg.correlator.history_cap,
            stale_window_ms: cfg.correlator.stale_window_ms,
            history_window_ms: cfg.correlator.history_window_ms,
            process_refresh_interval_ms: cfg.correlator.process_refresh_interval_ms,
            target_pid: 0,
        },
        LsrConfig { history_cap: cfg.lsr.history_cap, history_window_ms: cfg.lsr.history_window_ms },
    )
}

struct Singleton {
    controller: Mutex<CaptureController>,
    default_buffer_size: i32,
}

static SINGLETON: Lazy<Singleton> = Lazy::new(|| {
    crate::logging::init();
    let cfg = Config::load();
    crate::logging::set_log_level(cfg.logging.level);
    Singleton { default_buffer_size: cfg.capture.default_buffer_size, controller: Mutex::new(build_controller(&cfg)) }
});

/// `set_log_level(level) -> status`. Always succeeds; the level is clamped.
pub fn set_log_level(level: i32) -> i32 {
    crate::logging::set_log_level(level);
    StatusCode::Ok.into()
}

/// `start(target_pid, buffer_size) -> status`. `buffer_size == 0` substitutes
/// the configured default; `target_pid < 0` is treated as "all processes"
/// the same as `0`, since the wire type is `i32` but the correlator's pid
/// space is unsigned.
pub fn start(target_pid: i32, buffer_size: i32) -> i32 {
    let singleton = &*SINGLETON;
    let buffer_size = if buffer_size == 0 { singleton.default_buffer_size } else { buffer_size };
    let target_pid = if target_pid <= 0 { 0 } else { target_pid as u32 };
    let mut controller = singleton.controller.lock();
    match controller.start(target_pid, buffer_size) {
        Ok(()) => StatusCode::Ok.into(),
        Err(e) => e.into(),
    }
}

/// `stop() -> status`.
pub fn stop() -> i32 {
    let mut controller = SINGLETON.controller.lock();
    match controller.stop() {
        Ok(()) => StatusCode::Ok.into(),
        Err(e) => e.into(),
    }
}

/// `count(out) -> status`. Writes the current sample count to `*out`.
pub fn count(out: &mut i32) -> i32 {
    *out = SINGLETON.controller.lock().count() as i32;
    StatusCode::Ok.into()
}

/// `drain(n, ts_out, v_out, k_out) -> status`. Fills up to
/// `min(n, ts_out.len(), v_out.len())` oldest entries and writes the number
/// filled to `*k_out`.
pub fn drain(n: i32, ts_out: &mut [f64], v_out: &mut [EventScores], k_out: &mut i32) -> i32 {
    if n < 0 {
        return StatusCode::InvalidArguments.into();
    }
    let max = (n as usize).min(ts_out.len()).min(v_out.len());
    let (ts, vs) = SINGLETON.controller.lock().drain(max);
    let k = ts.len();
    ts_out[..k].copy_from_slice(&ts);
    v_out[..k].copy_from_slice(&vs);
    *k_out = k as i32;
    StatusCode::Ok.into()
}

/// `peek_tail(n, v_out, ts_out, k_out) -> status`. Fills up to
/// `min(n, ts_out.len(), v_out.len())` most-recent entries without removing
/// them, and writes the number filled to `*k_out`.
pub fn peek_tail(n: i32, v_out: &mut [EventScores], ts_out: &mut [f64], k_out: &mut i32) -> i32 {
    if n < 0 {
        return StatusCode::InvalidArguments.into();
    }
    let max = (n as usize).min(ts_out.len()).min(v_out.len());
    let (ts, vs) = SINGLETON.controller.lock().peek_tail(max);
    let k = ts.len();
    ts_out[..k].copy_from_slice(&ts);
    v_out[..k].copy_from_slice(&vs);
    *k_out = k as i32;
    StatusCode::Ok.into()
}

/// Library-load hook (section 4.4): forces the singleton into existence so
/// logging is configured before any caller reaches the public surface.
#[ctor::ctor]
fn on_load() {
    Lazy::force(&SINGLETON);
}

/// Library-unload hook (section 4.4): stops any lingering worker so a
/// process unloading this as a `cdylib` never leaves a capture thread
/// running past the library's own lifetime.
#[ctor::dtor]
fn on_unload() {
    let _ = SINGLETON.controller.lock().stop();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_log_level_always_ok() {
        assert_eq!(set_log_level(9), StatusCode::Ok as i32);
    }

    #[test]
    fn drain_respects_output_buffer_capacity() {
        // A buffer shorter than `n` clamps the fill to its own length; this
        // does not touch the singleton's capture state, only its read path,
        // so it is safe to run alongside other tests in this process.
        let mut ts_out = [0.0_f64; 0];
        let mut v_out = [EventScores::default(); 0];
        let mut k_out = 0;
        let status = drain(10, &mut ts_out, &mut v_out, &mut k_out);
        assert_eq!(status, StatusCode::Ok as i32);
        assert_eq!(k_out, 0);
    }

    #[test]
    fn negative_n_is_invalid_argument() {
        let mut ts_out = [0.0_f64; 4];
        let mut v_out = [EventScores::default(); 4];
        let mut k_out = 0;
        assert_eq!(drain(-1, &mut ts_out, &mut v_out, &mut k_out), StatusCode::InvalidArguments as i32);
        assert_eq!(peek_tail(-1, &mut v_out, &mut ts_out, &mut k_out), StatusCode::InvalidArguments as i32);
    }

    #[test]
    fn stop_without_start_reports_not_running() {
        // Runs after whichever test last left the singleton stopped; calling
        // stop() twice in a row is the documented not-running precondition.
        let _ = stop();
        assert_eq!(stop(), StatusCode::NotRunning as i32);
    }
}
