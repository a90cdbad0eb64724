//! Logging setup and the runtime-adjustable level knob exposed as
//! `set_log_level`. The six-level severity scale of section 6 runs
//! `0` (most verbose) through `6` (off); `log::LevelFilter` has exactly six
//! variants, so the mapping is a straight one-to-one walk down the scale.

use log::LevelFilter;

/// Initializes `env_logger` once per process. Safe to call more than once;
/// subsequent calls are no-ops.
pub fn init() {
    let _ = env_logger::builder().is_test(false).try_init();
}

/// Maps the `0..=6` severity scale onto `log::LevelFilter` and installs it as
/// the process-wide max level. Returns the clamped level actually applied.
pub fn set_log_level(level: i32) -> i32 {
    let clamped = level.clamp(0, 6);
    let filter = match clamped {
        0 | 1 => LevelFilter::Trace,
        2 => LevelFilter::Debug,
        3 => LevelFilter::Info,
        4 => LevelFilter::Warn,
        5 => LevelFilter::Error,
        _ => LevelFilter::Off,
    };
    log::set_max_level(filter);
    clamped
}
