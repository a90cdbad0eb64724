//! Manual exercise harness for the capture surface.
//!
//! Starts a capture, lets it run for a fixed duration, polls `count`, then
//! drains and prints whatever landed in the ring buffer. Useful for kicking
//! the tires on a build with `--features demo-events`, since without that
//! feature `start` fails with a resource error (no OS provider binding).

use std::time::Duration;

use anyhow::{bail, Result};
use clap::Parser;
use log::info;

use swaptrace::{api, EventScores};

#[derive(Parser, Debug)]
#[command(name = "swaptrace-harness", about = "Drive the capture surface manually")]
struct Args {
    /// Process id to target, 0 for all processes.
    #[arg(short, long, default_value = "0")]
    pid: i32,

    /// Ring buffer capacity, 0 for the configured default.
    #[arg(short, long, default_value = "0")]
    buffer_size: i32,

    /// How long to capture before stopping and draining, in seconds.
    #[arg(short, long, default_value = "2")]
    duration: u64,

    /// Log level, 0 (trace) through 6 (off).
    #[arg(short, long, default_value = "3")]
    log_level: i32,
}

fn main() -> Result<()> {
    let args = Args::parse();

    api::set_log_level(args.log_level);

    info!("starting capture: pid={} buffer_size={}", args.pid, args.buffer_size);
    let status = api::start(args.pid, args.buffer_size);
    if status != 0 {
        bail!("start failed with status {status}");
    }

    std::thread::sleep(Duration::from_secs(args.duration));

    let mut count = 0;
    api::count(&mut count);
    info!("captured {count} samples, stopping");

    let status = api::stop();
    if status != 0 {
        bail!("stop failed with status {status}");
    }

    let n = count.max(0) as usize;
    let mut ts = vec![0.0_f64; n];
    let mut scores = vec![EventScores::default(); n];
    let mut filled = 0;
    api::drain(n as i32, &mut ts, &mut scores, &mut filled);

    for i in 0..filled as usize {
        info!(
            "t={:.3} fps={:.2} flip={:.2} delta_ready={:.3} delta_displayed={:.3} time_taken={:.3} screen_time={:.3}",
            ts[i],
            scores[i].fps,
            scores[i].flip,
            scores[i].delta_ready,
            scores[i].delta_displayed,
            scores[i].time_taken,
            scores[i].screen_time,
        );
    }

    Ok(())
}
