//! The mixed-reality twin of [`crate::correlator::PresentCorrelator`]. There
//! is no swap-chain concept for late-stage reprojection — the compositor
//! reprojects once per vsync interval regardless of how many apps are
//! rendering — so state is a single bounded history keyed by the
//! compositor's own process id rather than a process/swap-chain map.

use std::collections::{HashMap, VecDeque};

use crate::ring_buffer::RingBuffer;
use crate::types::{LateStageReprojectionEvent, LsrScores};

#[derive(Debug, Clone, Copy)]
pub struct LsrConfig {
    pub history_cap: usize,
    pub history_window_ms: u64,
}

impl Default for LsrConfig {
    fn default() -> Self {
        Self { history_cap: 120, history_window_ms: 2_000 }
    }
}

struct LsrHistory {
    events: VecDeque<LateStageReprojectionEvent>,
}

impl LsrHistory {
    fn new() -> Self {
        Self { events: VecDeque::new() }
    }
}

pub struct LsrCorrelator {
    config: LsrConfig,
    histories: HashMap<u32, LsrHistory>,
}

impl LsrCorrelator {
    pub fn new(config: LsrConfig) -> Self {
        Self { config, histories: HashMap::new() }
    }

    fn window_qpc_ticks(&self, perf_freq: u64) -> u64 {
        self.config.history_window_ms * perf_freq / 1000
    }

    /// `on_reprojections`: appends each event to its compositor's history,
    /// prunes by cap and QPC-age window, and for every pair emits a trailing
    /// miss rate and average reprojection latency into `sink`.
    pub fn on_reprojections(&mut self, batch: &[LateStageReprojectionEvent], perf_freq: u64, sink: &RingBuffer<LsrScores>) {
        let cap = self.config.history_cap;
        let window = self.window_qpc_ticks(perf_freq);

        for &event in batch {
            let history = self.histories.entry(event.lsr_process_id).or_insert_with(LsrHistory::new);
            history.events.push_back(event);

            while history.events.len() > cap {
                history.events.pop_front();
            }
            while let Some(front) = history.events.front() {
                if event.qpc_time.saturating_sub(front.qpc_time) > window {
                    history.events.pop_front();
                } else {
                    break;
                }
            }

            if history.events.len() < 2 {
                continue;
            }

            let missed_count = history.events.iter().filter(|e| e.missed).count();
            let app_missed_rate = missed_count as f64 / history.events.len() as f64;
            let avg_latency_ticks: f64 = history.events.iter().map(|e| e.reprojection_latency_ticks as f64).sum::<f64>()
                / history.events.len() as f64;
            let avg_reprojection_latency_ms = 1000.0 * avg_latency_ticks / perf_freq as f64;

            sink.add(
                event.qpc_time as f64 / perf_freq as f64,
                LsrScores { app_missed_rate, avg_reprojection_latency_ms },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PERF_FREQ: u64 = 10_000_000;

    fn reprojection(qpc: u64, latency_ticks: u64, missed: bool) -> LateStageReprojectionEvent {
        LateStageReprojectionEvent {
            app_process_id: 1,
            lsr_process_id: 7,
            qpc_time: qpc,
            reprojection_latency_ticks: latency_ticks,
            missed,
        }
    }

    #[test]
    fn no_score_until_two_events() {
        let mut correlator = LsrCorrelator::new(LsrConfig::default());
        let sink: RingBuffer<LsrScores> = RingBuffer::new(8);
        correlator.on_reprojections(&[reprojection(0, 1_000, false)], PERF_FREQ, &sink);
        assert_eq!(sink.count(), 0);
    }

    #[test]
    fn miss_rate_reflects_trailing_window() {
        let mut correlator = LsrCorrelator::new(LsrConfig::default());
        let sink: RingBuffer<LsrScores> = RingBuffer::new(8);
        correlator.on_reprojections(&[reprojection(0, 1_000, true)], PERF_FREQ, &sink);
        correlator.on_reprojections(&[reprojection(100, 1_000, false)], PERF_FREQ, &sink);
        let (_ts, vs) = sink.peek_tail(1);
        assert!((vs[0].app_missed_rate - 0.5).abs() < 1e-9);
    }
}
