//! Deterministic synthetic present-event generator backing the manual
//! exercise binary and, behind `demo-events`, the test suite. A fixed
//! arithmetic progression of QPC ticks rather than the teacher's `rand`-based
//! fake-event stream — section 1 requires the core be deterministic given a
//! recorded input event stream, and a randomized generator would make the
//! concrete scenarios in section 8 unreproducible.

use crate::providers::{EventPayload, RawEvent, DXGI_PROVIDER};
use crate::trace_session::EventFeed;
use crate::types::{PresentEvent, PresentResult};

pub const DEFAULT_PERF_FREQ: u64 = 10_000_000;

/// QPC ticks between presents at a steady 60 Hz cadence (perf_freq = 10e6).
const FRAME_INTERVAL_TICKS: u64 = 166_667;

#[derive(Debug, Clone, Copy)]
pub struct SyntheticConfig {
    pub process_id: u32,
    pub swap_chain_address: u64,
    pub frame_count: u64,
    pub frequency: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self { process_id: 4242, swap_chain_address: 0xC0FFEE, frame_count: 600, frequency: DEFAULT_PERF_FREQ }
    }
}

/// The deterministic present sequence `config` describes: every frame lands
/// on-screen `FRAME_INTERVAL_TICKS` after the last, none discarded or
/// aborted.
pub fn synthetic_presents(config: &SyntheticConfig) -> Vec<PresentEvent> {
    (0..config.frame_count)
        .map(|i| {
            let qpc = i * FRAME_INTERVAL_TICKS;
            PresentEvent {
                process_id: config.process_id,
                swap_chain_address: config.swap_chain_address,
                qpc_time: qpc,
                ready_time: qpc + FRAME_INTERVAL_TICKS / 2,
                screen_time: qpc + FRAME_INTERVAL_TICKS,
                time_taken: FRAME_INTERVAL_TICKS / 3,
                final_state: PresentResult::Presented,
            }
        })
        .collect()
}

/// An [`EventFeed`] that replays [`synthetic_presents`] once, then ends —
/// mirroring how [`crate::trace_session::RecordedFeed`] exhausts at
/// end-of-file.
pub struct SyntheticFeed {
    frequency: u64,
    events: std::vec::IntoIter<RawEvent>,
}

impl SyntheticFeed {
    pub fn new(config: SyntheticConfig) -> Self {
        let frequency = config.frequency;
        let events = synthetic_presents(&config)
            .into_iter()
            .map(|p| RawEvent { provider_id: DXGI_PROVIDER, timestamp: p.qpc_time, payload: EventPayload::Present(p) })
            .collect::<Vec<_>>()
            .into_iter();
        Self { frequency, events }
    }
}

impl EventFeed for SyntheticFeed {
    fn frequency(&self) -> u64 {
        self.frequency
    }

    fn next_event(&mut self) -> Option<RawEvent> {
        self.events.next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_steady_cadence() {
        let presents = synthetic_presents(&SyntheticConfig { frame_count: 10, ..SyntheticConfig::default() });
        assert_eq!(presents.len(), 10);
        for pair in presents.windows(2) {
            assert_eq!(pair[1].qpc_time - pair[0].qpc_time, FRAME_INTERVAL_TICKS);
        }
    }

    #[test]
    fn every_frame_is_displayed() {
        let presents = synthetic_presents(&SyntheticConfig { frame_count: 5, ..SyntheticConfig::default() });
        assert!(presents.iter().all(|p| p.final_state == PresentResult::Presented));
        assert!(presents.iter().all(|p| p.screen_time >= p.qpc_time));
    }

    #[test]
    fn feed_replays_then_ends() {
        let mut feed = SyntheticFeed::new(SyntheticConfig { frame_count: 2, ..SyntheticConfig::default() });
        assert!(feed.next_event().is_some());
        assert!(feed.next_event().is_some());
        assert!(feed.next_event().is_none());
    }

    #[test]
    fn two_runs_produce_identical_output() {
        let a = synthetic_presents(&SyntheticConfig::default());
        let b = synthetic_presents(&SyntheticConfig::default());
        assert_eq!(a, b);
    }
}
