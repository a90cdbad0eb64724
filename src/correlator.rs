//! Turns raw presents into per-process, per-swap-chain state and emits
//! derived [`EventScores`] into the output ring buffer. Grounded directly on
//! `AddPresent`/`PresentMon_Update`/`UpdateProcessInfo_Realtime`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use log::debug;

use crate::process_lookup::ProcessLookup;
use crate::ring_buffer::RingBuffer;
use crate::types::{EventScores, PresentEvent, PresentResult, ProcessInfo, SwapChainData};

/// Wall-clock source, injected so tests can pin `t0_wall` to a fixed value
/// and get reproducible output timestamps.
pub trait WallClock: Send + Sync {
    fn now_seconds(&self) -> f64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemWallClock;

impl WallClock for SystemWallClock {
    fn now_seconds(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CorrelatorConfig {
    pub history_cap: usize,
    /// Whole-chain eviction window, milliseconds in the periodic-refresh
    /// "now" tick domain.
    pub stale_window_ms: u64,
    /// Per-entry history age window, milliseconds, converted to QPC ticks
    /// per call using the session's `perf_freq`.
    pub history_window_ms: u64,
    pub process_refresh_interval_ms: u64,
    /// 0 means "all processes".
    pub target_pid: u32,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            history_cap: 120,
            stale_window_ms: 2_000,
            history_window_ms: 2_000,
            process_refresh_interval_ms: 1_000,
            target_pid: 0,
        }
    }
}

fn is_target_process(target_pid: u32, process_id: u32) -> bool {
    target_pid == 0 || target_pid == process_id
}

pub struct PresentCorrelator {
    process_map: HashMap<u32, ProcessInfo>,
    config: CorrelatorConfig,
    lookup: Arc<dyn ProcessLookup>,
    clock: Arc<dyn WallClock>,
    t0_wall: Option<f64>,
    t0_qpc: Option<u64>,
}

impl PresentCorrelator {
    pub fn new(config: CorrelatorConfig, lookup: Arc<dyn ProcessLookup>, clock: Arc<dyn WallClock>) -> Self {
        Self {
            process_map: HashMap::new(),
            config,
            lookup,
            clock,
            t0_wall: None,
            t0_qpc: None,
        }
    }

    pub fn process_count(&self) -> usize {
        self.process_map.len()
    }

    fn history_window_qpc_ticks(&self, perf_freq: u64) -> u64 {
        self.config.history_window_ms * perf_freq / 1000
    }

    /// Returns the existing/newly created target `ProcessInfo`, or `None` if
    /// the process is not the configured capture target.
    fn ensure_process(&mut self, process_id: u32, now_ticks: u64) -> Option<&mut ProcessInfo> {
        if self.process_map.contains_key(&process_id) {
            let info = self.process_map.get(&process_id).unwrap();
            return if info.is_target_process {
                self.process_map.get_mut(&process_id)
            } else {
                None
            };
        }

        let image_name = self.lookup.image_name(process_id);
        let is_target = is_target_process(self.config.target_pid, process_id);
        let info = ProcessInfo::new(image_name, now_ticks, is_target);
        self.process_map.insert(process_id, info);
        if is_target {
            self.process_map.get_mut(&process_id)
        } else {
            None
        }
    }

    /// `on_presents` from section 4.3. Feeds every present in `batch` through
    /// per-chain correlation and pushes derived scores into `sink`.
    pub fn on_presents(&mut self, batch: &[PresentEvent], now_ticks: u64, perf_freq: u64, sink: &RingBuffer<EventScores>) {
        let window_qpc_ticks = self.history_window_qpc_ticks(perf_freq);
        let history_cap = self.config.history_cap;
        let stale_window_ms = self.config.stale_window_ms;

        for &p in batch {
            let Some(info) = self.ensure_process(p.process_id, now_ticks) else {
                continue;
            };

            let chain = info
                .chain_map
                .entry(p.swap_chain_address)
                .or_insert_with(|| SwapChainData::new(history_cap, stale_window_ms, window_qpc_ticks));
            chain.add_present(p);

            let len = chain.present_history.len();
            let displayed_len = chain.displayed_present_history.len();
            if len > 1 {
                let curr = chain.present_history[len - 1];
                let prev = chain.present_history[len - 2];

                let delta_ms = 1000.0 * (curr.qpc_time as f64 - prev.qpc_time as f64) / perf_freq as f64;
                let delta_ready_ms = if curr.ready_time == 0 {
                    0.0
                } else {
                    1000.0 * (curr.ready_time as f64 - curr.qpc_time as f64) / perf_freq as f64
                };
                let delta_displayed_ms = if curr.final_state == PresentResult::Presented {
                    1000.0 * (curr.screen_time as f64 - curr.qpc_time as f64) / perf_freq as f64
                } else {
                    0.0
                };
                let time_taken_ms = 1000.0 * curr.time_taken as f64 / perf_freq as f64;

                let mut time_since_prev_displayed_ms = 0.0;
                if curr.final_state == PresentResult::Presented && displayed_len > 1 {
                    let prev_displayed = chain.displayed_present_history[displayed_len - 2];
                    time_since_prev_displayed_ms =
                        1000.0 * (curr.screen_time as f64 - prev_displayed.screen_time as f64) / perf_freq as f64;
                }

                let scores = EventScores {
                    fps: 1000.0 / delta_ms,
                    flip: if time_since_prev_displayed_ms == 0.0 {
                        0.0
                    } else {
                        1000.0 / time_since_prev_displayed_ms
                    },
                    delta_ready: delta_ready_ms,
                    delta_displayed: delta_displayed_ms,
                    time_taken: time_taken_ms,
                    screen_time: curr.screen_time as f64,
                };

                let ts = match (self.t0_wall, self.t0_qpc) {
                    (Some(t0_wall), Some(t0_qpc)) => t0_wall + (curr.qpc_time as f64 - t0_qpc as f64) / perf_freq as f64,
                    _ => {
                        let now = self.clock.now_seconds();
                        self.t0_wall = Some(now);
                        self.t0_qpc = Some(curr.qpc_time);
                        now
                    }
                };
                sink.add(ts, scores);
            }

            chain.update_last_ticks(now_ticks);
        }
    }

    /// Periodic per-process refresh: re-resolve the image name, recreate the
    /// `ProcessInfo` if it changed, evict the process entirely if the OS
    /// reports it gone, and separately prune chains stale for longer than
    /// their window.
    pub fn refresh_processes(&mut self, now_ticks: u64) {
        let due: Vec<u32> = self
            .process_map
            .iter()
            .filter(|(_, info)| now_ticks.saturating_sub(info.last_refresh_ticks) > self.config.process_refresh_interval_ms)
            .map(|(&pid, _)| pid)
            .collect();

        let mut to_remove = Vec::new();
        for pid in due {
            let still_alive = self.lookup.is_alive(pid);
            if let Some(info) = self.process_map.get_mut(&pid) {
                info.last_refresh_ticks = now_ticks;
                let current_name = self.lookup.image_name(pid);
                if still_alive && current_name != info.image_name {
                    debug!("process {pid} image changed from {} to {current_name}; resetting chains", info.image_name);
                    let is_target = info.is_target_process;
                    *info = ProcessInfo::new(current_name, now_ticks, is_target);
                }
                if !still_alive {
                    to_remove.push(pid);
                }
            }
        }
        for pid in &to_remove {
            self.process_map.remove(pid);
        }

        for info in self.process_map.values_mut() {
            info.chain_map.retain(|_, chain| !chain.is_stale(now_ticks));
        }
    }

    pub fn notify_process_started(&mut self, process_id: u32, image_name: String, now_ticks: u64) {
        let is_target = is_target_process(self.config.target_pid, process_id);
        self.process_map.insert(process_id, ProcessInfo::new(image_name, now_ticks, is_target));
    }

    pub fn notify_process_stopped(&mut self, process_id: u32) {
        self.process_map.remove(&process_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process_lookup::test_support::FakeProcessLookup;
    use crate::types::PresentResult;

    struct FixedClock(f64);
    impl WallClock for FixedClock {
        fn now_seconds(&self) -> f64 {
            self.0
        }
    }

    fn make_correlator(target_pid: u32) -> (PresentCorrelator, Arc<FakeProcessLookup>) {
        let lookup = Arc::new(FakeProcessLookup::new());
        lookup.set(1, "app.exe");
        let config = CorrelatorConfig { target_pid, ..CorrelatorConfig::default() };
        let correlator = PresentCorrelator::new(config, lookup.clone(), Arc::new(FixedClock(1_000.0)));
        (correlator, lookup)
    }

    fn present(qpc: u64, ready: u64, screen: u64, taken: u64, state: PresentResult) -> PresentEvent {
        PresentEvent {
            process_id: 1,
            swap_chain_address: 0xAAAA,
            qpc_time: qpc,
            ready_time: ready,
            screen_time: screen,
            time_taken: taken,
            final_state: state,
        }
    }

    const PERF_FREQ: u64 = 10_000_000;

    #[test]
    fn two_in_window_presents_emit_expected_scores() {
        let (mut correlator, _lookup) = make_correlator(0);
        let sink: RingBuffer<EventScores> = RingBuffer::new(8);

        let p1 = present(0, 0, 0, 50_000, PresentResult::Discarded);
        let p2 = present(166_667, 200_000, 0, 80_000, PresentResult::Discarded);

        correlator.on_presents(&[p1], 0, PERF_FREQ, &sink);
        correlator.on_presents(&[p2], 0, PERF_FREQ, &sink);

        assert_eq!(sink.count(), 1);
        let (_ts, vs) = sink.peek_tail(1);
        let scores = vs[0];
        assert!((scores.fps - 60.0).abs() < 1e-6);
        assert_eq!(scores.flip, 0.0);
        assert!((scores.delta_ready - 3.3333).abs() < 1e-3);
        assert_eq!(scores.delta_displayed, 0.0);
        assert!((scores.time_taken - 8.0).abs() < 1e-6);
    }

    #[test]
    fn displayed_pair_emits_flip_and_delta_displayed() {
        let (mut correlator, _lookup) = make_correlator(0);
        let sink: RingBuffer<EventScores> = RingBuffer::new(8);

        let p1 = present(0, 0, 50_000, 0, PresentResult::Presented);
        let p2 = present(166_667, 0, 216_667, 0, PresentResult::Presented);

        correlator.on_presents(&[p1], 0, PERF_FREQ, &sink);
        correlator.on_presents(&[p2], 0, PERF_FREQ, &sink);

        let (_ts, vs) = sink.peek_tail(1);
        let scores = vs[0];
        assert!((scores.delta_displayed - 5.0).abs() < 1e-6);
        assert!((scores.flip - 60.0).abs() < 1e-6);
    }

    #[test]
    fn non_target_process_is_not_stored() {
        let (mut correlator, _lookup) = make_correlator(999);
        let sink: RingBuffer<EventScores> = RingBuffer::new(8);
        let p1 = present(0, 0, 0, 0, PresentResult::Discarded);
        correlator.on_presents(&[p1], 0, PERF_FREQ, &sink);
        assert_eq!(correlator.process_count(), 1); // recorded, but not a target
        assert_eq!(sink.count(), 0);
    }

    #[test]
    fn output_timestamps_are_nondecreasing() {
        let (mut correlator, _lookup) = make_correlator(0);
        let sink: RingBuffer<EventScores> = RingBuffer::new(8);
        for i in 0..5u64 {
            let p = present(i * 166_667, 0, 0, 10_000, PresentResult::Discarded);
            correlator.on_presents(&[p], 0, PERF_FREQ, &sink);
        }
        let (ts, _vs) = sink.drain(usize::MAX);
        for pair in ts.windows(2) {
            assert!(pair[1] >= pair[0]);
        }
    }

    #[test]
    fn stale_chain_is_evicted_on_refresh() {
        let (mut correlator, lookup) = make_correlator(0);
        let sink: RingBuffer<EventScores> = RingBuffer::new(8);
        let p1 = present(0, 0, 0, 0, PresentResult::Discarded);
        correlator.on_presents(&[p1], 0, PERF_FREQ, &sink);

        lookup.set(1, "app.exe"); // still alive, same name
        correlator.refresh_processes(10_000); // far beyond stale_window_ms default of 2000
        let info = correlator.process_map.get(&1).unwrap();
        assert!(info.chain_map.is_empty());
    }

    #[test]
    fn process_exit_removes_entry() {
        let (mut correlator, lookup) = make_correlator(0);
        let sink: RingBuffer<EventScores> = RingBuffer::new(8);
        let p1 = present(0, 0, 0, 0, PresentResult::Discarded);
        correlator.on_presents(&[p1], 0, PERF_FREQ, &sink);
        assert_eq!(correlator.process_count(), 1);

        lookup.kill(1);
        correlator.refresh_processes(10_000);
        assert_eq!(correlator.process_count(), 0);
    }
}
