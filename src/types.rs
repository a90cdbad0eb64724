//! Core data types shared by the trace session, the correlators and the
//! ring buffer. These are plain data; no type here owns a lock or a thread.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Outcome of a single present, as reported by the OS compositor/driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PresentResult {
    Unknown,
    Presented,
    Discarded,
    Aborted,
}

/// A single present, already demultiplexed from whichever provider raised it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PresentEvent {
    pub process_id: u32,
    pub swap_chain_address: u64,
    pub qpc_time: u64,
    /// 0 means unknown / not yet ready.
    pub ready_time: u64,
    /// 0 means not yet displayed.
    pub screen_time: u64,
    pub time_taken: u64,
    pub final_state: PresentResult,
}

/// A mixed-reality compositor reprojection pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LateStageReprojectionEvent {
    pub app_process_id: u32,
    pub lsr_process_id: u32,
    pub qpc_time: u64,
    pub reprojection_latency_ticks: u64,
    pub missed: bool,
}

/// Exactly the six fields and field order crossing the FFI boundary; packed,
/// no padding. `#[repr(C)]` here, `#[repr(packed)]`'s layout falls out for
/// free since every field is an `f64` (8-byte aligned already).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EventScores {
    pub fps: f64,
    pub flip: f64,
    pub delta_ready: f64,
    pub delta_displayed: f64,
    pub time_taken: f64,
    pub screen_time: f64,
}

/// Derived per-reprojection-window score for the LSR correlator. Not part of
/// the FFI surface (section 6 only names `EventScores`); kept internal.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LsrScores {
    pub app_missed_rate: f64,
    pub avg_reprojection_latency_ms: f64,
}

/// Per-swap-chain present history, bounded both by entry count and wall age.
#[derive(Debug, Clone)]
pub struct SwapChainData {
    pub present_history: VecDeque<PresentEvent>,
    pub displayed_present_history: VecDeque<PresentEvent>,
    pub last_update_ticks: u64,
    history_cap: usize,
    /// Chain-eviction window, in the periodic-refresh "now" tick domain
    /// (milliseconds) — governs whether the whole chain is stale.
    stale_window_ticks: u64,
    /// Per-entry age window, in QPC ticks — governs how far back
    /// `present_history`/`displayed_present_history` reach.
    history_window_qpc_ticks: u64,
}

impl SwapChainData {
    pub fn new(history_cap: usize, stale_window_ticks: u64, history_window_qpc_ticks: u64) -> Self {
        Self {
            present_history: VecDeque::new(),
            displayed_present_history: VecDeque::new(),
            last_update_ticks: 0,
            history_cap,
            stale_window_ticks,
            history_window_qpc_ticks,
        }
    }

    pub fn add_present(&mut self, p: PresentEvent) {
        self.present_history.push_back(p);
        if p.final_state == PresentResult::Presented {
            self.displayed_present_history.push_back(p);
        }
        self.prune(p.qpc_time);
    }

    fn prune(&mut self, newest_qpc: u64) {
        while self.present_history.len() > self.history_cap {
            self.present_history.pop_front();
        }
        while self.displayed_present_history.len() > self.history_cap {
            self.displayed_present_history.pop_front();
        }
        while let Some(front) = self.present_history.front() {
            if newest_qpc.saturating_sub(front.qpc_time) > self.history_window_qpc_ticks {
                self.present_history.pop_front();
            } else {
                break;
            }
        }
        while let Some(front) = self.displayed_present_history.front() {
            if newest_qpc.saturating_sub(front.qpc_time) > self.history_window_qpc_ticks {
                self.displayed_present_history.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn update_last_ticks(&mut self, now_ticks: u64) {
        self.last_update_ticks = now_ticks;
    }

    pub fn is_stale(&self, now_ticks: u64) -> bool {
        now_ticks.saturating_sub(self.last_update_ticks) > self.stale_window_ticks
    }
}

/// Per-process accounting: one swap chain map plus periodic-refresh bookkeeping.
#[derive(Debug, Clone)]
pub struct ProcessInfo {
    pub image_name: String,
    pub chain_map: std::collections::HashMap<u64, SwapChainData>,
    pub last_refresh_ticks: u64,
    pub is_target_process: bool,
}

impl ProcessInfo {
    pub fn new(image_name: String, now_ticks: u64, is_target_process: bool) -> Self {
        Self {
            image_name,
            chain_map: std::collections::HashMap::new(),
            last_refresh_ticks: now_ticks,
            is_target_process,
        }
    }
}
