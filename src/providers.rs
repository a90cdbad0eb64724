//! The event provider registry and the dispatch-table plumbing that sits in
//! front of [`crate::trace_session::TraceSession`].
//!
//! Provider GUIDs are host-OS identifiers; the portable core never interprets
//! their bits, it only compares them for equality and uses them as map keys.
//! A real deployment binds [`ProviderId`] values from the OS-specific shim at
//! configuration time — the constants below are the symbolic table entries
//! the worker registers against, not real GUID bytes.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::types::{LateStageReprojectionEvent, PresentEvent};

/// Opaque 128-bit provider identifier. Two providers are the same provider
/// iff their ids compare equal; nothing else about the bits is meaningful
/// inside the portable core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderId(pub u128);

/// Level/keyword filter a provider is enabled with, mirroring the
/// `EnableTraceEx2` arguments of the original tracing API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderConfig {
    pub level: u8,
    pub match_any_keyword: u64,
    pub match_all_keyword: u64,
}

impl ProviderConfig {
    pub const fn new(level: u8, match_any_keyword: u64, match_all_keyword: u64) -> Self {
        Self { level, match_any_keyword, match_all_keyword }
    }
}

/// The severity levels a provider subscribes at; informational vs verbose
/// mirror the granularity the original providers expose.
pub const LEVEL_VERBOSE: u8 = 5;
pub const LEVEL_INFORMATION: u8 = 4;

pub const DXGI_PROVIDER: ProviderId = ProviderId(1);
pub const D3D9_PROVIDER: ProviderId = ProviderId(2);
pub const DXGKRNL_PROVIDER: ProviderId = ProviderId(3);
pub const WIN32K_PROVIDER: ProviderId = ProviderId(4);
pub const DWM_PROVIDER: ProviderId = ProviderId(5);
pub const DWM_LEGACY_PROVIDER: ProviderId = ProviderId(6);
pub const DXGKRNL_LEGACY_PROVIDER: ProviderId = ProviderId(7);
pub const NT_PROCESS_PROVIDER: ProviderId = ProviderId(8);

/// The fixed provider table the worker registers on every capture start,
/// in the order and with the filters the original collector used.
pub fn default_provider_table() -> Vec<(ProviderId, ProviderConfig)> {
    vec![
        (DXGI_PROVIDER, ProviderConfig::new(LEVEL_INFORMATION, 0, 0)),
        (D3D9_PROVIDER, ProviderConfig::new(LEVEL_INFORMATION, 0, 0)),
        (DXGKRNL_PROVIDER, ProviderConfig::new(LEVEL_INFORMATION, 1, 0)),
        (WIN32K_PROVIDER, ProviderConfig::new(LEVEL_INFORMATION, 0x1000, 0)),
        (DWM_PROVIDER, ProviderConfig::new(LEVEL_VERBOSE, 0, 0)),
        (DWM_LEGACY_PROVIDER, ProviderConfig::new(LEVEL_VERBOSE, 0, 0)),
        (DXGKRNL_LEGACY_PROVIDER, ProviderConfig::new(LEVEL_INFORMATION, 1, 0)),
    ]
    // NT_PROCESS_PROVIDER carries a handler only, no provider-level enable,
    // matching `session.AddHandler(NT_PROCESS_EVENT_GUID, ...)` taking no
    // `AddProvider` counterpart in the original registration sequence.
}

/// A decoded event, already demultiplexed into one of the shapes the
/// correlators understand. Modeling the dispatch payload as a tagged variant
/// (rather than a raw byte blob plus an opaque context pointer) keeps the
/// handler table type-safe; provider-specific binary decoding (blt, flip,
/// present-history, queue-packet, vsync-DPC, MMIO-flip) happens upstream of
/// this boundary, in the OS-specific shim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventPayload {
    Present(PresentEvent),
    Reprojection(LateStageReprojectionEvent),
    ProcessStarted { process_id: u32, image_name: String },
    ProcessStopped { process_id: u32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    pub provider_id: ProviderId,
    pub timestamp: u64,
    pub payload: EventPayload,
}

/// Bounded only by backpressure from the worker's drain cadence; the event
/// callback that pushes here must return quickly, so this is a plain
/// mutex-guarded deque, not a blocking channel.
#[derive(Debug, Default)]
pub struct StagingQueue {
    queue: Mutex<VecDeque<EventPayload>>,
}

impl StagingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, payload: EventPayload) {
        self.queue.lock().push_back(payload);
    }

    /// Removes and returns everything currently staged, in arrival order.
    pub fn drain_all(&self) -> Vec<EventPayload> {
        self.queue.lock().drain(..).collect()
    }
}

/// A provider-scoped handler. The dispatch table stores one `Arc<dyn Handler>`
/// per registered provider id; `dispatch` must return quickly since it runs
/// on the OS consume thread.
pub trait Handler: Send + Sync {
    fn name(&self) -> &'static str;
    fn dispatch(&self, event: &RawEvent);
}

/// The handler used for every provider in [`default_provider_table`]: push
/// the decoded payload onto a shared staging queue and return.
pub struct QueueHandler {
    name: &'static str,
    queue: Arc<StagingQueue>,
}

impl QueueHandler {
    pub fn new(name: &'static str, queue: Arc<StagingQueue>) -> Self {
        Self { name, queue }
    }
}

impl Handler for QueueHandler {
    fn name(&self) -> &'static str {
        self.name
    }

    fn dispatch(&self, event: &RawEvent) {
        self.queue.push(event.payload.clone());
    }
}
