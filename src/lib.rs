//! Real-time graphics-present telemetry collector: a tracing-session layer
//! ([`trace_session`], [`providers`]), a present-correlation engine
//! ([`correlator`], [`lsr_correlator`]), and a concurrent bounded ring buffer
//! ([`ring_buffer`]), wired together by [`capture_controller`] and exposed
//! through the six-operation singleton surface in [`api`].

pub mod api;
pub mod capture_controller;
pub mod config;
pub mod correlator;
#[cfg(feature = "demo-events")]
pub mod demo_feed;
pub mod error;
pub mod logging;
pub mod lsr_correlator;
pub mod privilege;
pub mod process_lookup;
pub mod providers;
pub mod ring_buffer;
pub mod trace_session;
pub mod types;

pub use capture_controller::{CaptureController, CaptureRuntimeConfig};
pub use config::{CaptureConfig, Config, CorrelatorFileConfig, LoggingConfig, LsrFileConfig};
pub use correlator::{CorrelatorConfig, PresentCorrelator};
pub use error::{CoreError, CoreResult, StatusCode};
pub use lsr_correlator::{LsrConfig, LsrCorrelator};
pub use ring_buffer::RingBuffer;
pub use types::{EventScores, LsrScores, PresentEvent, PresentResult};
