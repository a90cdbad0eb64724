//! Owns the capture lifecycle: privilege check, provider registration, the
//! two-thread worker (a processing thread blocked in the consume call and a
//! consuming thread that drains the staging queue, feeds the correlators,
//! and runs the periodic process refresh), and the output ring buffer.
//! Grounded directly on `StartEventRecording`/`StopEventRecording`/
//! `EtwConsumingThread`/`EtwProcessingThread` in the original collector.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use log::{debug, error, warn};

use crate::correlator::{CorrelatorConfig, PresentCorrelator, WallClock};
use crate::error::{CoreError, CoreResult};
use crate::lsr_correlator::{LsrConfig, LsrCorrelator};
use crate::privilege::PrivilegeChecker;
use crate::process_lookup::ProcessLookup;
use crate::providers::{
    default_provider_table, EventPayload, Handler, ProviderId, QueueHandler, StagingQueue, DWM_LEGACY_PROVIDER,
    DWM_PROVIDER, DXGKRNL_LEGACY_PROVIDER, DXGKRNL_PROVIDER, DXGI_PROVIDER, D3D9_PROVIDER, NT_PROCESS_PROVIDER,
    WIN32K_PROVIDER,
};
use crate::ring_buffer::RingBuffer;
use crate::trace_session::{EventFeed, TraceSession};
use crate::types::{EventScores, LsrScores};

/// Capacity of the LSR score buffer, independent of the present-score buffer.
const LSR_SINK_CAPACITY: usize = 4_096;

/// `MAX_CAPTURE_SAMPLES` in the original: `60 * 86400 * 7`, one week at 60Hz.
pub const MAX_CAPTURE_SAMPLES: i32 = 60 * 86400 * 7;

/// Builds a fresh [`EventFeed`] for a capture session. Binding this to a real
/// OS tracing session is outside the portable core (section 9); callers
/// supply a factory that either replays a recorded stream or drives the
/// deterministic demo generator.
pub type FeedFactory = dyn Fn() -> CoreResult<Box<dyn EventFeed>> + Send + Sync;

#[derive(Debug, Clone, Copy)]
pub struct CaptureRuntimeConfig {
    pub worker_poll_interval_ms: u64,
    pub consume_thread_join_timeout_ms: u64,
    /// Hard ceiling `start` validates the caller's `buffer_size` against.
    pub max_buffer_size: i32,
}

impl Default for CaptureRuntimeConfig {
    fn default() -> Self {
        Self { worker_poll_interval_ms: 100, consume_thread_join_timeout_ms: 5_000, max_buffer_size: MAX_CAPTURE_SAMPLES }
    }
}

fn provider_name(id: ProviderId) -> &'static str {
    match id {
        DXGI_PROVIDER => "dxgi",
        D3D9_PROVIDER => "d3d9",
        DXGKRNL_PROVIDER => "dxgkrnl",
        WIN32K_PROVIDER => "win32k",
        DWM_PROVIDER => "dwm",
        DWM_LEGACY_PROVIDER => "dwm-legacy",
        DXGKRNL_LEGACY_PROVIDER => "dxgkrnl-legacy",
        NT_PROCESS_PROVIDER => "nt-process",
        _ => "unknown-provider",
    }
}

struct Running {
    should_stop: Arc<AtomicBool>,
    /// Set by the worker if the consume loop exited with `should_stop` still
    /// false (feed exhausted without an explicit stop request). `stop()`
    /// surfaces this as `ShouldQuitUnexpected` on the call that observes it.
    ended_unexpectedly: Arc<AtomicBool>,
    worker: JoinHandle<()>,
}

pub struct CaptureController {
    feed_factory: Arc<FeedFactory>,
    lookup: Arc<dyn ProcessLookup>,
    privilege: Arc<dyn PrivilegeChecker>,
    clock: Arc<dyn WallClock>,
    runtime_cfg: CaptureRuntimeConfig,
    correlator_cfg: CorrelatorConfig,
    lsr_cfg: LsrConfig,
    sink: Arc<RingBuffer<EventScores>>,
    lsr_sink: Arc<RingBuffer<LsrScores>>,
    running: Option<Running>,
}

impl CaptureController {
    pub fn new(
        feed_factory: Arc<FeedFactory>,
        lookup: Arc<dyn ProcessLookup>,
        privilege: Arc<dyn PrivilegeChecker>,
        clock: Arc<dyn WallClock>,
        runtime_cfg: CaptureRuntimeConfig,
        correlator_cfg: CorrelatorConfig,
        lsr_cfg: LsrConfig,
    ) -> Self {
        Self {
            feed_factory,
            lookup,
            privilege,
            clock,
            runtime_cfg,
            correlator_cfg,
            lsr_cfg,
            sink: Arc::new(RingBuffer::new(1)),
            lsr_sink: Arc::new(RingBuffer::new(LSR_SINK_CAPACITY)),
            running: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn count(&self) -> usize {
        self.sink.count()
    }

    pub fn drain(&self, max: usize) -> (Vec<f64>, Vec<EventScores>) {
        self.sink.drain(max)
    }

    pub fn peek_tail(&self, max: usize) -> (Vec<f64>, Vec<EventScores>) {
        self.sink.peek_tail(max)
    }

    pub fn lsr_count(&self) -> usize {
        self.lsr_sink.count()
    }

    pub fn lsr_peek_tail(&self, max: usize) -> (Vec<f64>, Vec<LsrScores>) {
        self.lsr_sink.peek_tail(max)
    }

    /// `StartEventRecording`: validates arguments, checks privilege and
    /// current state, then spawns the worker. `target_pid == 0` captures
    /// every process, matching `IsTargetProcess`'s "no target" behavior.
    pub fn start(&mut self, target_pid: u32, buffer_size: i32) -> CoreResult<()> {
        if buffer_size <= 0 || buffer_size > self.runtime_cfg.max_buffer_size {
            return Err(CoreError::argument("buffer_size out of range"));
        }
        if self.running.is_some() {
            return Err(CoreError::already_running("capture already running"));
        }
        if !self.privilege.has_capture_privilege() {
            return Err(CoreError::privilege("process lacks capture privilege"));
        }

        self.sink = Arc::new(RingBuffer::new(buffer_size as usize));
        self.lsr_sink = Arc::new(RingBuffer::new(LSR_SINK_CAPACITY));

        let feed = (self.feed_factory)()?;

        let queue = Arc::new(StagingQueue::new());
        let mut session = TraceSession::new();
        for (id, cfg) in default_provider_table() {
            let handler: Arc<dyn Handler> = Arc::new(QueueHandler::new(provider_name(id), queue.clone()));
            if !session.add_provider_and_handler(id, cfg, handler) {
                return Err(CoreError::internal(format!("provider {} already registered", provider_name(id))));
            }
        }
        let nt_handler: Arc<dyn Handler> = Arc::new(QueueHandler::new(provider_name(NT_PROCESS_PROVIDER), queue.clone()));
        session.add_handler(NT_PROCESS_PROVIDER, nt_handler);

        let should_stop = Arc::new(AtomicBool::new(false));
        let should_stop_for_feed = should_stop.clone();
        session.initialize_realtime(
            "PresentMon",
            feed,
            Arc::new(move || should_stop_for_feed.load(Ordering::SeqCst)),
        )?;
        let perf_freq = session.frequency().max(1);

        let correlator_cfg = CorrelatorConfig { target_pid, ..self.correlator_cfg };
        let mut correlator = PresentCorrelator::new(correlator_cfg, self.lookup.clone(), self.clock.clone());
        let mut lsr_correlator = LsrCorrelator::new(self.lsr_cfg);

        let poll_interval = Duration::from_millis(self.runtime_cfg.worker_poll_interval_ms);
        let consume_join_timeout_ms = self.runtime_cfg.consume_thread_join_timeout_ms;
        let sink = self.sink.clone();
        let lsr_sink = self.lsr_sink.clone();
        let worker_stop = should_stop.clone();
        let ended_unexpectedly = Arc::new(AtomicBool::new(false));
        let ended_unexpectedly_for_worker = ended_unexpectedly.clone();

        let worker = std::thread::Builder::new()
            .name("swaptrace-worker".into())
            .spawn(move || {
                let processing_done = Arc::new(AtomicBool::new(false));
                let (result_tx, result_rx) = mpsc::channel();

                let processing_done_inner = processing_done.clone();
                let mut session = session;
                let processing = std::thread::Builder::new()
                    .name("swaptrace-consume".into())
                    .spawn(move || {
                        let outcome = session.run_consume_loop();
                        let lost = session.check_lost_reports();
                        processing_done_inner.store(true, Ordering::SeqCst);
                        let _ = result_tx.send((outcome, lost));
                    })
                    .expect("spawning the consume thread");

                let start = Instant::now();
                loop {
                    drain_and_correlate(
                        &queue,
                        &mut correlator,
                        &mut lsr_correlator,
                        &sink,
                        &lsr_sink,
                        perf_freq,
                        start.elapsed().as_millis() as u64,
                    );
                    correlator.refresh_processes(start.elapsed().as_millis() as u64);

                    if processing_done.load(Ordering::SeqCst) || worker_stop.load(Ordering::SeqCst) {
                        break;
                    }
                    std::thread::sleep(poll_interval);
                }

                drain_and_correlate(
                    &queue,
                    &mut correlator,
                    &mut lsr_correlator,
                    &sink,
                    &lsr_sink,
                    perf_freq,
                    start.elapsed().as_millis() as u64,
                );

                match result_rx.recv_timeout(Duration::from_millis(consume_join_timeout_ms)) {
                    Ok((Ok(clean_stop), (events_lost, buffers_lost, any_lost))) => {
                        if any_lost {
                            warn!("capture ended with {events_lost} lost events and {buffers_lost} lost buffers");
                        }
                        if !clean_stop {
                            error!("consume loop exited without an explicit stop request");
                            ended_unexpectedly_for_worker.store(true, Ordering::SeqCst);
                        }
                    }
                    Ok((Err(e), _)) => error!("consume loop failed: {e}"),
                    Err(_) => error!("consume thread did not report completion in time"),
                }

                if let Err(e) = processing.join() {
                    error!("consume thread panicked: {e:?}");
                }
            })
            .expect("spawning the capture worker thread");

        self.running = Some(Running { should_stop, ended_unexpectedly, worker });
        Ok(())
    }

    /// `StopEventRecording`: errors if nothing is running, otherwise flips
    /// the stop flag and joins the worker. Surfaces `ShouldQuitUnexpected` if
    /// the consume loop had already exited on its own, stop-flag still false,
    /// before this call — see the worker's `ended_unexpectedly` handoff.
    pub fn stop(&mut self) -> CoreResult<()> {
        let Some(running) = self.running.take() else {
            return Err(CoreError::not_running("capture is not running"));
        };
        running.should_stop.store(true, Ordering::SeqCst);
        if running.worker.join().is_err() {
            return Err(CoreError::stop_failed("capture worker thread panicked"));
        }
        debug!("capture stopped");
        if running.ended_unexpectedly.load(Ordering::SeqCst) {
            return Err(CoreError::should_quit_unexpected(
                "consume loop exited before stop() was called",
            ));
        }
        Ok(())
    }
}

fn drain_and_correlate(
    queue: &StagingQueue,
    correlator: &mut PresentCorrelator,
    lsr_correlator: &mut LsrCorrelator,
    sink: &RingBuffer<EventScores>,
    lsr_sink: &RingBuffer<LsrScores>,
    perf_freq: u64,
    now_ticks: u64,
) {
    let payloads = queue.drain_all();
    if payloads.is_empty() {
        return;
    }

    let mut presents = Vec::new();
    let mut reprojections = Vec::new();
    for payload in payloads {
        match payload {
            EventPayload::Present(p) => presents.push(p),
            EventPayload::Reprojection(r) => reprojections.push(r),
            EventPayload::ProcessStarted { process_id, image_name } => {
                correlator.notify_process_started(process_id, image_name, now_ticks);
            }
            EventPayload::ProcessStopped { process_id } => {
                correlator.notify_process_stopped(process_id);
            }
        }
    }

    if !presents.is_empty() {
        correlator.on_presents(&presents, now_ticks, perf_freq, sink);
    }
    if !reprojections.is_empty() {
        lsr_correlator.on_reprojections(&reprojections, perf_freq, lsr_sink);
    }
}
