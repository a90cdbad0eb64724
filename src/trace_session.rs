//! Subscribes to event providers, dispatches raw events to their registered
//! handler, and drives the blocking consume loop. The consume loop's source
//! of events (the actual OS tracing API) is injected as an [`EventFeed`] —
//! binding a real feed to a live OS session is outside the portable core.

use std::collections::HashMap;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use log::warn;
use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::error::{CoreError, CoreResult};
use crate::providers::{Handler, ProviderConfig, ProviderId, RawEvent};

/// A source of raw events driving [`TraceSession::run_consume_loop`]. Models
/// the OS tracing API's blocking consume call: `next_event` may block, and
/// returning `None` is the "buffer callback requested stop" / "file
/// exhausted" signal that ends the loop.
pub trait EventFeed: Send {
    fn frequency(&self) -> u64;
    fn next_event(&mut self) -> Option<RawEvent>;
    /// Cumulative (events lost, buffers lost) since the feed opened.
    fn lost_counts(&self) -> (u32, u32) {
        (0, 0)
    }
}

/// Replays a fixed, pre-recorded sequence of events — used by
/// `initialize_from_file` and by the deterministic test/demo harness.
pub struct RecordedFeed {
    frequency: u64,
    events: std::vec::IntoIter<RawEvent>,
}

impl RecordedFeed {
    pub fn new(frequency: u64, events: Vec<RawEvent>) -> Self {
        Self { frequency, events: events.into_iter() }
    }

    /// Reads one JSON-encoded [`RawEvent`] per line. The frequency is a
    /// caller-supplied constant since the recorded-event format this core
    /// reads carries no trace-level header of its own.
    pub fn from_jsonl(path: &Path, frequency: u64) -> CoreResult<Self> {
        let file = File::open(path)
            .map_err(|e| CoreError::resource(format!("opening {}: {e}", path.display())))?;
        let reader = BufReader::new(file);
        let mut events = Vec::new();
        for line in reader.lines() {
            let line = line.map_err(|e| CoreError::resource(format!("reading {}: {e}", path.display())))?;
            if line.trim().is_empty() {
                continue;
            }
            let event: RawEvent = serde_json::from_str(&line)
                .map_err(|e| CoreError::resource(format!("parsing {}: {e}", path.display())))?;
            events.push(event);
        }
        Ok(Self::new(frequency, events))
    }
}

impl EventFeed for RecordedFeed {
    fn frequency(&self) -> u64 {
        self.frequency
    }

    fn next_event(&mut self) -> Option<RawEvent> {
        self.events.next()
    }
}

/// Process-wide registry of active session names, standing in for the OS
/// tracing API's own notion of a named session being a process-wide
/// singleton. Used only to reproduce the collision-retry contract of
/// `initialize_realtime`.
static ACTIVE_SESSION_NAMES: Lazy<Mutex<HashSet<String>>> = Lazy::new(|| Mutex::new(HashSet::new()));

enum SessionState {
    Closed,
    Open {
        feed: Box<dyn EventFeed>,
        should_stop: Arc<dyn Fn() -> bool + Send + Sync>,
    },
}

pub struct TraceSession {
    providers: HashMap<ProviderId, ProviderConfig>,
    handlers: HashMap<ProviderId, Arc<dyn Handler>>,
    session_name: Option<String>,
    frequency: u64,
    events_lost_count: u32,
    buffers_lost_count: u32,
    start_time: Option<u64>,
    state: SessionState,
}

impl Default for TraceSession {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceSession {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
            handlers: HashMap::new(),
            session_name: None,
            frequency: 0,
            events_lost_count: 0,
            buffers_lost_count: 0,
            start_time: None,
            state: SessionState::Closed,
        }
    }

    pub fn frequency(&self) -> u64 {
        self.frequency
    }

    pub fn start_time(&self) -> Option<u64> {
        self.start_time
    }

    pub fn add_provider(&mut self, provider_id: ProviderId, config: ProviderConfig) -> bool {
        if self.providers.contains_key(&provider_id) {
            return false;
        }
        self.providers.insert(provider_id, config);
        true
    }

    pub fn add_handler(&mut self, provider_id: ProviderId, handler: Arc<dyn Handler>) -> bool {
        if self.handlers.contains_key(&provider_id) {
            return false;
        }
        self.handlers.insert(provider_id, handler);
        true
    }

    pub fn add_provider_and_handler(
        &mut self,
        provider_id: ProviderId,
        config: ProviderConfig,
        handler: Arc<dyn Handler>,
    ) -> bool {
        if !self.add_provider(provider_id, config) {
            return false;
        }
        if !self.add_handler(provider_id, handler) {
            self.remove_provider(provider_id);
            return false;
        }
        true
    }

    pub fn remove_provider(&mut self, provider_id: ProviderId) -> bool {
        self.providers.remove(&provider_id).is_some()
    }

    pub fn remove_handler(&mut self, provider_id: ProviderId) -> bool {
        self.handlers.remove(&provider_id).is_some()
    }

    pub fn remove_provider_and_handler(&mut self, provider_id: ProviderId) -> bool {
        let removed_provider = self.remove_provider(provider_id);
        let removed_handler = self.remove_handler(provider_id);
        removed_provider || removed_handler
    }

    /// Opens a real-time session under `session_name`. If a session by that
    /// name is already active, it is stopped and the start is retried once —
    /// matching `TraceSession::InitializeRealtime`'s `ERROR_ALREADY_EXISTS`
    /// handling.
    pub fn initialize_realtime(
        &mut self,
        session_name: &str,
        feed: Box<dyn EventFeed>,
        should_stop: Arc<dyn Fn() -> bool + Send + Sync>,
    ) -> CoreResult<()> {
        let mut names = ACTIVE_SESSION_NAMES.lock();
        if names.contains(session_name) {
            warn!("a trace session named {session_name} is already running and it will be stopped");
            names.remove(session_name);
        }
        names.insert(session_name.to_string());
        drop(names);

        self.frequency = feed.frequency();
        self.session_name = Some(session_name.to_string());
        self.events_lost_count = 0;
        self.buffers_lost_count = 0;
        self.start_time = None;
        self.state = SessionState::Open { feed, should_stop };
        Ok(())
    }

    /// Opens a session that replays a recorded event stream instead of a
    /// live OS session. No named-session bookkeeping applies.
    pub fn initialize_from_file(
        &mut self,
        path: &Path,
        frequency: u64,
        should_stop: Arc<dyn Fn() -> bool + Send + Sync>,
    ) -> CoreResult<()> {
        let feed = RecordedFeed::from_jsonl(path, frequency)?;
        self.frequency = feed.frequency();
        self.session_name = None;
        self.events_lost_count = 0;
        self.buffers_lost_count = 0;
        self.start_time = None;
        self.state = SessionState::Open { feed: Box::new(feed), should_stop };
        Ok(())
    }

    /// Closes the consume handle, disables every provider, and clears the
    /// registration tables. Idempotent.
    pub fn finalize(&mut self) {
        self.stop();
        self.providers.clear();
        self.handlers.clear();
        self.state = SessionState::Closed;
    }

    /// Stops the underlying session without touching registration tables.
    pub fn stop(&mut self) {
        if let Some(name) = self.session_name.take() {
            ACTIVE_SESSION_NAMES.lock().remove(&name);
        }
        self.state = SessionState::Closed;
    }

    /// Drives the blocking consume call: pulls events from the feed and
    /// dispatches each to its registered handler until the feed is exhausted
    /// or `should_stop` reports true. Returns `true` if the loop ended
    /// because `should_stop()` was observed true (a clean stop), `false` if
    /// it ended because the feed was exhausted while `should_stop` was still
    /// false (an unexpected end-of-stream).
    pub fn run_consume_loop(&mut self) -> CoreResult<bool> {
        let SessionState::Open { feed, should_stop } = &mut self.state else {
            return Err(CoreError::internal("run_consume_loop called without an open session"));
        };
        let should_stop = should_stop.clone();

        loop {
            if should_stop() {
                return Ok(true);
            }
            match feed.next_event() {
                Some(event) => {
                    if self.start_time.is_none() {
                        self.start_time = Some(event.timestamp);
                    }
                    if let Some(handler) = self.handlers.get(&event.provider_id) {
                        handler.dispatch(&event);
                    }
                }
                None => return Ok(should_stop()),
            }
        }
    }

    /// Queries cumulative event/buffer loss and returns the delta since the
    /// last query, alongside whether either delta is nonzero.
    pub fn check_lost_reports(&mut self) -> (u32, u32, bool) {
        let (events_cum, buffers_cum) = match &self.state {
            SessionState::Open { feed, .. } => feed.lost_counts(),
            SessionState::Closed => (0, 0),
        };
        let events_lost = events_cum.saturating_sub(self.events_lost_count);
        let buffers_lost = buffers_cum.saturating_sub(self.buffers_lost_count);
        self.events_lost_count = events_cum;
        self.buffers_lost_count = buffers_cum;
        (events_lost, buffers_lost, events_lost > 0 || buffers_lost > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{EventPayload, QueueHandler, StagingQueue, DXGI_PROVIDER};
    use crate::types::{PresentEvent, PresentResult};
    use std::sync::atomic::{AtomicBool, Ordering};

    fn present(process_id: u32, qpc: u64) -> RawEvent {
        RawEvent {
            provider_id: DXGI_PROVIDER,
            timestamp: qpc,
            payload: EventPayload::Present(PresentEvent {
                process_id,
                swap_chain_address: 1,
                qpc_time: qpc,
                ready_time: 0,
                screen_time: 0,
                time_taken: 0,
                final_state: PresentResult::Discarded,
            }),
        }
    }

    #[test]
    fn add_provider_rejects_duplicates() {
        let mut session = TraceSession::new();
        assert!(session.add_provider(DXGI_PROVIDER, ProviderConfig::new(4, 0, 0)));
        assert!(!session.add_provider(DXGI_PROVIDER, ProviderConfig::new(4, 0, 0)));
    }

    #[test]
    fn add_provider_and_handler_rolls_back_on_handler_conflict() {
        let mut session = TraceSession::new();
        let queue = Arc::new(StagingQueue::new());
        let handler: Arc<dyn Handler> = Arc::new(QueueHandler::new("dxgi", queue));
        assert!(session.add_handler(DXGI_PROVIDER, handler.clone()));

        // provider isn't registered yet, but the handler slot is taken, so
        // the pair must fail and roll the provider registration back.
        assert!(!session.add_provider_and_handler(DXGI_PROVIDER, ProviderConfig::new(4, 0, 0), handler));
        assert!(!session.providers.contains_key(&DXGI_PROVIDER));
    }

    #[test]
    fn consume_loop_dispatches_to_registered_handler_and_latches_start_time() {
        let mut session = TraceSession::new();
        let queue = Arc::new(StagingQueue::new());
        let handler: Arc<dyn Handler> = Arc::new(QueueHandler::new("dxgi", queue.clone()));
        session.add_provider_and_handler(DXGI_PROVIDER, ProviderConfig::new(4, 0, 0), handler);

        let events = vec![present(1, 100), present(1, 200)];
        let feed = RecordedFeed::new(10_000_000, events);
        let should_stop = Arc::new(AtomicBool::new(false));
        let stop_clone = should_stop.clone();
        session
            .initialize_realtime("test-session", Box::new(feed), Arc::new(move || stop_clone.load(Ordering::SeqCst)))
            .unwrap();

        let clean_stop = session.run_consume_loop().unwrap();
        assert!(!clean_stop, "feed exhausted while should_stop was false");
        assert_eq!(session.start_time(), Some(100));
        assert_eq!(queue.drain_all().len(), 2);
    }

    #[test]
    fn consume_loop_stops_cleanly_when_should_stop_flips() {
        let mut session = TraceSession::new();
        let should_stop = Arc::new(AtomicBool::new(true));
        let stop_clone = should_stop.clone();
        let feed = RecordedFeed::new(10_000_000, vec![present(1, 100)]);
        session
            .initialize_realtime("test-session-2", Box::new(feed), Arc::new(move || stop_clone.load(Ordering::SeqCst)))
            .unwrap();
        assert!(session.run_consume_loop().unwrap());
    }

    #[test]
    fn initialize_realtime_recovers_from_name_collision() {
        let mut first = TraceSession::new();
        let feed1 = RecordedFeed::new(10_000_000, vec![]);
        first
            .initialize_realtime("dup-session", Box::new(feed1), Arc::new(|| true))
            .unwrap();

        let mut second = TraceSession::new();
        let feed2 = RecordedFeed::new(10_000_000, vec![]);
        // Must succeed by stopping the first session's name registration.
        second
            .initialize_realtime("dup-session", Box::new(feed2), Arc::new(|| true))
            .unwrap();

        second.stop();
    }

    #[test]
    fn finalize_clears_registrations_and_is_idempotent() {
        let mut session = TraceSession::new();
        session.add_provider(DXGI_PROVIDER, ProviderConfig::new(4, 0, 0));
        session.finalize();
        assert!(session.providers.is_empty());
        session.finalize();
        assert!(session.providers.is_empty());
    }
}
