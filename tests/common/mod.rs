//! Shared test helpers.
#![allow(dead_code)]

use std::sync::{Arc, Mutex, Once};

use appwire::{Event, EventSink};

/// Installs the tracing subscriber once per test binary, so events
/// flowing through the default `TracingSink` show up under `RUST_LOG`.
pub fn setup_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Sink that records every event for later assertions.
pub struct RecordingSink {
    events: Arc<Mutex<Vec<Event>>>,
}

impl RecordingSink {
    pub fn new(events: Arc<Mutex<Vec<Event>>>) -> RecordingSink {
        RecordingSink { events }
    }
}

impl EventSink for RecordingSink {
    fn log_event(&self, event: &Event) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// A fresh shared event buffer plus a `with_logger` option writing
/// into it.
pub fn recording_logger() -> (Arc<Mutex<Vec<Event>>>, appwire::Opt) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink_events = events.clone();
    let opt = appwire::with_logger(move || RecordingSink::new(sink_events.clone()));
    (events, opt)
}

/// Renders recorded events to their variant names, for sequence
/// assertions.
pub fn event_names(events: &[Event]) -> Vec<&'static str> {
    events
        .iter()
        .map(|event| match event {
            Event::Provided { .. } => "Provided",
            Event::Supplied { .. } => "Supplied",
            Event::Decorated { .. } => "Decorated",
            Event::Replaced { .. } => "Replaced",
            Event::Invoking { .. } => "Invoking",
            Event::Invoked { .. } => "Invoked",
            Event::HookStarting { .. } => "HookStarting",
            Event::HookStarted { .. } => "HookStarted",
            Event::HookStopping { .. } => "HookStopping",
            Event::HookStopped { .. } => "HookStopped",
            Event::Started { .. } => "Started",
            Event::Stopping { .. } => "Stopping",
            Event::Stopped { .. } => "Stopped",
            Event::RollingBack { .. } => "RollingBack",
            Event::RolledBack { .. } => "RolledBack",
            Event::LoggerInitialized { .. } => "LoggerInitialized",
        })
        .collect()
}
