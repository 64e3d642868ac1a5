//! Wiring and lifecycle events.
//!
//! The container reports everything it does (registrations, invokes,
//! hook execution, shutdown) as [`Event`] values delivered to a
//! single [`EventSink`]. The default sink forwards to the `tracing`
//! facade; [`NopSink`] silences reporting; a custom sink can be built
//! from the graph itself with [`with_logger`](crate::with_logger).

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::shutdown::ShutdownSignal;

/// One observable step of the container's life.
///
/// Wire-time events (`Provided` through `Invoked`) fire while options
/// are applied and invokes run; run-time events cover hook dispatch
/// and shutdown. `err` fields carry the rendered error when the step
/// failed.
#[derive(Debug, Clone)]
pub enum Event {
    /// A constructor was registered.
    Provided {
        constructor: &'static str,
        outputs: Vec<String>,
        module: String,
        private: bool,
        err: Option<String>,
    },
    /// A pre-built value was registered.
    Supplied {
        type_name: &'static str,
        module: String,
        err: Option<String>,
    },
    /// A decorator was registered.
    Decorated {
        decorator: &'static str,
        outputs: Vec<String>,
        module: String,
        err: Option<String>,
    },
    /// A replacement value was registered.
    Replaced {
        outputs: Vec<String>,
        module: String,
        err: Option<String>,
    },
    /// An invoke target is about to run.
    Invoking {
        function: &'static str,
        module: String,
    },
    /// An invoke target finished.
    Invoked {
        function: &'static str,
        module: String,
        err: Option<String>,
        trace: Option<String>,
    },
    /// A start hook is about to run.
    HookStarting {
        caller: &'static str,
        callee: String,
    },
    /// A start hook finished.
    HookStarted {
        caller: &'static str,
        callee: String,
        runtime: Duration,
        err: Option<String>,
    },
    /// A stop hook is about to run.
    HookStopping {
        caller: &'static str,
        callee: String,
    },
    /// A stop hook finished.
    HookStopped {
        caller: &'static str,
        callee: String,
        runtime: Duration,
        err: Option<String>,
    },
    /// `start` returned.
    Started { err: Option<String> },
    /// A shutdown signal was received and stop is about to run.
    Stopping { signal: ShutdownSignal },
    /// `stop` returned.
    Stopped { err: Option<String> },
    /// A start failure is unwinding already-started hooks.
    RollingBack { start_err: String },
    /// The rollback finished.
    RolledBack { err: Option<String> },
    /// The custom event sink finished construction.
    LoggerInitialized {
        constructor: &'static str,
        err: Option<String>,
    },
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Provided { constructor, outputs, .. } => {
                write!(f, "provided {} from {}", outputs.join(", "), constructor)
            }
            Event::Supplied { type_name, .. } => write!(f, "supplied {}", type_name),
            Event::Decorated { outputs, decorator, .. } => {
                write!(f, "decorated {} with {}", outputs.join(", "), decorator)
            }
            Event::Replaced { outputs, .. } => write!(f, "replaced {}", outputs.join(", ")),
            Event::Invoking { function, .. } => write!(f, "invoking {}", function),
            Event::Invoked { function, err, .. } => match err {
                Some(err) => write!(f, "invoke {} failed: {}", function, err),
                None => write!(f, "invoked {}", function),
            },
            Event::HookStarting { caller, callee } => {
                write!(f, "starting hook {} from {}", callee, caller)
            }
            Event::HookStarted { callee, err, .. } => match err {
                Some(err) => write!(f, "hook {} failed to start: {}", callee, err),
                None => write!(f, "started hook {}", callee),
            },
            Event::HookStopping { caller, callee } => {
                write!(f, "stopping hook {} from {}", callee, caller)
            }
            Event::HookStopped { callee, err, .. } => match err {
                Some(err) => write!(f, "hook {} failed to stop: {}", callee, err),
                None => write!(f, "stopped hook {}", callee),
            },
            Event::Started { err } => match err {
                Some(err) => write!(f, "start failed: {}", err),
                None => write!(f, "started"),
            },
            Event::Stopping { signal } => write!(f, "stopping on {}", signal),
            Event::Stopped { err } => match err {
                Some(err) => write!(f, "stop failed: {}", err),
                None => write!(f, "stopped"),
            },
            Event::RollingBack { start_err } => write!(f, "rolling back: {}", start_err),
            Event::RolledBack { err } => match err {
                Some(err) => write!(f, "rollback finished with errors: {}", err),
                None => write!(f, "rolled back"),
            },
            Event::LoggerInitialized { constructor, err } => match err {
                Some(err) => write!(f, "logger from {} failed: {}", constructor, err),
                None => write!(f, "initialized logger from {}", constructor),
            },
        }
    }
}

/// Observer of container events.
///
/// Implementations must be cheap: events fire synchronously on the
/// wiring and lifecycle paths.
///
/// # Examples
///
/// ```rust
/// use appwire::{App, Event, EventSink, supply, with_logger};
///
/// struct CountingSink;
///
/// impl EventSink for CountingSink {
///     fn log_event(&self, event: &Event) {
///         eprintln!("container: {}", event);
///     }
/// }
///
/// let app = App::new((supply(1u8), with_logger(|| CountingSink)));
/// assert!(app.err().is_none());
/// ```
pub trait EventSink: Send + Sync {
    /// Receives one event.
    fn log_event(&self, event: &Event);
}

/// Sink that discards every event.
pub struct NopSink;

impl EventSink for NopSink {
    fn log_event(&self, _event: &Event) {}
}

/// Sink forwarding events to the `tracing` facade.
///
/// Failed steps log at `error`, hook and shutdown traffic at `debug`,
/// the rest at `info`.
pub struct TracingSink;

impl EventSink for TracingSink {
    fn log_event(&self, event: &Event) {
        let failed = matches!(
            event,
            Event::Provided { err: Some(_), .. }
                | Event::Supplied { err: Some(_), .. }
                | Event::Decorated { err: Some(_), .. }
                | Event::Replaced { err: Some(_), .. }
                | Event::Invoked { err: Some(_), .. }
                | Event::HookStarted { err: Some(_), .. }
                | Event::HookStopped { err: Some(_), .. }
                | Event::Started { err: Some(_) }
                | Event::Stopped { err: Some(_) }
                | Event::RolledBack { err: Some(_) }
                | Event::LoggerInitialized { err: Some(_), .. }
                | Event::RollingBack { .. }
        );
        if failed {
            tracing::error!(target: "appwire", "{}", event);
            return;
        }
        match event {
            Event::HookStarting { .. }
            | Event::HookStarted { .. }
            | Event::HookStopping { .. }
            | Event::HookStopped { .. } => {
                tracing::debug!(target: "appwire", "{}", event);
            }
            _ => tracing::info!(target: "appwire", "{}", event),
        }
    }
}

/// Graph-built sink wrapper; what a `with_logger` producer registers.
#[derive(Clone)]
pub(crate) struct SinkHandle(pub(crate) Arc<dyn EventSink>);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_compact() {
        let event = Event::Invoking {
            function: "setup",
            module: String::new(),
        };
        assert_eq!(event.to_string(), "invoking setup");
    }
}
