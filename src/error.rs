//! Error types for the application container.

use std::fmt;
use std::panic::Location;
use std::sync::Arc;
use std::time::Duration;

use crate::key::Key;
use crate::shutdown::ShutdownSignal;

/// Boxed error produced by user constructors and hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Shared error used as a cause inside [`CoreError`], so container
/// errors stay cloneable while preserving the source chain.
pub type ArcError = Arc<dyn std::error::Error + Send + Sync>;

/// Registration site captured when an option is constructed.
///
/// This is what duplicate-provider and producer-failure diagnostics
/// point at, so a misconfigured graph reads back to the line that
/// registered the offending constructor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Origin {
    location: &'static Location<'static>,
}

impl Origin {
    #[track_caller]
    pub(crate) fn capture() -> Origin {
        Origin {
            location: Location::caller(),
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.location.file(),
            self.location.line(),
            self.location.column()
        )
    }
}

/// Which side of the lifecycle an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    Start,
    Stop,
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookPhase::Start => write!(f, "start"),
            HookPhase::Stop => write!(f, "stop"),
        }
    }
}

/// Container errors.
///
/// Wire-time errors (registration and resolution) accumulate into
/// [`App::err`](crate::App::err); run-time errors surface from
/// `start`/`stop`. Causes are stored as [`ArcError`] so the whole sum
/// type stays cloneable.
///
/// # Examples
///
/// ```rust
/// use appwire::{App, CoreError, invoke};
/// use std::sync::Arc;
///
/// // Resolving a type nobody provides is a Missing error.
/// let app = App::new(invoke(|_n: Arc<u32>| {}));
/// match app.err() {
///     Some(CoreError::Missing { key, .. }) => assert_eq!(key.display_name(), "u32"),
///     other => panic!("unexpected: {:?}", other),
/// }
/// ```
#[derive(Debug, Clone)]
pub enum CoreError {
    /// The resolver re-entered a dependency chain; the path lists the
    /// keys from the first request back around to the repeat.
    Cycle { path: Vec<Key> },
    /// No provider exists for a required input.
    Missing { key: Key, consumer: &'static str },
    /// Two non-group providers for the same key in one scope.
    Duplicate {
        key: Key,
        existing: Origin,
        new: Origin,
    },
    /// A second decorator for the same key in one scope.
    AlreadyDecorated { key: Key, scope: String },
    /// A producer returned an error or panicked.
    ProducerFailed {
        key: Key,
        origin: Origin,
        source: ArcError,
    },
    /// Misuse of an option at registration time.
    InvalidOption { reason: String, origin: Origin },
    /// An invoke target returned an error or panicked.
    InvokeFailed {
        function: &'static str,
        origin: Origin,
        source: ArcError,
    },
    /// A lifecycle hook returned an error or panicked.
    HookFailed {
        caller: &'static str,
        phase: HookPhase,
        source: ArcError,
    },
    /// A lifecycle phase ran out of its deadline.
    Timeout { phase: HookPhase, waited: Duration },
    /// A shutdown broadcast could not reach every waiter.
    BlockedChannels {
        signal: ShutdownSignal,
        unsent: usize,
        total: usize,
    },
    /// Several errors accumulated from one operation.
    Multiple(Vec<CoreError>),
}

impl CoreError {
    pub(crate) fn producer_failed(key: Key, origin: Origin, source: BoxError) -> CoreError {
        CoreError::ProducerFailed {
            key,
            origin,
            source: Arc::from(source),
        }
    }

    pub(crate) fn invoke_failed(function: &'static str, origin: Origin, source: BoxError) -> CoreError {
        CoreError::InvokeFailed {
            function,
            origin,
            source: Arc::from(source),
        }
    }

    pub(crate) fn hook_failed(caller: &'static str, phase: HookPhase, source: BoxError) -> CoreError {
        CoreError::HookFailed {
            caller,
            phase,
            source: Arc::from(source),
        }
    }

    /// Collapses an error list: none, one, or `Multiple`.
    pub(crate) fn combine(mut errors: Vec<CoreError>) -> Option<CoreError> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(CoreError::Multiple(errors)),
        }
    }

    /// True when this is (or contains only) a cycle report.
    pub fn is_cycle(&self) -> bool {
        match self {
            CoreError::Cycle { .. } => true,
            CoreError::Multiple(errs) => errs.iter().any(CoreError::is_cycle),
            _ => false,
        }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::Cycle { path } => {
                let chain: Vec<String> = path.iter().map(|k| k.to_string()).collect();
                write!(f, "dependency cycle: {}", chain.join(" -> "))
            }
            CoreError::Missing { key, consumer } => {
                write!(f, "missing provider for {} (required by {})", key, consumer)
            }
            CoreError::Duplicate { key, existing, new } => write!(
                f,
                "duplicate provider for {}: already registered at {}, duplicate at {}",
                key, existing, new
            ),
            CoreError::AlreadyDecorated { key, scope } => {
                write!(f, "{} is already decorated in scope {:?}", key, scope)
            }
            CoreError::ProducerFailed { key, origin, source } => {
                write!(f, "building {} (registered at {}): {}", key, origin, source)
            }
            CoreError::InvalidOption { reason, origin } => {
                write!(f, "invalid option at {}: {}", origin, reason)
            }
            CoreError::InvokeFailed { function, origin, source } => {
                write!(f, "invoke {} (registered at {}): {}", function, origin, source)
            }
            CoreError::HookFailed { caller, phase, source } => {
                write!(f, "{} hook from {} failed: {}", phase, caller, source)
            }
            CoreError::Timeout { phase, waited } => {
                write!(f, "{} deadline exceeded after {:?}", phase, waited)
            }
            CoreError::BlockedChannels { signal, unsent, total } => write!(
                f,
                "shutdown broadcast {} dropped for {}/{} waiters with full buffers",
                signal, unsent, total
            ),
            CoreError::Multiple(errors) => {
                write!(f, "{} errors occurred:", errors.len())?;
                for err in errors {
                    write!(f, "\n  - {}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for CoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CoreError::ProducerFailed { source, .. }
            | CoreError::InvokeFailed { source, .. }
            | CoreError::HookFailed { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

/// Result type for container operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Renders a panic payload into a boxed error.
pub(crate) fn panic_to_error(payload: Box<dyn std::any::Any + Send>) -> BoxError {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    };
    format!("panic: {}", message).into()
}
