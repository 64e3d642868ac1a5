//! Cancellation and deadline context for lifecycle dispatch.
//!
//! Start and stop hooks receive a [`Ctx`]; the engine bounds each hook
//! by the context deadline and abandons further dispatch once the
//! context reports cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

/// A token that signals cancellation across async operations.
///
/// Tokens form a chain: a child token observes its parent's
/// cancellation as well as its own, so an application-wide token can
/// fan out to per-phase contexts.
///
/// # Examples
///
/// ```rust
/// use appwire::CancellationToken;
///
/// let parent = CancellationToken::new();
/// let child = parent.child_token();
///
/// parent.cancel();
/// assert!(child.is_cancelled());
/// ```
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

struct TokenInner {
    cancelled: AtomicBool,
    parent: Option<CancellationToken>,
}

impl CancellationToken {
    /// Creates a new root token.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TokenInner {
                cancelled: AtomicBool::new(false),
                parent: None,
            }),
        }
    }

    /// Creates a child token cancelled when either it or this token is
    /// cancelled.
    pub fn child_token(&self) -> Self {
        Self {
            inner: Arc::new(TokenInner {
                cancelled: AtomicBool::new(false),
                parent: Some(self.clone()),
            }),
        }
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
    }

    /// Returns true once cancellation has been requested on this token
    /// or any ancestor.
    pub fn is_cancelled(&self) -> bool {
        if self.inner.cancelled.load(Ordering::Acquire) {
            return true;
        }
        if let Some(parent) = &self.inner.parent {
            return parent.is_cancelled();
        }
        false
    }

    /// Completes when cancellation is requested.
    ///
    /// Intended for `tokio::select!` inside hooks that want to honor
    /// cancellation mid-flight.
    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Execution context passed to `start`, `stop`, and every hook.
///
/// Combines a [`CancellationToken`] with an optional wall-clock
/// deadline. The lifecycle engine aborts an in-flight hook at the
/// deadline; cancellation is cooperative and takes effect between
/// hooks.
///
/// # Examples
///
/// ```rust
/// use appwire::Ctx;
/// use std::time::Duration;
///
/// let ctx = Ctx::with_timeout(Duration::from_secs(15));
/// assert!(!ctx.is_cancelled());
/// assert!(ctx.deadline().is_some());
/// ```
#[derive(Clone)]
pub struct Ctx {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Ctx {
    /// A context with no deadline and a fresh token.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    /// A context whose deadline is `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// A context driven by an existing token, with no deadline.
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Attaches a deadline `timeout` from now, keeping the token.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// The cancellation token backing this context.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// The absolute deadline, if one was set.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// True once the token is cancelled or the deadline has passed.
    pub fn is_cancelled(&self) -> bool {
        if self.token.is_cancelled() {
            return true;
        }
        match self.deadline {
            Some(deadline) => Instant::now() >= deadline,
            None => false,
        }
    }

    /// A child context sharing the deadline with a derived token.
    pub fn child(&self) -> Ctx {
        Ctx {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Requests cancellation on the backing token.
    pub fn cancel(&self) {
        self.token.cancel();
    }
}

impl Default for Ctx {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_basic() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn child_sees_parent_cancel() {
        let parent = CancellationToken::new();
        let child = parent.child_token();
        parent.cancel();
        assert!(child.is_cancelled());
    }

    #[test]
    fn child_cancel_leaves_parent() {
        let parent = CancellationToken::new();
        let child = parent.child_token();
        child.cancel();
        assert!(!parent.is_cancelled());
        assert!(child.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_counts_as_cancelled() {
        let ctx = Ctx::with_timeout(Duration::from_millis(10));
        assert!(!ctx.is_cancelled());
        tokio::time::advance(Duration::from_millis(20)).await;
        assert!(ctx.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_future_resolves() {
        let token = CancellationToken::new();
        let watcher = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            watcher.cancel();
        });
        token.cancelled().await;
        assert!(token.is_cancelled());
    }
}
