//! Shutdown signal fanout.
//!
//! A relay task subscribes to OS termination signals and forwards
//! them, together with programmatic [`Shutdowner::shutdown`] requests,
//! to every registered waiter channel. The last broadcast is retained
//! so waiters registered late still observe it.

use std::sync::{Arc, Mutex, Weak};
use std::time::Instant as StdInstant;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::ctx::{CancellationToken, Ctx};
use crate::error::{CoreError, CoreResult, HookPhase};

/// Operating-system termination signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsSignal {
    /// SIGINT / ctrl-c.
    Interrupt,
    /// SIGTERM (or the platform equivalent).
    Terminate,
}

impl std::fmt::Display for OsSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OsSignal::Interrupt => write!(f, "SIGINT"),
            OsSignal::Terminate => write!(f, "SIGTERM"),
        }
    }
}

/// What triggered a shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalSource {
    /// An OS signal observed by the relay.
    Os(OsSignal),
    /// A [`Shutdowner::shutdown`] call.
    Programmatic,
}

/// The value delivered to shutdown waiters.
///
/// Carries the trigger and the process exit code the application
/// should finish with (0 unless stamped via
/// [`exit_code`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownSignal {
    pub source: SignalSource,
    pub exit_code: i32,
}

impl ShutdownSignal {
    /// The OS-signal portion; programmatic shutdowns map to a
    /// synthetic interrupt.
    pub fn os_signal(&self) -> OsSignal {
        match self.source {
            SignalSource::Os(sig) => sig,
            SignalSource::Programmatic => OsSignal::Interrupt,
        }
    }
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.source {
            SignalSource::Os(sig) => write!(f, "{} (exit code {})", sig, self.exit_code),
            SignalSource::Programmatic => write!(f, "shutdown (exit code {})", self.exit_code),
        }
    }
}

struct RelayState {
    last: Option<ShutdownSignal>,
    full_waiters: Vec<mpsc::Sender<ShutdownSignal>>,
    os_waiters: Vec<mpsc::Sender<OsSignal>>,
    relay: Option<(CancellationToken, JoinHandle<()>)>,
}

/// The broadcaster behind [`App::wait`](crate::App::wait) and the
/// [`Shutdowner`] handle.
pub(crate) struct Relay {
    weak: Weak<Relay>,
    state: Mutex<RelayState>,
}

impl Relay {
    pub(crate) fn new() -> Arc<Relay> {
        Arc::new_cyclic(|weak| Relay {
            weak: weak.clone(),
            state: Mutex::new(RelayState {
                last: None,
                full_waiters: Vec::new(),
                os_waiters: Vec::new(),
                relay: None,
            }),
        })
    }

    /// Registers a waiter for full shutdown signals, seeded with the
    /// last broadcast if one happened already.
    pub(crate) fn wait(&self) -> mpsc::Receiver<ShutdownSignal> {
        let (tx, rx) = mpsc::channel(1);
        let mut state = self.state.lock().unwrap();
        if let Some(last) = state.last {
            let _ = tx.try_send(last);
        }
        state.full_waiters.push(tx);
        rx
    }

    /// Registers a waiter for the OS-signal portion only.
    pub(crate) fn done(&self) -> mpsc::Receiver<OsSignal> {
        let (tx, rx) = mpsc::channel(1);
        let mut state = self.state.lock().unwrap();
        if let Some(last) = state.last {
            let _ = tx.try_send(last.os_signal());
        }
        state.os_waiters.push(tx);
        rx
    }

    /// Spawns the OS-signal relay task. Idempotent.
    pub(crate) fn start(&self) {
        let mut state = self.state.lock().unwrap();
        if state.relay.is_some() {
            return;
        }
        let Some(relay) = self.weak.upgrade() else {
            return;
        };
        let token = CancellationToken::new();
        let watcher = token.clone();
        let handle = tokio::spawn(async move {
            relay_loop(relay, watcher).await;
        });
        state.relay = Some((token, handle));
    }

    /// Cancels the relay task and awaits it under the context deadline.
    pub(crate) async fn stop(&self, ctx: &Ctx) -> CoreResult<()> {
        let taken = {
            let mut state = self.state.lock().unwrap();
            state.relay.take()
        };
        let Some((token, mut handle)) = taken else {
            return Ok(());
        };
        token.cancel();
        let waited_from = StdInstant::now();
        match ctx.deadline() {
            Some(deadline) => {
                tokio::select! {
                    _ = &mut handle => Ok(()),
                    _ = tokio::time::sleep_until(deadline) => {
                        handle.abort();
                        Err(CoreError::Timeout {
                            phase: HookPhase::Stop,
                            waited: waited_from.elapsed(),
                        })
                    }
                }
            }
            None => {
                let _ = handle.await;
                Ok(())
            }
        }
    }

    /// Stamps `sig` as the last broadcast and fans it out to every
    /// registered waiter with non-blocking sends.
    ///
    /// Waiters whose buffer is full are counted into a
    /// [`CoreError::BlockedChannels`]; the broadcast itself still
    /// happened, `last` reflects it, and later subscribers are seeded.
    pub(crate) fn broadcast(&self, sig: ShutdownSignal) -> CoreResult<()> {
        let mut state = self.state.lock().unwrap();
        state.last = Some(sig);

        let mut unsent = 0usize;
        state.full_waiters.retain(|tx| match tx.try_send(sig) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                unsent += 1;
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
        let os_sig = sig.os_signal();
        state.os_waiters.retain(|tx| match tx.try_send(os_sig) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                unsent += 1;
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });

        let total = state.full_waiters.len() + state.os_waiters.len();
        if unsent > 0 {
            return Err(CoreError::BlockedChannels {
                signal: sig,
                unsent,
                total,
            });
        }
        Ok(())
    }

    fn broadcast_os(&self, sig: OsSignal) {
        let result = self.broadcast(ShutdownSignal {
            source: SignalSource::Os(sig),
            exit_code: 0,
        });
        if let Err(err) = result {
            tracing::warn!(target: "appwire", "signal relay: {}", err);
        }
    }
}

#[cfg(unix)]
async fn relay_loop(relay: Arc<Relay>, token: CancellationToken) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = match signal(SignalKind::interrupt()) {
        Ok(stream) => stream,
        Err(err) => {
            tracing::warn!(target: "appwire", "signal relay: cannot subscribe to SIGINT: {}", err);
            return;
        }
    };
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(err) => {
            tracing::warn!(target: "appwire", "signal relay: cannot subscribe to SIGTERM: {}", err);
            return;
        }
    };

    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = interrupt.recv() => relay.broadcast_os(OsSignal::Interrupt),
            _ = terminate.recv() => relay.broadcast_os(OsSignal::Terminate),
        }
    }
}

#[cfg(not(unix))]
async fn relay_loop(relay: Arc<Relay>, token: CancellationToken) {
    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            result = tokio::signal::ctrl_c() => {
                if result.is_ok() {
                    relay.broadcast_os(OsSignal::Interrupt);
                }
            }
        }
    }
}

/// Handle for requesting application shutdown from inside the graph.
///
/// Every application provides one; a producer or hook can take an
/// `Arc<Shutdowner>` dependency and call
/// [`shutdown`](Shutdowner::shutdown) to deliver a
/// [`ShutdownSignal`] to all waiters.
///
/// # Examples
///
/// ```rust
/// use appwire::{exit_code, App, Shutdowner, invoke};
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let app = App::new(invoke(|sd: Arc<Shutdowner>| {
///     sd.shutdown([exit_code(7)]).unwrap();
/// }));
/// assert!(app.err().is_none());
/// let mut waiter = app.wait();
/// assert_eq!(waiter.recv().await.unwrap().exit_code, 7);
/// # }
/// ```
#[derive(Clone)]
pub struct Shutdowner {
    relay: Arc<Relay>,
}

impl Shutdowner {
    pub(crate) fn new(relay: Arc<Relay>) -> Shutdowner {
        Shutdowner { relay }
    }

    /// Broadcasts a programmatic shutdown signal.
    ///
    /// Returns [`CoreError::BlockedChannels`] when some waiter buffers
    /// were full; the signal is still recorded as the last broadcast.
    pub fn shutdown(&self, opts: impl IntoIterator<Item = ShutdownOpt>) -> CoreResult<()> {
        let mut code = 0;
        for opt in opts {
            match opt.kind {
                ShutdownOptKind::ExitCode(n) => code = n,
            }
        }
        self.relay.broadcast(ShutdownSignal {
            source: SignalSource::Programmatic,
            exit_code: code,
        })
    }
}

enum ShutdownOptKind {
    ExitCode(i32),
}

/// Modifier for [`Shutdowner::shutdown`].
pub struct ShutdownOpt {
    kind: ShutdownOptKind,
}

/// Stamps the exit code carried by the broadcast signal.
pub fn exit_code(code: i32) -> ShutdownOpt {
    ShutdownOpt {
        kind: ShutdownOptKind::ExitCode(code),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn programmatic(code: i32) -> ShutdownSignal {
        ShutdownSignal {
            source: SignalSource::Programmatic,
            exit_code: code,
        }
    }

    #[tokio::test]
    async fn broadcast_reaches_existing_waiter() {
        let relay = Relay::new();
        let mut rx = relay.wait();
        relay.broadcast(programmatic(3)).unwrap();
        assert_eq!(rx.recv().await.unwrap().exit_code, 3);
    }

    #[tokio::test]
    async fn late_waiter_is_seeded_from_last() {
        let relay = Relay::new();
        relay.broadcast(programmatic(5)).unwrap();
        let mut rx = relay.wait();
        assert_eq!(rx.recv().await.unwrap().exit_code, 5);
    }

    #[tokio::test]
    async fn full_buffers_are_reported() {
        let relay = Relay::new();
        let mut a = relay.wait();
        let mut b = relay.wait();

        relay.broadcast(programmatic(7)).unwrap();
        let err = relay.broadcast(programmatic(7)).unwrap_err();
        match err {
            CoreError::BlockedChannels { unsent, total, .. } => {
                assert_eq!(unsent, 2);
                assert_eq!(total, 2);
            }
            other => panic!("unexpected error: {}", other),
        }

        assert_eq!(a.recv().await.unwrap().exit_code, 7);
        assert_eq!(b.recv().await.unwrap().exit_code, 7);
    }

    #[tokio::test]
    async fn dropped_waiters_are_pruned() {
        let relay = Relay::new();
        let rx = relay.wait();
        drop(rx);
        // A closed channel is not a blocked one.
        relay.broadcast(programmatic(0)).unwrap();
    }

    #[tokio::test]
    async fn done_delivers_os_portion() {
        let relay = Relay::new();
        let mut rx = relay.done();
        relay.broadcast(programmatic(9)).unwrap();
        assert_eq!(rx.recv().await.unwrap(), OsSignal::Interrupt);
    }

    #[tokio::test]
    async fn relay_start_is_idempotent_and_stops() {
        let relay = Relay::new();
        relay.start();
        relay.start();
        let ctx = Ctx::with_timeout(std::time::Duration::from_secs(1));
        relay.stop(&ctx).await.unwrap();
        // Stopping again is a no-op.
        relay.stop(&ctx).await.unwrap();
    }
}
