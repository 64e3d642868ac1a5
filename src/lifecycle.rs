//! Ordered start/stop lifecycle.
//!
//! Producers append [`Hook`]s while the graph is being resolved, so
//! the queue order transitively equals the topological order of the
//! dependency graph. Start walks the queue forward, stop walks the
//! started prefix backward, and a start failure rolls back the hooks
//! that already succeeded.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::ctx::Ctx;
use crate::error::{panic_to_error, BoxError, CoreError, CoreResult, HookPhase, Origin};
use crate::event::{Event, EventSink};

type HookFuture = Pin<Box<dyn Future<Output = Result<(), BoxError>> + Send>>;
type HookFn = Box<dyn FnOnce(Ctx) -> HookFuture + Send>;

/// A start/stop pair registered with the [`Lifecycle`].
///
/// Either side may be absent. Each side receives the phase [`Ctx`] and
/// runs to completion before the next hook is dispatched.
///
/// # Examples
///
/// ```rust
/// use appwire::{App, Hook, Lifecycle, provide, invoke};
/// use std::sync::Arc;
///
/// struct Server;
///
/// let app = App::new((
///     provide(|lc: Arc<Lifecycle>| {
///         lc.append(
///             Hook::new()
///                 .on_start(|_ctx| async { Ok(()) })
///                 .on_stop(|_ctx| async { Ok(()) }),
///         );
///         Server
///     }),
///     invoke(|_s: Arc<Server>| {}),
/// ));
/// assert!(app.err().is_none());
/// ```
pub struct Hook {
    origin: Origin,
    on_start: Option<HookFn>,
    on_stop: Option<HookFn>,
}

impl Hook {
    /// Creates an empty hook; chain [`on_start`](Hook::on_start) and
    /// [`on_stop`](Hook::on_stop) onto it.
    #[track_caller]
    pub fn new() -> Hook {
        Hook {
            origin: Origin::capture(),
            on_start: None,
            on_stop: None,
        }
    }

    /// Sets the start side.
    pub fn on_start<F, Fut>(mut self, f: F) -> Hook
    where
        F: FnOnce(Ctx) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.on_start = Some(Box::new(move |ctx| Box::pin(f(ctx))));
        self
    }

    /// Sets the stop side.
    pub fn on_stop<F, Fut>(mut self, f: F) -> Hook
    where
        F: FnOnce(Ctx) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.on_stop = Some(Box::new(move |ctx| Box::pin(f(ctx))));
        self
    }
}

impl Default for Hook {
    fn default() -> Self {
        Self::new()
    }
}

struct Slot {
    caller: &'static str,
    callee: String,
    on_start: Option<HookFn>,
    on_stop: Option<HookFn>,
}

struct Queue {
    slots: Vec<Slot>,
    // Index of the next hook to start; everything below it succeeded.
    cursor: usize,
    stopping: bool,
}

/// The process-wide hook queue, shared by every scope.
///
/// Injected into every application graph; producers take an
/// `Arc<Lifecycle>` dependency and [`append`](Lifecycle::append) their
/// hooks during construction.
pub struct Lifecycle {
    queue: Mutex<Queue>,
    current_caller: Mutex<Option<&'static str>>,
}

impl Lifecycle {
    pub(crate) fn new() -> Lifecycle {
        Lifecycle {
            queue: Mutex::new(Queue {
                slots: Vec::new(),
                cursor: 0,
                stopping: false,
            }),
            current_caller: Mutex::new(None),
        }
    }

    /// Appends a hook to the tail of the queue.
    ///
    /// Safe to call from inside a running start hook: hooks appended
    /// mid-start are dispatched in the same forward pass.
    pub fn append(&self, hook: Hook) {
        let caller = self.current_caller.lock().unwrap().unwrap_or("application");
        let mut queue = self.queue.lock().unwrap();
        queue.slots.push(Slot {
            caller,
            callee: hook.origin.to_string(),
            on_start: hook.on_start,
            on_stop: hook.on_stop,
        });
    }

    /// Number of appended hooks.
    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().slots.len()
    }

    /// True when no hooks were appended.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records which producer is currently executing, so appended
    /// hooks report it as their caller.
    pub(crate) fn set_caller(&self, name: Option<&'static str>) -> Option<&'static str> {
        std::mem::replace(&mut *self.current_caller.lock().unwrap(), name)
    }

    /// Runs start hooks forward from the cursor.
    ///
    /// On the first failure the already-started prefix is unwound via
    /// [`stop`](Lifecycle::stop) and the start error (chained with any
    /// rollback errors) is returned.
    pub(crate) async fn start(&self, ctx: &Ctx, events: &dyn EventSink) -> CoreResult<()> {
        let phase_start = Instant::now();
        loop {
            if ctx.token().is_cancelled() {
                return Err(CoreError::Timeout {
                    phase: HookPhase::Start,
                    waited: phase_start.elapsed(),
                });
            }

            let next = {
                let mut queue = self.queue.lock().unwrap();
                if queue.cursor >= queue.slots.len() {
                    break;
                }
                let cursor = queue.cursor;
                let slot = &mut queue.slots[cursor];
                (slot.caller, slot.callee.clone(), slot.on_start.take())
            };
            let (caller, callee, on_start) = next;

            if let Some(f) = on_start {
                events.log_event(&Event::HookStarting {
                    caller,
                    callee: callee.clone(),
                });
                let hook_start = Instant::now();
                let outcome = run_hook(f, ctx).await;
                let runtime = hook_start.elapsed();
                if let Err(outcome) = outcome {
                    let start_err = outcome.into_error(caller, HookPhase::Start);
                    events.log_event(&Event::HookStarted {
                        caller,
                        callee,
                        runtime,
                        err: Some(start_err.to_string()),
                    });
                    events.log_event(&Event::RollingBack {
                        start_err: start_err.to_string(),
                    });
                    let rollback = self.stop(ctx, events).await;
                    events.log_event(&Event::RolledBack {
                        err: rollback.as_ref().err().map(|e| e.to_string()),
                    });
                    return Err(match rollback {
                        Ok(()) => start_err,
                        Err(rollback_err) => CoreError::Multiple(vec![start_err, rollback_err]),
                    });
                }
                events.log_event(&Event::HookStarted {
                    caller,
                    callee,
                    runtime,
                    err: None,
                });
            }

            self.queue.lock().unwrap().cursor += 1;
        }
        Ok(())
    }

    /// Runs stop hooks backward from the cursor, best effort.
    ///
    /// Unlike start, a failing stop hook does not halt the walk; all
    /// errors are accumulated and returned together.
    pub(crate) async fn stop(&self, ctx: &Ctx, events: &dyn EventSink) -> CoreResult<()> {
        {
            let mut queue = self.queue.lock().unwrap();
            if queue.stopping {
                return Err(CoreError::hook_failed(
                    "lifecycle",
                    HookPhase::Stop,
                    "stop requested from inside a stop hook".into(),
                ));
            }
            queue.stopping = true;
        }

        let phase_start = Instant::now();
        let mut errors = Vec::new();
        loop {
            if ctx.token().is_cancelled() {
                errors.push(CoreError::Timeout {
                    phase: HookPhase::Stop,
                    waited: phase_start.elapsed(),
                });
                break;
            }

            let next = {
                let mut queue = self.queue.lock().unwrap();
                if queue.cursor == 0 {
                    break;
                }
                queue.cursor -= 1;
                let index = queue.cursor;
                let slot = &mut queue.slots[index];
                (slot.caller, slot.callee.clone(), slot.on_stop.take())
            };
            let (caller, callee, on_stop) = next;

            if let Some(f) = on_stop {
                events.log_event(&Event::HookStopping {
                    caller,
                    callee: callee.clone(),
                });
                let hook_start = Instant::now();
                let outcome = run_hook(f, ctx).await;
                let runtime = hook_start.elapsed();
                let err = outcome
                    .err()
                    .map(|outcome| outcome.into_error(caller, HookPhase::Stop));
                events.log_event(&Event::HookStopped {
                    caller,
                    callee,
                    runtime,
                    err: err.as_ref().map(|e| e.to_string()),
                });
                if let Some(err) = err {
                    errors.push(err);
                }
            }
        }

        self.queue.lock().unwrap().stopping = false;
        match CoreError::combine(errors) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

enum HookOutcome {
    Failed(BoxError),
    TimedOut(Duration),
}

impl HookOutcome {
    fn into_error(self, caller: &'static str, phase: HookPhase) -> CoreError {
        match self {
            HookOutcome::Failed(source) => CoreError::hook_failed(caller, phase, source),
            HookOutcome::TimedOut(waited) => CoreError::Timeout { phase, waited },
        }
    }
}

// Hooks run in a spawned task so a panicking hook surfaces as a join
// error instead of unwinding through the engine.
async fn run_hook(f: HookFn, ctx: &Ctx) -> Result<(), HookOutcome> {
    let mut handle = tokio::spawn(f(ctx.clone()));
    let started = Instant::now();
    let joined = match ctx.deadline() {
        Some(deadline) => {
            tokio::select! {
                res = &mut handle => res,
                _ = tokio::time::sleep_until(deadline) => {
                    handle.abort();
                    return Err(HookOutcome::TimedOut(started.elapsed()));
                }
            }
        }
        None => handle.await,
    };
    match joined {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(HookOutcome::Failed(err)),
        Err(join_err) if join_err.is_panic() => {
            Err(HookOutcome::Failed(panic_to_error(join_err.into_panic())))
        }
        Err(_) => Err(HookOutcome::Failed("hook task was cancelled".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::NopSink;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn recording_hook(log: &Arc<Mutex<Vec<String>>>, name: &'static str) -> Hook {
        let start_log = log.clone();
        let stop_log = log.clone();
        Hook::new()
            .on_start(move |_ctx| async move {
                start_log.lock().unwrap().push(format!("start:{name}"));
                Ok(())
            })
            .on_stop(move |_ctx| async move {
                stop_log.lock().unwrap().push(format!("stop:{name}"));
                Ok(())
            })
    }

    #[tokio::test]
    async fn start_forward_stop_reverse() {
        let lc = Lifecycle::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        lc.append(recording_hook(&log, "a"));
        lc.append(recording_hook(&log, "b"));

        let ctx = Ctx::new();
        lc.start(&ctx, &NopSink).await.unwrap();
        lc.stop(&ctx, &NopSink).await.unwrap();

        let entries = log.lock().unwrap().clone();
        assert_eq!(entries, vec!["start:a", "start:b", "stop:b", "stop:a"]);
    }

    #[tokio::test]
    async fn failed_start_rolls_back_started_prefix() {
        let lc = Lifecycle::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        lc.append(recording_hook(&log, "a"));
        let fail_log = log.clone();
        lc.append(
            Hook::new()
                .on_start(|_ctx| async { Err("boom".into()) })
                .on_stop(move |_ctx| async move {
                    fail_log.lock().unwrap().push("stop:failed".into());
                    Ok(())
                }),
        );

        let ctx = Ctx::new();
        let err = lc.start(&ctx, &NopSink).await.unwrap_err();
        assert!(err.to_string().contains("boom"));

        // The failing hook's own stop side must not run.
        let entries = log.lock().unwrap().clone();
        assert_eq!(entries, vec!["start:a", "stop:a"]);
    }

    #[tokio::test]
    async fn stop_accumulates_errors_best_effort() {
        let lc = Lifecycle::new();
        let stopped = Arc::new(AtomicUsize::new(0));
        let counter = stopped.clone();
        lc.append(Hook::new().on_stop(move |_ctx| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }));
        lc.append(Hook::new().on_stop(|_ctx| async { Err("cleanup failed".into()) }));

        let ctx = Ctx::new();
        lc.start(&ctx, &NopSink).await.unwrap();
        let err = lc.stop(&ctx, &NopSink).await.unwrap_err();
        assert!(err.to_string().contains("cleanup failed"));
        // The earlier hook still stopped despite the later failure.
        assert_eq!(stopped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn hooks_appended_mid_start_run_in_same_pass() {
        let lc = Arc::new(Lifecycle::new());
        let started = Arc::new(AtomicUsize::new(0));

        let inner_lc = lc.clone();
        let inner_count = started.clone();
        lc.append(Hook::new().on_start(move |_ctx| {
            let lc = inner_lc.clone();
            let count = inner_count.clone();
            async move {
                let late_count = count.clone();
                lc.append(Hook::new().on_start(move |_ctx| {
                    let late_count = late_count.clone();
                    async move {
                        late_count.fetch_add(10, Ordering::SeqCst);
                        Ok(())
                    }
                }));
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }));

        let ctx = Ctx::new();
        lc.start(&ctx, &NopSink).await.unwrap();
        assert_eq!(started.load(Ordering::SeqCst), 11);
    }

    #[tokio::test]
    async fn deadline_expiry_fails_start() {
        let lc = Lifecycle::new();
        lc.append(Hook::new().on_start(|_ctx| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }));

        let ctx = Ctx::with_timeout(Duration::from_millis(20));
        let err = lc.start(&ctx, &NopSink).await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::Timeout {
                phase: HookPhase::Start,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn cancellation_halts_between_hooks() {
        let lc = Lifecycle::new();
        let started = Arc::new(AtomicUsize::new(0));
        let ctx = Ctx::new();

        let count = started.clone();
        let cancel = ctx.clone();
        lc.append(Hook::new().on_start(move |_ctx| {
            let count = count.clone();
            let cancel = cancel.clone();
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                cancel.cancel();
                Ok(())
            }
        }));
        let count = started.clone();
        lc.append(Hook::new().on_start(move |_ctx| {
            let count = count.clone();
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }));

        let err = lc.start(&ctx, &NopSink).await.unwrap_err();
        assert!(matches!(err, CoreError::Timeout { .. }));
        // The second hook never dispatched.
        assert_eq!(started.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn panicking_hook_is_contained() {
        let lc = Lifecycle::new();
        lc.append(Hook::new().on_start(|_ctx| async { panic!("exploded") }));

        let ctx = Ctx::new();
        let err = lc.start(&ctx, &NopSink).await.unwrap_err();
        assert!(err.to_string().contains("exploded"));
    }
}
