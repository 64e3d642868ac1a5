//! The application: option application, wiring, and run loop.

use std::any::TypeId;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::ctx::Ctx;
use crate::error::{panic_to_error, CoreError, CoreResult, Origin};
use crate::event::{Event, EventSink, NopSink, SinkHandle, TracingSink};
use crate::extract::{Dep, DepShape};
use crate::graph::{Container, ScopeId, ROOT_SCOPE};
use crate::key::{Key, Qualifier};
use crate::lifecycle::Lifecycle;
use crate::options::{
    Annotations, DecorateSpec, ExitFn, IntoOpts, InvokeSpec, LoggerSpec, Opt, OptKind, ProvideSpec,
};
use crate::producer::{OutputKey, Producer, ValueProducer};
use crate::shutdown::{OsSignal, Relay, ShutdownSignal, Shutdowner, SignalSource};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// A wired application.
///
/// [`App::new`] applies the options to the root scope, validates the
/// graph, and runs the invoke targets, which drive resolution; any
/// error collected along the way parks in [`err`](App::err) and keeps
/// [`start`](App::start) from running. At run time the app drives the
/// shared [`Lifecycle`] forward on start, awaits a
/// [`ShutdownSignal`], and unwinds the lifecycle in reverse on stop.
///
/// Every application's graph automatically contains a
/// [`Lifecycle`] handle and a [`Shutdowner`].
///
/// # Examples
///
/// ```rust
/// use appwire::{invoke, provide, supply, App, Ctx};
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let mut app = App::new((
///     supply("hello".to_string()),
///     provide(|s: Arc<String>| s.len() as i64),
///     invoke(|n: Arc<i64>| assert_eq!(*n, 5)),
/// ));
/// assert!(app.err().is_none());
///
/// let ctx = Ctx::new();
/// app.start(&ctx).await.unwrap();
/// app.stop(&ctx).await.unwrap();
/// # }
/// ```
pub struct App {
    container: Container,
    lifecycle: Arc<Lifecycle>,
    relay: Arc<Relay>,
    sink: Arc<dyn EventSink>,
    wire_err: Option<CoreError>,
    start_timeout: Duration,
    stop_timeout: Duration,
    exit: Option<ExitFn>,
}

impl App {
    /// Applies `opts` to a fresh root scope and wires the graph.
    ///
    /// Accepts a single option, a tuple of options, or a `Vec<Opt>`.
    /// Never panics on misconfiguration: all wire-time errors
    /// accumulate into [`err`](App::err).
    pub fn new(opts: impl IntoOpts) -> App {
        let lifecycle = Arc::new(Lifecycle::new());
        let relay = Relay::new();
        let mut container = Container::new(lifecycle.clone());

        let mut wiring = Wiring {
            container: &mut container,
            lifecycle: &lifecycle,
            events: Vec::new(),
            errors: Vec::new(),
            invokes: Vec::new(),
            logger: None,
            nop_logger: false,
            start_timeout: DEFAULT_TIMEOUT,
            stop_timeout: DEFAULT_TIMEOUT,
            exit: None,
        };

        wiring.register_builtins(&relay);
        for opt in opts.into_opts() {
            wiring.apply(ROOT_SCOPE, opt);
        }
        let outcome = wiring.finish();

        App {
            container,
            lifecycle,
            relay,
            sink: outcome.sink,
            wire_err: outcome.wire_err,
            start_timeout: outcome.start_timeout,
            stop_timeout: outcome.stop_timeout,
            exit: outcome.exit,
        }
    }

    /// Any error accumulated while the graph was wired.
    pub fn err(&self) -> Option<&CoreError> {
        self.wire_err.as_ref()
    }

    /// Starts the signal relay and runs start hooks forward.
    ///
    /// Refuses to run while a wire-time error exists. On a hook
    /// failure the started prefix is rolled back and the start error
    /// is returned.
    pub async fn start(&mut self, ctx: &Ctx) -> CoreResult<()> {
        if let Some(err) = &self.wire_err {
            let err = err.clone();
            self.sink.log_event(&Event::Started {
                err: Some(err.to_string()),
            });
            return Err(err);
        }
        self.relay.start();
        let result = self.lifecycle.start(ctx, self.sink.as_ref()).await;
        self.sink.log_event(&Event::Started {
            err: result.as_ref().err().map(|e| e.to_string()),
        });
        result
    }

    /// Runs stop hooks in reverse and shuts the signal relay down.
    ///
    /// Best effort: every stop hook runs; errors are accumulated into
    /// a composite.
    pub async fn stop(&mut self, ctx: &Ctx) -> CoreResult<()> {
        let mut errors = Vec::new();
        if let Err(err) = self.lifecycle.stop(ctx, self.sink.as_ref()).await {
            errors.push(err);
        }
        if let Err(err) = self.relay.stop(ctx).await {
            errors.push(err);
        }
        let combined = CoreError::combine(errors);
        self.sink.log_event(&Event::Stopped {
            err: combined.as_ref().map(|e| e.to_string()),
        });
        match combined {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// A channel receiving every [`ShutdownSignal`] broadcast; seeded
    /// with the last broadcast when one already happened.
    pub fn wait(&self) -> mpsc::Receiver<ShutdownSignal> {
        self.relay.wait()
    }

    /// Like [`wait`](App::wait) but delivering only the OS-signal
    /// portion.
    pub fn done(&self) -> mpsc::Receiver<OsSignal> {
        self.relay.done()
    }

    /// A [`Shutdowner`] for this application.
    pub fn shutdowner(&self) -> Shutdowner {
        Shutdowner::new(self.relay.clone())
    }

    /// Starts the app, awaits a shutdown signal, stops, and exits the
    /// process with the signal's exit code (start failures exit 1).
    ///
    /// The exit function is injectable via
    /// [`with_exit`](crate::with_exit).
    pub async fn run(mut self) {
        let exit = self
            .exit
            .take()
            .unwrap_or_else(|| Box::new(|code| std::process::exit(code)));

        let start_ctx = Ctx::with_timeout(self.start_timeout);
        if self.start(&start_ctx).await.is_err() {
            exit(1);
            return;
        }

        let mut waiter = self.wait();
        let signal = waiter.recv().await.unwrap_or(ShutdownSignal {
            source: SignalSource::Programmatic,
            exit_code: 0,
        });
        self.sink.log_event(&Event::Stopping { signal });

        let stop_ctx = Ctx::with_timeout(self.stop_timeout);
        let _ = self.stop(&stop_ctx).await;
        exit(signal.exit_code);
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "App")?;
        if let Some(err) = &self.wire_err {
            writeln!(f, "wire error: {}", err)?;
        }
        self.container.dump(f)
    }
}

/// An invoke with its inputs rewritten, waiting for dispatch.
struct PendingInvoke {
    producer: Arc<dyn Producer>,
    deps: Vec<Dep>,
    scope: ScopeId,
    origin: Origin,
}

struct WiringOutcome {
    sink: Arc<dyn EventSink>,
    wire_err: Option<CoreError>,
    start_timeout: Duration,
    stop_timeout: Duration,
    exit: Option<ExitFn>,
}

/// Wire-time state: applies options, buffers events until the sink is
/// decided, and runs the invoke pass.
struct Wiring<'a> {
    container: &'a mut Container,
    lifecycle: &'a Arc<Lifecycle>,
    events: Vec<Event>,
    errors: Vec<CoreError>,
    invokes: Vec<PendingInvoke>,
    logger: Option<LoggerSpec>,
    nop_logger: bool,
    start_timeout: Duration,
    stop_timeout: Duration,
    exit: Option<ExitFn>,
}

impl<'a> Wiring<'a> {
    /// Every app's graph carries the lifecycle and shutdowner handles.
    fn register_builtins(&mut self, relay: &Arc<Relay>) {
        let lifecycle_value = ValueProducer::from_arc(
            self.lifecycle.clone() as Arc<dyn std::any::Any + Send + Sync>,
            Key::of::<Lifecycle>(),
        );
        let result = self.container.register_provider(
            ROOT_SCOPE,
            Arc::new(lifecycle_value),
            Vec::new(),
            vec![OutputKey {
                key: Key::of::<Lifecycle>(),
                entry_name: None,
            }],
            false,
            Origin::capture(),
        );
        debug_assert!(result.is_ok());

        let shutdowner = ValueProducer::new(Shutdowner::new(relay.clone()));
        let result = self.container.register_provider(
            ROOT_SCOPE,
            Arc::new(shutdowner),
            Vec::new(),
            vec![OutputKey {
                key: Key::of::<Shutdowner>(),
                entry_name: None,
            }],
            false,
            Origin::capture(),
        );
        debug_assert!(result.is_ok());
    }

    fn apply(&mut self, scope: ScopeId, opt: Opt) {
        match opt.kind {
            OptKind::Provide(spec) => self.apply_provide(scope, spec),
            OptKind::Invoke(spec) => self.apply_invoke(scope, spec),
            OptKind::Decorate(spec) => self.apply_decorate(scope, spec),
            OptKind::Module(name, opts) => {
                let child = self.container.add_scope(scope, name);
                for opt in opts {
                    self.apply(child, opt);
                }
            }
            OptKind::WireError(err) => self.errors.push(err),
            OptKind::NopLogger => {
                self.nop_logger = true;
                self.logger = None;
            }
            OptKind::WithLogger(spec) => {
                // Last logger option wins.
                self.nop_logger = false;
                self.logger = Some(spec);
            }
            OptKind::ShutdownTimeout(timeout) => self.stop_timeout = timeout,
            OptKind::StartTimeout(timeout) => self.start_timeout = timeout,
            OptKind::WithExit(exit) => self.exit = Some(exit),
        }
    }

    fn apply_provide(&mut self, scope: ScopeId, spec: ProvideSpec) {
        let module = self.container.module_path(scope).to_string();
        let constructor = spec.producer.fn_name();
        let supplied = spec.supplied;
        let private = spec.annotations.private;
        let result = self.register_provide(scope, &spec);
        let (outputs, err) = match result {
            Ok(outputs) => (outputs, None),
            Err(err) => {
                let rendered = err.to_string();
                self.errors.push(err);
                (Vec::new(), Some(rendered))
            }
        };
        if supplied {
            self.events.push(Event::Supplied {
                type_name: constructor,
                module,
                err,
            });
        } else {
            self.events.push(Event::Provided {
                constructor,
                outputs,
                module,
                private,
                err,
            });
        }
    }

    fn register_provide(&mut self, scope: ScopeId, spec: &ProvideSpec) -> CoreResult<Vec<String>> {
        let deps = rewrite_deps(spec.producer.deps(), &spec.annotations, spec.origin)?;
        let base = spec.producer.outputs();
        if base.is_empty() {
            return Err(CoreError::InvalidOption {
                reason: "provider declares no outputs".to_string(),
                origin: spec.origin,
            });
        }
        for key in &base {
            guard_output(key, spec.supplied, spec.origin)?;
        }
        let outputs = annotate_outputs(base, &spec.annotations);
        let names = outputs.iter().map(|o| o.key.to_string()).collect();
        self.container.register_provider(
            scope,
            spec.producer.clone(),
            deps,
            outputs,
            spec.annotations.private,
            spec.origin,
        )?;
        Ok(names)
    }

    fn apply_decorate(&mut self, scope: ScopeId, spec: DecorateSpec) {
        let module = self.container.module_path(scope).to_string();
        let decorator = spec.producer.fn_name();
        let replacement = spec.replacement;
        let result = self.register_decorate(scope, &spec);
        let (outputs, err) = match result {
            Ok(outputs) => (outputs, None),
            Err(err) => {
                let rendered = err.to_string();
                self.errors.push(err);
                (Vec::new(), Some(rendered))
            }
        };
        if replacement {
            self.events.push(Event::Replaced {
                outputs,
                module,
                err,
            });
        } else {
            self.events.push(Event::Decorated {
                decorator,
                outputs,
                module,
                err,
            });
        }
    }

    fn register_decorate(&mut self, scope: ScopeId, spec: &DecorateSpec) -> CoreResult<Vec<String>> {
        let deps = rewrite_deps(spec.producer.deps(), &spec.annotations, spec.origin)?;
        let base = spec.producer.outputs();
        if base.len() != 1 {
            return Err(CoreError::InvalidOption {
                reason: "decorator must produce exactly one value".to_string(),
                origin: spec.origin,
            });
        }
        let mut key = base.into_iter().next().unwrap_or_else(|| Key::of::<()>());
        if let Some(name) = spec.annotations.name {
            key = key.with_qualifier(Qualifier::Name(name));
        }
        guard_output(&key, false, spec.origin)?;

        let upstream = if spec.replacement {
            None
        } else {
            let position = deps
                .iter()
                .position(|dep| dep.shape == DepShape::One && dep.key == key);
            match position {
                Some(index) => Some(index),
                None => {
                    return Err(CoreError::InvalidOption {
                        reason: format!("decorator for {} must take it as an input", key),
                        origin: spec.origin,
                    })
                }
            }
        };

        self.container.register_decorator(
            scope,
            spec.producer.clone(),
            deps,
            key.clone(),
            upstream,
            spec.origin,
        )?;
        Ok(vec![key.to_string()])
    }

    fn apply_invoke(&mut self, scope: ScopeId, spec: InvokeSpec) {
        match rewrite_deps(spec.producer.deps(), &spec.annotations, spec.origin) {
            Ok(deps) => self.invokes.push(PendingInvoke {
                producer: spec.producer,
                deps,
                scope,
                origin: spec.origin,
            }),
            Err(err) => {
                self.events.push(Event::Invoked {
                    function: spec.producer.fn_name(),
                    module: self.container.module_path(scope).to_string(),
                    err: Some(err.to_string()),
                    trace: Some(spec.origin.to_string()),
                });
                self.errors.push(err);
            }
        }
    }

    /// Decides the sink, replays buffered events, and runs the invoke
    /// pass if wiring is clean so far.
    fn finish(mut self) -> WiringOutcome {
        let sink = self.initialize_sink();
        if self.errors.is_empty() {
            self.run_invokes(sink.as_ref());
        }

        WiringOutcome {
            sink,
            wire_err: CoreError::combine(self.errors),
            start_timeout: self.start_timeout,
            stop_timeout: self.stop_timeout,
            exit: self.exit,
        }
    }

    fn initialize_sink(&mut self) -> Arc<dyn EventSink> {
        let logger = self.logger.take();
        let sink: Arc<dyn EventSink> = match logger {
            Some(spec) => {
                let constructor = spec.producer.fn_name();
                match self.build_sink(&spec) {
                    Ok(sink) => {
                        self.replay(sink.as_ref());
                        sink.log_event(&Event::LoggerInitialized {
                            constructor,
                            err: None,
                        });
                        sink
                    }
                    Err(err) => {
                        let fallback: Arc<dyn EventSink> = Arc::new(TracingSink);
                        self.replay(fallback.as_ref());
                        fallback.log_event(&Event::LoggerInitialized {
                            constructor,
                            err: Some(err.to_string()),
                        });
                        self.errors.push(err);
                        fallback
                    }
                }
            }
            None if self.nop_logger => {
                let sink: Arc<dyn EventSink> = Arc::new(NopSink);
                self.replay(sink.as_ref());
                sink
            }
            None => {
                let sink: Arc<dyn EventSink> = Arc::new(TracingSink);
                self.replay(sink.as_ref());
                sink
            }
        };
        sink
    }

    fn build_sink(&mut self, spec: &LoggerSpec) -> CoreResult<Arc<dyn EventSink>> {
        let deps = spec.producer.deps();
        self.container.register_provider(
            ROOT_SCOPE,
            spec.producer.clone(),
            deps,
            vec![OutputKey {
                key: Key::of::<SinkHandle>(),
                entry_name: None,
            }],
            false,
            spec.origin,
        )?;
        let value =
            self.container
                .resolve_key(ROOT_SCOPE, &Key::of::<SinkHandle>(), "with_logger")?;
        match value.downcast::<SinkHandle>() {
            Ok(handle) => Ok(handle.0.clone()),
            Err(_) => Err(CoreError::InvalidOption {
                reason: "logger producer did not yield an event sink".to_string(),
                origin: spec.origin,
            }),
        }
    }

    fn replay(&mut self, sink: &dyn EventSink) {
        for event in self.events.drain(..) {
            sink.log_event(&event);
        }
    }

    fn run_invokes(&mut self, sink: &dyn EventSink) {
        let invokes = std::mem::take(&mut self.invokes);
        for pending in invokes {
            let function = pending.producer.fn_name();
            let module = self.container.module_path(pending.scope).to_string();
            sink.log_event(&Event::Invoking { function, module });
            let module = self.container.module_path(pending.scope).to_string();
            let result = self.run_invoke(&pending);
            sink.log_event(&Event::Invoked {
                function,
                module,
                err: result.as_ref().err().map(|e| e.to_string()),
                trace: result
                    .as_ref()
                    .err()
                    .map(|_| pending.origin.to_string()),
            });
            if let Err(err) = result {
                self.errors.push(err);
                break;
            }
        }
    }

    fn run_invoke(&mut self, pending: &PendingInvoke) -> CoreResult<()> {
        let name = pending.producer.fn_name();
        let mut inputs = Vec::with_capacity(pending.deps.len());
        for dep in &pending.deps {
            inputs.push(self.container.resolve_dep(pending.scope, dep, name)?);
        }

        let previous = self.lifecycle.set_caller(Some(name));
        let producer = pending.producer.clone();
        let called = catch_unwind(AssertUnwindSafe(move || producer.call(inputs)));
        self.lifecycle.set_caller(previous);

        match called {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(source)) => Err(CoreError::invoke_failed(name, pending.origin, source)),
            Err(payload) => Err(CoreError::invoke_failed(
                name,
                pending.origin,
                panic_to_error(payload),
            )),
        }
    }
}

/// Applies parameter annotations onto the extractor-declared deps.
fn rewrite_deps(
    mut deps: Vec<Dep>,
    annotations: &Annotations,
    origin: Origin,
) -> CoreResult<Vec<Dep>> {
    for &(index, name) in &annotations.param_names {
        if annotations.param_groups.iter().any(|&(i, _)| i == index) {
            return Err(CoreError::InvalidOption {
                reason: format!("parameter {} cannot carry both a name and a group", index),
                origin,
            });
        }
        let Some(dep) = deps.get_mut(index) else {
            return Err(CoreError::InvalidOption {
                reason: format!("parameter index {} is out of range", index),
                origin,
            });
        };
        if dep.shape != DepShape::One {
            return Err(CoreError::InvalidOption {
                reason: format!("parameter {} is a group input and cannot be named", index),
                origin,
            });
        }
        dep.key = dep.key.clone().with_qualifier(Qualifier::Name(name));
    }

    for &(index, tag) in &annotations.param_groups {
        let Some(dep) = deps.get_mut(index) else {
            return Err(CoreError::InvalidOption {
                reason: format!("parameter index {} is out of range", index),
                origin,
            });
        };
        if dep.shape == DepShape::One {
            return Err(CoreError::InvalidOption {
                reason: format!(
                    "parameter {} is not a group input; use Group<T> or GroupMap<T>",
                    index
                ),
                origin,
            });
        }
        dep.key = dep.key.clone().with_qualifier(Qualifier::Group(tag));
    }

    for &index in &annotations.soft {
        let Some(dep) = deps.get_mut(index) else {
            return Err(CoreError::InvalidOption {
                reason: format!("parameter index {} is out of range", index),
                origin,
            });
        };
        if dep.shape == DepShape::One {
            return Err(CoreError::InvalidOption {
                reason: format!("parameter {} is not a group input and cannot be soft", index),
                origin,
            });
        }
        dep.soft = true;
    }

    for dep in &deps {
        if dep.shape != DepShape::One {
            if let Qualifier::Group(tag) = dep.key.qualifier() {
                if tag.is_empty() {
                    return Err(CoreError::InvalidOption {
                        reason: "group parameter requires a param_group annotation".to_string(),
                        origin,
                    });
                }
            }
        }
    }

    Ok(deps)
}

fn annotate_outputs(base: Vec<Key>, annotations: &Annotations) -> Vec<OutputKey> {
    base.into_iter()
        .map(|key| match (annotations.name, annotations.group) {
            (None, None) => OutputKey {
                key,
                entry_name: None,
            },
            (Some(name), None) => OutputKey {
                key: key.with_qualifier(Qualifier::Name(name)),
                entry_name: None,
            },
            (None, Some(tag)) => OutputKey {
                key: key.with_qualifier(Qualifier::Group(tag)),
                entry_name: None,
            },
            (Some(name), Some(tag)) => OutputKey {
                key: key.with_qualifier(Qualifier::Group(tag)),
                entry_name: Some(name),
            },
        })
        .collect()
}

/// Rejects output shapes that cannot have been meant: `Result` slips
/// through `provide` when `try_provide` was intended, tuples through
/// `provide` when `provide_bundle` was, and supplied error values.
fn guard_output(key: &Key, supplied: bool, origin: Origin) -> CoreResult<()> {
    let name = key.display_name();
    if name.starts_with("core::result::Result<") {
        let reason = if supplied {
            "cannot supply a Result; supply the success value or use try_provide"
        } else {
            "fallible producers must be registered with try_provide"
        };
        return Err(CoreError::InvalidOption {
            reason: reason.to_string(),
            origin,
        });
    }
    if !supplied && name.starts_with('(') {
        return Err(CoreError::InvalidOption {
            reason: "multi-output producers must be registered with provide_bundle".to_string(),
            origin,
        });
    }
    if supplied
        && (key.type_id() == TypeId::of::<CoreError>()
            || (name.starts_with("alloc::boxed::Box<dyn") && name.contains("Error")))
    {
        return Err(CoreError::InvalidOption {
            reason: "cannot supply an error value".to_string(),
            origin,
        });
    }
    Ok(())
}
