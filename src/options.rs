//! Application options.
//!
//! An application is assembled from option values: constructors to
//! [`provide`], functions to [`invoke`], values to [`supply`],
//! transformations to [`decorate`], and [`module`]s bundling options
//! into a named child scope. Options compose as tuples, so an app
//! reads as one expression:
//!
//! ```rust
//! use appwire::{App, invoke, provide, supply};
//! use std::sync::Arc;
//!
//! let app = App::new((
//!     supply("hello".to_string()),
//!     provide(|s: Arc<String>| s.len() as i64),
//!     invoke(|n: Arc<i64>| assert_eq!(*n, 5)),
//! ));
//! assert!(app.err().is_none());
//! ```

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use crate::error::{BoxError, CoreError, Origin};
use crate::producer::{
    IntoBundleProvider, IntoInvoke, IntoProvider, IntoSinkProducer, IntoTryBundleProvider,
    IntoTryProvider, Producer, ValueProducer,
};

/// Annotations shared by provider-shaped options.
pub(crate) struct Annotations {
    pub name: Option<&'static str>,
    pub group: Option<&'static str>,
    pub private: bool,
    pub param_names: Vec<(usize, &'static str)>,
    pub param_groups: Vec<(usize, &'static str)>,
    pub soft: Vec<usize>,
}

impl Annotations {
    fn new() -> Annotations {
        Annotations {
            name: None,
            group: None,
            private: false,
            param_names: Vec::new(),
            param_groups: Vec::new(),
            soft: Vec::new(),
        }
    }
}

pub(crate) struct ProvideSpec {
    pub producer: Arc<dyn Producer>,
    pub annotations: Annotations,
    pub origin: Origin,
    /// True for `supply`, which reports a `Supplied` event.
    pub supplied: bool,
}

pub(crate) struct InvokeSpec {
    pub producer: Arc<dyn Producer>,
    pub annotations: Annotations,
    pub origin: Origin,
}

pub(crate) struct DecorateSpec {
    pub producer: Arc<dyn Producer>,
    pub annotations: Annotations,
    pub origin: Origin,
    /// True for `replace`, which ignores the upstream value and
    /// reports a `Replaced` event.
    pub replacement: bool,
}

pub(crate) struct LoggerSpec {
    pub producer: Arc<dyn Producer>,
    pub origin: Origin,
}

pub(crate) type ExitFn = Box<dyn FnOnce(i32) + Send>;

pub(crate) enum OptKind {
    Provide(ProvideSpec),
    Invoke(InvokeSpec),
    Decorate(DecorateSpec),
    Module(&'static str, Vec<Opt>),
    WireError(CoreError),
    NopLogger,
    WithLogger(LoggerSpec),
    ShutdownTimeout(Duration),
    StartTimeout(Duration),
    WithExit(ExitFn),
}

/// One erased application option.
///
/// Built from the constructor functions in this module; applied in
/// order by [`App::new`](crate::App::new).
pub struct Opt {
    pub(crate) kind: OptKind,
}

/// Registers a constructor: `Fn(deps…) -> T`.
///
/// Dependencies are declared through parameter types (`Arc<T>`,
/// `Option<Arc<T>>`, [`Group<T>`](crate::Group),
/// [`GroupMap<T>`](crate::GroupMap)); the output type is registered
/// under its own key. Construction is lazy and memoized: the function
/// runs at most once, when something first needs its output.
///
/// # Examples
///
/// ```rust
/// use appwire::{App, invoke, provide, supply};
/// use std::sync::Arc;
///
/// struct Config { workers: usize }
/// struct Pool { size: usize }
///
/// let app = App::new((
///     supply(Config { workers: 4 }),
///     provide(|cfg: Arc<Config>| Pool { size: cfg.workers }),
///     invoke(|pool: Arc<Pool>| assert_eq!(pool.size, 4)),
/// ));
/// assert!(app.err().is_none());
/// ```
#[track_caller]
pub fn provide<M>(f: impl IntoProvider<M>) -> Provide {
    Provide {
        spec: ProvideSpec {
            producer: f.into_producer(),
            annotations: Annotations::new(),
            origin: Origin::capture(),
            supplied: false,
        },
    }
}

/// Registers a fallible constructor: `Fn(deps…) -> Result<T, E>`.
///
/// An `Err` return fails the resolution that needed the value,
/// wrapped with the registration site.
#[track_caller]
pub fn try_provide<M>(f: impl IntoTryProvider<M>) -> Provide {
    Provide {
        spec: ProvideSpec {
            producer: f.into_producer(),
            annotations: Annotations::new(),
            origin: Origin::capture(),
            supplied: false,
        },
    }
}

/// Registers a multi-output constructor: `Fn(deps…) -> (T1, T2, …)`.
///
/// Each tuple element becomes its own logical provider; the function
/// still runs once, with all outputs cached together.
#[track_caller]
pub fn provide_bundle<M>(f: impl IntoBundleProvider<M>) -> Provide {
    Provide {
        spec: ProvideSpec {
            producer: f.into_producer(),
            annotations: Annotations::new(),
            origin: Origin::capture(),
            supplied: false,
        },
    }
}

/// Fallible variant of [`provide_bundle`].
#[track_caller]
pub fn try_provide_bundle<M>(f: impl IntoTryBundleProvider<M>) -> Provide {
    Provide {
        spec: ProvideSpec {
            producer: f.into_producer(),
            annotations: Annotations::new(),
            origin: Origin::capture(),
            supplied: false,
        },
    }
}

/// Registers a pre-built value as a zero-argument provider.
///
/// Supplying an error value is rejected at wire time.
#[track_caller]
pub fn supply<T: Send + Sync + 'static>(value: T) -> Supply {
    Supply {
        spec: ProvideSpec {
            producer: Arc::new(ValueProducer::new(value)),
            annotations: Annotations::new(),
            origin: Origin::capture(),
            supplied: true,
        },
    }
}

/// Schedules a function to run at wire time: `Fn(deps…)` or
/// `Fn(deps…) -> Result<(), E>`.
///
/// Invokes are the roots of the graph: resolution happens because an
/// invoke (or another resolved producer) needs a value. They run in
/// declaration order once all options are applied.
#[track_caller]
pub fn invoke<M>(f: impl IntoInvoke<M>) -> Invoke {
    Invoke {
        spec: InvokeSpec {
            producer: f.into_producer(),
            annotations: Annotations::new(),
            origin: Origin::capture(),
        },
    }
}

/// Registers a decorator: `Fn(deps…) -> T` where one input is `Arc<T>`.
///
/// Within the scope it is declared in (and that scope's descendants),
/// consumers of `T` observe the decorated value; ancestor scopes keep
/// the original. The `Arc<T>` input receives the upstream value
/// rather than re-entering resolution.
#[track_caller]
pub fn decorate<M>(f: impl IntoProvider<M>) -> Decorate {
    Decorate {
        spec: DecorateSpec {
            producer: f.into_producer(),
            annotations: Annotations::new(),
            origin: Origin::capture(),
            replacement: false,
        },
    }
}

/// Fallible variant of [`decorate`].
#[track_caller]
pub fn try_decorate<M>(f: impl IntoTryProvider<M>) -> Decorate {
    Decorate {
        spec: DecorateSpec {
            producer: f.into_producer(),
            annotations: Annotations::new(),
            origin: Origin::capture(),
            replacement: false,
        },
    }
}

/// Replaces the resolved value of the value's type within the current
/// scope subtree; a zero-argument decorator that ignores upstream.
#[track_caller]
pub fn replace<T: Send + Sync + 'static>(value: T) -> Decorate {
    Decorate {
        spec: DecorateSpec {
            producer: Arc::new(ValueProducer::new(value)),
            annotations: Annotations::new(),
            origin: Origin::capture(),
            replacement: true,
        },
    }
}

/// Groups options into a named child scope.
///
/// Non-private providers inside a module are visible to the whole
/// application; private providers and all decorators apply to the
/// module subtree only. Modules nest arbitrarily.
///
/// # Examples
///
/// ```rust
/// use appwire::{decorate, invoke, module, supply, App};
/// use std::sync::Arc;
///
/// #[derive(Clone)]
/// struct Greeting(&'static str);
///
/// let app = App::new((
///     supply(Greeting("hello")),
///     module(
///         "shouty",
///         (
///             decorate(|g: Arc<Greeting>| Greeting(if g.0 == "hello" { "HELLO" } else { g.0 })),
///             invoke(|g: Arc<Greeting>| assert_eq!(g.0, "HELLO")),
///         ),
///     ),
///     invoke(|g: Arc<Greeting>| assert_eq!(g.0, "hello")),
/// ));
/// assert!(app.err().is_none());
/// ```
pub fn module(name: &'static str, opts: impl IntoOpts) -> Opt {
    Opt {
        kind: OptKind::Module(name, opts.into_opts()),
    }
}

/// Injects an error into the application's wire-time error set,
/// preventing `start` from running.
#[track_caller]
pub fn wire_error(err: impl Into<BoxError>) -> Opt {
    Opt {
        kind: OptKind::WireError(CoreError::InvalidOption {
            reason: err.into().to_string(),
            origin: Origin::capture(),
        }),
    }
}

/// Silences event reporting.
pub fn nop_logger() -> Opt {
    Opt {
        kind: OptKind::NopLogger,
    }
}

/// Builds the event sink from the graph itself: `Fn(deps…) -> S`
/// where `S` implements [`EventSink`](crate::EventSink).
///
/// Events emitted before the sink exists are buffered and replayed to
/// it once construction succeeds.
#[track_caller]
pub fn with_logger<M>(f: impl IntoSinkProducer<M>) -> Opt {
    Opt {
        kind: OptKind::WithLogger(LoggerSpec {
            producer: f.into_producer(),
            origin: Origin::capture(),
        }),
    }
}

/// Sets the deadline [`run`](crate::App::run) grants `stop`.
pub fn shutdown_timeout(timeout: Duration) -> Opt {
    Opt {
        kind: OptKind::ShutdownTimeout(timeout),
    }
}

/// Sets the deadline [`run`](crate::App::run) grants `start`.
pub fn start_timeout(timeout: Duration) -> Opt {
    Opt {
        kind: OptKind::StartTimeout(timeout),
    }
}

/// Replaces the process-exit function used by
/// [`run`](crate::App::run); primarily for tests.
pub fn with_exit(f: impl FnOnce(i32) + Send + 'static) -> Opt {
    Opt {
        kind: OptKind::WithExit(Box::new(f)),
    }
}

/// Receives a resolved value out of the graph.
///
/// Create a slot, pass [`populate`] as an option, and read the value
/// after `App::new` returns.
///
/// # Examples
///
/// ```rust
/// use appwire::{populate, supply, App, Slot};
///
/// let slot: Slot<String> = Slot::new();
/// let app = App::new((supply("ready".to_string()), populate(&slot)));
/// assert!(app.err().is_none());
/// assert_eq!(slot.get().unwrap().as_str(), "ready");
/// ```
pub struct Slot<T> {
    cell: Arc<OnceLock<Arc<T>>>,
}

impl<T> Slot<T> {
    /// Creates an empty slot.
    pub fn new() -> Slot<T> {
        Slot {
            cell: Arc::new(OnceLock::new()),
        }
    }

    /// The populated value, if wiring reached it.
    pub fn get(&self) -> Option<Arc<T>> {
        self.cell.get().cloned()
    }
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        Slot {
            cell: self.cell.clone(),
        }
    }
}

/// Resolves `T` and stores it into `slot`; an invoke under the hood.
#[track_caller]
pub fn populate<T: Send + Sync + 'static>(slot: &Slot<T>) -> Invoke {
    let cell = slot.cell.clone();
    invoke(move |value: Arc<T>| {
        let _ = cell.set(value);
    })
}

macro_rules! annotation_methods {
    (params) => {
        /// Rewrites input `index` to consume the key published under
        /// `name`.
        pub fn param_name(mut self, index: usize, name: &'static str) -> Self {
            self.spec.annotations.param_names.push((index, name));
            self
        }

        /// Rewrites input `index` to consume the value group labeled
        /// `tag`; the parameter must be a
        /// [`Group`](crate::Group) or [`GroupMap`](crate::GroupMap).
        pub fn param_group(mut self, index: usize, tag: &'static str) -> Self {
            self.spec.annotations.param_groups.push((index, tag));
            self
        }

        /// Marks group input `index` as soft: an empty group resolves
        /// to an empty collection instead of an error.
        pub fn soft(mut self, index: usize) -> Self {
            self.spec.annotations.soft.push(index);
            self
        }
    };
}

/// Builder returned by [`provide`] and friends.
pub struct Provide {
    pub(crate) spec: ProvideSpec,
}

impl Provide {
    /// Publishes the outputs under `name`.
    pub fn name(mut self, name: &'static str) -> Self {
        self.spec.annotations.name = Some(name);
        self
    }

    /// Contributes the outputs to the value group labeled `tag`.
    /// Combined with [`name`](Provide::name), the contribution carries
    /// an entry name for map-shaped consumption.
    pub fn group(mut self, tag: &'static str) -> Self {
        self.spec.annotations.group = Some(tag);
        self
    }

    /// Restricts visibility of the outputs to the declaring scope and
    /// its descendants.
    pub fn private(mut self) -> Self {
        self.spec.annotations.private = true;
        self
    }

    annotation_methods!(params);
}

/// Builder returned by [`supply`].
pub struct Supply {
    pub(crate) spec: ProvideSpec,
}

impl Supply {
    /// Publishes the value under `name`.
    pub fn name(mut self, name: &'static str) -> Self {
        self.spec.annotations.name = Some(name);
        self
    }

    /// Contributes the value to the group labeled `tag`.
    pub fn group(mut self, tag: &'static str) -> Self {
        self.spec.annotations.group = Some(tag);
        self
    }

    /// Restricts visibility to the declaring scope subtree.
    pub fn private(mut self) -> Self {
        self.spec.annotations.private = true;
        self
    }
}

/// Builder returned by [`invoke`] and [`populate`].
pub struct Invoke {
    pub(crate) spec: InvokeSpec,
}

impl Invoke {
    annotation_methods!(params);
}

/// Builder returned by [`decorate`], [`try_decorate`], and
/// [`replace`].
pub struct Decorate {
    pub(crate) spec: DecorateSpec,
}

impl Decorate {
    /// Targets the key published under `name` instead of the plain
    /// key.
    pub fn name(mut self, name: &'static str) -> Self {
        self.spec.annotations.name = Some(name);
        self
    }

    annotation_methods!(params);
}

impl From<Provide> for Opt {
    fn from(value: Provide) -> Opt {
        Opt {
            kind: OptKind::Provide(value.spec),
        }
    }
}

impl From<Supply> for Opt {
    fn from(value: Supply) -> Opt {
        Opt {
            kind: OptKind::Provide(value.spec),
        }
    }
}

impl From<Invoke> for Opt {
    fn from(value: Invoke) -> Opt {
        Opt {
            kind: OptKind::Invoke(value.spec),
        }
    }
}

impl From<Decorate> for Opt {
    fn from(value: Decorate) -> Opt {
        Opt {
            kind: OptKind::Decorate(value.spec),
        }
    }
}

/// Values convertible into a list of options: single options, their
/// builders, vectors, and tuples of other `IntoOpts` values.
pub trait IntoOpts {
    fn into_opts(self) -> Vec<Opt>;
}

impl IntoOpts for Opt {
    fn into_opts(self) -> Vec<Opt> {
        vec![self]
    }
}

impl IntoOpts for Provide {
    fn into_opts(self) -> Vec<Opt> {
        vec![self.into()]
    }
}

impl IntoOpts for Supply {
    fn into_opts(self) -> Vec<Opt> {
        vec![self.into()]
    }
}

impl IntoOpts for Invoke {
    fn into_opts(self) -> Vec<Opt> {
        vec![self.into()]
    }
}

impl IntoOpts for Decorate {
    fn into_opts(self) -> Vec<Opt> {
        vec![self.into()]
    }
}

impl IntoOpts for Vec<Opt> {
    fn into_opts(self) -> Vec<Opt> {
        self
    }
}

impl IntoOpts for () {
    fn into_opts(self) -> Vec<Opt> {
        Vec::new()
    }
}

macro_rules! impl_into_opts_tuple {
    ($($T:ident . $idx:tt),+) => {
        impl<$($T: IntoOpts),+> IntoOpts for ($($T,)+) {
            fn into_opts(self) -> Vec<Opt> {
                let mut opts = Vec::new();
                $(opts.extend(self.$idx.into_opts());)+
                opts
            }
        }
    };
}

impl_into_opts_tuple!(T1.0);
impl_into_opts_tuple!(T1.0, T2.1);
impl_into_opts_tuple!(T1.0, T2.1, T3.2);
impl_into_opts_tuple!(T1.0, T2.1, T3.2, T4.3);
impl_into_opts_tuple!(T1.0, T2.1, T3.2, T4.3, T5.4);
impl_into_opts_tuple!(T1.0, T2.1, T3.2, T4.3, T5.4, T6.5);
impl_into_opts_tuple!(T1.0, T2.1, T3.2, T4.3, T5.4, T6.5, T7.6);
impl_into_opts_tuple!(T1.0, T2.1, T3.2, T4.3, T5.4, T6.5, T7.6, T8.7);
impl_into_opts_tuple!(T1.0, T2.1, T3.2, T4.3, T5.4, T6.5, T7.6, T8.7, T9.8);
impl_into_opts_tuple!(T1.0, T2.1, T3.2, T4.3, T5.4, T6.5, T7.6, T8.7, T9.8, T10.9);
impl_into_opts_tuple!(T1.0, T2.1, T3.2, T4.3, T5.4, T6.5, T7.6, T8.7, T9.8, T10.9, T11.10);
impl_into_opts_tuple!(
    T1.0, T2.1, T3.2, T4.3, T5.4, T6.5, T7.6, T8.7, T9.8, T10.9, T11.10, T12.11
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tuples_flatten_in_order() {
        let opts = (
            supply(1u8),
            (supply(2u16), supply(3u32)),
            vec![Opt::from(supply(4u64))],
        )
            .into_opts();
        assert_eq!(opts.len(), 4);
    }

    #[test]
    fn slot_round_trip() {
        let slot: Slot<u32> = Slot::new();
        assert!(slot.get().is_none());
        let sibling = slot.clone();
        let _opt = populate(&slot);
        assert!(sibling.get().is_none());
    }
}
