//! Type erasure for producer functions.
//!
//! The container stores every constructor, invoke target, and
//! decorator behind the same [`Producer`] trait object: a callable
//! that can enumerate its input dependencies and output keys and run
//! against type-erased arguments. Blanket implementations over `Fn`
//! arities (0 through 8) perform the erasure; the marker type
//! parameter on each conversion trait pins down which shape of
//! function is being erased so the compiler can pick the right one.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::{BoxError, CoreError};
use crate::event::{EventSink, SinkHandle};
use crate::extract::{AnyArc, Dep, Extract, InputValue};
use crate::key::Key;

/// One declared output of a provider: its key plus the entry name used
/// for map-shaped group consumption.
#[derive(Debug, Clone)]
pub(crate) struct OutputKey {
    pub key: Key,
    pub entry_name: Option<&'static str>,
}

/// Erased callable with dependency metadata.
pub(crate) trait Producer: Send + Sync {
    /// Declared inputs, in parameter order, before annotations.
    fn deps(&self) -> Vec<Dep>;
    /// Declared output keys, before annotations. Empty for invokes.
    fn outputs(&self) -> Vec<Key>;
    /// Runs the underlying function against erased inputs.
    fn call(&self, inputs: Vec<InputValue>) -> Result<Vec<AnyArc>, BoxError>;
    /// The function's type name, for events and diagnostics.
    fn fn_name(&self) -> &'static str;
}

/// A pre-built value acting as a zero-arity producer; backs `supply`,
/// `replace`, and the container's self-registrations.
pub(crate) struct ValueProducer {
    value: AnyArc,
    key: Key,
}

impl ValueProducer {
    pub(crate) fn new<T: Send + Sync + 'static>(value: T) -> ValueProducer {
        ValueProducer {
            value: Arc::new(value),
            key: Key::of::<T>(),
        }
    }

    pub(crate) fn from_arc(value: AnyArc, key: Key) -> ValueProducer {
        ValueProducer { value, key }
    }
}

impl Producer for ValueProducer {
    fn deps(&self) -> Vec<Dep> {
        Vec::new()
    }

    fn outputs(&self) -> Vec<Key> {
        vec![self.key.clone()]
    }

    fn call(&self, _inputs: Vec<InputValue>) -> Result<Vec<AnyArc>, BoxError> {
        Ok(vec![self.value.clone()])
    }

    fn fn_name(&self) -> &'static str {
        self.key.display_name()
    }
}

/// Multi-output result bundles.
///
/// A producer returning a tuple registers one logical provider per
/// element; the function still runs once, with every element cached
/// together.
pub trait Bundle: Send + Sync + 'static {
    #[doc(hidden)]
    fn keys() -> Vec<Key>;
    #[doc(hidden)]
    fn split(self) -> Vec<AnyArc>;
}

macro_rules! impl_bundle {
    ($($T:ident . $idx:tt),+) => {
        impl<$($T: Send + Sync + 'static),+> Bundle for ($($T,)+) {
            fn keys() -> Vec<Key> {
                vec![$(Key::of::<$T>()),+]
            }

            fn split(self) -> Vec<AnyArc> {
                vec![$(Arc::new(self.$idx) as AnyArc),+]
            }
        }
    };
}

impl_bundle!(T1.0, T2.1);
impl_bundle!(T1.0, T2.1, T3.2);
impl_bundle!(T1.0, T2.1, T3.2, T4.3);

// Marker types naming the return shape of an erased function. They
// only ever appear as inference targets on the conversion traits.
#[doc(hidden)]
pub struct PlainRet<T>(PhantomData<T>);
#[doc(hidden)]
pub struct TryRet<T, E>(PhantomData<(T, E)>);
#[doc(hidden)]
pub struct BundleRet<B>(PhantomData<B>);
#[doc(hidden)]
pub struct TryBundleRet<B, E>(PhantomData<(B, E)>);
#[doc(hidden)]
pub struct UnitRet;
#[doc(hidden)]
pub struct TryUnitRet<E>(PhantomData<E>);
#[doc(hidden)]
pub struct SinkRet<S>(PhantomData<S>);

/// Functions accepted by [`provide`](crate::provide) and
/// [`decorate`](crate::decorate): `Fn(deps…) -> T`.
pub trait IntoProvider<M>: Send + Sync + 'static {
    #[doc(hidden)]
    fn into_producer(self) -> Arc<dyn Producer>;
}

/// Functions accepted by [`try_provide`](crate::try_provide) and
/// [`try_decorate`](crate::try_decorate): `Fn(deps…) -> Result<T, E>`.
pub trait IntoTryProvider<M>: Send + Sync + 'static {
    #[doc(hidden)]
    fn into_producer(self) -> Arc<dyn Producer>;
}

/// Functions accepted by [`provide_bundle`](crate::provide_bundle):
/// `Fn(deps…) -> (T1, T2, …)`.
pub trait IntoBundleProvider<M>: Send + Sync + 'static {
    #[doc(hidden)]
    fn into_producer(self) -> Arc<dyn Producer>;
}

/// Functions accepted by
/// [`try_provide_bundle`](crate::try_provide_bundle):
/// `Fn(deps…) -> Result<(T1, T2, …), E>`.
pub trait IntoTryBundleProvider<M>: Send + Sync + 'static {
    #[doc(hidden)]
    fn into_producer(self) -> Arc<dyn Producer>;
}

/// Functions accepted by [`invoke`](crate::invoke): `Fn(deps…)` or
/// `Fn(deps…) -> Result<(), E>`.
pub trait IntoInvoke<M>: Send + Sync + 'static {
    #[doc(hidden)]
    fn into_producer(self) -> Arc<dyn Producer>;
}

/// Functions accepted by [`with_logger`](crate::with_logger):
/// `Fn(deps…) -> S` where `S` implements
/// [`EventSink`](crate::EventSink).
pub trait IntoSinkProducer<M>: Send + Sync + 'static {
    #[doc(hidden)]
    fn into_producer(self) -> Arc<dyn Producer>;
}

struct FnProducer<F, M> {
    f: F,
    _marker: PhantomData<fn() -> M>,
}

impl<F, M> FnProducer<F, M> {
    fn new(f: F) -> Self {
        FnProducer {
            f,
            _marker: PhantomData,
        }
    }
}

fn box_core(err: CoreError) -> BoxError {
    Box::new(err)
}

macro_rules! impl_arity {
    ($($A:ident),*) => {
        // ---- plain: Fn(..) -> T ----
        impl<F, T, $($A,)*> Producer for FnProducer<F, (PlainRet<T>, $($A,)*)>
        where
            F: Fn($($A),*) -> T + Send + Sync,
            T: Send + Sync + 'static,
            $($A: Extract,)*
        {
            fn deps(&self) -> Vec<Dep> {
                vec![$($A::dep()),*]
            }

            fn outputs(&self) -> Vec<Key> {
                vec![Key::of::<T>()]
            }

            #[allow(non_snake_case, unused_mut, unused_variables)]
            fn call(&self, inputs: Vec<InputValue>) -> Result<Vec<AnyArc>, BoxError> {
                let mut inputs = inputs.into_iter();
                $(let $A = $A::extract(inputs.next().unwrap_or(InputValue::Absent))
                    .map_err(box_core)?;)*
                let value = (self.f)($($A),*);
                Ok(vec![Arc::new(value) as AnyArc])
            }

            fn fn_name(&self) -> &'static str {
                std::any::type_name::<F>()
            }
        }

        impl<F, T, $($A,)*> IntoProvider<(PlainRet<T>, $($A,)*)> for F
        where
            F: Fn($($A),*) -> T + Send + Sync + 'static,
            T: Send + Sync + 'static,
            $($A: Extract,)*
        {
            fn into_producer(self) -> Arc<dyn Producer> {
                Arc::new(FnProducer::<F, (PlainRet<T>, $($A,)*)>::new(self))
            }
        }

        // ---- fallible: Fn(..) -> Result<T, E> ----
        impl<F, T, E, $($A,)*> Producer for FnProducer<F, (TryRet<T, E>, $($A,)*)>
        where
            F: Fn($($A),*) -> Result<T, E> + Send + Sync,
            T: Send + Sync + 'static,
            E: Into<BoxError>,
            $($A: Extract,)*
        {
            fn deps(&self) -> Vec<Dep> {
                vec![$($A::dep()),*]
            }

            fn outputs(&self) -> Vec<Key> {
                vec![Key::of::<T>()]
            }

            #[allow(non_snake_case, unused_mut, unused_variables)]
            fn call(&self, inputs: Vec<InputValue>) -> Result<Vec<AnyArc>, BoxError> {
                let mut inputs = inputs.into_iter();
                $(let $A = $A::extract(inputs.next().unwrap_or(InputValue::Absent))
                    .map_err(box_core)?;)*
                let value = (self.f)($($A),*).map_err(Into::into)?;
                Ok(vec![Arc::new(value) as AnyArc])
            }

            fn fn_name(&self) -> &'static str {
                std::any::type_name::<F>()
            }
        }

        impl<F, T, E, $($A,)*> IntoTryProvider<(TryRet<T, E>, $($A,)*)> for F
        where
            F: Fn($($A),*) -> Result<T, E> + Send + Sync + 'static,
            T: Send + Sync + 'static,
            E: Into<BoxError> + 'static,
            $($A: Extract,)*
        {
            fn into_producer(self) -> Arc<dyn Producer> {
                Arc::new(FnProducer::<F, (TryRet<T, E>, $($A,)*)>::new(self))
            }
        }

        // ---- bundle: Fn(..) -> (T1, T2, ..) ----
        impl<F, B, $($A,)*> Producer for FnProducer<F, (BundleRet<B>, $($A,)*)>
        where
            F: Fn($($A),*) -> B + Send + Sync,
            B: Bundle,
            $($A: Extract,)*
        {
            fn deps(&self) -> Vec<Dep> {
                vec![$($A::dep()),*]
            }

            fn outputs(&self) -> Vec<Key> {
                B::keys()
            }

            #[allow(non_snake_case, unused_mut, unused_variables)]
            fn call(&self, inputs: Vec<InputValue>) -> Result<Vec<AnyArc>, BoxError> {
                let mut inputs = inputs.into_iter();
                $(let $A = $A::extract(inputs.next().unwrap_or(InputValue::Absent))
                    .map_err(box_core)?;)*
                let bundle = (self.f)($($A),*);
                Ok(bundle.split())
            }

            fn fn_name(&self) -> &'static str {
                std::any::type_name::<F>()
            }
        }

        impl<F, B, $($A,)*> IntoBundleProvider<(BundleRet<B>, $($A,)*)> for F
        where
            F: Fn($($A),*) -> B + Send + Sync + 'static,
            B: Bundle,
            $($A: Extract,)*
        {
            fn into_producer(self) -> Arc<dyn Producer> {
                Arc::new(FnProducer::<F, (BundleRet<B>, $($A,)*)>::new(self))
            }
        }

        // ---- fallible bundle: Fn(..) -> Result<(T1, ..), E> ----
        impl<F, B, E, $($A,)*> Producer for FnProducer<F, (TryBundleRet<B, E>, $($A,)*)>
        where
            F: Fn($($A),*) -> Result<B, E> + Send + Sync,
            B: Bundle,
            E: Into<BoxError>,
            $($A: Extract,)*
        {
            fn deps(&self) -> Vec<Dep> {
                vec![$($A::dep()),*]
            }

            fn outputs(&self) -> Vec<Key> {
                B::keys()
            }

            #[allow(non_snake_case, unused_mut, unused_variables)]
            fn call(&self, inputs: Vec<InputValue>) -> Result<Vec<AnyArc>, BoxError> {
                let mut inputs = inputs.into_iter();
                $(let $A = $A::extract(inputs.next().unwrap_or(InputValue::Absent))
                    .map_err(box_core)?;)*
                let bundle = (self.f)($($A),*).map_err(Into::into)?;
                Ok(bundle.split())
            }

            fn fn_name(&self) -> &'static str {
                std::any::type_name::<F>()
            }
        }

        impl<F, B, E, $($A,)*> IntoTryBundleProvider<(TryBundleRet<B, E>, $($A,)*)> for F
        where
            F: Fn($($A),*) -> Result<B, E> + Send + Sync + 'static,
            B: Bundle,
            E: Into<BoxError> + 'static,
            $($A: Extract,)*
        {
            fn into_producer(self) -> Arc<dyn Producer> {
                Arc::new(FnProducer::<F, (TryBundleRet<B, E>, $($A,)*)>::new(self))
            }
        }

        // ---- invoke: Fn(..) ----
        impl<F, $($A,)*> Producer for FnProducer<F, (UnitRet, $($A,)*)>
        where
            F: Fn($($A),*) + Send + Sync,
            $($A: Extract,)*
        {
            fn deps(&self) -> Vec<Dep> {
                vec![$($A::dep()),*]
            }

            fn outputs(&self) -> Vec<Key> {
                Vec::new()
            }

            #[allow(non_snake_case, unused_mut, unused_variables)]
            fn call(&self, inputs: Vec<InputValue>) -> Result<Vec<AnyArc>, BoxError> {
                let mut inputs = inputs.into_iter();
                $(let $A = $A::extract(inputs.next().unwrap_or(InputValue::Absent))
                    .map_err(box_core)?;)*
                (self.f)($($A),*);
                Ok(Vec::new())
            }

            fn fn_name(&self) -> &'static str {
                std::any::type_name::<F>()
            }
        }

        impl<F, $($A,)*> IntoInvoke<(UnitRet, $($A,)*)> for F
        where
            F: Fn($($A),*) + Send + Sync + 'static,
            $($A: Extract,)*
        {
            fn into_producer(self) -> Arc<dyn Producer> {
                Arc::new(FnProducer::<F, (UnitRet, $($A,)*)>::new(self))
            }
        }

        // ---- fallible invoke: Fn(..) -> Result<(), E> ----
        impl<F, E, $($A,)*> Producer for FnProducer<F, (TryUnitRet<E>, $($A,)*)>
        where
            F: Fn($($A),*) -> Result<(), E> + Send + Sync,
            E: Into<BoxError>,
            $($A: Extract,)*
        {
            fn deps(&self) -> Vec<Dep> {
                vec![$($A::dep()),*]
            }

            fn outputs(&self) -> Vec<Key> {
                Vec::new()
            }

            #[allow(non_snake_case, unused_mut, unused_variables)]
            fn call(&self, inputs: Vec<InputValue>) -> Result<Vec<AnyArc>, BoxError> {
                let mut inputs = inputs.into_iter();
                $(let $A = $A::extract(inputs.next().unwrap_or(InputValue::Absent))
                    .map_err(box_core)?;)*
                (self.f)($($A),*).map_err(Into::into)?;
                Ok(Vec::new())
            }

            fn fn_name(&self) -> &'static str {
                std::any::type_name::<F>()
            }
        }

        impl<F, E, $($A,)*> IntoInvoke<(TryUnitRet<E>, $($A,)*)> for F
        where
            F: Fn($($A),*) -> Result<(), E> + Send + Sync + 'static,
            E: Into<BoxError> + 'static,
            $($A: Extract,)*
        {
            fn into_producer(self) -> Arc<dyn Producer> {
                Arc::new(FnProducer::<F, (TryUnitRet<E>, $($A,)*)>::new(self))
            }
        }

        // ---- event sink: Fn(..) -> S ----
        impl<F, S, $($A,)*> Producer for FnProducer<F, (SinkRet<S>, $($A,)*)>
        where
            F: Fn($($A),*) -> S + Send + Sync,
            S: EventSink + 'static,
            $($A: Extract,)*
        {
            fn deps(&self) -> Vec<Dep> {
                vec![$($A::dep()),*]
            }

            fn outputs(&self) -> Vec<Key> {
                vec![Key::of::<SinkHandle>()]
            }

            #[allow(non_snake_case, unused_mut, unused_variables)]
            fn call(&self, inputs: Vec<InputValue>) -> Result<Vec<AnyArc>, BoxError> {
                let mut inputs = inputs.into_iter();
                $(let $A = $A::extract(inputs.next().unwrap_or(InputValue::Absent))
                    .map_err(box_core)?;)*
                let sink = (self.f)($($A),*);
                let handle = SinkHandle(Arc::new(sink));
                Ok(vec![Arc::new(handle) as AnyArc])
            }

            fn fn_name(&self) -> &'static str {
                std::any::type_name::<F>()
            }
        }

        impl<F, S, $($A,)*> IntoSinkProducer<(SinkRet<S>, $($A,)*)> for F
        where
            F: Fn($($A),*) -> S + Send + Sync + 'static,
            S: EventSink + 'static,
            $($A: Extract,)*
        {
            fn into_producer(self) -> Arc<dyn Producer> {
                Arc::new(FnProducer::<F, (SinkRet<S>, $($A,)*)>::new(self))
            }
        }
    };
}

impl_arity!();
impl_arity!(A1);
impl_arity!(A1, A2);
impl_arity!(A1, A2, A3);
impl_arity!(A1, A2, A3, A4);
impl_arity!(A1, A2, A3, A4, A5);
impl_arity!(A1, A2, A3, A4, A5, A6);
impl_arity!(A1, A2, A3, A4, A5, A6, A7);
impl_arity!(A1, A2, A3, A4, A5, A6, A7, A8);
