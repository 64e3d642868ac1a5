//! Parameter extraction for producer functions.
//!
//! Producers declare their dependencies through parameter types:
//! `Arc<T>` is a required input, `Option<Arc<T>>` an optional one, and
//! [`Group`] / [`GroupMap`] consume value groups. The resolver hands
//! each parameter a type-erased [`InputValue`]; the [`Extract`]
//! implementations turn those back into typed values.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{CoreError, CoreResult, Origin};
use crate::key::{Key, Qualifier};

/// Type-erased shared value as stored by the container.
pub(crate) type AnyArc = Arc<dyn Any + Send + Sync>;

/// How a dependency consumes its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DepShape {
    /// A single value.
    One,
    /// Every group contributor, as a sequence.
    Collect,
    /// Every group contributor, as a name-keyed map.
    CollectMap,
}

/// One declared input of a producer.
#[derive(Debug, Clone)]
pub(crate) struct Dep {
    pub key: Key,
    pub shape: DepShape,
    pub optional: bool,
    pub soft: bool,
}

impl Dep {
    fn one(key: Key) -> Dep {
        Dep {
            key,
            shape: DepShape::One,
            optional: false,
            soft: false,
        }
    }
}

/// Erased value passed from the resolver to an extractor.
pub(crate) enum InputValue {
    /// Optional input with no provider, or soft group with no
    /// contributors.
    Absent,
    One(AnyArc),
    Many(Vec<AnyArc>),
    Entries(Vec<(&'static str, AnyArc)>),
}

fn mismatch<T>(expected: &'static str) -> CoreResult<T> {
    Err(CoreError::InvalidOption {
        reason: format!("internal extraction mismatch for {}", expected),
        origin: Origin::capture(),
    })
}

fn downcast<T: Send + Sync + 'static>(value: AnyArc) -> CoreResult<Arc<T>> {
    match value.downcast::<T>() {
        Ok(v) => Ok(v),
        Err(_) => mismatch(std::any::type_name::<T>()),
    }
}

/// Types usable as producer parameters.
///
/// Implemented for `Arc<T>`, `Option<Arc<T>>`, [`Group<T>`] and
/// [`GroupMap<T>`]. The two hidden methods describe the dependency and
/// rebuild the typed value from the resolver's erased output; they are
/// container plumbing, not user API.
pub trait Extract: Sized + Send + Sync + 'static {
    #[doc(hidden)]
    fn dep() -> Dep;
    #[doc(hidden)]
    fn extract(value: InputValue) -> CoreResult<Self>;
}

impl<T: Send + Sync + 'static> Extract for Arc<T> {
    fn dep() -> Dep {
        Dep::one(Key::of::<T>())
    }

    fn extract(value: InputValue) -> CoreResult<Self> {
        match value {
            InputValue::One(v) => downcast(v),
            _ => mismatch(std::any::type_name::<T>()),
        }
    }
}

impl<T: Send + Sync + 'static> Extract for Option<Arc<T>> {
    fn dep() -> Dep {
        let mut dep = Dep::one(Key::of::<T>());
        dep.optional = true;
        dep
    }

    fn extract(value: InputValue) -> CoreResult<Self> {
        match value {
            InputValue::Absent => Ok(None),
            InputValue::One(v) => Ok(Some(downcast(v)?)),
            _ => mismatch(std::any::type_name::<T>()),
        }
    }
}

/// Sequence consumption of a value group.
///
/// The parameter must be tagged with the group label via
/// [`Provide::param_group`](crate::Provide::param_group) on the
/// consuming option. Contributors appear parent scopes first, in
/// registration order within each scope.
///
/// # Examples
///
/// ```rust
/// use appwire::{App, Group, invoke, supply};
///
/// let app = App::new((
///     supply(2u32).group("ports"),
///     supply(3u32).group("ports"),
///     invoke(|ports: Group<u32>| assert_eq!(ports.0.len(), 2)).param_group(0, "ports"),
/// ));
/// assert!(app.err().is_none());
/// ```
pub struct Group<T>(pub Vec<Arc<T>>);

impl<T> Group<T> {
    /// The collected contributors.
    pub fn into_inner(self) -> Vec<Arc<T>> {
        self.0
    }
}

impl<T: Send + Sync + 'static> Extract for Group<T> {
    fn dep() -> Dep {
        // Placeholder tag; a param_group annotation must supply the
        // real label before registration is accepted.
        Dep {
            key: Key::of::<T>().with_qualifier(Qualifier::Group("")),
            shape: DepShape::Collect,
            optional: false,
            soft: false,
        }
    }

    fn extract(value: InputValue) -> CoreResult<Self> {
        match value {
            InputValue::Absent => Ok(Group(Vec::new())),
            InputValue::Many(values) => {
                let mut out = Vec::with_capacity(values.len());
                for v in values {
                    out.push(downcast(v)?);
                }
                Ok(Group(out))
            }
            _ => mismatch(std::any::type_name::<T>()),
        }
    }
}

/// Map consumption of a value group, keyed by contributor name.
///
/// Requires every visible contributor to carry a distinct name;
/// otherwise resolution fails with `InvalidOption` naming the group
/// key.
pub struct GroupMap<T>(pub HashMap<&'static str, Arc<T>>);

impl<T> GroupMap<T> {
    /// The collected contributors, keyed by their names.
    pub fn into_inner(self) -> HashMap<&'static str, Arc<T>> {
        self.0
    }
}

impl<T: Send + Sync + 'static> Extract for GroupMap<T> {
    fn dep() -> Dep {
        Dep {
            key: Key::of::<T>().with_qualifier(Qualifier::Group("")),
            shape: DepShape::CollectMap,
            optional: false,
            soft: false,
        }
    }

    fn extract(value: InputValue) -> CoreResult<Self> {
        match value {
            InputValue::Absent => Ok(GroupMap(HashMap::new())),
            InputValue::Entries(entries) => {
                let mut out = HashMap::with_capacity(entries.len());
                for (name, v) in entries {
                    out.insert(name, downcast(v)?);
                }
                Ok(GroupMap(out))
            }
            _ => mismatch(std::any::type_name::<T>()),
        }
    }
}
