//! Dependency keys for the application container.

use std::any::TypeId;
use std::fmt;

/// Qualifier distinguishing multiple registrations of one type.
///
/// Two providers for the same concrete type are distinct registrations
/// if and only if their qualifiers differ: an unqualified provider, a
/// provider published under a name, and contributors to a value group
/// all occupy separate slots.
///
/// # Examples
///
/// ```rust
/// use appwire::{Key, Qualifier};
///
/// let plain = Key::of::<u32>();
/// let named = Key::named::<u32>("port");
/// let grouped = Key::grouped::<u32>("ports");
///
/// assert_ne!(plain, named);
/// assert_ne!(named, grouped);
/// assert_eq!(named.qualifier(), &Qualifier::Name("port"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Qualifier {
    /// Plain registration; at most one non-group provider per scope.
    None,
    /// Named singleton, e.g. a `"read_only"` database handle next to the
    /// default one.
    Name(&'static str),
    /// Member of a multi-contributor value group labeled by a tag.
    Group(&'static str),
}

impl Qualifier {
    /// Returns true for the `Group` variant.
    pub fn is_group(&self) -> bool {
        matches!(self, Qualifier::Group(_))
    }
}

/// Lookup identity for a dependency slot: an erased type plus an
/// optional qualifier.
///
/// Keys are what the container stores providers under and what the
/// resolver asks for. The type name is carried for diagnostics only and
/// takes no part in equality or hashing.
///
/// # Examples
///
/// ```rust
/// use appwire::Key;
///
/// struct Database;
///
/// let key = Key::of::<Database>();
/// assert!(key.display_name().ends_with("Database"));
/// assert_eq!(key, Key::of::<Database>());
/// ```
#[derive(Clone)]
pub struct Key {
    type_id: TypeId,
    type_name: &'static str,
    qualifier: Qualifier,
}

impl Key {
    /// Key for an unqualified registration of `T`.
    pub fn of<T: 'static>() -> Key {
        Key {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            qualifier: Qualifier::None,
        }
    }

    /// Key for a registration of `T` published under `name`.
    pub fn named<T: 'static>(name: &'static str) -> Key {
        Key::of::<T>().with_qualifier(Qualifier::Name(name))
    }

    /// Key for the value group of `T` labeled by `tag`.
    pub fn grouped<T: 'static>(tag: &'static str) -> Key {
        Key::of::<T>().with_qualifier(Qualifier::Group(tag))
    }

    pub(crate) fn with_qualifier(mut self, qualifier: Qualifier) -> Key {
        self.qualifier = qualifier;
        self
    }

    /// The human-readable type name, for error messages and events.
    pub fn display_name(&self) -> &'static str {
        self.type_name
    }

    /// The qualifier attached to this key.
    pub fn qualifier(&self) -> &Qualifier {
        &self.qualifier
    }

    pub(crate) fn type_id(&self) -> TypeId {
        self.type_id
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.qualifier {
            Qualifier::None => write!(f, "{}", self.type_name),
            Qualifier::Name(name) => write!(f, "{}[name={:?}]", self.type_name, name),
            Qualifier::Group(tag) => write!(f, "{}[group={:?}]", self.type_name, tag),
        }
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

// Hot path: compare and hash the TypeId and qualifier only; the type
// name string is diagnostic payload.
impl PartialEq for Key {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id && self.qualifier == other.qualifier
    }
}

impl Eq for Key {}

impl std::hash::Hash for Key {
    #[inline]
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
        self.qualifier.hash(state);
    }
}

/// Helper mirroring `Key::of` for call sites that read better as a free
/// function.
#[inline]
pub fn key_of<T: 'static>() -> Key {
    Key::of::<T>()
}
