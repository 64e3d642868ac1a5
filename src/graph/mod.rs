//! The provider graph: scope tree, registries, and resolver.
//!
//! Scopes live in an arena indexed by [`ScopeId`]; the root scope is
//! the application container and every module is a child node.
//! Non-private providers registered anywhere in the tree are exported
//! to the root registry so the whole application sees them; private
//! providers stay in their owning scope and are visible only to its
//! subtree. Decorators always stay local.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::{CoreError, CoreResult, Origin};
use crate::extract::{AnyArc, Dep};
use crate::key::Key;
use crate::lifecycle::Lifecycle;
use crate::producer::{OutputKey, Producer};

mod resolver;

/// Index of a scope in the container arena.
pub(crate) type ScopeId = usize;

/// The root scope: the application container itself.
pub(crate) const ROOT_SCOPE: ScopeId = 0;

/// A registered constructor with its resolved metadata.
pub(crate) struct ProviderEntry {
    pub producer: Arc<dyn Producer>,
    /// Inputs after annotation rewriting, in parameter order.
    pub deps: Vec<Dep>,
    /// Outputs after annotation rewriting.
    pub outputs: Vec<OutputKey>,
    pub private: bool,
    pub origin: Origin,
    /// Scope the option appeared in; dependencies resolve from here.
    /// (Non-private entries are indexed at the root, but their inputs
    /// keep the declaring scope's visibility.)
    pub declared: ScopeId,
}

/// A registered decorator.
pub(crate) struct DecoratorEntry {
    pub producer: Arc<dyn Producer>,
    pub deps: Vec<Dep>,
    pub key: Key,
    /// Index of the input receiving the upstream value; `None` for
    /// replacements, which ignore it.
    pub upstream: Option<usize>,
    pub origin: Origin,
    pub scope: ScopeId,
}

struct ScopeData {
    parent: Option<ScopeId>,
    path: String,
    providers: HashMap<Key, Vec<usize>>,
    decorators: HashMap<Key, usize>,
}

/// The dependency graph and its instance caches.
///
/// All mutation happens on one logical thread with exclusive access,
/// per the wiring contract; nothing here is shared until the graph
/// has stabilized.
pub(crate) struct Container {
    scopes: Vec<ScopeData>,
    entries: Vec<ProviderEntry>,
    decorators: Vec<DecoratorEntry>,
    /// Memoized producer results; one invocation fills every output.
    produced: HashMap<usize, Vec<AnyArc>>,
    /// Entries currently being produced; the cycle sentinel.
    producing: HashSet<usize>,
    /// Memoized decorated values per (scope, key).
    decorated: HashMap<(ScopeId, Key), AnyArc>,
    decorating: HashSet<(ScopeId, Key)>,
    /// Keys on the active resolution path, for cycle reports.
    stack: Vec<Key>,
    lifecycle: Arc<Lifecycle>,
}

impl Container {
    pub(crate) fn new(lifecycle: Arc<Lifecycle>) -> Container {
        Container {
            scopes: vec![ScopeData {
                parent: None,
                path: String::new(),
                providers: HashMap::new(),
                decorators: HashMap::new(),
            }],
            entries: Vec::new(),
            decorators: Vec::new(),
            produced: HashMap::new(),
            producing: HashSet::new(),
            decorated: HashMap::new(),
            decorating: HashSet::new(),
            stack: Vec::new(),
            lifecycle,
        }
    }

    /// Adds a module scope under `parent`.
    pub(crate) fn add_scope(&mut self, parent: ScopeId, name: &'static str) -> ScopeId {
        let path = if self.scopes[parent].path.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.scopes[parent].path, name)
        };
        self.scopes.push(ScopeData {
            parent: Some(parent),
            path,
            providers: HashMap::new(),
            decorators: HashMap::new(),
        });
        self.scopes.len() - 1
    }

    /// The dotted module path of a scope; empty for the root.
    pub(crate) fn module_path(&self, scope: ScopeId) -> &str {
        &self.scopes[scope].path
    }

    /// Registers a provider declared in `declared`.
    ///
    /// Non-private entries are exported to the root registry; private
    /// entries stay local so only the subtree can see them. Colliding
    /// non-group outputs in the target registry fail with `Duplicate`
    /// and name the earlier registration site.
    pub(crate) fn register_provider(
        &mut self,
        declared: ScopeId,
        producer: Arc<dyn Producer>,
        deps: Vec<Dep>,
        outputs: Vec<OutputKey>,
        private: bool,
        origin: Origin,
    ) -> CoreResult<()> {
        let registered = if private { declared } else { ROOT_SCOPE };

        for output in &outputs {
            if output.key.qualifier().is_group() {
                continue;
            }
            if let Some(existing) = self.scopes[registered].providers.get(&output.key) {
                if let Some(&id) = existing.first() {
                    return Err(CoreError::Duplicate {
                        key: output.key.clone(),
                        existing: self.entries[id].origin,
                        new: origin,
                    });
                }
            }
        }

        let id = self.entries.len();
        self.entries.push(ProviderEntry {
            producer,
            deps,
            outputs,
            private,
            origin,
            declared,
        });
        for output in self.entries[id].outputs.clone() {
            self.scopes[registered]
                .providers
                .entry(output.key)
                .or_default()
                .push(id);
        }
        Ok(())
    }

    /// Registers a decorator in `scope`. At most one decorator per key
    /// per scope.
    pub(crate) fn register_decorator(
        &mut self,
        scope: ScopeId,
        producer: Arc<dyn Producer>,
        deps: Vec<Dep>,
        key: Key,
        upstream: Option<usize>,
        origin: Origin,
    ) -> CoreResult<()> {
        if self.scopes[scope].decorators.contains_key(&key) {
            return Err(CoreError::AlreadyDecorated {
                key,
                scope: self.scopes[scope].path.clone(),
            });
        }
        let id = self.decorators.len();
        self.decorators.push(DecoratorEntry {
            producer,
            deps,
            key: key.clone(),
            upstream,
            origin,
            scope,
        });
        self.scopes[scope].decorators.insert(key, id);
        Ok(())
    }

    /// Summary of the registered graph for `Debug` output.
    pub(crate) fn dump(&self, out: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for scope in &self.scopes {
            let label = if scope.path.is_empty() {
                "root"
            } else {
                scope.path.as_str()
            };
            writeln!(out, "scope {:?} ({} providers)", label, scope.providers.len())?;
            let mut keys: Vec<&Key> = scope.providers.keys().collect();
            keys.sort_by_key(|k| k.to_string());
            for key in keys {
                for &entry in &scope.providers[key] {
                    let entry = &self.entries[entry];
                    let vis = if entry.private { " (private)" } else { "" };
                    writeln!(out, "  {} <- {}{}", key, entry.producer.fn_name(), vis)?;
                }
            }
            let mut keys: Vec<&Key> = scope.decorators.keys().collect();
            keys.sort_by_key(|k| k.to_string());
            for key in keys {
                let deco = &self.decorators[scope.decorators[key]];
                writeln!(out, "  {} ~ decorated by {}", key, deco.producer.fn_name())?;
            }
        }
        Ok(())
    }
}
