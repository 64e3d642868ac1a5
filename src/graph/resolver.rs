//! Resolution: memoized, cycle-checked instantiation of the graph.

use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::error::{panic_to_error, CoreError, CoreResult, Origin};
use crate::extract::{AnyArc, Dep, DepShape, InputValue};
use crate::key::Key;

use super::{Container, ScopeId};

impl Container {
    /// Resolves one declared dependency from `scope`.
    ///
    /// Optional inputs absorb a missing provider; soft group inputs
    /// absorb an empty group. Everything else propagates.
    pub(crate) fn resolve_dep(
        &mut self,
        scope: ScopeId,
        dep: &Dep,
        consumer: &'static str,
    ) -> CoreResult<InputValue> {
        match dep.shape {
            DepShape::One => match self.resolve_key(scope, &dep.key, consumer) {
                Ok(value) => Ok(InputValue::One(value)),
                Err(CoreError::Missing { ref key, .. }) if dep.optional && *key == dep.key => {
                    Ok(InputValue::Absent)
                }
                Err(err) => Err(err),
            },
            DepShape::Collect => {
                let members = self.collect_group(scope, &dep.key, consumer, dep.soft)?;
                match members {
                    None => Ok(InputValue::Absent),
                    Some(members) => Ok(InputValue::Many(
                        members.into_iter().map(|m| m.value).collect(),
                    )),
                }
            }
            DepShape::CollectMap => {
                let members = self.collect_group(scope, &dep.key, consumer, dep.soft)?;
                match members {
                    None => Ok(InputValue::Absent),
                    Some(members) => {
                        let mut seen = HashSet::new();
                        let mut entries = Vec::with_capacity(members.len());
                        for member in members {
                            let Some(name) = member.name else {
                                return Err(CoreError::InvalidOption {
                                    reason: format!(
                                        "group {} is consumed as a map but a contributor carries no name",
                                        dep.key
                                    ),
                                    origin: member.origin,
                                });
                            };
                            if !seen.insert(name) {
                                return Err(CoreError::InvalidOption {
                                    reason: format!(
                                        "group {} is consumed as a map but the name {:?} is contributed twice",
                                        dep.key, name
                                    ),
                                    origin: member.origin,
                                });
                            }
                            entries.push((name, member.value));
                        }
                        Ok(InputValue::Entries(entries))
                    }
                }
            }
        }
    }

    /// Resolves a single-valued key as seen from `scope`, applying the
    /// decorator pipeline along the consumer's ancestor path.
    pub(crate) fn resolve_key(
        &mut self,
        scope: ScopeId,
        key: &Key,
        consumer: &'static str,
    ) -> CoreResult<AnyArc> {
        let Some((provider_scope, entry)) = self.lookup_one(scope, key) else {
            return Err(CoreError::Missing {
                key: key.clone(),
                consumer,
            });
        };
        let raw = self.produce(entry, key)?;
        self.apply_decorators(scope, provider_scope, key, raw)
    }

    /// First scope at or above `scope` with a provider for `key`.
    fn lookup_one(&self, scope: ScopeId, key: &Key) -> Option<(ScopeId, usize)> {
        let mut cursor = Some(scope);
        while let Some(id) = cursor {
            if let Some(ids) = self.scopes[id].providers.get(key) {
                if let Some(&first) = ids.first() {
                    return Some((id, first));
                }
            }
            cursor = self.scopes[id].parent;
        }
        None
    }

    /// Runs the producer behind `entry` once and memoizes every
    /// output; returns the output matching `requested`.
    fn produce(&mut self, entry: usize, requested: &Key) -> CoreResult<AnyArc> {
        if self.produced.contains_key(&entry) {
            return self.select_output(entry, requested);
        }
        if self.producing.contains(&entry) {
            let mut path = self.stack.clone();
            path.push(requested.clone());
            return Err(CoreError::Cycle { path });
        }

        self.producing.insert(entry);
        self.stack.push(requested.clone());
        let result = self.produce_inner(entry, requested);
        self.stack.pop();
        self.producing.remove(&entry);

        let values = result?;
        self.produced.insert(entry, values);
        self.select_output(entry, requested)
    }

    fn produce_inner(&mut self, entry: usize, requested: &Key) -> CoreResult<Vec<AnyArc>> {
        let producer = self.entries[entry].producer.clone();
        let deps = self.entries[entry].deps.clone();
        let declared = self.entries[entry].declared;
        let origin = self.entries[entry].origin;
        let name = producer.fn_name();

        // Inputs evaluate left to right, from the scope the provider
        // was declared in.
        let mut inputs = Vec::with_capacity(deps.len());
        for dep in &deps {
            inputs.push(self.resolve_dep(declared, dep, name)?);
        }

        let previous = self.lifecycle.set_caller(Some(name));
        let called = catch_unwind(AssertUnwindSafe(move || producer.call(inputs)));
        self.lifecycle.set_caller(previous);

        match called {
            Ok(Ok(values)) => Ok(values),
            Ok(Err(source)) => Err(CoreError::producer_failed(requested.clone(), origin, source)),
            Err(payload) => Err(CoreError::producer_failed(
                requested.clone(),
                origin,
                panic_to_error(payload),
            )),
        }
    }

    fn select_output(&self, entry: usize, requested: &Key) -> CoreResult<AnyArc> {
        let outputs = &self.entries[entry].outputs;
        let value = outputs
            .iter()
            .position(|o| o.key == *requested)
            .and_then(|index| self.produced.get(&entry)?.get(index))
            .cloned();
        match value {
            Some(value) => Ok(value),
            None => Err(CoreError::InvalidOption {
                reason: format!(
                    "provider {} has no output for {}",
                    self.entries[entry].producer.fn_name(),
                    requested
                ),
                origin: self.entries[entry].origin,
            }),
        }
    }

    /// Applies decorators registered between the provider's scope and
    /// the consumer, root-most first, memoizing at each scope so
    /// siblings below a decorator share its value while ancestors keep
    /// the undecorated one.
    fn apply_decorators(
        &mut self,
        consumer: ScopeId,
        provider_scope: ScopeId,
        key: &Key,
        raw: AnyArc,
    ) -> CoreResult<AnyArc> {
        let mut chain = Vec::new();
        let mut cursor = Some(consumer);
        while let Some(id) = cursor {
            chain.push(id);
            if id == provider_scope {
                break;
            }
            cursor = self.scopes[id].parent;
        }
        chain.reverse();

        let mut value = raw;
        for scope in chain {
            let Some(&decorator) = self.scopes[scope].decorators.get(key) else {
                continue;
            };
            let cache_key = (scope, key.clone());
            if let Some(cached) = self.decorated.get(&cache_key) {
                value = cached.clone();
                continue;
            }
            if self.decorating.contains(&cache_key) {
                let mut path = self.stack.clone();
                path.push(key.clone());
                return Err(CoreError::Cycle { path });
            }

            self.decorating.insert(cache_key.clone());
            self.stack.push(key.clone());
            let result = self.run_decorator(decorator, value.clone());
            self.stack.pop();
            self.decorating.remove(&cache_key);

            let next = result?;
            self.decorated.insert(cache_key, next.clone());
            value = next;
        }
        Ok(value)
    }

    fn run_decorator(&mut self, decorator: usize, upstream: AnyArc) -> CoreResult<AnyArc> {
        let producer = self.decorators[decorator].producer.clone();
        let deps = self.decorators[decorator].deps.clone();
        let scope = self.decorators[decorator].scope;
        let upstream_index = self.decorators[decorator].upstream;
        let origin = self.decorators[decorator].origin;
        let key = self.decorators[decorator].key.clone();
        let name = producer.fn_name();

        let mut inputs = Vec::with_capacity(deps.len());
        for (index, dep) in deps.iter().enumerate() {
            if Some(index) == upstream_index {
                inputs.push(InputValue::One(upstream.clone()));
            } else {
                inputs.push(self.resolve_dep(scope, dep, name)?);
            }
        }

        let previous = self.lifecycle.set_caller(Some(name));
        let called = catch_unwind(AssertUnwindSafe(move || producer.call(inputs)));
        self.lifecycle.set_caller(previous);

        let mut values = match called {
            Ok(Ok(values)) => values,
            Ok(Err(source)) => return Err(CoreError::producer_failed(key, origin, source)),
            Err(payload) => {
                return Err(CoreError::producer_failed(key, origin, panic_to_error(payload)))
            }
        };
        match values.pop() {
            Some(value) if values.is_empty() => Ok(value),
            _ => Err(CoreError::InvalidOption {
                reason: "decorator must produce exactly one value".to_string(),
                origin,
            }),
        }
    }

    /// Gathers every visible contributor to a group, parent scopes
    /// first, in registration order within each scope.
    fn collect_group(
        &mut self,
        scope: ScopeId,
        key: &Key,
        consumer: &'static str,
        soft: bool,
    ) -> CoreResult<Option<Vec<GroupMember>>> {
        let mut per_scope = Vec::new();
        let mut cursor = Some(scope);
        while let Some(id) = cursor {
            if let Some(ids) = self.scopes[id].providers.get(key) {
                per_scope.push(ids.clone());
            }
            cursor = self.scopes[id].parent;
        }

        let mut seen = HashSet::new();
        let mut order = Vec::new();
        for ids in per_scope.into_iter().rev() {
            for id in ids {
                if seen.insert(id) {
                    order.push(id);
                }
            }
        }

        if order.is_empty() {
            if soft {
                return Ok(None);
            }
            return Err(CoreError::Missing {
                key: key.clone(),
                consumer,
            });
        }

        let mut members = Vec::with_capacity(order.len());
        for id in order {
            let value = self.produce(id, key)?;
            let output = self.entries[id]
                .outputs
                .iter()
                .find(|o| o.key == *key)
                .map(|o| o.entry_name)
                .unwrap_or(None);
            members.push(GroupMember {
                name: output,
                value,
                origin: self.entries[id].origin,
            });
        }
        Ok(Some(members))
    }
}

struct GroupMember {
    name: Option<&'static str>,
    value: AnyArc,
    origin: Origin,
}
