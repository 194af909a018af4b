//! Per-container capability registry
//!
//! Maps each kind to the capabilities registered under it, ordered by order
//! index. `register` and `remove` (plus `restore`, used by rollback) are the
//! only mutators. Order indices are handed out per kind and never reused,
//! even after removal.

use crate::capability::Capability;
use crate::error::{DisposeError, DisposeReport};
use semver::Version;
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of a registration
#[derive(Debug)]
pub struct Registration {
    /// The sealed capability now visible under its kind
    pub capability: Arc<Capability>,

    /// Capabilities detached by an overwriting registration, in registration order
    pub displaced: Vec<Arc<Capability>>,
}

/// Store of kind -> ordered capabilities for one container
#[derive(Debug, Default)]
pub struct CapabilityRegistry {
    entries: BTreeMap<String, Vec<Arc<Capability>>>,
    next_index: HashMap<String, u64>,
    next_sequence: u64,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seal `capability` and append it under its kind.
    ///
    /// With `overwrite`, the existing capabilities of the kind are detached
    /// and returned in `displaced`; disposing them is up to the caller (see
    /// [`CapabilityRegistry::replace`] for the immediate variant).
    pub fn register(&mut self, mut capability: Capability, overwrite: bool) -> Registration {
        let kind = capability.kind().to_string();

        let next = self.next_index.entry(kind.clone()).or_insert(0);
        capability.order_index = *next;
        *next += 1;
        capability.sequence = self.next_sequence;
        self.next_sequence += 1;

        let list = self.entries.entry(kind.clone()).or_default();
        let displaced = if overwrite {
            std::mem::take(list)
        } else {
            Vec::new()
        };

        let capability = Arc::new(capability);
        list.push(Arc::clone(&capability));

        debug!(
            "Registered '{}' #{} (displaced {})",
            kind,
            capability.order_index(),
            displaced.len()
        );

        Registration {
            capability,
            displaced,
        }
    }

    /// Register with overwrite, disposing the displaced capabilities first
    /// in reverse registration order. Dispose failures are logged and do not
    /// block the replacement.
    pub async fn replace(&mut self, capability: Capability) -> (Arc<Capability>, DisposeReport) {
        let registration = self.register(capability, true);
        let api = ContainerApi::new("", self, None);
        let report = dispose_all(registration.displaced, &api).await;
        (registration.capability, report)
    }

    /// Capability of `kind`: the last registered by default, or the `index`-th
    pub fn find(&self, kind: &str, index: Option<usize>) -> Option<Arc<Capability>> {
        let list = self.entries.get(kind)?;
        match index {
            None => list.last().cloned(),
            Some(i) => list.get(i).cloned(),
        }
    }

    /// Every capability of `kind`, in order index order
    pub fn find_all(&self, kind: &str) -> &[Arc<Capability>] {
        self.entries.get(kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Remove one specific capability; returns whether it was present
    pub fn remove(&mut self, kind: &str, capability: &Arc<Capability>) -> bool {
        let Some(list) = self.entries.get_mut(kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|c| !Arc::ptr_eq(c, capability));
        let removed = list.len() != before;
        if list.is_empty() {
            self.entries.remove(kind);
        }
        removed
    }

    /// Put detached capabilities back at their original positions
    pub(crate) fn restore(&mut self, displaced: Vec<Arc<Capability>>) {
        for capability in displaced {
            let list = self
                .entries
                .entry(capability.kind().to_string())
                .or_default();
            let pos = list.partition_point(|c| c.order_index() < capability.order_index());
            list.insert(pos, capability);
        }
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.entries.contains_key(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Total number of registered capabilities
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `(kind, order_index)` of every entry, sorted by kind then index
    pub fn snapshot(&self) -> Vec<(String, u64)> {
        self.entries
            .iter()
            .flat_map(|(kind, list)| list.iter().map(move |c| (kind.clone(), c.order_index())))
            .collect()
    }

    /// Every capability, most recently registered first
    pub fn disposal_order(&self) -> Vec<Arc<Capability>> {
        let mut all: Vec<Arc<Capability>> = self.entries.values().flatten().cloned().collect();
        all.sort_by(|a, b| b.sequence.cmp(&a.sequence));
        all
    }
}

/// Read-only view of a container handed to factories and `dispose` hooks.
///
/// Lookups fall back to ancestor containers, so a child container's
/// extensions can depend on kinds built by its parents.
#[derive(Clone, Copy)]
pub struct ContainerApi<'a> {
    name: &'a str,
    registry: &'a CapabilityRegistry,
    parent: Option<&'a ContainerApi<'a>>,
}

impl<'a> ContainerApi<'a> {
    pub fn new(
        name: &'a str,
        registry: &'a CapabilityRegistry,
        parent: Option<&'a ContainerApi<'a>>,
    ) -> Self {
        Self {
            name,
            registry,
            parent,
        }
    }

    /// Name of the container this view belongs to
    pub fn name(&self) -> &str {
        self.name
    }

    /// Find in this container, then in its ancestors
    pub fn find(&self, kind: &str, index: Option<usize>) -> Option<Arc<Capability>> {
        if self.registry.contains(kind) {
            return self.registry.find(kind, index);
        }
        self.parent?.find(kind, index)
    }

    /// Find in this container only
    pub fn find_local(&self, kind: &str, index: Option<usize>) -> Option<Arc<Capability>> {
        self.registry.find(kind, index)
    }

    /// Typed instance of the latest capability of `kind`
    pub fn instance<T: Any + Send + Sync>(&self, kind: &str) -> Option<Arc<T>> {
        self.find(kind, None)?.instance::<T>()
    }

    /// Whether `kind` is built here or in an ancestor
    pub fn provides(&self, kind: &str) -> bool {
        self.registry.contains(kind) || self.parent.is_some_and(|p| p.provides(kind))
    }

    /// Version of the latest capability of `kind`, here or in an ancestor
    pub fn version_of(&self, kind: &str) -> Option<Version> {
        self.find(kind, None)?.version().cloned()
    }
}

/// Dispose one capability: its child containers first, then its own hook.
pub(crate) async fn dispose_capability(
    capability: &Arc<Capability>,
    api: &ContainerApi<'_>,
) -> DisposeReport {
    let mut report = DisposeReport::default();

    let mut children = capability.take_children();
    for child in children.iter_mut().rev() {
        report.merge(child.dispose().await);
    }

    report.disposed += 1;
    if let Some(lifecycle) = capability.lifecycle() {
        if let Err(source) = lifecycle.dispose(api).await {
            let err = DisposeError {
                kind: capability.kind().to_string(),
                order_index: capability.order_index(),
                source,
            };
            warn!("{}", err);
            report.failures.push(err);
        }
    }

    report
}

/// Dispose `capabilities` in reverse of the given order, continuing past failures
pub(crate) async fn dispose_all(
    capabilities: Vec<Arc<Capability>>,
    api: &ContainerApi<'_>,
) -> DisposeReport {
    let mut report = DisposeReport::default();
    for capability in capabilities.iter().rev() {
        report.merge(dispose_capability(capability, api).await);
    }
    report
}
