//! Containers
//!
//! A container accumulates extensions with `use_extension`, then assembles
//! them with `build`. It owns its capability registry exclusively. Members of
//! capabilities built from attaching extensions are reachable directly on the
//! container through an accessor table (member name -> kind) that always
//! resolves to the current highest-order capability of that kind.

use crate::builder::{BuildOutcome, BuildState, CompositionBuilder};
use crate::capability::{Capability, Member};
use crate::context::Context;
use crate::error::{ComposeError, ComposeResult, DisposeReport};
use crate::extension::Extension;
use crate::registry::{dispose_capability, CapabilityRegistry, ContainerApi};
use futures_util::future::BoxFuture;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

/// An extension waiting for the next build, with its own configuration
#[derive(Debug, Clone)]
pub(crate) struct PendingExtension {
    pub extension: Extension,
    pub config: Value,
}

/// A composable subsystem
#[derive(Debug)]
pub struct Container {
    name: String,
    config: Value,
    pending: Vec<PendingExtension>,
    pub(crate) registry: CapabilityRegistry,
    attached: BTreeMap<String, String>,
    attached_kinds: HashSet<String>,
    context: Context,
    last_state: Option<BuildState>,
}

impl Container {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: Value::Null,
            pending: Vec::new(),
            registry: CapabilityRegistry::new(),
            attached: BTreeMap::new(),
            attached_kinds: HashSet::new(),
            context: Context::new(),
            last_state: None,
        }
    }

    /// Container-level configuration, merged over the inherited context
    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    /// Queue an extension (consuming form, handy inside factories)
    pub fn with_extension(mut self, extension: Extension) -> Self {
        self.use_extension(extension);
        self
    }

    /// Queue an extension for the next build
    pub fn use_extension(&mut self, extension: Extension) -> &mut Self {
        self.use_with(extension, Value::Null)
    }

    /// Queue an extension with per-extension configuration
    pub fn use_with(&mut self, extension: Extension, config: Value) -> &mut Self {
        debug!("Container '{}' uses '{}'", self.name, extension.kind());
        self.pending.push(PendingExtension { extension, config });
        self
    }

    /// Run the two-phase build of every queued extension.
    ///
    /// On failure the container is left exactly as it was before the call,
    /// including its queue of pending extensions.
    pub async fn build(&mut self, engine: &CompositionBuilder) -> ComposeResult<BuildOutcome> {
        engine.build(self).await
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn config(&self) -> &Value {
        &self.config
    }

    pub(crate) fn pending(&self) -> &[PendingExtension] {
        &self.pending
    }

    pub fn pending_kinds(&self) -> Vec<&str> {
        self.pending.iter().map(|p| p.extension.kind()).collect()
    }

    /// Context resolved by the last successful build
    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn last_build_state(&self) -> Option<BuildState> {
        self.last_state
    }

    pub(crate) fn set_last_state(&mut self, state: BuildState) {
        self.last_state = Some(state);
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// Read-only view used by factories and dispose hooks
    pub fn api(&self) -> ContainerApi<'_> {
        ContainerApi::new(&self.name, &self.registry, None)
    }

    /// Capability of `kind`: the last registered by default, or the `index`-th
    pub fn find(&self, kind: &str, index: Option<usize>) -> Option<Arc<Capability>> {
        self.registry.find(kind, index)
    }

    pub fn find_all(&self, kind: &str) -> &[Arc<Capability>] {
        self.registry.find_all(kind)
    }

    pub fn instance<T: std::any::Any + Send + Sync>(&self, kind: &str) -> Option<Arc<T>> {
        self.find(kind, None)?.instance::<T>()
    }

    /// Names currently reachable through the attached surface
    pub fn attached_members(&self) -> impl Iterator<Item = &str> {
        self.attached.keys().map(String::as_str)
    }

    /// Resolve an attached member on the current capability of its kind
    pub fn member(&self, name: &str) -> Option<Member> {
        let kind = self.attached.get(name)?;
        self.registry.find(kind, None)?.get(name).cloned()
    }

    /// Invoke an attached member
    pub fn invoke(&self, name: &str, args: &[Value]) -> ComposeResult<Value> {
        self.member(name)
            .ok_or_else(|| ComposeError::MemberNotFound(name.to_string()))?
            .invoke(name, args)
    }

    /// Commit-time bookkeeping: drop pending extensions and refresh accessors
    pub(crate) fn commit(&mut self, context: Context, committed: &[(String, bool, bool)]) {
        self.pending.clear();
        self.context = context;

        for (kind, attach, overwrite) in committed {
            if *attach {
                self.attached_kinds.insert(kind.clone());
            } else if *overwrite {
                self.attached_kinds.remove(kind);
            }
            self.regenerate_accessors(kind);
        }
    }

    /// Rebuild the accessor entries for `kind` from its current capability
    fn regenerate_accessors(&mut self, kind: &str) {
        self.attached.retain(|_, k| k != kind);
        if !self.attached_kinds.contains(kind) {
            return;
        }
        let Some(capability) = self.registry.find(kind, None) else {
            return;
        };
        for name in capability.members().names() {
            if let Some(previous) = self.attached.insert(name.to_string(), kind.to_string()) {
                debug!(
                    "Attached member '{}' moved from '{}' to '{}'",
                    name, previous, kind
                );
            }
        }
    }

    /// Dispose every capability in reverse registration order.
    ///
    /// Failures are logged and collected; disposal always runs to the end.
    pub fn dispose(&mut self) -> BoxFuture<'_, DisposeReport> {
        Box::pin(async move {
            let mut report = DisposeReport::default();
            for capability in self.registry.disposal_order() {
                let api = ContainerApi::new(&self.name, &self.registry, None);
                report.merge(dispose_capability(&capability, &api).await);
                self.registry.remove(capability.kind(), &capability);
            }
            self.attached.clear();
            self.attached_kinds.clear();

            if report.disposed > 0 {
                info!(
                    "Disposed container '{}' ({} capabilities, {} failures)",
                    self.name,
                    report.disposed,
                    report.failures.len()
                );
            }
            report
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo(kind: &str) -> Extension {
        let kind_owned = kind.to_string();
        Extension::new(kind, move |_, _| {
            Ok(Capability::new(kind_owned.clone())
                .member("echo", Member::method(1, |args| Ok(args[0].clone()))))
        })
        .attach(true)
    }

    #[test]
    fn use_extension_is_chainable() {
        let mut container = Container::new("app");
        container.use_extension(echo("a")).use_extension(echo("b"));
        assert_eq!(container.pending_kinds(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn attached_member_is_invocable() {
        let engine = CompositionBuilder::new();
        let mut container = Container::new("app");
        container.use_extension(echo("speaker"));
        container.build(&engine).await.unwrap();

        assert_eq!(
            container.invoke("echo", &[json!("hi")]).unwrap(),
            json!("hi")
        );
        assert_eq!(container.attached_members().collect::<Vec<_>>(), vec!["echo"]);
        assert!(matches!(
            container.invoke("missing", &[]),
            Err(ComposeError::MemberNotFound(_))
        ));
    }

    #[tokio::test]
    async fn dispose_empties_registry_and_surface() {
        let engine = CompositionBuilder::new();
        let mut container = Container::new("app");
        container.use_extension(echo("a")).use_extension(echo("b"));
        container.build(&engine).await.unwrap();
        assert_eq!(container.registry().len(), 2);

        let report = container.dispose().await;
        assert_eq!(report.disposed, 2);
        assert!(report.is_clean());
        assert!(container.registry().is_empty());
        assert!(container.member("echo").is_none());
    }
}
