//! Build transaction
//!
//! Tracks what one build call registered and displaced, so a failure can be
//! undone exactly and a success can finish the deferred disposals.

use crate::capability::Capability;
use crate::container::Container;
use crate::error::DisposeReport;
use crate::registry::{dispose_all, dispose_capability, ContainerApi};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// State of one build call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    Planning,
    Executing(usize),
    RollingBack,
    Committed,
    Failed,
}

impl BuildState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Committed | Self::Failed)
    }
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Planning => write!(f, "planning"),
            Self::Executing(level) => write!(f, "executing level {}", level),
            Self::RollingBack => write!(f, "rolling back"),
            Self::Committed => write!(f, "committed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug)]
pub(crate) struct Transaction {
    state: BuildState,
    registered: Vec<Arc<Capability>>,
    /// Detached capabilities that predate this build
    displaced: Vec<Arc<Capability>>,
    /// Capabilities registered by this build and then overwritten by it
    superseded: Vec<Arc<Capability>>,
    initialized: usize,
}

impl Transaction {
    pub fn new() -> Self {
        Self {
            state: BuildState::Planning,
            registered: Vec::new(),
            displaced: Vec::new(),
            superseded: Vec::new(),
            initialized: 0,
        }
    }

    pub fn advance(&mut self, state: BuildState) {
        debug!("Build state {} -> {}", self.state, state);
        self.state = state;
    }

    pub fn record_registered(&mut self, capability: Arc<Capability>) {
        self.registered.push(capability);
    }

    pub fn record_displaced(&mut self, displaced: Vec<Arc<Capability>>) {
        for capability in displaced {
            if self.registered.iter().any(|c| Arc::ptr_eq(c, &capability)) {
                self.superseded.push(capability);
            } else {
                self.displaced.push(capability);
            }
        }
    }

    pub fn record_initialized(&mut self, count: usize) {
        self.initialized += count;
    }

    pub fn registered(&self) -> &[Arc<Capability>] {
        &self.registered
    }

    /// Dispose the capabilities displaced by overwrites, most recent first
    pub async fn commit(mut self, container: &Container) -> DisposeReport {
        self.advance(BuildState::Committed);
        let api = ContainerApi::new(container.name(), &container.registry, None);
        let mut displaced = std::mem::take(&mut self.displaced);
        displaced.append(&mut self.superseded);
        dispose_all(displaced, &api).await
    }

    /// Undo every registration of this build, newest first, then put
    /// displaced capabilities back. Superseded ones are among the registered
    /// and are disposed with them. Dispose failures are logged, never raised.
    pub async fn rollback(mut self, container: &mut Container) -> DisposeReport {
        self.advance(BuildState::RollingBack);
        warn!(
            "Rolling back build of '{}': {} registered, {} initialized",
            container.name(),
            self.registered.len(),
            self.initialized
        );

        let mut report = DisposeReport::default();
        for capability in self.registered.iter().rev() {
            let api = ContainerApi::new(container.name(), &container.registry, None);
            report.merge(dispose_capability(capability, &api).await);
            container.registry.remove(capability.kind(), capability);
        }
        container
            .registry
            .restore(std::mem::take(&mut self.displaced));

        if !report.is_clean() {
            warn!(
                "{} dispose failure(s) during rollback of '{}'",
                report.failures.len(),
                container.name()
            );
        }
        self.advance(BuildState::Failed);
        report
    }
}
