//! Phase one: plan
//!
//! Collects the effective extension list (defaults plus queued extensions,
//! duplicates resolved), resolves each extension's context, checks contract
//! names and version requirements, and fetches or computes the levels.

use crate::container::Container;
use crate::context::Context;
use crate::contract::ContractRegistry;
use crate::error::{ComposeError, ComposeResult};
use crate::extension::Extension;
use crate::graph::{DependencyGraph, DependencyGraphCache, GraphNode};
use crate::registry::ContainerApi;
use semver::Version;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// One extension ready to execute
#[derive(Debug, Clone)]
pub(crate) struct PlannedExtension {
    pub extension: Extension,
    pub context: Context,
    pub version: Option<Version>,
}

/// Output of the plan phase
#[derive(Debug)]
pub(crate) struct Plan {
    pub extensions: Vec<PlannedExtension>,
    pub graph: DependencyGraph,
    pub base_context: Context,
}

impl Plan {
    /// Every planned extension of `kind`, in registration order. More than
    /// one only when later entries overwrite earlier ones.
    pub fn of_kind(&self, kind: &str) -> Vec<&PlannedExtension> {
        self.extensions
            .iter()
            .filter(|p| p.extension.kind() == kind)
            .collect()
    }

    /// The latest planned extension of `kind`
    #[cfg(test)]
    pub fn get(&self, kind: &str) -> Option<&PlannedExtension> {
        self.of_kind(kind).pop()
    }
}

/// Settings the planner needs from the engine
pub(crate) struct Planner<'a> {
    pub defaults: &'a [Extension],
    pub contracts: &'a ContractRegistry,
    pub cache: &'a DependencyGraphCache,
    pub allow_unknown_contracts: bool,
}

impl Planner<'_> {
    pub fn plan(
        &self,
        container: &Container,
        parent: Option<&ContainerApi<'_>>,
        inherited: &Context,
    ) -> ComposeResult<Plan> {
        let api = ContainerApi::new(container.name(), container.registry(), parent);
        let effective = self.effective_extensions(container)?;

        let base_context = inherited
            .merged(container.config())
            .nested(container.name());

        let mut extensions = Vec::with_capacity(effective.len());
        for (extension, config) in effective {
            extension.validate()?;
            if let Some(contract) = extension.contract_name() {
                if !self.allow_unknown_contracts && !self.contracts.contains(contract) {
                    return Err(ComposeError::UnknownContract {
                        kind: extension.kind().to_string(),
                        contract: contract.to_string(),
                    });
                }
            }
            let version = extension.parsed_version()?;
            extensions.push(PlannedExtension {
                context: base_context.merged(&config),
                extension,
                version,
            });
        }

        let nodes = graph_nodes(&extensions);
        let graph = DependencyGraph::build_cached(&nodes, |kind| api.provides(kind), self.cache)?;

        check_versions(&extensions, &api)?;

        debug!(
            "Planned '{}': {} extensions in {} levels",
            container.name(),
            extensions.len(),
            graph.levels().len()
        );

        Ok(Plan {
            extensions,
            graph,
            base_context,
        })
    }

    /// Defaults first, then queued extensions in registration order.
    ///
    /// A later queued extension of an already-queued kind is kept only when
    /// marked `overwrite`; otherwise the pair is a duplicate. Both entries run
    /// in that kind's level and the later registration displaces the earlier
    /// one. Queued extensions silently supersede defaults, and defaults whose
    /// kind is already built in the container are skipped.
    fn effective_extensions(&self, container: &Container) -> ComposeResult<Vec<(Extension, Value)>> {
        let mut queued: Vec<(Extension, Value)> = Vec::new();
        let mut kinds: HashSet<&str> = HashSet::new();

        for pending in container.pending() {
            let kind = pending.extension.kind();
            if !kinds.insert(kind) {
                if !pending.extension.is_overwrite() {
                    return Err(ComposeError::DuplicateKind {
                        kind: kind.to_string(),
                    });
                }
                debug!("'{}' registered again with overwrite, the latest wins", kind);
            }
            queued.push((pending.extension.clone(), pending.config.clone()));
        }

        let mut effective: Vec<(Extension, Value)> = Vec::new();
        for default in self.defaults {
            let kind = default.kind();
            if kinds.contains(kind)
                || container.registry().contains(kind)
                || effective.iter().any(|(e, _)| e.kind() == kind)
            {
                continue;
            }
            effective.push((default.clone(), Value::Null));
        }
        effective.extend(queued);
        Ok(effective)
    }
}

/// One node per kind, at the kind's first position, depending on what any
/// of its planned extensions depends on
fn graph_nodes(extensions: &[PlannedExtension]) -> Vec<GraphNode> {
    let mut nodes: Vec<GraphNode> = Vec::new();
    for p in extensions {
        let kind = p.extension.kind();
        match nodes.iter_mut().find(|n| n.kind == kind) {
            Some(node) => {
                for dep in p.extension.dependency_kinds() {
                    if !node.depends_on.iter().any(|d| d == dep) {
                        node.depends_on.push(dep.to_string());
                    }
                }
            }
            None => nodes.push(GraphNode::new(kind, p.extension.dependency_kinds())),
        }
    }
    nodes
}

/// Every versioned dependency must match its provider: a planned extension
/// of that kind, or the latest capability already built here or above.
fn check_versions(extensions: &[PlannedExtension], api: &ContainerApi<'_>) -> ComposeResult<()> {
    let planned: HashMap<&str, Option<&Version>> = extensions
        .iter()
        .map(|p| (p.extension.kind(), p.version.as_ref()))
        .collect();

    for p in extensions {
        for dep in p.extension.dependencies() {
            if dep.requirement.is_none() {
                continue;
            }
            let found = match planned.get(dep.kind.as_str()) {
                Some(v) => (*v).cloned(),
                None => api.version_of(&dep.kind),
            };
            if !dep.accepts(found.as_ref())? {
                return Err(ComposeError::IncompatibleDependency {
                    kind: dep.kind.clone(),
                    requested_by: p.extension.kind().to_string(),
                    required: dep.requirement.clone().unwrap_or_default(),
                    found: found
                        .map(|v| v.to_string())
                        .unwrap_or_else(|| "an unversioned provider".to_string()),
                });
            }
        }
    }
    Ok(())
}
