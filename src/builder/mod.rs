//! Composition builder
//!
//! Runs the two-phase build of a container:
//!
//! 1. **Plan**: effective extension list, contexts, levels (via the shared cache).
//! 2. **Execute**: levels strictly in order. Within a level every factory is
//!    invoked, every candidate validated against its contract, child
//!    containers built, candidates registered, and then all `init` hooks are
//!    started together and joined before the next level begins.
//!
//! Any factory error, contract violation, child build failure or `init`
//! rejection rolls back everything the call registered and leaves the
//! container exactly as it was.

mod plan;
mod transaction;

pub use transaction::BuildState;

use crate::capability::Capability;
use crate::config::schema::EngineConfig;
use crate::container::Container;
use crate::context::Context;
use crate::contract::{Contract, ContractRegistry};
use crate::error::{BuildPhase, ComposeError, ComposeResult, DisposeReport, FactoryStage};
use crate::extension::Extension;
use crate::graph::{DependencyGraph, DependencyGraphCache, Levels};
use crate::registry::ContainerApi;
use futures_util::future::{join_all, BoxFuture};
use plan::{Plan, PlannedExtension, Planner};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, info_span, warn, Instrument};
use transaction::Transaction;
use uuid::Uuid;

/// Result of a committed build
#[derive(Debug)]
pub struct BuildOutcome {
    /// Identifier of this build call, as logged
    pub build_id: Uuid,

    /// Levels executed, each in the container's own registration order
    pub levels: Levels,

    /// `(kind, order_index)` of every capability registered, in registration order
    pub registered: Vec<(String, u64)>,

    /// Whether the level computation came from the cache
    pub cache_hit: bool,

    /// Disposal of capabilities replaced by overwriting extensions
    pub displaced: DisposeReport,
}

/// A capability produced by its factory but not yet registered
struct Candidate<'p> {
    planned: &'p PlannedExtension,
    capability: Capability,
}

/// Drives builds. Holds the state shared across containers: the graph
/// cache, the contract registry, and the framework default extensions.
#[derive(Debug, Clone)]
pub struct CompositionBuilder {
    cache: Arc<DependencyGraphCache>,
    contracts: Arc<ContractRegistry>,
    defaults: Vec<Extension>,
    level_timeout: Option<Duration>,
    allow_unknown_contracts: bool,
}

impl Default for CompositionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CompositionBuilder {
    pub fn new() -> Self {
        Self {
            cache: Arc::new(DependencyGraphCache::default()),
            contracts: Arc::new(ContractRegistry::new()),
            defaults: Vec::new(),
            level_timeout: None,
            allow_unknown_contracts: false,
        }
    }

    /// Engine configured from the `[engine]` config section
    pub fn from_config(config: &EngineConfig) -> Self {
        let builder = Self::new()
            .with_cache(Arc::new(DependencyGraphCache::new(config.cache_capacity)))
            .allow_unknown_contracts(!config.fail_on_unknown_contract);
        match config.level_timeout() {
            Some(timeout) => builder.with_level_timeout(timeout),
            None => builder,
        }
    }

    /// Share a graph cache (e.g. between engines, or a fresh one per test)
    pub fn with_cache(mut self, cache: Arc<DependencyGraphCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_contracts(mut self, contracts: ContractRegistry) -> Self {
        self.contracts = Arc::new(contracts);
        self
    }

    pub fn register_contract(&mut self, contract: Contract) -> &mut Self {
        Arc::make_mut(&mut self.contracts).register(contract);
        self
    }

    /// Framework default extensions, built into every container that does
    /// not already provide or queue their kind
    pub fn with_defaults(mut self, defaults: Vec<Extension>) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_default(mut self, extension: Extension) -> Self {
        self.defaults.push(extension);
        self
    }

    /// Bound the time each level's `init` join may take
    pub fn with_level_timeout(mut self, timeout: Duration) -> Self {
        self.level_timeout = Some(timeout);
        self
    }

    /// Let extensions name contracts that are not registered (unchecked)
    pub fn allow_unknown_contracts(mut self, allow: bool) -> Self {
        self.allow_unknown_contracts = allow;
        self
    }

    pub fn cache(&self) -> &Arc<DependencyGraphCache> {
        &self.cache
    }

    pub fn contracts(&self) -> &ContractRegistry {
        &self.contracts
    }

    /// Run only the plan phase for a root container and return its levels.
    ///
    /// Nothing is produced or registered; the graph cache is consulted and
    /// filled exactly as a real build would.
    pub fn plan(&self, container: &Container) -> ComposeResult<DependencyGraph> {
        self.planner()
            .plan(container, None, &Context::new())
            .map(|plan| plan.graph)
            .map_err(|e| ComposeError::build(container.name(), BuildPhase::Plan, e))
    }

    fn planner(&self) -> Planner<'_> {
        Planner {
            defaults: &self.defaults,
            contracts: &self.contracts,
            cache: &self.cache,
            allow_unknown_contracts: self.allow_unknown_contracts,
        }
    }

    /// Build a root container
    pub async fn build(&self, container: &mut Container) -> ComposeResult<BuildOutcome> {
        self.build_in(container, None, &Context::new()).await
    }

    /// Build `container` beneath an optional parent, inheriting `inherited`
    pub(crate) fn build_in<'a>(
        &'a self,
        container: &'a mut Container,
        parent: Option<&'a ContainerApi<'a>>,
        inherited: &'a Context,
    ) -> BoxFuture<'a, ComposeResult<BuildOutcome>> {
        let build_id = Uuid::new_v4();
        let span = info_span!("build", container = %container.name(), %build_id);
        Box::pin(self.run(build_id, container, parent, inherited).instrument(span))
    }

    async fn run(
        &self,
        build_id: Uuid,
        container: &mut Container,
        parent: Option<&ContainerApi<'_>>,
        inherited: &Context,
    ) -> ComposeResult<BuildOutcome> {
        let mut tx = Transaction::new();

        let plan = match self.planner().plan(container, parent, inherited) {
            Ok(plan) => plan,
            Err(e) => {
                tx.advance(BuildState::Failed);
                container.set_last_state(BuildState::Failed);
                return Err(ComposeError::build(container.name(), BuildPhase::Plan, e));
            }
        };

        for (n, level) in plan.graph.levels().iter().enumerate() {
            tx.advance(BuildState::Executing(n));
            if let Err(e) = self
                .execute_level(n, level, &plan, container, parent, &mut tx)
                .await
            {
                tx.rollback(container).await;
                container.set_last_state(BuildState::Failed);
                return Err(ComposeError::build(
                    container.name(),
                    BuildPhase::Execute(n),
                    e,
                ));
            }
        }

        let registered: Vec<(String, u64)> = tx
            .registered()
            .iter()
            .map(|c| (c.kind().to_string(), c.order_index()))
            .collect();
        let committed: Vec<(String, bool, bool)> = plan
            .extensions
            .iter()
            .map(|p| {
                (
                    p.extension.kind().to_string(),
                    p.extension.is_attached(),
                    p.extension.is_overwrite(),
                )
            })
            .collect();

        let displaced = tx.commit(container).await;
        container.commit(plan.base_context.clone(), &committed);
        container.set_last_state(BuildState::Committed);

        info!(
            "Built '{}': {} capabilities in {} levels",
            container.name(),
            registered.len(),
            plan.graph.levels().len()
        );

        let cache_hit = plan.graph.cache_hit();
        Ok(BuildOutcome {
            build_id,
            levels: plan.graph.into_levels(),
            registered,
            cache_hit,
            displaced,
        })
    }

    async fn execute_level(
        &self,
        n: usize,
        level: &[String],
        plan: &Plan,
        container: &mut Container,
        parent: Option<&ContainerApi<'_>>,
        tx: &mut Transaction,
    ) -> ComposeResult<()> {
        debug!("Level {}: {}", n, level.join(", "));

        let mut candidates = self.produce(level, plan, container, parent)?;

        if let Err(e) = self.build_children(&mut candidates, container, parent).await {
            for candidate in &mut candidates {
                for child in candidate.capability.children_mut().iter_mut().rev() {
                    child.dispose().await;
                }
            }
            return Err(e);
        }

        let mut to_init = Vec::new();
        for Candidate {
            planned,
            capability,
        } in candidates
        {
            let registration = container
                .registry
                .register(capability, planned.extension.is_overwrite());
            tx.record_displaced(registration.displaced);
            if let Some(lifecycle) = registration.capability.lifecycle() {
                to_init.push((planned.extension.kind(), lifecycle, &planned.context));
            }
            tx.record_registered(registration.capability);
        }

        // every init starts before any of them is awaited
        let settled: Mutex<Vec<&str>> = Mutex::new(Vec::new());
        let joined = join_all(to_init.iter().map(|(kind, lifecycle, ctx)| {
            let settled = &settled;
            async move {
                let result = lifecycle.init(ctx).await;
                if let Ok(mut settled) = settled.lock() {
                    settled.push(*kind);
                }
                (*kind, result)
            }
        }));
        let results = match self.level_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, joined).await {
                Ok(results) => results,
                Err(_) => {
                    let settled = settled.lock().map(|s| s.clone()).unwrap_or_default();
                    let mut stalled: Vec<String> = Vec::new();
                    for (kind, _, _) in &to_init {
                        if !settled.contains(kind) && !stalled.iter().any(|s| s == kind) {
                            stalled.push(kind.to_string());
                        }
                    }
                    let kind = stalled.first().or(level.first()).cloned().unwrap_or_default();
                    return Err(ComposeError::LevelTimeout {
                        level: n,
                        kind,
                        stalled,
                        timeout,
                    });
                }
            },
            None => joined.await,
        };
        tx.record_initialized(results.len());

        let mut first_error = None;
        for (kind, result) in results {
            if let Err(source) = result {
                if first_error.is_none() {
                    first_error = Some(ComposeError::factory(kind, FactoryStage::Init, source));
                } else {
                    warn!("init of '{}' also failed: {}", kind, source);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Invoke every factory of the level and validate the results
    fn produce<'p>(
        &self,
        level: &[String],
        plan: &'p Plan,
        container: &Container,
        parent: Option<&ContainerApi<'_>>,
    ) -> ComposeResult<Vec<Candidate<'p>>> {
        let api = ContainerApi::new(container.name(), &container.registry, parent);
        let mut candidates = Vec::with_capacity(level.len());

        for kind in level {
            let of_kind = plan.of_kind(kind);
            if of_kind.is_empty() {
                return Err(ComposeError::Internal(format!("'{}' missing from plan", kind)));
            }
            // overwritten entries first, so the latest registration wins
            for planned in of_kind {
                candidates.push(self.produce_one(kind, planned, &api)?);
            }
        }

        Ok(candidates)
    }

    /// Invoke one factory and check its capability against the extension
    fn produce_one<'p>(
        &self,
        kind: &str,
        planned: &'p PlannedExtension,
        api: &ContainerApi<'_>,
    ) -> ComposeResult<Candidate<'p>> {
        let extension = &planned.extension;

        let mut capability = extension
            .produce(&planned.context, api)
            .map_err(|source| ComposeError::factory(kind, FactoryStage::Factory, source))?;

        if capability.kind().is_empty() {
            capability.set_kind(kind);
        } else if capability.kind() != kind {
            return Err(ComposeError::InvalidExtension {
                kind: kind.to_string(),
                reason: format!(
                    "factory produced a capability of kind '{}'",
                    capability.kind()
                ),
            });
        }
        capability.set_version(planned.version.clone());

        if let Some(contract) = extension.contract_name() {
            self.contracts
                .validate(contract, &capability, self.allow_unknown_contracts)?;
        }

        Ok(Candidate {
            planned,
            capability,
        })
    }

    /// Build every declared child container, one candidate at a time
    async fn build_children(
        &self,
        candidates: &mut [Candidate<'_>],
        container: &Container,
        parent: Option<&ContainerApi<'_>>,
    ) -> ComposeResult<()> {
        let api = ContainerApi::new(container.name(), &container.registry, parent);
        for candidate in candidates.iter_mut() {
            let kind = candidate.planned.extension.kind();
            let ctx = &candidate.planned.context;
            for child in candidate.capability.children_mut().iter_mut() {
                debug!("Building child '{}' of '{}'", child.name(), kind);
                self.build_in(child, Some(&api), ctx)
                    .await
                    .map_err(|e| ComposeError::factory(kind, FactoryStage::Child, Box::new(e)))?;
            }
        }
        Ok(())
    }
}
