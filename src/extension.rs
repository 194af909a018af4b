//! Extension descriptors
//!
//! An extension is an immutable description of a pluggable unit: the kind it
//! provides, the kinds it needs built first, how it interacts with existing
//! capabilities of its kind, and the factory producing its capability.

use crate::capability::Capability;
use crate::context::Context;
use crate::error::{BoxError, ComposeError, ComposeResult};
use crate::registry::ContainerApi;
use semver::{Version, VersionReq};
use std::fmt;
use std::sync::Arc;

/// Signature of a capability factory
pub type FactoryFn =
    dyn Fn(&Context, &ContainerApi<'_>) -> Result<Capability, BoxError> + Send + Sync;

/// A declared dependency on another kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub kind: String,

    /// Semver requirement on the providing extension's version, if any
    pub requirement: Option<String>,
}

impl Dependency {
    /// Check `found` against the requirement. Unversioned providers only
    /// satisfy unconstrained dependencies.
    pub(crate) fn accepts(&self, found: Option<&Version>) -> ComposeResult<bool> {
        let Some(raw) = &self.requirement else {
            return Ok(true);
        };
        let req = parse_requirement(&self.kind, raw)?;
        Ok(found.is_some_and(|v| req.matches(v)))
    }
}

/// Descriptor of a pluggable unit
#[derive(Clone)]
pub struct Extension {
    kind: String,
    version: Option<String>,
    depends_on: Vec<Dependency>,
    overwrite: bool,
    attach: bool,
    contract: Option<String>,
    factory: Arc<FactoryFn>,
}

impl Extension {
    pub fn new<F>(kind: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&Context, &ContainerApi<'_>) -> Result<Capability, BoxError> + Send + Sync + 'static,
    {
        Self {
            kind: kind.into(),
            version: None,
            depends_on: Vec::new(),
            overwrite: false,
            attach: false,
            contract: None,
            factory: Arc::new(factory),
        }
    }

    /// Semantic version of this extension (validated at plan time)
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Require `kind` to be built first
    pub fn depends_on(mut self, kind: impl Into<String>) -> Self {
        self.push_dependency(kind.into(), None);
        self
    }

    /// Require `kind` to be built first, at a version matching `requirement` (e.g. `"^1.2"`)
    pub fn requires(mut self, kind: impl Into<String>, requirement: impl Into<String>) -> Self {
        self.push_dependency(kind.into(), Some(requirement.into()));
        self
    }

    /// Replace existing capabilities of this kind instead of adding alongside them
    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Expose this capability's members directly on the container
    pub fn attach(mut self, attach: bool) -> Self {
        self.attach = attach;
        self
    }

    /// Validate produced capabilities against a registered contract
    pub fn contract(mut self, name: impl Into<String>) -> Self {
        self.contract = Some(name.into());
        self
    }

    fn push_dependency(&mut self, kind: String, requirement: Option<String>) {
        match self.depends_on.iter_mut().find(|d| d.kind == kind) {
            Some(existing) => {
                if requirement.is_some() {
                    existing.requirement = requirement;
                }
            }
            None => self.depends_on.push(Dependency { kind, requirement }),
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn raw_version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn dependencies(&self) -> &[Dependency] {
        &self.depends_on
    }

    pub fn dependency_kinds(&self) -> impl Iterator<Item = &str> {
        self.depends_on.iter().map(|d| d.kind.as_str())
    }

    pub fn is_overwrite(&self) -> bool {
        self.overwrite
    }

    pub fn is_attached(&self) -> bool {
        self.attach
    }

    pub fn contract_name(&self) -> Option<&str> {
        self.contract.as_deref()
    }

    /// Parsed version; `None` when unversioned
    pub fn parsed_version(&self) -> ComposeResult<Option<Version>> {
        self.version
            .as_deref()
            .map(|raw| {
                Version::parse(raw).map_err(|e| ComposeError::InvalidExtension {
                    kind: self.kind.clone(),
                    reason: format!("version '{}' is not semver: {}", raw, e),
                })
            })
            .transpose()
    }

    /// Check the descriptor's own invariants
    pub fn validate(&self) -> ComposeResult<()> {
        if self.kind.trim().is_empty() {
            return Err(ComposeError::InvalidExtension {
                kind: self.kind.clone(),
                reason: "kind must not be empty".to_string(),
            });
        }
        if self.kind.trim() != self.kind {
            return Err(ComposeError::InvalidExtension {
                kind: self.kind.clone(),
                reason: "kind must not have surrounding whitespace".to_string(),
            });
        }
        if self.depends_on.iter().any(|d| d.kind == self.kind) {
            return Err(ComposeError::SelfDependency {
                kind: self.kind.clone(),
            });
        }
        self.parsed_version()?;
        for dep in &self.depends_on {
            if let Some(raw) = &dep.requirement {
                parse_requirement(&self.kind, raw)?;
            }
        }
        Ok(())
    }

    /// Run the factory
    pub(crate) fn produce(
        &self,
        ctx: &Context,
        api: &ContainerApi<'_>,
    ) -> Result<Capability, BoxError> {
        (self.factory)(ctx, api)
    }
}

fn parse_requirement(kind: &str, raw: &str) -> ComposeResult<VersionReq> {
    VersionReq::parse(raw).map_err(|e| ComposeError::InvalidExtension {
        kind: kind.to_string(),
        reason: format!("version requirement '{}' is invalid: {}", raw, e),
    })
}

impl fmt::Debug for Extension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extension")
            .field("kind", &self.kind)
            .field("version", &self.version)
            .field("depends_on", &self.depends_on)
            .field("overwrite", &self.overwrite)
            .field("attach", &self.attach)
            .field("contract", &self.contract)
            .finish_non_exhaustive()
    }
}
