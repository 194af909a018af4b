//! Composition manifest parsing
//!
//! A manifest describes one container declaratively so it can be planned and
//! checked without application code:
//!
//! ```toml
//! [container]
//! name = "app"
//!
//! [config]
//! region = "eu"
//!
//! [[extension]]
//! kind = "store"
//! version = "1.2.0"
//! depends_on = ["log"]
//! requires = { log = "^1" }
//! contract = "kv"
//! members = ["get:1", "put:2", "name"]
//!
//! [contract.kv]
//! members = ["get:1", "put:2"]
//! ```
//!
//! Capabilities built from a manifest are synthesized: every listed member
//! exists with the declared shape, methods return `null`.

use crate::capability::{Capability, Member, Members};
use crate::container::Container;
use crate::contract::{Contract, ContractRegistry, MemberShape, MemberSpec};
use crate::error::{ComposeError, ComposeResult};
use crate::extension::Extension;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Parsed composition manifest
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    /// Container metadata
    pub container: ContainerSection,

    /// Container-level configuration
    #[serde(default)]
    pub config: toml::Table,

    /// Extensions, in registration order
    #[serde(default, rename = "extension")]
    pub extensions: Vec<ExtensionSpec>,

    /// Named contracts
    #[serde(default, rename = "contract")]
    pub contracts: BTreeMap<String, ContractSpec>,

    #[serde(skip)]
    source: PathBuf,
}

/// `[container]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContainerSection {
    pub name: String,
}

/// One `[[extension]]` entry
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtensionSpec {
    pub kind: String,

    #[serde(default)]
    pub version: Option<String>,

    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Versioned dependencies: kind -> semver requirement
    #[serde(default)]
    pub requires: BTreeMap<String, String>,

    #[serde(default)]
    pub overwrite: bool,

    #[serde(default)]
    pub attach: bool,

    #[serde(default)]
    pub contract: Option<String>,

    /// Member specs of the synthesized capability (`name` or `name:arity`)
    #[serde(default)]
    pub members: Vec<String>,

    /// Per-extension configuration
    #[serde(default)]
    pub config: toml::Table,
}

/// One `[contract.<name>]` entry
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContractSpec {
    pub members: Vec<String>,
}

impl Manifest {
    /// Parse a manifest from a TOML file on disk
    pub async fn from_file(path: &Path) -> ComposeResult<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            ComposeError::io(format!("reading manifest {}", path.display()), e)
        })?;
        Self::parse(&content, path)
    }

    /// Parse a manifest from a TOML string; `path` is only used in errors
    pub fn parse(content: &str, path: &Path) -> ComposeResult<Self> {
        let mut manifest: Self = toml::from_str(content).map_err(|e| invalid(path, e))?;
        manifest.source = path.to_path_buf();

        if manifest.container.name.trim().is_empty() {
            return Err(invalid(path, "container name must not be empty"));
        }
        Ok(manifest)
    }

    /// Where the manifest was read from
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Contracts declared by the manifest
    pub fn contract_registry(&self) -> ComposeResult<ContractRegistry> {
        let mut registry = ContractRegistry::new();
        for (name, spec) in &self.contracts {
            let contract = Contract::parse(name.as_str(), &spec.members)
                .map_err(|e| invalid(&self.source, format!("contract '{}': {}", name, e)))?;
            registry.register(contract);
        }
        Ok(registry)
    }

    /// Container with every manifest extension queued, in file order
    pub fn container(&self) -> ComposeResult<Container> {
        let config = to_json(&self.config)?;
        let mut container = Container::new(self.container.name.as_str()).with_config(config);
        for spec in &self.extensions {
            let extension = spec.to_extension().map_err(|e| {
                invalid(&self.source, format!("extension '{}': {}", spec.kind, e))
            })?;
            container.use_with(extension, to_json(&spec.config)?);
        }
        Ok(container)
    }
}

impl ExtensionSpec {
    /// Extension whose factory synthesizes the declared members
    pub fn to_extension(&self) -> ComposeResult<Extension> {
        let mut members = Members::new();
        for raw in &self.members {
            let spec = MemberSpec::parse(raw)?;
            let member = match spec.shape {
                MemberShape::Method { arity } => Member::method(arity, |_| Ok(Value::Null)),
                MemberShape::Property => Member::property(Value::Null),
            };
            members.insert(spec.name, member);
        }

        let kind = self.kind.clone();
        let mut extension = Extension::new(self.kind.as_str(), move |_, _| {
            Ok(Capability::new(kind.as_str()).with_members(members.clone()))
        })
        .overwrite(self.overwrite)
        .attach(self.attach);

        if let Some(version) = &self.version {
            extension = extension.version(version.as_str());
        }
        for dep in &self.depends_on {
            extension = extension.depends_on(dep.as_str());
        }
        for (dep, requirement) in &self.requires {
            extension = extension.requires(dep.as_str(), requirement.as_str());
        }
        if let Some(contract) = &self.contract {
            extension = extension.contract(contract.as_str());
        }
        Ok(extension)
    }
}

fn to_json(table: &toml::Table) -> ComposeResult<Value> {
    Ok(serde_json::to_value(table)?)
}

fn invalid(path: &Path, reason: impl ToString) -> ComposeError {
    ComposeError::ManifestInvalid {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}
