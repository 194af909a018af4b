//! Error types for subsys
//!
//! Every build failure is surfaced as a single `ComposeError::Build` that
//! names the container, the phase it failed in, and the originating error.
//! Cleanup failures are `DisposeError`s: logged and aggregated, never returned
//! from a build.

use crate::contract::Violation;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for subsys operations
pub type ComposeResult<T> = Result<T, ComposeError>;

/// Boxed error produced by user code (factories, lifecycle hooks, members)
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Where a build was when it failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildPhase {
    /// Collecting extensions, merging context, computing levels
    Plan,
    /// Running the given level (zero-based)
    Execute(usize),
}

impl fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plan => write!(f, "plan"),
            Self::Execute(level) => write!(f, "execute level {}", level),
        }
    }
}

/// Which user callback failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactoryStage {
    /// The factory itself returned an error
    Factory,
    /// The capability's `init` hook rejected
    Init,
    /// A child container declared by the capability failed to build
    Child,
}

impl fmt::Display for FactoryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Factory => write!(f, "factory"),
            Self::Init => write!(f, "init"),
            Self::Child => write!(f, "child build"),
        }
    }
}

/// All errors that can occur while composing a container
#[derive(Error, Debug)]
pub enum ComposeError {
    // Plan errors
    #[error("Missing dependency '{kind}' required by '{requested_by}'")]
    MissingDependency { kind: String, requested_by: String },

    #[error("Dependency cycle detected: {}", .path.join(" -> "))]
    Cycle { path: Vec<String> },

    #[error("Duplicate kind '{kind}': two non-overwriting extensions claim it")]
    DuplicateKind { kind: String },

    #[error("Extension '{kind}' depends on itself")]
    SelfDependency { kind: String },

    #[error("Invalid extension '{kind}': {reason}")]
    InvalidExtension { kind: String, reason: String },

    #[error("'{requested_by}' requires '{kind}' {required}, found {found}")]
    IncompatibleDependency {
        kind: String,
        requested_by: String,
        required: String,
        found: String,
    },

    #[error("Extension '{kind}' names unknown contract '{contract}'")]
    UnknownContract { kind: String, contract: String },

    #[error("Invalid member spec '{spec}': {reason}")]
    InvalidMemberSpec { spec: String, reason: String },

    // Execute errors
    #[error("Capability '{kind}' violates contract '{contract}': {}", format_violations(.violations))]
    ContractViolation {
        kind: String,
        contract: String,
        violations: Vec<Violation>,
    },

    #[error("{stage} failed for '{kind}': {source}")]
    Factory {
        kind: String,
        stage: FactoryStage,
        #[source]
        source: BoxError,
    },

    #[error("Level {level} did not settle within {timeout:?}: init of '{kind}' never finished (stalled: {})", .stalled.join(", "))]
    LevelTimeout {
        level: usize,
        /// First kind whose `init` had not settled
        kind: String,
        stalled: Vec<String>,
        timeout: Duration,
    },

    /// The single error surfaced from a failed build
    #[error("Build of container '{container}' failed during {phase}: {source}")]
    Build {
        container: String,
        phase: BuildPhase,
        #[source]
        source: Box<ComposeError>,
    },

    // Member invocation errors
    #[error("No member '{0}' is attached to the container")]
    MemberNotFound(String),

    #[error("Member '{name}' expects {expected} argument(s), got {got}")]
    ArityMismatch {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("Member '{name}' failed: {source}")]
    Member {
        name: String,
        #[source]
        source: BoxError,
    },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid manifest {path}: {reason}")]
    ManifestInvalid { path: PathBuf, reason: String },

    #[error("Invalid context section '{section}': {reason}")]
    ContextInvalid { section: String, reason: String },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),
}

fn format_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ComposeError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Wrap a user error raised by a factory, `init` or child build
    pub fn factory(kind: impl Into<String>, stage: FactoryStage, source: BoxError) -> Self {
        Self::Factory {
            kind: kind.into(),
            stage,
            source,
        }
    }

    /// Wrap an originating error into the error surfaced from `build()`
    pub fn build(container: impl Into<String>, phase: BuildPhase, source: ComposeError) -> Self {
        Self::Build {
            container: container.into(),
            phase,
            source: Box::new(source),
        }
    }

    /// The originating error, unwrapping any `Build` layers
    pub fn cause(&self) -> &ComposeError {
        match self {
            Self::Build { source, .. } => source.cause(),
            other => other,
        }
    }

    /// Phase of the outermost build failure, if this is a build error
    pub fn phase(&self) -> Option<BuildPhase> {
        match self {
            Self::Build { phase, .. } => Some(*phase),
            _ => None,
        }
    }

    /// The kind the originating error is about
    pub fn kind(&self) -> Option<&str> {
        match self.cause() {
            Self::MissingDependency { requested_by, .. } => Some(requested_by),
            Self::IncompatibleDependency { requested_by, .. } => Some(requested_by),
            Self::Cycle { path } => path.first().map(String::as_str),
            Self::DuplicateKind { kind }
            | Self::SelfDependency { kind }
            | Self::InvalidExtension { kind, .. }
            | Self::UnknownContract { kind, .. }
            | Self::ContractViolation { kind, .. }
            | Self::Factory { kind, .. }
            | Self::LevelTimeout { kind, .. } => Some(kind),
            _ => None,
        }
    }

    /// Whether the error was detected before any capability was produced
    pub fn is_plan_error(&self) -> bool {
        matches!(
            self.cause(),
            Self::MissingDependency { .. }
                | Self::Cycle { .. }
                | Self::DuplicateKind { .. }
                | Self::SelfDependency { .. }
                | Self::InvalidExtension { .. }
                | Self::IncompatibleDependency { .. }
                | Self::UnknownContract { .. }
        )
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self.cause() {
            Self::MissingDependency { .. } => {
                Some("Register an extension providing the missing kind, or build it in a parent container")
            }
            Self::Cycle { .. } => Some("Break the cycle by removing one of the listed dependencies"),
            Self::DuplicateKind { .. } => Some("Mark the later extension with overwrite = true"),
            Self::UnknownContract { .. } => Some("Register the contract before building"),
            Self::InvalidMemberSpec { .. } => Some("Write members as 'name' (property) or 'name:arity' (method)"),
            Self::LevelTimeout { .. } => Some("Raise engine.level_timeout_ms or fix the stalled init"),
            _ => None,
        }
    }
}

/// A non-fatal cleanup failure raised by a capability's `dispose`
#[derive(Error, Debug)]
#[error("dispose of '{kind}' (#{order_index}) failed: {source}")]
pub struct DisposeError {
    pub kind: String,
    pub order_index: u64,
    #[source]
    pub source: BoxError,
}

/// Outcome of disposing a set of capabilities
#[derive(Debug, Default)]
pub struct DisposeReport {
    /// Number of capabilities whose disposal was attempted
    pub disposed: usize,

    /// Failures, in the order they happened
    pub failures: Vec<DisposeError>,
}

impl DisposeReport {
    /// Whether every dispose succeeded
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Fold another report into this one
    pub fn merge(&mut self, other: DisposeReport) {
        self.disposed += other.disposed;
        self.failures.extend(other.failures);
    }
}
