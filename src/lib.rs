//! subsys - dependency-aware, transactional composition engine
//!
//! Applications describe their subsystems as [`Extension`]s: a kind, the
//! kinds it depends on, and a factory producing a [`Capability`]. A
//! [`Container`] queues extensions and builds them through a
//! [`CompositionBuilder`], level by level in dependency order. A build either
//! commits completely or leaves the container exactly as it was.

pub mod builder;
pub mod capability;
pub mod cli;
pub mod config;
pub mod container;
pub mod context;
pub mod contract;
pub mod error;
pub mod extension;
pub mod graph;
pub mod manifest;
pub mod registry;
pub mod ui;

pub use builder::{BuildOutcome, BuildState, CompositionBuilder};
pub use capability::{Capability, Lifecycle, Member, Members};
pub use container::Container;
pub use context::Context;
pub use contract::{Contract, ContractRegistry, MemberShape, MemberSpec, Violation};
pub use error::{BoxError, ComposeError, ComposeResult, DisposeError, DisposeReport};
pub use extension::{Dependency, Extension};
pub use graph::{DependencyGraph, DependencyGraphCache, GraphKey, GraphNode};
pub use registry::{CapabilityRegistry, ContainerApi};
