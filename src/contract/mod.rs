//! Structural contracts
//!
//! A contract names the member surface a capability of some kind must
//! expose: methods with a fixed arity, and plain properties. Capabilities
//! are validated against their extension's contract before they are
//! registered and exposed.

mod registry;

pub use registry::ContractRegistry;

use crate::capability::{Member, Members};
use crate::error::{ComposeError, ComposeResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Expected shape of one member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type")]
pub enum MemberShape {
    /// Callable taking exactly `arity` arguments
    Method { arity: usize },
    /// Plain value
    Property,
}

impl fmt::Display for MemberShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Method { arity } => write!(f, "method/{}", arity),
            Self::Property => write!(f, "property"),
        }
    }
}

/// One required member of a contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberSpec {
    pub name: String,
    pub shape: MemberShape,
}

impl MemberSpec {
    /// Parse `"name:arity"` as a method, or a bare `"name"` as a property
    pub fn parse(spec: &str) -> ComposeResult<Self> {
        let spec = spec.trim();
        let (name, shape) = match spec.split_once(':') {
            Some((name, arity)) => {
                let arity = arity.trim().parse::<usize>().map_err(|_| {
                    invalid_spec(spec, "arity must be a non-negative number")
                })?;
                (name.trim(), MemberShape::Method { arity })
            }
            None => (spec, MemberShape::Property),
        };

        if name.is_empty() {
            return Err(invalid_spec(spec, "empty member name"));
        }

        Ok(Self {
            name: name.to_string(),
            shape,
        })
    }
}

fn invalid_spec(spec: &str, reason: &str) -> ComposeError {
    ComposeError::InvalidMemberSpec {
        spec: spec.to_string(),
        reason: reason.to_string(),
    }
}

/// A single way a member surface fails a contract
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// The member is absent
    Missing { member: String },
    /// The member is a method with the wrong number of parameters
    ArityMismatch {
        member: String,
        expected: usize,
        found: usize,
    },
    /// A method was required but a property was found, or vice versa
    ShapeMismatch {
        member: String,
        expected: MemberShape,
        found: MemberShape,
    },
}

impl Violation {
    /// Name of the offending member
    pub fn member(&self) -> &str {
        match self {
            Self::Missing { member }
            | Self::ArityMismatch { member, .. }
            | Self::ShapeMismatch { member, .. } => member,
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing { member } => write!(f, "missing member '{}'", member),
            Self::ArityMismatch {
                member,
                expected,
                found,
            } => write!(
                f,
                "member '{}' takes {} argument(s), contract requires {}",
                member, found, expected
            ),
            Self::ShapeMismatch {
                member,
                expected,
                found,
            } => write!(
                f,
                "member '{}' is a {}, contract requires a {}",
                member, found, expected
            ),
        }
    }
}

/// A named structural requirement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
    pub name: String,
    pub members: Vec<MemberSpec>,
}

impl Contract {
    /// Empty contract; add members with [`Contract::method`] and [`Contract::property`]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: Vec::new(),
        }
    }

    /// Build a contract from `"name:arity"` / `"name"` member specs
    pub fn parse(name: impl Into<String>, specs: &[String]) -> ComposeResult<Self> {
        let members = specs
            .iter()
            .map(|s| MemberSpec::parse(s))
            .collect::<ComposeResult<Vec<_>>>()?;
        Ok(Self {
            name: name.into(),
            members,
        })
    }

    /// Require a method
    pub fn method(mut self, name: impl Into<String>, arity: usize) -> Self {
        self.members.push(MemberSpec {
            name: name.into(),
            shape: MemberShape::Method { arity },
        });
        self
    }

    /// Require a property
    pub fn property(mut self, name: impl Into<String>) -> Self {
        self.members.push(MemberSpec {
            name: name.into(),
            shape: MemberShape::Property,
        });
        self
    }

    /// Every way `members` fails this contract, in contract order
    pub fn check(&self, members: &Members) -> Vec<Violation> {
        self.members
            .iter()
            .filter_map(|spec| check_member(spec, members.get(&spec.name)))
            .collect()
    }
}

fn check_member(spec: &MemberSpec, member: Option<&Member>) -> Option<Violation> {
    let member = match member {
        Some(m) => m,
        None => {
            return Some(Violation::Missing {
                member: spec.name.clone(),
            })
        }
    };

    let found = member.shape();
    match (spec.shape, found) {
        (MemberShape::Method { arity: expected }, MemberShape::Method { arity: found })
            if expected != found =>
        {
            Some(Violation::ArityMismatch {
                member: spec.name.clone(),
                expected,
                found,
            })
        }
        (MemberShape::Method { .. }, MemberShape::Method { .. })
        | (MemberShape::Property, MemberShape::Property) => None,
        (expected, found) => Some(Violation::ShapeMismatch {
            member: spec.name.clone(),
            expected,
            found,
        }),
    }
}
