//! Contract registry

use super::Contract;
use crate::capability::Capability;
use crate::error::{ComposeError, ComposeResult};
use std::collections::HashMap;
use tracing::debug;

/// Maps contract names to their required member shapes
#[derive(Debug, Clone, Default)]
pub struct ContractRegistry {
    contracts: HashMap<String, Contract>,
}

impl ContractRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a contract, replacing any previous contract of the same name
    pub fn register(&mut self, contract: Contract) {
        debug!(
            "Registered contract '{}' ({} members)",
            contract.name,
            contract.members.len()
        );
        self.contracts.insert(contract.name.clone(), contract);
    }

    pub fn get(&self, name: &str) -> Option<&Contract> {
        self.contracts.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.contracts.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.contracts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }

    /// Validate a freshly produced capability against the named contract.
    ///
    /// An unregistered contract name is an error unless `allow_unknown` is set,
    /// in which case the capability passes unchecked.
    pub fn validate(
        &self,
        contract_name: &str,
        capability: &Capability,
        allow_unknown: bool,
    ) -> ComposeResult<()> {
        let contract = match self.contracts.get(contract_name) {
            Some(c) => c,
            None if allow_unknown => {
                debug!(
                    "Contract '{}' not registered, skipping validation of '{}'",
                    contract_name,
                    capability.kind()
                );
                return Ok(());
            }
            None => {
                return Err(ComposeError::UnknownContract {
                    kind: capability.kind().to_string(),
                    contract: contract_name.to_string(),
                })
            }
        };

        let violations = contract.check(capability.members());
        if violations.is_empty() {
            Ok(())
        } else {
            Err(ComposeError::ContractViolation {
                kind: capability.kind().to_string(),
                contract: contract_name.to_string(),
                violations,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::Member;
    use serde_json::json;

    fn reader() -> Capability {
        Capability::new("store").member("read", Member::method(1, |_| Ok(json!(null))))
    }

    #[test]
    fn validate_reports_missing_write() {
        let mut registry = ContractRegistry::new();
        registry.register(Contract::new("rw").method("read", 1).method("write", 2));

        let err = registry.validate("rw", &reader(), false).unwrap_err();
        match err {
            ComposeError::ContractViolation {
                kind,
                contract,
                violations,
            } => {
                assert_eq!(kind, "store");
                assert_eq!(contract, "rw");
                assert_eq!(violations.len(), 1);
                assert_eq!(violations[0].member(), "write");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unknown_contract_policy() {
        let registry = ContractRegistry::new();
        assert!(matches!(
            registry.validate("ghost", &reader(), false),
            Err(ComposeError::UnknownContract { .. })
        ));
        assert!(registry.validate("ghost", &reader(), true).is_ok());
    }

    #[test]
    fn register_replaces_by_name() {
        let mut registry = ContractRegistry::new();
        registry.register(Contract::new("rw").method("read", 1));
        registry.register(Contract::new("rw").method("read", 1).method("write", 2));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("rw").unwrap().members.len(), 2);
    }
}
