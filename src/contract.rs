//! Contracts
//!
//! A contract (a PPA, an O&M agreement, ...) is the scope for clause and
//! tariff identity keys, for amendments, and for relationship-graph queries.
//! The engine does not manage the surrounding contract CRUD; it only needs
//! enough of the record to enforce scoping and to flip `has_amendments`
//! when a supersede carries an amendment reference.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::RwLock;

use crate::context::OperationContext;
use crate::errors::{EngineError, EngineResult};
use crate::identifiers::{ContractId, OrgId};

/// A contract under management
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    /// Contract id
    pub id: ContractId,
    /// Owning organization
    pub organization: OrgId,
    /// Human-readable name ("Solar PPA — Plant A")
    pub name: String,
    /// The counterparty, if known
    pub counterparty: Option<String>,
    /// Whether any clause or tariff row has been superseded by amendment
    pub has_amendments: bool,
    /// When the record was created
    pub created_at: DateTime<Utc>,
}

impl Contract {
    /// Create a contract record
    pub fn new(organization: OrgId, name: impl Into<String>) -> Self {
        Self {
            id: ContractId::new(),
            organization,
            name: name.into(),
            counterparty: None,
            has_amendments: false,
            created_at: Utc::now(),
        }
    }

    /// Set the counterparty name
    pub fn with_counterparty(mut self, counterparty: impl Into<String>) -> Self {
        self.counterparty = Some(counterparty.into());
        self
    }
}

/// In-memory contract store
#[derive(Debug, Default)]
pub struct ContractStore {
    rows: RwLock<IndexMap<ContractId, Contract>>,
}

impl ContractStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a contract
    pub fn insert(&self, ctx: &OperationContext, contract: Contract) -> EngineResult<ContractId> {
        if contract.organization != ctx.organization {
            return Err(EngineError::Validation(
                "contract organization does not match the operation context".to_string(),
            ));
        }
        let mut rows = self.rows.write().expect("contract store lock poisoned");
        if rows.contains_key(&contract.id) {
            return Err(EngineError::AlreadyExists(format!(
                "contract {}",
                contract.id
            )));
        }
        let id = contract.id;
        rows.insert(id, contract);
        Ok(id)
    }

    /// Fetch a contract by id
    pub fn get(&self, id: ContractId) -> Option<Contract> {
        self.rows
            .read()
            .expect("contract store lock poisoned")
            .get(&id)
            .cloned()
    }

    /// Mark the contract as amended (idempotent)
    pub fn mark_amended(&self, id: ContractId) -> EngineResult<()> {
        let mut rows = self.rows.write().expect("contract store lock poisoned");
        let contract = rows
            .get_mut(&id)
            .ok_or_else(|| EngineError::not_found("Contract", id))?;
        contract.has_amendments = true;
        Ok(())
    }
}
