//! Amendment version chains
//!
//! Clauses and tariffs are never mutated once superseded: an amendment
//! inserts a new row and flips the prior row's `is_current` flag inside a
//! single write section. The chain of `supersedes` back-pointers preserves
//! the law as it stood at any past date, and exactly one row per
//! (contract, identity-key) is current at any time.

use chrono::NaiveDate;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::RwLock;
use tracing::info;

use crate::context::OperationContext;
use crate::contract::ContractStore;
use crate::entity::EntityId;
use crate::errors::{EngineError, EngineResult};
use crate::identifiers::{AmendmentId, ContractId};

/// A record kind that participates in an amendment version chain
pub trait VersionedRecord: Clone + Send + Sync {
    /// Marker type for this record's `EntityId`
    type Marker;

    /// Human-readable record kind for error messages
    fn entity_name() -> &'static str;

    /// This row's id
    fn record_id(&self) -> EntityId<Self::Marker>;

    /// The contract this row belongs to
    fn contract_id(&self) -> ContractId;

    /// The identity key: which logical clause/tariff line this row is a
    /// version of. For clauses this is (category, section-ref); for tariffs
    /// it is (group key, validity window).
    fn identity_key(&self) -> String;

    /// The row's effective window (inclusive bounds; `None` = unbounded)
    fn validity(&self) -> (Option<NaiveDate>, Option<NaiveDate>);

    /// Whether this row is the current version
    fn is_current(&self) -> bool;

    /// Flip the current flag (only the chain itself calls this)
    fn set_current(&mut self, current: bool);

    /// The row this one superseded, if any
    fn supersedes(&self) -> Option<EntityId<Self::Marker>>;

    /// Link the supersede back-pointer (only the chain itself calls this)
    fn set_supersedes(&mut self, prior: Option<EntityId<Self::Marker>>);

    /// The amendment that introduced this row, if any
    fn amendment_id(&self) -> Option<AmendmentId>;
}

/// An append-only version chain over one record kind
#[derive(Debug)]
pub struct VersionChain<T: VersionedRecord> {
    rows: RwLock<IndexMap<EntityId<T::Marker>, T>>,
}

impl<T: VersionedRecord> Default for VersionChain<T> {
    fn default() -> Self {
        Self {
            rows: RwLock::new(IndexMap::new()),
        }
    }
}

impl<T: VersionedRecord> VersionChain<T>
where
    EntityId<T::Marker>: std::hash::Hash + Eq + Copy + std::fmt::Display,
{
    /// Create an empty chain
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(IndexMap::new()),
        }
    }

    /// Insert the first version of a logical row
    ///
    /// Rejects a second current row for the same (contract, identity-key):
    /// later versions must arrive via [`VersionChain::supersede`].
    pub fn insert_initial(&self, row: T) -> EngineResult<EntityId<T::Marker>> {
        if !row.is_current() {
            return Err(EngineError::Validation(format!(
                "initial {} version must be current",
                T::entity_name()
            )));
        }
        if row.supersedes().is_some() {
            return Err(EngineError::Validation(format!(
                "initial {} version must not supersede another row",
                T::entity_name()
            )));
        }
        let mut rows = self.rows.write().expect("version chain lock poisoned");
        if rows.contains_key(&row.record_id()) {
            return Err(EngineError::AlreadyExists(format!(
                "{} {}",
                T::entity_name(),
                row.record_id()
            )));
        }
        let key = row.identity_key();
        let contract = row.contract_id();
        if rows
            .values()
            .any(|r| r.is_current() && r.contract_id() == contract && r.identity_key() == key)
        {
            return Err(EngineError::InvariantViolation(format!(
                "a current {} already exists for identity key {key:?} on contract {contract}",
                T::entity_name()
            )));
        }
        let id = row.record_id();
        rows.insert(id, row);
        Ok(id)
    }

    /// Supersede `prior_id` with `new_row`
    ///
    /// Validates the prior row belongs to the same contract and identity
    /// key, is not the new row itself, and is currently current; then flips
    /// the flags and links the back-pointer atomically. If the new row
    /// carries an amendment reference, the contract is marked amended.
    pub fn supersede(
        &self,
        ctx: &OperationContext,
        mut new_row: T,
        prior_id: EntityId<T::Marker>,
        contracts: &ContractStore,
    ) -> EngineResult<EntityId<T::Marker>> {
        let amendment = new_row.amendment_id();
        let contract = new_row.contract_id();
        if amendment.is_some() && contracts.get(contract).is_none() {
            return Err(EngineError::not_found("Contract", contract));
        }
        let new_id = {
            let mut rows = self.rows.write().expect("version chain lock poisoned");
            if new_row.record_id() == prior_id {
                return Err(EngineError::SelfReference(format!(
                    "{} {} cannot supersede itself",
                    T::entity_name(),
                    prior_id
                )));
            }
            if rows.contains_key(&new_row.record_id()) {
                return Err(EngineError::AlreadyExists(format!(
                    "{} {}",
                    T::entity_name(),
                    new_row.record_id()
                )));
            }
            let prior = rows
                .get(&prior_id)
                .ok_or_else(|| EngineError::not_found(T::entity_name(), prior_id))?;
            if prior.contract_id() != contract {
                return Err(EngineError::ContractMismatch {
                    expected: contract.to_string(),
                    actual: prior.contract_id().to_string(),
                });
            }
            if prior.identity_key() != new_row.identity_key() {
                return Err(EngineError::InvariantViolation(format!(
                    "cannot supersede across identity keys: {:?} vs {:?}",
                    prior.identity_key(),
                    new_row.identity_key()
                )));
            }
            if !prior.is_current() {
                return Err(EngineError::InvariantViolation(format!(
                    "{} {} is not the current version",
                    T::entity_name(),
                    prior_id
                )));
            }
            rows.get_mut(&prior_id)
                .expect("checked above")
                .set_current(false);
            new_row.set_supersedes(Some(prior_id));
            new_row.set_current(true);
            let id = new_row.record_id();
            rows.insert(id, new_row);
            info!(
                entity = T::entity_name(),
                prior = %prior_id,
                new = %id,
                principal = %ctx.principal.name,
                "superseded version"
            );
            id
        };
        if amendment.is_some() {
            contracts.mark_amended(contract)?;
        }
        Ok(new_id)
    }

    /// Fetch a row by id
    pub fn get(&self, id: EntityId<T::Marker>) -> Option<T> {
        self.rows
            .read()
            .expect("version chain lock poisoned")
            .get(&id)
            .cloned()
    }

    /// The current row for (contract, identity-key), if any
    pub fn current(&self, contract: ContractId, identity_key: &str) -> Option<T> {
        self.rows
            .read()
            .expect("version chain lock poisoned")
            .values()
            .find(|r| {
                r.is_current() && r.contract_id() == contract && r.identity_key() == identity_key
            })
            .cloned()
    }

    /// The row in force on `date` for (contract, identity-key)
    ///
    /// Walks the supersede chain backward from the current row to the first
    /// version whose effective window contains the date. A cycle in the
    /// chain is reported as an invariant violation rather than looping.
    pub fn as_of(
        &self,
        contract: ContractId,
        identity_key: &str,
        date: NaiveDate,
    ) -> EngineResult<Option<T>> {
        let rows = self.rows.read().expect("version chain lock poisoned");
        let mut cursor = rows
            .values()
            .find(|r| {
                r.is_current() && r.contract_id() == contract && r.identity_key() == identity_key
            })
            .cloned();
        let mut visited: HashSet<uuid::Uuid> = HashSet::new();
        while let Some(row) = cursor {
            if !visited.insert(*row.record_id().as_uuid()) {
                return Err(EngineError::InvariantViolation(format!(
                    "supersede cycle detected in {} chain for key {identity_key:?}",
                    T::entity_name()
                )));
            }
            if window_contains(row.validity(), date) {
                return Ok(Some(row));
            }
            cursor = row.supersedes().and_then(|prior| rows.get(&prior).cloned());
        }
        Ok(None)
    }

    /// All rows belonging to a contract, in insertion order
    pub fn for_contract(&self, contract: ContractId) -> Vec<T> {
        self.rows
            .read()
            .expect("version chain lock poisoned")
            .values()
            .filter(|r| r.contract_id() == contract)
            .cloned()
            .collect()
    }

    /// All current rows, in insertion order
    pub fn current_rows(&self) -> Vec<T> {
        self.rows
            .read()
            .expect("version chain lock poisoned")
            .values()
            .filter(|r| r.is_current())
            .cloned()
            .collect()
    }
}

fn window_contains(window: (Option<NaiveDate>, Option<NaiveDate>), date: NaiveDate) -> bool {
    let (from, to) = window;
    from.map_or(true, |f| f <= date) && to.map_or(true, |t| date <= t)
}

/// Lightweight amendment metadata referenced by clause and tariff rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractAmendment {
    /// Amendment id
    pub id: AmendmentId,
    /// The amended contract
    pub contract_id: ContractId,
    /// Sequence number, unique and monotonically increasing per contract
    pub amendment_number: u32,
    /// When the amendment was signed
    pub signed_date: NaiveDate,
    /// When the amendment takes effect
    pub effective_date: NaiveDate,
}

impl ContractAmendment {
    /// Create an amendment record
    pub fn new(
        contract_id: ContractId,
        amendment_number: u32,
        signed_date: NaiveDate,
        effective_date: NaiveDate,
    ) -> Self {
        Self {
            id: AmendmentId::new(),
            contract_id,
            amendment_number,
            signed_date,
            effective_date,
        }
    }
}

/// In-memory amendment store
#[derive(Debug, Default)]
pub struct AmendmentStore {
    rows: RwLock<IndexMap<AmendmentId, ContractAmendment>>,
}

impl AmendmentStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an amendment, enforcing per-contract monotonic numbering
    pub fn insert(
        &self,
        ctx: &OperationContext,
        amendment: ContractAmendment,
        contracts: &ContractStore,
    ) -> EngineResult<AmendmentId> {
        if contracts.get(amendment.contract_id).is_none() {
            return Err(EngineError::not_found("Contract", amendment.contract_id));
        }
        let mut rows = self.rows.write().expect("amendment store lock poisoned");
        let highest = rows
            .values()
            .filter(|a| a.contract_id == amendment.contract_id)
            .map(|a| a.amendment_number)
            .max();
        if let Some(highest) = highest {
            if amendment.amendment_number <= highest {
                return Err(EngineError::InvariantViolation(format!(
                    "amendment number {} is not greater than existing {} on contract {}",
                    amendment.amendment_number, highest, amendment.contract_id
                )));
            }
        }
        let id = amendment.id;
        info!(
            contract = %amendment.contract_id,
            number = amendment.amendment_number,
            principal = %ctx.principal.name,
            "recorded contract amendment"
        );
        rows.insert(id, amendment);
        Ok(id)
    }

    /// Fetch an amendment by id
    pub fn get(&self, id: AmendmentId) -> Option<ContractAmendment> {
        self.rows
            .read()
            .expect("amendment store lock poisoned")
            .get(&id)
            .cloned()
    }

    /// The highest-numbered amendment for a contract
    pub fn latest_for(&self, contract: ContractId) -> Option<ContractAmendment> {
        self.rows
            .read()
            .expect("amendment store lock poisoned")
            .values()
            .filter(|a| a.contract_id == contract)
            .max_by_key(|a| a.amendment_number)
            .cloned()
    }
}
