//! The obligation graph
//!
//! A pure lookup/query layer over explicit or inferred clause-relationship
//! edges. The graph answers "what excuses this obligation" and "what does
//! breaching this obligation trigger"; it performs no breach evaluation
//! itself — that is the pipeline's job. Confidence is exposed on every
//! answer so the pipeline can apply the honoring policy.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::info;

use crate::clause::ClauseStore;
use crate::context::OperationContext;
use crate::errors::{EngineError, EngineResult};
use crate::identifiers::{ClauseId, ContractId, EdgeId};
use crate::relationship::{ClauseRelationship, EdgeProvenance, RelationshipKind};

/// An EXCUSES edge into a clause, as returned by [`ObligationGraph::excuses_for`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExcuseEdge {
    /// The edge itself
    pub edge_id: EdgeId,
    /// The clause whose truth excuses the target obligation
    pub source_clause: ClauseId,
    /// Contract the excusing clause belongs to
    pub source_contract: ContractId,
    /// Edge provenance (confidence exposed for policy)
    pub provenance: EdgeProvenance,
    /// Free-form edge parameters
    pub parameters: serde_json::Value,
}

/// A TRIGGERS edge out of a clause, as returned by [`ObligationGraph::triggers_from`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerEdge {
    /// The edge itself
    pub edge_id: EdgeId,
    /// The consequence clause
    pub target_clause: ClauseId,
    /// Contract the consequence clause belongs to
    pub target_contract: ContractId,
    /// Edge provenance
    pub provenance: EdgeProvenance,
    /// Free-form edge parameters
    pub parameters: serde_json::Value,
}

#[derive(Debug, Default)]
struct GraphInner {
    edges: IndexMap<EdgeId, ClauseRelationship>,
    // uniqueness index: at most one edge per (source, target, kind)
    by_key: HashMap<(ClauseId, ClauseId, RelationshipKind), EdgeId>,
}

/// In-memory store of clause-relationship edges
#[derive(Debug, Default)]
pub struct ObligationGraph {
    inner: RwLock<GraphInner>,
}

impl ObligationGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an edge between two clauses
    ///
    /// Validates both endpoints exist, rejects self-edges and duplicate
    /// (source, target, kind) triples, and derives `is_cross_contract`
    /// from the endpoints' contracts.
    pub fn connect(
        &self,
        ctx: &OperationContext,
        clauses: &ClauseStore,
        source: ClauseId,
        target: ClauseId,
        kind: RelationshipKind,
        parameters: serde_json::Value,
        provenance: EdgeProvenance,
    ) -> EngineResult<EdgeId> {
        if source == target {
            return Err(EngineError::SelfReference(format!(
                "clause {source} cannot relate to itself"
            )));
        }
        let source_clause = clauses
            .get(source)
            .ok_or_else(|| EngineError::not_found("Clause", source))?;
        let target_clause = clauses
            .get(target)
            .ok_or_else(|| EngineError::not_found("Clause", target))?;

        let mut inner = self.inner.write().expect("graph lock poisoned");
        if inner.by_key.contains_key(&(source, target, kind)) {
            return Err(EngineError::AlreadyExists(format!(
                "edge {source} -{}-> {target}",
                kind.display_name()
            )));
        }
        let edge = ClauseRelationship {
            id: EdgeId::new(),
            source_clause: source,
            target_clause: target,
            kind,
            source_contract: source_clause.contract_id,
            target_contract: target_clause.contract_id,
            is_cross_contract: source_clause.contract_id != target_clause.contract_id,
            parameters,
            provenance,
            created_at: ctx.requested_at,
        };
        let id = edge.id;
        info!(
            source = %source,
            target = %target,
            kind = kind.display_name(),
            cross_contract = edge.is_cross_contract,
            principal = %ctx.principal.name,
            "recorded clause relationship"
        );
        inner.by_key.insert((source, target, kind), id);
        inner.edges.insert(id, edge);
        Ok(id)
    }

    /// Fetch an edge by id
    pub fn edge(&self, id: EdgeId) -> Option<ClauseRelationship> {
        self.inner
            .read()
            .expect("graph lock poisoned")
            .edges
            .get(&id)
            .cloned()
    }

    /// All clauses with an EXCUSES edge into `clause_id`
    pub fn excuses_for(&self, clause_id: ClauseId) -> Vec<ExcuseEdge> {
        self.inner
            .read()
            .expect("graph lock poisoned")
            .edges
            .values()
            .filter(|e| e.kind == RelationshipKind::Excuses && e.target_clause == clause_id)
            .map(|e| ExcuseEdge {
                edge_id: e.id,
                source_clause: e.source_clause,
                source_contract: e.source_contract,
                provenance: e.provenance.clone(),
                parameters: e.parameters.clone(),
            })
            .collect()
    }

    /// All clauses with a TRIGGERS edge out of `clause_id`
    pub fn triggers_from(&self, clause_id: ClauseId) -> Vec<TriggerEdge> {
        self.inner
            .read()
            .expect("graph lock poisoned")
            .edges
            .values()
            .filter(|e| e.kind == RelationshipKind::Triggers && e.source_clause == clause_id)
            .map(|e| TriggerEdge {
                edge_id: e.id,
                target_clause: e.target_clause,
                target_contract: e.target_contract,
                provenance: e.provenance.clone(),
                parameters: e.parameters.clone(),
            })
            .collect()
    }

    /// The full edge set where either endpoint belongs to the contract
    ///
    /// Cross-contract edges are included — an O&M maintenance clause in a
    /// different contract excusing this contract's availability clause
    /// shows up here.
    pub fn relationship_graph(&self, contract_id: ContractId) -> Vec<ClauseRelationship> {
        self.inner
            .read()
            .expect("graph lock poisoned")
            .edges
            .values()
            .filter(|e| e.source_contract == contract_id || e.target_contract == contract_id)
            .cloned()
            .collect()
    }
}
