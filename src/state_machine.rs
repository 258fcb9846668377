//! Operational events and the default-event lifecycle
//!
//! An [`Event`] is a raw operational occurrence with a time window and an
//! optional measured outcome; events are inputs supplied by an external
//! ingestion collaborator. A [`DefaultEvent`] is a candidate breach of a
//! clause with a cure deadline and an explicit state machine: every status
//! change goes through a guarded transition, never direct field mutation.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::RwLock;
use tracing::info;

use crate::clause::ClauseCategory;
use crate::context::OperationContext;
use crate::errors::{EngineError, EngineResult};
use crate::identifiers::{ClauseId, ContractId, DefaultEventId, EventId, ProjectId};
use crate::period::{BillingMonth, TimeWindow};

/// The kind of a raw operational event
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Unplanned plant outage
    Outage,
    /// Offtaker- or grid-directed curtailment
    Curtailment,
    /// Declared force-majeure occurrence
    ForceMajeure,
    /// Scheduled maintenance window
    ScheduledMaintenance,
    /// Anything else
    Custom(String),
}

impl EventKind {
    /// The excusing clause category this event kind can activate, if any
    ///
    /// A force-majeure event activates FORCE_MAJEURE clauses; a scheduled
    /// maintenance window activates MAINTENANCE clauses. Outages and
    /// curtailments excuse nothing.
    pub fn excusing_category(&self) -> Option<ClauseCategory> {
        match self {
            EventKind::ForceMajeure => Some(ClauseCategory::ForceMajeure),
            EventKind::ScheduledMaintenance => Some(ClauseCategory::Maintenance),
            _ => None,
        }
    }
}

/// A raw operational occurrence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event id
    pub id: EventId,
    /// Contract the event is reported under
    pub contract_id: ContractId,
    /// Project the event occurred at, when known
    pub project_id: Option<ProjectId>,
    /// What happened
    pub kind: EventKind,
    /// When it happened (open-ended while ongoing)
    pub window: TimeWindow,
    /// Measured outcome, when the event carries one (e.g. energy lost, kWh)
    pub measured_outcome: Option<Decimal>,
    /// Free-text description
    pub description: Option<String>,
    /// When the event was recorded
    pub recorded_at: DateTime<Utc>,
}

impl Event {
    /// Create an event
    pub fn new(contract_id: ContractId, kind: EventKind, window: TimeWindow) -> Self {
        Self {
            id: EventId::new(),
            contract_id,
            project_id: None,
            kind,
            window,
            measured_outcome: None,
            description: None,
            recorded_at: Utc::now(),
        }
    }

    /// Set the project
    pub fn with_project(mut self, project: ProjectId) -> Self {
        self.project_id = Some(project);
        self
    }

    /// Set the measured outcome
    pub fn with_outcome(mut self, outcome: Decimal) -> Self {
        self.measured_outcome = Some(outcome);
        self
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// In-memory event store
#[derive(Debug, Default)]
pub struct EventStore {
    events: RwLock<IndexMap<EventId, Event>>,
}

impl EventStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an event
    pub fn insert(&self, ctx: &OperationContext, event: Event) -> EngineResult<EventId> {
        let mut events = self.events.write().expect("event store lock poisoned");
        if events.contains_key(&event.id) {
            return Err(EngineError::AlreadyExists(format!("event {}", event.id)));
        }
        let id = event.id;
        info!(
            event = %id,
            contract = %event.contract_id,
            kind = ?event.kind,
            principal = %ctx.principal.name,
            "recorded operational event"
        );
        events.insert(id, event);
        Ok(id)
    }

    /// Fetch an event by id
    pub fn get(&self, id: EventId) -> Option<Event> {
        self.events
            .read()
            .expect("event store lock poisoned")
            .get(&id)
            .cloned()
    }

    /// Events of a contract whose window overlaps the given window
    pub fn overlapping(&self, contract: ContractId, window: &TimeWindow) -> Vec<Event> {
        self.events
            .read()
            .expect("event store lock poisoned")
            .values()
            .filter(|e| e.contract_id == contract && e.window.overlaps(window))
            .cloned()
            .collect()
    }

    /// Events overlapping the window that can activate `category` excuses
    ///
    /// Searches across contracts: a maintenance event reported under an O&M
    /// contract can excuse an availability obligation under the PPA.
    pub fn active_excusing(&self, category: ClauseCategory, window: &TimeWindow) -> Vec<Event> {
        self.events
            .read()
            .expect("event store lock poisoned")
            .values()
            .filter(|e| {
                e.kind.excusing_category() == Some(category) && e.window.overlaps(window)
            })
            .cloned()
            .collect()
    }
}

/// Lifecycle status of a default event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultStatus {
    /// Breach finding stands, cure window running
    Open,
    /// Remediated before the cure deadline
    Cured,
    /// Consequence priced and fed into an invoice
    Closed,
}

impl DefaultStatus {
    /// Whether a transition to `target` is permitted
    ///
    /// Open can cure or close; cured events can still close once any
    /// offsetting output is invoiced. Closed is terminal.
    pub fn can_transition_to(&self, target: DefaultStatus) -> bool {
        matches!(
            (self, target),
            (DefaultStatus::Open, DefaultStatus::Cured)
                | (DefaultStatus::Open, DefaultStatus::Closed)
                | (DefaultStatus::Cured, DefaultStatus::Closed)
        )
    }
}

impl fmt::Display for DefaultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DefaultStatus::Open => "open",
            DefaultStatus::Cured => "cured",
            DefaultStatus::Closed => "closed",
        };
        write!(f, "{name}")
    }
}

/// A candidate breach of one clause, with a cure deadline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefaultEvent {
    /// Default-event id
    pub id: DefaultEventId,
    /// Contract the breached clause belongs to
    pub contract_id: ContractId,
    /// The breached obligation clause
    pub clause_id: ClauseId,
    /// Raw events that triggered the finding
    pub triggering_events: Vec<EventId>,
    /// The evaluation period the breach was found in
    pub billing_month: BillingMonth,
    /// Observed metric value
    pub observed: Decimal,
    /// Contractual threshold
    pub threshold: Decimal,
    /// Shortfall on the wrong side of the threshold
    pub shortfall: Decimal,
    /// Deadline for remediation evidence
    pub cure_deadline: DateTime<Utc>,
    /// Lifecycle status
    pub status: DefaultStatus,
    /// When the finding was opened
    pub opened_at: DateTime<Utc>,
    /// When remediation evidence was accepted
    pub cured_at: Option<DateTime<Utc>>,
    /// When the event was closed
    pub closed_at: Option<DateTime<Utc>>,
}

/// In-memory default-event store with guarded transitions
#[derive(Debug, Default)]
pub struct DefaultEventStore {
    events: RwLock<IndexMap<DefaultEventId, DefaultEvent>>,
}

impl DefaultEventStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a default event (status = open)
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        &self,
        ctx: &OperationContext,
        contract_id: ContractId,
        clause_id: ClauseId,
        billing_month: BillingMonth,
        observed: Decimal,
        threshold: Decimal,
        shortfall: Decimal,
        cure_deadline: DateTime<Utc>,
        triggering_events: Vec<EventId>,
    ) -> DefaultEventId {
        let event = DefaultEvent {
            id: DefaultEventId::new(),
            contract_id,
            clause_id,
            triggering_events,
            billing_month,
            observed,
            threshold,
            shortfall,
            cure_deadline,
            status: DefaultStatus::Open,
            opened_at: ctx.requested_at,
            cured_at: None,
            closed_at: None,
        };
        let id = event.id;
        info!(
            default_event = %id,
            contract = %contract_id,
            clause = %clause_id,
            month = %billing_month,
            shortfall = %shortfall,
            principal = %ctx.principal.name,
            "opened default event"
        );
        self.events
            .write()
            .expect("default event store lock poisoned")
            .insert(id, event);
        id
    }

    /// Record remediation evidence, transitioning open → cured
    ///
    /// Evidence after the deadline is rejected with a cure-window error;
    /// the event stays open and its consequences stand.
    pub fn record_cure(
        &self,
        ctx: &OperationContext,
        id: DefaultEventId,
        evidence_at: DateTime<Utc>,
    ) -> EngineResult<DefaultEvent> {
        let mut events = self.events.write().expect("default event store lock poisoned");
        let event = events
            .get_mut(&id)
            .ok_or_else(|| EngineError::not_found("DefaultEvent", id))?;
        if !event.status.can_transition_to(DefaultStatus::Cured) {
            return Err(EngineError::InvalidStateTransition {
                from: event.status.to_string(),
                to: DefaultStatus::Cured.to_string(),
            });
        }
        if evidence_at > event.cure_deadline {
            return Err(EngineError::CureWindowElapsed {
                default_event: id.to_string(),
                deadline: event.cure_deadline,
            });
        }
        event.status = DefaultStatus::Cured;
        event.cured_at = Some(evidence_at);
        info!(
            default_event = %id,
            principal = %ctx.principal.name,
            "default event cured"
        );
        Ok(event.clone())
    }

    /// Close an event once its consequence has been priced and invoiced
    pub fn close(&self, ctx: &OperationContext, id: DefaultEventId) -> EngineResult<DefaultEvent> {
        let mut events = self.events.write().expect("default event store lock poisoned");
        let event = events
            .get_mut(&id)
            .ok_or_else(|| EngineError::not_found("DefaultEvent", id))?;
        if !event.status.can_transition_to(DefaultStatus::Closed) {
            return Err(EngineError::InvalidStateTransition {
                from: event.status.to_string(),
                to: DefaultStatus::Closed.to_string(),
            });
        }
        event.status = DefaultStatus::Closed;
        event.closed_at = Some(ctx.requested_at);
        Ok(event.clone())
    }

    /// Fetch a default event by id
    pub fn get(&self, id: DefaultEventId) -> Option<DefaultEvent> {
        self.events
            .read()
            .expect("default event store lock poisoned")
            .get(&id)
            .cloned()
    }

    /// All default events for a contract, in insertion order
    pub fn for_contract(&self, contract: ContractId) -> Vec<DefaultEvent> {
        self.events
            .read()
            .expect("default event store lock poisoned")
            .values()
            .filter(|e| e.contract_id == contract)
            .cloned()
            .collect()
    }

    /// The default event for (clause, billing month), if one was opened
    pub fn for_clause_month(
        &self,
        clause: ClauseId,
        month: BillingMonth,
    ) -> Option<DefaultEvent> {
        self.events
            .read()
            .expect("default event store lock poisoned")
            .values()
            .find(|e| e.clause_id == clause && e.billing_month == month)
            .cloned()
    }
}
