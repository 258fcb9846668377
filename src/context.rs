//! Explicit operation context
//!
//! The original system leaned on session-scoped database context for the
//! acting user. Here the principal and organization are passed explicitly
//! into every mutating operation, so there is no ambient state and every
//! write can be attributed in the logs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::identifiers::OrgId;

/// The acting principal (user or service account)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Stable identifier of the principal
    pub id: Uuid,
    /// Display name for logs and audit trails
    pub name: String,
}

impl Principal {
    /// Create a principal with a fresh id
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
        }
    }
}

/// Context carried into every mutating engine operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationContext {
    /// Who is performing the operation
    pub principal: Principal,
    /// The organization whose data is being operated on
    pub organization: OrgId,
    /// When the operation was requested
    pub requested_at: DateTime<Utc>,
}

impl OperationContext {
    /// Create a context stamped with the current time
    pub fn new(principal: Principal, organization: OrgId) -> Self {
        Self {
            principal,
            organization,
            requested_at: Utc::now(),
        }
    }
}
