//! Error types for settlement-engine operations

use thiserror::Error;

/// Errors that can occur in settlement-engine operations
///
/// The taxonomy follows the engine's failure model: data-quality problems are
/// rejected synchronously at the operation boundary, invariant violations are
/// rejected atomically leaving prior state untouched, and "resolution not yet
/// possible" outcomes (missing FX rate, missing reference price) are *not*
/// errors at all — they are typed pending results on the operation's return
/// value so callers can retry without conflating them with a zero amount.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// Entity not found
    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound {
        /// Type of entity that wasn't found
        entity_type: String,
        /// ID that was searched for
        id: String,
    },

    /// A row or edge with the same key already exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Input failed validation at the operation boundary
    #[error("Validation error: {0}")]
    Validation(String),

    /// Malformed domain data (floor above ceiling, zero denominator, ...)
    #[error("Data quality error on {entity}: {reason}")]
    DataQuality {
        /// The record kind the bad data was found on
        entity: String,
        /// What is wrong with it
        reason: String,
    },

    /// A lifecycle or version-chain invariant would be broken
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// An operation referenced rows from two different contracts
    #[error("Contract mismatch: expected contract {expected}, found {actual}")]
    ContractMismatch {
        /// Contract the operation is scoped to
        expected: String,
        /// Contract the offending row belongs to
        actual: String,
    },

    /// A row or edge referenced itself
    #[error("Self reference: {0}")]
    SelfReference(String),

    /// Invalid state transition
    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current state
        from: String,
        /// Attempted target state
        to: String,
    },

    /// Remediation evidence arrived after the cure deadline
    #[error("Cure window elapsed for default event {default_event}: deadline was {deadline}")]
    CureWindowElapsed {
        /// The default event the cure was recorded against
        default_event: String,
        /// The deadline that has passed
        deadline: chrono::DateTime<chrono::Utc>,
    },

    /// A triggered liquidated-damages clause has no usable LD parameters
    #[error("Missing liquidated-damages parameters on clause {clause}")]
    MissingLdParameters {
        /// The LD clause with the malformed payload
        clause: String,
    },

    /// Arithmetic across two different currencies
    #[error("Currency mismatch: {left} vs {right}")]
    CurrencyMismatch {
        /// Currency on the left operand
        left: String,
        /// Currency on the right operand
        right: String,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for settlement-engine operations
pub type EngineResult<T> = Result<T, EngineError>;

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Serialization(err.to_string())
    }
}

impl EngineError {
    /// Build a `NotFound` error from an entity name and any displayable id
    pub fn not_found(entity_type: impl Into<String>, id: impl std::fmt::Display) -> Self {
        EngineError::NotFound {
            entity_type: entity_type.into(),
            id: id.to_string(),
        }
    }

    /// Check if this is a not-found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::NotFound { .. })
    }

    /// Check if this is a data-quality / validation error
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            EngineError::Validation(_)
                | EngineError::DataQuality { .. }
                | EngineError::MissingLdParameters { .. }
        )
    }

    /// Check if this is an invariant-violation error
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            EngineError::InvariantViolation(_)
                | EngineError::ContractMismatch { .. }
                | EngineError::SelfReference(_)
                | EngineError::AlreadyExists(_)
                | EngineError::InvalidStateTransition { .. }
        )
    }
}
