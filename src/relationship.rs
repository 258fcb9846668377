//! Typed relationship edges between clauses
//!
//! Clause interactions are modeled as a typed edge set rather than a class
//! hierarchy: any clause can relate to any other clause in one of four
//! well-defined ways, possibly across contracts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clause::Confidence;
use crate::identifiers::{ClauseId, ContractId, EdgeId};

/// The kind of a clause-relationship edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipKind {
    /// Breaching the source clause causes the target consequence
    /// (typically a liquidated-damages clause)
    Triggers,
    /// A true/active source clause negates a breach finding on the target
    Excuses,
    /// The source clause sets evaluation context for the target
    Governs,
    /// The source clause supplies data consumed when evaluating the target
    Inputs,
}

impl RelationshipKind {
    /// Human-readable edge name
    pub fn display_name(&self) -> &'static str {
        match self {
            RelationshipKind::Triggers => "triggers",
            RelationshipKind::Excuses => "excuses",
            RelationshipKind::Governs => "governs",
            RelationshipKind::Inputs => "supplies input to",
        }
    }

    /// Whether edges of this kind affect money directly
    /// (excuses negate consequences, triggers create them)
    pub fn is_financially_operative(&self) -> bool {
        matches!(self, RelationshipKind::Triggers | RelationshipKind::Excuses)
    }
}

/// How an inferred edge came to exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferenceSource {
    /// Pattern-matched by the extraction pipeline, not yet reviewed
    PatternMatch,
    /// Inferred, then confirmed by a human reviewer
    HumanConfirmed,
}

/// Edge provenance: explicitly extracted, or inferred with a confidence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum EdgeProvenance {
    /// Stated explicitly in the contract text
    Explicit,
    /// Inferred by tooling
    Inferred {
        /// Confidence of the inference
        confidence: Confidence,
        /// Who/what stands behind the inference
        inferred_by: InferenceSource,
    },
}

impl EdgeProvenance {
    /// Whether this edge was inferred rather than explicitly extracted
    pub fn is_inferred(&self) -> bool {
        matches!(self, EdgeProvenance::Inferred { .. })
    }

    /// Confidence score, when inferred
    pub fn confidence(&self) -> Option<Confidence> {
        match self {
            EdgeProvenance::Explicit => None,
            EdgeProvenance::Inferred { confidence, .. } => Some(*confidence),
        }
    }

    /// Whether policy honors this edge automatically at the given threshold
    ///
    /// Explicit and human-confirmed edges are always honored;
    /// pattern-matched inferences only at or above the threshold.
    pub fn honored(&self, threshold: Confidence) -> bool {
        match self {
            EdgeProvenance::Explicit => true,
            EdgeProvenance::Inferred {
                inferred_by: InferenceSource::HumanConfirmed,
                ..
            } => true,
            EdgeProvenance::Inferred {
                confidence,
                inferred_by: InferenceSource::PatternMatch,
            } => *confidence >= threshold,
        }
    }

    /// Ordering rank for precedence among honored edges: explicit and
    /// human-confirmed edges outrank any pattern-matched inference, then
    /// higher confidence wins.
    pub fn rank(&self) -> (u8, Confidence) {
        match self {
            EdgeProvenance::Explicit => (2, Confidence::certain()),
            EdgeProvenance::Inferred {
                confidence,
                inferred_by: InferenceSource::HumanConfirmed,
            } => (2, *confidence),
            EdgeProvenance::Inferred {
                confidence,
                inferred_by: InferenceSource::PatternMatch,
            } => (1, *confidence),
        }
    }
}

/// A directed, typed edge between two clauses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClauseRelationship {
    /// Edge id
    pub id: EdgeId,
    /// Source clause
    pub source_clause: ClauseId,
    /// Target clause
    pub target_clause: ClauseId,
    /// Edge kind
    pub kind: RelationshipKind,
    /// Contract the source clause belongs to
    pub source_contract: ContractId,
    /// Contract the target clause belongs to
    pub target_contract: ContractId,
    /// Whether the edge crosses contracts (derived at insert)
    pub is_cross_contract: bool,
    /// Free-form edge parameters
    pub parameters: serde_json::Value,
    /// Where the edge came from
    pub provenance: EdgeProvenance,
    /// When the edge was recorded
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn conf(v: rust_decimal::Decimal) -> Confidence {
        Confidence::new(v).unwrap()
    }

    #[test]
    fn test_honored_policy() {
        let threshold = conf(dec!(0.8));

        assert!(EdgeProvenance::Explicit.honored(threshold));
        assert!(EdgeProvenance::Inferred {
            confidence: conf(dec!(0.3)),
            inferred_by: InferenceSource::HumanConfirmed,
        }
        .honored(threshold));
        assert!(EdgeProvenance::Inferred {
            confidence: conf(dec!(0.8)),
            inferred_by: InferenceSource::PatternMatch,
        }
        .honored(threshold));
        assert!(!EdgeProvenance::Inferred {
            confidence: conf(dec!(0.79)),
            inferred_by: InferenceSource::PatternMatch,
        }
        .honored(threshold));
    }

    #[test]
    fn test_rank_ordering() {
        let explicit = EdgeProvenance::Explicit;
        let human = EdgeProvenance::Inferred {
            confidence: conf(dec!(0.6)),
            inferred_by: InferenceSource::HumanConfirmed,
        };
        let pattern_high = EdgeProvenance::Inferred {
            confidence: conf(dec!(0.95)),
            inferred_by: InferenceSource::PatternMatch,
        };

        assert!(explicit.rank() > human.rank());
        assert!(human.rank() > pattern_high.rank());
    }

    #[test]
    fn test_confidence_exposure() {
        assert_eq!(EdgeProvenance::Explicit.confidence(), None);
        let inferred = EdgeProvenance::Inferred {
            confidence: conf(dec!(0.7)),
            inferred_by: InferenceSource::PatternMatch,
        };
        assert!(inferred.is_inferred());
        assert_eq!(inferred.confidence().unwrap().value(), dec!(0.7));
    }

    #[test]
    fn test_kind_classification() {
        assert!(RelationshipKind::Triggers.is_financially_operative());
        assert!(RelationshipKind::Excuses.is_financially_operative());
        assert!(!RelationshipKind::Governs.is_financially_operative());
        assert!(!RelationshipKind::Inputs.is_financially_operative());
        assert_eq!(RelationshipKind::Excuses.display_name(), "excuses");
    }
}
