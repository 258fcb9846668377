//! Engine configuration
//!
//! Tunables that the spec forbids hardcoding: the reconciliation tolerance,
//! the confidence threshold for auto-honoring inferred excuse edges, the FX
//! fallback policy, and the rounding scale for resolved rates. The struct is
//! serde-deserializable so deployments can load it from a config file; every
//! field has a documented default.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::{EngineError, EngineResult};
use crate::fx::FxFallback;

/// Engine-wide configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Absolute header/line variance treated as a match during invoice
    /// reconciliation. Default: 0 (exact match required).
    pub reconciliation_tolerance: Decimal,
    /// Minimum confidence at which a pattern-matched inferred EXCUSES edge
    /// is honored automatically. Explicit and human-confirmed edges are
    /// always honored. Default: 0.8.
    pub excuse_confidence_threshold: Decimal,
    /// FX lookup policy when no exact-date rate exists. Default: exact only.
    pub fx_fallback: FxFallback,
    /// Decimal places for resolved per-unit rates. Default: 6.
    pub rate_scale: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reconciliation_tolerance: Decimal::ZERO,
            excuse_confidence_threshold: Decimal::new(8, 1), // 0.8
            fx_fallback: FxFallback::ExactOnly,
            rate_scale: 6,
        }
    }
}

impl EngineConfig {
    /// Validate the configuration values
    pub fn validate(&self) -> EngineResult<()> {
        if self.reconciliation_tolerance < Decimal::ZERO {
            return Err(EngineError::Validation(
                "reconciliation_tolerance must be non-negative".to_string(),
            ));
        }
        if self.excuse_confidence_threshold < Decimal::ZERO
            || self.excuse_confidence_threshold > Decimal::ONE
        {
            return Err(EngineError::Validation(
                "excuse_confidence_threshold must be within [0, 1]".to_string(),
            ));
        }
        if self.rate_scale > 28 {
            return Err(EngineError::Validation(
                "rate_scale exceeds decimal precision".to_string(),
            ));
        }
        Ok(())
    }
}
