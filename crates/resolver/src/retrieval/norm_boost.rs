//! Norm-hierarchy boost table
//!
//! Multiplies raw similarity by a per-level factor so that, at equal
//! similarity, higher-authority sources rank first.

use lexforge_common::{
    errors::{AppError, Result},
    models::NormLevel,
};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Multiplier per [`NormLevel`], indexed by `rank() - 1`
#[derive(Debug, Clone, PartialEq)]
pub struct NormBoost {
    table: [f32; 7],
}

impl NormBoost {
    /// Build from a level-name → multiplier map.
    ///
    /// Every level must be present with a finite positive multiplier, and
    /// multipliers must strictly decrease from constitution to doctrine.
    pub fn from_config(boosts: &BTreeMap<String, f32>) -> Result<Self> {
        let mut table = [None::<f32>; 7];

        for (name, &value) in boosts {
            let level = NormLevel::from_str(name).map_err(|e| AppError::Configuration {
                message: format!("norm_level_boosts: {}", e),
            })?;
            if !value.is_finite() || value <= 0.0 {
                return Err(AppError::Configuration {
                    message: format!("norm_level_boosts: {} must be positive, got {}", level, value),
                });
            }
            table[level.rank() as usize - 1] = Some(value);
        }

        let mut resolved = [0.0f32; 7];
        for level in NormLevel::ALL {
            let idx = level.rank() as usize - 1;
            resolved[idx] = table[idx].ok_or_else(|| AppError::Configuration {
                message: format!("norm_level_boosts: missing multiplier for {}", level),
            })?;
        }

        for pair in NormLevel::ALL.windows(2) {
            let (higher, lower) = (pair[0], pair[1]);
            let (a, b) = (
                resolved[higher.rank() as usize - 1],
                resolved[lower.rank() as usize - 1],
            );
            if a <= b {
                return Err(AppError::Configuration {
                    message: format!(
                        "norm_level_boosts: {} ({}) must exceed {} ({})",
                        higher, a, lower, b
                    ),
                });
            }
        }

        Ok(Self { table: resolved })
    }

    pub fn boost(&self, level: NormLevel) -> f32 {
        self.table[level.rank() as usize - 1]
    }

    /// `max(similarity, 0) * boost(level)`; NaN similarity counts as 0
    pub fn apply(&self, similarity: f32, level: NormLevel) -> f32 {
        let clamped = if similarity.is_nan() { 0.0 } else { similarity.max(0.0) };
        clamped * self.boost(level)
    }
}

impl Default for NormBoost {
    fn default() -> Self {
        Self {
            table: [1.30, 1.20, 1.12, 1.06, 1.00, 0.92, 0.85],
        }
    }
}
