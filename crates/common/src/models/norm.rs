//! Norm hierarchy
//!
//! Authority ranking among legal source types. Declaration order is the
//! authority order, so the derived `Ord` puts the constitution first.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Position of a source in the norm hierarchy (rank 1 = highest authority)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NormLevel {
    Constitution,
    Statute,
    Regulation,
    AdministrativeRule,
    Precedent,
    PreparatoryWork,
    Doctrine,
}

impl NormLevel {
    /// All levels, highest authority first
    pub const ALL: [NormLevel; 7] = [
        NormLevel::Constitution,
        NormLevel::Statute,
        NormLevel::Regulation,
        NormLevel::AdministrativeRule,
        NormLevel::Precedent,
        NormLevel::PreparatoryWork,
        NormLevel::Doctrine,
    ];

    /// Hierarchy rank, 1 = constitution, 7 = doctrine
    pub fn rank(&self) -> u8 {
        match self {
            NormLevel::Constitution => 1,
            NormLevel::Statute => 2,
            NormLevel::Regulation => 3,
            NormLevel::AdministrativeRule => 4,
            NormLevel::Precedent => 5,
            NormLevel::PreparatoryWork => 6,
            NormLevel::Doctrine => 7,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NormLevel::Constitution => "constitution",
            NormLevel::Statute => "statute",
            NormLevel::Regulation => "regulation",
            NormLevel::AdministrativeRule => "administrative-rule",
            NormLevel::Precedent => "precedent",
            NormLevel::PreparatoryWork => "preparatory-work",
            NormLevel::Doctrine => "doctrine",
        }
    }

    /// Persuasive rather than binding or guiding authority
    pub fn is_persuasive(&self) -> bool {
        matches!(self, NormLevel::PreparatoryWork | NormLevel::Doctrine)
    }
}

impl fmt::Display for NormLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for unrecognised norm level names
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown norm level: {0}")]
pub struct UnknownNormLevel(pub String);

impl FromStr for NormLevel {
    type Err = UnknownNormLevel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        NormLevel::ALL
            .iter()
            .copied()
            .find(|level| level.as_str() == normalized)
            .ok_or_else(|| UnknownNormLevel(s.to_string()))
    }
}
