//! Priority classes and the fixed class → score table.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Broker ordering key. Lower scores are dequeued first.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Score(pub u32);

impl Score {
    pub fn value(self) -> u32 {
        self.0
    }
}

impl core::fmt::Display for Score {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Coarse priority tier chosen at submission.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityClass {
    High,
    Low,
}

impl PriorityClass {
    pub const ALL: [PriorityClass; 2] = [PriorityClass::High, PriorityClass::Low];

    /// Score used when inserting into the broker. `High` sorts before `Low`.
    ///
    /// The score carries no sequence component, so jobs of the same class come
    /// out in whatever order the broker keeps them.
    pub fn score(self) -> Score {
        match self {
            PriorityClass::High => Score(1),
            PriorityClass::Low => Score(2),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PriorityClass::High => "high",
            PriorityClass::Low => "low",
        }
    }
}

impl core::fmt::Display for PriorityClass {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PriorityClass {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high" => Ok(PriorityClass::High),
            "low" => Ok(PriorityClass::Low),
            other => Err(DomainError::validation(format!(
                "priority must be \"high\" or \"low\", got {other:?}"
            ))),
        }
    }
}
