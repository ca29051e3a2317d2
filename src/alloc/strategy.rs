//! Placement strategy and its process-wide registry.

use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

/// Placement strategy for candidate node ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Best-fit: smallest remaining capacity that still satisfies the
    /// request.
    Best,
    /// Worst-fit: largest remaining capacity. Reduces failure rate under
    /// skewed load.
    Largest,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Best => "best",
            Self::Largest => "largest",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Largest,
            _ => Self::Best,
        }
    }

    fn as_u8(&self) -> u8 {
        match self {
            Self::Best => 0,
            Self::Largest => 1,
        }
    }
}

impl FromStr for Strategy {
    type Err = InvalidStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "best" => Ok(Self::Best),
            "largest" => Ok(Self::Largest),
            other => Err(InvalidStrategy(other.to_string())),
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for strategy values outside `{best, largest}`.
#[derive(Debug, thiserror::Error)]
#[error("unknown strategy: {0:?} (expected \"best\" or \"largest\")")]
pub struct InvalidStrategy(pub String);

/// Process-wide strategy cell.
///
/// Reads and writes are atomic with respect to each other. An allocation
/// reads the cell exactly once at the start of the call, so an in-flight
/// call completes under the strategy it observed; a change takes effect for
/// calls starting after the store.
#[derive(Debug)]
pub struct StrategyRegistry {
    cell: AtomicU8,
}

impl StrategyRegistry {
    pub fn new(initial: Strategy) -> Self {
        Self {
            cell: AtomicU8::new(initial.as_u8()),
        }
    }

    pub fn get(&self) -> Strategy {
        Strategy::from_u8(self.cell.load(Ordering::Acquire))
    }

    pub fn set(&self, strategy: Strategy) {
        self.cell.store(strategy.as_u8(), Ordering::Release);
    }
}
