//! Selection strategy trait and configuration.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use dispatch_core::{CancelToken, DeliveryError, Result};
use serde::{Deserialize, Serialize};

use crate::exact::ExactStrategy;
use crate::greedy::GreedyStrategy;

/// A candidate for selection: what it costs in capacity and what it is worth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Item {
    pub weight: i64,
    pub value: i64,
}

impl Item {
    pub fn new(weight: i64, value: i64) -> Self {
        Self { weight, value }
    }
}

/// Output of a selection strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    /// Indices into the input slice, in the order the strategy picked them.
    pub indices: Vec<usize>,

    /// Sum of the selected weights.
    pub total_weight: i64,

    /// Sum of the selected values.
    pub total_value: i64,
}

impl Selection {
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Check that the selection is feasible for `items` under `capacity`.
    ///
    /// Any failure here is a defect in the strategy, never a recoverable
    /// condition.
    pub fn verify(&self, items: &[Item], capacity: i64) -> Result<()> {
        let mut seen = HashSet::with_capacity(self.indices.len());
        let mut weight = 0i64;
        let mut value = 0i64;

        for &index in &self.indices {
            let item = items.get(index).ok_or_else(|| {
                DeliveryError::InvariantViolation(format!(
                    "selected index {} out of range for {} items",
                    index,
                    items.len()
                ))
            })?;
            if !seen.insert(index) {
                return Err(DeliveryError::InvariantViolation(format!(
                    "item {} selected twice",
                    index
                )));
            }
            if item.weight <= 0 || item.weight > capacity - weight {
                return Err(DeliveryError::InvariantViolation(format!(
                    "item {} (weight {}) exceeds remaining capacity {}",
                    index,
                    item.weight,
                    capacity - weight
                )));
            }
            weight += item.weight;
            value = value.saturating_add(item.value);
        }

        if weight != self.total_weight || value != self.total_value {
            return Err(DeliveryError::InvariantViolation(format!(
                "reported totals {}/{} do not match selected items {}/{}",
                self.total_weight, self.total_value, weight, value
            )));
        }

        Ok(())
    }
}

/// Picks a subset of items whose total weight fits a capacity.
///
/// Implementations are pure: no I/O, no shared state. They must poll
/// `cancel` regularly and return the cancellation condition when it fires.
pub trait SelectionStrategy: Send + Sync {
    /// Short name used in logs and configuration.
    fn name(&self) -> &'static str;

    /// Select items for `capacity`. Non-positive capacity selects nothing.
    fn select(&self, items: &[Item], capacity: i64, cancel: &CancelToken) -> Result<Selection>;
}

/// Which strategy a planner runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Dynamic-programming knapsack, optimal value.
    #[default]
    Exact,
    /// Value-density heuristic, fast but approximate.
    Greedy,
}

impl StrategyKind {
    /// Build the strategy this kind names.
    pub fn build(&self) -> Arc<dyn SelectionStrategy> {
        match self {
            StrategyKind::Exact => Arc::new(ExactStrategy::new()),
            StrategyKind::Greedy => Arc::new(GreedyStrategy::new()),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Exact => "exact",
            StrategyKind::Greedy => "greedy",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = DeliveryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "exact" | "dp" | "knapsack" => Ok(StrategyKind::Exact),
            "greedy" => Ok(StrategyKind::Greedy),
            other => Err(DeliveryError::Config(format!(
                "unknown selection strategy '{}'",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items() -> Vec<Item> {
        vec![Item::new(2, 3), Item::new(3, 4), Item::new(4, 5)]
    }

    #[test]
    fn test_verify_accepts_feasible_selection() {
        let selection = Selection {
            indices: vec![1, 0],
            total_weight: 5,
            total_value: 7,
        };
        assert!(selection.verify(&items(), 5).is_ok());
    }

    #[test]
    fn test_verify_rejects_overweight() {
        let selection = Selection {
            indices: vec![1, 2],
            total_weight: 7,
            total_value: 9,
        };
        assert!(matches!(
            selection.verify(&items(), 5),
            Err(DeliveryError::InvariantViolation(_))
        ));
    }

    #[test]
    fn test_verify_rejects_duplicates_and_bad_totals() {
        let duplicate = Selection {
            indices: vec![0, 0],
            total_weight: 4,
            total_value: 6,
        };
        assert!(duplicate.verify(&items(), 10).is_err());

        let wrong_totals = Selection {
            indices: vec![0],
            total_weight: 2,
            total_value: 99,
        };
        assert!(wrong_totals.verify(&items(), 10).is_err());

        let out_of_range = Selection {
            indices: vec![9],
            total_weight: 0,
            total_value: 0,
        };
        assert!(out_of_range.verify(&items(), 10).is_err());
    }

    #[test]
    fn test_strategy_kind_parsing() {
        assert_eq!("exact".parse::<StrategyKind>().unwrap(), StrategyKind::Exact);
        assert_eq!("Greedy".parse::<StrategyKind>().unwrap(), StrategyKind::Greedy);
        assert!("random".parse::<StrategyKind>().is_err());
        assert_eq!(StrategyKind::default(), StrategyKind::Exact);
    }

    #[test]
    fn test_build_names() {
        assert_eq!(StrategyKind::Exact.build().name(), "exact");
        assert_eq!(StrategyKind::Greedy.build().name(), "greedy");
    }
}
