//! Greedy selection by value density.

use std::cmp::Ordering;

use dispatch_core::{CancelToken, Result};
use tracing::debug;

use crate::planner::{Item, Selection, SelectionStrategy};

/// Value-density heuristic.
///
/// Ranks items by `value / weight` and takes every item that still fits.
/// Always feasible, never better than [`crate::ExactStrategy`], O(n log n).
#[derive(Debug, Clone, Default)]
pub struct GreedyStrategy;

impl GreedyStrategy {
    pub fn new() -> Self {
        Self
    }
}

/// Compare densities exactly: `a.value / a.weight` against `b.value / b.weight`.
/// Both weights are positive.
fn cmp_density(a: &Item, b: &Item) -> Ordering {
    let lhs = a.value as i128 * b.weight as i128;
    let rhs = b.value as i128 * a.weight as i128;
    lhs.cmp(&rhs)
}

/// Take ranked items in turn while they fit. `checkpoint` runs before each.
fn take_fitting(
    ranked: Vec<(usize, Item)>,
    capacity: i64,
    mut checkpoint: impl FnMut() -> Result<()>,
) -> Result<Selection> {
    let mut selection = Selection::default();
    for (index, item) in ranked {
        checkpoint()?;

        if item.weight <= capacity - selection.total_weight {
            selection.indices.push(index);
            selection.total_weight += item.weight;
            selection.total_value = selection.total_value.saturating_add(item.value);
        }
    }
    Ok(selection)
}

impl SelectionStrategy for GreedyStrategy {
    fn name(&self) -> &'static str {
        "greedy"
    }

    fn select(&self, items: &[Item], capacity: i64, cancel: &CancelToken) -> Result<Selection> {
        let mut ranked: Vec<(usize, Item)> = items
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, item)| item.weight > 0)
            .collect();

        // Stable: equal densities keep their input order.
        ranked.sort_by(|(_, a), (_, b)| cmp_density(b, a));

        let selection = take_fitting(ranked, capacity, || cancel.check())?;

        debug!(
            candidates = items.len(),
            selected = selection.indices.len(),
            total_value = selection.total_value,
            "Greedy selection complete"
        );

        Ok(selection)
    }
}
