//! Exact selection: 0/1 knapsack by dynamic programming.

use std::time::Instant;

use dispatch_core::{CancelToken, DeliveryError, Result};
use tracing::{debug, warn};

use crate::planner::{Item, Selection, SelectionStrategy};

/// Dynamic-programming knapsack solver.
///
/// Finds the maximum total value under the capacity in
/// O(n * min(capacity, total weight)) time and space. Among several optimal
/// subsets it returns the one picked by the backtracking rule in
/// [`ExactStrategy::reconstruct`], which depends on the input order.
#[derive(Debug, Clone, Default)]
pub struct ExactStrategy;

impl ExactStrategy {
    pub fn new() -> Self {
        Self
    }

    /// Build the value table row by row.
    ///
    /// `table[i][w]` is the best value reachable with the first `i` eligible
    /// items under budget `w`. `checkpoint` runs before every row; an error
    /// from it stops the build. Rows are reserved fallibly so an oversized
    /// table surfaces as an error rather than an abort.
    fn build_table(
        eligible: &[(usize, Item)],
        width: usize,
        mut checkpoint: impl FnMut() -> Result<()>,
    ) -> Result<Vec<Vec<i64>>> {
        let mut table = Vec::with_capacity(eligible.len() + 1);
        table.push(zeroed_row(width)?);

        for (_, item) in eligible {
            checkpoint()?;

            let weight = item.weight as usize;
            let prev = &table[table.len() - 1];
            let mut row = zeroed_row(width)?;

            for w in 0..=width {
                row[w] = prev[w];
                if w >= weight {
                    row[w] = row[w].max(prev[w - weight].saturating_add(item.value));
                }
            }
            table.push(row);
        }

        Ok(table)
    }

    /// Walk the table back from `(n, width)`.
    ///
    /// Item `i` is selected only when `table[i][w] != table[i - 1][w]`, i.e.
    /// when including it was required to reach that cell's value. An item
    /// whose inclusion merely ties is skipped.
    fn reconstruct(
        table: &[Vec<i64>],
        eligible: &[(usize, Item)],
        width: usize,
    ) -> Result<Selection> {
        let mut selection = Selection::default();
        let mut w = width;
        let mut i = eligible.len();

        while i > 0 && w > 0 {
            if table[i][w] != table[i - 1][w] {
                let (index, item) = eligible[i - 1];
                let weight = item.weight as usize;
                if weight > w {
                    return Err(DeliveryError::InvariantViolation(format!(
                        "backtracking selected item {} (weight {}) with only {} capacity left",
                        index, item.weight, w
                    )));
                }
                selection.indices.push(index);
                selection.total_weight += item.weight;
                selection.total_value = selection.total_value.saturating_add(item.value);
                w -= weight;
            }
            i -= 1;
        }

        Ok(selection)
    }
}

fn zeroed_row(width: usize) -> Result<Vec<i64>> {
    let mut row = Vec::new();
    row.try_reserve_exact(width + 1).map_err(|e| {
        DeliveryError::Internal(format!("cannot allocate knapsack row of width {}: {}", width, e))
    })?;
    row.resize(width + 1, 0);
    Ok(row)
}

impl SelectionStrategy for ExactStrategy {
    fn name(&self) -> &'static str {
        "exact"
    }

    fn select(&self, items: &[Item], capacity: i64, cancel: &CancelToken) -> Result<Selection> {
        let start_time = Instant::now();

        let cap = match usize::try_from(capacity) {
            Ok(cap) if cap > 0 => cap,
            _ => return Ok(Selection::default()),
        };

        // Items that can never fit must not take part in the table.
        let eligible: Vec<(usize, Item)> = items
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, item)| item.weight > 0 && item.weight <= capacity)
            .collect();

        if eligible.is_empty() {
            return Ok(Selection::default());
        }

        // Every budget at or above the eligible weight sum reaches the same
        // values, so the table never needs to be wider than that sum.
        let weight_sum = eligible
            .iter()
            .fold(0i64, |sum, (_, item)| sum.saturating_add(item.weight));
        let width = cap.min(usize::try_from(weight_sum).unwrap_or(usize::MAX));

        let table = Self::build_table(&eligible, width, || cancel.check()).inspect_err(|e| {
            if e.is_cancelled() {
                warn!(rows = eligible.len(), capacity, "Knapsack table build cancelled");
            }
        })?;

        let selection = Self::reconstruct(&table, &eligible, width)?;
        let best = table[eligible.len()][width];
        if selection.total_value != best {
            return Err(DeliveryError::InvariantViolation(format!(
                "reconstructed value {} differs from optimum {}",
                selection.total_value, best
            )));
        }

        debug!(
            eligible = eligible.len(),
            selected = selection.indices.len(),
            total_value = selection.total_value,
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "Exact selection complete"
        );

        Ok(selection)
    }
}
