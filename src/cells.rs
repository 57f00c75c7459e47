use crate::{PatternSource, Rect};
use num_bigint::BigInt;
use std::collections::{BTreeMap, BTreeSet};

/// A sparse set of alive cells on an unbounded plane with signed coordinates.
///
/// Cells are kept sorted by row and column, so every query the writers need
/// is a range lookup. Unlike [`crate::Pattern`], this source is not
/// hyper-capable and can only be written as RLE.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CellSet {
    rule: String,
    /// Alive columns of every non-empty row.
    rows: BTreeMap<i64, BTreeSet<i64>>,
    population: u64,
}

impl CellSet {
    pub fn new(rule: impl Into<String>) -> Self {
        Self {
            rule: rule.into(),
            rows: BTreeMap::new(),
            population: 0,
        }
    }

    /// Creates a set from `(x, y)` coordinates of alive cells.
    /// Duplicates are ignored.
    pub fn from_cells(
        rule: impl Into<String>,
        cells: impl IntoIterator<Item = (i64, i64)>,
    ) -> Self {
        let mut result = Self::new(rule);
        for (x, y) in cells {
            result.set_cell(x, y, true);
        }
        result
    }

    pub fn get_cell(&self, x: i64, y: i64) -> bool {
        self.rows.get(&y).is_some_and(|row| row.contains(&x))
    }

    pub fn set_cell(&mut self, x: i64, y: i64, alive: bool) {
        if alive {
            if self.rows.entry(y).or_default().insert(x) {
                self.population += 1;
            }
        } else if let Some(row) = self.rows.get_mut(&y) {
            if row.remove(&x) {
                self.population -= 1;
            }
            if row.is_empty() {
                self.rows.remove(&y);
            }
        }
    }

    /// Iterates over alive cells in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = (i64, i64)> + '_ {
        self.rows
            .iter()
            .flat_map(|(&y, row)| row.iter().map(move |&x| (x, y)))
    }
}

impl PatternSource for CellSet {
    fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn rule(&self) -> &str {
        &self.rule
    }

    fn population(&self) -> BigInt {
        BigInt::from(self.population)
    }

    fn find_edges(&self) -> Option<Rect> {
        let (&top, _) = self.rows.first_key_value()?;
        let (&bottom, _) = self.rows.last_key_value()?;
        let left = self.rows.values().filter_map(|row| row.first()).min()?;
        let right = self.rows.values().filter_map(|row| row.last()).max()?;
        Some(Rect::new(top, *left, bottom, *right))
    }

    fn next_cell(&self, x: i64, y: i64) -> Option<u64> {
        let next = *self.rows.get(&y)?.range(x..).next()?;
        Some((i128::from(next) - i128::from(x)) as u64)
    }
}
