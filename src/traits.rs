use crate::Rect;
use anyhow::{anyhow, Result};
use num_bigint::BigInt;
use std::io::Write;

/// Provider of cell data for the pattern writers.
///
/// The writers never materialize the grid: they only ask for the bounding
/// box, the population and, row by row, the position of the next live cell.
pub trait PatternSource {
    /// Returns `true` if the universe contains no alive cells.
    fn is_empty(&self) -> bool;

    /// Rule identifier written into headers, e.g. `B3/S23`.
    /// Must not contain newlines.
    fn rule(&self) -> &str;

    /// Counts the alive cells of the whole universe.
    ///
    /// # Returns
    /// A `BigInt`, as hashed universes may hold more cells than any machine
    /// integer can count.
    fn population(&self) -> BigInt;

    /// Finds the smallest rectangle containing every alive cell.
    ///
    /// # Returns
    /// `None` if the universe is empty.
    fn find_edges(&self) -> Option<Rect>;

    /// Looks for the first alive cell on row `y` at or after column `x`.
    ///
    /// # Returns
    /// * `Some(skip)` - the cell at column `x + skip` is alive and the
    ///   `skip` cells before it are dead
    /// * `None` - there are no more alive cells on this row
    fn next_cell(&self, x: i64, y: i64) -> Option<u64>;

    /// Whether the source can serialize itself in the native macrocell format
    /// via [`PatternSource::write_native_format`].
    fn is_hyper_capable(&self) -> bool {
        false
    }

    /// Writes the whole universe in the native macrocell format.
    ///
    /// Implementations should poll `progress` periodically and stop as soon
    /// as it reports cancellation.
    ///
    /// # Errors
    ///
    /// The default implementation always fails; hyper-capable sources
    /// override it and may return their own errors.
    fn write_native_format(&self, sink: &mut dyn Write, progress: &mut dyn Progress) -> Result<()> {
        let _ = (sink, progress);
        Err(anyhow!("Native format is not supported by this pattern source"))
    }
}

/// Progress reporting and cooperative cancellation for long writes.
pub trait Progress {
    /// Called once before any data is written.
    fn begin(&mut self, description: &str);

    /// Reports the completed fraction (in `0.0..=1.0`) and a status message.
    ///
    /// # Returns
    /// `true` if the caller requested cancellation; the writer then stops
    /// without finishing the pattern.
    fn poll(&mut self, fraction: f64, message: &str) -> bool;

    /// Called once after the write finished, failed or was cancelled.
    fn end(&mut self);
}

/// A [`Progress`] that reports nothing and never cancels.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoProgress;

impl Progress for NoProgress {
    fn begin(&mut self, _description: &str) {}

    fn poll(&mut self, _fraction: f64, _message: &str) -> bool {
        false
    }

    fn end(&mut self) {}
}
