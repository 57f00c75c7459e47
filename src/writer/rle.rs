use super::{encoder::RunAccumulator, output::OutputBuffer, WriteOptions};
use crate::{PatternSource, Progress, Rect, WriteError};
use num_traits::ToPrimitive;
use std::io::Write;

/// Writes the cells of `source` inside `rect` in the RLE format.
///
/// The rectangle is scanned row by row, asking the source only for the next
/// alive cell, so blank areas cost nothing but the row itself.
///
/// # Errors
///
/// Besides sink failures, returns [`WriteError::Truncated`] if `progress`
/// requested cancellation. Runs completed before that are still flushed to
/// the sink, the terminator is not.
pub(super) fn write_rle<W, S>(
    sink: &mut W,
    source: &S,
    rect: &Rect,
    progress: &mut dyn Progress,
    options: &WriteOptions,
) -> Result<(), WriteError>
where
    W: Write + ?Sized,
    S: PatternSource + ?Sized,
{
    if source.is_empty() || rect.is_degenerate() {
        write!(sink, "x = 0, y = 0, rule = {}\n!\n", source.rule())?;
        sink.flush()?;
        return Ok(());
    }

    let b = rect.to_bounds()?;
    let (width, height) = (b.width(), b.height());
    tracing::debug!(width, height, rule = source.rule(), "writing RLE");

    let mut out = OutputBuffer::new(sink, options.buffer_size);
    out.put_slice(format!("x = {}, y = {}, rule = {}\n", width, height, source.rule()).as_bytes())?;

    let mut runs = RunAccumulator::new();
    let mut counter = ProgressCounter::new(source, height as f64, options.progress_interval);

    for cy in b.top..=b.bottom {
        runs.start_row();
        counter.add(1);
        let mut cx = b.left;
        loop {
            let remaining = (i128::from(b.right) - i128::from(cx)) as u64;
            // cells beyond the right edge do not count
            let skip = source.next_cell(cx, cy).filter(|&skip| skip <= remaining);
            if let Some(skip) = skip {
                if skip > 0 {
                    runs.dead_cells(&mut out, skip)?;
                }
                runs.live_cell(&mut out)?;
                counter.add(1);
            }
            if counter.poll(progress, out.bytes_written()) {
                tracing::info!(row = cy, column = cx, "RLE writing cancelled");
                out.finish()?;
                return Err(WriteError::Truncated);
            }
            match skip {
                Some(skip) if skip < remaining => {
                    cx = (i128::from(cx) + i128::from(skip) + 1) as i64
                }
                _ => break,
            }
        }
        runs.end_row(&mut out)?;
    }

    runs.finish(&mut out)?;
    out.finish()?;
    tracing::debug!(bytes = out.bytes_written(), "RLE written");
    Ok(())
}

/// Periodically reports the fraction of processed cells and checks for
/// cancellation.
struct ProgressCounter {
    pending: u64,
    accumulated: f64,
    /// Population plus height: blank rows cost time too, which matters
    /// for tall sparse patterns.
    total: f64,
    interval: u64,
}

impl ProgressCounter {
    fn new<S: PatternSource + ?Sized>(source: &S, height: f64, interval: u64) -> Self {
        let population = source.population().to_f64().unwrap_or(f64::MAX);
        Self {
            pending: 0,
            accumulated: 0.0,
            total: population + height,
            interval,
        }
    }

    #[inline]
    fn add(&mut self, cells: u64) {
        self.pending += cells;
    }

    /// Returns `true` if cancellation was requested.
    fn poll(&mut self, progress: &mut dyn Progress, bytes_written: u64) -> bool {
        if self.pending <= self.interval {
            return false;
        }
        self.accumulated += self.pending as f64;
        self.pending = 0;
        let message = format!("File size: {:.2} MB", bytes_written as f64 / 1048576.0);
        progress.poll((self.accumulated / self.total).min(1.0), &message)
    }
}
