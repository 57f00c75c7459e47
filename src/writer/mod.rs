mod encoder;
mod output;
mod rle;

use crate::{PatternSource, Progress, Rect, WriteError};
use flate2::{write::GzEncoder, Compression};
use std::{fs::File, io::Write, path::Path, str::FromStr};

/// Supported formats for pattern serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternFormat {
    /// [Extended RLE](https://golly.sourceforge.io/Help/formats.html#rle) format:
    /// a header line followed by run-length encoded rows, wrapped at 70 characters.
    ///
    /// Only the requested rectangle is written.
    RLE,

    /// Life 1.05 format. Recognized, but there is no writer for it.
    Life105,

    /// [Macrocell](https://golly.sourceforge.io/Help/formats.html#mc) format,
    /// produced by the pattern source itself if it is hyper-capable.
    ///
    /// The whole universe is written, the rectangle is ignored.
    Macrocell,

    /// Gzip-compressed macrocell format.
    CompressedMacrocell,
}

impl PatternFormat {
    /// Guesses the format from the file name, like `glider.rle` or `otca.mc.gz`.
    ///
    /// # Errors
    ///
    /// Returns [`WriteError::FormatUnsupported`] for unknown extensions.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, WriteError> {
        let name = path
            .as_ref()
            .file_name()
            .map(|x| x.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        if name.ends_with(".mc.gz") {
            Ok(PatternFormat::CompressedMacrocell)
        } else {
            let ext = name.rsplit_once('.').map(|(_, ext)| ext).unwrap_or_default();
            ext.parse()
        }
    }
}

impl FromStr for PatternFormat {
    type Err = WriteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rle" => Ok(PatternFormat::RLE),
            "lif" | "life" | "life105" => Ok(PatternFormat::Life105),
            "mc" => Ok(PatternFormat::Macrocell),
            "mc.gz" => Ok(PatternFormat::CompressedMacrocell),
            _ => Err(WriteError::FormatUnsupported(s.to_string())),
        }
    }
}

/// Tuning knobs of [`PatternWriter`]. Neither affects the produced bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WriteOptions {
    /// Size of the block handed to the sink at once, in bytes.
    pub buffer_size: usize,
    /// Number of processed cells between two progress polls.
    pub progress_interval: u64,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            buffer_size: 8192,
            progress_interval: 1024,
        }
    }
}

/// Serializes pattern sources into files or arbitrary sinks.
///
/// # Example
///
/// ```rust
/// use gol_patterns::{CellSet, NoProgress, PatternFormat, PatternWriter, Rect, WriteOptions};
///
/// let glider = CellSet::from_cells("B3/S23", [(1, 0), (2, 1), (0, 2), (1, 2), (2, 2)]);
/// let mut data = Vec::new();
/// PatternWriter::new(WriteOptions::default())
///     .write(&mut data, &glider, PatternFormat::RLE, &Rect::new(0, 0, 2, 2), &mut NoProgress)
///     .unwrap();
/// assert_eq!(data, b"x = 3, y = 3, rule = B3/S23\nbo$2bo$3o!\n");
/// ```
#[derive(Clone, Copy, Debug, Default)]
pub struct PatternWriter {
    options: WriteOptions,
}

impl PatternWriter {
    pub fn new(options: WriteOptions) -> Self {
        Self { options }
    }

    /// Creates the file at `path` and writes the pattern into it.
    /// The file is closed before returning, whatever the outcome.
    ///
    /// # Errors
    ///
    /// * [`WriteError::SinkCreationFailed`] if the file can't be created
    /// * any error of [`PatternWriter::write`]; the file then holds an
    ///   incomplete pattern
    pub fn write_file<S: PatternSource + ?Sized>(
        &self,
        path: impl AsRef<Path>,
        source: &S,
        format: PatternFormat,
        rect: &Rect,
        progress: &mut dyn Progress,
    ) -> Result<(), WriteError> {
        let path = path.as_ref();
        let mut file = File::create(path).map_err(|source| WriteError::SinkCreationFailed {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), ?format, "created pattern file");
        self.write(&mut file, source, format, rect, progress)
    }

    /// Writes the pattern into `sink` in the given `format`.
    ///
    /// `rect` selects the cells written in the RLE format; the macrocell
    /// formats always cover the whole universe.
    ///
    /// # Errors
    ///
    /// * [`WriteError::FormatNotImplemented`] for [`PatternFormat::Life105`]
    /// * [`WriteError::NativeWriterUnavailable`] if a macrocell format is
    ///   requested from a source that is not hyper-capable
    /// * [`WriteError::Native`] if the native writer fails
    /// * [`WriteError::RectOutOfRange`] if `rect` doesn't fit in `i64`
    /// * [`WriteError::Io`] if the sink fails
    /// * [`WriteError::Truncated`] if `progress` requested cancellation,
    ///   which takes precedence over all of the above
    pub fn write<W: Write, S: PatternSource + ?Sized>(
        &self,
        sink: &mut W,
        source: &S,
        format: PatternFormat,
        rect: &Rect,
        progress: &mut dyn Progress,
    ) -> Result<(), WriteError> {
        let mut latch = CancelLatch {
            inner: progress,
            cancelled: false,
        };
        latch.begin("Writing pattern file");
        let result = match format {
            PatternFormat::RLE => rle::write_rle(sink, source, rect, &mut latch, &self.options),
            PatternFormat::Life105 => Err(WriteError::FormatNotImplemented(format)),
            PatternFormat::Macrocell | PatternFormat::CompressedMacrocell
                if !source.is_hyper_capable() =>
            {
                Err(WriteError::NativeWriterUnavailable)
            }
            PatternFormat::Macrocell => write_macrocell(sink, source, &mut latch),
            PatternFormat::CompressedMacrocell => {
                // the encoder writes a gzip header even when dropped unfinished
                let mut encoder = GzEncoder::new(&mut *sink, Compression::default());
                write_macrocell(&mut encoder, source, &mut latch)
                    .and_then(|()| Ok(encoder.finish()?.flush()?))
            }
        };
        latch.end();

        if latch.cancelled {
            return Err(WriteError::Truncated);
        }
        if let Err(err) = &result {
            tracing::debug!(%err, ?format, "failed to write pattern");
        }
        result
    }
}

/// Writes the pattern to a file with default [`WriteOptions`].
///
/// # Errors
///
/// See [`PatternWriter::write_file`].
pub fn write_pattern<S: PatternSource + ?Sized>(
    path: impl AsRef<Path>,
    source: &S,
    format: PatternFormat,
    rect: &Rect,
    progress: &mut dyn Progress,
) -> Result<(), WriteError> {
    PatternWriter::default().write_file(path, source, format, rect, progress)
}

fn write_macrocell<W: Write, S: PatternSource + ?Sized>(
    sink: &mut W,
    source: &S,
    progress: &mut dyn Progress,
) -> Result<(), WriteError> {
    source
        .write_native_format(sink, progress)
        .map_err(WriteError::Native)?;
    sink.flush()?;
    Ok(())
}

/// Remembers whether the caller ever requested cancellation,
/// whichever writer was polling.
struct CancelLatch<'a> {
    inner: &'a mut dyn Progress,
    cancelled: bool,
}

impl Progress for CancelLatch<'_> {
    fn begin(&mut self, description: &str) {
        self.inner.begin(description);
    }

    fn poll(&mut self, fraction: f64, message: &str) -> bool {
        if !self.cancelled {
            self.cancelled = self.inner.poll(fraction, message);
        }
        self.cancelled
    }

    fn end(&mut self) {
        self.inner.end();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CellSet, NoProgress, Pattern};

    #[test]
    fn test_format_from_path() {
        assert_eq!(PatternFormat::from_path("a/glider.rle").unwrap(), PatternFormat::RLE);
        assert_eq!(PatternFormat::from_path("otca.MC").unwrap(), PatternFormat::Macrocell);
        assert_eq!(
            PatternFormat::from_path("otca_0.mc.gz").unwrap(),
            PatternFormat::CompressedMacrocell
        );
        assert_eq!(PatternFormat::from_path("x.lif").unwrap(), PatternFormat::Life105);
        assert!(matches!(
            PatternFormat::from_path("x.png"),
            Err(WriteError::FormatUnsupported(tag)) if tag == "png"
        ));
        assert!(matches!(
            PatternFormat::from_path("glider.rle.gz"),
            Err(WriteError::FormatUnsupported(tag)) if tag == "gz"
        ));
        assert_eq!(
            "mc.gz".parse::<PatternFormat>().unwrap(),
            PatternFormat::CompressedMacrocell
        );
        assert!(matches!(
            "cells".parse::<PatternFormat>(),
            Err(WriteError::FormatUnsupported(_))
        ));
    }

    #[test]
    fn test_life105_not_implemented() {
        let cells = CellSet::from_cells("B3/S23", [(0, 0)]);
        let mut sink = Vec::new();
        let result = PatternWriter::default().write(
            &mut sink,
            &cells,
            PatternFormat::Life105,
            &Rect::new(0, 0, 0, 0),
            &mut NoProgress,
        );
        assert!(matches!(
            result,
            Err(WriteError::FormatNotImplemented(PatternFormat::Life105))
        ));
        assert!(sink.is_empty());
    }

    #[test]
    fn test_macrocell_requires_hyper_capable_source() {
        let cells = CellSet::from_cells("B3/S23", [(0, 0)]);
        for format in [PatternFormat::Macrocell, PatternFormat::CompressedMacrocell] {
            let mut sink = Vec::new();
            let result = PatternWriter::default().write(
                &mut sink,
                &cells,
                format,
                &Rect::new(0, 0, 0, 0),
                &mut NoProgress,
            );
            assert!(matches!(result, Err(WriteError::NativeWriterUnavailable)));
            assert!(sink.is_empty(), "{format:?} wrote {} bytes", sink.len());
        }
    }

    #[test]
    fn test_macrocell_ignores_rect() {
        let mut pattern = Pattern::default();
        pattern.set_cell(1, 2);
        let writer = PatternWriter::default();
        let (mut a, mut b) = (Vec::new(), Vec::new());
        let format = PatternFormat::Macrocell;
        writer
            .write(&mut a, &pattern, format, &Rect::new(0, 0, 7, 7), &mut NoProgress)
            .unwrap();
        writer
            .write(&mut b, &pattern, format, &Rect::new(1, 0, 0, 0), &mut NoProgress)
            .unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with(b"[M2]"));
    }

    #[test]
    fn test_cancel_latch_sticks() {
        struct CancelOnce(bool);
        impl Progress for CancelOnce {
            fn begin(&mut self, _: &str) {}
            fn poll(&mut self, _: f64, _: &str) -> bool {
                std::mem::take(&mut self.0)
            }
            fn end(&mut self) {}
        }

        let mut inner = CancelOnce(true);
        let mut latch = CancelLatch {
            inner: &mut inner,
            cancelled: false,
        };
        assert!(latch.poll(0.1, ""));
        assert!(latch.poll(0.2, ""));
        assert!(latch.cancelled);
    }
}
