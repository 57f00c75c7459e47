use crate::PatternFormat;
use std::path::PathBuf;

/// Errors reported by the pattern writers.
///
/// None of them is fatal to the process: the caller decides whether to retry
/// with a new sink.
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    /// The output file could not be created. Nothing was written.
    #[error("Can't create pattern file {}: {source}", path.display())]
    SinkCreationFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The format tag was not recognized.
    #[error("Unsupported pattern format: {0:?}")]
    FormatUnsupported(String),

    /// The format is known but no writer exists for it.
    #[error("{0:?} format is not yet implemented")]
    FormatNotImplemented(PatternFormat),

    /// Macrocell output was requested from a source that cannot produce it.
    #[error("Pattern source can't write macrocell format")]
    NativeWriterUnavailable,

    /// The native writer of the pattern source failed.
    #[error(transparent)]
    Native(anyhow::Error),

    /// The requested rectangle does not fit in native integers.
    #[error("Pattern is outside +/- 9.2e18 boundary and can't be saved")]
    RectOutOfRange,

    /// Writing to or flushing the sink failed.
    #[error("Failed to write pattern data: {0}")]
    Io(#[from] std::io::Error),

    /// The write was cancelled. The sink holds an incomplete pattern
    /// that must not be used.
    #[error("File contains truncated pattern")]
    Truncated,
}
