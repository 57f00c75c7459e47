#![warn(clippy::all)]

mod cells;
mod error;
mod pattern;
mod rect;
mod traits;
mod writer;

pub use cells::CellSet;
pub use error::WriteError;
pub use num_bigint::BigInt;
pub use pattern::{Pattern, DEFAULT_RULE};
pub use rect::{Bounds, Rect};
pub use traits::{NoProgress, PatternSource, Progress};
pub use writer::{write_pattern, PatternFormat, PatternWriter, WriteOptions};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
