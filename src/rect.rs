use crate::WriteError;
use num_bigint::BigInt;

/// Inclusive rectangle in the coordinate space of a pattern source.
///
/// Universes may be far larger than machine words, so the edges are stored
/// as [`BigInt`]. The writers narrow them to [`Bounds`] once the requested
/// rectangle is known to fit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rect {
    pub top: BigInt,
    pub left: BigInt,
    pub bottom: BigInt,
    pub right: BigInt,
}

impl Rect {
    pub fn new(
        top: impl Into<BigInt>,
        left: impl Into<BigInt>,
        bottom: impl Into<BigInt>,
        right: impl Into<BigInt>,
    ) -> Self {
        Self {
            top: top.into(),
            left: left.into(),
            bottom: bottom.into(),
            right: right.into(),
        }
    }

    /// Returns `true` if the rectangle contains no cells,
    /// i.e. `top > bottom` or `left > right`.
    pub fn is_degenerate(&self) -> bool {
        self.top > self.bottom || self.left > self.right
    }

    /// Number of columns, zero for a degenerate rectangle.
    pub fn width(&self) -> BigInt {
        if self.is_degenerate() {
            BigInt::ZERO
        } else {
            &self.right - &self.left + 1
        }
    }

    /// Number of rows, zero for a degenerate rectangle.
    pub fn height(&self) -> BigInt {
        if self.is_degenerate() {
            BigInt::ZERO
        } else {
            &self.bottom - &self.top + 1
        }
    }

    /// Narrows the edges to native integers.
    ///
    /// # Errors
    ///
    /// Returns [`WriteError::RectOutOfRange`] if any edge does not fit in `i64`.
    pub fn to_bounds(&self) -> Result<Bounds, WriteError> {
        let narrow = |x: &BigInt| i64::try_from(x).map_err(|_| WriteError::RectOutOfRange);
        Ok(Bounds {
            top: narrow(&self.top)?,
            left: narrow(&self.left)?,
            bottom: narrow(&self.bottom)?,
            right: narrow(&self.right)?,
        })
    }
}

/// A [`Rect`] narrowed to native integers. Always non-degenerate when
/// produced by the writers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Bounds {
    pub top: i64,
    pub left: i64,
    pub bottom: i64,
    pub right: i64,
}

impl Bounds {
    /// Number of columns. The full `i64` span has `2^64` of them,
    /// hence the wider type.
    pub fn width(&self) -> u128 {
        (i128::from(self.right) - i128::from(self.left) + 1) as u128
    }

    pub fn height(&self) -> u128 {
        (i128::from(self.bottom) - i128::from(self.top) + 1) as u128
    }
}
