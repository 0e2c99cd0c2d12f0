//! Domain extents in a projected coordinate system and their alignment to a
//! cell grid. All coordinate math uses f64.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Boundaries closer than this (in cells) to a grid line count as on it.
const ALIGN_TOLERANCE_CELLS: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExtentError {
    #[error("extent must have 4 values [left, bottom, right, top], got {0}")]
    ElementCount(usize),

    #[error("extent {field} is not finite ({value})")]
    NotFinite { field: &'static str, value: f64 },

    #[error("extent {field} must be positive, got {value} (check {lo} < {hi})")]
    NonPositive {
        field: &'static str,
        value: f64,
        lo: &'static str,
        hi: &'static str,
    },

    #[error("cell_size must be a positive finite number, got {0}")]
    CellSize(f64),

    #[error("extent {extent} is not aligned to a {cell_size} cell grid")]
    NotAligned { extent: String, cell_size: f64 },
}

/// Bounding box `[left, bottom, right, top]`. Always satisfies
/// `left < right` and `bottom < top`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extent {
    pub left: f64,
    pub bottom: f64,
    pub right: f64,
    pub top: f64,
}

impl Extent {
    pub fn new(left: f64, bottom: f64, right: f64, top: f64) -> Result<Self, ExtentError> {
        for (field, value) in [("left", left), ("bottom", bottom), ("right", right), ("top", top)] {
            if !value.is_finite() {
                return Err(ExtentError::NotFinite { field, value });
            }
        }
        if right - left <= 0.0 {
            return Err(ExtentError::NonPositive { field: "width", value: right - left, lo: "left", hi: "right" });
        }
        if top - bottom <= 0.0 {
            return Err(ExtentError::NonPositive { field: "height", value: top - bottom, lo: "bottom", hi: "top" });
        }
        Ok(Self { left, bottom, right, top })
    }

    /// Build from a `[left, bottom, right, top]` slice, as found in config files.
    pub fn from_slice(values: &[f64]) -> Result<Self, ExtentError> {
        match values {
            &[left, bottom, right, top] => Self::new(left, bottom, right, top),
            _ => Err(ExtentError::ElementCount(values.len())),
        }
    }

    pub fn to_array(self) -> [f64; 4] {
        [self.left, self.bottom, self.right, self.top]
    }

    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    pub fn height(&self) -> f64 {
        self.top - self.bottom
    }

    pub fn contains(&self, other: &Extent) -> bool {
        self.left <= other.left
            && self.bottom <= other.bottom
            && self.right >= other.right
            && self.top >= other.top
    }

    pub fn intersects(&self, other: &Extent) -> bool {
        self.left < other.right && self.right > other.left && self.bottom < other.top && self.top > other.bottom
    }

    /// Grow the extent by a number of cells on each side, ordered
    /// `[left, bottom, right, top]`. Negative padding shrinks it and may
    /// therefore fail validation.
    pub fn pad(&self, cells: [i64; 4], cell_size: f64) -> Result<Extent, ExtentError> {
        check_cell_size(cell_size)?;
        Extent::new(
            self.left - cells[0] as f64 * cell_size,
            self.bottom - cells[1] as f64 * cell_size,
            self.right + cells[2] as f64 * cell_size,
            self.top + cells[3] as f64 * cell_size,
        )
    }

    /// Expand outward to the next grid line in every direction. Grid lines
    /// are the multiples of `cell_size` from the coordinate origin, so any
    /// two aligned extents share the same lattice.
    pub fn align_to(&self, cell_size: f64) -> Result<Extent, ExtentError> {
        check_cell_size(cell_size)?;
        Extent::new(
            snap(self.left, cell_size, f64::floor),
            snap(self.bottom, cell_size, f64::floor),
            snap(self.right, cell_size, f64::ceil),
            snap(self.top, cell_size, f64::ceil),
        )
    }

    /// True when width and height are whole multiples of `cell_size`.
    pub fn is_multiple_of(&self, cell_size: f64) -> bool {
        on_grid(self.width(), cell_size) && on_grid(self.height(), cell_size)
    }

    /// True when every boundary lies on the global `cell_size` lattice.
    pub fn is_aligned(&self, cell_size: f64) -> bool {
        self.to_array().iter().all(|&v| on_grid(v, cell_size))
    }
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}, {}, {}]", self.left, self.bottom, self.right, self.top)
    }
}

fn check_cell_size(cell_size: f64) -> Result<(), ExtentError> {
    if cell_size.is_finite() && cell_size > 0.0 {
        Ok(())
    } else {
        Err(ExtentError::CellSize(cell_size))
    }
}

fn on_grid(value: f64, cell_size: f64) -> bool {
    let q = value / cell_size;
    (q - q.round()).abs() <= ALIGN_TOLERANCE_CELLS
}

fn snap(value: f64, cell_size: f64, round: fn(f64) -> f64) -> f64 {
    let q = value / cell_size;
    if (q - q.round()).abs() <= ALIGN_TOLERANCE_CELLS {
        q.round() * cell_size
    } else {
        round(q) * cell_size
    }
}
