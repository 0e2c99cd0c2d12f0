//! The output cell grid: extent + cell size → pixel counts, affine
//! transform and pixel-centre coordinate axes.

use serde::{Deserialize, Serialize};

use crate::extent::{Extent, ExtentError};

/// Affine map from (col, row) pixel space to projected coordinates:
///   x = a·col + b·row + c
///   y = d·col + e·row + f
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Affine {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl Affine {
    /// North-up transform with the top-left corner at (`left`, `top`).
    pub fn from_origin(left: f64, top: f64, dx: f64, dy: f64) -> Self {
        Self { a: dx, b: 0.0, c: left, d: 0.0, e: -dy, f: top }
    }

    /// Build from a GDAL GeoTransform `[c, a, b, f, d, e]`.
    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self { a: gt[1], b: gt[2], c: gt[0], d: gt[4], e: gt[5], f: gt[3] }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [self.c, self.a, self.b, self.f, self.d, self.e]
    }

    /// Pixel-space (col, row) → coordinates. Integer inputs address pixel
    /// corners; add 0.5 for centres.
    #[inline]
    pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        (self.a * col + self.b * row + self.c, self.d * col + self.e * row + self.f)
    }
}

/// A north-up grid of square cells covering `extent` exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grid {
    pub extent: Extent,
    pub cell_size: f64,
    pub nx: usize,
    pub ny: usize,
    pub transform: Affine,
}

impl Grid {
    /// `extent` width and height must be whole multiples of `cell_size`;
    /// run [`Extent::align_to`] first for arbitrary extents.
    pub fn new(extent: Extent, cell_size: f64) -> Result<Self, ExtentError> {
        if !(cell_size.is_finite() && cell_size > 0.0) {
            return Err(ExtentError::CellSize(cell_size));
        }
        if !extent.is_multiple_of(cell_size) {
            return Err(ExtentError::NotAligned { extent: extent.to_string(), cell_size });
        }
        let nx = (extent.width() / cell_size).round() as usize;
        let ny = (extent.height() / cell_size).round() as usize;
        Ok(Self {
            extent,
            cell_size,
            nx,
            ny,
            transform: Affine::from_origin(extent.left, extent.top, cell_size, cell_size),
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nx * self.ny
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pixel-centre x coordinates, west → east.
    pub fn x(&self) -> Vec<f64> {
        (0..self.nx).map(|c| self.extent.left + (c as f64 + 0.5) * self.cell_size).collect()
    }

    /// Pixel-centre y coordinates, north → south (row 0 is the top row).
    pub fn y(&self) -> Vec<f64> {
        (0..self.ny).map(|r| self.extent.top - (r as f64 + 0.5) * self.cell_size).collect()
    }

    /// Centre coordinate of pixel (`row`, `col`).
    #[inline]
    pub fn center(&self, row: usize, col: usize) -> (f64, f64) {
        self.transform.apply(col as f64 + 0.5, row as f64 + 0.5)
    }

    /// Cell area in square metres (square cells, projected CRS).
    pub fn cell_area(&self) -> f64 {
        self.cell_size * self.cell_size
    }
}

/// Affine transform plus x/y pixel-centre axes for an aligned extent.
pub fn affine_transform_from_extent(
    extent: Extent,
    cell_size: f64,
) -> Result<(Affine, Vec<f64>, Vec<f64>), ExtentError> {
    let grid = Grid::new(extent, cell_size)?;
    let (x, y) = (grid.x(), grid.y());
    Ok((grid.transform, x, y))
}
