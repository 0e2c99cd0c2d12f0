//! Topo generation for snow and hydrology models.
//!
//! Builds a gridded `topo.nc` (elevation, basin masks, vegetation type,
//! height and radiation coefficients) from a DEM, basin outlines and a
//! Landfire vegetation dataset, all aligned to one cell grid. The `lidar`
//! module adds gridded snow-depth flights on that same grid.
//!
//! Pipeline order: config → grid → warp rasters into the project CRS → rasterize masks
//! → vegetation coverage check → write NetCDF.

pub mod compare;
pub mod config;
pub mod crs;
pub mod error;
pub mod extent;
pub mod generator;
pub mod grid;
pub mod lidar;
pub mod logging;
pub mod raster;
pub mod resample;
pub mod topo;
pub mod vector;
pub mod vegetation;

pub use config::TopoConfig;
pub use error::{Result, TopoError};
pub use extent::Extent;
pub use generator::GenerateTopo;
pub use grid::{Affine, Grid};
pub use raster::Raster;

/// Crate version, stamped into output file history.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
