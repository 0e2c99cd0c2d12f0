//! Single-band georeferenced rasters, read and written through GDAL.
//!
//! Values are f32, row-major, row 0 = northernmost row. Coordinate math
//! uses f64.

use std::path::Path;

use gdal::raster::Buffer;
use gdal::{Dataset, DriverManager};

use crate::crs::Crs;
use crate::error::{Result, TopoError};
use crate::extent::Extent;
use crate::grid::{Affine, Grid};

/// Nodata written to every raster this crate produces.
pub const NODATA: f32 = -9999.0;

#[derive(Debug, Clone)]
pub struct Raster {
    pub data: Vec<f32>,
    pub width: usize,
    pub height: usize,
    pub transform: Affine,
    pub nodata: Option<f32>,
    pub crs: Crs,
}

impl Raster {
    /// Create a raster on `grid` filled with `fill`.
    pub fn new(grid: &Grid, fill: f32, nodata: Option<f32>, crs: Crs) -> Self {
        Self {
            data: vec![fill; grid.len()],
            width: grid.nx,
            height: grid.ny,
            transform: grid.transform,
            nodata,
            crs,
        }
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.data[row * self.width + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, val: f32) {
        self.data[row * self.width + col] = val;
    }

    /// NaN and the nodata value are both treated as missing.
    #[inline]
    pub fn is_nodata(&self, v: f32) -> bool {
        v.is_nan() || self.nodata == Some(v)
    }

    /// Pixel size (dx, dy), both positive.
    pub fn cell_size(&self) -> (f64, f64) {
        (self.transform.a.abs(), self.transform.e.abs())
    }

    pub fn extent(&self) -> Extent {
        let (x0, y0) = self.transform.apply(0.0, 0.0);
        let (x1, y1) = self.transform.apply(self.width as f64, self.height as f64);
        Extent {
            left: x0.min(x1),
            bottom: y0.min(y1),
            right: x0.max(x1),
            top: y0.max(y1),
        }
    }

    /// Distinct valid values, ascending.
    pub fn unique_values(&self) -> Vec<f32> {
        let mut values: Vec<f32> = self.data.iter().cloned().filter(|v| !self.is_nodata(*v)).collect();
        values.sort_by(f32::total_cmp);
        values.dedup();
        values
    }

    pub fn valid_count(&self) -> usize {
        self.data.iter().filter(|v| !self.is_nodata(**v)).count()
    }

    pub fn min_value(&self) -> Option<f32> {
        self.data.iter().filter(|v| !self.is_nodata(**v)).cloned().reduce(f32::min)
    }

    pub fn max_value(&self) -> Option<f32> {
        self.data.iter().filter(|v| !self.is_nodata(**v)).cloned().reduce(f32::max)
    }

    // ── GDAL I/O ──────────────────────────────────────────────────────────────

    /// Read band 1 of any GDAL-readable raster.
    pub fn read(path: &Path) -> Result<Self> {
        let dataset = Dataset::open(path).map_err(|source| TopoError::gdal(path, source))?;
        Self::from_dataset(&dataset, path)
    }

    /// Read band 1 of an open dataset. `path` names it in errors.
    pub fn from_dataset(dataset: &Dataset, path: &Path) -> Result<Self> {
        let gdal_err = |source| TopoError::gdal(path, source);

        let (width, height) = dataset.raster_size();
        if width == 0 || height == 0 {
            return Err(TopoError::Georeference { path: path.to_path_buf(), message: "zero-sized raster".into() });
        }
        let transform = dataset.geo_transform().map(Affine::from_gdal).map_err(|_| TopoError::Georeference {
            path: path.to_path_buf(),
            message: "no geotransform".into(),
        })?;
        let crs = match dataset.spatial_ref() {
            Ok(srs) => Crs::from_spatial_ref(&srs)?,
            Err(_) => Crs::unknown(),
        };

        let band = dataset.rasterband(1).map_err(gdal_err)?;
        let nodata = band.no_data_value().map(|v| v as f32);
        let (_, data) = band
            .read_as::<f32>((0, 0), (width, height), (width, height), None)
            .map_err(gdal_err)?
            .into_shape_and_vec();

        Ok(Self { data, width, height, transform, nodata, crs })
    }

    /// Write as a single-band Float32 GeoTIFF.
    pub fn write_geotiff(&self, path: &Path) -> Result<()> {
        let gdal_err = |source| TopoError::gdal(path, source);

        let driver = DriverManager::get_driver_by_name("GTiff").map_err(gdal_err)?;
        let mut dataset = driver
            .create_with_band_type::<f32, _>(path, self.width, self.height, 1)
            .map_err(gdal_err)?;
        dataset.set_geo_transform(&self.transform.to_gdal()).map_err(gdal_err)?;
        if self.crs.is_known() {
            dataset.set_spatial_ref(&self.crs.to_spatial_ref()?).map_err(gdal_err)?;
        }

        let mut band = dataset.rasterband(1).map_err(gdal_err)?;
        band.set_no_data_value(self.nodata.map(f64::from)).map_err(gdal_err)?;
        let mut buffer = Buffer::new((self.width, self.height), self.data.clone());
        band.write((0, 0), (self.width, self.height), &mut buffer).map_err(gdal_err)?;
        Ok(())
    }
}
