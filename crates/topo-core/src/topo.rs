//! The topo dataset and its NetCDF layout.
//!
//! Every gridded variable is `(y, x)`, north row first, and points at the
//! scalar `projection` variable through `grid_mapping`.

use std::path::Path;

use chrono::Utc;

use crate::crs::Crs;
use crate::error::Result;
use crate::grid::Grid;
use crate::raster::{Raster, NODATA};
use crate::vegetation::{class_code, VegetationLayers};
use crate::VERSION;

const NC_FILL_BYTE: i8 = -127;
const VEG_TYPE_FILL: i32 = -9999;

/// A rasterised basin or sub-basin outline.
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    /// Variable name, `mask` or `mask_<name>`.
    pub name: String,
    pub long_name: String,
    /// 0/1 per cell, row-major.
    pub data: Vec<u8>,
}

impl Mask {
    pub fn cell_count(&self) -> usize {
        self.data.iter().filter(|&&m| m == 1).count()
    }
}

#[derive(Debug, Clone)]
pub struct TopoDataset {
    pub grid: Grid,
    pub crs: Crs,
    pub dem: Raster,
    /// Basin mask first, then sub-basins in config order.
    pub masks: Vec<Mask>,
    pub veg_type: Raster,
    pub veg_height: Raster,
    pub veg_tau: Raster,
    pub veg_k: Raster,
}

impl TopoDataset {
    pub fn new(grid: Grid, crs: Crs, dem: Raster, masks: Vec<Mask>, veg: VegetationLayers) -> Self {
        Self {
            grid,
            crs,
            dem,
            masks,
            veg_type: veg.veg_type,
            veg_height: veg.veg_height,
            veg_tau: veg.veg_tau,
            veg_k: veg.veg_k,
        }
    }

    pub fn stats(&self) -> TopoStats {
        let basin = self.masks.first();
        let in_basin = |i: usize| basin.map_or(true, |m| m.data[i] == 1);

        let mut n = 0usize;
        let (mut min, mut max, mut sum) = (f64::INFINITY, f64::NEG_INFINITY, 0.0f64);
        for (i, &z) in self.dem.data.iter().enumerate() {
            if in_basin(i) && !self.dem.is_nodata(z) {
                let z = z as f64;
                n += 1;
                min = min.min(z);
                max = max.max(z);
                sum += z;
            }
        }

        let basin_cells = basin.map_or(self.grid.len(), Mask::cell_count);
        TopoStats {
            cells: self.grid.len(),
            basin_cells,
            basin_area_km2: basin_cells as f64 * self.grid.cell_area() / 1e6,
            elevation: (n > 0).then(|| (min, sum / n as f64, max)),
            veg_classes: self.veg_type.unique_values().into_iter().filter_map(class_code).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TopoStats {
    pub cells: usize,
    pub basin_cells: usize,
    pub basin_area_km2: f64,
    /// (min, mean, max) of the DEM inside the basin mask.
    pub elevation: Option<(f64, f64, f64)>,
    pub veg_classes: Vec<u32>,
}

impl TopoStats {
    pub fn log(&self) {
        log::info!("Grid cells:      {}", self.cells);
        log::info!("Basin cells:     {} ({:.2} km²)", self.basin_cells, self.basin_area_km2);
        match self.elevation {
            Some((min, mean, max)) => {
                log::info!("Basin elevation: min {min:.1} m, mean {mean:.1} m, max {max:.1} m")
            }
            None => log::warn!("No valid DEM cells inside the basin mask"),
        }
        log::info!("Vegetation classes present: {}", self.veg_classes.len());
        log::debug!("Vegetation classes: {:?}", self.veg_classes);
    }
}

// ── NetCDF output ───────────────────────────────────────────────────────────

/// Write `topo` as a CF-1.6 NetCDF file.
pub fn write_topo(path: &Path, topo: &TopoDataset) -> Result<()> {
    let grid = &topo.grid;
    let yx = ["y", "x"];
    let mut nc = netcdf::create(path)?;
    nc.add_dimension("y", grid.ny)?;
    nc.add_dimension("x", grid.nx)?;

    let now = Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string();
    nc.add_attribute("Conventions", "CF-1.6")?;
    nc.add_attribute("title", "Topographic and vegetation layers for snow modelling")?;
    nc.add_attribute("history", format!("Created by generate_topo v{VERSION} on {now}"))?;
    nc.add_attribute("dateCreated", now.as_str())?;
    nc.add_attribute("last_modified", now.as_str())?;

    write_axis(&mut nc, "x", &grid.x())?;
    write_axis(&mut nc, "y", &grid.y())?;

    gridded(&mut nc, "dem", &topo.dem.data, NODATA, &[("long_name", "dem"), ("units", "meters")])?;

    for mask in &topo.masks {
        let data: Vec<i8> = mask.data.iter().map(|&m| m as i8).collect();
        let mut var = nc.add_variable::<i8>(&mask.name, &yx)?;
        var.set_fill_value(NC_FILL_BYTE)?;
        var.put_attribute("long_name", mask.long_name.as_str())?;
        var.put_attribute("grid_mapping", "projection")?;
        var.put_values(&data, ..)?;
    }

    let veg_type: Vec<i32> = topo
        .veg_type
        .data
        .iter()
        .map(|&v| match class_code(v) {
            Some(code) if !topo.veg_type.is_nodata(v) => code as i32,
            _ => VEG_TYPE_FILL,
        })
        .collect();
    {
        let mut var = nc.add_variable::<i32>("veg_type", &yx)?;
        var.set_fill_value(VEG_TYPE_FILL)?;
        var.put_attribute("long_name", "vegetation type")?;
        var.put_attribute("grid_mapping", "projection")?;
        var.put_values(&veg_type, ..)?;
    }

    gridded(
        &mut nc,
        "veg_height",
        &topo.veg_height.data,
        f32::NAN,
        &[("long_name", "vegetation height"), ("units", "meters")],
    )?;
    gridded(&mut nc, "veg_tau", &topo.veg_tau.data, f32::NAN, &[("long_name", "vegetation optical transmissivity")])?;
    gridded(
        &mut nc,
        "veg_k",
        &topo.veg_k.data,
        f32::NAN,
        &[("long_name", "vegetation solar extinction coefficient")],
    )?;

    write_projection(&mut nc, grid, &topo.crs)?;

    log::info!("Wrote {}", path.display());
    Ok(())
}

fn write_axis(nc: &mut netcdf::FileMut, name: &str, values: &[f64]) -> Result<()> {
    let mut var = nc.add_variable::<f64>(name, &[name])?;
    var.put_attribute("units", "meters")?;
    var.put_attribute("standard_name", format!("projection_{name}_coordinate"))?;
    var.put_attribute("long_name", format!("{name} coordinate of projection"))?;
    var.put_values(values, ..)?;
    Ok(())
}

fn gridded(nc: &mut netcdf::FileMut, name: &str, data: &[f32], fill: f32, attrs: &[(&str, &str)]) -> Result<()> {
    let mut var = nc.add_variable::<f32>(name, &["y", "x"])?;
    var.set_fill_value(fill)?;
    for &(key, value) in attrs {
        var.put_attribute(key, value)?;
    }
    var.put_attribute("grid_mapping", "projection")?;
    var.put_values(data, ..)?;
    Ok(())
}

/// GDAL-style grid mapping: scalar int carrying the CRS and geotransform.
fn write_projection(nc: &mut netcdf::FileMut, grid: &Grid, crs: &Crs) -> Result<()> {
    let gt = grid.transform.to_gdal();
    let geotransform = gt.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(" ");
    let wkt = if crs.is_known() { Some(crs.to_wkt()?) } else { None };

    let mut var = nc.add_variable::<i32>("projection", &[])?;
    var.put_attribute("spatial_ref", wkt.clone().unwrap_or_default())?;
    if let Some(wkt) = wkt {
        var.put_attribute("crs_wkt", wkt)?;
    }
    if let Some(code) = crs.epsg {
        var.put_attribute("epsg_code", format!("EPSG:{code}"))?;
    }
    var.put_attribute("GeoTransform", geotransform)?;
    var.put_values(&[0i32], ..)?;
    Ok(())
}
