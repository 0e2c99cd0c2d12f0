//! Topo generation pipeline.
//!
//! Stages, in order:
//!   load_basin_shapefiles (→ project CRS) → set_extents → load_dem →
//!   load_vegetation → build_masks → write topo.nc
//!
//! Each stage takes what it needs and returns its product so stages can be
//! run and tested on their own. Every input is brought into the project
//! CRS: outlines by transforming their vertices, rasters through GDAL's
//! warper. Warped rasters go to `<output_folder>/temp`, created on first
//! use and removed when the run ends (successfully or not) unless
//! `leave_intermediate_files` is set.

use std::fs;
use std::path::{Path, PathBuf};

#[cfg(feature = "threading")]
use rayon::prelude::*;

use crate::config::{GenerateTopoConfig, TopoConfig};
use crate::crs::Crs;
use crate::error::{Result, TopoError};
use crate::extent::Extent;
use crate::grid::Grid;
use crate::raster::Raster;
use crate::resample::{warp_file, ResampleMethod, WarpOptions};
use crate::topo::{write_topo, Mask, TopoDataset};
use crate::vector::{rasterize, BasinOutline};
use crate::vegetation::{
    check_coverage, class_code, heights_from_classnames, tau_k_rasters, veg_height_raster, VegParamTable,
    VegetationLayers,
};
use crate::VERSION;

pub const TOPO_FILE: &str = "topo.nc";

pub struct GenerateTopo {
    config: TopoConfig,
}

impl GenerateTopo {
    /// Takes an already validated config.
    pub fn new(config: TopoConfig) -> Self {
        log::info!("Generate Topo Tool -- v{VERSION}");
        Self { config }
    }

    pub fn from_config_file(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(TopoConfig::load(path)?))
    }

    pub fn config(&self) -> &GenerateTopoConfig {
        &self.config.generate_topo
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.config.temp_dir()
    }

    pub fn output_file(&self) -> PathBuf {
        self.config().output_folder.join(TOPO_FILE)
    }

    /// Run every stage and return the path of the topo file.
    pub fn run(&self) -> Result<PathBuf> {
        let result = self.generate();

        let temp = self.temp_dir();
        if self.config().leave_intermediate_files {
            log::info!("Leaving intermediate files in {}", temp.display());
        } else if temp.exists() {
            log::info!("Cleaning up temporary files");
            match fs::remove_dir_all(&temp) {
                Ok(()) => {}
                // Report the pipeline error, not this one.
                Err(e) if result.is_err() => log::warn!("cannot remove {}: {e}", temp.display()),
                Err(e) => return Err(TopoError::io(&temp, e)),
            }
        }

        let output = result?;
        log::info!("Requested output written to {}", output.display());
        Ok(output)
    }

    fn generate(&self) -> Result<PathBuf> {
        let outlines = self.load_basin_shapefiles()?;
        let basin = &outlines[0];
        let crs = basin.crs.clone();
        let grid = self.set_extents(basin)?;
        let dem = self.load_dem(&grid, &crs)?;
        let veg = self.load_vegetation(&grid, &crs)?;
        let masks = self.build_masks(&grid, &outlines);

        let topo = TopoDataset::new(grid, crs, dem, masks, veg);
        topo.stats().log();

        let output = self.output_file();
        write_topo(&output, &topo)?;
        Ok(output)
    }

    // ── Stages ──────────────────────────────────────────────────────────────

    /// The output grid. A user `coordinate_extent` is used as given when
    /// its size is already a whole number of cells, and expanded to the
    /// cell lattice otherwise. Without one, the bounds of `basin` (already
    /// in the project CRS) are padded by `pad_domain` cells and aligned.
    pub fn set_extents(&self, basin: &BasinOutline) -> Result<Grid> {
        let cfg = self.config();
        let cell = cfg.cell_size;
        let extent = match self.config.coordinate_extent()? {
            Some(user) if user.is_multiple_of(cell) => user,
            Some(user) => {
                let aligned = user.align_to(cell)?;
                log::warn!("coordinate_extent {user} is not a multiple of {cell} m; using {aligned}");
                aligned
            }
            None => {
                let b = basin.bounds();
                let bounds = Extent::new(b.left, b.bottom, b.right, b.top)?;
                let padded = bounds.pad(cfg.pad_domain, cell)?;
                log::debug!("Basin bounds {bounds}, padded {padded}");
                padded.align_to(cell)?
            }
        };
        let grid = Grid::new(extent, cell)?;
        log::info!("Domain {} at {cell} m: {} x {} cells", grid.extent, grid.nx, grid.ny);
        Ok(grid)
    }

    /// Basin outline first, then every sub-basin in config order, all
    /// transformed into the project CRS.
    pub fn load_basin_shapefiles(&self) -> Result<Vec<BasinOutline>> {
        log::info!("Loading shapefiles...");
        let cfg = self.config();
        let basin = BasinOutline::read(&cfg.basin_shapefile)?;
        let crs = self.project_crs(&basin)?;

        let mut outlines = vec![basin.to_crs(&crs)?];
        for path in cfg.sub_basin_files.iter().flatten() {
            outlines.push(BasinOutline::read(path)?.to_crs(&crs)?);
        }
        Ok(outlines)
    }

    /// The configured `epsg` when given, otherwise the basin outline's own
    /// CRS. One of the two must be known.
    pub fn project_crs(&self, basin: &BasinOutline) -> Result<Crs> {
        let crs = match self.config().epsg {
            Some(code) => Crs::from_epsg(code),
            None => basin.crs.clone(),
        };
        if !crs.is_known() {
            return Err(TopoError::UnknownCrs { what: format!("basin outline ({})", basin.name) });
        }
        log::info!("Project CRS: {crs}");
        Ok(crs)
    }

    /// Warp the DEM onto `grid` with bilinear resampling.
    pub fn load_dem(&self, grid: &Grid, crs: &Crs) -> Result<Raster> {
        log::info!("Loading DEM...");
        let src = &self.config().dem_file;
        let dem = self.clip(src, grid, crs, ResampleMethod::Bilinear, "clipped_dem.tif")?;
        if dem.valid_count() < grid.len() {
            log::warn!("DEM is missing {} of {} cells", grid.len() - dem.valid_count(), grid.len());
        }
        Ok(dem)
    }

    /// Vegetation type, height and tau/k on `grid`. Fails when the type
    /// raster holds classes the parameter table cannot serve, unless
    /// `bypass_veg_check` is set.
    pub fn load_vegetation(&self, grid: &Grid, crs: &Crs) -> Result<VegetationLayers> {
        let cfg = self.config();
        log::info!("Loading vegetation ({})...", cfg.vegetation_dataset);
        let files = cfg.vegetation_dataset.files(&cfg.vegetation_folder);

        let veg_type = self.clip(
            &files.veg_type,
            grid,
            crs,
            cfg.vegetation_type_resample_method,
            "clipped_veg_type.tif",
        )?;
        let height_codes = self.clip(
            &files.veg_height,
            grid,
            crs,
            cfg.vegetation_height_resample_method,
            "clipped_veg_height.tif",
        )?;

        log::debug!("Calculating veg height");
        let heights = heights_from_classnames(&files.veg_height_csv)?;
        let veg_height = veg_height_raster(&height_codes, &heights);

        let params_path = self.config.vegetation_params_csv();
        let table = VegParamTable::read(&params_path, cfg.vegetation_dataset)?;
        let classes: Vec<u32> = veg_type.unique_values().into_iter().filter_map(class_code).collect();
        let coverage = check_coverage(&classes, &table);
        if !coverage.is_complete() {
            if !cfg.bypass_veg_check {
                return Err(TopoError::VegetationCoverage { table: params_path, classes: coverage.missing });
            }
            for class in &coverage.missing {
                log::warn!("Vegetation class {class} has no tau/k in {}; its cells are NaN", params_path.display());
            }
        }

        let (veg_tau, veg_k) = tau_k_rasters(&veg_type, &table);
        Ok(VegetationLayers { veg_type, veg_height, veg_tau, veg_k })
    }

    /// One mask per outline, named `mask` then `mask_<name>`.
    pub fn build_masks(&self, grid: &Grid, outlines: &[BasinOutline]) -> Vec<Mask> {
        let build = |(i, outline): (usize, &BasinOutline)| {
            let mask = Mask {
                name: outline.mask_variable_name(i == 0),
                long_name: outline.long_name(),
                data: rasterize(outline, grid),
            };
            if mask.cell_count() == 0 {
                log::warn!("{} covers no cell centres of the domain", mask.name);
            }
            mask
        };

        #[cfg(feature = "threading")]
        let masks = outlines.par_iter().enumerate().map(build).collect();
        #[cfg(not(feature = "threading"))]
        let masks = outlines.iter().enumerate().map(build).collect();
        masks
    }

    /// Warp `src` onto `grid` in the project CRS, keeping the result in
    /// the temp dir.
    fn clip(&self, src: &Path, grid: &Grid, crs: &Crs, method: ResampleMethod, temp_name: &str) -> Result<Raster> {
        let temp = self.temp_dir();
        fs::create_dir_all(&temp).map_err(|e| TopoError::io(&temp, e))?;
        log::debug!("Warping {} with {}", src.display(), method.name());
        warp_file(src, &temp.join(temp_name), &WarpOptions::new(grid, crs, method))
    }
}
