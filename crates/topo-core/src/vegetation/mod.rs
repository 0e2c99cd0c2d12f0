//! Vegetation layers from a Landfire dataset.
//!
//! Pipeline:
//!   clipped EVT/EVH rasters → height from the EVH class names →
//!   tau/k lookup per EVT class (coverage checked first).
//!
//! [`merge`] holds the offline reconciliation of class tables across
//! Landfire releases.

pub mod height;
pub mod merge;
pub mod params;

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use height::{height_from_classname, heights_from_classnames, veg_height_raster};
pub use merge::{merge_tables, read_class_table, write_merged_csv, ClassRow, ClassTable, MergeReport, MergedClass};
pub use params::{check_coverage, tau_k_rasters, Coverage, VegParamTable, VegParams};

use crate::raster::Raster;

/// Landfire release. Each one lays out its files differently under
/// `vegetation_folder`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum VegetationDataset {
    #[serde(rename = "landfire_1.4.0")]
    Landfire140,
    #[default]
    #[serde(rename = "landfire_2.0.0")]
    Landfire200,
}

impl VegetationDataset {
    /// Config value, also the id column name in the tau/k table.
    pub fn name(self) -> &'static str {
        match self {
            VegetationDataset::Landfire140 => "landfire_1.4.0",
            VegetationDataset::Landfire200 => "landfire_2.0.0",
        }
    }

    /// Existing vegetation type (EVT) GeoTIFF.
    pub fn veg_type_file(self) -> &'static str {
        match self {
            VegetationDataset::Landfire140 => "US_140EVT_20180618/Tif/us_140evt.tif",
            VegetationDataset::Landfire200 => "LF2016_EVT_200_CONUS/LF2016_EVT_200_CONUS/Tif/LC16_EVT_200.tif",
        }
    }

    /// Existing vegetation height (EVH) GeoTIFF.
    pub fn veg_height_file(self) -> &'static str {
        match self {
            VegetationDataset::Landfire140 => "US_140EVH_20180618/Tif/us_140evh.tif",
            VegetationDataset::Landfire200 => "LF2016_EVH_200_CONUS/LF2016_EVH_200_CONUS/Tif/LC16_EVH_200.tif",
        }
    }

    /// EVH attribute table with `VALUE` and `CLASSNAMES` columns.
    pub fn veg_height_csv(self) -> &'static str {
        match self {
            VegetationDataset::Landfire140 => "US_140EVH_20180618/CSV_Data/LF_140EVH_05092014.csv",
            VegetationDataset::Landfire200 => "LF2016_EVH_200_CONUS/LF2016_EVH_200_CONUS/CSV_Data/LF16_EVH_200.csv",
        }
    }

    pub fn files(self, folder: &Path) -> DatasetFiles {
        DatasetFiles {
            veg_type: folder.join(self.veg_type_file()),
            veg_height: folder.join(self.veg_height_file()),
            veg_height_csv: folder.join(self.veg_height_csv()),
        }
    }
}

impl fmt::Display for VegetationDataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DatasetFiles {
    pub veg_type: PathBuf,
    pub veg_height: PathBuf,
    pub veg_height_csv: PathBuf,
}

/// Vegetation layers on the output grid.
#[derive(Debug, Clone)]
pub struct VegetationLayers {
    /// EVT class per cell; nodata where the source had none.
    pub veg_type: Raster,
    /// Metres, never NaN.
    pub veg_height: Raster,
    /// NaN for classes without parameters.
    pub veg_tau: Raster,
    pub veg_k: Raster,
}

/// Integer class code of a raster value, if it is one.
pub(crate) fn class_code(value: f32) -> Option<u32> {
    (value >= 0.0 && value.fract() == 0.0 && value <= u32::MAX as f32).then_some(value as u32)
}
