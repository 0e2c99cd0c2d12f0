//! Canopy transmissivity (tau) and extinction (k) per vegetation class.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{Result, TopoError};
use crate::raster::Raster;

use super::{class_code, VegetationDataset};

#[derive(Debug, Clone, PartialEq)]
pub struct VegParams {
    pub classname: Option<String>,
    pub tau: Option<f64>,
    pub k: Option<f64>,
}

impl VegParams {
    fn is_complete(&self) -> bool {
        self.tau.is_some() && self.k.is_some()
    }
}

/// The vegetation parameter CSV, keyed by the class id of one dataset.
#[derive(Debug, Clone)]
pub struct VegParamTable {
    pub path: PathBuf,
    /// Name of the column the ids came from.
    pub id_column: String,
    pub rows: BTreeMap<u32, VegParams>,
}

impl VegParamTable {
    /// The id column is the one named after `dataset` (e.g.
    /// `landfire_2.0.0`) when present, else `value`. Rows with an empty id
    /// belong to another dataset and are skipped.
    pub fn read(path: &Path, dataset: VegetationDataset) -> Result<Self> {
        Self::read_keyed(path, &[dataset.name(), "value"])
    }

    /// Read with ids from the first of `id_columns` present
    /// (case-insensitive).
    pub fn read_keyed(path: &Path, id_columns: &[&str]) -> Result<Self> {
        let csv_err = |message: String| TopoError::Csv { path: path.to_path_buf(), message };
        let mut reader = csv::Reader::from_path(path).map_err(|e| csv_err(e.to_string()))?;
        let headers = reader.headers().map_err(|e| csv_err(e.to_string()))?.clone();
        let find = |names: &[&str]| {
            headers
                .iter()
                .position(|h| names.iter().any(|n| h.trim().eq_ignore_ascii_case(n)))
        };

        let id_col = id_columns
            .iter()
            .find_map(|name| find(&[*name]))
            .ok_or_else(|| csv_err(format!("no id column, tried {}", id_columns.join(", "))))?;
        let id_column = headers.get(id_col).unwrap_or_default().trim().to_string();
        let name_col = find(&["classname", "classnames"]);
        let tau_col = find(&["tau"]);
        let k_col = find(&["k"]);
        if tau_col.is_none() || k_col.is_none() {
            log::warn!("{} has no tau/k columns; every class will lack parameters", path.display());
        }

        let mut rows = BTreeMap::new();
        for (line, record) in reader.records().enumerate() {
            let record = record.map_err(|e| csv_err(e.to_string()))?;
            let field = |col: Option<usize>| col.and_then(|c| record.get(c)).map(str::trim).filter(|s| !s.is_empty());
            let Some(raw_id) = field(Some(id_col)) else { continue };
            // Float-formatted ids (`7011.0`) come out of spreadsheet round trips.
            let id = raw_id
                .parse::<u32>()
                .ok()
                .or_else(|| raw_id.parse::<f32>().ok().and_then(class_code))
                .ok_or_else(|| csv_err(format!("row {}: `{raw_id}` is not a class id", line + 2)))?;
            let number = |col: Option<usize>| -> Result<Option<f64>> {
                field(col)
                    .map(|s| {
                        s.parse::<f64>()
                            .map_err(|_| csv_err(format!("row {}: `{s}` is not a number", line + 2)))
                    })
                    .transpose()
            };
            let params = VegParams {
                classname: field(name_col).map(str::to_string),
                tau: number(tau_col)?,
                k: number(k_col)?,
            };
            if let Some(previous) = rows.get(&id) {
                if previous != &params {
                    log::warn!("{}: class {id} listed more than once; keeping the first row", path.display());
                }
                continue;
            }
            rows.insert(id, params);
        }

        log::info!("Read {} vegetation classes ({id_column}) from {}", rows.len(), path.display());
        Ok(Self { path: path.to_path_buf(), id_column, rows })
    }

    pub fn get(&self, id: u32) -> Option<&VegParams> {
        self.rows.get(&id)
    }
}

/// Raster classes the parameter table cannot serve.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Coverage {
    pub missing: Vec<u32>,
}

impl Coverage {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// A class is missing when it has no row or its row lacks tau or k.
pub fn check_coverage(classes: &[u32], table: &VegParamTable) -> Coverage {
    let mut missing: Vec<u32> = classes
        .iter()
        .copied()
        .filter(|c| !table.get(*c).is_some_and(VegParams::is_complete))
        .collect();
    missing.sort_unstable();
    missing.dedup();
    Coverage { missing }
}

/// `(veg_tau, veg_k)` on the grid of `veg_type`; NaN wherever the class
/// has no parameters or the cell has no class.
pub fn tau_k_rasters(veg_type: &Raster, table: &VegParamTable) -> (Raster, Raster) {
    let lookup = |v: f32, pick: fn(&VegParams) -> Option<f64>| {
        class_code(v)
            .filter(|_| !veg_type.is_nodata(v))
            .and_then(|c| table.get(c))
            .and_then(pick)
            .map_or(f32::NAN, |x| x as f32)
    };
    let layer = |pick: fn(&VegParams) -> Option<f64>| Raster {
        data: veg_type.data.iter().map(|&v| lookup(v, pick)).collect(),
        width: veg_type.width,
        height: veg_type.height,
        transform: veg_type.transform,
        nodata: None,
        crs: veg_type.crs.clone(),
    };
    (layer(|p| p.tau), layer(|p| p.k))
}
