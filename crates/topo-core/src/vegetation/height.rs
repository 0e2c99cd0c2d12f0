//! Vegetation height in metres from the EVH class names.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{Result, TopoError};
use crate::raster::Raster;

use super::class_code;

static NUMBER: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();

/// Numbers with any `*` footnote markers attached.
fn number_pattern() -> Result<&'static Regex> {
    NUMBER
        .get_or_init(|| Regex::new(r"\*?\d*\.?\d+\*?"))
        .as_ref()
        .map_err(|e| TopoError::Pattern(e.clone()))
}

/// Mean of the numbers in a class name, e.g. `Tree Height = 10 to 25
/// meters` → 17.5. Numbers touching a `*` are footnote markers and are
/// skipped. No numbers → 0.
pub fn height_from_classname(name: &str) -> Result<f32> {
    let values: Vec<f64> = number_pattern()?
        .find_iter(name)
        .map(|m| m.as_str())
        .filter(|s| !s.contains('*'))
        .filter_map(|s| s.parse().ok())
        .collect();
    if values.is_empty() {
        return Ok(0.0);
    }
    Ok((values.iter().sum::<f64>() / values.len() as f64) as f32)
}

/// EVH code → height, from the dataset's `VALUE`/`CLASSNAMES` table.
pub fn heights_from_classnames(csv_path: &Path) -> Result<BTreeMap<u32, f32>> {
    let csv_err = |message: String| TopoError::Csv { path: csv_path.to_path_buf(), message };
    let mut reader = csv::Reader::from_path(csv_path).map_err(|e| csv_err(e.to_string()))?;
    let headers = reader.headers().map_err(|e| csv_err(e.to_string()))?.clone();
    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(name))
            .ok_or_else(|| csv_err(format!("missing column {name}")))
    };
    let value_col = column("VALUE")?;
    let name_col = column("CLASSNAMES")?;

    let mut heights = BTreeMap::new();
    for (line, record) in reader.records().enumerate() {
        let record = record.map_err(|e| csv_err(e.to_string()))?;
        let code: u32 = record
            .get(value_col)
            .and_then(|v| v.trim().parse().ok())
            .ok_or_else(|| csv_err(format!("row {}: VALUE is not an integer", line + 2)))?;
        let height = height_from_classname(record.get(name_col).unwrap_or(""))?;
        heights.insert(code, height);
    }
    log::debug!("{} height classes read from {}", heights.len(), csv_path.display());
    Ok(heights)
}

/// Map each EVH code to metres. Codes missing from the table (and nodata)
/// become 0 m: those are developed or agricultural land with no snow
/// interception worth modelling.
pub fn veg_height_raster(codes: &Raster, heights: &BTreeMap<u32, f32>) -> Raster {
    let mut unknown = 0usize;
    let data = codes
        .data
        .iter()
        .map(|&v| match class_code(v).and_then(|c| heights.get(&c)) {
            Some(&h) => h,
            None => {
                if !codes.is_nodata(v) {
                    unknown += 1;
                }
                0.0
            }
        })
        .collect();
    if unknown > 0 {
        log::debug!("{unknown} cells have a height code outside the EVH table; set to 0 m");
    }
    Raster {
        data,
        width: codes.width,
        height: codes.height,
        transform: codes.transform,
        nodata: None,
        crs: codes.crs.clone(),
    }
}
