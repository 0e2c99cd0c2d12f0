//! Variable-by-variable comparison of two NetCDF files, used to check
//! output against gold files.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::Result;

/// Differences between two equally shaped arrays. NaN equals NaN.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct DiffStats {
    pub n: usize,
    /// Pairs where both are numbers and differ.
    pub n_diff: usize,
    /// Pairs where exactly one side is NaN.
    pub nan_mismatch: usize,
    pub max_abs: f64,
    pub mean_abs: f64,
    pub rmse: f64,
}

impl DiffStats {
    pub fn compute(a: &[f64], b: &[f64]) -> Self {
        let mut s = DiffStats { n: a.len().min(b.len()), ..Default::default() };
        let (mut sum_abs, mut sum_sq, mut compared) = (0.0f64, 0.0f64, 0usize);
        for (&x, &y) in a.iter().zip(b) {
            match (x.is_nan(), y.is_nan()) {
                (true, true) => {}
                (true, false) | (false, true) => s.nan_mismatch += 1,
                (false, false) => {
                    let d = (y - x).abs();
                    compared += 1;
                    if d > 0.0 {
                        s.n_diff += 1;
                        s.max_abs = s.max_abs.max(d);
                        sum_abs += d;
                        sum_sq += d * d;
                    }
                }
            }
        }
        if compared > 0 {
            s.mean_abs = sum_abs / compared as f64;
            s.rmse = (sum_sq / compared as f64).sqrt();
        }
        s
    }

    pub fn is_identical(&self) -> bool {
        self.n_diff == 0 && self.nan_mismatch == 0
    }
}

/// `b - a`, NaN where either side is NaN.
pub fn difference(a: &[f64], b: &[f64]) -> Vec<f64> {
    a.iter().zip(b).map(|(&x, &y)| y - x).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariableDiff {
    pub name: String,
    pub shape: Vec<usize>,
    pub stats: DiffStats,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShapeMismatch {
    pub name: String,
    pub left: Vec<usize>,
    pub right: Vec<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ComparisonReport {
    pub left: PathBuf,
    pub right: PathBuf,
    pub variables: Vec<VariableDiff>,
    pub only_left: Vec<String>,
    pub only_right: Vec<String>,
    pub shape_mismatches: Vec<ShapeMismatch>,
    /// Variables that cannot be read as numbers (text) are not compared.
    pub skipped: Vec<String>,
}

impl ComparisonReport {
    pub fn is_identical(&self) -> bool {
        self.only_left.is_empty()
            && self.only_right.is_empty()
            && self.shape_mismatches.is_empty()
            && self.variables.iter().all(|v| v.stats.is_identical())
    }

    pub fn differing(&self) -> impl Iterator<Item = &VariableDiff> {
        self.variables.iter().filter(|v| !v.stats.is_identical())
    }

    pub fn log(&self) {
        log::info!("Comparing {} with {}", self.left.display(), self.right.display());
        for v in &self.variables {
            if v.stats.is_identical() {
                log::info!("  {:<12} identical", v.name);
            } else {
                log::warn!(
                    "  {:<12} {} of {} differ (max {:.4e}, rmse {:.4e}), {} NaN mismatches",
                    v.name,
                    v.stats.n_diff,
                    v.stats.n,
                    v.stats.max_abs,
                    v.stats.rmse,
                    v.stats.nan_mismatch
                );
            }
        }
        for name in &self.only_left {
            log::warn!("  {name} only in {}", self.left.display());
        }
        for name in &self.only_right {
            log::warn!("  {name} only in {}", self.right.display());
        }
        for m in &self.shape_mismatches {
            log::warn!("  {} shape {:?} vs {:?}", m.name, m.left, m.right);
        }
    }
}

pub fn compare_netcdf(left: &Path, right: &Path) -> Result<ComparisonReport> {
    let a = netcdf::open(left)?;
    let b = netcdf::open(right)?;
    let mut report = compare_files(&a, &b);
    report.left = left.to_path_buf();
    report.right = right.to_path_buf();
    Ok(report)
}

fn shape(var: &netcdf::Variable) -> Vec<usize> {
    var.dimensions().iter().map(|d| d.len()).collect()
}

pub fn compare_files(a: &netcdf::File, b: &netcdf::File) -> ComparisonReport {
    let names_a: BTreeSet<String> = a.variables().map(|v| v.name()).collect();
    let names_b: BTreeSet<String> = b.variables().map(|v| v.name()).collect();

    let mut report = ComparisonReport {
        only_left: names_a.difference(&names_b).cloned().collect(),
        only_right: names_b.difference(&names_a).cloned().collect(),
        ..Default::default()
    };

    for name in names_a.intersection(&names_b) {
        let (Some(va), Some(vb)) = (a.variable(name), b.variable(name)) else { continue };
        let (shape_a, shape_b) = (shape(&va), shape(&vb));
        if shape_a != shape_b {
            report.shape_mismatches.push(ShapeMismatch { name: name.clone(), left: shape_a, right: shape_b });
            continue;
        }
        let (Ok(xa), Ok(xb)) = (va.get_values::<f64, _>(..), vb.get_values::<f64, _>(..)) else {
            report.skipped.push(name.clone());
            continue;
        };
        report.variables.push(VariableDiff { name: name.clone(), shape: shape_a, stats: DiffStats::compute(&xa, &xb) });
    }
    report
}
