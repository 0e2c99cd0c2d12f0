//! Reconcile vegetation class tables from two Landfire releases.
//!
//! Ids differ between releases, so classes are joined on a normalised
//! class name. The source tables repeat names and disagree on spelling, so
//! the join can duplicate or miss classes; every such case is logged as a
//! warning and listed in the [`MergeReport`] for a human to review.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::Path;

use serde::Serialize;

use crate::error::{Result, TopoError};

use super::params::{VegParamTable, VegParams};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ClassRow {
    pub id: u32,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct ClassTable {
    pub id_column: String,
    /// Distinct `(id, name)` rows in file order.
    pub rows: Vec<ClassRow>,
}

/// Read `id_column` and `name_column` (case-insensitive) from a CSV.
/// Repeated `(id, name)` pairs are collapsed to one row.
pub fn read_class_table(path: &Path, id_column: &str, name_column: &str) -> Result<ClassTable> {
    let csv_err = |message: String| TopoError::Csv { path: path.to_path_buf(), message };
    let mut reader = csv::Reader::from_path(path).map_err(|e| csv_err(e.to_string()))?;
    let headers = reader.headers().map_err(|e| csv_err(e.to_string()))?.clone();
    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(name))
            .ok_or_else(|| csv_err(format!("missing column {name}")))
    };
    let id_col = column(id_column)?;
    let name_col = column(name_column)?;

    let mut seen = BTreeSet::new();
    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record.map_err(|e| csv_err(e.to_string()))?;
        let raw = record.get(id_col).unwrap_or("").trim();
        if raw.is_empty() {
            continue;
        }
        let id = raw
            .parse::<u32>()
            .map_err(|_| csv_err(format!("row {}: `{raw}` is not a class id", line + 2)))?;
        let row = ClassRow { id, name: record.get(name_col).unwrap_or("").trim().to_string() };
        if seen.insert(row.clone()) {
            rows.push(row);
        }
    }
    Ok(ClassTable { id_column: id_column.to_string(), rows })
}

/// Lower-case alphanumerics separated by single spaces.
pub fn normalize_name(name: &str) -> String {
    name.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergedClass {
    pub name: String,
    pub id_a: Option<u32>,
    pub id_b: Option<u32>,
    pub tau: Option<f64>,
    pub k: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MergeReport {
    /// B rows attached to an A class.
    pub matched: usize,
    pub a_only: usize,
    pub b_only: usize,
    pub duplicate_names: Vec<String>,
    pub conflicts: Vec<String>,
}

impl MergeReport {
    pub fn issue_count(&self) -> usize {
        self.duplicate_names.len() + self.conflicts.len()
    }

    fn duplicate(&mut self, msg: String) {
        log::warn!("duplicate class name: {msg}");
        self.duplicate_names.push(msg);
    }

    fn conflict(&mut self, msg: String) {
        log::warn!("parameter conflict: {msg}");
        self.conflicts.push(msg);
    }
}

impl fmt::Display for MergeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "matched:          {}", self.matched)?;
        writeln!(f, "only in table A:  {}", self.a_only)?;
        writeln!(f, "only in table B:  {}", self.b_only)?;
        writeln!(f, "duplicate names:  {}", self.duplicate_names.len())?;
        write!(f, "param conflicts:  {}", self.conflicts.len())
    }
}

/// Merge `a` and `b` into one row per input row: every A row once, each B
/// row either attached to the A class of the same name or appended on its
/// own. Parameters come from `params` (keyed on A ids), falling back to a
/// class-name match.
pub fn merge_tables(a: &ClassTable, b: &ClassTable, params: Option<&VegParamTable>) -> (Vec<MergedClass>, MergeReport) {
    let mut report = MergeReport::default();
    let mut merged: Vec<MergedClass> = a
        .rows
        .iter()
        .map(|r| MergedClass { name: r.name.clone(), id_a: Some(r.id), id_b: None, tau: None, k: None })
        .collect();

    let mut by_name: HashMap<String, Vec<usize>> = HashMap::new();
    for (i, row) in a.rows.iter().enumerate() {
        by_name.entry(normalize_name(&row.name)).or_default().push(i);
    }
    let mut a_dupes: Vec<(&String, &Vec<usize>)> = by_name.iter().filter(|(_, idx)| idx.len() > 1).collect();
    a_dupes.sort();
    for (name, idx) in a_dupes {
        let ids: Vec<u32> = idx.iter().map(|&i| a.rows[i].id).collect();
        report.duplicate(format!("`{name}` has {} ids {ids:?} in {}", ids.len(), a.id_column));
    }

    let mut b_only_names: HashMap<String, u32> = HashMap::new();
    for row in &b.rows {
        let key = normalize_name(&row.name);
        match by_name.get(&key) {
            Some(idx) => {
                report.matched += 1;
                if let Some(&i) = idx.iter().find(|&&i| merged[i].id_b.is_none()) {
                    merged[i].id_b = Some(row.id);
                } else {
                    let first = &merged[idx[0]];
                    report.duplicate(format!(
                        "`{key}` has more ids in {} than in {}; {} {} shares {} {:?}",
                        b.id_column,
                        a.id_column,
                        b.id_column,
                        row.id,
                        a.id_column,
                        first.id_a
                    ));
                    let id_a = first.id_a;
                    merged.push(MergedClass { name: row.name.clone(), id_a, id_b: Some(row.id), tau: None, k: None });
                }
            }
            None => {
                report.b_only += 1;
                if let Some(other) = b_only_names.insert(key.clone(), row.id) {
                    report.duplicate(format!("`{key}` has ids {other} and {} in {}", row.id, b.id_column));
                }
                merged.push(MergedClass { name: row.name.clone(), id_a: None, id_b: Some(row.id), tau: None, k: None });
            }
        }
    }
    report.a_only = merged.iter().filter(|m| m.id_a.is_some() && m.id_b.is_none()).count();

    if let Some(params) = params {
        attach_params(&mut merged, params, &mut report);
    }

    log::info!(
        "Merged {} + {} classes into {} rows ({} matched)",
        a.rows.len(),
        b.rows.len(),
        merged.len(),
        report.matched
    );
    (merged, report)
}

fn attach_params(merged: &mut [MergedClass], params: &VegParamTable, report: &mut MergeReport) {
    let mut by_name: HashMap<String, Vec<(u32, &VegParams)>> = HashMap::new();
    for (&id, p) in &params.rows {
        if let Some(name) = &p.classname {
            by_name.entry(normalize_name(name)).or_default().push((id, p));
        }
    }

    for row in merged.iter_mut() {
        let key = normalize_name(&row.name);
        if let Some(p) = row.id_a.and_then(|id| params.get(id)) {
            if let Some(listed) = p.classname.as_deref().filter(|n| normalize_name(n) != key) {
                report.conflict(format!("id {:?} is `{}` but the parameter table calls it `{listed}`", row.id_a, row.name));
            }
            row.tau = p.tau;
            row.k = p.k;
            continue;
        }
        let Some(candidates) = by_name.get(&key) else { continue };
        let (_, first) = candidates[0];
        if candidates.iter().any(|(_, p)| p.tau != first.tau || p.k != first.k) {
            let ids: Vec<u32> = candidates.iter().map(|(id, _)| *id).collect();
            report.conflict(format!("`{key}` has differing tau/k for parameter ids {ids:?}; using the first"));
        }
        row.tau = first.tau;
        row.k = first.k;
    }
}

/// Write the merged table with `label_a`/`label_b` as the id column names,
/// so it can be read back as a parameter table for either release.
pub fn write_merged_csv(path: &Path, rows: &[MergedClass], label_a: &str, label_b: &str) -> Result<()> {
    let csv_err = |e: csv::Error| TopoError::Csv { path: path.to_path_buf(), message: e.to_string() };
    let mut writer = csv::Writer::from_path(path).map_err(csv_err)?;
    writer.write_record([label_a, label_b, "classname", "tau", "k"]).map_err(csv_err)?;
    let opt = |v: Option<String>| v.unwrap_or_default();
    for row in rows {
        writer
            .write_record([
                opt(row.id_a.map(|v| v.to_string())),
                opt(row.id_b.map(|v| v.to_string())),
                row.name.clone(),
                opt(row.tau.map(|v| v.to_string())),
                opt(row.k.map(|v| v.to_string())),
            ])
            .map_err(csv_err)?;
    }
    writer.flush().map_err(|e| TopoError::io(path, e))
}
