//! Regression check of gold files between two git branches.
//!
//! Each named file is extracted from both branches with `git show`,
//! compared variable by variable, and every differing 2-D variable is
//! drawn as a diverging blue/white/red PNG of `b - a`. A `report.json`
//! summarises the run. `--left/--right` compares two local files instead.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};
use clap::Parser;
use topo_core::compare::{compare_netcdf, difference, ComparisonReport};

#[derive(Parser, Debug)]
#[command(name = "compare_gold", about = "Diff topo gold files between two git branches")]
struct Args {
    #[arg(long, default_value = "main")]
    branch_a: String,
    #[arg(long)]
    branch_b: Option<String>,

    /// Gold folder, relative to the repository root.
    #[arg(long, default_value = "tests/Lakes/gold")]
    gold_dir: PathBuf,

    /// File names inside the gold folder.
    #[arg(long, num_args = 1.., default_value = "topo.nc")]
    files: Vec<String>,

    /// Compare two local files without git.
    #[arg(long, requires = "right", conflicts_with = "branch_b")]
    left: Option<PathBuf>,
    #[arg(long, requires = "left")]
    right: Option<PathBuf>,

    #[arg(short, long, default_value = "gold_compare")]
    output: PathBuf,
}

// ── Colour map ────────────────────────────────────────────────────────────────

/// Diverging map: -1 → blue, 0 → white, +1 → red. NaN → mid grey.
fn diverging(t: f64) -> [u8; 3] {
    if t.is_nan() {
        return [128, 128, 128];
    }
    let t = t.clamp(-1.0, 1.0);
    let fade = (255.0 * (1.0 - t.abs())).round() as u8;
    if t < 0.0 {
        [fade, fade, 255]
    } else {
        [255, fade, fade]
    }
}

/// Write `diff` (row-major, `ny × nx`) scaled by its largest magnitude.
fn write_diff_png(path: &Path, diff: &[f64], ny: usize, nx: usize) -> Result<()> {
    let scale = diff.iter().filter(|v| v.is_finite()).fold(0.0f64, |m, v| m.max(v.abs()));
    let mut img = image::RgbImage::new(nx as u32, ny as u32);
    for r in 0..ny {
        for c in 0..nx {
            let v = diff[r * nx + c];
            let t = if scale > 0.0 { v / scale } else { 0.0 * v };
            img.put_pixel(c as u32, r as u32, image::Rgb(diverging(t)));
        }
    }
    img.save(path).with_context(|| format!("failed to save {}", path.display()))?;
    log::info!("Wrote {} (±{scale:.4e})", path.display());
    Ok(())
}

// ── Git ───────────────────────────────────────────────────────────────────────

/// `git show <branch>:<path>` into `dest`.
fn git_show(branch: &str, repo_path: &Path, dest: &Path) -> Result<()> {
    let rev = format!("{branch}:{}", repo_path.to_string_lossy().replace('\\', "/"));
    let out = Command::new("git").args(["show", &rev]).output().context("cannot run git")?;
    if !out.status.success() {
        bail!("git show {rev} failed: {}", String::from_utf8_lossy(&out.stderr).trim());
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(dest, out.stdout).with_context(|| format!("cannot write {}", dest.display()))?;
    Ok(())
}

fn current_branch() -> Result<String> {
    let out = Command::new("git")
        .args(["rev-parse", "--abbrev-ref", "HEAD"])
        .output()
        .context("cannot run git")?;
    if !out.status.success() {
        bail!("not inside a git repository");
    }
    Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn plot_differences(report: &ComparisonReport, label: &str, out_dir: &Path) -> Result<()> {
    let a = netcdf::open(&report.left)?;
    let b = netcdf::open(&report.right)?;
    let values = |file: &netcdf::File, name: &str| -> Result<Vec<f64>> {
        let var = file.variable(name).with_context(|| format!("variable {name} disappeared"))?;
        Ok(var.get_values::<f64, _>(..)?)
    };
    for var in report.differing().filter(|v| v.shape.len() == 2) {
        let diff = difference(&values(&a, &var.name)?, &values(&b, &var.name)?);
        let png = out_dir.join(format!("{label}_{}_diff.png", var.name));
        write_diff_png(&png, &diff, var.shape[0], var.shape[1])?;
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    fs::create_dir_all(&args.output).with_context(|| format!("cannot create {}", args.output.display()))?;

    let mut reports = Vec::new();
    if let (Some(left), Some(right)) = (&args.left, &args.right) {
        let report = compare_netcdf(left, right)?;
        let label = left.file_stem().and_then(|s| s.to_str()).unwrap_or("file");
        report.log();
        plot_differences(&report, label, &args.output)?;
        reports.push(report);
    } else {
        let branch_b = match &args.branch_b {
            Some(b) => b.clone(),
            None => current_branch()?,
        };
        log::info!("Comparing gold files: {} vs {branch_b}", args.branch_a);
        let scratch = tempfile::tempdir()?;
        for file in &args.files {
            let repo_path = args.gold_dir.join(file);
            let a = scratch.path().join("a").join(file);
            let b = scratch.path().join("b").join(file);
            git_show(&args.branch_a, &repo_path, &a)?;
            git_show(&branch_b, &repo_path, &b)?;

            let mut report = compare_netcdf(&a, &b)?;
            report.log();
            let label = Path::new(file).file_stem().and_then(|s| s.to_str()).unwrap_or("file");
            plot_differences(&report, label, &args.output)?;
            report.left = PathBuf::from(format!("{}:{}", args.branch_a, repo_path.display()));
            report.right = PathBuf::from(format!("{branch_b}:{}", repo_path.display()));
            reports.push(report);
        }
    }

    let json_path = args.output.join("report.json");
    let json = serde_json::to_string_pretty(&reports)?;
    fs::write(&json_path, json).with_context(|| format!("cannot write {}", json_path.display()))?;

    let identical = reports.iter().filter(|r| r.is_identical()).count();
    log::info!("{identical} of {} files identical; report in {}", reports.len(), json_path.display());
    Ok(())
}
