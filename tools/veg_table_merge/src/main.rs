//! Merge two Landfire class tables (e.g. 1.4.0 and 2.0.0) by class name,
//! attach tau/k from a parameter table and write one CSV usable as
//! `vegetation_params_csv` for either release.
//!
//! Name matching across releases is lossy; every duplicate name or
//! parameter conflict is printed for review.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use topo_core::vegetation::{merge_tables, read_class_table, write_merged_csv, VegParamTable};

#[derive(Parser, Debug)]
#[command(name = "veg_table_merge", about = "Merge vegetation class tables from two Landfire releases")]
struct Args {
    /// First class table (its ids key the parameter table).
    #[arg(long)]
    table_a: PathBuf,
    #[arg(long, default_value = "VALUE")]
    id_a: String,
    #[arg(long, default_value = "CLASSNAME")]
    name_a: String,

    /// Second class table.
    #[arg(long)]
    table_b: PathBuf,
    #[arg(long, default_value = "VALUE")]
    id_b: String,
    #[arg(long, default_value = "CLASSNAME")]
    name_b: String,

    /// Partially filled tau/k table keyed on table A ids.
    #[arg(long)]
    params: Option<PathBuf>,
    #[arg(long, default_value = "VALUE")]
    params_id: String,

    /// Id column names in the merged output.
    #[arg(long, default_value = "landfire_1.4.0")]
    label_a: String,
    #[arg(long, default_value = "landfire_2.0.0")]
    label_b: String,

    #[arg(short, long)]
    output: PathBuf,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let a = read_class_table(&args.table_a, &args.id_a, &args.name_a)
        .with_context(|| format!("reading {}", args.table_a.display()))?;
    let b = read_class_table(&args.table_b, &args.id_b, &args.name_b)
        .with_context(|| format!("reading {}", args.table_b.display()))?;

    let params = args
        .params
        .as_deref()
        .map(|p| VegParamTable::read_keyed(p, &[args.params_id.as_str()]))
        .transpose()
        .context("reading parameter table")?;

    let (rows, report) = merge_tables(&a, &b, params.as_ref());
    write_merged_csv(&args.output, &rows, &args.label_a, &args.label_b)
        .with_context(|| format!("writing {}", args.output.display()))?;

    println!("{report}");
    for issue in report.duplicate_names.iter().chain(&report.conflicts) {
        println!("  ! {issue}");
    }
    println!("Wrote {} rows to {}", rows.len(), args.output.display());
    Ok(())
}
