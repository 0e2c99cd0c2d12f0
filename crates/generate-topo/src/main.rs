//! `generate_topo <CONFIG>`: build `topo.nc` from a basin config file.
//!
//! Exit code is nonzero on any validation or processing failure; the
//! config is fully checked before any raster is opened.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use topo_core::logging::init_logging;
use topo_core::{GenerateTopo, TopoConfig};

#[derive(Parser, Debug)]
#[command(name = "generate_topo", version, about = "Generate a topo NetCDF from a DEM, basin outline and Landfire vegetation")]
struct Args {
    /// Path to the TOML config file.
    config: PathBuf,

    /// Validate the config and exit without processing.
    #[arg(long)]
    check: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = TopoConfig::load(&args.config)
        .with_context(|| format!("invalid config {}", args.config.display()))?;
    init_logging(&config.logging).context("cannot set up logging")?;

    if args.check {
        log::info!("{} is valid", args.config.display());
        return Ok(());
    }

    let output = GenerateTopo::new(config).run().context("topo generation failed")?;
    println!("{}", output.display());
    Ok(())
}
