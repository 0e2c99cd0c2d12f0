//! `grm`: grid resizing and matching of lidar snow-depth images.
//!
//! Each image is warped onto the grid of a topo file, masked by its basin
//! mask and added to `lidar_depths_wy<YYYY>.nc` in the output folder.
//! Images are processed oldest first; dates come from the file names
//! unless `--dates` gives them.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use topo_core::config::{LogLevel, LoggingConfig};
use topo_core::lidar::{parse_date, parse_fname_date, LidarCollector, LidarError};
use topo_core::logging::init_logging;
use topo_core::resample::ResampleMethod;

const BASINS: [&str; 7] = ["brb", "kaweah", "kings", "lakes", "merced", "sanjoaquin", "tuolumne"];

#[derive(Parser, Debug)]
#[command(name = "grm", version, about = "Rescale lidar depth images onto a topo grid, one NetCDF per water year")]
struct Args {
    /// topo.nc used for modelling.
    #[arg(short, long)]
    topo: PathBuf,

    /// Lidar depth images.
    #[arg(short, long, num_args = 1.., required = true)]
    images: Vec<PathBuf>,

    /// Basin name used in the metadata.
    #[arg(short, long, value_parser = BASINS)]
    basin: String,

    #[arg(short, long, default_value = "output")]
    output: PathBuf,

    /// Debug logging; keeps working files and stops at the first failing image.
    #[arg(short, long)]
    debug: bool,

    /// One date per image (YYYY-MM-DD or YYYYMMDD) instead of file-name dates.
    #[arg(long, num_args = 1..)]
    dates: Vec<String>,

    /// With --debug, still skip failing images.
    #[arg(short = 'e', long)]
    allow_exceptions: bool,

    /// gdalwarp resampling method.
    #[arg(short, long, default_value = "bilinear")]
    resample: ResampleMethod,
}

fn file_name(path: &Path) -> String {
    path.file_name().map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned())
}

/// Images paired with their flight dates, oldest first.
fn flight_order(images: &[PathBuf], dates: &[String]) -> Result<Vec<(NaiveDate, PathBuf)>> {
    let dates: Vec<NaiveDate> = if dates.is_empty() {
        images
            .iter()
            .map(|f| parse_fname_date(f).ok_or_else(|| LidarError::NoDate(f.clone())))
            .collect::<Result<_, _>>()?
    } else {
        if dates.len() != images.len() {
            bail!("{} dates were given for {} images; give one date per image", dates.len(), images.len());
        }
        dates
            .iter()
            .map(|d| parse_date(d).with_context(|| format!("cannot read date `{d}`")))
            .collect::<Result<_>>()?
    };

    let mut flights: Vec<(NaiveDate, PathBuf)> = dates.into_iter().zip(images.iter().cloned()).collect();
    flights.sort_by_key(|(date, _)| *date);
    Ok(flights)
}

fn main() -> Result<()> {
    let args = Args::parse();
    let log_level = if args.debug { LogLevel::Debug } else { LogLevel::Info };
    init_logging(&LoggingConfig { log_level, log_file: None }).context("cannot set up logging")?;

    let start = Instant::now();
    let temp = args.output.join("tmp");
    fs::create_dir_all(&temp).with_context(|| format!("cannot create {}", temp.display()))?;

    let header = format!("Grid Resizing and Matching v{}", topo_core::VERSION);
    log::info!("{header}");
    log::info!("{}", "=".repeat(header.len()));

    log::info!("Calculating dates and sorting images for processing...");
    let flights = flight_order(&args.images, &args.dates)?;
    log::info!("Number of images being processed: {}", flights.len());

    let collector = LidarCollector::new(&args.topo, &args.basin, &args.output, &temp, args.resample)
        .with_context(|| format!("cannot use topo {}", args.topo.display()))?;

    let skip_failures = !args.debug || args.allow_exceptions;
    let mut skips = 0usize;
    for (date, image) in &flights {
        log::info!("Processing {}", file_name(image));
        match collector.add_flight(image, *date) {
            Ok(_) => {}
            Err(e) if skip_failures => {
                log::warn!("Skipping {} due to error", file_name(image));
                log::error!("{e}");
                skips += 1;
            }
            Err(e) => return Err(e).with_context(|| format!("processing {}", image.display())),
        }
    }

    if skips == flights.len() {
        log::warn!("No images were processed!");
    }
    log::info!(
        "Grid Resizing and Matching Complete. {}/{} files processed. Elapsed Time {:.1}s",
        flights.len() - skips,
        flights.len(),
        start.elapsed().as_secs_f64()
    );

    if !args.debug {
        log::info!("Cleaning up temporary files.");
        fs::remove_dir_all(&temp).with_context(|| format!("cannot remove {}", temp.display()))?;
    }
    Ok(())
}
