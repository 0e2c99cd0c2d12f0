//! Lidar snow-depth collections on a topo grid.
//!
//! Each flight image is warped onto the grid of an existing topo file,
//! masked by the topo's basin mask and stacked into one NetCDF per water
//! year, `lidar_depths_wy<YYYY>.nc`, as `depth(time, y, x)`. Time is hours
//! since 1 October of the water year, every flight stamped at 23:00.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Timelike, Utc};
use thiserror::Error;

use crate::crs::Crs;
use crate::error::{Result, TopoError};
use crate::extent::Extent;
use crate::grid::Grid;
use crate::resample::{warp_file, ResampleMethod, WarpOptions};
use crate::VERSION;

/// Nodata of the ASO depth products.
const LIDAR_NODATA: f64 = -9999.0;
const FLIGHT_HOUR: i64 = 23;
/// Mask-name words that do not identify a basin.
const GENERIC_WORDS: [&str; 4] = ["river", "basin", "outline", "mask"];

#[derive(Debug, Error)]
pub enum LidarError {
    #[error("no YYYYMMDD date in the file name {0}; pass the dates explicitly")]
    NoDate(PathBuf),

    #[error("{path} is not a usable topo: {message}")]
    Topo { path: PathBuf, message: String },

    #[error("not a lidar depths file: {0}")]
    Collection(String),

    #[error("the existing lidar file is titled `{title}`, which does not name the {basin}")]
    BasinMismatch { title: String, basin: String },

    #[error("the lidar file was not created with this topo ({detail}); delete it or use the matching topo")]
    DomainMismatch { detail: String },

    #[error("a water year {image} image cannot be added to the water year {existing} lidar file")]
    WaterYearMismatch { image: i32, existing: i32 },

    #[error("{0} is already in the lidar file")]
    DuplicateDate(NaiveDate),

    #[error("the topo mask ({mask}) is not associated with the {basin}")]
    TopoBasin { mask: String, basin: String },

    #[error("cannot read time units `{0}`")]
    TimeUnits(String),

    #[error("water year {0} is out of range")]
    WaterYearRange(i32),
}

// ── Dates ─────────────────────────────────────────────────────────────────────

/// Date from the first underscore-separated word of the file stem whose
/// digits read as `YYYYMMDD`, e.g. `USCASJ20200414_SUPERsnow_depth_50p0m_agg.tif`.
pub fn parse_fname_date(path: &Path) -> Option<NaiveDate> {
    let name = path.file_name()?.to_str()?;
    let stem = name.split('.').next()?;
    stem.split('_').find_map(|word| {
        let digits: String = word.chars().filter(char::is_ascii_digit).collect();
        if digits.len() == 8 {
            NaiveDate::parse_from_str(&digits, "%Y%m%d").ok()
        } else {
            None
        }
    })
}

/// `YYYY-MM-DD` or `YYYYMMDD`.
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(text, "%Y%m%d"))
        .ok()
}

/// 1 October to 30 September, named by the year it ends in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct WaterYear(pub i32);

impl WaterYear {
    pub fn of(date: NaiveDate) -> Self {
        if date.month() >= 10 {
            Self(date.year() + 1)
        } else {
            Self(date.year())
        }
    }

    pub fn start(self) -> Result<NaiveDateTime> {
        NaiveDate::from_ymd_opt(self.0 - 1, 10, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .ok_or_else(|| LidarError::WaterYearRange(self.0).into())
    }

    pub fn file_name(self) -> String {
        format!("lidar_depths_wy{}.nc", self.0)
    }
}

/// Hours from `start` to the 23:00 stamp of `date`.
pub fn flight_hours(start: NaiveDateTime, date: NaiveDate) -> f32 {
    ((date - start.date()).num_hours() + FLIGHT_HOUR - i64::from(start.hour())) as f32
}

/// `hours since 2019-10-01 00:00:00` → its reference time.
fn units_start(units: &str) -> Result<NaiveDateTime> {
    let since = units
        .split("since")
        .nth(1)
        .map(str::trim)
        .ok_or_else(|| LidarError::TimeUnits(units.into()))?;
    NaiveDateTime::parse_from_str(since, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(&format!("{since} 00:00:00"), "%Y-%m-%d %H:%M:%S"))
        .map_err(|_| LidarError::TimeUnits(units.into()).into())
}

/// `brb` → `Boise River Basin`, `lakes` → `Mammoth Lakes Basin`,
/// anything else → `<Name> River Basin`.
pub fn basin_title(basin: &str) -> String {
    let name = match basin {
        "brb" => "boise river basin".to_string(),
        "lakes" => "mammoth lakes basin".to_string(),
        other => format!("{other} river basin"),
    };
    name.split_whitespace()
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

// ── Topo ──────────────────────────────────────────────────────────────────────

fn text(attr: Option<netcdf::Attribute>) -> Option<String> {
    match attr?.value().ok()? {
        netcdf::AttributeValue::Str(s) => Some(s),
        _ => None,
    }
}

fn min_max(values: &[f64]) -> (f64, f64) {
    values.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)))
}

/// What a lidar collection takes from a topo file.
#[derive(Debug, Clone)]
pub struct TopoGrid {
    pub path: PathBuf,
    pub grid: Grid,
    pub crs: Crs,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    /// Basin mask in the file's row order.
    pub mask: Vec<i8>,
    pub mask_name: String,
}

impl TopoGrid {
    pub fn read(path: &Path) -> Result<Self> {
        let topo_err = |message: String| TopoError::from(LidarError::Topo { path: path.to_path_buf(), message });
        let nc = netcdf::open(path)?;

        let axis = |name: &str| -> Result<Vec<f64>> {
            let var = nc.variable(name).ok_or_else(|| topo_err(format!("no `{name}` variable")))?;
            Ok(var.get_values::<f64, _>(..)?)
        };
        let (x, y) = (axis("x")?, axis("y")?);
        if x.len() < 2 || y.len() < 2 {
            return Err(topo_err("x and y need at least two cells each".into()));
        }

        let cell = (x[1] - x[0]).abs();
        let half = cell / 2.0;
        let (xmin, xmax) = min_max(&x);
        let (ymin, ymax) = min_max(&y);
        let grid = Grid::new(Extent::new(xmin - half, ymin - half, xmax + half, ymax + half)?, cell)?;
        if grid.nx != x.len() || grid.ny != y.len() {
            return Err(topo_err("x and y are not evenly spaced".into()));
        }

        let mask_var = nc.variable("mask").ok_or_else(|| topo_err("no `mask` variable".into()))?;
        let mask = mask_var.get_values::<i8, _>(..)?;
        if mask.len() != grid.len() {
            return Err(topo_err(format!("mask has {} cells, the grid {}", mask.len(), grid.len())));
        }
        let mask_name = text(mask_var.attribute("long_name")).unwrap_or_default();

        let definition = nc.variable("projection").and_then(|proj| {
            ["crs_wkt", "spatial_ref", "epsg_code"]
                .into_iter()
                .find_map(|key| text(proj.attribute(key)).filter(|s| !s.is_empty()))
        });
        let crs = match definition {
            Some(def) => Crs::from_user_input(&def)?,
            None => return Err(TopoError::UnknownCrs { what: format!("topo {}", path.display()) }),
        };

        Ok(Self { path: path.to_path_buf(), grid, crs, x, y, mask, mask_name })
    }

    /// True when row 0 is the southernmost row.
    pub fn south_up(&self) -> bool {
        self.y[0] < self.y[self.y.len() - 1]
    }
}

// ── Collection ────────────────────────────────────────────────────────────────

/// Adds lidar flights to the water-year collections under `output`.
#[derive(Debug)]
pub struct LidarCollector {
    topo: TopoGrid,
    basin: String,
    output: PathBuf,
    temp: PathBuf,
    resample: ResampleMethod,
}

impl LidarCollector {
    /// `basin` is a short basin key such as `lakes`; warped images are
    /// written to `temp`.
    pub fn new(topo: &Path, basin: &str, output: &Path, temp: &Path, resample: ResampleMethod) -> Result<Self> {
        log::info!("Getting topo attributes...");
        let topo = TopoGrid::read(topo)?;
        log::info!("Using topo cell size which is {} m", topo.grid.cell_size);
        let basin = basin_title(basin);
        log::info!("Working on the {basin}");
        Ok(Self { topo, basin, output: output.to_path_buf(), temp: temp.to_path_buf(), resample })
    }

    pub fn basin(&self) -> &str {
        &self.basin
    }

    pub fn topo(&self) -> &TopoGrid {
        &self.topo
    }

    /// Warp, mask and store `image` as the flight of `date`. Returns the
    /// collection file it went into.
    pub fn add_flight(&self, image: &Path, date: NaiveDate) -> Result<PathBuf> {
        let water_year = WaterYear::of(date);
        let outfile = self.output.join(water_year.file_name());
        log::info!("Lidar flight for {date}");

        let depth = self.grid_match(image)?;
        let now = Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();

        let mut nc = if outfile.exists() {
            log::info!("Output NetCDF exists, checking to see if everything matches.");
            let nc = netcdf::append(&outfile)?;
            self.check_basin_match(&nc)?;
            self.check_domain_match(&nc)?;
            check_water_year_match(&nc, water_year)?;
            check_overwrite(&nc, date)?;
            self.check_topo_basin_name()?;
            nc
        } else {
            self.create_lidar_netcdf(&outfile, water_year, &now)?
        };

        let (index, hours) = time_index(&nc, date)?;
        log::info!("Input data is {hours} hours from the beginning of the water year.");
        nc.add_attribute("last_modified", now.as_str())?;

        log::info!("Adding masked lidar data to {}", outfile.display());
        let (ny, nx) = (self.topo.y.len(), self.topo.x.len());
        nc.variable_mut("time")
            .ok_or_else(|| LidarError::Collection("no `time` variable".into()))?
            .put_values(&[hours], [index..index + 1])?;
        nc.variable_mut("depth")
            .ok_or_else(|| LidarError::Collection("no `depth` variable".into()))?
            .put_values(&depth, [index..index + 1, 0..ny, 0..nx])?;
        Ok(outfile)
    }

    /// Warp `image` onto the topo grid. Cells outside the basin mask or
    /// without data are NaN; rows follow the topo's y order.
    pub fn grid_match(&self, image: &Path) -> Result<Vec<f32>> {
        fs::create_dir_all(&self.temp).map_err(|e| TopoError::io(&self.temp, e))?;
        let stem = image.file_stem().map_or_else(|| "flight".into(), |s| s.to_string_lossy().into_owned());
        let dest = self.temp.join(format!("{stem}.tif"));

        log::info!("Rescaling {} to {} m", image.display(), self.topo.grid.cell_size);
        let options = WarpOptions::new(&self.topo.grid, &self.topo.crs, self.resample).src_nodata(LIDAR_NODATA);
        let warped = warp_file(image, &dest, &options)?;

        log::info!("Masking lidar data...");
        let mut rows: Vec<&[f32]> = warped.data.chunks(warped.width).collect();
        if self.topo.south_up() {
            rows.reverse();
        }
        Ok(rows
            .concat()
            .into_iter()
            .zip(&self.topo.mask)
            .map(|(v, &m)| if m == 1 && !warped.is_nodata(v) { v } else { f32::NAN })
            .collect())
    }

    fn create_lidar_netcdf(&self, path: &Path, water_year: WaterYear, now: &str) -> Result<netcdf::FileMut> {
        log::info!("Output NetCDF does not exist, creating a new one!");
        fs::create_dir_all(&self.output).map_err(|e| TopoError::io(&self.output, e))?;
        let start = water_year.start()?;
        log::debug!("Using {start} as start of water year for stamping netcdf");

        let topo = netcdf::open(&self.topo.path)?;
        let (ny, nx) = (self.topo.y.len(), self.topo.x.len());
        let mut nc = netcdf::create(path)?;
        nc.add_dimension("y", ny)?;
        nc.add_dimension("x", nx)?;
        nc.add_unlimited_dimension("time")?;

        for name in ["x", "y"] {
            let src = topo
                .variable(name)
                .ok_or_else(|| LidarError::Topo { path: self.topo.path.clone(), message: format!("no `{name}` variable") })?;
            let values = src.get_values::<f64, _>(..)?;
            let mut var = nc.add_variable::<f64>(name, &[name])?;
            copy_attributes(&src, &mut var)?;
            var.put_values(&values, ..)?;
        }
        if let Some(src) = topo.variable("projection") {
            let mut var = nc.add_variable::<i32>("projection", &[])?;
            copy_attributes(&src, &mut var)?;
            var.put_values(&[0i32], ..)?;
        }

        {
            let mut time = nc.add_variable::<f32>("time", &["time"])?;
            time.put_attribute("units", format!("hours since {}", start.format("%Y-%m-%d %H:%M:%S")))?;
            time.put_attribute("calendar", "standard")?;
        }
        {
            let mut depth = nc.add_variable::<f32>("depth", &["time", "y", "x"])?;
            depth.set_chunking(&[6, ny.min(10), nx.min(10)])?;
            depth.set_fill_value(f32::NAN)?;
            depth.put_attribute("units", "meters")?;
            depth.put_attribute("long_name", "lidar snow depths")?;
            depth.put_attribute("short_name", "depth")?;
            depth.put_attribute("grid_mapping", "projection")?;
            depth.put_attribute("description", "Measured snow depth from ASO lidar.")?;
        }

        nc.add_attribute("last_modified", now)?;
        nc.add_attribute("dateCreated", now)?;
        nc.add_attribute(
            "Title",
            format!(
                "ASO {} m Lidar Flights Over the {} for Water Year {}.",
                self.topo.grid.cell_size, self.basin, water_year.0
            ),
        )?;
        nc.add_attribute("history", format!("Created by grm v{VERSION}"))?;
        Ok(nc)
    }

    // ── Checks on an existing collection ──────────────────────────────────────

    fn check_basin_match(&self, nc: &netcdf::File) -> Result<()> {
        let title = text(nc.attribute("Title")).unwrap_or_default();
        if !title.to_lowercase().contains(&self.basin.to_lowercase()) {
            return Err(LidarError::BasinMismatch { title, basin: self.basin.clone() }.into());
        }
        log::debug!("Basin entered matches the basin in the preexisting file.");
        Ok(())
    }

    fn check_domain_match(&self, nc: &netcdf::File) -> Result<()> {
        for (name, topo_axis) in [("x", &self.topo.x), ("y", &self.topo.y)] {
            let lidar = nc
                .variable(name)
                .ok_or_else(|| LidarError::Collection(format!("no `{name}` variable")))?
                .get_values::<f64, _>(..)?;
            if lidar.len() != topo_axis.len() {
                let detail = format!("topo n{name} {} != lidar n{name} {}", topo_axis.len(), lidar.len());
                return Err(LidarError::DomainMismatch { detail }.into());
            }
            let (tmin, tmax) = min_max(topo_axis);
            let (lmin, lmax) = min_max(&lidar);
            if tmin != lmin || tmax != lmax {
                let detail = format!("topo {name} [{tmin}, {tmax}] != lidar {name} [{lmin}, {lmax}]");
                return Err(LidarError::DomainMismatch { detail }.into());
            }
        }
        log::debug!("Topo domain and resolution match the current lidar NetCDF");
        Ok(())
    }

    /// Any distinctive word of the topo mask's long name must appear in the
    /// basin title. A mask named only with generic words passes.
    fn check_topo_basin_name(&self) -> Result<()> {
        let mask = self.topo.mask_name.to_lowercase();
        let basin = self.basin.to_lowercase();
        let keywords: Vec<&str> = mask.split_whitespace().filter(|w| !GENERIC_WORDS.contains(w)).collect();
        if !keywords.is_empty() && !keywords.iter().any(|k| basin.contains(k)) {
            return Err(LidarError::TopoBasin { mask, basin: self.basin.clone() }.into());
        }
        log::debug!("Topo's mask name matches the basin name.");
        Ok(())
    }
}

fn copy_attributes(src: &netcdf::Variable, dst: &mut netcdf::VariableMut) -> Result<()> {
    for attr in src.attributes() {
        if attr.name() == "_FillValue" {
            continue;
        }
        dst.put_attribute(attr.name(), attr.value()?)?;
    }
    Ok(())
}

/// Reference time and stored hours of the collection's time axis.
fn time_axis(nc: &netcdf::File) -> Result<(NaiveDateTime, Vec<f32>)> {
    let time = nc.variable("time").ok_or_else(|| LidarError::Collection("no `time` variable".into()))?;
    let units = text(time.attribute("units")).ok_or_else(|| LidarError::Collection("time has no units".into()))?;
    let start = units_start(&units)?;
    let hours = if time.len() == 0 { Vec::new() } else { time.get_values::<f32, _>(..)? };
    Ok((start, hours))
}

fn check_water_year_match(nc: &netcdf::File, water_year: WaterYear) -> Result<()> {
    let (start, _) = time_axis(nc)?;
    let existing = start.year() + 1;
    if existing != water_year.0 {
        return Err(LidarError::WaterYearMismatch { image: water_year.0, existing }.into());
    }
    log::debug!("Input image water year matches the preexisting NetCDF");
    Ok(())
}

fn check_overwrite(nc: &netcdf::File, date: NaiveDate) -> Result<()> {
    let (start, hours) = time_axis(nc)?;
    if hours.iter().any(|&h| (start + Duration::hours(h.round() as i64)).date() == date) {
        return Err(LidarError::DuplicateDate(date).into());
    }
    log::debug!("Incoming date appears to be unique to the dataset.");
    Ok(())
}

/// Slot for `date`: the matching time step, or a new one at the end.
fn time_index(nc: &netcdf::File, date: NaiveDate) -> Result<(usize, f32)> {
    let (start, hours) = time_axis(nc)?;
    let t = flight_hours(start, date);
    let index = hours.iter().position(|&h| h == t).unwrap_or(hours.len());
    Ok((index, t))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Affine;
    use crate::raster::{Raster, NODATA};
    use tempfile::TempDir;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn date_comes_from_the_first_numeric_word() {
        let d = |name: &str| parse_fname_date(Path::new(name));
        assert_eq!(d("/data/USCASJ20200414_SUPERsnow_depth_50p0m_agg.tif"), Some(date(2020, 4, 14)));
        assert_eq!(d("depth_20190609.tif"), Some(date(2019, 6, 9)));
        assert_eq!(d("ASO_50p0m_2019Jun09.tif"), None);
        assert_eq!(d("snow_depth.tif"), None);
        assert_eq!(d("USCALB99991399_depth.tif"), None);
        assert_eq!(parse_date("2020-04-14"), Some(date(2020, 4, 14)));
        assert_eq!(parse_date("20200414"), Some(date(2020, 4, 14)));
        assert_eq!(parse_date("April"), None);
    }

    #[test]
    fn water_year_turns_over_on_october_first() {
        assert_eq!(WaterYear::of(date(2020, 4, 14)), WaterYear(2020));
        assert_eq!(WaterYear::of(date(2019, 9, 30)), WaterYear(2019));
        assert_eq!(WaterYear::of(date(2019, 10, 1)), WaterYear(2020));
        assert_eq!(WaterYear::of(date(2019, 12, 31)), WaterYear(2020));
        assert_eq!(WaterYear(2020).start().unwrap(), date(2019, 10, 1).and_hms_opt(0, 0, 0).unwrap());
        assert_eq!(WaterYear(2020).file_name(), "lidar_depths_wy2020.nc");
    }

    #[test]
    fn flights_are_stamped_at_23h() {
        let start = WaterYear(2020).start().unwrap();
        assert_eq!(flight_hours(start, date(2019, 10, 1)), 23.0);
        // 196 days, 2020 is a leap year.
        assert_eq!(flight_hours(start, date(2020, 4, 14)), 196.0 * 24.0 + 23.0);
        assert_eq!(units_start("hours since 2019-10-01 00:00:00").unwrap(), start);
        assert_eq!(units_start("hours since 2019-10-01").unwrap(), start);
        assert!(units_start("days").is_err());
    }

    #[test]
    fn basin_titles() {
        assert_eq!(basin_title("brb"), "Boise River Basin");
        assert_eq!(basin_title("lakes"), "Mammoth Lakes Basin");
        assert_eq!(basin_title("kings"), "Kings River Basin");
        assert_eq!(basin_title("sanjoaquin"), "Sanjoaquin River Basin");
    }

    // ── Collections ───────────────────────────────────────────────────────────

    const LEFT: f64 = 320_000.0;
    const TOP: f64 = 4_157_150.0;
    const CELL: f64 = 50.0;
    /// 4 × 3 grid.
    const MASK: [i8; 12] = [0, 1, 1, 0, 1, 1, 1, 1, 0, 1, 1, 0];

    /// Minimal topo: axes, basin mask and projection. `south_up` stores
    /// rows south first.
    fn write_topo(path: &Path, left: f64, mask_name: &str, south_up: bool) {
        let x: Vec<f64> = (0..4).map(|c| left + (c as f64 + 0.5) * CELL).collect();
        let mut y: Vec<f64> = (0..3).map(|r| TOP - (r as f64 + 0.5) * CELL).collect();
        let mut mask = MASK.to_vec();
        if south_up {
            y.reverse();
            mask = mask.chunks(4).rev().flatten().copied().collect();
        }

        let mut nc = netcdf::create(path).unwrap();
        nc.add_dimension("y", 3).unwrap();
        nc.add_dimension("x", 4).unwrap();
        for (name, values) in [("x", &x), ("y", &y)] {
            let mut var = nc.add_variable::<f64>(name, &[name]).unwrap();
            var.put_attribute("units", "meters").unwrap();
            var.put_values(values, ..).unwrap();
        }
        let mut var = nc.add_variable::<i8>("mask", &["y", "x"]).unwrap();
        var.put_attribute("long_name", mask_name).unwrap();
        var.put_values(&mask, ..).unwrap();
        let mut proj = nc.add_variable::<i32>("projection", &[]).unwrap();
        proj.put_attribute("crs_wkt", Crs::from_epsg(26911).to_wkt().unwrap()).unwrap();
        proj.put_attribute("epsg_code", "EPSG:26911").unwrap();
        proj.put_values(&[0i32], ..).unwrap();
    }

    /// Depth image on the topo grid, rows north first.
    fn write_image(path: &Path, data: Vec<f32>) {
        Raster {
            data,
            width: 4,
            height: 3,
            transform: Affine::from_origin(LEFT, TOP, CELL, CELL),
            nodata: Some(NODATA),
            crs: Crs::from_epsg(26911),
        }
        .write_geotiff(path)
        .unwrap();
    }

    struct Workspace {
        dir: TempDir,
    }

    impl Workspace {
        fn new() -> Self {
            let ws = Self { dir: tempfile::tempdir().unwrap() };
            write_topo(&ws.path("topo.nc"), LEFT, "Mammoth Lakes", false);
            ws
        }

        fn path(&self, name: &str) -> PathBuf {
            self.dir.path().join(name)
        }

        fn collector(&self, topo: &str, basin: &str) -> LidarCollector {
            LidarCollector::new(&self.path(topo), basin, &self.path("output"), &self.path("tmp"), ResampleMethod::Near)
                .unwrap()
        }

        fn image(&self, name: &str, value: f32) -> PathBuf {
            let path = self.path(name);
            let mut data = vec![value; 12];
            data[5] = NODATA;
            write_image(&path, data);
            path
        }
    }

    fn depth(nc: &netcdf::File) -> Vec<f32> {
        nc.variable("depth").unwrap().get_values::<f32, _>(..).unwrap()
    }

    #[test]
    fn topo_grid_from_axes() {
        let ws = Workspace::new();
        let topo = TopoGrid::read(&ws.path("topo.nc")).unwrap();
        assert_eq!(topo.grid.extent.to_array(), [LEFT, TOP - 150.0, LEFT + 200.0, TOP]);
        assert_eq!((topo.grid.nx, topo.grid.ny), (4, 3));
        assert_eq!(topo.crs.epsg, Some(26911));
        assert_eq!(topo.mask_name, "Mammoth Lakes");
        assert!(!topo.south_up());
    }

    #[test]
    fn first_flight_creates_the_water_year_file() {
        let ws = Workspace::new();
        let grm = ws.collector("topo.nc", "lakes");
        let image = ws.image("USCAMB20200414_SUPERsnow_depth.tif", 1.5);

        let out = grm.add_flight(&image, date(2020, 4, 14)).unwrap();
        assert_eq!(out, ws.path("output/lidar_depths_wy2020.nc"));
        assert!(ws.path("tmp/USCAMB20200414_SUPERsnow_depth.tif").exists());

        let nc = netcdf::open(&out).unwrap();
        assert_eq!(
            text(nc.attribute("Title")).as_deref(),
            Some("ASO 50 m Lidar Flights Over the Mammoth Lakes Basin for Water Year 2020.")
        );
        let time = nc.variable("time").unwrap();
        assert_eq!(text(time.attribute("units")).as_deref(), Some("hours since 2019-10-01 00:00:00"));
        assert_eq!(time.get_values::<f32, _>(..).unwrap(), vec![4727.0]);

        let proj = nc.variable("projection").unwrap();
        assert_eq!(text(proj.attribute("epsg_code")).as_deref(), Some("EPSG:26911"));
        let x = nc.variable("x").unwrap().get_values::<f64, _>(..).unwrap();
        assert_eq!(x, vec![320025.0, 320075.0, 320125.0, 320175.0]);

        // Outside the mask and the nodata cell are NaN.
        let d = depth(&nc);
        assert_eq!(d.len(), 12);
        for (i, v) in d.iter().enumerate() {
            if MASK[i] == 1 && i != 5 {
                assert_eq!(*v, 1.5, "cell {i}");
            } else {
                assert!(v.is_nan(), "cell {i}");
            }
        }
    }

    #[test]
    fn later_flights_append_in_time() {
        let ws = Workspace::new();
        let grm = ws.collector("topo.nc", "lakes");
        grm.add_flight(&ws.image("a.tif", 1.0), date(2020, 2, 1)).unwrap();
        let out = grm.add_flight(&ws.image("b.tif", 2.0), date(2020, 4, 14)).unwrap();

        let nc = netcdf::open(&out).unwrap();
        let hours = nc.variable("time").unwrap().get_values::<f32, _>(..).unwrap();
        assert_eq!(hours, vec![(123 * 24 + 23) as f32, 4727.0]);
        let d = depth(&nc);
        assert_eq!(d.len(), 24);
        assert_eq!((d[1], d[13]), (1.0, 2.0));
    }

    #[test]
    fn duplicate_date_is_rejected() {
        let ws = Workspace::new();
        let grm = ws.collector("topo.nc", "lakes");
        grm.add_flight(&ws.image("a.tif", 1.0), date(2020, 4, 14)).unwrap();
        let err = grm.add_flight(&ws.image("b.tif", 2.0), date(2020, 4, 14)).unwrap_err();
        assert!(matches!(err, TopoError::Lidar(LidarError::DuplicateDate(d)) if d == date(2020, 4, 14)));
    }

    #[test]
    fn october_flight_starts_the_next_water_year() {
        let ws = Workspace::new();
        let grm = ws.collector("topo.nc", "lakes");
        let out = grm.add_flight(&ws.image("a.tif", 1.0), date(2019, 10, 20)).unwrap();
        assert_eq!(out, ws.path("output/lidar_depths_wy2020.nc"));
        let nc = netcdf::open(&out).unwrap();
        assert_eq!(check_water_year_match(&nc, WaterYear(2020)).ok(), Some(()));
        let err = check_water_year_match(&nc, WaterYear(2019)).unwrap_err();
        assert!(matches!(err, TopoError::Lidar(LidarError::WaterYearMismatch { image: 2019, existing: 2020 })));
    }

    #[test]
    fn other_basin_cannot_join_a_collection() {
        let ws = Workspace::new();
        ws.collector("topo.nc", "lakes").add_flight(&ws.image("a.tif", 1.0), date(2020, 2, 1)).unwrap();
        let err = ws.collector("topo.nc", "kings").add_flight(&ws.image("b.tif", 1.0), date(2020, 3, 1)).unwrap_err();
        assert!(matches!(err, TopoError::Lidar(LidarError::BasinMismatch { .. })));
    }

    #[test]
    fn other_topo_domain_is_rejected() {
        let ws = Workspace::new();
        write_topo(&ws.path("shifted.nc"), LEFT + CELL, "Mammoth Lakes", false);
        ws.collector("topo.nc", "lakes").add_flight(&ws.image("a.tif", 1.0), date(2020, 2, 1)).unwrap();
        let err = ws.collector("shifted.nc", "lakes").add_flight(&ws.image("b.tif", 1.0), date(2020, 3, 1)).unwrap_err();
        assert!(matches!(err, TopoError::Lidar(LidarError::DomainMismatch { .. })));
    }

    #[test]
    fn topo_mask_must_name_the_basin() {
        let ws = Workspace::new();
        write_topo(&ws.path("kings.nc"), LEFT, "Kings River", false);
        write_topo(&ws.path("generic.nc"), LEFT, "Basin Outline", false);
        ws.collector("topo.nc", "lakes").add_flight(&ws.image("a.tif", 1.0), date(2020, 2, 1)).unwrap();

        let err = ws.collector("kings.nc", "lakes").add_flight(&ws.image("b.tif", 1.0), date(2020, 3, 1)).unwrap_err();
        assert!(matches!(err, TopoError::Lidar(LidarError::TopoBasin { .. })));
        ws.collector("generic.nc", "lakes").add_flight(&ws.image("c.tif", 1.0), date(2020, 3, 2)).unwrap();
    }

    #[test]
    fn south_up_topo_gets_rows_south_first() {
        let ws = Workspace::new();
        write_topo(&ws.path("south_up.nc"), LEFT, "Mammoth Lakes", true);
        let image = ws.path("rows.tif");
        write_image(&image, [3.0, 2.0, 1.0].iter().flat_map(|&v| [v; 4]).collect());

        let grm = ws.collector("south_up.nc", "lakes");
        assert!(grm.topo().south_up());
        let d = grm.grid_match(&image).unwrap();
        // File row 0 is the southern row, whose mask is [0, 1, 1, 0].
        assert!(d[0].is_nan());
        assert_eq!(&d[1..3], &[1.0, 1.0]);
        assert_eq!(&d[4..8], &[2.0; 4]);
        assert_eq!(&d[9..11], &[3.0, 3.0]);
    }

    #[test]
    fn topo_without_mask_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("topo.nc");
        let mut nc = netcdf::create(&path).unwrap();
        nc.add_dimension("x", 2).unwrap();
        nc.add_dimension("y", 2).unwrap();
        for name in ["x", "y"] {
            nc.add_variable::<f64>(name, &[name]).unwrap().put_values(&[25.0, 75.0], ..).unwrap();
        }
        drop(nc);
        let err = TopoGrid::read(&path).unwrap_err();
        assert!(matches!(err, TopoError::Lidar(LidarError::Topo { .. })));
    }
}
