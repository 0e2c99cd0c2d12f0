//! Reproject, clip and resample a source raster onto the output grid.
//!
//! The work is done by GDAL's warper (the `gdalwarp` utility as a library
//! call): only the source blocks that intersect the grid are read, and any
//! source CRS GDAL understands is transformed into the project CRS. Method
//! names follow gdalwarp's `-r` option.

use std::ffi::{c_int, CStr, CString};
use std::path::Path;
use std::str::FromStr;

use gdal::cpl::CslStringList;
use gdal::Dataset;
use serde::{Deserialize, Serialize};

use crate::crs::Crs;
use crate::error::{Result, TopoError};
use crate::grid::Grid;
use crate::raster::{Raster, NODATA};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResampleMethod {
    Near,
    Bilinear,
    Cubic,
    CubicSpline,
    Lanczos,
    Average,
    Mode,
    Min,
    Max,
    Med,
    #[serde(alias = "Q1")]
    Q1,
    #[serde(alias = "Q3")]
    Q3,
}

impl ResampleMethod {
    pub const ALL: [ResampleMethod; 12] = [
        ResampleMethod::Near,
        ResampleMethod::Bilinear,
        ResampleMethod::Cubic,
        ResampleMethod::CubicSpline,
        ResampleMethod::Lanczos,
        ResampleMethod::Average,
        ResampleMethod::Mode,
        ResampleMethod::Min,
        ResampleMethod::Max,
        ResampleMethod::Med,
        ResampleMethod::Q1,
        ResampleMethod::Q3,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ResampleMethod::Near => "near",
            ResampleMethod::Bilinear => "bilinear",
            ResampleMethod::Cubic => "cubic",
            ResampleMethod::CubicSpline => "cubicspline",
            ResampleMethod::Lanczos => "lanczos",
            ResampleMethod::Average => "average",
            ResampleMethod::Mode => "mode",
            ResampleMethod::Min => "min",
            ResampleMethod::Max => "max",
            ResampleMethod::Med => "med",
            ResampleMethod::Q1 => "q1",
            ResampleMethod::Q3 => "q3",
        }
    }
}

/// gdalwarp `-r` names; `Q1`/`Q3` are accepted in either case.
impl FromStr for ResampleMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown resampling method `{s}`"))
    }
}

/// Target of a warp: the output grid in the project CRS.
#[derive(Debug, Clone)]
pub struct WarpOptions<'a> {
    pub grid: &'a Grid,
    pub crs: &'a Crs,
    pub method: ResampleMethod,
    /// Overrides the source band's own nodata value.
    pub src_nodata: Option<f64>,
}

impl<'a> WarpOptions<'a> {
    pub fn new(grid: &'a Grid, crs: &'a Crs, method: ResampleMethod) -> Self {
        Self { grid, crs, method, src_nodata: None }
    }

    pub fn src_nodata(mut self, value: f64) -> Self {
        self.src_nodata = Some(value);
        self
    }

    /// gdalwarp command-line arguments. `assume_srs` is set when the source
    /// carries no CRS of its own.
    fn args(&self, target_srs: &str, assume_srs: bool) -> Vec<String> {
        let e = &self.grid.extent;
        let cell = self.grid.cell_size.to_string();
        let mut args: Vec<String> = vec!["-t_srs".into(), target_srs.into()];
        if assume_srs {
            args.extend(["-s_srs".into(), target_srs.into()]);
        }
        args.push("-te".into());
        args.extend([e.left, e.bottom, e.right, e.top].map(|v| v.to_string()));
        args.extend(["-tr".into(), cell.clone(), cell]);
        args.extend(["-r".into(), self.method.name().into()]);
        if let Some(v) = self.src_nodata {
            args.extend(["-srcnodata".into(), v.to_string()]);
        }
        args.extend(["-dstnodata".into(), NODATA.to_string()]);
        args.extend(["-ot".into(), "Float32".into(), "-of".into(), "GTiff".into(), "-overwrite".into()]);
        args
    }
}

struct WarpAppOptions {
    options: *mut gdal_sys::GDALWarpAppOptions,
}

impl WarpAppOptions {
    fn new(args: &[String]) -> gdal::errors::Result<Self> {
        let mut list = CslStringList::new();
        for arg in args {
            list.add_string(arg)?;
        }
        Ok(Self { options: unsafe { gdal_sys::GDALWarpAppOptionsNew(list.as_ptr(), std::ptr::null_mut()) } })
    }
}

impl Drop for WarpAppOptions {
    fn drop(&mut self) {
        unsafe {
            gdal_sys::GDALWarpAppOptionsFree(self.options);
        }
    }
}

fn last_gdal_error() -> String {
    let msg = unsafe { gdal_sys::CPLGetLastErrorMsg() };
    if msg.is_null() {
        return "unknown GDAL error".into();
    }
    unsafe { CStr::from_ptr(msg) }.to_string_lossy().into_owned()
}

/// Warp `source` onto `options.grid`, write the result as a GeoTIFF at
/// `dest` and return it. Cells without valid source data are [`NODATA`];
/// a result with no valid cell at all is [`TopoError::NoOverlap`].
pub fn warp_file(source: &Path, dest: &Path, options: &WarpOptions) -> Result<Raster> {
    let target_srs = options
        .crs
        .definition()
        .ok_or_else(|| TopoError::UnknownCrs { what: "project".into() })?;
    let src = Dataset::open(source).map_err(|e| TopoError::gdal(source, e))?;
    let assume_srs = src.spatial_ref().is_err();
    if assume_srs {
        log::warn!("{} has no CRS; assuming {}", source.display(), options.crs);
    }

    let args = options.args(&target_srs, assume_srs);
    log::debug!("gdalwarp {} {} {}", args.join(" "), source.display(), dest.display());
    let app_options = WarpAppOptions::new(&args).map_err(|e| TopoError::gdal(source, e))?;
    if app_options.options.is_null() {
        return Err(TopoError::Warp { path: source.to_path_buf(), message: last_gdal_error() });
    }
    let dest_c = CString::new(dest.to_string_lossy().as_ref()).map_err(|_| TopoError::Warp {
        path: dest.to_path_buf(),
        message: "path contains a NUL byte".into(),
    })?;

    let mut sources = [src.c_dataset()];
    let mut usage_error: c_int = 0;
    let handle = unsafe {
        gdal_sys::GDALWarp(
            dest_c.as_ptr(),
            std::ptr::null_mut(),
            1,
            sources.as_mut_ptr(),
            app_options.options,
            &mut usage_error,
        )
    };
    if handle.is_null() || usage_error != 0 {
        return Err(TopoError::Warp { path: source.to_path_buf(), message: last_gdal_error() });
    }
    let warped = unsafe { Dataset::from_c_dataset(handle) };

    let mut raster = Raster::from_dataset(&warped, dest)?;
    raster.crs = options.crs.clone();
    if raster.valid_count() == 0 {
        return Err(TopoError::NoOverlap { path: source.to_path_buf(), domain: options.grid.extent.to_string() });
    }
    Ok(raster)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extent::Extent;
    use crate::grid::Affine;
    use approx::assert_relative_eq;
    use tempfile::TempDir;

    /// 4×4 source at 10 m over [0, 0, 40, 40], value = row*4 + col.
    fn source() -> Raster {
        Raster {
            data: (0..16).map(|i| i as f32).collect(),
            width: 4,
            height: 4,
            transform: Affine::from_origin(0.0, 40.0, 10.0, 10.0),
            nodata: Some(NODATA),
            crs: Crs::from_epsg(26911),
        }
    }

    fn grid(extent: [f64; 4], cell: f64) -> Grid {
        Grid::new(Extent::from_slice(&extent).unwrap(), cell).unwrap()
    }

    fn run(dir: &TempDir, src: &Raster, g: &Grid, method: ResampleMethod) -> Result<Raster> {
        let input = dir.path().join("src.tif");
        src.write_geotiff(&input).unwrap();
        let crs = Crs::from_epsg(26911);
        warp_file(&input, &dir.path().join(format!("{}.tif", method.name())), &WarpOptions::new(g, &crs, method))
    }

    #[test]
    fn identity_grid_is_lossless() {
        let dir = tempfile::tempdir().unwrap();
        let src = source();
        let g = grid([0.0, 0.0, 40.0, 40.0], 10.0);
        for m in [
            ResampleMethod::Near,
            ResampleMethod::Average,
            ResampleMethod::Mode,
            ResampleMethod::Min,
            ResampleMethod::Max,
        ] {
            let out = run(&dir, &src, &g, m).unwrap();
            assert_eq!(out.data, src.data, "{}", m.name());
            assert_eq!(out.transform, src.transform);
        }
    }

    #[test]
    fn aggregate_downsampling_2x() {
        let dir = tempfile::tempdir().unwrap();
        let src = source();
        let g = grid([0.0, 0.0, 40.0, 40.0], 20.0);
        // Top-left block holds 0, 1, 4, 5.
        assert_eq!(run(&dir, &src, &g, ResampleMethod::Average).unwrap().data[0], 2.5);
        assert_eq!(run(&dir, &src, &g, ResampleMethod::Min).unwrap().data[0], 0.0);
        assert_eq!(run(&dir, &src, &g, ResampleMethod::Max).unwrap().data[0], 5.0);
    }

    #[test]
    fn mode_picks_most_common_class() {
        let dir = tempfile::tempdir().unwrap();
        let mut src = source();
        src.data = vec![
            7.0, 7.0, 1.0, 2.0, //
            7.0, 3.0, 2.0, 2.0, //
            0.0, 0.0, 0.0, 0.0, //
            0.0, 0.0, 0.0, 0.0,
        ];
        let g = grid([0.0, 20.0, 40.0, 40.0], 20.0);
        assert_eq!(run(&dir, &src, &g, ResampleMethod::Mode).unwrap().data, vec![7.0, 2.0]);
    }

    #[test]
    fn nodata_never_contributes() {
        let dir = tempfile::tempdir().unwrap();
        let mut src = source();
        src.data[0] = NODATA;
        src.data[1] = NODATA;
        src.data[4] = NODATA;
        let g = grid([0.0, 0.0, 40.0, 40.0], 20.0);
        let out = run(&dir, &src, &g, ResampleMethod::Average).unwrap();
        assert_eq!(out.data[0], 5.0);
        assert_eq!(out.nodata, Some(NODATA));
    }

    #[test]
    fn bilinear_interpolates_between_centres() {
        let dir = tempfile::tempdir().unwrap();
        // Single 10 m cell centred on the corner shared by pixels 5, 6, 9, 10.
        let g = grid([15.0, 15.0, 25.0, 25.0], 10.0);
        let out = run(&dir, &source(), &g, ResampleMethod::Bilinear).unwrap();
        assert_relative_eq!(out.data[0], 7.5, epsilon = 1e-4);
    }

    #[test]
    fn source_in_another_crs_is_reprojected() {
        let dir = tempfile::tempdir().unwrap();
        // WGS84 / UTM 11N around Mammoth Lakes, constant elevation.
        let src = Raster {
            data: vec![2500.0; 100 * 100],
            width: 100,
            height: 100,
            transform: Affine::from_origin(315_000.0, 4_165_000.0, 100.0, 100.0),
            nodata: Some(NODATA),
            crs: Crs::from_epsg(32611),
        };
        let input = dir.path().join("dem_wgs84.tif");
        src.write_geotiff(&input).unwrap();

        let g = grid([318_000.0, 4_156_000.0, 322_000.0, 4_160_000.0], 500.0);
        let crs = Crs::from_epsg(26911);
        let out = warp_file(&input, &dir.path().join("dem.tif"), &WarpOptions::new(&g, &crs, ResampleMethod::Bilinear))
            .unwrap();
        assert_eq!((out.width, out.height), (8, 8));
        assert_eq!(out.crs, crs);
        assert!(out.data.iter().all(|&v| (v - 2500.0).abs() < 1e-3));
    }

    #[test]
    fn source_without_crs_is_taken_as_the_project_crs() {
        let dir = tempfile::tempdir().unwrap();
        let mut src = source();
        src.crs = Crs::unknown();
        let g = grid([0.0, 0.0, 40.0, 40.0], 10.0);
        assert_eq!(run(&dir, &src, &g, ResampleMethod::Near).unwrap().data, source().data);
    }

    #[test]
    fn cells_outside_the_source_are_nodata() {
        let dir = tempfile::tempdir().unwrap();
        let g = grid([30.0, 30.0, 50.0, 40.0], 10.0);
        let out = run(&dir, &source(), &g, ResampleMethod::Near).unwrap();
        assert_eq!(out.data, vec![3.0, NODATA]);
    }

    #[test]
    fn disjoint_source_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let g = grid([100.0, 100.0, 200.0, 200.0], 10.0);
        let err = run(&dir, &source(), &g, ResampleMethod::Near).unwrap_err();
        assert!(matches!(err, TopoError::NoOverlap { .. }));
    }

    #[test]
    fn src_nodata_override() {
        let dir = tempfile::tempdir().unwrap();
        let mut src = source();
        src.nodata = None;
        src.data[0] = -1.0;
        let input = dir.path().join("src.tif");
        src.write_geotiff(&input).unwrap();
        let g = grid([0.0, 30.0, 10.0, 40.0], 10.0);
        let crs = Crs::from_epsg(26911);
        let opts = WarpOptions::new(&g, &crs, ResampleMethod::Near).src_nodata(-1.0);
        assert!(matches!(
            warp_file(&input, &dir.path().join("out.tif"), &opts),
            Err(TopoError::NoOverlap { .. })
        ));
    }

    #[test]
    fn method_names_match_gdalwarp() {
        let m: ResampleMethod = parse_method("\"cubicspline\"");
        assert_eq!(m, ResampleMethod::CubicSpline);
        assert_eq!(parse_method("\"Q3\""), ResampleMethod::Q3);
        assert_eq!(ResampleMethod::Lanczos.name(), "lanczos");
        assert_eq!("Q1".parse::<ResampleMethod>(), Ok(ResampleMethod::Q1));
        assert_eq!("bilinear".parse::<ResampleMethod>(), Ok(ResampleMethod::Bilinear));
        assert!("nearest".parse::<ResampleMethod>().is_err());
        for m in ResampleMethod::ALL {
            assert_eq!(m.name().parse::<ResampleMethod>(), Ok(m));
        }
    }

    fn parse_method(value: &str) -> ResampleMethod {
        #[derive(Deserialize)]
        struct Wrapper {
            method: ResampleMethod,
        }
        toml::from_str::<Wrapper>(&format!("method = {value}")).unwrap().method
    }
}
