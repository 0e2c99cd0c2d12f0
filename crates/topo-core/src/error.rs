use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;
use crate::extent::ExtentError;
use crate::lidar::LidarError;

pub type Result<T, E = TopoError> = std::result::Result<T, E>;

/// Every failure the generation pipeline can surface. The pipeline fails
/// fast: the first error is returned to the caller unchanged.
#[derive(Debug, Error)]
pub enum TopoError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Extent(#[from] ExtentError),

    #[error("NetCDF error: {0}")]
    NetCdf(#[from] netcdf::Error),

    #[error(transparent)]
    Lidar(#[from] LidarError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("GDAL error on {path}: {source}")]
    Gdal {
        path: PathBuf,
        #[source]
        source: gdal::errors::GdalError,
    },

    #[error("invalid spatial reference `{definition}`: {source}")]
    SpatialRef {
        definition: String,
        #[source]
        source: gdal::errors::GdalError,
    },

    #[error("cannot warp {path}: {message}")]
    Warp { path: PathBuf, message: String },

    #[error("the {what} CRS is unknown; set `epsg` in the configuration")]
    UnknownCrs { what: String },

    #[error("{path} is not georeferenced: {message}")]
    Georeference { path: PathBuf, message: String },

    #[error("cannot read vector file {path}: {message}")]
    Vector { path: PathBuf, message: String },

    #[error("invalid pattern: {0}")]
    Pattern(regex::Error),

    #[error("cannot read CSV {path}: {message}")]
    Csv { path: PathBuf, message: String },

    #[error("{path} does not overlap the domain {domain}")]
    NoOverlap { path: PathBuf, domain: String },

    #[error(
        "vegetation classes {classes:?} appear in the vegetation raster but have no \
         tau/k parameters in {table}; add them or set bypass_veg_check = true"
    )]
    VegetationCoverage { table: PathBuf, classes: Vec<u32> },

    #[error("cannot initialise logging: {0}")]
    Logging(String),
}

impl TopoError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TopoError::Io { path: path.into(), source }
    }

    pub fn gdal(path: impl Into<PathBuf>, source: gdal::errors::GdalError) -> Self {
        TopoError::Gdal { path: path.into(), source }
    }

    pub fn spatial_ref(definition: &str, source: gdal::errors::GdalError) -> Self {
        TopoError::SpatialRef { definition: definition.to_string(), source }
    }
}
