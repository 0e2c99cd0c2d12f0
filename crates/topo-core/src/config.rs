//! Run configuration: one typed field per recognised parameter.
//!
//! The file is TOML with a `[generate_topo]` and an optional `[logging]`
//! section. Unknown keys and invalid option values are rejected while
//! parsing; [`TopoConfig::validate`] then checks files, directories and
//! numeric ranges. Both happen in [`TopoConfig::load`], before any raster
//! is touched. The loaded config is never mutated afterwards.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::extent::Extent;
use crate::resample::ResampleMethod;
use crate::vegetation::VegetationDataset;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("[{section}] {field}: file does not exist: {path}")]
    MissingFile {
        section: &'static str,
        field: &'static str,
        path: PathBuf,
    },

    #[error("[{section}] {field}: not a directory: {path}")]
    NotADirectory {
        section: &'static str,
        field: &'static str,
        path: PathBuf,
    },

    #[error("[{section}] {field}: {message}")]
    Invalid {
        section: &'static str,
        field: &'static str,
        message: String,
    },
}

// ── Sections ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TopoConfig {
    pub generate_topo: GenerateTopoConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GenerateTopoConfig {
    /// Basin outline; its CRS is the project CRS unless `epsg` is set.
    pub basin_shapefile: PathBuf,
    /// Digital elevation model in any CRS GDAL can read.
    pub dem_file: PathBuf,
    /// Output cell size in projected units (metres).
    #[serde(default = "default_cell_size")]
    pub cell_size: f64,
    #[serde(default)]
    pub vegetation_dataset: VegetationDataset,
    /// Root folder holding the Landfire dataset files.
    pub vegetation_folder: PathBuf,
    #[serde(default = "default_veg_resample")]
    pub vegetation_type_resample_method: ResampleMethod,
    #[serde(default = "default_veg_resample")]
    pub vegetation_height_resample_method: ResampleMethod,
    pub output_folder: PathBuf,
    /// Cells of padding around the basin bounds, `[left, bottom, right, top]`.
    #[serde(default)]
    pub pad_domain: [i64; 4],
    /// Explicit `[left, bottom, right, top]`; overrides the basin bounds.
    #[serde(default)]
    pub coordinate_extent: Option<Vec<f64>>,
    #[serde(default)]
    pub sub_basin_files: Option<Vec<PathBuf>>,
    /// Vegetation tau/k table. Defaults to `<vegetation_folder>/veg_params.csv`.
    #[serde(default)]
    pub vegetation_params_csv: Option<PathBuf>,
    /// Downgrade missing vegetation parameters from an error to a warning.
    #[serde(default)]
    pub bypass_veg_check: bool,
    /// Output CRS; overrides the basin outline's. Every input is
    /// reprojected into it.
    #[serde(default)]
    pub epsg: Option<u32>,
    #[serde(default)]
    pub leave_intermediate_files: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    #[serde(alias = "warn")]
    Warning,
    Error,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    #[serde(default)]
    pub log_level: LogLevel,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

fn default_cell_size() -> f64 {
    50.0
}

fn default_veg_resample() -> ResampleMethod {
    ResampleMethod::Mode
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl TopoConfig {
    /// Read, parse, resolve relative paths against the config file's folder
    /// and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let config = Self::parse(&text, path, base)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse without touching the filesystem. `origin` is only used in
    /// error messages.
    pub fn parse(text: &str, origin: &Path, base: &Path) -> Result<Self, ConfigError> {
        let mut config: TopoConfig = toml::from_str(text).map_err(|err| ConfigError::Parse {
            path: origin.to_path_buf(),
            message: err.to_string(),
        })?;
        config.resolve_paths(base);
        Ok(config)
    }

    fn resolve_paths(&mut self, base: &Path) {
        let gt = &mut self.generate_topo;
        for p in [
            &mut gt.basin_shapefile,
            &mut gt.dem_file,
            &mut gt.vegetation_folder,
            &mut gt.output_folder,
        ] {
            *p = resolve(base, p);
        }
        if let Some(files) = gt.sub_basin_files.as_mut() {
            for p in files.iter_mut() {
                *p = resolve(base, p);
            }
        }
        if let Some(p) = gt.vegetation_params_csv.as_mut() {
            *p = resolve(base, p);
        }
        if let Some(p) = self.logging.log_file.as_mut() {
            *p = resolve(base, p);
        }
    }

    /// Check every field; the first problem found is returned.
    pub fn validate(&self) -> Result<(), ConfigError> {
        const S: &str = "generate_topo";
        let gt = &self.generate_topo;

        require_file(S, "basin_shapefile", &gt.basin_shapefile)?;
        require_file(S, "dem_file", &gt.dem_file)?;

        if !(gt.cell_size.is_finite() && gt.cell_size > 0.0) {
            return Err(ConfigError::Invalid {
                section: S,
                field: "cell_size",
                message: format!("must be a positive number, got {}", gt.cell_size),
            });
        }

        if !gt.vegetation_folder.is_dir() {
            return Err(ConfigError::NotADirectory {
                section: S,
                field: "vegetation_folder",
                path: gt.vegetation_folder.clone(),
            });
        }

        if gt.output_folder.exists() && !gt.output_folder.is_dir() {
            return Err(ConfigError::NotADirectory {
                section: S,
                field: "output_folder",
                path: gt.output_folder.clone(),
            });
        }

        if let Some(neg) = gt.pad_domain.iter().find(|&&p| p < 0) {
            return Err(ConfigError::Invalid {
                section: S,
                field: "pad_domain",
                message: format!("padding must be zero or more cells, got {neg}"),
            });
        }

        self.coordinate_extent()?;

        if let Some(files) = &gt.sub_basin_files {
            for f in files {
                require_file(S, "sub_basin_files", f)?;
            }
        }

        require_file(S, "vegetation_params_csv", &self.vegetation_params_csv())?;
        let files = gt.vegetation_dataset.files(&gt.vegetation_folder);
        require_file(S, "vegetation_folder", &files.veg_type)?;
        require_file(S, "vegetation_folder", &files.veg_height)?;
        require_file(S, "vegetation_folder", &files.veg_height_csv)?;

        if let Some(0) = gt.epsg {
            return Err(ConfigError::Invalid {
                section: S,
                field: "epsg",
                message: "EPSG code 0 is not valid".into(),
            });
        }

        if let Some(log_file) = &self.logging.log_file {
            if log_file.is_dir() {
                return Err(ConfigError::Invalid {
                    section: "logging",
                    field: "log_file",
                    message: format!("{} is a directory", log_file.display()),
                });
            }
        }

        Ok(())
    }

    /// The user-supplied extent, validated, if one was given.
    pub fn coordinate_extent(&self) -> Result<Option<Extent>, ConfigError> {
        match &self.generate_topo.coordinate_extent {
            None => Ok(None),
            Some(values) => Extent::from_slice(values).map(Some).map_err(|err| ConfigError::Invalid {
                section: "generate_topo",
                field: "coordinate_extent",
                message: err.to_string(),
            }),
        }
    }

    /// Folder for clipped intermediate rasters.
    pub fn temp_dir(&self) -> PathBuf {
        self.generate_topo.output_folder.join("temp")
    }

    pub fn vegetation_params_csv(&self) -> PathBuf {
        self.generate_topo
            .vegetation_params_csv
            .clone()
            .unwrap_or_else(|| self.generate_topo.vegetation_folder.join("veg_params.csv"))
    }
}

fn resolve(base: &Path, p: &Path) -> PathBuf {
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base.join(p)
    }
}

fn require_file(section: &'static str, field: &'static str, path: &Path) -> Result<(), ConfigError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(ConfigError::MissingFile { section, field, path: path.to_path_buf() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    struct Fixture {
        dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            File::create(dir.path().join("basin.geojson")).unwrap();
            File::create(dir.path().join("dem.tif")).unwrap();
            let landfire = dir.path().join("landfire");
            let files = VegetationDataset::Landfire200.files(&landfire);
            for path in [&files.veg_type, &files.veg_height, &files.veg_height_csv] {
                fs::create_dir_all(path.parent().unwrap()).unwrap();
                File::create(path).unwrap();
            }
            File::create(landfire.join("veg_params.csv")).unwrap();
            Self { dir }
        }

        fn write(&self, body: &str) -> PathBuf {
            let path = self.dir.path().join("config.toml");
            fs::write(&path, body).unwrap();
            path
        }
    }

    const MINIMAL: &str = r#"
[generate_topo]
basin_shapefile = "basin.geojson"
dem_file = "dem.tif"
vegetation_folder = "landfire"
output_folder = "output"
"#;

    #[test]
    fn minimal_config_gets_defaults_and_resolved_paths() {
        let fx = Fixture::new();
        let cfg = TopoConfig::load(fx.write(MINIMAL)).unwrap();
        let gt = &cfg.generate_topo;
        assert_eq!(gt.cell_size, 50.0);
        assert_eq!(gt.vegetation_dataset, VegetationDataset::Landfire200);
        assert_eq!(gt.vegetation_type_resample_method, ResampleMethod::Mode);
        assert_eq!(gt.vegetation_height_resample_method, ResampleMethod::Mode);
        assert_eq!(gt.pad_domain, [0, 0, 0, 0]);
        assert!(!gt.bypass_veg_check);
        assert_eq!(gt.dem_file, fx.dir.path().join("dem.tif"));
        assert_eq!(cfg.logging.log_level, LogLevel::Info);
        assert_eq!(cfg.temp_dir(), fx.dir.path().join("output").join("temp"));
        assert_eq!(cfg.vegetation_params_csv(), fx.dir.path().join("landfire").join("veg_params.csv"));
    }

    #[test]
    fn missing_dem_path_fails_before_any_io() {
        let fx = Fixture::new();
        let body = MINIMAL.replace("dem_file = \"dem.tif\"\n", "");
        let err = TopoConfig::load(fx.write(&body)).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("dem_file"), "{err}");
    }

    #[test]
    fn nonexistent_dem_file_is_reported() {
        let fx = Fixture::new();
        let body = MINIMAL.replace("dem.tif", "nope.tif");
        let err = TopoConfig::load(fx.write(&body)).unwrap_err();
        assert!(matches!(err, ConfigError::MissingFile { field: "dem_file", .. }), "{err}");
    }

    #[test]
    fn invalid_resample_option_is_rejected() {
        let fx = Fixture::new();
        let body = format!("{MINIMAL}vegetation_type_resample_method = \"fancy\"\n");
        let err = TopoConfig::load(fx.write(&body)).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("fancy"), "{msg}");
        assert!(msg.contains("near"), "allowed values should be listed: {msg}");
    }

    #[test]
    fn invalid_dataset_option_is_rejected() {
        let fx = Fixture::new();
        let body = format!("{MINIMAL}vegetation_dataset = \"landfire_9\"\n");
        assert!(matches!(TopoConfig::load(fx.write(&body)), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn unknown_key_is_rejected() {
        let fx = Fixture::new();
        let body = format!("{MINIMAL}cellsize = 10\n");
        assert!(matches!(TopoConfig::load(fx.write(&body)), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn malformed_coordinate_extent_names_the_field() {
        let fx = Fixture::new();
        let body = format!("{MINIMAL}coordinate_extent = [10.0, 0.0, 5.0]\n");
        let err = TopoConfig::load(fx.write(&body)).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "coordinate_extent", .. }));

        let body = format!("{MINIMAL}coordinate_extent = [10.0, 0.0, 5.0, 20.0]\n");
        let err = TopoConfig::load(fx.write(&body)).unwrap_err();
        assert!(err.to_string().contains("width"), "{err}");
    }

    #[test]
    fn negative_cell_size_and_padding_are_rejected() {
        let fx = Fixture::new();
        let body = format!("{MINIMAL}cell_size = -10.0\n");
        let err = TopoConfig::load(fx.write(&body)).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "cell_size", .. }));

        let body = format!("{MINIMAL}pad_domain = [1, 1, -1, 1]\n");
        let err = TopoConfig::load(fx.write(&body)).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "pad_domain", .. }));
    }

    #[test]
    fn discretionary_params_csv_must_exist_when_given() {
        let fx = Fixture::new();
        let body = format!("{MINIMAL}vegetation_params_csv = \"params.csv\"\n");
        let err = TopoConfig::load(fx.write(&body)).unwrap_err();
        assert!(matches!(err, ConfigError::MissingFile { field: "vegetation_params_csv", .. }));

        File::create(fx.dir.path().join("params.csv")).unwrap();
        assert!(TopoConfig::load(fx.write(&body)).is_ok());
    }

    #[test]
    fn default_params_csv_and_dataset_files_must_exist() {
        let fx = Fixture::new();
        let landfire = fx.dir.path().join("landfire");
        fs::remove_file(landfire.join("veg_params.csv")).unwrap();
        let err = TopoConfig::load(fx.write(MINIMAL)).unwrap_err();
        assert!(matches!(err, ConfigError::MissingFile { field: "vegetation_params_csv", .. }), "{err}");
        File::create(landfire.join("veg_params.csv")).unwrap();

        let files = VegetationDataset::Landfire200.files(&landfire);
        for path in [&files.veg_type, &files.veg_height, &files.veg_height_csv] {
            fs::rename(path, path.with_extension("bak")).unwrap();
            let err = TopoConfig::load(fx.write(MINIMAL)).unwrap_err();
            match err {
                ConfigError::MissingFile { field: "vegetation_folder", path: missing, .. } => assert_eq!(&missing, path),
                other => panic!("expected {} to be reported, got {other}", path.display()),
            }
            fs::rename(path.with_extension("bak"), path).unwrap();
        }
        assert!(TopoConfig::load(fx.write(MINIMAL)).is_ok());
    }

    #[test]
    fn logging_section_parses_levels() {
        let fx = Fixture::new();
        let body = format!("{MINIMAL}\n[logging]\nlog_level = \"warn\"\nlog_file = \"run.log\"\n");
        let cfg = TopoConfig::load(fx.write(&body)).unwrap();
        assert_eq!(cfg.logging.log_level, LogLevel::Warning);
        assert_eq!(cfg.logging.log_file, Some(fx.dir.path().join("run.log")));
    }
}
