//! Coordinate reference systems.
//!
//! `Crs` holds the identity as plain data (EPSG code and/or WKT) so it can
//! be cloned into every raster and outline. A GDAL `SpatialRef` is built
//! from it whenever coordinates have to be transformed or written.

use std::fmt;
use std::fs;
use std::path::Path;

use gdal::spatial_ref::{CoordTransform, SpatialRef};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TopoError};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Crs {
    pub epsg: Option<u32>,
    /// OGC WKT, when the source carried a full definition.
    pub wkt: Option<String>,
}

impl Crs {
    pub fn from_epsg(code: u32) -> Self {
        Self { epsg: Some(code), wkt: None }
    }

    pub fn unknown() -> Self {
        Self::default()
    }

    /// Read the `.prj` that sits next to a shapefile (ESRI or OGC WKT).
    pub fn from_prj(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| TopoError::io(path, e))?;
        Self::from_user_input(text.trim())
    }

    /// Anything OGR accepts as user input: `EPSG:26911`, OGC URNs, WKT,
    /// PROJ strings.
    pub fn from_user_input(definition: &str) -> Result<Self> {
        let srs = SpatialRef::from_definition(definition).map_err(|source| TopoError::spatial_ref(definition, source))?;
        Self::from_spatial_ref(&srs)
    }

    pub fn from_spatial_ref(srs: &SpatialRef) -> Result<Self> {
        let wkt = srs.to_wkt().map_err(|source| TopoError::spatial_ref("<spatial reference>", source))?;
        Ok(Self { epsg: epsg_code(srs), wkt: Some(wkt) })
    }

    /// GDAL spatial reference with x = easting/longitude, whatever axis
    /// order the authority declares.
    pub fn to_spatial_ref(&self) -> Result<SpatialRef> {
        let srs = match (self.epsg, &self.wkt) {
            (Some(code), _) => SpatialRef::from_epsg(code).map_err(|source| TopoError::spatial_ref(&format!("EPSG:{code}"), source))?,
            (None, Some(wkt)) => SpatialRef::from_wkt(wkt).map_err(|source| TopoError::spatial_ref(wkt, source))?,
            (None, None) => return Err(TopoError::UnknownCrs { what: "spatial reference".into() }),
        };
        unsafe {
            gdal_sys::OSRSetAxisMappingStrategy(
                srs.to_c_hsrs(),
                gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER,
            );
        }
        Ok(srs)
    }

    /// Target SRS argument for gdalwarp.
    pub fn definition(&self) -> Option<String> {
        match (self.epsg, &self.wkt) {
            (Some(code), _) => Some(format!("EPSG:{code}")),
            (None, Some(wkt)) => Some(wkt.clone()),
            (None, None) => None,
        }
    }

    /// WKT, generated from the EPSG code when none was stored.
    pub fn to_wkt(&self) -> Result<String> {
        match &self.wkt {
            Some(wkt) => Ok(wkt.clone()),
            None => self
                .to_spatial_ref()?
                .to_wkt()
                .map_err(|source| TopoError::spatial_ref(&self.to_string(), source)),
        }
    }

    pub fn is_known(&self) -> bool {
        self.epsg.is_some() || self.wkt.is_some()
    }

    /// Compared by EPSG code when both have one, otherwise by OGR.
    pub fn is_same(&self, other: &Crs) -> Result<bool> {
        if let (Some(a), Some(b)) = (self.epsg, other.epsg) {
            return Ok(a == b);
        }
        Ok(self.to_spatial_ref()? == other.to_spatial_ref()?)
    }

    /// Transform points in place from this CRS into `to`.
    pub fn transform_points(&self, to: &Crs, xs: &mut [f64], ys: &mut [f64]) -> Result<()> {
        if xs.is_empty() || self.is_same(to)? {
            return Ok(());
        }
        let transform = CoordTransform::new(&self.to_spatial_ref()?, &to.to_spatial_ref()?)
            .map_err(|source| TopoError::spatial_ref(&format!("{self} -> {to}"), source))?;
        let mut zs = vec![0.0; xs.len()];
        transform
            .transform_coords(xs, ys, &mut zs)
            .map_err(|source| TopoError::spatial_ref(&format!("{self} -> {to}"), source))
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.epsg, &self.wkt) {
            (Some(code), _) => write!(f, "EPSG:{code}"),
            (None, Some(_)) => write!(f, "custom CRS (WKT)"),
            (None, None) => write!(f, "unknown CRS"),
        }
    }
}

fn epsg_code(srs: &SpatialRef) -> Option<u32> {
    if let Some(code) = authority_code(srs) {
        return Some(code);
    }
    // ESRI definitions carry no authority; UTM and geographic ones can be
    // matched by OGR.
    let mut candidate = srs.clone();
    candidate.auto_identify_epsg().ok()?;
    authority_code(&candidate)
}

fn authority_code(srs: &SpatialRef) -> Option<u32> {
    if !srs.auth_name().ok()?.eq_ignore_ascii_case("EPSG") {
        return None;
    }
    u32::try_from(srs.auth_code().ok()?).ok()
}
