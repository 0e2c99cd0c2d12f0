//! Basin outlines from ESRI shapefiles or GeoJSON, and their rasterisation
//! onto the output grid.

use std::fs;
use std::path::Path;

use geojson::{GeoJson, Geometry, Value};
use shapefile::{PolygonRing, Shape, ShapeReader};

use crate::crs::Crs;
use crate::error::{Result, TopoError};
use crate::extent::Extent;
use crate::grid::Grid;

pub type Ring = Vec<(f64, f64)>;

#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    pub exterior: Ring,
    pub interiors: Vec<Ring>,
}

impl Polygon {
    fn rings(&self) -> impl Iterator<Item = &Ring> {
        std::iter::once(&self.exterior).chain(self.interiors.iter())
    }

    fn rings_mut(&mut self) -> impl Iterator<Item = &mut Ring> {
        std::iter::once(&mut self.exterior).chain(self.interiors.iter_mut())
    }
}

/// A named set of polygons in a single CRS.
#[derive(Debug, Clone)]
pub struct BasinOutline {
    /// File stem, e.g. `basin_outline`.
    pub name: String,
    pub polygons: Vec<Polygon>,
    pub crs: Crs,
}

impl BasinOutline {
    pub fn read(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        let (polygons, crs) = match ext.as_str() {
            "shp" => read_shapefile(path)?,
            "geojson" | "json" => read_geojson(path)?,
            _ => {
                return Err(TopoError::Vector {
                    path: path.to_path_buf(),
                    message: "expected a .shp, .geojson or .json file".into(),
                })
            }
        };
        if polygons.is_empty() {
            return Err(TopoError::Vector { path: path.to_path_buf(), message: "no polygons found".into() });
        }
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("basin")
            .to_string();
        log::debug!("{}: {} polygon(s), {}", path.display(), polygons.len(), crs);
        Ok(Self { name, polygons, crs })
    }

    /// The outline with every vertex transformed into `to`. An outline
    /// without a CRS is taken to be in `to` already.
    pub fn to_crs(&self, to: &Crs) -> Result<BasinOutline> {
        let mut out = self.clone();
        out.crs = to.clone();
        if !self.crs.is_known() {
            log::warn!("{} has no CRS; assuming {to}", self.name);
            return Ok(out);
        }
        if self.crs.is_same(to)? {
            return Ok(out);
        }
        log::debug!("Reprojecting {} from {} to {to}", self.name, self.crs);
        for ring in out.polygons.iter_mut().flat_map(Polygon::rings_mut) {
            let (mut xs, mut ys): (Vec<f64>, Vec<f64>) = ring.iter().cloned().unzip();
            self.crs.transform_points(to, &mut xs, &mut ys)?;
            *ring = xs.into_iter().zip(ys).collect();
        }
        Ok(out)
    }

    /// Bounding box of every exterior ring.
    pub fn bounds(&self) -> Extent {
        let mut e = Extent {
            left: f64::INFINITY,
            bottom: f64::INFINITY,
            right: f64::NEG_INFINITY,
            top: f64::NEG_INFINITY,
        };
        for &(x, y) in self.polygons.iter().flat_map(|p| p.exterior.iter()) {
            e.left = e.left.min(x);
            e.right = e.right.max(x);
            e.bottom = e.bottom.min(y);
            e.top = e.top.max(y);
        }
        e
    }

    /// `mask` for the basin itself, `mask_<name>` for a sub-basin.
    pub fn mask_variable_name(&self, primary: bool) -> String {
        if primary {
            return "mask".to_string();
        }
        let mut name = String::from("mask_");
        for ch in self.name.chars() {
            if ch.is_ascii_alphanumeric() {
                name.push(ch.to_ascii_lowercase());
            } else if !name.ends_with('_') {
                name.push('_');
            }
        }
        name.trim_end_matches('_').to_string()
    }

    /// `basin_outline` → `Basin Outline`.
    pub fn long_name(&self) -> String {
        self.name
            .split(|c: char| c == '_' || c == '-' || c.is_whitespace())
            .filter(|w| !w.is_empty())
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
}

// ── Readers ─────────────────────────────────────────────────────────────────

fn read_shapefile(path: &Path) -> Result<(Vec<Polygon>, Crs)> {
    let vector_err = |e: shapefile::Error| TopoError::Vector { path: path.to_path_buf(), message: e.to_string() };
    let shapes = ShapeReader::from_path(path).map_err(vector_err)?.read().map_err(vector_err)?;

    let mut polygons: Vec<Polygon> = Vec::new();
    for shape in shapes {
        let rings: Vec<(bool, Ring)> = match shape {
            Shape::Polygon(p) => p.rings().iter().map(|r| ring_from_shp(r, |pt| (pt.x, pt.y))).collect(),
            Shape::PolygonM(p) => p.rings().iter().map(|r| ring_from_shp(r, |pt| (pt.x, pt.y))).collect(),
            Shape::PolygonZ(p) => p.rings().iter().map(|r| ring_from_shp(r, |pt| (pt.x, pt.y))).collect(),
            Shape::NullShape => continue,
            other => {
                log::warn!("{}: ignoring non-polygon shape {:?}", path.display(), other.shapetype());
                continue;
            }
        };
        // An outer ring opens a new polygon; inner rings belong to the last one.
        for (outer, ring) in rings {
            if !outer {
                if let Some(last) = polygons.last_mut() {
                    last.interiors.push(ring);
                    continue;
                }
            }
            polygons.push(Polygon { exterior: ring, interiors: Vec::new() });
        }
    }

    let prj = path.with_extension("prj");
    let crs = if prj.exists() {
        Crs::from_prj(&prj)?
    } else {
        log::warn!("{} has no .prj file; CRS unknown", path.display());
        Crs::unknown()
    };
    Ok((polygons, crs))
}

fn ring_from_shp<P>(ring: &PolygonRing<P>, xy: impl Fn(&P) -> (f64, f64)) -> (bool, Ring) {
    let outer = matches!(ring, PolygonRing::Outer(_));
    (outer, ring.points().iter().map(xy).collect())
}

fn read_geojson(path: &Path) -> Result<(Vec<Polygon>, Crs)> {
    let text = fs::read_to_string(path).map_err(|e| TopoError::io(path, e))?;
    let geojson: GeoJson = text
        .parse()
        .map_err(|e: geojson::Error| TopoError::Vector { path: path.to_path_buf(), message: e.to_string() })?;

    let mut polygons: Vec<Polygon> = Vec::new();
    let foreign = match &geojson {
        GeoJson::FeatureCollection(fc) => {
            for geom in fc.features.iter().filter_map(|f| f.geometry.as_ref()) {
                collect_geometry(geom, &mut polygons);
            }
            fc.foreign_members.as_ref()
        }
        GeoJson::Feature(f) => {
            if let Some(geom) = &f.geometry {
                collect_geometry(geom, &mut polygons);
            }
            f.foreign_members.as_ref()
        }
        GeoJson::Geometry(g) => {
            collect_geometry(g, &mut polygons);
            g.foreign_members.as_ref()
        }
    };

    // Legacy `"crs": {"properties": {"name": "urn:ogc:def:crs:EPSG::26911"}}`;
    // without it, RFC 7946 coordinates are WGS84 longitude/latitude.
    let crs = match foreign
        .and_then(|members| members.get("crs"))
        .and_then(|crs| crs.pointer("/properties/name"))
        .and_then(|name| name.as_str())
    {
        Some(name) => Crs::from_user_input(name)?,
        None => {
            log::debug!("{} declares no crs member; using EPSG:4326", path.display());
            Crs::from_epsg(4326)
        }
    };
    Ok((polygons, crs))
}

fn collect_geometry(geom: &Geometry, out: &mut Vec<Polygon>) {
    match &geom.value {
        Value::Polygon(rings) => out.extend(polygon_from_positions(rings)),
        Value::MultiPolygon(polys) => out.extend(polys.iter().filter_map(|p| polygon_from_positions(p))),
        Value::GeometryCollection(geoms) => geoms.iter().for_each(|g| collect_geometry(g, out)),
        _ => {}
    }
}

fn polygon_from_positions(rings: &[Vec<Vec<f64>>]) -> Option<Polygon> {
    let mut rings = rings
        .iter()
        .map(|ring| ring.iter().filter(|p| p.len() >= 2).map(|p| (p[0], p[1])).collect::<Ring>());
    let exterior = rings.next()?;
    Some(Polygon { exterior, interiors: rings.collect() })
}

// ── Rasterisation ───────────────────────────────────────────────────────────

/// 1 where the pixel centre lies inside the outline, else 0. Row-major,
/// north row first. Each polygon is filled with the even-odd rule so its
/// holes stay empty.
pub fn rasterize(outline: &BasinOutline, grid: &Grid) -> Vec<u8> {
    let mut mask = vec![0u8; grid.len()];
    let mut crossings = Vec::new();
    let left = grid.extent.left;

    for (row, line) in mask.chunks_mut(grid.nx).enumerate() {
        let (_, y) = grid.center(row, 0);
        for polygon in &outline.polygons {
            crossings.clear();
            for ring in polygon.rings() {
                for (i, &(x0, y0)) in ring.iter().enumerate() {
                    let (x1, y1) = ring[(i + 1) % ring.len()];
                    if (y0 > y) != (y1 > y) {
                        crossings.push(x0 + (y - y0) / (y1 - y0) * (x1 - x0));
                    }
                }
            }
            crossings.sort_by(f64::total_cmp);
            for pair in crossings.chunks_exact(2) {
                let start = ((pair[0] - left) / grid.cell_size - 0.5).ceil().max(0.0) as usize;
                let end = (((pair[1] - left) / grid.cell_size - 0.5).ceil().max(0.0) as usize).min(grid.nx);
                for px in line.iter_mut().take(end).skip(start) {
                    *px = 1;
                }
            }
        }
    }
    mask
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn square(x0: f64, y0: f64, size: f64) -> Ring {
        vec![(x0, y0), (x0, y0 + size), (x0 + size, y0 + size), (x0 + size, y0), (x0, y0)]
    }

    fn outline(polygons: Vec<Polygon>) -> BasinOutline {
        BasinOutline { name: "basin_outline".into(), polygons, crs: Crs::from_epsg(26911) }
    }

    fn grid() -> Grid {
        Grid::new(Extent::new(0.0, 0.0, 100.0, 100.0).unwrap(), 10.0).unwrap()
    }

    #[test]
    fn bounds_cover_every_polygon() {
        let o = outline(vec![
            Polygon { exterior: square(10.0, 20.0, 30.0), interiors: vec![] },
            Polygon { exterior: square(60.0, 5.0, 10.0), interiors: vec![] },
        ]);
        assert_eq!(o.bounds().to_array(), [10.0, 5.0, 70.0, 50.0]);
    }

    #[test]
    fn rasterize_square_counts_centres() {
        let o = outline(vec![Polygon { exterior: square(20.0, 20.0, 40.0), interiors: vec![] }]);
        let mask = rasterize(&o, &grid());
        assert_eq!(mask.iter().filter(|&&m| m == 1).count(), 16);
        // Row 4 from the top has centre y = 55; column 2 centre x = 25.
        assert_eq!(mask[4 * 10 + 2], 1);
        assert_eq!(mask[4 * 10 + 1], 0);
    }

    #[test]
    fn rasterize_leaves_holes_empty() {
        let o = outline(vec![Polygon {
            exterior: square(0.0, 0.0, 100.0),
            interiors: vec![square(40.0, 40.0, 20.0)],
        }]);
        let mask = rasterize(&o, &grid());
        assert_eq!(mask.iter().filter(|&&m| m == 1).count(), 96);
        assert_eq!(mask[5 * 10 + 5], 0);
    }

    #[test]
    fn rasterize_triangle_is_partial() {
        let o = outline(vec![Polygon {
            exterior: vec![(0.0, 0.0), (100.0, 0.0), (0.0, 100.0), (0.0, 0.0)],
            interiors: vec![],
        }]);
        let mask = rasterize(&o, &grid());
        // Centres strictly below the diagonal x + y = 100.
        assert_eq!(mask.iter().filter(|&&m| m == 1).count(), 45);
    }

    #[test]
    fn mask_names() {
        let mut o = outline(vec![]);
        assert_eq!(o.mask_variable_name(true), "mask");
        o.name = "Upper Kings-Basin".into();
        assert_eq!(o.mask_variable_name(false), "mask_upper_kings_basin");
        assert_eq!(o.long_name(), "Upper Kings Basin");
    }

    #[test]
    fn geojson_feature_collection_with_legacy_crs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub_basin.geojson");
        let mut f = fs::File::create(&path).unwrap();
        write!(
            f,
            r#"{{"type": "FeatureCollection",
                "crs": {{"type": "name", "properties": {{"name": "urn:ogc:def:crs:EPSG::26911"}}}},
                "features": [{{"type": "Feature", "properties": {{}},
                  "geometry": {{"type": "Polygon", "coordinates": [[[0,0],[0,10],[10,10],[10,0],[0,0]]]}}}}]}}"#
        )
        .unwrap();

        let o = BasinOutline::read(&path).unwrap();
        assert_eq!(o.name, "sub_basin");
        assert_eq!(o.crs.epsg, Some(26911));
        assert_eq!(o.polygons.len(), 1);
        assert_eq!(o.bounds().to_array(), [0.0, 0.0, 10.0, 10.0]);
    }

    #[test]
    fn geojson_without_crs_member_is_wgs84() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("basin.geojson");
        fs::write(
            &path,
            r#"{"type": "Polygon", "coordinates": [[[-119.0,37.6],[-119.0,37.7],[-118.9,37.7],[-119.0,37.6]]]}"#,
        )
        .unwrap();
        assert_eq!(BasinOutline::read(&path).unwrap().crs.epsg, Some(4326));
    }

    #[test]
    fn outline_reprojects_every_ring() {
        let mut o = outline(vec![Polygon {
            exterior: square(320_000.0, 4_150_000.0, 1000.0),
            interiors: vec![square(320_400.0, 4_150_400.0, 200.0)],
        }]);
        o.crs = Crs::from_epsg(26911);
        let geo = o.to_crs(&Crs::from_epsg(4326)).unwrap();
        assert_eq!(geo.crs.epsg, Some(4326));
        let b = geo.bounds();
        // Around Mammoth Lakes, in lon/lat.
        assert!(b.left > -119.1 && b.right < -118.9, "{b}");
        assert!(b.bottom > 37.4 && b.top < 37.6, "{b}");
        assert_eq!(geo.polygons[0].interiors[0].len(), 5);

        let back = geo.to_crs(&Crs::from_epsg(26911)).unwrap();
        let (x, y) = back.polygons[0].exterior[0];
        assert!((x - 320_000.0).abs() < 1e-3 && (y - 4_150_000.0).abs() < 1e-3);
    }

    #[test]
    fn same_or_unknown_crs_is_left_alone() {
        let o = outline(vec![Polygon { exterior: square(0.0, 0.0, 10.0), interiors: vec![] }]);
        assert_eq!(o.to_crs(&Crs::from_epsg(26911)).unwrap().polygons, o.polygons);
        let mut unknown = o.clone();
        unknown.crs = Crs::unknown();
        let assumed = unknown.to_crs(&Crs::from_epsg(32611)).unwrap();
        assert_eq!(assumed.crs.epsg, Some(32611));
        assert_eq!(assumed.polygons, o.polygons);
    }

    #[test]
    fn shapefile_polygon_with_hole_and_prj() {
        use shapefile::{Point, ShapeWriter};

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("basin_outline.shp");
        let points = |ring: Ring| ring.into_iter().map(|(x, y)| Point::new(x, y)).collect::<Vec<_>>();
        let polygon = shapefile::Polygon::with_rings(vec![
            PolygonRing::Outer(points(square(0.0, 0.0, 100.0))),
            PolygonRing::Inner(points(square(40.0, 40.0, 20.0))),
        ]);
        {
            let mut writer = ShapeWriter::from_path(&path).unwrap();
            writer.write_shape(&polygon).unwrap();
        }
        fs::write(path.with_extension("prj"), Crs::from_epsg(26911).to_wkt().unwrap()).unwrap();

        let o = BasinOutline::read(&path).unwrap();
        assert_eq!(o.crs.epsg, Some(26911));
        assert_eq!(o.polygons.len(), 1);
        assert_eq!(o.polygons[0].interiors.len(), 1);
        assert_eq!(o.bounds().to_array(), [0.0, 0.0, 100.0, 100.0]);
        // The 20 m hole covers four cell centres.
        assert_eq!(rasterize(&o, &grid()).iter().filter(|&&m| m == 1).count(), 96);
    }

    #[test]
    fn unsupported_extension_is_an_error() {
        let err = BasinOutline::read(Path::new("basin.kml")).unwrap_err();
        assert!(matches!(err, TopoError::Vector { .. }));
    }
}
