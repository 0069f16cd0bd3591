use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};
use geo_types::{Coord, LineString, MultiPolygon, Polygon};
use log::warn;
use serde_json::{json, Map, Value};

use crate::classify::{ClassifiedFeature, FeatureSet};

/// One input record: areal geometry plus its original attribute map.
#[derive(Debug, Clone)]
pub struct RawFeature {
    pub geometry: MultiPolygon<f64>,
    pub properties: Map<String, Value>,
}

/// One parsed layer file, prior to classification.
#[derive(Debug, Clone)]
pub struct RawLayer {
    /// Spatial reference identifier from the optional `crs` member.
    /// `None` means the file did not declare one; it is copied through.
    pub srs: Option<String>,
    pub features: Vec<RawFeature>,
}

#[derive(Debug, serde::Deserialize)]
struct GeoJsonRoot {
    #[serde(default)]
    crs: Option<GeoJsonCrs>,
    features: Vec<GeoJsonFeature>,
}

#[derive(Debug, serde::Deserialize)]
struct GeoJsonCrs {
    properties: GeoJsonCrsProps,
}

#[derive(Debug, serde::Deserialize)]
struct GeoJsonCrsProps {
    name: String,
}

#[derive(Debug, serde::Deserialize)]
struct GeoJsonFeature {
    geometry: Option<GeoJsonGeometry>,
    #[serde(default)]
    properties: Option<Map<String, Value>>,
}

// Geometry type is dispatched on the string tag; coordinates stay a raw
// Value until the tag says how deeply they nest.
#[derive(Debug, serde::Deserialize)]
struct GeoJsonGeometry {
    r#type: String,
    coordinates: Value,
}

/// Read a GeoJSON FeatureCollection file into areal raw features.
/// Records with non-areal or missing geometry are skipped with a warning.
pub fn read_layer(path: &Path) -> Result<RawLayer> {
    let file = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    let reader = BufReader::new(file);
    let root: GeoJsonRoot = serde_json::from_reader(reader)
        .with_context(|| format!("invalid GeoJSON in {}", path.display()))?;

    let srs = root.crs.map(|c| c.properties.name);

    let mut features = Vec::with_capacity(root.features.len());

    for (index, feature) in root.features.into_iter().enumerate() {
        let Some(geometry) = feature.geometry else {
            warn!("{}: record {} has no geometry, skipped", path.display(), index);
            continue;
        };

        match multipolygon_from(&geometry)? {
            Some(geometry) => features.push(RawFeature {
                geometry,
                properties: feature.properties.unwrap_or_default(),
            }),
            None => {
                warn!(
                    "{}: record {} has non-areal geometry '{}', skipped",
                    path.display(),
                    index,
                    geometry.r#type
                );
            }
        }
    }

    Ok(RawLayer { srs, features })
}

/// Convert a GeoJSON geometry into a MultiPolygon. A plain Polygon becomes
/// a single-member MultiPolygon; anything non-areal yields `None`.
fn multipolygon_from(geometry: &GeoJsonGeometry) -> Result<Option<MultiPolygon<f64>>> {
    match geometry.r#type.as_str() {
        "Polygon" => {
            let rings: Vec<Vec<Vec<f64>>> = serde_json::from_value(geometry.coordinates.clone())
                .context("malformed Polygon coordinates")?;
            Ok(Some(MultiPolygon(vec![polygon_from_rings(rings)?])))
        }
        "MultiPolygon" => {
            let polys: Vec<Vec<Vec<Vec<f64>>>> =
                serde_json::from_value(geometry.coordinates.clone())
                    .context("malformed MultiPolygon coordinates")?;
            let polygons = polys
                .into_iter()
                .map(polygon_from_rings)
                .collect::<Result<Vec<_>>>()?;
            Ok(Some(MultiPolygon(polygons)))
        }
        _ => Ok(None),
    }
}

fn polygon_from_rings(mut rings: Vec<Vec<Vec<f64>>>) -> Result<Polygon<f64>> {
    if rings.is_empty() {
        bail!("polygon has no rings");
    }

    let exterior = ring_from_positions(rings.remove(0))?;
    let interiors = rings
        .into_iter()
        .map(ring_from_positions)
        .collect::<Result<Vec<_>>>()?;

    Ok(Polygon::new(exterior, interiors))
}

fn ring_from_positions(positions: Vec<Vec<f64>>) -> Result<LineString<f64>> {
    let mut coords = Vec::with_capacity(positions.len());

    for position in positions {
        // Positions may carry a third (elevation) element; only x/y matter.
        if position.len() < 2 {
            bail!("ring position has fewer than 2 coordinates");
        }
        coords.push(Coord {
            x: position[0],
            y: position[1],
        });
    }

    Ok(LineString::from(coords))
}

/// Write the merged classified feature set as one GeoJSON FeatureCollection.
/// Original attributes are preserved, with `class_id` and `class_name`
/// appended. Written only once the full set is assembled.
pub fn write_merged(path: &Path, set: &FeatureSet) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("cannot create {}", parent.display()))?;
        }
    }

    let features: Vec<Value> = set.features.iter().map(feature_value).collect();

    let mut root = json!({
        "type": "FeatureCollection",
        "features": features,
    });

    if let Some(srs) = set.srs.as_deref() {
        root["crs"] = json!({
            "type": "name",
            "properties": { "name": srs },
        });
    }

    let file = File::create(path).with_context(|| format!("cannot create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, &root)?;
    writer.flush()?;

    Ok(())
}

fn feature_value(feature: &ClassifiedFeature) -> Value {
    let mut properties = feature.properties.clone();
    properties.insert("class_id".to_owned(), json!(feature.class_id));
    properties.insert("class_name".to_owned(), json!(feature.class_name));

    json!({
        "type": "Feature",
        "properties": properties,
        "geometry": {
            "type": "MultiPolygon",
            "coordinates": multipolygon_value(&feature.geometry),
        },
    })
}

fn multipolygon_value(geometry: &MultiPolygon<f64>) -> Value {
    let polys: Vec<Value> = geometry
        .0
        .iter()
        .map(|polygon| {
            let mut rings = vec![ring_value(polygon.exterior())];
            rings.extend(polygon.interiors().iter().map(ring_value));
            Value::Array(rings)
        })
        .collect();

    Value::Array(polys)
}

fn ring_value(ring: &LineString<f64>) -> Value {
    Value::Array(
        ring.coords()
            .map(|c| json!([c.x, c.y]))
            .collect(),
    )
}
