// GeoJSON / CSV input loaders. Records with unusable geometry or missing
// fields are skipped and counted, never fatal.

use anyhow::{Context, Result};
use geo::Point;
use geojson::{FeatureCollection, GeoJson};
use parkride::geometry::lat_lng_to_web_merc;
use parkride::models::{Candidate, ParkingFacility, ParkingKind, Stop};
use parkride::street_graph::{NodeId, StreetGraph};
use std::path::Path;

fn read_feature_collection(path: &Path) -> Result<FeatureCollection> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let geojson: GeoJson = raw
        .parse()
        .with_context(|| format!("Failed to parse GeoJSON in {}", path.display()))?;
    FeatureCollection::try_from(geojson)
        .with_context(|| format!("{} is not a feature collection", path.display()))
}

fn string_property(feature: &geojson::Feature, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(value) = feature.property(key) {
            if let Some(s) = value.as_str() {
                return Some(s.to_string());
            }
            // Numeric ids are common in exported layers.
            if value.is_number() {
                return Some(value.to_string());
            }
        }
    }
    None
}

/// Load stops (geographic coordinates) from a GeoJSON point layer.
/// Returns the stops plus the count of skipped features.
pub fn load_stops_geojson(path: &Path) -> Result<(Vec<Stop>, usize)> {
    let collection = read_feature_collection(path)?;
    let mut stops = Vec::new();
    let mut skipped = 0;

    for feature in collection.features {
        let point = feature
            .geometry
            .as_ref()
            .and_then(|g| geo::Geometry::try_from(g.clone()).ok())
            .and_then(|g| match g {
                geo::Geometry::Point(p) => Some(p),
                _ => None,
            });
        let stop_id = string_property(&feature, &["stop_id", "id"]);
        match (point, stop_id) {
            (Some(point), Some(stop_id)) => {
                let name = string_property(&feature, &["stop_name", "name"]).unwrap_or_default();
                stops.push(Stop::new(stop_id, name, point));
            }
            _ => {
                skipped += 1;
                tracing::warn!("skipping stop feature without point geometry or id");
            }
        }
    }

    Ok((stops, skipped))
}

/// Load a parking layer (points or polygons, geographic coordinates).
pub fn load_parking_geojson(path: &Path, kind: ParkingKind) -> Result<(Vec<ParkingFacility>, usize)> {
    let collection = read_feature_collection(path)?;
    let mut facilities = Vec::new();
    let mut skipped = 0;

    for (index, feature) in collection.features.into_iter().enumerate() {
        let geometry = feature
            .geometry
            .as_ref()
            .and_then(|g| geo::Geometry::try_from(g.clone()).ok());
        match geometry {
            Some(geometry) => {
                let id = string_property(&feature, &["id", "parking_id", "name"])
                    .unwrap_or_else(|| format!("{:?}-{index}", kind).to_lowercase());
                facilities.push(ParkingFacility { id, kind, geometry });
            }
            None => {
                skipped += 1;
                tracing::warn!("skipping parking feature without usable geometry");
            }
        }
    }

    Ok((facilities, skipped))
}

/// Read a `;`-separated candidate table (stopId;stopName;stopLat;stopLon).
pub fn read_candidates_csv(path: &Path) -> Result<Vec<Candidate>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let mut candidates = Vec::new();
    for row in reader.deserialize() {
        let candidate: Candidate = row.context("Malformed candidate row")?;
        candidates.push(candidate);
    }
    Ok(candidates)
}

/// Build a planar street graph from a GeoJSON edge layer.
///
/// Expects LineString features with `u`/`v` node-id properties (the shape
/// osmnx exports). Node positions come from the first/last polyline points;
/// coordinates are projected into Web Mercator here.
pub fn load_graph_geojson(path: &Path) -> Result<(StreetGraph, usize)> {
    let collection = read_feature_collection(path)?;
    let mut graph = StreetGraph::new();
    let mut skipped = 0;

    for feature in collection.features {
        let line = feature
            .geometry
            .as_ref()
            .and_then(|g| geo::Geometry::try_from(g.clone()).ok())
            .and_then(|g| match g {
                geo::Geometry::LineString(ls) => Some(ls),
                _ => None,
            });
        let u = feature.property("u").and_then(|v| v.as_u64());
        let v = feature.property("v").and_then(|v| v.as_u64());

        let (Some(line), Some(u), Some(v)) = (line, u, v) else {
            skipped += 1;
            tracing::warn!("skipping edge feature without linestring or u/v ids");
            continue;
        };
        if line.0.len() < 2 {
            skipped += 1;
            continue;
        }

        let geometry: Vec<[f64; 2]> = line
            .coords()
            .map(|c| {
                let (x, y) = lat_lng_to_web_merc(c.x, c.y);
                [x, y]
            })
            .collect();

        ensure_node(&mut graph, u, geometry[0]);
        ensure_node(&mut graph, v, geometry[geometry.len() - 1]);
        graph
            .add_edge(u, v, geometry)
            .context("Failed to insert edge")?;
    }

    Ok((graph, skipped))
}

fn ensure_node(graph: &mut StreetGraph, id: NodeId, pos: [f64; 2]) {
    if graph.node(id).is_none() {
        graph.insert_node_with_id(id, pos);
    }
}

/// Stops loaded from GeoJSON keep geographic coordinates; the classifier
/// wants planar ones. Projection of the point only, associations untouched.
pub fn project_stop(stop: &Stop) -> Stop {
    let (x, y) = lat_lng_to_web_merc(stop.point.x(), stop.point.y());
    let mut projected = stop.clone();
    projected.point = Point::new(x, y);
    projected
}
