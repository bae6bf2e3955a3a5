// Result sinks: GeoJSON for maps, CSV for the planner's candidate tables,
// bincode for the routable graph.

use ahash::AHashMap;
use anyhow::{Context, Result};
use geojson::{Feature, FeatureCollection, Geometry, JsonObject, Value};
use itertools::Itertools;
use parkride::geometry::{polyline_length, web_merc_to_lat_lng};
use parkride::models::{Candidate, Stop};
use parkride::street_graph::StreetGraph;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

fn write_collection(features: Vec<Feature>, path: &Path) -> Result<()> {
    let collection = FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    };
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, &collection)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// Export the flagged transfer stops (geographic coordinates) with their
/// parking associations, mirroring the planner's transferStops layer.
pub fn write_transfer_stops_geojson(stops: &[Stop], path: &Path) -> Result<()> {
    let mut features = Vec::new();
    for stop in stops.iter().filter(|s| s.is_transfer()) {
        let mut props = JsonObject::new();
        props.insert("stop_id".to_string(), stop.stop_id.clone().into());
        props.insert("stop_name".to_string(), stop.name.clone().into());
        props.insert("is_transfer".to_string(), true.into());
        props.insert(
            "transfer_parking".to_string(),
            serde_json::to_value(&stop.transfer_parking)?,
        );
        features.push(Feature {
            bbox: None,
            geometry: Some(Geometry::new(Value::Point(vec![
                stop.point.x(),
                stop.point.y(),
            ]))),
            id: None,
            properties: Some(props),
            foreign_members: None,
        });
    }
    write_collection(features, path)
}

/// Write a `;`-separated candidate table (stopId;stopName;stopLat;stopLon).
pub fn write_candidates_csv(candidates: &[Candidate], path: &Path) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b';')
        .from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    for candidate in candidates {
        writer.serialize(candidate)?;
    }
    writer.flush()?;
    Ok(())
}

/// Write the candidate -> representative mapping, sorted for stable diffs.
pub fn write_assignment_csv(assignment: &AHashMap<String, String>, path: &Path) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b';')
        .from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    writer.write_record(["stopId", "representativeId"])?;
    for (stop_id, representative) in assignment.iter().sorted() {
        writer.write_record([stop_id, representative])?;
    }
    writer.flush()?;
    Ok(())
}

/// Export the (planar) graph as geographic GeoJSON for visual inspection:
/// one LineString feature per edge, one Point feature per node.
pub fn write_graph_geojson(graph: &StreetGraph, path: &Path) -> Result<()> {
    let mut features = Vec::new();

    for edge in graph.edges().sorted_by_key(|e| e.id) {
        let coords: Vec<Vec<f64>> = edge
            .geometry
            .iter()
            .map(|&[x, y]| {
                let (lon, lat) = web_merc_to_lat_lng(x, y);
                vec![lon, lat]
            })
            .collect();
        let mut props = JsonObject::new();
        props.insert("edge_id".to_string(), edge.id.into());
        props.insert("u".to_string(), edge.from.into());
        props.insert("v".to_string(), edge.to.into());
        props.insert("length_m".to_string(), polyline_length(&edge.geometry).into());
        features.push(Feature {
            bbox: None,
            geometry: Some(Geometry::new(Value::LineString(coords))),
            id: None,
            properties: Some(props),
            foreign_members: None,
        });
    }

    for node in graph.nodes().sorted_by_key(|n| n.id) {
        let (lon, lat) = web_merc_to_lat_lng(node.pos[0], node.pos[1]);
        let mut props = JsonObject::new();
        props.insert("node_id".to_string(), node.id.into());
        features.push(Feature {
            bbox: None,
            geometry: Some(Geometry::new(Value::Point(vec![lon, lat]))),
            id: None,
            properties: Some(props),
            foreign_members: None,
        });
    }

    write_collection(features, path)
}
