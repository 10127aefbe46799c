//! Loading road networks from JSON and `GeoJSON` documents.
//!
//! The JSON format lists nodes and edges explicitly:
//!
//! ```json
//! {
//!   "nodes": [{"id": 1, "lat": 41.88, "lon": -87.63}],
//!   "edges": [{"from": 1, "to": 2, "travel_time_s": 60.0, "bidirectional": true}]
//! }
//! ```
//!
//! Edge `geometry` is an optional list of `[lat, lon]` pairs. A `GeoJSON`
//! `FeatureCollection` of `LineString`/`MultiLineString` street segments is
//! also accepted; see [`from_geojson`].

use std::collections::HashMap;
use std::path::Path;

use geojson::GeoJson;
use saferoute_hazard_models::GeoPoint;
use serde::Deserialize;

use crate::{EdgeSpec, NetworkBuilder, NetworkConfig, NetworkError, RoadNetwork, polyline_length_m};

/// Coordinates are merged into one node when equal at this precision
/// (about 1 cm).
const COORD_SCALE: f64 = 1e7;

#[derive(Debug, Deserialize)]
struct NetworkDocument {
    nodes: Vec<NodeRecord>,
    #[serde(default)]
    edges: Vec<EdgeRecord>,
}

#[derive(Debug, Deserialize)]
struct NodeRecord {
    id: u64,
    #[serde(alias = "latitude")]
    lat: f64,
    #[serde(alias = "lng", alias = "longitude")]
    lon: f64,
    #[serde(default, alias = "lighting")]
    light: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct EdgeRecord {
    from: u64,
    to: u64,
    #[serde(default, alias = "base_travel_time_seconds", alias = "time")]
    travel_time_s: Option<f64>,
    #[serde(default, alias = "length")]
    length_m: Option<f64>,
    /// `[lat, lon]` pairs.
    #[serde(default)]
    geometry: Vec<[f64; 2]>,
    #[serde(default)]
    bidirectional: bool,
    #[serde(default, alias = "lighting")]
    light: Option<f64>,
}

/// Builds a network from the JSON node/edge format.
///
/// # Errors
///
/// Returns an error if the document cannot be parsed or fails validation.
pub fn from_json(bytes: &[u8], config: NetworkConfig) -> Result<RoadNetwork, NetworkError> {
    let document: NetworkDocument = serde_json::from_slice(bytes)?;
    let mut builder = NetworkBuilder::new();

    for node in document.nodes {
        let position = GeoPoint::new(node.lat, node.lon);
        match node.light {
            Some(light) => builder.add_lit_node(node.id, position, light),
            None => builder.add_node(node.id, position),
        };
    }
    for edge in document.edges {
        builder.add_edge(EdgeSpec {
            from: edge.from,
            to: edge.to,
            travel_time_s: edge.travel_time_s,
            length_m: edge.length_m,
            geometry: edge
                .geometry
                .into_iter()
                .map(|[lat, lon]| GeoPoint::new(lat, lon))
                .collect(),
            bidirectional: edge.bidirectional,
            light: edge.light,
        });
    }

    builder.build(config)
}

struct StreetLine {
    points: Vec<GeoPoint>,
    oneway: bool,
    travel_time_s: Option<f64>,
    light: Option<f64>,
}

#[allow(clippy::cast_possible_truncation)]
fn coord_key(point: &GeoPoint) -> (i64, i64) {
    (
        (point.lat * COORD_SCALE).round() as i64,
        (point.lon * COORD_SCALE).round() as i64,
    )
}

fn is_oneway(value: Option<&serde_json::Value>) -> bool {
    match value {
        Some(serde_json::Value::Bool(b)) => *b,
        Some(serde_json::Value::String(s)) => {
            matches!(s.to_ascii_lowercase().as_str(), "yes" | "true" | "1")
        }
        Some(serde_json::Value::Number(n)) => n.as_i64() == Some(1),
        _ => false,
    }
}

fn to_points(positions: &[Vec<f64>]) -> Result<Vec<GeoPoint>, NetworkError> {
    positions
        .iter()
        .map(|position| match position.as_slice() {
            [lon, lat, ..] => Ok(GeoPoint::new(*lat, *lon)),
            _ => Err(NetworkError::Format {
                message: "position with fewer than two coordinates".to_string(),
            }),
        })
        .collect()
}

/// Builds a network from a `GeoJSON` `FeatureCollection` of street lines.
///
/// Line endpoints, and any vertex shared by more than one line, become
/// nodes; each line is split at its nodes into edges. Lines are two-way
/// unless the feature's `oneway` property is truthy. A `travel_time_s`
/// property is distributed over the split edges by length; otherwise time
/// is derived from the configured default speed. A `light` property sets
/// the street-light level of every edge of the line.
///
/// # Errors
///
/// Returns an error if the document is not a `FeatureCollection` or fails
/// validation.
pub fn from_geojson(text: &str, config: NetworkConfig) -> Result<RoadNetwork, NetworkError> {
    let GeoJson::FeatureCollection(collection) = text.parse::<GeoJson>()? else {
        return Err(NetworkError::Format {
            message: "expected a GeoJSON FeatureCollection".to_string(),
        });
    };

    let mut lines = Vec::new();
    for feature in &collection.features {
        let Some(geometry) = feature.geometry.as_ref() else {
            continue;
        };
        let oneway = is_oneway(feature.property("oneway"));
        let travel_time_s = feature
            .property("travel_time_s")
            .and_then(serde_json::Value::as_f64);
        let light = feature.property("light").and_then(serde_json::Value::as_f64);

        let parts = match &geometry.value {
            geojson::Value::LineString(line) => vec![to_points(line)?],
            geojson::Value::MultiLineString(multi) => multi
                .iter()
                .map(|line| to_points(line.as_slice()))
                .collect::<Result<Vec<_>, _>>()?,
            _ => {
                log::debug!("Skipping non-line feature {:?}", feature.id);
                continue;
            }
        };
        for points in parts.into_iter().filter(|p| p.len() >= 2) {
            lines.push(StreetLine {
                points,
                oneway,
                travel_time_s,
                light,
            });
        }
    }

    let mut occurrences: HashMap<(i64, i64), usize> = HashMap::new();
    for line in &lines {
        for point in &line.points {
            *occurrences.entry(coord_key(point)).or_default() += 1;
        }
    }
    let is_node = |line: &StreetLine, i: usize| {
        i == 0 || i == line.points.len() - 1 || occurrences[&coord_key(&line.points[i])] > 1
    };

    let mut builder = NetworkBuilder::new();
    let mut node_ids: HashMap<(i64, i64), u64> = HashMap::new();
    let mut node_id = |builder: &mut NetworkBuilder, point: GeoPoint| {
        let next = node_ids.len() as u64 + 1;
        *node_ids.entry(coord_key(&point)).or_insert_with(|| {
            builder.add_node(next, point);
            next
        })
    };

    for line in &lines {
        let total_length = polyline_length_m(&line.points);
        let mut start = 0;
        for i in 1..line.points.len() {
            if !is_node(line, i) {
                continue;
            }
            let segment = &line.points[start..=i];
            let from = node_id(&mut builder, segment[0]);
            let to = node_id(&mut builder, line.points[i]);
            start = i;
            if from == to {
                continue;
            }

            let length_m = polyline_length_m(segment);
            let mut spec = EdgeSpec::new(from, to)
                .with_length(length_m)
                .with_geometry(segment[1..segment.len() - 1].to_vec());
            if let Some(time) = line.travel_time_s {
                let share = if total_length > 0.0 {
                    length_m / total_length
                } else {
                    1.0
                };
                spec = spec.with_time(time * share);
            }
            if let Some(level) = line.light {
                spec = spec.with_light(level);
            }
            if !line.oneway {
                spec = spec.bidirectional();
            }
            builder.add_edge(spec);
        }
    }

    log::debug!(
        "Converted {} GeoJSON lines into {} nodes",
        lines.len(),
        node_ids.len()
    );
    builder.build(config)
}

/// Loads a network file: `.geojson` files are read as `GeoJSON`, anything
/// else as the JSON node/edge format.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_file(path: &Path, config: NetworkConfig) -> Result<RoadNetwork, NetworkError> {
    log::info!("Loading road network from {}", path.display());
    let is_geojson = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("geojson"));

    if is_geojson {
        from_geojson(&std::fs::read_to_string(path)?, config)
    } else {
        from_json(&std::fs::read(path)?, config)
    }
}

#[cfg(test)]
mod tests {
    use crate::EdgeRef as _;

    use super::*;

    #[test]
    fn loads_json_document() {
        let json = br#"{
            "nodes": [
                {"id": 10, "lat": 41.880, "lon": -87.630, "light": 0.8},
                {"id": 20, "latitude": 41.881, "longitude": -87.630, "lighting": 0.2}
            ],
            "edges": [
                {"from": 10, "to": 20, "time": 90.0, "geometry": [[41.8805, -87.6301]],
                 "bidirectional": true}
            ]
        }"#;
        let network = from_json(json, NetworkConfig::default()).unwrap();
        assert_eq!(network.node_count(), 2);
        assert_eq!(network.edge_count(), 2);

        let n10 = network.node_index(10).unwrap();
        let edge = network.neighbors(n10).next().unwrap();
        assert_eq!(edge.weight().geometry.len(), 3);
        assert!((edge.weight().travel_time_s - 90.0).abs() < f64::EPSILON);
        // brightest level 0.8, segment average 0.5
        assert!((edge.weight().darkness - 0.3).abs() < 1e-12);
        assert_eq!(network.node(n10).light, Some(0.8));
    }

    #[test]
    fn geojson_lines_are_split_at_shared_vertices() {
        // Two streets crossing at (41.881, -87.630): a north-south line whose
        // middle vertex is the east-west line's start.
        let geojson = r#"{
            "type": "FeatureCollection",
            "features": [
                {"type": "Feature", "properties": {"travel_time_s": 200.0},
                 "geometry": {"type": "LineString", "coordinates": [
                     [-87.630, 41.880], [-87.630, 41.881], [-87.630, 41.882]
                 ]}},
                {"type": "Feature", "properties": {"oneway": "yes", "light": 0.0},
                 "geometry": {"type": "LineString",
                              "coordinates": [[-87.630, 41.881], [-87.629, 41.881]]}},
                {"type": "Feature", "properties": {},
                 "geometry": {"type": "Point", "coordinates": [-87.0, 41.0]}}
            ]
        }"#;
        let network = from_geojson(geojson, NetworkConfig::default()).unwrap();
        assert_eq!(network.node_count(), 4);
        // two halves of the two-way street in both directions + one oneway edge
        assert_eq!(network.edge_count(), 5);

        let crossing = network
            .nearest_node(GeoPoint::new(41.881, -87.630))
            .unwrap();
        let times: Vec<f64> = network
            .incoming(crossing)
            .map(|e| e.weight().travel_time_s)
            .collect();
        assert_eq!(times.len(), 2);
        assert!(times.iter().all(|t| (t - 100.0).abs() < 0.5), "{times:?}");

        let east = network.nearest_node(GeoPoint::new(41.881, -87.629)).unwrap();
        assert_eq!(network.neighbors(east).count(), 0, "oneway must not be mirrored");
        assert_eq!(network.incoming(east).next().map(|e| e.source()), Some(crossing));
        // the only lit value in the network is 0.0, so levels are relative to 1.0
        let dark = network.incoming(east).next().unwrap().weight().darkness;
        assert!((dark - 1.0).abs() < 1e-12);
        let lit = network.neighbors(crossing).find(|e| e.target() != east).unwrap();
        assert!(lit.weight().darkness.abs() < 1e-12);
    }

    #[test]
    fn rejects_non_collection() {
        let point = r#"{"type": "Point", "coordinates": [0.0, 0.0]}"#;
        assert!(matches!(
            from_geojson(point, NetworkConfig::default()),
            Err(NetworkError::Format { .. })
        ));
    }
}
