#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Static road-network graph with nearest-node snapping.
//!
//! Nodes are intersections or waypoints, edges are directed street
//! segments carrying a base travel time, a length and an ordered geometry.
//! Edges carry no incident risk; that is computed per request. They do
//! carry a static darkness derived from street lighting:
//!
//! ```text
//! darkness = max(0, maxLight - avg(light[from], light[to]))
//! ```
//!
//! where `maxLight` is the brightest level in the network and a node or
//! edge without a light level counts as fully lit.
//!
//! A [`RoadNetwork`] is immutable once built and is shared between request
//! threads behind an `Arc`.

pub mod load;

use std::collections::HashMap;

use petgraph::Direction;
use petgraph::graph::{DiGraph, EdgeIndex, EdgeReference, NodeIndex};
use rstar::{RTree, primitives::GeomWithData};
use saferoute_hazard_models::{BoundingBox, GeoPoint};
use serde::{Deserialize, Serialize};

pub use petgraph::visit::EdgeRef;

/// Number of index candidates re-ranked by great-circle distance when
/// snapping. The R-tree works in degree space, which distorts east-west
/// distances away from the equator.
const SNAP_CANDIDATES: usize = 8;

/// Errors raised while building or querying the road network.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// A node had an invalid position or a duplicate id.
    #[error("Invalid node: {message}")]
    InvalidNode {
        /// Description of the problem.
        message: String,
    },

    /// An edge had a negative or non-finite cost or light level.
    #[error("Invalid edge {from} -> {to}: {message}")]
    InvalidEdge {
        from: u64,
        to: u64,
        /// Description of the problem.
        message: String,
    },

    /// An edge referenced a node id that does not exist.
    #[error("Unknown node id {0}")]
    UnknownNode(u64),

    /// A position is farther than the maximum snap distance from every node.
    #[error("Position ({lat}, {lon}) is more than {max_distance_m} m from the road network")]
    OutOfCoverage {
        lat: f64,
        lon: f64,
        max_distance_m: f64,
    },

    /// The document is not a supported network format.
    #[error("Unsupported network document: {message}")]
    Format {
        /// What was unexpected.
        message: String,
    },

    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// `GeoJSON` parsing failed.
    #[error("GeoJSON parse error: {0}")]
    GeoJson(#[from] geojson::Error),

    /// I/O error (file read).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Network construction settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Origins and destinations farther than this from every node are
    /// rejected.
    pub max_snap_distance_m: f64,
    /// Speed used to derive travel time when an edge does not carry one.
    pub default_speed_mps: f64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            max_snap_distance_m: 500.0,
            default_speed_mps: 1.4,
        }
    }
}

/// An intersection or waypoint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoadNode {
    pub id: u64,
    pub position: GeoPoint,
    /// Street-light level; any non-negative scale, higher is brighter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub light: Option<f64>,
}

/// A directed street segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoadEdge {
    /// Id of the source node.
    pub from: u64,
    /// Id of the target node.
    pub to: u64,
    /// Base travel time in seconds.
    pub travel_time_s: f64,
    /// Length in meters.
    pub length_m: f64,
    /// Ordered polyline from `from` to `to`, endpoints included.
    pub geometry: Vec<GeoPoint>,
    /// How far below the network's brightest light level this segment is;
    /// zero when fully lit or when no lighting data was loaded.
    #[serde(default)]
    pub darkness: f64,
}

/// Input description of an edge; missing costs are derived on build.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EdgeSpec {
    pub from: u64,
    pub to: u64,
    pub travel_time_s: Option<f64>,
    pub length_m: Option<f64>,
    /// Intermediate and end points; when empty the straight segment between
    /// the two nodes is used.
    pub geometry: Vec<GeoPoint>,
    /// Also add the reverse edge with the reversed geometry.
    pub bidirectional: bool,
    /// Light level of the whole segment, overriding its end nodes.
    pub light: Option<f64>,
}

impl EdgeSpec {
    #[must_use]
    pub fn new(from: u64, to: u64) -> Self {
        Self {
            from,
            to,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn with_time(mut self, seconds: f64) -> Self {
        self.travel_time_s = Some(seconds);
        self
    }

    #[must_use]
    pub const fn with_length(mut self, meters: f64) -> Self {
        self.length_m = Some(meters);
        self
    }

    #[must_use]
    pub fn with_geometry(mut self, geometry: Vec<GeoPoint>) -> Self {
        self.geometry = geometry;
        self
    }

    #[must_use]
    pub const fn bidirectional(mut self) -> Self {
        self.bidirectional = true;
        self
    }

    #[must_use]
    pub const fn with_light(mut self, level: f64) -> Self {
        self.light = Some(level);
        self
    }
}

fn valid_light(level: Option<f64>) -> bool {
    level.is_none_or(|l| l.is_finite() && l >= 0.0)
}

/// Length of a polyline in meters.
#[must_use]
pub fn polyline_length_m(points: &[GeoPoint]) -> f64 {
    points.windows(2).map(|w| w[0].distance_m(&w[1])).sum()
}

/// Accumulates nodes and edges and validates them into a [`RoadNetwork`].
#[derive(Debug, Default)]
pub struct NetworkBuilder {
    nodes: Vec<RoadNode>,
    edges: Vec<EdgeSpec>,
}

impl NetworkBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, id: u64, position: GeoPoint) -> &mut Self {
        self.nodes.push(RoadNode {
            id,
            position,
            light: None,
        });
        self
    }

    /// Adds a node with a street-light level.
    pub fn add_lit_node(&mut self, id: u64, position: GeoPoint, light: f64) -> &mut Self {
        self.nodes.push(RoadNode {
            id,
            position,
            light: Some(light),
        });
        self
    }

    pub fn add_edge(&mut self, edge: EdgeSpec) -> &mut Self {
        self.edges.push(edge);
        self
    }

    /// Validates the accumulated data and builds the graph and its spatial
    /// index.
    ///
    /// # Errors
    ///
    /// Returns a [`NetworkError`] for duplicate node ids, invalid positions,
    /// edges referencing unknown nodes, or negative/non-finite costs or
    /// light levels.
    pub fn build(self, config: NetworkConfig) -> Result<RoadNetwork, NetworkError> {
        let mut graph: DiGraph<RoadNode, RoadEdge> =
            DiGraph::with_capacity(self.nodes.len(), self.edges.len());
        let mut ids: HashMap<u64, NodeIndex> = HashMap::with_capacity(self.nodes.len());

        let max_light = self
            .nodes
            .iter()
            .filter_map(|n| n.light)
            .chain(self.edges.iter().filter_map(|e| e.light))
            .fold(0.0_f64, f64::max);
        let max_light = if max_light > 0.0 { max_light } else { 1.0 };

        for node in self.nodes {
            if !node.position.is_valid() {
                return Err(NetworkError::InvalidNode {
                    message: format!(
                        "node {} has invalid position ({}, {})",
                        node.id, node.position.lat, node.position.lon
                    ),
                });
            }
            if !valid_light(node.light) {
                return Err(NetworkError::InvalidNode {
                    message: format!("node {} has an invalid light level", node.id),
                });
            }
            if ids.contains_key(&node.id) {
                return Err(NetworkError::InvalidNode {
                    message: format!("duplicate node id {}", node.id),
                });
            }
            let index = graph.add_node(node);
            ids.insert(node.id, index);
        }

        for spec in self.edges {
            let from = *ids.get(&spec.from).ok_or(NetworkError::UnknownNode(spec.from))?;
            let to = *ids.get(&spec.to).ok_or(NetworkError::UnknownNode(spec.to))?;
            let mut edge = resolve_edge(&spec, graph[from].position, graph[to].position, &config)?;
            let light = spec.light.unwrap_or_else(|| {
                let level = |node: NodeIndex| graph[node].light.unwrap_or(max_light);
                f64::midpoint(level(from), level(to))
            });
            edge.darkness = (max_light - light).max(0.0);

            if spec.bidirectional {
                let mut reverse_geometry = edge.geometry.clone();
                reverse_geometry.reverse();
                let reverse = RoadEdge {
                    from: edge.to,
                    to: edge.from,
                    travel_time_s: edge.travel_time_s,
                    length_m: edge.length_m,
                    geometry: reverse_geometry,
                    darkness: edge.darkness,
                };
                graph.add_edge(from, to, edge);
                graph.add_edge(to, from, reverse);
            } else {
                graph.add_edge(from, to, edge);
            }
        }

        let index: RTree<GeomWithData<[f64; 2], NodeIndex>> = RTree::bulk_load(
            graph
                .node_indices()
                .map(|i| GeomWithData::new(graph[i].position.to_xy(), i))
                .collect(),
        );

        log::info!(
            "Built road network with {} nodes and {} edges",
            graph.node_count(),
            graph.edge_count()
        );

        Ok(RoadNetwork {
            graph,
            ids,
            index,
            config,
        })
    }
}

fn resolve_edge(
    spec: &EdgeSpec,
    from_pos: GeoPoint,
    to_pos: GeoPoint,
    config: &NetworkConfig,
) -> Result<RoadEdge, NetworkError> {
    let invalid = |message: String| NetworkError::InvalidEdge {
        from: spec.from,
        to: spec.to,
        message,
    };

    let mut geometry = Vec::with_capacity(spec.geometry.len() + 2);
    geometry.push(from_pos);
    geometry.extend(
        spec.geometry
            .iter()
            .copied()
            .filter(|p| *p != from_pos && *p != to_pos),
    );
    geometry.push(to_pos);
    if geometry.iter().any(|p| !p.is_valid()) {
        return Err(invalid("geometry contains an invalid coordinate".to_string()));
    }
    if !valid_light(spec.light) {
        return Err(invalid("light level must be finite and non-negative".to_string()));
    }

    let length_m = spec.length_m.unwrap_or_else(|| polyline_length_m(&geometry));
    if !length_m.is_finite() || length_m < 0.0 {
        return Err(invalid(format!("length {length_m} must be finite and non-negative")));
    }

    let travel_time_s = match spec.travel_time_s {
        Some(t) => t,
        None if config.default_speed_mps > 0.0 => length_m / config.default_speed_mps,
        None => return Err(invalid("no travel time and no default speed".to_string())),
    };
    if !travel_time_s.is_finite() || travel_time_s < 0.0 {
        return Err(invalid(format!(
            "travel time {travel_time_s} must be finite and non-negative"
        )));
    }

    Ok(RoadEdge {
        from: spec.from,
        to: spec.to,
        travel_time_s,
        length_m,
        geometry,
        darkness: 0.0,
    })
}

/// Immutable directed road graph with a spatial node index.
#[derive(Debug)]
pub struct RoadNetwork {
    graph: DiGraph<RoadNode, RoadEdge>,
    ids: HashMap<u64, NodeIndex>,
    index: RTree<GeomWithData<[f64; 2], NodeIndex>>,
    config: NetworkConfig,
}

impl RoadNetwork {
    #[must_use]
    pub const fn graph(&self) -> &DiGraph<RoadNode, RoadEdge> {
        &self.graph
    }

    #[must_use]
    pub const fn config(&self) -> &NetworkConfig {
        &self.config
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    #[must_use]
    pub fn node(&self, index: NodeIndex) -> &RoadNode {
        &self.graph[index]
    }

    #[must_use]
    pub fn edge(&self, index: EdgeIndex) -> &RoadEdge {
        &self.graph[index]
    }

    /// Graph index of the node with external id `id`.
    #[must_use]
    pub fn node_index(&self, id: u64) -> Option<NodeIndex> {
        self.ids.get(&id).copied()
    }

    /// Outgoing edges of `node`, lazily.
    pub fn neighbors(&self, node: NodeIndex) -> impl Iterator<Item = EdgeReference<'_, RoadEdge>> {
        self.graph.edges(node)
    }

    /// Incoming edges of `node`, lazily.
    pub fn incoming(&self, node: NodeIndex) -> impl Iterator<Item = EdgeReference<'_, RoadEdge>> {
        self.graph.edges_directed(node, Direction::Incoming)
    }

    /// Nearest node to `position` by great-circle distance.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::OutOfCoverage`] if the nearest node is farther
    /// than the configured maximum snap distance, or the network is empty.
    pub fn nearest_node(&self, position: GeoPoint) -> Result<NodeIndex, NetworkError> {
        let best = self
            .index
            .nearest_neighbor_iter(&position.to_xy())
            .take(SNAP_CANDIDATES)
            .map(|entry| (entry.data, position.distance_m(&self.graph[entry.data].position)))
            .min_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

        match best {
            Some((node, distance)) if distance <= self.config.max_snap_distance_m => {
                log::trace!(
                    "Snapped ({}, {}) to node {} at {distance:.1} m",
                    position.lat,
                    position.lon,
                    self.graph[node].id
                );
                Ok(node)
            }
            _ => Err(NetworkError::OutOfCoverage {
                lat: position.lat,
                lon: position.lon,
                max_distance_m: self.config.max_snap_distance_m,
            }),
        }
    }

    /// Box enclosing every node, or `None` for an empty network.
    #[must_use]
    pub fn bounds(&self) -> Option<BoundingBox> {
        BoundingBox::enclosing(self.graph.node_weights().map(|n| &n.position))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> RoadNetwork {
        let mut builder = NetworkBuilder::new();
        builder
            .add_node(1, GeoPoint::new(41.880, -87.630))
            .add_node(2, GeoPoint::new(41.880, -87.620))
            .add_node(3, GeoPoint::new(41.890, -87.620))
            .add_edge(EdgeSpec::new(1, 2).bidirectional())
            .add_edge(EdgeSpec::new(2, 3).with_time(60.0).with_length(1100.0));
        builder.build(NetworkConfig::default()).unwrap()
    }

    #[test]
    fn bidirectional_edges_are_mirrored() {
        let network = square();
        assert_eq!(network.node_count(), 3);
        assert_eq!(network.edge_count(), 3);

        let n1 = network.node_index(1).unwrap();
        let n2 = network.node_index(2).unwrap();
        let forward = network.neighbors(n1).next().unwrap();
        assert_eq!(forward.target(), n2);
        let backward = network
            .neighbors(n2)
            .find(|e| e.target() == n1)
            .unwrap();
        let mut reversed = forward.weight().geometry.clone();
        reversed.reverse();
        assert_eq!(backward.weight().geometry, reversed);
    }

    #[test]
    fn derives_length_and_time() {
        let network = square();
        let n1 = network.node_index(1).unwrap();
        let edge = network.neighbors(n1).next().unwrap().weight().clone();
        assert!((edge.length_m - 828.0).abs() < 5.0, "length {}", edge.length_m);
        assert!((edge.travel_time_s - edge.length_m / 1.4).abs() < 1e-9);

        let n3 = network.node_index(3).unwrap();
        let explicit = network.incoming(n3).next().unwrap();
        assert!((explicit.weight().travel_time_s - 60.0).abs() < f64::EPSILON);
    }

    #[test]
    fn snaps_to_nearest_node_within_range() {
        let network = square();
        let snapped = network.nearest_node(GeoPoint::new(41.8801, -87.6201)).unwrap();
        assert_eq!(network.node(snapped).id, 2);

        let far = network.nearest_node(GeoPoint::new(42.5, -87.6));
        assert!(matches!(far, Err(NetworkError::OutOfCoverage { .. })));
    }

    #[test]
    fn empty_network_is_out_of_coverage() {
        let network = NetworkBuilder::new().build(NetworkConfig::default()).unwrap();
        assert!(network.nearest_node(GeoPoint::new(0.0, 0.0)).is_err());
        assert!(network.bounds().is_none());
    }

    #[test]
    fn rejects_bad_input() {
        let mut duplicate = NetworkBuilder::new();
        duplicate
            .add_node(1, GeoPoint::new(0.0, 0.0))
            .add_node(1, GeoPoint::new(0.0, 1.0));
        assert!(matches!(
            duplicate.build(NetworkConfig::default()),
            Err(NetworkError::InvalidNode { .. })
        ));

        let mut dangling = NetworkBuilder::new();
        dangling
            .add_node(1, GeoPoint::new(0.0, 0.0))
            .add_edge(EdgeSpec::new(1, 9));
        assert!(matches!(
            dangling.build(NetworkConfig::default()),
            Err(NetworkError::UnknownNode(9))
        ));

        let mut negative = NetworkBuilder::new();
        negative
            .add_node(1, GeoPoint::new(0.0, 0.0))
            .add_node(2, GeoPoint::new(0.0, 0.001))
            .add_edge(EdgeSpec::new(1, 2).with_time(-1.0));
        assert!(matches!(
            negative.build(NetworkConfig::default()),
            Err(NetworkError::InvalidEdge { .. })
        ));
    }

    #[test]
    fn darkness_follows_the_brightest_light() {
        let mut builder = NetworkBuilder::new();
        builder
            .add_lit_node(1, GeoPoint::new(0.0, 0.0), 1.0)
            .add_lit_node(2, GeoPoint::new(0.0, 0.001), 0.5)
            .add_lit_node(3, GeoPoint::new(0.0, 0.002), 0.2)
            .add_node(4, GeoPoint::new(0.0, 0.003))
            .add_edge(EdgeSpec::new(1, 2).bidirectional())
            .add_edge(EdgeSpec::new(2, 3))
            .add_edge(EdgeSpec::new(3, 4))
            .add_edge(EdgeSpec::new(1, 4).with_light(0.0));
        let network = builder.build(NetworkConfig::default()).unwrap();

        let darkness = |from: u64, to: u64| {
            let from = network.node_index(from).unwrap();
            let to = network.node_index(to).unwrap();
            network
                .neighbors(from)
                .find(|e| e.target() == to)
                .unwrap()
                .weight()
                .darkness
        };
        assert!((darkness(1, 2) - 0.25).abs() < 1e-12);
        assert!((darkness(2, 1) - 0.25).abs() < 1e-12);
        assert!((darkness(2, 3) - 0.65).abs() < 1e-12);
        // node 4 has no light level and counts as fully lit
        assert!((darkness(3, 4) - 0.4).abs() < 1e-12);
        assert!((darkness(1, 4) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn unlit_networks_have_no_darkness() {
        let network = square();
        assert!(network.graph().edge_weights().all(|e| e.darkness == 0.0));

        let mut negative = NetworkBuilder::new();
        negative.add_lit_node(1, GeoPoint::new(0.0, 0.0), -1.0);
        assert!(matches!(
            negative.build(NetworkConfig::default()),
            Err(NetworkError::InvalidNode { .. })
        ));
    }
}
