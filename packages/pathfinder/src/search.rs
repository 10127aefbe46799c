use std::cmp::Ordering;
use std::collections::BinaryHeap;

use petgraph::graph::{EdgeIndex, EdgeReference, NodeIndex};
use saferoute_network::{EdgeRef as _, RoadEdge, RoadNetwork};

use crate::bounds::reverse_dijkstra;
use crate::control::{SearchControl, Watchdog};
use crate::cost::CostVector;
use crate::pareto::{ParetoSet, Path};
use crate::{RiskSource, SearchConfig, SearchError};

/// A partial path ending at `node`. Its index in the arena is also its
/// discovery order.
struct Label {
    node: NodeIndex,
    cost: CostVector,
    parent: Option<(usize, EdgeIndex)>,
    /// Cleared when the label is evicted or discarded.
    alive: bool,
}

struct QueueEntry {
    estimate: CostVector,
    label: usize,
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // min-heap on (time, risk, discovery)
        other
            .estimate
            .lexicographic(&self.estimate)
            .then_with(|| other.label.cmp(&self.label))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueEntry {}

/// Per-request memo of edge risks, with the optional hard limit applied.
struct EdgeRisks<'a, R: ?Sized> {
    source: &'a R,
    limit: Option<f64>,
    /// `NaN` until computed.
    values: Vec<f64>,
}

impl<'a, R: RiskSource + ?Sized> EdgeRisks<'a, R> {
    fn new(source: &'a R, edge_count: usize, limit: Option<f64>) -> Self {
        Self {
            source,
            limit,
            values: vec![f64::NAN; edge_count],
        }
    }

    /// Risk of `edge`, or `None` when it exceeds the limit.
    fn get(&mut self, edge: EdgeReference<'_, RoadEdge>) -> Option<f64> {
        let slot = &mut self.values[edge.id().index()];
        if slot.is_nan() {
            let raw = self.source.edge_risk(edge.weight());
            *slot = if raw.is_finite() { raw.max(0.0) } else { 0.0 };
        }
        let value = *slot;
        match self.limit {
            Some(max) if value > max => None,
            _ => Some(value),
        }
    }
}

/// Pareto search over one network with one risk source.
///
/// Holds only shared references; every call to [`Self::search`] owns its
/// own labels, so one `Pathfinder` may serve concurrent searches.
pub struct Pathfinder<'a, R: ?Sized> {
    network: &'a RoadNetwork,
    risk: &'a R,
    config: SearchConfig,
}

impl<'a, R: RiskSource + ?Sized> Pathfinder<'a, R> {
    #[must_use]
    pub const fn new(network: &'a RoadNetwork, risk: &'a R, config: SearchConfig) -> Self {
        Self {
            network,
            risk,
            config,
        }
    }

    /// Computes the Pareto-optimal paths from `origin` to `destination`.
    ///
    /// # Errors
    ///
    /// * [`SearchError::NoRoute`] if the destination is unreachable (also
    ///   when only edges above the risk limit connect the two)
    /// * [`SearchError::Timeout`] if `control` cancels the search, its
    ///   deadline passes, or the expansion budget runs out. No partial
    ///   result is returned.
    pub fn search(
        &self,
        origin: NodeIndex,
        destination: NodeIndex,
        control: &SearchControl,
    ) -> Result<ParetoSet, SearchError> {
        let network = self.network;
        let mut watchdog = Watchdog::new(control, self.config.max_expansions);

        if origin == destination {
            watchdog.tick()?;
            return Ok(ParetoSet {
                paths: vec![self.reconstruct(&[], origin, CostVector::ZERO, 0)],
                truncated: false,
            });
        }

        let mut risks = EdgeRisks::new(self.risk, network.edge_count(), self.config.max_edge_risk);
        let h_risk = reverse_dijkstra(network, destination, |e| risks.get(e), &mut watchdog)?;
        let h_time = reverse_dijkstra(
            network,
            destination,
            |e| risks.get(e).map(|_| e.weight().travel_time_s),
            &mut watchdog,
        )?;

        if h_time[origin.index()].is_infinite() {
            return Err(SearchError::NoRoute {
                from: network.node(origin).id,
                to: network.node(destination).id,
            });
        }

        let mut labels: Vec<Label> = vec![Label {
            node: origin,
            cost: CostVector::ZERO,
            parent: None,
            alive: true,
        }];
        let mut open: Vec<Vec<usize>> = vec![Vec::new(); network.node_count()];
        let mut closed: Vec<Vec<usize>> = vec![Vec::new(); network.node_count()];
        let mut solutions: Vec<usize> = Vec::new();
        let mut heap = BinaryHeap::new();

        open[origin.index()].push(0);
        heap.push(QueueEntry {
            estimate: CostVector::new(h_time[origin.index()], h_risk[origin.index()]),
            label: 0,
        });

        while let Some(QueueEntry { estimate, label: id }) = heap.pop() {
            watchdog.tick()?;
            if !labels[id].alive {
                continue;
            }
            let node = labels[id].node;
            let cost = labels[id].cost;
            open[node.index()].retain(|&l| l != id);

            let filtered = solutions
                .iter()
                .any(|&s| labels[s].cost.weakly_dominates(&estimate));
            let superseded = closed[node.index()]
                .iter()
                .any(|&c| labels[c].cost.weakly_dominates(&cost));
            if filtered || superseded {
                labels[id].alive = false;
                continue;
            }

            closed[node.index()].push(id);
            if node == destination {
                solutions.push(id);
                continue;
            }
            watchdog.expand()?;

            for edge in network.neighbors(node) {
                let target = edge.target();
                let t = target.index();
                if h_time[t].is_infinite() {
                    continue;
                }
                let Some(risk) = risks.get(edge) else {
                    continue;
                };

                let child = cost + CostVector::new(edge.weight().travel_time_s, risk);
                let child_estimate = child + CostVector::new(h_time[t], h_risk[t]);
                if solutions
                    .iter()
                    .any(|&s| labels[s].cost.weakly_dominates(&child_estimate))
                {
                    continue;
                }
                if open[t]
                    .iter()
                    .chain(&closed[t])
                    .any(|&l| labels[l].cost.weakly_dominates(&child))
                {
                    continue;
                }
                open[t].retain(|&l| {
                    let evicted = child.dominates(&labels[l].cost);
                    if evicted {
                        labels[l].alive = false;
                    }
                    !evicted
                });

                let child_id = labels.len();
                labels.push(Label {
                    node: target,
                    cost: child,
                    parent: Some((id, edge.id())),
                    alive: true,
                });
                open[t].push(child_id);
                heap.push(QueueEntry {
                    estimate: child_estimate,
                    label: child_id,
                });
            }
        }

        log::debug!(
            "Pareto search {} -> {}: {} labels, {} expansions, {} destination labels",
            network.node(origin).id,
            network.node(destination).id,
            labels.len(),
            watchdog.expansions(),
            solutions.len()
        );

        if solutions.is_empty() {
            return Err(SearchError::NoRoute {
                from: network.node(origin).id,
                to: network.node(destination).id,
            });
        }

        let candidates = solutions
            .iter()
            .map(|&id| {
                let mut edges = Vec::new();
                let mut cursor = id;
                while let Some((parent, edge)) = labels[cursor].parent {
                    edges.push(edge);
                    cursor = parent;
                }
                edges.reverse();
                self.reconstruct(&edges, origin, labels[id].cost, id as u64)
            })
            .collect();

        Ok(ParetoSet::from_candidates(candidates, &self.config))
    }

    fn reconstruct(
        &self,
        edges: &[EdgeIndex],
        origin: NodeIndex,
        cost: CostVector,
        discovery: u64,
    ) -> Path {
        let network = self.network;
        let graph = network.graph();
        let mut nodes = vec![origin];
        let mut geometry = vec![network.node(origin).position];
        let mut length_m = 0.0;

        for &edge in edges {
            if let Some((_, target)) = graph.edge_endpoints(edge) {
                nodes.push(target);
            }
            let weight = network.edge(edge);
            length_m += weight.length_m;
            geometry.extend(weight.geometry.iter().skip(1).copied());
        }

        Path {
            node_ids: nodes.iter().map(|&n| network.node(n).id).collect(),
            nodes,
            edges: edges.to_vec(),
            cost,
            length_m,
            geometry,
            discovery,
        }
    }
}
