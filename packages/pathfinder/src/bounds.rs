//! Admissible per-objective lower bounds to the destination.
//!
//! Each bound is an exact single-objective shortest distance computed by a
//! Dijkstra run over incoming edges from the destination, so it is both
//! admissible and consistent. Nodes with an infinite bound cannot reach the
//! destination at all.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use petgraph::graph::{EdgeReference, NodeIndex};
use saferoute_network::{EdgeRef as _, RoadEdge, RoadNetwork};

use crate::SearchError;
use crate::control::Watchdog;

#[derive(Clone, Copy)]
struct State {
    cost: f64,
    node: NodeIndex,
}

impl Ord for State {
    fn cmp(&self, other: &Self) -> Ordering {
        // min-heap by cost, then by node for a stable order
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.node.cmp(&self.node))
    }
}

impl PartialOrd for State {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for State {}

/// Shortest `cost` distance from every node to `destination`, indexed by
/// node index. `cost` returns `None` for edges that may not be used.
pub(crate) fn reverse_dijkstra<F>(
    network: &RoadNetwork,
    destination: NodeIndex,
    mut cost: F,
    watchdog: &mut Watchdog<'_>,
) -> Result<Vec<f64>, SearchError>
where
    F: FnMut(EdgeReference<'_, RoadEdge>) -> Option<f64>,
{
    let mut distances = vec![f64::INFINITY; network.node_count()];
    let mut heap = BinaryHeap::new();

    distances[destination.index()] = 0.0;
    heap.push(State {
        cost: 0.0,
        node: destination,
    });

    while let Some(State { cost: current, node }) = heap.pop() {
        watchdog.tick()?;
        if current > distances[node.index()] {
            continue;
        }

        for edge in network.incoming(node) {
            let Some(weight) = cost(edge) else {
                continue;
            };
            let previous = edge.source();
            let next = current + weight;
            if next < distances[previous.index()] {
                distances[previous.index()] = next;
                heap.push(State {
                    cost: next,
                    node: previous,
                });
            }
        }
    }

    Ok(distances)
}
