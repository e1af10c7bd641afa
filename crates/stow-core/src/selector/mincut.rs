// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Exact selection via s–t minimum cut.
//!
//! Network: `s → unit` with the unit's migrate cost, `unit → edge` (infinite)
//! for every ancestor edge, `edge → t` with the edge's replay cost. Forced
//! recompute units get an infinite `s → unit` arc; forced migrate units get an
//! infinite `unit → t` arc. Units left reachable from `s` in the residual graph
//! form the recompute set; this is the smallest optimal set, so ties go to
//! migration.
use std::collections::{BTreeMap, BTreeSet, VecDeque};

use super::{SelectError, SelectionProblem, Selector, Side};

const INF: u128 = u128::MAX / 4;
const SOURCE: usize = 0;
const SINK: usize = 1;

/// Optimal strategy, polynomial in units plus edges.
#[derive(Debug, Clone, Copy, Default)]
pub struct MinCutSelector;

impl Selector for MinCutSelector {
    fn name(&self) -> &str {
        "mincut"
    }

    fn select(&self, problem: &SelectionProblem) -> Result<BTreeSet<usize>, SelectError> {
        let units = problem.units();
        let edge_nodes: BTreeMap<_, _> = problem
            .edge_costs()
            .keys()
            .enumerate()
            .map(|(i, &edge)| (edge, 2 + units.len() + i))
            .collect();

        let mut net = FlowNetwork::new(2 + units.len() + edge_nodes.len());
        for (i, unit) in units.iter().enumerate() {
            let node = 2 + i;
            let source_cap = match unit.forced() {
                Some(Side::Recompute) => INF,
                _ => unit.migrate_cost.map_or(INF, u128::from),
            };
            net.add_arc(SOURCE, node, source_cap);
            match &unit.ancestors {
                Some(ancestors) => {
                    for edge in ancestors {
                        if let Some(&target) = edge_nodes.get(edge) {
                            net.add_arc(node, target, INF);
                        }
                    }
                }
                None => net.add_arc(node, SINK, INF),
            }
        }
        for (&edge, &node) in &edge_nodes {
            net.add_arc(node, SINK, u128::from(problem.edge_cost(edge)));
        }

        net.max_flow(SOURCE, SINK);
        let reachable = net.residual_reachable(SOURCE);
        Ok((0..units.len()).filter(|i| reachable[2 + i]).collect())
    }
}

/// Adjacency-list flow network; arc `k ^ 1` is the reverse of arc `k`.
struct FlowNetwork {
    adjacency: Vec<Vec<usize>>,
    head: Vec<usize>,
    residual: Vec<u128>,
}

impl FlowNetwork {
    fn new(nodes: usize) -> Self {
        Self {
            adjacency: vec![Vec::new(); nodes],
            head: Vec::new(),
            residual: Vec::new(),
        }
    }

    fn add_arc(&mut self, from: usize, to: usize, capacity: u128) {
        self.adjacency[from].push(self.head.len());
        self.head.push(to);
        self.residual.push(capacity);
        self.adjacency[to].push(self.head.len());
        self.head.push(from);
        self.residual.push(0);
    }

    /// Edmonds–Karp. Every s–t path crosses a finite arc, so the flow is
    /// bounded by the finite cut of migrating everything free.
    fn max_flow(&mut self, source: usize, sink: usize) -> u128 {
        let mut total = 0u128;
        loop {
            let mut via = vec![None::<usize>; self.adjacency.len()];
            let mut queue = VecDeque::from([source]);
            let mut seen = vec![false; self.adjacency.len()];
            seen[source] = true;
            while let Some(node) = queue.pop_front() {
                if node == sink {
                    break;
                }
                for &arc in &self.adjacency[node] {
                    let next = self.head[arc];
                    if !seen[next] && self.residual[arc] > 0 {
                        seen[next] = true;
                        via[next] = Some(arc);
                        queue.push_back(next);
                    }
                }
            }
            if !seen[sink] {
                return total;
            }

            let mut bottleneck = u128::MAX;
            let mut node = sink;
            while let Some(arc) = via[node] {
                bottleneck = bottleneck.min(self.residual[arc]);
                node = self.head[arc ^ 1];
            }
            let mut node = sink;
            while let Some(arc) = via[node] {
                self.residual[arc] -= bottleneck;
                self.residual[arc ^ 1] += bottleneck;
                node = self.head[arc ^ 1];
            }
            total += bottleneck;
        }
    }

    fn residual_reachable(&self, source: usize) -> Vec<bool> {
        let mut seen = vec![false; self.adjacency.len()];
        seen[source] = true;
        let mut stack = vec![source];
        while let Some(node) = stack.pop() {
            for &arc in &self.adjacency[node] {
                let next = self.head[arc];
                if !seen[next] && self.residual[arc] > 0 {
                    seen[next] = true;
                    stack.push(next);
                }
            }
        }
        seen
    }
}
