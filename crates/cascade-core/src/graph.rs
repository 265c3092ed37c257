//! Session dependency graph.
//!
//! Edges are never declared by hand. Session B depends on session A when one
//! of A's output patterns overlaps one of B's input or optional input
//! patterns. The declared `order` only breaks ties between sessions the
//! graph leaves unordered.

use crate::error::{CascadeError, Result};
use crate::registry::SessionRegistry;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Dependency {
    /// False when every overlapping pattern on the consumer side is optional.
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyEdge {
    pub from: String,
    pub to: String,
    pub required: bool,
}

#[derive(Debug)]
pub struct DependencyGraph {
    graph: DiGraph<String, Dependency>,
    index: HashMap<String, NodeIndex>,
    topo: Vec<NodeIndex>,
    /// Position of each node in `topo`, by node index.
    topo_pos: Vec<usize>,
}

impl DependencyGraph {
    /// Derive edges from the registry and validate that the result is acyclic.
    pub fn build(registry: &SessionRegistry) -> Result<Self> {
        let mut graph = DiGraph::<String, Dependency>::with_capacity(registry.len(), 0);
        let mut index = HashMap::with_capacity(registry.len());

        // Registry iteration is (order, id) sorted, so node indices carry the
        // tie-break order.
        for s in registry.iter() {
            let idx = graph.add_node(s.id().to_string());
            index.insert(s.id().to_string(), idx);
        }

        for producer in registry.iter() {
            for consumer in registry.iter() {
                if producer.id() == consumer.id() {
                    continue;
                }
                let feeds = |patterns: &[crate::pattern::ArtifactPattern]| {
                    producer
                        .outputs()
                        .iter()
                        .any(|o| patterns.iter().any(|p| o.overlaps(p)))
                };
                let required = feeds(consumer.inputs());
                if required || feeds(consumer.optional_inputs()) {
                    debug!(from = producer.id(), to = consumer.id(), required, "dependency edge");
                    graph.add_edge(
                        index[producer.id()],
                        index[consumer.id()],
                        Dependency { required },
                    );
                }
            }
        }

        let topo = kahn(&graph).map_err(|residue| CascadeError::CyclicDependency {
            members: cycle_members(&graph, &residue),
        })?;

        let mut topo_pos = vec![0; graph.node_count()];
        for (pos, idx) in topo.iter().enumerate() {
            topo_pos[idx.index()] = pos;
        }

        Ok(Self {
            graph,
            index,
            topo,
            topo_pos,
        })
    }

    fn node(&self, id: &str) -> Result<NodeIndex> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| CascadeError::SessionNotFound(id.to_string()))
    }

    fn name(&self, idx: NodeIndex) -> &str {
        &self.graph[idx]
    }

    fn sorted_names(&self, mut nodes: Vec<NodeIndex>) -> Vec<&str> {
        nodes.sort_by_key(|n| self.topo_pos[n.index()]);
        nodes.dedup();
        nodes.into_iter().map(|n| self.name(n)).collect()
    }

    /// Session ids in execution order.
    pub fn topological_order(&self) -> Vec<&str> {
        self.topo.iter().map(|&n| self.name(n)).collect()
    }

    /// Position of a session in `topological_order`.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).map(|n| self.topo_pos[n.index()])
    }

    /// Direct upstream sessions.
    pub fn dependencies(&self, id: &str) -> Result<Vec<&str>> {
        let idx = self.node(id)?;
        let preds = self
            .graph
            .neighbors_directed(idx, Direction::Incoming)
            .collect();
        Ok(self.sorted_names(preds))
    }

    /// Direct downstream sessions.
    pub fn dependents(&self, id: &str) -> Result<Vec<&str>> {
        let idx = self.node(id)?;
        let succs = self
            .graph
            .neighbors_directed(idx, Direction::Outgoing)
            .collect();
        Ok(self.sorted_names(succs))
    }

    /// Every session reachable against the edges, excluding `id` itself.
    pub fn upstream_closure(&self, id: &str) -> Result<Vec<&str>> {
        let idx = self.node(id)?;
        Ok(self.sorted_names(self.reach(idx, Direction::Incoming)))
    }

    /// Every session reachable along the edges, excluding `id` itself.
    pub fn downstream_closure(&self, id: &str) -> Result<Vec<&str>> {
        let idx = self.node(id)?;
        Ok(self.sorted_names(self.reach(idx, Direction::Outgoing)))
    }

    fn reach(&self, start: NodeIndex, dir: Direction) -> Vec<NodeIndex> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([start]);
        while let Some(n) = queue.pop_front() {
            for next in self.graph.neighbors_directed(n, dir) {
                if seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        seen.remove(&start);
        seen.into_iter().collect()
    }

    pub fn edges(&self) -> Vec<DependencyEdge> {
        let mut edges: Vec<DependencyEdge> = self
            .graph
            .edge_references()
            .map(|e| DependencyEdge {
                from: self.name(e.source()).to_string(),
                to: self.name(e.target()).to_string(),
                required: e.weight().required,
            })
            .collect();
        edges.sort_by_key(|e| (self.position(&e.to), self.position(&e.from)));
        edges
    }
}

/// Kahn's algorithm with a min-heap on node index, so the lowest
/// `(order, id)` among ready sessions always goes next. On a cycle, returns
/// the nodes that could not be ordered.
fn kahn(graph: &DiGraph<String, Dependency>) -> std::result::Result<Vec<NodeIndex>, Vec<NodeIndex>> {
    let mut indegree: Vec<usize> = graph
        .node_indices()
        .map(|n| graph.neighbors_directed(n, Direction::Incoming).count())
        .collect();

    let mut ready: BinaryHeap<Reverse<NodeIndex>> = graph
        .node_indices()
        .filter(|n| indegree[n.index()] == 0)
        .map(Reverse)
        .collect();

    let mut order = Vec::with_capacity(graph.node_count());
    while let Some(Reverse(n)) = ready.pop() {
        order.push(n);
        for succ in graph.neighbors_directed(n, Direction::Outgoing) {
            let d = &mut indegree[succ.index()];
            *d -= 1;
            if *d == 0 {
                ready.push(Reverse(succ));
            }
        }
    }

    if order.len() == graph.node_count() {
        Ok(order)
    } else {
        let placed: HashSet<NodeIndex> = order.into_iter().collect();
        Err(graph.node_indices().filter(|n| !placed.contains(n)).collect())
    }
}

/// Name the sessions of the first real cycle among the residue. Nodes that
/// merely sit downstream of a cycle are left out.
fn cycle_members(graph: &DiGraph<String, Dependency>, residue: &[NodeIndex]) -> Vec<String> {
    let mut components: Vec<Vec<NodeIndex>> = tarjan_scc(graph)
        .into_iter()
        .filter(|c| c.len() > 1)
        .collect();
    for c in &mut components {
        c.sort();
    }
    components.sort();

    let members = components
        .into_iter()
        .next()
        .unwrap_or_else(|| residue.to_vec());
    members.into_iter().map(|n| graph[n].clone()).collect()
}
