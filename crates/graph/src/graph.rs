//! Generic insertion-ordered graph container.
//!
//! Both run-level graphs share this one structure instead of parallel
//! hand-rolled containers: find-or-create nodes keyed by canonical identity,
//! label-accumulating undirected edges with no parallel duplicates, and
//! deterministic insertion-order iteration for serialization. Nodes are
//! never deleted once created.

use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::hash::Hash;

use crate::node::{LogicalNode, PhysicalNode};

/// Capability set every node type provides to the container.
pub trait GraphNode {
    type Key: Clone + Eq + Hash;

    fn fresh(key: Self::Key) -> Self;
    fn key(&self) -> &Self::Key;
    /// Union another node's evidence into this one (import-pass merge).
    fn merge_from(&mut self, other: Self);
}

/// One undirected edge. Endpoints are indices into the node list; labels
/// accumulate every relation observed between the pair.
#[derive(Debug, Clone, Serialize)]
pub struct EdgeRecord {
    pub a: usize,
    pub b: usize,
    pub labels: BTreeSet<String>,
}

#[derive(Debug)]
pub struct NetworkGraph<N: GraphNode> {
    nodes: Vec<N>,
    index: HashMap<N::Key, usize>,
    edges: Vec<EdgeRecord>,
    edge_index: HashMap<(usize, usize), usize>,
}

impl<N: GraphNode> Default for NetworkGraph<N> {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            index: HashMap::new(),
            edges: Vec::new(),
            edge_index: HashMap::new(),
        }
    }
}

impl<N: GraphNode> NetworkGraph<N> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent find-or-create: the same key always resolves to the same
    /// node, with evidence accumulating on it.
    pub fn upsert(&mut self, key: N::Key) -> &mut N {
        let idx = match self.index.get(&key) {
            Some(&idx) => idx,
            None => {
                let idx = self.nodes.len();
                self.nodes.push(N::fresh(key.clone()));
                self.index.insert(key, idx);
                idx
            }
        };
        &mut self.nodes[idx]
    }

    #[must_use]
    pub fn get(&self, key: &N::Key) -> Option<&N> {
        self.index.get(key).map(|&idx| &self.nodes[idx])
    }

    /// Find-or-create the edge between two nodes (created if absent) and
    /// add the relation label to it. Parallel edges are never created.
    pub fn connect(&mut self, a: &N::Key, b: &N::Key, label: &str) {
        self.upsert(a.clone());
        self.upsert(b.clone());
        let ia = self.index[a];
        let ib = self.index[b];
        let pair = if ia <= ib { (ia, ib) } else { (ib, ia) };

        let edge_idx = match self.edge_index.get(&pair) {
            Some(&idx) => idx,
            None => {
                let idx = self.edges.len();
                self.edges.push(EdgeRecord {
                    a: pair.0,
                    b: pair.1,
                    labels: BTreeSet::new(),
                });
                self.edge_index.insert(pair, idx);
                idx
            }
        };
        self.edges[edge_idx].labels.insert(label.to_string());
    }

    /// Nodes in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &N> {
        self.nodes.iter()
    }

    /// Edges in insertion order.
    pub fn edges(&self) -> impl Iterator<Item = &EdgeRecord> {
        self.edges.iter()
    }

    #[must_use]
    pub fn node_at(&self, idx: usize) -> &N {
        &self.nodes[idx]
    }

    /// Peers of a node with the labels observed on each edge.
    pub fn neighbors<'a>(&'a self, key: &N::Key) -> Vec<(&'a N, &'a BTreeSet<String>)> {
        let Some(&idx) = self.index.get(key) else {
            return Vec::new();
        };
        self.edges
            .iter()
            .filter_map(move |e| {
                if e.a == idx {
                    Some((&self.nodes[e.b], &e.labels))
                } else if e.b == idx {
                    Some((&self.nodes[e.a], &e.labels))
                } else {
                    None
                }
            })
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Union another graph into this one: colliding node keys merge their
    /// evidence, edges merge their label sets, nothing is deleted. Used for
    /// separate import passes; preserved as an invariant even though a
    /// single run never collides.
    pub fn merge(&mut self, other: Self) {
        let mut remap = Vec::with_capacity(other.nodes.len());
        for node in other.nodes {
            let key = node.key().clone();
            match self.index.get(&key) {
                Some(&idx) => {
                    self.nodes[idx].merge_from(node);
                    remap.push(idx);
                }
                None => {
                    let idx = self.nodes.len();
                    self.nodes.push(node);
                    self.index.insert(key, idx);
                    remap.push(idx);
                }
            }
        }
        for edge in other.edges {
            let ia = remap[edge.a];
            let ib = remap[edge.b];
            let pair = if ia <= ib { (ia, ib) } else { (ib, ia) };
            let edge_idx = match self.edge_index.get(&pair) {
                Some(&idx) => idx,
                None => {
                    let idx = self.edges.len();
                    self.edges.push(EdgeRecord {
                        a: pair.0,
                        b: pair.1,
                        labels: BTreeSet::new(),
                    });
                    self.edge_index.insert(pair, idx);
                    idx
                }
            };
            self.edges[edge_idx].labels.extend(edge.labels);
        }
    }
}

/// Protocol-level relationships between identified entities.
pub type LogicalGraph = NetworkGraph<LogicalNode>;
/// Link-layer topology between observed hosts.
pub type PhysicalGraph = NetworkGraph<PhysicalNode>;
