//! Logical and physical node types.
//!
//! Evidence on a node only ever accumulates. Absence of a label means "not
//! yet observed", never "disproved", so nothing here removes anything.

use serde::Serialize;
use std::collections::BTreeSet;
use std::net::IpAddr;

use remora_common::{LogicalKey, MatchResult, PhysicalKey};

use crate::graph::GraphNode;

/// A protocol-level network entity, keyed by network address.
#[derive(Debug, Clone, Serialize)]
pub struct LogicalNode {
    pub key: LogicalKey,
    /// Identity labels from matched fingerprints ("HTTP", "Siemens S7", ...).
    pub labels: BTreeSet<String>,
    /// Category groupings of those fingerprints ("protocol", "ics", ...).
    pub categories: BTreeSet<String>,
    pub fingerprint_ids: BTreeSet<String>,
    /// Number of fingerprint matches attributed to this node.
    pub evidence: u64,
    /// Number of sessions this node participated in, matched or not.
    pub sessions: u64,
}

impl LogicalNode {
    /// Accumulate one fingerprint match. Labels only grow.
    pub fn apply_match(&mut self, result: &MatchResult) {
        self.labels.insert(result.label.clone());
        self.categories.insert(result.category.clone());
        self.fingerprint_ids.insert(result.fingerprint_id.clone());
        self.evidence += 1;
    }

    /// Record participation in a session without asserting an identity.
    pub fn observe(&mut self) {
        self.sessions += 1;
    }
}

impl GraphNode for LogicalNode {
    type Key = LogicalKey;

    fn fresh(key: LogicalKey) -> Self {
        Self {
            key,
            labels: BTreeSet::new(),
            categories: BTreeSet::new(),
            fingerprint_ids: BTreeSet::new(),
            evidence: 0,
            sessions: 0,
        }
    }

    fn key(&self) -> &LogicalKey {
        &self.key
    }

    fn merge_from(&mut self, other: Self) {
        self.labels.extend(other.labels);
        self.categories.extend(other.categories);
        self.fingerprint_ids.extend(other.fingerprint_ids);
        self.evidence += other.evidence;
        self.sessions += other.sessions;
    }
}

/// A link-layer entity, keyed by observed hardware address or, failing that,
/// by network address explicitly marked as inferred.
#[derive(Debug, Clone, Serialize)]
pub struct PhysicalNode {
    pub key: PhysicalKey,
    /// Network-layer addresses seen bound to this hardware identity.
    pub addresses: BTreeSet<IpAddr>,
    /// Number of sessions this node participated in.
    pub sessions: u64,
}

impl PhysicalNode {
    /// Bind a network address to this hardware identity.
    pub fn bind_address(&mut self, addr: IpAddr) {
        self.addresses.insert(addr);
    }

    pub fn observe(&mut self) {
        self.sessions += 1;
    }
}

impl GraphNode for PhysicalNode {
    type Key = PhysicalKey;

    fn fresh(key: PhysicalKey) -> Self {
        Self {
            key,
            addresses: BTreeSet::new(),
            sessions: 0,
        }
    }

    fn key(&self) -> &PhysicalKey {
        &self.key
    }

    fn merge_from(&mut self, other: Self) {
        self.addresses.extend(other.addresses);
        self.sessions += other.sessions;
    }
}
