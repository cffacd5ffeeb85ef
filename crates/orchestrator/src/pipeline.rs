//! Pipeline - capture ingestion, flow reconstruction, matching and graph
//! assembly, coordinated across a fixed worker pool.
//!
//! Stage layout: one blocking reader task drains the capture and feeds
//! finalized sessions into a bounded queue; worker tasks pop sessions and
//! run the matcher; a single writer task owns both graphs so evidence
//! accumulation never needs node-level locking. Every session carries its
//! emission sequence number and the writer replays results in that order,
//! so graph insertion order depends only on the capture, not on which
//! worker finishes first.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

use remora_capture::PcapSource;
use remora_catalog::FingerprintCatalog;
use remora_common::{EndpointRole, MatchResult, Session};
use remora_flow::{FlowPolicy, IdentityResolver, SessionReconstructor};
use remora_graph::{LogicalGraph, PhysicalGraph};
use remora_matcher::match_session;

use crate::stats::RunStats;

/// Tuning knobs for a pipeline run.
#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    /// Matcher worker tasks.
    pub workers: usize,
    /// Bounded depth of the session queue between reader and workers.
    pub session_queue_depth: usize,
    pub flow: FlowPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism().map_or(4, usize::from),
            session_queue_depth: 256,
            flow: FlowPolicy::default(),
        }
    }
}

/// Everything a run produces: both graphs and the counters.
pub struct RunReport {
    pub logical: LogicalGraph,
    pub physical: PhysicalGraph,
    pub stats: RunStats,
}

struct ReaderStats {
    packets: u64,
    malformed: u64,
}

/// Pipeline coordinates one capture-to-graphs run over a shared catalog.
pub struct Pipeline {
    catalog: Arc<FingerprintCatalog>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(catalog: Arc<FingerprintCatalog>, config: PipelineConfig) -> Self {
        Self { catalog, config }
    }

    /// Drain the source to exhaustion and build both graphs.
    pub async fn run(&self, source: PcapSource) -> Result<RunReport> {
        info!(
            fingerprints = self.catalog.len(),
            workers = self.config.workers,
            "starting pipeline"
        );

        let (session_tx, session_rx) =
            mpsc::channel::<(u64, Session)>(self.config.session_queue_depth);
        let session_rx = Arc::new(Mutex::new(session_rx));
        let (update_tx, mut update_rx) =
            mpsc::unbounded_channel::<(u64, Session, Vec<MatchResult>)>();

        let flow_policy = self.config.flow;
        let reader = tokio::task::spawn_blocking(move || -> Result<ReaderStats> {
            let mut source = source;
            let mut flows = SessionReconstructor::new(flow_policy);
            let mut packets = 0u64;
            let mut malformed = 0u64;
            let mut seq = 0u64;
            loop {
                match source.next_packet() {
                    Ok(Some(packet)) => {
                        packets += 1;
                        for session in flows.push(packet) {
                            if session_tx.blocking_send((seq, session)).is_err() {
                                anyhow::bail!("session queue closed before end of capture");
                            }
                            seq += 1;
                        }
                    }
                    Ok(None) => break,
                    Err(e) if !e.is_fatal() => {
                        malformed += 1;
                        debug!(frame = source.frames_read(), error = %e, "dropped frame");
                    }
                    Err(e) => return Err(e).context("reading capture"),
                }
            }
            // End of capture finalizes every still-open flow.
            for session in flows.finish() {
                if session_tx.blocking_send((seq, session)).is_err() {
                    break;
                }
                seq += 1;
            }
            malformed += flows.malformed_count();
            Ok(ReaderStats { packets, malformed })
        });

        let mut workers = Vec::new();
        for _ in 0..self.config.workers.max(1) {
            let session_rx = Arc::clone(&session_rx);
            let catalog = Arc::clone(&self.catalog);
            let update_tx = update_tx.clone();
            workers.push(tokio::spawn(async move {
                loop {
                    // Hold the lock only for the pop, not the match.
                    let session = { session_rx.lock().await.recv().await };
                    let Some((seq, session)) = session else { break };
                    let matches = match_session(&session, &catalog);
                    if update_tx.send((seq, session, matches)).is_err() {
                        break;
                    }
                }
            }));
        }
        drop(update_tx);

        let writer = tokio::spawn(async move {
            let mut logical = LogicalGraph::new();
            let mut physical = PhysicalGraph::new();
            let mut stats = RunStats::default();
            // Results arrive in worker-completion order; hold back anything
            // early and apply strictly by sequence number.
            let mut pending = BTreeMap::new();
            let mut next = 0u64;
            while let Some((seq, session, matches)) = update_rx.recv().await {
                pending.insert(seq, (session, matches));
                while let Some((session, matches)) = pending.remove(&next) {
                    apply_session(&mut logical, &mut physical, &mut stats, &session, &matches);
                    next += 1;
                }
            }
            (logical, physical, stats)
        });

        let reader_stats = reader.await.context("reader task panicked")??;
        for worker in workers {
            worker.await.context("matcher task panicked")?;
        }
        let (logical, physical, mut stats) =
            writer.await.context("graph writer task panicked")?;

        stats.packets = reader_stats.packets;
        stats.malformed_packets = reader_stats.malformed;
        stats.log_summary();

        Ok(RunReport {
            logical,
            physical,
            stats,
        })
    }
}

/// Fold one matched session into both graphs.
///
/// Evidence only accumulates: nodes are upserted, never removed, and match
/// results always raise counters on the node they attribute to. A match
/// carrying no role hint attributes to both endpoints.
fn apply_session(
    logical: &mut LogicalGraph,
    physical: &mut PhysicalGraph,
    stats: &mut RunStats,
    session: &Session,
    matches: &[MatchResult],
) {
    stats.sessions += 1;
    if !matches.is_empty() {
        stats.matched_sessions += 1;
    }
    stats.match_results += matches.len() as u64;

    let initiator = IdentityResolver::logical_key(session, EndpointRole::Initiator);
    let responder = IdentityResolver::logical_key(session, EndpointRole::Responder);
    match (initiator, responder) {
        (Ok(a), Ok(b)) => {
            logical.upsert(a).observe();
            logical.upsert(b).observe();
            let label = match matches.first() {
                Some(best) => best.label.clone(),
                None => session
                    .transport()
                    .map_or_else(|| "unknown".to_string(), |t| t.as_str().to_string()),
            };
            logical.connect(&a, &b, &label);
            for result in matches {
                match result.role {
                    Some(EndpointRole::Initiator) => logical.upsert(a).apply_match(result),
                    Some(EndpointRole::Responder) => logical.upsert(b).apply_match(result),
                    None => {
                        logical.upsert(a).apply_match(result);
                        logical.upsert(b).apply_match(result);
                    }
                }
            }
        }
        _ => {
            stats.unattributed_sessions += 1;
            debug!(session = %session.id, "session endpoints unattributable");
        }
    }

    let phys_a = IdentityResolver::physical_key(session, EndpointRole::Initiator);
    let phys_b = IdentityResolver::physical_key(session, EndpointRole::Responder);
    for (role, key) in [
        (EndpointRole::Initiator, &phys_a),
        (EndpointRole::Responder, &phys_b),
    ] {
        if let Ok(key) = key {
            let node = physical.upsert(*key);
            node.bind_address(session.endpoint(role).addr);
            node.observe();
        }
    }
    // An inferred endpoint has no observed interface, so a link between the
    // two cannot be claimed from the capture alone.
    if let (Ok(a), Ok(b)) = (&phys_a, &phys_b) {
        if a.is_observed() && b.is_observed() && a != b {
            physical.connect(a, b, "adjacency");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use uuid::Uuid;

    use remora_common::{
        Endpoint, FlowKey, MacAddr, MatchResult, Session, SessionPacket, Transport,
    };

    fn endpoint(last_octet: u8, port: u16, mac: Option<MacAddr>) -> Endpoint {
        let ep = Endpoint::new(
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, last_octet)),
            Some(port),
        );
        match mac {
            Some(mac) => ep.with_mac(mac),
            None => ep,
        }
    }

    fn session(initiator: Endpoint, responder: Endpoint) -> Session {
        let key = FlowKey::new(&initiator, &responder, Some(Transport::Tcp));
        Session {
            id: Uuid::new_v4(),
            key,
            initiator,
            responder,
            packets: Vec::<SessionPacket>::new(),
        }
    }

    fn result(label: &str, role: Option<EndpointRole>) -> MatchResult {
        MatchResult {
            fingerprint_id: format!("{label}-id"),
            label: label.to_string(),
            category: "test".to_string(),
            confidence: 3,
            role,
            sequence_index: 0,
            bytes_matched: 4,
        }
    }

    #[test]
    fn matched_session_labels_edge_and_attributes_role_endpoint() {
        let mut logical = LogicalGraph::new();
        let mut physical = PhysicalGraph::new();
        let mut stats = RunStats::default();
        let s = session(endpoint(1, 40000, None), endpoint(2, 80, None));
        let matches = vec![result("http-server", Some(EndpointRole::Responder))];

        apply_session(&mut logical, &mut physical, &mut stats, &s, &matches);

        assert_eq!(logical.len(), 2);
        let edge = logical.edges().next().unwrap();
        assert!(edge.labels.contains("http-server"));

        let responder_key = remora_common::LogicalKey(s.responder.addr);
        let node = logical.get(&responder_key).unwrap();
        assert!(node.labels.contains("http-server"));
        let initiator_key = remora_common::LogicalKey(s.initiator.addr);
        assert!(logical.get(&initiator_key).unwrap().labels.is_empty());
        assert_eq!(stats.matched_sessions, 1);
    }

    #[test]
    fn unmatched_session_edge_labeled_by_transport() {
        let mut logical = LogicalGraph::new();
        let mut physical = PhysicalGraph::new();
        let mut stats = RunStats::default();
        let s = session(endpoint(1, 40000, None), endpoint(2, 80, None));

        apply_session(&mut logical, &mut physical, &mut stats, &s, &[]);

        let edge = logical.edges().next().unwrap();
        assert!(edge.labels.contains("tcp"));
        assert_eq!(stats.matched_sessions, 0);
        assert_eq!(stats.sessions, 1);
    }

    #[test]
    fn roleless_match_attributes_both_endpoints() {
        let mut logical = LogicalGraph::new();
        let mut physical = PhysicalGraph::new();
        let mut stats = RunStats::default();
        let s = session(endpoint(1, 5000, None), endpoint(2, 5000, None));
        let matches = vec![result("modbus", None)];

        apply_session(&mut logical, &mut physical, &mut stats, &s, &matches);

        for node in logical.iter() {
            assert!(node.labels.contains("modbus"));
        }
    }

    #[test]
    fn unresolvable_endpoints_count_as_unattributed() {
        let mut logical = LogicalGraph::new();
        let mut physical = PhysicalGraph::new();
        let mut stats = RunStats::default();
        // DHCP-style discover before the client has an address.
        let a = Endpoint::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), Some(68));
        let b = Endpoint::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), Some(67));
        let s = session(a, b);

        apply_session(&mut logical, &mut physical, &mut stats, &s, &[]);

        assert_eq!(stats.sessions, 1);
        assert_eq!(stats.unattributed_sessions, 1);
        assert!(logical.is_empty());
        assert!(physical.is_empty());
    }

    #[test]
    fn physical_edge_requires_both_macs_observed() {
        let mac_a = MacAddr([0x02, 0, 0, 0, 0, 1]);
        let mac_b = MacAddr([0x02, 0, 0, 0, 0, 2]);

        let mut logical = LogicalGraph::new();
        let mut physical = PhysicalGraph::new();
        let mut stats = RunStats::default();

        // One MAC observed: nodes exist, no adjacency edge.
        let s = session(endpoint(1, 1234, Some(mac_a)), endpoint(2, 80, None));
        apply_session(&mut logical, &mut physical, &mut stats, &s, &[]);
        assert_eq!(physical.len(), 2);
        assert_eq!(physical.edges().count(), 0);

        // Both observed: edge appears.
        let s = session(endpoint(3, 1234, Some(mac_a)), endpoint(4, 80, Some(mac_b)));
        apply_session(&mut logical, &mut physical, &mut stats, &s, &[]);
        assert_eq!(physical.edges().count(), 1);
    }

    #[test]
    fn repeated_sessions_accumulate_on_one_node() {
        let mut logical = LogicalGraph::new();
        let mut physical = PhysicalGraph::new();
        let mut stats = RunStats::default();
        let server = endpoint(2, 80, None);
        for i in 0..3u8 {
            let s = session(endpoint(10 + i, 40000, None), server.clone());
            apply_session(
                &mut logical,
                &mut physical,
                &mut stats,
                &s,
                &[result("http-server", Some(EndpointRole::Responder))],
            );
        }
        let key = remora_common::LogicalKey(server.addr);
        let node = logical.get(&key).unwrap();
        assert_eq!(node.sessions, 3);
        assert_eq!(node.evidence, 3);
        assert_eq!(logical.len(), 4);
        assert_eq!(stats.sessions, 3);
    }
}
