//! Session reconstruction from the ordered packet stream.
//!
//! Packets arrive in capture order, interleaved across flows. Each packet is
//! assigned to the flow whose normalized key it carries; the first packet of
//! a key fixes the initiator, every later packet is tagged with its
//! direction relative to that. Flows finalize at end of capture, or earlier
//! under the configured policy (transport-level termination, idle timeout).

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use tracing::trace;
use uuid::Uuid;

use remora_common::{
    tcp_flags, Endpoint, FlowKey, Packet, Session, SessionPacket, Transport,
};

/// When a flow is finalized before end of capture.
///
/// The exact trigger is deliberately configuration, not a fixed rule: the
/// capture boundary owns time, the reconstructor only applies policy.
#[derive(Debug, Clone, Copy)]
pub struct FlowPolicy {
    /// Finalize a flow when this much capture time passes with no packet,
    /// so a reused port pair becomes a new session.
    pub idle_timeout: Option<Duration>,
    /// Finalize a TCP flow when a FIN or RST is observed.
    pub finalize_on_fin: bool,
}

impl Default for FlowPolicy {
    fn default() -> Self {
        // End-of-capture finalize only.
        Self {
            idle_timeout: None,
            finalize_on_fin: false,
        }
    }
}

struct SessionBuilder {
    key: FlowKey,
    initiator: Endpoint,
    responder: Endpoint,
    packets: Vec<SessionPacket>,
    last_seen: SystemTime,
}

impl SessionBuilder {
    fn finalize(self) -> Session {
        Session {
            id: Uuid::new_v4(),
            key: self.key,
            initiator: self.initiator,
            responder: self.responder,
            packets: self.packets,
        }
    }
}

/// Groups decoded packets into directional conversations.
///
/// Must consume the capture on a single logical stream: flow assignment and
/// finalize timing both depend on arrival order.
pub struct SessionReconstructor {
    policy: FlowPolicy,
    active: HashMap<FlowKey, SessionBuilder>,
    /// First-seen order of active flows; drained in this order at `finish`
    /// so output is deterministic for a given capture.
    order: Vec<FlowKey>,
    malformed: u64,
}

impl SessionReconstructor {
    #[must_use]
    pub fn new(policy: FlowPolicy) -> Self {
        Self {
            policy,
            active: HashMap::new(),
            order: Vec::new(),
            malformed: 0,
        }
    }

    /// Consume one packet in capture order. Returns any sessions the policy
    /// finalized as a result.
    pub fn push(&mut self, packet: Packet) -> Vec<Session> {
        let Some(net) = packet.net else {
            // No network identity to key a flow on.
            self.malformed += 1;
            trace!(frame = packet.index, "dropping packet without network header");
            return Vec::new();
        };

        let (src, dst) = endpoints(&packet, net.src, net.dst);
        let key = FlowKey::new(&src, &dst, packet.transport_kind());
        let mut finalized = Vec::new();

        // Idle flows end before the new packet joins, so a reused endpoint
        // pair starts a fresh session.
        if let (Some(idle), Some(existing)) = (self.policy.idle_timeout, self.active.get(&key)) {
            let gap = packet
                .timestamp
                .duration_since(existing.last_seen)
                .unwrap_or(Duration::ZERO);
            if gap > idle {
                if let Some(expired) = self.remove(&key) {
                    finalized.push(expired.finalize());
                }
            }
        }

        let fin_observed = self.policy.finalize_on_fin
            && packet.transport_kind() == Some(Transport::Tcp)
            && packet
                .transport
                .is_some_and(|t| t.flags & (tcp_flags::FIN | tcp_flags::RST) != 0);

        let builder = self.active.entry(key).or_insert_with(|| {
            self.order.push(key);
            SessionBuilder {
                key,
                initiator: src,
                responder: dst,
                packets: Vec::new(),
                last_seen: packet.timestamp,
            }
        });

        let from_initiator = same_endpoint(&src, &builder.initiator);
        // A later packet may carry link-layer detail the first one lacked.
        if from_initiator {
            merge_mac(&mut builder.initiator, &src);
            merge_mac(&mut builder.responder, &dst);
        } else {
            merge_mac(&mut builder.initiator, &dst);
            merge_mac(&mut builder.responder, &src);
        }

        builder.last_seen = packet.timestamp;
        builder.packets.push(SessionPacket {
            packet,
            from_initiator,
        });

        if fin_observed {
            if let Some(done) = self.remove(&key) {
                finalized.push(done.finalize());
            }
        }

        finalized
    }

    /// End of capture: finalize every remaining flow, first-seen order.
    pub fn finish(&mut self) -> Vec<Session> {
        let order = std::mem::take(&mut self.order);
        order
            .into_iter()
            .filter_map(|key| self.active.remove(&key))
            .map(SessionBuilder::finalize)
            .collect()
    }

    /// Packets dropped for lacking flow identity.
    #[must_use]
    pub fn malformed_count(&self) -> u64 {
        self.malformed
    }

    fn remove(&mut self, key: &FlowKey) -> Option<SessionBuilder> {
        self.order.retain(|k| k != key);
        self.active.remove(key)
    }
}

fn endpoints(packet: &Packet, src: std::net::IpAddr, dst: std::net::IpAddr) -> (Endpoint, Endpoint) {
    // Port zero on a portless transport is an encoding artifact, not identity.
    let (src_port, dst_port) = match packet.transport {
        Some(t) if t.transport.has_ports() => (Some(t.src_port), Some(t.dst_port)),
        _ => (None, None),
    };
    let mut src_ep = Endpoint::new(src, src_port);
    let mut dst_ep = Endpoint::new(dst, dst_port);
    if let Some(link) = packet.link {
        // Group addresses are delivery mechanics, not host identity.
        if !link.src_mac.is_multicast() {
            src_ep = src_ep.with_mac(link.src_mac);
        }
        if !link.dst_mac.is_multicast() {
            dst_ep = dst_ep.with_mac(link.dst_mac);
        }
    }
    (src_ep, dst_ep)
}

fn same_endpoint(a: &Endpoint, b: &Endpoint) -> bool {
    a.addr == b.addr && a.port == b.port
}

fn merge_mac(target: &mut Endpoint, observed: &Endpoint) {
    if target.mac.is_none() {
        target.mac = observed.mac;
    }
}
