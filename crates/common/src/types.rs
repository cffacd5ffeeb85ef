//! Core data types shared across the remora pipeline.
//!
//! Everything here is produced once (by capture decoding or session
//! reconstruction) and then read-only for the rest of the run, so the types
//! favor plain public fields over accessors and keep allocations out of the
//! per-packet paths where possible.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::time::SystemTime;
use uuid::Uuid;

/// Transport-layer protocol of a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Transport {
    Tcp,
    Udp,
    Icmp,
    /// Not a transport, but ARP conversations still key flows and feed the
    /// physical graph.
    Arp,
    /// Any other IP protocol, carried by number.
    Other(u8),
}

impl Transport {
    #[inline]
    #[must_use]
    pub fn from_ip_protocol(proto: u8) -> Self {
        match proto {
            6 => Transport::Tcp,
            17 => Transport::Udp,
            1 | 58 => Transport::Icmp,
            other => Transport::Other(other),
        }
    }

    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Transport::Tcp => "tcp",
            Transport::Udp => "udp",
            Transport::Icmp => "icmp",
            Transport::Arp => "arp",
            Transport::Other(_) => "ip",
        }
    }

    /// TCP and UDP carry ports; nothing else we decode does.
    #[inline]
    #[must_use]
    pub const fn has_ports(&self) -> bool {
        matches!(self, Transport::Tcp | Transport::Udp)
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Other(n) => write!(f, "ip-proto-{n}"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// A link-layer hardware address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const BROADCAST: MacAddr = MacAddr([0xff; 6]);

    #[inline]
    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    /// Group bit set: multicast or broadcast, never a host identity.
    #[inline]
    #[must_use]
    pub const fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            m[0], m[1], m[2], m[3], m[4], m[5]
        )
    }
}

/// Link-layer header fields extracted from a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkHeader {
    pub src_mac: MacAddr,
    pub dst_mac: MacAddr,
    pub ethertype: u16,
}

/// Network-layer header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetHeader {
    pub src: IpAddr,
    pub dst: IpAddr,
    pub protocol: u8,
    pub ttl: u8,
}

/// Transport-layer header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportHeader {
    pub transport: Transport,
    pub src_port: u16,
    pub dst_port: u16,
    /// TCP flag byte; zero for everything else.
    pub flags: u8,
}

/// TCP flag bits used by the finalize policy.
pub mod tcp_flags {
    pub const FIN: u8 = 0x01;
    pub const SYN: u8 = 0x02;
    pub const RST: u8 = 0x04;
    pub const ACK: u8 = 0x10;
}

/// One decoded frame from the capture. Read-only once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Packet {
    /// 1-based frame number in capture order.
    pub index: u64,
    pub timestamp: SystemTime,
    pub link: Option<LinkHeader>,
    pub net: Option<NetHeader>,
    pub transport: Option<TransportHeader>,
    /// Application payload (after the deepest decoded header).
    pub payload: Vec<u8>,
}

impl Packet {
    #[inline]
    #[must_use]
    pub fn transport_kind(&self) -> Option<Transport> {
        self.transport.map(|t| t.transport)
    }
}

/// One side of a conversation as observed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub addr: IpAddr,
    pub port: Option<u16>,
    /// Hardware address, when link-layer visibility exists.
    pub mac: Option<MacAddr>,
}

impl Endpoint {
    #[inline]
    #[must_use]
    pub fn new(addr: IpAddr, port: Option<u16>) -> Self {
        Self {
            addr,
            port,
            mac: None,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_mac(mut self, mac: MacAddr) -> Self {
        self.mac = Some(mac);
        self
    }

    /// Orderable identity tuple used for flow-key normalization.
    #[inline]
    fn sort_key(&self) -> (IpAddr, Option<u16>) {
        (self.addr, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(p) => write!(f, "{}:{}", self.addr, p),
            None => write!(f, "{}", self.addr),
        }
    }
}

/// Normalized, direction-independent flow identity.
///
/// A request and its response resolve to the same key: the two (addr, port)
/// pairs are stored in sorted order, so `FlowKey::new(a, b, t)` equals
/// `FlowKey::new(b, a, t)`. MAC addresses are deliberately excluded from the
/// key; they are observational detail, not flow identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowKey {
    lo_addr: IpAddr,
    lo_port: Option<u16>,
    hi_addr: IpAddr,
    hi_port: Option<u16>,
    pub transport: Option<Transport>,
}

impl FlowKey {
    #[must_use]
    pub fn new(a: &Endpoint, b: &Endpoint, transport: Option<Transport>) -> Self {
        let (lo, hi) = if a.sort_key() <= b.sort_key() {
            (a, b)
        } else {
            (b, a)
        };
        Self {
            lo_addr: lo.addr,
            lo_port: lo.port,
            hi_addr: hi.addr,
            hi_port: hi.port,
            transport,
        }
    }
}

/// Which end of a session a statement refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EndpointRole {
    Initiator,
    Responder,
}

impl EndpointRole {
    #[inline]
    #[must_use]
    pub const fn other(&self) -> Self {
        match self {
            EndpointRole::Initiator => EndpointRole::Responder,
            EndpointRole::Responder => EndpointRole::Initiator,
        }
    }
}

/// A packet inside a session, tagged with its direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionPacket {
    pub packet: Packet,
    /// True when the sender is the endpoint that opened the flow.
    pub from_initiator: bool,
}

/// A finalized conversation: all packets sharing one normalized flow key.
///
/// Immutable once emitted by the reconstructor. The initiator is whichever
/// endpoint sent the first packet observed for the key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub key: FlowKey,
    pub initiator: Endpoint,
    pub responder: Endpoint,
    pub packets: Vec<SessionPacket>,
}

impl Session {
    #[inline]
    #[must_use]
    pub fn endpoint(&self, role: EndpointRole) -> &Endpoint {
        match role {
            EndpointRole::Initiator => &self.initiator,
            EndpointRole::Responder => &self.responder,
        }
    }

    #[inline]
    #[must_use]
    pub fn transport(&self) -> Option<Transport> {
        self.key.transport
    }
}

/// A successful fingerprint evaluation against one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResult {
    pub fingerprint_id: String,
    pub label: String,
    pub category: String,
    pub confidence: u8,
    /// Endpoint asserted to be the identified entity, when the fingerprint
    /// declares one.
    pub role: Option<EndpointRole>,
    /// Which of the fingerprint's alternative sequences matched.
    pub sequence_index: usize,
    /// Total payload bytes consumed by the matching sequence (tie-break
    /// evidence: more bytes = more specific).
    pub bytes_matched: usize,
}

/// Canonical identity of a logical-graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LogicalKey(pub IpAddr);

impl fmt::Display for LogicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Canonical identity of a physical-graph node.
///
/// The observed/inferred split is part of the type so downstream consumers
/// can never conflate a hardware address we saw on the wire with one we only
/// derived from network-layer visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PhysicalKey {
    /// Link-layer address actually present in the capture.
    Observed(MacAddr),
    /// No link-layer visibility; identity inferred from the network address.
    Inferred(IpAddr),
}

impl PhysicalKey {
    #[inline]
    #[must_use]
    pub const fn is_observed(&self) -> bool {
        matches!(self, PhysicalKey::Observed(_))
    }
}

impl fmt::Display for PhysicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhysicalKey::Observed(mac) => write!(f, "{mac}"),
            PhysicalKey::Inferred(addr) => write!(f, "inferred:{addr}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ep(a: [u8; 4], port: u16) -> Endpoint {
        Endpoint::new(IpAddr::V4(Ipv4Addr::from(a)), Some(port))
    }

    #[test]
    fn flow_key_is_direction_independent() {
        let a = ep([10, 0, 0, 1], 49152);
        let b = ep([10, 0, 0, 2], 80);
        let k1 = FlowKey::new(&a, &b, Some(Transport::Tcp));
        let k2 = FlowKey::new(&b, &a, Some(Transport::Tcp));
        assert_eq!(k1, k2);
    }

    #[test]
    fn flow_key_distinguishes_transports() {
        let a = ep([10, 0, 0, 1], 53);
        let b = ep([10, 0, 0, 2], 53);
        let tcp = FlowKey::new(&a, &b, Some(Transport::Tcp));
        let udp = FlowKey::new(&a, &b, Some(Transport::Udp));
        assert_ne!(tcp, udp);
    }

    #[test]
    fn flow_key_ignores_mac() {
        let a = ep([10, 0, 0, 1], 1234);
        let b = ep([10, 0, 0, 2], 80);
        let a_mac = a.with_mac(MacAddr([1, 2, 3, 4, 5, 6]));
        assert_eq!(
            FlowKey::new(&a, &b, Some(Transport::Tcp)),
            FlowKey::new(&a_mac, &b, Some(Transport::Tcp))
        );
    }

    #[test]
    fn transport_from_protocol_number() {
        assert_eq!(Transport::from_ip_protocol(6), Transport::Tcp);
        assert_eq!(Transport::from_ip_protocol(17), Transport::Udp);
        assert_eq!(Transport::from_ip_protocol(47), Transport::Other(47));
        assert!(!Transport::Icmp.has_ports());
    }

    #[test]
    fn mac_display_and_broadcast() {
        let mac = MacAddr([0xde, 0xad, 0xbe, 0xef, 0x00, 0x01]);
        assert_eq!(mac.to_string(), "de:ad:be:ef:00:01");
        assert!(MacAddr::BROADCAST.is_broadcast());
        assert!(MacAddr::BROADCAST.is_multicast());
        assert!(!mac.is_multicast());
    }

    #[test]
    fn physical_key_preserves_inference_marker() {
        let observed = PhysicalKey::Observed(MacAddr([0; 6]));
        let inferred = PhysicalKey::Inferred(IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert!(observed.is_observed());
        assert!(!inferred.is_observed());
        assert!(inferred.to_string().starts_with("inferred:"));
    }
}
