//! Frame decoding: raw capture bytes into `Packet` records.
//!
//! Hand-rolled header parsing over slices; nothing is copied until the final
//! payload extraction into the owned `Packet`. Truncated or inconsistent
//! headers produce `MalformedPacket` (counted upstream, never fatal);
//! ethertypes we carry no identity model for decode to `None` and are
//! skipped silently.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::SystemTime;

use remora_common::{
    LinkHeader, MacAddr, NetHeader, Packet, RemoraError, RemoraResult, Transport,
    TransportHeader,
};

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_ARP: u16 = 0x0806;
const ETHERTYPE_VLAN: u16 = 0x8100;
const ETHERTYPE_IPV6: u16 = 0x86dd;

/// Decode one Ethernet frame. `Ok(None)` means "valid but not ours".
pub fn decode_ethernet(
    index: u64,
    timestamp: SystemTime,
    data: &[u8],
) -> RemoraResult<Option<Packet>> {
    if data.len() < 14 {
        return Err(RemoraError::MalformedPacket(format!(
            "frame {index}: ethernet header truncated ({} bytes)",
            data.len()
        )));
    }

    let dst_mac = MacAddr([data[0], data[1], data[2], data[3], data[4], data[5]]);
    let src_mac = MacAddr([data[6], data[7], data[8], data[9], data[10], data[11]]);
    let mut ethertype = u16::from_be_bytes([data[12], data[13]]);
    let mut offset = 14;

    // Single 802.1Q tag; QinQ is out of decoding scope.
    if ethertype == ETHERTYPE_VLAN {
        if data.len() < 18 {
            return Err(RemoraError::MalformedPacket(format!(
                "frame {index}: vlan tag truncated"
            )));
        }
        ethertype = u16::from_be_bytes([data[16], data[17]]);
        offset = 18;
    }

    let link = LinkHeader {
        src_mac,
        dst_mac,
        ethertype,
    };
    let inner = &data[offset..];

    match ethertype {
        ETHERTYPE_IPV4 => decode_ipv4(index, timestamp, Some(link), inner).map(Some),
        ETHERTYPE_IPV6 => decode_ipv6(index, timestamp, Some(link), inner).map(Some),
        ETHERTYPE_ARP => decode_arp(index, timestamp, link, inner),
        _ => Ok(None),
    }
}

/// Decode a frame that begins directly with an IP header (raw-IP linktypes).
pub fn decode_raw_ip(
    index: u64,
    timestamp: SystemTime,
    data: &[u8],
) -> RemoraResult<Option<Packet>> {
    match data.first().map(|b| b >> 4) {
        Some(4) => decode_ipv4(index, timestamp, None, data).map(Some),
        Some(6) => decode_ipv6(index, timestamp, None, data).map(Some),
        _ => Err(RemoraError::MalformedPacket(format!(
            "frame {index}: raw-ip frame with unknown version"
        ))),
    }
}

fn decode_ipv4(
    index: u64,
    timestamp: SystemTime,
    link: Option<LinkHeader>,
    data: &[u8],
) -> RemoraResult<Packet> {
    let malformed =
        |what: &str| RemoraError::MalformedPacket(format!("frame {index}: {what}"));

    if data.len() < 20 {
        return Err(malformed("ipv4 header truncated"));
    }
    if data[0] >> 4 != 4 {
        return Err(malformed("ipv4 version field mismatch"));
    }
    let ihl = usize::from(data[0] & 0x0f) * 4;
    if ihl < 20 || data.len() < ihl {
        return Err(malformed("ipv4 header length inconsistent"));
    }
    let total_len = usize::from(u16::from_be_bytes([data[2], data[3]]));
    if total_len < ihl {
        return Err(malformed("ipv4 total length smaller than header"));
    }
    // Captures may truncate below total_len (snaplen); clamp to what exists.
    let end = total_len.min(data.len());

    let protocol = data[9];
    let net = NetHeader {
        src: IpAddr::V4(Ipv4Addr::new(data[12], data[13], data[14], data[15])),
        dst: IpAddr::V4(Ipv4Addr::new(data[16], data[17], data[18], data[19])),
        protocol,
        ttl: data[8],
    };
    decode_transport(index, timestamp, link, net, &data[ihl..end])
}

fn decode_ipv6(
    index: u64,
    timestamp: SystemTime,
    link: Option<LinkHeader>,
    data: &[u8],
) -> RemoraResult<Packet> {
    let malformed =
        |what: &str| RemoraError::MalformedPacket(format!("frame {index}: {what}"));

    if data.len() < 40 {
        return Err(malformed("ipv6 header truncated"));
    }
    if data[0] >> 4 != 6 {
        return Err(malformed("ipv6 version field mismatch"));
    }

    let mut src = [0u8; 16];
    src.copy_from_slice(&data[8..24]);
    let mut dst = [0u8; 16];
    dst.copy_from_slice(&data[24..40]);

    let net = NetHeader {
        src: IpAddr::V6(Ipv6Addr::from(src)),
        dst: IpAddr::V6(Ipv6Addr::from(dst)),
        // Extension-header chains are not walked; the next-header value
        // stands in for the transport protocol.
        protocol: data[6],
        ttl: data[7],
    };
    decode_transport(index, timestamp, link, net, &data[40..])
}

fn decode_transport(
    index: u64,
    timestamp: SystemTime,
    link: Option<LinkHeader>,
    net: NetHeader,
    data: &[u8],
) -> RemoraResult<Packet> {
    let malformed =
        |what: &str| RemoraError::MalformedPacket(format!("frame {index}: {what}"));

    let transport_kind = Transport::from_ip_protocol(net.protocol);
    let (transport, payload) = match transport_kind {
        Transport::Tcp => {
            if data.len() < 20 {
                return Err(malformed("tcp header truncated"));
            }
            let data_offset = usize::from(data[12] >> 4) * 4;
            if data_offset < 20 || data.len() < data_offset {
                return Err(malformed("tcp data offset inconsistent"));
            }
            (
                TransportHeader {
                    transport: Transport::Tcp,
                    src_port: u16::from_be_bytes([data[0], data[1]]),
                    dst_port: u16::from_be_bytes([data[2], data[3]]),
                    flags: data[13],
                },
                &data[data_offset..],
            )
        }
        Transport::Udp => {
            if data.len() < 8 {
                return Err(malformed("udp header truncated"));
            }
            (
                TransportHeader {
                    transport: Transport::Udp,
                    src_port: u16::from_be_bytes([data[0], data[1]]),
                    dst_port: u16::from_be_bytes([data[2], data[3]]),
                    flags: 0,
                },
                &data[8.min(data.len())..],
            )
        }
        other => (
            TransportHeader {
                transport: other,
                src_port: 0,
                dst_port: 0,
                flags: 0,
            },
            data,
        ),
    };

    Ok(Packet {
        index,
        timestamp,
        link,
        net: Some(net),
        transport: Some(transport),
        payload: payload.to_vec(),
    })
}

/// ARP over Ethernet/IPv4: yields the sender/target address bindings the
/// physical graph is built from. Other hardware/protocol combinations are
/// skipped rather than rejected.
fn decode_arp(
    index: u64,
    timestamp: SystemTime,
    link: LinkHeader,
    data: &[u8],
) -> RemoraResult<Option<Packet>> {
    if data.len() < 28 {
        return Err(RemoraError::MalformedPacket(format!(
            "frame {index}: arp body truncated"
        )));
    }
    let htype = u16::from_be_bytes([data[0], data[1]]);
    let ptype = u16::from_be_bytes([data[2], data[3]]);
    if htype != 1 || ptype != ETHERTYPE_IPV4 || data[4] != 6 || data[5] != 4 {
        return Ok(None);
    }

    let sender_ip = IpAddr::V4(Ipv4Addr::new(data[14], data[15], data[16], data[17]));
    let target_ip = IpAddr::V4(Ipv4Addr::new(data[24], data[25], data[26], data[27]));

    Ok(Some(Packet {
        index,
        timestamp,
        link: Some(link),
        net: Some(NetHeader {
            src: sender_ip,
            dst: target_ip,
            protocol: 0,
            ttl: 0,
        }),
        transport: Some(TransportHeader {
            transport: Transport::Arp,
            src_port: 0,
            dst_port: 0,
            flags: 0,
        }),
        payload: data[..28].to_vec(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ethernet_frame(ethertype: u16, inner: &[u8]) -> Vec<u8> {
        let mut frame = Vec::new();
        frame.extend_from_slice(&[0x02, 0, 0, 0, 0, 0x02]); // dst
        frame.extend_from_slice(&[0x02, 0, 0, 0, 0, 0x01]); // src
        frame.extend_from_slice(&ethertype.to_be_bytes());
        frame.extend_from_slice(inner);
        frame
    }

    fn ipv4_tcp(src: [u8; 4], dst: [u8; 4], sport: u16, dport: u16, payload: &[u8]) -> Vec<u8> {
        let total = 20 + 20 + payload.len();
        let mut p = vec![0u8; 40];
        p[0] = 0x45;
        p[2..4].copy_from_slice(&(total as u16).to_be_bytes());
        p[8] = 64; // ttl
        p[9] = 6; // tcp
        p[12..16].copy_from_slice(&src);
        p[16..20].copy_from_slice(&dst);
        p[20..22].copy_from_slice(&sport.to_be_bytes());
        p[22..24].copy_from_slice(&dport.to_be_bytes());
        p[32] = 0x50; // data offset 5
        p[33] = 0x18; // psh|ack
        p.extend_from_slice(payload);
        p
    }

    #[test]
    fn decodes_ipv4_tcp_with_payload() {
        let frame = ethernet_frame(
            ETHERTYPE_IPV4,
            &ipv4_tcp([10, 0, 0, 1], [10, 0, 0, 2], 49152, 80, b"GET / HTTP/1.1\r\n"),
        );
        let pkt = decode_ethernet(1, SystemTime::UNIX_EPOCH, &frame)
            .unwrap()
            .unwrap();
        let net = pkt.net.unwrap();
        assert_eq!(net.src, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
        let t = pkt.transport.unwrap();
        assert_eq!(t.transport, Transport::Tcp);
        assert_eq!((t.src_port, t.dst_port), (49152, 80));
        assert_eq!(pkt.payload, b"GET / HTTP/1.1\r\n");
        assert_eq!(pkt.link.unwrap().src_mac.to_string(), "02:00:00:00:00:01");
    }

    #[test]
    fn vlan_tagged_frame_decodes() {
        let mut inner = vec![0x00, 0x64, 0x08, 0x00]; // vlan 100 then ipv4
        inner.extend_from_slice(&ipv4_tcp([10, 0, 0, 1], [10, 0, 0, 2], 1000, 80, b"x"));
        let frame = ethernet_frame(ETHERTYPE_VLAN, &inner);
        let pkt = decode_ethernet(1, SystemTime::UNIX_EPOCH, &frame)
            .unwrap()
            .unwrap();
        assert_eq!(pkt.transport.unwrap().transport, Transport::Tcp);
    }

    #[test]
    fn truncated_ipv4_is_malformed() {
        let frame = ethernet_frame(ETHERTYPE_IPV4, &[0x45, 0x00, 0x00]);
        assert!(matches!(
            decode_ethernet(1, SystemTime::UNIX_EPOCH, &frame),
            Err(RemoraError::MalformedPacket(_))
        ));
    }

    #[test]
    fn bad_tcp_data_offset_is_malformed() {
        let mut inner = ipv4_tcp([10, 0, 0, 1], [10, 0, 0, 2], 1000, 80, b"");
        inner[32] = 0x20; // data offset 2 words: below tcp minimum
        let frame = ethernet_frame(ETHERTYPE_IPV4, &inner);
        assert!(decode_ethernet(1, SystemTime::UNIX_EPOCH, &frame).is_err());
    }

    #[test]
    fn unknown_ethertype_is_skipped_silently() {
        let frame = ethernet_frame(0x88cc, &[0u8; 32]); // lldp
        assert!(decode_ethernet(1, SystemTime::UNIX_EPOCH, &frame)
            .unwrap()
            .is_none());
    }

    #[test]
    fn arp_reply_yields_address_binding() {
        let mut arp = vec![
            0x00, 0x01, // ethernet
            0x08, 0x00, // ipv4
            6, 4, // hlen, plen
            0x00, 0x02, // reply
        ];
        arp.extend_from_slice(&[0x02, 0, 0, 0, 0, 0x01]); // sender mac
        arp.extend_from_slice(&[192, 168, 0, 1]); // sender ip
        arp.extend_from_slice(&[0x02, 0, 0, 0, 0, 0x02]); // target mac
        arp.extend_from_slice(&[192, 168, 0, 2]); // target ip

        let frame = ethernet_frame(ETHERTYPE_ARP, &arp);
        let pkt = decode_ethernet(1, SystemTime::UNIX_EPOCH, &frame)
            .unwrap()
            .unwrap();
        assert_eq!(pkt.transport.unwrap().transport, Transport::Arp);
        assert_eq!(
            pkt.net.unwrap().src,
            IpAddr::V4(Ipv4Addr::new(192, 168, 0, 1))
        );
    }

    #[test]
    fn icmp_decodes_without_ports() {
        let mut inner = vec![0u8; 20];
        inner[0] = 0x45;
        inner[2..4].copy_from_slice(&28u16.to_be_bytes());
        inner[8] = 64;
        inner[9] = 1; // icmp
        inner[12..16].copy_from_slice(&[10, 0, 0, 1]);
        inner[16..20].copy_from_slice(&[10, 0, 0, 2]);
        inner.extend_from_slice(&[8, 0, 0, 0, 0, 0, 0, 0]); // echo request
        let frame = ethernet_frame(ETHERTYPE_IPV4, &inner);
        let pkt = decode_ethernet(1, SystemTime::UNIX_EPOCH, &frame)
            .unwrap()
            .unwrap();
        let t = pkt.transport.unwrap();
        assert_eq!(t.transport, Transport::Icmp);
        assert_eq!((t.src_port, t.dst_port), (0, 0));
    }
}
