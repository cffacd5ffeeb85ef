//! Remora Orchestrator - capture-to-graphs pipeline coordination
//!
//! Wires the capture reader, flow reconstruction, match engine and graph
//! builders into one bounded-queue pipeline with a fixed worker pool.

mod pipeline;
mod stats;

pub use pipeline::{Pipeline, PipelineConfig, RunReport};
pub use stats::RunStats;

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::net::{IpAddr, Ipv4Addr};
    use std::path::PathBuf;
    use std::sync::Arc;

    use remora_capture::PcapSource;
    use remora_catalog::{parse_definitions, FingerprintCatalog};
    use remora_common::LogicalKey;

    fn ethernet_ipv4_tcp(
        src_mac: [u8; 6],
        dst_mac: [u8; 6],
        src: [u8; 4],
        dst: [u8; 4],
        sport: u16,
        dport: u16,
        payload: &[u8],
    ) -> Vec<u8> {
        let mut frame = Vec::new();
        frame.extend_from_slice(&dst_mac);
        frame.extend_from_slice(&src_mac);
        frame.extend_from_slice(&0x0800u16.to_be_bytes());

        let total = 20 + 20 + payload.len();
        let mut ip = vec![0u8; 40];
        ip[0] = 0x45;
        ip[2..4].copy_from_slice(&(total as u16).to_be_bytes());
        ip[8] = 64;
        ip[9] = 6;
        ip[12..16].copy_from_slice(&src);
        ip[16..20].copy_from_slice(&dst);
        ip[20..22].copy_from_slice(&sport.to_be_bytes());
        ip[22..24].copy_from_slice(&dport.to_be_bytes());
        ip[32] = 0x50;
        ip[33] = 0x18; // psh|ack
        ip.extend_from_slice(payload);

        frame.extend_from_slice(&ip);
        frame
    }

    /// Minimal legacy pcap: global header plus one record per frame.
    fn write_pcap(frames: &[Vec<u8>]) -> PathBuf {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0xa1b2_c3d4u32.to_le_bytes());
        bytes.extend_from_slice(&2u16.to_le_bytes());
        bytes.extend_from_slice(&4u16.to_le_bytes());
        bytes.extend_from_slice(&0i32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&65535u32.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes()); // ethernet

        for (i, frame) in frames.iter().enumerate() {
            bytes.extend_from_slice(&(1_700_000_000u32 + i as u32).to_le_bytes());
            bytes.extend_from_slice(&0u32.to_le_bytes());
            bytes.extend_from_slice(&(frame.len() as u32).to_le_bytes());
            bytes.extend_from_slice(&(frame.len() as u32).to_le_bytes());
            bytes.extend_from_slice(frame);
        }

        let path =
            std::env::temp_dir().join(format!("remora-e2e-{}.pcap", uuid::Uuid::new_v4()));
        fs::write(&path, bytes).unwrap();
        path
    }

    fn http_catalog() -> Arc<FingerprintCatalog> {
        let text = r#"{
            "id": "http-get",
            "label": "HTTP",
            "category": "protocol",
            "confidence": 5,
            "transport": "tcp",
            "sequences": [
                { "rules": [ { "at": 0, "ascii": "GET " } ] }
            ]
        }"#;
        let fps = parse_definitions(text, "inline").unwrap();
        Arc::new(FingerprintCatalog::from_fingerprints(fps).unwrap())
    }

    #[tokio::test]
    async fn capture_to_graphs_end_to_end() {
        let mac_a = [0x02, 0, 0, 0, 0, 0x01];
        let mac_b = [0x02, 0, 0, 0, 0, 0x02];
        let frames = vec![
            ethernet_ipv4_tcp(
                mac_a,
                mac_b,
                [10, 0, 0, 1],
                [10, 0, 0, 2],
                49152,
                80,
                b"GET / HTTP/1.1\r\nHost: example\r\n\r\n",
            ),
            ethernet_ipv4_tcp(
                mac_b,
                mac_a,
                [10, 0, 0, 2],
                [10, 0, 0, 1],
                80,
                49152,
                b"HTTP/1.1 200 OK\r\n\r\n",
            ),
        ];
        let path = write_pcap(&frames);

        let pipeline = Pipeline::new(http_catalog(), PipelineConfig::default());
        let source = PcapSource::open(&path).unwrap();
        let report = pipeline.run(source).await.unwrap();
        let _ = fs::remove_file(&path);

        assert_eq!(report.stats.packets, 2);
        assert_eq!(report.stats.sessions, 1);
        assert_eq!(report.stats.matched_sessions, 1);
        assert_eq!(report.stats.malformed_packets, 0);

        // Both hosts appear, with the GET attributed to its sender.
        assert_eq!(report.logical.len(), 2);
        let client = report
            .logical
            .get(&LogicalKey(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))))
            .unwrap();
        assert!(client.labels.contains("HTTP"));
        let edge = report.logical.edges().next().unwrap();
        assert!(edge.labels.contains("HTTP"));

        // Both MACs were on the wire, so the physical link is observed.
        assert_eq!(report.physical.len(), 2);
        assert_eq!(report.physical.edges().count(), 1);
        for node in report.physical.iter() {
            assert!(node.key.is_observed());
            assert_eq!(node.addresses.len(), 1);
        }
    }

    #[tokio::test]
    async fn node_order_is_stable_across_worker_counts_and_runs() {
        // Many single-packet flows from distinct hosts; workers finish in
        // whatever order the scheduler picks, but the graphs must come out
        // in capture order every time.
        let filler = vec![b'x'; 2048];
        let mut frames = Vec::new();
        for i in 0..40u8 {
            let mut payload = b"GET /index.html HTTP/1.1\r\n".to_vec();
            payload.extend_from_slice(&filler);
            frames.push(ethernet_ipv4_tcp(
                [0x02, 0, 0, 0, 1, i],
                [0x02, 0, 0, 0, 2, i],
                [10, 0, 1, i + 1],
                [10, 0, 2, i + 1],
                40000 + u16::from(i),
                80,
                &payload,
            ));
        }
        let path = write_pcap(&frames);

        let catalog = http_catalog();
        let config = PipelineConfig {
            workers: 8,
            ..PipelineConfig::default()
        };
        let mut orders: Vec<Vec<LogicalKey>> = Vec::new();
        for _ in 0..5 {
            let pipeline = Pipeline::new(Arc::clone(&catalog), config);
            let source = PcapSource::open(&path).unwrap();
            let report = pipeline.run(source).await.unwrap();
            orders.push(report.logical.iter().map(|n| n.key).collect());
        }
        let _ = fs::remove_file(&path);

        // First flow's endpoints insert first.
        assert_eq!(orders[0][0], LogicalKey(IpAddr::V4(Ipv4Addr::new(10, 0, 1, 1))));
        assert_eq!(orders[0][1], LogicalKey(IpAddr::V4(Ipv4Addr::new(10, 0, 2, 1))));
        assert_eq!(orders[0].len(), 80);
        for order in &orders[1..] {
            assert_eq!(order, &orders[0], "logical node order diverged");
        }
    }

    #[tokio::test]
    async fn empty_capture_produces_empty_graphs() {
        let path = write_pcap(&[]);
        let pipeline = Pipeline::new(http_catalog(), PipelineConfig::default());
        let source = PcapSource::open(&path).unwrap();
        let report = pipeline.run(source).await.unwrap();
        let _ = fs::remove_file(&path);

        assert_eq!(report.stats.packets, 0);
        assert!(report.logical.is_empty());
        assert!(report.physical.is_empty());
    }
}
