//! Capture ingestion: PCAP/PCAP-NG reading and link/network/transport
//! header decoding into the shared [`Packet`](remora_common::Packet) model.

pub mod decode;
pub mod reader;

pub use decode::{decode_ethernet, decode_raw_ip};
pub use reader::PcapSource;
