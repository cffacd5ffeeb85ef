//! Remora Common - shared types for the passive network mapper
//!
//! This crate provides the data model every other remora crate consumes:
//! decoded packets, reconstructed sessions, fingerprint match results, the
//! canonical graph keys, and the run-wide error taxonomy.

pub mod error;
pub mod types;

// Re-export commonly used types
pub use error::{RemoraError, RemoraResult};
pub use types::{
    tcp_flags, Endpoint, EndpointRole, FlowKey, LinkHeader, LogicalKey, MacAddr, MatchResult,
    NetHeader, Packet, PhysicalKey, Session, SessionPacket, Transport, TransportHeader,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
