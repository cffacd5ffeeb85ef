//! Run accounting

use tracing::info;

/// Counters accumulated across a pipeline run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunStats {
    /// Frames decoded into packets.
    pub packets: u64,
    /// Frames dropped at the capture or flow boundary.
    pub malformed_packets: u64,
    /// Sessions produced by flow reconstruction.
    pub sessions: u64,
    /// Sessions with at least one fingerprint match.
    pub matched_sessions: u64,
    /// Total match results across all sessions.
    pub match_results: u64,
    /// Sessions whose endpoints could not be attributed to a logical node.
    pub unattributed_sessions: u64,
}

impl RunStats {
    pub fn log_summary(&self) {
        info!("Run summary:");
        info!("  Packets decoded: {}", self.packets);
        info!("  Malformed frames: {}", self.malformed_packets);
        info!("  Sessions: {}", self.sessions);
        info!("  Matched sessions: {}", self.matched_sessions);
        info!("  Match results: {}", self.match_results);
        info!("  Unattributed sessions: {}", self.unattributed_sessions);
        if self.sessions > 0 {
            info!(
                "  Match rate: {:.1}%",
                (self.matched_sessions as f64 / self.sessions as f64) * 100.0
            );
        }
    }
}
