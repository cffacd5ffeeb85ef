//! Remora Matcher - fingerprint evaluation over reconstructed sessions
//!
//! Stateless by construction: matching is a pure function of one session and
//! the shared immutable catalog, which is what makes per-session matching
//! embarrassingly parallel in the orchestrator.

mod engine;

pub use engine::match_session;
