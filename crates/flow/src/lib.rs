//! Remora Flow - session reconstruction and endpoint identity resolution
//!
//! Consumes the decoded packet stream in capture order, groups packets into
//! directional conversations keyed by normalized endpoint tuples, and
//! derives the canonical keys the graph builder deduplicates nodes by.

mod reconstructor;
mod resolver;

pub use reconstructor::{FlowPolicy, SessionReconstructor};
pub use resolver::IdentityResolver;
