//! Remora Catalog - fingerprint definitions and their indexed store
//!
//! This crate owns the declarative fingerprint model (byte-pattern rules,
//! rule sequences, transport scoping), the immutable-after-load catalog the
//! match engine evaluates against, and the JSON definition loader.

mod catalog;
mod loader;
pub mod model;

pub use catalog::FingerprintCatalog;
pub use loader::{load_catalog, parse_definitions};
pub use model::{ByteTest, Fingerprint, Offset, RoleHint, Rule, RuleSequence};
