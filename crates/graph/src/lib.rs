//! Remora Graph - deduplicated, evidence-annotated network graphs
//!
//! Two views of the observed network share one container: the logical graph
//! (protocol relationships between network addresses) and the physical graph
//! (link-layer topology). Mutation happens only in the orchestrator's single
//! writer task; everything here is plain single-threaded data structure.

mod graph;
mod node;

pub use graph::{EdgeRecord, GraphNode, LogicalGraph, NetworkGraph, PhysicalGraph};
pub use node::{LogicalNode, PhysicalNode};
