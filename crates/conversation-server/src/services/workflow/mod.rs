//! Per-query conversation workflow
//!
//! - `state`: nodes, edges and the ephemeral per-run state
//! - `graph`: shared definition and session-bound compiled instances
//! - `cache`: one compiled instance per live session

mod cache;
mod graph;
pub mod state;

pub use cache::WorkflowCache;
pub use graph::{CompiledWorkflow, WorkflowDefinition};
pub use state::{route_after_classify, Node, WorkflowOutcome, WorkflowState};
