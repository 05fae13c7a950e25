//! Workflow graph to execution plan compilation.

mod compiler;
pub mod types;

pub use compiler::{FLAT_PHASE, INTAKE_PHASE, QUALITY_GATE_PHASE, compile};
pub use types::{EdgeType, ExecutionPlan, GraphEdge, GraphNode, Phase, WorkflowGraph};

#[cfg(test)]
mod tests;
