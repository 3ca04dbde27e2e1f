//! Graph validation for workflow step lists.
//!
//! Uses `petgraph` to model step dependencies as a directed graph and
//! topological sort to detect cycles. Validation is a pure check: it runs
//! on create and on update (when `steps` changes), before anything is
//! persisted, and never at execution time.

use std::collections::HashMap;

use agentflow_types::workflow::WorkflowStep;
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use thiserror::Error;

/// Structural errors in a submitted step list.
///
/// Any of these rejects the workflow definition outright; nothing is stored.
#[derive(Debug, Error)]
pub enum GraphError {
    /// A step has an empty id.
    #[error("step at position {0} has an empty id")]
    EmptyId(usize),

    /// Two steps share the same id.
    #[error("duplicate step id: '{0}'")]
    DuplicateId(String),

    /// A `depends_on` entry names a step that does not exist.
    #[error("step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },

    /// The dependency relation contains a cycle.
    #[error("cycle detected involving step '{0}'")]
    CycleDetected(String),
}

/// Validate that steps form a valid DAG.
///
/// Checks, in order: non-empty unique ids, every `depends_on` entry names
/// an existing id, and a topological sort fully orders all steps (no
/// cycles). An empty step list is valid.
pub fn validate_steps(steps: &[WorkflowStep]) -> Result<(), GraphError> {
    let mut id_to_idx: HashMap<&str, usize> = HashMap::with_capacity(steps.len());
    for (i, step) in steps.iter().enumerate() {
        if step.id.is_empty() {
            return Err(GraphError::EmptyId(i));
        }
        if id_to_idx.insert(step.id.as_str(), i).is_some() {
            return Err(GraphError::DuplicateId(step.id.clone()));
        }
    }

    // Edge from dependency -> dependent
    let mut graph = DiGraph::<&str, ()>::new();
    let node_indices: Vec<_> = steps.iter().map(|s| graph.add_node(s.id.as_str())).collect();

    for step in steps {
        let to_idx = id_to_idx[step.id.as_str()];
        for dep in &step.depends_on {
            let from_idx =
                id_to_idx
                    .get(dep.as_str())
                    .ok_or_else(|| GraphError::UnknownDependency {
                        step: step.id.clone(),
                        dependency: dep.clone(),
                    })?;
            graph.add_edge(node_indices[*from_idx], node_indices[to_idx], ());
        }
    }

    toposort(&graph, None).map_err(|cycle| {
        let node_id = graph[cycle.node_id()];
        GraphError::CycleDetected(node_id.to_string())
    })?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
