//! Workflow execution engine for Agentflow.
//!
//! This crate defines the "ports" (collaborator traits) that the
//! infrastructure layer implements -- tool registry, inference backend,
//! and the workflow repository -- plus the engine itself: graph
//! validation, template/condition resolution, retry control, and the
//! DAG scheduler. It depends only on `agentflow-types` -- never on a
//! database or network crate.

pub mod llm;
pub mod repository;
pub mod tool;
pub mod workflow;
