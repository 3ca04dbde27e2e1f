//! Shared domain types for Agentflow.
//!
//! This crate contains the workflow domain types used across the platform:
//! workflow definitions, execution records, inference turn shapes, and
//! their associated error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod error;
pub mod llm;
pub mod workflow;
