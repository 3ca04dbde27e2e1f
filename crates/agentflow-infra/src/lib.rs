//! Infrastructure adapters for Agentflow.
//!
//! Concrete implementations of the ports defined in `agentflow-core`.
//! Currently a single storage backend: an in-memory repository suitable
//! for embedding the engine in a host process and for tests.

pub mod workflow;
