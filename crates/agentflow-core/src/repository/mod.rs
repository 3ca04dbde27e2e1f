//! Repository trait definitions ("ports") implemented by agentflow-infra.

pub mod workflow;

pub use workflow::WorkflowRepository;
