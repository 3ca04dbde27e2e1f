//! Workflow storage adapters.

pub mod memory;

pub use memory::MemoryWorkflowRepository;
