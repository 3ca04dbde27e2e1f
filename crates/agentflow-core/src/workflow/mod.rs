//! Workflow engine core: validation, resolution, dispatch, and scheduling.
//!
//! This module contains the "brain" of the workflow engine:
//! - `dag` -- graph validation (unique ids, known deps, acyclicity)
//! - `template` -- execution context and `{{...}}` placeholder resolution
//! - `condition` -- JEXL evaluator for step skip conditions
//! - `step_runner` -- per-type step dispatch to the collaborator ports
//! - `retry` -- bounded retry-with-backoff around one step's dispatch
//! - `scheduler` -- frontier-based concurrent DAG execution
//! - `service` -- the workflow CRUD + execute surface

pub mod condition;
pub mod dag;
pub mod retry;
pub mod scheduler;
pub mod service;
pub mod step_runner;
pub mod template;
