//! Pipeline planning and execution.
//!
//! This module provides:
//! - Stage plans derived from project settings
//! - The orchestrator that drives a project through its stages
//! - Retry of transient stage failures

mod orchestrator;
mod plan;
mod retry;

pub use orchestrator::{Orchestrator, RunOutcome};
pub use plan::{RequiredOutput, RunPlan, StagePlan};
pub use retry::{with_retry_if, BackoffStrategy, JitterStrategy, RetryConfig};
