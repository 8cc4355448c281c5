//! Cooperative cancellation of pipeline runs.
//!
//! This module provides:
//! - CancellationToken, one per run, polled at stage checkpoints
//! - CancellationController, the per-project registry of active tokens

mod controller;
mod token;

pub use controller::{CancellationController, CANCEL_REQUESTED};
pub use token::CancellationToken;
