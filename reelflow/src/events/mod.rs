//! Live progress reporting.
//!
//! Events are pushed to subscribers as they happen and never replayed.
//! Observers that reconnect or fall behind resynchronize by reading the
//! project state.

mod broadcaster;

pub use broadcaster::{
    ProgressBroadcaster, ProgressSubscription, SubscriptionError, DEFAULT_BROADCAST_CAPACITY,
};
