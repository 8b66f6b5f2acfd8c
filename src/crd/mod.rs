//! Custom Resource Definitions for PubSub-K8s
//!
//! This module defines the PullSubscription CRD and the types it is built from.

pub mod duration;
mod pull_subscription;
pub mod types;


pub use pull_subscription::{
    format_validation_errors, validate_update, PullSubscription, PullSubscriptionSpec,
    PullSubscriptionStatus, SpecValidationError, DEFAULT_ACK_DEADLINE,
    DEFAULT_RETENTION_DURATION,
};
pub use types::*;
