//! pubsub-k8s: Kubernetes controller for Cloud Pub/Sub pull subscriptions
//!
//! A `PullSubscription` declares a Pub/Sub topic to subscribe to and a sink
//! to deliver messages to. The controller provisions the subscription,
//! deploys a receive adapter that pulls from it, registers event types with
//! Broker sinks and tears the subscription down again on deletion.

pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod ops;
pub mod pubsub;

#[cfg(feature = "rest-api")]
pub mod rest_api;

#[cfg(test)]
pub(crate) mod testing;

pub use crate::error::{Error, Result};
