//! REST API module for external integrations
//!
//! Provides a read-only HTTP API for querying PullSubscriptions, plus the
//! health and metrics endpoints.

mod dto;
mod handlers;
mod server;

pub use dto::{
    ErrorResponse, HealthResponse, SubscriptionDetailResponse, SubscriptionListResponse,
    SubscriptionSummary,
};
pub use server::{router, run_server};
