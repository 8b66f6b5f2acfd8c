//! HTTP handlers for the REST API

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use kube::ResourceExt;
use tracing::{error, instrument};

use crate::controller::Context;

use super::dto::{
    ErrorResponse, HealthResponse, SubscriptionDetailResponse, SubscriptionListResponse,
    SubscriptionSummary,
};

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Health check endpoint
#[instrument]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Metrics endpoint handler
#[cfg(feature = "metrics")]
pub async fn metrics() -> Result<String, StatusCode> {
    use prometheus_client::encoding::text::encode;

    let mut buffer = String::new();
    encode(&mut buffer, &crate::controller::metrics::REGISTRY).map_err(|e| {
        error!("Failed to encode metrics: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok(buffer)
}

/// List the PullSubscriptions the controller watches
#[instrument(skip(ctx))]
pub async fn list_subscriptions(
    State(ctx): State<Arc<Context>>,
) -> Result<Json<SubscriptionListResponse>, ApiError> {
    match ctx
        .kube
        .list_subscriptions(ctx.config.watch_namespace.as_deref())
        .await
    {
        Ok(subscriptions) => {
            let mut items: Vec<SubscriptionSummary> =
                subscriptions.iter().map(SubscriptionSummary::from).collect();
            items.sort_by(|a, b| (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name)));

            let total = items.len();
            Ok(Json(SubscriptionListResponse { items, total }))
        }
        Err(e) => {
            error!("Failed to list PullSubscriptions: {:?}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("list_failed", &e.to_string())),
            ))
        }
    }
}

/// Get a specific PullSubscription
#[instrument(skip(ctx), fields(name = %name, namespace = %namespace))]
pub async fn get_subscription(
    State(ctx): State<Arc<Context>>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<SubscriptionDetailResponse>, ApiError> {
    match ctx.kube.get_subscription(&namespace, &name).await {
        Ok(Some(ps)) => Ok(Json(SubscriptionDetailResponse {
            name: ps.name_any(),
            namespace: ps.namespace().unwrap_or_default(),
            spec: ps.spec.clone(),
            status: ps.status.clone().unwrap_or_default(),
            created_at: ps.metadata.creation_timestamp.map(|t| t.0.to_rfc3339()),
        })),
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new(
                "not_found",
                &format!("PullSubscription {}/{} not found", namespace, name),
            )),
        )),
        Err(e) => {
            error!("Failed to get PullSubscription {}/{}: {:?}", namespace, name, e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("get_failed", &e.to_string())),
            ))
        }
    }
}
