//! Kubernetes API surface used by the reconciler
//!
//! Every write carries the resourceVersion it was computed from, so a
//! concurrent writer turns into a 409 instead of a lost update.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Event, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::{Api, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use serde_json::json;

use super::resources::event_type_resource;
use crate::config::FIELD_MANAGER;
use crate::crd::{PullSubscription, PullSubscriptionStatus};
use crate::error::{Error, Result};

/// Kubernetes event severity
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventType {
    Normal,
    Warning,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Normal => "Normal",
            EventType::Warning => "Warning",
        }
    }
}

/// An event to record against a PullSubscription
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventRecord {
    pub type_: EventType,
    pub reason: String,
    pub message: String,
}

impl EventRecord {
    pub fn normal(reason: &str, message: impl Into<String>) -> Self {
        Self {
            type_: EventType::Normal,
            reason: reason.to_string(),
            message: message.into(),
        }
    }

    pub fn warning(reason: &str, message: impl Into<String>) -> Self {
        Self {
            type_: EventType::Warning,
            reason: reason.to_string(),
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait KubeOps: Send + Sync {
    /// Newest copy of an owner, `None` once it is gone
    async fn get_subscription(&self, namespace: &str, name: &str)
        -> Result<Option<PullSubscription>>;

    /// All owners in a namespace, or cluster-wide for `None`
    async fn list_subscriptions(&self, namespace: Option<&str>) -> Result<Vec<PullSubscription>>;

    /// Write the status sub-resource; returns the updated object
    async fn update_status(
        &self,
        ps: &PullSubscription,
        status: &PullSubscriptionStatus,
    ) -> Result<PullSubscription>;

    /// Replace the finalizer list; returns the updated object
    async fn patch_finalizers(
        &self,
        ps: &PullSubscription,
        finalizers: &[String],
    ) -> Result<PullSubscription>;

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>>;

    async fn patch_secret_finalizers(&self, secret: &Secret, finalizers: &[String]) -> Result<()>;

    /// Server-side apply the receive adapter; returns the live object
    async fn apply_receive_adapter(&self, deployment: &Deployment) -> Result<Deployment>;

    async fn apply_event_type(&self, event_type: &DynamicObject) -> Result<()>;

    async fn publish_event(&self, ps: &PullSubscription, event: &EventRecord) -> Result<()>;
}

/// [`KubeOps`] against a live cluster
#[derive(Clone)]
pub struct KubeClientOps {
    client: Client,
}

impl KubeClientOps {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn subscriptions(&self, ps: &PullSubscription) -> Api<PullSubscription> {
        let namespace = ps.namespace().unwrap_or_else(|| "default".to_string());
        Api::namespaced(self.client.clone(), &namespace)
    }
}

/// Merge patch of `metadata.finalizers`, guarded by the read resourceVersion
pub fn finalizer_patch(resource_version: Option<&str>, finalizers: &[String]) -> serde_json::Value {
    json!({
        "metadata": {
            "finalizers": finalizers,
            "resourceVersion": resource_version,
        }
    })
}

#[async_trait]
impl KubeOps for KubeClientOps {
    async fn get_subscription(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PullSubscription>> {
        let api: Api<PullSubscription> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn list_subscriptions(&self, namespace: Option<&str>) -> Result<Vec<PullSubscription>> {
        let api: Api<PullSubscription> = match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        };
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn update_status(
        &self,
        ps: &PullSubscription,
        status: &PullSubscriptionStatus,
    ) -> Result<PullSubscription> {
        let patch = status_patch(ps.resource_version().as_deref(), status)?;
        Ok(self
            .subscriptions(ps)
            .patch_status(
                &ps.name_any(),
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&patch),
            )
            .await?)
    }

    async fn patch_finalizers(
        &self,
        ps: &PullSubscription,
        finalizers: &[String],
    ) -> Result<PullSubscription> {
        let patch = finalizer_patch(ps.resource_version().as_deref(), finalizers);
        Ok(self
            .subscriptions(ps)
            .patch(
                &ps.name_any(),
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&patch),
            )
            .await?)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn patch_secret_finalizers(&self, secret: &Secret, finalizers: &[String]) -> Result<()> {
        let namespace = secret.namespace().unwrap_or_else(|| "default".to_string());
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &namespace);
        let patch = finalizer_patch(secret.resource_version().as_deref(), finalizers);
        api.patch(
            &secret.name_any(),
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&patch),
        )
        .await?;
        Ok(())
    }

    async fn apply_receive_adapter(&self, deployment: &Deployment) -> Result<Deployment> {
        let namespace = deployment
            .namespace()
            .unwrap_or_else(|| "default".to_string());
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), &namespace);
        Ok(api
            .patch(
                &deployment.name_any(),
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(deployment),
            )
            .await?)
    }

    async fn apply_event_type(&self, event_type: &DynamicObject) -> Result<()> {
        let namespace = event_type
            .namespace()
            .unwrap_or_else(|| "default".to_string());
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), &namespace, &event_type_resource());
        api.patch(
            &event_type.name_any(),
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(event_type),
        )
        .await?;
        Ok(())
    }

    async fn publish_event(&self, ps: &PullSubscription, record: &EventRecord) -> Result<()> {
        let namespace = ps.namespace().unwrap_or_else(|| "default".to_string());
        let events: Api<Event> = Api::namespaced(self.client.clone(), &namespace);

        let time = chrono::Utc::now();
        let event = Event {
            metadata: kube::api::ObjectMeta {
                generate_name: Some(format!("{}-", ps.name_any())),
                ..Default::default()
            },
            type_: Some(record.type_.as_str().to_string()),
            reason: Some(record.reason.clone()),
            message: Some(record.message.clone()),
            involved_object: ps.object_ref(&()),
            first_timestamp: Some(Time(time)),
            last_timestamp: Some(Time(time)),
            count: Some(1),
            reporting_component: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };

        events
            .create(&PostParams::default(), &event)
            .await
            .map_err(Error::KubeError)?;
        Ok(())
    }
}

/// Merge patch for the status sub-resource
///
/// Unset fields are sent as `null`: a merge patch leaves absent keys
/// untouched, so omitting them would keep stale values in the cluster.
pub fn status_patch(
    resource_version: Option<&str>,
    status: &PullSubscriptionStatus,
) -> Result<serde_json::Value> {
    let mut body = serde_json::to_value(status)?;
    if let Some(fields) = body.as_object_mut() {
        for key in ["observedGeneration", "sinkUri", "subscriptionId", "projectId"] {
            fields.entry(key).or_insert(serde_json::Value::Null);
        }
    }
    Ok(json!({
        "metadata": { "resourceVersion": resource_version },
        "status": body,
    }))
}
