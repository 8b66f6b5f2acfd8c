//! Sink resolution
//!
//! Turns a [`Destination`] into the URI the receive adapter delivers to.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use kube::api::{Api, ApiResource, DynamicObject};
use kube::core::GroupVersionKind;
use kube::Client;
use reqwest::Url;
use tracing::debug;

use crate::crd::{Destination, KReference};
use crate::error::{Error, Result};

/// Resolves a destination to an absolute URI
#[async_trait]
pub trait SinkResolver: Send + Sync {
    async fn resolve(&self, destination: &Destination, namespace: &str) -> Result<String>;
}

/// Cluster-local address of a Service
pub fn service_url(name: &str, namespace: &str) -> String {
    format!("http://{name}.{namespace}.svc.cluster.local/")
}

/// Resolve `uri` relative to `base`
pub fn join_uri(base: &str, uri: Option<&str>) -> Result<String> {
    let base = Url::parse(base)
        .map_err(|e| Error::SinkResolution(format!("invalid address {base:?}: {e}")))?;
    match uri {
        None => Ok(base.to_string()),
        Some(relative) => base
            .join(relative)
            .map(|u| u.to_string())
            .map_err(|e| Error::SinkResolution(format!("invalid uri {relative:?}: {e}"))),
    }
}

/// Resolve a destination that carries no reference
fn absolute_uri(destination: &Destination) -> Result<String> {
    let uri = destination
        .uri
        .as_deref()
        .ok_or_else(|| Error::SinkResolution("sink has neither ref nor uri".to_string()))?;
    let parsed = Url::parse(uri)
        .map_err(|e| Error::SinkResolution(format!("sink uri {uri:?} is not absolute: {e}")))?;
    Ok(parsed.to_string())
}

/// Resolves references against the Kubernetes API
pub struct KubeSinkResolver {
    client: Client,
}

impl KubeSinkResolver {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn address_of(&self, reference: &KReference, namespace: &str) -> Result<String> {
        if reference.kind == "Service" && reference.api_version == "v1" {
            let services: Api<Service> = Api::namespaced(self.client.clone(), namespace);
            return match services.get_opt(&reference.name).await? {
                Some(_) => Ok(service_url(&reference.name, namespace)),
                None => Err(Error::SinkNotReady(format!(
                    "Service {namespace}/{} not found",
                    reference.name
                ))),
            };
        }

        let (group, version) = match reference.api_version.split_once('/') {
            Some((g, v)) => (g, v),
            None => ("", reference.api_version.as_str()),
        };
        let gvk = GroupVersionKind::gvk(group, version, &reference.kind);
        let resource = ApiResource::from_gvk(&gvk);
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), namespace, &resource);

        let object = api.get_opt(&reference.name).await?.ok_or_else(|| {
            Error::SinkNotReady(format!(
                "{} {namespace}/{} not found",
                reference.kind, reference.name
            ))
        })?;
        object
            .data
            .pointer("/status/address/url")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                Error::SinkNotReady(format!(
                    "{} {namespace}/{} does not have an address yet",
                    reference.kind, reference.name
                ))
            })
    }
}

#[async_trait]
impl SinkResolver for KubeSinkResolver {
    async fn resolve(&self, destination: &Destination, namespace: &str) -> Result<String> {
        let Some(reference) = &destination.reference else {
            return absolute_uri(destination);
        };
        let namespace = reference.namespace.as_deref().unwrap_or(namespace);
        let address = self.address_of(reference, namespace).await?;
        debug!("Resolved {} {} to {}", reference.kind, reference.name, address);
        join_uri(&address, destination.uri.as_deref())
    }
}
