//! Kubernetes resource builders for PullSubscriptions
//!
//! Pure functions that derive names and build the objects the controller
//! owns: the receive adapter Deployment and the EventType advertised to a
//! Broker sink.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, PodSpec, PodTemplateSpec, SecretVolumeSource, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, OwnerReference};
use kube::api::{ApiResource, DynamicObject, ObjectMeta};
use kube::core::GroupVersionKind;
use kube::{Resource, ResourceExt};
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::crd::{ModeType, PullSubscription};
use crate::ops::CREDENTIALS_MOUNT_PATH;

/// Pub/Sub limits subscription names to 255 characters
const MAX_SUBSCRIPTION_NAME: usize = 255;
const SUBSCRIPTION_PREFIX: &str = "cre-ps";

/// CloudEvents type emitted for every message received
pub const PUBLISH_EVENT_TYPE: &str = "com.google.cloud.pubsub.topic.publish";

/// Standard labels for resources owned by a PullSubscription
pub fn standard_labels(ps: &PullSubscription) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(
        "app.kubernetes.io/name".to_string(),
        "receive-adapter".to_string(),
    );
    labels.insert("app.kubernetes.io/instance".to_string(), label_value(&ps.name_any()));
    labels.insert(
        "app.kubernetes.io/managed-by".to_string(),
        "pubsub-k8s".to_string(),
    );
    labels.insert(
        "pubsub.k8s.dev/pullsubscription".to_string(),
        label_value(&ps.name_any()),
    );
    labels
}

fn label_value(value: &str) -> String {
    let truncated: String = value.chars().take(63).collect();
    truncated.trim_end_matches(['-', '.', '_']).to_string()
}

/// Create an OwnerReference for garbage collection
pub fn owner_reference(ps: &PullSubscription) -> OwnerReference {
    OwnerReference {
        api_version: PullSubscription::api_version(&()).to_string(),
        kind: PullSubscription::kind(&()).to_string(),
        name: ps.name_any(),
        uid: ps.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

fn short_hash(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update(b"/");
    }
    hex::encode(hasher.finalize())
}

/// Pub/Sub subscription name for an owner
///
/// A pure function of namespace, name and uid, so it never changes for the
/// lifetime of the owner and a recreated owner gets a fresh subscription.
pub fn subscription_name(ps: &PullSubscription) -> String {
    let namespace = ps.namespace().unwrap_or_else(|| "default".to_string());
    let name = ps.name_any();
    let uid = ps.metadata.uid.clone().unwrap_or_default();
    let hash = &short_hash(&[&namespace, &name, &uid])[..16];

    let readable = format!("{SUBSCRIPTION_PREFIX}_{namespace}_{name}");
    let room = MAX_SUBSCRIPTION_NAME - hash.len() - 1;
    let readable: String = readable.chars().take(room).collect();
    format!("{readable}_{hash}")
}

/// Name of the receive adapter Deployment
pub fn adapter_name(ps: &PullSubscription) -> String {
    let name: String = ps.name_any().chars().take(55).collect();
    format!("{}-adapter", name.trim_end_matches(['-', '.']))
}

/// Inputs for the receive adapter beyond the owner itself
#[derive(Clone, Debug)]
pub struct ReceiveAdapterArgs {
    pub image: String,
    pub project: String,
    pub subscription_id: String,
    pub sink_uri: String,
}

/// Build the receive adapter Deployment
pub fn make_receive_adapter(ps: &PullSubscription, args: &ReceiveAdapterArgs) -> Deployment {
    let labels = standard_labels(ps);
    let secret = ps.spec.effective_secret();
    let mode = ps.spec.effective_mode();

    let env = [
        ("PROJECT_ID", args.project.clone()),
        ("PUBSUB_TOPIC_ID", ps.spec.topic.clone()),
        ("PUBSUB_SUBSCRIPTION_ID", args.subscription_id.clone()),
        ("SINK_URI", args.sink_uri.clone()),
        ("SEND_MODE", send_mode(&mode).to_string()),
        (
            "GOOGLE_APPLICATION_CREDENTIALS",
            format!("{CREDENTIALS_MOUNT_PATH}/{}", secret.key),
        ),
        ("NAMESPACE", ps.namespace().unwrap_or_default()),
        ("NAME", ps.name_any()),
    ]
    .into_iter()
    .map(|(name, value)| EnvVar {
        name: name.to_string(),
        value: Some(value),
        ..Default::default()
    })
    .collect();

    let container = Container {
        name: "receive-adapter".to_string(),
        image: Some(args.image.clone()),
        env: Some(env),
        volume_mounts: Some(vec![VolumeMount {
            name: "google-cloud-key".to_string(),
            mount_path: CREDENTIALS_MOUNT_PATH.to_string(),
            read_only: Some(true),
            ..Default::default()
        }]),
        ..Default::default()
    };

    Deployment {
        metadata: ObjectMeta {
            name: Some(adapter_name(ps)),
            namespace: ps.namespace(),
            labels: Some(labels.clone()),
            owner_references: Some(vec![owner_reference(ps)]),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    service_account_name: ps.spec.service_account_name.clone(),
                    containers: vec![container],
                    volumes: Some(vec![Volume {
                        name: "google-cloud-key".to_string(),
                        secret: Some(SecretVolumeSource {
                            secret_name: Some(secret.name),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

fn send_mode(mode: &ModeType) -> &'static str {
    match mode {
        ModeType::CloudEventsBinary => "binary",
        ModeType::CloudEventsStructured => "structured",
        ModeType::PushCompatible => "push",
    }
}

/// API resource of Knative `EventType`
pub fn event_type_resource() -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk(
        "eventing.knative.dev",
        "v1beta1",
        "EventType",
    ))
}

/// CloudEvents source attribute for a topic
pub fn topic_source(project: &str, topic: &str) -> String {
    format!("//pubsub.googleapis.com/projects/{project}/topics/{topic}")
}

/// Build the EventType advertised to a Broker sink
///
/// Returns `None` when the sink is not a Broker.
pub fn make_event_type(ps: &PullSubscription, project: &str) -> Option<DynamicObject> {
    let broker = ps.spec.sink.reference.as_ref().filter(|r| r.kind == "Broker")?;
    let namespace = ps.namespace().unwrap_or_else(|| "default".to_string());
    let source = topic_source(project, &ps.spec.topic);
    let name = format!(
        "{}-{}",
        label_value(&ps.name_any()).chars().take(50).collect::<String>(),
        &short_hash(&[PUBLISH_EVENT_TYPE, &source])[..8]
    );

    let mut object = DynamicObject::new(&name, &event_type_resource())
        .within(&namespace)
        .data(json!({
            "spec": {
                "type": PUBLISH_EVENT_TYPE,
                "source": source,
                "broker": broker.name,
                "description": format!("Messages published to Pub/Sub topic {}", ps.spec.topic),
            }
        }));
    object.metadata.labels = Some(standard_labels(ps));
    object.metadata.owner_references = Some(vec![owner_reference(ps)]);
    Some(object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{Destination, KReference, PullSubscriptionSpec};

    fn subscription(name: &str, sink_kind: &str) -> PullSubscription {
        let mut ps = PullSubscription::new(
            name,
            PullSubscriptionSpec {
                project: Some("my-project".to_string()),
                topic: "orders".to_string(),
                secret: None,
                service_account_name: Some("adapter".to_string()),
                ack_deadline: None,
                retain_acked_messages: false,
                retention_duration: None,
                sink: Destination {
                    reference: Some(KReference {
                        api_version: "eventing.knative.dev/v1".to_string(),
                        kind: sink_kind.to_string(),
                        namespace: None,
                        name: "default".to_string(),
                    }),
                    uri: None,
                },
                mode: Some(ModeType::CloudEventsStructured),
            },
        );
        ps.metadata.namespace = Some("events".to_string());
        ps.metadata.uid = Some("b3c2a1".to_string());
        ps
    }

    #[test]
    fn test_subscription_name_is_deterministic() {
        let ps = subscription("orders", "Broker");
        let name = subscription_name(&ps);
        assert_eq!(name, subscription_name(&ps.clone()));
        assert!(name.starts_with("cre-ps_events_orders_"));

        let mut recreated = ps.clone();
        recreated.metadata.uid = Some("f00d".to_string());
        assert_ne!(name, subscription_name(&recreated));
    }

    #[test]
    fn test_subscription_name_fits_limit() {
        let ps = subscription(&"x".repeat(253), "Broker");
        let name = subscription_name(&ps);
        assert_eq!(name.len(), MAX_SUBSCRIPTION_NAME);
        assert!(name.starts_with("cre-ps_events_xxx"));
    }

    #[test]
    fn test_receive_adapter() {
        let ps = subscription("orders", "Broker");
        let deployment = make_receive_adapter(
            &ps,
            &ReceiveAdapterArgs {
                image: "adapter:1".to_string(),
                project: "my-project".to_string(),
                subscription_id: "cre-ps_events_orders_abc".to_string(),
                sink_uri: "http://broker.events.svc.cluster.local/".to_string(),
            },
        );

        assert_eq!(deployment.metadata.name.as_deref(), Some("orders-adapter"));
        assert_eq!(
            deployment.metadata.owner_references.as_ref().unwrap()[0].uid,
            "b3c2a1"
        );
        let spec = deployment.spec.unwrap();
        assert_eq!(spec.selector.match_labels, spec.template.metadata.unwrap().labels);
        let pod = spec.template.spec.unwrap();
        assert_eq!(pod.service_account_name.as_deref(), Some("adapter"));
        let env: BTreeMap<String, String> = pod.containers[0]
            .env
            .clone()
            .unwrap()
            .into_iter()
            .map(|e| (e.name, e.value.unwrap_or_default()))
            .collect();
        assert_eq!(env["PUBSUB_SUBSCRIPTION_ID"], "cre-ps_events_orders_abc");
        assert_eq!(env["SINK_URI"], "http://broker.events.svc.cluster.local/");
        assert_eq!(env["SEND_MODE"], "structured");
        assert_eq!(
            pod.volumes.unwrap()[0].secret.as_ref().unwrap().secret_name.as_deref(),
            Some("google-cloud-key")
        );
    }

    #[test]
    fn test_event_type_only_for_brokers() {
        assert!(make_event_type(&subscription("orders", "Service"), "p").is_none());

        let event_type = make_event_type(&subscription("orders", "Broker"), "p").unwrap();
        assert_eq!(event_type.metadata.namespace.as_deref(), Some("events"));
        assert_eq!(event_type.data["spec"]["type"], PUBLISH_EVENT_TYPE);
        assert_eq!(
            event_type.data["spec"]["source"],
            "//pubsub.googleapis.com/projects/p/topics/orders"
        );
        assert_eq!(event_type.data["spec"]["broker"], "default");
    }
}
