//! Lease based leader election
//!
//! Only the replica holding the `coordination.k8s.io/v1` Lease runs the
//! controller. Leadership is published on a watch channel so the caller can
//! start on acquisition and shut down on loss.

use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;
use kube::api::{Api, ObjectMeta, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use tokio::sync::watch;
use tracing::{info, warn};

pub const LEASE_NAME: &str = "pubsub-k8s-controller-leader";
const LEASE_DURATION_SECS: i32 = 15;
const RENEW_INTERVAL: Duration = Duration::from_secs(10);
const RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// What to do with a lease we observed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LeaseDecision {
    /// We hold it
    Renew,
    /// Nobody holds it, or the holder stopped renewing
    TakeOver,
    /// Someone else holds it
    Wait,
}

pub fn decide(lease: &Lease, identity: &str, now: DateTime<Utc>) -> LeaseDecision {
    let spec = lease.spec.as_ref();
    let holder = spec.and_then(|s| s.holder_identity.as_deref());
    if holder == Some(identity) {
        return LeaseDecision::Renew;
    }
    if holder.map(str::is_empty).unwrap_or(true) {
        return LeaseDecision::TakeOver;
    }

    let expired = spec
        .and_then(|s| s.renew_time.as_ref())
        .map(|renew| {
            let duration = spec
                .and_then(|s| s.lease_duration_seconds)
                .unwrap_or(LEASE_DURATION_SECS);
            now > renew.0 + chrono::Duration::seconds(i64::from(duration))
        })
        .unwrap_or(true);

    if expired {
        LeaseDecision::TakeOver
    } else {
        LeaseDecision::Wait
    }
}

/// Keep trying to acquire or renew the lease, forever
///
/// `leader` carries whether this replica currently holds the lease.
pub async fn run_leader_election(
    client: Client,
    namespace: String,
    identity: String,
    leader: watch::Sender<bool>,
) {
    let leases: Api<Lease> = Api::namespaced(client, &namespace);

    loop {
        let held = match try_acquire_or_renew(&leases, &namespace, &identity).await {
            Ok(held) => held,
            Err(e) => {
                warn!("Leader election error: {:?}", e);
                false
            }
        };

        let was_leader = *leader.borrow();
        if held && !was_leader {
            info!("Acquired leadership for lease {}", LEASE_NAME);
        } else if !held && was_leader {
            warn!("Lost leadership for lease {}", LEASE_NAME);
        }
        leader.send_replace(held);

        tokio::time::sleep(if held { RENEW_INTERVAL } else { RETRY_INTERVAL }).await;
    }
}

async fn try_acquire_or_renew(
    leases: &Api<Lease>,
    namespace: &str,
    identity: &str,
) -> Result<bool, kube::Error> {
    let now = Utc::now();

    let Some(existing) = leases.get_opt(LEASE_NAME).await? else {
        let lease = Lease {
            metadata: ObjectMeta {
                name: Some(LEASE_NAME.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: Some(identity.to_string()),
                acquire_time: Some(MicroTime(now)),
                renew_time: Some(MicroTime(now)),
                lease_duration_seconds: Some(LEASE_DURATION_SECS),
                ..Default::default()
            }),
        };
        return match leases.create(&PostParams::default(), &lease).await {
            Ok(_) => {
                info!("Created lease {} with holder {}", LEASE_NAME, identity);
                Ok(true)
            }
            // Another replica created it first
            Err(kube::Error::Api(e)) if e.code == 409 => Ok(false),
            Err(e) => Err(e),
        };
    };

    let patch = match decide(&existing, identity, now) {
        LeaseDecision::Wait => return Ok(false),
        LeaseDecision::Renew => serde_json::json!({
            "spec": {
                "renewTime": MicroTime(now),
                "leaseDurationSeconds": LEASE_DURATION_SECS,
            }
        }),
        LeaseDecision::TakeOver => {
            info!(
                "Lease held by {:?} has expired, taking over",
                existing.spec.as_ref().and_then(|s| s.holder_identity.as_deref())
            );
            // Guarded by resourceVersion so only one replica wins the takeover
            serde_json::json!({
                "metadata": { "resourceVersion": existing.resource_version() },
                "spec": {
                    "holderIdentity": identity,
                    "acquireTime": MicroTime(now),
                    "renewTime": MicroTime(now),
                    "leaseDurationSeconds": LEASE_DURATION_SECS,
                }
            })
        }
    };

    match leases
        .patch(LEASE_NAME, &PatchParams::default(), &Patch::Merge(&patch))
        .await
    {
        Ok(_) => Ok(true),
        Err(kube::Error::Api(e)) if e.code == 409 => Ok(false),
        Err(e) => Err(e),
    }
}
