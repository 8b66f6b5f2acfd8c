//! Finalizer handling for PullSubscription cleanup
//!
//! Two finalizers are managed here:
//! 1. The owner finalizer keeps a PullSubscription around until its Pub/Sub
//!    subscription is confirmed deleted.
//! 2. The secret guard keeps the shared credentials Secret around while any
//!    PullSubscription in the namespace still references it.
//!
//! The secret is the only object shared between owners. Every mutation of
//! its finalizers re-reads the secret and the referencing owners first and
//! is sent with the read resourceVersion, retrying on conflict.

use kube::ResourceExt;
use tracing::{debug, info, warn};

use super::kube_ops::KubeOps;
use crate::crd::PullSubscription;
use crate::error::{Error, Result};

/// Finalizer protecting PullSubscription resources
pub const PULL_SUBSCRIPTION_FINALIZER: &str = "pubsub.k8s.dev/finalizer";

/// Finalizer protecting a credentials Secret referenced by PullSubscriptions
pub const SECRET_FINALIZER: &str = "pubsub.k8s.dev/secret-protection";

const MAX_CONFLICT_RETRIES: usize = 3;

pub fn has_finalizer(finalizers: &[String], name: &str) -> bool {
    finalizers.iter().any(|f| f == name)
}

/// The finalizer list with `name` appended if missing
pub fn with_finalizer(finalizers: &[String], name: &str) -> Vec<String> {
    let mut updated = finalizers.to_vec();
    if !has_finalizer(finalizers, name) {
        updated.push(name.to_string());
    }
    updated
}

/// The finalizer list without `name`
pub fn without_finalizer(finalizers: &[String], name: &str) -> Vec<String> {
    finalizers.iter().filter(|f| *f != name).cloned().collect()
}

fn namespace_of(ps: &PullSubscription) -> String {
    ps.namespace().unwrap_or_else(|| "default".to_string())
}

/// Add the guard to the owner's credentials Secret
///
/// A missing Secret is not an error here; the adapter will fail to mount it
/// and surface that on its own.
pub async fn ensure_secret_guard(kube: &dyn KubeOps, ps: &PullSubscription) -> Result<()> {
    let namespace = namespace_of(ps);
    let secret_name = ps.spec.effective_secret().name;

    for attempt in 1..=MAX_CONFLICT_RETRIES {
        let Some(secret) = kube.get_secret(&namespace, &secret_name).await? else {
            warn!(
                "Secret {}/{} referenced by {} not found, not guarding it",
                namespace,
                secret_name,
                ps.name_any()
            );
            return Ok(());
        };
        if has_finalizer(secret.finalizers(), SECRET_FINALIZER) {
            return Ok(());
        }

        let finalizers = with_finalizer(secret.finalizers(), SECRET_FINALIZER);
        match kube.patch_secret_finalizers(&secret, &finalizers).await {
            Ok(()) => {
                info!("Added finalizer to Secret: {}/{}", namespace, secret_name);
                return Ok(());
            }
            Err(e) if e.is_conflict() && attempt < MAX_CONFLICT_RETRIES => {
                debug!("Conflict guarding Secret {}, retrying", secret_name);
            }
            Err(e) if e.is_conflict() => break,
            Err(e) => return Err(e),
        }
    }
    Err(Error::Conflict(format!("secret {namespace}/{secret_name}")))
}

/// Whether `other` still needs the secret named `secret_name`
fn still_references(other: &PullSubscription, ps: &PullSubscription, secret_name: &str) -> bool {
    other.metadata.uid != ps.metadata.uid
        && !other.is_being_deleted()
        && other.spec.effective_secret().name == secret_name
}

/// Remove the guard if `ps` is the last owner referencing the Secret
///
/// Siblings are listed again on every attempt, right before the write.
/// Returns whether the guard was removed.
pub async fn release_secret_guard(kube: &dyn KubeOps, ps: &PullSubscription) -> Result<bool> {
    let namespace = namespace_of(ps);
    let secret_name = ps.spec.effective_secret().name;

    for attempt in 1..=MAX_CONFLICT_RETRIES {
        let siblings = kube.list_subscriptions(Some(&namespace)).await?;
        let remaining = siblings
            .iter()
            .filter(|other| still_references(other, ps, &secret_name))
            .count();
        if remaining > 0 {
            debug!(
                "Secret {}/{} still referenced by {} PullSubscription(s)",
                namespace, secret_name, remaining
            );
            return Ok(false);
        }

        let Some(secret) = kube.get_secret(&namespace, &secret_name).await? else {
            return Ok(false);
        };
        if !has_finalizer(secret.finalizers(), SECRET_FINALIZER) {
            return Ok(false);
        }

        let finalizers = without_finalizer(secret.finalizers(), SECRET_FINALIZER);
        match kube.patch_secret_finalizers(&secret, &finalizers).await {
            Ok(()) => {
                info!("Removed finalizer from Secret: {}/{}", namespace, secret_name);
                return Ok(true);
            }
            Err(e) if e.is_conflict() && attempt < MAX_CONFLICT_RETRIES => {
                debug!("Conflict releasing Secret {}, retrying", secret_name);
            }
            Err(e) if e.is_conflict() => break,
            Err(e) => return Err(e),
        }
    }
    Err(Error::Conflict(format!("secret {namespace}/{secret_name}")))
}
