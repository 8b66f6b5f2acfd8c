//! Flat environment contract between the controller and the ops job

use std::collections::HashMap;

use super::{OpAction, OpRequest, OpTarget};
use crate::crd::duration::{format_duration, parse_duration};
use crate::error::{Error, Result};
use crate::pubsub::SubscriptionConfig;

pub const ACTION_ENV: &str = "ACTION";
pub const RESOURCE_ENV: &str = "RESOURCE";
pub const PROJECT_ID_ENV: &str = "PROJECT_ID";
pub const TOPIC_ID_ENV: &str = "PUBSUB_TOPIC_ID";
pub const SUBSCRIPTION_ID_ENV: &str = "PUBSUB_SUBSCRIPTION_ID";
pub const ACK_DEADLINE_ENV: &str = "ACK_DEADLINE";
pub const RETAIN_ACKED_MESSAGES_ENV: &str = "RETAIN_ACKED_MESSAGES";
pub const RETENTION_DURATION_ENV: &str = "RETENTION_DURATION";
pub const TERMINATION_MESSAGE_PATH_ENV: &str = "TERMINATION_MESSAGE_PATH";

impl OpRequest {
    /// Render as environment variables, in a stable order
    pub fn to_env(&self) -> Vec<(String, String)> {
        let mut env = vec![
            (ACTION_ENV, self.action.to_string()),
            (RESOURCE_ENV, self.target.to_string()),
        ];
        if let Some(project) = &self.project {
            env.push((PROJECT_ID_ENV, project.clone()));
        }
        env.extend([
            (TOPIC_ID_ENV, self.topic.clone()),
            (SUBSCRIPTION_ID_ENV, self.subscription.clone()),
            (ACK_DEADLINE_ENV, format_duration(self.config.ack_deadline)),
            (
                RETAIN_ACKED_MESSAGES_ENV,
                self.config.retain_acked_messages.to_string(),
            ),
            (
                RETENTION_DURATION_ENV,
                format_duration(self.config.retention_duration),
            ),
        ]);
        env.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    /// Parse the environment contract
    ///
    /// `ACTION` and `PUBSUB_TOPIC_ID` are required; subscription fields fall
    /// back to their defaults when absent.
    pub fn from_env_map(env: &HashMap<String, String>) -> Result<Self> {
        let get = |key: &str| env.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());

        let action: OpAction = get(ACTION_ENV)
            .ok_or_else(|| Error::ConfigError(format!("{ACTION_ENV} is not set")))?
            .parse()?;
        let target: OpTarget = get(RESOURCE_ENV).unwrap_or("subscription").parse()?;
        let topic = get(TOPIC_ID_ENV)
            .ok_or_else(|| Error::ConfigError(format!("{TOPIC_ID_ENV} is not set")))?
            .to_string();
        let subscription = get(SUBSCRIPTION_ID_ENV).unwrap_or_default().to_string();
        if target == OpTarget::Subscription && subscription.is_empty() {
            return Err(Error::ConfigError(format!(
                "{SUBSCRIPTION_ID_ENV} is required for subscription operations"
            )));
        }

        let defaults = SubscriptionConfig::default();
        let duration = |key: &str, default| -> Result<_> {
            match get(key) {
                Some(v) => parse_duration(v)
                    .map_err(|e| Error::ConfigError(format!("invalid {key}: {e}"))),
                None => Ok(default),
            }
        };
        let retain_acked_messages = match get(RETAIN_ACKED_MESSAGES_ENV) {
            Some(v) => v.parse::<bool>().map_err(|_| {
                Error::ConfigError(format!("invalid {RETAIN_ACKED_MESSAGES_ENV}: {v:?}"))
            })?,
            None => defaults.retain_acked_messages,
        };

        Ok(Self {
            action,
            target,
            project: get(PROJECT_ID_ENV).map(str::to_string),
            topic,
            subscription,
            config: SubscriptionConfig {
                ack_deadline: duration(ACK_DEADLINE_ENV, defaults.ack_deadline)?,
                retain_acked_messages,
                retention_duration: duration(RETENTION_DURATION_ENV, defaults.retention_duration)?,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_rendered_env_parses_back() {
        let request = OpRequest {
            action: OpAction::Create,
            target: OpTarget::Subscription,
            project: Some("p".to_string()),
            topic: "t".to_string(),
            subscription: "s".to_string(),
            config: SubscriptionConfig {
                ack_deadline: Duration::from_secs(90),
                retain_acked_messages: true,
                retention_duration: Duration::from_secs(3600),
            },
        };
        let rendered: HashMap<String, String> = request.to_env().into_iter().collect();
        assert_eq!(rendered[ACK_DEADLINE_ENV], "1m30s");
        assert_eq!(rendered[RETAIN_ACKED_MESSAGES_ENV], "true");
        assert_eq!(OpRequest::from_env_map(&rendered).unwrap(), request);
    }

    #[test]
    fn test_minimal_env_uses_defaults() {
        let request = OpRequest::from_env_map(&env(&[
            (ACTION_ENV, "exists"),
            (RESOURCE_ENV, "topic"),
            (TOPIC_ID_ENV, "orders"),
        ]))
        .unwrap();
        assert_eq!(request.action, OpAction::Exists);
        assert_eq!(request.target, OpTarget::Topic);
        assert_eq!(request.project, None);
        assert_eq!(request.config, SubscriptionConfig::default());
    }

    #[test]
    fn test_unknown_action_is_rejected() {
        let err = OpRequest::from_env_map(&env(&[
            (ACTION_ENV, "purge"),
            (TOPIC_ID_ENV, "orders"),
            (SUBSCRIPTION_ID_ENV, "s"),
        ]))
        .unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
    }

    #[test]
    fn test_subscription_id_required_for_subscriptions() {
        assert!(OpRequest::from_env_map(&env(&[
            (ACTION_ENV, "create"),
            (TOPIC_ID_ENV, "orders"),
        ]))
        .is_err());
    }

    #[test]
    fn test_bad_values_are_rejected() {
        let base = [
            (ACTION_ENV, "create"),
            (TOPIC_ID_ENV, "orders"),
            (SUBSCRIPTION_ID_ENV, "s"),
        ];
        let mut bad_bool = env(&base);
        bad_bool.insert(RETAIN_ACKED_MESSAGES_ENV.to_string(), "yes".to_string());
        assert!(OpRequest::from_env_map(&bad_bool).is_err());

        let mut bad_duration = env(&base);
        bad_duration.insert(ACK_DEADLINE_ENV.to_string(), "soon".to_string());
        assert!(OpRequest::from_env_map(&bad_duration).is_err());
    }
}
