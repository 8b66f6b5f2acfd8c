//! Pub/Sub v1 REST implementation of [`PubSubClient`]

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};

use super::auth::TokenSource;
use super::{
    subscription_path, to_proto_duration, topic_path, PubSubClient, Subscription,
    SubscriptionConfig, Topic,
};
use crate::error::{Error, Result};

pub const DEFAULT_ENDPOINT: &str = "https://pubsub.googleapis.com";
/// Same variable the official client libraries honour
pub const EMULATOR_HOST_ENV: &str = "PUBSUB_EMULATOR_HOST";

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

/// Pub/Sub admin client over HTTP/JSON
#[derive(Debug)]
pub struct PubSubRestClient {
    http: reqwest::Client,
    endpoint: String,
    tokens: TokenSource,
    project: Option<String>,
}

impl PubSubRestClient {
    pub fn new(http: reqwest::Client, endpoint: &str, tokens: TokenSource) -> Self {
        Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            tokens,
            project: None,
        }
    }

    /// Build a client from the environment, honouring the emulator
    pub fn from_env(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        if let Ok(host) = std::env::var(EMULATOR_HOST_ENV) {
            debug!("Using Pub/Sub emulator at {}", host);
            return Ok(Self::new(http, &format!("http://{host}"), TokenSource::None));
        }
        let tokens = TokenSource::from_env(http.clone())?;
        Ok(Self::new(http, DEFAULT_ENDPOINT, tokens))
    }

    /// Fixed project used by [`PubSubClient::default_project`]
    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    async fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let url = format!("{}/v1/{}", self.endpoint, path);
        let mut builder = self.http.request(method, url);
        if let Some(token) = self.tokens.token().await? {
            builder = builder.bearer_auth(token);
        }
        Ok(builder)
    }

    /// Turn a non-success response into `Error::PubSubApi`
    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = match serde_json::from_str::<ErrorEnvelope>(&body) {
            Ok(envelope) if !envelope.error.status.is_empty() => {
                format!("{}: {}", envelope.error.status, envelope.error.message)
            }
            Ok(envelope) => envelope.error.message,
            Err(_) => body,
        };
        Err(Error::PubSubApi {
            status: status.as_u16(),
            message,
        })
    }

    async fn get_optional<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<Option<T>> {
        let response = self.request(Method::GET, path).await?.send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(Self::check(response).await?.json().await?))
    }

    async fn delete_tolerant(&self, path: &str) -> Result<()> {
        let response = self.request(Method::DELETE, path).await?.send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!("{} already absent", path);
            return Ok(());
        }
        Self::check(response).await?;
        Ok(())
    }
}

#[async_trait]
impl PubSubClient for PubSubRestClient {
    async fn default_project(&self) -> Result<String> {
        match &self.project {
            Some(p) => Ok(p.clone()),
            None => self.tokens.project().await,
        }
    }

    #[instrument(skip(self))]
    async fn get_topic(&self, project: &str, topic: &str) -> Result<Option<Topic>> {
        self.get_optional(&topic_path(project, topic)).await
    }

    #[instrument(skip(self))]
    async fn create_topic(&self, project: &str, topic: &str) -> Result<Topic> {
        let path = topic_path(project, topic);
        let response = self
            .request(Method::PUT, &path)
            .await?
            .json(&json!({}))
            .send()
            .await?;
        if response.status() == StatusCode::CONFLICT {
            return Ok(Topic { name: path });
        }
        Ok(Self::check(response).await?.json().await?)
    }

    #[instrument(skip(self))]
    async fn delete_topic(&self, project: &str, topic: &str) -> Result<()> {
        self.delete_tolerant(&topic_path(project, topic)).await
    }

    #[instrument(skip(self))]
    async fn get_subscription(
        &self,
        project: &str,
        subscription: &str,
    ) -> Result<Option<Subscription>> {
        self.get_optional(&subscription_path(project, subscription))
            .await
    }

    #[instrument(skip(self, config))]
    async fn create_subscription(
        &self,
        project: &str,
        subscription: &str,
        topic: &str,
        config: &SubscriptionConfig,
    ) -> Result<Subscription> {
        let path = subscription_path(project, subscription);
        let body = config.to_subscription(&path, &topic_path(project, topic));
        let response = self
            .request(Method::PUT, &path)
            .await?
            .json(&body)
            .send()
            .await?;
        if response.status() == StatusCode::CONFLICT {
            return Ok(body);
        }
        Ok(Self::check(response).await?.json().await?)
    }

    #[instrument(skip(self, config))]
    async fn update_subscription(
        &self,
        project: &str,
        subscription: &str,
        config: &SubscriptionConfig,
        mask: &[&str],
    ) -> Result<Subscription> {
        let path = subscription_path(project, subscription);
        let body = json!({
            "subscription": {
                "ackDeadlineSeconds": config.ack_deadline.as_secs(),
                "retainAckedMessages": config.retain_acked_messages,
                "messageRetentionDuration": to_proto_duration(config.retention_duration),
            },
            "updateMask": mask.join(","),
        });
        let response = self
            .request(Method::PATCH, &path)
            .await?
            .json(&body)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    #[instrument(skip(self))]
    async fn delete_subscription(&self, project: &str, subscription: &str) -> Result<()> {
        self.delete_tolerant(&subscription_path(project, subscription))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> PubSubRestClient {
        PubSubRestClient::new(
            reqwest::Client::new(),
            &server.uri(),
            TokenSource::Static {
                token: "test-token".to_string(),
                project: None,
            },
        )
    }

    #[tokio::test]
    async fn test_get_missing_topic_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/projects/p/topics/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
                "error": {"code": 404, "message": "Resource not found", "status": "NOT_FOUND"}
            })))
            .mount(&server)
            .await;

        assert!(client(&server).get_topic("p", "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_subscription_sends_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/projects/p/subscriptions/s"))
            .and(header("authorization", "Bearer test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "name": "projects/p/subscriptions/s",
                "topic": "projects/p/topics/t",
                "ackDeadlineSeconds": 30,
                "messageRetentionDuration": "604800s"
            })))
            .mount(&server)
            .await;

        let sub = client(&server)
            .get_subscription("p", "s")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sub.topic, "projects/p/topics/t");
        assert_eq!(sub.ack_deadline_seconds, 30);
        assert!(SubscriptionConfig::default().drift(&sub).is_empty());
    }

    #[tokio::test]
    async fn test_create_subscription_body() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/projects/p/subscriptions/s"))
            .and(body_partial_json(serde_json::json!({
                "topic": "projects/p/topics/t",
                "ackDeadlineSeconds": 30,
                "retainAckedMessages": false,
                "messageRetentionDuration": "604800s"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "name": "projects/p/subscriptions/s",
                "topic": "projects/p/topics/t",
                "ackDeadlineSeconds": 30
            })))
            .expect(1)
            .mount(&server)
            .await;

        let sub = client(&server)
            .create_subscription("p", "s", "t", &SubscriptionConfig::default())
            .await
            .unwrap();
        assert_eq!(sub.name, "projects/p/subscriptions/s");
    }

    #[tokio::test]
    async fn test_create_conflict_is_success() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/projects/p/topics/t"))
            .respond_with(ResponseTemplate::new(409).set_body_json(serde_json::json!({
                "error": {"code": 409, "message": "Resource already exists", "status": "ALREADY_EXISTS"}
            })))
            .mount(&server)
            .await;

        let topic = client(&server).create_topic("p", "t").await.unwrap();
        assert_eq!(topic.name, "projects/p/topics/t");
    }

    #[tokio::test]
    async fn test_update_sends_field_mask() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/v1/projects/p/subscriptions/s"))
            .and(body_partial_json(serde_json::json!({
                "updateMask": "ackDeadlineSeconds,retainAckedMessages"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "name": "projects/p/subscriptions/s"
            })))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .update_subscription(
                "p",
                "s",
                &SubscriptionConfig::default(),
                &["ackDeadlineSeconds", "retainAckedMessages"],
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_delete_missing_subscription_is_ok() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/v1/projects/p/subscriptions/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        client(&server)
            .delete_subscription("p", "gone")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_api_error_is_decoded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/projects/p/topics/t"))
            .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
                "error": {"code": 403, "message": "User not authorized", "status": "PERMISSION_DENIED"}
            })))
            .mount(&server)
            .await;

        match client(&server).get_topic("p", "t").await {
            Err(Error::PubSubApi { status, message }) => {
                assert_eq!(status, 403);
                assert_eq!(message, "PERMISSION_DENIED: User not authorized");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
