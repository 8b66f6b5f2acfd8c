//! Access tokens for the Pub/Sub API
//!
//! Issuing credentials is not this crate's job. We accept a token handed to
//! us (environment or a mounted credential file) or ask the GCE/GKE metadata
//! server, which covers workload identity.

use std::path::Path;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Error, Result};

/// Env var carrying a ready-to-use OAuth2 access token
pub const ACCESS_TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";
/// Env var pointing at a mounted credential file
pub const CREDENTIALS_FILE_ENV: &str = "GOOGLE_APPLICATION_CREDENTIALS";

const METADATA_BASE: &str = "http://metadata.google.internal/computeMetadata/v1";
const TOKEN_EXPIRY_SLACK: Duration = Duration::from_secs(60);

#[derive(Deserialize)]
struct MetadataToken {
    access_token: String,
    expires_in: u64,
}

#[derive(Deserialize)]
struct CredentialFile {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    project_id: Option<String>,
}

/// Where bearer tokens (and the ambient project) come from
#[derive(Debug)]
pub enum TokenSource {
    /// No authentication, e.g. against the emulator
    None,
    /// A fixed token
    Static {
        token: String,
        project: Option<String>,
    },
    /// The instance metadata server
    Metadata {
        http: reqwest::Client,
        base_url: String,
        cached: Mutex<Option<(String, Instant)>>,
    },
}

impl TokenSource {
    pub fn metadata(http: reqwest::Client) -> Self {
        Self::metadata_at(http, METADATA_BASE)
    }

    pub fn metadata_at(http: reqwest::Client, base_url: &str) -> Self {
        TokenSource::Metadata {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            cached: Mutex::new(None),
        }
    }

    /// Pick a source from the process environment
    ///
    /// An explicit token wins, then a credential file with an `access_token`,
    /// then the metadata server.
    pub fn from_env(http: reqwest::Client) -> Result<Self> {
        if let Ok(token) = std::env::var(ACCESS_TOKEN_ENV) {
            return Ok(TokenSource::Static {
                token: token.trim().to_string(),
                project: None,
            });
        }
        if let Ok(path) = std::env::var(CREDENTIALS_FILE_ENV) {
            if let Some(source) = Self::from_credentials_file(Path::new(&path))? {
                return Ok(source);
            }
        }
        Ok(Self::metadata(http))
    }

    /// Read a credential file; `None` when it carries no usable token
    pub fn from_credentials_file(path: &Path) -> Result<Option<Self>> {
        let contents = std::fs::read_to_string(path)?;
        let trimmed = contents.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        match serde_json::from_str::<CredentialFile>(trimmed) {
            Ok(CredentialFile {
                access_token: Some(token),
                project_id,
            }) => Ok(Some(TokenSource::Static {
                token,
                project: project_id,
            })),
            Ok(_) => {
                debug!(
                    "Credential file {} has no access_token, using the metadata server",
                    path.display()
                );
                Ok(None)
            }
            // Not JSON: treat the whole file as an opaque bearer token
            Err(_) => Ok(Some(TokenSource::Static {
                token: trimmed.to_string(),
                project: None,
            })),
        }
    }

    /// Current bearer token, if this source has one
    pub async fn token(&self) -> Result<Option<String>> {
        match self {
            TokenSource::None => Ok(None),
            TokenSource::Static { token, .. } => Ok(Some(token.clone())),
            TokenSource::Metadata {
                http,
                base_url,
                cached,
            } => {
                let mut guard = cached.lock().await;
                if let Some((token, expires)) = guard.as_ref() {
                    if Instant::now() + TOKEN_EXPIRY_SLACK < *expires {
                        return Ok(Some(token.clone()));
                    }
                }
                let url = format!("{base_url}/instance/service-accounts/default/token");
                let fetched: MetadataToken = http
                    .get(&url)
                    .header("Metadata-Flavor", "Google")
                    .send()
                    .await?
                    .error_for_status()?
                    .json()
                    .await?;
                let expires = Instant::now() + Duration::from_secs(fetched.expires_in);
                *guard = Some((fetched.access_token.clone(), expires));
                Ok(Some(fetched.access_token))
            }
        }
    }

    /// Project known to this source without asking the API
    pub async fn project(&self) -> Result<String> {
        match self {
            TokenSource::Static {
                project: Some(p), ..
            } => Ok(p.clone()),
            TokenSource::Metadata { http, base_url, .. } => {
                let url = format!("{base_url}/project/project-id");
                let project = http
                    .get(&url)
                    .header("Metadata-Flavor", "Google")
                    .send()
                    .await?
                    .error_for_status()?
                    .text()
                    .await?;
                Ok(project.trim().to_string())
            }
            _ => Err(Error::ConfigError(
                "no project configured and none can be discovered".to_string(),
            )),
        }
    }
}
