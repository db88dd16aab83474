use std::io::Write;
use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::control_plane::Scope;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_LOG_FILTER: &str = "datum_mcp_runtime=info,datumctl=info,datum_mcp=info,tower_http=info";

/// Credentials written by `datumctl auth login`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StoredCredentials {
    pub api_hostname: String,
    pub token_endpoint: String,
    pub client_id: String,
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_in: i64,
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("No credentials found. Run `datumctl auth login`, set DATUM_TOKEN, or pass --token.")]
    Missing,
    #[error("Access token expired and refresh failed ({0}). Run `datumctl auth login` again.")]
    RefreshFailed(String),
    #[error("Failed to store refreshed credentials: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to encode credentials: {0}")]
    Encode(#[from] serde_json::Error),
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

pub fn config_path() -> std::path::PathBuf {
    let config_dir = dirs::config_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("datumctl");
    config_dir.join("credentials.json")
}

pub fn load_credentials() -> Option<StoredCredentials> {
    let path = config_path();
    let data = std::fs::read_to_string(&path).ok()?;
    serde_json::from_str(&data).ok()
}

pub fn save_credentials(creds: &StoredCredentials) -> Result<(), CredentialError> {
    let path = config_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let data = serde_json::to_string_pretty(creds)?;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(&path)?;
    file.write_all(data.as_bytes())?;

    Ok(())
}

fn needs_refresh(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now + chrono::Duration::minutes(5) >= expires_at
}

/// Bearer token from the stored credentials, refreshed when it expires within
/// five minutes.
pub async fn resolve_token(http: &reqwest::Client) -> Result<String, CredentialError> {
    let creds = load_credentials().ok_or(CredentialError::Missing)?;
    if !needs_refresh(creds.expires_at, Utc::now()) {
        return Ok(creds.access_token);
    }

    let refreshed = refresh_stored_token(http, &creds).await?;
    save_credentials(&refreshed)?;
    tracing::debug!(expires_at = %refreshed.expires_at, "refreshed stored access token");
    Ok(refreshed.access_token)
}

async fn refresh_stored_token(
    http: &reqwest::Client,
    creds: &StoredCredentials,
) -> Result<StoredCredentials, CredentialError> {
    let refresh_token = creds
        .refresh_token
        .as_deref()
        .ok_or_else(|| CredentialError::RefreshFailed("no refresh token stored".to_string()))?;
    let failed = |e: reqwest::Error| CredentialError::RefreshFailed(e.to_string());

    let resp = http
        .post(&creds.token_endpoint)
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", creds.client_id.as_str()),
        ])
        .send()
        .await
        .map_err(failed)?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(CredentialError::RefreshFailed(format!("HTTP {status}: {body}")));
    }

    let token_resp: TokenResponse = resp.json().await.map_err(failed)?;
    Ok(StoredCredentials {
        api_hostname: creds.api_hostname.clone(),
        token_endpoint: creds.token_endpoint.clone(),
        client_id: creds.client_id.clone(),
        access_token: token_resp.access_token,
        refresh_token: token_resp
            .refresh_token
            .or_else(|| creds.refresh_token.clone()),
        expires_at: Utc::now() + chrono::Duration::seconds(token_resp.expires_in),
    })
}

/// Control-plane base URL for an organization or project. A hostname that
/// already carries a scheme is used as given.
pub fn control_plane_url(api_hostname: &str, scope: &Scope) -> String {
    let base = if api_hostname.starts_with("http://") || api_hostname.starts_with("https://") {
        api_hostname.trim_end_matches('/').to_string()
    } else {
        format!("https://{}", api_hostname.trim_end_matches('/'))
    };
    format!(
        "{base}/apis/resourcemanager.miloapis.com/v1alpha1/{}/{}/control-plane",
        scope.collection(),
        scope.id()
    )
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Installs the global subscriber. Output always goes to stderr; stdout is
/// the protocol channel.
pub fn init_logging(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}

pub fn to_pretty_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
}

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;

#[cfg(not(unix))]
trait OpenOptionsExt {
    fn mode(&mut self, _mode: u32) -> &mut Self;
}

#[cfg(not(unix))]
impl OpenOptionsExt for std::fs::OpenOptions {
    fn mode(&mut self, _mode: u32) -> &mut Self {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_plane_url_for_project_and_organization() {
        assert_eq!(
            control_plane_url("api.datum.net", &Scope::Project("p1".into())),
            "https://api.datum.net/apis/resourcemanager.miloapis.com/v1alpha1/projects/p1/control-plane"
        );
        assert_eq!(
            control_plane_url("https://api.staging.env.datum.net/", &Scope::Organization("acme".into())),
            "https://api.staging.env.datum.net/apis/resourcemanager.miloapis.com/v1alpha1/organizations/acme/control-plane"
        );
    }

    #[test]
    fn tokens_refresh_inside_the_five_minute_buffer() {
        let now = Utc::now();
        assert!(needs_refresh(now + chrono::Duration::minutes(4), now));
        assert!(needs_refresh(now - chrono::Duration::minutes(1), now));
        assert!(!needs_refresh(now + chrono::Duration::minutes(30), now));
    }

    #[test]
    fn stored_credentials_tolerate_missing_refresh_token() {
        let creds: StoredCredentials = serde_json::from_value(serde_json::json!({
            "api_hostname": "api.datum.net",
            "token_endpoint": "https://auth.datum.net/oauth/v2/token",
            "client_id": "datumctl",
            "access_token": "at",
            "expires_at": "2026-01-01T00:00:00Z"
        }))
        .expect("credentials should decode");
        assert!(creds.refresh_token.is_none());
    }
}
