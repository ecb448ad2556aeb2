//! ChatGPT credential storage and the OAuth device flow.
//!
//! The responses adapter consumes this module through [`AuthManager`]:
//! load stored credentials, refresh them shortly before expiry, and
//! extract the account id from the access-token JWT when nothing else
//! provides one.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::errors::AuthError;

pub const DEFAULT_ISSUER_BASE_URL: &str = "https://auth.openai.com";
pub const DEFAULT_CLIENT_ID: &str = "app_EMoamEEZ73f0CkXaXp7hrann";

const EXPIRY_SLACK_SECONDS: i64 = 30;
const DEFAULT_POLL_INTERVAL_SECONDS: u64 = 5;
const DEFAULT_DEVICE_FLOW_TIMEOUT: Duration = Duration::from_secs(15 * 60);

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub account_id: String,
}

impl Credentials {
    /// True when the credential expires within the refresh slack window.
    pub fn expires_within_slack(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at - chrono::Duration::seconds(EXPIRY_SLACK_SECONDS)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCode {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub interval_seconds: u64,
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn load(&self) -> Result<Option<Credentials>, AuthError>;
    async fn save(&self, credentials: &Credentials) -> Result<(), AuthError>;
    async fn clear(&self) -> Result<(), AuthError>;
}

/// JSON credential file. A missing file loads as `None`; a stored
/// credential without an access token is treated the same.
pub struct FileTokenStore {
    path: Option<PathBuf>,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// Store at the default path ([`default_token_store_path`]).
    pub fn default_store() -> Self {
        Self { path: None }
    }

    fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(default_token_store_path)
    }
}

pub fn default_token_store_path() -> PathBuf {
    if let Ok(override_path) = std::env::var("PHI_CHATGPT_TOKEN_PATH") {
        let trimmed = override_path.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }
    match std::env::var("HOME") {
        Ok(home) if !home.trim().is_empty() => {
            Path::new(home.trim()).join(".phi").join("chatgpt_tokens.json")
        }
        _ => PathBuf::from(".phi/chatgpt_tokens.json"),
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn load(&self) -> Result<Option<Credentials>, AuthError> {
        let path = self.resolved_path();
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(error.into()),
        };
        let credentials: Credentials = serde_json::from_slice(&data)
            .map_err(|error| AuthError::Malformed(error.to_string()))?;
        if credentials.access_token.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(credentials))
    }

    async fn save(&self, credentials: &Credentials) -> Result<(), AuthError> {
        let path = self.resolved_path();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut payload = serde_json::to_vec_pretty(credentials)
            .map_err(|error| AuthError::Malformed(error.to_string()))?;
        payload.push(b'\n');
        tokio::fs::write(&path, payload).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let permissions = std::fs::Permissions::from_mode(0o600);
            tokio::fs::set_permissions(&path, permissions).await?;
        }
        Ok(())
    }

    async fn clear(&self) -> Result<(), AuthError> {
        match tokio::fs::remove_file(self.resolved_path()).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }
}

#[async_trait]
pub trait AuthClient: Send + Sync {
    async fn start_device_flow(&self) -> Result<DeviceCode, AuthError>;
    async fn poll_device_flow(&self, code: &DeviceCode) -> Result<Credentials, AuthError>;
    async fn refresh(&self, refresh_token: &str) -> Result<Credentials, AuthError>;
}

pub struct OAuthClient {
    http: reqwest::Client,
    issuer_base_url: String,
    client_id: String,
    device_flow_timeout: Duration,
}

impl OAuthClient {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(45))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            issuer_base_url: DEFAULT_ISSUER_BASE_URL.to_string(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            device_flow_timeout: DEFAULT_DEVICE_FLOW_TIMEOUT,
        }
    }

    pub fn with_issuer_base_url(mut self, issuer_base_url: impl Into<String>) -> Self {
        self.issuer_base_url = issuer_base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn with_device_flow_timeout(mut self, timeout: Duration) -> Self {
        self.device_flow_timeout = timeout;
        self
    }

    fn accounts_base_url(&self) -> String {
        format!("{}/api/accounts", self.issuer_base_url)
    }

    async fn exchange_authorization_code(
        &self,
        authorization_code: &str,
        code_verifier: &str,
    ) -> Result<Credentials, AuthError> {
        let redirect_uri = format!("{}/deviceauth/callback", self.issuer_base_url);
        let response = self
            .http
            .post(format!("{}/oauth/token", self.issuer_base_url))
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", authorization_code),
                ("redirect_uri", redirect_uri.as_str()),
                ("client_id", self.client_id.as_str()),
                ("code_verifier", code_verifier),
            ])
            .send()
            .await
            .map_err(|error| AuthError::Http(error.to_string()))?;

        if !response.status().is_success() {
            return Err(status_error("authorization code exchange failed", response).await);
        }
        let parsed: OAuthTokenResponse = response
            .json()
            .await
            .map_err(|error| AuthError::InvalidResponse(error.to_string()))?;
        if parsed.access_token.trim().is_empty() || parsed.refresh_token.trim().is_empty() {
            return Err(AuthError::InvalidResponse(
                "authorization code exchange response missing access_token or refresh_token"
                    .to_string(),
            ));
        }
        Ok(credentials_from_token_response(parsed))
    }
}

impl Default for OAuthClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthClient for OAuthClient {
    async fn start_device_flow(&self) -> Result<DeviceCode, AuthError> {
        #[derive(Deserialize)]
        struct UserCodeResponse {
            #[serde(default)]
            device_auth_id: String,
            #[serde(default)]
            user_code: String,
            #[serde(default)]
            usercode: String,
            #[serde(default)]
            interval: Value,
        }

        let response = self
            .http
            .post(format!("{}/deviceauth/usercode", self.accounts_base_url()))
            .json(&json!({"client_id": self.client_id}))
            .send()
            .await
            .map_err(|error| AuthError::Http(error.to_string()))?;
        if !response.status().is_success() {
            return Err(status_error("device code request failed", response).await);
        }

        let parsed: UserCodeResponse = response
            .json()
            .await
            .map_err(|error| AuthError::InvalidResponse(error.to_string()))?;
        let mut user_code = parsed.user_code.trim().to_string();
        if user_code.is_empty() {
            user_code = parsed.usercode.trim().to_string();
        }
        if parsed.device_auth_id.trim().is_empty() || user_code.is_empty() {
            return Err(AuthError::InvalidResponse(
                "device code response missing device_auth_id or user_code".to_string(),
            ));
        }

        let mut interval = parse_seconds(&parsed.interval);
        if interval == 0 {
            interval = DEFAULT_POLL_INTERVAL_SECONDS;
        }

        Ok(DeviceCode {
            device_code: parsed.device_auth_id.trim().to_string(),
            user_code,
            verification_uri: format!("{}/codex/device", self.issuer_base_url),
            interval_seconds: interval,
        })
    }

    async fn poll_device_flow(&self, code: &DeviceCode) -> Result<Credentials, AuthError> {
        if code.device_code.trim().is_empty() || code.user_code.trim().is_empty() {
            return Err(AuthError::InvalidResponse(
                "device code and user code are required".to_string(),
            ));
        }

        #[derive(Deserialize)]
        struct TokenPollResponse {
            #[serde(default)]
            authorization_code: String,
            #[serde(default)]
            code_verifier: String,
        }

        let deadline = tokio::time::Instant::now() + self.device_flow_timeout;
        let mut interval = Duration::from_secs(code.interval_seconds);
        if interval.is_zero() {
            interval = Duration::from_secs(DEFAULT_POLL_INTERVAL_SECONDS);
        }

        loop {
            let response = self
                .http
                .post(format!("{}/deviceauth/token", self.accounts_base_url()))
                .json(&json!({
                    "device_auth_id": code.device_code,
                    "user_code": code.user_code,
                }))
                .send()
                .await
                .map_err(|error| AuthError::Http(error.to_string()))?;

            let status = response.status();
            if status.is_success() {
                let parsed: TokenPollResponse = response
                    .json()
                    .await
                    .map_err(|error| AuthError::InvalidResponse(error.to_string()))?;
                if parsed.authorization_code.trim().is_empty()
                    || parsed.code_verifier.trim().is_empty()
                {
                    return Err(AuthError::InvalidResponse(
                        "device auth token response missing authorization_code or code_verifier"
                            .to_string(),
                    ));
                }
                return self
                    .exchange_authorization_code(
                        &parsed.authorization_code,
                        &parsed.code_verifier,
                    )
                    .await;
            }

            // 403/404 mean "still waiting for the user to approve"
            if status.as_u16() == 403 || status.as_u16() == 404 {
                if tokio::time::Instant::now() > deadline {
                    return Err(AuthError::DeviceAuthTimeout);
                }
                debug!(interval_seconds = interval.as_secs(), "device auth pending");
                tokio::time::sleep(interval).await;
                continue;
            }

            return Err(status_error("device auth failed", response).await);
        }
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Credentials, AuthError> {
        let refresh_token = refresh_token.trim();
        if refresh_token.is_empty() {
            return Err(AuthError::MissingRefreshToken);
        }

        let response = self
            .http
            .post(format!("{}/oauth/token", self.issuer_base_url))
            .json(&json!({
                "client_id": self.client_id,
                "grant_type": "refresh_token",
                "refresh_token": refresh_token,
                "scope": "openid profile email",
            }))
            .send()
            .await
            .map_err(|error| AuthError::Http(error.to_string()))?;
        if !response.status().is_success() {
            return Err(status_error("refresh token request failed", response).await);
        }

        let parsed: OAuthTokenResponse = response
            .json()
            .await
            .map_err(|error| AuthError::InvalidResponse(error.to_string()))?;
        if parsed.access_token.trim().is_empty() {
            return Err(AuthError::InvalidResponse(
                "refresh response missing access_token".to_string(),
            ));
        }

        let mut credentials = credentials_from_token_response(parsed);
        if credentials.refresh_token.trim().is_empty() {
            credentials.refresh_token = refresh_token.to_string();
        }
        Ok(credentials)
    }
}

/// Pairs a token store with an auth client and refreshes stored
/// credentials shortly before they expire.
pub struct AuthManager {
    client: Arc<dyn AuthClient>,
    store: Arc<dyn TokenStore>,
}

impl AuthManager {
    pub fn new(client: Arc<dyn AuthClient>, store: Arc<dyn TokenStore>) -> Self {
        Self { client, store }
    }

    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.store
    }

    pub async fn load_or_refresh(&self) -> Result<Option<Credentials>, AuthError> {
        let Some(current) = self.store.load().await? else {
            return Ok(None);
        };
        if !current.expires_within_slack(Utc::now()) {
            return Ok(Some(current));
        }
        let next = self.client.refresh(&current.refresh_token).await?;
        self.store.save(&next).await?;
        Ok(Some(next))
    }
}

impl Default for AuthManager {
    fn default() -> Self {
        Self::new(
            Arc::new(OAuthClient::new()),
            Arc::new(FileTokenStore::default_store()),
        )
    }
}

#[derive(Debug, Deserialize)]
struct OAuthTokenResponse {
    #[serde(default)]
    id_token: String,
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    refresh_token: String,
    #[serde(default)]
    expires_in: Value,
}

fn credentials_from_token_response(parsed: OAuthTokenResponse) -> Credentials {
    let mut account_id = extract_account_id_from_jwt(&parsed.id_token);
    if account_id.is_empty() {
        account_id = extract_account_id_from_jwt(&parsed.access_token);
    }

    let expires_in = parse_seconds(&parsed.expires_in);
    let expires_at = if expires_in > 0 {
        Utc::now() + chrono::Duration::seconds(expires_in as i64)
    } else if let Some(expiry) = extract_jwt_expiry(&parsed.access_token) {
        expiry
    } else {
        Utc::now() + chrono::Duration::hours(1)
    };

    Credentials {
        access_token: parsed.access_token.trim().to_string(),
        refresh_token: parsed.refresh_token.trim().to_string(),
        expires_at,
        account_id,
    }
}

/// Account id from the `https://api.openai.com/auth` claim of a JWT, or
/// empty when the token does not carry one.
pub fn extract_account_id_from_jwt(token: &str) -> String {
    decode_jwt_payload(token)
        .and_then(|payload| payload.get("https://api.openai.com/auth").cloned())
        .and_then(|auth| {
            auth.get("chatgpt_account_id")
                .and_then(Value::as_str)
                .map(|id| id.trim().to_string())
        })
        .unwrap_or_default()
}

pub fn extract_jwt_expiry(token: &str) -> Option<DateTime<Utc>> {
    let payload = decode_jwt_payload(token)?;
    let exp = payload.get("exp")?.as_f64()?;
    if exp <= 0.0 {
        return None;
    }
    DateTime::<Utc>::from_timestamp(exp as i64, 0)
}

/// Base64url-decode the middle segment of a JWT into its claim mapping.
pub fn decode_jwt_payload(token: &str) -> Option<Map<String, Value>> {
    let mut segments = token.split('.');
    let _header = segments.next()?;
    let payload = segments.next()?;
    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    match serde_json::from_slice::<Value>(&bytes).ok()? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

fn parse_seconds(value: &Value) -> u64 {
    match value {
        Value::Number(number) => number
            .as_u64()
            .or_else(|| number.as_f64().map(|float| float as u64))
            .unwrap_or(0),
        Value::String(text) => text.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

async fn status_error(context: &'static str, response: reqwest::Response) -> AuthError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    AuthError::Status {
        context,
        status,
        body: crate::openai::body_excerpt(body.trim()),
    }
}
