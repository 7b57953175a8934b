use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::user::{AuthUser, UserPlan};
use super::{ApiEnvelope, AuthResponse, TokenResponse};
use crate::errors::{ApiError, SessionError};
use crate::expiry::SessionExpiry;

/// Production API origin, used when nothing else is configured.
pub const DEFAULT_BASE_URL: &str = "https://api.qrplan.app";

/// Environment variable that overrides the API origin.
pub const BASE_URL_ENV: &str = "QRPLAN_API_URL";

/// The QRPlan endpoints a session needs.
///
/// [`ApiClient`] is the real implementation; the session store only depends on this trait.
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// Creates an account and returns its first token.
    async fn signup(&self, email: &str, password: &str) -> Result<AuthResponse, SessionError>;
    async fn login(&self, email: &str, password: &str) -> Result<AuthResponse, SessionError>;
    /// Trades a still-valid token for a fresh one.
    async fn refresh(&self, token: &str) -> Result<TokenResponse, SessionError>;
    async fn me(&self, token: &str) -> Result<AuthUser, SessionError>;
    async fn plan(&self, token: &str) -> Result<UserPlan, SessionError>;
}

/// QRPlan API client options. Pass this into [`ApiClient::new`].
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    /// API origin, e.g. `https://api.qrplan.app`. Defaults to [`DEFAULT_BASE_URL`].
    pub base_url: Option<String>,
    /// Log every request and response at `info` instead of `debug`.
    pub debug: bool,
}

impl ClientOptions {
    /// Reads the API origin from `QRPLAN_API_URL`.
    pub fn from_env() -> Self {
        let base_url = std::env::var(BASE_URL_ENV)
            .ok()
            .filter(|url| !url.trim().is_empty());

        Self {
            base_url,
            debug: false,
        }
    }
}

/// Per-call options for [`ApiClient::call`].
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub method: Method,
    /// Extra headers. These win over the default `Content-Type`.
    pub headers: HeaderMap,
    pub bearer: Option<String>,
    pub body: Option<Value>,
}

impl RequestOptions {
    pub fn get() -> Self {
        Self::default()
    }

    pub fn post() -> Self {
        Self {
            method: Method::POST,
            ..Self::default()
        }
    }

    pub fn bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    fn carries_authorization(&self) -> bool {
        self.bearer.is_some() || self.headers.contains_key(AUTHORIZATION)
    }
}

/// QRPlan API client. Every call goes through [`call`](Self::call).
#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    debug: bool,
    expiry: Arc<SessionExpiry>,
    http_client: reqwest::Client,
}

impl ApiClient {
    /// Creates a new client. `expiry` is notified when a bearer call comes back 401.
    pub fn new(options: ClientOptions, expiry: Arc<SessionExpiry>) -> Result<Self, SessionError> {
        let base_url = options
            .base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let base_url = base_url.trim().trim_end_matches('/').to_string();

        let parsed = reqwest::Url::parse(&base_url)
            .map_err(|_| SessionError::InvalidBaseUrl(base_url.clone()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(SessionError::InvalidBaseUrl(base_url));
        }

        Ok(Self {
            base_url,
            debug: options.debug,
            expiry,
            http_client: reqwest::Client::new(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn expiry(&self) -> &Arc<SessionExpiry> {
        &self.expiry
    }

    /// Query an endpoint of the QRPlan API and return the envelope's `data` as `T`.
    ///
    /// A 401 on a call that carried an `Authorization` header signals session expiry
    /// before the error is returned. Unauthenticated calls (login, signup) never do.
    pub async fn call<T: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<T, SessionError> {
        // Append a / to path if it does not start with one
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };
        let url = format!("{}{}", self.base_url, path);
        let carries_authorization = options.carries_authorization();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.extend(options.headers);

        let mut request = self.http_client.request(options.method.clone(), &url);
        if let Some(token) = &options.bearer {
            request = request.bearer_auth(token);
        }
        request = request.headers(headers);
        if let Some(body) = &options.body {
            request = request.json(body);
        }

        self.trace(&options.method, &path, None);

        let response = request.send().await.map_err(|err| {
            tracing::warn!(%path, error = %err, "request to QRPlan API failed");
            SessionError::Transport(err)
        })?;
        let status = response.status();
        // An error status still has to be reported as one, even when its body is cut short.
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(err) if !status.is_success() => {
                tracing::debug!(%path, error = %err, "failed to read error response body");
                Default::default()
            }
            Err(err) => return Err(err.into()),
        };

        self.trace(&options.method, &path, Some(status));

        match read_envelope(status, &body) {
            Ok(data) => Ok(data),
            Err(err) => {
                tracing::debug!(%path, status = err.status, error = %err, "QRPlan API call failed");
                if err.is_unauthorized() && carries_authorization {
                    self.expiry.notify();
                }
                Err(err.into())
            }
        }
    }

    fn trace(&self, method: &Method, path: &str, status: Option<StatusCode>) {
        let status = status.map(|s| s.as_u16());
        if self.debug {
            tracing::info!(%method, %path, ?status, "QRPlan API");
        } else {
            tracing::debug!(%method, %path, ?status, "QRPlan API");
        }
    }
}

#[async_trait]
impl AuthApi for ApiClient {
    async fn signup(&self, email: &str, password: &str) -> Result<AuthResponse, SessionError> {
        let body = serde_json::json!({ "email": email, "password": password });
        self.call("/auth/signup", RequestOptions::post().json(body))
            .await
    }

    async fn login(&self, email: &str, password: &str) -> Result<AuthResponse, SessionError> {
        let body = serde_json::json!({ "email": email, "password": password });
        self.call("/auth/login", RequestOptions::post().json(body))
            .await
    }

    async fn refresh(&self, token: &str) -> Result<TokenResponse, SessionError> {
        self.call("/auth/refresh", RequestOptions::post().bearer(token))
            .await
    }

    async fn me(&self, token: &str) -> Result<AuthUser, SessionError> {
        self.call("/auth/me", RequestOptions::get().bearer(token))
            .await
    }

    async fn plan(&self, token: &str) -> Result<UserPlan, SessionError> {
        self.call("/billing/plan", RequestOptions::get().bearer(token))
            .await
    }
}

/// Turns a raw response into the endpoint's data or an [`ApiError`].
fn read_envelope<T: DeserializeOwned>(status: StatusCode, body: &[u8]) -> Result<T, ApiError> {
    let code = status.as_u16();
    let invalid = || ApiError::new(format!("Invalid response from server (status {code})"), code);

    let envelope: ApiEnvelope<Value> = match serde_json::from_slice(body) {
        Ok(envelope) => envelope,
        Err(_) if status.is_success() => return Err(invalid()),
        Err(_) => return Err(ApiError::from_status(code)),
    };

    if !status.is_success() || !envelope.success {
        return Err(match envelope.error {
            Some(message) => ApiError::new(message, code),
            None => ApiError::from_status(code),
        });
    }

    serde_json::from_value(envelope.data.unwrap_or(Value::Null)).map_err(|_| invalid())
}
