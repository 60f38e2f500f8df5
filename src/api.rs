use crate::config::Settings;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Health probes never wait longer than this.
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    ConnectionRefused,
    Timeout,
    Authentication,
    ServerError,
    MalformedResponse,
    Request,
}

impl ApiErrorKind {
    /// Message suitable for showing to the user.
    pub fn user_message(self) -> &'static str {
        match self {
            Self::Timeout => "Request timed out. Please try again.",
            Self::ConnectionRefused => "Cannot connect to server. Please check your connection.",
            Self::Authentication => "Authentication failed. Please check API_KEY in your .env file.",
            Self::MalformedResponse => "Server returned invalid response.",
            Self::ServerError | Self::Request => "An error occurred. Please try again.",
        }
    }

    /// Short connection status label.
    pub fn status_label(self) -> &'static str {
        match self {
            Self::Timeout => "Timeout",
            Self::ConnectionRefused => "Disconnected",
            Self::Authentication => "Auth Error",
            Self::MalformedResponse => "Invalid Response",
            Self::ServerError | Self::Request => "Error",
        }
    }
}

impl fmt::Display for ApiErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ConnectionRefused => "connection-refused",
            Self::Timeout => "timeout",
            Self::Authentication => "authentication",
            Self::ServerError => "server-error",
            Self::MalformedResponse => "malformed-response",
            Self::Request => "request",
        };
        f.write_str(name)
    }
}

/// A failed API call. Every transport outcome other than success ends up here.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub message: String,
    pub status: Option<StatusCode>,
}

impl ApiError {
    pub fn new(kind: ApiErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
        }
    }

    fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }
}

/// Successful reply: HTTP status plus the parsed JSON body.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub data: Value,
}

impl ApiResponse {
    /// Reply text stored under `field`, if the server sent one.
    pub fn reply(&self, field: &str) -> Option<&str> {
        self.data.get(field).and_then(Value::as_str)
    }
}

#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    settings: Arc<Settings>,
}

impl ApiClient {
    pub fn new(settings: Arc<Settings>) -> Result<Self, ApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        if let Some((_, value)) = settings.auth_header() {
            let mut value = HeaderValue::from_str(&value)
                .map_err(|e| ApiError::new(ApiErrorKind::Request, format!("Invalid API_KEY: {}", e)))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        match HeaderValue::from_str(&settings.user_agent()) {
            Ok(agent) => {
                headers.insert(USER_AGENT, agent);
            }
            Err(_) => warn!("APP_NAME/APP_VERSION not usable as a User-Agent, omitting it"),
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(settings.api_timeout))
            .connect_timeout(Duration::from_secs(settings.connection_timeout))
            .build()
            .map_err(|e| ApiError::new(ApiErrorKind::Request, format!("Failed to build HTTP client: {}", e)))?;

        info!("API client initialized with base URL: {}", settings.api_base_url);
        Ok(Self { client, settings })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Build the request envelope for a prompt and optional metadata.
    pub fn chat_payload(&self, message: &str, context: Option<Value>) -> Value {
        let mut body = Map::new();
        body.insert(
            self.settings.request_message_field.clone(),
            Value::String(message.to_string()),
        );
        if let Some(context) = context {
            body.insert("context".to_string(), context);
        }
        Value::Object(body)
    }

    /// Send a chat message and get the parsed reply envelope.
    pub async fn send_chat_message(
        &self,
        message: &str,
        context: Option<Value>,
    ) -> Result<ApiResponse, ApiError> {
        let url = self.settings.chat_url();
        let payload = self.chat_payload(message, context);
        debug!("Request data: {}", payload);

        let timeout = Duration::from_secs(self.settings.api_timeout);
        self.execute(self.client.post(&url).json(&payload), &url, timeout)
            .await
    }

    /// Probe the health endpoint.
    pub async fn check_health(&self) -> Result<ApiResponse, ApiError> {
        let url = self.settings.health_url();
        let timeout = HEALTH_TIMEOUT.min(Duration::from_secs(self.settings.api_timeout));
        self.execute(self.client.get(&url).timeout(timeout), &url, timeout)
            .await
    }

    async fn execute(
        &self,
        request: RequestBuilder,
        url: &str,
        timeout: Duration,
    ) -> Result<ApiResponse, ApiError> {
        debug!("Sending request to {}", url);

        let response = request
            .send()
            .await
            .map_err(|e| transport_error(e, url, timeout))?;

        let status = response.status();
        debug!("Response status code: {}", status);

        if !status.is_success() {
            // A broken error body does not change the outcome
            let body = response.text().await.unwrap_or_else(|e| {
                warn!("Failed to read error body from {}: {}", url, e);
                String::new()
            });
            return Err(status_error(status, &body));
        }

        let body = response
            .text()
            .await
            .map_err(|e| transport_error(e, url, timeout).with_status(status))?;

        match serde_json::from_str::<Value>(&body) {
            Ok(data) => {
                debug!("Response data: {}", data);
                Ok(ApiResponse { status, data })
            }
            Err(e) => {
                error!("Invalid JSON response from {}: {} (body: {:?})", url, e, body);
                Err(ApiError::new(
                    ApiErrorKind::MalformedResponse,
                    "Server returned invalid JSON response",
                )
                .with_status(status))
            }
        }
    }
}

fn transport_error(e: reqwest::Error, url: &str, timeout: Duration) -> ApiError {
    // Connect timeouts report as both; classify them as timeouts
    if e.is_timeout() {
        error!("Request to {} timed out after {}s", url, timeout.as_secs());
        ApiError::new(
            ApiErrorKind::Timeout,
            format!("Request timed out after {} seconds", timeout.as_secs()),
        )
    } else if e.is_connect() {
        error!("Connection error: {}", e);
        ApiError::new(
            ApiErrorKind::ConnectionRefused,
            "Cannot connect to server. Please check your connection.",
        )
    } else {
        error!("Request error: {}", e);
        ApiError::new(ApiErrorKind::Request, format!("Request failed: {}", e))
    }
}

fn status_error(status: StatusCode, body: &str) -> ApiError {
    error!("HTTP error {}", status);

    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        return ApiError::new(
            ApiErrorKind::Authentication,
            "Authentication failed. Please check your API key.",
        )
        .with_status(status);
    }

    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| {
            if !body.is_empty() {
                warn!("Error body: {}", body);
            }
            format!("API error {}", status)
        });

    ApiError::new(ApiErrorKind::ServerError, message).with_status(status)
}
