//! reqwest implementations of `IdentityBackend` and `Transport`.
//!
//! Every call shares one client with the configured user agent and timeouts.
//! Identity endpoints take form-encoded bodies and answer with JSON; failures
//! carry a `{"detail": "..."}` body whose text is surfaced (trimmed and
//! truncated) so login failures can be classified. Tokens are only ever placed
//! in request bodies or the `Authorization` header, never in logs.

use super::{
    ApiRequest, ApiResponse, IdentityBackend, LockoutProbe, LoginGrant, LoginGrantWire,
    TokenGrant, TokenGrantWire, TokenVerification, Transport,
};
use crate::{config::ClientConfig, error::BackendError, APP_USER_AGENT};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, instrument};
use url::Url;

/// Maximum number of error body characters surfaced to callers.
const MAX_ERROR_CHARS: usize = 200;

fn build_client(config: &ClientConfig) -> Result<Client, BackendError> {
    Client::builder()
        .user_agent(APP_USER_AGENT)
        .connect_timeout(config.connect_timeout)
        .timeout(config.request_timeout)
        .build()
        .map_err(|err| BackendError::Network(format!("Failed to build HTTP client: {err}")))
}

#[derive(Clone, Debug)]
pub struct HttpIdentityBackend {
    client: Client,
    config: ClientConfig,
}

impl HttpIdentityBackend {
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: ClientConfig) -> Result<Self, BackendError> {
        Ok(Self {
            client: build_client(&config)?,
            config,
        })
    }

    async fn post_form<T: DeserializeOwned>(
        &self,
        path: &str,
        form: &[(&str, &str)],
    ) -> Result<T, BackendError> {
        let url = self.config.endpoint(path);
        let response = self
            .client
            .post(&url)
            .form(form)
            .send()
            .await
            .map_err(map_request_error)?;

        handle_json_response(response).await
    }

    async fn post_form_empty(
        &self,
        path: &str,
        form: &[(&str, &str)],
        bearer: Option<&SecretString>,
    ) -> Result<(), BackendError> {
        let url = self.config.endpoint(path);
        let mut builder = self.client.post(&url).form(form);

        if let Some(token) = bearer {
            builder = builder.bearer_auth(token.expose_secret());
        }

        let response = builder.send().await.map_err(map_request_error)?;

        handle_empty_response(response).await
    }
}

#[async_trait]
impl IdentityBackend for HttpIdentityBackend {
    #[instrument(skip(self, password))]
    async fn login(
        &self,
        username: &str,
        password: &SecretString,
    ) -> Result<LoginGrant, BackendError> {
        let grant: LoginGrantWire = self
            .post_form(
                "/login",
                &[("username", username), ("password", password.expose_secret())],
            )
            .await?;

        Ok(grant.into())
    }

    #[instrument(skip_all)]
    async fn refresh(&self, refresh_token: &SecretString) -> Result<TokenGrant, BackendError> {
        let grant: TokenGrantWire = self
            .post_form("/refresh", &[("refresh_token", refresh_token.expose_secret())])
            .await?;

        Ok(grant.into())
    }

    #[instrument(skip_all)]
    async fn logout(&self, refresh_token: &SecretString) -> Result<(), BackendError> {
        self.post_form_empty(
            "/logout",
            &[("refresh_token", refresh_token.expose_secret())],
            None,
        )
        .await
    }

    #[instrument(skip_all)]
    async fn logout_all(&self, access_token: &SecretString) -> Result<(), BackendError> {
        self.post_form_empty("/logout-all", &[], Some(access_token))
            .await
    }

    #[instrument(skip_all)]
    async fn verify_token(
        &self,
        access_token: &SecretString,
    ) -> Result<TokenVerification, BackendError> {
        let url = self.config.endpoint("/verify-token");
        let response = self
            .client
            .post(&url)
            .form(&[("token", access_token.expose_secret())])
            .send()
            .await
            .map_err(map_request_error)?;

        // An unusable token is an answer, not a failure.
        if response.status() == StatusCode::UNAUTHORIZED {
            let detail = error_detail(&response.text().await.unwrap_or_default());
            debug!("token rejected by verify-token: {}", detail);

            return Ok(TokenVerification {
                valid: false,
                expired: detail.to_lowercase().contains("expired"),
                data: None,
            });
        }

        handle_json_response(response).await
    }

    #[instrument(skip(self))]
    async fn lockout_status(&self, username: &str) -> Result<LockoutProbe, BackendError> {
        let mut url = Url::parse(&self.config.endpoint("/lockout-status"))
            .map_err(|err| BackendError::Parse(format!("Invalid lockout-status URL: {err}")))?;

        url.path_segments_mut()
            .map_err(|()| BackendError::Parse("API base URL cannot carry a path".to_string()))?
            .push(username);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(map_request_error)?;

        handle_json_response(response).await
    }
}

/// Plain transport for protected calls against the API base URL.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: Client,
    config: ClientConfig,
}

impl HttpTransport {
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: ClientConfig) -> Result<Self, BackendError> {
        Ok(Self {
            client: build_client(&config)?,
            config,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(skip_all, fields(method = %request.method, path = %request.path, retry = request.is_retry()))]
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, BackendError> {
        let url = self.config.endpoint(&request.path);
        let mut builder = self.client.request(request.method.clone(), &url);

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(map_request_error)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(map_request_error)?;

        debug!(
            status,
            authorized = request.has_authorization(),
            "response received"
        );

        Ok(ApiResponse { status, body })
    }
}

/// Maps transport errors into `BackendError` with timeout detection.
fn map_request_error(err: reqwest::Error) -> BackendError {
    if err.is_timeout() {
        BackendError::Network("Request timed out. Please try again.".to_string())
    } else if err.is_decode() {
        BackendError::Parse(format!("Failed to decode response: {err}"))
    } else {
        BackendError::Network(err.to_string())
    }
}

async fn handle_json_response<T: DeserializeOwned>(response: Response) -> Result<T, BackendError> {
    if response.status().is_success() {
        response
            .json::<T>()
            .await
            .map_err(|err| BackendError::Parse(format!("Failed to decode response: {err}")))
    } else {
        Err(rejection(response).await)
    }
}

async fn handle_empty_response(response: Response) -> Result<(), BackendError> {
    if response.status().is_success() {
        Ok(())
    } else {
        Err(rejection(response).await)
    }
}

async fn rejection(response: Response) -> BackendError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();

    BackendError::Rejected {
        status,
        message: error_detail(&body),
    }
}

/// Pulls the human-readable reason out of an error body.
///
/// Understands `{"detail": "..."}`, validation lists (`{"detail": [{"msg": ...}]}`),
/// `{"message": "..."}` and `{"errors": ["..."]}`; anything else is sanitized raw text.
fn error_detail(body: &str) -> String {
    let Ok(json) = serde_json::from_str::<Value>(body) else {
        return sanitize_body(body);
    };

    let detail = json["detail"]
        .as_str()
        .or_else(|| json["detail"][0]["msg"].as_str())
        .or_else(|| json["message"].as_str())
        .or_else(|| json["errors"][0].as_str());

    detail.map_or_else(|| sanitize_body(body), sanitize_body)
}

/// Trims and truncates error bodies before they reach callers.
fn sanitize_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        "Request failed.".to_string()
    } else {
        trimmed.chars().take(MAX_ERROR_CHARS).collect()
    }
}
