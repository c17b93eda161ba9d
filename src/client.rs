//! HTTP access to the SonarQube Web API.
//!
//! Reconcilers never talk to `reqwest` directly. They go through a
//! [`SonarClient`], which knows the server base URL and hands every request
//! to an [`HttpTransport`]. The transport checks the status code against the
//! one the caller expects and turns any mismatch into
//! [`ProviderError::UnexpectedStatus`], tagged with the caller's name.
//!
//! All SonarQube write endpoints take their parameters in the query string;
//! no request carries a body.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::ProviderError;

/// A response whose status matched the caller's expectation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    /// The status code the server returned.
    pub status: StatusCode,
    /// The raw response body (empty for most mutations).
    pub body: String,
}

impl ApiResponse {
    /// Create a response from a status and body.
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Decode the body as JSON, tagging failures with `caller`.
    pub fn json<T: DeserializeOwned>(&self, caller: &str) -> Result<T, ProviderError> {
        serde_json::from_str(&self.body).map_err(|source| ProviderError::Decode {
            caller: caller.to_string(),
            source,
        })
    }
}

/// Issues a single HTTP request and enforces the expected status code.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send `method url` and return the response if its status equals
    /// `expected`. `caller` identifies the operation in error messages.
    async fn request(
        &self,
        method: Method,
        url: Url,
        expected: StatusCode,
        caller: &str,
    ) -> Result<ApiResponse, ProviderError>;
}

/// How requests authenticate against SonarQube.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Login and password.
    Basic {
        /// SonarQube login.
        user: String,
        /// SonarQube password.
        pass: String,
    },
    /// A user token, sent as the basic-auth login with an empty password.
    Token(String),
    /// No authentication header.
    Anonymous,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Basic { user, .. } => f
                .debug_struct("Basic")
                .field("user", user)
                .field("pass", &"<redacted>")
                .finish(),
            Self::Token(_) => f.debug_tuple("Token").field(&"<redacted>").finish(),
            Self::Anonymous => f.write_str("Anonymous"),
        }
    }
}

/// The production transport, backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    http: reqwest::Client,
    credentials: Credentials,
}

impl ReqwestTransport {
    /// Build a transport. `insecure` disables TLS certificate verification.
    pub fn new(credentials: Credentials, insecure: bool) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(insecure)
            .build()?;
        Ok(Self { http, credentials })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn request(
        &self,
        method: Method,
        url: Url,
        expected: StatusCode,
        caller: &str,
    ) -> Result<ApiResponse, ProviderError> {
        debug!(caller, method = %method, url = %url, "Sending request");

        let mut req = self.http.request(method, url);
        match &self.credentials {
            Credentials::Basic { user, pass } => {
                req = req.basic_auth(user, Some(pass));
            },
            Credentials::Token(token) => {
                req = req.basic_auth(token, None::<&str>);
            },
            Credentials::Anonymous => {},
        }

        let resp = req.send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        debug!(caller, status = status.as_u16(), "Received response");

        if status != expected {
            return Err(ProviderError::unexpected_status(
                caller,
                expected.as_u16(),
                status.as_u16(),
                body,
            ));
        }
        Ok(ApiResponse { status, body })
    }
}

/// The configured connection to one SonarQube server.
///
/// Built once by [`crate::config::ProviderConfig::into_client`] and passed
/// by reference into every reconciler call.
#[derive(Clone)]
pub struct SonarClient {
    base_url: Url,
    transport: Arc<dyn HttpTransport>,
}

impl fmt::Debug for SonarClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SonarClient")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl SonarClient {
    /// Create a client for the server at `base_url`.
    pub fn new(base_url: Url, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            base_url,
            transport,
        }
    }

    /// The server base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Build the URL of an API endpoint with form-encoded query parameters.
    ///
    /// `path` is appended to the base path, so servers mounted under a
    /// context path (`https://host/sonar/`) keep working.
    pub fn endpoint(&self, path: &str, params: &[(&str, &str)]) -> Url {
        let mut url = self.base_url.clone();
        let joined = format!("{}{}", url.path().trim_end_matches('/'), path);
        url.set_path(&joined);
        url.set_query(None);
        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params);
        }
        url
    }

    /// `GET` an endpoint.
    pub async fn get(
        &self,
        path: &str,
        params: &[(&str, &str)],
        expected: StatusCode,
        caller: &str,
    ) -> Result<ApiResponse, ProviderError> {
        let url = self.endpoint(path, params);
        self.transport
            .request(Method::GET, url, expected, caller)
            .await
    }

    /// `POST` an endpoint.
    pub async fn post(
        &self,
        path: &str,
        params: &[(&str, &str)],
        expected: StatusCode,
        caller: &str,
    ) -> Result<ApiResponse, ProviderError> {
        let url = self.endpoint(path, params);
        self.transport
            .request(Method::POST, url, expected, caller)
            .await
    }
}
