//! Provider configuration.
//!
//! The host hands the provider block over as JSON. It is parsed once into a
//! [`ProviderConfig`], checked, and turned into the [`SonarClient`] that every
//! reconciler receives explicitly.

use std::fmt;
use std::sync::Arc;

use reqwest::Url;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::client::{Credentials, ReqwestTransport, SonarClient};
use crate::error::ProviderError;
use crate::schema::{Attribute, Diagnostic, Schema};

/// Environment variable read when `host` is not configured.
pub const ENV_HOST: &str = "SONAR_HOST";
/// Environment variable read when `user` is not configured.
pub const ENV_USER: &str = "SONAR_USER";
/// Environment variable read when `pass` is not configured.
pub const ENV_PASS: &str = "SONAR_PASS";
/// Environment variable read when `token` is not configured.
pub const ENV_TOKEN: &str = "SONAR_TOKEN";

/// Typed provider configuration.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ProviderConfig {
    /// Base URL of the SonarQube server.
    #[serde(default)]
    pub host: Option<String>,
    /// Login for basic authentication.
    #[serde(default)]
    pub user: Option<String>,
    /// Password for basic authentication.
    #[serde(default)]
    pub pass: Option<String>,
    /// User token; takes precedence over `user`/`pass`.
    #[serde(default)]
    pub token: Option<String>,
    /// Skip TLS certificate verification.
    #[serde(default)]
    pub tls_insecure_skip_verify: bool,
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("host", &self.host)
            .field("user", &self.user)
            .field("pass", &self.pass.as_ref().map(|_| "<redacted>"))
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("tls_insecure_skip_verify", &self.tls_insecure_skip_verify)
            .finish()
    }
}

impl ProviderConfig {
    /// Schema of the provider block.
    pub fn schema() -> Schema {
        Schema::v0()
            .with_description("Connection settings for a SonarQube server")
            .with_attribute(
                "host",
                Attribute::optional_string()
                    .with_description(format!("SonarQube base URL. Falls back to {ENV_HOST}.")),
            )
            .with_attribute(
                "user",
                Attribute::optional_string()
                    .with_description(format!("Login. Falls back to {ENV_USER}.")),
            )
            .with_attribute(
                "pass",
                Attribute::optional_string()
                    .sensitive()
                    .with_description(format!("Password. Falls back to {ENV_PASS}.")),
            )
            .with_attribute(
                "token",
                Attribute::optional_string()
                    .sensitive()
                    .with_description(format!("User token. Falls back to {ENV_TOKEN}.")),
            )
            .with_attribute(
                "tls_insecure_skip_verify",
                Attribute::optional_bool()
                    .with_default(json!(false))
                    .with_description("Accept invalid TLS certificates"),
            )
    }

    /// Parse the JSON provider block. `null` yields an empty configuration.
    pub fn from_value(value: Value) -> Result<Self, ProviderError> {
        if value.is_null() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Fill unset fields from the process environment.
    pub fn with_env_fallback(self) -> Self {
        self.with_fallback(|name| std::env::var(name).ok())
    }

    /// Fill unset fields from `lookup`, keyed by the `SONAR_*` variable names.
    pub fn with_fallback(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn fill(slot: &mut Option<String>, value: Option<String>) {
            if slot.as_deref().map_or(true, str::is_empty) {
                *slot = value.filter(|v| !v.is_empty());
            }
        }
        fill(&mut self.host, lookup(ENV_HOST));
        fill(&mut self.user, lookup(ENV_USER));
        fill(&mut self.pass, lookup(ENV_PASS));
        fill(&mut self.token, lookup(ENV_TOKEN));
        self
    }

    /// Check the configuration. An empty result means it is usable.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();

        match self.host.as_deref() {
            None | Some("") => diagnostics.push(
                Diagnostic::error("Missing SonarQube host")
                    .with_detail(format!("Set 'host' or the {ENV_HOST} environment variable"))
                    .with_attribute("host"),
            ),
            Some(host) => {
                if let Err(err) = parse_host(host) {
                    diagnostics.push(
                        Diagnostic::error("Invalid SonarQube host")
                            .with_detail(err.message().to_string())
                            .with_attribute("host"),
                    );
                }
            },
        }

        match (self.credentials(), self.user.is_some(), self.pass.is_some()) {
            (Credentials::Anonymous, true, false) => diagnostics.push(
                Diagnostic::error("Missing password")
                    .with_detail("'pass' is required when 'user' is set")
                    .with_attribute("pass"),
            ),
            (Credentials::Anonymous, false, true) => diagnostics.push(
                Diagnostic::error("Missing login")
                    .with_detail("'user' is required when 'pass' is set")
                    .with_attribute("user"),
            ),
            (Credentials::Anonymous, _, _) => diagnostics.push(
                Diagnostic::error("Missing credentials")
                    .with_detail("Set either 'token', or both 'user' and 'pass'"),
            ),
            (Credentials::Token(_), true, _) => diagnostics.push(
                Diagnostic::warning("Both token and user are set")
                    .with_detail("The token is used and 'user'/'pass' are ignored")
                    .with_attribute("token"),
            ),
            _ => {},
        }

        diagnostics
    }

    /// The credentials this configuration selects.
    pub fn credentials(&self) -> Credentials {
        let non_empty = |v: &Option<String>| v.clone().filter(|s| !s.is_empty());
        match (
            non_empty(&self.token),
            non_empty(&self.user),
            non_empty(&self.pass),
        ) {
            (Some(token), _, _) => Credentials::Token(token),
            (None, Some(user), Some(pass)) => Credentials::Basic { user, pass },
            _ => Credentials::Anonymous,
        }
    }

    /// Build the client every reconciler call will use.
    pub fn into_client(self) -> Result<SonarClient, ProviderError> {
        if let Some(first) = self.diagnostics().into_iter().find(Diagnostic::is_error) {
            return Err(ProviderError::Configuration(match first.detail {
                Some(detail) => format!("{}: {}", first.summary, detail),
                None => first.summary,
            }));
        }
        let base_url = parse_host(self.host.as_deref().unwrap_or_default())?;
        let transport = ReqwestTransport::new(self.credentials(), self.tls_insecure_skip_verify)?;
        Ok(SonarClient::new(base_url, Arc::new(transport)))
    }
}

fn parse_host(host: &str) -> Result<Url, ProviderError> {
    let url = Url::parse(host)
        .map_err(|e| ProviderError::Configuration(format!("invalid host {:?}: {}", host, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ProviderError::Configuration(format!(
            "invalid host {:?}: unsupported scheme {}",
            host, other
        ))),
    }
}
