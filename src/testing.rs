//! Testing utilities for the provider.
//!
//! [`RecordingTransport`] stands in for the SonarQube server: responses are
//! scripted per endpoint and every request is recorded, so tests can assert
//! the exact call sequence a reconciler issued. [`ProviderTester`] drives a
//! [`ProviderService`] the way a host would.
//!
//! # Example
//!
//! ```ignore
//! use hemmer_provider_sonarqube::testing::{test_client, ProviderTester, RecordingTransport};
//! use hemmer_provider_sonarqube::SonarqubeProvider;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! #[tokio::test]
//! async fn test_create_portfolio() {
//!     let transport = Arc::new(RecordingTransport::new());
//!     transport.respond(reqwest::Method::POST, "/api/views/create", 200, r#"{"key":"proj1"}"#);
//!     let tester = ProviderTester::new(SonarqubeProvider::with_client(test_client(&transport)));
//!
//!     tester.create("sonarqube_portfolio", json!({
//!         "key": "proj1", "name": "Proj1", "description": "d"
//!     })).await.unwrap();
//! }
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use reqwest::{Method, StatusCode, Url};
use serde_json::Value;

use crate::client::{ApiResponse, HttpTransport, SonarClient};
use crate::error::ProviderError;
use crate::schema::{Diagnostic, DiagnosticSeverity, ProviderSchema};
use crate::service::ProviderService;
use crate::types::{ImportedResource, PlanResult};

/// Base URL used by [`test_client`].
pub const TEST_BASE_URL: &str = "http://sonarqube.test";

/// A request seen by a [`RecordingTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    /// HTTP method.
    pub method: Method,
    /// Full request URL.
    pub url: Url,
    /// The status the caller expected.
    pub expected: StatusCode,
    /// The caller tag.
    pub caller: String,
}

impl RecordedRequest {
    /// The URL path.
    pub fn path(&self) -> &str {
        self.url.path()
    }

    /// The decoded value of query parameter `name`.
    pub fn param(&self, name: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }
}

type Script = HashMap<(Method, String), VecDeque<(u16, String)>>;

/// In-memory [`HttpTransport`] with scripted responses.
///
/// Responses are queued per method and path. Each request consumes the head
/// of its queue, except that the last response stays in place and answers
/// every later request. A request with nothing scripted gets the status it
/// expected and an empty body.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    script: Mutex<Script>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl RecordingTransport {
    /// A transport with nothing scripted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for `method path`.
    pub fn respond(&self, method: Method, path: &str, status: u16, body: impl Into<String>) {
        lock(&self.script)
            .entry((method, path.to_string()))
            .or_default()
            .push_back((status, body.into()));
    }

    /// Every request so far, in order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.requests).clone()
    }

    /// Every request so far as `"METHOD /path"`.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.requests)
            .iter()
            .map(|r| format!("{} {}", r.method, r.path()))
            .collect()
    }

    /// Forget recorded requests, keeping the script.
    pub fn clear(&self) {
        lock(&self.requests).clear();
    }

    fn next_response(&self, method: &Method, path: &str) -> Option<(u16, String)> {
        let mut script = lock(&self.script);
        let queue = script.get_mut(&(method.clone(), path.to_string()))?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl HttpTransport for RecordingTransport {
    async fn request(
        &self,
        method: Method,
        url: Url,
        expected: StatusCode,
        caller: &str,
    ) -> Result<ApiResponse, ProviderError> {
        let response = self.next_response(&method, url.path());
        lock(&self.requests).push(RecordedRequest {
            method,
            url,
            expected,
            caller: caller.to_string(),
        });

        let (status, body) = response.unwrap_or((expected.as_u16(), String::new()));
        if status != expected.as_u16() {
            return Err(ProviderError::unexpected_status(
                caller,
                expected.as_u16(),
                status,
                body,
            ));
        }
        Ok(ApiResponse::new(expected, body))
    }
}

/// A client pointed at [`TEST_BASE_URL`] that talks to `transport`.
pub fn test_client(transport: &Arc<RecordingTransport>) -> SonarClient {
    let base_url = Url::parse(TEST_BASE_URL).unwrap_or_else(|e| panic!("bad test url: {e}"));
    SonarClient::new(base_url, transport.clone())
}

/// A test harness for provider implementations.
///
/// This wraps a `ProviderService` implementation and provides
/// simplified methods for testing without a host.
pub struct ProviderTester<P: ProviderService> {
    provider: P,
}

impl<P: ProviderService> ProviderTester<P> {
    /// Create a new tester for the given provider.
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    /// Get a reference to the underlying provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    // =========================================================================
    // Schema & Metadata
    // =========================================================================

    /// Get the provider's schema.
    pub fn schema(&self) -> ProviderSchema {
        self.provider.schema()
    }

    /// Get the list of resource type names.
    pub fn resource_types(&self) -> Vec<String> {
        self.provider.metadata().resources
    }

    // =========================================================================
    // Provider Lifecycle
    // =========================================================================

    /// Validate provider configuration.
    ///
    /// Returns `Err` with the diagnostics if there are errors.
    pub async fn validate_provider_config(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.validate_provider_config(config).await?;
        check_diagnostics(diagnostics)
    }

    /// Configure the provider.
    ///
    /// Returns `Err` with the diagnostics if there are errors.
    pub async fn configure(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.configure(config).await?;
        check_diagnostics(diagnostics)
    }

    /// Stop the provider.
    pub async fn stop(&self) -> Result<(), ProviderError> {
        self.provider.stop().await
    }

    // =========================================================================
    // Resource Operations
    // =========================================================================

    /// Validate a resource configuration.
    pub async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<(), TestError> {
        let diagnostics = self
            .provider
            .validate_resource_config(resource_type, config)
            .await?;
        check_diagnostics(diagnostics)
    }

    /// Plan a resource creation (no prior state).
    pub async fn plan_create(
        &self,
        resource_type: &str,
        proposed_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider.plan(resource_type, None, proposed_state).await
    }

    /// Plan a resource update.
    pub async fn plan_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        proposed_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, Some(prior_state), proposed_state)
            .await
    }

    /// Plan a resource deletion.
    pub async fn plan_delete(
        &self,
        resource_type: &str,
        prior_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, Some(prior_state), Value::Null)
            .await
    }

    /// Create a new resource.
    pub async fn create(
        &self,
        resource_type: &str,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider.create(resource_type, planned_state).await
    }

    /// Read the current state of a resource.
    pub async fn read(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider.read(resource_type, current_state).await
    }

    /// Update an existing resource.
    pub async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider
            .update(resource_type, prior_state, planned_state)
            .await
    }

    /// Delete a resource.
    pub async fn delete(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<(), ProviderError> {
        self.provider.delete(resource_type, current_state).await
    }

    /// Import an existing resource.
    pub async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        self.provider.import_resource(resource_type, id).await
    }

    // =========================================================================
    // Lifecycle Helpers
    // =========================================================================

    /// Run a full create lifecycle: plan → create → read.
    ///
    /// Returns the final state after read.
    pub async fn lifecycle_create(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        let plan_result = self.plan_create(resource_type, config).await?;
        let created_state = self
            .create(resource_type, plan_result.planned_state)
            .await?;
        self.read(resource_type, created_state).await
    }

    /// Run a full update lifecycle: plan → update → read.
    ///
    /// Returns the final state after read.
    pub async fn lifecycle_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        proposed_state: Value,
    ) -> Result<Value, ProviderError> {
        let plan_result = self
            .plan_update(resource_type, prior_state.clone(), proposed_state)
            .await?;
        let updated_state = self
            .update(resource_type, prior_state, plan_result.planned_state)
            .await?;
        self.read(resource_type, updated_state).await
    }

    /// Run a full delete lifecycle: plan → delete.
    pub async fn lifecycle_delete(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<(), ProviderError> {
        let _ = self
            .plan_delete(resource_type, current_state.clone())
            .await?;
        self.delete(resource_type, current_state).await
    }
}

/// Error type for test operations that may fail with diagnostics.
#[derive(Debug)]
pub enum TestError {
    /// The operation failed with diagnostics.
    Diagnostics(Vec<Diagnostic>),
    /// The operation failed with a provider error.
    Provider(ProviderError),
}

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestError::Diagnostics(diags) => {
                writeln!(f, "Operation failed with {} diagnostic(s):", diags.len())?;
                for diag in diags {
                    write!(f, "  [{:?}] {}", diag.severity, diag.summary)?;
                    if let Some(detail) = &diag.detail {
                        write!(f, ": {}", detail)?;
                    }
                    if let Some(attr) = &diag.attribute {
                        write!(f, " (at {})", attr)?;
                    }
                    writeln!(f)?;
                }
                Ok(())
            },
            TestError::Provider(e) => write!(f, "Provider error: {}", e),
        }
    }
}

impl std::error::Error for TestError {}

impl From<ProviderError> for TestError {
    fn from(e: ProviderError) -> Self {
        TestError::Provider(e)
    }
}

fn check_diagnostics(diagnostics: Vec<Diagnostic>) -> Result<(), TestError> {
    let errors: Vec<_> = diagnostics
        .into_iter()
        .filter(|d| matches!(d.severity, DiagnosticSeverity::Error))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(TestError::Diagnostics(errors))
    }
}

// =========================================================================
// Assertion Helpers
// =========================================================================

/// Assert that a plan result indicates no changes.
///
/// # Panics
///
/// Panics if the plan has any changes.
pub fn assert_plan_no_changes(plan: &PlanResult) {
    assert!(
        plan.changes.is_empty(),
        "Expected no changes, but got {} change(s): {:?}",
        plan.changes.len(),
        plan.changes.iter().map(|c| &c.path).collect::<Vec<_>>()
    );
}

/// Assert that a plan requires resource replacement.
///
/// # Panics
///
/// Panics if the plan does not require replacement.
pub fn assert_plan_replaces(plan: &PlanResult) {
    assert!(
        plan.requires_replace,
        "Expected plan to require replacement, but it does not"
    );
}

/// Assert that a plan does not require resource replacement.
///
/// # Panics
///
/// Panics if the plan requires replacement.
pub fn assert_plan_updates_in_place(plan: &PlanResult) {
    assert!(
        !plan.requires_replace,
        "Expected plan to update in place, but it requires replacement"
    );
}

/// Assert that a plan has a change for a specific attribute path.
///
/// # Panics
///
/// Panics if the plan does not have a change for the given path.
pub fn assert_plan_changes_attribute(plan: &PlanResult, path: &str) {
    let has_change = plan.changes.iter().any(|c| c.path == path);
    assert!(
        has_change,
        "Expected plan to change attribute '{}', but it was not changed. Changed attributes: {:?}",
        path,
        plan.changes.iter().map(|c| &c.path).collect::<Vec<_>>()
    );
}

/// Assert that diagnostics contain an error with the given summary substring.
///
/// # Panics
///
/// Panics if no error diagnostic contains the given substring.
pub fn assert_error_contains(diagnostics: &[Diagnostic], substring: &str) {
    let has_matching_error = diagnostics
        .iter()
        .any(|d| d.is_error() && d.summary.contains(substring));

    assert!(
        has_matching_error,
        "Expected an error containing '{}', but no matching error found. Errors: {:?}",
        substring,
        diagnostics
            .iter()
            .filter(|d| d.is_error())
            .map(|d| &d.summary)
            .collect::<Vec<_>>()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::SonarqubeProvider;
    use serde_json::json;

    fn tester(transport: &Arc<RecordingTransport>) -> ProviderTester<SonarqubeProvider> {
        ProviderTester::new(SonarqubeProvider::with_client(test_client(transport)))
    }

    #[tokio::test]
    async fn test_transport_defaults_to_expected_status() {
        let transport = Arc::new(RecordingTransport::new());
        let client = test_client(&transport);
        let resp = client
            .post("/api/views/delete", &[("key", "proj1")], StatusCode::NO_CONTENT, "caller")
            .await
            .unwrap();
        assert_eq!(resp.status, StatusCode::NO_CONTENT);
        assert!(resp.body.is_empty());

        let requests = transport.requests();
        assert_eq!(requests[0].caller, "caller");
        assert_eq!(requests[0].param("key").as_deref(), Some("proj1"));
        assert_eq!(requests[0].param("missing"), None);
    }

    #[tokio::test]
    async fn test_transport_queue_and_sticky_last() {
        let transport = Arc::new(RecordingTransport::new());
        transport.respond(Method::GET, "/api/views/show", 500, "boom");
        transport.respond(Method::GET, "/api/views/show", 200, "{}");
        let client = test_client(&transport);

        let first = client
            .get("/api/views/show", &[], StatusCode::OK, "portfolio.read")
            .await
            .unwrap_err();
        assert!(matches!(
            first,
            ProviderError::UnexpectedStatus { ref caller, status: 500, .. } if caller == "portfolio.read"
        ));
        for _ in 0..2 {
            tokio_test::assert_ok!(
                client
                    .get("/api/views/show", &[], StatusCode::OK, "portfolio.read")
                    .await
            );
        }

        assert_eq!(transport.calls().len(), 3);
        transport.clear();
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_tester_schema() {
        let transport = Arc::new(RecordingTransport::new());
        let tester = tester(&transport);
        assert!(tester.schema().resources.contains_key("sonarqube_portfolio"));
        assert!(tester
            .resource_types()
            .contains(&"sonarqube_permission_template".to_string()));
    }

    #[tokio::test]
    async fn test_tester_configure_surfaces_diagnostics() {
        let tester = ProviderTester::new(SonarqubeProvider::new().without_env_fallback());
        let err = tester.configure(json!({})).await.unwrap_err();
        match err {
            TestError::Diagnostics(diagnostics) => {
                assert_error_contains(&diagnostics, "Missing SonarQube host");
            },
            TestError::Provider(e) => panic!("unexpected provider error: {e}"),
        }
    }

    #[tokio::test]
    async fn test_tester_plans() {
        let transport = Arc::new(RecordingTransport::new());
        let tester = tester(&transport);
        let prior = json!({"id": "AU-1", "name": "internal"});

        let plan = tester
            .plan_update("sonarqube_permission_template", prior.clone(), json!({"name": "internal"}))
            .await
            .unwrap();
        assert_plan_no_changes(&plan);

        let plan = tester
            .plan_update("sonarqube_permission_template", prior, json!({"name": "core"}))
            .await
            .unwrap();
        assert_plan_changes_attribute(&plan, "name");
        assert_plan_updates_in_place(&plan);
    }

    #[tokio::test]
    async fn test_tester_lifecycle_delete() {
        let transport = Arc::new(RecordingTransport::new());
        let tester = tester(&transport);
        tester
            .lifecycle_delete("sonarqube_permission_template", json!({"id": "AU-1", "name": "x"}))
            .await
            .unwrap();
        assert_eq!(transport.calls(), vec!["POST /api/permissions/delete_template"]);
    }

    #[test]
    #[should_panic(expected = "Expected plan to require replacement")]
    fn test_assert_plan_replaces_fails() {
        assert_plan_replaces(&PlanResult::no_change(json!({})));
    }

    #[test]
    fn test_test_error_display() {
        let err = TestError::Diagnostics(vec![
            Diagnostic::error("First error").with_attribute("field1"),
            Diagnostic::error("Second error").with_detail("More info"),
        ]);

        let display = format!("{}", err);
        assert!(display.contains("First error"));
        assert!(display.contains("Second error"));
        assert!(display.contains("field1"));
        assert!(display.contains("More info"));
    }
}
