//! The SonarQube provider: a registry of resource reconcilers behind
//! [`ProviderService`].

use std::collections::HashMap;
use std::fmt;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};

use crate::client::SonarClient;
use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::plan::plan;
use crate::resource::{DynResource, Resource};
use crate::resources::{PermissionTemplate, Portfolio};
use crate::schema::{Diagnostic, ProviderSchema};
use crate::service::ProviderService;
use crate::types::{ImportedResource, PlanResult};
use crate::validation::validate;

/// Provider serving every SonarQube resource type.
pub struct SonarqubeProvider {
    resources: HashMap<&'static str, Box<dyn DynResource>>,
    client: RwLock<Option<SonarClient>>,
    env_fallback: bool,
}

impl fmt::Debug for SonarqubeProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<&&str> = self.resources.keys().collect();
        types.sort();
        f.debug_struct("SonarqubeProvider")
            .field("resources", &types)
            .field("env_fallback", &self.env_fallback)
            .finish_non_exhaustive()
    }
}

impl Default for SonarqubeProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SonarqubeProvider {
    /// An unconfigured provider with every built-in resource registered.
    pub fn new() -> Self {
        Self::empty().register(Portfolio).register(PermissionTemplate)
    }

    /// A provider already connected through `client`, skipping `configure`.
    pub fn with_client(client: SonarClient) -> Self {
        let provider = Self::new();
        Self {
            client: RwLock::new(Some(client)),
            ..provider
        }
    }

    fn empty() -> Self {
        Self {
            resources: HashMap::new(),
            client: RwLock::new(None),
            env_fallback: true,
        }
    }

    /// Add a resource type. A later registration replaces an earlier one
    /// with the same type name.
    pub fn register<R: Resource>(mut self, resource: R) -> Self {
        self.resources.insert(R::TYPE_NAME, Box::new(resource));
        self
    }

    /// Ignore `SONAR_*` environment variables during configuration.
    pub fn without_env_fallback(mut self) -> Self {
        self.env_fallback = false;
        self
    }

    /// The client installed by `configure`.
    pub async fn client(&self) -> Result<SonarClient, ProviderError> {
        self.client.read().await.clone().ok_or_else(|| {
            ProviderError::Configuration(
                "provider is not configured; configure must succeed before managing resources"
                    .to_string(),
            )
        })
    }

    fn resource(&self, resource_type: &str) -> Result<&dyn DynResource, ProviderError> {
        self.resources
            .get(resource_type)
            .map(|r| r.as_ref())
            .ok_or_else(|| {
                ProviderError::UnknownResource(format!("Unknown resource type: {}", resource_type))
            })
    }

    fn load_config(&self, config: Value) -> Result<ProviderConfig, ProviderError> {
        let config = ProviderConfig::from_value(config)?;
        Ok(if self.env_fallback {
            config.with_env_fallback()
        } else {
            config
        })
    }
}

fn has_errors(diagnostics: &[Diagnostic]) -> bool {
    diagnostics.iter().any(Diagnostic::is_error)
}

fn log_failure<T>(result: Result<T, ProviderError>, resource_type: &str, op: &str) -> Result<T, ProviderError> {
    if let Err(e) = &result {
        error!(resource_type, error = %e, "{} failed", op);
    }
    result
}

#[async_trait::async_trait]
impl ProviderService for SonarqubeProvider {
    fn schema(&self) -> ProviderSchema {
        self.resources.values().fold(
            ProviderSchema::new().with_provider_config(ProviderConfig::schema()),
            |schema, resource| schema.with_resource(resource.type_name(), resource.schema()),
        )
    }

    #[instrument(skip_all, name = "provider.validate_provider_config")]
    async fn validate_provider_config(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        debug!("ValidateProviderConfig called");
        let mut diagnostics = validate(&ProviderConfig::schema(), &config);
        if has_errors(&diagnostics) {
            warn!(diagnostics = diagnostics.len(), "ValidateProviderConfig completed with errors");
            return Ok(diagnostics);
        }

        let config = self.load_config(config)?;
        diagnostics.extend(config.diagnostics());
        if has_errors(&diagnostics) {
            warn!(diagnostics = diagnostics.len(), "ValidateProviderConfig completed with errors");
        } else {
            info!("ValidateProviderConfig completed successfully");
        }
        Ok(diagnostics)
    }

    #[instrument(skip_all, name = "provider.configure")]
    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        debug!("Configure called");
        let config = self.load_config(config)?;
        let diagnostics = config.diagnostics();
        if has_errors(&diagnostics) {
            warn!(diagnostics = diagnostics.len(), "Configure completed with errors");
            return Ok(diagnostics);
        }

        let host = config.host.clone().unwrap_or_default();
        let client = config.into_client()?;
        *self.client.write().await = Some(client);
        info!(host = %host, "Configure completed successfully");
        Ok(diagnostics)
    }

    #[instrument(skip_all, name = "provider.stop")]
    async fn stop(&self) -> Result<(), ProviderError> {
        info!("Stop called");
        self.client.write().await.take();
        Ok(())
    }

    #[instrument(skip(self, config), name = "provider.validate_resource_config")]
    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let resource = self.resource(resource_type)?;
        let diagnostics = validate(&resource.schema(), &config);
        if has_errors(&diagnostics) {
            warn!(diagnostics = diagnostics.len(), "ValidateResourceConfig completed with errors");
        } else {
            debug!("ValidateResourceConfig completed successfully");
        }
        Ok(diagnostics)
    }

    #[instrument(skip(self, prior_state, proposed_state), name = "provider.plan")]
    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        let resource = self.resource(resource_type)?;
        let result = plan(&resource.schema(), prior_state.as_ref(), &proposed_state);
        info!(
            changes = result.changes.len(),
            requires_replace = result.requires_replace,
            "Plan completed"
        );
        Ok(result)
    }

    #[instrument(skip(self, planned_state), name = "provider.create")]
    async fn create(&self, resource_type: &str, planned_state: Value) -> Result<Value, ProviderError> {
        let resource = self.resource(resource_type)?;
        let client = self.client().await?;
        let result = resource.create(&client, planned_state).await;
        log_failure(result, resource_type, "Create")
    }

    #[instrument(skip(self, current_state), name = "provider.read")]
    async fn read(&self, resource_type: &str, current_state: Value) -> Result<Value, ProviderError> {
        let resource = self.resource(resource_type)?;
        let client = self.client().await?;
        let result = resource.read(&client, current_state).await;
        log_failure(result, resource_type, "Read")
    }

    #[instrument(skip(self, prior_state, planned_state), name = "provider.update")]
    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        let resource = self.resource(resource_type)?;
        let client = self.client().await?;
        let result = resource.update(&client, prior_state, planned_state).await;
        log_failure(result, resource_type, "Update")
    }

    #[instrument(skip(self, current_state), name = "provider.delete")]
    async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError> {
        let resource = self.resource(resource_type)?;
        let client = self.client().await?;
        let result = resource.delete(&client, current_state).await;
        log_failure(result, resource_type, "Delete")
    }

    #[instrument(skip(self), name = "provider.import_resource")]
    async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        let resource = self.resource(resource_type)?;
        let client = self.client().await?;
        let result = resource.import(&client, id).await;
        let state = log_failure(result, resource_type, "ImportResource")?;
        info!(id, "ImportResource completed");
        Ok(vec![ImportedResource::new(resource_type, state)])
    }
}
