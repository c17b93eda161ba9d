//! The `sonarqube_permission_template` resource.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::client::SonarClient;
use crate::error::ProviderError;
use crate::resource::{null_as_default, Resource};
use crate::schema::{Attribute, Schema};

const CREATE_PATH: &str = "/api/permissions/create_template";
const SEARCH_PATH: &str = "/api/permissions/search_templates";
const UPDATE_PATH: &str = "/api/permissions/update_template";
const DELETE_PATH: &str = "/api/permissions/delete_template";

const CALLER_CREATE: &str = "permission_template.create";
const CALLER_READ: &str = "permission_template.read";
const CALLER_UPDATE: &str = "permission_template.update";
const CALLER_DELETE: &str = "permission_template.delete";

/// Stored state of a permission template.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PermissionTemplateState {
    /// Server-assigned identifier.
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    /// Template name, unique on the server.
    pub name: String,
    /// Free-form description.
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    /// Keys of new projects matching this pattern get the template applied.
    #[serde(default, deserialize_with = "null_as_default")]
    pub project_key_pattern: String,
}

impl PermissionTemplateState {
    fn details_differ(&self, other: &Self) -> bool {
        self.name != other.name
            || self.description != other.description
            || self.project_key_pattern != other.project_key_pattern
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TemplateResponse {
    id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    description: String,
    #[serde(default, deserialize_with = "null_as_default")]
    project_key_pattern: String,
}

impl From<TemplateResponse> for PermissionTemplateState {
    fn from(resp: TemplateResponse) -> Self {
        Self {
            id: resp.id,
            name: resp.name,
            description: resp.description,
            project_key_pattern: resp.project_key_pattern,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateTemplateResponse {
    permission_template: TemplateResponse,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchTemplatesResponse {
    #[serde(default)]
    permission_templates: Vec<TemplateResponse>,
}

/// Reconciler for `sonarqube_permission_template`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PermissionTemplate;

impl PermissionTemplate {
    /// Type name the host addresses permission templates by.
    pub const TYPE_NAME: &'static str = "sonarqube_permission_template";
}

#[async_trait]
impl Resource for PermissionTemplate {
    type State = PermissionTemplateState;

    const TYPE_NAME: &'static str = PermissionTemplate::TYPE_NAME;

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("A SonarQube permission template")
            .with_attribute("id", Attribute::computed_string())
            .with_attribute("name", Attribute::required_string())
            .with_attribute("description", Attribute::optional_string())
            .with_attribute(
                "project_key_pattern",
                Attribute::optional_string()
                    .with_description("Regular expression matched against new project keys"),
            )
    }

    fn id(state: &PermissionTemplateState) -> &str {
        &state.id
    }

    async fn create(
        &self,
        client: &SonarClient,
        desired: &PermissionTemplateState,
    ) -> Result<PermissionTemplateState, ProviderError> {
        let resp = client
            .post(
                CREATE_PATH,
                &[
                    ("name", desired.name.as_str()),
                    ("description", desired.description.as_str()),
                    ("projectKeyPattern", desired.project_key_pattern.as_str()),
                ],
                StatusCode::OK,
                CALLER_CREATE,
            )
            .await?;
        let created: CreateTemplateResponse = resp.json(CALLER_CREATE)?;
        let id = created.permission_template.id;
        info!(id = %id, name = %desired.name, "Permission template created");

        let known = PermissionTemplateState {
            id: id.clone(),
            ..desired.clone()
        };
        self.read(client, &id, Some(&known)).await?.ok_or_else(|| {
            ProviderError::NotFound(format!(
                "permission template {:?} disappeared right after creation",
                id
            ))
        })
    }

    async fn read(
        &self,
        client: &SonarClient,
        id: &str,
        current: Option<&PermissionTemplateState>,
    ) -> Result<Option<PermissionTemplateState>, ProviderError> {
        // Narrow the search by name when we know it; a renamed template falls
        // back to an unfiltered search.
        let name = current.map(|c| c.name.as_str()).filter(|n| !n.is_empty());
        if let Some(name) = name {
            if let Some(found) = search(client, id, Some(name)).await? {
                return Ok(Some(found));
            }
            debug!(id = %id, name, "Template not found by name, searching all templates");
        }
        search(client, id, None).await
    }

    async fn update(
        &self,
        client: &SonarClient,
        id: &str,
        prior: &PermissionTemplateState,
        desired: &PermissionTemplateState,
    ) -> Result<PermissionTemplateState, ProviderError> {
        if !prior.details_differ(desired) {
            debug!(id = %id, "No permission template changes to apply");
            return Ok(prior.clone());
        }

        client
            .post(
                UPDATE_PATH,
                &[
                    ("id", id),
                    ("name", desired.name.as_str()),
                    ("description", desired.description.as_str()),
                    ("projectKeyPattern", desired.project_key_pattern.as_str()),
                ],
                StatusCode::OK,
                CALLER_UPDATE,
            )
            .await?;
        info!(id = %id, "Permission template updated");

        self.read(client, id, Some(desired)).await?.ok_or_else(|| {
            ProviderError::NotFound(format!(
                "permission template {:?} disappeared during update",
                id
            ))
        })
    }

    async fn delete(&self, client: &SonarClient, id: &str) -> Result<(), ProviderError> {
        match client
            .post(
                DELETE_PATH,
                &[("templateId", id)],
                StatusCode::NO_CONTENT,
                CALLER_DELETE,
            )
            .await
        {
            Ok(_) => {
                info!(id = %id, "Permission template deleted");
                Ok(())
            },
            Err(err) if err.is_not_found() => {
                warn!(id = %id, "Permission template already absent, treating delete as done");
                Ok(())
            },
            Err(err) => Err(err),
        }
    }
}

async fn search(
    client: &SonarClient,
    id: &str,
    name: Option<&str>,
) -> Result<Option<PermissionTemplateState>, ProviderError> {
    let params: Vec<(&str, &str)> = name.map(|n| ("q", n)).into_iter().collect();
    let resp = client
        .get(SEARCH_PATH, &params, StatusCode::OK, CALLER_READ)
        .await?;
    let found: SearchTemplatesResponse = resp.json(CALLER_READ)?;
    Ok(found
        .permission_templates
        .into_iter()
        .find(|t| t.id == id)
        .map(PermissionTemplateState::from))
}
