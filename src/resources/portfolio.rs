//! The `sonarqube_portfolio` resource.
//!
//! A portfolio aggregates projects. Creation only sets name, description and
//! visibility; which projects belong to it is configured afterwards through
//! one of five single-purpose "selection mode" endpoints. Updates are split
//! the same way: renaming and re-selecting are separate calls, and each is
//! only issued when its own fields changed.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::client::SonarClient;
use crate::error::ProviderError;
use crate::resource::{null_as_default, Resource};
use crate::schema::{Attribute, Schema};

const CREATE_PATH: &str = "/api/views/create";
const SHOW_PATH: &str = "/api/views/show";
const UPDATE_PATH: &str = "/api/views/update";
const DELETE_PATH: &str = "/api/views/delete";

const CALLER_CREATE: &str = "portfolio.create";
const CALLER_READ: &str = "portfolio.read";
const CALLER_UPDATE: &str = "portfolio.update";
const CALLER_SELECTION: &str = "portfolio.set_selection_mode";
const CALLER_DELETE: &str = "portfolio.delete";

/// Who can see a portfolio. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum Visibility {
    /// Visible to everyone.
    #[default]
    Public,
    /// Visible to members only.
    Private,
}

impl Visibility {
    /// Every accepted wire value.
    pub const ALL: [&'static str; 2] = ["public", "private"];

    /// The wire value.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
        }
    }
}

impl FromStr for Visibility {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Self::Public),
            "private" => Ok(Self::Private),
            other => Err(ProviderError::Validation(format!(
                "Accepted values are public or private for key \"visibility\", got: {}",
                other
            ))),
        }
    }
}

impl TryFrom<String> for Visibility {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse().map_err(|e: ProviderError| e.message().to_string())
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a portfolio picks its projects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE", try_from = "String")]
pub enum SelectionMode {
    /// No projects.
    #[default]
    None,
    /// Projects added by hand.
    Manual,
    /// Projects carrying any of the given tags.
    Tags,
    /// Projects whose key matches a pattern.
    Regexp,
    /// Every project not already in another portfolio.
    Rest,
}

impl SelectionMode {
    /// Every accepted wire value.
    pub const ALL: [&'static str; 5] = ["NONE", "MANUAL", "TAGS", "REGEXP", "REST"];

    /// The wire value.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Manual => "MANUAL",
            Self::Tags => "TAGS",
            Self::Regexp => "REGEXP",
            Self::Rest => "REST",
        }
    }
}

impl FromStr for SelectionMode {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NONE" => Ok(Self::None),
            "MANUAL" => Ok(Self::Manual),
            "TAGS" => Ok(Self::Tags),
            "REGEXP" => Ok(Self::Regexp),
            "REST" => Ok(Self::Rest),
            other => Err(ProviderError::Configuration(format!(
                "selection_mode needs to be set to one of NONE, MANUAL, TAGS, REGEXP, REST, got: {}",
                other
            ))),
        }
    }
}

impl TryFrom<String> for SelectionMode {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse().map_err(|e: ProviderError| e.message().to_string())
    }
}

impl fmt::Display for SelectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stored state of a portfolio.
///
/// Unset optional strings are empty, an unset tag list is empty.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PortfolioState {
    /// Host identifier; always equal to `key` once created.
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    /// Immutable portfolio key.
    pub key: String,
    /// Display name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Server-assigned qualifier (`VW` for portfolios).
    #[serde(default, deserialize_with = "null_as_default")]
    pub qualifier: String,
    /// Immutable visibility.
    #[serde(default, deserialize_with = "null_as_default")]
    pub visibility: Visibility,
    /// Project selection strategy.
    #[serde(default, deserialize_with = "null_as_default")]
    pub selection_mode: SelectionMode,
    /// Branch used by TAGS, REGEXP and REST modes.
    #[serde(default, deserialize_with = "null_as_default")]
    pub branch: String,
    /// Tags used by TAGS mode.
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: Vec<String>,
    /// Key pattern used by REGEXP mode.
    #[serde(default, deserialize_with = "null_as_default")]
    pub regexp: String,
}

impl PortfolioState {
    /// Reject states the server could never hold.
    pub fn check(&self) -> Result<(), ProviderError> {
        if !self.tags.is_empty() && !self.regexp.is_empty() {
            return Err(ProviderError::Configuration(
                "\"tags\": conflicts with regexp; tags and regexp cannot both be set".to_string(),
            ));
        }
        Ok(())
    }
}

/// Portfolio as returned by `api/views/create` and `api/views/show`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PortfolioResponse {
    key: String,
    #[serde(default, deserialize_with = "null_as_default")]
    name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    desc: String,
    #[serde(default, deserialize_with = "null_as_default")]
    qualifier: String,
    #[serde(default, deserialize_with = "null_as_default")]
    visibility: Visibility,
    #[serde(default, deserialize_with = "null_as_default")]
    selection_mode: SelectionMode,
    #[serde(default, deserialize_with = "null_as_default")]
    branch: String,
    #[serde(default, deserialize_with = "null_as_default")]
    tags: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    regexp: String,
}

impl From<PortfolioResponse> for PortfolioState {
    fn from(resp: PortfolioResponse) -> Self {
        Self {
            id: resp.key.clone(),
            key: resp.key,
            name: resp.name,
            description: resp.desc,
            qualifier: resp.qualifier,
            visibility: resp.visibility,
            selection_mode: resp.selection_mode,
            branch: resp.branch,
            tags: resp.tags,
            regexp: resp.regexp,
        }
    }
}

/// Which selection fields differ between two states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SelectionChanges {
    /// `selection_mode` changed.
    pub mode: bool,
    /// `branch` changed.
    pub branch: bool,
    /// `tags` changed.
    pub tags: bool,
    /// `regexp` changed.
    pub regexp: bool,
}

impl SelectionChanges {
    /// Diff the selection fields of two states.
    pub fn between(prior: &PortfolioState, desired: &PortfolioState) -> Self {
        Self {
            mode: prior.selection_mode != desired.selection_mode,
            branch: prior.branch != desired.branch,
            tags: prior.tags != desired.tags,
            regexp: prior.regexp != desired.regexp,
        }
    }

    /// Whether any selection field changed.
    pub fn any(&self) -> bool {
        self.mode || self.branch || self.tags || self.regexp
    }
}

/// One call of the selection-mode protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionCall {
    /// Endpoint path.
    pub path: &'static str,
    /// Query parameters, in the order they are sent.
    pub params: Vec<(&'static str, String)>,
}

/// Decide which selection endpoint, if any, establishes `desired`'s mode.
///
/// NONE and MANUAL are always re-applied. The other modes rebuild the
/// portfolio's project list server-side, so they are only sent when one of
/// the fields they use actually changed.
pub fn selection_call(desired: &PortfolioState, changes: SelectionChanges) -> Option<SelectionCall> {
    let portfolio = desired.key.clone();
    match desired.selection_mode {
        SelectionMode::None => Some(SelectionCall {
            path: "/api/views/set_none_mode",
            params: vec![("portfolio", portfolio)],
        }),
        SelectionMode::Manual => Some(SelectionCall {
            path: "/api/views/set_manual_mode",
            params: vec![("portfolio", portfolio)],
        }),
        SelectionMode::Tags => (changes.branch || changes.tags).then(|| SelectionCall {
            path: "/api/views/set_tags_mode",
            params: vec![
                ("branch", desired.branch.clone()),
                ("portfolio", portfolio),
                ("tags", desired.tags.join(",")),
            ],
        }),
        SelectionMode::Regexp => (changes.branch || changes.regexp).then(|| SelectionCall {
            path: "/api/views/set_regexp_mode",
            params: vec![
                ("branch", desired.branch.clone()),
                ("portfolio", portfolio),
                ("regexp", desired.regexp.clone()),
            ],
        }),
        SelectionMode::Rest => changes.branch.then(|| SelectionCall {
            path: "/api/views/set_remaining_projects_mode",
            params: vec![("branch", desired.branch.clone()), ("portfolio", portfolio)],
        }),
    }
}

async fn set_selection_mode(
    client: &SonarClient,
    desired: &PortfolioState,
    changes: SelectionChanges,
) -> Result<(), ProviderError> {
    let Some(call) = selection_call(desired, changes) else {
        if changes.mode {
            warn!(
                key = %desired.key,
                mode = %desired.selection_mode,
                "Selection mode changed but none of its inputs did; the server keeps the previous mode"
            );
        } else {
            debug!(
                key = %desired.key,
                mode = %desired.selection_mode,
                "Selection inputs unchanged, skipping selection mode call"
            );
        }
        return Ok(());
    };

    let params: Vec<(&str, &str)> = call
        .params
        .iter()
        .map(|(name, value)| (*name, value.as_str()))
        .collect();
    client
        .post(call.path, &params, StatusCode::NO_CONTENT, CALLER_SELECTION)
        .await?;
    info!(key = %desired.key, mode = %desired.selection_mode, "Portfolio selection mode set");
    Ok(())
}

/// Reconciler for `sonarqube_portfolio`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Portfolio;

impl Portfolio {
    /// Type name the host addresses portfolios by.
    pub const TYPE_NAME: &'static str = "sonarqube_portfolio";
}

#[async_trait]
impl Resource for Portfolio {
    type State = PortfolioState;

    const TYPE_NAME: &'static str = Portfolio::TYPE_NAME;

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("A SonarQube portfolio")
            .with_attribute("id", Attribute::computed_string())
            .with_attribute(
                "key",
                Attribute::required_string()
                    .with_force_new()
                    .with_description("Unique portfolio key"),
            )
            .with_attribute("name", Attribute::required_string())
            .with_attribute("description", Attribute::required_string())
            .with_attribute(
                "qualifier",
                Attribute::computed_string().with_description("Server-assigned qualifier"),
            )
            .with_attribute(
                "visibility",
                Attribute::optional_string()
                    .with_default(json!(Visibility::Public.as_str()))
                    .with_allowed_values(&Visibility::ALL)
                    // The API offers no way to change it after creation.
                    .with_force_new(),
            )
            .with_attribute(
                "selection_mode",
                Attribute::optional_string()
                    .with_default(json!(SelectionMode::None.as_str()))
                    .with_allowed_values(&SelectionMode::ALL),
            )
            .with_attribute(
                "branch",
                Attribute::optional_string()
                    .with_description("Only used by TAGS, REGEXP and REST selection modes"),
            )
            .with_attribute(
                "tags",
                Attribute::optional_string_list()
                    .with_conflicts_with("regexp")
                    .with_description("Only used by TAGS selection mode"),
            )
            .with_attribute(
                "regexp",
                Attribute::optional_string()
                    .with_conflicts_with("tags")
                    .with_description("Only used by REGEXP selection mode"),
            )
    }

    fn precheck(desired: &Value) -> Result<(), ProviderError> {
        if let Some(visibility) = desired.get("visibility").and_then(Value::as_str) {
            visibility.parse::<Visibility>()?;
        }
        if let Some(mode) = desired.get("selection_mode").and_then(Value::as_str) {
            mode.parse::<SelectionMode>()?;
        }
        Ok(())
    }

    fn id(state: &PortfolioState) -> &str {
        if state.id.is_empty() {
            &state.key
        } else {
            &state.id
        }
    }

    async fn create(
        &self,
        client: &SonarClient,
        desired: &PortfolioState,
    ) -> Result<PortfolioState, ProviderError> {
        desired.check()?;

        let resp = client
            .post(
                CREATE_PATH,
                &[
                    ("description", desired.description.as_str()),
                    ("key", desired.key.as_str()),
                    ("name", desired.name.as_str()),
                    ("visibility", desired.visibility.as_str()),
                ],
                StatusCode::OK,
                CALLER_CREATE,
            )
            .await?;
        let created: PortfolioResponse = resp.json(CALLER_CREATE)?;
        info!(key = %created.key, "Portfolio created");

        // Creation leaves the portfolio in NONE mode with nothing selected.
        let target = PortfolioState {
            key: created.key.clone(),
            ..desired.clone()
        };
        let changes = SelectionChanges::between(&PortfolioState::default(), &target);
        set_selection_mode(client, &target, changes).await?;

        self.read(client, &created.key, None).await?.ok_or_else(|| {
            ProviderError::NotFound(format!(
                "portfolio {:?} disappeared right after creation",
                created.key
            ))
        })
    }

    async fn read(
        &self,
        client: &SonarClient,
        id: &str,
        _current: Option<&PortfolioState>,
    ) -> Result<Option<PortfolioState>, ProviderError> {
        let resp = match client
            .get(SHOW_PATH, &[("key", id)], StatusCode::OK, CALLER_READ)
            .await
        {
            Ok(resp) => resp,
            Err(err) if err.is_not_found() => return Ok(None),
            Err(err) => return Err(err),
        };
        let portfolio: PortfolioResponse = resp.json(CALLER_READ)?;
        Ok(Some(portfolio.into()))
    }

    async fn update(
        &self,
        client: &SonarClient,
        id: &str,
        prior: &PortfolioState,
        desired: &PortfolioState,
    ) -> Result<PortfolioState, ProviderError> {
        desired.check()?;
        if prior.key != desired.key || prior.visibility != desired.visibility {
            return Err(ProviderError::Validation(
                "key and visibility cannot be changed in place; the portfolio must be replaced"
                    .to_string(),
            ));
        }

        let details_changed =
            prior.name != desired.name || prior.description != desired.description;
        let selection = SelectionChanges::between(prior, desired);
        if !details_changed && !selection.any() {
            debug!(key = %id, "No portfolio changes to apply");
            return Ok(prior.clone());
        }

        if details_changed {
            client
                .post(
                    UPDATE_PATH,
                    &[
                        ("key", id),
                        ("description", desired.description.as_str()),
                        ("name", desired.name.as_str()),
                    ],
                    StatusCode::OK,
                    CALLER_UPDATE,
                )
                .await?;
            info!(key = %id, "Portfolio name and description updated");
        }

        if selection.any() {
            let target = PortfolioState {
                key: id.to_string(),
                ..desired.clone()
            };
            set_selection_mode(client, &target, selection).await?;
        }

        self.read(client, id, Some(desired)).await?.ok_or_else(|| {
            ProviderError::NotFound(format!("portfolio {:?} disappeared during update", id))
        })
    }

    async fn delete(&self, client: &SonarClient, id: &str) -> Result<(), ProviderError> {
        match client
            .post(DELETE_PATH, &[("key", id)], StatusCode::NO_CONTENT, CALLER_DELETE)
            .await
        {
            Ok(_) => {
                info!(key = %id, "Portfolio deleted");
                Ok(())
            },
            Err(err) if err.is_not_found() => {
                warn!(key = %id, "Portfolio already absent, treating delete as done");
                Ok(())
            },
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{test_client, RecordingTransport};
    use reqwest::Method;
    use std::sync::Arc;

    fn desired(mode: SelectionMode) -> PortfolioState {
        PortfolioState {
            key: "proj1".to_string(),
            name: "Proj1".to_string(),
            description: "desc".to_string(),
            selection_mode: mode,
            ..Default::default()
        }
    }

    fn show_body(state: &PortfolioState) -> String {
        json!({
            "key": state.key,
            "name": state.name,
            "desc": state.description,
            "qualifier": "VW",
            "visibility": state.visibility.as_str(),
            "selectionMode": state.selection_mode.as_str(),
            "branch": state.branch,
            "tags": state.tags,
            "regexp": state.regexp,
        })
        .to_string()
    }

    fn stored(state: &PortfolioState) -> PortfolioState {
        PortfolioState {
            id: state.key.clone(),
            qualifier: "VW".to_string(),
            ..state.clone()
        }
    }

    fn server_with(state: &PortfolioState) -> Arc<RecordingTransport> {
        let transport = Arc::new(RecordingTransport::new());
        transport.respond(Method::POST, CREATE_PATH, 200, show_body(state));
        transport.respond(Method::GET, SHOW_PATH, 200, show_body(state));
        transport
    }

    #[test]
    fn test_visibility_parsing() {
        for value in Visibility::ALL {
            assert_eq!(value.parse::<Visibility>().unwrap().as_str(), value);
        }
        let err = "internal".parse::<Visibility>().unwrap_err();
        assert!(matches!(err, ProviderError::Validation(_)));
        assert!(err.message().contains("public or private"));
        assert!(err.message().contains("visibility"));
    }

    #[test]
    fn test_selection_mode_parsing() {
        for value in SelectionMode::ALL {
            assert_eq!(value.parse::<SelectionMode>().unwrap().as_str(), value);
        }
        let err = "tags".parse::<SelectionMode>().unwrap_err();
        assert!(matches!(err, ProviderError::Configuration(_)));
        assert!(err.message().contains("NONE, MANUAL, TAGS, REGEXP, REST"));
    }

    #[test]
    fn test_state_decoding_defaults() {
        let state: PortfolioState = serde_json::from_value(json!({
            "key": "proj1",
            "name": "Proj1",
            "description": "desc",
            "visibility": null,
            "tags": null
        }))
        .unwrap();
        assert_eq!(state.visibility, Visibility::Public);
        assert_eq!(state.selection_mode, SelectionMode::None);
        assert!(state.tags.is_empty());
        assert_eq!(Portfolio::id(&state), "proj1");
    }

    #[test]
    fn test_state_decoding_rejects_unknown_visibility() {
        let result = serde_json::from_value::<PortfolioState>(json!({
            "key": "proj1",
            "name": "Proj1",
            "description": "desc",
            "visibility": "internal"
        }));
        let message = result.unwrap_err().to_string();
        assert!(message.contains("public or private"));
    }

    #[test]
    fn test_check_rejects_tags_and_regexp() {
        let state = PortfolioState {
            tags: vec!["a".to_string()],
            regexp: "b.*".to_string(),
            ..desired(SelectionMode::Tags)
        };
        assert!(matches!(state.check(), Err(ProviderError::Configuration(_))));

        let state = PortfolioState {
            tags: vec!["a".to_string()],
            ..desired(SelectionMode::Tags)
        };
        assert!(state.check().is_ok());
    }

    #[test]
    fn test_selection_call_dispatch_table() {
        let all = SelectionChanges {
            mode: true,
            branch: true,
            tags: true,
            regexp: true,
        };
        let cases = [
            (SelectionMode::None, "/api/views/set_none_mode"),
            (SelectionMode::Manual, "/api/views/set_manual_mode"),
            (SelectionMode::Tags, "/api/views/set_tags_mode"),
            (SelectionMode::Regexp, "/api/views/set_regexp_mode"),
            (SelectionMode::Rest, "/api/views/set_remaining_projects_mode"),
        ];
        for (mode, path) in cases {
            let call = selection_call(&desired(mode), all).unwrap();
            assert_eq!(call.path, path, "mode {}", mode);
        }
    }

    #[test]
    fn test_selection_call_guards() {
        let none = SelectionChanges::default();
        assert!(selection_call(&desired(SelectionMode::None), none).is_some());
        assert!(selection_call(&desired(SelectionMode::Manual), none).is_some());
        assert!(selection_call(&desired(SelectionMode::Tags), none).is_none());
        assert!(selection_call(&desired(SelectionMode::Regexp), none).is_none());
        assert!(selection_call(&desired(SelectionMode::Rest), none).is_none());

        // A regexp change is irrelevant while in TAGS mode, and vice versa.
        let regexp_only = SelectionChanges {
            regexp: true,
            ..Default::default()
        };
        assert!(selection_call(&desired(SelectionMode::Tags), regexp_only).is_none());
        assert!(selection_call(&desired(SelectionMode::Regexp), regexp_only).is_some());
        assert!(selection_call(&desired(SelectionMode::Rest), regexp_only).is_none());

        let branch_only = SelectionChanges {
            branch: true,
            ..Default::default()
        };
        assert!(selection_call(&desired(SelectionMode::Rest), branch_only).is_some());
        assert!(selection_call(&desired(SelectionMode::Tags), branch_only).is_some());
    }

    #[test]
    fn test_selection_call_params() {
        let state = PortfolioState {
            branch: "main".to_string(),
            tags: vec!["internal".to_string(), "core".to_string()],
            ..desired(SelectionMode::Tags)
        };
        let call = selection_call(
            &state,
            SelectionChanges {
                tags: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(
            call.params,
            vec![
                ("branch", "main".to_string()),
                ("portfolio", "proj1".to_string()),
                ("tags", "internal,core".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_create_with_tags_mode() {
        let state = PortfolioState {
            branch: "main".to_string(),
            tags: vec!["internal".to_string(), "core".to_string()],
            ..desired(SelectionMode::Tags)
        };
        let transport = server_with(&state);
        let client = test_client(&transport);

        let created = Portfolio.create(&client, &state).await.unwrap();

        assert_eq!(
            transport.calls(),
            vec![
                "POST /api/views/create",
                "POST /api/views/set_tags_mode",
                "GET /api/views/show",
            ]
        );
        let requests = transport.requests();
        assert_eq!(requests[0].param("key").as_deref(), Some("proj1"));
        assert_eq!(requests[0].param("visibility").as_deref(), Some("public"));
        assert_eq!(requests[1].param("branch").as_deref(), Some("main"));
        assert_eq!(requests[1].param("tags").as_deref(), Some("internal,core"));
        assert_eq!(requests[1].expected, StatusCode::NO_CONTENT);
        assert_eq!(requests[2].param("key").as_deref(), Some("proj1"));

        assert_eq!(created.qualifier, "VW");
        assert_eq!(created, stored(&state));
    }

    #[tokio::test]
    async fn test_create_round_trips_every_mode() {
        for mode in [
            SelectionMode::None,
            SelectionMode::Manual,
            SelectionMode::Regexp,
            SelectionMode::Rest,
        ] {
            let state = PortfolioState {
                branch: "main".to_string(),
                regexp: if mode == SelectionMode::Regexp {
                    "internal.*".to_string()
                } else {
                    String::new()
                },
                visibility: Visibility::Private,
                ..desired(mode)
            };
            let transport = server_with(&state);
            let created = Portfolio
                .create(&test_client(&transport), &state)
                .await
                .unwrap();
            assert_eq!(created, stored(&state), "mode {}", mode);
            assert_eq!(transport.calls().len(), 3, "mode {}", mode);
        }
    }

    #[tokio::test]
    async fn test_create_skips_guarded_mode_without_inputs() {
        // REST without a branch has nothing to apply at creation time.
        let state = desired(SelectionMode::Rest);
        let transport = server_with(&state);
        Portfolio
            .create(&test_client(&transport), &state)
            .await
            .unwrap();
        assert_eq!(
            transport.calls(),
            vec!["POST /api/views/create", "GET /api/views/show"]
        );
    }

    #[tokio::test]
    async fn test_create_conflict_sends_nothing() {
        let state = PortfolioState {
            tags: vec!["a".to_string()],
            regexp: "b.*".to_string(),
            ..desired(SelectionMode::Tags)
        };
        let transport = server_with(&state);
        let err = Portfolio
            .create(&test_client(&transport), &state)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Configuration(_)));
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_create_stops_after_failed_selection() {
        let state = PortfolioState {
            branch: "main".to_string(),
            regexp: "internal.*".to_string(),
            ..desired(SelectionMode::Regexp)
        };
        let transport = server_with(&state);
        transport.respond(Method::POST, "/api/views/set_regexp_mode", 400, "bad regexp");

        let err = Portfolio
            .create(&test_client(&transport), &state)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProviderError::UnexpectedStatus { status: 400, .. }
        ));
        // The portfolio itself was created and is left behind.
        assert_eq!(
            transport.calls(),
            vec!["POST /api/views/create", "POST /api/views/set_regexp_mode"]
        );
    }

    #[tokio::test]
    async fn test_create_decode_failure() {
        let state = desired(SelectionMode::None);
        let transport = Arc::new(RecordingTransport::new());
        transport.respond(Method::POST, CREATE_PATH, 200, "not json");
        let err = Portfolio
            .create(&test_client(&transport), &state)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Decode { .. }));
        assert_eq!(transport.calls(), vec!["POST /api/views/create"]);
    }

    #[tokio::test]
    async fn test_read_server_wins() {
        let remote = PortfolioState {
            name: "Renamed".to_string(),
            ..desired(SelectionMode::Manual)
        };
        let transport = server_with(&remote);
        let local = stored(&desired(SelectionMode::None));

        let state = Portfolio
            .read(&test_client(&transport), "proj1", Some(&local))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.name, "Renamed");
        assert_eq!(state.selection_mode, SelectionMode::Manual);
    }

    #[tokio::test]
    async fn test_read_not_found_is_removal() {
        let transport = Arc::new(RecordingTransport::new());
        transport.respond(Method::GET, SHOW_PATH, 404, r#"{"errors":[]}"#);
        let state = Portfolio
            .read(&test_client(&transport), "gone", None)
            .await
            .unwrap();
        assert!(state.is_none());
    }

    #[tokio::test]
    async fn test_read_other_errors_propagate() {
        let transport = Arc::new(RecordingTransport::new());
        transport.respond(Method::GET, SHOW_PATH, 403, "forbidden");
        let err = Portfolio
            .read(&test_client(&transport), "proj1", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::UnexpectedStatus { status: 403, .. }));
    }

    #[tokio::test]
    async fn test_update_without_changes_is_silent() {
        let prior = stored(&PortfolioState {
            branch: "main".to_string(),
            tags: vec!["core".to_string()],
            ..desired(SelectionMode::Tags)
        });
        let transport = Arc::new(RecordingTransport::new());

        let state = Portfolio
            .update(&test_client(&transport), "proj1", &prior, &prior.clone())
            .await
            .unwrap();
        assert_eq!(state, prior);
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_update_tags_only() {
        let prior = stored(&PortfolioState {
            branch: "main".to_string(),
            tags: vec!["core".to_string()],
            ..desired(SelectionMode::Tags)
        });
        let next = PortfolioState {
            tags: vec!["core".to_string(), "internal".to_string()],
            ..prior.clone()
        };
        let transport = server_with(&next);

        let state = Portfolio
            .update(&test_client(&transport), "proj1", &prior, &next)
            .await
            .unwrap();
        assert_eq!(
            transport.calls(),
            vec!["POST /api/views/set_tags_mode", "GET /api/views/show"]
        );
        assert_eq!(
            transport.requests()[0].param("tags").as_deref(),
            Some("core,internal")
        );
        assert_eq!(state.tags, next.tags);
    }

    #[tokio::test]
    async fn test_update_name_only() {
        let prior = stored(&PortfolioState {
            branch: "main".to_string(),
            ..desired(SelectionMode::Rest)
        });
        let next = PortfolioState {
            name: "Proj One".to_string(),
            ..prior.clone()
        };
        let transport = server_with(&next);

        Portfolio
            .update(&test_client(&transport), "proj1", &prior, &next)
            .await
            .unwrap();
        assert_eq!(
            transport.calls(),
            vec!["POST /api/views/update", "GET /api/views/show"]
        );
        let update = &transport.requests()[0];
        assert_eq!(update.param("key").as_deref(), Some("proj1"));
        assert_eq!(update.param("name").as_deref(), Some("Proj One"));
        assert_eq!(update.param("description").as_deref(), Some("desc"));
        assert_eq!(update.param("visibility"), None);
        assert_eq!(update.expected, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_update_both_groups_in_order() {
        let prior = stored(&desired(SelectionMode::None));
        let next = PortfolioState {
            description: "new desc".to_string(),
            selection_mode: SelectionMode::Manual,
            ..prior.clone()
        };
        let transport = server_with(&next);

        Portfolio
            .update(&test_client(&transport), "proj1", &prior, &next)
            .await
            .unwrap();
        assert_eq!(
            transport.calls(),
            vec![
                "POST /api/views/update",
                "POST /api/views/set_manual_mode",
                "GET /api/views/show",
            ]
        );
    }

    #[tokio::test]
    async fn test_update_inactive_field_only_reads() {
        // Branch changes do nothing in MANUAL mode, but MANUAL is always re-applied.
        let prior = stored(&desired(SelectionMode::Manual));
        let next = PortfolioState {
            branch: "develop".to_string(),
            ..prior.clone()
        };
        let transport = server_with(&next);
        Portfolio
            .update(&test_client(&transport), "proj1", &prior, &next)
            .await
            .unwrap();
        assert_eq!(
            transport.calls(),
            vec!["POST /api/views/set_manual_mode", "GET /api/views/show"]
        );

        // In TAGS mode a regexp change is skipped entirely.
        let prior = stored(&PortfolioState {
            branch: "main".to_string(),
            ..desired(SelectionMode::Tags)
        });
        let next = PortfolioState {
            regexp: "x.*".to_string(),
            ..prior.clone()
        };
        let transport = server_with(&next);
        Portfolio
            .update(&test_client(&transport), "proj1", &prior, &next)
            .await
            .unwrap();
        assert_eq!(transport.calls(), vec!["GET /api/views/show"]);
    }

    #[tokio::test]
    async fn test_update_mode_change_without_inputs_skips_selection() {
        let prior = stored(&PortfolioState {
            branch: "main".to_string(),
            ..desired(SelectionMode::None)
        });
        let next = PortfolioState {
            selection_mode: SelectionMode::Rest,
            ..prior.clone()
        };
        let changes = SelectionChanges::between(&prior, &next);
        assert!(changes.mode);
        assert!(selection_call(&next, changes).is_none());

        // The server still reports the previous mode.
        let transport = server_with(&prior);
        let state = Portfolio
            .update(&test_client(&transport), "proj1", &prior, &next)
            .await
            .unwrap();
        assert_eq!(transport.calls(), vec!["GET /api/views/show"]);
        assert_eq!(state.selection_mode, SelectionMode::None);
    }

    #[tokio::test]
    async fn test_update_rejects_immutable_changes() {
        let prior = stored(&desired(SelectionMode::None));
        let next = PortfolioState {
            visibility: Visibility::Private,
            ..prior.clone()
        };
        let transport = Arc::new(RecordingTransport::new());
        let err = Portfolio
            .update(&test_client(&transport), "proj1", &prior, &next)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Validation(_)));
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_delete() {
        let transport = Arc::new(RecordingTransport::new());
        tokio_test::assert_ok!(Portfolio.delete(&test_client(&transport), "proj1").await);

        let requests = transport.requests();
        assert_eq!(transport.calls(), vec!["POST /api/views/delete"]);
        assert_eq!(requests[0].param("key").as_deref(), Some("proj1"));
        assert_eq!(requests[0].expected, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_delete_absent_is_success() {
        let transport = Arc::new(RecordingTransport::new());
        transport.respond(Method::POST, DELETE_PATH, 404, "");
        tokio_test::assert_ok!(Portfolio.delete(&test_client(&transport), "gone").await);

        let transport = Arc::new(RecordingTransport::new());
        transport.respond(Method::POST, DELETE_PATH, 500, "");
        tokio_test::assert_err!(Portfolio.delete(&test_client(&transport), "proj1").await);
    }

    #[tokio::test]
    async fn test_import() {
        let remote = PortfolioState {
            branch: "main".to_string(),
            regexp: "internal.*".to_string(),
            ..desired(SelectionMode::Regexp)
        };
        let transport = server_with(&remote);
        let state = Portfolio
            .import(&test_client(&transport), "proj1")
            .await
            .unwrap();
        assert_eq!(state, stored(&remote));

        let transport = Arc::new(RecordingTransport::new());
        transport.respond(Method::GET, SHOW_PATH, 404, "");
        let err = Portfolio
            .import(&test_client(&transport), "gone")
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NotFound(_)));
    }

    #[test]
    fn test_response_decoding() {
        let resp: PortfolioResponse = serde_json::from_value(json!({
            "key": "proj1",
            "name": "Proj1",
            "desc": "desc",
            "qualifier": "VW",
            "visibility": "private",
            "selectionMode": "REST",
            "branch": "main",
            "projects": []
        }))
        .unwrap();
        let state = PortfolioState::from(resp);
        assert_eq!(state.id, "proj1");
        assert_eq!(state.visibility, Visibility::Private);
        assert_eq!(state.selection_mode, SelectionMode::Rest);
        assert!(state.tags.is_empty());

        let missing_key = serde_json::from_value::<PortfolioResponse>(json!({"name": "x"}));
        assert!(missing_key.is_err());
    }
}
