//! Hemmer provider for SonarQube
//!
//! This crate manages SonarQube objects declaratively: the host hands over a
//! desired state, the provider turns it into the sequence of SonarQube Web
//! API calls that converges the server, and returns the canonical state the
//! server reports back.
//!
//! # Overview
//!
//! - **Resources**: `sonarqube_portfolio` and `sonarqube_permission_template`,
//!   each implemented once against a typed state struct ([`Resource`])
//! - **Provider**: [`SonarqubeProvider`], a registry of resources behind the
//!   JSON-level [`ProviderService`] trait
//! - **HTTP**: [`SonarClient`] over a swappable [`HttpTransport`]
//! - **Schema, validation and planning**: schema-driven diagnostics and diffs
//! - **Logging**: Integration with `tracing` for structured logging
//!
//! # Quick Start
//!
//! ```no_run
//! use hemmer_provider_sonarqube::{init_logging, ProviderService, SonarqubeProvider};
//! use serde_json::json;
//!
//! # async fn run() -> Result<(), hemmer_provider_sonarqube::ProviderError> {
//! init_logging();
//!
//! let provider = SonarqubeProvider::new();
//! provider
//!     .configure(json!({"host": "https://sonar.example.com", "token": "squ_..."}))
//!     .await?;
//!
//! let state = provider
//!     .create(
//!         "sonarqube_portfolio",
//!         json!({
//!             "key": "proj1",
//!             "name": "Proj1",
//!             "description": "Internal core projects",
//!             "selection_mode": "TAGS",
//!             "branch": "main",
//!             "tags": ["internal", "core"]
//!         }),
//!     )
//!     .await?;
//! assert_eq!(state["qualifier"], "VW");
//! # Ok(())
//! # }
//! ```
//!
//! # Portfolio selection modes
//!
//! A portfolio's project selection is configured through one of five
//! endpoints, one per mode. `NONE` and `MANUAL` are re-applied whenever any
//! selection field changes; `TAGS`, `REGEXP` and `REST` are only re-applied
//! when an input they actually use (branch, tags, regexp) changed. See
//! [`resources::portfolio::selection_call`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod plan;
pub mod provider;
pub mod resource;
pub mod resources;
pub mod schema;
pub mod service;
pub mod testing;
pub mod types;
pub mod validation;

// Re-export main types at crate root
pub use client::{ApiResponse, Credentials, HttpTransport, ReqwestTransport, SonarClient};
pub use config::ProviderConfig;
pub use error::ProviderError;
pub use logging::{init_logging, init_logging_with_default, try_init_logging};
pub use provider::SonarqubeProvider;
pub use resource::{DynResource, Resource};
pub use schema::ProviderSchema;
pub use service::ProviderService;
pub use types::{AttributeChange, ImportedResource, PlanResult, ProviderMetadata};
pub use validation::{is_valid, validate, validate_result};

// Re-export async_trait for convenience
pub use async_trait::async_trait;

// Re-export commonly used external types
pub use serde_json;
pub use tracing;
