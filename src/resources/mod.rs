//! SonarQube resource reconcilers.

pub mod permission_template;
pub mod portfolio;

pub use permission_template::{PermissionTemplate, PermissionTemplateState};
pub use portfolio::{Portfolio, PortfolioState, SelectionMode, Visibility};
