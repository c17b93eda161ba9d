//! Schema validation helpers.
//!
//! Validates a `serde_json::Value` against a [`Schema`] and reports every
//! problem as a [`Diagnostic`], so the host can show all of them at once.
//!
//! # Example
//!
//! ```
//! use hemmer_provider_sonarqube::schema::{Attribute, Schema};
//! use hemmer_provider_sonarqube::validation::validate;
//! use serde_json::json;
//!
//! let schema = Schema::v0()
//!     .with_attribute("name", Attribute::required_string())
//!     .with_attribute(
//!         "visibility",
//!         Attribute::optional_string().with_allowed_values(&["public", "private"]),
//!     );
//!
//! assert!(validate(&schema, &json!({"name": "Proj1"})).is_empty());
//!
//! let diagnostics = validate(&schema, &json!({"name": "Proj1", "visibility": "secret"}));
//! assert_eq!(diagnostics.len(), 1);
//! assert_eq!(diagnostics[0].attribute, Some("visibility".to_string()));
//! ```

use crate::schema::{Attribute, AttributeType, Diagnostic, Schema};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Validate a JSON value against a schema.
///
/// Returns a list of diagnostics for any validation errors found.
/// An empty list means the value is valid.
///
/// # Validation Rules
///
/// - Required attributes must be present and non-null
/// - Computed-only attributes are skipped (the provider sets these)
/// - Attribute types must match the schema
/// - Strings restricted by `allowed_values` must be one of them
/// - Attributes declared as conflicting may not both be set
pub fn validate(schema: &Schema, value: &Value) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    let obj = match value {
        Value::Object(map) => map,
        _ => {
            diagnostics.push(
                Diagnostic::error("Expected object")
                    .with_detail(format!("Got {}", value_type_name(value))),
            );
            return diagnostics;
        },
    };

    // Sorted so diagnostics come out in a stable order.
    let names: BTreeSet<&String> = schema.block.attributes.keys().collect();
    for name in &names {
        let attr = &schema.block.attributes[*name];
        validate_attribute(attr, obj.get(*name), name, &mut diagnostics);
    }
    validate_conflicts(schema, &names, obj, &mut diagnostics);

    diagnostics
}

/// Validate a JSON value against a schema, returning Ok if valid or Err with diagnostics.
pub fn validate_result(schema: &Schema, value: &Value) -> Result<(), Vec<Diagnostic>> {
    let diagnostics = validate(schema, value);
    if diagnostics.is_empty() {
        Ok(())
    } else {
        Err(diagnostics)
    }
}

/// Check if a JSON value is valid against a schema.
pub fn is_valid(schema: &Schema, value: &Value) -> bool {
    validate(schema, value).is_empty()
}

/// Whether a value counts as "set" for conflict and default purposes.
///
/// Null, empty strings and empty lists all count as unset, the same way the
/// SonarQube API treats them.
pub fn is_set(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(_) => true,
    }
}

fn validate_attribute(
    attr: &Attribute,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    if attr.flags.computed && !attr.flags.optional && !attr.flags.required {
        return;
    }

    match value {
        None | Some(Value::Null) => {
            if attr.flags.required {
                diagnostics.push(
                    Diagnostic::error(format!("Missing required attribute '{}'", path))
                        .with_detail("This attribute is required and must be provided")
                        .with_attribute(path),
                );
            }
        },
        Some(v) => {
            if validate_attribute_type(&attr.attr_type, v, path, diagnostics) {
                validate_allowed_values(attr, v, path, diagnostics);
            }
        },
    }
}

/// Returns `true` when the value had the right type.
fn validate_attribute_type(
    attr_type: &AttributeType,
    value: &Value,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) -> bool {
    match attr_type {
        AttributeType::String => {
            if !value.is_string() {
                diagnostics.push(type_error(path, "string", value));
                return false;
            }
        },
        AttributeType::Bool => {
            if !value.is_boolean() {
                diagnostics.push(type_error(path, "bool", value));
                return false;
            }
        },
        AttributeType::List(element_type) => {
            let Some(arr) = value.as_array() else {
                diagnostics.push(type_error(path, "list", value));
                return false;
            };
            let mut ok = true;
            for (i, elem) in arr.iter().enumerate() {
                let elem_path = format!("{}.{}", path, i);
                ok &= validate_attribute_type(element_type, elem, &elem_path, diagnostics);
            }
            return ok;
        },
    }
    true
}

fn validate_allowed_values(
    attr: &Attribute,
    value: &Value,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    if attr.allowed_values.is_empty() {
        return;
    }
    let Some(s) = value.as_str() else {
        return;
    };
    if !attr.allowed_values.iter().any(|allowed| allowed == s) {
        diagnostics.push(
            Diagnostic::error(format!("Invalid value for attribute '{}'", path))
                .with_detail(format!(
                    "Accepted values are {} for key {:?}, got: {}",
                    join_alternatives(&attr.allowed_values),
                    path,
                    s
                ))
                .with_attribute(path),
        );
    }
}

fn validate_conflicts(
    schema: &Schema,
    names: &BTreeSet<&String>,
    obj: &Map<String, Value>,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let mut reported: BTreeSet<(String, String)> = BTreeSet::new();
    for name in names {
        let attr = &schema.block.attributes[*name];
        if !is_set(obj.get(*name)) {
            continue;
        }
        for other in &attr.conflicts_with {
            if !is_set(obj.get(other)) {
                continue;
            }
            let pair = if name.as_str() < other.as_str() {
                (name.to_string(), other.clone())
            } else {
                (other.clone(), name.to_string())
            };
            if reported.insert(pair) {
                diagnostics.push(
                    Diagnostic::error(format!("Conflicting attributes '{}' and '{}'", name, other))
                        .with_detail(format!(
                            "'{}' cannot be specified when '{}' is specified",
                            name, other
                        ))
                        .with_attribute(name.as_str()),
                );
            }
        }
    }
}

/// Join choices the way SonarQube's own messages do: `a, b or c`.
pub(crate) fn join_alternatives(values: &[String]) -> String {
    match values.split_last() {
        None => String::new(),
        Some((last, [])) => last.clone(),
        Some((last, rest)) => format!("{} or {}", rest.join(", "), last),
    }
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn type_error(path: &str, expected: &str, got: &Value) -> Diagnostic {
    Diagnostic::error(format!("Invalid type for attribute '{}'", path))
        .with_detail(format!("Expected {}, got {}", expected, value_type_name(got)))
        .with_attribute(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn portfolio_like() -> Schema {
        Schema::v0()
            .with_attribute("id", Attribute::computed_string())
            .with_attribute("key", Attribute::required_string())
            .with_attribute(
                "visibility",
                Attribute::optional_string().with_allowed_values(&["public", "private"]),
            )
            .with_attribute(
                "tags",
                Attribute::optional_string_list().with_conflicts_with("regexp"),
            )
            .with_attribute(
                "regexp",
                Attribute::optional_string().with_conflicts_with("tags"),
            )
    }

    #[test]
    fn test_validate_required_string() {
        let schema = portfolio_like();

        assert!(validate(&schema, &json!({"key": "proj1"})).is_empty());

        let diagnostics = validate(&schema, &json!({}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute, Some("key".to_string()));

        let diagnostics = validate(&schema, &json!({"key": null}));
        assert_eq!(diagnostics.len(), 1);

        let diagnostics = validate(&schema, &json!({"key": 123}));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("Invalid type"));
    }

    #[test]
    fn test_validate_computed_attribute_skipped() {
        let schema = portfolio_like();
        assert!(validate(&schema, &json!({"key": "proj1", "id": 123})).is_empty());
    }

    #[test]
    fn test_validate_allowed_values() {
        let schema = portfolio_like();

        for visibility in ["public", "private"] {
            assert!(validate(&schema, &json!({"key": "k", "visibility": visibility})).is_empty());
        }

        let diagnostics = validate(&schema, &json!({"key": "k", "visibility": "internal"}));
        assert_eq!(diagnostics.len(), 1);
        let detail = diagnostics[0].detail.clone().unwrap();
        assert!(detail.contains("public or private"));
        assert!(detail.contains("got: internal"));
    }

    #[test]
    fn test_validate_list() {
        let schema = portfolio_like();

        assert!(validate(&schema, &json!({"key": "k", "tags": ["a", "b"]})).is_empty());
        assert!(validate(&schema, &json!({"key": "k", "tags": []})).is_empty());

        let diagnostics = validate(&schema, &json!({"key": "k", "tags": ["a", 1]}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute, Some("tags.1".to_string()));

        let diagnostics = validate(&schema, &json!({"key": "k", "tags": "a,b"}));
        assert_eq!(diagnostics.len(), 1);
    }

    #[test]
    fn test_validate_conflicts_reported_once() {
        let schema = portfolio_like();

        let diagnostics = validate(&schema, &json!({"key": "k", "tags": ["a"], "regexp": "b.*"}));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("Conflicting"));

        // Empty values do not count as set.
        assert!(validate(&schema, &json!({"key": "k", "tags": [], "regexp": "b.*"})).is_empty());
        assert!(validate(&schema, &json!({"key": "k", "tags": ["a"], "regexp": ""})).is_empty());
    }

    #[test]
    fn test_validate_multiple_errors() {
        let schema = portfolio_like();
        let diagnostics = validate(&schema, &json!({"key": 1, "visibility": "nope", "tags": 3}));
        assert_eq!(diagnostics.len(), 3);
    }

    #[test]
    fn test_validate_bool() {
        let schema = Schema::v0().with_attribute("insecure", Attribute::optional_bool());
        assert!(is_valid(&schema, &json!({"insecure": true})));
        assert!(!is_valid(&schema, &json!({"insecure": "true"})));
    }

    #[test]
    fn test_validate_result_helper() {
        let schema = portfolio_like();
        assert!(validate_result(&schema, &json!({"key": "k"})).is_ok());
        let result = validate_result(&schema, &json!({}));
        assert_eq!(result.unwrap_err().len(), 1);
    }

    #[test]
    fn test_validate_root_not_object() {
        let diagnostics = validate(&portfolio_like(), &json!("not an object"));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("Expected object"));
    }

    #[test]
    fn test_join_alternatives() {
        let modes: Vec<String> = ["NONE", "MANUAL", "TAGS", "REGEXP", "REST"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(join_alternatives(&modes), "NONE, MANUAL, TAGS, REGEXP or REST");
        assert_eq!(join_alternatives(&modes[..1]), "NONE");
        assert_eq!(join_alternatives(&[]), "");
    }
}
