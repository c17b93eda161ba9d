//! Schema-driven planning.
//!
//! Given the prior state and the proposed configuration, work out the state
//! the host should expect after apply and which attributes change on the way.

use std::collections::BTreeSet;

use serde_json::{Map, Value};

use crate::schema::{Attribute, Schema};
use crate::types::{AttributeChange, PlanResult};
use crate::validation::is_set;

/// Plan a change.
///
/// - `prior == None` plans a create.
/// - `proposed == Value::Null` plans a delete.
/// - Otherwise computed attributes are carried over from `prior`, unless a
///   `force_new` attribute changed, in which case the resource is replaced
///   and they are left unknown.
///
/// Unset values (missing, null, empty string, empty list) compare equal.
pub fn plan(schema: &Schema, prior: Option<&Value>, proposed: &Value) -> PlanResult {
    let names: BTreeSet<&String> = schema.block.attributes.keys().collect();

    if proposed.is_null() {
        let changes = prior
            .and_then(Value::as_object)
            .map(|prior| {
                names
                    .iter()
                    .filter_map(|name| {
                        let before = prior.get(*name);
                        is_set(before).then(|| {
                            AttributeChange::removed(name.as_str(), before.cloned().unwrap_or_default())
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        return PlanResult::with_changes(Value::Null, changes, false);
    }

    let mut planned = with_defaults(schema, proposed);
    let prior_obj = prior.and_then(Value::as_object);
    let mut changes = Vec::new();
    let mut requires_replace = false;

    for name in &names {
        let attr = &schema.block.attributes[*name];
        if is_computed_only(attr) {
            continue;
        }
        let before = prior_obj.and_then(|p| p.get(*name));
        let after = planned.get(*name);
        if same(before, after) {
            continue;
        }
        if prior_obj.is_some() && attr.force_new {
            requires_replace = true;
        }
        changes.push(change(name, before, after));
    }

    for name in &names {
        let attr = &schema.block.attributes[*name];
        if !is_computed_only(attr) {
            continue;
        }
        let carried = match prior_obj {
            Some(prior) if !requires_replace => prior.get(*name).cloned().unwrap_or(Value::Null),
            _ => Value::Null,
        };
        planned.insert(name.to_string(), carried);
    }

    let planned = Value::Object(planned);
    if changes.is_empty() {
        PlanResult::no_change(planned)
    } else {
        PlanResult::with_changes(planned, changes, requires_replace)
    }
}

fn with_defaults(schema: &Schema, proposed: &Value) -> Map<String, Value> {
    let mut planned = proposed.as_object().cloned().unwrap_or_default();
    for (name, attr) in &schema.block.attributes {
        if let Some(default) = &attr.default {
            if !is_set(planned.get(name)) {
                planned.insert(name.clone(), default.clone());
            }
        }
    }
    planned
}

fn is_computed_only(attr: &Attribute) -> bool {
    attr.flags.computed && !attr.flags.optional && !attr.flags.required
}

fn same(before: Option<&Value>, after: Option<&Value>) -> bool {
    match (is_set(before), is_set(after)) {
        (false, false) => true,
        (true, true) => before == after,
        _ => false,
    }
}

fn change(name: &str, before: Option<&Value>, after: Option<&Value>) -> AttributeChange {
    match (is_set(before), is_set(after)) {
        (false, _) => AttributeChange::added(name, after.cloned().unwrap_or_default()),
        (_, false) => AttributeChange::removed(name, before.cloned().unwrap_or_default()),
        _ => AttributeChange::modified(
            name,
            before.cloned().unwrap_or_default(),
            after.cloned().unwrap_or_default(),
        ),
    }
}
