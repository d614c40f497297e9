//! Server-side resolution of a request's target rows.
//!
//! `resources=all` is recomputed here, against storage as it is when the
//! request arrives, from the query context the client stamped on it.

use super::schema::{Lens, Relationship, ResourceSchema, SchemaRegistry};
use crate::filters::{decode_filters, is_active_value};
use crate::resource::{QueryContext, ResourceKey, TrashedState};
use panel_framework::storage::Row;
use panel_framework::{PanelError, StorageClient};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// A row that matched, with the pivot row that linked it when reached
/// through a many-to-many relationship.
#[derive(Debug, Clone, PartialEq)]
pub struct Matched {
    pub row: Row,
    pub pivot_id: Option<u64>,
}

/// What a mutation request targets.
#[derive(Debug, Clone, PartialEq)]
pub enum Targets {
    Ids(Vec<u64>),
    AllMatching,
}

impl Targets {
    /// Reads the `resources` parameter: `"all"`, an array of keys, or a
    /// comma-separated list.
    pub fn from_param(value: Option<&Value>) -> Result<Self, PanelError> {
        let invalid = || PanelError::ValidationFailure("resources must be \"all\" or a list of ids".into());
        match value {
            Some(Value::String(s)) if s == "all" => Ok(Targets::AllMatching),
            Some(Value::String(s)) => s
                .split(',')
                .filter(|id| !id.trim().is_empty())
                .map(|id| id.trim().parse::<u64>().map_err(|_| invalid()))
                .collect::<Result<_, _>>()
                .map(Targets::Ids),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    serde_json::from_value::<ResourceKey>(item.clone())
                        .ok()
                        .and_then(|key| key.as_u64())
                        .ok_or_else(invalid)
                })
                .collect::<Result<_, _>>()
                .map(Targets::Ids),
            _ => Err(invalid()),
        }
    }
}

/// Rows of `schema` the user currently sees under `context`, narrowed by `lens`.
///
/// Through a many-to-many relationship a row appears once per pivot row
/// linking it to the parent.
pub async fn matching_rows(
    storage: &StorageClient,
    registry: &SchemaRegistry,
    schema: &ResourceSchema,
    lens: Option<&Lens>,
    context: &QueryContext,
) -> Result<Vec<Matched>, PanelError> {
    let rows = storage.scan(&schema.table).await?;
    let mut matched: Vec<Matched> = match via_scope(storage, registry, schema, context).await? {
        Some(scope) => {
            let mut pivots: HashMap<u64, Vec<Option<u64>>> = HashMap::new();
            for (related, pivot_id) in scope {
                pivots.entry(related).or_default().push(pivot_id);
            }
            rows.into_iter()
                .flat_map(|row| {
                    pivots
                        .remove(&row.id)
                        .unwrap_or_default()
                        .into_iter()
                        .map(move |pivot_id| Matched { row: row.clone(), pivot_id })
                })
                .collect()
        }
        None => rows.into_iter().map(|row| Matched { row, pivot_id: None }).collect(),
    };

    if let Some(lens) = lens {
        matched.retain(|m| lens.matches(&m.row));
    }

    if schema.soft_deletes {
        matched.retain(|m| match context.trashed {
            TrashedState::Without => !m.row.is_trashed(),
            TrashedState::With => true,
            TrashedState::Only => m.row.is_trashed(),
        });
    }

    if let Some(search) = context.search.as_deref().map(str::to_lowercase) {
        matched.retain(|m| matches_search(&m.row, &search));
    }

    if let Some(encoded) = &context.filters {
        let constraints: Vec<(String, Value)> = decode_filters(encoded)?
            .into_iter()
            .filter(|(_, value)| is_active_value(value))
            .collect();
        matched.retain(|m| {
            constraints
                .iter()
                .all(|(column, value)| matches_filter(m.row.get(column), value))
        });
    }

    Ok(matched)
}

/// Rows of `schema` with the given ids, regardless of the query context.
pub async fn rows_by_id(storage: &StorageClient, schema: &ResourceSchema, ids: &[u64]) -> Result<Vec<Matched>, PanelError> {
    let wanted: HashSet<u64> = ids.iter().copied().collect();
    Ok(storage
        .scan(&schema.table)
        .await?
        .into_iter()
        .filter(|row| wanted.contains(&row.id))
        .map(|row| Matched { row, pivot_id: None })
        .collect())
}

pub async fn resolve_targets(
    storage: &StorageClient,
    registry: &SchemaRegistry,
    schema: &ResourceSchema,
    lens: Option<&Lens>,
    targets: &Targets,
    context: &QueryContext,
) -> Result<Vec<Matched>, PanelError> {
    match targets {
        Targets::AllMatching => matching_rows(storage, registry, schema, lens, context).await,
        Targets::Ids(ids) => rows_by_id(storage, schema, ids).await,
    }
}

/// The parent record and relationship a view is scoped to.
pub struct ViaRelationship {
    pub parent_id: u64,
    pub relationship: Relationship,
}

pub fn via_relationship(
    registry: &SchemaRegistry,
    schema: &ResourceSchema,
    context: &QueryContext,
) -> Result<Option<ViaRelationship>, PanelError> {
    let (Some(via_resource), Some(via_id), Some(via_relationship)) = (
        context.via_resource.as_deref(),
        context.via_resource_id.as_ref(),
        context.via_relationship.as_deref(),
    ) else {
        return Ok(None);
    };

    let parent = registry.get(via_resource)?;
    let relationship = parent.relationship(via_relationship)?.clone();
    if relationship.related() != schema.uri_key {
        return Err(PanelError::ValidationFailure(format!(
            "{via_resource}.{via_relationship} does not lead to {}",
            schema.uri_key
        )));
    }
    let parent_id = via_id
        .as_u64()
        .ok_or_else(|| PanelError::ValidationFailure(format!("viaResourceId {via_id} is not a row id")))?;
    Ok(Some(ViaRelationship { parent_id, relationship }))
}

/// Ids of the rows reachable through the via relationship, each with the pivot
/// row that links it. A row linked twice appears twice.
async fn via_scope(
    storage: &StorageClient,
    registry: &SchemaRegistry,
    schema: &ResourceSchema,
    context: &QueryContext,
) -> Result<Option<Vec<(u64, Option<u64>)>>, PanelError> {
    let Some(via) = via_relationship(registry, schema, context)? else {
        return Ok(None);
    };

    let scope = match &via.relationship {
        Relationship::HasMany { foreign_key, .. } => storage
            .scan(&schema.table)
            .await?
            .into_iter()
            .filter(|row| row.get_u64(foreign_key) == Some(via.parent_id))
            .map(|row| (row.id, None))
            .collect(),
        Relationship::BelongsToMany {
            pivot_table,
            parent_key,
            related_key,
            ..
        } => storage
            .scan(pivot_table)
            .await?
            .into_iter()
            .filter(|pivot| pivot.get_u64(parent_key) == Some(via.parent_id))
            .filter_map(|pivot| pivot.get_u64(related_key).map(|related| (related, Some(pivot.id))))
            .collect(),
    };
    Ok(Some(scope))
}

fn matches_search(row: &Row, needle: &str) -> bool {
    if row.id.to_string() == needle {
        return true;
    }
    row.attributes
        .values()
        .filter_map(Value::as_str)
        .any(|text| text.to_lowercase().contains(needle))
}

/// Equality, membership for list values, and enabled flags for object values.
fn matches_filter(attribute: Option<&Value>, value: &Value) -> bool {
    let Some(attribute) = attribute else {
        return false;
    };
    match value {
        Value::Array(options) => options.contains(attribute),
        Value::Object(flags) => attribute
            .as_str()
            .is_some_and(|key| flags.get(key) == Some(&Value::Bool(true))),
        _ => attribute == value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resources_param_accepts_all_lists_and_csv() {
        assert_eq!(Targets::from_param(Some(&json!("all"))).unwrap(), Targets::AllMatching);
        assert_eq!(Targets::from_param(Some(&json!([1, "2"]))).unwrap(), Targets::Ids(vec![1, 2]));
        assert_eq!(Targets::from_param(Some(&json!("3, 4"))).unwrap(), Targets::Ids(vec![3, 4]));
        assert!(Targets::from_param(None).is_err());
        assert!(Targets::from_param(Some(&json!(["x"]))).is_err());
    }

    #[test]
    fn filter_values_match_by_shape() {
        assert!(matches_filter(Some(&json!("active")), &json!("active")));
        assert!(matches_filter(Some(&json!("b")), &json!(["a", "b"])));
        assert!(matches_filter(Some(&json!("admin")), &json!({ "admin": true, "editor": false })));
        assert!(!matches_filter(Some(&json!("editor")), &json!({ "admin": true, "editor": false })));
        assert!(!matches_filter(None, &json!("active")));
    }
}
