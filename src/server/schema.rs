use crate::filters::FilterDefinition;
use crate::metrics::{Card, MetricRequest, PanelResource, RequestKind};
use panel_framework::storage::Row;
use panel_framework::PanelError;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Per-resource authorization. Every check defaults to allowed.
pub trait ResourcePolicy: Send + Sync {
    fn view_any(&self) -> bool {
        true
    }

    fn delete(&self, _row: &Row) -> bool {
        true
    }

    fn restore(&self, _row: &Row) -> bool {
        true
    }

    fn force_delete(&self, _row: &Row) -> bool {
        true
    }
}

pub struct AllowAll;

impl ResourcePolicy for AllowAll {}

#[derive(Debug, Clone, PartialEq)]
pub enum Relationship {
    /// Related rows carry the parent's id in `foreign_key`.
    HasMany {
        name: String,
        related: String,
        foreign_key: String,
    },
    /// Parent and related rows are linked by rows of `pivot_table`.
    BelongsToMany {
        name: String,
        related: String,
        pivot_table: String,
        parent_key: String,
        related_key: String,
    },
}

impl Relationship {
    pub fn name(&self) -> &str {
        match self {
            Relationship::HasMany { name, .. } | Relationship::BelongsToMany { name, .. } => name,
        }
    }

    /// Uri key of the resource on the other side.
    pub fn related(&self) -> &str {
        match self {
            Relationship::HasMany { related, .. } | Relationship::BelongsToMany { related, .. } => related,
        }
    }
}

/// A named preset over a resource's rows.
#[derive(Clone)]
pub struct Lens {
    pub name: String,
    predicate: Arc<dyn Fn(&Row) -> bool + Send + Sync>,
}

impl Lens {
    pub fn new(name: impl Into<String>, predicate: impl Fn(&Row) -> bool + Send + Sync + 'static) -> Self {
        Self {
            name: name.into(),
            predicate: Arc::new(predicate),
        }
    }

    pub fn matches(&self, row: &Row) -> bool {
        (self.predicate)(row)
    }
}

impl fmt::Debug for Lens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lens").field("name", &self.name).finish_non_exhaustive()
    }
}

/// How a resource is stored, related, filtered and authorized.
#[derive(Clone)]
pub struct ResourceSchema {
    pub uri_key: String,
    pub table: String,
    pub soft_deletes: bool,
    pub relationships: Vec<Relationship>,
    pub lenses: Vec<Lens>,
    pub filters: Vec<FilterDefinition>,
    pub cards: Vec<Card>,
    pub detail_cards: Vec<Card>,
    pub policy: Arc<dyn ResourcePolicy>,
}

impl fmt::Debug for ResourceSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceSchema")
            .field("uri_key", &self.uri_key)
            .field("table", &self.table)
            .field("soft_deletes", &self.soft_deletes)
            .field("relationships", &self.relationships)
            .finish_non_exhaustive()
    }
}

impl ResourceSchema {
    pub fn new(uri_key: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            uri_key: uri_key.into(),
            table: table.into(),
            soft_deletes: false,
            relationships: Vec::new(),
            lenses: Vec::new(),
            filters: Vec::new(),
            cards: Vec::new(),
            detail_cards: Vec::new(),
            policy: Arc::new(AllowAll),
        }
    }

    pub fn soft_deletes(mut self) -> Self {
        self.soft_deletes = true;
        self
    }

    pub fn has_many(mut self, name: &str, related: &str, foreign_key: &str) -> Self {
        self.relationships.push(Relationship::HasMany {
            name: name.into(),
            related: related.into(),
            foreign_key: foreign_key.into(),
        });
        self
    }

    pub fn belongs_to_many(mut self, name: &str, related: &str, pivot_table: &str, parent_key: &str, related_key: &str) -> Self {
        self.relationships.push(Relationship::BelongsToMany {
            name: name.into(),
            related: related.into(),
            pivot_table: pivot_table.into(),
            parent_key: parent_key.into(),
            related_key: related_key.into(),
        });
        self
    }

    /// Adds a lens showing only the rows `predicate` accepts.
    pub fn lens(mut self, name: impl Into<String>, predicate: impl Fn(&Row) -> bool + Send + Sync + 'static) -> Self {
        self.lenses.push(Lens::new(name, predicate));
        self
    }

    pub fn filter(mut self, filter: FilterDefinition) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn card(mut self, card: Card) -> Self {
        self.cards.push(card);
        self
    }

    pub fn detail_card(mut self, card: Card) -> Self {
        self.detail_cards.push(card);
        self
    }

    pub fn policy(mut self, policy: impl ResourcePolicy + 'static) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    pub fn relationship(&self, name: &str) -> Result<&Relationship, PanelError> {
        self.relationships
            .iter()
            .find(|relationship| relationship.name() == name)
            .ok_or_else(|| PanelError::NotFound(format!("relationship {}.{name}", self.uri_key)))
    }

    pub fn authorize_view_any(&self) -> Result<(), PanelError> {
        if self.policy.view_any() {
            Ok(())
        } else {
            Err(PanelError::AuthorizationDenied)
        }
    }

    /// Resolves a lens name. Unknown lenses are not found; no lens is always fine.
    pub fn find_lens(&self, lens: Option<&str>) -> Result<Option<&Lens>, PanelError> {
        let Some(name) = lens else {
            return Ok(None);
        };
        self.lenses
            .iter()
            .find(|known| known.name == name)
            .map(Some)
            .ok_or_else(|| PanelError::NotFound(format!("lens {}/{name}", self.uri_key)))
    }
}

impl PanelResource for ResourceSchema {
    fn uri_key(&self) -> &str {
        &self.uri_key
    }

    fn authorized_to_view_any(&self, _request: &MetricRequest<'_>) -> bool {
        self.policy.view_any()
    }

    fn available_cards(&self, _request: &MetricRequest<'_>) -> Vec<Card> {
        self.cards.clone()
    }

    fn available_cards_for_detail(&self, _request: &MetricRequest<'_>) -> Vec<Card> {
        self.detail_cards.clone()
    }

    fn available_filters(&self, _kind: RequestKind) -> Vec<FilterDefinition> {
        self.filters.clone()
    }
}

/// Every registered resource, by uri key.
#[derive(Clone, Debug, Default)]
pub struct SchemaRegistry {
    schemas: Arc<HashMap<String, Arc<ResourceSchema>>>,
}

impl SchemaRegistry {
    pub fn new(schemas: impl IntoIterator<Item = ResourceSchema>) -> Self {
        let schemas = schemas
            .into_iter()
            .map(|schema| (schema.uri_key.clone(), Arc::new(schema)))
            .collect();
        Self {
            schemas: Arc::new(schemas),
        }
    }

    pub fn get(&self, uri_key: &str) -> Result<Arc<ResourceSchema>, PanelError> {
        self.schemas
            .get(uri_key)
            .cloned()
            .ok_or_else(|| PanelError::NotFound(format!("resource {uri_key}")))
    }

    /// `(pivot_table, column)` pairs whose column points at rows of `uri_key`.
    pub fn pivot_references(&self, uri_key: &str) -> Vec<(String, String)> {
        let mut references = Vec::new();
        for schema in self.schemas.values() {
            for relationship in &schema.relationships {
                if let Relationship::BelongsToMany {
                    related,
                    pivot_table,
                    parent_key,
                    related_key,
                    ..
                } = relationship
                {
                    if schema.uri_key == uri_key {
                        references.push((pivot_table.clone(), parent_key.clone()));
                    }
                    if related == uri_key {
                        references.push((pivot_table.clone(), related_key.clone()));
                    }
                }
            }
        }
        references.sort();
        references.dedup();
        references
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pivot_references_cover_both_sides() {
        let registry = SchemaRegistry::new([
            ResourceSchema::new("roles", "roles").belongs_to_many("users", "users", "role_user", "role_id", "user_id"),
            ResourceSchema::new("users", "users"),
        ]);

        assert_eq!(
            registry.pivot_references("users"),
            vec![("role_user".to_string(), "user_id".to_string())]
        );
        assert_eq!(
            registry.pivot_references("roles"),
            vec![("role_user".to_string(), "role_id".to_string())]
        );
        assert!(matches!(registry.get("teams"), Err(PanelError::NotFound(_))));
    }

    #[test]
    fn lenses_must_be_declared() {
        let schema = ResourceSchema::new("users", "users").lens("active-users", |row| row.get_str("status") == Some("active"));
        assert!(schema.find_lens(None).unwrap().is_none());
        assert_eq!(schema.find_lens(Some("nope")).map_err(|e| e.status()).unwrap_err(), 404);

        let lens = schema.find_lens(Some("active-users")).unwrap().unwrap();
        let mut row = Row {
            id: 1,
            attributes: Default::default(),
            created_at: chrono::Utc::now(),
            deleted_at: None,
        };
        assert!(!lens.matches(&row));
        row.attributes.insert("status".into(), serde_json::json!("active"));
        assert!(lens.matches(&row));
    }
}
