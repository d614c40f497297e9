//! # Resources & Query Context
//!
//! Client-side representations of the records a view shows, the selection a
//! bulk operation applies to, and the query context stamped on every request.

use panel_framework::Params;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::{self, Display};

/// A record key. Integer keys stay integers on the wire; anything else is a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResourceKey {
    Int(u64),
    Str(String),
}

impl ResourceKey {
    /// The key as a storage row id, if it is (or parses as) an integer.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            ResourceKey::Int(id) => Some(*id),
            ResourceKey::Str(s) => s.parse().ok(),
        }
    }
}

impl Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKey::Int(id) => write!(f, "{id}"),
            ResourceKey::Str(s) => f.write_str(s),
        }
    }
}

impl From<u64> for ResourceKey {
    fn from(id: u64) -> Self {
        ResourceKey::Int(id)
    }
}

impl From<&str> for ResourceKey {
    fn from(s: &str) -> Self {
        ResourceKey::Str(s.to_string())
    }
}

impl From<String> for ResourceKey {
    fn from(s: String) -> Self {
        ResourceKey::Str(s)
    }
}

impl From<ResourceKey> for Value {
    fn from(key: ResourceKey) -> Self {
        match key {
            ResourceKey::Int(id) => Value::from(id),
            ResourceKey::Str(s) => Value::String(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceId {
    pub value: ResourceKey,
    /// Set when the record was reached through a many-to-many relationship.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pivot_value: Option<ResourceKey>,
}

/// One row of a resource listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl Resource {
    pub fn new(value: impl Into<ResourceKey>) -> Self {
        Self {
            id: ResourceId {
                value: value.into(),
                pivot_value: None,
            },
            attributes: Map::new(),
        }
    }

    pub fn via_pivot(value: impl Into<ResourceKey>, pivot: impl Into<ResourceKey>) -> Self {
        let mut resource = Self::new(value);
        resource.id.pivot_value = Some(pivot.into());
        resource
    }
}

/// What a bulk operation applies to.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    Resources(Vec<Resource>),
    /// Every record matching the query context, recomputed by the server when
    /// the request arrives.
    AllMatching,
}

pub fn map_resources(resources: &[Resource]) -> Vec<ResourceKey> {
    resources.iter().map(|resource| resource.id.value.clone()).collect()
}

/// Pivot ids of the resources reached through a pivot; the others are dropped.
pub fn map_pivots(resources: &[Resource]) -> Vec<ResourceKey> {
    resources
        .iter()
        .filter_map(|resource| resource.id.pivot_value.clone())
        .collect()
}

pub(crate) fn keys_to_value(keys: Vec<ResourceKey>) -> Value {
    Value::Array(keys.into_iter().map(Value::from).collect())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrashedState {
    /// Trashed records are hidden.
    #[default]
    #[serde(rename = "")]
    Without,
    With,
    Only,
}

impl TrashedState {
    pub fn as_str(self) -> &'static str {
        match self {
            TrashedState::Without => "",
            TrashedState::With => "with",
            TrashedState::Only => "only",
        }
    }

    /// Unknown values read as the default.
    pub fn parse(value: &str) -> Self {
        match value {
            "with" => TrashedState::With,
            "only" => TrashedState::Only,
            _ => TrashedState::Without,
        }
    }
}

/// The snapshot of "what the user currently sees" sent with every mutation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryContext {
    pub search: Option<String>,
    pub filters: Option<String>,
    pub trashed: TrashedState,
    pub via_resource: Option<String>,
    pub via_resource_id: Option<ResourceKey>,
    pub via_relationship: Option<String>,
}

impl QueryContext {
    /// Serializes the context under its wire names. Absent values are omitted;
    /// `trashed` is always sent.
    pub fn to_params(&self) -> Params {
        let mut params = Params::new();
        let mut put = |name: &str, value: Option<Value>| {
            if let Some(value) = value {
                params.insert(name.to_string(), value);
            }
        };
        put("search", self.search.clone().map(Value::String));
        put("filters", self.filters.clone().map(Value::String));
        put("trashed", Some(Value::from(self.trashed.as_str())));
        put("viaResource", self.via_resource.clone().map(Value::String));
        put("viaResourceId", self.via_resource_id.clone().map(Value::from));
        put("viaRelationship", self.via_relationship.clone().map(Value::String));
        params
    }

    /// Reads a context back from request parameters. Empty strings read as absent.
    pub fn from_params(params: &Params) -> Self {
        let text = |name: &str| {
            params
                .get(name)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let via_resource_id = match params.get("viaResourceId") {
            Some(Value::Number(n)) => n.as_u64().map(ResourceKey::Int),
            Some(Value::String(s)) if !s.is_empty() => Some(ResourceKey::Str(s.clone())),
            _ => None,
        };
        Self {
            search: text("search"),
            filters: text("filters"),
            trashed: TrashedState::parse(params.get("trashed").and_then(Value::as_str).unwrap_or_default()),
            via_resource: text("viaResource"),
            via_resource_id,
            via_relationship: text("viaRelationship"),
        }
    }

    pub fn is_via_relationship(&self) -> bool {
        self.via_resource.is_some() && self.via_resource_id.is_some() && self.via_relationship.is_some()
    }
}

/// Everything a view knows about where it is rendered.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewContext {
    pub resource_name: String,
    pub lens: Option<String>,
    pub via_resource: Option<String>,
    pub via_resource_id: Option<ResourceKey>,
    pub via_relationship: Option<String>,
    pub relationship_type: Option<String>,
    pub via_many_to_many: bool,
    pub search: Option<String>,
    pub trashed: TrashedState,
}

impl ViewContext {
    pub fn new(resource_name: impl Into<String>) -> Self {
        Self {
            resource_name: resource_name.into(),
            ..Self::default()
        }
    }

    pub fn lens(mut self, lens: impl Into<String>) -> Self {
        self.lens = Some(lens.into());
        self
    }

    /// Places the view on a relationship of a parent record.
    pub fn via(
        mut self,
        resource: impl Into<String>,
        resource_id: impl Into<ResourceKey>,
        relationship: impl Into<String>,
    ) -> Self {
        self.via_resource = Some(resource.into());
        self.via_resource_id = Some(resource_id.into());
        self.via_relationship = Some(relationship.into());
        self
    }

    /// Many-to-many relationship types switch deletes over to detaches.
    pub fn relationship_type(mut self, relationship_type: impl Into<String>) -> Self {
        let relationship_type = relationship_type.into();
        self.via_many_to_many = matches!(relationship_type.as_str(), "belongsToMany" | "morphToMany");
        self.relationship_type = Some(relationship_type);
        self
    }

    pub fn search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    pub fn trashed(mut self, trashed: TrashedState) -> Self {
        self.trashed = trashed;
        self
    }

    /// The query context for a request issued now, with the given encoded filters.
    pub fn query_context(&self, encoded_filters: Option<String>) -> QueryContext {
        QueryContext {
            search: self.search.clone(),
            filters: encoded_filters.filter(|f| !f.is_empty()),
            trashed: self.trashed,
            via_resource: self.via_resource.clone(),
            via_resource_id: self.via_resource_id.clone(),
            via_relationship: self.via_relationship.clone(),
        }
    }
}
