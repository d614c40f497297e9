use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Column values of a stored record.
pub type Attributes = Map<String, Value>;

/// A stored record. `deleted_at` is set while the record is soft deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub id: u64,
    pub attributes: Attributes,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Row {
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.attributes.get(column)
    }

    pub fn get_u64(&self, column: &str) -> Option<u64> {
        self.get(column).and_then(Value::as_u64)
    }

    pub fn get_str(&self, column: &str) -> Option<&str> {
        self.get(column).and_then(Value::as_str)
    }

    pub fn is_trashed(&self) -> bool {
        self.deleted_at.is_some()
    }
}
