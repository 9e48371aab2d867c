//! Object store abstraction
//!
//! Resources never talk to a database directly. They read rows as
//! [`Record`]s through an [`ObjectStore`], which is free to be a SQL backend,
//! a document store or the in-memory store used in tests.

use crate::core::error::StorageError;
use crate::core::query::{Filters, Query};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StorageError>;

/// One row of a model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Runtime type name of the row (its model)
    pub model: String,
    pub id: i64,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl Record {
    pub fn new(model: impl Into<String>, id: i64) -> Self {
        Self {
            model: model.into(),
            id,
            fields: Map::new(),
        }
    }

    /// Builder-style attribute assignment
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Read an attribute; `id` and `pk` both name the identifier
    pub fn attribute(&self, name: &str) -> Option<Value> {
        match name {
            "id" | "pk" => Some(Value::from(self.id)),
            _ => self.fields.get(name).cloned(),
        }
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(name.into(), value.into());
    }
}

/// How a named relation of a model is stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Relation {
    /// Single related row whose id is held in `column`
    ForeignKey { target: String, column: String },

    /// Rows of `source` whose `column` holds this row's id
    Reverse { source: String, column: String },

    /// Single related row of any model, named by `type_column` and `id_column`
    Generic {
        type_column: String,
        id_column: String,
    },
}

impl Relation {
    /// A foreign key stored in the conventional `<name>_id` column
    pub fn foreign_key(name: &str, target: impl Into<String>) -> Self {
        Relation::ForeignKey {
            target: target.into(),
            column: format!("{}_id", name),
        }
    }

    pub fn reverse(source: impl Into<String>, column: impl Into<String>) -> Self {
        Relation::Reverse {
            source: source.into(),
            column: column.into(),
        }
    }

    pub fn generic(type_column: impl Into<String>, id_column: impl Into<String>) -> Self {
        Relation::Generic {
            type_column: type_column.into(),
            id_column: id_column.into(),
        }
    }
}

/// The attributes and relations a model exposes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelSchema {
    pub name: String,
    pub attributes: Vec<String>,
    #[serde(default)]
    pub relations: HashMap<String, Relation>,
    /// Values a new row starts with before its submitted fields apply
    #[serde(default)]
    pub defaults: Map<String, Value>,
}

impl ModelSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: vec!["id".to_string()],
            relations: HashMap::new(),
            defaults: Map::new(),
        }
    }

    pub fn attribute(mut self, name: impl Into<String>) -> Self {
        self.attributes.push(name.into());
        self
    }

    pub fn attributes(mut self, names: &[&str]) -> Self {
        self.attributes.extend(names.iter().map(|s| s.to_string()));
        self
    }

    /// Declare an attribute with the value new rows start with
    pub fn default_value(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let name = name.into();
        if !self.attributes.contains(&name) {
            self.attributes.push(name.clone());
        }
        self.defaults.insert(name, value.into());
        self
    }

    /// Declare a relation; foreign keys also expose their id column
    pub fn relation(mut self, name: impl Into<String>, relation: Relation) -> Self {
        if let Relation::ForeignKey { column, .. } = &relation
            && !self.attributes.contains(column)
        {
            self.attributes.push(column.clone());
        }
        self.relations.insert(name.into(), relation);
        self
    }

    /// Whether `name` is a readable attribute or relation of the model
    pub fn has_field(&self, name: &str) -> bool {
        name == "pk" || self.attributes.iter().any(|a| a == name) || self.relations.contains_key(name)
    }
}

/// Storage backend consumed by resources
///
/// `get` must fail with [`StorageError::DoesNotExist`] or
/// [`StorageError::MultipleObjectsReturned`] unless exactly one row matches.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Schema of a model, if the store knows it
    fn schema(&self, model: &str) -> Option<ModelSchema>;

    /// Fetch exactly one row of `model` matching every lookup
    async fn get(&self, model: &str, lookups: &Filters) -> StoreResult<Record>;

    /// Run a filter/exclude/slice query, ordered by ascending id
    async fn query(&self, query: &Query) -> StoreResult<Vec<Record>>;

    /// Follow a single-valued relation
    async fn related_one(&self, record: &Record, relation: &str) -> StoreResult<Option<Record>>;

    /// Materialise a collection relation
    async fn related_many(&self, record: &Record, relation: &str) -> StoreResult<Vec<Record>>;

    /// Iterate a collection relation lazily
    ///
    /// Defaults to streaming the materialised collection.
    async fn related_stream(
        &self,
        record: &Record,
        relation: &str,
    ) -> StoreResult<BoxStream<'static, StoreResult<Record>>> {
        let rows = self.related_many(record, relation).await?;
        Ok(stream::iter(rows.into_iter().map(Ok)).boxed())
    }

    /// Persist a new row and return it with its assigned id
    async fn insert(&self, model: &str, fields: Map<String, Value>) -> StoreResult<Record>;

    /// Persist `record`, limited to `update_fields` when given
    async fn save(&self, record: &Record, update_fields: Option<&[&str]>) -> StoreResult<Record>;
}
