//! In-memory object store and cache for testing and development

use crate::core::cache::{CacheBackend, CacheResult};
use crate::core::error::{CacheError, StorageError};
use crate::core::query::{Filters, Lookup, Query, as_integer};
use crate::core::store::{ModelSchema, ObjectStore, Record, Relation, StoreResult};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

// =============================================================================
// Object store
// =============================================================================

#[derive(Default)]
struct Tables {
    schemas: HashMap<String, ModelSchema>,
    rows: HashMap<String, BTreeMap<i64, Record>>,
}

impl Tables {
    fn row(&self, model: &str, id: i64) -> Option<&Record> {
        self.rows.get(model).and_then(|rows| rows.get(&id))
    }

    fn relation(&self, record: &Record, name: &str) -> StoreResult<&Relation> {
        self.schemas
            .get(&record.model)
            .and_then(|schema| schema.relations.get(name))
            .ok_or_else(|| StorageError::UnknownRelation {
                model: record.model.clone(),
                relation: name.to_string(),
            })
    }

    /// The rows `relation` points at from `record`
    fn follow(&self, record: &Record, name: &str) -> StoreResult<Vec<&Record>> {
        let related: Vec<&Record> = match self.relation(record, name)? {
            Relation::ForeignKey { target, column } => record
                .attribute(column)
                .as_ref()
                .and_then(as_integer)
                .and_then(|id| self.row(target, id))
                .into_iter()
                .collect(),
            Relation::Generic {
                type_column,
                id_column,
            } => {
                let model = record.attribute(type_column);
                let id = record.attribute(id_column).as_ref().and_then(as_integer);
                match (model.as_ref().and_then(Value::as_str), id) {
                    (Some(model), Some(id)) => self.row(model, id).into_iter().collect(),
                    _ => Vec::new(),
                }
            }
            Relation::Reverse { source, column } => self
                .rows
                .get(source)
                .map(|rows| {
                    rows.values()
                        .filter(|row| {
                            row.attribute(column).as_ref().and_then(as_integer) == Some(record.id)
                        })
                        .collect()
                })
                .unwrap_or_default(),
        };
        Ok(related)
    }

    /// Every value reachable from `record` along `path`
    fn values(&self, record: &Record, path: &[String]) -> StoreResult<Vec<Value>> {
        match path {
            [] => Ok(Vec::new()),
            [name] => Ok(vec![record.attribute(name).unwrap_or(Value::Null)]),
            [relation, rest @ ..] => {
                if let [last] = rest
                    && (last == "id" || last == "pk")
                    && let Relation::ForeignKey { column, .. } = self.relation(record, relation)?
                {
                    return Ok(vec![record.attribute(column).unwrap_or(Value::Null)]);
                }
                let mut values = Vec::new();
                for related in self.follow(record, relation)? {
                    values.extend(self.values(related, rest)?);
                }
                Ok(values)
            }
        }
    }

    fn matches(&self, record: &Record, lookups: &Filters) -> StoreResult<bool> {
        for (key, expected) in lookups {
            let lookup = Lookup::parse(key);
            let values = self.values(record, &lookup.path)?;
            let hit = if values.is_empty() {
                lookup.matches(&Value::Null, expected)
            } else {
                values.iter().any(|actual| lookup.matches(actual, expected))
            };
            if !hit {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn select(&self, model: &str, lookups: &Filters, excludes: &[Filters]) -> StoreResult<Vec<&Record>> {
        let Some(rows) = self.rows.get(model) else {
            return Ok(Vec::new());
        };
        let mut selected = Vec::new();
        for row in rows.values() {
            if !self.matches(row, lookups)? {
                continue;
            }
            let mut excluded = false;
            for group in excludes {
                if self.matches(row, group)? {
                    excluded = true;
                    break;
                }
            }
            if !excluded {
                selected.push(row);
            }
        }
        Ok(selected)
    }
}

/// In-memory object store
///
/// Rows are kept per model in ascending id order. Relations and lookups
/// follow the registered [`ModelSchema`]s. Uses RwLock for thread-safe access.
#[derive(Clone, Default)]
pub struct InMemoryObjectStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style schema registration
    pub fn with_schema(self, schema: ModelSchema) -> Self {
        if let Ok(mut tables) = self.tables.write() {
            tables.schemas.insert(schema.name.clone(), schema);
        }
        self
    }

    /// Store `record` as is, replacing any row with the same id
    pub fn put(&self, record: Record) -> StoreResult<Record> {
        let mut tables = self.write()?;
        tables
            .rows
            .entry(record.model.clone())
            .or_default()
            .insert(record.id, record.clone());
        Ok(record)
    }

    /// Read a row back without going through lookups
    pub fn row(&self, model: &str, id: i64) -> StoreResult<Option<Record>> {
        Ok(self.read()?.row(model, id).cloned())
    }

    /// Number of rows of `model`
    pub fn count(&self, model: &str) -> StoreResult<usize> {
        Ok(self.read()?.rows.get(model).map_or(0, BTreeMap::len))
    }

    fn read(&self) -> StoreResult<std::sync::RwLockReadGuard<'_, Tables>> {
        self.tables.read().map_err(|e| StorageError::Backend {
            message: format!("Failed to acquire read lock: {}", e),
        })
    }

    fn write(&self) -> StoreResult<std::sync::RwLockWriteGuard<'_, Tables>> {
        self.tables.write().map_err(|e| StorageError::Backend {
            message: format!("Failed to acquire write lock: {}", e),
        })
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    fn schema(&self, model: &str) -> Option<ModelSchema> {
        self.read().ok()?.schemas.get(model).cloned()
    }

    async fn get(&self, model: &str, lookups: &Filters) -> StoreResult<Record> {
        let tables = self.read()?;
        let rows = tables.select(model, lookups, &[])?;
        match rows.as_slice() {
            [row] => Ok((*row).clone()),
            [] => Err(StorageError::DoesNotExist {
                model: model.to_string(),
            }),
            _ => Err(StorageError::MultipleObjectsReturned {
                model: model.to_string(),
                count: rows.len(),
            }),
        }
    }

    async fn query(&self, query: &Query) -> StoreResult<Vec<Record>> {
        let tables = self.read()?;
        let rows = tables.select(&query.model, &query.filters, &query.excludes)?;
        Ok(rows
            .into_iter()
            .skip(query.offset)
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn related_one(&self, record: &Record, relation: &str) -> StoreResult<Option<Record>> {
        let tables = self.read()?;
        if let Relation::Reverse { .. } = tables.relation(record, relation)? {
            return Err(StorageError::InvalidLookup {
                lookup: relation.to_string(),
                message: "collection relation used as a single row".to_string(),
            });
        }
        Ok(tables.follow(record, relation)?.first().map(|r| (*r).clone()))
    }

    async fn related_many(&self, record: &Record, relation: &str) -> StoreResult<Vec<Record>> {
        let tables = self.read()?;
        Ok(tables
            .follow(record, relation)?
            .into_iter()
            .cloned()
            .collect())
    }

    async fn insert(&self, model: &str, fields: Map<String, Value>) -> StoreResult<Record> {
        let mut tables = self.write()?;
        let mut values = tables
            .schemas
            .get(model)
            .map(|schema| schema.defaults.clone())
            .unwrap_or_default();
        values.extend(fields);

        let rows = tables.rows.entry(model.to_string()).or_default();
        let id = rows.keys().next_back().map_or(1, |last| last + 1);
        let record = Record {
            model: model.to_string(),
            id,
            fields: values,
        };
        rows.insert(id, record.clone());
        Ok(record)
    }

    async fn save(&self, record: &Record, update_fields: Option<&[&str]>) -> StoreResult<Record> {
        let mut tables = self.write()?;
        let stored = tables
            .rows
            .get_mut(&record.model)
            .and_then(|rows| rows.get_mut(&record.id))
            .ok_or_else(|| StorageError::DoesNotExist {
                model: record.model.clone(),
            })?;
        match update_fields {
            Some(names) => {
                for name in names {
                    match record.fields.get(*name) {
                        Some(value) => stored.set(*name, value.clone()),
                        None => {
                            stored.fields.remove(*name);
                        }
                    }
                }
            }
            None => stored.fields = record.fields.clone(),
        }
        Ok(stored.clone())
    }
}

// =============================================================================
// Cache
// =============================================================================

struct Entry {
    value: Value,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// In-memory cache with per-entry expiry
///
/// `add` and `decrement` run under one lock and are atomic.
#[derive(Clone, Default)]
pub struct InMemoryCache {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> CacheResult<std::sync::MutexGuard<'_, HashMap<String, Entry>>> {
        self.entries.lock().map_err(|e| CacheError::Backend {
            message: format!("Failed to acquire cache lock: {}", e),
        })
    }
}

#[async_trait]
impl CacheBackend for InMemoryCache {
    async fn get(&self, key: &str) -> CacheResult<Option<Value>> {
        let mut entries = self.lock()?;
        if let Some(entry) = entries.get(key)
            && entry.is_live(Instant::now())
        {
            return Ok(Some(entry.value.clone()));
        }
        // expired entries are dropped on read
        entries.remove(key);
        Ok(None)
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration) -> CacheResult<()> {
        let expires_at = Instant::now() + ttl;
        self.lock()?
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn add(&self, key: &str, value: Value, ttl: Duration) -> CacheResult<bool> {
        let mut entries = self.lock()?;
        let now = Instant::now();
        if entries.get(key).is_some_and(|entry| entry.is_live(now)) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn decrement(&self, key: &str) -> CacheResult<i64> {
        let mut entries = self.lock()?;
        let now = Instant::now();
        let entry = entries
            .get_mut(key)
            .filter(|entry| entry.is_live(now))
            .ok_or_else(|| CacheError::MissingKey {
                key: key.to_string(),
            })?;
        let current = entry.value.as_i64().ok_or_else(|| CacheError::NotAnInteger {
            key: key.to_string(),
        })?;
        entry.value = Value::from(current - 1);
        Ok(current - 1)
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.lock()?.remove(key);
        Ok(())
    }
}
