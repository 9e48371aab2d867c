//! Shared fixtures for the integration tests
//!
//! Provides the sample models (users, samples, notes), the resources
//! declared over them, and store/cache wrappers that count or break backend
//! calls so tests can observe what the engine touched.

#![allow(dead_code)]

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::{Map, Value};
use sileo::core::cache::{CacheBackend, CacheResult};
use sileo::core::error::CacheError;
use sileo::core::query::{Filters, Query};
use sileo::core::store::StoreResult;
use sileo::prelude::*;
use sileo::server::RegistryBuilder;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

// =============================================================================
// Tracing
// =============================================================================

/// Route `tracing` output through the test writer; `RUST_LOG` selects levels
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// =============================================================================
// Models
// =============================================================================

pub fn schemas() -> Vec<ModelSchema> {
    vec![
        ModelSchema::new("user")
            .attributes(&["username", "email"])
            .relation("samples", Relation::reverse("sample", "owner_id")),
        ModelSchema::new("sample")
            .attributes(&["title", "value", "target_type", "target_id"])
            .default_value("removed", false)
            .relation("owner", Relation::foreign_key("owner", "user"))
            .relation("notes", Relation::reverse("note", "sample_id"))
            .relation("target", Relation::generic("target_type", "target_id")),
        ModelSchema::new("note")
            .attributes(&["text"])
            .relation("sample", Relation::foreign_key("sample", "sample")),
    ]
}

/// A store holding two users, three samples and two notes
///
/// Sample 1 targets user 2 and sample 2 targets note 1 through the generic
/// `target` relation.
pub fn seeded_store() -> InMemoryObjectStore {
    let mut store = InMemoryObjectStore::new();
    for schema in schemas() {
        store = store.with_schema(schema);
    }

    let rows = vec![
        Record::new("user", 1)
            .with("username", "alice")
            .with("email", "alice@example.com"),
        Record::new("user", 2)
            .with("username", "bob")
            .with("email", "bob@example.com"),
        Record::new("sample", 1)
            .with("title", "first")
            .with("value", "1.50")
            .with("owner_id", 1)
            .with("removed", false)
            .with("target_type", "user")
            .with("target_id", 2),
        Record::new("sample", 2)
            .with("title", "second")
            .with("value", "2.00")
            .with("owner_id", 1)
            .with("removed", false)
            .with("target_type", "note")
            .with("target_id", 1),
        Record::new("sample", 3)
            .with("title", "third")
            .with("value", "3.25")
            .with("owner_id", 2)
            .with("removed", false),
        Record::new("note", 1).with("text", "n1").with("sample_id", 1),
        Record::new("note", 2).with("text", "n2").with("sample_id", 1),
    ];
    for row in rows {
        store.put(row).expect("seed row");
    }
    store
}

// =============================================================================
// Resources
// =============================================================================

pub fn user_resource() -> ResourceDefinition {
    ResourceDefinition::new("UserResource", QuerySet::all("user"))
        .with_fields(["id", "username"])
        .with_allowed_methods([Method::GetPk, Method::Filter])
        .with_filter_fields(&["username"])
}

pub fn note_resource() -> ResourceDefinition {
    ResourceDefinition::new("NoteResource", QuerySet::all("note"))
        .with_fields(["id", "text"])
        .with_allowed_methods([Method::GetPk])
}

pub fn sample_form() -> Arc<FormSpec> {
    FormSpec::new("Sample", "sample")
        .field(FormField::char("title").max_length(20))
        .field(FormField::decimal("value").optional())
        .field(FormField::foreign_key("owner", "user"))
        .into_arc()
}

/// Every method enabled, owner nested through the registry
pub fn sample_resource() -> ResourceDefinition {
    ResourceDefinition::new("SampleResource", QuerySet::all("sample").filter("removed", false))
        .with_fields(["id", "title", "value"])
        .with_fields([FieldDescriptor::nested("owner", ("test", "user"))])
        .with_allowed_methods(Method::ALL)
        .with_filter_fields(&["title", "owner__id"])
        .with_update_filter_fields(&["pk"])
        .with_delete_filter_fields(&["pk"])
        .with_form(sample_form())
}

/// Register users as `test/user` and notes as `test/note` under `v1`
pub fn register_base(builder: &mut RegistryBuilder) {
    builder
        .register("test", "user", user_resource().into_arc(), Some("v1"))
        .expect("register user")
        .register("test", "note", note_resource().into_arc(), Some("v1"))
        .expect("register note");
}

/// Register the base resources plus `sample` as `test/sample`
pub fn register_sample(builder: &mut RegistryBuilder, sample: ResourceDefinition) {
    register_base(builder);
    builder
        .register("test", "sample", sample.into_arc(), Some("v1"))
        .expect("register sample");
}

pub fn form_data(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

// =============================================================================
// Fixture
// =============================================================================

pub struct Fixture {
    pub store: InMemoryObjectStore,
    pub counting: Arc<CountingStore>,
    pub cache: InMemoryCache,
    pub host: Arc<ResourceHost>,
}

impl Fixture {
    pub fn new(register: impl FnOnce(&mut RegistryBuilder)) -> Self {
        let cache = InMemoryCache::new();
        Self::with_cache(Arc::new(cache.clone()), cache, register)
    }

    /// Serve through `backend`; `cache` is kept for inspection
    pub fn with_cache(
        backend: Arc<dyn CacheBackend>,
        cache: InMemoryCache,
        register: impl FnOnce(&mut RegistryBuilder),
    ) -> Self {
        Self::with_config(SileoConfig::default(), backend, cache, register)
    }

    pub fn with_config(
        config: SileoConfig,
        backend: Arc<dyn CacheBackend>,
        cache: InMemoryCache,
        register: impl FnOnce(&mut RegistryBuilder),
    ) -> Self {
        init_tracing();
        let store = seeded_store();
        let counting = Arc::new(CountingStore::new(store.clone()));

        let mut builder = ResourceRegistry::builder(config);
        register(&mut builder);
        let host = Arc::new(ResourceHost::new(builder.build(), counting.clone(), backend));

        Self {
            store,
            counting,
            cache,
            host,
        }
    }

    pub fn resource(&self, namespace: &str, name: &str, context: RequestContext) -> Resource {
        self.host
            .resource(namespace, name, None, context)
            .expect("registered resource")
    }

    pub fn sample(&self, context: RequestContext) -> Resource {
        self.resource("test", "sample", context)
    }

    pub fn row(&self, model: &str, id: i64) -> Record {
        self.store
            .row(model, id)
            .expect("store readable")
            .expect("row exists")
    }
}

// =============================================================================
// Counting store
// =============================================================================

/// Delegates to an in-memory store and counts relation loads
pub struct CountingStore {
    inner: InMemoryObjectStore,
    related_loads: Mutex<HashMap<String, usize>>,
}

impl CountingStore {
    pub fn new(inner: InMemoryObjectStore) -> Self {
        Self {
            inner,
            related_loads: Mutex::new(HashMap::new()),
        }
    }

    /// How many times `relation` was followed
    pub fn related_loads(&self, relation: &str) -> usize {
        self.related_loads
            .lock()
            .unwrap()
            .get(relation)
            .copied()
            .unwrap_or(0)
    }

    fn count(&self, relation: &str) {
        *self
            .related_loads
            .lock()
            .unwrap()
            .entry(relation.to_string())
            .or_default() += 1;
    }
}

#[async_trait]
impl ObjectStore for CountingStore {
    fn schema(&self, model: &str) -> Option<ModelSchema> {
        self.inner.schema(model)
    }

    async fn get(&self, model: &str, lookups: &Filters) -> StoreResult<Record> {
        self.inner.get(model, lookups).await
    }

    async fn query(&self, query: &Query) -> StoreResult<Vec<Record>> {
        self.inner.query(query).await
    }

    async fn related_one(&self, record: &Record, relation: &str) -> StoreResult<Option<Record>> {
        self.count(relation);
        self.inner.related_one(record, relation).await
    }

    async fn related_many(&self, record: &Record, relation: &str) -> StoreResult<Vec<Record>> {
        self.count(relation);
        self.inner.related_many(record, relation).await
    }

    async fn related_stream(
        &self,
        record: &Record,
        relation: &str,
    ) -> StoreResult<BoxStream<'static, StoreResult<Record>>> {
        self.count(relation);
        self.inner.related_stream(record, relation).await
    }

    async fn insert(&self, model: &str, fields: Map<String, Value>) -> StoreResult<Record> {
        self.inner.insert(model, fields).await
    }

    async fn save(&self, record: &Record, update_fields: Option<&[&str]>) -> StoreResult<Record> {
        self.inner.save(record, update_fields).await
    }
}

// =============================================================================
// Broken cache
// =============================================================================

/// A cache whose `decrement` always reports the key as missing
#[derive(Clone, Default)]
pub struct FailingDecrementCache {
    inner: InMemoryCache,
}

impl FailingDecrementCache {
    pub fn new(inner: InMemoryCache) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl CacheBackend for FailingDecrementCache {
    async fn get(&self, key: &str) -> CacheResult<Option<Value>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration) -> CacheResult<()> {
        self.inner.set(key, value, ttl).await
    }

    async fn add(&self, key: &str, value: Value, ttl: Duration) -> CacheResult<bool> {
        self.inner.add(key, value, ttl).await
    }

    async fn decrement(&self, key: &str) -> CacheResult<i64> {
        Err(CacheError::MissingKey {
            key: key.to_string(),
        })
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.inner.delete(key).await
    }
}
