//! Resource definitions and the per-request resource engine
//!
//! A [`ResourceDefinition`] is the static declaration of how one model is
//! exposed: its fields, enabled methods, filter whitelists, permission chains
//! and caching policy. It is built once at startup and registered.
//!
//! A [`Resource`] binds a definition to one request. [`Resource::dispatch`]
//! is the single entry point: it gates the method, runs the permission
//! chains, then executes the operation and returns an [`Envelope`].

use crate::core::auth::RequestContext;
use crate::core::error::{ApiError, ConfigError, SileoResult};
use crate::core::field::{FieldDescriptor, ResourceRef};
use crate::core::form::{Form, FormSpec};
use crate::core::method::{Method, MethodCall};
use crate::core::permission::{MethodPerm, ObjectPerm};
use crate::core::query::{FilterArgs, Filters, Query, QuerySet, page_window, resolve_filters};
use crate::core::response::Envelope;
use crate::core::stage::ResourceStage;
use crate::core::store::Record;
use crate::server::host::ResourceHost;
use futures::future::{BoxFuture, FutureExt};
use serde_json::{Map, Value, json};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// A derived-value method: `(resource, property, record, context) -> value`
pub type DerivedFn =
    Arc<dyn Fn(&Resource, &str, &Record, &RequestContext) -> Value + Send + Sync>;

/// Picks the form used for a method, overriding the declared form
pub type FormSelector = Arc<dyn Fn(&Resource, Method) -> Option<Arc<FormSpec>> + Send + Sync>;

// =============================================================================
// Definition
// =============================================================================

/// Static declaration of an exposed resource
pub struct ResourceDefinition {
    name: String,
    query_set: QuerySet,
    fields: Vec<FieldDescriptor>,
    allowed_methods: HashSet<Method>,
    filter_fields: Vec<String>,
    required_filter_fields: Vec<String>,
    exclude_filter_fields: Vec<String>,
    update_filter_fields: Vec<String>,
    delete_filter_fields: Vec<String>,
    method_perms: Vec<MethodPerm>,
    object_perms: Vec<ObjectPerm>,
    is_cached: bool,
    cache_prefix: Option<String>,
    cache_timeout: Option<Duration>,
    size_per_request: Option<usize>,
    form_class: Option<Arc<FormSpec>>,
    form_selector: Option<FormSelector>,
    methods: HashMap<String, DerivedFn>,
    stages: Vec<Arc<dyn ResourceStage>>,
}

fn owned(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

impl ResourceDefinition {
    /// A resource named `name` drawing its rows from `query_set`
    ///
    /// Nothing is enabled until methods are allowed explicitly.
    pub fn new(name: impl Into<String>, query_set: QuerySet) -> Self {
        Self {
            name: name.into(),
            query_set,
            fields: Vec::new(),
            allowed_methods: HashSet::new(),
            filter_fields: Vec::new(),
            required_filter_fields: Vec::new(),
            exclude_filter_fields: Vec::new(),
            update_filter_fields: Vec::new(),
            delete_filter_fields: Vec::new(),
            method_perms: Vec::new(),
            object_perms: Vec::new(),
            is_cached: false,
            cache_prefix: None,
            cache_timeout: None,
            size_per_request: None,
            form_class: None,
            form_selector: None,
            methods: HashMap::new(),
            stages: Vec::new(),
        }
    }

    pub fn with_fields<I, F>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<FieldDescriptor>,
    {
        self.fields.extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn with_allowed_methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.allowed_methods.extend(methods);
        self
    }

    pub fn with_filter_fields(mut self, names: &[&str]) -> Self {
        self.filter_fields = owned(names);
        self
    }

    pub fn with_required_filter_fields(mut self, names: &[&str]) -> Self {
        self.required_filter_fields = owned(names);
        self
    }

    pub fn with_exclude_filter_fields(mut self, names: &[&str]) -> Self {
        self.exclude_filter_fields = owned(names);
        self
    }

    pub fn with_update_filter_fields(mut self, names: &[&str]) -> Self {
        self.update_filter_fields = owned(names);
        self
    }

    pub fn with_delete_filter_fields(mut self, names: &[&str]) -> Self {
        self.delete_filter_fields = owned(names);
        self
    }

    pub fn with_method_perm(mut self, perm: MethodPerm) -> Self {
        self.method_perms.push(perm);
        self
    }

    pub fn with_object_perm(mut self, perm: ObjectPerm) -> Self {
        self.object_perms.push(perm);
        self
    }

    /// Cache resolved payloads under `<prefix or name>_<id>`
    pub fn with_cache(mut self, prefix: Option<&str>) -> Self {
        self.is_cached = true;
        self.cache_prefix = prefix.map(str::to_string);
        self
    }

    pub fn with_cache_timeout(mut self, timeout: Duration) -> Self {
        self.cache_timeout = Some(timeout);
        self
    }

    pub fn with_page_size(mut self, size: usize) -> Self {
        self.size_per_request = Some(size);
        self
    }

    pub fn with_form(mut self, form: Arc<FormSpec>) -> Self {
        self.form_class = Some(form);
        self
    }

    pub fn with_form_selector<F>(mut self, selector: F) -> Self
    where
        F: Fn(&Resource, Method) -> Option<Arc<FormSpec>> + Send + Sync + 'static,
    {
        self.form_selector = Some(Arc::new(selector));
        self
    }

    /// Provide a method for derived fields
    pub fn with_method<F>(mut self, name: impl Into<String>, method: F) -> Self
    where
        F: Fn(&Resource, &str, &Record, &RequestContext) -> Value + Send + Sync + 'static,
    {
        self.methods.insert(name.into(), Arc::new(method));
        self
    }

    pub fn with_stage(mut self, stage: impl ResourceStage + 'static) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    // === accessors ===

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn query_set(&self) -> &QuerySet {
        &self.query_set
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn allows(&self, method: Method) -> bool {
        self.allowed_methods.contains(&method)
    }

    pub fn filter_fields(&self) -> &[String] {
        &self.filter_fields
    }

    pub fn required_filter_fields(&self) -> &[String] {
        &self.required_filter_fields
    }

    pub fn exclude_filter_fields(&self) -> &[String] {
        &self.exclude_filter_fields
    }

    pub fn update_filter_fields(&self) -> &[String] {
        &self.update_filter_fields
    }

    pub fn delete_filter_fields(&self) -> &[String] {
        &self.delete_filter_fields
    }

    /// Whether resolved payloads go through the cache
    ///
    /// Stages such as partial caching switch caching on.
    pub fn is_cached(&self) -> bool {
        self.is_cached || self.stages.iter().any(|s| s.requires_cache())
    }

    pub fn cache_prefix(&self) -> Option<&str> {
        self.cache_prefix.as_deref()
    }

    /// Cache key of the payload of row `id`
    pub fn cache_key(&self, id: i64) -> String {
        format!("{}_{}", self.cache_prefix.as_deref().unwrap_or(self.name.as_str()), id)
    }

    pub fn form_class(&self) -> Option<&Arc<FormSpec>> {
        self.form_class.as_ref()
    }

    /// A derived-value method by name
    pub fn derived(&self, name: &str) -> Option<&DerivedFn> {
        self.methods.get(name)
    }

    pub fn stages(&self) -> &[Arc<dyn ResourceStage>] {
        &self.stages
    }
}

impl fmt::Debug for ResourceDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut methods: Vec<&str> = self.allowed_methods.iter().map(|m| m.as_str()).collect();
        methods.sort_unstable();
        f.debug_struct("ResourceDefinition")
            .field("name", &self.name)
            .field("model", &self.query_set.model)
            .field("fields", &self.fields)
            .field("allowed_methods", &methods)
            .field("is_cached", &self.is_cached())
            .field("cache_prefix", &self.cache_prefix)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Engine
// =============================================================================

/// A resource bound to one request
pub struct Resource {
    definition: Arc<ResourceDefinition>,
    host: Arc<ResourceHost>,
    context: Arc<RequestContext>,
    instance: Option<Record>,
}

impl Resource {
    pub fn new(
        definition: Arc<ResourceDefinition>,
        host: Arc<ResourceHost>,
        context: RequestContext,
    ) -> Self {
        Self {
            definition,
            host,
            context: Arc::new(context),
            instance: None,
        }
    }

    pub fn definition(&self) -> &Arc<ResourceDefinition> {
        &self.definition
    }

    pub fn host(&self) -> &ResourceHost {
        &self.host
    }

    pub fn context(&self) -> &RequestContext {
        &self.context
    }

    pub fn name(&self) -> &str {
        self.definition.name()
    }

    /// The row loaded by the last [`get_instance`](Self::get_instance)
    pub fn instance(&self) -> Option<&Record> {
        self.instance.as_ref()
    }

    /// A resource for `target` sharing this request's host and context
    pub fn nested(&self, target: &ResourceRef, default_version: &str) -> SileoResult<Resource> {
        let definition = target.resolve(&self.host.registry, default_version)?;
        Ok(Resource {
            definition,
            host: self.host.clone(),
            context: self.context.clone(),
            instance: None,
        })
    }

    pub fn cache_timeout(&self) -> Duration {
        self.definition
            .cache_timeout
            .unwrap_or_else(|| Duration::from_secs(self.host.config.default_cache_timeout_secs))
    }

    pub fn page_size(&self) -> usize {
        self.definition
            .size_per_request
            .unwrap_or(self.host.config.default_page_size)
    }

    pub fn get_cache_key(&self, id: i64) -> String {
        self.definition.cache_key(id)
    }

    // === permissions ===

    /// Gate `call`: the method must be enabled and every method-level check
    /// must pass
    pub fn has_perm(&self, call: &MethodCall) -> Result<(), ApiError> {
        let method = call.method();
        if !self.definition.allows(method) {
            return Err(ApiError::method_not_supported());
        }
        for perm in &self.definition.method_perms {
            let verdict = perm(self, method, call);
            if !verdict.allowed {
                return Err(denied(verdict.detail));
            }
        }
        for stage in &self.definition.stages {
            stage.check_perm(self, method)?;
        }
        Ok(())
    }

    /// Run the object-level checks for `method` against `record`
    pub fn has_object_perm(&self, method: Method, record: &Record) -> Result<(), ApiError> {
        for perm in &self.definition.object_perms {
            let verdict = perm(self, method, record);
            if !verdict.allowed {
                return Err(denied(verdict.detail));
            }
        }
        Ok(())
    }

    // === dispatch ===

    /// Execute `call` if it is enabled and permitted
    pub async fn dispatch(&mut self, call: MethodCall) -> SileoResult<Envelope> {
        let method = call.method();
        if !self.definition.allows(method) {
            return Err(ApiError::method_not_supported().into());
        }
        let definition = self.definition.clone();
        for stage in definition.stages() {
            stage.before_dispatch(self, &call).await?;
        }
        self.has_perm(&call)?;

        debug!(resource = %self.name(), method = %method, "dispatching");
        match call {
            MethodCall::GetPk { pk } => self.get_pk(pk).await,
            MethodCall::Filter {
                filter_args,
                top,
                bottom,
            } => self.filter(&filter_args, top, bottom).await,
            MethodCall::Create => self.create().await,
            MethodCall::Update { filter_args } => self.update(&filter_args).await,
            MethodCall::Delete { filter_args } => self.delete(&filter_args).await,
            MethodCall::FormDict { filter_args } => self.form_dict(&filter_args).await,
        }
    }

    // === operations ===

    pub async fn get_pk(&mut self, pk: i64) -> SileoResult<Envelope> {
        let record = self.get_instance(vec![("pk".to_string(), json!(pk))]).await?;
        let data = self.resolve_fields(&record, false).await?;
        Ok(Envelope::ok(data))
    }

    /// Page through the rows matching `filter_args`
    pub async fn filter(
        &self,
        filter_args: &FilterArgs,
        top: usize,
        bottom: Option<usize>,
    ) -> SileoResult<Envelope> {
        let (start, end) = page_window(top, bottom, self.page_size());
        let filters = resolve_filters(
            filter_args,
            self.definition.required_filter_fields(),
            self.definition.filter_fields(),
        )?;
        let excludes = resolve_filters(filter_args, &[], self.definition.exclude_filter_fields())?;
        let query = self.filter_query(filters, excludes).slice(start, end);

        let rows = self.host.store.query(&query).await?;
        let mut objects = Vec::with_capacity(rows.len());
        for row in &rows {
            objects.push(Value::Object(self.resolve_fields(row, false).await?));
        }
        Ok(Envelope::ok(objects))
    }

    /// The query `filter` runs before slicing
    pub fn filter_query(&self, filters: Filters, excludes: Filters) -> Query {
        self.definition.query_set.query(filters, excludes)
    }

    pub async fn create(&mut self) -> SileoResult<Envelope> {
        let mut form = self.get_form(Method::Create, None)?;
        if !form.is_valid(self.host.store.as_ref()).await? {
            return Ok(form_invalid(&form));
        }
        let record = form.save(self.host.store.as_ref()).await?;
        debug!(resource = %self.name(), id = record.id, "created");
        let data = self.resolve_fields(&record, false).await?;
        Ok(Envelope::created(data))
    }

    pub async fn update(&mut self, filter_args: &FilterArgs) -> SileoResult<Envelope> {
        let filters = resolve_filters(filter_args, self.definition.update_filter_fields(), &[])?;
        let record = self.get_instance(filters).await?;
        self.has_object_perm(Method::Update, &record)?;
        self.update_object(record).await
    }

    /// Apply the submitted form to `record`; the response bypasses the cache
    pub async fn update_object(&mut self, record: Record) -> SileoResult<Envelope> {
        let mut form = self.get_form(Method::Update, Some(record))?;
        if !form.is_valid(self.host.store.as_ref()).await? {
            return Ok(form_invalid(&form));
        }
        let record = form.save(self.host.store.as_ref()).await?;
        let data = self.resolve_fields(&record, true).await?;
        Ok(Envelope::ok(data))
    }

    pub async fn delete(&mut self, filter_args: &FilterArgs) -> SileoResult<Envelope> {
        let filters = resolve_filters(filter_args, self.definition.delete_filter_fields(), &[])?;
        let record = self.get_instance(filters).await?;
        self.has_object_perm(Method::Delete, &record)?;
        let data = self.delete_object(record).await?;
        Ok(Envelope::ok(data))
    }

    /// Soft delete: flag the row as removed and persist only that flag
    pub async fn delete_object(&self, mut record: Record) -> SileoResult<Value> {
        record.set("removed", true);
        let record = self.host.store.save(&record, Some(&["removed"][..])).await?;
        debug!(resource = %self.name(), id = record.id, "marked removed");
        Ok(json!({ "pk": record.id }))
    }

    /// Describe the resource's form, prefilled from a row when filters are given
    pub async fn form_dict(&mut self, filter_args: &FilterArgs) -> SileoResult<Envelope> {
        let instance = if filter_args.is_empty() {
            None
        } else {
            let filters =
                resolve_filters(filter_args, self.definition.update_filter_fields(), &[])?;
            let record = self.get_instance(filters).await?;
            self.has_object_perm(Method::FormDict, &record)?;
            Some(record)
        };
        let form = self.get_form(Method::FormDict, instance)?;
        Ok(Envelope::ok(form.as_dict()))
    }

    // === instances and forms ===

    /// Load the single row of the query set matching `filters`
    ///
    /// No filters, no match and several matches are all reported as not found.
    pub async fn get_instance(&mut self, filters: Filters) -> SileoResult<Record> {
        if filters.is_empty() {
            return Err(ApiError::not_found().into());
        }
        let lookups = self.definition.query_set.lookups(filters);
        match self.host.store.get(&self.definition.query_set.model, &lookups).await {
            Ok(record) => {
                self.instance = Some(record.clone());
                Ok(record)
            }
            Err(e) if e.is_lookup_miss() => {
                debug!(resource = %self.name(), error = %e, "instance lookup missed");
                Err(ApiError::not_found().into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// The form used for `method`, from the selector hook or the declaration
    pub fn get_form_class(&self, method: Method) -> Option<Arc<FormSpec>> {
        match &self.definition.form_selector {
            Some(selector) => selector(self, method),
            None => self.definition.form_class.clone(),
        }
    }

    /// Build the form for `method`; create and update bind the submitted data
    pub fn get_form(&self, method: Method, instance: Option<Record>) -> SileoResult<Form> {
        let spec = self
            .get_form_class(method)
            .ok_or_else(|| ConfigError::MissingFormClass {
                resource: self.name().to_string(),
            })?;
        Ok(match method {
            Method::Create | Method::Update => {
                Form::bound(spec, self.context.data.clone(), instance)
            }
            _ => Form::unbound(spec, instance),
        })
    }

    // === field resolution ===

    /// Resolve every declared field of `record`, through the cache when enabled
    pub fn resolve_fields<'a>(
        &'a self,
        record: &'a Record,
        no_cache: bool,
    ) -> BoxFuture<'a, SileoResult<Map<String, Value>>> {
        async move {
            let cached = self.definition.is_cached();
            let key = self.get_cache_key(record.id);

            let mut hit = None;
            if cached && !no_cache {
                if let Some(Value::Object(data)) = self.host.cache.get(&key).await? {
                    debug!(key = %key, "cache hit");
                    hit = Some(data);
                }
            }

            let mut data = match hit {
                Some(data) => data,
                None => {
                    let data = self.object_to_dict(record).await?;
                    if cached {
                        debug!(key = %key, "caching resolved fields");
                        self.host
                            .cache
                            .set(&key, Value::Object(data.clone()), self.cache_timeout())
                            .await?;
                    }
                    data
                }
            };

            for stage in self.definition.stages() {
                stage.after_resolve_fields(self, record, &mut data).await?;
            }
            Ok(data)
        }
        .boxed()
    }

    /// Resolve the declared fields in order, ignoring the cache
    pub async fn object_to_dict(&self, record: &Record) -> SileoResult<Map<String, Value>> {
        let mut data = Map::new();
        for field in self.definition.fields() {
            let (key, value) = self.resolve_field(field, record).await?;
            data.insert(key, value);
        }
        Ok(data)
    }

    pub async fn resolve_field(
        &self,
        field: &FieldDescriptor,
        record: &Record,
    ) -> SileoResult<(String, Value)> {
        let value = field.resolve(self, record).await?;
        Ok((field.property().to_string(), value))
    }
}

fn denied(detail: Option<Map<String, Value>>) -> ApiError {
    match detail {
        Some(extras) => ApiError::permission_denied().with_extras(extras),
        None => ApiError::permission_denied(),
    }
}

fn form_invalid(form: &Form) -> Envelope {
    Envelope::bad_request(Value::Object(form.errors().clone()))
}
