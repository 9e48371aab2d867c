//! Opt-in behaviour composed into a resource
//!
//! Stages hook into three points of a dispatch: before the permission gate
//! ([`ResourceStage::before_dispatch`]), inside it after the method-level
//! predicates ([`ResourceStage::check_perm`]) and after fields are resolved
//! ([`ResourceStage::after_resolve_fields`]). A definition runs its stages in
//! the order they were added.

use crate::core::error::{ApiError, CacheError, ConfigError, SileoResult};
use crate::core::field::FieldDescriptor;
use crate::core::method::{Method, MethodCall};
use crate::core::resource::Resource;
use crate::core::store::Record;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const AUTHENTICATION_REQUIRED: &str = "Authentication is required.";
const RATE_LIMIT_REACHED: &str = "You have reached the rate limit!";

#[async_trait]
pub trait ResourceStage: Send + Sync {
    /// Runs once the method is known to be enabled, before any permission check
    async fn before_dispatch(&self, _resource: &Resource, _call: &MethodCall) -> SileoResult<()> {
        Ok(())
    }

    /// Runs after the method-level predicates passed
    fn check_perm(&self, _resource: &Resource, _method: Method) -> Result<(), ApiError> {
        Ok(())
    }

    /// May rewrite the resolved payload of `record`
    async fn after_resolve_fields(
        &self,
        _resource: &Resource,
        _record: &Record,
        _data: &mut Map<String, Value>,
    ) -> SileoResult<()> {
        Ok(())
    }

    /// Whether the stage turns payload caching on for its resource
    fn requires_cache(&self) -> bool {
        false
    }
}

fn authentication_required() -> ApiError {
    ApiError::permission_denied().with_detail(AUTHENTICATION_REQUIRED)
}

// =============================================================================
// Authentication gates
// =============================================================================

/// Deny every method to anonymous callers
#[derive(Debug, Clone, Copy, Default)]
pub struct LoginRequired;

impl ResourceStage for LoginRequired {
    fn check_perm(&self, resource: &Resource, _method: Method) -> Result<(), ApiError> {
        if resource.context().auth.is_authenticated() {
            Ok(())
        } else {
            Err(authentication_required())
        }
    }
}

/// Deny the listed methods to anonymous callers
#[derive(Debug, Clone, Default)]
pub struct MethodLoginRequired {
    methods: Vec<Method>,
}

impl MethodLoginRequired {
    pub fn new(methods: impl IntoIterator<Item = Method>) -> Self {
        Self {
            methods: methods.into_iter().collect(),
        }
    }
}

impl ResourceStage for MethodLoginRequired {
    fn check_perm(&self, resource: &Resource, method: Method) -> Result<(), ApiError> {
        if self.methods.contains(&method) && !resource.context().auth.is_authenticated() {
            return Err(authentication_required());
        }
        Ok(())
    }
}

// =============================================================================
// Rate limiting
// =============================================================================

/// Derives the per-caller part of a rate-limit key
pub type RateLimitKeyFn = Arc<dyn Fn(&Resource, &MethodCall) -> String + Send + Sync>;

/// Limit calls of some methods to `quota` per `window` for each caller
///
/// The counter lives in the shared cache under
/// `<prefix>_<resource>_<method>_<caller>` and relies on the backend's atomic
/// `add` and `decrement`.
#[derive(Clone)]
pub struct RateLimit {
    methods: Vec<Method>,
    quota: i64,
    window: Duration,
    key: Option<RateLimitKeyFn>,
}

impl RateLimit {
    pub fn new(methods: impl IntoIterator<Item = Method>, quota: i64, window: Duration) -> Self {
        Self {
            methods: methods.into_iter().collect(),
            quota,
            window,
            key: None,
        }
    }

    /// Build from a `"<count>/<seconds>"` rate such as `"1/1"`
    pub fn from_rate(
        methods: impl IntoIterator<Item = Method>,
        rate: &str,
    ) -> Result<Self, ConfigError> {
        let (quota, window) = parse_rate(rate)?;
        Ok(Self::new(methods, quota, window))
    }

    /// Replace the caller key, which defaults to the user id
    pub fn with_key<F>(mut self, key: F) -> Self
    where
        F: Fn(&Resource, &MethodCall) -> String + Send + Sync + 'static,
    {
        self.key = Some(Arc::new(key));
        self
    }

    pub fn quota(&self) -> i64 {
        self.quota
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn caller_key(&self, resource: &Resource, call: &MethodCall) -> String {
        match &self.key {
            Some(key) => key(resource, call),
            None => resource
                .context()
                .auth
                .user_id()
                .map(|id| id.to_string())
                .unwrap_or_else(|| "anonymous".to_string()),
        }
    }

    /// Full cache key of the counter for `call`
    pub fn cache_key(&self, resource: &Resource, call: &MethodCall) -> String {
        format!(
            "{}_{}_{}_{}",
            resource.host().config.rate_limit_prefix,
            resource.name(),
            call.method(),
            self.caller_key(resource, call)
        )
    }
}

/// Parse `"<count>/<seconds>"`
pub fn parse_rate(rate: &str) -> Result<(i64, Duration), ConfigError> {
    let invalid = || ConfigError::InvalidRate {
        rate: rate.to_string(),
    };
    let (count, seconds) = rate.split_once('/').ok_or_else(invalid)?;
    let count: i64 = count.trim().parse().map_err(|_| invalid())?;
    let seconds: u64 = seconds.trim().parse().map_err(|_| invalid())?;
    if count <= 0 || seconds == 0 {
        return Err(invalid());
    }
    Ok((count, Duration::from_secs(seconds)))
}

#[async_trait]
impl ResourceStage for RateLimit {
    async fn before_dispatch(&self, resource: &Resource, call: &MethodCall) -> SileoResult<()> {
        if !self.methods.contains(&call.method()) {
            return Ok(());
        }
        let cache = &resource.host().cache;
        let key = self.cache_key(resource, call);

        if cache.add(&key, Value::from(self.quota), self.window).await? {
            debug!(key = %key, quota = self.quota, "rate limit counter seeded");
            return Ok(());
        }
        let remaining = match cache.decrement(&key).await {
            Ok(value) => value,
            Err(CacheError::MissingKey { .. }) => {
                // expired between add and decrement
                cache.add(&key, Value::from(self.quota), self.window).await?;
                1
            }
            Err(e) => return Err(e.into()),
        };
        if remaining <= 0 {
            warn!(key = %key, resource = %resource.name(), "rate limit reached");
            return Err(ApiError::permission_denied()
                .with_detail(RATE_LIMIT_REACHED)
                .into());
        }
        Ok(())
    }
}

// =============================================================================
// Partial caching
// =============================================================================

/// Cache the payload but always recompute some fields
///
/// Fields served by other cached resources still come from their caches.
#[derive(Debug, Clone, Default)]
pub struct PartialCache {
    uncached_fields: Vec<FieldDescriptor>,
}

impl PartialCache {
    pub fn new<I, F>(fields: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<FieldDescriptor>,
    {
        Self {
            uncached_fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn uncached_fields(&self) -> &[FieldDescriptor] {
        &self.uncached_fields
    }
}

#[async_trait]
impl ResourceStage for PartialCache {
    async fn after_resolve_fields(
        &self,
        resource: &Resource,
        record: &Record,
        data: &mut Map<String, Value>,
    ) -> SileoResult<()> {
        for field in &self.uncached_fields {
            let (key, value) = resource.resolve_field(field, record).await?;
            data.insert(key, value);
        }
        Ok(())
    }

    fn requires_cache(&self) -> bool {
        true
    }
}
