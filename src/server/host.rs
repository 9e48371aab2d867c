//! Shared state every resource is served from
//!
//! The host bundles the frozen registry with the object store and cache
//! backends. It is built once and shared through `Arc` by every request.

use crate::config::SileoConfig;
use crate::core::auth::RequestContext;
use crate::core::cache::CacheBackend;
use crate::core::error::RegistryError;
use crate::core::resource::Resource;
use crate::core::store::ObjectStore;
use crate::server::registry::ResourceRegistry;
use std::sync::Arc;

/// Host context containing all framework state
///
/// # Example
///
/// ```rust,ignore
/// let mut builder = ResourceRegistry::builder(SileoConfig::default());
/// builder.register("test", "sample", sample_resource(), Some("v1"))?;
///
/// let host = Arc::new(ResourceHost::new(builder.build(), store, cache));
/// let mut resource = host.resource("test", "sample", None, RequestContext::for_user(1))?;
/// let envelope = resource.dispatch(MethodCall::GetPk { pk: 1 }).await?;
/// ```
pub struct ResourceHost {
    /// Settings the registry was built with
    pub config: SileoConfig,

    pub registry: Arc<ResourceRegistry>,

    pub store: Arc<dyn ObjectStore>,

    pub cache: Arc<dyn CacheBackend>,
}

impl ResourceHost {
    pub fn new(
        registry: ResourceRegistry,
        store: Arc<dyn ObjectStore>,
        cache: Arc<dyn CacheBackend>,
    ) -> Self {
        Self {
            config: registry.config().clone(),
            registry: Arc::new(registry),
            store,
            cache,
        }
    }

    /// Bind the resource registered as `namespace`/`name` to a request
    ///
    /// Without a version the configured fallback version is used.
    pub fn resource(
        self: &Arc<Self>,
        namespace: &str,
        name: &str,
        version: Option<&str>,
        context: RequestContext,
    ) -> Result<Resource, RegistryError> {
        let version = version.unwrap_or(&self.config.fallback_version);
        let definition = self.registry.get(namespace, name, version)?;
        Ok(Resource::new(definition, self.clone(), context))
    }
}
