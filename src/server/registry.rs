//! Versioned registry of resource definitions
//!
//! Definitions are registered once at startup through a [`RegistryBuilder`],
//! which is then frozen into a read-only [`ResourceRegistry`]. Entries are
//! keyed by version, then namespace, then name, and iterate in registration
//! order.

use crate::config::{DEFAULT_VERSION, SileoConfig};
use crate::core::error::RegistryError;
use crate::core::resource::ResourceDefinition;
use indexmap::IndexMap;
use std::sync::Arc;
use tracing::{debug, warn};

type Names = IndexMap<String, Arc<ResourceDefinition>>;
type Namespaces = IndexMap<String, Names>;

/// Collects registrations during startup
#[derive(Debug)]
pub struct RegistryBuilder {
    config: SileoConfig,
    resources: IndexMap<String, Namespaces>,
}

impl RegistryBuilder {
    pub fn new(config: SileoConfig) -> Self {
        Self {
            config,
            resources: IndexMap::new(),
        }
    }

    pub fn config(&self) -> &SileoConfig {
        &self.config
    }

    /// Register `resource` as `namespace`/`name` under `version`
    ///
    /// Without a version the configured fallback is used and a warning is
    /// logged. The version must be allowed and the triple must be free.
    pub fn register(
        &mut self,
        namespace: &str,
        name: &str,
        resource: Arc<ResourceDefinition>,
        version: Option<&str>,
    ) -> Result<&mut Self, RegistryError> {
        let version = match version {
            Some(version) if !version.is_empty() => version.to_string(),
            _ => {
                warn!(
                    resource = %resource.name(),
                    fallback = %self.config.fallback_version,
                    "registering without a version, falling back to the default version"
                );
                self.config.fallback_version.clone()
            }
        };
        if !self.config.is_allowed_version(&version) {
            return Err(RegistryError::VersionNotAllowed { version });
        }

        let names = self
            .resources
            .entry(version.clone())
            .or_default()
            .entry(namespace.to_string())
            .or_default();
        if names.contains_key(name) {
            return Err(RegistryError::AlreadyRegistered {
                version,
                namespace: namespace.to_string(),
                name: name.to_string(),
            });
        }
        debug!(version = %version, namespace = %namespace, name = %name, resource = %resource.name(), "registered resource");
        names.insert(name.to_string(), resource);
        Ok(self)
    }

    /// Freeze the registrations
    pub fn build(self) -> ResourceRegistry {
        ResourceRegistry {
            config: self.config,
            resources: self.resources,
        }
    }
}

/// A registered entry, as yielded by [`ResourceRegistry::iter`]
#[derive(Debug, Clone)]
pub struct RegisteredResource<'a> {
    pub version: &'a str,
    pub namespace: &'a str,
    pub name: &'a str,
    pub definition: &'a Arc<ResourceDefinition>,
}

/// Read-only lookup of registered resources
#[derive(Debug)]
pub struct ResourceRegistry {
    config: SileoConfig,
    resources: IndexMap<String, Namespaces>,
}

impl ResourceRegistry {
    pub fn builder(config: SileoConfig) -> RegistryBuilder {
        RegistryBuilder::new(config)
    }

    pub fn config(&self) -> &SileoConfig {
        &self.config
    }

    /// Look up `namespace`/`name` under `version`
    pub fn get(
        &self,
        namespace: &str,
        name: &str,
        version: &str,
    ) -> Result<Arc<ResourceDefinition>, RegistryError> {
        self.resources
            .get(version)
            .and_then(|namespaces| namespaces.get(namespace))
            .and_then(|names| names.get(name))
            .cloned()
            .ok_or_else(|| {
                debug!(version = %version, namespace = %namespace, name = %name, "resource not available");
                RegistryError::NotFound {
                    version: version.to_string(),
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                }
            })
    }

    /// Look up under the `v1` version
    pub fn get_default(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Arc<ResourceDefinition>, RegistryError> {
        self.get(namespace, name, DEFAULT_VERSION)
    }

    /// Every registration, in registration order within each version
    pub fn iter(&self) -> impl Iterator<Item = RegisteredResource<'_>> {
        self.resources.iter().flat_map(|(version, namespaces)| {
            namespaces.iter().flat_map(move |(namespace, names)| {
                names.iter().map(move |(name, definition)| RegisteredResource {
                    version,
                    namespace,
                    name,
                    definition,
                })
            })
        })
    }

    /// Versions the definition is registered under
    pub fn versions_of(&self, definition: &Arc<ResourceDefinition>) -> Vec<&str> {
        let mut versions: Vec<&str> = self
            .iter()
            .filter(|r| Arc::ptr_eq(r.definition, definition))
            .map(|r| r.version)
            .collect();
        versions.dedup();
        versions
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
