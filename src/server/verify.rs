//! Startup verification of registered resources
//!
//! Walks every registration and reports declarations that would only fail
//! once a request reaches them: fields the model does not have, nested
//! resources that are not registered, derived fields without a method, and
//! references that cross API versions. Distinct cached resources sharing a
//! cache prefix are reported as warnings.

use crate::config::DEFAULT_VERSION;
use crate::core::field::{FieldDescriptor, ResourceRef};
use crate::core::resource::ResourceDefinition;
use crate::core::store::ObjectStore;
use crate::server::registry::ResourceRegistry;
use indexmap::IndexMap;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// A declaration problem found in a resource
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    #[error("{resource} has no field or property called \"{field}\"")]
    UnknownField { resource: String, field: String },

    #[error("{resource} uses a resource that does not exist (namespace: {namespace}, name: {name})")]
    UnresolvableResource {
        resource: String,
        namespace: String,
        name: String,
    },

    #[error("{resource} has no method \"{method}\"")]
    MissingMethod { resource: String, method: String },

    #[error(
        "{resource} uses a cross version resource (namespace: {namespace}, name: {name}, version: {version})."
    )]
    CrossVersionRegistered {
        resource: String,
        namespace: String,
        name: String,
        version: String,
    },

    #[error("{resource} uses a cross version resource (resource: {target}, version: {version}).")]
    CrossVersionDirect {
        resource: String,
        target: String,
        version: String,
    },
}

impl VerifyError {
    /// Stable numeric code of the problem
    pub fn code(&self) -> u8 {
        match self {
            VerifyError::UnknownField { .. } => 1,
            VerifyError::UnresolvableResource { .. } => 2,
            VerifyError::MissingMethod { .. } => 3,
            VerifyError::CrossVersionRegistered { .. } => 5,
            VerifyError::CrossVersionDirect { .. } => 6,
        }
    }
}

/// An error attributed to the registration it was found under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyIssue {
    pub namespace: String,
    pub name: String,
    pub error: VerifyError,
}

/// Two distinct cached resources writing to the same key space
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheWarning {
    pub namespace: String,
    pub name: String,
    pub resource: String,
    pub shared_with: String,
}

/// Outcome of [`verify_resources`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub errors: Vec<VerifyIssue>,
    pub warnings: Vec<CacheWarning>,
}

impl VerifyReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty() && self.warnings.is_empty()
    }

    /// `OK`, or `FAILED (errors=N[, warnings=M])`
    pub fn summary(&self) -> String {
        if self.is_ok() {
            return "OK".to_string();
        }
        let mut summary = format!("FAILED (errors={}", self.errors.len());
        if !self.warnings.is_empty() {
            summary.push_str(&format!(", warnings={}", self.warnings.len()));
        }
        summary.push(')');
        summary
    }
}

impl fmt::Display for VerifyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(70);
        for issue in &self.errors {
            writeln!(f, "{}", rule)?;
            writeln!(f, "/{}/{}", issue.namespace, issue.name)?;
            writeln!(f, "Error Code: {}", issue.error.code())?;
            writeln!(f, "{}", issue.error)?;
        }
        for warning in &self.warnings {
            writeln!(f, "{}", rule)?;
            writeln!(f, "/{}/{}", warning.namespace, warning.name)?;
            writeln!(f, "Warning")?;
            writeln!(
                f,
                "{} shares the same cache key with {}",
                warning.resource, warning.shared_with
            )?;
        }
        if !self.is_ok() {
            writeln!(f, "{}", "-".repeat(70))?;
        }
        write!(f, "{}", self.summary())
    }
}

/// Check every registration of `registry` against the schemas of `store`
///
/// Models the store has no schema for are not checked for fields.
pub fn verify_resources(registry: &ResourceRegistry, store: &dyn ObjectStore) -> VerifyReport {
    let mut verifier = Verifier {
        registry,
        store,
        report: VerifyReport::default(),
        cache_prefixes: IndexMap::new(),
        visited: HashSet::new(),
    };
    for entry in registry.iter() {
        verifier.visited.clear();
        verifier.check_resource(entry.namespace, entry.name, entry.definition, entry.version);
    }
    verifier.report
}

struct Verifier<'a> {
    registry: &'a ResourceRegistry,
    store: &'a dyn ObjectStore,
    report: VerifyReport,
    cache_prefixes: IndexMap<String, Arc<ResourceDefinition>>,
    visited: HashSet<*const ResourceDefinition>,
}

impl Verifier<'_> {
    fn check_resource(
        &mut self,
        namespace: &str,
        name: &str,
        definition: &Arc<ResourceDefinition>,
        version: &str,
    ) {
        // nested resources may refer back to their parent
        if !self.visited.insert(Arc::as_ptr(definition)) {
            return;
        }

        for field in definition.fields() {
            match field {
                FieldDescriptor::Attribute(_) | FieldDescriptor::Convert { .. } => {}
                FieldDescriptor::Nested { target, .. }
                | FieldDescriptor::Collection { target, .. }
                | FieldDescriptor::CachedForeignKey { target, .. } => {
                    let fallback = self.registry.config().fallback_version.clone();
                    self.check_target(namespace, name, definition, version, target, &fallback);
                }
                FieldDescriptor::Polymorphic { targets, .. } => {
                    for target in targets.values() {
                        self.check_target(namespace, name, definition, version, target, DEFAULT_VERSION);
                    }
                }
                FieldDescriptor::Method { .. } => {
                    if let Some(method) = field.method_name()
                        && definition.derived(&method).is_none()
                    {
                        self.error(namespace, name, VerifyError::MissingMethod {
                            resource: definition.name().to_string(),
                            method,
                        });
                    }
                    continue;
                }
            }
            self.check_field(namespace, name, definition, field.property());
        }
        self.check_cache_key(namespace, name, definition);
    }

    fn check_target(
        &mut self,
        namespace: &str,
        name: &str,
        definition: &Arc<ResourceDefinition>,
        version: &str,
        target: &ResourceRef,
        default_version: &str,
    ) {
        let registry = self.registry;
        match target {
            ResourceRef::Registered {
                namespace: target_namespace,
                name: target_name,
                version: target_version,
                ..
            } => {
                let target_version = target_version.as_deref().unwrap_or(default_version);
                if target_version != version {
                    self.error(namespace, name, VerifyError::CrossVersionRegistered {
                        resource: definition.name().to_string(),
                        namespace: target_namespace.clone(),
                        name: target_name.clone(),
                        version: target_version.to_string(),
                    });
                }
                match registry.get(target_namespace, target_name, target_version) {
                    Ok(resolved) => self.check_resource(namespace, name, &resolved, version),
                    Err(_) => self.error(namespace, name, VerifyError::UnresolvableResource {
                        resource: definition.name().to_string(),
                        namespace: target_namespace.clone(),
                        name: target_name.clone(),
                    }),
                }
            }
            ResourceRef::Direct(resolved) => {
                let versions = registry.versions_of(resolved);
                if !versions.is_empty() && !versions.contains(&version) {
                    self.error(namespace, name, VerifyError::CrossVersionDirect {
                        resource: definition.name().to_string(),
                        target: resolved.name().to_string(),
                        version: versions[0].to_string(),
                    });
                } else if versions.is_empty() && default_version != version {
                    self.error(namespace, name, VerifyError::CrossVersionDirect {
                        resource: definition.name().to_string(),
                        target: resolved.name().to_string(),
                        version: default_version.to_string(),
                    });
                }
                self.check_resource(namespace, name, resolved, version);
            }
        }
    }

    fn check_field(&mut self, namespace: &str, name: &str, definition: &ResourceDefinition, field: &str) {
        let Some(schema) = self.store.schema(&definition.query_set().model) else {
            return;
        };
        if !schema.has_field(field) {
            self.error(namespace, name, VerifyError::UnknownField {
                resource: definition.name().to_string(),
                field: field.to_string(),
            });
        }
    }

    fn check_cache_key(&mut self, namespace: &str, name: &str, definition: &Arc<ResourceDefinition>) {
        if !definition.is_cached() {
            return;
        }
        let prefix = definition.cache_prefix().unwrap_or(definition.name()).to_string();
        match self.cache_prefixes.get(&prefix) {
            None => {
                self.cache_prefixes.insert(prefix, definition.clone());
            }
            Some(existing) if Arc::ptr_eq(existing, definition) => {}
            Some(existing) => {
                warn!(namespace = %namespace, name = %name, prefix = %prefix, "shared cache prefix");
                self.report.warnings.push(CacheWarning {
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                    resource: definition.name().to_string(),
                    shared_with: existing.name().to_string(),
                });
            }
        }
    }

    fn error(&mut self, namespace: &str, name: &str, error: VerifyError) {
        warn!(namespace = %namespace, name = %name, code = error.code(), "{}", error);
        self.report.errors.push(VerifyIssue {
            namespace: namespace.to_string(),
            name: name.to_string(),
            error,
        });
    }
}
