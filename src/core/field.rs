//! Field descriptors and their resolution
//!
//! A resource declares its output as an ordered list of [`FieldDescriptor`]s.
//! Each descriptor turns one property of a [`Record`] into one key of the
//! resolved object, either by copying it, converting it, asking the resource
//! for a derived value, or by recursing into another resource.

use crate::core::error::{ConfigError, RegistryError, SileoResult};
use crate::core::query::as_integer;
use crate::core::resource::{Resource, ResourceDefinition};
use crate::core::store::Record;
use crate::server::registry::ResourceRegistry;
use futures::StreamExt;
use futures::future::{BoxFuture, FutureExt};
use indexmap::IndexMap;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::debug;

// =============================================================================
// Resource references
// =============================================================================

/// How a descriptor names the resource it recurses into
///
/// A registered reference is looked up on first use and the definition it
/// resolves to is kept for the lifetime of the descriptor.
#[derive(Clone)]
pub enum ResourceRef {
    Direct(Arc<ResourceDefinition>),
    Registered {
        namespace: String,
        name: String,
        version: Option<String>,
        resolved: OnceLock<Arc<ResourceDefinition>>,
    },
}

impl ResourceRef {
    pub fn direct(definition: Arc<ResourceDefinition>) -> Self {
        ResourceRef::Direct(definition)
    }

    /// A registry entry resolved under the default version of its descriptor
    pub fn registered(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        ResourceRef::Registered {
            namespace: namespace.into(),
            name: name.into(),
            version: None,
            resolved: OnceLock::new(),
        }
    }

    pub fn versioned(
        namespace: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        ResourceRef::Registered {
            namespace: namespace.into(),
            name: name.into(),
            version: Some(version.into()),
            resolved: OnceLock::new(),
        }
    }

    /// Explicit version of a registered reference
    pub fn version(&self) -> Option<&str> {
        match self {
            ResourceRef::Direct(_) => None,
            ResourceRef::Registered { version, .. } => version.as_deref(),
        }
    }

    /// Resolve to a definition, memoizing registry lookups
    pub fn resolve(
        &self,
        registry: &ResourceRegistry,
        default_version: &str,
    ) -> Result<Arc<ResourceDefinition>, RegistryError> {
        match self {
            ResourceRef::Direct(definition) => Ok(definition.clone()),
            ResourceRef::Registered {
                namespace,
                name,
                version,
                resolved,
            } => {
                if let Some(definition) = resolved.get() {
                    return Ok(definition.clone());
                }
                let version = version.as_deref().unwrap_or(default_version);
                let definition = registry.get(namespace, name, version)?;
                Ok(resolved.get_or_init(|| definition).clone())
            }
        }
    }
}

impl fmt::Debug for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceRef::Direct(definition) => {
                f.debug_tuple("Direct").field(&definition.name()).finish()
            }
            ResourceRef::Registered {
                namespace,
                name,
                version,
                ..
            } => f
                .debug_struct("Registered")
                .field("namespace", namespace)
                .field("name", name)
                .field("version", version)
                .finish(),
        }
    }
}

impl From<Arc<ResourceDefinition>> for ResourceRef {
    fn from(definition: Arc<ResourceDefinition>) -> Self {
        ResourceRef::Direct(definition)
    }
}

impl From<(&str, &str)> for ResourceRef {
    fn from((namespace, name): (&str, &str)) -> Self {
        ResourceRef::registered(namespace, name)
    }
}

impl From<(&str, &str, &str)> for ResourceRef {
    fn from((namespace, name, version): (&str, &str, &str)) -> Self {
        ResourceRef::versioned(namespace, name, version)
    }
}

// =============================================================================
// Converters
// =============================================================================

/// A scalar conversion applied by [`FieldDescriptor::Convert`]
#[derive(Clone)]
pub struct Converter(Arc<dyn Fn(Value) -> Value + Send + Sync>);

impl Converter {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn apply(&self, value: Value) -> Value {
        (self.0)(value)
    }

    /// Render the value as a string; null stays null
    pub fn string() -> Self {
        Self::new(|value| match value {
            Value::Null => Value::Null,
            Value::String(s) => Value::String(s),
            other => Value::String(other.to_string()),
        })
    }

    /// Parse numbers and numeric strings as floats; anything else becomes null
    pub fn float() -> Self {
        Self::new(|value| {
            let number = match &value {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            };
            number.map(Value::from).unwrap_or(Value::Null)
        })
    }
}

impl fmt::Debug for Converter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Converter(..)")
    }
}

// =============================================================================
// Descriptors
// =============================================================================

/// How a collection relation is walked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionMode {
    /// Materialise the whole collection, then resolve it
    Manager,
    /// Iterate the collection lazily, resolving row by row
    QuerySet,
}

/// One declared output field of a resource
#[derive(Debug, Clone)]
pub enum FieldDescriptor {
    /// Copy an attribute verbatim
    Attribute(String),

    /// Resolve a single related row through another resource
    Nested { property: String, target: ResourceRef },

    /// Resolve every row of a collection relation through another resource
    Collection {
        property: String,
        target: ResourceRef,
        mode: CollectionMode,
    },

    /// Resolve a generic relation through the resource mapped to the related
    /// row's model; unmapped models resolve to null
    Polymorphic {
        property: String,
        targets: IndexMap<String, ResourceRef>,
    },

    /// Apply a conversion to an attribute
    Convert {
        property: String,
        converter: Converter,
    },

    /// Ask the owning resource for a derived value (`get_<property>` unless named)
    Method {
        property: String,
        method: Option<String>,
    },

    /// Like `Nested`, but served from the target's cache when it holds the row
    CachedForeignKey { property: String, target: ResourceRef },
}

impl FieldDescriptor {
    pub fn attr(name: impl Into<String>) -> Self {
        FieldDescriptor::Attribute(name.into())
    }

    pub fn nested(property: impl Into<String>, target: impl Into<ResourceRef>) -> Self {
        FieldDescriptor::Nested {
            property: property.into(),
            target: target.into(),
        }
    }

    pub fn manager(property: impl Into<String>, target: impl Into<ResourceRef>) -> Self {
        FieldDescriptor::Collection {
            property: property.into(),
            target: target.into(),
            mode: CollectionMode::Manager,
        }
    }

    pub fn query_set(property: impl Into<String>, target: impl Into<ResourceRef>) -> Self {
        FieldDescriptor::Collection {
            property: property.into(),
            target: target.into(),
            mode: CollectionMode::QuerySet,
        }
    }

    /// `targets` maps related model names to resources
    pub fn polymorphic<I, K, R>(property: impl Into<String>, targets: I) -> Self
    where
        I: IntoIterator<Item = (K, R)>,
        K: Into<String>,
        R: Into<ResourceRef>,
    {
        FieldDescriptor::Polymorphic {
            property: property.into(),
            targets: targets
                .into_iter()
                .map(|(k, r)| (k.into(), r.into()))
                .collect(),
        }
    }

    pub fn convert(property: impl Into<String>, converter: Converter) -> Self {
        FieldDescriptor::Convert {
            property: property.into(),
            converter,
        }
    }

    pub fn method(property: impl Into<String>) -> Self {
        FieldDescriptor::Method {
            property: property.into(),
            method: None,
        }
    }

    pub fn method_named(property: impl Into<String>, method: impl Into<String>) -> Self {
        FieldDescriptor::Method {
            property: property.into(),
            method: Some(method.into()),
        }
    }

    pub fn cached_fk(property: impl Into<String>, target: impl Into<ResourceRef>) -> Self {
        FieldDescriptor::CachedForeignKey {
            property: property.into(),
            target: target.into(),
        }
    }

    /// The source property, which is also the output key
    pub fn property(&self) -> &str {
        match self {
            FieldDescriptor::Attribute(name) => name,
            FieldDescriptor::Nested { property, .. }
            | FieldDescriptor::Collection { property, .. }
            | FieldDescriptor::Polymorphic { property, .. }
            | FieldDescriptor::Convert { property, .. }
            | FieldDescriptor::Method { property, .. }
            | FieldDescriptor::CachedForeignKey { property, .. } => property,
        }
    }

    /// Name of the derived-value method, for `Method` descriptors
    pub fn method_name(&self) -> Option<String> {
        match self {
            FieldDescriptor::Method { property, method } => Some(match method {
                Some(name) if !name.is_empty() => name.clone(),
                _ => format!("get_{}", property),
            }),
            _ => None,
        }
    }

    /// Compute this field's value for `record` on behalf of `resource`
    pub fn resolve<'a>(
        &'a self,
        resource: &'a Resource,
        record: &'a Record,
    ) -> BoxFuture<'a, SileoResult<Value>> {
        async move {
            let host = resource.host();
            let fallback = host.config.fallback_version.as_str();
            match self {
                FieldDescriptor::Attribute(name) => match record.attribute(name) {
                    Some(value) => Ok(value),
                    None => {
                        debug!(
                            resource = %resource.name(),
                            model = %record.model,
                            attribute = %name,
                            "attribute missing on row, emitting null"
                        );
                        Ok(Value::Null)
                    }
                },
                FieldDescriptor::Convert {
                    property,
                    converter,
                } => Ok(converter.apply(record.attribute(property).unwrap_or(Value::Null))),
                FieldDescriptor::Method { property, .. } => {
                    let name = self.method_name().unwrap_or_default();
                    let method = resource.definition().derived(&name).ok_or_else(|| {
                        ConfigError::MissingMethod {
                            resource: resource.name().to_string(),
                            method: name.clone(),
                        }
                    })?;
                    Ok(method(resource, property, record, resource.context()))
                }
                FieldDescriptor::Nested { property, target } => {
                    let Some(related) = host.store.related_one(record, property).await? else {
                        return Ok(Value::Null);
                    };
                    let child = resource.nested(target, fallback)?;
                    Ok(Value::Object(child.resolve_fields(&related, false).await?))
                }
                FieldDescriptor::Collection {
                    property,
                    target,
                    mode,
                } => {
                    let child = resource.nested(target, fallback)?;
                    let mut items = Vec::new();
                    match mode {
                        CollectionMode::Manager => {
                            for row in host.store.related_many(record, property).await? {
                                items.push(Value::Object(child.resolve_fields(&row, false).await?));
                            }
                        }
                        CollectionMode::QuerySet => {
                            let mut rows = host.store.related_stream(record, property).await?;
                            while let Some(row) = rows.next().await {
                                let row = row?;
                                items.push(Value::Object(child.resolve_fields(&row, false).await?));
                            }
                        }
                    }
                    Ok(Value::Array(items))
                }
                FieldDescriptor::Polymorphic { property, targets } => {
                    let Some(related) = host.store.related_one(record, property).await? else {
                        return Ok(Value::Null);
                    };
                    let Some(target) = targets.get(&related.model) else {
                        debug!(model = %related.model, property = %property, "no resource for related model");
                        return Ok(Value::Null);
                    };
                    let child = resource.nested(target, crate::config::DEFAULT_VERSION)?;
                    Ok(Value::Object(child.resolve_fields(&related, false).await?))
                }
                FieldDescriptor::CachedForeignKey { property, target } => {
                    let column = format!("{}_id", property);
                    let Some(id) = record.attribute(&column).as_ref().and_then(as_integer) else {
                        return Ok(Value::Null);
                    };
                    let child = resource.nested(target, fallback)?;
                    let key = child.get_cache_key(id);
                    if let Some(hit) = host.cache.get(&key).await? {
                        debug!(key = %key, "foreign key served from cache");
                        return Ok(hit);
                    }
                    match host.store.related_one(record, property).await? {
                        Some(related) => Ok(Value::Object(child.resolve_fields(&related, false).await?)),
                        None => Ok(Value::Null),
                    }
                }
            }
        }
        .boxed()
    }
}

impl From<&str> for FieldDescriptor {
    fn from(name: &str) -> Self {
        FieldDescriptor::Attribute(name.to_string())
    }
}

impl From<String> for FieldDescriptor {
    fn from(name: String) -> Self {
        FieldDescriptor::Attribute(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_property_is_output_key() {
        assert_eq!(FieldDescriptor::from("title").property(), "title");
        assert_eq!(
            FieldDescriptor::nested("owner", ("test", "user")).property(),
            "owner"
        );
        assert_eq!(
            FieldDescriptor::polymorphic("target", [("user", ("test", "user"))]).property(),
            "target"
        );
    }

    #[test]
    fn test_method_name_defaults_to_getter() {
        assert_eq!(
            FieldDescriptor::method("summary").method_name().as_deref(),
            Some("get_summary")
        );
        assert_eq!(
            FieldDescriptor::method_named("summary", "compute").method_name().as_deref(),
            Some("compute")
        );
        assert_eq!(FieldDescriptor::attr("id").method_name(), None);
    }

    #[test]
    fn test_converters() {
        assert_eq!(Converter::string().apply(json!(1.5)), json!("1.5"));
        assert_eq!(Converter::string().apply(json!(null)), json!(null));
        assert_eq!(Converter::float().apply(json!("12.50")), json!(12.5));
        assert_eq!(Converter::float().apply(json!(true)), json!(null));

        let doubled = Converter::new(|v| json!(v.as_i64().unwrap_or(0) * 2));
        assert_eq!(doubled.apply(json!(21)), json!(42));
    }

    #[test]
    fn test_resource_ref_versions() {
        assert_eq!(ResourceRef::registered("test", "user").version(), None);
        assert_eq!(
            ResourceRef::from(("test", "user", "v2")).version(),
            Some("v2")
        );
    }
}
