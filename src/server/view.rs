//! Transport-facing entry point
//!
//! [`ApiView`] resolves the addressed resource from the registry, runs the
//! installed middleware around the call and turns recoverable errors into
//! envelopes. Faults (misconfiguration, backend failures) are handed back to
//! the caller.

use crate::core::auth::RequestContext;
use crate::core::error::{SileoError, SileoResult};
use crate::core::method::{Method, MethodCall};
use crate::core::query::FilterArgs;
use crate::core::resource::Resource;
use crate::core::response::Envelope;
use crate::server::host::ResourceHost;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// The address and operation of one API request
#[derive(Debug, Clone, PartialEq)]
pub struct ApiCall {
    /// Requested version; the configured fallback when absent
    pub version: Option<String>,
    pub namespace: String,
    pub resource: String,
    pub call: MethodCall,
}

impl ApiCall {
    pub fn new(namespace: impl Into<String>, resource: impl Into<String>, call: MethodCall) -> Self {
        Self {
            version: None,
            namespace: namespace.into(),
            resource: resource.into(),
            call,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }
}

/// What a middleware is told before the resource runs
#[derive(Debug, Clone, Copy)]
pub struct ResolveInfo<'a> {
    pub version: &'a str,
    pub namespace: &'a str,
    pub resource: &'a str,
    pub method: Method,
}

/// Hooks run around every resolved API call
///
/// `pre_api_resolve` hooks run in installation order once the resource is
/// found. `post_api_resolve` hooks run in the same order after the call
/// produced an envelope.
pub trait ApiMiddleware: Send + Sync {
    fn pre_api_resolve(&self, _info: &ResolveInfo<'_>) {}

    fn post_api_resolve(&self, _info: &ResolveInfo<'_>, _envelope: &Envelope) {}
}

/// Resolves and runs API calls against a [`ResourceHost`]
pub struct ApiView {
    host: Arc<ResourceHost>,
    middleware: Vec<Arc<dyn ApiMiddleware>>,
}

impl ApiView {
    pub fn new(host: Arc<ResourceHost>) -> Self {
        Self {
            host,
            middleware: Vec::new(),
        }
    }

    pub fn with_middleware(mut self, middleware: impl ApiMiddleware + 'static) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    pub fn with_shared_middleware(mut self, middleware: Arc<dyn ApiMiddleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    pub fn host(&self) -> &Arc<ResourceHost> {
        &self.host
    }

    /// Run `api_call` on behalf of `context`
    ///
    /// An unknown resource answers with a not-found envelope.
    pub async fn handle(&self, api_call: ApiCall, context: RequestContext) -> SileoResult<Envelope> {
        let ApiCall {
            version,
            namespace,
            resource,
            call,
        } = api_call;
        let version = version.unwrap_or_else(|| self.host.config.fallback_version.clone());

        let mut target = match self.host.resource(&namespace, &resource, Some(&version), context) {
            Ok(target) => target,
            Err(e) => {
                debug!(version = %version, namespace = %namespace, resource = %resource, "unknown resource");
                return SileoError::from(e).into_envelope();
            }
        };

        let info = ResolveInfo {
            version: &version,
            namespace: &namespace,
            resource: &resource,
            method: call.method(),
        };
        for middleware in &self.middleware {
            middleware.pre_api_resolve(&info);
        }

        let envelope = run_api_method(&mut target, call).await?;

        for middleware in &self.middleware {
            middleware.post_api_resolve(&info, &envelope);
        }
        Ok(envelope)
    }
}

/// Dispatch `call`, answering recoverable errors with their envelope
pub async fn run_api_method(resource: &mut Resource, call: MethodCall) -> SileoResult<Envelope> {
    match resource.dispatch(call).await {
        Ok(envelope) => Ok(envelope),
        Err(e) if e.is_recoverable() => {
            debug!(resource = %resource.name(), error = %e, "request rejected");
            e.into_envelope()
        }
        Err(e) => {
            warn!(resource = %resource.name(), error = %e, code = %e.error_code(), "resource fault");
            Err(e)
        }
    }
}

// =============================================================================
// Query strings
// =============================================================================

/// A parsed `filter` query string
///
/// `top` and `bottom` set the page window; every other entry is a filter
/// argument.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListQuery {
    pub filter_args: FilterArgs,
    pub top: usize,
    pub bottom: Option<usize>,
}

impl ListQuery {
    /// Split query pairs into paging and filter arguments
    ///
    /// A missing, malformed or negative `top` starts at the first row. A
    /// malformed or negative `bottom` is ignored.
    pub fn from_query<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut query = ListQuery::default();
        for (key, value) in pairs {
            let (key, value) = (key.into(), value.into());
            match key.as_str() {
                "top" => query.top = parse_index(&value).unwrap_or(0),
                "bottom" => query.bottom = parse_index(&value),
                _ => {
                    query.filter_args.insert(key, Value::String(value));
                }
            }
        }
        query
    }

    pub fn into_call(self) -> MethodCall {
        MethodCall::Filter {
            filter_args: self.filter_args,
            top: self.top,
            bottom: self.bottom,
        }
    }
}

/// Filter arguments from query pairs, as taken by update, delete and form info
pub fn filter_args_from_query<I, K, V>(pairs: I) -> FilterArgs
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), Value::String(v.into())))
        .collect()
}

fn parse_index(value: &str) -> Option<usize> {
    value.trim().parse::<i64>().ok().and_then(|i| usize::try_from(i).ok())
}
