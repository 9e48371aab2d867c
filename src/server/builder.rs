//! ServerBuilder for fluent API to build HTTP servers

use super::host::ResourceHost;
use super::registry::{RegistryBuilder, ResourceRegistry};
use super::router::{ApiState, build_api_routes, health_routes};
use super::verify::{VerifyReport, verify_resources};
use super::view::{ApiMiddleware, ApiView};
use crate::config::SileoConfig;
use crate::core::auth::{AuthProvider, NoAuthProvider};
use crate::core::cache::CacheBackend;
use crate::core::resource::ResourceDefinition;
use crate::core::store::ObjectStore;
use crate::storage::InMemoryCache;
use anyhow::{Result, anyhow};
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Builder for creating HTTP servers over registered resources
///
/// # Example
///
/// ```ignore
/// let app = ServerBuilder::new(SileoConfig::default())
///     .with_store(InMemoryObjectStore::new())
///     .register("test", "sample", sample_resource(), Some("v1"))?
///     .build()?;
/// ```
pub struct ServerBuilder {
    registry: RegistryBuilder,
    store: Option<Arc<dyn ObjectStore>>,
    cache: Option<Arc<dyn CacheBackend>>,
    auth: Arc<dyn AuthProvider>,
    middleware: Vec<Arc<dyn ApiMiddleware>>,
    custom_routes: Vec<Router>,
}

impl ServerBuilder {
    pub fn new(config: SileoConfig) -> Self {
        Self {
            registry: RegistryBuilder::new(config),
            store: None,
            cache: None,
            auth: Arc::new(NoAuthProvider),
            middleware: Vec::new(),
            custom_routes: Vec::new(),
        }
    }

    /// Set the object store (required)
    pub fn with_store(mut self, store: impl ObjectStore + 'static) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    /// Set the cache backend; an in-memory cache is used otherwise
    pub fn with_cache(mut self, cache: impl CacheBackend + 'static) -> Self {
        self.cache = Some(Arc::new(cache));
        self
    }

    /// Set how callers are identified; everyone is anonymous otherwise
    pub fn with_auth_provider(mut self, auth: impl AuthProvider + 'static) -> Self {
        self.auth = Arc::new(auth);
        self
    }

    pub fn with_middleware(mut self, middleware: impl ApiMiddleware + 'static) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Add routes that are not resource operations
    pub fn with_custom_routes(mut self, routes: Router) -> Self {
        self.custom_routes.push(routes);
        self
    }

    /// Register a resource, see [`RegistryBuilder::register`]
    pub fn register(
        mut self,
        namespace: &str,
        name: &str,
        resource: Arc<ResourceDefinition>,
        version: Option<&str>,
    ) -> Result<Self> {
        self.registry.register(namespace, name, resource, version)?;
        Ok(self)
    }

    /// Freeze the registry and build the shared host
    pub fn build_host(&mut self) -> Result<Arc<ResourceHost>> {
        let store = self
            .store
            .take()
            .ok_or_else(|| anyhow!("ObjectStore is required. Call .with_store()"))?;
        let cache = self
            .cache
            .take()
            .unwrap_or_else(|| Arc::new(InMemoryCache::new()));

        let config = self.registry.config().clone();
        let registry = std::mem::replace(&mut self.registry, RegistryBuilder::new(config));
        Ok(Arc::new(ResourceHost::new(registry.build(), store, cache)))
    }

    /// Build the final router
    pub fn build(mut self) -> Result<Router> {
        let host = self.build_host()?;
        Ok(self.into_router(host))
    }

    fn into_router(self, host: Arc<ResourceHost>) -> Router {
        let mut view = ApiView::new(host);
        for middleware in self.middleware {
            view = view.with_shared_middleware(middleware);
        }
        let state = ApiState {
            view: Arc::new(view),
            auth: self.auth,
        };

        let mut app = health_routes().merge(build_api_routes(state));
        for custom_router in self.custom_routes {
            app = app.merge(custom_router);
        }
        app.layer(TraceLayer::new_for_http())
    }

    /// Serve the application with graceful shutdown
    ///
    /// Resources are verified first; the server does not start while the
    /// report has errors. Cache warnings are only logged.
    pub async fn serve(mut self, addr: &str) -> Result<()> {
        let host = self.build_host()?;
        let report = verify(&host.registry, host.store.as_ref());
        if !report.errors.is_empty() {
            return Err(anyhow!("resource verification failed:\n{}", report));
        }

        let app = self.into_router(host);
        let listener = TcpListener::bind(addr).await?;

        tracing::info!("Server listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("Server shutdown complete");
        Ok(())
    }
}

fn verify(registry: &ResourceRegistry, store: &dyn ObjectStore) -> VerifyReport {
    let report = verify_resources(registry, store);
    tracing::info!(summary = %report.summary(), "verified resources");
    report
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal, initiating graceful shutdown...");
        },
    }
}
