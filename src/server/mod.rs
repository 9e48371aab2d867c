//! Server module: the resource registry, the shared host and the HTTP surface
//!
//! - [`ResourceRegistry`] holds every registered resource per version
//! - [`ResourceHost`] bundles the registry with the store and cache
//! - [`ApiView`] resolves and runs calls, [`router`] exposes it over axum
//! - [`verify_resources`] checks declarations before serving

pub mod builder;
pub mod host;
pub mod registry;
pub mod router;
pub mod verify;
pub mod view;

pub use builder::ServerBuilder;
pub use host::ResourceHost;
pub use registry::{RegisteredResource, RegistryBuilder, ResourceRegistry};
pub use router::{ApiState, build_api_routes};
pub use verify::{VerifyError, VerifyReport, verify_resources};
pub use view::{ApiCall, ApiMiddleware, ApiView, ListQuery, ResolveInfo};
