//! # Sileo
//!
//! Declarative, versioned API resources for Rust.
//!
//! A resource declares how one model is exposed: which fields are emitted
//! and how each one resolves (plain attributes, nested resources,
//! collections, polymorphic relations, conversions, derived values), which
//! operations are enabled, which filters each operation honours, who may
//! call it and whether its output is cached.
//!
//! ## Features
//!
//! - **Versioned registry**: resources registered per version, namespace and name
//! - **Field resolvers**: recursive resolution through other registered resources
//! - **Permission chains**: method-level and object-level predicates
//! - **Stages**: login requirement, rate limiting and partial caching
//! - **Forms**: validation, persistence and form metadata for create/update
//! - **Soft delete**: rows are flagged `removed`, never dropped
//! - **Verification**: declaration checks before serving
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sileo::prelude::*;
//!
//! let sample = ResourceDefinition::new("SampleResource", QuerySet::all("sample").filter("removed", false))
//!     .with_fields(["id", "title"])
//!     .with_fields([FieldDescriptor::nested("owner", ("test", "user"))])
//!     .with_allowed_methods([Method::GetPk, Method::Filter])
//!     .with_filter_fields(&["title"])
//!     .with_cache(None)
//!     .into_arc();
//!
//! ServerBuilder::new(SileoConfig::default())
//!     .with_store(InMemoryObjectStore::new())
//!     .register("test", "sample", sample, Some("v1"))?
//!     .serve("127.0.0.1:3000")
//!     .await?;
//! ```

pub mod config;
pub mod core;
pub mod server;
pub mod storage;

/// Re-exports of commonly used types and traits
pub mod prelude {
    // === Core ===
    pub use crate::core::{
        auth::{
            AuthContext, AuthPolicy, AuthProvider, NoAuthProvider, RequestContext,
            UserHeaderAuthProvider,
        },
        cache::CacheBackend,
        error::{ApiError, ApiErrorKind, SileoError, SileoResult},
        field::{CollectionMode, Converter, FieldDescriptor, ResourceRef},
        form::{FieldKind, Form, FormField, FormSpec},
        method::{Method, MethodCall},
        permission::{
            MethodPerm, ObjectPerm, Verdict, login_required, method_perm, object_perm,
            owner_required, policy,
        },
        query::{FilterArgs, Filters, QuerySet},
        resource::{Resource, ResourceDefinition},
        response::Envelope,
        stage::{LoginRequired, MethodLoginRequired, PartialCache, RateLimit, ResourceStage},
        store::{ModelSchema, ObjectStore, Record, Relation},
    };

    // === Storage ===
    pub use crate::storage::{InMemoryCache, InMemoryObjectStore};

    // === Config ===
    pub use crate::config::SileoConfig;

    // === Server ===
    pub use crate::server::{
        ApiCall, ApiMiddleware, ApiView, ListQuery, ResourceHost, ResourceRegistry,
        ServerBuilder, VerifyReport, verify_resources,
    };

    // === External dependencies ===
    pub use anyhow::Result;
    pub use async_trait::async_trait;
    pub use serde::{Deserialize, Serialize};
    pub use serde_json::{Value, json};
}
