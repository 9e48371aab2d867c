//! Core module containing the resource engine and the interfaces it consumes

pub mod auth;
pub mod cache;
pub mod error;
pub mod field;
pub mod form;
pub mod method;
pub mod permission;
pub mod query;
pub mod resource;
pub mod response;
pub mod stage;
pub mod store;
pub mod validation;

pub use auth::{AuthContext, AuthPolicy, AuthProvider, NoAuthProvider, RequestContext};
pub use cache::CacheBackend;
pub use error::{ApiError, ApiErrorKind, SileoError, SileoResult};
pub use field::{CollectionMode, Converter, FieldDescriptor, ResourceRef};
pub use form::{FieldKind, Form, FormField, FormSpec};
pub use method::{Method, MethodCall};
pub use permission::Verdict;
pub use query::{FilterArgs, Filters, Query, QuerySet};
pub use resource::{Resource, ResourceDefinition};
pub use response::Envelope;
pub use stage::{LoginRequired, MethodLoginRequired, PartialCache, RateLimit, ResourceStage};
pub use store::{ModelSchema, ObjectStore, Record, Relation};
