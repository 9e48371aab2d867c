//! Typed error handling for sileo
//!
//! Resource operations fail with one of two families of errors:
//!
//! - [`ApiError`]: request-level failures (permission denied, not found,
//!   method not supported). They carry a status, a detail message, a code and
//!   optional extras, and convert into the uniform [`Envelope`] at the
//!   transport boundary.
//! - Everything else ([`RegistryError`], [`ConfigError`], [`StorageError`],
//!   [`CacheError`]): misconfiguration or backend faults that the engine does
//!   not turn into an envelope.
//!
//! # Example
//!
//! ```rust,ignore
//! match resource.dispatch(call).await {
//!     Ok(envelope) => envelope,
//!     Err(SileoError::Api(e)) => e.get_context(),
//!     Err(e) => return Err(e),
//! }
//! ```

use crate::core::response::Envelope;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{Map, Value, json};
use std::fmt;

/// The main error type for sileo
#[derive(Debug)]
pub enum SileoError {
    /// Request-level failures that map onto an envelope
    Api(ApiError),

    /// Registration or lookup failures in the resource registry
    Registry(RegistryError),

    /// Resource misconfiguration
    Config(ConfigError),

    /// Object store failures
    Storage(StorageError),

    /// Cache backend failures
    Cache(CacheError),
}

impl fmt::Display for SileoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SileoError::Api(e) => write!(f, "{}", e),
            SileoError::Registry(e) => write!(f, "{}", e),
            SileoError::Config(e) => write!(f, "{}", e),
            SileoError::Storage(e) => write!(f, "{}", e),
            SileoError::Cache(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for SileoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SileoError::Api(e) => Some(e),
            SileoError::Registry(e) => Some(e),
            SileoError::Config(e) => Some(e),
            SileoError::Storage(e) => Some(e),
            SileoError::Cache(e) => Some(e),
        }
    }
}

impl SileoError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            SileoError::Api(e) => e.status(),
            SileoError::Registry(RegistryError::NotFound { .. }) => StatusCode::NOT_FOUND,
            SileoError::Registry(_) => StatusCode::INTERNAL_SERVER_ERROR,
            SileoError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            SileoError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            SileoError::Cache(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code for this error
    pub fn error_code(&self) -> &str {
        match self {
            SileoError::Api(e) => e.code(),
            SileoError::Registry(e) => e.error_code(),
            SileoError::Config(e) => e.error_code(),
            SileoError::Storage(_) => "storage_error",
            SileoError::Cache(_) => "cache_error",
        }
    }

    /// Whether the transport boundary answers this error with an envelope
    ///
    /// Unknown registry entries are reported as not found; everything that
    /// is not an [`ApiError`] is otherwise a fault.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SileoError::Api(_) | SileoError::Registry(RegistryError::NotFound { .. })
        )
    }

    /// Convert a recoverable error into its envelope, handing faults back
    pub fn into_envelope(self) -> Result<Envelope, SileoError> {
        match self {
            SileoError::Api(e) => Ok(e.get_context()),
            SileoError::Registry(RegistryError::NotFound { .. }) => {
                Ok(ApiError::not_found().get_context())
            }
            other => Err(other),
        }
    }
}

impl IntoResponse for SileoError {
    fn into_response(self) -> Response {
        match self.into_envelope() {
            Ok(envelope) => envelope.into_response(),
            Err(fault) => {
                let status = fault.status_code();
                let body = Json(json!({
                    "data": {
                        "detail": fault.to_string(),
                        "code": fault.error_code(),
                    }
                }));
                (status, body).into_response()
            }
        }
    }
}

// =============================================================================
// API Errors
// =============================================================================

/// The request-level error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// A method-level or object-level permission check failed
    PermissionDenied,

    /// Missing required filters, zero or ambiguous matches, unknown resources
    NotFound,

    /// The method is not enabled on the resource
    MethodNotSupported,
}

impl ApiErrorKind {
    pub fn default_detail(&self) -> &'static str {
        match self {
            ApiErrorKind::PermissionDenied => "You do not have permission to access the resource.",
            ApiErrorKind::NotFound => "Object not found.",
            ApiErrorKind::MethodNotSupported => {
                "The method you are trying to access is not supported by the resource."
            }
        }
    }

    pub fn default_code(&self) -> &'static str {
        match self {
            ApiErrorKind::PermissionDenied => "permission_denied",
            ApiErrorKind::NotFound => "object_not_found",
            ApiErrorKind::MethodNotSupported => "method_not_supported",
        }
    }

    /// Not found and method not supported share 404 unless overridden
    pub fn default_status(&self) -> StatusCode {
        match self {
            ApiErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
            ApiErrorKind::NotFound => StatusCode::NOT_FOUND,
            ApiErrorKind::MethodNotSupported => StatusCode::NOT_FOUND,
        }
    }
}

/// A request-level failure carrying its own response payload
#[derive(Debug, Clone, PartialEq)]
pub struct ApiError {
    kind: ApiErrorKind,
    status: StatusCode,
    detail: String,
    code: String,
    extras: Map<String, Value>,
}

impl ApiError {
    /// Create an error of the given kind with its default status, detail and code
    pub fn new(kind: ApiErrorKind) -> Self {
        Self {
            kind,
            status: kind.default_status(),
            detail: kind.default_detail().to_string(),
            code: kind.default_code().to_string(),
            extras: Map::new(),
        }
    }

    pub fn permission_denied() -> Self {
        Self::new(ApiErrorKind::PermissionDenied)
    }

    pub fn not_found() -> Self {
        Self::new(ApiErrorKind::NotFound)
    }

    pub fn method_not_supported() -> Self {
        Self::new(ApiErrorKind::MethodNotSupported)
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Attach a structured payload; its own `detail`/`code` keys win over the defaults
    pub fn with_extras(mut self, extras: Map<String, Value>) -> Self {
        self.extras = extras;
        self
    }

    pub fn kind(&self) -> ApiErrorKind {
        self.kind
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn detail(&self) -> &str {
        &self.detail
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn extras(&self) -> &Map<String, Value> {
        &self.extras
    }

    /// The serializable payload sent as the response data
    pub fn get_full_details(&self) -> Map<String, Value> {
        let mut details = self.extras.clone();
        if !details.contains_key("detail") {
            details.insert("detail".to_string(), Value::String(self.detail.clone()));
        }
        if !details.contains_key("code") {
            details.insert("code".to_string(), Value::String(self.code.clone()));
        }
        details
    }

    /// The uniform `{status_code, data}` envelope for this error
    pub fn get_context(&self) -> Envelope {
        Envelope::new(self.status, Value::Object(self.get_full_details()))
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.detail)
    }
}

impl std::error::Error for ApiError {}

impl From<ApiError> for SileoError {
    fn from(err: ApiError) -> Self {
        SileoError::Api(err)
    }
}

// =============================================================================
// Registry Errors
// =============================================================================

/// Errors raised while registering or looking up resources
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Version {version} not allowed")]
    VersionNotAllowed { version: String },

    #[error("Resource already registered: {version}/{namespace}/{name}")]
    AlreadyRegistered {
        version: String,
        namespace: String,
        name: String,
    },

    #[error("Resource '{namespace}':'{name}' is not available for version {version}")]
    NotFound {
        version: String,
        namespace: String,
        name: String,
    },
}

impl RegistryError {
    pub fn error_code(&self) -> &'static str {
        match self {
            RegistryError::VersionNotAllowed { .. } => "version_not_allowed",
            RegistryError::AlreadyRegistered { .. } => "already_registered",
            RegistryError::NotFound { .. } => "object_not_found",
        }
    }
}

impl From<RegistryError> for SileoError {
    fn from(err: RegistryError) -> Self {
        SileoError::Registry(err)
    }
}

// =============================================================================
// Config Errors
// =============================================================================

/// Errors caused by how a resource is declared
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// `create`, `update` or `form_dict` ran on a resource without a form
    MissingFormClass { resource: String },

    /// A derived field names a method the resource does not provide
    MissingMethod { resource: String, method: String },

    /// A rate string is not of the form `<count>/<seconds>`
    InvalidRate { rate: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingFormClass { resource } => {
                write!(f, "{} did not specify a form_class", resource)
            }
            ConfigError::MissingMethod { resource, method } => {
                write!(f, "'{}' has no method '{}'", resource, method)
            }
            ConfigError::InvalidRate { rate } => {
                write!(f, "Invalid rate '{}', expected '<count>/<seconds>'", rate)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl ConfigError {
    pub fn error_code(&self) -> &'static str {
        match self {
            ConfigError::MissingFormClass { .. } => "missing_form_class",
            ConfigError::MissingMethod { .. } => "missing_method",
            ConfigError::InvalidRate { .. } => "invalid_rate",
        }
    }
}

impl From<ConfigError> for SileoError {
    fn from(err: ConfigError) -> Self {
        SileoError::Config(err)
    }
}

// =============================================================================
// Storage Errors
// =============================================================================

/// Errors reported by an object store
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("{model} matching query does not exist")]
    DoesNotExist { model: String },

    #[error("get() returned {count} {model} rows, expected exactly one")]
    MultipleObjectsReturned { model: String, count: usize },

    #[error("Unknown model: {model}")]
    UnknownModel { model: String },

    #[error("{model} has no relation '{relation}'")]
    UnknownRelation { model: String, relation: String },

    #[error("Invalid lookup '{lookup}': {message}")]
    InvalidLookup { lookup: String, message: String },

    #[error("Storage backend error: {message}")]
    Backend { message: String },
}

impl StorageError {
    /// Whether this is one of the "not exactly one row" lookup failures
    pub fn is_lookup_miss(&self) -> bool {
        matches!(
            self,
            StorageError::DoesNotExist { .. } | StorageError::MultipleObjectsReturned { .. }
        )
    }
}

impl From<StorageError> for SileoError {
    fn from(err: StorageError) -> Self {
        SileoError::Storage(err)
    }
}

// =============================================================================
// Cache Errors
// =============================================================================

/// Errors reported by a cache backend
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    #[error("Key '{key}' not found")]
    MissingKey { key: String },

    #[error("Value at '{key}' is not an integer")]
    NotAnInteger { key: String },

    #[error("Cache backend error: {message}")]
    Backend { message: String },
}

impl From<CacheError> for SileoError {
    fn from(err: CacheError) -> Self {
        SileoError::Cache(err)
    }
}

// =============================================================================
// Result type alias
// =============================================================================

/// A specialized Result type for sileo operations
pub type SileoResult<T> = Result<T, SileoError>;

// =============================================================================
// Tests
// =============================================================================
