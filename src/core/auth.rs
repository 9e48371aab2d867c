//! Caller identity and request context
//!
//! Every resource instance is bound to one [`RequestContext`]: who is calling
//! and what they submitted. Permission predicates and rate limiting read the
//! identity from here.

use async_trait::async_trait;
use axum::http::HeaderMap;
use serde_json::{Map, Value};

/// Identity of the caller
#[derive(Debug, Clone, PartialEq)]
pub enum AuthContext {
    /// Authenticated user
    User { user_id: i64, roles: Vec<String> },

    /// Service-to-service communication
    Service { service_name: String },

    /// System administrator
    Admin { admin_id: i64 },

    /// No authentication (public access)
    Anonymous,
}

impl AuthContext {
    pub fn user(user_id: i64) -> Self {
        AuthContext::User {
            user_id,
            roles: Vec::new(),
        }
    }

    /// Whether the caller carries any authenticated identity
    pub fn is_authenticated(&self) -> bool {
        !matches!(self, AuthContext::Anonymous)
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, AuthContext::Admin { .. })
    }

    pub fn is_service(&self) -> bool {
        matches!(self, AuthContext::Service { .. })
    }

    /// Get user_id if available
    pub fn user_id(&self) -> Option<i64> {
        match self {
            AuthContext::User { user_id, .. } => Some(*user_id),
            AuthContext::Admin { admin_id } => Some(*admin_id),
            _ => None,
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        match self {
            AuthContext::User { roles, .. } => roles.iter().any(|r| r == role),
            _ => false,
        }
    }
}

/// Declarative authorization policy
///
/// Policies are turned into method-level permission predicates with
/// [`permission::policy`](crate::core::permission::policy).
#[derive(Debug, Clone)]
pub enum AuthPolicy {
    /// Public access (no auth required)
    Public,

    /// Any authenticated caller
    Authenticated,

    /// User must have one of these roles
    HasRole(Vec<String>),

    /// Service-to-service only
    ServiceOnly,

    /// Admin only
    AdminOnly,

    /// Combination of policies (AND)
    And(Vec<AuthPolicy>),

    /// Combination of policies (OR)
    Or(Vec<AuthPolicy>),

    /// Custom policy function
    Custom(fn(&AuthContext) -> bool),
}

impl AuthPolicy {
    /// Check if auth context satisfies this policy
    pub fn check(&self, context: &AuthContext) -> bool {
        match self {
            AuthPolicy::Public => true,
            AuthPolicy::Authenticated => context.is_authenticated(),
            AuthPolicy::HasRole(required) => required.iter().any(|r| context.has_role(r)),
            AuthPolicy::ServiceOnly => context.is_service(),
            AuthPolicy::AdminOnly => context.is_admin(),
            AuthPolicy::And(policies) => policies.iter().all(|p| p.check(context)),
            AuthPolicy::Or(policies) => policies.iter().any(|p| p.check(context)),
            AuthPolicy::Custom(f) => f(context),
        }
    }
}

/// Resolves the caller of an HTTP request
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Extract auth context from HTTP request headers
    async fn extract_context(&self, headers: &HeaderMap) -> AuthContext;
}

/// Default no-auth provider (for development)
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAuthProvider;

#[async_trait]
impl AuthProvider for NoAuthProvider {
    async fn extract_context(&self, _headers: &HeaderMap) -> AuthContext {
        AuthContext::Anonymous
    }
}

/// Trusts a user id header set by an upstream gateway
///
/// Missing or malformed ids make the caller anonymous.
#[derive(Debug, Clone)]
pub struct UserHeaderAuthProvider {
    header: String,
}

impl UserHeaderAuthProvider {
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
        }
    }
}

impl Default for UserHeaderAuthProvider {
    fn default() -> Self {
        Self::new("x-user-id")
    }
}

#[async_trait]
impl AuthProvider for UserHeaderAuthProvider {
    async fn extract_context(&self, headers: &HeaderMap) -> AuthContext {
        headers
            .get(self.header.as_str())
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<i64>().ok())
            .map(AuthContext::user)
            .unwrap_or(AuthContext::Anonymous)
    }
}

/// Everything a resource knows about the request it serves
#[derive(Debug, Clone, PartialEq)]
pub struct RequestContext {
    pub auth: AuthContext,
    /// Submitted form data (the request body)
    pub data: Map<String, Value>,
}

impl RequestContext {
    pub fn new(auth: AuthContext) -> Self {
        Self {
            auth,
            data: Map::new(),
        }
    }

    pub fn anonymous() -> Self {
        Self::new(AuthContext::Anonymous)
    }

    pub fn for_user(user_id: i64) -> Self {
        Self::new(AuthContext::user(user_id))
    }

    pub fn with_data(mut self, data: Map<String, Value>) -> Self {
        self.data = data;
        self
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::anonymous()
    }
}
