//! Permission predicates
//!
//! A resource carries two ordered chains of predicates: method-level checks
//! run before any data is touched, object-level checks run once the target
//! row is loaded. Each predicate answers with a [`Verdict`]; the first denial
//! aborts the operation with a permission error carrying the verdict's
//! detail payload.

use crate::core::auth::AuthPolicy;
use crate::core::method::{Method, MethodCall};
use crate::core::resource::Resource;
use crate::core::store::Record;
use serde_json::{Map, Value, json};
use std::sync::Arc;

/// Answer of one permission predicate
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Verdict {
    pub allowed: bool,
    /// Structured payload sent back when denied
    pub detail: Option<Map<String, Value>>,
}

impl Verdict {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            detail: None,
        }
    }

    pub fn deny() -> Self {
        Self {
            allowed: false,
            detail: None,
        }
    }

    /// Deny with a payload; non-object values are ignored
    pub fn deny_with(detail: Value) -> Self {
        Self {
            allowed: false,
            detail: match detail {
                Value::Object(map) => Some(map),
                _ => None,
            },
        }
    }
}

impl From<bool> for Verdict {
    fn from(allowed: bool) -> Self {
        Self {
            allowed,
            detail: None,
        }
    }
}

impl From<(bool, Option<Map<String, Value>>)> for Verdict {
    fn from((allowed, detail): (bool, Option<Map<String, Value>>)) -> Self {
        Self { allowed, detail }
    }
}

/// Checks run before an operation, given the method and its raw arguments
pub type MethodPerm = Arc<dyn Fn(&Resource, Method, &MethodCall) -> Verdict + Send + Sync>;

/// Checks run against a loaded row
pub type ObjectPerm = Arc<dyn Fn(&Resource, Method, &Record) -> Verdict + Send + Sync>;

/// Wrap a closure as a method-level predicate
pub fn method_perm<F>(f: F) -> MethodPerm
where
    F: Fn(&Resource, Method, &MethodCall) -> Verdict + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Wrap a closure as an object-level predicate
pub fn object_perm<F>(f: F) -> ObjectPerm
where
    F: Fn(&Resource, Method, &Record) -> Verdict + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Allow authenticated callers only
pub fn login_required() -> MethodPerm {
    method_perm(|resource, _, _| {
        if resource.context().auth.is_authenticated() {
            Verdict::allow()
        } else {
            Verdict::deny_with(json!({
                "detail": "Authentication is required.",
                "code": "auth_permission_denied",
            }))
        }
    })
}

/// Allow the caller whose id is the row's `owner_id`
pub fn owner_required() -> ObjectPerm {
    object_perm(|resource, _, record| {
        let owned = match (resource.context().auth.user_id(), record.attribute("owner_id")) {
            (Some(user_id), Some(owner_id)) => owner_id.as_i64() == Some(user_id),
            _ => false,
        };
        if owned {
            Verdict::allow()
        } else {
            Verdict::deny_with(json!({ "detail": "Owner required." }))
        }
    })
}

/// Turn a declarative [`AuthPolicy`] into a method-level predicate
pub fn policy(policy: AuthPolicy) -> MethodPerm {
    method_perm(move |resource, _, _| policy.check(&resource.context().auth).into())
}
