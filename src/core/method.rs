//! Closed set of resource operations and their arguments

use crate::core::error::ApiError;
use crate::core::query::FilterArgs;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// An operation a resource may expose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    GetPk,
    Filter,
    Create,
    Update,
    Delete,
    FormDict,
}

impl Method {
    pub const ALL: [Method; 6] = [
        Method::GetPk,
        Method::Filter,
        Method::Create,
        Method::Update,
        Method::Delete,
        Method::FormDict,
    ];

    /// The wire name of the operation
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GetPk => "get_pk",
            Method::Filter => "filter",
            Method::Create => "create",
            Method::Update => "update",
            Method::Delete => "delete",
            Method::FormDict => "form_dict",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown operation names are rejected as unsupported methods
impl FromStr for Method {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Method::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(ApiError::method_not_supported)
    }
}

/// An operation together with its arguments
#[derive(Debug, Clone, PartialEq)]
pub enum MethodCall {
    GetPk {
        pk: i64,
    },
    Filter {
        filter_args: FilterArgs,
        top: usize,
        bottom: Option<usize>,
    },
    Create,
    Update {
        filter_args: FilterArgs,
    },
    Delete {
        filter_args: FilterArgs,
    },
    FormDict {
        filter_args: FilterArgs,
    },
}

impl MethodCall {
    pub fn method(&self) -> Method {
        match self {
            MethodCall::GetPk { .. } => Method::GetPk,
            MethodCall::Filter { .. } => Method::Filter,
            MethodCall::Create => Method::Create,
            MethodCall::Update { .. } => Method::Update,
            MethodCall::Delete { .. } => Method::Delete,
            MethodCall::FormDict { .. } => Method::FormDict,
        }
    }

    /// Filter arguments carried by the call, if the operation takes any
    pub fn filter_args(&self) -> Option<&FilterArgs> {
        match self {
            MethodCall::Filter { filter_args, .. }
            | MethodCall::Update { filter_args }
            | MethodCall::Delete { filter_args }
            | MethodCall::FormDict { filter_args } => Some(filter_args),
            MethodCall::GetPk { .. } | MethodCall::Create => None,
        }
    }

    /// A `filter` call starting at `top` with no caller-supplied bottom
    pub fn filter(filter_args: FilterArgs, top: usize) -> Self {
        MethodCall::Filter {
            filter_args,
            top,
            bottom: None,
        }
    }
}
