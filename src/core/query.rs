//! Filter resolution, lookups and pagination
//!
//! Filter arguments arrive as a loose map (usually a parsed query string).
//! A resource whitelists which keys each operation honours; the surviving
//! values are cleaned and handed to the object store as [`Query`] lookups of
//! the form `path__op`, e.g. `owner__id`, `title__icontains`, `pk__gt`.

use crate::core::error::ApiError;
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Raw filter arguments submitted by the caller
pub type FilterArgs = Map<String, Value>;

/// Cleaned `(lookup, value)` pairs, in declaration order
pub type Filters = Vec<(String, Value)>;

const MISSING_REQUIRED: &str = "Missing required filter fields.";

/// Clean one raw filter value
///
/// Integers (and strings holding integers) are coerced to integers. A
/// negative integer means "no constraint" and yields `None`, which removes
/// the key from the resulting filters.
pub fn clean_filter_value(value: &Value) -> Option<Value> {
    match value {
        Value::Number(n) => match n.as_i64() {
            Some(i) if i < 0 => None,
            _ => Some(value.clone()),
        },
        Value::String(s) => match s.trim().parse::<i64>() {
            Ok(i) if i < 0 => None,
            Ok(i) => Some(Value::from(i)),
            Err(_) => Some(value.clone()),
        },
        other => Some(other.clone()),
    }
}

/// Read an integer id from a number or a string holding one
pub fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Build filters from `filter_args` for the given whitelists
///
/// Every key in `required_fields` must be present, otherwise the lookup is
/// reported as not found. Keys in `optional_fields` are included when given.
pub fn resolve_filters(
    filter_args: &FilterArgs,
    required_fields: &[String],
    optional_fields: &[String],
) -> Result<Filters, ApiError> {
    let mut filters = Filters::new();
    if filter_args.is_empty() {
        if !required_fields.is_empty() {
            return Err(ApiError::not_found().with_detail(MISSING_REQUIRED));
        }
        return Ok(filters);
    }

    for field in required_fields {
        let raw = filter_args
            .get(field)
            .ok_or_else(|| ApiError::not_found().with_detail(MISSING_REQUIRED))?;
        if let Some(value) = clean_filter_value(raw) {
            filters.push((field.clone(), value));
        }
    }
    for field in optional_fields {
        if let Some(raw) = filter_args.get(field)
            && let Some(value) = clean_filter_value(raw)
        {
            filters.push((field.clone(), value));
        }
    }
    Ok(filters)
}

/// Compute the `[offset, end)` window of one `filter` page
///
/// The page is `page_size` rows from `top`; a caller-supplied `bottom` can
/// only shorten it.
pub fn page_window(top: usize, bottom: Option<usize>, page_size: usize) -> (usize, usize) {
    let mut end = top.saturating_add(page_size);
    if let Some(bottom) = bottom
        && bottom < end
    {
        end = bottom;
    }
    (top, end.max(top))
}

// =============================================================================
// Query sets
// =============================================================================

/// The base query a resource draws its rows from
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySet {
    pub model: String,
    pub filters: Filters,
    pub excludes: Vec<Filters>,
}

impl QuerySet {
    /// All rows of `model`
    pub fn all(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            filters: Filters::new(),
            excludes: Vec::new(),
        }
    }

    /// Narrow the base query
    pub fn filter(mut self, lookup: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push((lookup.into(), value.into()));
        self
    }

    /// Drop rows matching all of `lookups`
    pub fn exclude(mut self, lookups: Filters) -> Self {
        if !lookups.is_empty() {
            self.excludes.push(lookups);
        }
        self
    }

    /// A query over this set with extra inclusion and exclusion filters
    pub fn query(&self, filters: Filters, excludes: Filters) -> Query {
        let mut all_filters = self.filters.clone();
        all_filters.extend(filters);
        let mut all_excludes = self.excludes.clone();
        if !excludes.is_empty() {
            all_excludes.push(excludes);
        }
        Query {
            model: self.model.clone(),
            filters: all_filters,
            excludes: all_excludes,
            offset: 0,
            limit: None,
        }
    }

    /// The lookups identifying exactly one row of this set
    pub fn lookups(&self, filters: Filters) -> Filters {
        let mut all = self.filters.clone();
        all.extend(filters);
        all
    }
}

/// A fully specified store query: filter, exclude, then slice
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub model: String,
    pub filters: Filters,
    /// Each group excludes the rows matching all of its lookups
    pub excludes: Vec<Filters>,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl Query {
    /// Restrict the query to rows `[start, end)`
    pub fn slice(mut self, start: usize, end: usize) -> Self {
        self.offset = start;
        self.limit = Some(end.saturating_sub(start));
        self
    }
}

// =============================================================================
// Lookups
// =============================================================================

/// Comparison applied by a lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupOp {
    Exact,
    IExact,
    Contains,
    IContains,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    IsNull,
}

impl LookupOp {
    fn from_suffix(suffix: &str) -> Option<Self> {
        Some(match suffix {
            "exact" => LookupOp::Exact,
            "iexact" => LookupOp::IExact,
            "contains" => LookupOp::Contains,
            "icontains" => LookupOp::IContains,
            "gt" => LookupOp::Gt,
            "gte" => LookupOp::Gte,
            "lt" => LookupOp::Lt,
            "lte" => LookupOp::Lte,
            "in" => LookupOp::In,
            "isnull" => LookupOp::IsNull,
            _ => return None,
        })
    }
}

/// A parsed `path__op` lookup key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lookup {
    /// Attribute path; more than one segment traverses relations
    pub path: Vec<String>,
    pub op: LookupOp,
}

impl Lookup {
    pub fn parse(key: &str) -> Self {
        let mut path: Vec<String> = key.split("__").map(str::to_string).collect();
        let op = match path.last().and_then(|s| LookupOp::from_suffix(s)) {
            Some(op) if path.len() > 1 => {
                path.pop();
                op
            }
            _ => LookupOp::Exact,
        };
        Self { path, op }
    }

    /// Whether `actual` satisfies this lookup against `expected`
    pub fn matches(&self, actual: &Value, expected: &Value) -> bool {
        match self.op {
            LookupOp::Exact => values_equal(actual, expected),
            LookupOp::IExact => match (actual.as_str(), expected.as_str()) {
                (Some(a), Some(e)) => a.to_lowercase() == e.to_lowercase(),
                _ => values_equal(actual, expected),
            },
            LookupOp::Contains => match (actual.as_str(), expected.as_str()) {
                (Some(a), Some(e)) => a.contains(e),
                _ => false,
            },
            LookupOp::IContains => match (actual.as_str(), expected.as_str()) {
                (Some(a), Some(e)) => a.to_lowercase().contains(&e.to_lowercase()),
                _ => false,
            },
            LookupOp::Gt => compare(actual, expected) == Some(Ordering::Greater),
            LookupOp::Gte => matches!(
                compare(actual, expected),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            LookupOp::Lt => compare(actual, expected) == Some(Ordering::Less),
            LookupOp::Lte => matches!(
                compare(actual, expected),
                Some(Ordering::Less | Ordering::Equal)
            ),
            LookupOp::In => match expected {
                Value::Array(items) => items.iter().any(|e| values_equal(actual, e)),
                Value::String(s) => s.split(',').any(|e| values_equal(actual, &text(e))),
                _ => false,
            },
            LookupOp::IsNull => actual.is_null() == truthy(expected),
        }
    }
}

fn text(s: &str) -> Value {
    clean_filter_value(&Value::String(s.trim().to_string())).unwrap_or(Value::Null)
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => matches!(s.to_lowercase().as_str(), "true" | "1" | "yes"),
        _ => false,
    }
}

/// Equality tolerant of the string encodings query strings produce
pub fn values_equal(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Number(a), Value::Number(e)) => a.as_f64() == e.as_f64(),
        (Value::Number(a), Value::String(e)) => {
            e.trim().parse::<f64>().ok() == a.as_f64()
        }
        (Value::String(a), Value::Number(e)) => {
            a.trim().parse::<f64>().ok() == e.as_f64()
        }
        (Value::Bool(a), Value::String(_) | Value::Number(_)) => *a == truthy(expected),
        _ => actual == expected,
    }
}

fn compare(actual: &Value, expected: &Value) -> Option<Ordering> {
    let number = |v: &Value| match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match (actual, expected) {
        (Value::String(a), Value::String(e)) => match (number(actual), number(expected)) {
            (Some(a), Some(e)) => a.partial_cmp(&e),
            _ => Some(a.cmp(e)),
        },
        _ => number(actual)?.partial_cmp(&number(expected)?),
    }
}
