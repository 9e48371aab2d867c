//! Reusable form field cleaners
//!
//! Cleaners transform a submitted value before it is validated. A failing
//! cleaner turns into an error on the field.

use anyhow::Result;
use serde_json::Value;

/// Filter: convert string to uppercase
pub fn uppercase() -> impl Fn(&str, Value) -> Result<Value> + Send + Sync + Clone {
    |_: &str, value: Value| match value.as_str() {
        Some(s) => Ok(Value::String(s.to_uppercase())),
        None => Ok(value),
    }
}

/// Filter: convert string to lowercase
pub fn lowercase() -> impl Fn(&str, Value) -> Result<Value> + Send + Sync + Clone {
    |_: &str, value: Value| match value.as_str() {
        Some(s) => Ok(Value::String(s.to_lowercase())),
        None => Ok(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_case_conversion() {
        assert_eq!(uppercase()("code", json!("Hello World")).unwrap(), json!("HELLO WORLD"));
        assert_eq!(lowercase()("email", json!("Hello@WORLD.com")).unwrap(), json!("hello@world.com"));
        assert_eq!(lowercase()("flag", json!(true)).unwrap(), json!(true));
    }
}
