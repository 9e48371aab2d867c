//! Reusable form field validators
//!
//! Validators run on a field's cleaned value after its kind-specific checks.
//! Each returns the message added to the field's errors when it fails. Values
//! of a type the validator does not understand pass through untouched.

use regex::Regex;
use serde_json::Value;

/// Validator: number must be positive
pub fn positive() -> impl Fn(&str, &Value) -> Result<(), String> + Send + Sync + Clone {
    |_: &str, value: &Value| match value.as_f64() {
        Some(num) if num <= 0.0 => Err("Ensure this value is greater than 0.".to_string()),
        _ => Ok(()),
    }
}

/// Validator: number must not exceed `max`
pub fn max_value(max: f64) -> impl Fn(&str, &Value) -> Result<(), String> + Send + Sync + Clone {
    move |_: &str, value: &Value| match value.as_f64() {
        Some(num) if num > max => Err(format!(
            "Ensure this value is less than or equal to {}.",
            max
        )),
        _ => Ok(()),
    }
}

/// Validator: string length must be within range (in characters)
pub fn string_length(
    min: usize,
    max: usize,
) -> impl Fn(&str, &Value) -> Result<(), String> + Send + Sync + Clone {
    move |_: &str, value: &Value| {
        let Some(s) = value.as_str() else {
            return Ok(());
        };
        let len = s.chars().count();
        if len < min {
            Err(format!(
                "Ensure this value has at least {} characters (it has {}).",
                min, len
            ))
        } else if len > max {
            Err(format!(
                "Ensure this value has at most {} characters (it has {}).",
                max, len
            ))
        } else {
            Ok(())
        }
    }
}

/// Validator: string must match `pattern`
///
/// An invalid pattern rejects every string, naming the field.
pub fn matches(pattern: &str) -> impl Fn(&str, &Value) -> Result<(), String> + Send + Sync + Clone {
    let regex = Regex::new(pattern).ok();
    move |field: &str, value: &Value| {
        let Some(s) = value.as_str() else {
            return Ok(());
        };
        match &regex {
            Some(regex) if regex.is_match(s) => Ok(()),
            Some(_) => Err("Enter a valid value.".to_string()),
            None => Err(format!("'{}' has an invalid pattern", field)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // === positive() ===

    #[test]
    fn test_positive_negative_number_returns_error() {
        let v = positive();
        let result = v("price", &json!(-5.0));
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("greater than 0"));
    }

    #[test]
    fn test_positive_zero_returns_error() {
        let v = positive();
        assert!(v("price", &json!(0)).is_err());
    }

    #[test]
    fn test_positive_non_number_passthrough() {
        let v = positive();
        assert!(v("name", &json!("hello")).is_ok());
        assert!(v("price", &json!(42.5)).is_ok());
    }

    // === max_value() ===

    #[test]
    fn test_max_value_over_returns_error() {
        let v = max_value(100.0);
        let result = v("score", &json!(101.0));
        assert!(result.unwrap_err().contains("less than or equal to 100"));
        assert!(v("score", &json!(100.0)).is_ok());
        assert!(v("name", &json!("hello")).is_ok());
    }

    // === string_length() ===

    #[test]
    fn test_string_length_bounds() {
        let v = string_length(3, 5);
        assert!(
            v("name", &json!("ab"))
                .unwrap_err()
                .contains("at least 3 characters (it has 2)")
        );
        assert!(
            v("name", &json!("abcdef"))
                .unwrap_err()
                .contains("at most 5 characters (it has 6)")
        );
        assert!(v("name", &json!("abc")).is_ok());
        assert!(v("name", &json!("abcde")).is_ok());
        assert!(v("age", &json!(42)).is_ok());
    }

    #[test]
    fn test_string_length_counts_characters() {
        let v = string_length(1, 3);
        assert!(v("name", &json!("été")).is_ok());
    }

    // === matches() ===

    #[test]
    fn test_matches() {
        let v = matches(r"^[a-z]+$");
        assert!(v("slug", &json!("sample")).is_ok());
        assert!(v("slug", &json!("Sample 1")).is_err());
        assert!(v("slug", &json!(1)).is_ok());
    }

    #[test]
    fn test_matches_invalid_pattern() {
        let v = matches(r"(unclosed");
        assert!(v("slug", &json!("x")).unwrap_err().contains("slug"));
    }
}
