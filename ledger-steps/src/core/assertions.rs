//! Checks run against the cached response.
//!
//! JSON paths use GJSON syntax: `owner.accounts.0.id`, `items.#` for an
//! array length and `items.#.id` to collect a field from every element. A
//! path that does not resolve behaves like an empty string or zero, so
//! assertions fail with a readable message instead of an error about the path.

use gjson::Kind;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssertionError {
    #[error("response [{actual}] doesn't contain expected value [{expected}]")]
    NotContained { actual: String, expected: String },
    #[error("response [{actual}] doesn't equal expected value [{expected}]")]
    NotEqual { actual: String, expected: String },
    #[error("JSON path [{path}] resolves to [{actual}] which is not the expected value [{expected}]")]
    PathMismatch {
        path: String,
        actual: String,
        expected: String,
    },
    #[error("JSON path [{path}] resolves to [{actual}] items which is not the expected number of items [{expected}]")]
    CountMismatch {
        path: String,
        actual: usize,
        expected: usize,
    },
    #[error("JSON path [{path}] resolves to {actual:?} which does not contain [{expected}]")]
    NotInArray {
        path: String,
        actual: Vec<String>,
        expected: String,
    },
    #[error("invalid JSON [{value}]: {message}")]
    InvalidJson { value: String, message: String },
}

pub fn contains(response: &str, expected: &str) -> Result<(), AssertionError> {
    if response.contains(expected) {
        Ok(())
    } else {
        Err(AssertionError::NotContained {
            actual: response.to_string(),
            expected: expected.to_string(),
        })
    }
}

pub fn equals(response: &str, expected: &str) -> Result<(), AssertionError> {
    if response == expected {
        Ok(())
    } else {
        Err(AssertionError::NotEqual {
            actual: response.to_string(),
            expected: expected.to_string(),
        })
    }
}

/// The string found at `path`, or `""` when the path misses or is not a string.
pub fn path_str(json: &str, path: &str) -> String {
    let found = gjson::get(json, path);
    match found.kind() {
        Kind::String => found.str().to_string(),
        _ => String::new(),
    }
}

pub fn path_equals(json: &str, path: &str, expected: &str) -> Result<(), AssertionError> {
    let actual = path_str(json, path);
    if actual == expected {
        Ok(())
    } else {
        Err(AssertionError::PathMismatch {
            path: path.to_string(),
            actual,
            expected: expected.to_string(),
        })
    }
}

/// The number at `path` read as a count (`items.#`); a bare array counts its
/// elements.
pub fn path_count(json: &str, path: &str) -> usize {
    let found = gjson::get(json, path);
    match found.kind() {
        Kind::Number => found.f64().max(0.0) as usize,
        Kind::Array => found.array().len(),
        _ => 0,
    }
}

pub fn path_has_items(json: &str, path: &str, expected: usize) -> Result<(), AssertionError> {
    let actual = path_count(json, path);
    if actual == expected {
        Ok(())
    } else {
        Err(AssertionError::CountMismatch {
            path: path.to_string(),
            actual,
            expected,
        })
    }
}

pub fn path_contains(json: &str, path: &str, expected: &str) -> Result<(), AssertionError> {
    let found = gjson::get(json, path);
    let items: Vec<String> = match found.kind() {
        Kind::Array => found
            .array()
            .iter()
            .map(|item| match item.kind() {
                Kind::String => item.str().to_string(),
                _ => item.json().to_string(),
            })
            .collect(),
        _ => Vec::new(),
    };
    if items.iter().any(|item| item == expected) {
        Ok(())
    } else {
        Err(AssertionError::NotInArray {
            path: path.to_string(),
            actual: items,
            expected: expected.to_string(),
        })
    }
}

/// Validate that `value` is a JSON object.
pub fn validate_json_object(value: &str) -> Result<(), AssertionError> {
    let invalid = |message: String| AssertionError::InvalidJson {
        value: value.to_string(),
        message,
    };
    match serde_json::from_str::<Value>(value) {
        Ok(Value::Object(_)) => Ok(()),
        Ok(_) => Err(invalid("expected a JSON object".to_string())),
        Err(err) => Err(invalid(err.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"{
        "owner": {"name": "alice", "tags": ["a", "b", 3]},
        "count": 4,
        "items": [{"id": "x"}, {"id": "y"}]
    }"#;

    #[test]
    fn contains_and_equals() {
        assert!(contains("hello world", "world").is_ok());
        assert!(matches!(
            contains("hello", "bye"),
            Err(AssertionError::NotContained { .. })
        ));
        assert!(equals("v1", "v1").is_ok());
        assert!(equals("v1", "v2").is_err());
    }

    #[test]
    fn path_equals_walks_objects_and_arrays() {
        assert!(path_equals(DOC, "owner.name", "alice").is_ok());
        assert!(path_equals(DOC, "items.1.id", "y").is_ok());
        let err = path_equals(DOC, "owner.missing", "x").unwrap_err();
        assert!(err.to_string().contains("resolves to []"));
    }

    #[test]
    fn path_has_items_counts_arrays_and_numbers() {
        assert!(path_has_items(DOC, "items", 2).is_ok());
        assert!(path_has_items(DOC, "count", 4).is_ok());
        assert!(path_has_items(DOC, "nothing", 0).is_ok());
        assert!(path_has_items(DOC, "owner.tags", 2).is_err());
    }

    #[test]
    fn hash_paths_count_and_collect() {
        let doc = r#"{"items":[{"id":1},{"id":2}],"names":[{"n":"a"},{"n":"b"}]}"#;
        assert_eq!(path_count(doc, "items.#"), 2);
        assert!(path_has_items(doc, "items.#", 2).is_ok());
        assert!(path_has_items(doc, "items.#", 3).is_err());
        assert!(path_contains(doc, "names.#.n", "b").is_ok());
        assert!(path_contains(doc, "items.#.id", "2").is_ok());
        assert_eq!(path_str(DOC, "items.#.id"), "");
        assert!(path_equals(DOC, "items.0.id", "x").is_ok());
    }

    #[test]
    fn non_string_values_do_not_equal_their_text() {
        assert_eq!(path_str(DOC, "count"), "");
        assert!(path_equals(DOC, "count", "4").is_err());
    }

    #[test]
    fn path_contains_matches_array_elements() {
        assert!(path_contains(DOC, "owner.tags", "b").is_ok());
        assert!(path_contains(DOC, "owner.tags", "3").is_ok());
        assert!(path_contains(DOC, "owner.tags", "z").is_err());
        assert!(path_contains("not json", "a", "b").is_err());
    }

    #[test]
    fn json_object_validation() {
        assert!(validate_json_object(r#"{"a":1}"#).is_ok());
        assert!(validate_json_object("[1,2]").is_err());
        assert!(validate_json_object("{").is_err());
    }
}
