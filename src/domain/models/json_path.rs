//! Dotted-path access into JSON specifications.

use serde_json::{Map, Value};

/// Look up `path` (e.g. `settings.particles`) inside `value`.
pub fn value_at<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(value, |current, segment| current.as_object()?.get(segment))
}

/// Set `path` inside `value`, creating intermediate objects as needed.
///
/// Fails with the offending prefix when a non-object sits on the path.
pub fn set_at(value: &mut Value, path: &str, new_value: Value) -> Result<(), String> {
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(format!("invalid parameter path '{path}'"));
    }

    let mut current = value;
    for (idx, segment) in segments.iter().enumerate() {
        let object = current
            .as_object_mut()
            .ok_or_else(|| format!("'{}' is not an object", segments[..idx].join(".")))?;
        if idx == segments.len() - 1 {
            object.insert((*segment).to_string(), new_value);
            return Ok(());
        }
        current = object
            .entry((*segment).to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    Ok(())
}

/// Equality that treats `1`, `1.0` and `1e0` as the same number.
pub fn values_equivalent(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_at_nested() {
        let spec = json!({"settings": {"particles": 1000}});
        assert_eq!(value_at(&spec, "settings.particles"), Some(&json!(1000)));
        assert_eq!(value_at(&spec, "settings.batches"), None);
        assert_eq!(value_at(&spec, "settings.particles.x"), None);
    }

    #[test]
    fn test_set_at_creates_intermediate_objects() {
        let mut spec = json!({"geometry": "pin"});
        set_at(&mut spec, "materials.fuel.enrichment", json!(4.5)).unwrap();
        assert_eq!(spec["materials"]["fuel"]["enrichment"], json!(4.5));
    }

    #[test]
    fn test_set_at_rejects_scalar_on_path() {
        let mut spec = json!({"geometry": "pin"});
        let err = set_at(&mut spec, "geometry.radius", json!(0.4)).unwrap_err();
        assert!(err.contains("geometry"));
        assert!(set_at(&mut spec, "a..b", json!(1)).is_err());
    }

    #[test]
    fn test_numeric_equivalence() {
        assert!(values_equivalent(&json!(1), &json!(1.0)));
        assert!(!values_equivalent(&json!(1), &json!("1")));
        assert!(values_equivalent(&json!("uo2"), &json!("uo2")));
    }
}
