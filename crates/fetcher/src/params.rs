//! Filter parameter normalization.
//!
//! Filters arrive either as `{id, name, params: {...}}` or flat; the
//! nested `params` object wins when present. Only the parameters the
//! upstream understands pass through; `period` is translated to the
//! upstream's `search_period`, and `search_field` may be a single value
//! or a list (emitted as repeated query pairs).

use serde_json::Value;

const PASSTHROUGH: &[&str] = &[
    "text",
    "area",
    "professional_role",
    "experience",
    "employment",
    "schedule",
    "salary",
    "only_with_salary",
    "order_by",
];

/// Query pairs derived from a filter specification, excluding pagination.
pub fn normalize_filter_params(filter: &Value) -> Vec<(String, String)> {
    let fp = match filter.get("params") {
        Some(nested) if nested.is_object() => nested,
        _ => filter,
    };

    let mut query = Vec::new();

    for key in PASSTHROUGH {
        if let Some(v) = fp.get(*key) {
            if let Some(s) = scalar_to_string(v) {
                query.push((key.to_string(), s));
            }
        }
    }

    // Either spelling of the period parameter maps to `search_period`;
    // the explicit one wins when both appear.
    let period = fp
        .get("search_period")
        .or_else(|| fp.get("period"))
        .and_then(scalar_to_string);
    if let Some(p) = period {
        query.push(("search_period".to_string(), p));
    }

    match fp.get("search_field") {
        Some(Value::Array(items)) => {
            for item in items {
                if let Some(s) = scalar_to_string(item) {
                    query.push(("search_field".to_string(), s));
                }
            }
        }
        Some(v) => {
            if let Some(s) = scalar_to_string(v) {
                let trimmed = s.trim().to_string();
                if !trimmed.is_empty() {
                    query.push(("search_field".to_string(), trimmed));
                }
            }
        }
        None => {}
    }

    query
}

/// `max_pages` hint carried inside the filter params, when present.
pub fn max_pages_hint(filter: &Value) -> Option<u32> {
    let fp = match filter.get("params") {
        Some(nested) if nested.is_object() => nested,
        _ => filter,
    };
    fp.get("max_pages")
        .and_then(Value::as_u64)
        .filter(|n| *n > 0)
        .map(|n| n as u32)
}

fn scalar_to_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pairs_for(filter: Value) -> Vec<(String, String)> {
        normalize_filter_params(&filter)
    }

    #[test]
    fn nested_params_win_over_flat_fields() {
        let q = pairs_for(json!({
            "id": "f1",
            "text": "outer",
            "params": {"text": "rust", "area": "1"}
        }));
        assert!(q.contains(&("text".into(), "rust".into())));
        assert!(q.contains(&("area".into(), "1".into())));
    }

    #[test]
    fn flat_filter_is_accepted() {
        let q = pairs_for(json!({"text": "python", "salary": 150000, "only_with_salary": true}));
        assert!(q.contains(&("text".into(), "python".into())));
        assert!(q.contains(&("salary".into(), "150000".into())));
        assert!(q.contains(&("only_with_salary".into(), "true".into())));
    }

    #[test]
    fn period_maps_to_search_period() {
        let q = pairs_for(json!({"params": {"period": 3}}));
        assert!(q.contains(&("search_period".into(), "3".into())));

        let q = pairs_for(json!({"params": {"period": 3, "search_period": 7}}));
        assert_eq!(
            q.iter().filter(|(k, _)| k == "search_period").count(),
            1
        );
        assert!(q.contains(&("search_period".into(), "7".into())));
    }

    #[test]
    fn search_field_list_becomes_repeated_pairs() {
        let q = pairs_for(json!({"params": {"search_field": ["name", "description"]}}));
        let fields: Vec<_> = q
            .iter()
            .filter(|(k, _)| k == "search_field")
            .map(|(_, v)| v.as_str())
            .collect();
        assert_eq!(fields, vec!["name", "description"]);
    }

    #[test]
    fn search_field_string_is_trimmed_and_blank_dropped() {
        let q = pairs_for(json!({"params": {"search_field": "  name  "}}));
        assert!(q.contains(&("search_field".into(), "name".into())));

        let q = pairs_for(json!({"params": {"search_field": "   "}}));
        assert!(q.iter().all(|(k, _)| k != "search_field"));
    }

    #[test]
    fn unknown_keys_do_not_leak_upstream() {
        let q = pairs_for(json!({"params": {"text": "x", "max_pages": 5, "internal_note": "y"}}));
        assert!(q.iter().all(|(k, _)| k != "max_pages" && k != "internal_note"));
    }

    #[test]
    fn max_pages_hint_reads_nested_and_flat() {
        assert_eq!(max_pages_hint(&json!({"params": {"max_pages": 7}})), Some(7));
        assert_eq!(max_pages_hint(&json!({"max_pages": 3})), Some(3));
        assert_eq!(max_pages_hint(&json!({"params": {"max_pages": 0}})), None);
        assert_eq!(max_pages_hint(&json!({"params": {}})), None);
    }
}
