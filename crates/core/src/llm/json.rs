use anyhow::Context;
use serde_json::Value;

pub fn extract_json(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.starts_with("```") {
        // Remove Markdown fences (```json ... ``` or ``` ... ```).
        let mut inner = trimmed;
        if let Some(after_first) = inner.splitn(2, '\n').nth(1) {
            inner = after_first;
        }
        if let Some(end) = inner.rfind("```") {
            inner = &inner[..end];
        }
        return Some(inner.trim().to_string());
    }

    // Best-effort extraction: first '{' to last '}'.
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(trimmed[start..=end].trim().to_string())
}

/// Parses model output into a JSON object, tolerating fences and prose
/// around the object.
pub fn parse_object(text: &str) -> anyhow::Result<Value> {
    let json_str = extract_json(text).unwrap_or_else(|| text.trim().to_string());
    serde_json::from_str::<Value>(&json_str)
        .with_context(|| format!("LLM output is not valid JSON: {json_str}"))
}

/// Pulls an array out of an object under the first key that holds one.
/// Models are inconsistent about the wrapper key name.
pub fn array_under<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a Vec<Value>> {
    keys.iter().find_map(|k| value.get(k)?.as_array())
}

/// Flattens an array of strings, skipping non-string entries.
pub fn string_items(items: &[Value]) -> Vec<String> {
    items
        .iter()
        .filter_map(|v| v.as_str())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extract_json_handles_fenced_blocks() {
        let body = "{\"a\":1}";
        let fenced = format!("```json\n{body}\n```\n");
        assert_eq!(extract_json(&fenced), Some(body.to_string()));
    }

    #[test]
    fn extract_json_falls_back_to_braces() {
        let s = "prefix {\"a\":1} suffix";
        assert_eq!(extract_json(s), Some("{\"a\":1}".to_string()));
    }

    #[test]
    fn parse_object_rejects_prose() {
        assert!(parse_object("no json here").is_err());
    }

    #[test]
    fn array_under_tries_keys_in_order() {
        let v = json!({"selected_keywords": ["a", "b"]});
        let arr = array_under(&v, &["keywords", "selected_keywords"]).unwrap();
        assert_eq!(string_items(arr), vec!["a", "b"]);
    }

    #[test]
    fn string_items_skips_non_strings() {
        let v = json!(["a", 1, null, "b"]);
        assert_eq!(string_items(v.as_array().unwrap()), vec!["a", "b"]);
    }
}
