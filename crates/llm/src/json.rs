//! Lenient JSON extraction from model output.

use serde_json::Value;

/// Find and parse the first JSON object embedded in free-form text.
/// Models wrap JSON in prose and code fences often enough that a plain
/// `from_str` is not good enough.
pub fn first_json_object(raw: &str) -> Option<Value> {
    let start = raw.find('{')?;
    let bytes = raw.as_bytes();

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    let candidate = &raw[start..=start + offset];
                    return serde_json::from_str(candidate).ok();
                }
            },
            _ => {},
        }
    }

    None
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_object_parses() {
        let value = first_json_object(r#"{"a": 1}"#).unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn object_inside_prose_and_fences() {
        let raw = "Sure! Here you go:\n```json\n{\"action\": {\"type\": \"click\"}}\n```\nDone.";
        let value = first_json_object(raw).unwrap();
        assert_eq!(value["action"]["type"], "click");
    }

    #[test]
    fn braces_inside_strings_do_not_confuse_the_scanner() {
        let raw = r#"{"text": "a } inside", "n": 2}"#;
        let value = first_json_object(raw).unwrap();
        assert_eq!(value["n"], 2);
    }

    #[test]
    fn nested_objects_are_kept_whole() {
        let raw = r#"prefix {"a": {"b": {"c": 3}}} suffix {"other": 1}"#;
        let value = first_json_object(raw).unwrap();
        assert_eq!(value["a"]["b"]["c"], 3);
    }

    #[test]
    fn no_object_yields_none() {
        assert!(first_json_object("no json here").is_none());
        assert!(first_json_object("{truncated").is_none());
    }
}
