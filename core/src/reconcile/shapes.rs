//! Named shape matchers for upstream responses.
//!
//! Matchers are tried in order and the first one that recognizes the value
//! wins. Support for a new envelope is a new entry in [`MATCHERS`].

use serde_json::Value;

/// How many wrapper layers are peeled before giving up.
pub const MAX_UNWRAP_DEPTH: usize = 4;

const WRAPPER_FIELDS: [&str; 4] = ["body", "translation_result", "result", "data"];

/// One item as reported upstream, before alignment with the job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedEntry {
    pub index: Option<usize>,
    pub translated_text: Option<String>,
    pub status: Option<String>,
    pub error: Option<String>,
    pub detected_source_language: Option<String>,
}

impl ExtractedEntry {
    fn from_value(value: &Value) -> Self {
        match value {
            Value::String(text) => Self {
                translated_text: Some(text.clone()),
                ..Self::default()
            },
            Value::Object(_) => Self {
                index: value.get("index").and_then(Value::as_u64).map(|index| index as usize),
                translated_text: first_string(value, &["translated_text", "translatedText", "TranslatedText"]),
                status: first_string(value, &["status"]),
                error: first_string(value, &["error", "error_message"]),
                detected_source_language: first_string(
                    value,
                    &["detected_source_language", "SourceLanguageCode"],
                ),
            },
            _ => Self {
                status: Some("error".into()),
                error: Some("malformed entry".into()),
                ..Self::default()
            },
        }
    }
}

fn first_string(value: &Value, fields: &[&str]) -> Option<String> {
    fields
        .iter()
        .find_map(|field| value.get(*field).and_then(Value::as_str))
        .map(str::to_string)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeMatch {
    pub matcher: &'static str,
    pub entries: Vec<ExtractedEntry>,
}

pub struct ShapeMatcher {
    pub name: &'static str,
    /// `None` when the value does not have this shape.
    extract: fn(&Value, usize) -> Option<Vec<ExtractedEntry>>,
}

pub const MATCHERS: &[ShapeMatcher] = &[
    ShapeMatcher {
        name: "direct",
        extract: extract_direct,
    },
    ShapeMatcher {
        name: "wrapper",
        extract: extract_wrapped,
    },
    ShapeMatcher {
        name: "single_item",
        extract: extract_single_item,
    },
    ShapeMatcher {
        name: "raw_array",
        extract: extract_raw_array,
    },
];

/// Runs the matchers over `value`; the first that recognizes it wins.
pub fn interpret(value: &Value) -> Option<ShapeMatch> {
    interpret_at(value, 0)
}

fn interpret_at(value: &Value, depth: usize) -> Option<ShapeMatch> {
    MATCHERS.iter().find_map(|matcher| {
        (matcher.extract)(value, depth).map(|entries| ShapeMatch {
            matcher: matcher.name,
            entries,
        })
    })
}

fn extract_direct(value: &Value, _depth: usize) -> Option<Vec<ExtractedEntry>> {
    let translations = value.get("translations")?.as_array()?;
    Some(translations.iter().map(ExtractedEntry::from_value).collect())
}

fn extract_wrapped(value: &Value, depth: usize) -> Option<Vec<ExtractedEntry>> {
    if depth >= MAX_UNWRAP_DEPTH || !value.is_object() {
        return None;
    }
    WRAPPER_FIELDS.iter().find_map(|field| {
        let inner = match value.get(*field)? {
            Value::String(raw) => serde_json::from_str::<Value>(raw).ok()?,
            nested @ (Value::Object(_) | Value::Array(_)) => nested.clone(),
            _ => return None,
        };
        interpret_at(&inner, depth + 1).map(|found| found.entries)
    })
}

fn extract_single_item(value: &Value, _depth: usize) -> Option<Vec<ExtractedEntry>> {
    if !value.is_object() {
        return None;
    }
    let translated_text = first_string(value, &["TranslatedText", "translated_text"])?;
    Some(vec![ExtractedEntry {
        index: Some(0),
        translated_text: Some(translated_text),
        status: Some("success".into()),
        error: None,
        detected_source_language: first_string(value, &["SourceLanguageCode", "detected_source_language"]),
    }])
}

fn extract_raw_array(value: &Value, _depth: usize) -> Option<Vec<ExtractedEntry>> {
    let items = value.as_array()?;
    if !items.iter().all(|item| item.is_object() || item.is_string()) {
        return None;
    }
    Some(items.iter().map(ExtractedEntry::from_value).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn direct_body() -> Value {
        json!({
            "job_id": "j",
            "translations": [
                {"index": 0, "original_text": "Hello", "translated_text": "Hola", "status": "success", "error": null},
                {"index": 1, "original_text": "Bye", "translated_text": null, "status": "error", "error": "throttled"}
            ]
        })
    }

    #[test]
    fn direct_structure() {
        let found = interpret(&direct_body()).unwrap();
        assert_eq!(found.matcher, "direct");
        assert_eq!(found.entries.len(), 2);
        assert_eq!(found.entries[0].translated_text.as_deref(), Some("Hola"));
        assert_eq!(found.entries[1].error.as_deref(), Some("throttled"));
    }

    #[test]
    fn gateway_body_string_is_unwrapped() {
        let envelope = json!({"statusCode": 200, "body": direct_body().to_string()});
        let found = interpret(&envelope).unwrap();
        assert_eq!(found.matcher, "wrapper");
        assert_eq!(found.entries.len(), 2);
    }

    #[test]
    fn nested_wrappers_up_to_the_depth_limit() {
        let stored = json!({"original_request": {}, "translation_result": direct_body(), "metadata": {}});
        assert_eq!(interpret(&stored).unwrap().entries.len(), 2);

        let mut deep = direct_body();
        for _ in 0..MAX_UNWRAP_DEPTH + 1 {
            deep = json!({ "data": deep });
        }
        assert!(interpret(&deep).is_none());
    }

    #[test]
    fn single_item_backend_shape() {
        let found = interpret(&json!({"TranslatedText": "Hola", "SourceLanguageCode": "en"})).unwrap();
        assert_eq!(found.matcher, "single_item");
        assert_eq!(found.entries[0].index, Some(0));
        assert_eq!(found.entries[0].detected_source_language.as_deref(), Some("en"));
    }

    #[test]
    fn raw_arrays_of_strings_or_objects() {
        let found = interpret(&json!(["Hola", {"translated_text": "Adiós", "index": 1}])).unwrap();
        assert_eq!(found.matcher, "raw_array");
        assert_eq!(found.entries[0].translated_text.as_deref(), Some("Hola"));
        assert_eq!(found.entries[1].index, Some(1));
        assert!(interpret(&json!([1, 2])).is_none());
    }

    #[test]
    fn unrecognized_shapes() {
        assert!(interpret(&json!({"statusCode": 400, "body": "{\"error\":true,\"message\":\"bad\"}"})).is_none());
        assert!(interpret(&json!({"body": "not json"})).is_none());
        assert!(interpret(&Value::Null).is_none());
    }
}
