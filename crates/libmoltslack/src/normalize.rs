//! Maps one line of provider output onto activity, chat and thought text.

use serde_json::{Map, Value};

use crate::provider::{Provider, ProviderFamily};

/// Maximum snippet length (in characters) appended to an activity line.
pub const SNIPPET_LIMIT: usize = 140;

const TEXT_KEYS: [&str; 5] = ["text", "content", "message", "result", "output"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedLine {
    pub activity: Option<String>,
    pub chat: Option<String>,
    pub thought: Option<String>,
}

/// Pull human-readable text out of an arbitrary JSON value.
pub fn extract_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(extract_text)
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Object(map) => TEXT_KEYS
            .iter()
            .filter_map(|key| map.get(*key))
            .map(extract_text)
            .find(|text| !text.is_empty())
            .unwrap_or_default(),
        Value::Null | Value::Bool(_) | Value::Number(_) => String::new(),
    }
}

fn field_text(map: &Map<String, Value>, key: &str) -> String {
    map.get(key).map(extract_text).unwrap_or_default()
}

fn first_text(map: &Map<String, Value>, keys: &[&str]) -> String {
    keys.iter()
        .map(|key| field_text(map, key))
        .find(|text| !text.is_empty())
        .unwrap_or_default()
}

fn snippet(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() > SNIPPET_LIMIT {
        let cut: String = collapsed.chars().take(SNIPPET_LIMIT).collect();
        format!("{cut}...")
    } else {
        collapsed
    }
}

fn non_empty_trimmed(text: String) -> Option<String> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Normalize a raw line. Total: never fails, whatever the input.
pub fn normalize_line(provider: Provider, raw: &str) -> NormalizedLine {
    let line = raw.trim();
    if line.is_empty() {
        return NormalizedLine::default();
    }

    let map = match serde_json::from_str::<Value>(line) {
        Ok(Value::Object(map)) => map,
        _ => {
            return NormalizedLine {
                activity: Some(line.to_string()),
                ..NormalizedLine::default()
            };
        }
    };

    let event_type = match map.get("type") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => "event".to_string(),
        Some(other) => other.to_string(),
    };

    let mut activity = format!("{provider}:{event_type}");
    let summary = first_text(&map, &["message", "item", "result"]);
    if !summary.is_empty() {
        activity = format!("{activity} | {}", snippet(&summary));
    }

    let (chat, thought) = match provider.family() {
        ProviderFamily::StreamJson => match event_type.as_str() {
            "assistant" => (String::new(), field_text(&map, "message")),
            "result" => (field_text(&map, "result"), String::new()),
            _ => (String::new(), String::new()),
        },
        ProviderFamily::ItemEvents => {
            if event_type.contains("error") {
                let detail = extract_text(&Value::Object(map.clone()));
                (format!("Error: {detail}"), String::new())
            } else {
                (first_text(&map, &["item", "message"]), String::new())
            }
        }
    };

    NormalizedLine {
        activity: Some(activity),
        chat: non_empty_trimmed(chat),
        thought: non_empty_trimmed(thought),
    }
}
