use serde_json::{Map, Value};

use super::record::{AnalysisRecord, Wellbeing};
use super::repair::repair_json_object_where;

const WELLBEING_KEYS: &[&str] = &["turtle_well_being", "wellbeing", "well_being"];
const NOTES_KEYS: &[&str] = &["additional_notes", "notes"];
const INDICATOR_KEYS: &[&str] = &[
    "carapace_up",
    "plastron_visible",
    "entrapment",
    "unusual_inactivity",
    "aggressive_interactions",
    "eggs_present",
];

/// Turns raw model text into an [`AnalysisRecord`].
///
/// Never fails: unrecoverable text yields the default (`unknown`) record.
pub fn normalize(raw_text: &str) -> AnalysisRecord {
    match repair_json_object_where(raw_text, has_known_key) {
        Some(object) => record_from_object(&object),
        None => AnalysisRecord::default(),
    }
}

pub fn record_from_object(object: &Map<String, Value>) -> AnalysisRecord {
    AnalysisRecord {
        wellbeing: first_present(object, WELLBEING_KEYS)
            .and_then(Value::as_str)
            .map(Wellbeing::parse)
            .unwrap_or_default(),
        carapace_up: flag(object, "carapace_up"),
        plastron_visible: flag(object, "plastron_visible"),
        entrapment: flag(object, "entrapment"),
        unusual_inactivity: flag(object, "unusual_inactivity"),
        aggressive_interactions: flag(object, "aggressive_interactions"),
        eggs_present: flag(object, "eggs_present"),
        notes: first_present(object, NOTES_KEYS)
            .map(value_as_text)
            .unwrap_or_default(),
    }
}

fn has_known_key(object: &Map<String, Value>) -> bool {
    WELLBEING_KEYS
        .iter()
        .chain(NOTES_KEYS)
        .chain(INDICATOR_KEYS)
        .any(|key| object.contains_key(*key))
}

fn first_present<'a>(object: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| object.get(*key))
        .find(|value| !value.is_null())
}

fn flag(object: &Map<String, Value>, key: &str) -> bool {
    object.get(key).and_then(value_as_bool).unwrap_or(false)
}

fn value_as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(raw) => Some(*raw),
        Value::Number(raw) => raw.as_i64().map(|value| value != 0),
        Value::String(raw) => {
            let lowered = raw.trim().to_ascii_lowercase();
            if matches!(lowered.as_str(), "1" | "true" | "yes" | "y") {
                Some(true)
            } else if matches!(lowered.as_str(), "0" | "false" | "no" | "n") {
                Some(false)
            } else {
                None
            }
        }
        _ => None,
    }
}

fn value_as_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Array(items) => items
            .iter()
            .map(value_as_text)
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty())
            .collect::<Vec<String>>()
            .join("; "),
        other => other.to_string(),
    }
}
