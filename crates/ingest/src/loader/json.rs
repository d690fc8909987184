// JSON import: one object per line, or a single array of objects

use std::path::Path;

use serde_json::{Map, Value as JsonValue};

use crate::error::IngestError;
use crate::model::RecordSet;

use super::{load_error, read_text};

pub(super) fn read(path: &Path, lines: bool) -> Result<RecordSet, IngestError> {
    let content = read_text(path)?;
    let objects = if lines {
        parse_lines(&content).map_err(|e| load_error(path, e))?
    } else {
        parse_document(&content).map_err(|e| load_error(path, e))?
    };
    Ok(RecordSet::from_json_objects(&objects))
}

fn parse_lines(content: &str) -> Result<Vec<Map<String, JsonValue>>, String> {
    let mut objects = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<JsonValue>(line) {
            Ok(JsonValue::Object(map)) => objects.push(map),
            Ok(_) => return Err(format!("line {}: expected a JSON object", idx + 1)),
            Err(e) => return Err(format!("line {}: {e}", idx + 1)),
        }
    }
    Ok(objects)
}

fn parse_document(content: &str) -> Result<Vec<Map<String, JsonValue>>, String> {
    let doc: JsonValue = serde_json::from_str(content).map_err(|e| e.to_string())?;
    match doc {
        JsonValue::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(idx, item)| match item {
                JsonValue::Object(map) => Ok(map),
                _ => Err(format!("element {idx}: expected a JSON object")),
            })
            .collect(),
        JsonValue::Object(map) => Ok(vec![map]),
        _ => Err("expected an array of objects".to_string()),
    }
}
