//! Human-readable classification of store outcomes for log lines.
//!
//! [`summarize`] is total over every outcome shape: it has no error path and never
//! panics, so it can be called from logging code without guarding. It exists purely
//! for observability and must not influence control flow.

use serde_json::{Map, Value};

/// The outcome of a store operation, as seen by the summarizer.
#[derive(Debug, Clone, Copy)]
pub enum Outcome<'a> {
    /// Materialized documents returned by a read.
    Documents(&'a [Value]),
    /// Any other wire value: a write acknowledgement, a list, or an opaque object.
    Value(&'a Value),
}

impl<'a> From<&'a [Value]> for Outcome<'a> {
    fn from(documents: &'a [Value]) -> Self {
        Outcome::Documents(documents)
    }
}

impl<'a> From<&'a Vec<Value>> for Outcome<'a> {
    fn from(documents: &'a Vec<Value>) -> Self {
        Outcome::Documents(documents.as_slice())
    }
}

impl<'a> From<&'a Value> for Outcome<'a> {
    fn from(value: &'a Value) -> Self {
        Outcome::Value(value)
    }
}

/// Produces a short description of an outcome, e.g. `found 2 items and updated 1 item`.
///
/// # Example
///
/// ```ignore
/// use labstore_core::summary::summarize;
/// use serde_json::json;
///
/// let ack = json!({ "ok": 1, "n": 2, "nModified": 1 });
/// assert_eq!(summarize((&ack).into()), "found 2 items and updated 1 item");
/// ```
pub fn summarize(outcome: Outcome<'_>) -> String {
    match outcome {
        Outcome::Documents(documents) => summarize_documents(documents),
        Outcome::Value(Value::Array(documents)) => summarize_documents(documents),
        Outcome::Value(Value::Object(map)) if map.contains_key("ok") => summarize_acknowledgement(map),
        Outcome::Value(other) => format!("returned object \"{other}\""),
    }
}

/// Renders a value as compact JSON, cut at `max_chars` characters.
pub fn preview(value: &Value, max_chars: usize) -> String {
    let rendered = value.to_string();

    match rendered.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}…", &rendered[..cut]),
        None => rendered,
    }
}

fn summarize_documents(documents: &[Value]) -> String {
    match documents {
        [] => "returned no data".to_string(),
        [single] => format!("returned an item with {} bytes", single.to_string().len()),
        many => format!("returned {} items", many.len()),
    }
}

fn summarize_acknowledgement(map: &Map<String, Value>) -> String {
    if !is_success(map.get("ok")) {
        return format!("failed to update item and returned \"{}\"", Value::Object(map.clone()));
    }

    let found = count(map.get("n"));
    let modified = count(map.get("nModified"));
    let mut clauses = Vec::with_capacity(3);

    if found > 0 {
        clauses.push(format!("found {found} {}", items(found)));
    }
    if modified > 0 {
        clauses.push(format!("updated {modified} {}", items(modified)));
    }
    if let Some(ids) = upserted_ids(map) {
        if !ids.is_empty() {
            clauses.push(format!("inserted {} {} ({})", ids.len(), items(ids.len() as u64), ids.join(", ")));
        }
    }

    match clauses.split_last() {
        None => "did not find any item".to_string(),
        Some((last, [])) => last.clone(),
        Some((last, rest)) => format!("{} and {last}", rest.join(", ")),
    }
}

fn is_success(ok: Option<&Value>) -> bool {
    match ok {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64() == Some(1.0),
        _ => false,
    }
}

fn count(value: Option<&Value>) -> u64 {
    value
        .and_then(Value::as_f64)
        .filter(|n| *n > 0.0)
        .map(|n| n as u64)
        .unwrap_or(0)
}

fn items(count: u64) -> &'static str {
    if count == 1 { "item" } else { "items" }
}

/// Upserted ids, from either an update acknowledgement (`upserted: [{_id}]`) or a
/// find-and-modify reply (`lastErrorObject.upserted`).
fn upserted_ids(map: &Map<String, Value>) -> Option<Vec<String>> {
    if let Some(Value::Array(upserted)) = map.get("upserted") {
        return Some(
            upserted
                .iter()
                .map(|item| render_id(item.get("_id").unwrap_or(item)))
                .collect(),
        );
    }

    map.get("lastErrorObject")
        .and_then(|last| last.get("upserted"))
        .filter(|id| !id.is_null())
        .map(|id| vec![render_id(id)])
}

fn render_id(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
