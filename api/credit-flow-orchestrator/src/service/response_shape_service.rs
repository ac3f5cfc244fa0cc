//! The partner returns the same logical payload in several envelopes. Each
//! extractor below is an ordered list of attempts; the first structurally valid
//! match wins.

use crate::errors::FlowError;
use serde_json::Value;

pub const DOCUMENT_ID_KEYS: &[&str] = &["autorizacaoId", "id", "termoId", "termo_id"];
pub const LINK_ARRAY_KEYS: &[&str] = &["id", "data", "vinculos", "result", "results"];
pub const TABLE_ARRAY_KEYS: &[&str] = &["data", "tabelas", "result", "results"];
pub const MARGIN_AMOUNT_KEYS: &[&str] = &[
    "valorMargem",
    "valorMargemAvaliavel",
    "valorMargemDisponivel",
    "margemDisponivel",
];

/// First non-empty array: the value itself, then each key in order.
pub fn first_non_empty_array<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a Vec<Value>> {
    if let Some(items) = value.as_array() {
        return (!items.is_empty()).then_some(items);
    }
    keys.iter()
        .filter_map(|k| value.get(*k).and_then(Value::as_array))
        .find(|items| !items.is_empty())
}

/// First key holding a non-empty string or a number, rendered as a string.
pub fn first_string(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match value.get(*k)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

pub fn first_number(value: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|k| match value.get(*k)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', ".").parse::<f64>().ok(),
        _ => None,
    })
}

pub fn extract_document_id(body: &Value) -> Option<String> {
    first_string(body, DOCUMENT_ID_KEYS)
}

pub fn extract_links(body: &Value) -> Vec<Value> {
    first_non_empty_array(body, LINK_ARRAY_KEYS)
        .cloned()
        .unwrap_or_default()
}

/// Margin comes back either as a list (first entry is used) or as an object.
pub fn extract_margin(body: &Value) -> Result<Value, FlowError> {
    match body {
        Value::Null => Err(FlowError::EmptyResponse("margin query")),
        Value::Array(items) => items
            .first()
            .cloned()
            .ok_or(FlowError::EmptyResponse("margin query")),
        Value::Object(_) => Ok(body.clone()),
        _ => Err(FlowError::InvalidInput(
            "margin response in unexpected format".to_string(),
        )),
    }
}

pub fn first_table_id(tables: &Value) -> Option<Value> {
    first_non_empty_array(tables, TABLE_ARRAY_KEYS)?
        .first()?
        .get("id")
        .filter(|id| !id.is_null())
        .cloned()
}

pub fn table_count(tables: &Value) -> usize {
    first_non_empty_array(tables, TABLE_ARRAY_KEYS).map_or(0, Vec::len)
}
