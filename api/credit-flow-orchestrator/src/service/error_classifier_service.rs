//! Classification of partner failures by text pattern.
//!
//! The partner does not publish stable error codes for these conditions, so
//! detection relies on substrings of its (mostly Portuguese) messages. Keep all
//! such matching here; when the partner rewords a message, this is the only
//! place that needs to follow.

use crate::errors::PartnerFailure;
use serde_json::Value;

const PHONE_TOKENS: &[&str] = &["telefone", "phone"];
const ALREADY_TOKENS: &[&str] = &["já", "already"];
const VALID_TOKENS: &[&str] = &["valid", "válid"];
const DOCUMENT_TOKENS: &[&str] = &["document", "term"];

/// Picks the most specific human-readable message out of a partner error body.
/// Order: `errors[]`, `messages[]`, `message`, raw string, `title: detail`,
/// `detail`, `developerMessage`, then the first 200 chars of the serialized body.
pub fn extract_partner_message(body: &Value) -> String {
    if let Some(joined) = join_string_array(body.get("errors")) {
        return joined;
    }
    if let Some(joined) = join_string_array(body.get("messages")) {
        return joined;
    }
    if let Some(message) = non_empty_str(body.get("message")) {
        return message.to_string();
    }
    if let Value::String(raw) = body {
        return raw.clone();
    }
    if let Some(title) = non_empty_str(body.get("title")) {
        return match non_empty_str(body.get("detail")) {
            Some(detail) => format!("{title}: {detail}"),
            None => title.to_string(),
        };
    }
    if let Some(detail) = non_empty_str(body.get("detail")) {
        return detail.to_string();
    }
    if let Some(dev) = non_empty_str(body.get("developerMessage")) {
        return dev.to_string();
    }
    let serialized = body.to_string();
    if serialized.chars().count() > 200 {
        let cut: String = serialized.chars().take(200).collect();
        format!("{cut}...")
    } else {
        serialized
    }
}

/// "Phone already used" rejection from consent generation. Looks at the message,
/// each entry of `errors[]` and the whole serialized body.
pub fn is_phone_already_registered(failure: &PartnerFailure) -> bool {
    if mentions_both(&failure.message, PHONE_TOKENS, ALREADY_TOKENS) {
        return true;
    }
    let Some(body) = &failure.body else {
        return false;
    };
    if let Some(errors) = body.get("errors").and_then(Value::as_array) {
        let hit = errors
            .iter()
            .map(value_text)
            .any(|text| mentions_both(&text, PHONE_TOKENS, ALREADY_TOKENS));
        if hit {
            return true;
        }
    }
    mentions_both(&body.to_string(), PHONE_TOKENS, ALREADY_TOKENS)
}

/// "Document must be valid/signed" rejection from the employment-link query.
/// Matched on the partner's `message`, `detail` or `title`, falling back to the
/// extracted message.
pub fn is_document_not_signed(failure: &PartnerFailure) -> bool {
    let text = failure
        .body
        .as_ref()
        .and_then(|body| {
            ["message", "detail", "title"]
                .iter()
                .find_map(|key| non_empty_str(body.get(*key)))
                .map(ToOwned::to_owned)
        })
        .unwrap_or_else(|| failure.message.clone());
    mentions_both(&text, VALID_TOKENS, DOCUMENT_TOKENS)
}

fn mentions_both(text: &str, left: &[&str], right: &[&str]) -> bool {
    let lower = text.to_lowercase();
    left.iter().any(|t| lower.contains(t)) && right.iter().any(|t| lower.contains(t))
}

fn join_string_array(value: Option<&Value>) -> Option<String> {
    let items = value?.as_array()?;
    if items.is_empty() {
        return None;
    }
    Some(items.iter().map(value_text).collect::<Vec<_>>().join("; "))
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
