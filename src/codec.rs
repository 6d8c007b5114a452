//! Portable JSON snapshot of the contact set.
//!
//! Export writes a pretty-printed array (2-space indent) of objects with the
//! fields `id, name, email, phone` in that order. Import accepts any JSON
//! array of objects; it never touches a store and hands its candidates to
//! [`crate::reconcile`].

use serde_json::Value;
use thiserror::Error;
use time::Date;

use crate::{contact::Contact, types::ContactId};

/// Snapshot encode/decode failures.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Import text is not JSON, or not an array of objects.
    #[error("malformed import: {0}")]
    Malformed(String),
    /// Export serialization failed.
    #[error("snapshot encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// One contact-like element parsed from import text.
///
/// Fields of the wrong JSON type are treated as absent.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ImportCandidate {
    /// Id carried by the source; never trusted for placement.
    pub id: Option<ContactId>,
    /// Name, if present as a string.
    pub name: Option<String>,
    /// Email, if present as a string.
    pub email: Option<String>,
    /// Phone, if present as a string.
    pub phone: Option<String>,
}

impl ImportCandidate {
    /// Candidate with a name and email and nothing else.
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            email: Some(email.into()),
            ..Self::default()
        }
    }
}

impl From<Contact> for ImportCandidate {
    fn from(value: Contact) -> Self {
        Self {
            id: Some(value.id),
            name: Some(value.name),
            email: Some(value.email),
            phone: value.phone,
        }
    }
}

/// Export payload ready for a download collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedSnapshot {
    /// Suggested file name, `contacts-<YYYY-MM-DD>.json`.
    pub file_name: String,
    /// Pretty-printed JSON body.
    pub json: String,
    /// Number of exported records.
    pub count: usize,
}

/// Serializes `contacts` as a pretty-printed JSON array.
pub fn export_json(contacts: &[Contact]) -> Result<String, CodecError> {
    Ok(serde_json::to_string_pretty(contacts)?)
}

/// File name convention for an export taken on `date`.
pub fn export_file_name(date: Date) -> String {
    format!("contacts-{date}.json")
}

/// Builds the full export payload for `contacts` dated `date`.
pub fn export_snapshot(contacts: &[Contact], date: Date) -> Result<ExportedSnapshot, CodecError> {
    Ok(ExportedSnapshot {
        file_name: export_file_name(date),
        json: export_json(contacts)?,
        count: contacts.len(),
    })
}

/// Parses import text into candidates.
///
/// The whole text is rejected if it is not a JSON array or if any element is
/// not an object.
pub fn parse_import(text: &str) -> Result<Vec<ImportCandidate>, CodecError> {
    let value: Value =
        serde_json::from_str(text).map_err(|err| CodecError::Malformed(err.to_string()))?;
    let items = match value {
        Value::Array(items) => items,
        other => {
            return Err(CodecError::Malformed(format!(
                "expected a JSON array, found {}",
                json_kind(&other)
            )));
        }
    };

    items
        .into_iter()
        .enumerate()
        .map(|(idx, item)| match item {
            Value::Object(mut obj) => Ok(ImportCandidate {
                id: obj.get("id").and_then(Value::as_u64),
                name: take_string(&mut obj, "name"),
                email: take_string(&mut obj, "email"),
                phone: take_string(&mut obj, "phone"),
            }),
            other => Err(CodecError::Malformed(format!(
                "element {idx} is {}, expected an object",
                json_kind(&other)
            ))),
        })
        .collect()
}

fn take_string(obj: &mut serde_json::Map<String, Value>, key: &str) -> Option<String> {
    match obj.remove(key) {
        Some(Value::String(s)) => Some(s),
        _ => None,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
