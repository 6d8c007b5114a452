//! Contact record, draft, and validation types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ContactId;

/// Fully materialized, persisted contact.
///
/// Field order is part of the export format: `id, name, email, phone`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    /// Store-assigned identifier.
    pub id: ContactId,
    /// Display name; not unique.
    pub name: String,
    /// Email address; unique across the store, compared exactly.
    pub email: String,
    /// Optional phone number, stored as given.
    pub phone: Option<String>,
}

/// Contact-shaped payload submitted by a caller.
///
/// `id == None` means "new"; `Some(id)` targets an existing record.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContactDraft {
    /// Target record for an update, if any.
    pub id: Option<ContactId>,
    /// Display name.
    pub name: String,
    /// Email address.
    pub email: String,
    /// Optional phone number.
    pub phone: Option<String>,
}

/// Rejection reasons for a draft that cannot be persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContactValidationError {
    /// Name is empty or whitespace only.
    #[error("contact name must not be empty")]
    EmptyName,
    /// Email is empty or whitespace only.
    #[error("contact email must not be empty")]
    EmptyEmail,
}

impl ContactDraft {
    /// Builds a new-record draft.
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            email: email.into(),
            phone: None,
        }
    }

    /// Sets the phone number.
    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    /// Targets an existing record id.
    pub fn with_id(mut self, id: ContactId) -> Self {
        self.id = Some(id);
        self
    }

    /// Checks the non-empty invariants on `name` and `email`.
    pub fn validate(&self) -> Result<(), ContactValidationError> {
        if self.name.trim().is_empty() {
            return Err(ContactValidationError::EmptyName);
        }
        if self.email.trim().is_empty() {
            return Err(ContactValidationError::EmptyEmail);
        }
        Ok(())
    }

    /// Materializes the draft under `id`, discarding any id it carried.
    pub fn into_contact(self, id: ContactId) -> Contact {
        Contact {
            id,
            name: self.name,
            email: self.email,
            phone: self.phone,
        }
    }
}

impl From<Contact> for ContactDraft {
    fn from(value: Contact) -> Self {
        Self {
            id: Some(value.id),
            name: value.name,
            email: value.email,
            phone: value.phone,
        }
    }
}
