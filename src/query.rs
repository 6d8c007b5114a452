//! Read-only listing and name search over a [`ContactStore`].

use crate::{contact::Contact, core::store::ContactStore, types::ContactId};

/// Outcome of a name search.
///
/// `All` and `NoMatches` are kept apart so a caller can tell "no query given"
/// from "the query matched nothing".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameSearch {
    /// The query was empty; every record is returned.
    All(Vec<Contact>),
    /// Records whose name contains the query, in insertion order.
    Matches(Vec<Contact>),
    /// A non-empty query matched no record.
    NoMatches,
}

impl NameSearch {
    /// Records carried by this outcome; empty for `NoMatches`.
    pub fn contacts(&self) -> &[Contact] {
        match self {
            Self::All(contacts) | Self::Matches(contacts) => contacts.as_slice(),
            Self::NoMatches => &[],
        }
    }

    /// Consumes the outcome, yielding its records.
    pub fn into_contacts(self) -> Vec<Contact> {
        match self {
            Self::All(contacts) | Self::Matches(contacts) => contacts,
            Self::NoMatches => Vec::new(),
        }
    }

    /// True for [`NameSearch::NoMatches`].
    pub fn is_no_matches(&self) -> bool {
        matches!(self, Self::NoMatches)
    }
}

/// Every record, unfiltered.
pub fn list_all(store: &ContactStore) -> Vec<Contact> {
    store.list_all_cloned()
}

/// Case-insensitive substring search over the name index.
///
/// Both sides are folded with [`str::to_lowercase`]; no locale rules apply.
pub fn search_by_name(store: &ContactStore, query: &str) -> NameSearch {
    if query.is_empty() {
        return NameSearch::All(list_all(store));
    }

    let needle = query.to_lowercase();
    let mut ids: Vec<ContactId> = store
        .name_entries()
        .filter(|(name, _)| name.to_lowercase().contains(&needle))
        .flat_map(|(_, ids)| ids.iter().copied())
        .collect();

    if ids.is_empty() {
        return NameSearch::NoMatches;
    }

    ids.sort_unstable();
    NameSearch::Matches(ids.into_iter().filter_map(|id| store.get_cloned(id)).collect())
}
