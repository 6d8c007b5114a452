//! Batch merge of imported candidates, deduplicated on email.
//!
//! The merge runs in three passes over one `&mut ContactStore`:
//! 1. collect: drop candidates without a name or email and collapse
//!    candidates sharing an email (the last one wins, at the slot of the
//!    first);
//! 2. resolve: match each remaining email against the store's email index;
//!    a hit becomes an update of that record, a miss becomes an insert;
//! 3. apply: hand the whole plan to [`ContactStore::upsert_batch`], which
//!    writes all of it or none of it.

use hashbrown::HashMap;
use log::{debug, info, warn};
use thiserror::Error;

use crate::{
    codec::ImportCandidate,
    contact::ContactDraft,
    core::store::{ContactStore, StoreError},
    op::StoredOp,
};

/// Counts reported after a successful import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImportSummary {
    /// Candidates inserted as new records.
    pub added: usize,
    /// Candidates written over an existing record with the same email.
    pub updated: usize,
    /// Candidates dropped for a missing name or email.
    pub skipped: usize,
    /// Candidates superseded by a later one with the same email.
    pub collapsed: usize,
}

/// A candidate whose write was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportFailure {
    /// Position of the candidate in the input batch.
    pub index: usize,
    /// Candidate email.
    pub email: String,
    /// Why the store refused it.
    pub reason: StoreError,
}

/// Import failures. The store is left untouched whenever one is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImportError {
    /// At least one planned write was refused, so nothing was written.
    #[error("import rejected: {} record(s) failed", failures.len())]
    Rejected {
        /// Every refused candidate.
        failures: Vec<ImportFailure>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteKind {
    Add,
    Update,
}

#[derive(Debug)]
struct PlannedWrite {
    source_index: usize,
    draft: ContactDraft,
    kind: WriteKind,
}

/// Merges `candidates` into `store`.
///
/// Returns the summary together with the journal ops produced, in write
/// order.
pub fn reconcile(
    store: &mut ContactStore,
    candidates: Vec<ImportCandidate>,
) -> Result<(ImportSummary, Vec<StoredOp>), ImportError> {
    let mut summary = ImportSummary::default();
    let mut writes = collect(candidates, &mut summary);
    resolve(store, &mut writes);

    let drafts = writes.iter().map(|w| w.draft.clone()).collect();
    let ops = store.upsert_batch(drafts).map_err(|failures| {
        let failures: Vec<ImportFailure> = failures
            .into_iter()
            .map(|(pos, reason)| ImportFailure {
                index: writes[pos].source_index,
                email: writes[pos].draft.email.clone(),
                reason,
            })
            .collect();
        warn!(
            "event=import module=reconcile status=rejected failures={} planned={}",
            failures.len(),
            writes.len()
        );
        ImportError::Rejected { failures }
    })?;

    for write in &writes {
        match write.kind {
            WriteKind::Add => summary.added += 1,
            WriteKind::Update => summary.updated += 1,
        }
    }

    info!(
        "event=import module=reconcile status=ok added={} updated={} skipped={} collapsed={}",
        summary.added, summary.updated, summary.skipped, summary.collapsed
    );
    Ok((summary, ops))
}

fn collect(candidates: Vec<ImportCandidate>, summary: &mut ImportSummary) -> Vec<PlannedWrite> {
    let mut writes: Vec<PlannedWrite> = Vec::with_capacity(candidates.len());
    let mut slot_by_email: HashMap<String, usize> = HashMap::new();

    for (index, candidate) in candidates.into_iter().enumerate() {
        let (Some(name), Some(email)) = (non_blank(candidate.name), non_blank(candidate.email))
        else {
            debug!("event=import_skip module=reconcile index={index} reason=missing_field");
            summary.skipped += 1;
            continue;
        };

        let draft = ContactDraft {
            id: None,
            name,
            email,
            phone: candidate.phone,
        };

        match slot_by_email.get(draft.email.as_str()) {
            Some(&slot) => {
                debug!(
                    "event=import_collapse module=reconcile index={index} superseded={}",
                    writes[slot].source_index
                );
                summary.collapsed += 1;
                writes[slot].source_index = index;
                writes[slot].draft = draft;
            }
            None => {
                slot_by_email.insert(draft.email.clone(), writes.len());
                writes.push(PlannedWrite {
                    source_index: index,
                    draft,
                    kind: WriteKind::Add,
                });
            }
        }
    }

    writes
}

fn resolve(store: &ContactStore, writes: &mut [PlannedWrite]) {
    for write in writes {
        match store.find_by_email(&write.draft.email) {
            Some(existing) => {
                write.draft.id = Some(existing.id);
                write.kind = WriteKind::Update;
            }
            None => {
                write.draft.id = None;
                write.kind = WriteKind::Add;
            }
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}
