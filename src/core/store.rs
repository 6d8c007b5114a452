//! Authoritative contact table with a non-unique name index and a unique
//! email index.
//!
//! Every mutating call validates completely before touching any field, so a
//! rejected write leaves records, indexes, the id allocator and the pending op
//! buffer exactly as they were.

use std::time::{SystemTime, UNIX_EPOCH};

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    contact::{Contact, ContactDraft, ContactValidationError},
    op::{Op, StoredOp},
    types::{ContactId, OpSeq},
};

use super::indices::{UniqueIndex, VecIndex, vec_index_insert, vec_index_remove};

/// Write rejections raised by [`ContactStore`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The email already belongs to a different record.
    #[error("email `{email}` is already taken by contact {held_by}")]
    ConstraintViolation {
        /// Colliding email.
        email: String,
        /// Id of the record that owns the email.
        held_by: ContactId,
    },
    /// Two writes in the same batch claim the same email.
    #[error("email `{email}` is claimed twice in one batch (first at position {first_index})")]
    BatchConflict {
        /// Colliding email.
        email: String,
        /// Batch position of the first claimant.
        first_index: usize,
    },
    /// No record exists at this id.
    #[error("contact not found: {0}")]
    NotFound(ContactId),
    /// A checkpoint lists the same id twice.
    #[error("contact {0} appears twice in checkpoint")]
    DuplicateId(ContactId),
    /// The draft breaks a field invariant.
    #[error(transparent)]
    Invalid(#[from] ContactValidationError),
}

/// Serializable checkpoint of the full store state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSnapshotV1 {
    /// Next id the allocator will hand out.
    pub next_contact_id: ContactId,
    /// Next op sequence number.
    pub next_op_seq: OpSeq,
    /// Records in insertion order.
    pub records: Vec<Contact>,
}

/// In-memory contact table plus its secondary indexes.
#[derive(Debug, Default)]
pub struct ContactStore {
    records: HashMap<ContactId, Contact>,
    // Ids are allocated monotonically, so insertion order is ascending order.
    order: Vec<ContactId>,
    by_name: VecIndex<String>,
    by_email: UniqueIndex<String>,
    pending_ops: Vec<StoredOp>,
    next_op_seq: OpSeq,
    next_contact_id: ContactId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Holder {
    Stored(ContactId),
    Batch(usize),
}

impl ContactStore {
    /// Creates an empty store whose first id is 1.
    pub fn new() -> Self {
        Self {
            next_op_seq: 1,
            next_contact_id: 1,
            ..Self::default()
        }
    }

    /// Rebuilds a store and its indexes from a checkpoint.
    ///
    /// Fails if the checkpoint holds two records with the same id or email.
    pub fn from_snapshot(snapshot: StoreSnapshotV1) -> Result<Self, StoreError> {
        let mut store = Self {
            next_contact_id: snapshot.next_contact_id.max(1),
            next_op_seq: snapshot.next_op_seq.max(1),
            ..Self::default()
        };

        for rec in snapshot.records {
            if store.records.contains_key(&rec.id) {
                return Err(StoreError::DuplicateId(rec.id));
            }
            if let Some(&held_by) = store.by_email.get(rec.email.as_str()) {
                return Err(StoreError::ConstraintViolation {
                    email: rec.email,
                    held_by,
                });
            }
            store.next_contact_id = store.next_contact_id.max(rec.id.saturating_add(1));
            store.insert_indices(&rec);
            store.insert_order(rec.id);
            store.records.insert(rec.id, rec);
        }

        Ok(store)
    }

    /// Captures the current state as a checkpoint.
    pub fn export_snapshot(&self) -> StoreSnapshotV1 {
        StoreSnapshotV1 {
            next_contact_id: self.next_contact_id,
            next_op_seq: self.next_op_seq,
            records: self.list_all_cloned(),
        }
    }

    /// Adds a new record, ignoring any id the draft carries.
    pub fn insert(&mut self, mut draft: ContactDraft) -> Result<(ContactId, StoredOp), StoreError> {
        draft.id = None;
        self.upsert(draft)
    }

    /// Replaces the record at `draft.id` wholesale, or inserts under a fresh
    /// id when the draft has none.
    pub fn upsert(&mut self, draft: ContactDraft) -> Result<(ContactId, StoredOp), StoreError> {
        self.check_write(&draft)?;
        let stored = self.write_unchecked(draft);
        let id = stored.op.contact_id();
        self.pending_ops.push(stored.clone());
        Ok((id, stored))
    }

    /// Applies several writes as one unit.
    ///
    /// The whole batch is validated against the current state plus the
    /// effects of earlier batch entries before anything is written. On
    /// rejection every failing position is reported and nothing changes.
    pub fn upsert_batch(
        &mut self,
        drafts: Vec<ContactDraft>,
    ) -> Result<Vec<StoredOp>, Vec<(usize, StoreError)>> {
        let failures = self.check_batch(&drafts);
        if !failures.is_empty() {
            return Err(failures);
        }

        let mut out = Vec::with_capacity(drafts.len());
        for draft in drafts {
            let stored = self.write_unchecked(draft);
            self.pending_ops.push(stored.clone());
            out.push(stored);
        }
        Ok(out)
    }

    /// Removes the record at `id`.
    ///
    /// Returns `None` without recording an op when no such record exists.
    pub fn delete(&mut self, id: ContactId) -> Option<StoredOp> {
        let seq = self.take_next_op_seq();
        match self.apply_delete_with_seq(id, seq) {
            Some(stored) => {
                self.pending_ops.push(stored.clone());
                Some(stored)
            }
            None => {
                self.next_op_seq = seq;
                None
            }
        }
    }

    /// Re-applies a journaled op during recovery.
    pub fn apply_replayed_op(&mut self, stored: StoredOp) -> Result<(), StoreError> {
        let seq = stored.seq;
        match stored.op {
            Op::Put { contact, .. } => {
                if let Some(&held_by) = self.by_email.get(contact.email.as_str()) {
                    if held_by != contact.id {
                        return Err(StoreError::ConstraintViolation {
                            email: contact.email,
                            held_by,
                        });
                    }
                }
                self.apply_put_with_seq(contact, seq);
            }
            Op::Delete { id } => {
                self.next_contact_id = self.next_contact_id.max(id.saturating_add(1));
                self.apply_delete_with_seq(id, seq);
            }
        }
        self.bump_next_seq_from(seq);
        Ok(())
    }

    /// Looks up a record by id.
    pub fn get(&self, id: ContactId) -> Option<&Contact> {
        self.records.get(&id)
    }

    /// Owned variant of [`ContactStore::get`].
    pub fn get_cloned(&self, id: ContactId) -> Option<Contact> {
        self.get(id).cloned()
    }

    /// Looks up a record by id, treating absence as an error.
    pub fn require(&self, id: ContactId) -> Result<&Contact, StoreError> {
        self.get(id).ok_or(StoreError::NotFound(id))
    }

    /// Exact email lookup through the unique index.
    pub fn find_by_email(&self, email: &str) -> Option<&Contact> {
        self.by_email
            .get(email)
            .and_then(|id| self.records.get(id))
    }

    /// All records in insertion order.
    pub fn list_all(&self) -> Vec<&Contact> {
        self.order
            .iter()
            .filter_map(|id| self.records.get(id))
            .collect()
    }

    /// Owned variant of [`ContactStore::list_all`].
    pub fn list_all_cloned(&self) -> Vec<Contact> {
        self.list_all().into_iter().cloned().collect()
    }

    /// Distinct names with the ids holding each, in no particular order.
    pub fn name_entries(&self) -> impl Iterator<Item = (&str, &[ContactId])> {
        self.by_name
            .iter()
            .map(|(name, ids)| (name.as_str(), ids.as_slice()))
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when no records are stored.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Record ids in insertion order.
    pub fn ordered_ids(&self) -> &[ContactId] {
        &self.order
    }

    /// Id the next insert will receive.
    pub fn next_contact_id(&self) -> ContactId {
        self.next_contact_id
    }

    /// Takes ops recorded since the last drain.
    pub fn drain_pending_ops(&mut self) -> Vec<StoredOp> {
        std::mem::take(&mut self.pending_ops)
    }

    /// Highest op sequence handed out so far.
    pub fn latest_op_seq(&self) -> OpSeq {
        self.next_op_seq.saturating_sub(1)
    }

    /// Checks whether `draft` could be written right now.
    pub fn check_write(&self, draft: &ContactDraft) -> Result<(), StoreError> {
        draft.validate()?;
        if let Some(id) = draft.id {
            if !self.records.contains_key(&id) {
                return Err(StoreError::NotFound(id));
            }
        }
        match self.by_email.get(draft.email.as_str()) {
            Some(&held_by) if Some(held_by) != draft.id => Err(StoreError::ConstraintViolation {
                email: draft.email.clone(),
                held_by,
            }),
            _ => Ok(()),
        }
    }

    fn check_batch(&self, drafts: &[ContactDraft]) -> Vec<(usize, StoreError)> {
        // Email ownership as it would look after each accepted batch entry.
        let mut claims: HashMap<&str, Option<Holder>> = HashMap::new();
        let mut current_email: HashMap<ContactId, &str> = HashMap::new();
        let mut failures = Vec::new();

        for (idx, draft) in drafts.iter().enumerate() {
            if let Err(err) = draft.validate() {
                failures.push((idx, err.into()));
                continue;
            }
            let target = match draft.id {
                Some(id) => match self.records.get(&id) {
                    Some(rec) => Some((id, rec)),
                    None => {
                        failures.push((idx, StoreError::NotFound(id)));
                        continue;
                    }
                },
                None => None,
            };

            let email = draft.email.as_str();
            let holder = match claims.get(email) {
                Some(claim) => *claim,
                None => self.by_email.get(email).map(|&id| Holder::Stored(id)),
            };
            let own = target.map(|(id, _)| Holder::Stored(id));
            match holder {
                Some(h) if Some(h) != own => {
                    let err = match h {
                        Holder::Stored(held_by) => StoreError::ConstraintViolation {
                            email: draft.email.clone(),
                            held_by,
                        },
                        Holder::Batch(first_index) => StoreError::BatchConflict {
                            email: draft.email.clone(),
                            first_index,
                        },
                    };
                    failures.push((idx, err));
                    continue;
                }
                _ => {}
            }

            match target {
                Some((id, rec)) => {
                    let old = current_email.get(&id).copied().unwrap_or(rec.email.as_str());
                    if old != email {
                        claims.insert(old, None);
                    }
                    current_email.insert(id, email);
                    claims.insert(email, Some(Holder::Stored(id)));
                }
                None => {
                    claims.insert(email, Some(Holder::Batch(idx)));
                }
            }
        }

        failures
    }

    fn write_unchecked(&mut self, draft: ContactDraft) -> StoredOp {
        let (id, created) = match draft.id {
            Some(id) => (id, false),
            None => {
                let id = self.next_contact_id;
                self.next_contact_id += 1;
                (id, true)
            }
        };
        let seq = self.take_next_op_seq();
        let contact = draft.into_contact(id);
        self.apply_put_with_seq(contact.clone(), seq);
        StoredOp {
            seq,
            ts_ms: now_ms(),
            op: Op::Put { contact, created },
        }
    }

    fn apply_put_with_seq(&mut self, contact: Contact, seq: OpSeq) {
        let id = contact.id;
        self.next_contact_id = self.next_contact_id.max(id.saturating_add(1));

        match self.records.get(&id) {
            Some(old) => {
                let (old_name, old_email) = (old.name.clone(), old.email.clone());
                if old_name != contact.name {
                    vec_index_remove(&mut self.by_name, &old_name, id);
                    vec_index_insert(&mut self.by_name, &contact.name, id);
                }
                if old_email != contact.email {
                    self.by_email.remove(old_email.as_str());
                    self.by_email.insert(contact.email.clone(), id);
                }
            }
            None => {
                self.insert_indices(&contact);
                self.insert_order(id);
            }
        }

        self.records.insert(id, contact);
        self.bump_next_seq_from(seq);
    }

    fn apply_delete_with_seq(&mut self, id: ContactId, seq: OpSeq) -> Option<StoredOp> {
        let rec = self.records.remove(&id)?;
        vec_index_remove(&mut self.by_name, &rec.name, id);
        self.by_email.remove(rec.email.as_str());
        if let Ok(pos) = self.order.binary_search(&id) {
            self.order.remove(pos);
        }

        self.bump_next_seq_from(seq);
        Some(StoredOp {
            seq,
            ts_ms: now_ms(),
            op: Op::Delete { id },
        })
    }

    fn insert_indices(&mut self, rec: &Contact) {
        vec_index_insert(&mut self.by_name, &rec.name, rec.id);
        self.by_email.insert(rec.email.clone(), rec.id);
    }

    fn insert_order(&mut self, id: ContactId) {
        if let Err(pos) = self.order.binary_search(&id) {
            self.order.insert(pos, id);
        }
    }

    fn take_next_op_seq(&mut self) -> OpSeq {
        let seq = self.next_op_seq;
        self.next_op_seq += 1;
        seq
    }

    fn bump_next_seq_from(&mut self, seq: OpSeq) {
        self.next_op_seq = self.next_op_seq.max(seq.saturating_add(1));
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_upsert_leaves_allocator_and_ops_untouched() {
        let mut store = ContactStore::new();
        store.insert(ContactDraft::new("Ana", "ana@x.com")).unwrap();
        let before_next = store.next_contact_id();
        let before_seq = store.latest_op_seq();

        let err = store.insert(ContactDraft::new("Bo", "ana@x.com")).unwrap_err();
        assert_eq!(
            err,
            StoreError::ConstraintViolation {
                email: "ana@x.com".to_string(),
                held_by: 1,
            }
        );
        assert_eq!(store.next_contact_id(), before_next);
        assert_eq!(store.latest_op_seq(), before_seq);
        assert_eq!(store.drain_pending_ops().len(), 1);
    }

    #[test]
    fn batch_allows_email_swap_through_release() {
        let mut store = ContactStore::new();
        let (a, _) = store.insert(ContactDraft::new("A", "a@x.com")).unwrap();
        let (_b, _) = store.insert(ContactDraft::new("B", "b@x.com")).unwrap();

        // a moves to c@, then a new record takes the released a@.
        let ops = store
            .upsert_batch(vec![
                ContactDraft::new("A", "c@x.com").with_id(a),
                ContactDraft::new("N", "a@x.com"),
            ])
            .unwrap();
        assert_eq!(ops.len(), 2);
        assert_eq!(store.find_by_email("c@x.com").map(|c| c.id), Some(a));
        assert_eq!(store.find_by_email("a@x.com").map(|c| c.id), Some(3));
    }

    #[test]
    fn batch_reports_every_failing_position() {
        let mut store = ContactStore::new();
        store.insert(ContactDraft::new("A", "a@x.com")).unwrap();

        let failures = store
            .upsert_batch(vec![
                ContactDraft::new("N", "n@x.com"),
                ContactDraft::new("Dup", "a@x.com"),
                ContactDraft::new("N2", "n@x.com"),
                ContactDraft::new("Ghost", "g@x.com").with_id(42),
            ])
            .unwrap_err();

        let positions: Vec<usize> = failures.iter().map(|(idx, _)| *idx).collect();
        assert_eq!(positions, vec![1, 2, 3]);
        assert!(matches!(
            failures[1].1,
            StoreError::BatchConflict { first_index: 0, .. }
        ));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn snapshot_with_duplicate_email_is_rejected() {
        let snapshot = StoreSnapshotV1 {
            next_contact_id: 3,
            next_op_seq: 3,
            records: vec![
                ContactDraft::new("A", "a@x.com").into_contact(1),
                ContactDraft::new("B", "a@x.com").into_contact(2),
            ],
        };
        assert!(matches!(
            ContactStore::from_snapshot(snapshot),
            Err(StoreError::ConstraintViolation { held_by: 1, .. })
        ));
    }

    #[test]
    fn snapshot_with_repeated_id_is_rejected() {
        let snapshot = StoreSnapshotV1 {
            next_contact_id: 2,
            next_op_seq: 3,
            records: vec![
                ContactDraft::new("A", "a@x.com").into_contact(1),
                ContactDraft::new("B", "b@x.com").into_contact(1),
            ],
        };
        assert_eq!(
            ContactStore::from_snapshot(snapshot).unwrap_err(),
            StoreError::DuplicateId(1)
        );
    }

    #[test]
    fn snapshot_round_trip_keeps_order_and_indexes() {
        let mut store = ContactStore::new();
        store.insert(ContactDraft::new("C", "c@x.com")).unwrap();
        let (b, _) = store.insert(ContactDraft::new("B", "b@x.com")).unwrap();
        store.insert(ContactDraft::new("A", "a@x.com")).unwrap();
        store.delete(b).unwrap();

        let rebuilt = ContactStore::from_snapshot(store.export_snapshot()).unwrap();
        assert_eq!(rebuilt.ordered_ids(), &[1, 3]);
        assert_eq!(rebuilt.find_by_email("a@x.com").map(|c| c.id), Some(3));
        assert_eq!(rebuilt.next_contact_id(), 4);
    }
}
