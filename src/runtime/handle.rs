//! Single-writer command loop that owns the [`ContactStore`].
//!
//! Every read and write goes through one task, so writes never interleave
//! and each read sees the state between two writes. Journaling happens on a
//! second task that owns the [`OpSink`]; blocking SQLite calls run on
//! `spawn_blocking`.
//!
//! Once the journal fails the runtime is poisoned: every later command is
//! answered with [`ContactsError::StorageUnavailable`] without touching the
//! store.

use std::{path::Path, sync::Arc};

use log::{error, info, warn};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::{
    sync::{Mutex, broadcast, mpsc, oneshot},
    time::{Duration, Instant},
};

use crate::{
    codec::{self, CodecError, ExportedSnapshot, ImportCandidate},
    contact::{Contact, ContactDraft},
    core::store::{ContactStore, StoreError, StoreSnapshotV1},
    op::{Op, StoredOp},
    persist::{OpSink, PersistError, sqlite::SqliteOpSink},
    query::{self, NameSearch},
    reconcile::{self, ImportError, ImportSummary},
    types::{ContactId, OpSeq},
};

use super::{
    config::{AckMode, ContactsConfig},
    events::ContactEvent,
};

/// Errors surfaced to callers of [`ContactsHandle`].
#[derive(Debug, Error)]
pub enum ContactsError {
    /// A single write was refused; the store is unchanged.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// An import batch was refused; the store is unchanged.
    #[error(transparent)]
    Import(#[from] ImportError),
    /// Import text could not be parsed, or an export could not be encoded.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// The journal could not be opened or has failed; nothing more will run.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl From<PersistError> for ContactsError {
    fn from(value: PersistError) -> Self {
        Self::StorageUnavailable(value.to_string())
    }
}

impl ContactsError {
    /// True when a write collided with another record's email.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, Self::Store(StoreError::ConstraintViolation { .. }))
    }

    /// True when an id lookup found no record.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Store(StoreError::NotFound(_)))
    }

    /// True when import text was rejected before reaching the store.
    pub fn is_malformed_input(&self) -> bool {
        matches!(self, Self::Codec(CodecError::Malformed(_)))
    }

    /// True when the runtime can no longer serve any command.
    pub fn is_storage_unavailable(&self) -> bool {
        matches!(self, Self::StorageUnavailable(_))
    }
}

type Reply<T> = oneshot::Sender<Result<T, ContactsError>>;

/// Cloneable entry point to a running contact store.
#[derive(Clone)]
pub struct ContactsHandle {
    cmd_tx: mpsc::Sender<Command>,
    events_tx: broadcast::Sender<ContactEvent>,
}

enum Command {
    Insert {
        draft: ContactDraft,
        resp: Reply<Contact>,
    },
    Upsert {
        draft: ContactDraft,
        resp: Reply<Contact>,
    },
    Delete {
        id: ContactId,
        resp: Reply<bool>,
    },
    Import {
        candidates: Vec<ImportCandidate>,
        resp: Reply<ImportSummary>,
    },
    Get {
        id: ContactId,
        resp: Reply<Option<Contact>>,
    },
    FindByEmail {
        email: String,
        resp: Reply<Option<Contact>>,
    },
    ListAll {
        resp: Reply<Vec<Contact>>,
    },
    SearchByName {
        query: String,
        resp: Reply<NameSearch>,
    },
    Flush {
        resp: Reply<OpSeq>,
    },
    Checkpoint {
        resp: Reply<()>,
    },
    Shutdown {
        resp: Reply<()>,
    },
}

impl Command {
    fn reject(self, reason: &str) {
        let err = || ContactsError::StorageUnavailable(reason.to_string());
        match self {
            Command::Insert { resp, .. } | Command::Upsert { resp, .. } => {
                let _ = resp.send(Err(err()));
            }
            Command::Delete { resp, .. } => {
                let _ = resp.send(Err(err()));
            }
            Command::Import { resp, .. } => {
                let _ = resp.send(Err(err()));
            }
            Command::Get { resp, .. } | Command::FindByEmail { resp, .. } => {
                let _ = resp.send(Err(err()));
            }
            Command::ListAll { resp } => {
                let _ = resp.send(Err(err()));
            }
            Command::SearchByName { resp, .. } => {
                let _ = resp.send(Err(err()));
            }
            Command::Flush { resp } => {
                let _ = resp.send(Err(err()));
            }
            Command::Checkpoint { resp } | Command::Shutdown { resp } => {
                let _ = resp.send(Err(err()));
            }
        }
    }
}

enum PersistMsg {
    Op(StoredOp),
    Flush {
        resp: oneshot::Sender<Result<OpSeq, PersistError>>,
    },
    Checkpoint {
        snapshot: StoreSnapshotV1,
        last_seq: OpSeq,
        compact: bool,
        resp: oneshot::Sender<Result<(), PersistError>>,
    },
    Shutdown {
        resp: oneshot::Sender<Result<(), PersistError>>,
    },
}

/// Starts the writer loop (and a persistence worker when `sink` is given).
///
/// Must be called from within a tokio runtime.
pub fn spawn_contacts(
    store: ContactStore,
    sink: Option<Box<dyn OpSink>>,
    config: ContactsConfig,
) -> ContactsHandle {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<Command>(256);
    let (events_tx, _) = broadcast::channel::<ContactEvent>(1024);

    let (persist_tx, mut durable_rx) = if let Some(sink) = sink {
        let (persist_tx, persist_rx) = mpsc::channel::<PersistMsg>(config.persist_queue_bound.max(1));
        let (durable_tx, durable_rx) = mpsc::unbounded_channel::<Result<OpSeq, PersistError>>();
        spawn_persistence_worker(sink, persist_rx, durable_tx, config.clone());
        (Some(persist_tx), Some(durable_rx))
    } else {
        (None, None)
    };

    let mut writer = Writer {
        store,
        events_tx: events_tx.clone(),
        persist_tx,
        config,
        ops_since_snapshot: 0,
        poisoned: None,
    };

    tokio::spawn(async move {
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else { break; };
                    if writer.handle_command(cmd).await {
                        break;
                    }
                }
                durable = recv_durable(&mut durable_rx) => {
                    match durable {
                        Some(result) => writer.on_durable(result),
                        None => durable_rx = None,
                    }
                }
            }
        }
    });

    ContactsHandle { cmd_tx, events_tx }
}

async fn recv_durable(
    rx: &mut Option<mpsc::UnboundedReceiver<Result<OpSeq, PersistError>>>,
) -> Option<Result<OpSeq, PersistError>> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

impl ContactsHandle {
    /// Opens (or creates) the journal at `path`, replays it, and starts the
    /// runtime.
    ///
    /// Fails with [`ContactsError::StorageUnavailable`] when the journal
    /// cannot be opened or replayed.
    pub async fn open(
        path: impl AsRef<Path>,
        config: ContactsConfig,
    ) -> Result<Self, ContactsError> {
        let path = path.as_ref().to_path_buf();
        let (store, sink) = tokio::task::spawn_blocking(move || {
            let sink = SqliteOpSink::open(&path)?;
            let store = sink.load_store()?;
            Ok::<_, PersistError>((store, sink))
        })
        .await
        .map_err(|e| ContactsError::StorageUnavailable(format!("join error: {e}")))??;

        info!(
            "event=contacts_open module=runtime status=ok contacts={} next_id={}",
            store.len(),
            store.next_contact_id()
        );
        Ok(spawn_contacts(store, Some(Box::new(sink)), config))
    }

    /// Starts a runtime journaling to a private in-memory database.
    pub async fn open_in_memory(config: ContactsConfig) -> Result<Self, ContactsError> {
        let sink = tokio::task::spawn_blocking(SqliteOpSink::open_in_memory)
            .await
            .map_err(|e| ContactsError::StorageUnavailable(format!("join error: {e}")))??;
        Ok(spawn_contacts(ContactStore::new(), Some(Box::new(sink)), config))
    }

    /// Subscribes to runtime events.
    pub fn subscribe(&self) -> broadcast::Receiver<ContactEvent> {
        self.events_tx.subscribe()
    }

    /// Adds a new contact; any id on the draft is ignored.
    pub async fn insert(&self, draft: ContactDraft) -> Result<Contact, ContactsError> {
        self.request(|resp| Command::Insert { draft, resp }).await
    }

    /// Replaces the contact at `draft.id`, or inserts when the id is unset.
    pub async fn upsert(&self, draft: ContactDraft) -> Result<Contact, ContactsError> {
        self.request(|resp| Command::Upsert { draft, resp }).await
    }

    /// Removes a contact. `Ok(false)` means there was nothing to remove.
    pub async fn delete(&self, id: ContactId) -> Result<bool, ContactsError> {
        self.request(|resp| Command::Delete { id, resp }).await
    }

    /// Looks up a contact by id; `None` is the not-found signal.
    pub async fn get(&self, id: ContactId) -> Result<Option<Contact>, ContactsError> {
        self.request(|resp| Command::Get { id, resp }).await
    }

    /// Exact email lookup.
    pub async fn find_by_email(
        &self,
        email: impl Into<String>,
    ) -> Result<Option<Contact>, ContactsError> {
        let email = email.into();
        self.request(|resp| Command::FindByEmail { email, resp }).await
    }

    /// Every contact in insertion order.
    pub async fn list_all(&self) -> Result<Vec<Contact>, ContactsError> {
        self.request(|resp| Command::ListAll { resp }).await
    }

    /// Case-insensitive substring search over names.
    pub async fn search_by_name(
        &self,
        query: impl Into<String>,
    ) -> Result<NameSearch, ContactsError> {
        let query = query.into();
        self.request(|resp| Command::SearchByName { query, resp }).await
    }

    /// Merges already parsed candidates into the store.
    pub async fn import(
        &self,
        candidates: Vec<ImportCandidate>,
    ) -> Result<ImportSummary, ContactsError> {
        self.request(|resp| Command::Import { candidates, resp }).await
    }

    /// Parses `text` and merges it; malformed text never reaches the store.
    pub async fn import_json(&self, text: &str) -> Result<ImportSummary, ContactsError> {
        let candidates = codec::parse_import(text)?;
        self.import(candidates).await
    }

    /// Exports every contact as JSON, named after today's UTC date.
    pub async fn export(&self) -> Result<ExportedSnapshot, ContactsError> {
        let contacts = self.list_all().await?;
        let today = OffsetDateTime::now_utc().date();
        Ok(codec::export_snapshot(&contacts, today)?)
    }

    /// Waits until every applied op is durable; returns the durable sequence.
    pub async fn flush(&self) -> Result<OpSeq, ContactsError> {
        self.request(|resp| Command::Flush { resp }).await
    }

    /// Writes a checkpoint of the current state to the journal.
    pub async fn checkpoint(&self) -> Result<(), ContactsError> {
        self.request(|resp| Command::Checkpoint { resp }).await
    }

    /// Flushes the journal and stops the runtime.
    pub async fn shutdown(&self) -> Result<(), ContactsError> {
        self.request(|resp| Command::Shutdown { resp }).await
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, ContactsError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(make(tx))
            .await
            .map_err(|_| runtime_gone())?;
        rx.await.map_err(|_| runtime_gone())?
    }
}

fn runtime_gone() -> ContactsError {
    ContactsError::StorageUnavailable("contact runtime is not running".to_string())
}

struct Writer {
    store: ContactStore,
    events_tx: broadcast::Sender<ContactEvent>,
    persist_tx: Option<mpsc::Sender<PersistMsg>>,
    config: ContactsConfig,
    ops_since_snapshot: usize,
    poisoned: Option<String>,
}

impl Writer {
    async fn handle_command(&mut self, cmd: Command) -> bool {
        if let Some(reason) = &self.poisoned {
            let done = matches!(cmd, Command::Shutdown { .. });
            cmd.reject(reason);
            return done;
        }

        match cmd {
            Command::Insert { draft, resp } => {
                let res = self.store.insert(draft);
                let out = self.finish_write(res).await;
                let _ = resp.send(out);
            }
            Command::Upsert { draft, resp } => {
                let res = self.store.upsert(draft);
                let out = self.finish_write(res).await;
                let _ = resp.send(out);
            }
            Command::Delete { id, resp } => {
                let out = match self.store.delete(id) {
                    Some(_) => self.commit(true).await.map(|()| true),
                    None => Ok(false),
                };
                let _ = resp.send(out);
            }
            Command::Import { candidates, resp } => {
                let out = match reconcile::reconcile(&mut self.store, candidates) {
                    Ok((summary, _)) => self.commit(false).await.map(|()| {
                        let _ = self.events_tx.send(ContactEvent::Imported {
                            added: summary.added,
                            updated: summary.updated,
                        });
                        summary
                    }),
                    Err(err) => Err(err.into()),
                };
                let _ = resp.send(out);
            }
            Command::Get { id, resp } => {
                let _ = resp.send(Ok(self.store.get_cloned(id)));
            }
            Command::FindByEmail { email, resp } => {
                let _ = resp.send(Ok(self.store.find_by_email(&email).cloned()));
            }
            Command::ListAll { resp } => {
                let _ = resp.send(Ok(query::list_all(&self.store)));
            }
            Command::SearchByName { query, resp } => {
                let _ = resp.send(Ok(query::search_by_name(&self.store, &query)));
            }
            Command::Flush { resp } => {
                let out = self.flush_journal().await;
                let _ = resp.send(out);
            }
            Command::Checkpoint { resp } => {
                let out = self.checkpoint().await;
                let _ = resp.send(out);
            }
            Command::Shutdown { resp } => {
                let out = self.shutdown_worker().await;
                let _ = resp.send(out);
                return true;
            }
        }

        false
    }

    async fn finish_write(
        &mut self,
        res: Result<(ContactId, StoredOp), StoreError>,
    ) -> Result<Contact, ContactsError> {
        let (id, _) = res.inspect_err(|err| {
            warn!("event=contact_write module=runtime status=rejected error={err}");
        })?;
        self.commit(true).await?;
        self.store
            .get_cloned(id)
            .ok_or(ContactsError::Store(StoreError::NotFound(id)))
    }

    /// Forwards pending ops to the journal, honouring the ack mode.
    async fn commit(&mut self, announce: bool) -> Result<(), ContactsError> {
        let ops = self.store.drain_pending_ops();
        if ops.is_empty() {
            return Ok(());
        }
        let count = ops.len();
        let events: Vec<ContactEvent> = if announce {
            ops.iter().map(|stored| event_for(&stored.op)).collect()
        } else {
            Vec::new()
        };

        if let Some(tx) = self.persist_tx.clone() {
            for stored in ops {
                if tx.send(PersistMsg::Op(stored)).await.is_err() {
                    return Err(self.poison("persistence worker stopped"));
                }
            }
            if self.config.ack_mode == AckMode::Durable {
                let durable = self.flush_journal().await?;
                let _ = self.events_tx.send(ContactEvent::DurableUpTo { op_seq: durable });
            }
        } else {
            let _ = self.events_tx.send(ContactEvent::DurableUpTo {
                op_seq: self.store.latest_op_seq(),
            });
        }

        for event in events {
            let _ = self.events_tx.send(event);
        }

        self.ops_since_snapshot += count;
        self.maybe_auto_checkpoint().await;
        Ok(())
    }

    async fn flush_journal(&mut self) -> Result<OpSeq, ContactsError> {
        let Some(tx) = self.persist_tx.clone() else {
            return Ok(self.store.latest_op_seq());
        };
        let (flush_tx, flush_rx) = oneshot::channel();
        if tx.send(PersistMsg::Flush { resp: flush_tx }).await.is_err() {
            return Err(self.poison("persistence worker stopped"));
        }
        match flush_rx.await {
            Ok(Ok(seq)) => Ok(seq),
            Ok(Err(err)) => Err(self.poison(&format!("journal flush failed: {err}"))),
            Err(_) => Err(self.poison("persistence worker stopped")),
        }
    }

    async fn checkpoint(&mut self) -> Result<(), ContactsError> {
        let Some(tx) = self.persist_tx.clone() else {
            return Ok(());
        };
        let (cp_tx, cp_rx) = oneshot::channel();
        let msg = PersistMsg::Checkpoint {
            snapshot: self.store.export_snapshot(),
            last_seq: self.store.latest_op_seq(),
            compact: self.config.compact_after_snapshot,
            resp: cp_tx,
        };
        if tx.send(msg).await.is_err() {
            return Err(self.poison("persistence worker stopped"));
        }
        match cp_rx.await {
            Ok(Ok(())) => {
                self.ops_since_snapshot = 0;
                Ok(())
            }
            Ok(Err(err)) => Err(self.poison(&format!("checkpoint failed: {err}"))),
            Err(_) => Err(self.poison("persistence worker stopped")),
        }
    }

    async fn maybe_auto_checkpoint(&mut self) {
        if self.config.snapshot_every_ops == 0
            || self.ops_since_snapshot < self.config.snapshot_every_ops
        {
            return;
        }
        if let Err(err) = self.checkpoint().await {
            error!("event=auto_checkpoint module=runtime status=error error={err}");
        }
    }

    async fn shutdown_worker(&mut self) -> Result<(), ContactsError> {
        let Some(tx) = self.persist_tx.take() else {
            return Ok(());
        };
        let (done_tx, done_rx) = oneshot::channel();
        if tx.send(PersistMsg::Shutdown { resp: done_tx }).await.is_err() {
            return Err(self.poison("persistence worker stopped"));
        }
        match done_rx.await {
            Ok(Ok(())) => {
                info!("event=contacts_shutdown module=runtime status=ok");
                Ok(())
            }
            Ok(Err(err)) => Err(self.poison(&format!("final journal flush failed: {err}"))),
            Err(_) => Err(self.poison("persistence worker stopped")),
        }
    }

    fn on_durable(&mut self, result: Result<OpSeq, PersistError>) {
        match result {
            Ok(op_seq) => {
                let _ = self.events_tx.send(ContactEvent::DurableUpTo { op_seq });
            }
            Err(err) => {
                self.poison(&format!("journal append failed: {err}"));
            }
        }
    }

    fn poison(&mut self, reason: &str) -> ContactsError {
        if self.poisoned.is_none() {
            error!("event=runtime_poisoned module=runtime status=error reason={reason}");
            self.poisoned = Some(reason.to_string());
        }
        ContactsError::StorageUnavailable(reason.to_string())
    }
}

fn event_for(op: &Op) -> ContactEvent {
    match op {
        Op::Put {
            contact,
            created: true,
        } => ContactEvent::Inserted { id: contact.id },
        Op::Put { contact, .. } => ContactEvent::Updated { id: contact.id },
        Op::Delete { id } => ContactEvent::Deleted { id: *id },
    }
}

fn spawn_persistence_worker(
    sink: Box<dyn OpSink>,
    mut rx: mpsc::Receiver<PersistMsg>,
    durable_tx: mpsc::UnboundedSender<Result<OpSeq, PersistError>>,
    config: ContactsConfig,
) {
    let sink = Arc::new(Mutex::new(sink));
    tokio::spawn(async move {
        let mut buf = Vec::<StoredOp>::new();
        let mut deadline = Instant::now() + Duration::from_millis(config.batch_max_latency_ms);
        let mut last_durable: OpSeq = 0;
        // Ops of a failed append are gone, so every later flush must fail too.
        let mut failure: Option<String> = None;

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(msg) = msg else {
                        let _ = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await;
                        break;
                    };

                    match msg {
                        PersistMsg::Op(stored) => {
                            buf.push(stored);
                            if config.flush_every_write || buf.len() >= config.batch_max_ops {
                                let res = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, false).await;
                                let _ = sticky(res, &mut failure);
                                deadline = Instant::now() + Duration::from_millis(config.batch_max_latency_ms);
                            }
                        }
                        PersistMsg::Flush { resp } => {
                            let res = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await;
                            let _ = resp.send(sticky(res, &mut failure).map(|()| last_durable));
                            deadline = Instant::now() + Duration::from_millis(config.batch_max_latency_ms);
                        }
                        PersistMsg::Checkpoint { snapshot, last_seq, compact, resp } => {
                            let res = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await;
                            let result = match sticky(res, &mut failure) {
                                Err(err) => Err(err),
                                Ok(()) => {
                                    let sink_ref = Arc::clone(&sink);
                                    tokio::task::spawn_blocking(move || {
                                        let mut sink = sink_ref.blocking_lock();
                                        sink.write_snapshot(&snapshot, last_seq)?;
                                        if compact {
                                            sink.compact_through(last_seq)?;
                                        }
                                        Result::<(), PersistError>::Ok(())
                                    })
                                    .await
                                    .unwrap_or_else(|e| Err(PersistError::Message(format!("join error: {e}"))))
                                }
                            };
                            let _ = resp.send(result);
                            deadline = Instant::now() + Duration::from_millis(config.batch_max_latency_ms);
                        }
                        PersistMsg::Shutdown { resp } => {
                            let res = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await;
                            let _ = resp.send(sticky(res, &mut failure));
                            break;
                        }
                    }
                }
                _ = tokio::time::sleep_until(deadline), if !buf.is_empty() => {
                    let res = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, false).await;
                    let _ = sticky(res, &mut failure);
                    deadline = Instant::now() + Duration::from_millis(config.batch_max_latency_ms);
                }
            }
        }
    });
}

fn sticky(
    result: Result<(), PersistError>,
    failure: &mut Option<String>,
) -> Result<(), PersistError> {
    match (result, failure.as_ref()) {
        (Err(err), _) => {
            if failure.is_none() {
                *failure = Some(err.to_string());
            }
            Err(err)
        }
        (Ok(()), Some(reason)) => Err(PersistError::Message(format!(
            "journal failed earlier: {reason}"
        ))),
        (Ok(()), None) => Ok(()),
    }
}

async fn flush_buf(
    sink: &Arc<Mutex<Box<dyn OpSink>>>,
    buf: &mut Vec<StoredOp>,
    last_durable: &mut OpSeq,
    durable_tx: &mpsc::UnboundedSender<Result<OpSeq, PersistError>>,
    call_flush: bool,
) -> Result<(), PersistError> {
    if buf.is_empty() {
        if call_flush {
            let sink_ref = Arc::clone(sink);
            tokio::task::spawn_blocking(move || {
                let mut sink = sink_ref.blocking_lock();
                sink.flush()
            })
            .await
            .map_err(|e| PersistError::Message(format!("join error: {e}")))??;
        }
        return Ok(());
    }

    let ops = std::mem::take(buf);
    let sink_ref = Arc::clone(sink);
    let append_res: Result<OpSeq, PersistError> = tokio::task::spawn_blocking(move || {
        let mut sink = sink_ref.blocking_lock();
        let seq = sink.append_ops(&ops)?;
        if call_flush {
            sink.flush()?;
        }
        Ok(seq)
    })
    .await
    .map_err(|e| PersistError::Message(format!("join error: {e}")))?;

    match append_res {
        Ok(seq) => {
            *last_durable = (*last_durable).max(seq);
            let _ = durable_tx.send(Ok(*last_durable));
            Ok(())
        }
        Err(err) => {
            let _ = durable_tx.send(Err(PersistError::Message(format!("append failed: {err}"))));
            Err(err)
        }
    }
}
