//! Local-first contact store: an in-memory authoritative table with name and
//! email indexes, journaled to SQLite, with JSON export and email-keyed import
//! reconciliation.
//!
//! # Examples
//!
//! In-memory usage with [`core::store::ContactStore`]:
//! ```
//! use contactlog::{contact::ContactDraft, core::store::ContactStore, query};
//!
//! let mut store = ContactStore::new();
//! let (id, _op) = store
//!     .insert(ContactDraft::new("Ana", "ana@x.com"))
//!     .expect("insert");
//! assert_eq!(id, 1);
//! assert!(store.insert(ContactDraft::new("Ana Lee", "ana@x.com")).is_err());
//! assert_eq!(query::search_by_name(&store, "ANA").contacts().len(), 1);
//! ```
//!
//! Runtime usage with a journal on disk:
//! ```no_run
//! use contactlog::{
//!     contact::ContactDraft,
//!     runtime::{config::ContactsConfig, handle::ContactsHandle},
//! };
//!
//! # #[tokio::main]
//! # async fn main() {
//! let handle = ContactsHandle::open("contacts.db", ContactsConfig::default())
//!     .await
//!     .expect("open journal");
//! let ana = handle
//!     .insert(ContactDraft::new("Ana", "ana@x.com"))
//!     .await
//!     .expect("insert");
//! let snapshot = handle.export().await.expect("export");
//! let summary = handle.import_json(&snapshot.json).await.expect("import");
//! assert_eq!(summary.updated, 1);
//! # let _ = ana;
//! handle.shutdown().await.expect("shutdown");
//! # }
//! ```
#![deny(missing_docs)]

/// JSON snapshot export and import parsing.
pub mod codec;
/// Contact records, drafts and validation.
pub mod contact;
/// Core in-memory store and index helpers.
pub mod core;
/// Optional logger bootstrap.
pub mod logging;
/// Mutation op model and persistence wrapper types.
pub mod op;
/// Persistence abstraction and SQLite implementation.
pub mod persist;
/// Listing and name search.
pub mod query;
/// Email-keyed import reconciliation.
pub mod reconcile;
/// Single-writer runtime handle and events.
pub mod runtime;
/// Shared primitive types.
pub mod types;
