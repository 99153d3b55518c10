//! # kinema-store
//!
//! Storage abstraction layer for the Kinema pose-landmark pipeline.
//!
//! This crate provides a unified interface over record persistence:
//!
//! - **SQLite** - The durable default, one file per deployment
//! - **Memory** - Contract-identical volatile backend for tests and
//!   ephemeral deployments
//!
//! ## Storage Abstraction
//!
//! Both backends implement the [`Store`] trait, allowing the ingest
//! pipeline to be storage-agnostic.
//!
//! ```rust,ignore
//! use kinema_store::{PageRequest, Store};
//!
//! async fn recent(store: &dyn Store) {
//!     let page = store.query_by_user(Some("user-7"), PageRequest::default()).await;
//! }
//! ```

pub mod memory;
pub mod sqlite;
pub mod traits;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{
    PageRequest, RecordPage, Store, StoreError, StoreStats, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE,
};
