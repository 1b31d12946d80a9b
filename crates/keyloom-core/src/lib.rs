//! # Keyloom
//!
//! An entity and write-transaction layer for DynamoDB-style single-table
//! stores.
//!
//! Keyloom maps typed collections onto one wide-column table: entity key
//! fields are encoded into order-preserving `_PK`/`_SK` strings, structured
//! conditions, key queries and update maps compile into the store's native
//! expression language, and writes go through a transaction engine that
//! merges operations on the same item, commits atomically and retries on
//! optimistic-concurrency conflicts.
//!
//! ## Quick Start
//!
//! ```no_run
//! use keyloom_core::collection::{Collection, GetOptions, InsertOptions, UpdateOptions};
//! use keyloom_core::expression::UpdateValues;
//! use keyloom_core::store::MemoryStore;
//! use keyloom_core::types::item_from_json;
//! use serde_json::json;
//!
//! # async fn demo() -> keyloom_core::error::Result<()> {
//! let users = Collection::builder("users", MemoryStore::new().into_shared())
//!     .partition_key("id")
//!     .build();
//!
//! // Insert fails if an entity with the same key exists.
//! users
//!     .insert(&item_from_json(json!({"id": "alice", "name": "Alice"})), InsertOptions::default())
//!     .await?;
//!
//! // Update an existing entity.
//! let key = item_from_json(json!({"id": "alice"}));
//! users
//!     .update(&key, UpdateValues::new().with("name", "Alicia"), UpdateOptions::default())
//!     .await?;
//!
//! let alice = users.get(&key, GetOptions::default()).await?;
//! assert!(alice.is_some());
//! # Ok(())
//! # }
//! ```

pub mod collection;
pub mod config;
pub mod encoding;
pub mod engine;
pub mod error;
pub mod expression;
pub mod store;
pub mod types;

pub use collection::{Collection, CollectionBuilder, Extension};
pub use config::EngineConfig;
pub use engine::{Operation, Transaction};
pub use error::{Error, Result};
pub use types::{Item, Key, Value};
