//! Stage an unbounded number of document writes and commit them as
//! capacity-limited atomic batches.
//!
//! ## Features
//! - **Transparent rollover**: writes fill one client batch until it holds
//!   500 operations (configurable), then spill into a new one
//! - **Chunked commits**: batches commit concurrently in groups of a chosen
//!   size, group after group
//! - **Reset on success only**: a failed commit keeps every batch and poisons
//!   the accumulator instead of forgetting uncommitted work
//! - **Pluggable clients**: any [`DatabaseClient`]; [`MemoryClient`] ships as
//!   an in-process reference database
//!
//! ```rust
//! use largebatch::{CommitOptions, DocumentPath, LargeBatch, MemoryClient, Precondition};
//! use serde_json::json;
//!
//! # futures::executor::block_on(async {
//! let client = MemoryClient::new();
//! let mut batch = LargeBatch::new(client.clone());
//!
//! let alice = DocumentPath::new("users/alice")?;
//! batch.create(&alice, &json!({ "name": "Alice", "visits": 1 }))?;
//! batch.commit(CommitOptions::all()).await?;
//!
//! batch.update(&alice, &json!({ "visits": 2 }), Some(Precondition::Exists(true)))?;
//! batch.commit(CommitOptions::all()).await?;
//! assert_eq!(client.data(&alice).unwrap()["visits"], 2);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # }).unwrap();
//! ```

pub mod accumulator;
pub mod client;
pub mod config;
pub mod error;
pub mod memory;

#[cfg(feature = "sync")]
pub mod sync;

pub use accumulator::{BatchError, CommitSummary, LargeBatch};
pub use client::{DatabaseClient, WriteBatch};
pub use config::{CommitOptions, Config, MAX_BATCH_OPERATIONS};
pub use error::{ConfigError, Error, Result};
pub use memory::{MemoryBatch, MemoryClient, MemoryError, StoredDocument};

#[cfg(feature = "sync")]
pub use sync::SyncLargeBatch;

pub use largebatch_types::{
    ArgumentError, DocumentData, DocumentPath, FieldPath, FieldUpdates, PathError, Precondition,
    SetOptions, UpdateArg,
};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Common imports
pub mod prelude {

    pub use crate::{CommitOptions, CommitSummary, Config, Error, LargeBatch, Result};

    #[cfg(feature = "sync")]
    pub use crate::SyncLargeBatch;

    pub use crate::{DatabaseClient, WriteBatch};

    pub use crate::{MemoryClient, MemoryError};

    pub use crate::{DocumentPath, FieldPath, FieldUpdates, Precondition, SetOptions, UpdateArg};
}
