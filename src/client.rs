//! Database client abstraction
//!
//! The accumulator never talks to a database itself. It asks an injected
//! [`DatabaseClient`] for empty batches, stages writes into them and later
//! commits them. Connections, authentication, retries and wire formats all
//! live behind these two traits.

use async_trait::async_trait;
use largebatch_types::{DocumentData, DocumentPath, FieldUpdates, Precondition, SetOptions};

/// Source of empty atomic write batches.
pub trait DatabaseClient: Send + Sync {
    type Batch: WriteBatch;

    /// Allocate a new, empty batch.
    fn batch(&self) -> Self::Batch;
}

/// Atomic container of staged writes.
///
/// Staging methods only record the write; nothing reaches the database until
/// [`WriteBatch::commit`], which applies every staged write or none of them.
#[async_trait]
pub trait WriteBatch: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Stage creation of a document that must not exist yet
    fn stage_create(&mut self, doc: &DocumentPath, data: DocumentData)
    -> Result<(), Self::Error>;

    /// Stage a full replacement, or a merge when `options` is given
    fn stage_set(
        &mut self,
        doc: &DocumentPath,
        data: DocumentData,
        options: Option<SetOptions>,
    ) -> Result<(), Self::Error>;

    /// Stage a field merge into an existing document
    fn stage_update(
        &mut self,
        doc: &DocumentPath,
        data: DocumentData,
        precondition: Option<Precondition>,
    ) -> Result<(), Self::Error>;

    /// Stage a field-path update
    fn stage_update_fields(
        &mut self,
        doc: &DocumentPath,
        updates: FieldUpdates,
    ) -> Result<(), Self::Error>;

    /// Stage a document deletion
    fn stage_delete(
        &mut self,
        doc: &DocumentPath,
        precondition: Option<Precondition>,
    ) -> Result<(), Self::Error>;

    /// Atomically apply all staged writes.
    async fn commit(&self) -> Result<(), Self::Error>;
}
