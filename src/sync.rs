//! Shared accumulator for staging from several tasks.
//!
//! `LargeBatch` itself is unsynchronised and stages through `&mut self`.
//! `SyncLargeBatch` is a cloneable handle that serialises every call through
//! an async mutex, so independent tasks can stage into one accumulator and
//! any of them can commit it.

use crate::accumulator::{BatchError, CommitSummary, LargeBatch};
use crate::client::DatabaseClient;
use crate::config::{CommitOptions, Config};
use crate::error::{ConfigError, Result};
use largebatch_types::{DocumentPath, FieldUpdates, Precondition, SetOptions};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Thread-safe handle around [`LargeBatch`].
pub struct SyncLargeBatch<C: DatabaseClient> {
    inner: Arc<Mutex<LargeBatch<C>>>,
}

impl<C: DatabaseClient> Clone for SyncLargeBatch<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C: DatabaseClient> SyncLargeBatch<C> {
    pub fn new(client: C) -> Self {
        Self::from_batch(LargeBatch::new(client))
    }

    pub fn with_config(client: C, config: Config) -> std::result::Result<Self, ConfigError> {
        Ok(Self::from_batch(LargeBatch::with_config(client, config)?))
    }

    pub fn from_batch(batch: LargeBatch<C>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(batch)),
        }
    }

    pub async fn create<T>(&self, doc: &DocumentPath, data: &T) -> Result<(), BatchError<C>>
    where
        T: Serialize + ?Sized,
    {
        self.inner.lock().await.create(doc, data)
    }

    pub async fn set<T>(
        &self,
        doc: &DocumentPath,
        data: &T,
        options: Option<SetOptions>,
    ) -> Result<(), BatchError<C>>
    where
        T: Serialize + ?Sized,
    {
        self.inner.lock().await.set(doc, data, options)
    }

    pub async fn update<T>(
        &self,
        doc: &DocumentPath,
        data: &T,
        precondition: Option<Precondition>,
    ) -> Result<(), BatchError<C>>
    where
        T: Serialize + ?Sized,
    {
        self.inner.lock().await.update(doc, data, precondition)
    }

    pub async fn update_field(
        &self,
        doc: &DocumentPath,
        updates: FieldUpdates,
    ) -> Result<(), BatchError<C>> {
        self.inner.lock().await.update_field(doc, updates)
    }

    pub async fn delete(
        &self,
        doc: &DocumentPath,
        precondition: Option<Precondition>,
    ) -> Result<(), BatchError<C>> {
        self.inner.lock().await.delete(doc, precondition)
    }

    /// Commit all batches. Staging calls wait until the commit finishes.
    pub async fn commit(&self, options: CommitOptions) -> Result<CommitSummary, BatchError<C>> {
        self.inner.lock().await.commit(options).await
    }

    pub async fn commit_with_default(&self) -> Result<CommitSummary, BatchError<C>> {
        self.inner.lock().await.commit_with_default().await
    }

    pub async fn batch_count(&self) -> usize {
        self.inner.lock().await.batch_count()
    }

    pub async fn staged_operations(&self) -> usize {
        self.inner.lock().await.staged_operations()
    }

    pub async fn is_poisoned(&self) -> bool {
        self.inner.lock().await.is_poisoned()
    }

    /// Take the accumulator back if this is the last handle.
    pub fn into_inner(self) -> std::result::Result<LargeBatch<C>, Self> {
        Arc::try_unwrap(self.inner)
            .map(Mutex::into_inner)
            .map_err(|inner| Self { inner })
    }
}
