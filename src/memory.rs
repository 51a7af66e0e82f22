//! In-memory document database client
//!
//! [`MemoryClient`] is a complete [`DatabaseClient`] over a shared
//! in-process document map. It applies the usual document-store rules
//! (create conflicts, missing documents, preconditions, merges) and commits
//! each batch all-or-nothing, which makes it the reference backend for
//! tests and local tooling.

use crate::client::{DatabaseClient, WriteBatch};
use crate::config::MAX_BATCH_OPERATIONS;
use async_trait::async_trait;
use largebatch_types::{
    DocumentData, DocumentPath, FieldPath, FieldUpdates, PathError, Precondition, SetOptions,
};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    #[error("document '{0}' already exists")]
    AlreadyExists(DocumentPath),
    #[error("document '{0}' not found")]
    NotFound(DocumentPath),
    #[error("precondition failed for document '{0}'")]
    PreconditionFailed(DocumentPath),
    #[error("batch already holds the maximum of {max} writes")]
    TooManyWrites { max: usize },
    #[error("batch has already been committed")]
    AlreadyCommitted,
    #[error("invalid field path: {0}")]
    InvalidField(#[from] PathError),
    #[error("merge field '{0}' is missing from the document data")]
    MissingMergeField(FieldPath),
}

/// A stored document and the time of its last write.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub data: DocumentData,
    pub update_time: SystemTime,
}

#[derive(Debug, Default)]
struct Store {
    documents: BTreeMap<DocumentPath, StoredDocument>,
    commits: u64,
}

/// Shared handle to an in-memory document database. Clones see the same data.
#[derive(Debug, Clone)]
pub struct MemoryClient {
    store: Arc<RwLock<Store>>,
    max_writes: usize,
}

impl MemoryClient {
    /// Create an empty database accepting up to 500 writes per batch.
    pub fn new() -> Self {
        Self::with_max_writes(MAX_BATCH_OPERATIONS)
    }

    /// Create an empty database with a custom per-batch write limit.
    pub fn with_max_writes(max_writes: usize) -> Self {
        Self {
            store: Arc::new(RwLock::new(Store::default())),
            max_writes,
        }
    }

    pub fn get(&self, doc: &DocumentPath) -> Option<StoredDocument> {
        self.store.read().documents.get(doc).cloned()
    }

    /// Data of a document, if it exists.
    pub fn data(&self, doc: &DocumentPath) -> Option<DocumentData> {
        self.get(doc).map(|stored| stored.data)
    }

    pub fn update_time(&self, doc: &DocumentPath) -> Option<SystemTime> {
        self.store.read().documents.get(doc).map(|d| d.update_time)
    }

    pub fn contains(&self, doc: &DocumentPath) -> bool {
        self.store.read().documents.contains_key(doc)
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.store.read().documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.read().documents.is_empty()
    }

    /// Number of successfully committed batches.
    pub fn commit_count(&self) -> u64 {
        self.store.read().commits
    }

    pub fn max_writes(&self) -> usize {
        self.max_writes
    }
}

impl Default for MemoryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl DatabaseClient for MemoryClient {
    type Batch = MemoryBatch;

    fn batch(&self) -> MemoryBatch {
        MemoryBatch {
            store: self.store.clone(),
            writes: Vec::new(),
            max_writes: self.max_writes,
            committed: AtomicBool::new(false),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum WriteOp {
    Create {
        doc: DocumentPath,
        data: DocumentData,
    },
    Set {
        doc: DocumentPath,
        data: DocumentData,
        options: Option<SetOptions>,
    },
    Update {
        doc: DocumentPath,
        fields: Vec<(FieldPath, Value)>,
        precondition: Option<Precondition>,
    },
    Delete {
        doc: DocumentPath,
        precondition: Option<Precondition>,
    },
}

/// Batch of staged writes against a [`MemoryClient`]. Commits at most once.
#[derive(Debug)]
pub struct MemoryBatch {
    store: Arc<RwLock<Store>>,
    writes: Vec<WriteOp>,
    max_writes: usize,
    committed: AtomicBool,
}

impl MemoryBatch {
    /// Number of staged writes.
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn is_committed(&self) -> bool {
        self.committed.load(Ordering::SeqCst)
    }

    fn push(&mut self, op: WriteOp) -> Result<(), MemoryError> {
        if self.is_committed() {
            return Err(MemoryError::AlreadyCommitted);
        }
        if self.writes.len() >= self.max_writes {
            return Err(MemoryError::TooManyWrites {
                max: self.max_writes,
            });
        }
        self.writes.push(op);
        Ok(())
    }
}

#[async_trait]
impl WriteBatch for MemoryBatch {
    type Error = MemoryError;

    fn stage_create(&mut self, doc: &DocumentPath, data: DocumentData) -> Result<(), MemoryError> {
        self.push(WriteOp::Create {
            doc: doc.clone(),
            data,
        })
    }

    fn stage_set(
        &mut self,
        doc: &DocumentPath,
        data: DocumentData,
        options: Option<SetOptions>,
    ) -> Result<(), MemoryError> {
        if let Some(SetOptions::MergeFields(fields)) = &options
            && let Some(missing) = fields.iter().find(|f| get_path(&data, f).is_none())
        {
            return Err(MemoryError::MissingMergeField(missing.clone()));
        }
        self.push(WriteOp::Set {
            doc: doc.clone(),
            data,
            options,
        })
    }

    fn stage_update(
        &mut self,
        doc: &DocumentPath,
        data: DocumentData,
        precondition: Option<Precondition>,
    ) -> Result<(), MemoryError> {
        let fields = data
            .into_iter()
            .map(|(key, value)| -> Result<_, MemoryError> {
                Ok((FieldPath::new(&key)?, value))
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.push(WriteOp::Update {
            doc: doc.clone(),
            fields,
            precondition,
        })
    }

    fn stage_update_fields(
        &mut self,
        doc: &DocumentPath,
        updates: FieldUpdates,
    ) -> Result<(), MemoryError> {
        let (fields, precondition) = updates.into_parts();
        self.push(WriteOp::Update {
            doc: doc.clone(),
            fields,
            precondition,
        })
    }

    fn stage_delete(
        &mut self,
        doc: &DocumentPath,
        precondition: Option<Precondition>,
    ) -> Result<(), MemoryError> {
        self.push(WriteOp::Delete {
            doc: doc.clone(),
            precondition,
        })
    }

    async fn commit(&self) -> Result<(), MemoryError> {
        if self.committed.swap(true, Ordering::SeqCst) {
            return Err(MemoryError::AlreadyCommitted);
        }

        let mut store = self.store.write();
        let now = SystemTime::now();

        // Writes land in the overlay first so a failing write leaves the
        // store untouched. `None` marks a deletion.
        let mut overlay: BTreeMap<&DocumentPath, Option<StoredDocument>> = BTreeMap::new();
        for op in &self.writes {
            let doc = op.doc();
            let current = match overlay.get(doc) {
                Some(staged) => staged.clone(),
                None => store.documents.get(doc).cloned(),
            };
            let next = apply(op, current, now)?;
            overlay.insert(doc, next);
        }

        for (doc, next) in overlay {
            match next {
                Some(stored) => {
                    store.documents.insert(doc.clone(), stored);
                }
                None => {
                    store.documents.remove(doc);
                }
            }
        }
        store.commits += 1;

        Ok(())
    }
}

impl WriteOp {
    fn doc(&self) -> &DocumentPath {
        match self {
            WriteOp::Create { doc, .. }
            | WriteOp::Set { doc, .. }
            | WriteOp::Update { doc, .. }
            | WriteOp::Delete { doc, .. } => doc,
        }
    }
}

/// Compute the document state after `op`.
fn apply(
    op: &WriteOp,
    current: Option<StoredDocument>,
    now: SystemTime,
) -> Result<Option<StoredDocument>, MemoryError> {
    let written = |data| {
        Some(StoredDocument {
            data,
            update_time: now,
        })
    };

    match op {
        WriteOp::Create { doc, data } => {
            if current.is_some() {
                return Err(MemoryError::AlreadyExists(doc.clone()));
            }
            Ok(written(data.clone()))
        }
        WriteOp::Set { data, options, .. } => {
            let merged = match options {
                None => data.clone(),
                Some(SetOptions::Merge) => {
                    let mut base = current.map(|d| d.data).unwrap_or_default();
                    merge_into(&mut base, data);
                    base
                }
                Some(SetOptions::MergeFields(fields)) => {
                    let mut base = current.map(|d| d.data).unwrap_or_default();
                    for field in fields {
                        if let Some(value) = get_path(data, field) {
                            set_path(&mut base, field, value.clone());
                        }
                    }
                    base
                }
            };
            Ok(written(merged))
        }
        WriteOp::Update {
            doc,
            fields,
            precondition,
        } => {
            check_precondition(doc, current.as_ref(), precondition.as_ref())?;
            let Some(existing) = current else {
                return Err(MemoryError::NotFound(doc.clone()));
            };
            let mut data = existing.data;
            for (field, value) in fields {
                set_path(&mut data, field, value.clone());
            }
            Ok(written(data))
        }
        WriteOp::Delete { doc, precondition } => {
            check_precondition(doc, current.as_ref(), precondition.as_ref())?;
            Ok(None)
        }
    }
}

fn check_precondition(
    doc: &DocumentPath,
    current: Option<&StoredDocument>,
    precondition: Option<&Precondition>,
) -> Result<(), MemoryError> {
    let holds = match precondition {
        None => true,
        Some(Precondition::Exists(exists)) => current.is_some() == *exists,
        Some(Precondition::UpdateTime(time)) => current.is_some_and(|d| d.update_time == *time),
    };
    if holds {
        Ok(())
    } else {
        Err(MemoryError::PreconditionFailed(doc.clone()))
    }
}

fn get_path<'a>(data: &'a DocumentData, field: &FieldPath) -> Option<&'a Value> {
    let (first, rest) = field.segments().split_first()?;
    let mut value = data.get(first)?;
    for segment in rest {
        value = value.as_object()?.get(segment)?;
    }
    Some(value)
}

/// Write `value` at `field`, replacing non-object intermediates.
fn set_path(data: &mut DocumentData, field: &FieldPath, value: Value) {
    let Some((last, parents)) = field.segments().split_last() else {
        return;
    };
    let mut target = data;
    for segment in parents {
        let slot = target
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(DocumentData::new()));
        if !slot.is_object() {
            *slot = Value::Object(DocumentData::new());
        }
        target = match slot {
            Value::Object(map) => map,
            _ => unreachable!("slot was just made an object"),
        };
    }
    target.insert(last.clone(), value);
}

/// Recursively merge `source` into `target`; nested objects merge, anything
/// else overwrites.
fn merge_into(target: &mut DocumentData, source: &DocumentData) {
    for (key, value) in source {
        match (target.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                merge_into(existing, incoming);
            }
            _ => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}
