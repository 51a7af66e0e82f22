//! Batch accumulator.
//!
//! [`LargeBatch`] stages an unbounded number of writes by spreading them over
//! as many client batches as the per-batch capacity requires, then commits
//! those batches in concurrent groups.

use crate::client::{DatabaseClient, WriteBatch};
use crate::config::{CommitOptions, Config};
use crate::error::{ConfigError, Error, Result};
use futures::future::join_all;
use largebatch_types::{
    DocumentData, DocumentPath, FieldPath, FieldUpdates, Precondition, SetOptions, UpdateArg,
};
use serde::Serialize;
use serde_json::Value;
use std::num::NonZeroUsize;

/// Error type of the batches handed out by client `C`.
pub type BatchError<C> = <<C as DatabaseClient>::Batch as WriteBatch>::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// The last batch in the sequence accepts writes.
    Open,
    /// Everything was committed; the next write opens a fresh batch.
    Committed,
    /// A commit failed part way; no further use is allowed.
    Failed,
}

/// Outcome of a successful [`LargeBatch::commit`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitSummary {
    /// Batches committed
    pub batches: usize,
    /// Sequential commit groups issued
    pub groups: usize,
    /// Write operations contained in the committed batches
    pub operations: usize,
}

/// Write accumulator over capacity-limited atomic batches.
///
/// Every staging call lands in the last batch of the sequence. Once that batch
/// holds `capacity` writes, the next staging call appends a new batch from the
/// client, so `N` writes always occupy `max(1, ceil(N / capacity))` batches.
///
/// Staging needs `&mut self`; callers that stage from several tasks should
/// share the accumulator behind a lock (see `SyncLargeBatch` with the `sync`
/// feature).
///
/// ```rust
/// use largebatch::{CommitOptions, DocumentPath, LargeBatch, MemoryClient};
/// use serde_json::json;
///
/// # futures::executor::block_on(async {
/// let client = MemoryClient::new();
/// let mut batch = LargeBatch::new(client.clone());
///
/// for i in 0..1200 {
///     let doc = DocumentPath::from_parts("items", &i.to_string())?;
///     batch.set(&doc, &json!({ "n": i }), None)?;
/// }
/// assert_eq!(batch.batch_count(), 3);
///
/// let summary = batch.commit(CommitOptions::with_commit_unit(2)).await?;
/// assert_eq!(summary.groups, 2);
/// assert_eq!(client.len(), 1200);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// # }).unwrap();
/// ```
pub struct LargeBatch<C: DatabaseClient> {
    client: C,
    batches: Vec<C::Batch>,
    /// Writes held by the last batch.
    operation_count: usize,
    /// Writes staged since the last successful commit.
    staged: usize,
    capacity: usize,
    default_commit: CommitOptions,
    state: State,
}

impl<C: DatabaseClient> LargeBatch<C> {
    /// Create an accumulator with the default configuration.
    pub fn new(client: C) -> Self {
        let config = Config::default();
        Self::from_parts(client, config.batch_capacity, config.commit_options())
    }

    pub fn with_config(client: C, config: Config) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::from_parts(
            client,
            config.batch_capacity,
            config.commit_options(),
        ))
    }

    fn from_parts(client: C, capacity: usize, default_commit: CommitOptions) -> Self {
        let batches = vec![client.batch()];
        Self {
            client,
            batches,
            operation_count: 0,
            staged: 0,
            capacity,
            default_commit,
            state: State::Open,
        }
    }

    /// Stage creation of a new document.
    pub fn create<T>(&mut self, doc: &DocumentPath, data: &T) -> Result<(), BatchError<C>>
    where
        T: Serialize + ?Sized,
    {
        let data = to_document::<_, BatchError<C>>(data)?;
        self.stage(|batch| batch.stage_create(doc, data))
    }

    /// Stage a document write. Without `options` the document is replaced.
    pub fn set<T>(
        &mut self,
        doc: &DocumentPath,
        data: &T,
        options: Option<SetOptions>,
    ) -> Result<(), BatchError<C>>
    where
        T: Serialize + ?Sized,
    {
        let data = to_document::<_, BatchError<C>>(data)?;
        self.stage(|batch| batch.stage_set(doc, data, options))
    }

    /// Stage an update of an existing document. Top-level keys of `data` are
    /// field paths.
    pub fn update<T>(
        &mut self,
        doc: &DocumentPath,
        data: &T,
        precondition: Option<Precondition>,
    ) -> Result<(), BatchError<C>>
    where
        T: Serialize + ?Sized,
    {
        let data = to_document::<_, BatchError<C>>(data)?;
        self.stage(|batch| batch.stage_update(doc, data, precondition))
    }

    /// Stage a field-path update.
    pub fn update_field(
        &mut self,
        doc: &DocumentPath,
        updates: FieldUpdates,
    ) -> Result<(), BatchError<C>> {
        self.stage(|batch| batch.stage_update_fields(doc, updates))
    }

    /// Stage a field-path update given in alternating argument form: `field,
    /// value` followed by more pairs and at most one trailing precondition.
    pub fn update_field_args<I>(
        &mut self,
        doc: &DocumentPath,
        field: FieldPath,
        value: Value,
        rest: I,
    ) -> Result<(), BatchError<C>>
    where
        I: IntoIterator<Item = UpdateArg>,
    {
        let updates = FieldUpdates::from_args(field, value, rest)?;
        self.update_field(doc, updates)
    }

    /// Stage a document deletion.
    pub fn delete(
        &mut self,
        doc: &DocumentPath,
        precondition: Option<Precondition>,
    ) -> Result<(), BatchError<C>> {
        self.stage(|batch| batch.stage_delete(doc, precondition))
    }

    fn stage<F>(&mut self, write: F) -> Result<(), BatchError<C>>
    where
        F: FnOnce(&mut C::Batch) -> std::result::Result<(), BatchError<C>>,
    {
        let batch = self.current_batch()?;
        if let Err(err) = write(batch) {
            // The batch did not take the write.
            self.operation_count -= 1;
            if self.operation_count == 0 && self.batches.len() > 1 {
                // Drop the batch opened for this write by the rollover; the
                // previous batch is full again.
                self.batches.pop();
                self.operation_count = self.capacity;
            }
            return Err(Error::Client(err));
        }
        self.staged += 1;
        Ok(())
    }

    /// Resolve the batch the next write goes into, rolling over to a new
    /// batch when the current one is full. Counts the write in advance.
    fn current_batch(&mut self) -> Result<&mut C::Batch, BatchError<C>> {
        match self.state {
            State::Failed => return Err(Error::Poisoned),
            State::Committed => {
                self.batches.push(self.client.batch());
                self.operation_count = 0;
                self.state = State::Open;
            }
            State::Open => {}
        }

        if self.batches.is_empty() {
            return Err(Error::EmptyBatchSequence);
        }

        if self.operation_count >= self.capacity {
            self.batches.push(self.client.batch());
            self.operation_count = 0;
            log::debug!(
                "batch full at {} writes, opened batch #{}",
                self.capacity,
                self.batches.len()
            );
        }

        self.operation_count += 1;
        self.batches.last_mut().ok_or(Error::EmptyBatchSequence)
    }

    /// Commit every accumulated batch.
    ///
    /// Batches are committed in groups of at most `commit_unit` (all at once
    /// without a unit). Batches of a group are committed concurrently; the
    /// next group starts only after the whole group finished. On success the
    /// accumulator is emptied and can be reused.
    ///
    /// If a batch fails, the remaining batches of its group still run to
    /// completion, later groups are skipped and the error of the first failed
    /// batch of the group is returned. Groups committed earlier stay applied.
    /// The accumulator is then poisoned.
    pub async fn commit(&mut self, options: CommitOptions) -> Result<CommitSummary, BatchError<C>> {
        if self.state == State::Failed {
            return Err(Error::Poisoned);
        }

        let total = self.batches.len();
        let summary = CommitSummary {
            batches: total,
            groups: options.group_count(total),
            operations: self.staged,
        };

        if total > 0 {
            let group_size = options.commit_unit().map_or(total, NonZeroUsize::get);
            for (index, group) in self.batches.chunks(group_size).enumerate() {
                log::debug!(
                    "committing group {}/{} ({} batches)",
                    index + 1,
                    summary.groups,
                    group.len()
                );

                let results = join_all(group.iter().map(|batch| batch.commit())).await;
                if let Some(err) = results.into_iter().find_map(|result| result.err()) {
                    log::warn!(
                        "commit group {}/{} failed, {} earlier groups stay applied: {}",
                        index + 1,
                        summary.groups,
                        index,
                        err
                    );
                    self.state = State::Failed;
                    return Err(Error::Client(err));
                }
            }
        }

        self.batches.clear();
        self.operation_count = 0;
        self.staged = 0;
        self.state = State::Committed;

        log::info!(
            "committed {} writes in {} batches ({} groups)",
            summary.operations,
            summary.batches,
            summary.groups
        );
        Ok(summary)
    }

    /// Commit using the commit unit from the accumulator's [`Config`].
    pub async fn commit_with_default(&mut self) -> Result<CommitSummary, BatchError<C>> {
        let options = self.default_commit;
        self.commit(options).await
    }

    /// Number of batches currently held.
    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }

    /// Writes held by the batch currently being filled.
    pub fn pending_operations(&self) -> usize {
        self.operation_count
    }

    /// Writes staged since the last successful commit.
    pub fn staged_operations(&self) -> usize {
        self.staged
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// `true` after a failed commit.
    pub fn is_poisoned(&self) -> bool {
        self.state == State::Failed
    }

    pub fn batches(&self) -> &[C::Batch] {
        &self.batches
    }

    pub fn client(&self) -> &C {
        &self.client
    }
}

fn to_document<T, E>(data: &T) -> Result<DocumentData, E>
where
    T: Serialize + ?Sized,
    E: std::error::Error + 'static,
{
    match serde_json::to_value(data)? {
        Value::Object(map) => Ok(map),
        Value::Null => Err(Error::NotAnObject("null")),
        Value::Bool(_) => Err(Error::NotAnObject("a boolean")),
        Value::Number(_) => Err(Error::NotAnObject("a number")),
        Value::String(_) => Err(Error::NotAnObject("a string")),
        Value::Array(_) => Err(Error::NotAnObject("an array")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::fmt;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, PartialEq)]
    struct Rejected(&'static str);

    impl fmt::Display for Rejected {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.0)
        }
    }

    impl std::error::Error for Rejected {}

    /// Counts writes and commits; rejects writes to `reject/*` documents.
    #[derive(Clone, Default)]
    struct CountingClient {
        opened: Arc<AtomicUsize>,
        committed: Arc<AtomicUsize>,
    }

    struct CountingBatch {
        writes: usize,
        committed: Arc<AtomicUsize>,
    }

    impl DatabaseClient for CountingClient {
        type Batch = CountingBatch;

        fn batch(&self) -> CountingBatch {
            self.opened.fetch_add(1, Ordering::SeqCst);
            CountingBatch {
                writes: 0,
                committed: self.committed.clone(),
            }
        }
    }

    impl CountingBatch {
        fn record(&mut self, doc: &DocumentPath) -> std::result::Result<(), Rejected> {
            if doc.collection() == "reject" {
                return Err(Rejected("rejected write"));
            }
            self.writes += 1;
            Ok(())
        }
    }

    #[async_trait]
    impl WriteBatch for CountingBatch {
        type Error = Rejected;

        fn stage_create(
            &mut self,
            doc: &DocumentPath,
            _data: DocumentData,
        ) -> std::result::Result<(), Rejected> {
            self.record(doc)
        }

        fn stage_set(
            &mut self,
            doc: &DocumentPath,
            _data: DocumentData,
            _options: Option<SetOptions>,
        ) -> std::result::Result<(), Rejected> {
            self.record(doc)
        }

        fn stage_update(
            &mut self,
            doc: &DocumentPath,
            _data: DocumentData,
            _precondition: Option<Precondition>,
        ) -> std::result::Result<(), Rejected> {
            self.record(doc)
        }

        fn stage_update_fields(
            &mut self,
            doc: &DocumentPath,
            _updates: FieldUpdates,
        ) -> std::result::Result<(), Rejected> {
            self.record(doc)
        }

        fn stage_delete(
            &mut self,
            doc: &DocumentPath,
            _precondition: Option<Precondition>,
        ) -> std::result::Result<(), Rejected> {
            self.record(doc)
        }

        async fn commit(&self) -> std::result::Result<(), Rejected> {
            self.committed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn doc(i: usize) -> DocumentPath {
        DocumentPath::from_parts("docs", &i.to_string()).unwrap()
    }

    fn stage_sets(batch: &mut LargeBatch<CountingClient>, count: usize) {
        for i in 0..count {
            batch.set(&doc(i), &json!({ "i": i }), None).unwrap();
        }
    }

    fn writes_per_batch(batch: &LargeBatch<CountingClient>) -> Vec<usize> {
        batch.batches().iter().map(|b| b.writes).collect()
    }

    #[test]
    fn test_new_accumulator_has_one_empty_batch() {
        let client = CountingClient::default();
        let batch = LargeBatch::new(client.clone());
        assert_eq!(batch.batch_count(), 1);
        assert_eq!(batch.pending_operations(), 0);
        assert_eq!(batch.capacity(), 500);
        assert_eq!(client.opened.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_rollover_is_lazy() {
        let mut batch = LargeBatch::new(CountingClient::default());

        stage_sets(&mut batch, 500);
        assert_eq!(writes_per_batch(&batch), vec![500]);
        assert_eq!(batch.pending_operations(), 500);

        batch.delete(&doc(500), None).unwrap();
        assert_eq!(writes_per_batch(&batch), vec![500, 1]);
        assert_eq!(batch.pending_operations(), 1);
    }

    #[test]
    fn test_batch_count_matches_ceiling() {
        for (count, expected) in [(0, 1), (1, 1), (499, 1), (500, 1), (501, 2), (1000, 2), (1001, 3)] {
            let mut batch = LargeBatch::new(CountingClient::default());
            stage_sets(&mut batch, count);
            assert_eq!(batch.batch_count(), expected, "{count} writes");
            assert_eq!(batch.staged_operations(), count);
        }
    }

    #[test]
    fn test_custom_capacity() {
        let config = Config::default().with_batch_capacity(3);
        let mut batch = LargeBatch::with_config(CountingClient::default(), config).unwrap();
        stage_sets(&mut batch, 7);
        assert_eq!(writes_per_batch(&batch), vec![3, 3, 1]);
    }

    #[test]
    fn test_with_config_rejects_zero_capacity() {
        let config = Config {
            batch_capacity: 0,
            commit_unit: None,
        };
        let result = LargeBatch::with_config(CountingClient::default(), config);
        assert!(matches!(result, Err(ConfigError::ZeroCapacity)));

        let config = Config {
            batch_capacity: 1000,
            commit_unit: None,
        };
        let result = LargeBatch::with_config(CountingClient::default(), config);
        assert!(matches!(
            result,
            Err(ConfigError::CapacityAboveLimit { capacity: 1000, .. })
        ));
    }

    #[test]
    fn test_all_write_kinds_count_toward_capacity() {
        let config = Config::default().with_batch_capacity(2);
        let mut batch = LargeBatch::with_config(CountingClient::default(), config).unwrap();

        batch.create(&doc(0), &json!({ "a": 1 })).unwrap();
        batch.set(&doc(1), &json!({ "a": 1 }), Some(SetOptions::Merge)).unwrap();
        batch.update(&doc(2), &json!({ "a": 2 }), None).unwrap();
        batch
            .update_field(
                &doc(3),
                FieldUpdates::new(FieldPath::new("a").unwrap(), json!(3)),
            )
            .unwrap();
        batch.delete(&doc(4), Some(Precondition::Exists(true))).unwrap();

        assert_eq!(writes_per_batch(&batch), vec![2, 2, 1]);
    }

    #[test]
    fn test_rejected_write_does_not_count() {
        let config = Config::default().with_batch_capacity(2);
        let mut batch = LargeBatch::with_config(CountingClient::default(), config).unwrap();
        let bad = DocumentPath::new("reject/1").unwrap();

        batch.set(&doc(0), &json!({}), None).unwrap();
        let err = batch.set(&bad, &json!({}), None).unwrap_err();
        assert_eq!(err.into_client(), Some(Rejected("rejected write")));
        assert_eq!(batch.pending_operations(), 1);
        assert_eq!(batch.staged_operations(), 1);

        batch.set(&doc(1), &json!({}), None).unwrap();
        assert_eq!(writes_per_batch(&batch), vec![2]);
    }

    #[tokio::test]
    async fn test_rejected_write_at_rollover_keeps_batch_count() {
        let client = CountingClient::default();
        let config = Config::default().with_batch_capacity(2);
        let mut batch = LargeBatch::with_config(client.clone(), config).unwrap();
        let bad = DocumentPath::new("reject/1").unwrap();

        stage_sets(&mut batch, 2);
        let err = batch.update(&bad, &json!({ "a": 1 }), None).unwrap_err();
        assert!(err.is_client());
        assert_eq!(batch.batch_count(), 1);
        assert_eq!(batch.pending_operations(), 2);
        assert_eq!(batch.staged_operations(), 2);

        let summary = batch.commit(CommitOptions::all()).await.unwrap();
        assert_eq!(summary.batches, 1);
        assert_eq!(client.committed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_rejected_write_after_rollover_then_accepted() {
        let config = Config::default().with_batch_capacity(2);
        let mut batch = LargeBatch::with_config(CountingClient::default(), config).unwrap();
        let bad = DocumentPath::new("reject/1").unwrap();

        stage_sets(&mut batch, 2);
        batch.delete(&bad, None).unwrap_err();
        batch.delete(&doc(9), None).unwrap();
        assert_eq!(writes_per_batch(&batch), vec![2, 1]);
        assert_eq!(batch.pending_operations(), 1);
    }

    #[tokio::test]
    async fn test_rejected_write_after_reopen_matches_fresh() {
        let mut batch = LargeBatch::new(CountingClient::default());
        batch.commit(CommitOptions::all()).await.unwrap();

        let bad = DocumentPath::new("reject/1").unwrap();
        batch.set(&bad, &json!({}), None).unwrap_err();
        assert_eq!(batch.batch_count(), 1);
        assert_eq!(batch.pending_operations(), 0);
    }

    #[test]
    fn test_non_object_data_is_rejected_before_staging() {
        let mut batch = LargeBatch::new(CountingClient::default());
        let err = batch.set(&doc(0), &json!([1, 2]), None).unwrap_err();
        assert!(matches!(err, Error::NotAnObject("an array")));
        let err = batch.create(&doc(0), &5u32).unwrap_err();
        assert!(matches!(err, Error::NotAnObject("a number")));
        assert_eq!(batch.pending_operations(), 0);
    }

    #[test]
    fn test_update_field_args_validation() {
        let mut batch = LargeBatch::new(CountingClient::default());
        let field = FieldPath::new("a").unwrap();

        batch
            .update_field_args(
                &doc(0),
                field.clone(),
                json!(1),
                [UpdateArg::Precondition(Precondition::Exists(true))],
            )
            .unwrap();

        let err = batch
            .update_field_args(&doc(0), field, json!(1), [UpdateArg::Value(json!(2))])
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert_eq!(batch.staged_operations(), 1);
    }

    #[test]
    fn test_empty_sequence_fails_fast() {
        let mut batch = LargeBatch::new(CountingClient::default());
        batch.batches.clear();

        let err = batch.set(&doc(0), &json!({}), None).unwrap_err();
        assert!(matches!(err, Error::EmptyBatchSequence));
        assert_eq!(batch.batch_count(), 0);
    }

    #[tokio::test]
    async fn test_commit_resets_and_reopens() {
        let client = CountingClient::default();
        let mut batch = LargeBatch::new(client.clone());
        stage_sets(&mut batch, 500);

        let summary = batch.commit(CommitOptions::all()).await.unwrap();
        assert_eq!(
            summary,
            CommitSummary {
                batches: 1,
                groups: 1,
                operations: 500
            }
        );
        assert_eq!(batch.batch_count(), 0);
        assert_eq!(batch.pending_operations(), 0);

        batch.set(&doc(0), &json!({}), None).unwrap();
        assert_eq!(batch.batch_count(), 1);
        assert_eq!(batch.pending_operations(), 1);
        assert_eq!(client.opened.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_commit_of_fresh_accumulator_commits_empty_batch() {
        let client = CountingClient::default();
        let mut batch = LargeBatch::new(client.clone());

        let summary = batch.commit(CommitOptions::all()).await.unwrap();
        assert_eq!(summary.batches, 1);
        assert_eq!(client.committed.load(Ordering::SeqCst), 1);

        let summary = batch.commit(CommitOptions::all()).await.unwrap();
        assert_eq!(summary, CommitSummary::default());
        assert_eq!(client.committed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_commit_with_default_uses_config_unit() {
        let client = CountingClient::default();
        let config = Config::default().with_batch_capacity(1).with_commit_unit(2);
        let mut batch = LargeBatch::with_config(client.clone(), config).unwrap();
        stage_sets(&mut batch, 5);

        let summary = batch.commit_with_default().await.unwrap();
        assert_eq!(summary.batches, 5);
        assert_eq!(summary.groups, 3);
        assert_eq!(client.committed.load(Ordering::SeqCst), 5);
    }
}
