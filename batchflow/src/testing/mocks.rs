//! Scripted readers, processors, writers and steps for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::core::{ExecutionContext, ExitStatus, StepExecution};
use crate::errors::{BatchError, ItemError};
use crate::step::{ItemProcessor, ItemReader, ItemStream, ItemWriter, Step, StepContext};

#[derive(Debug)]
struct ScriptedFailure {
    error: ItemError,
    remaining: AtomicUsize,
}

impl ScriptedFailure {
    fn new(error: ItemError, times: usize) -> Self {
        Self {
            error,
            remaining: AtomicUsize::new(times),
        }
    }

    /// Consumes one scripted failure, if any remain.
    fn fire(&self) -> Option<ItemError> {
        self.remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .ok()
            .map(|_| self.error.clone())
    }
}

/// Pass-through processor that fails or filters chosen items.
///
/// Scripted failures fire a set number of times; `usize::MAX` means always.
#[derive(Debug)]
pub struct FailingProcessor<I> {
    failures: Vec<(I, ScriptedFailure)>,
    filtered: Vec<I>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl<I> Default for FailingProcessor<I> {
    fn default() -> Self {
        Self {
            failures: Vec::new(),
            filtered: Vec::new(),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }
}

impl<I: PartialEq> FailingProcessor<I> {
    /// A processor that passes every item through.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails `item` with `error` the next `times` times it is processed.
    #[must_use]
    pub fn fail_on(mut self, item: I, error: ItemError, times: usize) -> Self {
        self.failures.push((item, ScriptedFailure::new(error, times)));
        self
    }

    /// Filters `item` out.
    #[must_use]
    pub fn filter(mut self, item: I) -> Self {
        self.filtered.push(item);
        self
    }

    /// Sleeps before every item.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of `process` calls.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<I> ItemProcessor<I, I> for FailingProcessor<I>
where
    I: PartialEq + Clone + Send + Sync,
{
    async fn process(&self, item: &I) -> Result<Option<I>, ItemError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        for (candidate, failure) in &self.failures {
            if candidate == item {
                if let Some(error) = failure.fire() {
                    return Err(error);
                }
            }
        }
        if self.filtered.contains(item) {
            return Ok(None);
        }
        Ok(Some(item.clone()))
    }
}

/// Writer that records committed chunks into shared storage.
///
/// Clones share storage, so a writer factory can hand out clones and the
/// test can inspect what every execution wrote.
#[derive(Debug)]
pub struct RecordingWriter<O> {
    written: Arc<Mutex<Vec<O>>>,
    chunks: Arc<Mutex<Vec<usize>>>,
    failures: Arc<Vec<(O, ScriptedFailure)>>,
}

impl<O> Clone for RecordingWriter<O> {
    fn clone(&self) -> Self {
        Self {
            written: Arc::clone(&self.written),
            chunks: Arc::clone(&self.chunks),
            failures: Arc::clone(&self.failures),
        }
    }
}

impl<O> Default for RecordingWriter<O> {
    fn default() -> Self {
        Self {
            written: Arc::new(Mutex::new(Vec::new())),
            chunks: Arc::new(Mutex::new(Vec::new())),
            failures: Arc::new(Vec::new()),
        }
    }
}

impl<O: Clone + PartialEq> RecordingWriter<O> {
    /// Creates an empty writer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails any chunk containing `item` the next `times` times.
    ///
    /// Must be called before the writer is cloned.
    #[must_use]
    pub fn fail_on_item(mut self, item: O, error: ItemError, times: usize) -> Self {
        let mut failures: Vec<(O, ScriptedFailure)> = Vec::new();
        if let Some(existing) = Arc::get_mut(&mut self.failures) {
            failures.append(existing);
        }
        failures.push((item, ScriptedFailure::new(error, times)));
        self.failures = Arc::new(failures);
        self
    }

    /// All items written, in order.
    #[must_use]
    pub fn written(&self) -> Vec<O> {
        self.written.lock().clone()
    }

    /// Size of every successful `write` call.
    #[must_use]
    pub fn chunk_sizes(&self) -> Vec<usize> {
        self.chunks.lock().clone()
    }
}

#[async_trait]
impl<O: Send + Sync> ItemStream for RecordingWriter<O> {}

#[async_trait]
impl<O> ItemWriter<O> for RecordingWriter<O>
where
    O: Clone + PartialEq + Send + Sync,
{
    async fn write(&mut self, items: &[O]) -> Result<(), ItemError> {
        for (candidate, failure) in self.failures.iter() {
            if items.contains(candidate) {
                if let Some(error) = failure.fire() {
                    return Err(error);
                }
            }
        }
        self.written.lock().extend(items.iter().cloned());
        self.chunks.lock().push(items.len());
        Ok(())
    }
}

/// Restartable list reader whose reads can fail at chosen positions.
///
/// Clones share the scripted failures but not the position.
#[derive(Debug)]
pub struct FlakyReader<I> {
    items: Arc<Vec<I>>,
    failures: Arc<HashMap<usize, (ScriptedFailure, bool)>>,
    index: usize,
}

impl<I> Clone for FlakyReader<I> {
    fn clone(&self) -> Self {
        Self {
            items: Arc::clone(&self.items),
            failures: Arc::clone(&self.failures),
            index: 0,
        }
    }
}

impl<I> FlakyReader<I> {
    const INDEX_KEY: &'static str = "flaky.reader.index";

    /// Creates a reader over `items`.
    #[must_use]
    pub fn new(items: Vec<I>) -> Self {
        Self {
            items: Arc::new(items),
            failures: Arc::new(HashMap::new()),
            index: 0,
        }
    }

    /// Fails the read of `position` the next `times` times without moving
    /// past it, like a transient source error.
    #[must_use]
    pub fn fail_at(self, position: usize, error: ItemError, times: usize) -> Self {
        self.script(position, ScriptedFailure::new(error, times), false)
    }

    /// Makes `position` an unreadable record: the first read fails and moves
    /// past it.
    #[must_use]
    pub fn corrupt_at(self, position: usize, error: ItemError) -> Self {
        self.script(position, ScriptedFailure::new(error, 1), true)
    }

    fn script(mut self, position: usize, failure: ScriptedFailure, consume: bool) -> Self {
        let mut failures = HashMap::new();
        if let Some(existing) = Arc::get_mut(&mut self.failures) {
            failures.extend(existing.drain());
        }
        failures.insert(position, (failure, consume));
        self.failures = Arc::new(failures);
        self
    }
}

#[async_trait]
impl<I: Send + Sync> ItemStream for FlakyReader<I> {
    async fn open(&mut self, context: &ExecutionContext) -> Result<(), ItemError> {
        self.index = context
            .get_u64(Self::INDEX_KEY)
            .and_then(|i| usize::try_from(i).ok())
            .unwrap_or(0);
        Ok(())
    }

    async fn update(&mut self, context: &mut ExecutionContext) -> Result<(), ItemError> {
        context.put(Self::INDEX_KEY, self.index as u64);
        Ok(())
    }
}

#[async_trait]
impl<I: Clone + Send + Sync> ItemReader<I> for FlakyReader<I> {
    async fn read(&mut self) -> Result<Option<I>, ItemError> {
        if let Some((failure, consume)) = self.failures.get(&self.index) {
            if let Some(error) = failure.fire() {
                if *consume {
                    self.index += 1;
                }
                return Err(error);
            }
        }
        let item = self.items.get(self.index).cloned();
        if item.is_some() {
            self.index += 1;
        }
        Ok(item)
    }
}

/// Step that fails a scripted number of runs, then succeeds.
#[derive(Debug)]
pub struct ScriptedStep {
    name: String,
    failures_left: AtomicUsize,
    exit_code: Option<String>,
    allow_start_if_complete: bool,
    start_limit: usize,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedStep {
    /// A step that always succeeds.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            failures_left: AtomicUsize::new(0),
            exit_code: None,
            allow_start_if_complete: false,
            start_limit: usize::MAX,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Fails the first `times` runs.
    #[must_use]
    pub fn failing_times(self, times: usize) -> Self {
        self.failures_left.store(times, Ordering::SeqCst);
        self
    }

    /// Completes with a custom exit code.
    #[must_use]
    pub fn with_exit_code(mut self, code: impl Into<String>) -> Self {
        self.exit_code = Some(code.into());
        self
    }

    /// Reruns on restart even when complete.
    #[must_use]
    pub const fn allow_start_if_complete(mut self) -> Self {
        self.allow_start_if_complete = true;
        self
    }

    /// Sets the start limit.
    #[must_use]
    pub const fn with_start_limit(mut self, limit: usize) -> Self {
        self.start_limit = limit;
        self
    }

    /// Sleeps while running.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of runs.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Step for ScriptedStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn start_limit(&self) -> usize {
        self.start_limit
    }

    fn allow_start_if_complete(&self) -> bool {
        self.allow_start_if_complete
    }

    async fn do_execute(&self, execution: &mut StepExecution, _context: &StepContext) -> Result<(), BatchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ItemError::new("test.scripted", format!("{} scripted failure", self.name)).into());
        }
        if let Some(ref code) = self.exit_code {
            execution.exit_status = execution.exit_status.and(&ExitStatus::new(code.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_failing_processor_fires_scripted_times() {
        let processor = FailingProcessor::new()
            .fail_on(3, ItemError::new("parse", "bad"), 1)
            .filter(4);
        assert!(processor.process(&3).await.is_err());
        assert_eq!(processor.process(&3).await.unwrap(), Some(3));
        assert_eq!(processor.process(&4).await.unwrap(), None);
        assert_eq!(processor.calls(), 3);
    }

    #[tokio::test]
    async fn test_recording_writer_shares_storage() {
        let writer = RecordingWriter::new().fail_on_item(9, ItemError::new("db", "x"), 1);
        let mut handle = writer.clone();
        assert!(handle.write(&[8, 9]).await.is_err());
        handle.write(&[8, 9]).await.unwrap();
        assert_eq!(writer.written(), vec![8, 9]);
        assert_eq!(writer.chunk_sizes(), vec![2]);
    }

    #[tokio::test]
    async fn test_flaky_reader_positions() {
        let mut reader = FlakyReader::new(vec!['a', 'b', 'c', 'd'])
            .fail_at(1, ItemError::new("io.timeout", "x"), 1)
            .corrupt_at(2, ItemError::new("parse", "y"));
        reader.open(&ExecutionContext::new()).await.unwrap();
        assert_eq!(reader.read().await.unwrap(), Some('a'));
        assert!(reader.read().await.is_err());
        assert_eq!(reader.read().await.unwrap(), Some('b'));
        assert!(reader.read().await.is_err());
        assert_eq!(reader.read().await.unwrap(), Some('d'));
        assert_eq!(reader.read().await.unwrap(), None);
    }
}
