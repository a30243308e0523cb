//! Chunk-oriented step: read items into a chunk, process and write the
//! chunk in one transaction, checkpoint, repeat.
//!
//! Failures are resolved per [`SkipClassifier`]: retryable failures replay
//! the chunk under the retry policy, skippable failures roll the chunk back
//! and replay it one item per transaction ("scan") to isolate the bad item,
//! everything else fails the step.
//!
//! While scanning, each committed item records how many reader positions of
//! the chunk it covers under [`SCAN_OFFSET_KEY`]. Successful reads and
//! skipped reads both consume a position. A restart reopens the reader at
//! the chunk start and discards that many positions, so no item is written
//! twice.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::config::ChunkStepConfig;
use super::item::{ItemProcessor, ItemReader, ItemWriter};
use super::lifecycle::{Step, StepContext};
use super::listener::{BatchListener, CompositeListener};
use super::skip::{FailureClass, SkipClassifier, SkipPhase};
use super::transaction::{ResourcelessTransactionManager, Transaction, TransactionManager};
use crate::core::{BatchStatus, ExecutionContext, ExitStatus, StepContribution, StepExecution};
use crate::errors::{BatchError, ConfigValidationError, ItemError};
use crate::repeat::{
    CompositeCompletionPolicy, RepeatCallback, RepeatContext, RepeatStatus, RepeatTemplate,
    SimpleCompletionPolicy, TimeoutTerminationPolicy,
};
use crate::retry::{RetryContext, RetryDecision, RetryTemplate, SimpleRetryPolicy};

/// Context key holding the number of reader positions of the current chunk
/// already committed by a scan.
pub const SCAN_OFFSET_KEY: &str = "batch.chunk.scan_offset";

/// Creates a reader for a step execution, given its (restored) context.
pub type ReaderFactory<I> = Arc<dyn Fn(&ExecutionContext) -> Box<dyn ItemReader<I>> + Send + Sync>;

/// Creates a writer for a step execution, given its (restored) context.
pub type WriterFactory<O> = Arc<dyn Fn(&ExecutionContext) -> Box<dyn ItemWriter<O>> + Send + Sync>;

/// Where the chunk loop is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkPhase {
    /// Reading items into the chunk.
    Filling,
    /// Processing and writing the chunk.
    Committing,
    /// Rolling back and retrying or scanning.
    Recovering,
    /// Input exhausted.
    Done,
}

enum Resolution {
    Retry(Duration),
    Skip,
    Fatal,
}

struct ChunkFailure {
    error: ItemError,
    phase: SkipPhase,
    index: Option<usize>,
}

impl ChunkFailure {
    const fn new(error: ItemError, phase: SkipPhase, index: Option<usize>) -> Self {
        Self { error, phase, index }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Written {
    written: u64,
    filtered: u64,
}

struct Chunk<I> {
    items: Vec<I>,
    /// Reader position of each item, counted from the chunk start.
    positions: Vec<u64>,
    contribution: StepContribution,
    discard: u64,
    consumed: u64,
}

impl<I> Chunk<I> {
    fn new(capacity: usize, discard: u64) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            positions: Vec::with_capacity(capacity),
            contribution: StepContribution::default(),
            discard,
            consumed: 0,
        }
    }

    /// Consumes one reader position; true if it was committed before a
    /// restart and must be dropped.
    fn consume_position(&mut self) -> bool {
        self.consumed += 1;
        if self.discard > 0 {
            self.discard -= 1;
            true
        } else {
            false
        }
    }

    fn push(&mut self, item: I) {
        self.positions.push(self.consumed - 1);
        self.contribution.read_count += 1;
        self.items.push(item);
    }
}

/// A step that moves items from a reader through a processor into a writer
/// in chunk transactions.
pub struct ChunkStep<I, O> {
    name: String,
    config: ChunkStepConfig,
    reader_factory: ReaderFactory<I>,
    processor: Arc<dyn ItemProcessor<I, O>>,
    writer_factory: WriterFactory<O>,
    transaction_manager: Arc<dyn TransactionManager>,
    classifier: SkipClassifier,
    retry: RetryTemplate,
    chunk_template: RepeatTemplate<BatchError>,
    listeners: CompositeListener,
}

impl<I, O> fmt::Debug for ChunkStep<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkStep")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("listeners", &self.listeners)
            .finish_non_exhaustive()
    }
}

impl<I, O> ChunkStep<I, O>
where
    I: Send + Sync + 'static,
    O: Send + Sync + 'static,
{
    /// Starts a builder.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> ChunkStepBuilder<I, O> {
        ChunkStepBuilder::new(name)
    }

    /// The configuration.
    #[must_use]
    pub const fn config(&self) -> &ChunkStepConfig {
        &self.config
    }

    async fn run_chunks(
        &self,
        reader: &mut dyn ItemReader<I>,
        writer: &mut dyn ItemWriter<O>,
        execution: &mut StepExecution,
        context: &StepContext,
    ) -> Result<(), BatchError> {
        let mut pending_discard = execution.execution_context.get_u64(SCAN_OFFSET_KEY).unwrap_or(0);
        if pending_discard > 0 {
            info!(
                step = %execution.step_name,
                items = pending_discard,
                "Resuming inside a partially scanned chunk"
            );
        }

        loop {
            if context.is_stop_requested(execution).await? {
                execution.status = BatchStatus::Stopped;
                execution.exit_status = execution.exit_status.and(&ExitStatus::stopped());
                info!(step = %execution.step_name, "Stop requested, ending at chunk boundary");
                return Ok(());
            }

            self.listeners.before_chunk(execution).await;
            let mut chunk = Chunk::new(self.config.commit_interval, pending_discard);
            let filled = {
                let mut filler = ChunkFiller {
                    step: self,
                    reader: &mut *reader,
                    chunk: &mut chunk,
                    execution: &*execution,
                };
                self.chunk_template.iterate(&mut filler).await
            };
            pending_discard = chunk.discard;

            let status = match filled {
                Ok(status) => status,
                Err(e) => {
                    execution.apply_contribution(&chunk.contribution);
                    return Err(e);
                }
            };
            debug!(
                step = %execution.step_name,
                phase = ?ChunkPhase::Filling,
                items = chunk.items.len(),
                "Chunk read"
            );

            if chunk.items.is_empty() {
                execution.apply_contribution(&chunk.contribution);
            } else {
                self.commit_chunk(&mut chunk, reader, writer, execution, context)
                    .await?;
                self.listeners.after_chunk(execution).await;
            }

            if status == RepeatStatus::Finished {
                debug!(step = %execution.step_name, phase = ?ChunkPhase::Done, "Input exhausted");
                return Ok(());
            }
        }
    }

    /// Reads one item, resolving read failures in place. A skipped read
    /// consumes a reader position.
    async fn read_item(
        &self,
        reader: &mut dyn ItemReader<I>,
        chunk: &mut Chunk<I>,
        execution: &StepExecution,
    ) -> Result<Option<I>, BatchError> {
        let mut retry = RetryContext::new();
        loop {
            retry.begin_attempt();
            let error = match reader.read().await {
                Ok(item) => return Ok(item),
                Err(e) => e,
            };
            let skips = execution.skip_count() + chunk.contribution.skip_count();
            match self.resolve(&mut retry, &error, skips) {
                Resolution::Retry(delay) => {
                    self.listeners.on_retry(execution, retry.attempts(), &error).await;
                    pause(delay).await;
                }
                Resolution::Skip => {
                    chunk.consume_position();
                    chunk.contribution.read_skip_count += 1;
                    self.listeners.on_skip(execution, SkipPhase::Read, &error).await;
                    retry = RetryContext::new();
                }
                Resolution::Fatal => return Err(self.classifier.fatal_error(error)),
            }
        }
    }

    async fn commit_chunk(
        &self,
        chunk: &mut Chunk<I>,
        reader: &mut dyn ItemReader<I>,
        writer: &mut dyn ItemWriter<O>,
        execution: &mut StepExecution,
        context: &StepContext,
    ) -> Result<(), BatchError> {
        let mut retry = RetryContext::new();
        loop {
            retry.begin_attempt();
            match self.write_items(&chunk.items, writer).await {
                Ok(done) => {
                    chunk.contribution.write_count += done.written;
                    chunk.contribution.filter_count += done.filtered;
                    execution.apply_contribution(&chunk.contribution);
                    execution.commit_count += 1;
                    debug!(
                        step = %execution.step_name,
                        phase = ?ChunkPhase::Committing,
                        written = done.written,
                        filtered = done.filtered,
                        "Chunk committed"
                    );
                    return self.checkpoint(reader, writer, execution, context).await;
                }
                Err(failure) => {
                    execution.rollback_count += 1;
                    self.listeners.after_chunk_error(execution, &failure.error).await;
                    let skips = execution.skip_count() + chunk.contribution.skip_count();
                    match self.resolve(&mut retry, &failure.error, skips) {
                        Resolution::Retry(delay) => {
                            warn!(
                                step = %execution.step_name,
                                phase = ?ChunkPhase::Recovering,
                                attempt = retry.attempts(),
                                error = %failure.error,
                                "Chunk rolled back, retrying"
                            );
                            self.listeners.on_retry(execution, retry.attempts(), &failure.error).await;
                            pause(delay).await;
                        }
                        Resolution::Skip => {
                            execution.apply_contribution(&chunk.contribution);
                            return self
                                .scan(chunk, failure, reader, writer, execution, context)
                                .await;
                        }
                        Resolution::Fatal => {
                            execution.apply_contribution(&chunk.contribution);
                            return Err(self.classifier.fatal_error(failure.error));
                        }
                    }
                }
            }
        }
    }

    /// Replays a rolled-back chunk one item per transaction.
    async fn scan(
        &self,
        chunk: &Chunk<I>,
        failure: ChunkFailure,
        reader: &mut dyn ItemReader<I>,
        writer: &mut dyn ItemWriter<O>,
        execution: &mut StepExecution,
        context: &StepContext,
    ) -> Result<(), BatchError> {
        info!(
            step = %execution.step_name,
            phase = ?ChunkPhase::Recovering,
            items = chunk.items.len(),
            error = %failure.error,
            "Scanning chunk item by item"
        );
        let known_faulty = match (failure.phase, failure.index) {
            (SkipPhase::Process, Some(index)) => Some((index, failure.error)),
            _ => None,
        };

        for (index, (item, position)) in chunk.items.iter().zip(&chunk.positions).enumerate() {
            if let Some((faulty, ref error)) = known_faulty {
                if faulty == index {
                    match self.classifier.classify_exhausted(error, execution.skip_count()) {
                        FailureClass::Skip => {
                            self.record_skip(execution, SkipPhase::Process, error).await;
                            continue;
                        }
                        FailureClass::Retry | FailureClass::Fatal => {
                            return Err(self.classifier.fatal_error(error.clone()));
                        }
                    }
                }
            }
            self.scan_item(position + 1, item, writer, execution, context)
                .await?;
        }

        self.checkpoint(reader, writer, execution, context).await
    }

    async fn scan_item(
        &self,
        offset: u64,
        item: &I,
        writer: &mut dyn ItemWriter<O>,
        execution: &mut StepExecution,
        context: &StepContext,
    ) -> Result<(), BatchError> {
        let mut retry = RetryContext::new();
        loop {
            retry.begin_attempt();
            match self.write_items(std::slice::from_ref(item), writer).await {
                Ok(done) => {
                    execution.write_count += done.written;
                    execution.filter_count += done.filtered;
                    execution.commit_count += 1;
                    execution.execution_context.put(SCAN_OFFSET_KEY, offset);
                    context.ledger().update_execution_context(execution).await?;
                    return context.ledger().update_step_execution(execution).await;
                }
                Err(failure) => {
                    execution.rollback_count += 1;
                    match self.resolve(&mut retry, &failure.error, execution.skip_count()) {
                        Resolution::Retry(delay) => {
                            self.listeners.on_retry(execution, retry.attempts(), &failure.error).await;
                            pause(delay).await;
                        }
                        Resolution::Skip => {
                            self.record_skip(execution, failure.phase, &failure.error).await;
                            return Ok(());
                        }
                        Resolution::Fatal => return Err(self.classifier.fatal_error(failure.error)),
                    }
                }
            }
        }
    }

    /// Processes and writes `items` in one transaction.
    async fn write_items(&self, items: &[I], writer: &mut dyn ItemWriter<O>) -> Result<Written, ChunkFailure> {
        let transaction = self
            .transaction_manager
            .begin()
            .await
            .map_err(|e| ChunkFailure::new(e, SkipPhase::Write, None))?;

        let mut outputs = Vec::with_capacity(items.len());
        let mut filtered = 0;
        for (index, item) in items.iter().enumerate() {
            match self.processor.process(item).await {
                Ok(Some(output)) => outputs.push(output),
                Ok(None) => filtered += 1,
                Err(e) => {
                    self.rollback(transaction).await;
                    return Err(ChunkFailure::new(e, SkipPhase::Process, Some(index)));
                }
            }
        }

        if !outputs.is_empty() {
            if let Err(e) = writer.write(&outputs).await {
                self.rollback(transaction).await;
                return Err(ChunkFailure::new(e, SkipPhase::Write, None));
            }
        }

        if let Err(e) = self.transaction_manager.commit(transaction).await {
            self.rollback(transaction).await;
            return Err(ChunkFailure::new(e, SkipPhase::Write, None));
        }
        Ok(Written {
            written: outputs.len() as u64,
            filtered,
        })
    }

    async fn rollback(&self, transaction: Transaction) {
        if let Err(e) = self.transaction_manager.rollback(transaction).await {
            warn!(transaction = transaction.id(), error = %e, "Rollback failed");
        }
    }

    /// Saves reader and writer positions and persists the step.
    async fn checkpoint(
        &self,
        reader: &mut dyn ItemReader<I>,
        writer: &mut dyn ItemWriter<O>,
        execution: &mut StepExecution,
        context: &StepContext,
    ) -> Result<(), BatchError> {
        reader.update(&mut execution.execution_context).await?;
        writer.update(&mut execution.execution_context).await?;
        execution.execution_context.remove(SCAN_OFFSET_KEY);
        context.ledger().update_execution_context(execution).await?;
        context.ledger().update_step_execution(execution).await
    }

    async fn record_skip(&self, execution: &mut StepExecution, phase: SkipPhase, error: &ItemError) {
        match phase {
            SkipPhase::Read => execution.read_skip_count += 1,
            SkipPhase::Process => execution.process_skip_count += 1,
            SkipPhase::Write => execution.write_skip_count += 1,
        }
        info!(
            step = %execution.step_name,
            phase = phase.as_str(),
            error = %error,
            skips = execution.skip_count(),
            "Item skipped"
        );
        self.listeners.on_skip(execution, phase, error).await;
    }

    fn resolve(&self, retry: &mut RetryContext, error: &ItemError, skip_count: u64) -> Resolution {
        match self.classifier.classify(error, skip_count) {
            FailureClass::Retry => {
                retry.register_failure(error);
                match self.retry.decide(retry) {
                    RetryDecision::Retry(delay) => Resolution::Retry(delay),
                    RetryDecision::Exhausted | RetryDecision::NotRetryable => {
                        retry.set_exhausted();
                        match self.classifier.classify_exhausted(error, skip_count) {
                            FailureClass::Skip => Resolution::Skip,
                            FailureClass::Retry | FailureClass::Fatal => Resolution::Fatal,
                        }
                    }
                }
            }
            FailureClass::Skip => Resolution::Skip,
            FailureClass::Fatal => Resolution::Fatal,
        }
    }
}

async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

/// Reads one item per iteration into the chunk.
struct ChunkFiller<'a, I, O> {
    step: &'a ChunkStep<I, O>,
    reader: &'a mut dyn ItemReader<I>,
    chunk: &'a mut Chunk<I>,
    execution: &'a StepExecution,
}

#[async_trait]
impl<'a, I, O> RepeatCallback<BatchError> for ChunkFiller<'a, I, O>
where
    I: Send + Sync + 'static,
    O: Send + Sync + 'static,
{
    async fn do_in_iteration(&mut self, _context: &mut RepeatContext) -> Result<RepeatStatus, BatchError> {
        loop {
            let read = self
                .step
                .read_item(&mut *self.reader, &mut *self.chunk, self.execution)
                .await?;
            let Some(item) = read else {
                return Ok(RepeatStatus::Finished);
            };
            if self.chunk.consume_position() {
                continue;
            }
            self.chunk.push(item);
            return Ok(RepeatStatus::Continuable);
        }
    }
}

#[async_trait]
impl<I, O> Step for ChunkStep<I, O>
where
    I: Send + Sync + 'static,
    O: Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn start_limit(&self) -> usize {
        self.config.start_limit.unwrap_or(usize::MAX)
    }

    fn allow_start_if_complete(&self) -> bool {
        self.config.allow_start_if_complete
    }

    fn listener(&self) -> Option<&dyn BatchListener> {
        Some(&self.listeners)
    }

    async fn do_execute(&self, execution: &mut StepExecution, context: &StepContext) -> Result<(), BatchError> {
        let mut reader = (self.reader_factory)(&execution.execution_context);
        let mut writer = (self.writer_factory)(&execution.execution_context);

        reader.open(&execution.execution_context).await?;
        if let Err(e) = writer.open(&execution.execution_context).await {
            if let Err(close) = reader.close().await {
                warn!(step = %execution.step_name, error = %close, "Reader close failed");
            }
            return Err(e.into());
        }

        let result = self
            .run_chunks(reader.as_mut(), writer.as_mut(), execution, context)
            .await;
        let reader_closed = reader.close().await;
        let writer_closed = writer.close().await;
        result?;
        reader_closed?;
        writer_closed?;
        Ok(())
    }
}

/// Builder for [`ChunkStep`]; validates the configuration on `build`.
pub struct ChunkStepBuilder<I, O> {
    name: String,
    config: ChunkStepConfig,
    reader_factory: Option<ReaderFactory<I>>,
    processor: Option<Arc<dyn ItemProcessor<I, O>>>,
    writer_factory: Option<WriterFactory<O>>,
    transaction_manager: Option<Arc<dyn TransactionManager>>,
    listeners: CompositeListener,
}

impl<I, O> fmt::Debug for ChunkStepBuilder<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkStepBuilder")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<I, O> ChunkStepBuilder<I, O>
where
    I: Send + Sync + 'static,
    O: Send + Sync + 'static,
{
    /// Starts a builder with the default configuration.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: ChunkStepConfig::default(),
            reader_factory: None,
            processor: None,
            writer_factory: None,
            transaction_manager: None,
            listeners: CompositeListener::new(),
        }
    }

    /// Replaces the whole configuration.
    #[must_use]
    pub fn config(mut self, config: ChunkStepConfig) -> Self {
        self.config = config;
        self
    }

    /// Items per transaction.
    #[must_use]
    pub const fn commit_interval(mut self, interval: usize) -> Self {
        self.config.commit_interval = interval;
        self
    }

    /// Caps the time spent filling one chunk.
    #[must_use]
    pub fn chunk_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.with_chunk_timeout(timeout);
        self
    }

    /// Skips allowed per step execution.
    #[must_use]
    pub const fn skip_limit(mut self, limit: usize) -> Self {
        self.config.skip_limit = limit;
        self
    }

    /// Registers a skippable kind.
    #[must_use]
    pub fn skip(mut self, kind: impl Into<String>) -> Self {
        self.config.skippable_kinds.push(kind.into());
        self
    }

    /// Registers a retryable kind.
    #[must_use]
    pub fn retry(mut self, kind: impl Into<String>) -> Self {
        self.config.retryable_kinds.push(kind.into());
        self
    }

    /// Registers a fatal kind.
    #[must_use]
    pub fn no_skip(mut self, kind: impl Into<String>) -> Self {
        self.config.fatal_kinds.push(kind.into());
        self
    }

    /// Attempts per chunk or item, first attempt included.
    #[must_use]
    pub const fn retry_limit(mut self, limit: usize) -> Self {
        self.config.retry_limit = limit;
        self
    }

    /// Delay between attempts.
    #[must_use]
    pub const fn backoff(mut self, backoff: crate::retry::BackOffPolicy) -> Self {
        self.config.backoff = backoff;
        self
    }

    /// Starts allowed per job instance.
    #[must_use]
    pub const fn start_limit(mut self, limit: usize) -> Self {
        self.config.start_limit = Some(limit);
        self
    }

    /// Reruns the step on restart even when complete.
    #[must_use]
    pub const fn allow_start_if_complete(mut self, allow: bool) -> Self {
        self.config.allow_start_if_complete = allow;
        self
    }

    /// Sets the reader factory, called once per step execution.
    #[must_use]
    pub fn reader<F, R>(mut self, factory: F) -> Self
    where
        F: Fn(&ExecutionContext) -> R + Send + Sync + 'static,
        R: ItemReader<I> + 'static,
    {
        let factory: ReaderFactory<I> =
            Arc::new(move |context: &ExecutionContext| Box::new(factory(context)) as Box<dyn ItemReader<I>>);
        self.reader_factory = Some(factory);
        self
    }

    /// Sets the processor.
    #[must_use]
    pub fn processor(mut self, processor: impl ItemProcessor<I, O> + 'static) -> Self {
        self.processor = Some(Arc::new(processor));
        self
    }

    /// Sets a shared processor.
    #[must_use]
    pub fn shared_processor(mut self, processor: Arc<dyn ItemProcessor<I, O>>) -> Self {
        self.processor = Some(processor);
        self
    }

    /// Sets the writer factory, called once per step execution.
    #[must_use]
    pub fn writer<F, W>(mut self, factory: F) -> Self
    where
        F: Fn(&ExecutionContext) -> W + Send + Sync + 'static,
        W: ItemWriter<O> + 'static,
    {
        let factory: WriterFactory<O> =
            Arc::new(move |context: &ExecutionContext| Box::new(factory(context)) as Box<dyn ItemWriter<O>>);
        self.writer_factory = Some(factory);
        self
    }

    /// Sets the transaction manager; defaults to a resourceless one.
    #[must_use]
    pub fn transaction_manager(mut self, manager: Arc<dyn TransactionManager>) -> Self {
        self.transaction_manager = Some(manager);
        self
    }

    /// Registers a listener.
    #[must_use]
    pub fn listener(mut self, listener: Arc<dyn BatchListener>) -> Self {
        self.listeners.register(listener);
        self
    }

    /// Validates and builds the step.
    pub fn build(self) -> Result<ChunkStep<I, O>, BatchError> {
        self.config.validate()?;
        let missing = |what: &str| {
            ConfigValidationError::with_code(
                "CONFIG-008-MISSING_COMPONENT",
                format!("chunk step '{}' has no {what}", self.name),
            )
        };
        let reader_factory = self.reader_factory.clone().ok_or_else(|| missing("reader"))?;
        let processor = self.processor.clone().ok_or_else(|| missing("processor"))?;
        let writer_factory = self.writer_factory.clone().ok_or_else(|| missing("writer"))?;

        let classifier = SkipClassifier::builder()
            .fatal(self.config.fatal_kinds.iter().cloned())
            .retryable(self.config.retryable_kinds.iter().cloned())
            .skippable(self.config.skippable_kinds.iter().cloned())
            .skip_limit(self.config.skip_limit)
            .build();
        let retry = RetryTemplate::new()
            .with_retry_policy(SimpleRetryPolicy::new(self.config.retry_limit))
            .with_backoff(self.config.backoff);

        let mut completion =
            CompositeCompletionPolicy::new().with(SimpleCompletionPolicy::new(self.config.commit_interval));
        if let Some(timeout) = self.config.chunk_timeout() {
            completion = completion.with(TimeoutTerminationPolicy::new(timeout));
        }

        Ok(ChunkStep {
            name: self.name,
            config: self.config,
            reader_factory,
            processor,
            writer_factory,
            transaction_manager: self
                .transaction_manager
                .unwrap_or_else(|| Arc::new(ResourcelessTransactionManager::new())),
            classifier,
            retry,
            chunk_template: RepeatTemplate::new().with_completion_policy(completion),
            listeners: self.listeners,
        })
    }
}
