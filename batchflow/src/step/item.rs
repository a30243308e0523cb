//! Item reader, processor and writer contracts.

use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::core::ExecutionContext;
use crate::errors::ItemError;

/// Open/update/close hooks for stateful readers and writers.
///
/// `open` receives the step's context (restored from the ledger on restart);
/// `update` writes the current position into it right after every commit.
#[async_trait]
pub trait ItemStream: Send {
    /// Prepares the stream, restoring any saved position.
    async fn open(&mut self, _context: &ExecutionContext) -> Result<(), ItemError> {
        Ok(())
    }

    /// Records the current position.
    async fn update(&mut self, _context: &mut ExecutionContext) -> Result<(), ItemError> {
        Ok(())
    }

    /// Releases resources.
    async fn close(&mut self) -> Result<(), ItemError> {
        Ok(())
    }
}

/// Source of items. `Ok(None)` signals the end of input.
#[async_trait]
pub trait ItemReader<I>: ItemStream {
    /// Reads the next item.
    async fn read(&mut self) -> Result<Option<I>, ItemError>;
}

/// Transforms an item. `Ok(None)` filters the item out.
#[async_trait]
pub trait ItemProcessor<I, O>: Send + Sync {
    /// Processes one item.
    async fn process(&self, item: &I) -> Result<Option<O>, ItemError>;
}

/// Sink for a committed chunk of items.
#[async_trait]
pub trait ItemWriter<O>: ItemStream {
    /// Writes a chunk; called once per transaction.
    async fn write(&mut self, items: &[O]) -> Result<(), ItemError>;
}

/// Processor that returns every item unchanged.
pub struct PassThroughItemProcessor<I> {
    _marker: PhantomData<fn() -> I>,
}

impl<I> Default for PassThroughItemProcessor<I> {
    fn default() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<I> PassThroughItemProcessor<I> {
    /// Creates the processor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl<I> fmt::Debug for PassThroughItemProcessor<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PassThroughItemProcessor")
    }
}

#[async_trait]
impl<I: Clone + Send + Sync> ItemProcessor<I, I> for PassThroughItemProcessor<I> {
    async fn process(&self, item: &I) -> Result<Option<I>, ItemError> {
        Ok(Some(item.clone()))
    }
}

/// Processor backed by an async function.
pub struct FunctionItemProcessor<I, O, F> {
    function: F,
    _marker: PhantomData<fn(I) -> O>,
}

impl<I, O, F> FunctionItemProcessor<I, O, F> {
    /// Wraps `function`.
    #[must_use]
    pub const fn new(function: F) -> Self {
        Self {
            function,
            _marker: PhantomData,
        }
    }
}

impl<I, O, F> fmt::Debug for FunctionItemProcessor<I, O, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FunctionItemProcessor")
    }
}

#[async_trait]
impl<I, O, F, Fut> ItemProcessor<I, O> for FunctionItemProcessor<I, O, F>
where
    I: Clone + Send + Sync + 'static,
    O: Send + 'static,
    F: Fn(I) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<O>, ItemError>> + Send,
{
    async fn process(&self, item: &I) -> Result<Option<O>, ItemError> {
        (self.function)(item.clone()).await
    }
}

/// Restartable reader over an in-memory list.
///
/// Its position is stored under `<name>.index`.
#[derive(Debug, Clone)]
pub struct ListItemReader<I> {
    name: String,
    items: Arc<Vec<I>>,
    index: usize,
}

impl<I> ListItemReader<I> {
    /// Creates a reader named `list.reader`.
    #[must_use]
    pub fn new(items: Vec<I>) -> Self {
        Self::shared(Arc::new(items))
    }

    /// Creates a reader over a shared list.
    #[must_use]
    pub fn shared(items: Arc<Vec<I>>) -> Self {
        Self {
            name: "list.reader".to_string(),
            items,
            index: 0,
        }
    }

    /// Sets the name used for the context key.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn index_key(&self) -> String {
        format!("{}.index", self.name)
    }

    /// Current position.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.index
    }
}

#[async_trait]
impl<I: Send + Sync> ItemStream for ListItemReader<I> {
    async fn open(&mut self, context: &ExecutionContext) -> Result<(), ItemError> {
        let saved = context.get_u64(&self.index_key()).unwrap_or(0);
        self.index = usize::try_from(saved)
            .map_err(|_| ItemError::new("batch.reader.position", "saved position out of range"))?;
        Ok(())
    }

    async fn update(&mut self, context: &mut ExecutionContext) -> Result<(), ItemError> {
        context.put(self.index_key(), self.index as u64);
        Ok(())
    }
}

#[async_trait]
impl<I: Clone + Send + Sync> ItemReader<I> for ListItemReader<I> {
    async fn read(&mut self) -> Result<Option<I>, ItemError> {
        let item = self.items.get(self.index).cloned();
        if item.is_some() {
            self.index += 1;
        }
        Ok(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_reader_reads_then_ends() {
        let mut reader = ListItemReader::new(vec![1, 2]);
        reader.open(&ExecutionContext::new()).await.unwrap();
        assert_eq!(reader.read().await.unwrap(), Some(1));
        assert_eq!(reader.read().await.unwrap(), Some(2));
        assert_eq!(reader.read().await.unwrap(), None);
        assert_eq!(reader.read().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_list_reader_restores_position() {
        let mut reader = ListItemReader::new(vec!['a', 'b', 'c']).with_name("letters");
        reader.open(&ExecutionContext::new()).await.unwrap();
        reader.read().await.unwrap();
        let mut ctx = ExecutionContext::new();
        reader.update(&mut ctx).await.unwrap();
        assert_eq!(ctx.get_u64("letters.index"), Some(1));

        let mut restarted = ListItemReader::new(vec!['a', 'b', 'c']).with_name("letters");
        restarted.open(&ctx).await.unwrap();
        assert_eq!(restarted.read().await.unwrap(), Some('b'));
    }

    #[tokio::test]
    async fn test_processors() {
        let pass = PassThroughItemProcessor::new();
        assert_eq!(pass.process(&5).await.unwrap(), Some(5));

        let evens = FunctionItemProcessor::new(|n: u32| async move {
            Ok(if n % 2 == 0 { Some(n * 10) } else { None })
        });
        assert_eq!(evens.process(&2).await.unwrap(), Some(20));
        assert_eq!(evens.process(&3).await.unwrap(), None);
    }
}
