//! Steps: the step lifecycle, item contracts, the chunk-oriented processor
//! with its skip/retry fault tolerance, and tasklet steps.

mod chunk;
mod config;
mod item;
mod lifecycle;
mod listener;
mod skip;
mod tasklet;
mod transaction;

pub use chunk::{ChunkPhase, ChunkStep, ChunkStepBuilder, ReaderFactory, WriterFactory, SCAN_OFFSET_KEY};
pub use config::ChunkStepConfig;
pub use item::{
    FunctionItemProcessor, ItemProcessor, ItemReader, ItemStream, ItemWriter, ListItemReader,
    PassThroughItemProcessor,
};
pub use lifecycle::{execute_step, Step, StepContext};
pub use listener::{BatchListener, CollectingListener, CompositeListener, LoggingListener};
pub use skip::{FailureClass, SkipClassifier, SkipClassifierBuilder, SkipPhase};
pub use tasklet::{CallableTasklet, Tasklet, TaskletStep, TaskletStepBuilder};
pub use transaction::{ResourcelessTransactionManager, Transaction, TransactionManager};
