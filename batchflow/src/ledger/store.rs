//! Ledger storage contract and the in-memory reference store.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::core::{
    ContextOwner, ExecutionContext, JobExecution, JobInstance, JobParameters, StepExecution,
};
use crate::errors::LedgerError;

/// Persistence contract for execution entities.
///
/// Implementations must enforce two uniqueness rules atomically:
/// `(job_name, job_key)` identifies at most one [`JobInstance`], and a job
/// instance has at most one running [`JobExecution`].
///
/// Execution contexts are stored separately from the executions that own
/// them; updating an execution never writes its context.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Finds a job instance by name and key.
    async fn find_job_instance(
        &self,
        job_name: &str,
        job_key: &str,
    ) -> Result<Option<JobInstance>, LedgerError>;

    /// Creates a job instance; fails with `DuplicateInstance` if one exists.
    async fn create_job_instance(
        &self,
        job_name: &str,
        job_key: &str,
    ) -> Result<JobInstance, LedgerError>;

    /// Returns a job instance by id.
    async fn get_job_instance(&self, instance_id: u64) -> Result<Option<JobInstance>, LedgerError>;

    /// Lists the instances of a job, newest first.
    async fn find_job_instances(&self, job_name: &str) -> Result<Vec<JobInstance>, LedgerError>;

    /// Creates a job execution; fails with `RunningExecutionExists` if the
    /// instance already has a running execution.
    async fn create_job_execution(
        &self,
        instance_id: u64,
        parameters: &JobParameters,
    ) -> Result<JobExecution, LedgerError>;

    /// Writes status, exit status, timestamps and failures of a job execution.
    async fn update_job_execution(&self, execution: &JobExecution) -> Result<(), LedgerError>;

    /// Returns a job execution (without step executions) by id.
    async fn get_job_execution(&self, execution_id: u64)
        -> Result<Option<JobExecution>, LedgerError>;

    /// Lists the executions of an instance in creation order.
    async fn find_job_executions(&self, instance_id: u64) -> Result<Vec<JobExecution>, LedgerError>;

    /// Creates a step execution under a job execution.
    async fn create_step_execution(
        &self,
        job_execution_id: u64,
        step_name: &str,
    ) -> Result<StepExecution, LedgerError>;

    /// Writes status, counts, timestamps and failures of a step execution.
    async fn update_step_execution(&self, execution: &StepExecution) -> Result<(), LedgerError>;

    /// Returns a step execution by id.
    async fn get_step_execution(
        &self,
        step_execution_id: u64,
    ) -> Result<Option<StepExecution>, LedgerError>;

    /// Lists the step executions of a job execution in creation order.
    async fn find_step_executions(
        &self,
        job_execution_id: u64,
    ) -> Result<Vec<StepExecution>, LedgerError>;

    /// Persists an execution context.
    async fn save_execution_context(
        &self,
        owner: ContextOwner,
        context: &ExecutionContext,
    ) -> Result<(), LedgerError>;

    /// Loads an execution context; empty if never saved.
    async fn get_execution_context(&self, owner: ContextOwner)
        -> Result<ExecutionContext, LedgerError>;
}

#[derive(Debug, Default)]
struct LedgerTables {
    next_id: u64,
    instances: BTreeMap<u64, JobInstance>,
    instance_keys: HashMap<(String, String), u64>,
    job_executions: BTreeMap<u64, JobExecution>,
    step_executions: BTreeMap<u64, StepExecution>,
    contexts: HashMap<ContextOwner, ExecutionContext>,
}

impl LedgerTables {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn context(&self, owner: ContextOwner) -> ExecutionContext {
        let mut context = self.contexts.get(&owner).cloned().unwrap_or_default();
        context.clear_dirty();
        context
    }
}

/// In-memory ledger store.
///
/// All tables live behind a single lock so the uniqueness checks in
/// `create_job_instance` and `create_job_execution` are atomic.
#[derive(Debug, Default, Clone)]
pub struct InMemoryLedgerStore {
    tables: Arc<Mutex<LedgerTables>>,
}

impl InMemoryLedgerStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of job instances.
    #[must_use]
    pub fn job_instance_count(&self) -> usize {
        self.tables.lock().instances.len()
    }

    /// Returns the number of job executions.
    #[must_use]
    pub fn job_execution_count(&self) -> usize {
        self.tables.lock().job_executions.len()
    }

    /// Clears all tables.
    pub fn clear(&self) {
        *self.tables.lock() = LedgerTables::default();
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn find_job_instance(
        &self,
        job_name: &str,
        job_key: &str,
    ) -> Result<Option<JobInstance>, LedgerError> {
        let tables = self.tables.lock();
        Ok(tables
            .instance_keys
            .get(&(job_name.to_string(), job_key.to_string()))
            .and_then(|id| tables.instances.get(id))
            .cloned())
    }

    async fn create_job_instance(
        &self,
        job_name: &str,
        job_key: &str,
    ) -> Result<JobInstance, LedgerError> {
        let mut tables = self.tables.lock();
        let key = (job_name.to_string(), job_key.to_string());
        if tables.instance_keys.contains_key(&key) {
            return Err(LedgerError::DuplicateInstance {
                job_name: job_name.to_string(),
                job_key: job_key.to_string(),
            });
        }
        let id = tables.next_id();
        let instance = JobInstance {
            id,
            job_name: job_name.to_string(),
            job_key: job_key.to_string(),
        };
        tables.instance_keys.insert(key, id);
        tables.instances.insert(id, instance.clone());
        Ok(instance)
    }

    async fn get_job_instance(&self, instance_id: u64) -> Result<Option<JobInstance>, LedgerError> {
        Ok(self.tables.lock().instances.get(&instance_id).cloned())
    }

    async fn find_job_instances(&self, job_name: &str) -> Result<Vec<JobInstance>, LedgerError> {
        Ok(self
            .tables
            .lock()
            .instances
            .values()
            .rev()
            .filter(|i| i.job_name == job_name)
            .cloned()
            .collect())
    }

    async fn create_job_execution(
        &self,
        instance_id: u64,
        parameters: &JobParameters,
    ) -> Result<JobExecution, LedgerError> {
        let mut tables = self.tables.lock();
        let instance = tables
            .instances
            .get(&instance_id)
            .cloned()
            .ok_or(LedgerError::NotFound {
                entity: "job_instance",
                id: instance_id,
            })?;
        if let Some(running) = tables
            .job_executions
            .values()
            .find(|e| e.job_instance.id == instance_id && e.status.is_running())
        {
            return Err(LedgerError::RunningExecutionExists {
                instance_id,
                execution_id: running.id,
            });
        }
        let id = tables.next_id();
        let mut execution = JobExecution::new(id, instance, parameters.clone());
        execution.last_updated = Some(Utc::now());
        tables.job_executions.insert(id, execution.clone());
        Ok(execution)
    }

    async fn update_job_execution(&self, execution: &JobExecution) -> Result<(), LedgerError> {
        let mut tables = self.tables.lock();
        let stored = tables
            .job_executions
            .get_mut(&execution.id)
            .ok_or(LedgerError::NotFound {
                entity: "job_execution",
                id: execution.id,
            })?;
        let mut record = execution.clone();
        record.step_executions.clear();
        record.execution_context = ExecutionContext::new();
        *stored = record;
        Ok(())
    }

    async fn get_job_execution(
        &self,
        execution_id: u64,
    ) -> Result<Option<JobExecution>, LedgerError> {
        let tables = self.tables.lock();
        Ok(tables.job_executions.get(&execution_id).map(|e| {
            let mut execution = e.clone();
            execution.execution_context = tables.context(ContextOwner::Job(execution_id));
            execution
        }))
    }

    async fn find_job_executions(&self, instance_id: u64) -> Result<Vec<JobExecution>, LedgerError> {
        let tables = self.tables.lock();
        Ok(tables
            .job_executions
            .values()
            .filter(|e| e.job_instance.id == instance_id)
            .map(|e| {
                let mut execution = e.clone();
                execution.execution_context = tables.context(ContextOwner::Job(e.id));
                execution
            })
            .collect())
    }

    async fn create_step_execution(
        &self,
        job_execution_id: u64,
        step_name: &str,
    ) -> Result<StepExecution, LedgerError> {
        let mut tables = self.tables.lock();
        if !tables.job_executions.contains_key(&job_execution_id) {
            return Err(LedgerError::NotFound {
                entity: "job_execution",
                id: job_execution_id,
            });
        }
        let id = tables.next_id();
        let mut execution = StepExecution::new(id, job_execution_id, step_name);
        execution.last_updated = Some(Utc::now());
        tables.step_executions.insert(id, execution.clone());
        Ok(execution)
    }

    async fn update_step_execution(&self, execution: &StepExecution) -> Result<(), LedgerError> {
        let mut tables = self.tables.lock();
        let stored = tables
            .step_executions
            .get_mut(&execution.id)
            .ok_or(LedgerError::NotFound {
                entity: "step_execution",
                id: execution.id,
            })?;
        let mut record = execution.clone();
        record.execution_context = ExecutionContext::new();
        *stored = record;
        Ok(())
    }

    async fn get_step_execution(
        &self,
        step_execution_id: u64,
    ) -> Result<Option<StepExecution>, LedgerError> {
        let tables = self.tables.lock();
        Ok(tables.step_executions.get(&step_execution_id).map(|s| {
            let mut execution = s.clone();
            execution.execution_context = tables.context(ContextOwner::Step(step_execution_id));
            execution
        }))
    }

    async fn find_step_executions(
        &self,
        job_execution_id: u64,
    ) -> Result<Vec<StepExecution>, LedgerError> {
        let tables = self.tables.lock();
        Ok(tables
            .step_executions
            .values()
            .filter(|s| s.job_execution_id == job_execution_id)
            .map(|s| {
                let mut execution = s.clone();
                execution.execution_context = tables.context(ContextOwner::Step(s.id));
                execution
            })
            .collect())
    }

    async fn save_execution_context(
        &self,
        owner: ContextOwner,
        context: &ExecutionContext,
    ) -> Result<(), LedgerError> {
        let mut tables = self.tables.lock();
        let exists = match owner {
            ContextOwner::Job(id) => tables.job_executions.contains_key(&id),
            ContextOwner::Step(id) => tables.step_executions.contains_key(&id),
        };
        if !exists {
            let (entity, id) = match owner {
                ContextOwner::Job(id) => ("job_execution", id),
                ContextOwner::Step(id) => ("step_execution", id),
            };
            return Err(LedgerError::NotFound { entity, id });
        }
        tables.contexts.insert(owner, context.clone());
        Ok(())
    }

    async fn get_execution_context(
        &self,
        owner: ContextOwner,
    ) -> Result<ExecutionContext, LedgerError> {
        Ok(self.tables.lock().context(owner))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::BatchStatus;

    #[tokio::test]
    async fn test_instance_uniqueness() {
        let store = InMemoryLedgerStore::new();
        let first = store.create_job_instance("import", "k1").await.unwrap();
        let dup = store.create_job_instance("import", "k1").await;
        assert!(matches!(dup, Err(LedgerError::DuplicateInstance { .. })));

        let found = store.find_job_instance("import", "k1").await.unwrap();
        assert_eq!(found, Some(first));
        assert!(store.find_job_instance("import", "k2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_single_running_execution_per_instance() {
        let store = InMemoryLedgerStore::new();
        let instance = store.create_job_instance("import", "k").await.unwrap();
        let params = JobParameters::new();

        let mut first = store.create_job_execution(instance.id, &params).await.unwrap();
        let second = store.create_job_execution(instance.id, &params).await;
        assert!(matches!(
            second,
            Err(LedgerError::RunningExecutionExists { execution_id, .. }) if execution_id == first.id
        ));

        first.status = BatchStatus::Failed;
        store.update_job_execution(&first).await.unwrap();
        assert!(store.create_job_execution(instance.id, &params).await.is_ok());
        assert_eq!(store.find_job_executions(instance.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_update_does_not_persist_context() {
        let store = InMemoryLedgerStore::new();
        let instance = store.create_job_instance("import", "k").await.unwrap();
        let job = store
            .create_job_execution(instance.id, &JobParameters::new())
            .await
            .unwrap();
        let mut step = store.create_step_execution(job.id, "load").await.unwrap();

        step.execution_context.put("reader.index", 4u64);
        step.write_count = 4;
        store.update_step_execution(&step).await.unwrap();

        let loaded = store.get_step_execution(step.id).await.unwrap().unwrap();
        assert_eq!(loaded.write_count, 4);
        assert!(loaded.execution_context.is_empty());

        store
            .save_execution_context(ContextOwner::Step(step.id), &step.execution_context)
            .await
            .unwrap();
        let loaded = store.get_step_execution(step.id).await.unwrap().unwrap();
        assert_eq!(loaded.execution_context.get_u64("reader.index"), Some(4));
    }

    #[tokio::test]
    async fn test_missing_entities() {
        let store = InMemoryLedgerStore::new();
        assert!(matches!(
            store.create_step_execution(99, "x").await,
            Err(LedgerError::NotFound { entity: "job_execution", id: 99 })
        ));
        assert!(store
            .save_execution_context(ContextOwner::Step(5), &ExecutionContext::new())
            .await
            .is_err());
    }
}
