//! Registry of job definitions by name.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

use super::definition::Job;
use crate::errors::{BatchError, ConfigValidationError};

/// Owned registry the operator looks jobs up in.
#[derive(Debug, Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<DashMap<String, Arc<Job>>>,
}

impl JobRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a job; names must be unique.
    pub fn register(&self, job: Arc<Job>) -> Result<(), BatchError> {
        let name = job.name().to_string();
        match self.jobs.entry(name.clone()) {
            Entry::Occupied(_) => Err(ConfigValidationError::with_code(
                "CONFIG-011-DUPLICATE_JOB",
                format!("a job named '{name}' is already registered"),
            )
            .into()),
            Entry::Vacant(slot) => {
                slot.insert(job);
                debug!(job = %name, "Registered job");
                Ok(())
            }
        }
    }

    /// Removes a job.
    pub fn unregister(&self, name: &str) -> Option<Arc<Job>> {
        self.jobs.remove(name).map(|(_, job)| job)
    }

    /// Looks a job up.
    pub fn get(&self, name: &str) -> Result<Arc<Job>, BatchError> {
        self.jobs
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| BatchError::NoSuchJob(name.to_string()))
    }

    /// Registered job names, sorted.
    #[must_use]
    pub fn job_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.jobs.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    /// Number of registered jobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedStep;

    fn job(name: &str) -> Arc<Job> {
        Arc::new(Job::builder(name).step(Arc::new(ScriptedStep::new("s"))).build().unwrap())
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = JobRegistry::new();
        registry.register(job("b")).unwrap();
        registry.register(job("a")).unwrap();
        assert_eq!(registry.job_names(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(registry.get("a").unwrap().name(), "a");
        assert!(matches!(registry.get("zzz"), Err(BatchError::NoSuchJob(_))));
    }

    #[test]
    fn test_duplicate_rejected() {
        let registry = JobRegistry::new();
        registry.register(job("a")).unwrap();
        tokio_test::assert_err!(registry.register(job("a")));
        assert!(registry.unregister("a").is_some());
        assert!(registry.is_empty());
    }
}
