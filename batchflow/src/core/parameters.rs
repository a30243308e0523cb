//! Job parameters, job keys, validation and incrementing.

use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::errors::{ConfigValidationError, ValidationErrorInfo};

/// A typed parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ParameterValue {
    /// A string.
    String(String),
    /// A signed 64-bit integer.
    Long(i64),
    /// A double.
    Double(f64),
    /// A UTC timestamp.
    Date(DateTime<Utc>),
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(v) => f.write_str(v),
            Self::Long(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::Date(v) => f.write_str(&v.to_rfc3339()),
        }
    }
}

/// A parameter value plus whether it contributes to job instance identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobParameter {
    /// The value.
    pub value: ParameterValue,
    /// Whether the parameter is part of the job key.
    pub identifying: bool,
}

/// Ordered map of typed parameters for one launch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobParameters {
    parameters: BTreeMap<String, JobParameter>,
}

impl JobParameters {
    /// Creates an empty parameter set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a builder.
    #[must_use]
    pub fn builder() -> JobParametersBuilder {
        JobParametersBuilder::default()
    }

    /// Returns a parameter.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&JobParameter> {
        self.parameters.get(key)
    }

    /// Returns a string parameter.
    #[must_use]
    pub fn get_string(&self, key: &str) -> Option<&str> {
        match self.parameters.get(key).map(|p| &p.value) {
            Some(ParameterValue::String(v)) => Some(v),
            _ => None,
        }
    }

    /// Returns a long parameter.
    #[must_use]
    pub fn get_long(&self, key: &str) -> Option<i64> {
        match self.parameters.get(key).map(|p| &p.value) {
            Some(ParameterValue::Long(v)) => Some(*v),
            _ => None,
        }
    }

    /// Returns a double parameter.
    #[must_use]
    pub fn get_double(&self, key: &str) -> Option<f64> {
        match self.parameters.get(key).map(|p| &p.value) {
            Some(ParameterValue::Double(v)) => Some(*v),
            _ => None,
        }
    }

    /// Returns a date parameter.
    #[must_use]
    pub fn get_date(&self, key: &str) -> Option<DateTime<Utc>> {
        match self.parameters.get(key).map(|p| &p.value) {
            Some(ParameterValue::Date(v)) => Some(*v),
            _ => None,
        }
    }

    /// Iterates over all parameters in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &JobParameter)> {
        self.parameters.iter()
    }

    /// Iterates over the identifying parameters in key order.
    pub fn identifying(&self) -> impl Iterator<Item = (&String, &JobParameter)> {
        self.parameters.iter().filter(|(_, p)| p.identifying)
    }

    /// Returns true if there are no parameters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Returns the number of parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    /// Deterministic identity key: MD5 over the sorted `key=value;` pairs of
    /// the identifying parameters, hex encoded. Non-identifying parameters
    /// never change the key.
    #[must_use]
    pub fn job_key(&self) -> String {
        let mut hasher = Md5::new();
        for (key, parameter) in self.identifying() {
            hasher.update(format!("{key}={};", parameter.value).as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

/// Builder for [`JobParameters`].
#[derive(Debug, Clone, Default)]
pub struct JobParametersBuilder {
    parameters: BTreeMap<String, JobParameter>,
}

impl JobParametersBuilder {
    /// Starts from an existing parameter set.
    #[must_use]
    pub fn from_parameters(parameters: &JobParameters) -> Self {
        Self {
            parameters: parameters.parameters.clone(),
        }
    }

    /// Adds a parameter with explicit identifying flag.
    #[must_use]
    pub fn add(mut self, key: impl Into<String>, value: ParameterValue, identifying: bool) -> Self {
        self.parameters
            .insert(key.into(), JobParameter { value, identifying });
        self
    }

    /// Adds an identifying string parameter.
    #[must_use]
    pub fn string(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.add(key, ParameterValue::String(value.into()), true)
    }

    /// Adds an identifying long parameter.
    #[must_use]
    pub fn long(self, key: impl Into<String>, value: i64) -> Self {
        self.add(key, ParameterValue::Long(value), true)
    }

    /// Adds an identifying double parameter.
    #[must_use]
    pub fn double(self, key: impl Into<String>, value: f64) -> Self {
        self.add(key, ParameterValue::Double(value), true)
    }

    /// Adds an identifying date parameter.
    #[must_use]
    pub fn date(self, key: impl Into<String>, value: DateTime<Utc>) -> Self {
        self.add(key, ParameterValue::Date(value), true)
    }

    /// Adds a non-identifying string parameter.
    #[must_use]
    pub fn non_identifying_string(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.add(key, ParameterValue::String(value.into()), false)
    }

    /// Builds the parameter set.
    #[must_use]
    pub fn build(self) -> JobParameters {
        JobParameters {
            parameters: self.parameters,
        }
    }
}

/// Checks job parameters before a launch.
pub trait JobParametersValidator: Send + Sync {
    /// Returns an error if the parameters are unacceptable.
    fn validate(&self, parameters: &JobParameters) -> Result<(), ConfigValidationError>;
}

/// Validator with required and optional keys.
///
/// When `optional_keys` is non-empty, any key that is neither required nor
/// optional is rejected.
#[derive(Debug, Clone, Default)]
pub struct DefaultJobParametersValidator {
    required_keys: BTreeSet<String>,
    optional_keys: BTreeSet<String>,
}

impl DefaultJobParametersValidator {
    /// Creates a validator with no constraints.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds required keys.
    #[must_use]
    pub fn with_required<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_keys.extend(keys.into_iter().map(Into::into));
        self
    }

    /// Adds optional keys.
    #[must_use]
    pub fn with_optional<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.optional_keys.extend(keys.into_iter().map(Into::into));
        self
    }
}

impl JobParametersValidator for DefaultJobParametersValidator {
    fn validate(&self, parameters: &JobParameters) -> Result<(), ConfigValidationError> {
        let missing: Vec<&str> = self
            .required_keys
            .iter()
            .filter(|k| parameters.get(k).is_none())
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            let message = format!("Missing required job parameters: {missing:?}");
            return Err(ConfigValidationError::new(message.clone()).with_error_info(
                ValidationErrorInfo::new("PARAMS-001-MISSING", message)
                    .with_fix_hint("Add the missing keys to the launch parameters"),
            ));
        }

        if !self.optional_keys.is_empty() {
            let unexpected: Vec<&str> = parameters
                .iter()
                .map(|(k, _)| k.as_str())
                .filter(|k| !self.required_keys.contains(*k) && !self.optional_keys.contains(*k))
                .collect();
            if !unexpected.is_empty() {
                let message = format!("Unexpected job parameters: {unexpected:?}");
                return Err(ConfigValidationError::with_code("PARAMS-002-UNEXPECTED", message));
            }
        }

        Ok(())
    }
}

/// Produces the parameters for the next instance of a job.
pub trait JobParametersIncrementer: Send + Sync {
    /// Derives the next parameters from the last launch, if any.
    fn next(&self, previous: Option<&JobParameters>) -> JobParameters;
}

/// Increments a long `run.id` parameter.
#[derive(Debug, Clone)]
pub struct RunIdIncrementer {
    key: String,
}

impl Default for RunIdIncrementer {
    fn default() -> Self {
        Self {
            key: "run.id".to_string(),
        }
    }
}

impl RunIdIncrementer {
    /// Creates an incrementer for `run.id`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses a different key.
    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }
}

impl JobParametersIncrementer for RunIdIncrementer {
    fn next(&self, previous: Option<&JobParameters>) -> JobParameters {
        let run_id = previous
            .and_then(|p| p.get_long(&self.key))
            .map_or(1, |id| id + 1);
        let builder = previous.map_or_else(JobParametersBuilder::default, |p| {
            JobParametersBuilder::from_parameters(p)
        });
        builder.long(self.key.clone(), run_id).build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_job_key_is_deterministic_and_order_independent() {
        let a = JobParameters::builder()
            .string("file", "in.csv")
            .long("day", 20)
            .build();
        let b = JobParameters::builder()
            .long("day", 20)
            .string("file", "in.csv")
            .build();
        assert_eq!(a.job_key(), b.job_key());
        assert_eq!(a.job_key().len(), 32);
    }

    #[test]
    fn test_job_key_ignores_non_identifying() {
        let a = JobParameters::builder().string("file", "in.csv").build();
        let b = JobParameters::builder()
            .string("file", "in.csv")
            .non_identifying_string("trace", "abc")
            .build();
        assert_eq!(a.job_key(), b.job_key());

        let c = JobParameters::builder().string("file", "other.csv").build();
        assert_ne!(a.job_key(), c.job_key());
    }

    #[test]
    fn test_empty_parameters_key_is_md5_of_nothing() {
        assert_eq!(JobParameters::new().job_key(), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn test_typed_getters() {
        let when = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let params = JobParameters::builder()
            .string("s", "x")
            .long("l", 7)
            .double("d", 1.5)
            .date("t", when)
            .build();
        assert_eq!(params.get_string("s"), Some("x"));
        assert_eq!(params.get_long("l"), Some(7));
        assert_eq!(params.get_double("d"), Some(1.5));
        assert_eq!(params.get_date("t"), Some(when));
        assert_eq!(params.get_long("s"), None);
    }

    #[test]
    fn test_validator_required_and_optional() {
        let validator = DefaultJobParametersValidator::new()
            .with_required(["input"])
            .with_optional(["limit"]);

        let ok = JobParameters::builder().string("input", "a").long("limit", 3).build();
        assert!(validator.validate(&ok).is_ok());

        let missing = JobParameters::builder().long("limit", 3).build();
        let err = validator.validate(&missing).unwrap_err();
        assert_eq!(err.code(), Some("PARAMS-001-MISSING"));

        let extra = JobParameters::builder().string("input", "a").string("x", "y").build();
        let err = validator.validate(&extra).unwrap_err();
        assert_eq!(err.code(), Some("PARAMS-002-UNEXPECTED"));
    }

    #[test]
    fn test_run_id_incrementer() {
        let incrementer = RunIdIncrementer::new();
        let first = incrementer.next(None);
        assert_eq!(first.get_long("run.id"), Some(1));

        let base = JobParameters::builder().string("input", "a").long("run.id", 4).build();
        let next = incrementer.next(Some(&base));
        assert_eq!(next.get_long("run.id"), Some(5));
        assert_eq!(next.get_string("input"), Some("a"));
        assert_ne!(next.job_key(), base.job_key());
    }
}
