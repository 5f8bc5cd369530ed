//! Job registry for deserializing and executing jobs.
//!
//! The registry maps a job type string (each job's `JOB_TYPE`) to exactly
//! one handler. The runner hands it claimed records; the registry decodes
//! the payload into the concrete job type and calls the handler. Nothing
//! in the payload is inspected to choose the handler.

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::job::{Job, JobRecord};

/// Handles one job type.
///
/// Handlers must be idempotent: delivery is at-least-once. Long waits
/// should select on `cancel` so shutdown can drain.
#[async_trait]
pub trait JobHandler<J: Job>: Send + Sync {
    async fn execute(&self, job: J, cancel: CancellationToken) -> Result<()>;
}

/// Dispatch failures. All of these are permanent for the job in hand.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("handler already registered for job type {0}")]
    DuplicateHandler(&'static str),

    #[error("unknown job type: {0}")]
    UnknownJobType(String),

    #[error("invalid payload for {job_type}: {source}")]
    InvalidPayload {
        job_type: String,
        #[source]
        source: serde_json::Error,
    },
}

type BoxedHandler =
    Box<dyn Fn(serde_json::Value, CancellationToken) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Registry that maps job type strings to handlers.
///
/// Built once at startup, then shared read-only.
///
/// # Example
///
/// ```ignore
/// let mut registry = JobRegistry::new();
/// registry.register::<SendMessageJob, _>(SendMessageHandler::new(messaging))?;
/// registry.register::<PrintTicketJob, _>(print_handler)?;
///
/// // Later, in JobRunner
/// registry.execute(&record, cancel).await?;
/// ```
#[derive(Default)]
pub struct JobRegistry {
    handlers: HashMap<&'static str, BoxedHandler>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for `J`. A second handler for the same type is rejected.
    pub fn register<J, H>(&mut self, handler: H) -> Result<(), RegistryError>
    where
        J: Job,
        H: JobHandler<J> + 'static,
    {
        let handler = Arc::new(handler);
        let boxed_handler: BoxedHandler = Box::new(move |value, cancel| {
            let handler = handler.clone();
            Box::pin(async move {
                let job = decode::<J>(value)?;
                handler.execute(job, cancel).await
            })
        });
        self.insert::<J>(boxed_handler)
    }

    /// Register a closure as the handler for `J`.
    pub fn register_fn<J, F, Fut>(&mut self, handler: F) -> Result<(), RegistryError>
    where
        J: Job,
        F: Fn(J, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.register::<J, _>(FnHandler {
            f: handler,
            _job: PhantomData,
        })
    }

    fn insert<J: Job>(&mut self, handler: BoxedHandler) -> Result<(), RegistryError> {
        if self.handlers.contains_key(J::JOB_TYPE) {
            return Err(RegistryError::DuplicateHandler(J::JOB_TYPE));
        }
        self.handlers.insert(J::JOB_TYPE, handler);
        Ok(())
    }

    /// Execute a claimed record with its registered handler.
    ///
    /// Unknown job types and undecodable payloads surface as [`RegistryError`].
    pub async fn execute(&self, record: &JobRecord, cancel: CancellationToken) -> Result<()> {
        let handler = self
            .handlers
            .get(record.job_type.as_str())
            .ok_or_else(|| RegistryError::UnknownJobType(record.job_type.clone()))?;

        handler(record.args.clone(), cancel).await
    }

    /// Check if a job type is registered.
    pub fn is_registered(&self, job_type: &str) -> bool {
        self.handlers.contains_key(job_type)
    }

    /// Get all registered job types.
    pub fn registered_types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.handlers.keys().copied().collect();
        types.sort_unstable();
        types
    }
}

fn decode<J: Job>(value: serde_json::Value) -> Result<J, RegistryError> {
    serde_json::from_value(value).map_err(|source| RegistryError::InvalidPayload {
        job_type: J::JOB_TYPE.to_string(),
        source,
    })
}

struct FnHandler<F, J> {
    f: F,
    _job: PhantomData<fn() -> J>,
}

#[async_trait]
impl<J, F, Fut> JobHandler<J> for FnHandler<F, J>
where
    J: Job,
    F: Fn(J, CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    async fn execute(&self, job: J, cancel: CancellationToken) -> Result<()> {
        (self.f)(job, cancel).await
    }
}

/// Thread-safe registry wrapped in Arc.
pub type SharedJobRegistry = Arc<JobRegistry>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct TestJob {
        name: String,
    }

    impl Job for TestJob {
        const JOB_TYPE: &'static str = "test_job";

        fn job_id(&self) -> String {
            self.name.clone()
        }
    }

    struct CountingHandler(Arc<AtomicUsize>);

    #[async_trait]
    impl JobHandler<TestJob> for CountingHandler {
        async fn execute(&self, _job: TestJob, _cancel: CancellationToken) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_register_and_check() {
        let mut registry = JobRegistry::new();
        registry
            .register_fn::<TestJob, _, _>(|_job, _cancel| async move { Ok(()) })
            .unwrap();

        assert!(registry.is_registered("test_job"));
        assert!(!registry.is_registered("unknown_job"));
        assert_eq!(registry.registered_types(), vec!["test_job"]);
    }

    #[test]
    fn second_handler_for_same_type_is_rejected() {
        let mut registry = JobRegistry::new();
        registry
            .register::<TestJob, _>(CountingHandler(Arc::default()))
            .unwrap();

        let err = registry
            .register::<TestJob, _>(CountingHandler(Arc::default()))
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateHandler("test_job")));
    }

    #[tokio::test]
    async fn execute_dispatches_by_job_type() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = JobRegistry::new();
        registry
            .register::<TestJob, _>(CountingHandler(calls.clone()))
            .unwrap();

        let record = JobRecord::for_job(&TestJob { name: "a".into() }).unwrap();
        registry
            .execute(&record, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_type_and_bad_payload_are_registry_errors() {
        let registry = JobRegistry::new();
        let mut record = JobRecord::for_job(&TestJob { name: "a".into() }).unwrap();
        let err = registry
            .execute(&record, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RegistryError>(),
            Some(RegistryError::UnknownJobType(t)) if t == "test_job"
        ));

        let mut registry = JobRegistry::new();
        registry
            .register::<TestJob, _>(CountingHandler(Arc::default()))
            .unwrap();
        record.args = serde_json::json!({ "unexpected": true });
        let err = registry
            .execute(&record, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RegistryError>(),
            Some(RegistryError::InvalidPayload { .. })
        ));
    }
}
