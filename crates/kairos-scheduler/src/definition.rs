use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{ActionError, Result, SchedulerError},
    recurrence::Recurrence,
    retry::RetryPolicy,
};

/// Boxed future returned by a job action.
pub type ActionFuture<T> = BoxFuture<'static, std::result::Result<T, ActionError>>;

pub(crate) type JobAction<T> = Arc<dyn Fn(JobContext) -> ActionFuture<T> + Send + Sync>;

/// Handed to every action attempt. Carries the cancellation signal the
/// action polls at its safe points.
#[derive(Debug, Clone)]
pub struct JobContext {
    job_id: Arc<str>,
    run: u32,
    attempt: u32,
    cancel: CancellationToken,
}

impl JobContext {
    pub(crate) fn new(job_id: &str, run: u32, cancel: CancellationToken) -> Self {
        Self {
            job_id: Arc::from(job_id),
            run,
            attempt: 1,
            cancel,
        }
    }

    pub(crate) fn with_attempt(&self, attempt: u32) -> Self {
        Self {
            attempt,
            ..self.clone()
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// 1-based execution instance number.
    pub fn run(&self) -> u32 {
        self.run
    }

    /// 1-based attempt number within this instance.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once `cancel_job` (or `shutdown`) has been called for this job.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Immutable description of one schedulable unit of work producing a `T`.
///
/// Build one with [`JobDefinition::builder`].
pub struct JobDefinition<T> {
    id: String,
    name: String,
    recurrence: Recurrence,
    retry: RetryPolicy,
    action: JobAction<T>,
}

impl<T: Clone + Send + Sync + 'static> JobDefinition<T> {
    pub fn builder() -> JobDefinitionBuilder<T> {
        JobDefinitionBuilder::new()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn recurrence(&self) -> &Recurrence {
        &self.recurrence
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Type name of `T`; reads through the scheduler are checked against it.
    pub fn result_type(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    pub(crate) fn action(&self) -> &JobAction<T> {
        &self.action
    }
}

impl<T> fmt::Debug for JobDefinition<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobDefinition")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("recurrence", &self.recurrence)
            .field("retry", &self.retry)
            .field("result_type", &std::any::type_name::<T>())
            .finish_non_exhaustive()
    }
}

/// Builder for [`JobDefinition`]. `id` and an action are required; the name
/// defaults to the id, recurrence to [`Recurrence::Once`] and retries to
/// [`RetryPolicy::none`].
pub struct JobDefinitionBuilder<T> {
    id: Option<String>,
    name: Option<String>,
    recurrence: Recurrence,
    retry: RetryPolicy,
    action: Option<JobAction<T>>,
}

impl<T: Clone + Send + Sync + 'static> JobDefinitionBuilder<T> {
    pub fn new() -> Self {
        Self {
            id: None,
            name: None,
            recurrence: Recurrence::default(),
            retry: RetryPolicy::default(),
            action: None,
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn recurrence(mut self, recurrence: Recurrence) -> Self {
        self.recurrence = recurrence;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Async action. It is raced against the job's cancellation token, so a
    /// cancelled instance is dropped at its next `.await`.
    pub fn action<F, Fut>(mut self, action: F) -> Self
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, ActionError>> + Send + 'static,
    {
        self.action = Some(Arc::new(move |ctx: JobContext| {
            let token = ctx.token().clone();
            let fut = action(ctx);
            async move {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(ActionError::cancelled()),
                    out = fut => out,
                }
            }
            .boxed()
        }));
        self
    }

    /// Synchronous action run on tokio's blocking pool. It cannot be
    /// interrupted: the body must poll [`JobContext::is_cancelled`] to stop
    /// early, and the instance only ends when the closure returns.
    pub fn blocking_action<F>(mut self, action: F) -> Self
    where
        F: Fn(JobContext) -> std::result::Result<T, ActionError> + Send + Sync + 'static,
    {
        let action = Arc::new(action);
        self.action = Some(Arc::new(move |ctx: JobContext| {
            let action = Arc::clone(&action);
            async move {
                match tokio::task::spawn_blocking(move || action(ctx)).await {
                    Ok(out) => out,
                    Err(e) if e.is_panic() => Err(ActionError::panicked(e.into_panic())),
                    Err(e) => Err(ActionError::new(format!("blocking task failed: {e}"))),
                }
            }
            .boxed()
        }));
        self
    }

    pub fn build(self) -> Result<JobDefinition<T>> {
        let id = self
            .id
            .ok_or_else(|| SchedulerError::Validation("job id must be set".into()))?;
        if id.trim().is_empty() {
            return Err(SchedulerError::Validation("job id must not be blank".into()));
        }
        let action = self
            .action
            .ok_or_else(|| SchedulerError::Validation(format!("action must be set for job {id}")))?;
        self.recurrence.validate()?;
        self.retry.validate()?;

        let name = self.name.unwrap_or_else(|| id.clone());
        Ok(JobDefinition {
            id,
            name,
            recurrence: self.recurrence,
            retry: self.retry,
            action,
        })
    }
}

impl<T: Clone + Send + Sync + 'static> Default for JobDefinitionBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}
