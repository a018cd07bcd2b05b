//! Canned scenarios exercised by the demo binary.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use kairos_scheduler::{ActionError, Backoff, JobDefinition, Recurrence, RetryPolicy, Scheduler};
use tracing::info;

const WAIT: Option<Duration> = Some(Duration::from_secs(10));

/// One-shot job awaited from a synchronous caller.
pub async fn hello(scheduler: &Scheduler) -> anyhow::Result<()> {
    let def = JobDefinition::<String>::builder()
        .id("hello")
        .name("Hello Job")
        .action(|_ctx| async { Ok("Hello".to_string()) })
        .build()?;
    scheduler.schedule(def)?;

    // await_result_blocking must not run on an async worker thread
    let sync_caller = scheduler.clone();
    let result = tokio::task::spawn_blocking(move || {
        sync_caller.await_result_blocking::<String>("hello", WAIT)
    })
    .await
    .context("blocking waiter panicked")??;

    info!(
        status = %result.status,
        value = result.result.as_deref().unwrap_or_default(),
        "hello finished"
    );
    Ok(())
}

/// Delayed job cancelled while its action is still running.
pub async fn cancel(scheduler: &Scheduler) -> anyhow::Result<()> {
    let def = JobDefinition::<String>::builder()
        .id("delayed")
        .name("Delayed Job")
        .recurrence(Recurrence::delayed(Duration::from_millis(1_000)))
        .action(|_ctx| async {
            tokio::time::sleep(Duration::from_millis(5_000)).await;
            Ok("Should not complete".to_string())
        })
        .build()?;
    scheduler.schedule(def)?;

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    let outcome = scheduler.cancel_job("delayed");
    let result = scheduler.await_result::<String>("delayed", WAIT).await?;
    info!(?outcome, status = %result.status, "delayed job cancelled");
    Ok(())
}

/// Periodic job whose first instance fails; later instances still run.
pub async fn periodic(scheduler: &Scheduler) -> anyhow::Result<()> {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let def = JobDefinition::<u32>::builder()
        .id("periodic")
        .name("Periodic Job")
        .recurrence(Recurrence::periodic(Duration::from_millis(100)))
        .action(move |ctx| {
            let counter = Arc::clone(&counter);
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n == 1 {
                    return Err(ActionError::new(format!("run {} failed", ctx.run())));
                }
                Ok(n)
            }
        })
        .build()?;
    scheduler.schedule(def)?;

    tokio::time::sleep(Duration::from_millis(450)).await;
    scheduler.cancel_job("periodic");
    let result = scheduler.await_result::<u32>("periodic", WAIT).await?;

    for instance in scheduler.history::<u32>("periodic")? {
        info!(
            run = instance.run,
            status = %instance.status,
            value = ?instance.result,
            error = ?instance.error.as_ref().map(|e| e.message()),
            "periodic instance"
        );
    }
    info!(status = %result.status, "periodic job stopped");
    Ok(())
}

/// Flaky job that succeeds on its second attempt.
pub async fn retry(scheduler: &Scheduler) -> anyhow::Result<()> {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let def = JobDefinition::<String>::builder()
        .id("retry")
        .name("Retry Job")
        .retry(RetryPolicy::new(
            3,
            Backoff::Exponential {
                initial: Duration::from_millis(100),
                max: Duration::from_millis(1_000),
            },
        ))
        .action(move |_ctx| {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    return Err(ActionError::new("transient failure"));
                }
                Ok("SuccessAfterRetry".to_string())
            }
        })
        .build()?;
    scheduler.schedule(def)?;

    let result = scheduler.await_result::<String>("retry", WAIT).await?;
    anyhow::ensure!(
        result.is_success(),
        "retry job ended {}",
        result.status
    );
    info!(attempts = result.attempts, "retry job succeeded");
    Ok(())
}
