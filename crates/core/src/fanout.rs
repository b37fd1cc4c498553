use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Semaphore;

use crate::driver::SessionDriver;
use crate::session::{SessionConfig, SessionResult};

/// Run a batch of tasks with bounded concurrency and all-settled
/// semantics: a failing task never aborts its peers, and results come back
/// in submission order. Used by fan-out paths such as parallel PR
/// specialist sessions; the synthesizer consumes whatever succeeded.
pub async fn bounded_all_settled<T, Fut>(
    tasks: Vec<Fut>,
    max_concurrency: usize,
) -> Vec<Result<T>>
where
    Fut: Future<Output = Result<T>>,
{
    let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));
    let guarded = tasks.into_iter().map(|task| {
        let semaphore = semaphore.clone();
        async move {
            // Closed only if the semaphore is dropped, which cannot happen
            // while tasks hold clones.
            let _permit = semaphore.acquire().await.expect("semaphore closed");
            task.await
        }
    });
    futures::future::join_all(guarded).await
}

/// Fan a set of session configs out through a driver (e.g. parallel PR
/// specialist analysis). One result slot per config, in order; failed
/// sessions leave an `Err` in their slot without disturbing the rest.
pub async fn run_sessions(
    driver: Arc<dyn SessionDriver>,
    configs: Vec<SessionConfig>,
    max_concurrency: usize,
) -> Vec<Result<SessionResult>> {
    let tasks: Vec<_> = configs
        .into_iter()
        .map(|config| {
            let driver = driver.clone();
            async move { driver.run(config).await }
        })
        .collect();
    bounded_all_settled(tasks, max_concurrency).await
}
