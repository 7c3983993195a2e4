//! Fork-join over concurrent feed calls.
//!
//! Every sub-request is spawned onto a [`JoinSet`], gated by a semaphore so at
//! most `max_in_flight` run at once, and the call returns only after all of
//! them have finished. What happens when one of them fails is the
//! [`JoinPolicy`].

use std::future::Future;
use std::sync::Arc;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{Instrument, warn};

use crate::error::FeedError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum JoinPolicy {
    /// The first failed sub-request fails the whole operation and the
    /// remaining ones are aborted.
    #[default]
    FailFast,
    /// Failed sub-requests are logged and skipped; whatever succeeded is
    /// returned.
    PartialSuccess,
}

/// Runs `task` once per item and concatenates the results in completion order.
pub async fn fan_out<I, T, F, Fut>(
    items: Vec<I>,
    policy: JoinPolicy,
    max_in_flight: usize,
    task: F,
) -> Result<Vec<T>, FeedError>
where
    I: Send + 'static,
    T: Send + 'static,
    F: Fn(I) -> Fut,
    Fut: Future<Output = Result<Vec<T>, FeedError>> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(max_in_flight.max(1)));
    let mut tasks = JoinSet::new();

    for (index, item) in items.into_iter().enumerate() {
        let sem = Arc::clone(&semaphore);
        let fut = task(item);
        let span = tracing::debug_span!("fan_out_task", index);

        tasks.spawn(
            async move {
                let _permit = sem
                    .acquire_owned()
                    .await
                    .map_err(|e| FeedError::Task(e.to_string()))?;
                fut.await
            }
            .instrument(span),
        );
    }

    let mut results = Vec::new();
    let mut failed = 0usize;

    while let Some(joined) = tasks.join_next().await {
        let outcome = joined.map_err(|e| FeedError::Task(e.to_string())).and_then(|r| r);
        match (outcome, policy) {
            (Ok(batch), _) => results.extend(batch),
            // dropping the join set aborts whatever is still running
            (Err(err), JoinPolicy::FailFast) => return Err(err),
            (Err(err), JoinPolicy::PartialSuccess) => {
                failed += 1;
                warn!(error = %err, "Skipping failed feed request");
            }
        }
    }

    if failed > 0 {
        warn!(failed, returned = results.len(), "Fan-out finished with partial results");
    }

    Ok(results)
}
