//! Plan scheduler - decides how many plans run at once

use crate::core::error::{Error, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Strategy for scheduling plans of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulingStrategy {
    /// One plan at a time, in order
    #[default]
    Sequential,

    /// Every plan at once
    Parallel,

    /// At most N plans at once
    LimitedParallel(usize),
}

impl SchedulingStrategy {
    /// Strategy for a worker count, none or one meaning sequential
    pub fn from_workers(workers: Option<usize>) -> Self {
        match workers {
            None | Some(0) | Some(1) => SchedulingStrategy::Sequential,
            Some(n) => SchedulingStrategy::LimitedParallel(n),
        }
    }

    /// Concurrent plan slots for `total` plans
    pub fn permits(&self, total: usize) -> usize {
        match self {
            SchedulingStrategy::Sequential => 1,
            SchedulingStrategy::Parallel => total.max(1),
            SchedulingStrategy::LimitedParallel(n) => (*n).clamp(1, total.max(1)),
        }
    }
}

/// Runs one task per plan within the strategy's limit
pub struct PlanScheduler {
    strategy: SchedulingStrategy,
}

impl PlanScheduler {
    pub fn new(strategy: SchedulingStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> SchedulingStrategy {
        self.strategy
    }

    /// Run `task` for every item, results in item order
    ///
    /// A panicking task is reported as a general error in its slot.
    pub async fn run_all<I, T, F, Fut>(&self, items: Vec<I>, task: F) -> Vec<Result<T>>
    where
        I: Send + 'static,
        T: Send + 'static,
        F: Fn(I) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let total = items.len();
        let semaphore = Arc::new(Semaphore::new(self.strategy.permits(total)));

        let handles: Vec<_> = items
            .into_iter()
            .map(|item| {
                let semaphore = semaphore.clone();
                let future = task(item);
                tokio::spawn(async move {
                    // the semaphore is never closed
                    let _permit = semaphore.acquire_owned().await.ok();
                    future.await
                })
            })
            .collect();

        let mut results = Vec::with_capacity(total);
        for handle in handles {
            results.push(
                handle
                    .await
                    .map_err(|e| Error::general("Plan worker crashed.").with_source(e)),
            );
        }
        results
    }
}
