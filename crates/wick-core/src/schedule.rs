//! The delay → repeat × concurrency execution engine shared by call and
//! publish.
//!
//! A fixed pool of `min(concurrency, repeat)` workers pulls iteration
//! indices from a shared counter, so at most `concurrency` iterations are in
//! flight at any instant. Every iteration runs to completion; a failure
//! never cancels its siblings. Outcomes are recorded in completion order.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinSet;

use crate::error::{Result, WickError};

// ---------------------------------------------------------------------------
// ScheduleSpec
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleSpec {
    /// Paid once, before the first iteration.
    pub delay: Duration,
    pub repeat: usize,
    pub concurrency: usize,
}

impl Default for ScheduleSpec {
    fn default() -> Self {
        Self {
            delay: Duration::ZERO,
            repeat: 1,
            concurrency: 1,
        }
    }
}

impl ScheduleSpec {
    /// Validate raw user input. `repeat` and `concurrency` must be at least 1.
    pub fn new(delay_ms: u64, repeat: i64, concurrency: i64) -> Result<Self> {
        if repeat < 1 {
            return Err(WickError::InvalidRepeat);
        }
        if concurrency < 1 {
            return Err(WickError::InvalidConcurrency);
        }
        Ok(Self {
            delay: Duration::from_millis(delay_ms),
            repeat: repeat as usize,
            concurrency: concurrency as usize,
        })
    }

    /// Number of workers actually started.
    pub fn workers(&self) -> usize {
        self.concurrency.min(self.repeat).max(1)
    }

    pub fn is_single(&self) -> bool {
        self.repeat == 1
    }
}

// ---------------------------------------------------------------------------
// Iteration / Outcome
// ---------------------------------------------------------------------------

/// Identifies one scheduled iteration and the worker running it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Iteration {
    pub index: usize,
    pub worker: usize,
}

#[derive(Debug)]
pub struct Outcome<T> {
    pub iteration: Iteration,
    pub result: Result<T>,
}

/// Per-iteration results in completion order.
#[derive(Debug)]
pub struct OutcomeSet<T> {
    outcomes: Vec<Outcome<T>>,
}

impl<T> OutcomeSet<T> {
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Outcome<T>> {
        self.outcomes.iter()
    }

    pub fn successes(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failures(&self) -> usize {
        self.len() - self.successes()
    }

    pub fn first_error(&self) -> Option<&WickError> {
        self.outcomes.iter().find_map(|o| o.result.as_ref().err())
    }

    /// Split into successful values and errors, each in completion order.
    pub fn partition(self) -> (Vec<T>, Vec<WickError>) {
        let mut values = Vec::new();
        let mut errors = Vec::new();
        for outcome in self.outcomes {
            match outcome.result {
                Ok(v) => values.push(v),
                Err(e) => errors.push(e),
            }
        }
        (values, errors)
    }

    /// All values in completion order, or the first error recorded.
    pub fn into_result(self) -> Result<Vec<T>> {
        self.outcomes.into_iter().map(|o| o.result).collect()
    }
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

/// Execute `task` according to `spec` and collect every outcome.
///
/// Blocks until all `spec.repeat` iterations have completed.
pub async fn run<T, F, Fut>(spec: ScheduleSpec, task: F) -> OutcomeSet<T>
where
    T: Send + 'static,
    F: Fn(Iteration) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    if !spec.delay.is_zero() {
        tracing::debug!(delay_ms = spec.delay.as_millis() as u64, "delaying first iteration");
        tokio::time::sleep(spec.delay).await;
    }

    if spec.is_single() {
        let iteration = Iteration { index: 0, worker: 0 };
        let result = task(iteration).await;
        return OutcomeSet {
            outcomes: vec![Outcome { iteration, result }],
        };
    }

    let task = Arc::new(task);
    let next = Arc::new(AtomicUsize::new(0));
    // Grows with completions; `repeat` may be far larger than memory.
    let outcomes: Arc<Mutex<Vec<Outcome<T>>>> = Arc::new(Mutex::new(Vec::new()));

    let workers = spec.workers();
    tracing::debug!(repeat = spec.repeat, workers, "starting worker pool");

    let mut pool = JoinSet::new();
    for worker in 0..workers {
        let task = Arc::clone(&task);
        let next = Arc::clone(&next);
        let outcomes = Arc::clone(&outcomes);
        let repeat = spec.repeat;
        pool.spawn(async move {
            loop {
                let index = next.fetch_add(1, Ordering::SeqCst);
                if index >= repeat {
                    break;
                }
                let iteration = Iteration { index, worker };
                let result = task(iteration).await;
                if let Err(e) = &result {
                    tracing::debug!(index, worker, error = %e, "iteration failed");
                }
                outcomes
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push(Outcome { iteration, result });
            }
        });
    }

    let mut crashed = Vec::new();
    while let Some(joined) = pool.join_next().await {
        if let Err(e) = joined {
            tracing::warn!(error = %e, "scheduler worker crashed");
            crashed.push(e.to_string());
        }
    }

    let mut outcomes = std::mem::take(&mut *outcomes.lock().unwrap_or_else(|e| e.into_inner()));
    // A crashed worker loses the iteration it was running; surface that.
    for (n, reason) in crashed.into_iter().enumerate() {
        outcomes.push(Outcome {
            iteration: Iteration {
                index: spec.repeat + n,
                worker: usize::MAX,
            },
            result: Err(WickError::Worker(reason)),
        });
    }

    OutcomeSet { outcomes }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn spec_rejects_zero_repeat_and_concurrency() {
        assert!(matches!(
            ScheduleSpec::new(0, 0, 1),
            Err(WickError::InvalidRepeat)
        ));
        assert!(matches!(
            ScheduleSpec::new(0, -3, 1),
            Err(WickError::InvalidRepeat)
        ));
        assert!(matches!(
            ScheduleSpec::new(0, 1, 0),
            Err(WickError::InvalidConcurrency)
        ));
    }

    #[test]
    fn workers_never_exceed_repeat() {
        let spec = ScheduleSpec::new(0, 3, 10).unwrap();
        assert_eq!(spec.workers(), 3);
        let spec = ScheduleSpec::new(0, 10, 4).unwrap();
        assert_eq!(spec.workers(), 4);
    }

    #[tokio::test]
    async fn runs_every_iteration_sequentially() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        let spec = ScheduleSpec::new(0, 50, 1).unwrap();
        let outcomes = run(spec, move |it| {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(it.index)
            }
        })
        .await;

        assert_eq!(counter.load(Ordering::SeqCst), 50);
        // One worker completes in submission order
        let order = outcomes.into_result().unwrap();
        assert_eq!(order, (0..50).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (f, p) = (Arc::clone(&in_flight), Arc::clone(&peak));

        let spec = ScheduleSpec::new(0, 20, 4).unwrap();
        let outcomes = run(spec, move |_| {
            let (f, p) = (Arc::clone(&f), Arc::clone(&p));
            async move {
                let now = f.fetch_add(1, Ordering::SeqCst) + 1;
                p.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                f.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;

        assert_eq!(outcomes.len(), 20);
        let peak = peak.load(Ordering::SeqCst);
        assert!(peak <= 4, "peak concurrency {peak} exceeded 4");
        assert!(peak > 1, "iterations never overlapped");
    }

    #[tokio::test]
    async fn failures_do_not_cancel_siblings() {
        let spec = ScheduleSpec::new(0, 10, 3).unwrap();
        let outcomes = run(spec, |it| async move {
            if it.index % 2 == 0 {
                Err(WickError::protocol("wamp.error.runtime_error", format!("#{}", it.index)))
            } else {
                Ok(it.index)
            }
        })
        .await;

        assert_eq!(outcomes.len(), 10);
        assert_eq!(outcomes.failures(), 5);
        assert_eq!(outcomes.successes(), 5);
        assert_eq!(
            outcomes.first_error().and_then(|e| e.uri()),
            Some("wamp.error.runtime_error")
        );
        assert!(outcomes.into_result().is_err());
    }

    #[tokio::test]
    async fn delay_is_paid_once() {
        let spec = ScheduleSpec::new(50, 5, 1).unwrap();
        let start = Instant::now();
        let outcomes = run(spec, |_| async { Ok(()) }).await;
        let elapsed = start.elapsed();

        assert_eq!(outcomes.successes(), 5);
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_millis(250), "delay paid per iteration?");
    }

    #[tokio::test]
    async fn huge_repeat_starts_without_reserving_outcomes() {
        let spec = ScheduleSpec::new(0, i64::MAX, 2).unwrap();
        let started = Arc::new(AtomicUsize::new(0));
        let s = Arc::clone(&started);
        let running = run(spec, move |_| {
            let s = Arc::clone(&s);
            async move {
                s.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(1)).await;
                Ok(())
            }
        });

        let res = tokio::time::timeout(Duration::from_millis(50), running).await;
        assert!(res.is_err(), "an endless schedule cannot finish");
        assert!(started.load(Ordering::SeqCst) > 0);
    }

    #[tokio::test]
    async fn single_iteration_runs_inline() {
        let outcomes = run(ScheduleSpec::default(), |it| async move { Ok(it) }).await;
        let values = outcomes.into_result().unwrap();
        assert_eq!(values, vec![Iteration { index: 0, worker: 0 }]);
    }
}
