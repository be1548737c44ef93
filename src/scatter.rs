//! Fan-out / join executor
//!
//! Runs one action per index concurrently, waits for every branch, and
//! reports the outcome. Bulk operations on a logical database (open, close,
//! ping, prepare, statement close) are all built on these functions.
//!
//! Branches are polled concurrently on the calling task with
//! [`futures::future::join_all`], so actions may borrow from the caller. A
//! panic inside an action (while building its future or while polling it) is
//! caught and reported as [`Error::TaskPanicked`] for that index; sibling
//! branches keep running.

use crate::error::{Error, Result};
use futures::future::{join_all, FutureExt};
use std::any::Any;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tokio::time::{timeout_at, Instant};

/// Outcome of a fan-out where at least one branch failed
///
/// `succeeded` holds the values of the branches that did complete, in index
/// order, so the caller can release them.
#[derive(Debug)]
pub struct PartialFailure<T> {
    pub error: Error,
    pub failed: usize,
    pub succeeded: Vec<T>,
}

/// Run `f(0)..f(n-1)` concurrently and return every outcome in index order
///
/// Never short-circuits: each index is invoked exactly once and every branch
/// is driven to completion before this returns. `n == 0` returns immediately.
pub async fn gather<T, F, Fut>(n: usize, f: F) -> Vec<Result<T>>
where
    F: Fn(usize) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    if n == 0 {
        return Vec::new();
    }

    let branches = (0..n).map(|i| {
        let started = catch_unwind(AssertUnwindSafe(|| f(i)));
        async move {
            match started {
                Ok(fut) => AssertUnwindSafe(fut)
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|payload| Err(panicked(i, payload))),
                Err(payload) => Err(panicked(i, payload)),
            }
        }
    });

    join_all(branches).await
}

/// Run `f(0)..f(n-1)` concurrently; succeed only if every branch succeeds
///
/// When several branches fail, which error is returned is unspecified.
pub async fn scatter<T, F, Fut>(n: usize, f: F) -> Result<Vec<T>>
where
    F: Fn(usize) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    settle(gather(n, f).await).map_err(|failure| failure.error)
}

/// Like [`scatter`], with every branch bounded by the same `deadline`
///
/// A branch still running at the deadline is dropped and reports
/// [`Error::Timeout`]; the join still covers every branch.
pub async fn scatter_until<T, F, Fut>(deadline: Instant, n: usize, f: F) -> Result<Vec<T>>
where
    F: Fn(usize) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    settle(gather_until(deadline, n, f).await).map_err(|failure| failure.error)
}

/// Like [`gather`], with every branch bounded by the same `deadline`
pub async fn gather_until<T, F, Fut>(deadline: Instant, n: usize, f: F) -> Vec<Result<T>>
where
    F: Fn(usize) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    gather(n, |i| {
        let branch = f(i);
        async move {
            match timeout_at(deadline, branch).await {
                Ok(outcome) => outcome,
                Err(_) => Err(Error::timeout(format!(
                    "fan-out branch {} did not finish before its deadline",
                    i
                ))),
            }
        }
    })
    .await
}

/// Reduce per-index outcomes to all values or the first observed error
pub fn settle<T>(outcomes: Vec<Result<T>>) -> std::result::Result<Vec<T>, PartialFailure<T>> {
    let mut succeeded = Vec::with_capacity(outcomes.len());
    let mut error = None;
    let mut failed = 0;

    for (i, outcome) in outcomes.into_iter().enumerate() {
        match outcome {
            Ok(value) => succeeded.push(value),
            Err(e) => {
                log::warn!("fan-out branch {} failed: {}", i, e);
                failed += 1;
                if error.is_none() {
                    error = Some(e);
                }
            }
        }
    }

    match error {
        None => Ok(succeeded),
        Some(error) => Err(PartialFailure {
            error,
            failed,
            succeeded,
        }),
    }
}

fn panicked(index: usize, payload: Box<dyn Any + Send>) -> Error {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    };
    log::error!("fan-out branch {} panicked: {}", index, message);
    Error::TaskPanicked { index, message }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_scatter_runs_every_branch_despite_failures() {
        let seq: Vec<AtomicI64> = (1..=8).map(AtomicI64::new).collect();

        let result = scatter(seq.len(), |i| {
            let seq = &seq;
            async move {
                let v = seq[i].load(Ordering::SeqCst);
                if v % 2 == 0 {
                    seq[i].store(v * v, Ordering::SeqCst);
                    Ok(())
                } else {
                    Err(Error::invalid_input(format!("{} is an odd fellow", v)))
                }
            }
        })
        .await;

        assert!(result.is_err());
        let got: Vec<i64> = seq.iter().map(|v| v.load(Ordering::SeqCst)).collect();
        assert_eq!(got, vec![1, 4, 3, 16, 5, 36, 7, 64]);
    }

    #[tokio::test]
    async fn test_scatter_success_visits_each_index_once() {
        let hits: Vec<AtomicUsize> = (0..16).map(|_| AtomicUsize::new(0)).collect();

        let values = scatter(hits.len(), |i| {
            let hits = &hits;
            async move {
                hits[i].fetch_add(1, Ordering::SeqCst);
                Ok(i * 10)
            }
        })
        .await
        .unwrap();

        assert_eq!(values, (0..16).map(|i| i * 10).collect::<Vec<_>>());
        assert!(hits.iter().all(|h| h.load(Ordering::SeqCst) == 1));
    }

    #[tokio::test]
    async fn test_scatter_zero_branches() {
        let calls = AtomicUsize::new(0);
        let values: Vec<()> = scatter(0, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .await
        .unwrap();

        assert!(values.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_panicking_branch_becomes_error() {
        let finished = AtomicUsize::new(0);

        let outcomes = gather(4, |i| {
            let finished = &finished;
            async move {
                tokio::task::yield_now().await;
                if i == 2 {
                    panic!("branch two exploded");
                }
                finished.fetch_add(1, Ordering::SeqCst);
                Ok(i)
            }
        })
        .await;

        assert_eq!(finished.load(Ordering::SeqCst), 3);
        match &outcomes[2] {
            Err(Error::TaskPanicked { index, message }) => {
                assert_eq!(*index, 2);
                assert_eq!(message, "branch two exploded");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(outcomes[0].is_ok() && outcomes[1].is_ok() && outcomes[3].is_ok());
    }

    #[tokio::test]
    async fn test_panic_while_building_future_is_caught() {
        let result: Result<Vec<usize>> = scatter(3, |i| {
            if i == 1 {
                panic!("no future for you");
            }
            async move { Ok(i) }
        })
        .await;

        assert!(matches!(
            result,
            Err(Error::TaskPanicked { index: 1, .. })
        ));
    }

    #[test]
    fn test_settle_keeps_successful_values() {
        let outcomes = vec![Ok(1), Err(Error::StatementClosed), Ok(3), Err(Error::invalid_input("x"))];

        let failure = settle(outcomes).unwrap_err();
        assert_eq!(failure.succeeded, vec![1, 3]);
        assert_eq!(failure.failed, 2);
    }

    #[tokio::test]
    async fn test_deadline_applies_to_every_branch() {
        let deadline = Instant::now() + Duration::from_millis(50);
        let started = std::time::Instant::now();

        let outcomes = gather_until(deadline, 3, |i| async move {
            if i == 0 {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            Ok(i)
        })
        .await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(matches!(&outcomes[0], Err(e) if e.is_timeout()));
        assert_eq!(outcomes[1].as_ref().unwrap(), &1);
        assert_eq!(outcomes[2].as_ref().unwrap(), &2);

        let result = scatter_until(Instant::now() + Duration::from_millis(20), 2, |_| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(Error::Timeout(_))));
    }
}
