//! Fan-out/fan-in worker pool shared by the port scanner and the host sweep.
//!
//! A pool pulls work items from any iterator, admits at most `cap` of them at
//! a time through an [`AdmissionGate`], and forwards each job's output into an
//! mpsc queue owned by whoever aggregates the results. Workers never share
//! mutable state; the gate's counters are the only thing they touch in common.
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::MAX_CONCURRENCY;

/// Counting gate bounding the number of simultaneously running jobs.
#[derive(Clone, Debug)]
pub struct AdmissionGate {
    permits: Arc<Semaphore>,
    capacity: usize,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl AdmissionGate {
    /// `cap` is clamped to `1..=MAX_CONCURRENCY`.
    pub fn new(cap: usize) -> Self {
        let capacity = cap.clamp(1, MAX_CONCURRENCY);
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub async fn admit(&self) -> Admission {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .expect("admission semaphore is never closed");
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        Admission {
            _permit: permit,
            in_flight: self.in_flight.clone(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous admissions observed so far.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// A slot held by one running job. Dropping it frees the slot.
#[derive(Debug)]
pub struct Admission {
    _permit: OwnedSemaphorePermit,
    in_flight: Arc<AtomicUsize>,
}

impl Drop for Admission {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct WorkerPool {
    gate: AdmissionGate,
    cancel: CancellationToken,
}

impl WorkerPool {
    pub fn new(cap: usize, cancel: CancellationToken) -> Self {
        Self {
            gate: AdmissionGate::new(cap),
            cancel,
        }
    }

    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    /// Run `job` once per item and send every output into `results`.
    ///
    /// The slot is released as soon as the job future resolves, before its
    /// output is handed to the collector. Returns once every dispatched job
    /// has finished, with the number of jobs dispatched. After cancellation
    /// no further items are admitted and in-flight jobs are dropped without
    /// producing output.
    pub async fn run<I, F, Fut, T>(&self, items: I, job: F, results: mpsc::Sender<T>) -> u64
    where
        I: IntoIterator,
        F: Fn(I::Item) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let mut set = JoinSet::new();
        let mut dispatched = 0u64;

        for item in items {
            let admission = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                admission = self.gate.admit() => admission,
            };

            let fut = job(item);
            let results = results.clone();
            let cancel = self.cancel.clone();
            set.spawn(async move {
                let output = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    output = fut => output,
                };
                drop(admission);
                let _ = results.send(output).await;
            });
            dispatched += 1;

            // Reap finished workers so the set stays proportional to the cap.
            while set.try_join_next().is_some() {}
        }

        drop(results);
        while set.join_next().await.is_some() {}
        dispatched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn every_item_produces_one_output() {
        let pool = WorkerPool::new(4, CancellationToken::new());
        let (tx, mut rx) = mpsc::channel(8);
        let collector = tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(v) = rx.recv().await {
                seen.push(v);
            }
            seen
        });

        let dispatched = pool.run(0..20u32, |n| async move { n * 2 }, tx).await;
        let mut seen = collector.await.unwrap();
        seen.sort_unstable();

        assert_eq!(dispatched, 20);
        assert_eq!(seen, (0..20u32).map(|n| n * 2).collect::<Vec<_>>());
        assert_eq!(pool.gate().in_flight(), 0);
    }

    #[tokio::test]
    async fn admissions_never_exceed_cap() {
        let pool = WorkerPool::new(3, CancellationToken::new());
        let gate = pool.gate().clone();
        let (tx, mut rx) = mpsc::channel(64);
        let drain = tokio::spawn(async move { while rx.recv().await.is_some() {} });

        pool.run(
            0..30u32,
            move |_| {
                let gate = gate.clone();
                async move {
                    let seen = gate.in_flight();
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    seen
                }
            },
            tx,
        )
        .await;
        drain.await.unwrap();

        assert!(pool.gate().peak() <= 3, "peak {}", pool.gate().peak());
        assert!(pool.gate().peak() >= 1);
    }

    #[tokio::test]
    async fn cancellation_stops_dispatch() {
        let cancel = CancellationToken::new();
        let pool = WorkerPool::new(2, cancel.clone());
        let (tx, mut rx) = mpsc::channel(8);
        let drain = tokio::spawn(async move {
            let mut n = 0;
            while rx.recv().await.is_some() {
                n += 1;
            }
            n
        });

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let dispatched = pool
            .run(
                0..1_000u32,
                |_| async { tokio::time::sleep(Duration::from_secs(30)).await },
                tx,
            )
            .await;

        assert!(dispatched <= 2, "dispatched {dispatched}");
        assert_eq!(drain.await.unwrap(), 0);
    }

    #[test]
    fn cap_is_clamped() {
        assert_eq!(AdmissionGate::new(0).capacity(), 1);
        assert_eq!(AdmissionGate::new(usize::MAX).capacity(), MAX_CONCURRENCY);
    }
}
