//! Ordered worker pool.
//!
//! Fragments are submitted in index order and computed on the blocking
//! thread pool, at most `parallelism` at a time. Results are handed back
//! strictly in submission order through a [`ReorderBuffer`], whatever order
//! the workers finish in.
//!
//! A fragment's semaphore permit is held until its result has been released
//! to the caller, so at most `parallelism` fragments are resident at once.

use std::collections::{BTreeMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::trace;

use crate::error::{MediaError, MediaResult};

/// Gate that releases items keyed by a dense index in ascending order.
#[derive(Debug)]
pub struct ReorderBuffer<T> {
    pending: BTreeMap<usize, T>,
    next_expected: usize,
}

impl<T> Default for ReorderBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ReorderBuffer<T> {
    pub fn new() -> Self {
        Self {
            pending: BTreeMap::new(),
            next_expected: 0,
        }
    }

    /// Insert a completed item. Indices below the cursor are ignored.
    pub fn push(&mut self, index: usize, item: T) {
        if index >= self.next_expected {
            self.pending.insert(index, item);
        }
    }

    /// Next item if it is the one expected.
    pub fn pop_ready(&mut self) -> Option<T> {
        let item = self.pending.remove(&self.next_expected)?;
        self.next_expected += 1;
        Some(item)
    }

    pub fn next_expected(&self) -> usize {
        self.next_expected
    }

    /// Items waiting behind a gap.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

struct Completed<R> {
    index: usize,
    result: MediaResult<R>,
    permit: OwnedSemaphorePermit,
}

/// Bounded pool of blocking workers with in-order result delivery.
pub struct OrderedPool<R> {
    semaphore: Arc<Semaphore>,
    parallelism: usize,
    tx: UnboundedSender<Completed<R>>,
    rx: UnboundedReceiver<Completed<R>>,
    reorder: ReorderBuffer<(MediaResult<R>, OwnedSemaphorePermit)>,
    ready: VecDeque<MediaResult<R>>,
    submitted: usize,
}

impl<R: Send + 'static> OrderedPool<R> {
    pub fn new(parallelism: usize) -> Self {
        let parallelism = parallelism.max(1);
        let (tx, rx) = unbounded_channel();
        Self {
            semaphore: Arc::new(Semaphore::new(parallelism)),
            parallelism,
            tx,
            rx,
            reorder: ReorderBuffer::new(),
            ready: VecDeque::new(),
            submitted: 0,
        }
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Number of jobs whose results have not been returned yet.
    pub fn outstanding(&self) -> usize {
        self.submitted - self.reorder.next_expected() + self.ready.len()
    }

    /// Submit the next job, waiting for a free worker if needed.
    ///
    /// Returns every result that became releasable in order; the first
    /// failed job (in submission order) is returned as the error.
    pub async fn submit<F>(&mut self, job: F) -> MediaResult<Vec<R>>
    where
        F: FnOnce() -> MediaResult<R> + Send + 'static,
    {
        let permit = loop {
            match self.semaphore.clone().try_acquire_owned() {
                Ok(permit) => break permit,
                Err(TryAcquireError::NoPermits) => self.receive_one().await?,
                Err(TryAcquireError::Closed) => {
                    return Err(MediaError::internal("worker pool closed"))
                }
            }
        };

        let index = self.submitted;
        self.submitted += 1;
        let tx = self.tx.clone();

        tokio::task::spawn_blocking(move || {
            let result = catch_unwind(AssertUnwindSafe(job)).unwrap_or_else(|_| {
                Err(MediaError::internal(format!("worker for job {} panicked", index)))
            });
            // Receiver gone means the caller already failed; nothing to do.
            let _ = tx.send(Completed {
                index,
                result,
                permit,
            });
        });

        self.take_ready()
    }

    /// Wait for every submitted job and return the remaining results in order.
    pub async fn finish(mut self) -> MediaResult<Vec<R>> {
        while self.reorder.next_expected() < self.submitted {
            self.receive_one().await?;
        }
        self.take_ready()
    }

    async fn receive_one(&mut self) -> MediaResult<()> {
        let completed = self
            .rx
            .recv()
            .await
            .ok_or_else(|| MediaError::internal("worker pool channel closed"))?;

        trace!(
            index = completed.index,
            next_expected = self.reorder.next_expected(),
            "Worker finished"
        );

        self.reorder
            .push(completed.index, (completed.result, completed.permit));
        // Dropping the permit here frees the worker slot.
        while let Some((result, _permit)) = self.reorder.pop_ready() {
            self.ready.push_back(result);
        }
        Ok(())
    }

    fn take_ready(&mut self) -> MediaResult<Vec<R>> {
        let mut out = Vec::with_capacity(self.ready.len());
        while let Some(result) = self.ready.pop_front() {
            out.push(result?);
        }
        Ok(out)
    }
}
