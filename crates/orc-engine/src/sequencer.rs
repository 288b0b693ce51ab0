//! Partitioned, ordered executor.
//!
//! Jobs submitted under the same key run strictly in submission order and
//! never overlap; jobs under different keys are independent and may run
//! concurrently. Each key is a small actor: the first submission to an idle
//! key spawns one drain job on the runtime's blocking pool, which runs queued
//! jobs one at a time and exits (pruning the partition) once the queue is
//! empty. No lock is held while a job runs.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use tokio::runtime::Handle;

use orc_core::error::{OrcError, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct Partition {
    // Mutex only makes the queue Sync; the shard lock already serializes
    // access, so it is reached through get_mut.
    queue: Mutex<VecDeque<Job>>,
    running: bool,
}

impl Partition {
    fn queue_mut(&mut self) -> &mut VecDeque<Job> {
        self.queue.get_mut().unwrap_or_else(PoisonError::into_inner)
    }
}

struct Inner {
    partitions: DashMap<String, Partition>,
    runtime: Handle,
}

/// Cheap to clone; clones share the partitions.
#[derive(Clone)]
pub struct Sequencer {
    inner: Arc<Inner>,
}

impl Sequencer {
    /// Bind to the runtime of the calling context.
    pub fn new() -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| OrcError::Internal(format!("sequencer needs a tokio runtime: {e}")))?;
        Ok(Self::with_handle(runtime))
    }

    pub fn with_handle(runtime: Handle) -> Self {
        Self {
            inner: Arc::new(Inner {
                partitions: DashMap::new(),
                runtime,
            }),
        }
    }

    /// Schedule `job` behind everything already queued under `key`.
    pub fn sequence<F>(&self, key: impl Into<String>, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let key = key.into();
        let start = {
            let mut p = self.inner.partitions.entry(key.clone()).or_default();
            p.queue_mut().push_back(Box::new(job));
            !std::mem::replace(&mut p.running, true)
        };
        if start {
            let inner = Arc::clone(&self.inner);
            self.inner
                .runtime
                .spawn_blocking(move || drain(&inner, &key));
        }
    }

    /// `callback(argument)` under `key`.
    pub fn sequence_with_key<A, F>(&self, key: impl Into<String>, callback: F, argument: A)
    where
        A: Send + 'static,
        F: FnOnce(A) + Send + 'static,
    {
        self.sequence(key, move || callback(argument));
    }

    /// Live partitions (drained ones are pruned).
    pub fn partition_count(&self) -> usize {
        self.inner.partitions.len()
    }

    /// Jobs queued and not yet started under `key`.
    pub fn pending(&self, key: &str) -> usize {
        self.inner
            .partitions
            .get(key)
            .map(|p| p.queue.lock().map(|q| q.len()).unwrap_or(0))
            .unwrap_or(0)
    }
}

fn drain(inner: &Inner, key: &str) {
    loop {
        let next = inner
            .partitions
            .get_mut(key)
            .and_then(|mut p| p.queue_mut().pop_front());

        match next {
            Some(job) => {
                if catch_unwind(AssertUnwindSafe(job)).is_err() {
                    tracing::error!(key, "sequenced job panicked");
                }
            }
            None => {
                // a submit may have raced in between pop and prune
                if inner
                    .partitions
                    .remove_if(key, |_, p| p.queue.lock().map_or(true, |q| q.is_empty()))
                    .is_some()
                {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]

    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn drained_partitions_are_pruned() {
        let seq = Sequencer::new().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        for i in 0..10 {
            let tx = tx.clone();
            seq.sequence("AUD", move || {
                let _ = tx.send(i);
            });
        }
        for _ in 0..10 {
            tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
        }
        for _ in 0..100 {
            if seq.partition_count() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("partition not pruned");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn panicking_job_does_not_stall_its_key() {
        let seq = Sequencer::new().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (tx, mut rx) = mpsc::unbounded_channel();

        seq.sequence("k", || panic!("boom"));
        let s = Arc::clone(&seen);
        seq.sequence("k", move || {
            s.lock().unwrap().push("after");
            let _ = tx.send(());
        });

        tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), ["after"]);
    }
}
