//! Write batching for the structured store.
//!
//! Mutating operations (`put`, `delete`, `clear`) are turned into
//! [`WriteOp`]s and handed to a [`TaskScheduler`], which coalesces them
//! into batches executed by a [`BatchWriter`], one underlying transaction
//! per batch.
//!
//! The scheduler has two phases:
//!
//! - `Idle`: nothing queued or in flight. The first submitted task moves
//!   the scheduler to `Running` and opens a collection window.
//! - `Running`: a batch is being collected or executed. Tasks arriving now
//!   are queued. When the window closes, or the executing batch completes,
//!   the queue is drained into the next batch. An empty queue returns the
//!   scheduler to `Idle`.
//!
//! A `clear` never shares a batch: it is always flushed alone. Every task
//! carries its own completion channel, so an item-level failure rejects
//! only that item.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::trace;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::errors::{KvError, KvResult};
use crate::value::Value;

/// One mutating operation.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Put { key: String, value: Value },
    Delete { key: String },
    Clear,
}

impl WriteOp {
    pub fn is_clear(&self) -> bool {
        matches!(self, WriteOp::Clear)
    }

    pub fn key(&self) -> Option<&str> {
        match self {
            WriteOp::Put { key, .. } | WriteOp::Delete { key } => Some(key),
            WriteOp::Clear => None,
        }
    }
}

/// Executes a batch of writes as one transaction.
#[async_trait]
pub trait BatchWriter: Send + Sync + 'static {
    /// Apply `batch` in order. The result vector must hold one entry per
    /// operation, in the same order.
    async fn write_batch(&self, batch: Vec<WriteOp>) -> Vec<KvResult<()>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Running,
}

struct PendingTask {
    op: WriteOp,
    done: oneshot::Sender<KvResult<()>>,
}

struct SchedulerState {
    phase: Phase,
    queue: VecDeque<PendingTask>,
    batches: u64,
}

struct Shared {
    state: Mutex<SchedulerState>,
    writer: Arc<dyn BatchWriter>,
    window: Duration,
}

/// Serializes and batches writes against one connection.
#[derive(Clone)]
pub struct TaskScheduler {
    shared: Arc<Shared>,
}

impl TaskScheduler {
    pub fn new(writer: Arc<dyn BatchWriter>, window: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(SchedulerState {
                    phase: Phase::Idle,
                    queue: VecDeque::new(),
                    batches: 0,
                }),
                writer,
                window,
            }),
        }
    }

    pub fn phase(&self) -> Phase {
        self.shared.state.lock().phase
    }

    /// Tasks waiting for a batch.
    pub fn pending(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    /// Batches handed to the writer so far.
    pub fn batches_flushed(&self) -> u64 {
        self.shared.state.lock().batches
    }

    /// Queue `op` and wait for its batch to complete.
    pub async fn submit(&self, op: WriteOp) -> KvResult<()> {
        let (done, rx) = oneshot::channel();
        let start = {
            let mut state = self.shared.state.lock();
            state.queue.push_back(PendingTask { op, done });
            if state.phase == Phase::Idle {
                state.phase = Phase::Running;
                true
            } else {
                false
            }
        };
        if start {
            tokio::spawn(Self::run(Arc::clone(&self.shared)));
        }
        rx.await.map_err(|_| KvError::SchedulerClosed)?
    }

    async fn run(shared: Arc<Shared>) {
        tokio::time::sleep(shared.window).await;
        loop {
            let batch = {
                let mut state = shared.state.lock();
                let batch = next_batch(&mut state.queue);
                if batch.is_empty() {
                    state.phase = Phase::Idle;
                    return;
                }
                state.batches += 1;
                batch
            };

            trace!("Flushing write batch of {} task(s)", batch.len());
            let (ops, waiters): (Vec<_>, Vec<_>) =
                batch.into_iter().map(|task| (task.op, task.done)).unzip();
            let expected = ops.len();
            let mut results = shared.writer.write_batch(ops).await.into_iter();

            for waiter in waiters {
                let result = results.next().unwrap_or_else(|| {
                    Err(KvError::Storage(format!(
                        "batch writer returned fewer than {expected} results"
                    )))
                });
                // The caller may have stopped waiting; nothing to do then.
                let _ = waiter.send(result);
            }
        }
    }
}

/// Take the next batch from the front of `queue`.
///
/// A leading `clear` forms a batch on its own; otherwise the batch runs up
/// to, but not including, the next `clear`.
fn next_batch(queue: &mut VecDeque<PendingTask>) -> Vec<PendingTask> {
    match queue.front() {
        None => Vec::new(),
        Some(task) if task.op.is_clear() => queue.pop_front().into_iter().collect(),
        Some(_) => {
            let end = queue
                .iter()
                .position(|task| task.op.is_clear())
                .unwrap_or(queue.len());
            queue.drain(..end).collect()
        }
    }
}
