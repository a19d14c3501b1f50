//! Prompt queue — thread-safe FIFO with completion history and the flag store.
//!
//! Producers (server handlers) push from the tokio runtime; the single worker
//! thread blocks in [`PromptQueue::get`] with a timeout. Flags are
//! level-triggered control signals drained atomically by the worker so one
//! `set_flag` call fires at most one action.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::QueueError;
use crate::job::{CompletionRecord, ExecutionStatus, PromptJob, QueuedPrompt};

/// Where a new prompt lands in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    /// Tail of the queue (arrival order).
    Back,
    /// Ahead of everything currently queued.
    Front,
    /// Caller-supplied sequence number.
    At(i64),
}

/// Transient control signals consumed by the worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionFlags {
    /// Reset executor caches and reclaim immediately.
    pub free_memory: bool,
    /// Unload all cached models from the device.
    pub unload_models: bool,
}

/// Named control flag, settable by any server-side handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlFlag {
    FreeMemory,
    UnloadModels,
}

#[derive(Default)]
struct Inner {
    counter: i64,
    pending: BinaryHeap<Reverse<QueuedPrompt>>,
    history: HashMap<Uuid, CompletionRecord>,
    flags: ExecutionFlags,
}

/// In-memory prompt queue. Lost on restart by design.
pub struct PromptQueue {
    inner: Mutex<Inner>,
    item_ready: Condvar,
}

impl PromptQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner::default()),
            item_ready: Condvar::new(),
        })
    }

    /// Append a prompt and wake the consumer. Never blocks.
    ///
    /// Returns the assigned sequence number. Front submissions get the
    /// negated counter, so the most recent front insert runs first.
    pub fn put(&self, job: PromptJob, priority: Priority) -> i64 {
        let mut inner = self.inner.lock();
        let number = match priority {
            Priority::Back => {
                inner.counter += 1;
                inner.counter
            }
            Priority::Front => {
                inner.counter += 1;
                -inner.counter
            }
            Priority::At(n) => {
                // Keep the counter ahead of explicit numbers so later
                // defaults still run after this one.
                inner.counter = inner.counter.max(n);
                n
            }
        };

        info!(prompt_id = %job.id, number, "Prompt queued");
        inner.pending.push(Reverse(QueuedPrompt {
            number,
            job,
            enqueued_at: Instant::now(),
        }));
        drop(inner);
        self.item_ready.notify_one();
        number
    }

    /// Block until a prompt is available or `timeout` elapses.
    ///
    /// Single consumer by design — the worker thread. Returns `None` on
    /// timeout.
    pub fn get(&self, timeout: Duration) -> Option<QueuedPrompt> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        while inner.pending.is_empty() {
            if self
                .item_ready
                .wait_until(&mut inner, deadline)
                .timed_out()
            {
                return None;
            }
        }
        inner.pending.pop().map(|Reverse(item)| item)
    }

    /// Record the terminal outcome for a prompt. Fire-and-forget: callable
    /// whether or not anyone is waiting on the result.
    pub fn task_done(
        &self,
        id: Uuid,
        outputs: serde_json::Value,
        status: ExecutionStatus,
    ) -> Result<(), QueueError> {
        let mut inner = self.inner.lock();
        if inner.history.contains_key(&id) {
            // First record wins; the duplicate is a caller error.
            return Err(QueueError::DuplicateCompletion { id });
        }
        inner.history.insert(
            id,
            CompletionRecord {
                id,
                outputs,
                status,
                completed_at: Utc::now(),
            },
        );
        Ok(())
    }

    /// Set a control flag for the worker to act on.
    pub fn set_flag(&self, flag: ControlFlag, value: bool) {
        let mut inner = self.inner.lock();
        match flag {
            ControlFlag::FreeMemory => inner.flags.free_memory = value,
            ControlFlag::UnloadModels => inner.flags.unload_models = value,
        }
        debug!(?flag, value, "Control flag set");
    }

    /// Atomically read and clear the flags. Subsequent drains see defaults
    /// until a new `set_flag` call occurs.
    pub fn get_flags(&self) -> ExecutionFlags {
        std::mem::take(&mut self.inner.lock().flags)
    }

    /// Completion record for a prompt, or `None` while it is still pending.
    pub fn history(&self, id: Uuid) -> Option<CompletionRecord> {
        self.inner.lock().history.get(&id).cloned()
    }

    /// All completion records, most recent last.
    pub fn all_history(&self) -> Vec<CompletionRecord> {
        let inner = self.inner.lock();
        let mut records: Vec<_> = inner.history.values().cloned().collect();
        records.sort_by_key(|r| r.completed_at);
        records
    }

    pub fn wipe_history(&self) {
        self.inner.lock().history.clear();
    }

    /// Number of prompts still waiting to run.
    pub fn remaining(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Snapshot of pending entries in execution order.
    pub fn queued(&self) -> Vec<QueuedPrompt> {
        let inner = self.inner.lock();
        let mut items: Vec<_> = inner
            .pending
            .iter()
            .map(|Reverse(item)| item.clone())
            .collect();
        items.sort();
        items
    }

    /// Remove one pending prompt by id. Returns whether it was found.
    pub fn delete(&self, id: Uuid) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.pending.len();
        inner.pending = std::mem::take(&mut inner.pending)
            .into_iter()
            .filter(|Reverse(item)| item.job.id != id)
            .collect();
        inner.pending.len() != before
    }

    /// Drop every pending prompt.
    pub fn wipe_queue(&self) {
        let mut inner = self.inner.lock();
        let dropped = inner.pending.len();
        inner.pending.clear();
        if dropped > 0 {
            info!(dropped, "Queue wiped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Status;
    use serde_json::json;

    fn make_job() -> PromptJob {
        PromptJob::new(json!({"n1": {}}), None)
    }

    #[test]
    fn fifo_order() {
        let queue = PromptQueue::new();
        let ids: Vec<Uuid> = (0..5)
            .map(|_| {
                let job = make_job();
                let id = job.id;
                queue.put(job, Priority::Back);
                id
            })
            .collect();

        for expected in ids {
            let item = queue.get(Duration::from_millis(10)).unwrap();
            assert_eq!(item.job.id, expected);
        }
    }

    #[test]
    fn front_jumps_queue() {
        let queue = PromptQueue::new();
        queue.put(make_job(), Priority::Back);
        let front = make_job();
        let front_id = front.id;
        queue.put(front, Priority::Front);

        let first = queue.get(Duration::from_millis(10)).unwrap();
        assert_eq!(first.job.id, front_id);
    }

    #[test]
    fn get_times_out_with_sentinel() {
        let queue = PromptQueue::new();
        let timeout = Duration::from_millis(50);
        let start = Instant::now();
        assert!(queue.get(timeout).is_none());
        let elapsed = start.elapsed();
        assert!(elapsed >= timeout, "returned early: {elapsed:?}");
        assert!(elapsed < timeout * 10, "returned far too late: {elapsed:?}");
    }

    #[test]
    fn put_wakes_blocked_consumer() {
        let queue = PromptQueue::new();
        let consumer = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || queue.get(Duration::from_secs(5)))
        };
        std::thread::sleep(Duration::from_millis(20));
        let job = make_job();
        let id = job.id;
        queue.put(job, Priority::Back);

        let item = consumer.join().unwrap().expect("consumer timed out");
        assert_eq!(item.job.id, id);
    }

    #[test]
    fn flags_drain_to_default() {
        let queue = PromptQueue::new();
        queue.set_flag(ControlFlag::FreeMemory, true);

        let flags = queue.get_flags();
        assert!(flags.free_memory);
        assert!(!flags.unload_models);

        // Second drain with no intervening set sees defaults.
        assert_eq!(queue.get_flags(), ExecutionFlags::default());
    }

    #[test]
    fn duplicate_task_done_keeps_first_record() {
        let queue = PromptQueue::new();
        let id = Uuid::new_v4();

        queue
            .task_done(id, json!({"a": 1}), ExecutionStatus::success(vec![]))
            .unwrap();
        let err = queue
            .task_done(id, json!({"a": 2}), ExecutionStatus::error(vec![]))
            .unwrap_err();
        assert!(matches!(err, QueueError::DuplicateCompletion { .. }));

        let record = queue.history(id).unwrap();
        assert_eq!(record.outputs, json!({"a": 1}));
        assert_eq!(record.status.status, Status::Success);
    }

    #[test]
    fn delete_and_wipe() {
        let queue = PromptQueue::new();
        let job = make_job();
        let id = job.id;
        queue.put(job, Priority::Back);
        queue.put(make_job(), Priority::Back);

        assert!(queue.delete(id));
        assert!(!queue.delete(id));
        assert_eq!(queue.remaining(), 1);

        queue.wipe_queue();
        assert_eq!(queue.remaining(), 0);
    }

    #[test]
    fn queued_snapshot_in_execution_order() {
        let queue = PromptQueue::new();
        queue.put(make_job(), Priority::Back);
        queue.put(make_job(), Priority::Front);

        let snapshot = queue.queued();
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot[0].number < snapshot[1].number);
    }
}
