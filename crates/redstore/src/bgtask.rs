//! Background compaction task queue.
//!
//! A single worker (owned by the top-level store) drains this FIFO.
//! Engines only ever enqueue; the queue is the one shared channel between
//! the engines and the multiplexer, so neither side owns the other.

use crate::types::DataType;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BgTaskOp {
    /// Full compaction over the engine's column families.
    CleanAll,
    /// Compaction of the meta/data ranges belonging to one user key.
    CompactKey,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BgTask {
    pub dtype: DataType,
    pub op: BgTaskOp,
    pub arg: Vec<u8>,
}

#[derive(Default)]
struct QueueState {
    tasks: VecDeque<BgTask>,
    shutdown: bool,
}

/// FIFO of compaction tasks with shutdown signalling.
pub struct BgTaskQueue {
    state: Mutex<QueueState>,
    cond: Condvar,
}

impl BgTaskQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            cond: Condvar::new(),
        }
    }

    /// Enqueue a task. A `CleanAll` over `All` supersedes everything
    /// already queued, so the queue is swapped for that single entry.
    pub fn add_task(&self, task: BgTask) {
        let mut state = self.state.lock();
        if task.dtype == DataType::All && task.op == BgTaskOp::CleanAll {
            state.tasks.clear();
        }
        state.tasks.push_back(task);
        self.cond.notify_one();
    }

    /// Block until a task is available or shutdown is signalled.
    /// Returns `None` on shutdown.
    pub fn next_task(&self) -> Option<BgTask> {
        let mut state = self.state.lock();
        loop {
            if let Some(task) = state.tasks.pop_front() {
                return Some(task);
            }
            if state.shutdown {
                return None;
            }
            self.cond.wait(&mut state);
        }
    }

    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        state.shutdown = true;
        self.cond.notify_all();
    }

    pub fn len(&self) -> usize {
        self.state.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().tasks.is_empty()
    }
}

impl Default for BgTaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let q = BgTaskQueue::new();
        q.add_task(BgTask {
            dtype: DataType::Sets,
            op: BgTaskOp::CompactKey,
            arg: b"a".to_vec(),
        });
        q.add_task(BgTask {
            dtype: DataType::ZSets,
            op: BgTaskOp::CompactKey,
            arg: b"b".to_vec(),
        });
        assert_eq!(q.next_task().unwrap().arg, b"a");
        assert_eq!(q.next_task().unwrap().arg, b"b");
    }

    #[test]
    fn test_clean_all_replaces_queue() {
        let q = BgTaskQueue::new();
        for _ in 0..5 {
            q.add_task(BgTask {
                dtype: DataType::Hashes,
                op: BgTaskOp::CompactKey,
                arg: b"k".to_vec(),
            });
        }
        q.add_task(BgTask {
            dtype: DataType::All,
            op: BgTaskOp::CleanAll,
            arg: Vec::new(),
        });
        assert_eq!(q.len(), 1);
        let task = q.next_task().unwrap();
        assert_eq!(task.op, BgTaskOp::CleanAll);
        assert_eq!(task.dtype, DataType::All);
    }

    #[test]
    fn test_shutdown_unblocks_waiter() {
        let q = Arc::new(BgTaskQueue::new());
        let waiter = Arc::clone(&q);
        let handle = thread::spawn(move || waiter.next_task());
        thread::sleep(std::time::Duration::from_millis(50));
        q.shutdown();
        assert_eq!(handle.join().unwrap(), None);
    }
}
