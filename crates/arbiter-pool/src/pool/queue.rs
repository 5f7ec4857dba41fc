//! Pending task queue
//!
//! Highest priority first, oldest `created_at` first within a priority band,
//! insertion order as the final tie-breaker.

use std::cmp::Reverse;
use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use crate::task::{Task, TaskPriority};

type OrderKey = (Reverse<TaskPriority>, DateTime<Utc>, u64);

#[derive(Debug)]
struct Entry {
    key: OrderKey,
    task: Task,
}

#[derive(Debug, Default)]
pub(crate) struct TaskQueue {
    entries: VecDeque<Entry>,
    next_seq: u64,
}

impl TaskQueue {
    /// Insert keeping the queue sorted; never reorders existing entries
    pub fn push(&mut self, task: Task) {
        let key = (Reverse(task.priority), task.created_at, self.next_seq);
        self.next_seq += 1;

        let at = self.entries.partition_point(|e| e.key <= key);
        self.entries.insert(at, Entry { key, task });
    }

    pub fn peek(&self) -> Option<&Task> {
        self.entries.front().map(|e| &e.task)
    }

    pub fn pop(&mut self) -> Option<Task> {
        self.entries.pop_front().map(|e| e.task)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
