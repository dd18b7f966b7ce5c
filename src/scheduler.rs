//! Ready queues
//!
//! Fixed-priority preemptive selection: one FIFO queue per priority level
//! plus a bitmap of non-empty levels, so picking the next task is a
//! leading-zero count and a queue pop. Tasks of equal priority rotate by
//! being re-queued at the tail of their level.
//!
//! The running task is not kept in any queue; it is pushed back to the
//! tail of its level when it is switched out while still runnable.
//!
//! Author: Moroya Sakamoto

use heapless::Deque;

use crate::config::{MAX_PRIORITIES, MAX_TASKS};
use crate::task::TaskPriority;

/// One FIFO queue per priority level
///
/// Size: MAX_PRIORITIES × (MAX_TASKS × usize + overhead) ≈ 700 bytes
pub struct ReadyQueues {
    levels: [Deque<usize, MAX_TASKS>; MAX_PRIORITIES],
    /// Bit `n` set while level `n` is non-empty
    ready_mask: u32,
}

impl ReadyQueues {
    pub const fn new() -> Self {
        Self {
            levels: [const { Deque::new() }; MAX_PRIORITIES],
            ready_mask: 0,
        }
    }

    /// Queue `task` at the tail of its priority level
    pub fn push_back(&mut self, task: usize, priority: TaskPriority) {
        let level = priority.level();
        // A task is queued at most once, so a level never overflows
        let _ = self.levels[level].push_back(task);
        self.ready_mask |= 1 << level;
    }

    /// Highest non-empty level
    pub fn highest_level(&self) -> Option<usize> {
        if self.ready_mask == 0 {
            None
        } else {
            Some(31 - self.ready_mask.leading_zeros() as usize)
        }
    }

    /// Head of the highest non-empty level, without dequeuing it
    pub fn peek_highest(&self) -> Option<usize> {
        self.highest_level()
            .and_then(|level| self.levels[level].front().copied())
    }

    /// Dequeue the head of the highest non-empty level
    pub fn pop_highest(&mut self) -> Option<usize> {
        let level = self.highest_level()?;
        let task = self.levels[level].pop_front();
        if self.levels[level].is_empty() {
            self.ready_mask &= !(1 << level);
        }
        task
    }

    /// Remove `task` from `priority`'s level, preserving the order of the rest
    pub fn remove(&mut self, task: usize, priority: TaskPriority) -> bool {
        let level = priority.level();
        let queue = &mut self.levels[level];
        let mut found = false;
        for _ in 0..queue.len() {
            if let Some(t) = queue.pop_front() {
                if t == task && !found {
                    found = true;
                } else {
                    let _ = queue.push_back(t);
                }
            }
        }
        if queue.is_empty() {
            self.ready_mask &= !(1 << level);
        }
        found
    }

    pub fn contains(&self, task: usize) -> bool {
        self.levels.iter().any(|q| q.iter().any(|&t| t == task))
    }

    /// Number of tasks queued at `priority`
    pub fn len_at(&self, priority: TaskPriority) -> usize {
        self.levels[priority.level()].len()
    }

    /// Tasks queued at `priority`, head first
    pub fn iter_level(&self, priority: TaskPriority) -> impl Iterator<Item = usize> + '_ {
        self.levels[priority.level()].iter().copied()
    }

    pub fn len(&self) -> usize {
        self.levels.iter().map(|q| q.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.ready_mask == 0
    }
}

impl Default for ReadyQueues {
    fn default() -> Self {
        Self::new()
    }
}
