//! Delayed and blocked task lists
//!
//! Both lists hold task table indices, never references, so a deleted
//! task is removed by index and no list can dangle.
//!
//! Author: Moroya Sakamoto

use heapless::Vec;

use crate::config::MAX_TASKS;
use crate::task::TaskPriority;
use crate::tick::{reached, Tick};

/// Entries sleeping until an absolute tick, earliest deadline first
///
/// Holds task indices for the kernel and timer indices for the timer
/// service.
pub struct DelayList<const N: usize = MAX_TASKS> {
    entries: Vec<(Tick, usize), N>,
}

impl<const N: usize> DelayList<N> {
    pub const fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Insert `task` to wake at `deadline`
    ///
    /// Entries are ordered by signed distance from `now`, so entries already
    /// due stay ahead of every future one, earliest first. Distances shrink
    /// together as time advances, so the order holds between inserts.
    /// Equal deadlines keep insertion order.
    pub fn insert(&mut self, task: usize, deadline: Tick, now: Tick) {
        let key = distance(now, deadline);
        let pos = self
            .entries
            .iter()
            .position(|&(d, _)| distance(now, d) > key)
            .unwrap_or(self.entries.len());
        // Capacity equals the owning table size; an index appears at most once
        let _ = self.entries.insert(pos, (deadline, task));
    }

    pub fn remove(&mut self, task: usize) -> bool {
        match self.entries.iter().position(|&(_, t)| t == task) {
            Some(pos) => {
                self.entries.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Earliest deadline, found in constant time
    pub fn next_deadline(&self) -> Option<Tick> {
        self.entries.first().map(|&(d, _)| d)
    }

    /// Remove and return the head if its deadline has been reached
    pub fn pop_expired(&mut self, now: Tick) -> Option<usize> {
        match self.entries.first() {
            Some(&(d, _)) if reached(now, d) => Some(self.entries.remove(0).1),
            _ => None,
        }
    }

    pub fn contains(&self, task: usize) -> bool {
        self.entries.iter().any(|&(_, t)| t == task)
    }

    pub fn deadline_of(&self, task: usize) -> Option<Tick> {
        self.entries.iter().find(|&&(_, t)| t == task).map(|&(d, _)| d)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Ticks from `now` to `deadline`, negative once reached
fn distance(now: Tick, deadline: Tick) -> i32 {
    deadline.wrapping_sub(now) as i32
}

impl<const N: usize> Default for DelayList<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Wake order of a [`WaitList`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOrder {
    /// Longest waiter first
    Fifo,
    /// Highest effective priority first, FIFO among equals
    Priority,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Waiter {
    task: usize,
    priority: TaskPriority,
}

/// Tasks blocked on one synchronization object
pub struct WaitList {
    order: WaitOrder,
    waiters: Vec<Waiter, MAX_TASKS>,
}

impl WaitList {
    pub const fn new(order: WaitOrder) -> Self {
        Self { order, waiters: Vec::new() }
    }

    pub fn push(&mut self, task: usize, priority: TaskPriority) {
        let waiter = Waiter { task, priority };
        let pos = match self.order {
            WaitOrder::Fifo => self.waiters.len(),
            WaitOrder::Priority => self
                .waiters
                .iter()
                .position(|w| w.priority < priority)
                .unwrap_or(self.waiters.len()),
        };
        let _ = self.waiters.insert(pos, waiter);
    }

    /// Next task to wake
    pub fn pop(&mut self) -> Option<usize> {
        if self.waiters.is_empty() {
            None
        } else {
            Some(self.waiters.remove(0).task)
        }
    }

    pub fn front(&self) -> Option<usize> {
        self.waiters.first().map(|w| w.task)
    }

    pub fn remove(&mut self, task: usize) -> bool {
        match self.waiters.iter().position(|w| w.task == task) {
            Some(pos) => {
                self.waiters.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Record a waiter's new effective priority, re-sorting if ordered by it
    pub fn reprioritize(&mut self, task: usize, priority: TaskPriority) {
        if self.remove(task) {
            self.push(task, priority);
        }
    }

    /// Highest effective priority among the waiters
    pub fn highest_priority(&self) -> Option<TaskPriority> {
        self.waiters.iter().map(|w| w.priority).max()
    }

    pub fn contains(&self, task: usize) -> bool {
        self.waiters.iter().any(|w| w.task == task)
    }

    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }
}
