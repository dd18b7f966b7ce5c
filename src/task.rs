//! Task control block
//!
//! A task owns a stack block carved from the kernel heap, a saved
//! execution context produced by the port, a base priority and an
//! effective priority (the base raised by any mutex inheritance).
//! Tasks are referenced inside the kernel by table index and outside it
//! by [`TaskHandle`], which also records the slot generation.
//!
//! Author: Moroya Sakamoto

use heapless::{String, Vec};

use crate::config::{MAX_HELD_MUTEXES, MAX_TASK_NAME_LEN, STACK_FILL_BYTE, STACK_GUARD_BYTES};
use crate::heap::Block;
use crate::table::RawHandle;
use crate::tick::Tick;

/// Task entry point, called once with the argument given at creation
pub type TaskFn = fn(usize);

/// Task priority (higher number = more urgent)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TaskPriority(pub u8);

impl TaskPriority {
    /// Reserved for the idle task, shared by background work
    pub const IDLE: TaskPriority = TaskPriority(0);
    pub const LOW: TaskPriority = TaskPriority(1);
    pub const NORMAL: TaskPriority = TaskPriority(2);
    pub const HIGH: TaskPriority = TaskPriority(3);

    /// Ready-queue level
    pub fn level(self) -> usize {
        self.0 as usize
    }
}

/// Opaque task identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle(pub(crate) RawHandle);

impl TaskHandle {
    /// Table slot, stable for the task's lifetime
    pub fn index(&self) -> usize {
        self.0.index()
    }
}

/// Task execution state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Eligible to run, queued at its effective priority
    Ready,
    /// Currently executing
    Running,
    /// Waiting for a deadline or a synchronization object
    Blocked,
    /// Removed from scheduling until resumed
    Suspended,
    /// Deleted, stack awaiting reclamation by the idle task
    Deleted,
}

/// What a blocked task is waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitObject {
    /// Plain delay, deadline only
    Delay,
    Semaphore(usize),
    Mutex(usize),
    /// Space in a full queue
    QueueSend(usize),
    /// Data in an empty queue
    QueueReceive(usize),
    /// Own notification slot
    Notification,
    /// Space in the timer command queue
    TimerCommand,
    /// Timer service task waiting for commands or the next expiry
    TimerService,
}

/// Why a blocked task was made ready again
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    /// The resource was handed to the task while it slept
    Acquired,
    /// The condition may now hold; the task re-checks it
    Signalled,
    TimedOut,
    /// Force-resumed or suspended while waiting
    Aborted,
}

/// Bookkeeping for a blocking call that spans a context switch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitState {
    pub object: WaitObject,
    /// Absolute deadline fixed by the first attempt
    pub deadline: Option<Tick>,
    /// Set when the task is woken, consumed by the repeated call
    pub outcome: Option<WakeReason>,
}

/// Direct-to-task notification slot state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyState {
    Idle,
    /// Owner is blocked in `notify_wait` / `notify_take`
    Waiting,
    /// A notification arrived and has not been consumed
    Pending,
}

#[derive(Debug, Clone, Copy)]
pub struct Notification {
    pub value: u32,
    pub state: NotifyState,
}

/// Task control block
pub struct Tcb<C> {
    pub name: String<MAX_TASK_NAME_LEN>,
    /// Priority assigned by the application
    pub base_priority: TaskPriority,
    /// Base priority raised by mutex inheritance
    pub priority: TaskPriority,
    pub state: TaskState,
    pub stack: Block,
    /// Saved execution context, owned by the port's switch code
    pub context: C,
    pub wait: Option<WaitState>,
    /// Indices of mutexes this task holds
    pub held: Vec<usize, MAX_HELD_MUTEXES>,
    pub notification: Notification,
    /// Times this task has been switched in
    pub run_count: u32,
}

impl<C> Tcb<C> {
    pub fn new(name: &str, priority: TaskPriority, stack: Block, context: C) -> Self {
        Self {
            name: truncate_name(name),
            base_priority: priority,
            priority,
            state: TaskState::Ready,
            stack,
            context,
            wait: None,
            held: Vec::new(),
            notification: Notification { value: 0, state: NotifyState::Idle },
            run_count: 0,
        }
    }

    /// Is the task waiting on `object`?
    pub fn waits_on(&self, object: WaitObject) -> bool {
        self.state == TaskState::Blocked && self.wait.map(|w| w.object) == Some(object)
    }

    /// Take the wake outcome for a repeated call on `object`
    ///
    /// A wait record for another object is stale (its call was abandoned)
    /// and is discarded.
    pub fn take_outcome(&mut self, object: WaitObject) -> Option<WaitState> {
        match self.wait {
            Some(w) if w.object == object && w.outcome.is_some() => self.wait.take(),
            Some(w) if w.object != object => {
                self.wait = None;
                None
            }
            _ => None,
        }
    }
}

fn truncate_name(name: &str) -> String<MAX_TASK_NAME_LEN> {
    let mut out = String::new();
    for c in name.chars() {
        if out.push(c).is_err() {
            break;
        }
    }
    out
}

/// Paint a fresh stack with the fill pattern
pub fn fill_stack(stack: &mut [u8]) {
    stack.fill(STACK_FILL_BYTE);
}

/// Bytes at the stack limit never written since creation
///
/// Stacks grow downward, so the limit is the lowest address.
pub fn high_water_mark(stack: &[u8]) -> usize {
    stack.iter().take_while(|&&b| b == STACK_FILL_BYTE).count()
}

/// Does the guard region at the stack limit still hold the fill pattern?
pub fn guard_intact(stack: &[u8]) -> bool {
    let guard = STACK_GUARD_BYTES.min(stack.len());
    stack[..guard].iter().all(|&b| b == STACK_FILL_BYTE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::Heap;

    fn block() -> Block {
        Heap::<64>::new().allocate(32).unwrap()
    }

    #[test]
    fn test_task_creation() {
        let tcb = Tcb::new("synth", TaskPriority::HIGH, block(), ());
        assert_eq!(tcb.state, TaskState::Ready);
        assert_eq!(tcb.priority, TaskPriority::HIGH);
        assert_eq!(tcb.base_priority, TaskPriority::HIGH);
        assert_eq!(tcb.name.as_str(), "synth");
    }

    #[test]
    fn test_name_truncated() {
        let tcb = Tcb::new("a-very-long-task-name", TaskPriority::LOW, block(), ());
        assert_eq!(tcb.name.len(), MAX_TASK_NAME_LEN);
        assert_eq!(tcb.name.as_str(), "a-very-long-task");
    }

    #[test]
    fn test_priority_ordering() {
        assert!(TaskPriority::HIGH > TaskPriority::NORMAL);
        assert!(TaskPriority::NORMAL > TaskPriority::LOW);
        assert!(TaskPriority::LOW > TaskPriority::IDLE);
        assert_eq!(TaskPriority::HIGH.level(), 3);
    }

    #[test]
    fn test_take_outcome() {
        let mut tcb = Tcb::new("t", TaskPriority::LOW, block(), ());
        tcb.wait = Some(WaitState {
            object: WaitObject::Semaphore(1),
            deadline: None,
            outcome: None,
        });
        // Not woken yet
        assert!(tcb.take_outcome(WaitObject::Semaphore(1)).is_none());
        assert!(tcb.wait.is_some());

        tcb.wait.as_mut().unwrap().outcome = Some(WakeReason::Acquired);
        let w = tcb.take_outcome(WaitObject::Semaphore(1)).unwrap();
        assert_eq!(w.outcome, Some(WakeReason::Acquired));
        assert!(tcb.wait.is_none());
    }

    #[test]
    fn test_stale_outcome_discarded() {
        let mut tcb = Tcb::new("t", TaskPriority::LOW, block(), ());
        tcb.wait = Some(WaitState {
            object: WaitObject::QueueReceive(0),
            deadline: Some(10),
            outcome: Some(WakeReason::TimedOut),
        });
        assert!(tcb.take_outcome(WaitObject::Mutex(0)).is_none());
        assert!(tcb.wait.is_none());
    }

    #[test]
    fn test_stack_watermark() {
        let mut stack = [0u8; 64];
        fill_stack(&mut stack);
        assert_eq!(high_water_mark(&stack), 64);
        assert!(guard_intact(&stack));

        // Frame pushed at the top (high addresses)
        stack[40..].fill(0);
        assert_eq!(high_water_mark(&stack), 40);
        assert!(guard_intact(&stack));

        stack[3] = 0;
        assert!(!guard_intact(&stack));
        assert_eq!(high_water_mark(&stack), 3);
    }
}
