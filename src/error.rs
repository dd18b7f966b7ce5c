//! Kernel error kinds
//!
//! [`KernelError`] is returned to the caller and leaves kernel state
//! untouched. [`Fault`] is an invariant violation; the kernel halts
//! through the port when one is raised.
//!
//! Author: Moroya Sakamoto

use core::fmt;

use crate::task::TaskHandle;

/// Recoverable error returned by a kernel operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// The heap could not satisfy a stack or queue-storage request
    AllocationFailed,
    /// The object table for this kind is full
    TooManyObjects,
    /// The handle does not name a live object
    InvalidHandle,
    /// Priority outside `0..max_priorities`
    InvalidPriority,
    /// Argument outside its documented range (item size, stack size, ...)
    InvalidArgument,
    /// Mutex released by a task that does not hold it
    NotOwner,
    /// Non-recursive mutex locked again by its holder
    WouldDeadlock,
    /// Object deleted while tasks are still blocked on it
    ObjectInUse,
    /// Blocking call before the scheduler started
    SchedulerNotRunning,
    /// Blocking call while the scheduler is locked
    SchedulerSuspended,
    AlreadyStarted,
    /// `resume_all` without a matching `suspend_all`
    NotSuspended,
    /// The idle task cannot be deleted or suspended
    IdleTask,
    /// Timer service work requested from another task
    NotTimerTask,
    /// The capability is disabled in [`Config::features`](crate::Config)
    Unsupported,
    InvalidConfig,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::AllocationFailed => "heap exhausted",
            Self::TooManyObjects => "object table full",
            Self::InvalidHandle => "stale or invalid handle",
            Self::InvalidPriority => "priority out of range",
            Self::InvalidArgument => "invalid argument",
            Self::NotOwner => "mutex not held by caller",
            Self::WouldDeadlock => "mutex already held by caller",
            Self::ObjectInUse => "tasks are blocked on the object",
            Self::SchedulerNotRunning => "scheduler not running",
            Self::SchedulerSuspended => "scheduler suspended",
            Self::AlreadyStarted => "scheduler already started",
            Self::NotSuspended => "scheduler not suspended",
            Self::IdleTask => "operation not allowed on the idle task",
            Self::NotTimerTask => "caller is not the timer service task",
            Self::Unsupported => "capability disabled",
            Self::InvalidConfig => "invalid configuration",
        };
        f.write_str(msg)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for KernelError {}

/// Unrecoverable kernel invariant violation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Guard bytes at the stack limit were overwritten
    StackOverflow(TaskHandle),
    /// Selection found every ready level empty (the idle task is gone)
    NoReadyTask,
    /// A task entry function returned with `delete_on_return` off
    TaskReturned(TaskHandle),
    /// A task was missing from the ready level it was recorded in
    CorruptReadyQueue,
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StackOverflow(t) => write!(f, "stack overflow in task {}", t.index()),
            Self::NoReadyTask => f.write_str("no ready task"),
            Self::TaskReturned(t) => write!(f, "task {} returned from its entry", t.index()),
            Self::CorruptReadyQueue => f.write_str("ready queue corrupted"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(KernelError::NotOwner.to_string(), "mutex not held by caller");
        assert_eq!(KernelError::AllocationFailed.to_string(), "heap exhausted");
    }

    #[test]
    fn test_fault_display() {
        assert_eq!(Fault::NoReadyTask.to_string(), "no ready task");
    }
}
