//! Binary and counting semaphores
//!
//! Waiters are served in arrival order. A unit given while tasks wait is
//! handed straight to the longest waiter, so a task that wakes never has
//! to contend for it again.
//!
//! Author: Moroya Sakamoto

use crate::config::Features;
use crate::error::KernelError;
use crate::kernel::{Kernel, Wait};
use crate::list::{WaitList, WaitOrder};
use crate::port::Port;
use crate::table::RawHandle;
use crate::task::{WaitObject, WaitState, WakeReason};
use crate::tick::Timeout;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SemaphoreHandle(pub(crate) RawHandle);

pub struct Semaphore {
    pub(crate) count: u32,
    pub(crate) max: u32,
    pub(crate) waiters: WaitList,
}

impl Semaphore {
    fn new(max: u32, initial: u32) -> Self {
        Self { count: initial, max, waiters: WaitList::new(WaitOrder::Fifo) }
    }
}

impl<P: Port, const HEAP: usize> Kernel<P, HEAP> {
    /// Create a binary semaphore, initially empty
    pub fn semaphore_create_binary(&mut self) -> Result<SemaphoreHandle, KernelError> {
        self.insert_semaphore(Semaphore::new(1, 0))
    }

    /// Create a counting semaphore holding `initial` of at most `max` units
    pub fn semaphore_create_counting(&mut self, max: u32, initial: u32) -> Result<SemaphoreHandle, KernelError> {
        self.require(Features::COUNTING_SEMAPHORES)?;
        if max == 0 || initial > max {
            return Err(KernelError::InvalidArgument);
        }
        self.insert_semaphore(Semaphore::new(max, initial))
    }

    fn insert_semaphore(&mut self, sem: Semaphore) -> Result<SemaphoreHandle, KernelError> {
        let max = sem.max;
        let raw = self.semaphores.insert(sem).map_err(|_| KernelError::TooManyObjects)?;
        log::debug!("semaphore {} created, max {}", raw.index(), max);
        Ok(SemaphoreHandle(raw))
    }

    pub(crate) fn resolve_semaphore(&self, sem: SemaphoreHandle) -> Result<usize, KernelError> {
        self.semaphores.resolve(sem.0).ok_or(KernelError::InvalidHandle)
    }

    /// Take one unit, blocking up to `timeout` while none is available
    pub fn semaphore_take(&mut self, sem: SemaphoreHandle, timeout: Timeout) -> Result<Wait<()>, KernelError> {
        let s = self.resolve_semaphore(sem)?;
        let object = WaitObject::Semaphore(s);
        let prior = self.prior_wait(object);
        if let Some(WaitState { outcome: Some(WakeReason::Acquired), .. }) = prior {
            return Ok(Wait::Done(()));
        }
        if self.try_take_semaphore(s) {
            return Ok(Wait::Done(()));
        }

        let Ok(deadline) = self.wait_deadline(timeout, prior) else {
            return Ok(Wait::TimedOut);
        };
        let cur = self.blocking_caller()?;
        let priority = self.tasks[cur].priority;
        self.semaphores[s].waiters.push(cur, priority);
        self.block_current(cur, object, deadline);
        Ok(Wait::Blocked)
    }

    pub(crate) fn try_take_semaphore(&mut self, s: usize) -> bool {
        let sem = &mut self.semaphores[s];
        if sem.count > 0 {
            sem.count -= 1;
            true
        } else {
            false
        }
    }

    /// Give one unit back
    ///
    /// Returns `false` if the semaphore was already full.
    pub fn semaphore_give(&mut self, sem: SemaphoreHandle) -> Result<bool, KernelError> {
        let s = self.resolve_semaphore(sem)?;
        let (given, _) = self.give_semaphore(s);
        self.preempt_check();
        Ok(given)
    }

    /// Returns (given, woken task outranks the running one)
    pub(crate) fn give_semaphore(&mut self, s: usize) -> (bool, bool) {
        if let Some(w) = self.semaphores[s].waiters.pop() {
            return (true, self.wake(w, WakeReason::Acquired));
        }
        let sem = &mut self.semaphores[s];
        if sem.count < sem.max {
            sem.count += 1;
            (true, false)
        } else {
            (false, false)
        }
    }

    /// Units currently available
    pub fn semaphore_count(&self, sem: SemaphoreHandle) -> Result<u32, KernelError> {
        let s = self.resolve_semaphore(sem)?;
        Ok(self.semaphores[s].count)
    }

    /// Delete a semaphore no task is waiting on
    pub fn semaphore_delete(&mut self, sem: SemaphoreHandle) -> Result<(), KernelError> {
        let s = self.resolve_semaphore(sem)?;
        if !self.semaphores[s].waiters.is_empty() {
            return Err(KernelError::ObjectInUse);
        }
        self.semaphores.remove_at(s);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::task::{TaskPriority, TaskState};
    use crate::testing::{advance, kernel_with, service, spawn};

    fn config() -> Config {
        Config::new().with_features(Features::all() - Features::SOFTWARE_TIMERS)
    }

    #[test]
    fn test_binary_starts_empty() {
        let mut k = kernel_with(config());
        let sem = k.semaphore_create_binary().unwrap();
        assert_eq!(k.semaphore_count(sem), Ok(0));
        assert_eq!(k.semaphore_take(sem, Timeout::NONE), Ok(Wait::TimedOut));
        assert_eq!(k.semaphore_give(sem), Ok(true));
        assert_eq!(k.semaphore_give(sem), Ok(false));
        assert_eq!(k.semaphore_take(sem, Timeout::NONE), Ok(Wait::Done(())));
    }

    #[test]
    fn test_counting_bounds() {
        let mut k = kernel_with(config());
        assert_eq!(k.semaphore_create_counting(0, 0), Err(KernelError::InvalidArgument));
        assert_eq!(k.semaphore_create_counting(2, 3), Err(KernelError::InvalidArgument));
        let sem = k.semaphore_create_counting(3, 2).unwrap();
        assert_eq!(k.semaphore_give(sem), Ok(true));
        assert_eq!(k.semaphore_give(sem), Ok(false));
        assert_eq!(k.semaphore_count(sem), Ok(3));
    }

    #[test]
    fn test_counting_disabled() {
        let mut k = kernel_with(Config::new().with_features(Features::empty()));
        assert_eq!(k.semaphore_create_counting(4, 0), Err(KernelError::Unsupported));
        assert!(k.semaphore_create_binary().is_ok());
    }

    #[test]
    fn test_take_blocks_until_give() {
        let mut k = kernel_with(config());
        let waiter = spawn(&mut k, "waiter", 3);
        let giver = spawn(&mut k, "giver", 1);
        let sem = k.semaphore_create_binary().unwrap();
        k.launch().unwrap();

        assert_eq!(k.semaphore_take(sem, Timeout::Forever), Ok(Wait::Blocked));
        service(&mut k);
        assert_eq!(k.current_task(), Some(giver));
        assert_eq!(k.task_state(waiter), Ok(TaskState::Blocked));

        assert_eq!(k.semaphore_give(sem), Ok(true));
        service(&mut k);
        assert_eq!(k.current_task(), Some(waiter));
        // Unit was handed over, not counted
        assert_eq!(k.semaphore_count(sem), Ok(0));
        assert_eq!(k.semaphore_take(sem, Timeout::Forever), Ok(Wait::Done(())));
    }

    #[test]
    fn test_take_times_out() {
        let mut k = kernel_with(config());
        spawn(&mut k, "a", 2);
        let sem = k.semaphore_create_binary().unwrap();
        k.launch().unwrap();

        assert_eq!(k.semaphore_take(sem, Timeout::Ticks(10)), Ok(Wait::Blocked));
        service(&mut k);
        advance(&mut k, 9);
        assert_eq!(k.current_task(), k.idle_task());
        advance(&mut k, 1);
        assert_eq!(k.semaphore_take(sem, Timeout::Ticks(10)), Ok(Wait::TimedOut));
        // Late give is kept for the next taker
        assert_eq!(k.semaphore_give(sem), Ok(true));
        assert_eq!(k.semaphore_count(sem), Ok(1));
    }

    #[test]
    fn test_waiters_served_fifo() {
        let mut k = kernel_with(config());
        let first = spawn(&mut k, "first", 1);
        let second = spawn(&mut k, "second", 2);
        let sem = k.semaphore_create_counting(5, 0).unwrap();
        k.launch().unwrap();

        // second (priority 2) runs first; make first wait before it
        k.delay_for(1).unwrap();
        service(&mut k);
        assert_eq!(k.current_task(), Some(first));
        assert_eq!(k.semaphore_take(sem, Timeout::Forever), Ok(Wait::Blocked));
        service(&mut k);
        advance(&mut k, 1);
        assert_eq!(k.current_task(), Some(second));
        assert_eq!(k.semaphore_take(sem, Timeout::Forever), Ok(Wait::Blocked));
        service(&mut k);
        assert_eq!(k.current_task(), k.idle_task());

        k.semaphore_give(sem).unwrap();
        assert_eq!(k.task_state(first), Ok(TaskState::Ready));
        assert_eq!(k.task_state(second), Ok(TaskState::Blocked));
    }

    #[test]
    fn test_delete_with_waiter_rejected() {
        let mut k = kernel_with(config());
        spawn(&mut k, "a", 2);
        let sem = k.semaphore_create_binary().unwrap();
        k.launch().unwrap();
        let _ = k.semaphore_take(sem, Timeout::Forever);
        service(&mut k);
        assert_eq!(k.semaphore_delete(sem), Err(KernelError::ObjectInUse));
        k.semaphore_give(sem).unwrap();
        assert_eq!(k.semaphore_delete(sem), Ok(()));
        assert_eq!(k.semaphore_give(sem), Err(KernelError::InvalidHandle));
    }

    #[test]
    fn test_take_from_task_before_start() {
        let mut k = kernel_with(config());
        spawn(&mut k, "a", TaskPriority::LOW.0);
        let sem = k.semaphore_create_counting(2, 1).unwrap();
        assert_eq!(k.semaphore_take(sem, Timeout::NONE), Ok(Wait::Done(())));
        assert_eq!(k.semaphore_take(sem, Timeout::Forever), Err(KernelError::SchedulerNotRunning));
    }
}
