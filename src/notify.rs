//! Direct-to-task notification
//!
//! Every task carries one 32-bit value and a pending flag. A notifier
//! updates the value and, if the owner is waiting, readies it; the owner
//! consumes the notification with [`Kernel::notify_wait`] (event-bits
//! style) or [`Kernel::notify_take`] (counting-semaphore style).
//!
//! Author: Moroya Sakamoto

use crate::config::Features;
use crate::error::KernelError;
use crate::kernel::{Kernel, Wait};
use crate::port::Port;
use crate::task::{NotifyState, TaskHandle, WaitObject, WaitState, WakeReason};
use crate::tick::Timeout;

/// How a notification updates the target's value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyAction {
    /// Mark pending, leave the value
    NoAction,
    /// OR the bits into the value
    SetBits(u32),
    /// Add one (a "give")
    Increment,
    SetValueWithOverwrite(u32),
    /// Set the value only if no notification is pending
    SetValueWithoutOverwrite(u32),
}

impl<P: Port, const HEAP: usize> Kernel<P, HEAP> {
    /// Notify `task`
    ///
    /// Returns `false` only for [`NotifyAction::SetValueWithoutOverwrite`]
    /// on a task with a notification already pending.
    pub fn notify(&mut self, task: TaskHandle, action: NotifyAction) -> Result<bool, KernelError> {
        self.require(Features::TASK_NOTIFICATIONS)?;
        let t = self.resolve_task(task)?;
        let (delivered, _) = self.notify_index(t, action);
        self.preempt_check();
        Ok(delivered)
    }

    /// Returns (delivered, woken owner outranks the running task)
    pub(crate) fn notify_index(&mut self, t: usize, action: NotifyAction) -> (bool, bool) {
        let n = &mut self.tasks[t].notification;
        let previous = n.state;
        let delivered = match action {
            NotifyAction::NoAction => true,
            NotifyAction::SetBits(bits) => {
                n.value |= bits;
                true
            }
            NotifyAction::Increment => {
                n.value = n.value.wrapping_add(1);
                true
            }
            NotifyAction::SetValueWithOverwrite(v) => {
                n.value = v;
                true
            }
            NotifyAction::SetValueWithoutOverwrite(v) => {
                if previous == NotifyState::Pending {
                    false
                } else {
                    n.value = v;
                    true
                }
            }
        };
        n.state = NotifyState::Pending;

        let woken = if previous == NotifyState::Waiting && self.tasks[t].waits_on(WaitObject::Notification) {
            self.wake(t, WakeReason::Signalled)
        } else {
            false
        };
        (delivered, woken)
    }

    /// Wait for a notification and return the value it left
    ///
    /// Bits in `clear_on_entry` are cleared before the first attempt blocks,
    /// bits in `clear_on_exit` after the value is read.
    pub fn notify_wait(&mut self, clear_on_entry: u32, clear_on_exit: u32, timeout: Timeout) -> Result<Wait<u32>, KernelError> {
        self.require(Features::TASK_NOTIFICATIONS)?;
        let cur = self.caller()?;
        let prior = self.prior_wait(WaitObject::Notification);

        let n = &mut self.tasks[cur].notification;
        if n.state == NotifyState::Pending {
            let value = n.value;
            n.value &= !clear_on_exit;
            n.state = NotifyState::Idle;
            return Ok(Wait::Done(value));
        }
        if prior.is_none() {
            n.value &= !clear_on_entry;
        }
        self.block_for_notification(cur, timeout, prior)
    }

    /// Wait for the notification value to become non-zero, then decrement it
    /// (or zero it with `clear`) and return the value seen
    pub fn notify_take(&mut self, clear: bool, timeout: Timeout) -> Result<Wait<u32>, KernelError> {
        self.require(Features::TASK_NOTIFICATIONS)?;
        let cur = self.caller()?;
        let prior = self.prior_wait(WaitObject::Notification);

        let n = &mut self.tasks[cur].notification;
        if n.value != 0 {
            let value = n.value;
            n.value = if clear { 0 } else { value - 1 };
            n.state = NotifyState::Idle;
            return Ok(Wait::Done(value));
        }
        self.block_for_notification(cur, timeout, prior)
    }

    fn block_for_notification(
        &mut self,
        cur: usize,
        timeout: Timeout,
        prior: Option<WaitState>,
    ) -> Result<Wait<u32>, KernelError> {
        let Ok(deadline) = self.wait_deadline(timeout, prior) else {
            self.tasks[cur].notification.state = NotifyState::Idle;
            return Ok(Wait::TimedOut);
        };
        self.blocking_caller()?;
        self.tasks[cur].notification.state = NotifyState::Waiting;
        self.block_current(cur, WaitObject::Notification, deadline);
        Ok(Wait::Blocked)
    }

    /// Drop a pending notification; returns whether one was pending
    pub fn notify_clear(&mut self, task: TaskHandle) -> Result<bool, KernelError> {
        self.require(Features::TASK_NOTIFICATIONS)?;
        let t = self.resolve_task(task)?;
        let n = &mut self.tasks[t].notification;
        let was_pending = n.state == NotifyState::Pending;
        if was_pending {
            n.state = NotifyState::Idle;
        }
        Ok(was_pending)
    }

    pub fn notify_value(&self, task: TaskHandle) -> Result<u32, KernelError> {
        self.require(Features::TASK_NOTIFICATIONS)?;
        let t = self.resolve_task(task)?;
        Ok(self.tasks[t].notification.value)
    }
}
