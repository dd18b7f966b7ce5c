//! Interrupt-context API
//!
//! An interrupt handler cannot block and must not switch context itself.
//! [`IsrContext`] exposes only the non-blocking operations; each reports
//! whether it readied a task that outranks the interrupted one. The handler
//! ends with [`IsrContext::yield_from_isr`] to request the switch on exit.
//! A woken task that is never yielded to still gets the processor at the
//! next tick.
//!
//! ```text
//! fn uart_rx_isr() {
//!     KERNEL.from_isr(|isr| {
//!         let _ = isr.queue_send_to_back(RX_QUEUE, &[byte]);
//!         isr.yield_from_isr();
//!     });
//! }
//! ```
//!
//! Author: Moroya Sakamoto

use crate::config::Features;
use crate::error::KernelError;
use crate::kernel::Kernel;
use crate::notify::NotifyAction;
use crate::port::Port;
use crate::sync::queue::SendPosition;
use crate::sync::{QueueHandle, SemaphoreHandle};
use crate::task::TaskHandle;
use crate::tick::Tick;
use crate::timers::{Command, PendedFn, TimerHandle};

/// Non-blocking kernel access from an interrupt handler
pub struct IsrContext<'a, P: Port, const HEAP: usize> {
    kernel: &'a mut Kernel<P, HEAP>,
    woken: bool,
}

impl<P: Port, const HEAP: usize> Kernel<P, HEAP> {
    /// Borrow the interrupt-safe operation set
    pub fn isr(&mut self) -> IsrContext<'_, P, HEAP> {
        IsrContext { kernel: self, woken: false }
    }
}

impl<'a, P: Port, const HEAP: usize> IsrContext<'a, P, HEAP> {
    fn woke(&mut self, preempt: bool) {
        if preempt {
            self.woken = true;
            self.kernel.yield_pending = true;
        }
    }

    /// Did any call so far ready a task above the interrupted one?
    pub fn higher_priority_woken(&self) -> bool {
        self.woken
    }

    /// Request the switch a woken task needs, taking effect when the
    /// handler returns
    pub fn yield_from_isr(&mut self) -> bool {
        if self.woken {
            self.kernel.request_switch();
        }
        self.woken
    }

    pub fn tick_count(&self) -> Tick {
        self.kernel.tick_count()
    }

    /// Give a semaphore; `false` if it was full
    pub fn semaphore_give(&mut self, sem: SemaphoreHandle) -> Result<bool, KernelError> {
        let s = self.kernel.resolve_semaphore(sem)?;
        let (given, preempt) = self.kernel.give_semaphore(s);
        self.woke(preempt);
        Ok(given)
    }

    /// Take a semaphore unit if one is available
    pub fn semaphore_take(&mut self, sem: SemaphoreHandle) -> Result<bool, KernelError> {
        let s = self.kernel.resolve_semaphore(sem)?;
        Ok(self.kernel.try_take_semaphore(s))
    }

    /// Append to a queue; `false` if it was full
    pub fn queue_send_to_back(&mut self, queue: QueueHandle, item: &[u8]) -> Result<bool, KernelError> {
        self.send(queue, item, SendPosition::Back)
    }

    pub fn queue_send_to_front(&mut self, queue: QueueHandle, item: &[u8]) -> Result<bool, KernelError> {
        self.send(queue, item, SendPosition::Front)
    }

    /// Replace the item of a length-1 queue
    pub fn queue_overwrite(&mut self, queue: QueueHandle, item: &[u8]) -> Result<(), KernelError> {
        self.send(queue, item, SendPosition::Overwrite).map(|_| ())
    }

    fn send(&mut self, queue: QueueHandle, item: &[u8], position: SendPosition) -> Result<bool, KernelError> {
        let q = self.kernel.resolve_queue(queue)?;
        self.kernel.check_item(q, item.len())?;
        if position != SendPosition::Overwrite && self.kernel.queues[q].ring.is_full() {
            return Ok(false);
        }
        let preempt = self.kernel.place_item(q, item, position)?;
        self.woke(preempt);
        Ok(true)
    }

    /// Remove the oldest item into `out`; `false` if the queue was empty
    pub fn queue_receive(&mut self, queue: QueueHandle, out: &mut [u8]) -> Result<bool, KernelError> {
        self.read(queue, out, true)
    }

    pub fn queue_peek(&mut self, queue: QueueHandle, out: &mut [u8]) -> Result<bool, KernelError> {
        self.read(queue, out, false)
    }

    fn read(&mut self, queue: QueueHandle, out: &mut [u8], remove: bool) -> Result<bool, KernelError> {
        let q = self.kernel.resolve_queue(queue)?;
        self.kernel.check_item(q, out.len())?;
        if self.kernel.queues[q].ring.is_empty() {
            return Ok(false);
        }
        let preempt = self.kernel.take_item(q, out, remove);
        self.woke(preempt);
        Ok(true)
    }

    pub fn queue_messages_waiting(&self, queue: QueueHandle) -> Result<usize, KernelError> {
        self.kernel.queue_messages_waiting(queue)
    }

    pub fn notify(&mut self, task: TaskHandle, action: NotifyAction) -> Result<bool, KernelError> {
        self.kernel.require(Features::TASK_NOTIFICATIONS)?;
        let t = self.kernel.resolve_task(task)?;
        let (delivered, preempt) = self.kernel.notify_index(t, action);
        self.woke(preempt);
        Ok(delivered)
    }

    /// Increment the target's notification value
    pub fn notify_give(&mut self, task: TaskHandle) -> Result<(), KernelError> {
        self.notify(task, NotifyAction::Increment).map(|_| ())
    }

    /// Resume a suspended task; returns whether it outranks the interrupted one
    pub fn resume(&mut self, task: TaskHandle) -> Result<bool, KernelError> {
        self.kernel.require(Features::TASK_SUSPEND)?;
        let t = self.kernel.resolve_task(task)?;
        let preempt = self.kernel.resume_index(t);
        self.woke(preempt);
        Ok(preempt)
    }

    /// Post a timer command; `false` if the command queue was full
    pub fn timer_start(&mut self, timer: TimerHandle) -> Result<bool, KernelError> {
        self.kernel.timer_is_active(timer)?;
        let issued = self.kernel.tick_count();
        self.post(Command::start(timer, issued))
    }

    pub fn timer_reset(&mut self, timer: TimerHandle) -> Result<bool, KernelError> {
        self.timer_start(timer)
    }

    pub fn timer_stop(&mut self, timer: TimerHandle) -> Result<bool, KernelError> {
        self.kernel.timer_is_active(timer)?;
        self.post(Command::stop(timer))
    }

    pub fn timer_change_period(&mut self, timer: TimerHandle, period: Tick) -> Result<bool, KernelError> {
        self.kernel.timer_is_active(timer)?;
        if period == 0 {
            return Err(KernelError::InvalidArgument);
        }
        let issued = self.kernel.tick_count();
        self.post(Command::change_period(timer, period, issued))
    }

    /// Defer `function(arg1, arg2)` to the timer service task
    pub fn pend_function_call(&mut self, function: PendedFn, arg1: usize, arg2: u32) -> Result<bool, KernelError> {
        self.kernel.require(Features::SOFTWARE_TIMERS)?;
        self.kernel.require(Features::PEND_FUNCTION_CALL)?;
        self.post(Command::call(function, arg1, arg2))
    }

    fn post(&mut self, command: Command) -> Result<bool, KernelError> {
        let (posted, preempt) = self.kernel.post_command_from_isr(command);
        self.woke(preempt);
        Ok(posted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::kernel::Wait;
    use crate::task::TaskState;
    use crate::testing::{advance, kernel, kernel_with, service, settle, spawn};
    use crate::tick::Timeout;

    fn config() -> Config {
        Config::new().with_features(Features::all() - Features::SOFTWARE_TIMERS)
    }

    #[test]
    fn test_give_wakes_blocked_task() {
        let mut k = kernel_with(config());
        let handler = spawn(&mut k, "handler", 3);
        let worker = spawn(&mut k, "worker", 1);
        let sem = k.semaphore_create_binary().unwrap();
        k.launch().unwrap();
        assert_eq!(k.semaphore_take(sem, Timeout::Forever), Ok(Wait::Blocked));
        service(&mut k);
        assert_eq!(k.current_task(), Some(worker));

        let mut isr = k.isr();
        assert_eq!(isr.semaphore_give(sem), Ok(true));
        assert!(isr.higher_priority_woken());
        assert!(isr.yield_from_isr());
        assert!(k.port().pending);
        service(&mut k);
        assert_eq!(k.current_task(), Some(handler));
    }

    #[test]
    fn test_woken_task_runs_at_next_tick_without_yield() {
        let mut k = kernel_with(config());
        let handler = spawn(&mut k, "handler", 3);
        spawn(&mut k, "worker", 1);
        let q = k.queue_create(2, 1).unwrap();
        k.launch().unwrap();
        let mut out = [0u8; 1];
        assert_eq!(k.queue_receive(q, &mut out, Timeout::Forever), Ok(Wait::Blocked));
        service(&mut k);

        let mut isr = k.isr();
        assert_eq!(isr.queue_send_to_back(q, &[5]), Ok(true));
        assert!(isr.higher_priority_woken());
        advance(&mut k, 1);
        assert_eq!(k.current_task(), Some(handler));
        assert_eq!(k.queue_receive(q, &mut out, Timeout::Forever), Ok(Wait::Done(())));
        assert_eq!(out, [5]);
    }

    #[test]
    fn test_queue_full_and_empty() {
        let mut k = kernel_with(config());
        let q = k.queue_create(1, 1).unwrap();
        let mut isr = k.isr();
        let mut out = [0u8; 1];
        assert_eq!(isr.queue_receive(q, &mut out), Ok(false));
        assert_eq!(isr.queue_send_to_back(q, &[1]), Ok(true));
        assert_eq!(isr.queue_send_to_front(q, &[2]), Ok(false));
        isr.queue_overwrite(q, &[3]).unwrap();
        assert_eq!(isr.queue_messages_waiting(q), Ok(1));
        assert_eq!(isr.queue_peek(q, &mut out), Ok(true));
        assert_eq!(out, [3]);
        assert!(!isr.higher_priority_woken());
    }

    #[test]
    fn test_semaphore_take_never_blocks() {
        let mut k = kernel_with(config());
        let sem = k.semaphore_create_counting(2, 1).unwrap();
        let mut isr = k.isr();
        assert_eq!(isr.semaphore_take(sem), Ok(true));
        assert_eq!(isr.semaphore_take(sem), Ok(false));
    }

    #[test]
    fn test_notify_give_and_resume() {
        let mut k = kernel_with(config());
        let a = spawn(&mut k, "a", 3);
        let b = spawn(&mut k, "b", 1);
        k.launch().unwrap();
        k.suspend(a).unwrap();
        service(&mut k);
        assert_eq!(k.current_task(), Some(b));

        let mut isr = k.isr();
        isr.notify_give(a).unwrap();
        assert!(!isr.higher_priority_woken());
        assert_eq!(isr.resume(a), Ok(true));
        assert!(isr.yield_from_isr());
        service(&mut k);
        assert_eq!(k.current_task(), Some(a));
        assert_eq!(k.task_state(b), Ok(TaskState::Ready));
        assert_eq!(k.notify_take(true, Timeout::NONE), Ok(Wait::Done(1)));
    }

    #[test]
    fn test_timer_commands_from_isr() {
        static CALLED: core::sync::atomic::AtomicBool = core::sync::atomic::AtomicBool::new(false);
        fn deferred(_a: usize, _b: u32) {
            CALLED.store(true, core::sync::atomic::Ordering::SeqCst);
        }
        fn noop_timer(_t: TimerHandle) {}

        let mut k = kernel();
        spawn(&mut k, "app", 1);
        let t = k.timer_create("t", 4, false, 0, noop_timer).unwrap();
        k.launch().unwrap();
        settle(&mut k);

        let mut isr = k.isr();
        assert_eq!(isr.timer_start(t), Ok(true));
        assert_eq!(isr.pend_function_call(deferred, 0, 0), Ok(true));
        assert!(isr.yield_from_isr());
        settle(&mut k);
        assert_eq!(k.timer_is_active(t), Ok(true));
        assert!(CALLED.load(core::sync::atomic::Ordering::SeqCst));
    }
}
