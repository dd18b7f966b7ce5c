//! Software timer service
//!
//! Timers are driven by a dedicated service task, never by the tick
//! interrupt. Application calls only post commands to a bounded queue;
//! the service task drains the queue, keeps the active timers in a list
//! ordered by expiry, and runs expired callbacks in its own context.
//!
//! The service task body is a loop of three steps:
//!
//! ```text
//! loop {
//!     let dispatch = cell.critical(|k| k.timer_service_step())?;
//!     dispatch.run();                       // callbacks, outside the lock
//!     cell.critical(|k| k.timer_service_wait())?;
//! }
//! ```
//!
//! Author: Moroya Sakamoto

use heapless::{Deque, String, Vec};

use crate::config::{Features, MAX_TASK_NAME_LEN, MAX_TIMERS, TIMER_QUEUE_LENGTH};
use crate::error::KernelError;
use crate::kernel::{Kernel, Wait};
use crate::list::{DelayList, WaitList, WaitOrder};
use crate::port::Port;
use crate::table::{RawHandle, Table};
use crate::task::{TaskHandle, WaitObject, WakeReason};
use crate::tick::{reached, Tick, Timeout};

/// Timer expiry callback, run on the service task
pub type TimerFn = fn(TimerHandle);

/// Function deferred to the service task by [`Kernel::pend_function_call`]
pub type PendedFn = fn(usize, u32);

/// Callbacks one service step can hand out
const DISPATCH_CAPACITY: usize = MAX_TIMERS + TIMER_QUEUE_LENGTH;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(pub(crate) RawHandle);

pub struct Timer {
    name: String<MAX_TASK_NAME_LEN>,
    period: Tick,
    auto_reload: bool,
    callback: TimerFn,
    id: usize,
    active: bool,
    /// Next expiry, valid while active
    expiry: Tick,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Command {
    /// Start or restart, `period` after `issued`
    Start { timer: RawHandle, issued: Tick },
    Stop { timer: RawHandle },
    ChangePeriod { timer: RawHandle, period: Tick, issued: Tick },
    Delete { timer: RawHandle },
    Call { function: PendedFn, arg1: usize, arg2: u32 },
}

/// Timer table, active list and command queue
pub struct TimerService {
    timers: Table<Timer, MAX_TIMERS>,
    active: DelayList<MAX_TIMERS>,
    commands: Deque<Command, TIMER_QUEUE_LENGTH>,
    /// Tasks blocked on a full command queue
    pub(crate) senders: WaitList,
    /// The service task, once the scheduler has created it
    pub(crate) task: Option<usize>,
}

impl TimerService {
    pub const fn new() -> Self {
        Self {
            timers: Table::new(),
            active: DelayList::new(),
            commands: Deque::new(),
            senders: WaitList::new(WaitOrder::Priority),
            task: None,
        }
    }

    /// Put timer `i` on the active list to expire at `expiry`
    fn arm(&mut self, i: usize, expiry: Tick, now: Tick) {
        self.active.remove(i);
        let timer = &mut self.timers[i];
        timer.active = true;
        timer.expiry = expiry;
        self.active.insert(i, expiry, now);
    }

    fn disarm(&mut self, i: usize) {
        self.active.remove(i);
        self.timers[i].active = false;
    }

    /// Run timer `i`'s expiry at `expiry` and re-arm an auto-reload timer
    ///
    /// Periods missed while the service task could not run each produce a
    /// callback. Once the dispatch is full the timer stays armed at its
    /// first undelivered expiry, which the next step picks up.
    ///
    /// The caller guarantees room for the first callback.
    fn fire(&mut self, i: usize, expiry: Tick, now: Tick, dispatch: &mut TimerDispatch) {
        let handle = TimerHandle(self.timers.handle_of(i));
        let timer = &self.timers[i];
        let (callback, period, auto_reload) = (timer.callback, timer.period, timer.auto_reload);
        let _ = dispatch.items.push(Dispatch::Expired { callback, timer: handle });

        if !auto_reload {
            self.timers[i].active = false;
            return;
        }
        let mut next = expiry.wrapping_add(period);
        while reached(now, next) {
            if dispatch.items.push(Dispatch::Expired { callback, timer: handle }).is_err() {
                break;
            }
            next = next.wrapping_add(period);
        }
        self.arm(i, next, now);
    }

    fn process(&mut self, command: Command, now: Tick, dispatch: &mut TimerDispatch) {
        match command {
            Command::Start { timer, issued } => {
                // The timer may have been deleted after the command was posted
                let Some(i) = self.timers.resolve(timer) else { return };
                let expiry = issued.wrapping_add(self.timers[i].period);
                self.start_at(i, expiry, now, dispatch);
            }
            Command::Stop { timer } => {
                if let Some(i) = self.timers.resolve(timer) {
                    self.disarm(i);
                }
            }
            Command::ChangePeriod { timer, period, issued } => {
                let Some(i) = self.timers.resolve(timer) else { return };
                self.timers[i].period = period;
                self.start_at(i, issued.wrapping_add(period), now, dispatch);
            }
            Command::Delete { timer } => {
                if let Some(i) = self.timers.resolve(timer) {
                    self.disarm(i);
                    self.timers.remove_at(i);
                }
            }
            Command::Call { function, arg1, arg2 } => {
                let _ = dispatch.items.push(Dispatch::Call { function, arg1, arg2 });
            }
        }
    }

    fn start_at(&mut self, i: usize, expiry: Tick, now: Tick, dispatch: &mut TimerDispatch) {
        if reached(now, expiry) {
            // Expired while the command sat in the queue
            self.active.remove(i);
            self.timers[i].active = true;
            self.fire(i, expiry, now, dispatch);
        } else {
            self.arm(i, expiry, now);
        }
    }
}

impl Default for TimerService {
    fn default() -> Self {
        Self::new()
    }
}

/// Work handed out by one service step
#[derive(Debug, Clone, Copy)]
pub enum Dispatch {
    Expired { callback: TimerFn, timer: TimerHandle },
    Call { function: PendedFn, arg1: usize, arg2: u32 },
}

/// Callbacks to run, in order, after the kernel lock is released
#[must_use]
#[derive(Debug, Default)]
pub struct TimerDispatch {
    items: Vec<Dispatch, DISPATCH_CAPACITY>,
}

impl TimerDispatch {
    pub fn run(self) {
        for item in self.items {
            match item {
                Dispatch::Expired { callback, timer } => callback(timer),
                Dispatch::Call { function, arg1, arg2 } => function(arg1, arg2),
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Dispatch> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Leave room for the worst case of one timer firing
    fn is_full(&self) -> bool {
        self.items.len() >= DISPATCH_CAPACITY - 1
    }
}

impl<P: Port, const HEAP: usize> Kernel<P, HEAP> {
    /// Create a dormant timer firing `period` ticks after each start
    pub fn timer_create(
        &mut self,
        name: &str,
        period: Tick,
        auto_reload: bool,
        id: usize,
        callback: TimerFn,
    ) -> Result<TimerHandle, KernelError> {
        self.require(Features::SOFTWARE_TIMERS)?;
        if period == 0 {
            return Err(KernelError::InvalidArgument);
        }
        let mut label = String::new();
        for c in name.chars() {
            if label.push(c).is_err() {
                break;
            }
        }
        let timer = Timer { name: label, period, auto_reload, callback, id, active: false, expiry: 0 };
        let raw = self.timers.timers.insert(timer).map_err(|_| KernelError::TooManyObjects)?;
        log::debug!("timer '{}' created, period {}", name, period);
        Ok(TimerHandle(raw))
    }

    fn resolve_timer(&self, timer: TimerHandle) -> Result<usize, KernelError> {
        self.require(Features::SOFTWARE_TIMERS)?;
        self.timers.timers.resolve(timer.0).ok_or(KernelError::InvalidHandle)
    }

    /// Start the timer; a running timer restarts from now
    pub fn timer_start(&mut self, timer: TimerHandle, timeout: Timeout) -> Result<Wait<()>, KernelError> {
        self.resolve_timer(timer)?;
        let issued = self.ticks.now();
        self.post_command(Command::Start { timer: timer.0, issued }, timeout)
    }

    /// Restart the timer from now
    pub fn timer_reset(&mut self, timer: TimerHandle, timeout: Timeout) -> Result<Wait<()>, KernelError> {
        self.timer_start(timer, timeout)
    }

    pub fn timer_stop(&mut self, timer: TimerHandle, timeout: Timeout) -> Result<Wait<()>, KernelError> {
        self.resolve_timer(timer)?;
        self.post_command(Command::Stop { timer: timer.0 }, timeout)
    }

    /// Set a new period and (re)start the timer from now
    pub fn timer_change_period(&mut self, timer: TimerHandle, period: Tick, timeout: Timeout) -> Result<Wait<()>, KernelError> {
        self.resolve_timer(timer)?;
        if period == 0 {
            return Err(KernelError::InvalidArgument);
        }
        let issued = self.ticks.now();
        self.post_command(Command::ChangePeriod { timer: timer.0, period, issued }, timeout)
    }

    pub fn timer_delete(&mut self, timer: TimerHandle, timeout: Timeout) -> Result<Wait<()>, KernelError> {
        self.resolve_timer(timer)?;
        self.post_command(Command::Delete { timer: timer.0 }, timeout)
    }

    /// Run `function(arg1, arg2)` on the timer service task
    pub fn pend_function_call(&mut self, function: PendedFn, arg1: usize, arg2: u32, timeout: Timeout) -> Result<Wait<()>, KernelError> {
        self.require(Features::SOFTWARE_TIMERS)?;
        self.require(Features::PEND_FUNCTION_CALL)?;
        self.post_command(Command::Call { function, arg1, arg2 }, timeout)
    }

    pub fn timer_is_active(&self, timer: TimerHandle) -> Result<bool, KernelError> {
        let i = self.resolve_timer(timer)?;
        Ok(self.timers.timers[i].active)
    }

    pub fn timer_id(&self, timer: TimerHandle) -> Result<usize, KernelError> {
        let i = self.resolve_timer(timer)?;
        Ok(self.timers.timers[i].id)
    }

    pub fn timer_set_id(&mut self, timer: TimerHandle, id: usize) -> Result<(), KernelError> {
        let i = self.resolve_timer(timer)?;
        self.timers.timers[i].id = id;
        Ok(())
    }

    pub fn timer_period(&self, timer: TimerHandle) -> Result<Tick, KernelError> {
        let i = self.resolve_timer(timer)?;
        Ok(self.timers.timers[i].period)
    }

    pub fn timer_name(&self, timer: TimerHandle) -> Result<&str, KernelError> {
        let i = self.resolve_timer(timer)?;
        Ok(self.timers.timers[i].name.as_str())
    }

    /// Tick of the next expiry, `None` while dormant
    pub fn timer_expiry_time(&self, timer: TimerHandle) -> Result<Option<Tick>, KernelError> {
        let i = self.resolve_timer(timer)?;
        let t = &self.timers.timers[i];
        Ok(t.active.then_some(t.expiry))
    }

    fn post_command(&mut self, command: Command, timeout: Timeout) -> Result<Wait<()>, KernelError> {
        let object = WaitObject::TimerCommand;
        let prior = self.prior_wait(object);
        if self.timers.commands.push_back(command).is_ok() {
            self.wake_timer_service();
            self.preempt_check();
            return Ok(Wait::Done(()));
        }

        let Ok(deadline) = self.wait_deadline(timeout, prior) else {
            return Ok(Wait::TimedOut);
        };
        let cur = self.blocking_caller()?;
        if Some(cur) == self.timers.task {
            // Only the service task drains the queue
            return Err(KernelError::WouldDeadlock);
        }
        let priority = self.tasks[cur].priority;
        self.timers.senders.push(cur, priority);
        self.block_current(cur, object, deadline);
        Ok(Wait::Blocked)
    }

    /// Non-blocking post; returns (posted, woken task outranks the running one)
    pub(crate) fn post_command_from_isr(&mut self, command: Command) -> (bool, bool) {
        if self.timers.commands.push_back(command).is_err() {
            return (false, false);
        }
        (true, self.wake_timer_service())
    }

    fn wake_timer_service(&mut self) -> bool {
        match self.timers.task {
            Some(t) if self.tasks[t].waits_on(WaitObject::TimerService) => {
                self.wake(t, WakeReason::Signalled)
            }
            _ => false,
        }
    }

    /// Drain the command queue and collect expired timers
    ///
    /// Must be called from the timer service task. The returned dispatch
    /// is run after the kernel lock is released.
    pub fn timer_service_step(&mut self) -> Result<TimerDispatch, KernelError> {
        let cur = self.caller()?;
        if Some(cur) != self.timers.task {
            return Err(KernelError::NotTimerTask);
        }
        self.tasks[cur].wait = None;
        let now = self.ticks.now();
        let mut dispatch = TimerDispatch::default();

        while !dispatch.is_full() {
            let Some(command) = self.timers.commands.pop_front() else { break };
            if let Some(sender) = self.timers.senders.pop() {
                self.wake(sender, WakeReason::Signalled);
            }
            self.timers.process(command, now, &mut dispatch);
        }
        while !dispatch.is_full() {
            let Some(i) = self.timers.active.pop_expired(now) else { break };
            let expiry = self.timers.timers[i].expiry;
            self.timers.fire(i, expiry, now, &mut dispatch);
        }
        self.preempt_check();
        Ok(dispatch)
    }

    /// Block the service task until the next expiry or the next command
    ///
    /// Returns `false` without blocking if work is already due.
    pub fn timer_service_wait(&mut self) -> Result<bool, KernelError> {
        let cur = self.blocking_caller()?;
        if Some(cur) != self.timers.task {
            return Err(KernelError::NotTimerTask);
        }
        let now = self.ticks.now();
        let next = self.timers.active.next_deadline();
        if !self.timers.commands.is_empty() || next.is_some_and(|d| reached(now, d)) {
            return Ok(false);
        }
        self.block_current(cur, WaitObject::TimerService, next);
        Ok(true)
    }

    /// The timer service task, once the scheduler has started
    pub fn timer_service_task(&self) -> Option<TaskHandle> {
        self.timers.task.map(|t| self.handle(t))
    }

    /// Timers currently allocated
    pub fn timer_count(&self) -> usize {
        self.timers.timers.len()
    }
}

impl Command {
    pub(crate) fn start(timer: TimerHandle, issued: Tick) -> Self {
        Command::Start { timer: timer.0, issued }
    }

    pub(crate) fn stop(timer: TimerHandle) -> Self {
        Command::Stop { timer: timer.0 }
    }

    pub(crate) fn change_period(timer: TimerHandle, period: Tick, issued: Tick) -> Self {
        Command::ChangePeriod { timer: timer.0, period, issued }
    }

    pub(crate) fn call(function: PendedFn, arg1: usize, arg2: u32) -> Self {
        Command::Call { function, arg1, arg2 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    use crate::config::Config;
    use crate::task::TaskState;
    use crate::testing::{advance, kernel, kernel_with, service, settle, spawn};

    #[test]
    fn test_one_shot_fires_once() {
        static FIRED: AtomicU32 = AtomicU32::new(0);
        fn on_expiry(_t: TimerHandle) {
            FIRED.fetch_add(1, Ordering::SeqCst);
        }

        let mut k = kernel();
        spawn(&mut k, "app", 1);
        let t = k.timer_create("once", 10, false, 0, on_expiry).unwrap();
        assert_eq!(k.timer_is_active(t), Ok(false));
        k.launch().unwrap();
        settle(&mut k);

        assert_eq!(k.timer_start(t, Timeout::NONE), Ok(Wait::Done(())));
        settle(&mut k);
        assert_eq!(k.timer_is_active(t), Ok(true));
        assert_eq!(k.timer_expiry_time(t), Ok(Some(10)));

        advance(&mut k, 9);
        assert_eq!(FIRED.load(Ordering::SeqCst), 0);
        advance(&mut k, 1);
        assert_eq!(FIRED.load(Ordering::SeqCst), 1);
        assert_eq!(k.timer_is_active(t), Ok(false));
        advance(&mut k, 30);
        assert_eq!(FIRED.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_auto_reload_period() {
        static FIRED: AtomicU32 = AtomicU32::new(0);
        fn on_expiry(_t: TimerHandle) {
            FIRED.fetch_add(1, Ordering::SeqCst);
        }

        let mut k = kernel();
        let t = k.timer_create("tick", 5, true, 0, on_expiry).unwrap();
        assert_eq!(k.timer_start(t, Timeout::NONE), Ok(Wait::Done(())));
        k.launch().unwrap();
        settle(&mut k);

        advance(&mut k, 50);
        assert_eq!(FIRED.load(Ordering::SeqCst), 10);
        assert_eq!(k.timer_expiry_time(t), Ok(Some(55)));

        assert_eq!(k.timer_stop(t, Timeout::NONE), Ok(Wait::Done(())));
        settle(&mut k);
        advance(&mut k, 20);
        assert_eq!(FIRED.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_callback_receives_handle() {
        static SEEN: AtomicUsize = AtomicUsize::new(usize::MAX);
        fn on_expiry(t: TimerHandle) {
            SEEN.store(t.0.index(), Ordering::SeqCst);
        }

        let mut k = kernel();
        let _other = k.timer_create("other", 100, false, 1, on_expiry).unwrap();
        let t = k.timer_create("mine", 3, false, 42, on_expiry).unwrap();
        assert_eq!(k.timer_id(t), Ok(42));
        k.timer_set_id(t, 43).unwrap();
        assert_eq!(k.timer_id(t), Ok(43));
        assert_eq!(k.timer_name(t), Ok("mine"));
        assert_eq!(k.timer_start(t, Timeout::NONE), Ok(Wait::Done(())));
        k.launch().unwrap();
        settle(&mut k);
        advance(&mut k, 3);
        assert_eq!(SEEN.load(Ordering::SeqCst), t.0.index());
    }

    #[test]
    fn test_reset_and_change_period() {
        fn noop_timer(_t: TimerHandle) {}

        let mut k = kernel();
        spawn(&mut k, "app", 1);
        let t = k.timer_create("t", 10, false, 0, noop_timer).unwrap();
        k.launch().unwrap();
        settle(&mut k);

        assert_eq!(k.timer_start(t, Timeout::NONE), Ok(Wait::Done(())));
        settle(&mut k);
        advance(&mut k, 6);
        assert_eq!(k.timer_reset(t, Timeout::NONE), Ok(Wait::Done(())));
        settle(&mut k);
        assert_eq!(k.timer_expiry_time(t), Ok(Some(16)));

        assert_eq!(k.timer_change_period(t, 3, Timeout::NONE), Ok(Wait::Done(())));
        settle(&mut k);
        assert_eq!(k.timer_period(t), Ok(3));
        assert_eq!(k.timer_expiry_time(t), Ok(Some(9)));
        assert_eq!(k.timer_change_period(t, 0, Timeout::NONE), Err(KernelError::InvalidArgument));
    }

    #[test]
    fn test_delete_timer() {
        fn noop_timer(_t: TimerHandle) {}

        let mut k = kernel();
        let t = k.timer_create("t", 10, true, 0, noop_timer).unwrap();
        assert_eq!(k.timer_start(t, Timeout::NONE), Ok(Wait::Done(())));
        assert_eq!(k.timer_delete(t, Timeout::NONE), Ok(Wait::Done(())));
        k.launch().unwrap();
        settle(&mut k);
        assert_eq!(k.timer_is_active(t), Err(KernelError::InvalidHandle));
        assert_eq!(k.timer_count(), 0);
    }

    #[test]
    fn test_pend_function_call() {
        static ARGS: AtomicUsize = AtomicUsize::new(0);
        fn deferred(a: usize, b: u32) {
            ARGS.store(a * 1000 + b as usize, Ordering::SeqCst);
        }

        let mut k = kernel();
        spawn(&mut k, "app", 1);
        k.launch().unwrap();
        settle(&mut k);
        assert_eq!(k.pend_function_call(deferred, 7, 9, Timeout::NONE), Ok(Wait::Done(())));
        // Posting readied the higher-priority service task
        assert!(k.port().pending);
        settle(&mut k);
        assert_eq!(ARGS.load(Ordering::SeqCst), 7009);
    }

    #[test]
    fn test_full_command_queue_blocks_sender() {
        fn noop_timer(_t: TimerHandle) {}

        let mut k = kernel_with(Config::new().with_timer_task(1, crate::config::MINIMAL_STACK_SIZE * 2));
        let app = spawn(&mut k, "app", 2);
        let t = k.timer_create("t", 10, false, 0, noop_timer).unwrap();
        k.launch().unwrap();
        assert_eq!(k.current_task(), Some(app));

        for _ in 0..TIMER_QUEUE_LENGTH {
            assert_eq!(k.timer_start(t, Timeout::NONE), Ok(Wait::Done(())));
        }
        assert_eq!(k.timer_start(t, Timeout::NONE), Ok(Wait::TimedOut));
        assert_eq!(k.timer_start(t, Timeout::Forever), Ok(Wait::Blocked));
        service(&mut k);
        assert_eq!(k.task_state(app), Ok(TaskState::Blocked));

        // Lower-priority service task now runs and frees space
        settle(&mut k);
        assert_eq!(k.current_task(), Some(app));
        assert_eq!(k.timer_start(t, Timeout::Forever), Ok(Wait::Done(())));
    }

    /// Service task below the application, so it runs late
    fn late_service() -> Config {
        Config::new().with_timer_task(1, crate::config::MINIMAL_STACK_SIZE * 2)
    }

    /// Let the service task arm pending commands at tick 0, then keep the
    /// application busy until tick `until`
    fn run_app_until(k: &mut crate::testing::SimKernel, until: Tick) {
        assert_eq!(k.delay_for(1), Ok(()));
        settle(k);
        advance(k, until);
    }

    #[test]
    fn test_late_service_fires_overdue_before_new_timer() {
        static FIRED_A: AtomicU32 = AtomicU32::new(0);
        fn on_a(_t: TimerHandle) {
            FIRED_A.fetch_add(1, Ordering::SeqCst);
        }
        fn on_b(_t: TimerHandle) {}

        let mut k = kernel_with(late_service());
        let app = spawn(&mut k, "app", 2);
        let a = k.timer_create("a", 5, false, 0, on_a).unwrap();
        let b = k.timer_create("b", 100, false, 0, on_b).unwrap();
        k.launch().unwrap();
        assert_eq!(k.timer_start(a, Timeout::NONE), Ok(Wait::Done(())));
        run_app_until(&mut k, 8);
        assert_eq!(k.current_task(), Some(app));
        assert_eq!(k.tick_count(), 8);
        assert_eq!(FIRED_A.load(Ordering::SeqCst), 0);

        assert_eq!(k.timer_start(b, Timeout::NONE), Ok(Wait::Done(())));
        assert_eq!(k.delay_for(50), Ok(()));
        settle(&mut k);
        assert_eq!(FIRED_A.load(Ordering::SeqCst), 1);
        assert_eq!(k.timer_is_active(a), Ok(false));
        assert_eq!(k.timer_expiry_time(b), Ok(Some(108)));
    }

    #[test]
    fn test_late_service_reload_does_not_hide_overdue() {
        static FIRED_A: AtomicU32 = AtomicU32::new(0);
        static FIRED_B: AtomicU32 = AtomicU32::new(0);
        fn on_a(_t: TimerHandle) {
            FIRED_A.fetch_add(1, Ordering::SeqCst);
        }
        fn on_b(_t: TimerHandle) {
            FIRED_B.fetch_add(1, Ordering::SeqCst);
        }

        let mut k = kernel_with(late_service());
        spawn(&mut k, "app", 2);
        let a = k.timer_create("a", 5, true, 0, on_a).unwrap();
        let b = k.timer_create("b", 6, false, 0, on_b).unwrap();
        k.launch().unwrap();
        assert_eq!(k.timer_start(a, Timeout::NONE), Ok(Wait::Done(())));
        assert_eq!(k.timer_start(b, Timeout::NONE), Ok(Wait::Done(())));
        run_app_until(&mut k, 8);

        assert_eq!(k.delay_for(50), Ok(()));
        settle(&mut k);
        assert_eq!(FIRED_A.load(Ordering::SeqCst), 1);
        assert_eq!(FIRED_B.load(Ordering::SeqCst), 1);
        assert_eq!(k.timer_is_active(b), Ok(false));
        assert_eq!(k.timer_expiry_time(a), Ok(Some(10)));
    }

    #[test]
    fn test_catch_up_beyond_dispatch_capacity() {
        static FIRED: AtomicU32 = AtomicU32::new(0);
        fn on_expiry(_t: TimerHandle) {
            FIRED.fetch_add(1, Ordering::SeqCst);
        }

        let mut k = kernel_with(late_service());
        spawn(&mut k, "app", 2);
        let t = k.timer_create("fast", 1, true, 0, on_expiry).unwrap();
        k.launch().unwrap();
        assert_eq!(k.timer_start(t, Timeout::NONE), Ok(Wait::Done(())));
        run_app_until(&mut k, 40);
        assert_eq!(FIRED.load(Ordering::SeqCst), 0);

        // 40 periods came due, more than one dispatch holds
        assert_eq!(k.delay_for(100), Ok(()));
        settle(&mut k);
        assert_eq!(FIRED.load(Ordering::SeqCst), 40);
        assert_eq!(k.timer_expiry_time(t), Ok(Some(41)));
    }

    #[test]
    fn test_step_from_other_task_rejected() {
        let mut k = kernel();
        spawn(&mut k, "app", 1);
        k.launch().unwrap();
        settle(&mut k);
        assert_eq!(k.timer_service_step().map(|d| d.len()), Err(KernelError::NotTimerTask));
    }

    #[test]
    fn test_timers_disabled() {
        fn noop_timer(_t: TimerHandle) {}
        let mut k = kernel_with(Config::new().with_features(Features::empty()));
        assert_eq!(
            k.timer_create("t", 1, false, 0, noop_timer).map(|_| ()),
            Err(KernelError::Unsupported)
        );
    }
}
