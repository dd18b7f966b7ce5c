//! Kernel — scheduler core
//!
//! Owns the task table, ready queues, delayed list, heap and every
//! synchronization object, and decides at each event which task runs.
//! The kernel is a plain value: the port wraps it in a critical section
//! (see [`KernelCell`](crate::KernelCell)) and drives it from the switch
//! and tick interrupts.
//!
//! Blocking calls never spin. A call that cannot complete marks the
//! caller `Blocked`, requests a switch and returns [`Wait::Blocked`]. Once
//! the task runs again it repeats the same call, which then completes,
//! blocks again for what remains of the original timeout, or reports
//! [`Wait::TimedOut`].
//!
//! Author: Moroya Sakamoto

use core::convert::Infallible;

use heapless::Vec;

use crate::config::{Config, Features, MAX_MUTEXES, MAX_QUEUES, MAX_SEMAPHORES, MAX_TASKS};
use crate::error::{Fault, KernelError};
use crate::heap::Heap;
use crate::list::DelayList;
use crate::port::Port;
use crate::scheduler::ReadyQueues;
use crate::sync::{Mutex, Queue, Semaphore};
use crate::table::Table;
use crate::task::{
    self, NotifyState, TaskFn, TaskHandle, TaskPriority, TaskState, Tcb, WaitObject, WaitState,
    WakeReason,
};
use crate::tick::{reached, Tick, TickCounter, Timeout, MAX_DELAY};
use crate::timers::TimerService;

/// Result of a call that may block the calling task
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait<T> {
    /// Completed
    Done(T),
    /// The caller is now blocked and a switch has been requested; repeat
    /// the call once the task runs again
    Blocked,
    /// The timeout elapsed (or the wait was aborted) first
    TimedOut,
}

impl<T> Wait<T> {
    pub fn is_done(&self) -> bool {
        matches!(self, Wait::Done(_))
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, Wait::Blocked)
    }

    pub fn done(self) -> Option<T> {
        match self {
            Wait::Done(v) => Some(v),
            _ => None,
        }
    }
}

/// Scheduler run state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    NotStarted,
    Running,
    /// Locked by [`Kernel::suspend_all`]
    Suspended,
}

/// Kernel execution statistics
#[derive(Debug, Clone, Copy, Default)]
pub struct KernelStats {
    /// Switches that changed the running task
    pub context_switches: u64,
    /// Tick interrupts seen, pended ones included
    pub ticks: u64,
    /// Passes of the idle task
    pub idle_passes: u64,
}

/// Scheduler core
///
/// `HEAP` is the size in bytes of the arena task stacks and queue
/// storage are carved from.
pub struct Kernel<P: Port, const HEAP: usize> {
    pub(crate) config: Config,
    pub(crate) port: P,
    pub(crate) heap: Heap<HEAP>,
    pub(crate) tasks: Table<Tcb<P::Context>, MAX_TASKS>,
    pub(crate) ready: ReadyQueues,
    pub(crate) delayed: DelayList,
    /// Tasks readied while the scheduler was locked
    pending_ready: Vec<usize, MAX_TASKS>,
    /// Self-deleted tasks whose stacks the idle task frees
    reclaim: Vec<usize, MAX_TASKS>,
    pub(crate) current: Option<usize>,
    idle: Option<usize>,
    pub(crate) ticks: TickCounter,
    started: bool,
    pub(crate) suspend_depth: u32,
    pended_ticks: u32,
    /// A switch was wanted where it could not be requested directly
    pub(crate) yield_pending: bool,
    slice_left: Tick,
    stats: KernelStats,
    pub(crate) semaphores: Table<Semaphore, MAX_SEMAPHORES>,
    pub(crate) mutexes: Table<Mutex, MAX_MUTEXES>,
    pub(crate) queues: Table<Queue, MAX_QUEUES>,
    pub(crate) timers: TimerService,
}

impl<P: Port, const HEAP: usize> Kernel<P, HEAP> {
    /// Create a kernel; usable in a `static` initializer
    pub const fn new(config: Config, port: P) -> Self {
        Self {
            config,
            port,
            heap: Heap::new(),
            tasks: Table::new(),
            ready: ReadyQueues::new(),
            delayed: DelayList::new(),
            pending_ready: Vec::new(),
            reclaim: Vec::new(),
            current: None,
            idle: None,
            ticks: TickCounter::new(),
            started: false,
            suspend_depth: 0,
            pended_ticks: 0,
            yield_pending: false,
            slice_left: 0,
            stats: KernelStats { context_switches: 0, ticks: 0, idle_passes: 0 },
            semaphores: Table::new(),
            mutexes: Table::new(),
            queues: Table::new(),
            timers: TimerService::new(),
        }
    }

    // ------------------------------------------------------------------
    // Task lifecycle
    // ------------------------------------------------------------------

    /// Create a task, ready at `priority`
    ///
    /// `stack_size` is in bytes and must be at least the configured
    /// minimal stack size. Before the scheduler starts the task is only
    /// registered; afterwards a higher-priority task preempts the caller.
    pub fn create_task(
        &mut self,
        entry: TaskFn,
        name: &str,
        stack_size: usize,
        priority: TaskPriority,
        arg: usize,
    ) -> Result<TaskHandle, KernelError> {
        if priority.level() >= self.config.max_priorities {
            return Err(KernelError::InvalidPriority);
        }
        let t = self.spawn(entry, name, stack_size, priority, arg)?;
        self.preempt_check();
        Ok(self.handle(t))
    }

    fn spawn(
        &mut self,
        entry: TaskFn,
        name: &str,
        stack_size: usize,
        priority: TaskPriority,
        arg: usize,
    ) -> Result<usize, KernelError> {
        if stack_size < self.config.minimal_stack_size {
            return Err(KernelError::InvalidArgument);
        }
        if self.tasks.is_full() {
            return Err(self.allocation_failed());
        }
        let stack = match self.heap.allocate(stack_size) {
            Some(block) => block,
            None => return Err(self.allocation_failed()),
        };

        let memory = self.heap.bytes_mut(stack);
        task::fill_stack(memory);
        let context = self.port.init_context(memory, entry, arg);

        let tcb = Tcb::new(name, priority, stack, context);
        let t = match self.tasks.insert(tcb) {
            Ok(raw) => raw.index(),
            Err(_) => {
                self.heap.free(stack);
                return Err(self.allocation_failed());
            }
        };
        log::debug!("task '{}' created, priority {}, {} byte stack", name, priority.0, stack.len());
        self.make_ready(t);
        Ok(t)
    }

    /// Delete a task, releasing its stack and any mutexes it holds
    ///
    /// A task deleting itself keeps its stack until the idle task runs.
    pub fn delete(&mut self, task: TaskHandle) -> Result<(), KernelError> {
        self.require(Features::TASK_DELETE)?;
        let t = self.resolve_task(task)?;
        self.delete_index(t)
    }

    fn delete_index(&mut self, t: usize) -> Result<(), KernelError> {
        if Some(t) == self.idle {
            return Err(KernelError::IdleTask);
        }
        let is_current = self.started && Some(t) == self.current;
        if is_current && self.suspend_depth > 0 {
            return Err(KernelError::SchedulerSuspended);
        }

        self.unschedule(t);
        let held = self.tasks[t].held.clone();
        for m in held {
            self.release_mutex(m, t);
        }
        if self.timers.task == Some(t) {
            self.timers.task = None;
        }
        self.tasks[t].state = TaskState::Deleted;
        log::debug!("task '{}' deleted", self.tasks[t].name);

        if is_current {
            let _ = self.reclaim.push(t);
            self.request_switch();
        } else {
            self.free_task(t);
            self.preempt_check();
        }
        Ok(())
    }

    fn free_task(&mut self, t: usize) {
        if let Some(tcb) = self.tasks.remove_at(t) {
            self.heap.free(tcb.stack);
        }
    }

    /// Called by the port when a task's entry function returns
    pub fn exit_current(&mut self) -> Result<(), KernelError> {
        let cur = self.current.ok_or(KernelError::SchedulerNotRunning)?;
        if !self.config.delete_on_return {
            let handle = self.handle(cur);
            self.fatal(Fault::TaskReturned(handle));
        }
        self.delete_index(cur)
    }

    /// Remove a task from whatever structure schedules it
    fn unschedule(&mut self, t: usize) {
        match self.tasks[t].state {
            TaskState::Ready => {
                let prio = self.tasks[t].priority;
                if !self.ready.remove(t, prio) && !remove_index(&mut self.pending_ready, t) {
                    self.fatal(Fault::CorruptReadyQueue);
                }
            }
            TaskState::Blocked => self.abort_wait(t),
            TaskState::Running | TaskState::Suspended | TaskState::Deleted => {}
        }
        self.delayed.remove(t);
    }

    /// Remove `task` from scheduling until [`resume`](Self::resume)
    ///
    /// Suspending a blocked task abandons its wait.
    pub fn suspend(&mut self, task: TaskHandle) -> Result<(), KernelError> {
        self.require(Features::TASK_SUSPEND)?;
        let t = self.resolve_task(task)?;
        if Some(t) == self.idle {
            return Err(KernelError::IdleTask);
        }
        let is_current = self.started && Some(t) == self.current;
        if is_current && self.suspend_depth > 0 {
            return Err(KernelError::SchedulerSuspended);
        }
        if self.tasks[t].state == TaskState::Suspended {
            return Ok(());
        }

        self.unschedule(t);
        self.tasks[t].state = TaskState::Suspended;
        log::debug!("task '{}' suspended", self.tasks[t].name);
        if is_current {
            self.request_switch();
        }
        Ok(())
    }

    /// Make a suspended task ready, or force a blocked task out of its wait
    ///
    /// A force-resumed wait reports [`Wait::TimedOut`] when repeated.
    pub fn resume(&mut self, task: TaskHandle) -> Result<(), KernelError> {
        self.require(Features::TASK_SUSPEND)?;
        let t = self.resolve_task(task)?;
        self.resume_index(t);
        self.preempt_check();
        Ok(())
    }

    /// Returns whether the resumed task outranks the running one
    pub(crate) fn resume_index(&mut self, t: usize) -> bool {
        match self.tasks[t].state {
            TaskState::Suspended => self.make_ready(t),
            TaskState::Blocked => {
                self.abort_wait(t);
                self.make_ready(t)
            }
            _ => false,
        }
    }

    /// Change a task's base priority
    ///
    /// The effective priority stays raised while the task holds a mutex
    /// that a higher-priority task waits on.
    pub fn set_priority(&mut self, task: TaskHandle, priority: TaskPriority) -> Result<(), KernelError> {
        self.require(Features::PRIORITY_QUERY)?;
        if priority.level() >= self.config.max_priorities {
            return Err(KernelError::InvalidPriority);
        }
        let t = self.resolve_task(task)?;
        self.tasks[t].base_priority = priority;
        self.refresh_priority(t);
        self.preempt_check();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Scheduler
    // ------------------------------------------------------------------

    /// Create the idle (and timer service) task and select the first task
    ///
    /// This is the bookkeeping half of [`start_scheduler`](Self::start_scheduler);
    /// it returns the task the port must launch.
    pub fn launch(&mut self) -> Result<TaskHandle, KernelError> {
        if self.started {
            return Err(KernelError::AlreadyStarted);
        }
        if !self.config.validate() {
            return Err(KernelError::InvalidConfig);
        }

        let idle = self.spawn(P::IDLE_ENTRY, "IDLE", self.config.minimal_stack_size, TaskPriority::IDLE, 0)?;
        self.idle = Some(idle);

        if self.config.has(Features::SOFTWARE_TIMERS) {
            let priority = TaskPriority(self.config.timer_task_priority as u8);
            let stack = self.config.timer_task_stack_size;
            match self.spawn(P::TIMER_ENTRY, "Tmr Svc", stack, priority, 0) {
                Ok(t) => self.timers.task = Some(t),
                Err(e) => {
                    self.free_task_unscheduled(idle);
                    self.idle = None;
                    return Err(e);
                }
            }
        }

        self.started = true;
        self.current = None;
        self.switch_context();
        let first = self.current.ok_or(KernelError::SchedulerNotRunning)?;
        log::info!(
            "scheduler started: {} tasks, {} Hz tick, first task '{}'",
            self.tasks.len(),
            self.config.tick_rate_hz,
            self.tasks[first].name
        );
        Ok(self.handle(first))
    }

    fn free_task_unscheduled(&mut self, t: usize) {
        self.unschedule(t);
        self.free_task(t);
    }

    /// Start scheduling; on success control passes to the first task for good
    pub fn start_scheduler(&mut self) -> Result<Infallible, KernelError> {
        self.launch()?;
        let first = self.current.ok_or(KernelError::SchedulerNotRunning)?;
        let context = &self.tasks[first].context;
        self.port.start_first_task(context)
    }

    /// Pick the task to run next; called by the port's switch handler
    ///
    /// A still-runnable outgoing task goes to the tail of its level, so
    /// equal-priority tasks rotate.
    pub fn switch_context(&mut self) {
        if !self.started {
            return;
        }
        if self.suspend_depth > 0 {
            self.yield_pending = true;
            return;
        }
        self.yield_pending = false;

        if let Some(cur) = self.current {
            let state = self.tasks[cur].state;
            if self.config.check_stack_overflow
                && state != TaskState::Deleted
                && !task::guard_intact(self.heap.bytes(self.tasks[cur].stack))
            {
                let handle = self.handle(cur);
                self.fatal(Fault::StackOverflow(handle));
            }
            if state == TaskState::Running {
                let prio = self.tasks[cur].priority;
                self.tasks[cur].state = TaskState::Ready;
                self.ready.push_back(cur, prio);
            }
        }

        let next = match self.ready.pop_highest() {
            Some(t) => t,
            None => self.fatal(Fault::NoReadyTask),
        };
        if self.current != Some(next) {
            self.stats.context_switches += 1;
            log::trace!("switch to '{}'", self.tasks[next].name);
        }
        let tcb = &mut self.tasks[next];
        tcb.state = TaskState::Running;
        tcb.run_count = tcb.run_count.wrapping_add(1);
        self.current = Some(next);
        self.slice_left = self.config.time_slice_ticks;
    }

    /// Head of the highest non-empty ready level
    ///
    /// The running task is not in the ready queues; this is the task that
    /// would replace it.
    pub fn select_next_task(&self) -> Option<TaskHandle> {
        self.ready.peek_highest().map(|t| self.handle(t))
    }

    /// Process one tick; called from the tick interrupt
    ///
    /// Wakes every delayed task whose deadline has been reached and applies
    /// the time-slice policy. Returns whether a switch is required, in
    /// which case it has already been requested from the port.
    pub fn on_tick(&mut self) -> bool {
        self.stats.ticks += 1;
        if self.suspend_depth > 0 {
            self.pended_ticks += 1;
            self.port.tick();
            return false;
        }

        let mut switch = self.increment_tick();
        self.port.tick();
        if self.yield_pending {
            switch = true;
        }
        if switch {
            self.request_switch();
        }
        switch
    }

    fn increment_tick(&mut self) -> bool {
        let now = self.ticks.advance();
        let mut switch = false;
        while let Some(t) = self.delayed.pop_expired(now) {
            switch |= self.expire(t);
        }

        if self.started && self.config.preemption && self.config.time_slicing {
            if let Some(cur) = self.running() {
                if self.ready.len_at(self.tasks[cur].priority) > 0 {
                    self.slice_left = self.slice_left.saturating_sub(1);
                    if self.slice_left == 0 {
                        switch = true;
                    }
                }
            }
        }
        switch
    }

    /// Deadline of a delayed or blocked task reached
    fn expire(&mut self, t: usize) -> bool {
        let wait = self.tasks[t].wait;
        match wait {
            Some(WaitState { object: WaitObject::Delay, .. }) => self.tasks[t].wait = None,
            Some(w) => {
                self.detach(t, w.object);
                self.set_outcome(t, WakeReason::TimedOut);
            }
            None => {}
        }
        self.make_ready(t)
    }

    /// Give up the processor to the next task of equal priority
    pub fn yield_now(&mut self) -> Result<(), KernelError> {
        self.blocking_caller()?;
        self.request_switch();
        Ok(())
    }

    /// Block the calling task for `ticks` ticks
    ///
    /// The task becomes ready on the first tick at or after `now + ticks`.
    /// A zero delay is a yield.
    pub fn delay_for(&mut self, ticks: Tick) -> Result<(), KernelError> {
        let cur = self.blocking_caller()?;
        if ticks == 0 {
            self.request_switch();
            return Ok(());
        }
        let deadline = self.ticks.now().wrapping_add(ticks.min(MAX_DELAY));
        self.block_current(cur, WaitObject::Delay, Some(deadline));
        Ok(())
    }

    /// Block the calling task until absolute tick `wake`
    ///
    /// Returns `false` without blocking if `wake` has already been reached.
    pub fn delay_until(&mut self, wake: Tick) -> Result<bool, KernelError> {
        let cur = self.blocking_caller()?;
        if reached(self.ticks.now(), wake) {
            return Ok(false);
        }
        self.block_current(cur, WaitObject::Delay, Some(wake));
        Ok(true)
    }

    /// Periodic delay: advance `last_wake` by `period` and sleep until it
    ///
    /// The next deadline is computed from the previous one, not from the
    /// current tick, so a fixed-rate loop does not drift.
    pub fn delay_until_next(&mut self, last_wake: &mut Tick, period: Tick) -> Result<bool, KernelError> {
        self.blocking_caller()?;
        *last_wake = last_wake.wrapping_add(period);
        self.delay_until(*last_wake)
    }

    /// Lock the scheduler; calls nest
    ///
    /// The running task keeps the processor. Ticks are counted and replayed
    /// by [`resume_all`](Self::resume_all).
    pub fn suspend_all(&mut self) {
        self.suspend_depth += 1;
    }

    /// Undo one [`suspend_all`](Self::suspend_all)
    ///
    /// Returns whether a switch was requested.
    pub fn resume_all(&mut self) -> Result<bool, KernelError> {
        if self.suspend_depth == 0 {
            return Err(KernelError::NotSuspended);
        }
        self.suspend_depth -= 1;
        if self.suspend_depth > 0 {
            return Ok(false);
        }

        let pending = core::mem::take(&mut self.pending_ready);
        for t in pending {
            let prio = self.tasks[t].priority;
            self.ready.push_back(t, prio);
        }
        while self.pended_ticks > 0 {
            self.pended_ticks -= 1;
            if self.increment_tick() {
                self.yield_pending = true;
            }
        }

        if self.yield_pending || self.should_preempt() {
            self.request_switch();
            return Ok(true);
        }
        Ok(false)
    }

    /// One pass of the idle task: reclaim deleted tasks and run the idle hook
    pub fn idle_step(&mut self) {
        while let Some(t) = self.reclaim.pop() {
            if Some(t) == self.current {
                let _ = self.reclaim.push(t);
                break;
            }
            self.free_task(t);
        }
        self.stats.idle_passes += 1;
        self.port.idle();

        if self.config.idle_should_yield
            && self.current.is_some()
            && self.current == self.idle
            && self.ready.len_at(TaskPriority::IDLE) > 0
        {
            self.request_switch();
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn current_task(&self) -> Option<TaskHandle> {
        self.current.map(|t| self.handle(t))
    }

    /// Saved context of the running task
    pub fn current_context(&self) -> Option<&P::Context> {
        self.current.map(|t| &self.tasks[t].context)
    }

    pub fn current_context_mut(&mut self) -> Option<&mut P::Context> {
        let t = self.current?;
        Some(&mut self.tasks[t].context)
    }

    pub fn idle_task(&self) -> Option<TaskHandle> {
        self.idle.map(|t| self.handle(t))
    }

    pub fn tick_count(&self) -> Tick {
        self.ticks.now()
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn scheduler_state(&self) -> Result<SchedulerState, KernelError> {
        self.require(Features::SCHEDULER_STATE_QUERY)?;
        Ok(if !self.started {
            SchedulerState::NotStarted
        } else if self.suspend_depth > 0 {
            SchedulerState::Suspended
        } else {
            SchedulerState::Running
        })
    }

    /// State of a task; a self-deleted task reads `Deleted` until reclaimed
    pub fn task_state(&self, task: TaskHandle) -> Result<TaskState, KernelError> {
        self.tasks
            .get(task.0)
            .map(|tcb| tcb.state)
            .ok_or(KernelError::InvalidHandle)
    }

    pub fn task_name(&self, task: TaskHandle) -> Result<&str, KernelError> {
        let t = self.resolve_task(task)?;
        Ok(self.tasks[t].name.as_str())
    }

    /// Times the task has been switched in
    pub fn task_run_count(&self, task: TaskHandle) -> Result<u32, KernelError> {
        let t = self.resolve_task(task)?;
        Ok(self.tasks[t].run_count)
    }

    /// Effective priority
    pub fn priority(&self, task: TaskHandle) -> Result<TaskPriority, KernelError> {
        self.require(Features::PRIORITY_QUERY)?;
        let t = self.resolve_task(task)?;
        Ok(self.tasks[t].priority)
    }

    /// Priority set by the application, ignoring inheritance
    pub fn base_priority(&self, task: TaskHandle) -> Result<TaskPriority, KernelError> {
        self.require(Features::PRIORITY_QUERY)?;
        let t = self.resolve_task(task)?;
        Ok(self.tasks[t].base_priority)
    }

    /// Smallest amount of stack, in bytes, the task has never touched
    pub fn stack_high_water_mark(&self, task: TaskHandle) -> Result<usize, KernelError> {
        self.require(Features::STACK_HIGH_WATER_MARK)?;
        let t = self.resolve_task(task)?;
        Ok(task::high_water_mark(self.heap.bytes(self.tasks[t].stack)))
    }

    /// Stack memory of a task, for ports that save frames on it
    pub fn task_stack_mut(&mut self, task: TaskHandle) -> Result<&mut [u8], KernelError> {
        let t = self.resolve_task(task)?;
        let stack = self.tasks[t].stack;
        Ok(self.heap.bytes_mut(stack))
    }

    /// Live tasks, including idle and the timer service
    pub fn task_count(&self) -> usize {
        self.tasks.iter().filter(|(_, tcb)| tcb.state != TaskState::Deleted).count()
    }

    pub fn free_heap(&self) -> usize {
        self.heap.free_bytes()
    }

    pub fn minimum_ever_free_heap(&self) -> usize {
        self.heap.minimum_ever_free()
    }

    pub fn stats(&self) -> KernelStats {
        self.stats
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    // ------------------------------------------------------------------
    // Internals shared with the synchronization modules
    // ------------------------------------------------------------------

    pub(crate) fn handle(&self, t: usize) -> TaskHandle {
        TaskHandle(self.tasks.handle_of(t))
    }

    /// Live task index for a handle; deleted tasks are not resolvable
    pub(crate) fn resolve_task(&self, task: TaskHandle) -> Result<usize, KernelError> {
        match self.tasks.resolve(task.0) {
            Some(t) if self.tasks[t].state != TaskState::Deleted => Ok(t),
            _ => Err(KernelError::InvalidHandle),
        }
    }

    pub(crate) fn require(&self, feature: Features) -> Result<(), KernelError> {
        if self.config.has(feature) {
            Ok(())
        } else {
            Err(KernelError::Unsupported)
        }
    }

    /// The running task, if the scheduler has started
    pub(crate) fn running(&self) -> Option<usize> {
        match self.current {
            Some(t) if self.started && self.tasks[t].state == TaskState::Running => Some(t),
            _ => None,
        }
    }

    /// The calling task, for operations that need an identity but never block
    pub(crate) fn caller(&self) -> Result<usize, KernelError> {
        self.running().ok_or(KernelError::SchedulerNotRunning)
    }

    /// The calling task, checked for being allowed to block
    pub(crate) fn blocking_caller(&self) -> Result<usize, KernelError> {
        let cur = self.caller()?;
        if self.suspend_depth > 0 {
            return Err(KernelError::SchedulerSuspended);
        }
        Ok(cur)
    }

    /// Wake record of the caller's previous attempt at waiting on `object`
    pub(crate) fn prior_wait(&mut self, object: WaitObject) -> Option<WaitState> {
        let cur = self.running()?;
        self.tasks[cur].take_outcome(object)
    }

    /// Deadline for a wait that cannot complete now, `Err(())` to time out
    ///
    /// A repeated call keeps the deadline of its first attempt.
    pub(crate) fn wait_deadline(
        &self,
        timeout: Timeout,
        prior: Option<WaitState>,
    ) -> Result<Option<Tick>, ()> {
        let now = self.ticks.now();
        match prior {
            Some(WaitState { outcome: Some(WakeReason::Signalled), deadline, .. }) => match deadline {
                Some(d) if reached(now, d) => Err(()),
                d => Ok(d),
            },
            Some(_) => Err(()),
            None if timeout.is_zero() => Err(()),
            None => Ok(timeout.deadline(now)),
        }
    }

    /// Move the calling task to `Blocked` and request a switch
    pub(crate) fn block_current(&mut self, cur: usize, object: WaitObject, deadline: Option<Tick>) {
        let tcb = &mut self.tasks[cur];
        tcb.state = TaskState::Blocked;
        tcb.wait = Some(WaitState { object, deadline, outcome: None });
        if let Some(d) = deadline {
            self.delayed.insert(cur, d, self.ticks.now());
        }
        self.request_switch();
    }

    pub(crate) fn set_outcome(&mut self, t: usize, reason: WakeReason) {
        if let Some(w) = self.tasks[t].wait.as_mut() {
            w.outcome = Some(reason);
        }
    }

    /// Wake a blocked task already removed from its object's wait list
    ///
    /// Returns whether it outranks the running task.
    pub(crate) fn wake(&mut self, t: usize, reason: WakeReason) -> bool {
        self.set_outcome(t, reason);
        self.make_ready(t)
    }

    /// Queue a task as ready; returns whether it outranks the running task
    pub(crate) fn make_ready(&mut self, t: usize) -> bool {
        self.delayed.remove(t);
        let prio = self.tasks[t].priority;
        self.tasks[t].state = TaskState::Ready;
        if self.suspend_depth > 0 {
            let _ = self.pending_ready.push(t);
        } else {
            self.ready.push_back(t, prio);
        }
        match self.running() {
            Some(cur) => self.config.preemption && prio > self.tasks[cur].priority,
            None => false,
        }
    }

    /// End a blocked task's wait without satisfying it
    fn abort_wait(&mut self, t: usize) {
        self.delayed.remove(t);
        let wait = self.tasks[t].wait;
        match wait {
            Some(WaitState { object: WaitObject::Delay, .. }) => self.tasks[t].wait = None,
            Some(w) => {
                self.detach(t, w.object);
                self.set_outcome(t, WakeReason::Aborted);
            }
            None => {}
        }
    }

    /// Remove `t` from the wait list of `object`
    fn detach(&mut self, t: usize, object: WaitObject) {
        match object {
            WaitObject::Delay | WaitObject::TimerService => {}
            WaitObject::Semaphore(s) => {
                if let Some(sem) = self.semaphores.at_mut(s) {
                    sem.waiters.remove(t);
                }
            }
            WaitObject::Mutex(m) => {
                let owner = self.mutexes.at_mut(m).and_then(|mx| {
                    mx.waiters.remove(t);
                    mx.owner
                });
                // The owner may have inherited this waiter's priority
                if let Some(owner) = owner {
                    self.refresh_priority(owner);
                }
            }
            WaitObject::QueueSend(q) => {
                if let Some(queue) = self.queues.at_mut(q) {
                    queue.senders.remove(t);
                }
            }
            WaitObject::QueueReceive(q) => {
                if let Some(queue) = self.queues.at_mut(q) {
                    queue.receivers.remove(t);
                }
            }
            WaitObject::Notification => {
                let n = &mut self.tasks[t].notification;
                if n.state == NotifyState::Waiting {
                    n.state = NotifyState::Idle;
                }
            }
            WaitObject::TimerCommand => {
                self.timers.senders.remove(t);
            }
        }
    }

    /// Would the highest ready task preempt the running one?
    pub(crate) fn should_preempt(&self) -> bool {
        if !self.config.preemption || self.suspend_depth > 0 {
            return false;
        }
        match (self.running(), self.ready.highest_level()) {
            (Some(cur), Some(level)) => level > self.tasks[cur].priority.level(),
            _ => false,
        }
    }

    /// Request a switch if a ready task now outranks the running one
    pub(crate) fn preempt_check(&mut self) {
        if self.should_preempt() {
            self.request_switch();
        }
    }

    pub(crate) fn request_switch(&mut self) {
        if !self.started {
            return;
        }
        if self.suspend_depth > 0 {
            self.yield_pending = true;
            return;
        }
        self.port.request_switch();
    }

    pub(crate) fn allocation_failed(&mut self) -> KernelError {
        log::warn!("allocation failed, {} heap bytes free", self.heap.free_bytes());
        self.port.allocation_failed();
        KernelError::AllocationFailed
    }

    /// Halt on an invariant violation
    pub(crate) fn fatal(&mut self, fault: Fault) -> ! {
        log::error!("kernel fault: {}", fault);
        P::mask_interrupts();
        self.started = false;
        if let Fault::StackOverflow(handle) = fault {
            let name = self.tasks[handle.index()].name.clone();
            self.port.stack_overflow(handle, name.as_str());
        }
        self.port.halt()
    }

    // ------------------------------------------------------------------
    // Priority inheritance
    // ------------------------------------------------------------------

    /// Highest priority among the waiters of mutexes `t` holds
    fn inherited_priority(&self, t: usize) -> TaskPriority {
        self.tasks[t]
            .held
            .iter()
            .filter_map(|&m| self.mutexes.at(m))
            .filter_map(|mx| mx.waiters.highest_priority())
            .max()
            .unwrap_or(TaskPriority::IDLE)
    }

    /// Recompute `t`'s effective priority and propagate along the chain of
    /// mutex owners it is blocked behind
    pub(crate) fn refresh_priority(&mut self, t: usize) {
        let mut t = t;
        for _ in 0..MAX_TASKS {
            let target = self.tasks[t].base_priority.max(self.inherited_priority(t));
            if target == self.tasks[t].priority {
                return;
            }
            match self.set_effective(t, target) {
                Some(owner) => t = owner,
                None => return,
            }
        }
    }

    /// Change the effective priority of `t` and re-queue it
    ///
    /// Returns the owner of the mutex `t` waits on, whose inherited
    /// priority may change as a result.
    fn set_effective(&mut self, t: usize, priority: TaskPriority) -> Option<usize> {
        let old = self.tasks[t].priority;
        self.tasks[t].priority = priority;
        log::trace!("task '{}' effective priority {} -> {}", self.tasks[t].name, old.0, priority.0);

        match self.tasks[t].state {
            TaskState::Ready => {
                if self.ready.remove(t, old) {
                    self.ready.push_back(t, priority);
                }
                None
            }
            TaskState::Blocked => match self.tasks[t].wait.map(|w| w.object) {
                Some(WaitObject::Mutex(m)) => self.mutexes.at_mut(m).and_then(|mx| {
                    mx.waiters.reprioritize(t, priority);
                    mx.owner
                }),
                Some(WaitObject::QueueSend(q)) => {
                    if let Some(queue) = self.queues.at_mut(q) {
                        queue.senders.reprioritize(t, priority);
                    }
                    None
                }
                Some(WaitObject::TimerCommand) => {
                    self.timers.senders.reprioritize(t, priority);
                    None
                }
                _ => None,
            },
            _ => None,
        }
    }

    /// Drop `holder`'s ownership of mutex `m` and hand it to the next waiter
    ///
    /// Returns whether the new owner outranks the running task.
    pub(crate) fn release_mutex(&mut self, m: usize, holder: usize) -> bool {
        remove_index(&mut self.tasks[holder].held, m);
        let next = match self.mutexes.at_mut(m) {
            Some(mx) => {
                mx.owner = None;
                mx.depth = 0;
                mx.waiters.pop()
            }
            None => return false,
        };
        self.refresh_priority(holder);

        let Some(w) = next else {
            return false;
        };
        if self.tasks[w].held.push(m).is_ok() {
            let mx = &mut self.mutexes[m];
            mx.owner = Some(w);
            mx.depth = 1;
            let preempt = self.wake(w, WakeReason::Acquired);
            self.refresh_priority(w);
            preempt
        } else {
            // Cannot record ownership; let the waiter retry and report it
            self.wake(w, WakeReason::Signalled)
        }
    }
}

/// Remove the first occurrence of `value`
pub(crate) fn remove_index<const N: usize>(list: &mut Vec<usize, N>, value: usize) -> bool {
    match list.iter().position(|&v| v == value) {
        Some(pos) => {
            list.remove(pos);
            true
        }
        None => false,
    }
}
