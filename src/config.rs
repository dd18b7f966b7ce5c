//! Kernel configuration
//!
//! Capacities are fixed at compile time so every kernel table is a
//! static array. Behavioural options live in [`Config`], which is a plain
//! `const` value the host hands to [`Kernel::new`](crate::Kernel::new).
//!
//! Author: Moroya Sakamoto

use bitflags::bitflags;

use crate::tick::{self, Tick, TickTimer};

/// Maximum number of tasks, idle and timer service included
pub const MAX_TASKS: usize = 16;

/// Number of priority levels the ready queues are built for
pub const MAX_PRIORITIES: usize = 5;

/// Task names are truncated to this many bytes
pub const MAX_TASK_NAME_LEN: usize = 16;

/// Minimal stack size in bytes (128 words on a 32-bit target)
pub const MINIMAL_STACK_SIZE: usize = 128 * 4;

/// Bytes at the stack limit that must keep the fill pattern
pub const STACK_GUARD_BYTES: usize = 16;

/// Pattern written over a fresh stack for high-water and guard checks
pub const STACK_FILL_BYTE: u8 = 0xA5;

/// Semaphore table size
pub const MAX_SEMAPHORES: usize = 16;

/// Mutex table size (plain and recursive share it)
pub const MAX_MUTEXES: usize = 16;

/// Mutexes one task may hold at once
pub const MAX_HELD_MUTEXES: usize = 8;

/// Message queue table size
pub const MAX_QUEUES: usize = 8;

/// Software timer table size
pub const MAX_TIMERS: usize = 16;

/// Depth of the timer service command queue
pub const TIMER_QUEUE_LENGTH: usize = 10;

/// Default heap size (64 KiB), the usual `HEAP` parameter of [`Kernel`](crate::Kernel)
pub const DEFAULT_HEAP_SIZE: usize = 64 * 1024;

bitflags! {
    /// Optional kernel capabilities
    ///
    /// An operation whose capability is absent returns
    /// [`KernelError::Unsupported`](crate::KernelError::Unsupported).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Features: u32 {
        const RECURSIVE_MUTEXES     = 1 << 0;
        const COUNTING_SEMAPHORES   = 1 << 1;
        const SOFTWARE_TIMERS       = 1 << 2;
        const TASK_NOTIFICATIONS    = 1 << 3;
        /// `priority` / `set_priority`
        const PRIORITY_QUERY        = 1 << 4;
        const SCHEDULER_STATE_QUERY = 1 << 5;
        const STACK_HIGH_WATER_MARK = 1 << 6;
        const TASK_DELETE           = 1 << 7;
        const TASK_SUSPEND          = 1 << 8;
        const PEND_FUNCTION_CALL    = 1 << 9;
    }
}

/// Runtime kernel configuration
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Core clock feeding the tick timer
    pub cpu_clock_hz: u32,
    /// Tick frequency
    pub tick_rate_hz: u32,
    /// Priority levels in use, `1..=MAX_PRIORITIES`
    pub max_priorities: usize,
    /// Stack size of the idle task, floor for every other task
    pub minimal_stack_size: usize,
    /// Switch immediately when a higher-priority task becomes ready
    pub preemption: bool,
    /// Rotate equal-priority tasks every `time_slice_ticks`
    pub time_slicing: bool,
    pub time_slice_ticks: Tick,
    /// Idle task gives way to other priority-0 tasks
    pub idle_should_yield: bool,
    /// Check the stack guard whenever a task is switched out
    pub check_stack_overflow: bool,
    /// A task whose entry function returns is deleted instead of faulting
    pub delete_on_return: bool,
    pub timer_task_priority: usize,
    pub timer_task_stack_size: usize,
    pub features: Features,
}

impl Config {
    /// Configuration of the reference RV32I board: 1 MHz core, 1 ms tick
    pub const fn new() -> Self {
        Self {
            cpu_clock_hz: 1_000_000,
            tick_rate_hz: 1000,
            max_priorities: MAX_PRIORITIES,
            minimal_stack_size: MINIMAL_STACK_SIZE,
            preemption: true,
            time_slicing: true,
            time_slice_ticks: 1,
            idle_should_yield: true,
            check_stack_overflow: false,
            delete_on_return: false,
            timer_task_priority: MAX_PRIORITIES - 1,
            timer_task_stack_size: MINIMAL_STACK_SIZE * 2,
            features: Features::RECURSIVE_MUTEXES
                .union(Features::COUNTING_SEMAPHORES)
                .union(Features::SOFTWARE_TIMERS)
                .union(Features::TASK_NOTIFICATIONS)
                .union(Features::PRIORITY_QUERY)
                .union(Features::SCHEDULER_STATE_QUERY)
                .union(Features::TASK_DELETE)
                .union(Features::TASK_SUSPEND)
                .union(Features::PEND_FUNCTION_CALL),
        }
    }

    pub const fn with_preemption(mut self, on: bool) -> Self {
        self.preemption = on;
        self
    }

    pub const fn with_time_slicing(mut self, on: bool) -> Self {
        self.time_slicing = on;
        self
    }

    pub const fn with_time_slice_ticks(mut self, ticks: Tick) -> Self {
        self.time_slice_ticks = ticks;
        self
    }

    pub const fn with_tick_rate(mut self, cpu_clock_hz: u32, tick_rate_hz: u32) -> Self {
        self.cpu_clock_hz = cpu_clock_hz;
        self.tick_rate_hz = tick_rate_hz;
        self
    }

    pub const fn with_max_priorities(mut self, levels: usize) -> Self {
        self.max_priorities = levels;
        self
    }

    pub const fn with_stack_overflow_check(mut self, on: bool) -> Self {
        self.check_stack_overflow = on;
        self
    }

    pub const fn with_delete_on_return(mut self, on: bool) -> Self {
        self.delete_on_return = on;
        self
    }

    pub const fn with_idle_should_yield(mut self, on: bool) -> Self {
        self.idle_should_yield = on;
        self
    }

    pub const fn with_timer_task(mut self, priority: usize, stack_size: usize) -> Self {
        self.timer_task_priority = priority;
        self.timer_task_stack_size = stack_size;
        self
    }

    pub const fn with_features(mut self, features: Features) -> Self {
        self.features = features;
        self
    }

    /// Is an optional capability compiled in?
    pub fn has(&self, feature: Features) -> bool {
        self.features.contains(feature)
    }

    /// Compare-match arithmetic for the tick interrupt
    pub const fn tick_timer(&self) -> TickTimer {
        TickTimer::new(self.cpu_clock_hz, self.tick_rate_hz)
    }

    /// Milliseconds to ticks at the configured tick rate
    pub fn ms_to_ticks(&self, ms: u32) -> Tick {
        tick::ms_to_ticks(ms, self.tick_rate_hz)
    }

    /// Sanity-check the configuration against the compile-time capacities
    pub fn validate(&self) -> bool {
        self.max_priorities >= 1
            && self.max_priorities <= MAX_PRIORITIES
            && self.tick_rate_hz > 0
            && self.cpu_clock_hz >= self.tick_rate_hz
            && self.minimal_stack_size > STACK_GUARD_BYTES
            && self.time_slice_ticks > 0
            && (!self.has(Features::SOFTWARE_TIMERS)
                || (self.timer_task_priority < self.max_priorities
                    && self.timer_task_stack_size >= self.minimal_stack_size))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_matches_reference_board() {
        let config = Config::default();
        assert!(config.preemption);
        assert!(config.time_slicing);
        assert_eq!(config.tick_rate_hz, 1000);
        assert_eq!(config.max_priorities, 5);
        assert_eq!(config.timer_task_priority, 4);
        assert!(config.has(Features::RECURSIVE_MUTEXES));
        assert!(!config.has(Features::STACK_HIGH_WATER_MARK));
        assert!(config.validate());
    }

    #[test]
    fn test_tick_conversions() {
        let config = Config::new().with_tick_rate(16_000_000, 1000);
        assert_eq!(config.tick_timer().reload_value(), 16_000);
        assert_eq!(config.ms_to_ticks(250), 250);
        let slow = config.with_tick_rate(16_000_000, 100);
        assert_eq!(slow.ms_to_ticks(250), 25);
    }

    #[test]
    fn test_rejects_too_many_priorities() {
        let config = Config::new().with_max_priorities(MAX_PRIORITIES + 1);
        assert!(!config.validate());
        assert!(!Config::new().with_max_priorities(0).validate());
    }

    #[test]
    fn test_timer_priority_must_fit() {
        let config = Config::new().with_max_priorities(3);
        assert!(!config.validate());

        let config = config.with_timer_task(2, MINIMAL_STACK_SIZE);
        assert!(config.validate());

        let config = config.with_features(Features::empty());
        assert!(Config::new().with_max_priorities(3).with_features(Features::empty()).validate());
        assert!(!config.has(Features::SOFTWARE_TIMERS));
    }
}
