//! Simulated port and helpers for driving the kernel from unit tests
//!
//! [`SimPort`] records what the kernel asks of the hardware instead of
//! doing it. A pended switch stays pending until a test calls [`service`],
//! which plays the switch handler.
//!
//! Author: Moroya Sakamoto

use core::cell::Cell;

use crate::config::{Config, MINIMAL_STACK_SIZE};
use crate::kernel::Kernel;
use crate::port::{Hooks, Port};
use crate::task::{TaskFn, TaskHandle, TaskPriority};

/// Bytes of the fake initial frame written by [`SimPort::init_context`]
const FRAME_BYTES: usize = 64;

std::thread_local! {
    static MASKED: Cell<bool> = const { Cell::new(false) };
}

#[derive(Debug)]
pub struct SimContext {
    pub entry: TaskFn,
    pub arg: usize,
    pub sp: usize,
}

#[derive(Debug, Default)]
pub struct SimPort {
    /// A switch was requested and not yet serviced
    pub pending: bool,
    pub switch_requests: u32,
    pub allocation_failures: u32,
    pub tick_hooks: u32,
    pub idle_hooks: u32,
    pub overflowed: Option<TaskHandle>,
}

impl SimPort {
    pub const fn new() -> Self {
        Self {
            pending: false,
            switch_requests: 0,
            allocation_failures: 0,
            tick_hooks: 0,
            idle_hooks: 0,
            overflowed: None,
        }
    }

    pub fn interrupts_masked() -> bool {
        MASKED.with(Cell::get)
    }
}

impl Hooks for SimPort {
    fn allocation_failed(&mut self) {
        self.allocation_failures += 1;
    }

    fn stack_overflow(&mut self, task: TaskHandle, _name: &str) {
        self.overflowed = Some(task);
    }

    fn tick(&mut self) {
        self.tick_hooks += 1;
    }

    fn idle(&mut self) {
        self.idle_hooks += 1;
    }
}

fn idle_entry(_: usize) {}

fn timer_entry(_: usize) {}

impl Port for SimPort {
    type Context = SimContext;

    const IDLE_ENTRY: TaskFn = idle_entry;
    const TIMER_ENTRY: TaskFn = timer_entry;

    fn init_context(&mut self, stack: &mut [u8], entry: TaskFn, arg: usize) -> SimContext {
        let sp = stack.len().saturating_sub(FRAME_BYTES);
        stack[sp..].fill(0);
        SimContext { entry, arg, sp }
    }

    fn request_switch(&mut self) {
        self.pending = true;
        self.switch_requests += 1;
    }

    fn start_first_task(&mut self, _context: &SimContext) -> ! {
        panic!("first task launched")
    }

    fn mask_interrupts() -> bool {
        MASKED.with(|m| m.replace(true))
    }

    fn unmask_interrupts(previous: bool) {
        MASKED.with(|m| m.set(previous));
    }

    fn halt(&mut self) -> ! {
        panic!("kernel halted")
    }
}

pub type SimKernel = Kernel<SimPort, 16384>;

pub fn noop(_: usize) {}

pub fn kernel() -> SimKernel {
    kernel_with(Config::new())
}

pub fn kernel_with(config: Config) -> SimKernel {
    Kernel::new(config, SimPort::new())
}

pub fn spawn(k: &mut SimKernel, name: &str, priority: u8) -> TaskHandle {
    k.create_task(noop, name, MINIMAL_STACK_SIZE, TaskPriority(priority), 0)
        .unwrap()
}

/// Run the switch handler if a switch is pending
pub fn service(k: &mut SimKernel) {
    while k.port().pending {
        k.port_mut().pending = false;
        k.switch_context();
    }
}

/// Service pending switches and let the timer service task run until it
/// blocks again
pub fn settle(k: &mut SimKernel) {
    service(k);
    while k.timer_service_task().is_some() && k.current_task() == k.timer_service_task() {
        let dispatch = k.timer_service_step().unwrap();
        dispatch.run();
        k.timer_service_wait().unwrap();
        service(k);
    }
}

/// Deliver `n` ticks, settling after each
pub fn advance(k: &mut SimKernel, n: u32) {
    for _ in 0..n {
        k.on_tick();
        settle(k);
    }
}

/// The running task outranks or equals every ready task
pub fn assert_priority_invariant(k: &SimKernel) {
    if k.suspend_depth > 0 || k.port().pending || !k.config().preemption {
        return;
    }
    let Some(cur) = k.running() else {
        return;
    };
    if let Some(level) = k.ready.highest_level() {
        let running = k.tasks[cur].priority.level();
        assert!(
            level <= running,
            "ready level {level} above running '{}' at {running}",
            k.tasks[cur].name
        );
    }
}
