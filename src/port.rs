//! Hardware port interface
//!
//! The kernel decides *when* a switch must happen and *which* task runs
//! next. Saving and restoring registers, pending the switch interrupt
//! (PendSV on Cortex-M, machine software interrupt on RISC-V) and masking
//! interrupts belong to the port.
//!
//! A port's switch handler follows this sequence:
//!
//! 1. save registers into [`Kernel::current_context_mut`](crate::Kernel::current_context_mut)
//! 2. call [`Kernel::switch_context`](crate::Kernel::switch_context)
//! 3. restore registers from [`Kernel::current_context`](crate::Kernel::current_context)
//!
//! and its tick interrupt calls [`Kernel::on_tick`](crate::Kernel::on_tick).
//!
//! Author: Moroya Sakamoto

use crate::task::{TaskFn, TaskHandle};

/// Callbacks the host application supplies
///
/// Every hook has an empty default.
pub trait Hooks {
    /// The heap could not satisfy a creation request. Expected to halt or
    /// to free memory; the failing call still returns an error.
    fn allocation_failed(&mut self) {}

    /// Guard bytes of `task` were overwritten. The kernel halts after
    /// this returns.
    fn stack_overflow(&mut self, _task: TaskHandle, _name: &str) {}

    /// Called on every tick, from interrupt context. Keep it short.
    fn tick(&mut self) {}

    /// Called on every pass of the idle task.
    fn idle(&mut self) {}
}

/// Hardware-specific half of the kernel
pub trait Port: Hooks {
    /// Saved execution state of a task that is not running
    type Context;

    /// Body of the idle task. Loops forever calling
    /// [`Kernel::idle_step`](crate::Kernel::idle_step).
    const IDLE_ENTRY: TaskFn;

    /// Body of the timer service task. Loops forever calling
    /// [`Kernel::timer_service_step`](crate::Kernel::timer_service_step)
    /// and running the returned dispatch outside the kernel lock.
    const TIMER_ENTRY: TaskFn;

    /// Lay out the initial frame of a new task on `stack` so that the first
    /// restore enters `entry(arg)`. `stack` is pre-filled with the stack fill
    /// pattern and grows down from its end.
    fn init_context(&mut self, stack: &mut [u8], entry: TaskFn, arg: usize) -> Self::Context;

    /// Pend a context switch at the next safe point
    fn request_switch(&mut self);

    /// Restore `context` and jump into the first task. Never returns.
    fn start_first_task(&mut self, context: &Self::Context) -> !;

    /// Mask kernel-level interrupts, returning the previous mask state
    fn mask_interrupts() -> bool;

    /// Restore the mask state returned by [`mask_interrupts`](Self::mask_interrupts)
    fn unmask_interrupts(previous: bool);

    /// Stop the processor after a fatal fault
    fn halt(&mut self) -> !;
}
