//! tickrt — Tick-Driven Preemptive RTOS Kernel
//!
//! Scheduling core of a small single-core real-time kernel:
//! - Fixed-priority preemptive scheduling, round-robin within a level
//! - Tick-driven delays and timeouts, wrap-safe 32-bit tick counter
//! - Semaphores, mutexes with priority inheritance, message queues
//! - Direct-to-task notifications and software timers
//! - Static capacities; stacks and queue storage come from one fixed arena
//!
//! The kernel holds no hardware knowledge. A [`Port`] saves and restores
//! registers, pends switches and delivers ticks; the kernel decides who
//! runs.
//!
//! Author: Moroya Sakamoto

#![cfg_attr(not(any(test, feature = "std")), no_std)]

pub mod cell;
pub mod config;
pub mod error;
pub mod heap;
pub mod isr;
pub mod kernel;
pub mod list;
pub mod notify;
pub mod port;
pub mod ring;
pub mod scheduler;
pub mod sync;
pub mod table;
pub mod task;
pub mod tick;
pub mod timers;

#[cfg(test)]
mod testing;

pub use cell::KernelCell;
pub use config::{Config, Features, DEFAULT_HEAP_SIZE, MAX_PRIORITIES, MAX_TASKS, MINIMAL_STACK_SIZE};
pub use error::{Fault, KernelError};
pub use isr::IsrContext;
pub use kernel::{Kernel, KernelStats, SchedulerState, Wait};
pub use notify::NotifyAction;
pub use port::{Hooks, Port};
pub use sync::{MutexHandle, QueueHandle, SemaphoreHandle};
pub use task::{TaskFn, TaskHandle, TaskPriority, TaskState};
pub use tick::{Tick, TickTimer, Timeout, MAX_DELAY};
pub use timers::{Dispatch, PendedFn, TimerDispatch, TimerFn, TimerHandle};
