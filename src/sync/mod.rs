//! Synchronization primitives
//!
//! Each primitive is a plain record in a kernel table; the operations are
//! `Kernel` methods so they can move tasks between the ready queues, the
//! delayed list and the primitive's own wait list in one step.
//!
//! Author: Moroya Sakamoto

pub mod mutex;
pub mod queue;
pub mod semaphore;

pub use mutex::{Mutex, MutexHandle};
pub use queue::{Queue, QueueHandle};
pub use semaphore::{Semaphore, SemaphoreHandle};
