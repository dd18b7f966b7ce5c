//! Shared kernel instance
//!
//! The kernel is one value shared by every task and interrupt handler.
//! [`KernelCell`] keeps it in a `static` behind a spin lock and pairs each
//! lock with masking the kernel's interrupts, so no two mutations of
//! scheduler state interleave. Critical sections are short: every kernel
//! operation is bounded by the table capacities.
//!
//! ```text
//! static KERNEL: KernelCell<BoardPort, DEFAULT_HEAP_SIZE> =
//!     KernelCell::new(Kernel::new(Config::new(), BoardPort::new()));
//!
//! fn blinky(_: usize) {
//!     loop {
//!         toggle_led();
//!         let _ = KERNEL.critical(|k| k.delay_for(500));
//!     }
//! }
//! ```
//!
//! Author: Moroya Sakamoto

use spin::Mutex;

use crate::isr::IsrContext;
use crate::kernel::Kernel;
use crate::port::Port;

pub struct KernelCell<P: Port, const HEAP: usize> {
    inner: Mutex<Kernel<P, HEAP>>,
}

impl<P: Port, const HEAP: usize> KernelCell<P, HEAP> {
    pub const fn new(kernel: Kernel<P, HEAP>) -> Self {
        Self { inner: Mutex::new(kernel) }
    }

    /// Run `f` with interrupts masked and the kernel locked
    pub fn critical<R>(&self, f: impl FnOnce(&mut Kernel<P, HEAP>) -> R) -> R {
        let previous = P::mask_interrupts();
        let result = {
            let mut kernel = self.inner.lock();
            f(&mut kernel)
        };
        P::unmask_interrupts(previous);
        result
    }

    /// Like [`critical`](Self::critical), but only if the kernel is not
    /// already locked; for handlers that may interrupt a critical section
    /// on ports that do not mask them
    pub fn try_critical<R>(&self, f: impl FnOnce(&mut Kernel<P, HEAP>) -> R) -> Option<R> {
        let previous = P::mask_interrupts();
        let result = self.inner.try_lock().map(|mut kernel| f(&mut kernel));
        P::unmask_interrupts(previous);
        result
    }

    /// Run an interrupt handler body against the non-blocking API
    ///
    /// Any switch a woken task needs is requested before returning. The
    /// flag reports whether one was.
    pub fn from_isr<R>(&self, f: impl FnOnce(&mut IsrContext<'_, P, HEAP>) -> R) -> (R, bool) {
        self.critical(|kernel| {
            let mut isr = kernel.isr();
            let result = f(&mut isr);
            let switched = isr.yield_from_isr();
            (result, switched)
        })
    }

    /// Exclusive access without locking, e.g. before interrupts are enabled
    pub fn get_mut(&mut self) -> &mut Kernel<P, HEAP> {
        self.inner.get_mut()
    }
}
