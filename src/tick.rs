//! Tick timer — the kernel's notion of time
//!
//! Time is a wrapping 32-bit tick counter. Deadlines are compared with
//! wrap-safe subtraction, never with `<`, so a deadline must lie less than
//! `2^31` ticks ahead of the current tick.
//!
//! On hardware the tick comes from a compare-match timer (SysTick on
//! Cortex-M, CLINT `mtime`/`mtimecmp` on RISC-V). [`TickTimer`] holds the
//! compare arithmetic; the port programs the register.
//!
//! Author: Moroya Sakamoto

/// Kernel tick count
pub type Tick = u32;

/// Longest representable delay
pub const MAX_DELAY: Tick = i32::MAX as Tick;

/// Has `deadline` been reached at tick `now`?
#[inline]
pub fn reached(now: Tick, deadline: Tick) -> bool {
    (now.wrapping_sub(deadline) as i32) >= 0
}

/// Ticks left until `deadline` (0 once reached)
#[inline]
pub fn remaining(now: Tick, deadline: Tick) -> Tick {
    if reached(now, deadline) {
        0
    } else {
        deadline.wrapping_sub(now)
    }
}

/// Convert milliseconds to ticks at `tick_rate_hz`, rounding down
pub fn ms_to_ticks(ms: u32, tick_rate_hz: u32) -> Tick {
    let ticks = (ms as u64 * tick_rate_hz as u64) / 1000;
    ticks.min(MAX_DELAY as u64) as Tick
}

/// How long a blocking call may wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Give up after this many ticks; `Ticks(0)` never blocks
    Ticks(Tick),
    /// Wait until the condition is met
    Forever,
}

impl Timeout {
    /// Poll without blocking
    pub const NONE: Timeout = Timeout::Ticks(0);

    /// Absolute deadline for a wait starting at `now`, `None` for forever
    pub fn deadline(self, now: Tick) -> Option<Tick> {
        match self {
            Timeout::Ticks(t) => Some(now.wrapping_add(t.min(MAX_DELAY))),
            Timeout::Forever => None,
        }
    }

    /// Would this timeout expire immediately?
    pub fn is_zero(self) -> bool {
        self == Timeout::Ticks(0)
    }
}

/// Monotonic tick counter
#[derive(Debug, Clone, Copy, Default)]
pub struct TickCounter {
    count: Tick,
    /// Number of wraps to zero
    overflows: u32,
}

impl TickCounter {
    pub const fn new() -> Self {
        Self { count: 0, overflows: 0 }
    }

    /// Advance by exactly one tick, returns the new count
    pub fn advance(&mut self) -> Tick {
        self.count = self.count.wrapping_add(1);
        if self.count == 0 {
            self.overflows += 1;
        }
        self.count
    }

    pub fn now(&self) -> Tick {
        self.count
    }

    pub fn overflows(&self) -> u32 {
        self.overflows
    }

    /// Elapsed ticks since a reference point
    pub fn elapsed_since(&self, reference: Tick) -> Tick {
        self.count.wrapping_sub(reference)
    }
}

/// Compare-match arithmetic for a free-running 64-bit hardware timer
///
/// Size: 16 bytes
#[derive(Debug, Clone, Copy)]
pub struct TickTimer {
    /// Timer counts per kernel tick
    reload: u64,
    /// Next compare value
    compare: u64,
}

impl TickTimer {
    /// `cpu_clock_hz`: timer input frequency, `tick_rate_hz`: kernel tick rate
    pub const fn new(cpu_clock_hz: u32, tick_rate_hz: u32) -> Self {
        let reload = if tick_rate_hz == 0 {
            0
        } else {
            (cpu_clock_hz / tick_rate_hz) as u64
        };
        Self { reload, compare: u64::MAX }
    }

    pub fn reload_value(&self) -> u64 {
        self.reload
    }

    /// Current compare value; `u64::MAX` while disarmed
    pub fn compare(&self) -> u64 {
        self.compare
    }

    /// Arm the first tick one period after `counter`
    pub fn arm(&mut self, counter: u64) -> u64 {
        self.compare = counter.wrapping_add(self.reload);
        self.compare
    }

    /// Acknowledge a compare interrupt at hardware count `counter`
    ///
    /// Moves the compare value forward in whole periods from its previous
    /// value (not from `counter`), so interrupt latency does not drift the
    /// tick. Returns the number of periods that elapsed; more than one means
    /// ticks were missed and the caller should process each of them.
    pub fn acknowledge(&mut self, counter: u64) -> u32 {
        if self.reload == 0 || counter < self.compare {
            return 0;
        }
        let periods = (counter - self.compare) / self.reload + 1;
        self.compare = self.compare.wrapping_add(periods * self.reload);
        periods.min(u32::MAX as u64) as u32
    }
}
