// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Process-wide kernel state.
//!
//! Everything the kernel mutates at runtime -- the thread table and
//! stacks, semaphores, FIFOs, periodic registry, and the timestamp --
//! lives in one `Kernel` value inside a `StaticCell`. All access goes
//! through [`with_kernel`], which masks interrupts for the duration and
//! takes the cell's single borrow, so a reentrant access (which the
//! priority discipline should make impossible) panics instead of
//! aliasing.

use abi::MAX_THREADS;
use static_cell::StaticCell;

use crate::arch;
use crate::fifo::FifoTable;
use crate::periodic::{DueHandlers, PeriodicTable};
use crate::sem::SemTable;
use crate::thread::{ThreadStack, ThreadTable};
use crate::time::Ticks;

pub(crate) struct Kernel {
    pub threads: ThreadTable,
    pub stacks: [ThreadStack; MAX_THREADS],
    pub sems: SemTable,
    pub fifos: FifoTable,
    pub periodics: PeriodicTable,
    /// Kernel timestamp; incremented exactly once per tick interrupt.
    pub now: Ticks,
}

impl Kernel {
    pub const fn new() -> Self {
        Self {
            threads: ThreadTable::new(),
            stacks: [ThreadStack::INIT; MAX_THREADS],
            sems: SemTable::new(),
            fifos: FifoTable::new(),
            periodics: PeriodicTable::new(),
            now: Ticks::ZERO,
        }
    }

    pub fn reset(&mut self) {
        self.threads.reset();
        self.sems.reset();
        self.fifos.reset();
        self.periodics.reset();
        self.now = Ticks::ZERO;
    }

    /// First phase of tick handling: advance time and harvest the due
    /// periodic handlers, rebasing their deadlines.
    pub fn tick_periodics(&mut self) -> DueHandlers {
        self.now.increment();
        self.periodics.take_due(self.now)
    }

    /// Second phase of tick handling: wake sleeping threads whose
    /// deadlines have arrived.
    pub fn tick_wake(&mut self) {
        self.threads.wake_sleepers(self.now);
    }
}

static KERNEL: StaticCell<Kernel> = StaticCell::new(Kernel::new());

/// Runs `body` against the kernel state with interrupts masked.
///
/// This is the only way kernel state is reached; the mask plus the cell's
/// borrow check together enforce the "interrupt masking is the only
/// synchronization primitive" discipline.
pub(crate) fn with_kernel<R>(body: impl FnOnce(&mut Kernel) -> R) -> R {
    let saved = arch::disable_interrupts();
    let result = {
        let mut kernel = KERNEL.borrow_mut();
        body(&mut kernel)
    };
    arch::restore_interrupts(saved);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use abi::Priority;

    #[test]
    fn tick_advances_time_by_exactly_one() {
        let mut k = Kernel::new();
        let _ = k.tick_periodics();
        assert_eq!(k.now, Ticks::from(1));
        let _ = k.tick_periodics();
        assert_eq!(k.now, Ticks::from(2));
    }

    #[test]
    fn tick_wakes_due_sleepers() {
        let mut k = Kernel::new();
        k.threads.add(Priority(0), "sleeper").unwrap();
        k.threads.add(Priority(5), "spinner").unwrap();
        k.threads.sleep_current(k.now.offset(2));

        let _ = k.tick_periodics();
        k.tick_wake();
        assert!(k.threads.thread(0).wake_at().is_some());

        let _ = k.tick_periodics();
        k.tick_wake();
        assert!(k.threads.thread(0).wake_at().is_none());
    }

    #[test]
    fn priority_thread_runs_once_per_sleep_interval() {
        // A high-priority thread sleeping 10 ticks preempts a low-priority
        // spinner exactly at ticks 10, 20, 30.
        let mut k = Kernel::new();
        k.threads.add(Priority(0), "hi").unwrap();
        k.threads.add(Priority(5), "lo").unwrap();

        let mut hi_ran_at = Vec::new();
        k.threads.sleep_current(k.now.offset(10));
        k.threads.schedule();
        assert_eq!(k.threads.current().name(), "lo");

        for _ in 0..30 {
            let _ = k.tick_periodics();
            k.tick_wake();
            let slot = k.threads.schedule();
            if k.threads.thread(slot).name() == "hi" {
                hi_ran_at.push(u32::from(k.now));
                // The high-priority thread immediately sleeps again.
                k.threads.sleep_current(k.now.offset(10));
                k.threads.schedule();
            }
        }
        assert_eq!(hi_ran_at, [10, 20, 30]);
    }

    #[test]
    fn reset_clears_time_and_tables() {
        let mut k = Kernel::new();
        k.threads.add(Priority(1), "t").unwrap();
        let _ = k.tick_periodics();
        k.reset();
        assert_eq!(k.now, Ticks::ZERO);
        assert_eq!(k.threads.live_count(), 0);
        assert_eq!(k.periodics.count(), 0);
    }
}
