// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Registry of periodic handlers.
//!
//! Periodic handlers are plain functions invoked from the tick interrupt,
//! in ISR context, whenever the kernel timestamp reaches their deadline.
//! They are registered once and never destroyed, so the registry is an
//! append-only arena; iteration in slot order is registration order.
//!
//! When a handler overruns its period, the next deadline is rebased from
//! the current time rather than the missed deadline, so missed firings are
//! dropped, not caught up.

use abi::{KernError, MAX_PERIODIC_THREADS};

use crate::time::Ticks;

/// A periodic handler. Runs at tick priority and must not block.
pub type PeriodicFn = fn();

#[derive(Copy, Clone)]
struct Periodic {
    handler: PeriodicFn,
    /// Firing interval, in ticks.
    period: u32,
    /// Absolute tick of the next firing.
    deadline: Ticks,
}

/// Due handlers harvested from one tick, to be invoked after the kernel
/// state borrow has been released (handlers are allowed to call back into
/// the kernel, e.g. to write a FIFO).
pub struct DueHandlers {
    handlers: [Option<PeriodicFn>; MAX_PERIODIC_THREADS],
}

impl DueHandlers {
    pub fn iter(&self) -> impl Iterator<Item = PeriodicFn> + '_ {
        self.handlers.iter().flatten().copied()
    }
}

pub struct PeriodicTable {
    slots: [Option<Periodic>; MAX_PERIODIC_THREADS],
    count: usize,
}

impl PeriodicTable {
    pub const fn new() -> Self {
        Self {
            slots: [None; MAX_PERIODIC_THREADS],
            count: 0,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Registers `handler` to run every `period` ticks.
    ///
    /// The first registration first fires at `now + period`. Later
    /// registrations are staggered an extra `1 + index` ticks, so that
    /// handlers sharing a period do not all land on the same tick.
    pub fn add(&mut self, handler: PeriodicFn, period: u32, now: Ticks) -> Result<(), KernError> {
        if self.count == MAX_PERIODIC_THREADS {
            return Err(KernError::ThreadLimitReached);
        }
        let index = self.count;
        let deadline = if index == 0 {
            now.offset(period)
        } else {
            now.offset(period + 1 + index as u32)
        };
        self.slots[index] = Some(Periodic {
            handler,
            period,
            deadline,
        });
        self.count += 1;
        Ok(())
    }

    /// Collects every handler whose deadline has arrived by `now`,
    /// rebasing its next deadline to `now + period`.
    pub fn take_due(&mut self, now: Ticks) -> DueHandlers {
        let mut due = DueHandlers {
            handlers: [None; MAX_PERIODIC_THREADS],
        };
        for (slot, entry) in self.slots.iter_mut().enumerate() {
            if let Some(p) = entry {
                if now >= p.deadline {
                    p.deadline = now.offset(p.period);
                    due.handlers[slot] = Some(p.handler);
                }
            }
        }
        due
    }
}
