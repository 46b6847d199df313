// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Counting semaphores.
//!
//! A semaphore is just a signed 32-bit counter in a fixed arena. A value
//! of `n >= 0` means `n` resources are available; `n < 0` means `-n`
//! threads are blocked waiting. Threads record the semaphore they are
//! blocked on in their own TCB (`Thread::blocked_on`), which is the single
//! source of truth the scheduler consults -- there is no separate wait
//! queue.
//!
//! Release wakes the first blocked thread found walking the ring from the
//! current thread's successor. That makes release O(live threads) and the
//! unblock order FIFO-ish from the cursor rather than priority-ordered;
//! the *run* order is still priority-ordered, because the woken thread
//! competes with every other runnable thread at the next context switch.
//!
//! The arena reserves two slots per FIFO past the application range, for
//! the FIFO item-count and reader-mutex semaphores.

use abi::{MAX_FIFOS, MAX_SEMAPHORES};

use crate::fifo::FifoId;
use crate::thread::{NextThread, ThreadTable};

/// Total arena size: application semaphores plus the FIFO-internal pairs.
const SEM_SLOTS: usize = MAX_SEMAPHORES + 2 * MAX_FIFOS;

/// Handle to a semaphore slot.
///
/// Application code obtains these from `SemId::new`, which only hands out
/// the application range; the FIFO-internal slots are crate-private.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(transparent)]
pub struct SemId(u8);

impl SemId {
    /// Returns a handle to application semaphore `index`, or `None` if
    /// `index` is out of range.
    pub const fn new(index: usize) -> Option<Self> {
        if index < MAX_SEMAPHORES {
            Some(SemId(index as u8))
        } else {
            None
        }
    }

    /// Item-count semaphore of FIFO `f`.
    pub(crate) const fn fifo_items(f: FifoId) -> Self {
        SemId((MAX_SEMAPHORES + 2 * f.index()) as u8)
    }

    /// Reader-mutex semaphore of FIFO `f`.
    pub(crate) const fn fifo_mutex(f: FifoId) -> Self {
        SemId((MAX_SEMAPHORES + 2 * f.index() + 1) as u8)
    }
}

/// The semaphore arena.
pub struct SemTable {
    values: [i32; SEM_SLOTS],
}

impl SemTable {
    pub const fn new() -> Self {
        Self {
            values: [0; SEM_SLOTS],
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Sets semaphore `s` to `value`, discarding any previous state.
    /// Calling this twice in a row leaves the same value (idempotent).
    pub fn init(&mut self, s: SemId, value: i32) {
        self.values[s.0 as usize] = value;
    }

    /// Reads the counter, for diagnostics and fullness checks.
    pub fn value(&self, s: SemId) -> i32 {
        self.values[s.0 as usize]
    }

    pub(crate) fn set(&mut self, s: SemId, value: i32) {
        self.values[s.0 as usize] = value;
    }
}

/// Takes one unit of semaphore `s` on behalf of the current thread.
///
/// The counter is decremented unconditionally. If it goes negative, the
/// current thread is marked blocked on `s` and the caller must pend a
/// context switch; the thread resumes past this point once a release has
/// cleared its blocked mark and the scheduler has picked it again.
pub fn acquire(sems: &mut SemTable, threads: &mut ThreadTable, s: SemId) -> NextThread {
    let v = &mut sems.values[s.0 as usize];
    *v -= 1;
    if *v < 0 {
        threads.current_mut().block_on(s);
        NextThread::Other
    } else {
        NextThread::Same
    }
}

/// Returns one unit of semaphore `s`.
///
/// If the counter is still non-positive afterwards, somebody is waiting:
/// walk the ring from the current thread's successor and unblock the first
/// thread blocked on `s`. Never requests a context switch -- the woken
/// thread simply becomes eligible at the next one.
pub fn release(sems: &mut SemTable, threads: &mut ThreadTable, s: SemId) {
    let v = &mut sems.values[s.0 as usize];
    *v += 1;
    if *v <= 0 {
        let mut slot = threads.next_of(threads.current_slot());
        let mut found = false;
        for _ in 0..threads.live_count() {
            if threads.thread(slot).blocked_on() == Some(s) {
                threads.thread_mut(slot).clear_block();
                found = true;
                break;
            }
            slot = threads.next_of(slot);
        }
        // A non-positive counter means a blocked thread must exist.
        uassert!(found);
    }
}
