// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bounded inter-thread FIFOs, built on the semaphores.
//!
//! Each FIFO is a ring of `FIFO_DEPTH` 32-bit words plus two semaphores
//! from the reserved arena range: an *items* semaphore counting readable
//! entries (so empty reads block), and a *mutex* semaphore serializing
//! readers. Writers do not take the mutex; each FIFO is expected to have a
//! single producer, typically an ISR.
//!
//! The blocking choreography lives in `api`; this module owns the ring
//! arithmetic and the overflow accounting.

use abi::{FIFO_DEPTH, MAX_FIFOS};

use crate::sem::{SemId, SemTable};

/// Handle to one of the FIFOs. Invalid indices are unrepresentable.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(transparent)]
pub struct FifoId(u8);

impl FifoId {
    /// Returns a handle to FIFO `index`, or `None` if out of range.
    pub const fn new(index: usize) -> Option<Self> {
        if index < MAX_FIFOS {
            Some(FifoId(index as u8))
        } else {
            None
        }
    }

    pub(crate) const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Error returned by a write to a full FIFO; the offered word was dropped
/// and counted.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Overflow;

struct Fifo {
    buffer: [u32; FIFO_DEPTH],
    /// Read index.
    head: usize,
    /// Write index.
    tail: usize,
    /// Number of words dropped by writes against a full buffer.
    lost: u32,
}

impl Fifo {
    const INIT: Self = Self {
        buffer: [0; FIFO_DEPTH],
        head: 0,
        tail: 0,
        lost: 0,
    };
}

pub struct FifoTable {
    fifos: [Fifo; MAX_FIFOS],
}

impl FifoTable {
    pub const fn new() -> Self {
        Self {
            fifos: [Fifo::INIT; MAX_FIFOS],
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Resets FIFO `f` to empty and configures its semaphores: items to 0,
    /// so reads of an empty FIFO block, and the reader mutex to 1.
    pub fn init(&mut self, sems: &mut SemTable, f: FifoId) {
        self.fifos[f.index()] = Fifo::INIT;
        sems.init(SemId::fifo_items(f), 0);
        sems.init(SemId::fifo_mutex(f), 1);
    }

    /// Takes the word at the head. Only call with the items semaphore
    /// acquired; this does no occupancy accounting of its own.
    pub(crate) fn pop(&mut self, f: FifoId) -> u32 {
        let fifo = &mut self.fifos[f.index()];
        let data = fifo.buffer[fifo.head];
        fifo.head += 1;
        if fifo.head == FIFO_DEPTH {
            fifo.head = 0;
        }
        data
    }

    /// Stores `data` at the tail. Only call after a fullness check; the
    /// items semaphore release is the caller's business.
    pub(crate) fn push(&mut self, f: FifoId, data: u32) {
        let fifo = &mut self.fifos[f.index()];
        fifo.buffer[fifo.tail] = data;
        fifo.tail += 1;
        if fifo.tail == FIFO_DEPTH {
            fifo.tail = 0;
        }
    }

    pub(crate) fn count_lost(&mut self, f: FifoId) {
        self.fifos[f.index()].lost += 1;
    }

    /// Number of words dropped against FIFO `f` since its last init.
    pub fn lost_count(&self, f: FifoId) -> u32 {
        self.fifos[f.index()].lost
    }
}

/// Fullness check and write, in one place so the arithmetic stays exactly
/// as specified: the items counter is read as a plain integer, and a
/// counter that has exceeded `FIFO_DEPTH - 1` is clamped back to
/// `FIFO_DEPTH - 1` while the offered word is dropped and counted. A
/// negative counter (readers blocked) is by definition not full.
pub fn write(
    fifos: &mut FifoTable,
    sems: &mut SemTable,
    threads: &mut crate::thread::ThreadTable,
    f: FifoId,
    data: u32,
) -> Result<(), Overflow> {
    let items = SemId::fifo_items(f);
    if sems.value(items) > FIFO_DEPTH as i32 - 1 {
        sems.set(items, FIFO_DEPTH as i32 - 1);
        fifos.count_lost(f);
        return Err(Overflow);
    }
    fifos.push(f, data);
    crate::sem::release(sems, threads, items);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sem::{acquire, SemTable};
    use crate::thread::{NextThread, ThreadTable};
    use abi::Priority;

    fn uut() -> (FifoTable, SemTable, ThreadTable, FifoId) {
        let mut threads = ThreadTable::new();
        threads.add(Priority(1), "producer").unwrap();
        threads.add(Priority(1), "consumer").unwrap();
        let mut fifos = FifoTable::new();
        let mut sems = SemTable::new();
        let f = FifoId::new(0).unwrap();
        fifos.init(&mut sems, f);
        (fifos, sems, threads, f)
    }

    /// Non-blocking read for tests that have already arranged for data.
    fn read_now(
        fifos: &mut FifoTable,
        sems: &mut SemTable,
        threads: &mut ThreadTable,
        f: FifoId,
    ) -> u32 {
        assert_eq!(acquire(sems, threads, SemId::fifo_items(f)), NextThread::Same);
        assert_eq!(acquire(sems, threads, SemId::fifo_mutex(f)), NextThread::Same);
        let v = fifos.pop(f);
        crate::sem::release(sems, threads, SemId::fifo_mutex(f));
        v
    }

    #[test]
    fn write_then_read_round_trips() {
        let (mut fifos, mut sems, mut threads, f) = uut();
        write(&mut fifos, &mut sems, &mut threads, f, 0xDEAD_BEEF).unwrap();
        assert_eq!(sems.value(SemId::fifo_items(f)), 1);
        assert_eq!(read_now(&mut fifos, &mut sems, &mut threads, f), 0xDEAD_BEEF);
        assert_eq!(sems.value(SemId::fifo_items(f)), 0);
        assert_eq!(fifos.lost_count(f), 0);
    }

    #[test]
    fn read_of_empty_fifo_blocks_on_items() {
        let (_, mut sems, mut threads, f) = uut();
        assert_eq!(
            acquire(&mut sems, &mut threads, SemId::fifo_items(f)),
            NextThread::Other,
        );
        assert_eq!(
            threads.current().blocked_on(),
            Some(SemId::fifo_items(f)),
        );
    }

    #[test]
    fn write_wakes_blocked_reader() {
        let (mut fifos, mut sems, mut threads, f) = uut();
        // Consumer blocks on the empty FIFO.
        let _ = acquire(&mut sems, &mut threads, SemId::fifo_items(f));
        let consumer = threads.current_slot();
        threads.schedule();

        write(&mut fifos, &mut sems, &mut threads, f, 0xDEAD_BEEF).unwrap();
        assert!(threads.thread(consumer).blocked_on().is_none());
        // The counter went -1 -> 0: the word is spoken for.
        assert_eq!(sems.value(SemId::fifo_items(f)), 0);
        assert_eq!(fifos.pop(f), 0xDEAD_BEEF);
        assert_eq!(fifos.lost_count(f), 0);
    }

    #[test]
    fn seventeenth_write_overflows() {
        let (mut fifos, mut sems, mut threads, f) = uut();
        for v in 1..=16 {
            assert_eq!(write(&mut fifos, &mut sems, &mut threads, f, v), Ok(()));
        }
        assert_eq!(
            write(&mut fifos, &mut sems, &mut threads, f, 17),
            Err(Overflow),
        );
        assert_eq!(fifos.lost_count(f), 1);
        // The counter is clamped one below capacity.
        assert_eq!(sems.value(SemId::fifo_items(f)), FIFO_DEPTH as i32 - 1);
        // The oldest data survives overflow.
        assert_eq!(read_now(&mut fifos, &mut sems, &mut threads, f), 1);
        assert_eq!(read_now(&mut fifos, &mut sems, &mut threads, f), 2);
    }

    #[test]
    fn head_wraps_at_buffer_end() {
        let (mut fifos, mut sems, mut threads, f) = uut();
        // Cycle more words through than the buffer holds, one at a time,
        // so both indices must wrap.
        for v in 0..(2 * FIFO_DEPTH as u32 + 3) {
            write(&mut fifos, &mut sems, &mut threads, f, v).unwrap();
            assert_eq!(read_now(&mut fifos, &mut sems, &mut threads, f), v);
        }
    }

    #[test]
    fn init_restores_a_used_fifo() {
        let (mut fifos, mut sems, mut threads, f) = uut();
        for v in 0..20 {
            let _ = write(&mut fifos, &mut sems, &mut threads, f, v);
        }
        fifos.init(&mut sems, f);
        assert_eq!(fifos.lost_count(f), 0);
        assert_eq!(sems.value(SemId::fifo_items(f)), 0);
        assert_eq!(sems.value(SemId::fifo_mutex(f)), 1);
        write(&mut fifos, &mut sems, &mut threads, f, 99).unwrap();
        assert_eq!(read_now(&mut fifos, &mut sems, &mut threads, f), 99);
    }

    #[test]
    fn fifos_are_independent() {
        let (mut fifos, mut sems, mut threads, f0) = uut();
        let f1 = FifoId::new(1).unwrap();
        fifos.init(&mut sems, f1);
        write(&mut fifos, &mut sems, &mut threads, f0, 1).unwrap();
        write(&mut fifos, &mut sems, &mut threads, f1, 2).unwrap();
        assert_eq!(read_now(&mut fifos, &mut sems, &mut threads, f1), 2);
        assert_eq!(read_now(&mut fifos, &mut sems, &mut threads, f0), 1);
    }
}
