// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel ABI definitions, shared between the kernel and applications.
//!
//! Everything in the kernel is statically sized, so most of this crate is
//! compile-time limits, plus the handle and error types that cross the
//! kernel/application boundary.

#![no_std]

/// Maximum number of preemptible threads that can be alive at once.
pub const MAX_THREADS: usize = 26;

/// Maximum number of periodic handlers that can be registered. Periodic
/// handlers are never destroyed, so this is also a lifetime total.
pub const MAX_PERIODIC_THREADS: usize = 6;

/// Size of each thread stack, in 32-bit words.
pub const STACK_WORDS: usize = 512;

/// Number of counting semaphores available to applications. The kernel
/// reserves additional slots internally for the FIFOs.
pub const MAX_SEMAPHORES: usize = 16;

/// Number of inter-thread FIFOs.
pub const MAX_FIFOS: usize = 4;

/// Capacity of each FIFO, in 32-bit words.
pub const FIFO_DEPTH: usize = 16;

/// Maximum length of a thread name, in bytes. Longer names are truncated.
pub const MAX_NAME_LENGTH: usize = 10;

/// Exception priority boundary for kernel-managed interrupts. Aperiodic
/// event handlers must be registered *above* this (numerically below it),
/// while the tick and context-switch exceptions run at the architectural
/// minimum, so that kernel bookkeeping is never preempted by itself.
pub const OSINT_PRIORITY: u8 = 7;

/// Number of vendor interrupt lines supported by the vector table. The full
/// table is this many entries plus the 16 architecturally defined ones.
pub const IRQ_COUNT: u32 = 41;

/// Tick frequency, in Hz. All timing APIs are measured in these units.
pub const TICK_HZ: u32 = 1_000;

/// Names a particular incarnation of a thread.
///
/// A `ThreadId` combines two fields: a slot index in the low half and a
/// creation serial number in the high half. The serial number increments on
/// every thread creation, so a stale `ThreadId` whose slot has been reused
/// will fail to match. This makes handles reuse-safe within 65536
/// creations.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(transparent)]
pub struct ThreadId(pub u32);

impl ThreadId {
    /// Number of bits in a `ThreadId` used to represent the slot index,
    /// rather than the creation serial.
    pub const INDEX_BITS: u32 = 16;

    /// Derived mask of the index bits portion.
    pub const INDEX_MASK: u32 = (1 << Self::INDEX_BITS) - 1;

    /// Fabricates a `ThreadId` for a known slot index and creation serial.
    pub const fn for_slot_and_serial(slot: usize, serial: u16) -> Self {
        ThreadId((slot as u32 & Self::INDEX_MASK) | (serial as u32) << Self::INDEX_BITS)
    }

    /// Extracts the slot index part of this ID.
    pub fn index(&self) -> usize {
        (self.0 & Self::INDEX_MASK) as usize
    }

    /// Extracts the creation serial part of this ID.
    pub fn serial(&self) -> u16 {
        (self.0 >> Self::INDEX_BITS) as u16
    }
}

/// Indicates priority of a thread.
///
/// Priorities are small numbers starting from zero. Numerically lower
/// priorities are more important, so priority 0 is the most likely to be
/// scheduled, followed by 1, and so forth. This matches the ARM exception
/// priority convention.
///
/// Note that this type *deliberately* does not implement
/// `PartialOrd`/`Ord`, to keep us from confusing ourselves on whether `>`
/// means numerically greater / less important, or more important /
/// numerically smaller.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
#[repr(transparent)]
pub struct Priority(pub u8);

impl Priority {
    /// Checks if `self` is strictly more important than `other`.
    ///
    /// This is easier to read than comparing the numeric values of the
    /// priorities, since lower numbers are more important.
    pub fn is_more_important_than(self, other: Self) -> bool {
        self.0 < other.0
    }
}

/// Newtype wrapper for a vendor interrupt index (0-based, excluding the 16
/// architectural exceptions).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
#[repr(transparent)]
pub struct InterruptNum(pub u32);

impl InterruptNum {
    /// Checks whether this interrupt line exists on the target.
    pub fn is_valid(&self) -> bool {
        self.0 < IRQ_COUNT
    }
}

/// Errors reported by the kernel entry points.
///
/// The discriminants are stable numeric codes, chosen so that a debugger
/// (or a C-speaking neighbor) sees the conventional negative values.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(i32)]
pub enum KernError {
    /// A thread table slot limit was hit.
    ThreadLimitReached = -1,
    /// `launch` was called without any threads to run.
    NoThreadsScheduled = -2,
    /// No dead slot was available for a new thread.
    ThreadsIncorrectlyAlive = -3,
    /// The given `ThreadId` does not name an alive thread.
    ThreadDoesNotExist = -4,
    /// Killing this thread would empty the ring.
    CannotKillLastThread = -5,
    /// The interrupt number is outside the vector table.
    IrqInvalid = -6,
    /// The requested hardware interrupt priority would let the handler
    /// preempt kernel exceptions.
    HwiPriorityInvalid = -7,
}

impl KernError {
    /// Returns the stable numeric code for this error. Success is
    /// conventionally 0, represented in Rust by `Ok(())`.
    pub const fn code(self) -> i32 {
        self as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_id_round_trips_slot_and_serial() {
        let id = ThreadId::for_slot_and_serial(25, 0xBEEF);
        assert_eq!(id.index(), 25);
        assert_eq!(id.serial(), 0xBEEF);
    }

    #[test]
    fn thread_id_serial_disambiguates_reused_slot() {
        let first = ThreadId::for_slot_and_serial(3, 0);
        let reused = ThreadId::for_slot_and_serial(3, 1);
        assert_ne!(first, reused);
        assert_eq!(first.index(), reused.index());
    }

    #[test]
    fn priority_zero_is_most_important() {
        assert!(Priority(0).is_more_important_than(Priority(1)));
        assert!(!Priority(200).is_more_important_than(Priority(7)));
        assert!(!Priority(5).is_more_important_than(Priority(5)));
    }

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(KernError::ThreadLimitReached.code(), -1);
        assert_eq!(KernError::NoThreadsScheduled.code(), -2);
        assert_eq!(KernError::ThreadsIncorrectlyAlive.code(), -3);
        assert_eq!(KernError::ThreadDoesNotExist.code(), -4);
        assert_eq!(KernError::CannotKillLastThread.code(), -5);
        assert_eq!(KernError::IrqInvalid.code(), -6);
        assert_eq!(KernError::HwiPriorityInvalid.code(), -7);
    }
}
