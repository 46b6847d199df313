// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Stub architecture for building and testing the portable kernel core
//! on a development host.
//!
//! There is no interrupt controller and no second stack here, so
//! "masking" and "pending" are bookkeeping only: tests drive the
//! scheduler and tick bookkeeping directly and observe the state they
//! produce. `start_first_thread` has nowhere to go and panics.

use core::sync::atomic::{AtomicU32, Ordering};

use abi::{InterruptNum, STACK_WORDS};

use crate::thread::{Thread, ThreadEntry, ThreadStack};

macro_rules! klog {
    ($s:expr) => {};
    ($s:expr, $($tt:tt)*) => {};
}

macro_rules! uassert {
    ($cond:expr) => {
        if !$cond {
            panic!("Assertion failed!");
        }
    };
}

#[allow(unused_macros)]
macro_rules! uassert_eq {
    ($cond1:expr, $cond2:expr) => {
        if !($cond1 == $cond2) {
            panic!("Assertion failed!");
        }
    };
}

/// Mirror of the ARM `SavedState`: just the recorded stack top.
#[repr(C)]
pub struct SavedState {
    psp: u32,
}

impl SavedState {
    pub(crate) const INIT: Self = Self { psp: 0 };

    pub fn stack_pointer(&self) -> u32 {
        self.psp
    }

    pub(crate) fn set_stack_pointer(&mut self, psp: u32) {
        self.psp = psp;
    }
}

static PENDED_SWITCHES: AtomicU32 = AtomicU32::new(0);

pub fn disable_interrupts() -> u32 {
    1
}

pub fn restore_interrupts(_saved: u32) {}

/// Counts instead of pending: tests read the count back with
/// `take_pended_switches`.
pub fn pend_context_switch() {
    PENDED_SWITCHES.fetch_add(1, Ordering::Relaxed);
}

/// Returns the number of context-switch requests since the last call,
/// resetting the count.
pub fn take_pended_switches() -> u32 {
    PENDED_SWITCHES.swap(0, Ordering::Relaxed)
}

/// Paints the stack like the real framer but records no entry point;
/// host pointers don't fit the 32-bit frame, and nothing will pop it.
pub fn frame_initial_stack(stack: &mut ThreadStack, _entry: ThreadEntry) -> u32 {
    for word in stack.0.iter_mut() {
        *word = 0xbaddcafe;
    }
    (STACK_WORDS * 4) as u32
}

/// # Safety
///
/// None of the hazards of the real implementation exist here; `unsafe`
/// only to match the ARM signature.
pub unsafe fn set_current_thread(_thread: &Thread, _slot: usize) {}

/// # Safety
///
/// None of the hazards of the real implementation exist here; `unsafe`
/// only to match the ARM signature.
pub unsafe fn relocate_vector_table() {}

/// # Safety
///
/// None of the hazards of the real implementation exist here; `unsafe`
/// only to match the ARM signature.
pub unsafe fn install_aperiodic_event(_handler: fn(), _priority: u8, _irq: InterruptNum) {}

pub fn start_first_thread(_tick_divisor: u32, _psp: u32) -> ! {
    panic!("entering userland");
}
