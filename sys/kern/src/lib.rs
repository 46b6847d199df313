// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Osprey kernel.
//!
//! A small preemptive RTOS kernel for single-core ARMv7-M parts: a fixed
//! table of priority-scheduled threads with round-robin among equals,
//! periodic handlers driven from the tick interrupt, counting semaphores,
//! bounded FIFOs, and timed sleeps. Interrupt masking is the only
//! synchronization primitive.
//!
//! The code outside the `arch` module is portable; on non-ARM hosts the
//! `arch::fake` stubs stand in for the hardware so the core can be built
//! and unit-tested with the standard library available.
//!
//! # Design principles
//!
//! While this isn't a *deeply* principled kernel, there are some basic
//! ideas that appear consistently.
//!
//! 1. Static configuration. The system takes a single shape specified at
//!    compile time; there is no heap.
//! 2. Arena + handles instead of pointer graphs. Rings are arrays whose
//!    links are slot indices, so kernel structures are plain data.
//! 3. A strong preference for safe code where reasonable; `unsafe` is
//!    confined to the architecture layer.
//! 4. A preference for simple and clear algorithms over fast and clever
//!    algorithms. Scans are linear; the tables are small.

#![cfg_attr(target_os = "none", no_std)]

#[macro_use]
pub mod arch;

pub mod api;
pub mod fifo;
pub mod periodic;
pub mod profiling;
pub mod sem;
pub mod thread;
pub mod time;

pub(crate) mod state;

#[cfg(target_os = "none")]
pub mod fail;
