// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Architecture support for ARMv7-M.
//!
//! # ARM-M timer
//!
//! We use the system tick timer as the kernel timer. It's only suitable
//! for producing periodic interrupts -- its counter is small and only
//! counts down -- so each SysTick interrupt advances the kernel timestamp
//! by one. This has the downside that we take regular interrupts to
//! maintain time, but has the upside that we don't need special SoC
//! support for timing.
//!
//! # Notes on ARM-M interrupts
//!
//! Two kernel exceptions cooperate here:
//!
//! - `SysTick` runs the tick bookkeeping: time, periodic handlers, and
//!   sleeper wakeup.
//! - `PendSV` performs deferred context switches.
//!
//! `PendSV` exists because a context switch cannot be done from an
//! ordinary ISR: the ISR returns into the *same code that called it*,
//! while a switch needs to deposit callee-saved state somewhere stable
//! and possibly return into a different thread entirely. So anything that
//! wants a switch -- the tick handler, a blocking kernel call, `yield` --
//! just pokes a register that sets the `PendSV` exception pending. Both
//! exceptions sit at the lowest priority, so `PendSV` kicks in only after
//! every ISR (including `SysTick` itself) has drained, and then performs
//! the save/scheduler/restore sequence. We didn't invent this idea --
//! it's covered in most books on the Cortex-M.
//!
//! # Thread stacks and the initial frame
//!
//! Threads run privileged in Thread mode on the Process Stack Pointer;
//! the kernel and all ISRs use the Main stack. A suspended thread's
//! callee-saved registers (r4-r11) live on its own stack directly below
//! the hardware-pushed exception frame, and its TCB records only the
//! resulting stack top. A newborn thread's stack is framed to look
//! exactly like that, so the first switch into it is indistinguishable
//! from a resume. Floating-point context is not preserved; threads must
//! not leave lazy FP state enabled.

use core::sync::atomic::{AtomicPtr, AtomicU32, Ordering};

use abi::{InterruptNum, IRQ_COUNT, STACK_WORDS};

use crate::thread::{Thread, ThreadEntry, ThreadStack};

/// Logging macro for kernel diagnostics.
///
/// There are two (architecture-specific) ways to log: via semihosting
/// (the "klog-semihosting" feature) or via the Instrumentation Trace
/// Macrocell (the "klog-itm" feature). If neither feature is enabled,
/// `klog!` is stubbed out.
#[cfg(not(any(feature = "klog-semihosting", feature = "klog-itm")))]
macro_rules! klog {
    ($s:expr) => {};
    ($s:expr, $($tt:tt)*) => {};
}

#[cfg(feature = "klog-itm")]
macro_rules! klog {
    ($s:expr) => {
        #[allow(unused_unsafe)]
        unsafe {
            let stim = &mut (*cortex_m::peripheral::ITM::PTR).stim[0];
            cortex_m::iprintln!(stim, $s);
        }
    };
    ($s:expr, $($tt:tt)*) => {
        #[allow(unused_unsafe)]
        unsafe {
            let stim = &mut (*cortex_m::peripheral::ITM::PTR).stim[0];
            cortex_m::iprintln!(stim, $s, $($tt)*);
        }
    };
}

#[cfg(feature = "klog-semihosting")]
macro_rules! klog {
    ($s:expr) => { let _ = cortex_m_semihosting::hprintln!($s); };
    ($s:expr, $($tt:tt)*) => { let _ = cortex_m_semihosting::hprintln!($s, $($tt)*); };
}

macro_rules! uassert {
    ($cond:expr) => {
        if !$cond {
            panic!("Assertion failed!");
        }
    };
}

macro_rules! uassert_eq {
    ($cond1:expr, $cond2:expr) => {
        if !($cond1 == $cond2) {
            panic!("Assertion failed!");
        }
    };
}

/// On ARMv7-M we have to use a global to record the current thread
/// pointer, since we don't have a scratch register.
#[no_mangle]
static CURRENT_THREAD_PTR: AtomicPtr<Thread> = AtomicPtr::new(core::ptr::null_mut());

/// To allow our clock frequency to be easily determined from a debugger,
/// we store it in memory.
#[no_mangle]
static CLOCK_FREQ_KHZ: AtomicU32 = AtomicU32::new(0);

/// Saved machine state of a suspended thread. Everything else lives on
/// the thread's stack; only the stack top needs a home in the TCB.
#[repr(C)]
pub struct SavedState {
    // NOTE: the context-switch assembly stores through the TCB pointer at
    // offset zero; this must stay the first and only field.
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

/// Number of 32-bit words in an initial thread frame: r4-r11 below the
/// hardware-pushed r0-r3, r12, lr, pc, psr.
const FRAME_WORDS: usize = 16;

/// Initially we just set the Thumb Mode bit, the minimum required.
const INITIAL_PSR: u32 = 1 << 24;

/// Planted in a newborn frame's LR slot so a thread that returns from its
/// entry function traps instead of wandering off.
const LR_TRAP: u32 = 0xFFFF_FFFF;

/// EXC_RETURN for resuming a thread: Thread mode, Process stack, no
/// floating-point frame.
const EXC_RETURN_CONST: u32 = 0xFFFFFFFD;

/// Pattern used to paint fresh stacks, so the high-water mark is visible
/// in a debugger.
const STACK_FILL: u32 = 0xbaddcafe;

/// Number of implemented NVIC priority bits on this SoC class.
const NVIC_PRIO_BITS: u8 = 3;

/// Full vector table length: 16 architectural entries plus the vendor
/// interrupt lines.
const VECTOR_COUNT: usize = 16 + IRQ_COUNT as usize;

/// Saves the current interrupt mask and disables maskable interrupts.
/// Returns nonzero if interrupts were previously enabled. Composes: the
/// saved value carries the prior state, so nesting works.
pub fn disable_interrupts() -> u32 {
    let primask = cortex_m::register::primask::read();
    cortex_m::interrupt::disable();
    primask.is_active() as u32
}

/// Restores the interrupt mask saved by `disable_interrupts`.
pub fn restore_interrupts(saved: u32) {
    if saved != 0 {
        // Safety: we're returning to the state the matching
        // `disable_interrupts` observed.
        unsafe { cortex_m::interrupt::enable() }
    }
}

/// Sets the bit that pends a PendSV exception. PendSV will happen after
/// the current ISR (and any chained ISRs) returns, or -- from thread
/// context -- as soon as interrupts are unmasked, and perform the context
/// switch.
pub fn pend_context_switch() {
    cortex_m::peripheral::SCB::set_pendsv();
}

/// Builds the initial frame for a newborn thread on `stack` and returns
/// the stack-top address to record in its TCB.
///
/// In address order from the returned pointer: r4-r11 (dummy values, for
/// the trampoline to pop), then r0-r3, r12, lr, pc, psr in the layout the
/// hardware pushes on exception entry. When the trampoline first resumes
/// this thread, execution begins at `entry` in Thumb mode.
pub fn frame_initial_stack(stack: &mut ThreadStack, entry: ThreadEntry) -> u32 {
    for word in stack.0.iter_mut() {
        *word = STACK_FILL;
    }
    let frame = &mut stack.0[STACK_WORDS - FRAME_WORDS..];
    // r4-r11, then r0-r3 and r12: dummy values.
    for word in frame[0..13].iter_mut() {
        *word = 0;
    }
    frame[13] = LR_TRAP;
    frame[14] = entry as usize as u32 | 1; // for thumb
    frame[15] = INITIAL_PSR;

    let psp = core::ptr::addr_of!(stack.0[STACK_WORDS - FRAME_WORDS]) as u32;
    // The frame must be 8-byte aligned per AAPCS; ThreadStack guarantees
    // this, but it's cheap to notice corruption here.
    uassert_eq!(psp & 0x7, 0);
    psp
}

/// Records the address of `thread` as the current thread, for the
/// context-switch assembly.
///
/// # Safety
///
/// This records a pointer that aliases `thread`. As long as you don't
/// read that pointer while you have access to `thread`, and as long as
/// the `thread` being stored actually lives in the thread table, you'll
/// be okay.
pub unsafe fn set_current_thread(thread: &Thread, slot: usize) {
    CURRENT_THREAD_PTR.store(thread as *const _ as *mut _, Ordering::Relaxed);
    crate::profiling::event_context_switch(slot);
}

/// RAM copy of the vector table, populated by `relocate_vector_table`.
/// VTOR requires the table to be aligned to the next power of two above
/// its byte size.
#[repr(C, align(256))]
struct VectorTable([u32; VECTOR_COUNT]);

static mut RAM_VECTORS: VectorTable = VectorTable([0; VECTOR_COUNT]);

/// Copies the active vector table into RAM and retargets VTOR at the
/// copy, so individual vectors can be rewritten at run time.
///
/// # Safety
///
/// Call once, at init, before any interrupt that might use the table is
/// enabled.
pub unsafe fn relocate_vector_table() {
    // Safety: per this function's contract we are alone at init time; the
    // source table is whatever the boot ROM/flash published in VTOR, and
    // the destination is our own static.
    unsafe {
        let scb = &*cortex_m::peripheral::SCB::PTR;
        let src = scb.vtor.read() as *const u32;
        let dst = core::ptr::addr_of_mut!(RAM_VECTORS) as *mut u32;
        for i in 0..VECTOR_COUNT {
            dst.add(i).write_volatile(src.add(i).read_volatile());
        }
        scb.vtor.write(dst as u32);
    }
}

/// Writes `handler` into the RAM vector table for `irq`, sets its NVIC
/// priority, and enables it.
///
/// # Safety
///
/// The caller must have range-checked `irq` and must have called
/// `relocate_vector_table` first; the vector write takes effect on the
/// next assertion of the interrupt.
pub unsafe fn install_aperiodic_event(handler: fn(), priority: u8, irq: InterruptNum) {
    let n = irq.0 as usize;
    // Safety: the index is in the table per this function's contract, and
    // the NVIC pokes only affect the line being installed.
    unsafe {
        let dst = core::ptr::addr_of_mut!(RAM_VECTORS) as *mut u32;
        dst.add(16 + n).write_volatile(handler as usize as u32);

        let nvic = &*cortex_m::peripheral::NVIC::PTR;
        // Priorities live in the top implemented bits of each byte-wide
        // IPR.
        nvic.ipr[n].write(priority << (8 - NVIC_PRIO_BITS));
        // Enable by poking the Interrupt Set Enable Register.
        nvic.iser[n / 32].write(1 << (n % 32));
    }
}

/// Arms the tick timer and drops into the first thread. `tick_divisor`
/// is core clock cycles per kernel tick; `psp` is the framed stack top of
/// the thread chosen by the launch scan.
pub fn start_first_thread(tick_divisor: u32, psp: u32) -> ! {
    // Hold interrupts off until the thread frame is live; the final
    // instruction sequence re-enables them.
    cortex_m::interrupt::disable();

    CLOCK_FREQ_KHZ.store(tick_divisor, Ordering::Relaxed);

    // Safety: we're purely *lowering* exception priorities from their
    // reset defaults, so this can't cause surprise preemption; the
    // operations are `unsafe` in the `cortex_m` crate's API only.
    unsafe {
        let scb = &*cortex_m::peripheral::SCB::PTR;
        // SysTick and PendSV at the lowest configurable priority: the
        // tick handler runs to completion, and the context switch runs
        // only once no ISR is pending.
        scb.shpr[10].write(0xFF);
        scb.shpr[11].write(0xFF);
    }

    // Safety: this, too, is safe in practice but unsafe in API.
    unsafe {
        // Configure the timer.
        let syst = &*cortex_m::peripheral::SYST::PTR;
        // Program reload value.
        syst.rvr.write(tick_divisor - 1);
        // Clear current value.
        syst.cvr.write(0);
        // Enable counter and interrupt.
        syst.csr.modify(|v| v | 0b111);
    }

    klog!("first thread frame at {:#x}", psp);

    // Switch Thread mode onto the Process stack, then play the part of
    // the trampoline's restore half: pop the callee-saved dummies and the
    // hardware half of the frame by hand, ending in a jump to the entry
    // point. After this, every suspend/resume goes through PendSV.
    //
    // Safety: `psp` points at a frame built by `frame_initial_stack`;
    // nothing else runs on the process stack yet.
    unsafe {
        core::arch::asm!(
            "
            msr PSP, {frame}
            movs r0, #2
            msr CONTROL, r0
            isb
            pop {{r4-r11}}
            pop {{r0-r3}}
            pop {{r12}}
            add sp, #4          @ skip the lr slot
            pop {{lr}}          @ entry point
            add sp, #4          @ discard psr; thumb bit travels in lr
            cpsie i
            bx lr
            ",
            frame = in(reg) psp,
            options(noreturn),
        )
    }
}

/// Handler that gets linked into the vector table for the System Tick
/// Timer overflow interrupt. (Name is dictated by the `cortex_m` crate.)
#[allow(non_snake_case)]
#[no_mangle]
pub unsafe extern "C" fn SysTick() {
    crate::profiling::event_timer_isr_enter();
    crate::api::tick();
    crate::profiling::event_timer_isr_exit();
}

// PendSV: the context-switch trampoline.
//
// The hardware has already pushed r0-r3, r12, lr, pc, psr onto the
// outgoing thread's process stack. We push r4-r11 below that, record the
// resulting stack top in the TCB (via CURRENT_THREAD_PTR, whose pointee
// starts with the saved-psp word), let the scheduler move the pointer,
// and then run the same sequence backwards for the incoming thread. On
// the first resume of a newborn thread, the frame popped here is the one
// built by `frame_initial_stack`.
core::arch::global_asm! {"
    .section .text.PendSV
    .globl PendSV
    .type PendSV,function
    PendSV:
        @ store volatile state.
        @ first, get a pointer to the current thread.
        movw r0, #:lower16:CURRENT_THREAD_PTR
        movt r0, #:upper16:CURRENT_THREAD_PTR
        ldr r1, [r0]
        @ push the callee-saved registers below the hardware frame and
        @ record the new stack top in the TCB.
        mrs r0, PSP
        stmdb r0!, {{r4-r11}}
        str r0, [r1]

        bl pendsv_entry

        @ we're returning into *some* thread, maybe not the same one.
        movw r0, #:lower16:CURRENT_THREAD_PTR
        movt r0, #:upper16:CURRENT_THREAD_PTR
        ldr r1, [r0]
        ldr r0, [r1]
        ldmia r0!, {{r4-r11}}
        msr PSP, r0

        @ materialize EXC_RETURN to resume on the process stack.
        mov lr, {exc_return}
        bx lr
    ",
    exc_return = const EXC_RETURN_CONST,
}

/// The Rust side of the PendSV handler, after the outgoing thread's
/// volatile registers have been saved somewhere predictable.
#[no_mangle]
unsafe extern "C" fn pendsv_entry() {
    crate::profiling::event_scheduler_enter();

    let current = CURRENT_THREAD_PTR.load(Ordering::Relaxed);
    uassert!(!current.is_null()); // context switch before launch?

    crate::state::with_kernel(|k| {
        let slot = k.threads.schedule();
        // Safety: the slot indexes the thread table, and the recorded
        // pointer is next read by the assembly above, after this borrow
        // ends.
        unsafe {
            set_current_thread(k.threads.thread(slot), slot);
        }
    });

    crate::profiling::event_scheduler_exit();
}
