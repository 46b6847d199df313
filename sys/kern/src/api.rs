// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel entry points.
//!
//! Applications call these as ordinary functions; there is no syscall
//! trap. Each entry point takes the kernel state under a critical section
//! (see `state::with_kernel`) and, where the operation has scheduling
//! implications, pends the context-switch exception *after* the critical
//! section ends, so the switch happens at the next priority-permitted
//! moment.
//!
//! Blocking is linear, not a retry loop: `acquire_semaphore` decrements
//! the counter exactly once, and a thread that blocked simply continues
//! past the call once a release has cleared its blocked mark and the
//! scheduler has picked it again.

use core::convert::Infallible;

use abi::{InterruptNum, KernError, Priority, ThreadId, MAX_NAME_LENGTH, OSINT_PRIORITY};
use fixedstr::FixedString;

use crate::arch;
use crate::fifo::{self, FifoId, Overflow};
use crate::sem::{self, SemId};
use crate::state::{with_kernel, Kernel};
use crate::thread::{NextThread, ThreadEntry};
use crate::time::Ticks;

/// Resets the kernel to its boot state and claims the interrupt vector
/// table (copying it to RAM so aperiodic events can be installed later).
///
/// Board bring-up -- clocks, watchdog, peripherals -- is the
/// application's responsibility and should happen around this call.
///
/// # Safety
///
/// Call exactly once per boot, before any other kernel entry point, from
/// the reset path (thread mode, interrupts not yet in use).
pub unsafe fn init() {
    with_kernel(|k| k.reset());
    // Safety: per our own contract, nothing is using the vector table
    // concurrently yet.
    unsafe {
        arch::relocate_vector_table();
    }
    klog!("kernel: init");
}

/// Creates a thread running `entry` at `priority`.
///
/// The new thread is linked into the ring right after the caller and
/// becomes eligible at the next context switch. `name` is a debugging
/// label, truncated to `MAX_NAME_LENGTH` bytes.
pub fn add_thread(
    entry: ThreadEntry,
    priority: Priority,
    name: &str,
) -> Result<ThreadId, KernError> {
    with_kernel(|k| {
        let slot = k.threads.add(priority, name)?;
        let psp = arch::frame_initial_stack(&mut k.stacks[slot], entry);
        k.threads.thread_mut(slot).save_mut().set_stack_pointer(psp);
        Ok(k.threads.thread(slot).id())
    })
}

/// Registers `handler` to be invoked from the tick interrupt every
/// `period` ticks. Handlers run in ISR context and must not block.
pub fn add_periodic_thread(handler: fn(), period: u32) -> Result<(), KernError> {
    with_kernel(|k| {
        let now = k.now;
        k.periodics.add(handler, period, now)
    })
}

/// Installs `handler` as the service routine for hardware interrupt
/// `irq`, at the given NVIC priority, and enables the interrupt.
///
/// The priority must be more urgent than `OSINT_PRIORITY` so the handler
/// is never confused with kernel-managed exceptions, and `irq` must name
/// a line that exists on this part.
pub fn add_aperiodic_event(
    handler: fn(),
    priority: u8,
    irq: InterruptNum,
) -> Result<(), KernError> {
    if !irq.is_valid() {
        return Err(KernError::IrqInvalid);
    }
    if priority >= OSINT_PRIORITY {
        return Err(KernError::HwiPriorityInvalid);
    }
    let saved = arch::disable_interrupts();
    // Safety: irq was range-checked above, and the handler is a real
    // function the application handed us.
    unsafe {
        arch::install_aperiodic_event(handler, priority, irq);
    }
    arch::restore_interrupts(saved);
    Ok(())
}

/// Starts the scheduler: picks the most important thread, arms the tick
/// timer from `tick_divisor` (core clock cycles per tick), and jumps into
/// the first thread. Returns only on failure.
pub fn launch(tick_divisor: u32) -> Result<Infallible, KernError> {
    let first_psp = with_kernel(|k| {
        let slot = k.threads.launch_select()?;
        // Safety: the slot comes from the thread table, and the recorded
        // pointer is only dereferenced by the context-switch machinery
        // once we hand control over, outside this borrow.
        unsafe {
            arch::set_current_thread(k.threads.thread(slot), slot);
        }
        Ok(k.threads.thread(slot).save().stack_pointer())
    })?;
    klog!("starting: osprey");
    arch::start_first_thread(tick_divisor, first_psp)
}

/// Puts the calling thread to sleep for `duration` ticks.
pub fn sleep(duration: u32) {
    with_kernel(|k| {
        let wake_at = k.now.offset(duration);
        k.threads.sleep_current(wake_at);
    });
    arch::pend_context_switch();
}

/// Requests a context switch at the next priority-permitted moment.
pub fn yield_now() {
    arch::pend_context_switch();
}

/// Returns the calling thread's identifier.
pub fn current_thread_id() -> ThreadId {
    with_kernel(|k| k.threads.current_id())
}

/// Returns the calling thread's debugging label.
pub fn current_thread_name() -> FixedString<MAX_NAME_LENGTH> {
    with_kernel(|k| FixedString::from_str_truncated(k.threads.current().name()))
}

/// Kills the thread named by `id`, unlinking it from the ring. Killing
/// the last thread is rejected to keep the ring non-empty; killing
/// yourself yields, and the call returns into code that will never be
/// scheduled again.
pub fn kill_thread(id: ThreadId) -> Result<(), KernError> {
    let hint = with_kernel(|k| k.threads.kill(id))?;
    if hint == NextThread::Other {
        arch::pend_context_switch();
    }
    Ok(())
}

/// Kills the calling thread.
pub fn kill_self() -> Result<(), KernError> {
    kill_thread(current_thread_id())
}

/// Kills every thread except the caller.
pub fn kill_all_others() {
    with_kernel(|k| k.threads.kill_all_others());
}

/// Sets semaphore `s` to `value`, regardless of its previous state.
pub fn init_semaphore(s: SemId, value: i32) {
    with_kernel(|k| k.sems.init(s, value));
}

/// Takes one unit of `s`, blocking the calling thread if none is
/// available.
pub fn acquire_semaphore(s: SemId) {
    acquire_blocking(s);
}

/// Returns one unit of `s`, waking the first ring-order waiter if any.
/// Does not yield.
pub fn release_semaphore(s: SemId) {
    with_kernel(|k| sem::release(&mut k.sems, &mut k.threads, s));
}

/// Reads the current counter of `s`, for diagnostics.
pub fn semaphore_value(s: SemId) -> i32 {
    with_kernel(|k| k.sems.value(s))
}

/// Resets FIFO `f` to empty: reads will block, the reader mutex is free.
pub fn init_fifo(f: FifoId) {
    with_kernel(|k| {
        let Kernel { fifos, sems, .. } = &mut *k;
        fifos.init(sems, f);
    });
}

/// Takes the oldest word from FIFO `f`, blocking until one is available.
pub fn read_fifo(f: FifoId) -> u32 {
    acquire_blocking(SemId::fifo_items(f));
    acquire_blocking(SemId::fifo_mutex(f));
    let data = with_kernel(|k| k.fifos.pop(f));
    with_kernel(|k| sem::release(&mut k.sems, &mut k.threads, SemId::fifo_mutex(f)));
    data
}

/// Appends `data` to FIFO `f`. A full FIFO drops the word, counts it, and
/// reports `Overflow`. Safe to call from ISR context; never blocks.
pub fn write_fifo(f: FifoId, data: u32) -> Result<(), Overflow> {
    with_kernel(|k| {
        let Kernel {
            fifos,
            sems,
            threads,
            ..
        } = &mut *k;
        fifo::write(fifos, sems, threads, f, data)
    })
}

/// Number of words dropped against FIFO `f` since its last init.
pub fn fifo_lost_count(f: FifoId) -> u32 {
    with_kernel(|k| k.fifos.lost_count(f))
}

/// Current kernel timestamp.
pub fn system_time() -> Ticks {
    with_kernel(|k| k.now)
}

/// The tick interrupt body. The architecture's timer ISR calls this on
/// every tick; hosted simulations may call it directly.
///
/// Order matters and is observable: time advances first, then due
/// periodic handlers run (synchronously, in ISR context), then sleepers
/// are woken, then a context switch is requested unconditionally. The
/// handlers are invoked *between* state borrows so they can call kernel
/// entry points themselves.
pub fn tick() {
    let due = with_kernel(|k| k.tick_periodics());
    for handler in due.iter() {
        handler();
    }
    with_kernel(|k| k.tick_wake());
    arch::pend_context_switch();
}

fn acquire_blocking(s: SemId) {
    let hint = with_kernel(|k| sem::acquire(&mut k.sems, &mut k.threads, s));
    if hint == NextThread::Other {
        arch::pend_context_switch();
        // The switch fires once interrupts are unmasked; we resume here
        // after being unblocked and rescheduled.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // The kernel state is a process-wide static, so the tests touching it
    // must not interleave.
    static TEST_LOCK: Mutex<()> = Mutex::new(());

    fn reset() {
        with_kernel(|k| k.reset());
    }

    fn spin() {
        loop {}
    }

    #[test]
    fn add_thread_reports_id_and_frames_stack() {
        let _guard = TEST_LOCK.lock().unwrap();
        reset();
        let id = add_thread(spin, Priority(3), "worker").unwrap();
        assert_eq!(id.index(), 0);
        assert_eq!(current_thread_id(), id);
        assert_eq!(current_thread_name().as_str(), "worker");
    }

    #[test]
    fn aperiodic_event_validation() {
        let _guard = TEST_LOCK.lock().unwrap();
        reset();
        assert_eq!(
            add_aperiodic_event(spin, 1, InterruptNum(999)),
            Err(KernError::IrqInvalid),
        );
        assert_eq!(
            add_aperiodic_event(spin, OSINT_PRIORITY, InterruptNum(3)),
            Err(KernError::HwiPriorityInvalid),
        );
        assert_eq!(add_aperiodic_event(spin, 1, InterruptNum(3)), Ok(()));
    }

    #[test]
    fn launch_without_threads_fails() {
        let _guard = TEST_LOCK.lock().unwrap();
        reset();
        assert_eq!(launch(48_000).unwrap_err(), KernError::NoThreadsScheduled);
    }

    #[test]
    fn fifo_round_trip_through_entry_points() {
        let _guard = TEST_LOCK.lock().unwrap();
        reset();
        add_thread(spin, Priority(1), "io").unwrap();
        let f = FifoId::new(0).unwrap();
        init_fifo(f);
        write_fifo(f, 42).unwrap();
        assert_eq!(read_fifo(f), 42);
        assert_eq!(fifo_lost_count(f), 0);
    }

    #[test]
    fn semaphore_entry_points_count() {
        let _guard = TEST_LOCK.lock().unwrap();
        reset();
        add_thread(spin, Priority(1), "a").unwrap();
        let s = SemId::new(2).unwrap();
        init_semaphore(s, 2);
        acquire_semaphore(s);
        assert_eq!(semaphore_value(s), 1);
        release_semaphore(s);
        assert_eq!(semaphore_value(s), 2);
    }

    #[test]
    fn sleep_marks_caller_and_requests_switch() {
        let _guard = TEST_LOCK.lock().unwrap();
        reset();
        add_thread(spin, Priority(1), "napper").unwrap();
        arch::take_pended_switches();
        sleep(5);
        assert!(with_kernel(|k| k.threads.current().wake_at().is_some()));
        assert!(arch::take_pended_switches() > 0);
    }

    #[test]
    fn tick_runs_periodic_handlers_and_requests_switch() {
        use std::sync::atomic::{AtomicU32, Ordering};
        static FIRINGS: AtomicU32 = AtomicU32::new(0);
        fn record() {
            // Periodic handlers may call back into the kernel; prove it.
            let _ = write_fifo(FifoId::new(1).unwrap(), 7);
            FIRINGS.fetch_add(1, Ordering::Relaxed);
        }

        let _guard = TEST_LOCK.lock().unwrap();
        reset();
        FIRINGS.store(0, Ordering::Relaxed);
        add_thread(spin, Priority(1), "main").unwrap();
        init_fifo(FifoId::new(1).unwrap());
        add_periodic_thread(record, 3).unwrap();

        arch::take_pended_switches();
        for _ in 0..9 {
            tick();
        }
        assert_eq!(u32::from(system_time()), 9);
        assert_eq!(FIRINGS.load(Ordering::Relaxed), 3);
        // Every tick requests a context switch.
        assert_eq!(arch::take_pended_switches(), 9);
        assert_eq!(read_fifo(FifoId::new(1).unwrap()), 7);
    }

    #[test]
    fn kill_self_is_rejected_for_last_thread() {
        let _guard = TEST_LOCK.lock().unwrap();
        reset();
        add_thread(spin, Priority(1), "only").unwrap();
        assert_eq!(kill_self(), Err(KernError::CannotKillLastThread));
    }
}
