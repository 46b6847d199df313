// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Implementation of threads.
//!
//! Threads live in a fixed arena of `MAX_THREADS` slots. The alive threads
//! are additionally linked into a doubly-linked circular list -- the ring
//! -- whose links are *slot indices*, not pointers, so the whole structure
//! is plain old data and can be inspected (or serialized) from a debugger
//! without chasing addresses.
//!
//! The ring exists to give the scheduler its notion of order: scanning
//! starts at the successor of the current thread, which is what produces
//! round-robin behavior among threads of equal priority. A `Thread` is in
//! the ring exactly when `alive` is set. Killing a thread unlinks it but
//! deliberately leaves its *own* links intact, so that a thread that has
//! just killed itself can still be used as a scan origin until the next
//! context switch.

use abi::{KernError, Priority, ThreadId, MAX_NAME_LENGTH, MAX_THREADS, STACK_WORDS};
use fixedstr::FixedString;

use crate::sem::SemId;
use crate::time::Ticks;

/// Entry point of a thread. Threads normally never return; a thread that
/// does return hits the trap value planted in its initial frame.
pub type ThreadEntry = fn();

/// Backing store for one thread's stack.
///
/// Alignment is 8 bytes because AAPCS requires 8-byte stack alignment at
/// public interfaces, and the initial frame is built at the very top.
#[repr(C, align(8))]
pub struct ThreadStack(pub(crate) [u32; STACK_WORDS]);

impl ThreadStack {
    pub(crate) const INIT: Self = Self([0; STACK_WORDS]);
}

/// Internal representation of a thread.
///
/// The fields of this struct are private to this module so that we can
/// maintain the ring invariants from one place.
#[repr(C)] // so location of SavedState is predictable
pub struct Thread {
    /// Saved machine state of the thread.
    save: crate::arch::SavedState,
    // NOTE: it is critical that the above field appear first!
    /// Scheduling priority; lower numbers win.
    priority: Priority,
    /// Semaphore this thread is blocked on, if any. This field is the
    /// single source of truth for blocked-ness.
    blocked: Option<SemId>,
    /// Absolute tick at which a sleeping thread becomes runnable again.
    /// `Some` *is* the asleep flag.
    wake_at: Option<Ticks>,
    /// A slot holds a live thread exactly when this is set.
    alive: bool,
    /// Reuse-safe identifier handed out by `add`.
    id: ThreadId,
    /// Short human-readable label, for debuggers.
    name: FixedString<MAX_NAME_LENGTH>,
    /// Ring successor, as a slot index. Meaningful only while linked.
    next: usize,
    /// Ring predecessor, as a slot index. Meaningful only while linked.
    prev: usize,
}

impl Thread {
    const INIT: Self = Self {
        save: crate::arch::SavedState::INIT,
        priority: Priority(255),
        blocked: None,
        wake_at: None,
        alive: false,
        id: ThreadId::for_slot_and_serial(0, 0),
        name: FixedString::EMPTY,
        next: 0,
        prev: 0,
    };

    /// Checks if this thread is in a potentially schedulable state.
    pub fn is_runnable(&self) -> bool {
        self.blocked.is_none() && self.wake_at.is_none()
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// Semaphore this thread is currently blocked on, if any.
    pub fn blocked_on(&self) -> Option<SemId> {
        self.blocked
    }

    pub(crate) fn block_on(&mut self, sem: SemId) {
        self.blocked = Some(sem);
    }

    pub(crate) fn clear_block(&mut self) {
        self.blocked = None;
    }

    /// Wake deadline of a sleeping thread, if any.
    pub fn wake_at(&self) -> Option<Ticks> {
        self.wake_at
    }

    /// Returns a reference to the saved machine state for the thread.
    pub fn save(&self) -> &crate::arch::SavedState {
        &self.save
    }

    /// Returns a mutable reference to the saved machine state.
    pub fn save_mut(&mut self) -> &mut crate::arch::SavedState {
        &mut self.save
    }
}

/// Return value for operations that can have scheduling implications. This
/// is marked `must_use` because forgetting to request a context switch
/// after an operation that requires one would be Bad.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[must_use]
pub enum NextThread {
    /// It's fine to keep running the thread we were just running.
    Same,
    /// The caller must pend a context switch; the scheduler will figure
    /// out who runs next.
    Other,
}

/// The thread arena plus the cursor naming the currently running thread.
pub struct ThreadTable {
    slots: [Thread; MAX_THREADS],
    /// Slot of the currently running thread. Points into the ring between
    /// `launch` and halt; before the first `launch_select` it is slot 0 by
    /// convention.
    current: usize,
    /// Number of alive threads, equal to the length of the ring.
    live_count: usize,
    /// Serial number mixed into new `ThreadId`s.
    creations: u16,
}

impl ThreadTable {
    pub const fn new() -> Self {
        Self {
            slots: [Thread::INIT; MAX_THREADS],
            current: 0,
            live_count: 0,
            creations: 0,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn live_count(&self) -> usize {
        self.live_count
    }

    pub fn current_slot(&self) -> usize {
        self.current
    }

    pub fn current(&self) -> &Thread {
        &self.slots[self.current]
    }

    pub fn current_mut(&mut self) -> &mut Thread {
        &mut self.slots[self.current]
    }

    pub fn thread(&self, slot: usize) -> &Thread {
        &self.slots[slot]
    }

    pub fn thread_mut(&mut self, slot: usize) -> &mut Thread {
        &mut self.slots[slot]
    }

    /// Ring successor of `slot`.
    pub(crate) fn next_of(&self, slot: usize) -> usize {
        self.slots[slot].next
    }

    /// Creates a thread in the first dead slot and links it into the ring
    /// between the current thread and its successor.
    ///
    /// The caller still owes the new thread an initial stack frame; see
    /// `api::add_thread`. Names longer than `MAX_NAME_LENGTH` bytes are
    /// truncated.
    pub fn add(&mut self, priority: Priority, name: &str) -> Result<usize, KernError> {
        let slot = self
            .slots
            .iter()
            .position(|t| !t.alive)
            .ok_or(KernError::ThreadsIncorrectlyAlive)?;

        if self.live_count == 0 {
            // First thread: the ring is a self-loop and the cursor starts
            // here.
            self.slots[slot].next = slot;
            self.slots[slot].prev = slot;
            self.current = slot;
        } else {
            let after = self.current;
            let before = self.slots[after].next;
            self.slots[slot].prev = after;
            self.slots[slot].next = before;
            self.slots[before].prev = slot;
            self.slots[after].next = slot;
        }

        let t = &mut self.slots[slot];
        t.priority = priority;
        t.blocked = None;
        t.wake_at = None;
        t.alive = true;
        t.id = ThreadId::for_slot_and_serial(slot, self.creations);
        t.name = FixedString::from_str_truncated(name);
        t.save = crate::arch::SavedState::INIT;
        self.creations = self.creations.wrapping_add(1);
        self.live_count += 1;
        Ok(slot)
    }

    pub fn current_id(&self) -> ThreadId {
        self.slots[self.current].id
    }

    fn find(&self, id: ThreadId) -> Option<usize> {
        self.slots.iter().position(|t| t.alive && t.id == id)
    }

    /// Unlinks and deadens `slot` without any guard checks.
    fn kill_slot(&mut self, slot: usize) {
        let next = self.slots[slot].next;
        let prev = self.slots[slot].prev;
        self.slots[next].prev = prev;
        self.slots[prev].next = next;
        // The dead thread keeps its own links so that it remains a valid
        // scan origin until the next context switch.
        self.slots[slot].alive = false;
        self.live_count -= 1;
    }

    /// Kills the thread named by `id`.
    ///
    /// Returns whether the victim was the current thread, in which case
    /// the caller must pend a context switch.
    pub fn kill(&mut self, id: ThreadId) -> Result<NextThread, KernError> {
        if self.live_count <= 1 {
            return Err(KernError::CannotKillLastThread);
        }
        let slot = self.find(id).ok_or(KernError::ThreadDoesNotExist)?;
        self.kill_slot(slot);
        if slot == self.current {
            Ok(NextThread::Other)
        } else {
            Ok(NextThread::Same)
        }
    }

    /// Kills every alive thread except the current one.
    pub fn kill_all_others(&mut self) {
        for slot in 0..MAX_THREADS {
            if self.slots[slot].alive && slot != self.current {
                self.kill_slot(slot);
            }
        }
    }

    /// Puts the current thread to sleep until `wake_at`.
    pub fn sleep_current(&mut self, wake_at: Ticks) {
        self.slots[self.current].wake_at = Some(wake_at);
    }

    /// Walks `MAX_THREADS` ring nodes starting at the current thread's
    /// successor and wakes every sleeper whose deadline has arrived.
    pub fn wake_sleepers(&mut self, now: Ticks) {
        if self.live_count == 0 {
            return;
        }
        let mut slot = self.next_of(self.current);
        for _ in 0..MAX_THREADS {
            if let Some(deadline) = self.slots[slot].wake_at {
                if deadline <= now {
                    self.slots[slot].wake_at = None;
                }
            }
            slot = self.next_of(slot);
        }
    }

    /// Selects a new thread to run after the current one, and moves the
    /// cursor to it.
    ///
    /// Scans `live_count` ring nodes starting at the cursor's successor
    /// and picks the runnable thread with the most important priority;
    /// ties go to the first candidate in ring order, which yields
    /// round-robin among equals. If nothing is runnable the cursor stays
    /// where it is -- applications are expected to supply an idle thread
    /// so this does not arise.
    pub fn schedule(&mut self) -> usize {
        let mut choice: Option<(usize, Priority)> = None;
        let mut slot = self.next_of(self.current);
        for _ in 0..self.live_count {
            let t = &self.slots[slot];
            if t.is_runnable() {
                match choice {
                    Some((_, prio)) if !t.priority.is_more_important_than(prio) => {}
                    _ => choice = Some((slot, t.priority)),
                }
            }
            slot = self.next_of(slot);
        }
        if let Some((slot, _)) = choice {
            self.current = slot;
        }
        self.current
    }

    /// Picks the first thread to run: the most important alive thread,
    /// ties broken by slot order. Used once, at `launch`.
    pub fn launch_select(&mut self) -> Result<usize, KernError> {
        let mut choice: Option<(usize, Priority)> = None;
        for (slot, t) in self.slots.iter().enumerate() {
            if !t.alive {
                continue;
            }
            match choice {
                Some((_, prio)) if !t.priority.is_more_important_than(prio) => {}
                _ => choice = Some((slot, t.priority)),
            }
        }
        let (slot, _) = choice.ok_or(KernError::NoThreadsScheduled)?;
        self.current = slot;
        Ok(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_with(priorities: &[u8]) -> ThreadTable {
        let mut t = ThreadTable::new();
        for (i, &p) in priorities.iter().enumerate() {
            t.add(Priority(p), &format!("t{i}")).unwrap();
        }
        t
    }

    /// Collects the ring in forward order starting at the cursor.
    fn ring_of(t: &ThreadTable) -> Vec<usize> {
        let mut out = vec![t.current_slot()];
        let mut slot = t.next_of(t.current_slot());
        while slot != t.current_slot() {
            out.push(slot);
            slot = t.next_of(slot);
        }
        out
    }

    #[test]
    fn first_thread_self_loops() {
        let t = table_with(&[1]);
        assert_eq!(t.live_count(), 1);
        assert_eq!(t.next_of(0), 0);
        assert_eq!(ring_of(&t), [0]);
    }

    #[test]
    fn ring_contains_exactly_the_alive_threads() {
        let mut t = table_with(&[1, 1, 1, 1]);
        assert_eq!(ring_of(&t).len(), t.live_count());

        let id = t.thread(2).id();
        assert_eq!(t.kill(id), Ok(NextThread::Same));
        let ring = ring_of(&t);
        assert_eq!(ring.len(), 3);
        assert!(!ring.contains(&2));
        assert!(ring.iter().all(|&s| t.thread(s).is_alive()));
    }

    #[test]
    fn add_inserts_after_cursor() {
        let mut t = table_with(&[1, 1]);
        // Ring after two adds: 0 -> 1 -> 0. A third add goes between the
        // cursor (0) and its successor (1).
        t.add(Priority(1), "late").unwrap();
        assert_eq!(ring_of(&t), [0, 2, 1]);
    }

    #[test]
    fn saturates_at_max_threads() {
        let mut t = ThreadTable::new();
        for i in 0..MAX_THREADS {
            t.add(Priority(1), &format!("t{i}")).unwrap();
        }
        assert_eq!(
            t.add(Priority(1), "extra"),
            Err(KernError::ThreadsIncorrectlyAlive),
        );
        assert_eq!(t.live_count(), MAX_THREADS);
    }

    #[test]
    fn slot_reuse_changes_id() {
        let mut t = table_with(&[1, 1]);
        let old = t.thread(1).id();
        t.kill(old).unwrap();
        t.add(Priority(1), "again").unwrap();
        let new = t.thread(1).id();
        assert_eq!(new.index(), 1);
        assert_ne!(old, new);
        assert_eq!(t.kill(old), Err(KernError::ThreadDoesNotExist));
    }

    #[test]
    fn long_names_are_truncated() {
        let mut t = ThreadTable::new();
        let slot = t.add(Priority(0), "measurement-thread").unwrap();
        assert_eq!(t.thread(slot).name(), "measuremen");
    }

    #[test]
    fn round_robin_among_equal_priorities() {
        let mut t = table_with(&[3, 3, 3]);
        // Cursor starts at 0; ring order is 0 -> 2 -> 1.
        assert_eq!(t.schedule(), 2);
        assert_eq!(t.schedule(), 1);
        assert_eq!(t.schedule(), 0);
        assert_eq!(t.schedule(), 2);
    }

    #[test]
    fn lowest_priority_number_wins() {
        let mut t = table_with(&[5, 0, 3]);
        assert_eq!(t.schedule(), 1);
        // And it keeps winning while runnable.
        assert_eq!(t.schedule(), 1);
    }

    #[test]
    fn scheduler_skips_sleepers_until_deadline() {
        let mut t = table_with(&[0, 5]);
        // Slot 0 is current and highest priority; put it to sleep.
        t.sleep_current(Ticks::from(10));
        assert_eq!(t.schedule(), 1);

        // Deadline not reached: still asleep.
        t.wake_sleepers(Ticks::from(9));
        assert_eq!(t.schedule(), 1);

        t.wake_sleepers(Ticks::from(10));
        assert_eq!(t.schedule(), 0);
        assert!(t.thread(0).wake_at().is_none());
    }

    #[test]
    fn scheduler_skips_blocked_threads() {
        let mut t = table_with(&[0, 5]);
        let sem = SemId::new(0).unwrap();
        t.current_mut().block_on(sem);
        assert_eq!(t.schedule(), 1);
        t.thread_mut(0).clear_block();
        assert_eq!(t.schedule(), 0);
    }

    #[test]
    fn scheduler_keeps_cursor_when_nothing_runnable() {
        let mut t = table_with(&[1, 1]);
        t.sleep_current(Ticks::from(100));
        t.thread_mut(1).block_on(SemId::new(0).unwrap());
        assert_eq!(t.schedule(), 0);
    }

    #[test]
    fn cannot_kill_into_empty_ring() {
        let mut t = table_with(&[1]);
        let id = t.current_id();
        assert_eq!(t.kill(id), Err(KernError::CannotKillLastThread));
        assert!(t.current().is_alive());
    }

    #[test]
    fn killing_current_requests_switch_and_keeps_scan_origin() {
        let mut t = table_with(&[1, 1, 1]);
        let id = t.current_id();
        assert_eq!(t.kill(id), Ok(NextThread::Other));
        assert!(!t.thread(0).is_alive());
        // The dead cursor's own links survive, so scheduling still works.
        let next = t.schedule();
        assert!(t.thread(next).is_alive());
        assert_eq!(t.live_count(), 2);
    }

    #[test]
    fn kill_all_others_leaves_only_the_caller() {
        let mut t = table_with(&[1, 2, 3, 4]);
        t.kill_all_others();
        assert_eq!(t.live_count(), 1);
        assert_eq!(ring_of(&t), [t.current_slot()]);
        assert!(t.current().is_alive());
    }

    #[test]
    fn launch_select_picks_most_important_thread() {
        let mut t = table_with(&[9, 2, 7]);
        assert_eq!(t.launch_select(), Ok(1));
        assert_eq!(t.current_slot(), 1);
    }

    #[test]
    fn launch_select_fails_on_empty_table() {
        let mut t = ThreadTable::new();
        assert_eq!(t.launch_select(), Err(KernError::NoThreadsScheduled));
    }

    #[test]
    fn wake_scan_covers_ring_from_any_cursor() {
        let mut t = table_with(&[1, 1, 1]);
        // Sleep a non-current thread directly.
        t.thread_mut(1).wake_at = Some(Ticks::from(5));
        t.wake_sleepers(Ticks::from(5));
        assert!(t.thread(1).wake_at().is_none());
    }

    #[test]
    fn two_thread_yield_sequence_is_fair() {
        // Mirror of the classic two-writer scenario: with equal
        // priorities, alternating yields alternate the cursor.
        let mut t = table_with(&[1, 1]);
        let mut order = vec![t.current_slot()];
        for _ in 0..3 {
            order.push(t.schedule());
        }
        assert_eq!(order, [0, 1, 0, 1]);
    }
}
