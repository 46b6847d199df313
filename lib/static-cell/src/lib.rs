// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A `RefCell`-style container that can live in a `static` for cases where
//! only a single borrow needs to happen at any given time.
//!
//! The kernel keeps all of its mutable state in one of these. Because
//! kernel code only touches that state with interrupts masked, a second
//! live borrow indicates a reentrancy bug, and this cell turns it into a
//! panic instead of aliasing.
//!
//! This only provides `mut` access because that's what we've needed so
//! far. It does _not_ provide the many-reader one-writer behavior of
//! `RefCell`, only the one-writer part.

#![no_std]

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, Ordering};

#[derive(Default)]
pub struct StaticCell<T> {
    borrowed: AtomicBool,
    cell: UnsafeCell<T>,
}

impl<T> StaticCell<T> {
    /// Creates a `StaticCell` containing `contents`.
    pub const fn new(contents: T) -> Self {
        Self {
            borrowed: AtomicBool::new(false),
            cell: UnsafeCell::new(contents),
        }
    }

    /// Gets mutable access to the contents of `self`.
    ///
    /// If a `StaticRef` for `self` still exists anywhere in the program,
    /// this will panic.
    pub fn borrow_mut(&self) -> StaticRef<'_, T> {
        let already_borrowed = self.borrowed.swap(true, Ordering::Acquire);
        if already_borrowed {
            panic!();
        }
        // Safety: the check above ensures that we are not producing an
        // aliasing &mut to our contents.
        unsafe {
            StaticRef {
                contents: &mut *self.cell.get(),
                borrow: &self.borrowed,
            }
        }
    }
}

unsafe impl<T> Sync for StaticCell<T> where for<'a> &'a mut T: Send {}

pub struct StaticRef<'a, T> {
    contents: &'a mut T,
    borrow: &'a AtomicBool,
}

impl<'a, T> Drop for StaticRef<'a, T> {
    fn drop(&mut self) {
        self.borrow.store(false, Ordering::Release);
    }
}

impl<'a, T> core::ops::Deref for StaticRef<'a, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &*self.contents
    }
}

impl<'a, T> core::ops::DerefMut for StaticRef<'a, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.contents
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn borrow_sees_and_keeps_changes() {
        let cell = StaticCell::new(1u32);
        *cell.borrow_mut() += 1;
        assert_eq!(*cell.borrow_mut(), 2);
    }

    #[test]
    #[should_panic]
    fn reborrow_panics() {
        let cell = StaticCell::new(0u32);
        let _first = cell.borrow_mut();
        let _second = cell.borrow_mut();
    }
}
