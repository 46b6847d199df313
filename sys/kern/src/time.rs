// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Implementation of kernel time.

/// In-kernel timestamp representation.
///
/// This is measured in ticks since `launch`. The counter is 32 bits wide
/// and wraps after about 49.7 days at 1 kHz. Deadline comparisons are plain
/// 32-bit comparisons and are *not* wrap-corrected; a sleep or periodic
/// deadline that straddles the wrap will misfire. This is a known
/// limitation inherited from the sizing of the counter.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Default)]
#[repr(transparent)]
pub struct Ticks(u32);

impl Ticks {
    pub const ZERO: Self = Ticks(0);

    /// Advances this timestamp by one tick.
    pub fn increment(&mut self) {
        self.0 = self.0.wrapping_add(1);
    }

    /// Returns the timestamp `d` ticks after `self`, wrapping silently.
    pub fn offset(self, d: u32) -> Self {
        Ticks(self.0.wrapping_add(d))
    }
}

impl From<u32> for Ticks {
    fn from(v: u32) -> Self {
        Ticks(v)
    }
}

impl From<Ticks> for u32 {
    fn from(v: Ticks) -> Self {
        v.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increments_by_exactly_one() {
        let mut t = Ticks::ZERO;
        t.increment();
        assert_eq!(u32::from(t), 1);
    }

    #[test]
    fn offset_is_wrapping() {
        let t = Ticks::from(u32::MAX);
        assert_eq!(u32::from(t.offset(2)), 1);
    }

    #[test]
    fn deadline_comparison_is_plain_32_bit() {
        // Documents the non-wrap-corrected comparison: a deadline computed
        // across the wrap compares *before* now.
        let now = Ticks::from(u32::MAX);
        let deadline = now.offset(10);
        assert!(deadline <= now);
    }
}
