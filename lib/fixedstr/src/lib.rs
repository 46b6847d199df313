// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A minimalist fixed-size string type.
//!
//! The kernel labels threads with short human-readable names, and labels
//! need somewhere to live in a world without an allocator. `FixedString` is
//! an owned, array-backed string: always exactly `MAX + 4` bytes in size,
//! holding up to `MAX` bytes of UTF-8 plus a length field.
//!
//! Unlike the `heapless` string type this is intended for strings that are
//! written once and then only read; there is no push/insert API, just
//! construction from a `&str` (with either rejection or truncation of
//! over-long input).

#![no_std]

use core::ops::Deref;

/// An owned string with a fixed maximum size.
///
/// Copying or cloning a `FixedString` performs a bytewise copy of the
/// buffer and length field.
#[derive(Copy, Clone)]
pub struct FixedString<const MAX: usize> {
    buf: [u8; MAX],
    len: usize,
}

/// Error produced when a source string does not fit.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct StringTooLong;

impl<const MAX: usize> FixedString<MAX> {
    /// The empty string, usable as an array/static initializer.
    pub const EMPTY: Self = Self {
        buf: [0; MAX],
        len: 0,
    };

    /// Builds a `FixedString` from `s`, failing if `s` is longer than
    /// `MAX` bytes.
    pub const fn try_from_str(s: &str) -> Result<Self, StringTooLong> {
        let bytes = s.as_bytes();
        let len = bytes.len();
        if len > MAX {
            return Err(StringTooLong);
        }

        let mut buf = [0; MAX];
        // do this instead of `copy_from_slice` so we can be a const fn :/
        let mut idx = 0;
        while idx < len {
            buf[idx] = bytes[idx];
            idx += 1;
        }
        Ok(Self { buf, len })
    }

    /// Builds a `FixedString` from `s`, keeping only the first `MAX` bytes
    /// if `s` is longer.
    ///
    /// Truncation happens on a character boundary, so the result is always
    /// valid UTF-8 (possibly shorter than `MAX` bytes).
    pub fn from_str_truncated(s: &str) -> Self {
        let mut end = s.len().min(MAX);
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        match Self::try_from_str(&s[..end]) {
            Ok(s) => s,
            // The slice above is at most MAX bytes by construction.
            Err(StringTooLong) => Self::EMPTY,
        }
    }

    pub fn as_str(&self) -> &str {
        unsafe {
            // Safety: we know the buffer up to `self.len` contains valid
            // UTF-8 because we only allow this type to be constructed from
            // a `&str`.
            core::str::from_utf8_unchecked(self.as_bytes())
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub const fn len(&self) -> usize {
        self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<const MAX: usize> Default for FixedString<MAX> {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl<const MAX: usize> Deref for FixedString<MAX> {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.as_str()
    }
}

impl<const MAX: usize> AsRef<str> for FixedString<MAX> {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl<const MAX: usize, T> PartialEq<T> for FixedString<MAX>
where
    T: AsRef<str>,
{
    fn eq(&self, other: &T) -> bool {
        self.as_str() == other.as_ref()
    }
}

impl<const MAX: usize> Eq for FixedString<MAX> {}

impl<const MAX: usize> core::fmt::Display for FixedString<MAX> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(self.as_str(), f)
    }
}

impl<const MAX: usize> core::fmt::Debug for FixedString<MAX> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Debug::fmt(self.as_str(), f)
    }
}
