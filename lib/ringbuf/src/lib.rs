// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Ring buffer for debugging kernel and driver tasks.
//!
//! This contains an implementation of a static ring buffer designed to be
//! used to instrument arbitrary contexts: the interrupt dispatcher, the
//! scheduler, the SPI/block-device/SLIP drivers. Entries accumulate without
//! an allocator and can be inspected post-mortem with a debugger attached to
//! the named static.
//!
//! ## Constraints
//!
//! The type in the ring buffer must implement [`Copy`]. For
//! [de-duplication](#entry-de-duplication), it must also implement
//! [`PartialEq`].
//!
//! If you use the variant of the [`ringbuf!`] macro that leaves the name of
//! the data structure implicit, you can only have one per module.
//!
//! ## Creating a ring buffer
//!
//! ```
//! ringbuf!(u32, 16, 0);
//! ```
//!
//! Ring buffer entries are generated with [`ringbuf_entry!`]:
//!
//! ```
//! ringbuf_entry!(pending_bits);
//! ```
//!
//! A name can be supplied to distinguish between multiple ring buffers in
//! one module:
//!
//! ```
//! ringbuf!(MY_RINGBUF, u32, 16, 0);
//! ringbuf_entry!(MY_RINGBUF, pending_bits);
//! ```
//!
//! ### Entry de-duplication
//!
//! When the same value is recorded in a ring buffer multiple times in a row,
//! subsequent entries are recorded by incrementing a counter stored in the
//! initial entry rather than by adding new entries. This prevents a noisy
//! caller (e.g. a spinning retry loop) from evicting older history. Disable
//! it with the trailing `no_dedup` argument if the entry type doesn't
//! implement [`PartialEq`] or dedup isn't useful:
//!
//! ```
//! ringbuf!(u32, 16, 0, no_dedup);
//! ```
#![cfg_attr(not(test), no_std)]

use core::cell::RefCell;
use critical_section::Mutex;

#[cfg(feature = "disabled")]
#[macro_export]
macro_rules! ringbuf {
    ($name:ident, $t:ty, $n:expr, $init:expr $(, no_dedup)?) => {
        #[allow(dead_code)]
        const _: $t = $init;
    };
    ($t:ty, $n:expr, $init:expr $(, no_dedup)?) => {
        $crate::ringbuf!(__RINGBUF, $t, $n, $init);
    };
}

/// Declares a ring buffer in the current module or context.
///
/// `ringbuf!(NAME, Type, N, expr)` makes a ring buffer named `NAME`,
/// containing entries of type `Type`, with room for `N` such entries, all
/// initialized to `expr`. `NAME` should be uppercase and, by convention, end
/// in `RINGBUF`.
///
/// The resulting static has type
/// `critical_section::Mutex<RefCell<Ringbuf<Type, N>>>`.
#[cfg(not(feature = "disabled"))]
#[macro_export]
macro_rules! ringbuf {
    ($name:ident, $t:ty, $n:expr, $init:expr) => {
        static $name: $crate::RingbufCell<$t, u16, { $n }> =
            $crate::RingbufCell::new($crate::Ringbuf {
                last: None,
                buffer: [$crate::RingbufEntry {
                    line: 0,
                    generation: 0,
                    count: 0,
                    payload: $init,
                }; $n],
            });
    };
    ($name:ident, $t:ty, $n:expr, $init:expr, no_dedup) => {
        static $name: $crate::RingbufCell<$t, (), { $n }> =
            $crate::RingbufCell::new($crate::Ringbuf {
                last: None,
                buffer: [$crate::RingbufEntry {
                    line: 0,
                    generation: 0,
                    count: (),
                    payload: $init,
                }; $n],
            });
    };
    ($t:ty, $n:expr, $init:expr, no_dedup) => {
        $crate::ringbuf!(__RINGBUF, $t, $n, $init, no_dedup);
    };
    ($t:ty, $n:expr, $init:expr) => {
        $crate::ringbuf!(__RINGBUF, $t, $n, $init);
    };
}

/// Inserts data into a named ring buffer (declared with [`ringbuf!`]).
#[macro_export]
macro_rules! ringbuf_entry {
    ($buf:expr, $payload:expr) => {{
        let (p, buf) = ($payload, &$buf);
        $crate::RecordEntry::record_entry(buf, line!() as u16, p);
    }};
    ($payload:expr) => {
        $crate::ringbuf_entry!(__RINGBUF, $payload);
    };
}

/// A single ring buffer entry, carrying a payload of arbitrary type. When an
/// entry is recorded with an identical `line` and `payload` to the most
/// recent entry, `count` is incremented rather than a new entry allocated.
#[derive(Debug, Copy, Clone)]
pub struct RingbufEntry<T: Copy, C> {
    pub line: u16,
    pub generation: u16,
    pub payload: T,
    pub count: C,
}

/// A ring buffer of parametrized type and size. Instantiating this directly
/// is unusual; see the [`ringbuf!`] macro.
#[derive(Debug)]
pub struct Ringbuf<T: Copy, C, const N: usize> {
    pub last: Option<usize>,
    pub buffer: [RingbufEntry<T, C>; N],
}

impl<T: Copy, C, const N: usize> Ringbuf<T, C, N> {
    fn do_record(&mut self, last: usize, line: u16, count: C, payload: T) {
        let ndx = {
            let last_plus_1 = last.wrapping_add(1);
            if last_plus_1 >= self.buffer.len() {
                0
            } else {
                last_plus_1
            }
        };
        // SAFETY: ndx was just checked against buffer.len() above.
        let ent = unsafe { self.buffer.get_unchecked_mut(ndx) };
        *ent = RingbufEntry {
            line,
            payload,
            count,
            generation: ent.generation.wrapping_add(1),
        };
        self.last = Some(ndx);
    }
}

/// The static cell a `ringbuf!` invocation declares: an interior-mutable
/// [`Ringbuf`] guarded by a critical section rather than an allocator-backed
/// cell, since nothing here ever runs with an allocator on the fault path.
pub struct RingbufCell<T: Copy, C, const N: usize>(Mutex<RefCell<Ringbuf<T, C, N>>>);

impl<T: Copy, C, const N: usize> RingbufCell<T, C, N> {
    pub const fn new(initial: Ringbuf<T, C, N>) -> Self {
        RingbufCell(Mutex::new(RefCell::new(initial)))
    }
}

/// An abstraction over types in which ring buffer entries can be recorded,
/// letting [`ringbuf_entry!`] dispatch without knowing the concrete counter
/// type (`u16` with dedup, `()` without).
pub trait RecordEntry<T: Copy> {
    fn record_entry(&self, line: u16, payload: T);
}

impl<T: Copy + PartialEq, const N: usize> RecordEntry<T> for RingbufCell<T, u16, N> {
    fn record_entry(&self, line: u16, payload: T) {
        critical_section::with(|cs| {
            let mut ring = self.0.borrow(cs).borrow_mut();
            let last = ring.last.unwrap_or(usize::MAX);
            if let Some(ent) = ring.buffer.get_mut(last) {
                if ent.line == line && ent.payload == payload {
                    if let Some(new_count) = ent.count.checked_add(1) {
                        ent.count = new_count;
                        return;
                    }
                }
            }
            ring.do_record(last, line, 1, payload);
        });
    }
}

impl<T: Copy, const N: usize> RecordEntry<T> for RingbufCell<T, (), N> {
    fn record_entry(&self, line: u16, payload: T) {
        critical_section::with(|cs| {
            let mut ring = self.0.borrow(cs).borrow_mut();
            let last = ring.last.unwrap_or(usize::MAX);
            ring.do_record(last, line, (), payload);
        });
    }
}

#[cfg(test)]
mod tests {
    ringbuf!(TEST_RINGBUF, u32, 4, 0);

    #[test]
    fn dedup_increments_count_instead_of_evicting() {
        ringbuf_entry!(TEST_RINGBUF, 7);
        ringbuf_entry!(TEST_RINGBUF, 7);
        critical_section::with(|cs| {
            let ring = TEST_RINGBUF.0.borrow(cs).borrow();
            let last = ring.buffer[ring.last.unwrap()];
            assert_eq!(last.payload, 7);
            assert_eq!(last.count, 2);
        });
    }

    #[test]
    fn distinct_payloads_get_distinct_slots() {
        ringbuf_entry!(TEST_RINGBUF, 1);
        ringbuf_entry!(TEST_RINGBUF, 2);
        critical_section::with(|cs| {
            let ring = TEST_RINGBUF.0.borrow(cs).borrow();
            let idx = ring.last.unwrap();
            let prev = (idx + ring.buffer.len() - 1) % ring.buffer.len();
            assert_eq!(ring.buffer[idx].payload, 2);
            assert_eq!(ring.buffer[prev].payload, 1);
            assert_eq!(ring.buffer[idx].count, 1);
        });
    }
}
