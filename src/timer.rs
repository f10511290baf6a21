//! LPWAN Timer API
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

use core::fmt::Debug;

/// Clock readings are free-running 32-bit counters that wrap at `2^32`
pub type Ticks = u32;

/// Half the counter range, readings closer than this are ordered
pub const HALF_RANGE: Ticks = 1 << 31;

/// Timer trait provides mechanisms for accessing monotonic times
/// to assist with procotol implementations.
///
/// All methods are monotonic and relative to the same unknown epoc,
/// and wrap on overflow.
pub trait Timer {
    /// Returns the number of millisecond ticks since some unknown epoc
    fn ticks_ms(&self) -> Ticks;

    /// Returns the number of microsecond ticks since some unknown epoc
    fn ticks_us(&self) -> Ticks;
}

/// Ticks elapsed from `since` to `now`, modulo the counter width
pub fn elapsed(now: Ticks, since: Ticks) -> Ticks {
    now.wrapping_sub(since)
}

/// Check whether reading `a` is at or after reading `b`
pub fn at_or_after(a: Ticks, b: Ticks) -> bool {
    a.wrapping_sub(b) < HALF_RANGE
}

/// Timer classes, each owns at most one armed callback
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerClass {
    /// Slot boundary timer, delays in microsecond ticks
    Slot,
    /// Beacon cadence timer, delays in millisecond ticks
    Beacon,
}

/// Errors from the underlying timer facility
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerError {
    /// No timer resources available
    Exhausted,
    /// Requested delay cannot be represented
    OutOfRange,
}

/// Alarm trait provides one-shot callbacks scheduled by the host.
///
/// When an armed alarm expires the host calls back into the MAC
/// with the matching [`TimerClass`].
pub trait Alarm {
    /// Opaque handle to an armed callback
    type Handle: Debug;

    /// Arm a callback of `class` to fire `delay` ticks from now
    fn arm(&mut self, class: TimerClass, delay: Ticks) -> Result<Self::Handle, TimerError>;

    /// Cancel a previously armed callback
    fn cancel(&mut self, handle: Self::Handle);
}

#[cfg(any(test, feature="mocks"))]
pub mod mock {
    use std::sync::{Arc, Mutex};
    use std::vec::Vec;

    use super::*;

    /// Mock timer implementation to assist with testing
    ///
    /// Stores microseconds internally, readings wrap like a hardware counter
    #[derive(Clone, Debug)]
    pub struct MockTimer (Arc<Mutex<u64>>);

    impl MockTimer {
        pub fn new() -> Self {
            Self(Arc::new(Mutex::new(0)))
        }

        pub fn set_ms(&mut self, val: u32) {
            *self.0.lock().unwrap() = val as u64 * 1000;
        }

        pub fn set_us(&mut self, val: u64) {
            *self.0.lock().unwrap() = val;
        }

        pub fn inc_us(&mut self, val: u64) {
            let mut v  = self.0.lock().unwrap();
            *v += val;
        }

        pub fn inc(&mut self) {
            self.inc_us(1000);
        }

        pub fn val(&self) -> u32 {
            (*self.0.lock().unwrap() / 1000) as u32
        }
    }

    impl Timer for MockTimer {
        fn ticks_ms(&self) -> Ticks {
            let v = self.0.lock().unwrap();
            (*v / 1000) as Ticks
        }

        fn ticks_us(&self) -> Ticks {
            let v = self.0.lock().unwrap();
            *v as Ticks
        }
    }

    #[derive(Debug, Default)]
    struct AlarmInner {
        next_handle: u32,
        armed: Vec<(u32, TimerClass, Ticks)>,
        cancelled: u32,
        fail: bool,
    }

    /// Mock alarm recording armed callbacks
    #[derive(Clone, Debug)]
    pub struct MockAlarm (Arc<Mutex<AlarmInner>>);

    impl MockAlarm {
        pub fn new() -> Self {
            Self(Arc::new(Mutex::new(AlarmInner::default())))
        }

        /// Delay of the live callback for a timer class
        pub fn armed(&self, class: TimerClass) -> Option<Ticks> {
            let i = self.0.lock().unwrap();
            i.armed.iter().find(|(_, c, _)| *c == class).map(|(_, _, d)| *d)
        }

        /// Number of live callbacks
        pub fn live(&self) -> usize {
            self.0.lock().unwrap().armed.len()
        }

        /// Number of cancelled callbacks
        pub fn cancelled(&self) -> u32 {
            self.0.lock().unwrap().cancelled
        }

        /// Remove a callback as the host does when firing it
        pub fn fire(&mut self, class: TimerClass) -> Option<Ticks> {
            let mut i = self.0.lock().unwrap();
            let idx = i.armed.iter().position(|(_, c, _)| *c == class)?;
            Some(i.armed.remove(idx).2)
        }

        /// Force subsequent arm requests to fail
        pub fn set_fail(&mut self, fail: bool) {
            self.0.lock().unwrap().fail = fail;
        }
    }

    impl Alarm for MockAlarm {
        type Handle = u32;

        fn arm(&mut self, class: TimerClass, delay: Ticks) -> Result<Self::Handle, TimerError> {
            let mut i = self.0.lock().unwrap();
            if i.fail {
                return Err(TimerError::Exhausted);
            }

            let h = i.next_handle;
            i.next_handle += 1;
            i.armed.push((h, class, delay));

            Ok(h)
        }

        fn cancel(&mut self, handle: Self::Handle) {
            let mut i = self.0.lock().unwrap();
            if let Some(idx) = i.armed.iter().position(|(h, _, _)| *h == handle) {
                i.armed.remove(idx);
                i.cancelled += 1;
            }
        }
    }
}
