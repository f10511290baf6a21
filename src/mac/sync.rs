//! Beacon synchronisation state
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

use crate::timer::{Ticks, HALF_RANGE, elapsed, at_or_after};

/// Offset from the origin beyond which the origin is advanced
const ROLLOVER_THRESHOLD: Ticks = HALF_RANGE / 2;

/// Shared period reference
///
/// `origin` is a fine (us) clock reading, `last_sync_ms` a coarse one.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimeBase {
    pub origin: Ticks,
    pub synchronized: bool,
    pub last_sync_ms: Ticks,
}

impl TimeBase {
    /// Unsynchronised time base, periods are aligned to the free-running clock
    pub fn provisional() -> Self {
        Self {
            origin: 0,
            synchronized: false,
            last_sync_ms: 0,
        }
    }

    /// Anchor the period origin to a beacon time
    pub fn anchor(&mut self, origin_us: Ticks, now_ms: Ticks) {
        self.origin = origin_us;
        self.last_sync_ms = now_ms;
        self.synchronized = true;
    }

    /// Check for sync expiry, returns true when sync was lost by this call
    ///
    /// The last origin is kept as the best available reference.
    pub fn expire(&mut self, now_ms: Ticks, timeout_ms: Ticks) -> bool {
        if !self.synchronized || elapsed(now_ms, self.last_sync_ms) < timeout_ms {
            return false;
        }

        self.synchronized = false;

        true
    }

    /// Advance the origin by whole periods once `now` drifts far from it,
    /// keeping offsets well inside the counter range
    pub fn rollover(&mut self, now: Ticks, period_length: Ticks) {
        let since = elapsed(now, self.origin);
        if since < ROLLOVER_THRESHOLD {
            return;
        }

        self.origin = self.origin.wrapping_add(since - since % period_length);
    }
}

/// Coordinator beacon cadence, all times in ms
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BeaconState {
    /// Intended time of the last emission
    pub last_beacon: Option<Ticks>,
    /// Intended time of the next emission
    pub next_beacon: Ticks,
    pub interval: Ticks,
    pub initial_delay: Ticks,
}

impl BeaconState {
    pub fn new(interval: Ticks, initial_delay: Ticks) -> Self {
        Self {
            last_beacon: None,
            next_beacon: 0,
            interval,
            initial_delay,
        }
    }

    /// Schedule the first beacon, returning the delay to arm
    pub fn start(&mut self, now_ms: Ticks) -> Ticks {
        self.last_beacon = None;
        self.next_beacon = now_ms.wrapping_add(self.initial_delay);

        self.initial_delay
    }

    /// Record an emission at `now_ms` and compute the next intended time
    ///
    /// The cadence follows intended rather than actual firing times.
    /// Returns the delay to the next beacon and the number of whole
    /// intervals skipped due to a late firing.
    pub fn advance(&mut self, now_ms: Ticks) -> (Ticks, u32) {
        let mut intended = self.next_beacon;
        let mut missed = 0;

        if at_or_after(now_ms, intended) {
            missed = elapsed(now_ms, intended) / self.interval;
            intended = intended.wrapping_add(missed.wrapping_mul(self.interval));
        }

        self.last_beacon = Some(intended);
        self.next_beacon = intended.wrapping_add(self.interval);

        (elapsed(self.next_beacon, now_ms), missed)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn anchor_and_expire() {
        let mut t = TimeBase::provisional();
        assert!(!t.synchronized);
        assert!(!t.expire(100_000, 30_000));

        t.anchor(5_000_000, 5_000);
        assert_eq!(t.origin, 5_000_000);
        assert!(t.synchronized);

        assert!(!t.expire(34_999, 30_000));
        assert!(t.expire(35_000, 30_000));

        // Origin retained, only reported once
        assert_eq!(t.origin, 5_000_000);
        assert!(!t.synchronized);
        assert!(!t.expire(40_000, 30_000));
    }

    #[test]
    fn rollover_keeps_phase() {
        let mut t = TimeBase::provisional();
        t.anchor(1_000, 0);

        t.rollover(500_000_000, 300_000);
        assert_eq!(t.origin, 1_000);

        // Whole periods only, phase unchanged
        let now = 1_000 + ROLLOVER_THRESHOLD + 123;
        t.rollover(now, 300_000);
        assert_eq!(elapsed(t.origin, 1_000) % 300_000, 0);
        assert!(elapsed(now, t.origin) < 300_000);
        assert!(t.synchronized);
    }

    #[test]
    fn beacon_cadence_uses_intended_times() {
        let mut b = BeaconState::new(1000, 500);

        assert_eq!(b.start(100), 500);
        assert_eq!(b.next_beacon, 600);

        // Late by 30ms, next beacon still at 1600
        assert_eq!(b.advance(630), (970, 0));
        assert_eq!(b.last_beacon, Some(600));
        assert_eq!(b.next_beacon, 1600);

        // Early firing keeps the cadence
        assert_eq!(b.advance(1590), (1010, 0));
        assert_eq!(b.next_beacon, 2600);
    }

    #[test]
    fn beacon_skips_missed_intervals() {
        let mut b = BeaconState::new(1000, 0);
        b.start(0);

        // Fired 2.5 intervals late
        assert_eq!(b.advance(2500), (500, 2));
        assert_eq!(b.last_beacon, Some(2000));
        assert_eq!(b.next_beacon, 3000);
    }

    #[test]
    fn beacon_cadence_wraps() {
        let mut b = BeaconState::new(1000, 0);
        b.start(Ticks::MAX - 499);

        assert_eq!(b.advance(Ticks::MAX - 489), (990, 0));
        assert_eq!(b.next_beacon, 500);
    }
}
