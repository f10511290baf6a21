//! Slot window computation
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

use crate::timer::{Ticks, elapsed};

use super::config::PeriodConfig;

/// Position of `now` relative to the owned slot
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SlotDecision {
    /// Inside the usable slot window, transmit now
    Inside,
    /// Before the slot in the current period
    Early,
    /// Past the usable window, rolled over by `periods` whole periods
    Late{ periods: u32 },
}

/// Result of a slot computation
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Schedule {
    pub decision: SlotDecision,
    /// Start of the slot considered (clock reading, wraps)
    pub slot_start: Ticks,
    /// Delay from `now` to `slot_start`, zero when inside
    pub delay: Ticks,
}

impl Schedule {
    pub fn is_inside(&self) -> bool {
        self.decision == SlotDecision::Inside
    }
}

/// Compute the owned slot window for `now` against the period `origin`
///
/// `period` must be valid and `slot_index < period.slot_count`.
/// Offsets are taken relative to `origin` so readings straddling the
/// counter wrap behave like any other pair of readings.
pub fn schedule(now: Ticks, origin: Ticks, slot_index: u16, period: &PeriodConfig) -> Schedule {
    let since_origin = elapsed(now, origin) as u64;
    let period_length = period.period_length as u64;

    let period_offset = (since_origin / period_length) * period_length;
    let slot_offset = slot_index as u64 * period.slot_length as u64;
    let usable = period.usable() as u64;

    // Slot start relative to origin, u64 so the rollover cannot overflow
    let mut start = period_offset + slot_offset;

    let decision = if since_origin < start {
        SlotDecision::Early

    } else if since_origin < start + usable {
        SlotDecision::Inside

    } else {
        let max_periods = (since_origin - start + period_length - 1) / period_length + 1;
        let mut periods = 0;

        while since_origin >= start + usable && periods < max_periods {
            start += period_length;
            periods += 1;
        }

        SlotDecision::Late{ periods: periods as u32 }
    };

    let delay = match decision {
        SlotDecision::Inside => 0,
        _ => (start - since_origin) as Ticks,
    };

    Schedule {
        decision,
        slot_start: origin.wrapping_add(start as Ticks),
        delay,
    }
}

/// Delay from `now` to the owned slot start in the following period
///
/// Used to re-arm after a dispatch attempt so the slot timer keeps
/// ticking once per period.
pub fn next_period(now: Ticks, origin: Ticks, slot_index: u16, period: &PeriodConfig) -> Ticks {
    let s = schedule(now, origin, slot_index, period);

    match s.decision {
        SlotDecision::Inside => {
            let offset = elapsed(now, s.slot_start);
            period.period_length - offset
        },
        _ => s.delay,
    }
}
