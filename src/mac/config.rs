//! TDMA MAC configuration
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

use ieee802154::mac::ShortAddress;
use strum::{Display, EnumString};

use crate::timer::{Ticks, HALF_RANGE};

/// Node role, fixed at construction
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum NodeRole {
    /// Emits beacons and owns the shared time reference
    Coordinator,
    /// Follows beacons sent by the provided coordinator address
    Member(ShortAddress),
    /// No time reference is exchanged, the local clock is the origin
    Beaconless,
}

/// Medium access mode
#[derive(Copy, Clone, Debug, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "lowercase")]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    /// Strict TDMA, only transmit in the owned slot
    Tdma,
    /// Hybrid TDMA, steal idle slots using backoff and carrier sense
    Zmac,
}

/// Period layout, all values in microsecond ticks
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PeriodConfig {
    /// Number of slots in each period
    pub slot_count: u16,
    /// Length of each slot
    pub slot_length: Ticks,
    /// Unusable tail of each slot, absorbs clock drift between nodes
    pub guard_period: Ticks,
    /// Length of the full period, may exceed `slot_count * slot_length`
    pub period_length: Ticks,
}

/// Configuration validation errors
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// At least one slot is required
    NoSlots,
    /// Slots must be at least one tick long
    SlotLength,
    /// Guard period must be shorter than the slot
    GuardPeriod,
    /// Slots do not fit within the period
    SlotsExceedPeriod,
    /// Period must be shorter than half the clock range
    PeriodRange,
    /// Beacon interval must be non-zero when beacons are in use
    BeaconInterval,
    /// Backoff window must be non-zero for ZMAC
    Backoff,
}

impl PeriodConfig {
    /// Evenly divide a period into `slot_count` slots with the provided guard
    pub fn even(slot_count: u16, period_length: Ticks, guard_period: Ticks) -> Self {
        let slot_length = match slot_count {
            0 => 0,
            n => period_length / n as Ticks,
        };

        Self { slot_count, slot_length, guard_period, period_length }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.slot_count == 0 {
            return Err(ConfigError::NoSlots);
        }
        if self.slot_length == 0 {
            return Err(ConfigError::SlotLength);
        }
        if self.guard_period >= self.slot_length {
            return Err(ConfigError::GuardPeriod);
        }

        match (self.slot_count as Ticks).checked_mul(self.slot_length) {
            Some(v) if v <= self.period_length => (),
            _ => return Err(ConfigError::SlotsExceedPeriod),
        }

        if self.period_length >= HALF_RANGE {
            return Err(ConfigError::PeriodRange);
        }

        Ok(())
    }

    /// Usable portion of a slot
    pub fn usable(&self) -> Ticks {
        self.slot_length - self.guard_period
    }

    /// Slot owned by the provided address
    pub fn slot_index(&self, address: ShortAddress) -> u16 {
        address.0 % self.slot_count
    }
}

impl Default for PeriodConfig {
    fn default() -> Self {
        // 6 slots of ~166ms in a 1s period, 10% guard
        Self::even(6, 1_000_000, 16_666)
    }
}

/// Configuration for the TDMA MAC
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub role: NodeRole,

    pub mode: Mode,

    /// Slot layout
    pub period: PeriodConfig,

    /// Beacon interval in ms
    pub beacon_interval: Ticks,

    /// Delay from init to the first coordinator beacon in ms
    pub initial_beacon_delay: Ticks,

    /// Upper bound (exclusive) on ZMAC backoff in us
    pub backoff_max: Ticks,

    /// Number of periods a frame may wait before expiry
    pub max_deferrals: u16,

    /// Number of missed beacons before desync
    pub max_beacon_misses: u32,

    /// Deadline for timer servicing in us (maximum allowed schedule slip)
    pub mac_deadline: Ticks,
}

impl Default for Config {
    fn default() -> Self {
        let period = PeriodConfig::default();

        Self {
            role: NodeRole::Member(ShortAddress(1)),
            mode: Mode::Tdma,
            backoff_max: period.slot_length / 5,
            period,

            beacon_interval: 10 * 1000,
            initial_beacon_delay: 1000,

            max_deferrals: 8,
            max_beacon_misses: 3,
            mac_deadline: 2000,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.period.validate()?;

        if self.role != NodeRole::Beaconless && self.beacon_interval == 0 {
            return Err(ConfigError::BeaconInterval);
        }

        if self.mode == Mode::Zmac && self.backoff_max == 0 {
            return Err(ConfigError::Backoff);
        }

        Ok(())
    }

    /// Coarse ticks without a beacon before a member drops sync
    pub fn sync_timeout(&self) -> Ticks {
        self.beacon_interval.saturating_mul(self.max_beacon_misses)
    }
}
