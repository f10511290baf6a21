//! Medium Access Control (MAC) layer module.
//! Contains the MAC trait and the TDMA / ZMAC implementation.

use ieee802154::mac::ShortAddress;

use crate::base::RdcStatus;
use crate::frame::Payload;
use crate::timer::Ticks;

pub mod config;
pub mod slot;
pub mod sync;
pub mod pending;
pub mod csma;
pub mod core;

pub use self::config::{Config, PeriodConfig, NodeRole, Mode, ConfigError};
pub use self::core::{Tdma, MacStats};

/// Opaque caller handle, returned with the outcome of a `send`
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TxToken(pub u32);

/// Immediate result of a `send`
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SendStatus {
    /// Frame accepted, outcome is reported later via [`MacEvent::Sent`]
    Deferred,
}

/// Final transmission outcome
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TxStatus {
    Ok,
    /// Sent without a time reference, no collision guarantee
    Unsynchronized,
    Collision,
    NoAck,
    Err,
    /// Replaced by a later `send` before dispatch
    Cancelled,
    /// Not dispatched within the allowed number of periods
    Expired,
}

impl TxStatus {
    /// Map a duty-cycle outcome, downgrading success without sync
    pub fn from_rdc(status: RdcStatus, synced: bool) -> Self {
        match (status, synced) {
            (RdcStatus::Ok, true) => TxStatus::Ok,
            (RdcStatus::Ok, false) => TxStatus::Unsynchronized,
            (RdcStatus::Collision, _) => TxStatus::Collision,
            (RdcStatus::NoAck, _) => TxStatus::NoAck,
            (RdcStatus::Err, _) => TxStatus::Err,
        }
    }
}

/// Events reported to higher layers
#[derive(Clone, Debug, PartialEq)]
pub enum MacEvent {
    /// Outcome of a previous `send`
    Sent {
        token: TxToken,
        status: TxStatus,
        transmissions: u8,
    },
    /// Non-beacon frame for the upper layer
    Received {
        source: ShortAddress,
        destination: ShortAddress,
        payload: Payload,
    },
}

/// Generic MAC trait, implemented by all MACs
pub trait Mac {
    type Error;

    /// Start the MAC, arming beacon timers where required
    fn init(&mut self) -> Result<(), Self::Error>;

    /// Queue a frame for transmission, replacing any undispatched frame
    fn send(&mut self, token: TxToken, destination: ShortAddress, payload: &[u8]) -> Result<SendStatus, Self::Error>;

    /// Handle an incoming frame from the duty-cycling layer
    fn receive_indication(&mut self, frame: &[u8]) -> Result<(), Self::Error>;

    /// Enable the radio
    fn on(&mut self) -> bool;

    /// Disable the radio
    fn off(&mut self, keep_radio_on: bool) -> bool;

    /// Duty-cycle sampling interval, zero where sampling is not used
    fn channel_check_interval(&self) -> Ticks;

    /// Fetch the next pending event
    fn poll(&mut self) -> Option<MacEvent>;
}
