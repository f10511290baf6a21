//! TDMA crate prelude
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

pub use crate::{Mac, MacEvent, TxStatus, TxToken, SendStatus};

pub use crate::error::MacError;
pub use crate::timer::{Timer as MacTimer, Alarm as MacAlarm, TimerClass, Ticks};

pub use crate::base::{DutyCycle, RadioDutyCycle, LogicalChannel, RdcStatus};

pub use crate::mac::{Tdma, MacStats, Config as TdmaConfig, PeriodConfig, NodeRole, Mode};

pub use ieee802154::mac::ShortAddress;
