//! MAC error types
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

use ieee802154::mac::DecodeError;

use crate::timer::TimerError;
use crate::mac::config::ConfigError;

/// MAC errors
#[derive(Debug, Clone, PartialEq)]
pub enum MacError<E> {
    /// Payload could not be captured for transmission
    Alloc,

    /// Timer arming failed
    Timer(TimerError),

    /// Decoding error
    Decode(DecodeError),

    /// Invalid MAC configuration
    Config(ConfigError),

    /// Wrapper for unhandled / underlying radio errors
    Radio(E),
}

impl <E> From<TimerError> for MacError<E> {
    fn from(e: TimerError) -> Self {
        MacError::Timer(e)
    }
}

impl <E> From<ConfigError> for MacError<E> {
    fn from(e: ConfigError) -> Self {
        MacError::Config(e)
    }
}
