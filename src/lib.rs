//! Beacon synchronised TDMA / ZMAC medium access
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

#![no_std]

#[cfg(any(test, feature="std"))]
extern crate std;

pub mod timer;

pub mod frame;

pub mod base;

pub mod mac;

pub mod error;

pub mod prelude;

pub use mac::{Mac, MacEvent, TxStatus, TxToken, SendStatus};
