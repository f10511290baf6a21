//! Single pending transmission slot
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

use ieee802154::mac::ShortAddress;

use crate::frame::Payload;
use crate::timer::{Ticks, elapsed};

use super::TxToken;

/// Frame awaiting dispatch
#[derive(Clone, Debug, PartialEq)]
pub struct PendingTx {
    /// Caller handle reported with the outcome
    pub token: TxToken,
    pub destination: ShortAddress,
    pub payload: Payload,
    /// Fine clock reading at `send`
    pub queued_at: Ticks,
    /// Periods passed without dispatch
    pub deferrals: u16,
}

/// Observable state of the pending frame
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PendingStatus {
    pub token: TxToken,
    /// Time waited so far in us
    pub waiting: Ticks,
    pub deferrals: u16,
}

/// Capacity-1 transmit queue, newer frames replace older ones
#[derive(Clone, Debug, PartialEq, Default)]
pub struct PendingSlot {
    tx: Option<PendingTx>,
}

impl PendingSlot {
    pub fn new() -> Self {
        Self { tx: None }
    }

    /// Store a frame, returning any frame it replaced
    pub fn replace(&mut self, tx: PendingTx) -> Option<PendingTx> {
        self.tx.replace(tx)
    }

    pub fn take(&mut self) -> Option<PendingTx> {
        self.tx.take()
    }

    pub fn get(&self) -> Option<&PendingTx> {
        self.tx.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_none()
    }

    /// Count a period without dispatch, returns the frame once it exceeds `max`
    pub fn defer(&mut self, max: u16) -> Option<PendingTx> {
        let tx = self.tx.as_mut()?;

        tx.deferrals = tx.deferrals.saturating_add(1);
        if tx.deferrals <= max {
            return None;
        }

        self.tx.take()
    }

    pub fn status(&self, now_us: Ticks) -> Option<PendingStatus> {
        self.tx.as_ref().map(|tx| PendingStatus {
            token: tx.token,
            waiting: elapsed(now_us, tx.queued_at),
            deferrals: tx.deferrals,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn tx(token: u32, queued_at: Ticks) -> PendingTx {
        PendingTx {
            token: TxToken(token),
            destination: ShortAddress(3),
            payload: Payload::from_slice(&[token as u8]).unwrap(),
            queued_at,
            deferrals: 0,
        }
    }

    #[test]
    fn replace_on_arrival() {
        let mut p = PendingSlot::new();
        assert!(p.is_empty());

        assert_eq!(p.replace(tx(1, 0)), None);

        let prev = p.replace(tx(2, 10)).unwrap();
        assert_eq!(prev.token, TxToken(1));

        assert_eq!(p.get().map(|t| t.token), Some(TxToken(2)));
        assert_eq!(p.take().map(|t| t.token), Some(TxToken(2)));
        assert!(p.is_empty());
    }

    #[test]
    fn bounded_deferrals() {
        let mut p = PendingSlot::new();
        p.replace(tx(4, Ticks::MAX - 9));

        assert_eq!(p.defer(2), None);
        assert_eq!(p.defer(2), None);

        let s = p.status(10).unwrap();
        assert_eq!(s.deferrals, 2);
        assert_eq!(s.waiting, 20);

        let expired = p.defer(2).unwrap();
        assert_eq!(expired.token, TxToken(4));
        assert!(p.is_empty());
        assert_eq!(p.defer(2), None);
    }
}
