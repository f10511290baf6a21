//! ZMAC channel arbitration, random backoff and carrier sense
//! for stealing slots owned by other nodes.
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

use rand_core::RngCore;

use crate::timer::Ticks;

/// Arbitration state for the pending frame
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ArbState {
    /// Nothing pending
    Idle,
    /// Slot timer armed for the owned slot
    WaitingForOwnSlot,
    /// Slot timer armed for the end of a steal backoff
    BackoffPending,
}

/// Outcome of carrier sense at the end of a backoff
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StealOutcome {
    /// Channel idle, transmit in the borrowed slot
    Transmit,
    /// Channel busy, wait for the owned slot
    Abandon,
}

impl StealOutcome {
    pub fn from_cca(clear: bool) -> Self {
        match clear {
            true => StealOutcome::Transmit,
            false => StealOutcome::Abandon,
        }
    }
}

/// Draw a backoff from `[0, backoff_max)`
pub fn backoff<K: RngCore>(rng: &mut K, backoff_max: Ticks) -> Ticks {
    if backoff_max == 0 {
        return 0;
    }

    rng.next_u32() % backoff_max
}

#[cfg(test)]
mod test {
    use rand::rngs::mock::StepRng;

    use super::*;

    #[test]
    fn backoff_range() {
        let mut rng = StepRng::new(0, 7_777);

        for _i in 0..100 {
            assert!(backoff(&mut rng, 1000) < 1000);
        }

        assert_eq!(backoff(&mut rng, 0), 0);
    }

    #[test]
    fn backoff_deterministic() {
        let mut rng = StepRng::new(1234, 1);

        assert_eq!(backoff(&mut rng, 1000), 234);
        assert_eq!(backoff(&mut rng, 1000), 235);
    }

    #[test]
    fn steal_on_clear() {
        assert_eq!(StealOutcome::from_cca(true), StealOutcome::Transmit);
        assert_eq!(StealOutcome::from_cca(false), StealOutcome::Abandon);
    }
}
