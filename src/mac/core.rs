//! TDMA node scheduler
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

use log::{trace, debug, info, warn, error};

use heapless::spsc::Queue;
use ieee802154::mac::ShortAddress;
use rand_core::RngCore;

use crate::base::{DutyCycle, LogicalChannel, RdcStatus};
use crate::error::MacError;
use crate::frame::{Frame, Payload, BEACON_MARKER, MAX_FRAME_LEN};
use crate::timer::{Alarm, Timer, TimerClass, Ticks, elapsed, at_or_after};

use super::{Mac, MacEvent, SendStatus, TxStatus, TxToken};
use super::config::{Config, Mode, NodeRole};
use super::csma::{self, ArbState, StealOutcome};
use super::pending::{PendingSlot, PendingStatus, PendingTx};
use super::slot::{self, Schedule, SlotDecision};
use super::sync::{BeaconState, TimeBase};

/// MAC layer statistics
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MacStats {
    pub beacons_tx: u32,
    pub beacons_rx: u32,
    /// Beacon intervals skipped due to late timer servicing
    pub beacon_misses: u32,
    pub sync_lost: u32,
    /// Slot timers serviced later than `mac_deadline`
    pub deadline_misses: u32,
    pub deferrals: u32,
    pub expired: u32,
    pub steal_attempts: u32,
    pub steals: u32,
    pub cca_fail: u32,
    /// Frames refused by the duty-cycling layer
    pub tx_fail: u32,
    pub decode_errors: u32,
    pub dropped_events: u32,
    /// Time from `send` to dispatch for the last frame in us
    pub last_tx_delay: Ticks,
    pub max_tx_delay: Ticks,
}

/// Frame handed to the duty-cycling layer and awaiting `transmit_done`
#[derive(Copy, Clone, Debug, PartialEq)]
struct InFlight {
    token: TxToken,
    synced: bool,
}

/// Beacon synchronised TDMA MAC with optional ZMAC slot stealing
///
/// Generic over a duty-cycling layer (D), Alarm (A), Timer (T) and Rng (K).
/// The host drives the MAC by forwarding alarm expiries to
/// [`Tdma::timer_fired`] and transmit completions to [`Tdma::transmit_done`].
pub struct Tdma<D, A: Alarm, T, K> {
    address: ShortAddress,
    config: Config,
    slot_index: u16,

    rdc: D,
    alarm: A,
    timer: T,
    rng: K,

    seq: u8,
    time: TimeBase,
    beacon: BeaconState,

    pending: PendingSlot,
    arb: ArbState,
    in_flight: Option<InFlight>,

    slot_timer: Option<A::Handle>,
    /// Expected expiry of the slot timer in us
    slot_deadline: Ticks,
    beacon_timer: Option<A::Handle>,

    stats: MacStats,
    events: Queue<MacEvent, 16>,

    buff: [u8; MAX_FRAME_LEN],
}

impl <D, A, T, K> Tdma<D, A, T, K>
where
    D: DutyCycle,
    A: Alarm,
    T: Timer,
    K: RngCore,
{
    pub fn new(address: ShortAddress, config: Config, rdc: D, alarm: A, timer: T, rng: K) -> Result<Self, MacError<D::Error>> {
        config.validate()?;

        let slot_index = config.period.slot_index(address);
        let beacon = BeaconState::new(config.beacon_interval, config.initial_beacon_delay);

        debug!("Setup {:?} MAC with address {:?} (slot {}) at {} ms",
                config.mode, address, slot_index, timer.ticks_ms());

        Ok(Self {
            address,
            config,
            slot_index,

            rdc,
            alarm,
            timer,
            rng,

            seq: 0,
            time: TimeBase::provisional(),
            beacon,

            pending: PendingSlot::new(),
            arb: ArbState::Idle,
            in_flight: None,

            slot_timer: None,
            slot_deadline: 0,
            beacon_timer: None,

            stats: MacStats::default(),
            events: Queue::new(),

            buff: [0u8; MAX_FRAME_LEN],
        })
    }

    pub fn address(&self) -> ShortAddress {
        self.address
    }

    pub fn slot_index(&self) -> u16 {
        self.slot_index
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Access the duty-cycling layer, for hosts polling radio completion
    pub fn rdc_mut(&mut self) -> &mut D {
        &mut self.rdc
    }

    /// Fetch the current time base
    pub fn time_base(&self) -> TimeBase {
        self.time
    }

    pub fn is_synchronized(&self) -> bool {
        self.time.synchronized
    }

    pub fn arb_state(&self) -> ArbState {
        self.arb
    }

    /// Fetch the status of the frame awaiting dispatch (if any)
    pub fn pending(&self) -> Option<PendingStatus> {
        self.pending.status(self.timer.ticks_us())
    }

    /// Fetch MAC layer statistics
    pub fn stats(&self) -> MacStats {
        self.stats.clone()
    }

    /// Fetch and increment TX sequence number
    fn seq(&mut self) -> u8 {
        let s = self.seq;
        self.seq = self.seq.wrapping_add(1);
        s
    }

    /// Handle expiry of an armed alarm
    pub fn timer_fired(&mut self, class: TimerClass) -> Result<(), MacError<D::Error>> {
        let now_ms = self.timer.ticks_ms();
        let now_us = self.timer.ticks_us();

        trace!("{:?} timer fired at {} ms", class, now_ms);

        self.check_sync(now_ms);

        match class {
            TimerClass::Slot => {
                // Fired alarms are consumed by the host
                self.slot_timer = None;

                if at_or_after(now_us, self.slot_deadline) {
                    let slip = elapsed(now_us, self.slot_deadline);
                    if slip > self.config.mac_deadline {
                        warn!("Slot deadline exceeded (expected: {} actual: {} us)", self.slot_deadline, now_us);
                        self.stats.deadline_misses = self.stats.deadline_misses.saturating_add(1);
                    }
                }

                match self.arb {
                    ArbState::BackoffPending => self.steal(now_us),
                    _ => self.service_slot(now_us, true),
                }
            },
            TimerClass::Beacon => {
                self.beacon_timer = None;

                match self.config.role {
                    NodeRole::Coordinator => self.emit_beacon(now_ms, now_us),
                    // Member beacon timers are sync watchdogs, re-armed while sync holds
                    NodeRole::Member(_) if self.time.synchronized => {
                        let remaining = self.config.sync_timeout()
                            .saturating_sub(elapsed(now_ms, self.time.last_sync_ms));

                        debug!("Sync watchdog fired early, re-arming for {} ms", remaining);

                        self.arm_beacon(remaining)
                    },
                    _ => Ok(()),
                }
            },
        }
    }

    /// Handle completion of a transmission by the duty-cycling layer
    pub fn transmit_done(&mut self, channel: LogicalChannel, status: RdcStatus, transmissions: u8) {
        if channel == LogicalChannel::Beacon {
            match status {
                RdcStatus::Ok => trace!("Beacon TX complete"),
                _ => warn!("Beacon TX failed: {:?}", status),
            }
            return;
        }

        let tx = match self.in_flight.take() {
            Some(v) => v,
            None => {
                warn!("Unexpected TX completion ({:?})", status);
                return;
            }
        };

        let status = TxStatus::from_rdc(status, tx.synced);

        debug!("TX {:?} complete at {} ms: {:?} ({} transmissions)",
                tx.token, self.timer.ticks_ms(), status, transmissions);

        self.push_event(MacEvent::Sent{ token: tx.token, status, transmissions });
    }

    /// Drop sync on members that have not heard a beacon for too long
    fn check_sync(&mut self, now_ms: Ticks) {
        if let NodeRole::Member(_) = self.config.role {
            if self.time.expire(now_ms, self.config.sync_timeout()) {
                warn!("Lost sync at {} ms (last beacon: {} ms)", now_ms, self.time.last_sync_ms);
                self.stats.sync_lost = self.stats.sync_lost.saturating_add(1);
            }
        }
    }

    /// Anchor the period origin, re-servicing a live slot timer
    fn anchor(&mut self, now_ms: Ticks, now_us: Ticks) -> Result<(), MacError<D::Error>> {
        if !self.time.synchronized {
            info!("Synchronised at {} ms", now_ms);
        }

        self.time.anchor(now_us, now_ms);

        if self.slot_timer.is_some() && self.arb != ArbState::BackoffPending {
            debug!("Re-anchored, rescheduling slot");
            self.service_slot(now_us, false)?;
        }

        Ok(())
    }

    /// Coordinator beacon emission
    fn emit_beacon(&mut self, now_ms: Ticks, now_us: Ticks) -> Result<(), MacError<D::Error>> {
        let (delay, missed) = self.beacon.advance(now_ms);

        if missed > 0 {
            warn!("Beacon deadline exceeded at {} ms, skipped {} intervals", now_ms, missed);
            self.stats.beacon_misses = self.stats.beacon_misses.saturating_add(missed);
        }

        self.arm_beacon(delay)?;
        debug!("Armed next beacon TX for {} ms", self.beacon.next_beacon);

        let seq = self.seq();
        let n = Frame::beacon(self.address, seq).encode(&mut self.buff);

        self.rdc.transmit(LogicalChannel::Beacon, &self.buff[..n]).map_err(MacError::Radio)?;
        self.stats.beacons_tx = self.stats.beacons_tx.saturating_add(1);

        debug!("Sent beacon {} at {} ms", seq, now_ms);

        self.anchor(now_ms, now_us)
    }

    /// Compute the owned slot window against the current time base
    fn schedule(&mut self, now_us: Ticks) -> Schedule {
        self.time.rollover(now_us, self.config.period.period_length);

        slot::schedule(now_us, self.time.origin, self.slot_index, &self.config.period)
    }

    /// Evaluate the owned slot, dispatching when inside it and re-arming the slot timer
    fn service_slot(&mut self, now_us: Ticks, periodic: bool) -> Result<(), MacError<D::Error>> {
        let s = self.schedule(now_us);

        trace!("Slot {} at {} us: {:?}", self.slot_index, now_us, s);

        match s.decision {
            SlotDecision::Inside => {
                if !self.pending.is_empty() && !self.dispatch(now_us)? && periodic {
                    self.defer();
                }

                let delay = slot::next_period(now_us, self.time.origin, self.slot_index, &self.config.period);
                self.arm_slot(now_us, delay, ArbState::WaitingForOwnSlot)
            },
            SlotDecision::Late{ periods } => {
                if !self.pending.is_empty() && periodic {
                    debug!("Missed slot window at {} us ({} periods)", now_us, periods);
                    self.defer();
                }

                self.arm_slot(now_us, s.delay, ArbState::WaitingForOwnSlot)
            },
            SlotDecision::Early => {
                self.arm_slot(now_us, s.delay, ArbState::WaitingForOwnSlot)
            },
        }
    }

    /// Attempt to steal the channel once the backoff has elapsed
    fn steal(&mut self, now_us: Ticks) -> Result<(), MacError<D::Error>> {
        let s = self.schedule(now_us);

        // Backoff ran into the owned slot
        if s.is_inside() || self.pending.is_empty() || self.in_flight.is_some() {
            return self.service_slot(now_us, false);
        }

        self.stats.steal_attempts = self.stats.steal_attempts.saturating_add(1);

        match StealOutcome::from_cca(self.rdc.channel_clear()) {
            StealOutcome::Transmit => {
                if self.dispatch(now_us)? {
                    debug!("Stole slot at {} us", now_us);
                    self.stats.steals = self.stats.steals.saturating_add(1);
                }
            },
            StealOutcome::Abandon => {
                debug!("Channel busy at {} us, waiting for slot {}", now_us, self.slot_index);
                self.stats.cca_fail = self.stats.cca_fail.saturating_add(1);
            },
        }

        self.arm_slot(now_us, s.delay, ArbState::WaitingForOwnSlot)
    }

    /// Hand the pending frame to the duty-cycling layer
    ///
    /// Returns false where the frame remains pending.
    fn dispatch(&mut self, now_us: Ticks) -> Result<bool, MacError<D::Error>> {
        if self.in_flight.is_some() {
            debug!("TX in progress, holding pending frame");
            return Ok(false);
        }

        let tx = match self.pending.take() {
            Some(v) => v,
            None => return Ok(false),
        };

        let seq = self.seq();
        let frame = Frame::data(tx.destination, self.address, seq, tx.payload.clone());
        let n = frame.encode(&mut self.buff);

        if let Err(e) = self.rdc.transmit(LogicalChannel::Data, &self.buff[..n]) {
            warn!("TX {:?} refused: {:?}", tx.token, e);
            self.stats.tx_fail = self.stats.tx_fail.saturating_add(1);
            self.pending.replace(tx);
            return Ok(false);
        }

        let delay = elapsed(now_us, tx.queued_at);
        self.stats.last_tx_delay = delay;
        self.stats.max_tx_delay = self.stats.max_tx_delay.max(delay);

        debug!("Dispatched TX {:?} (seq {}) to {:?} at {} us after {} us",
                tx.token, seq, tx.destination, now_us, delay);

        if !self.time.synchronized {
            debug!("TX {:?} sent without sync", tx.token);
        }

        self.in_flight = Some(InFlight{ token: tx.token, synced: self.time.synchronized });

        Ok(true)
    }

    /// Count a period without dispatch, expiring the pending frame past the limit
    fn defer(&mut self) {
        self.stats.deferrals = self.stats.deferrals.saturating_add(1);

        if let Some(tx) = self.pending.defer(self.config.max_deferrals) {
            warn!("TX {:?} expired after {} periods", tx.token, tx.deferrals);
            self.stats.expired = self.stats.expired.saturating_add(1);

            self.push_event(MacEvent::Sent{ token: tx.token, status: TxStatus::Expired, transmissions: 0 });
        }
    }

    fn arm_slot(&mut self, now_us: Ticks, delay: Ticks, arb: ArbState) -> Result<(), MacError<D::Error>> {
        if let Some(h) = self.slot_timer.take() {
            self.alarm.cancel(h);
        }

        match self.alarm.arm(TimerClass::Slot, delay) {
            Ok(h) => {
                trace!("Armed slot timer for {} us", delay);

                self.slot_timer = Some(h);
                self.slot_deadline = now_us.wrapping_add(delay);
                self.arb = match self.pending.is_empty() {
                    true => ArbState::Idle,
                    false => arb,
                };

                Ok(())
            },
            Err(e) => {
                error!("Slot timer arm failed: {:?}", e);

                self.arb = ArbState::Idle;
                if let Some(tx) = self.pending.take() {
                    self.push_event(MacEvent::Sent{ token: tx.token, status: TxStatus::Err, transmissions: 0 });
                }

                Err(MacError::Timer(e))
            },
        }
    }

    fn arm_beacon(&mut self, delay: Ticks) -> Result<(), MacError<D::Error>> {
        if let Some(h) = self.beacon_timer.take() {
            self.alarm.cancel(h);
        }

        let h = self.alarm.arm(TimerClass::Beacon, delay).map_err(|e| {
            error!("Beacon timer arm failed: {:?}", e);
            MacError::Timer(e)
        })?;

        self.beacon_timer = Some(h);

        Ok(())
    }

    fn push_event(&mut self, event: MacEvent) {
        if let Err(e) = self.events.enqueue(event) {
            error!("Event queue full, dropping {:?}", e);
            self.stats.dropped_events = self.stats.dropped_events.saturating_add(1);
        }
    }
}

impl <D, A, T, K> Mac for Tdma<D, A, T, K>
where
    D: DutyCycle,
    A: Alarm,
    T: Timer,
    K: RngCore,
{
    type Error = MacError<D::Error>;

    fn init(&mut self) -> Result<(), Self::Error> {
        let now_ms = self.timer.ticks_ms();

        self.time = TimeBase::provisional();

        match self.config.role {
            NodeRole::Coordinator => {
                let delay = self.beacon.start(now_ms);
                self.arm_beacon(delay)?;

                debug!("Init coordinator at {} ms, first beacon at {} ms", now_ms, self.beacon.next_beacon);
            },
            NodeRole::Member(c) => {
                debug!("Init member at {} ms, awaiting beacon from {:?}", now_ms, c);
            },
            NodeRole::Beaconless => {
                debug!("Init beaconless at {} ms", now_ms);
            },
        }

        Ok(())
    }

    fn send(&mut self, token: TxToken, destination: ShortAddress, payload: &[u8]) -> Result<SendStatus, Self::Error> {
        let payload = Payload::from_slice(payload).map_err(|_e| MacError::Alloc)?;

        let now_ms = self.timer.ticks_ms();
        let now_us = self.timer.ticks_us();

        self.check_sync(now_ms);

        let tx = PendingTx{ token, destination, payload, queued_at: now_us, deferrals: 0 };

        if let Some(prev) = self.pending.replace(tx) {
            debug!("TX {:?} replaced by {:?}", prev.token, token);
            self.push_event(MacEvent::Sent{ token: prev.token, status: TxStatus::Cancelled, transmissions: 0 });
        }

        let s = self.schedule(now_us);

        debug!("Queued TX {:?} at {} us ({:?})", token, now_us, s.decision);

        // Outside the owned slot ZMAC attempts to steal after a random backoff
        if self.config.mode == Mode::Zmac && !s.is_inside() && self.in_flight.is_none() {
            let backoff = csma::backoff(&mut self.rng, self.config.backoff_max);

            debug!("Starting steal backoff of {} us", backoff);

            self.arm_slot(now_us, backoff, ArbState::BackoffPending)?;

        } else if self.slot_timer.is_none() || s.is_inside() {
            self.service_slot(now_us, false)?;
        }

        Ok(SendStatus::Deferred)
    }

    fn receive_indication(&mut self, data: &[u8]) -> Result<(), Self::Error> {
        let now_ms = self.timer.ticks_ms();
        let now_us = self.timer.ticks_us();

        let frame = match Frame::decode(data) {
            Ok(f) => f,
            Err(e) => {
                warn!("Failed to decode frame ({} bytes): {:?}", data.len(), e);
                self.stats.decode_errors = self.stats.decode_errors.saturating_add(1);
                return Err(MacError::Decode(e));
            }
        };

        if let Frame::Beacon(h) = &frame {
            if let NodeRole::Member(c) = self.config.role {
                if h.source == c {
                    debug!("Received beacon {} from {:?} at {} ms", h.seq, h.source, now_ms);

                    self.stats.beacons_rx = self.stats.beacons_rx.saturating_add(1);
                    self.arm_beacon(self.config.sync_timeout())?;

                    return self.anchor(now_ms, now_us);
                }
            }

            trace!("Ignoring beacon from {:?}", h.source);
        }

        let h = *frame.header();
        let payload = match frame {
            Frame::Data(_, p) => p,
            Frame::Beacon(_) => Payload::from_slice(BEACON_MARKER).map_err(|_e| MacError::Alloc)?,
        };

        trace!("Received {} bytes from {:?} at {} ms", payload.len(), h.source, now_ms);

        self.push_event(MacEvent::Received{ source: h.source, destination: h.destination, payload });

        Ok(())
    }

    fn on(&mut self) -> bool {
        self.rdc.on()
    }

    fn off(&mut self, keep_radio_on: bool) -> bool {
        self.rdc.off(keep_radio_on)
    }

    fn channel_check_interval(&self) -> Ticks {
        0
    }

    fn poll(&mut self) -> Option<MacEvent> {
        self.events.dequeue()
    }
}
