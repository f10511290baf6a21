//! Duty-cycling layer interface and radio adaptor
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

use core::fmt::Debug;

use log::{trace, debug, warn};

use radio::{State, Transmit, Receive, Rssi, RadioState, ReceiveInfo};

/// Logical channels for outgoing frames
///
/// Beacons are kept on a reserved channel so lower layers that support
/// channel separation can prioritise or isolate them.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LogicalChannel {
    Beacon,
    Data,
}

/// Transmission outcome reported by the duty-cycling layer
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RdcStatus {
    Ok,
    Collision,
    NoAck,
    Err,
}

/// Interface to the radio duty-cycling layer below the MAC
///
/// Transmissions are asynchronous, completion is reported back to the MAC
/// by the host via `transmit_done`.
pub trait DutyCycle {
    type Error: Debug;

    /// Start transmission of an encoded frame
    fn transmit(&mut self, channel: LogicalChannel, frame: &[u8]) -> Result<(), Self::Error>;

    /// Enable the radio
    fn on(&mut self) -> bool;

    /// Disable the radio (or keep receiving if `keep_radio_on` is set)
    fn off(&mut self, keep_radio_on: bool) -> bool;

    /// Check whether the channel is currently clear
    fn channel_clear(&mut self) -> bool;
}

/// Errors from the radio adaptor
#[derive(Debug, Clone, PartialEq)]
pub enum BaseError<E> {
    /// A transmission is already in progress
    Busy,
    /// Wrapper for underlying radio errors
    Radio(E),
}

#[derive(Debug, Clone, PartialEq)]
pub enum BaseState {
    Idle,
    Listening,
    Transmitting(LogicalChannel),
    Sleeping,
}

/// [`DutyCycle`] implementation over `radio` devices, keeping the radio
/// in receive mode whenever it is on and not transmitting.
#[derive(Debug, Clone, PartialEq)]
pub struct RadioDutyCycle<R> {
    radio: R,
    state: BaseState,
    keep_on: bool,
    /// RSSI threshold for a channel to be determined to be clear
    channel_clear_threshold: i16,
}

impl <R, S, I, E> RadioDutyCycle<R>
where
    R: State<State=S, Error=E> + Transmit<Error=E> + Receive<Info=I, Error=E> + Rssi<Error=E>,
    S: RadioState,
    I: ReceiveInfo,
    E: Debug,
{
    pub fn new(radio: R, channel_clear_threshold: i16) -> Self {
        Self {
            radio,
            state: BaseState::Idle,
            keep_on: false,
            channel_clear_threshold,
        }
    }

    pub fn state(&self) -> BaseState {
        self.state.clone()
    }

    /// Enter receive mode
    pub fn receive(&mut self) -> Result<(), BaseError<E>> {
        trace!("Start receive");

        self.radio.start_receive().map_err(BaseError::Radio)?;
        self.state = BaseState::Listening;

        Ok(())
    }

    /// Put the radio to sleep
    pub fn sleep(&mut self) -> Result<(), BaseError<E>> {
        trace!("Sleep radio");

        self.radio.set_state(S::sleep()).map_err(BaseError::Radio)?;
        self.state = BaseState::Sleeping;

        Ok(())
    }

    /// Poll for transmit completion, returning the channel and outcome of the completed frame
    ///
    /// Radio errors complete the frame with [`RdcStatus::Err`] so the
    /// adaptor is free for the next transmission.
    pub fn poll_transmit(&mut self) -> Option<(LogicalChannel, RdcStatus)> {
        let channel = match self.state {
            BaseState::Transmitting(c) => c,
            _ => return None,
        };

        let status = match self.radio.check_transmit() {
            Ok(false) => return None,
            Ok(true) => {
                debug!("Transmit complete on {:?} channel", channel);
                RdcStatus::Ok
            },
            Err(e) => {
                warn!("Transmit failed on {:?} channel: {:?}", channel, e);
                RdcStatus::Err
            },
        };

        // Return to the previous radio mode
        self.state = BaseState::Idle;
        if self.keep_on {
            if let Err(e) = self.receive() {
                warn!("Failed to resume receive: {:?}", e);
            }
        }

        Some((channel, status))
    }

    /// Poll for a received frame, returning the frame length and receive info
    pub fn poll_receive(&mut self, buff: &mut [u8]) -> Result<Option<(usize, I)>, BaseError<E>> {
        if self.state != BaseState::Listening {
            return Ok(None);
        }

        if !self.radio.check_receive(true).map_err(BaseError::Radio)? {
            return Ok(None);
        }

        let (n, info) = self.radio.get_received(buff).map_err(BaseError::Radio)?;

        debug!("Received ({} bytes): {:02x?}", n, &buff[..n]);

        Ok(Some((n, info)))
    }
}

impl <R, S, I, E> DutyCycle for RadioDutyCycle<R>
where
    R: State<State=S, Error=E> + Transmit<Error=E> + Receive<Info=I, Error=E> + Rssi<Error=E>,
    S: RadioState,
    I: ReceiveInfo,
    E: Debug,
{
    type Error = BaseError<E>;

    fn transmit(&mut self, channel: LogicalChannel, frame: &[u8]) -> Result<(), Self::Error> {
        // Check we're not busy
        if let BaseState::Transmitting(_) = self.state {
            return Err(BaseError::Busy);
        }

        debug!("Transmit {} bytes on {:?} channel", frame.len(), channel);

        // Start the transmission
        self.radio.start_transmit(frame).map_err(BaseError::Radio)?;

        self.state = BaseState::Transmitting(channel);

        Ok(())
    }

    fn on(&mut self) -> bool {
        self.keep_on = true;

        if let BaseState::Transmitting(_) = self.state {
            return true;
        }

        match self.receive() {
            Ok(_) => true,
            Err(e) => {
                warn!("Radio on failed: {:?}", e);
                false
            }
        }
    }

    fn off(&mut self, keep_radio_on: bool) -> bool {
        if keep_radio_on {
            return self.on();
        }

        self.keep_on = false;

        if let BaseState::Transmitting(_) = self.state {
            return true;
        }

        match self.sleep() {
            Ok(_) => true,
            Err(e) => {
                warn!("Radio off failed: {:?}", e);
                false
            }
        }
    }

    fn channel_clear(&mut self) -> bool {
        match self.state {
            BaseState::Transmitting(_) => return false,
            BaseState::Listening => (),
            _ => if let Err(e) = self.receive() {
                warn!("CCA receive start failed: {:?}", e);
                return false;
            },
        }

        // Check that we can't hear anyone else using the channel
        let rssi = match self.radio.poll_rssi() {
            Ok(v) => v,
            Err(e) => {
                warn!("CCA RSSI poll failed: {:?}", e);
                return false;
            }
        };

        if rssi > self.channel_clear_threshold {
            debug!("Channel busy (rssi: {})", rssi);
            return false;
        }

        true
    }
}

#[cfg(any(test, feature="mocks"))]
pub mod mock {
    use std::sync::{Arc, Mutex};
    use std::vec::Vec;

    use super::*;

    #[derive(Debug, Default)]
    struct Inner {
        sent: Vec<(LogicalChannel, Vec<u8>)>,
        busy: bool,
        fail_tx: bool,
        on: bool,
        cca_checks: u32,
    }

    /// Mock duty-cycling layer recording transmitted frames
    #[derive(Clone, Debug)]
    pub struct MockDutyCycle(Arc<Mutex<Inner>>);

    #[derive(Clone, Debug, PartialEq)]
    pub struct MockError;

    impl MockDutyCycle {
        pub fn new() -> Self {
            Self(Arc::new(Mutex::new(Inner::default())))
        }

        /// Take all frames transmitted so far
        pub fn take_sent(&mut self) -> Vec<(LogicalChannel, Vec<u8>)> {
            core::mem::take(&mut self.0.lock().unwrap().sent)
        }

        /// Set whether carrier sense reports a busy channel
        pub fn set_busy(&mut self, busy: bool) {
            self.0.lock().unwrap().busy = busy;
        }

        /// Force subsequent transmissions to fail
        pub fn set_fail_tx(&mut self, fail: bool) {
            self.0.lock().unwrap().fail_tx = fail;
        }

        pub fn is_on(&self) -> bool {
            self.0.lock().unwrap().on
        }

        pub fn cca_checks(&self) -> u32 {
            self.0.lock().unwrap().cca_checks
        }
    }

    impl DutyCycle for MockDutyCycle {
        type Error = MockError;

        fn transmit(&mut self, channel: LogicalChannel, frame: &[u8]) -> Result<(), Self::Error> {
            let mut i = self.0.lock().unwrap();
            if i.fail_tx {
                return Err(MockError);
            }
            i.sent.push((channel, frame.to_vec()));
            Ok(())
        }

        fn on(&mut self) -> bool {
            self.0.lock().unwrap().on = true;
            true
        }

        fn off(&mut self, keep_radio_on: bool) -> bool {
            self.0.lock().unwrap().on = keep_radio_on;
            true
        }

        fn channel_clear(&mut self) -> bool {
            let mut i = self.0.lock().unwrap();
            i.cca_checks += 1;
            !i.busy
        }
    }
}

#[cfg(test)]
mod test {
    use std::vec;

    use radio::mock::*;

    use super::*;

    #[test]
    fn transmit_and_complete() {
        let _ = simplelog::SimpleLogger::init(log::LevelFilter::Debug, simplelog::Config::default());

        let mut radio = MockRadio::new(&[]);
        let mut rdc = RadioDutyCycle::new(radio.clone(), -90);

        radio.expect(&[
            Transaction::start_receive(None),
            Transaction::start_transmit(vec![0xaa, 0xbb], None),
            Transaction::check_transmit(Ok(false)),
            Transaction::check_transmit(Ok(true)),
            Transaction::start_receive(None),
        ]);

        assert!(rdc.on());
        rdc.transmit(LogicalChannel::Data, &[0xaa, 0xbb]).unwrap();

        // Half-duplex, no overlapping transmissions
        assert_eq!(rdc.transmit(LogicalChannel::Beacon, &[0xcc]), Err(BaseError::Busy));

        assert_eq!(rdc.poll_transmit(), None);
        assert_eq!(rdc.poll_transmit(), Some((LogicalChannel::Data, RdcStatus::Ok)));
        assert_eq!(rdc.state(), BaseState::Listening);

        radio.done();
    }

    #[test]
    fn transmit_error_releases_radio() {
        let _ = simplelog::SimpleLogger::init(log::LevelFilter::Debug, simplelog::Config::default());

        let mut radio = MockRadio::new(&[]);
        let mut rdc = RadioDutyCycle::new(radio.clone(), -90);

        radio.expect(&[
            Transaction::start_transmit(vec![0xaa], None),
            Transaction::check_transmit(Err(MockError::Timeout)),
            Transaction::start_transmit(vec![0xbb], None),
        ]);

        rdc.transmit(LogicalChannel::Data, &[0xaa]).unwrap();

        // Failure completes the frame and frees the radio
        assert_eq!(rdc.poll_transmit(), Some((LogicalChannel::Data, RdcStatus::Err)));
        assert_eq!(rdc.state(), BaseState::Idle);

        assert_eq!(rdc.transmit(LogicalChannel::Data, &[0xbb]), Ok(()));

        radio.done();
    }

    #[test]
    fn channel_clear_threshold() {
        let _ = simplelog::SimpleLogger::init(log::LevelFilter::Debug, simplelog::Config::default());

        let mut radio = MockRadio::new(&[]);
        let mut rdc = RadioDutyCycle::new(radio.clone(), -90);

        radio.expect(&[
            // Enter receive mode for RSSI checking
            Transaction::start_receive(None),
            // Check noone else is (percievable) transmitting
            Transaction::poll_rssi(Ok(-95i16)),
            // Someone else is transmitting
            Transaction::poll_rssi(Ok(-20i16)),
        ]);

        assert_eq!(rdc.channel_clear(), true);
        assert_eq!(rdc.channel_clear(), false);

        radio.done();
    }

    #[test]
    fn off_sleeps_radio() {
        let mut radio = MockRadio::new(&[]);
        let mut rdc = RadioDutyCycle::new(radio.clone(), -90);

        radio.expect(&[
            Transaction::start_receive(None),
            Transaction::set_state(MockState::Sleep, None),
        ]);

        assert!(rdc.off(true));
        assert_eq!(rdc.state(), BaseState::Listening);

        assert!(rdc.off(false));
        assert_eq!(rdc.state(), BaseState::Sleeping);

        radio.done();
    }
}
