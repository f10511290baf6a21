//! TDMA MAC Example Application
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{debug, info, warn, error};

use structopt::StructOpt;

use embedded_hal::delay::blocking::DelayUs;
use linux_embedded_hal::Delay;
use driver_pal::hal::{HalInst, DeviceConfig};

use radio_sx128x::prelude::*;
use radio_sx128x::{Config as Sx128xConfig};

use rand::rngs::OsRng;

use lpwan_tdma::prelude::*;
use lpwan_tdma::frame::MAX_FRAME_LEN;
use lpwan_tdma::timer::TimerError;


#[derive(Debug, StructOpt)]
struct Options {

    #[structopt(flatten)]
    pub spi_config: DeviceConfig,

    #[structopt(long)]
    /// Run as the beacon coordinator
    pub coordinator: bool,

    #[structopt(long)]
    /// Run without beacons
    pub beaconless: bool,

    #[structopt(long, default_value="2")]
    /// Local short address, also selects the owned slot
    pub address: u16,

    #[structopt(long, default_value="1")]
    /// Coordinator short address
    pub coordinator_address: u16,

    #[structopt(long, default_value="tdma")]
    /// Medium access mode (tdma, zmac)
    pub mode: Mode,

    #[structopt(long, default_value="6")]
    /// Number of slots per period
    pub slot_count: u16,

    #[structopt(long, default_value="1s", parse(try_from_str = humantime::parse_duration))]
    /// Period length
    pub period: Duration,

    #[structopt(long, default_value="10ms", parse(try_from_str = humantime::parse_duration))]
    /// Guard period at the end of each slot
    pub guard: Duration,

    #[structopt(long, default_value="10s", parse(try_from_str = humantime::parse_duration))]
    /// Coordinator beacon interval
    pub beacon_interval: Duration,

    #[structopt(long, default_value="10s", parse(try_from_str = humantime::parse_duration))]
    /// Interval between test transmissions
    pub tx_interval: Duration,

    #[structopt(long, default_value="-90")]
    /// RSSI threshold for clear channel assessment
    pub cca_threshold: i16,

    #[structopt(long, default_value = "info")]
    /// Configure radio log level
    pub log_level: simplelog::LevelFilter,
}

#[derive(Clone, Debug)]
pub struct SystemTimer {
    start: Instant,
}

impl SystemTimer {
    fn new() -> Self {
        Self {
            start: Instant::now()
        }
    }
}

impl MacTimer for SystemTimer {
    fn ticks_ms(&self) -> Ticks {
        Instant::now().duration_since(self.start).as_millis() as Ticks
    }

    fn ticks_us(&self) -> Ticks {
        Instant::now().duration_since(self.start).as_micros() as Ticks
    }
}

/// Alarm table polled by the main loop
#[derive(Clone, Debug, Default)]
pub struct SystemAlarm {
    inner: Arc<Mutex<AlarmTable>>,
}

#[derive(Debug, Default)]
struct AlarmTable {
    next_handle: u32,
    armed: Vec<(u32, TimerClass, Instant)>,
}

impl SystemAlarm {
    /// Remove and return expired alarms
    fn expired(&self) -> Vec<TimerClass> {
        let now = Instant::now();
        let mut t = self.inner.lock().unwrap();

        let (expired, live): (Vec<_>, Vec<_>) = t.armed.drain(..).partition(|(_, _, at)| *at <= now);
        t.armed = live;

        expired.into_iter().map(|(_, c, _)| c).collect()
    }
}

impl MacAlarm for SystemAlarm {
    type Handle = u32;

    fn arm(&mut self, class: TimerClass, delay: Ticks) -> Result<Self::Handle, TimerError> {
        let d = match class {
            TimerClass::Slot => Duration::from_micros(delay as u64),
            TimerClass::Beacon => Duration::from_millis(delay as u64),
        };

        let mut t = self.inner.lock().map_err(|_e| TimerError::Exhausted)?;

        let h = t.next_handle;
        t.next_handle = t.next_handle.wrapping_add(1);
        t.armed.push((h, class, Instant::now() + d));

        Ok(h)
    }

    fn cancel(&mut self, handle: Self::Handle) {
        if let Ok(mut t) = self.inner.lock() {
            t.armed.retain(|(h, _, _)| *h != handle);
        }
    }
}


fn main() -> anyhow::Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();

    // Bind exit handler
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    }).expect("Error setting Ctrl-C handler");

    // Load options
    let opts = Options::from_args();

    // Initialise logging
    let log_cfg = simplelog::ConfigBuilder::new()
        .add_filter_ignore_str("radio_sx128x")
        .add_filter_ignore_str("driver_cp2130")
        .build();
    let _ = simplelog::SimpleLogger::init(opts.log_level, log_cfg);

    info!("Starting tdma-sx128x");

    debug!("Connecting to HAL");
    let HalInst{base: _, spi, pins} = match HalInst::load(&opts.spi_config) {
        Ok(v) => v,
        Err(e) => {
            return Err(anyhow::anyhow!("HAL error: {:?}", e));
        }
    };

    debug!("Initialising Radio");
    let mut rf_config = Sx128xConfig::gfsk();
    if let Modem::Gfsk(gfsk) = &mut rf_config.modem {
        gfsk.patch_preamble = false;
        gfsk.crc_mode = radio_sx128x::device::common::GfskFlrcCrcModes::RADIO_CRC_2_BYTES;
    }

    let mut radio = match Sx128x::spi(spi, pins.cs, pins.busy, pins.ready, pins.reset, Delay{}, &rf_config) {
        Ok(v) => v,
        Err(e) => {
            return Err(anyhow::anyhow!("Radio init error: {:?}", e));
        }
    };

    if let Modem::Gfsk(_gfsk) = &mut rf_config.modem {
        if let Err(e) = radio.set_syncword(1, &[0x11, 0x22, 0x33, 0x44, 0x55]) {
            return Err(anyhow::anyhow!("Radio syncword error: {:?}", e));
        }
    }

    // Setup MAC configuration
    let role = match (opts.coordinator, opts.beaconless) {
        (true, _) => NodeRole::Coordinator,
        (_, true) => NodeRole::Beaconless,
        _ => NodeRole::Member(ShortAddress(opts.coordinator_address)),
    };

    let period = PeriodConfig::even(opts.slot_count, opts.period.as_micros() as Ticks, opts.guard.as_micros() as Ticks);

    let mac_config = TdmaConfig {
        role,
        mode: opts.mode,
        backoff_max: period.slot_length / 5,
        period,
        beacon_interval: opts.beacon_interval.as_millis() as Ticks,
        ..Default::default()
    };

    debug!("Initialising MAC");

    let timer = SystemTimer::new();
    let alarm = SystemAlarm::default();
    let rdc = RadioDutyCycle::new(radio, opts.cca_threshold);
    let address = ShortAddress(opts.address);

    let mut mac = match Tdma::new(address, mac_config, rdc, alarm.clone(), timer.clone(), OsRng) {
        Ok(m) => m,
        Err(e) => {
            return Err(anyhow::anyhow!("Error initalising MAC: {:?}", e));
        }
    };

    if let Err(e) = mac.init() {
        return Err(anyhow::anyhow!("Error starting MAC: {:?}", e));
    }
    mac.on();

    debug!("Starting loop");

    let tx_interval = opts.tx_interval.as_millis() as Ticks;
    let mut last_tx = timer.ticks_ms();
    let mut token = 0;
    let mut buff = [0u8; MAX_FRAME_LEN];

    while running.load(Ordering::SeqCst) {
        let now = timer.ticks_ms();

        // Service expired alarms
        for class in alarm.expired() {
            if let Err(e) = mac.timer_fired(class) {
                error!("MAC {:?} timer error: {:?}", class, e);
            }
        }

        // Forward transmit completion
        if let Some((channel, status)) = mac.rdc_mut().poll_transmit() {
            mac.transmit_done(channel, status, 1);
        }

        // Forward received frames
        match mac.rdc_mut().poll_receive(&mut buff) {
            Ok(Some((n, _info))) => {
                if let Err(e) = mac.receive_indication(&buff[..n]) {
                    warn!("MAC RX error: {:?}", e);
                }
            },
            Ok(None) => (),
            Err(e) => error!("Radio RX error: {:?}", e),
        }

        while let Some(e) = mac.poll() {
            match e {
                MacEvent::Sent{ token, status, transmissions } => {
                    info!("TX {:?} complete: {:?} ({} transmissions)", token, status, transmissions);
                },
                MacEvent::Received{ source, payload, .. } => {
                    info!("Received data from {:?}: {:02x?}", source, &payload[..]);
                },
            }
        }

        // Periodic transmit
        if now.wrapping_sub(last_tx) > tx_interval {
            let data = &[0xaa, 0xbb, 0xcc];

            info!("TX {:02x?} at {} ms", data, now);

            if let Err(e) = mac.send(TxToken(token), ShortAddress::broadcast(), data) {
                error!("MAC TX error: {:?}", e);
            }

            token = token.wrapping_add(1);
            last_tx = now;
        }

        Delay{}.delay_ms(1).unwrap();
    }

    info!("Exiting, stats: {:?}", mac.stats());

    Ok(())
}
