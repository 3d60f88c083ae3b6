//! Acquisition loop

use std::sync::Arc;
use std::time::Duration;

use super::{Sink, SinkDispatcher, SinkError, TelemetryRecord};
use crate::config::{CalibrationContext, MonitorConfig};
use crate::discovery::Reconnector;
use crate::limiter::DeltaLimiter;
use crate::protocol::{InstrumentLink, RawSample, SampleRead};
use crate::shutdown::{Sleeper, StopSignal};
use crate::thermocouple::{convert, Temperature};

/// What one tick of the loop did
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// A record was produced and handed to the sinks
    Published(TelemetryRecord),
    /// The data line did not parse; nothing was published
    Skipped,
    /// A scan found the instrument
    LinkAcquired,
    /// The link failed and was closed
    LinkLost,
    /// A scan found nothing
    Searching,
    /// Shutdown was requested
    Stopped,
}

/// Single-threaded acquisition loop
///
/// Owns the instrument link and the last accepted temperature. Nothing in
/// here returns an error to the caller: link problems close the link and
/// the next tick rescans.
pub struct TelemetryLoop {
    calibration: CalibrationContext,
    poll_interval: Duration,
    reconnector: Reconnector,
    limiter: DeltaLimiter,
    dispatcher: SinkDispatcher,
    sleeper: Arc<dyn Sleeper>,
    link: Option<InstrumentLink>,
    last_accepted: Option<Temperature>,
}

impl TelemetryLoop {
    /// Assemble a loop from its parts
    pub fn new(
        calibration: CalibrationContext,
        poll_interval: Duration,
        reconnector: Reconnector,
        dispatcher: SinkDispatcher,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        let limiter = DeltaLimiter::new(&calibration);
        Self {
            calibration,
            poll_interval,
            reconnector,
            limiter,
            dispatcher,
            sleeper,
            link: None,
            last_accepted: None,
        }
    }

    /// Build the serial pipeline described by `config`, publishing to `sinks`
    pub fn from_config(
        config: &MonitorConfig,
        sinks: Vec<Box<dyn Sink>>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Result<Self, SinkError> {
        let reconnector = Reconnector::from_config(config, sleeper.clone());
        let dispatcher = SinkDispatcher::new(sinks, config.sink_queue_depth)?;
        Ok(Self::new(
            config.calibration.clone(),
            config.poll_interval(),
            reconnector,
            dispatcher,
            sleeper,
        ))
    }

    /// Whether an instrument link is currently held
    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    /// The current link, if any
    pub fn link(&self) -> Option<&InstrumentLink> {
        self.link.as_ref()
    }

    /// Last valid temperature that was published
    pub fn last_accepted(&self) -> Option<Temperature> {
        self.last_accepted
    }

    /// Rescan state
    pub fn reconnector(&self) -> &Reconnector {
        &self.reconnector
    }

    /// Sink fan-out
    pub fn dispatcher(&self) -> &SinkDispatcher {
        &self.dispatcher
    }

    /// Run one step: a scan when disconnected, otherwise one sample cycle
    pub fn tick(&mut self, stop: &StopSignal) -> TickOutcome {
        if stop.is_stopped() {
            return TickOutcome::Stopped;
        }

        let read = match self.link.as_mut() {
            Some(link) => link.read_sample(),
            None => return self.search(stop),
        };

        match read {
            Ok(SampleRead::Sample(sample)) => {
                let record = self.process(sample);
                self.dispatcher.publish(&record);
                TickOutcome::Published(record)
            }
            Ok(SampleRead::Malformed(line)) => {
                tracing::debug!("skipping unparsable reading {line:?}");
                TickOutcome::Skipped
            }
            Err(e) => {
                tracing::info!("link closed ({e}), rescanning");
                self.link = None;
                self.reconnector.notify_link_lost();
                TickOutcome::LinkLost
            }
        }
    }

    /// Tick until `stop` fires, then drain the sinks
    pub fn run(&mut self, stop: &StopSignal) {
        tracing::info!(
            cold_junction_c = self.calibration.cold_junction_c,
            limiter = self.limiter.is_enabled(),
            "telemetry loop started"
        );
        loop {
            match self.tick(stop) {
                TickOutcome::Stopped => break,
                TickOutcome::Published(_) | TickOutcome::Skipped => {
                    if self.sleeper.sleep(self.poll_interval, stop) {
                        break;
                    }
                }
                TickOutcome::LinkAcquired | TickOutcome::LinkLost | TickOutcome::Searching => {}
            }
        }

        self.link = None;
        self.dispatcher.shutdown();
        tracing::info!("telemetry loop stopped");
    }

    fn search(&mut self, stop: &StopSignal) -> TickOutcome {
        match self.reconnector.next_attempt(stop) {
            Some(link) => {
                self.link = Some(link);
                TickOutcome::LinkAcquired
            }
            None if stop.is_stopped() => TickOutcome::Stopped,
            None => TickOutcome::Searching,
        }
    }

    fn process(&mut self, sample: RawSample) -> TelemetryRecord {
        let converted = convert(sample.millivolts(), self.calibration.cold_junction_c);
        let temperature = self.limiter.apply(self.last_accepted, converted);
        let limited = converted.is_valid() && temperature.celsius != converted.celsius;

        if limited {
            tracing::debug!(
                "limited jump to {:.1} °C, published {:.1} °C",
                converted.celsius,
                temperature.celsius
            );
        }
        if temperature.is_valid() {
            self.last_accepted = Some(temperature);
        }

        let (instrument, port) = match &self.link {
            Some(link) => (
                link.identification().map(str::to_string),
                link.endpoint().port_name.clone(),
            ),
            None => (None, String::new()),
        };

        TelemetryRecord {
            timestamp: sample.captured_at,
            temperature,
            raw_volts: sample.volts,
            limited,
            instrument,
            port,
        }
    }
}
