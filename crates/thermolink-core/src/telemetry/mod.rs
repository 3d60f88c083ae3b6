//! Telemetry
//!
//! The acquisition loop that turns instrument readings into compensated,
//! glitch-limited temperatures and fans them out to sinks.

mod pipeline;
mod sink;
mod sinks;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::thermocouple::Temperature;

pub use pipeline::{TelemetryLoop, TickOutcome};
pub use sink::{Sink, SinkDispatcher, SinkError};
pub use sinks::{ChannelSink, ConsoleSink, ForwardSink, JsonLinesSink};

/// One published temperature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    /// When the instrument reading was captured
    pub timestamp: DateTime<Utc>,
    /// Temperature after cold-junction compensation and limiting
    pub temperature: Temperature,
    /// Instrument reading in volts
    pub raw_volts: f64,
    /// Whether the limiter replaced the converted value
    pub limited: bool,
    /// Instrument identification, if it answered `*IDN?`
    pub instrument: Option<String>,
    /// Port the reading came from
    pub port: String,
}
