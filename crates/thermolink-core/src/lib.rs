//! # thermolink Core Library
//!
//! Discovery and telemetry pipeline for a K-type thermocouple read through a
//! serial bench multimeter.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Serial protocol for prompt-driven multimeters (break, `VDC; RATE S`,
//!   pipelined `MEAS1?` polling, desync recovery)
//! - Port scanning with reconnect backoff
//! - Type-K thermocouple conversion with cold-junction compensation
//! - A delta limiter that caps single-sample glitches
//! - Telemetry fan-out to console, JSON lines and a forward serial link
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use thermolink_core::prelude::*;
//!
//! let config = MonitorConfig::load("thermolink.json".as_ref())?;
//! let sinks: Vec<Box<dyn Sink>> = vec![Box::new(ConsoleSink::new(std::io::stdout()))];
//! let mut telemetry = TelemetryLoop::from_config(&config, sinks, Arc::new(SystemSleeper))?;
//!
//! let stop = StopSignal::new();
//! telemetry.run(&stop);
//! ```

pub mod config;
pub mod discovery;
pub mod limiter;
pub mod protocol;
pub mod shutdown;
pub mod telemetry;
pub mod thermocouple;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{CalibrationContext, ConfigError, ForwardSettings, MonitorConfig};
    pub use crate::discovery::{BackoffPolicy, PortScanner, Reconnector, ScanOrder};
    pub use crate::limiter::DeltaLimiter;
    pub use crate::protocol::{InstrumentLink, LinkError, LinkState, SerialEndpoint};
    pub use crate::shutdown::{Sleeper, StopSignal, SystemSleeper};
    pub use crate::telemetry::{
        ConsoleSink, ForwardSink, JsonLinesSink, Sink, TelemetryLoop, TelemetryRecord,
        TickOutcome,
    };
    pub use crate::thermocouple::{convert, Temperature, TemperatureStatus};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
