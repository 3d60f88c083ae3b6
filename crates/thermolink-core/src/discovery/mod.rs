//! Instrument Discovery
//!
//! Finds the multimeter among the available serial ports and re-finds it
//! after the link drops.

mod backoff;
mod reconnect;
mod scanner;

pub use backoff::{Backoff, BackoffPolicy};
pub use reconnect::Reconnector;
pub use scanner::{
    FixedPorts, PortOpener, PortScanner, PortSource, ScanOrder, SerialOpener, SystemPorts,
};
