//! Multimeter Serial Protocol
//!
//! Implements the command-prompt ASCII protocol spoken by Fluke 45 and
//! Tektronix DMM40xx bench multimeters: break/prompt probe, setup and
//! identification, then a pipelined `MEAS1?` polling cycle.

pub mod commands;
mod error;
mod link;
pub mod serial;
mod stream;

pub use commands::{is_prompt, parse_voltage, BREAK, MEASURE_COMMAND, SETUP_COMMAND};
pub use error::LinkError;
pub use link::{InstrumentLink, LinkOptions, LinkState, LinkStats, RawSample, SampleRead, SerialEndpoint};
pub use serial::{clear_buffers, configure_port, list_ports, open_port, PortInfo};
pub use stream::{read_line, CommunicationChannel, SerialChannel};

/// Fixed baud rate of the multimeter's RS-232 interface
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Default read timeout once the instrument has answered, in milliseconds
/// (a slow-rate DC measurement takes a few hundred ms)
pub const DEFAULT_TIMEOUT_MS: u64 = 3000;

/// Default read timeout while probing a candidate port, in milliseconds
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 500;

/// Longest line accepted before it is treated as garbage
pub const MAX_LINE_LENGTH: usize = 256;
