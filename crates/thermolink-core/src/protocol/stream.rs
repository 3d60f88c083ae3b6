//! Instrument byte streams

use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::time::Duration;

use super::MAX_LINE_LENGTH;

/// Abstraction over the byte stream to an instrument
///
/// Implemented for real serial ports and for scripted test doubles.
pub trait CommunicationChannel: Read + Write + Send {
    /// Set timeout for read operations
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()>;

    /// Human-readable name of the underlying device
    fn name(&self) -> String;
}

/// Serial port wrapper implementing CommunicationChannel
pub struct SerialChannel {
    port: Box<dyn SerialPort>,
}

impl SerialChannel {
    /// Wrap an opened serial port
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }
}

impl Read for SerialChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for SerialChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl CommunicationChannel for SerialChannel {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.port
            .set_timeout(timeout)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }

    fn name(&self) -> String {
        self.port.name().unwrap_or_else(|| "<serial>".to_string())
    }
}

/// Read one line, the way a terminal-style `readline` with timeout does
///
/// Bytes are collected up to and including `\n`. A read timeout (or end of
/// stream) ends the line early and returns whatever arrived, possibly
/// nothing. Lines longer than [`MAX_LINE_LENGTH`] are cut there. The result
/// is decoded lossily and stripped of CR/LF.
pub fn read_line<C: CommunicationChannel + ?Sized>(channel: &mut C) -> io::Result<String> {
    let mut line = Vec::with_capacity(32);
    let mut byte = [0u8; 1];

    while line.len() < MAX_LINE_LENGTH {
        match channel.read(&mut byte) {
            Ok(0) => break,
            Ok(_) => {
                line.push(byte[0]);
                if byte[0] == b'\n' {
                    break;
                }
            }
            Err(ref e)
                if e.kind() == io::ErrorKind::TimedOut || e.kind() == io::ErrorKind::WouldBlock =>
            {
                break
            }
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    Ok(String::from_utf8_lossy(&line)
        .trim_end_matches(['\r', '\n'])
        .to_string())
}
