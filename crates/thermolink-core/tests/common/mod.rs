//! Scripted serial doubles shared by the integration tests

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thermolink_core::discovery::PortOpener;
use thermolink_core::protocol::{CommunicationChannel, LinkError, SerialEndpoint};
use thermolink_core::shutdown::{Sleeper, StopSignal};

/// Break prompt, identification line and the prompt after it
pub const HANDSHAKE: &str = "=>\r\nFLUKE, 45, 0, 1.6 D1.0\r\n=>\r\n";

/// Everything the link writes during a successful handshake
pub const HANDSHAKE_WRITES: &str = "\x03VDC; RATE S; *IDN?\r\nMEAS1?\r\n";

#[derive(Default)]
struct Wire {
    input: VecDeque<u8>,
    output: Vec<u8>,
}

/// In-memory channel: reads a script, records writes, times out when dry
#[derive(Clone, Default)]
pub struct ScriptedChannel {
    wire: Arc<Mutex<Wire>>,
}

impl ScriptedChannel {
    pub fn new(script: &str) -> Self {
        let channel = Self::default();
        channel.push(script);
        channel
    }

    /// Queue more instrument output
    pub fn push(&self, script: &str) {
        self.wire.lock().unwrap().input.extend(script.bytes());
    }

    pub fn written(&self) -> String {
        String::from_utf8_lossy(&self.wire.lock().unwrap().output).to_string()
    }

    pub fn clear_written(&self) {
        self.wire.lock().unwrap().output.clear();
    }
}

impl Read for ScriptedChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.wire.lock().unwrap().input.pop_front() {
            Some(b) => {
                buf[0] = b;
                Ok(1)
            }
            None => Err(io::Error::new(io::ErrorKind::TimedOut, "timeout")),
        }
    }
}

impl Write for ScriptedChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.wire.lock().unwrap().output.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl CommunicationChannel for ScriptedChannel {
    fn set_timeout(&mut self, _timeout: Duration) -> io::Result<()> {
        Ok(())
    }

    fn name(&self) -> String {
        "scripted".into()
    }
}

/// Hands out pre-built channels per port; a port with nothing queued
/// fails to open
#[derive(Clone, Default)]
pub struct ScriptedOpener {
    channels: Arc<Mutex<HashMap<String, VecDeque<ScriptedChannel>>>>,
    opened: Arc<Mutex<Vec<String>>>,
    stop_on_open: Arc<Mutex<Option<StopSignal>>>,
}

impl ScriptedOpener {
    /// Fire `stop` whenever a port is opened
    pub fn stop_on_open(&self, stop: &StopSignal) {
        *self.stop_on_open.lock().unwrap() = Some(stop.clone());
    }

    /// Queue a channel for the next open of `port`
    pub fn attach(&self, port: &str, channel: ScriptedChannel) {
        self.channels
            .lock()
            .unwrap()
            .entry(port.to_string())
            .or_default()
            .push_back(channel);
    }

    /// Ports opened so far, in order
    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }
}

impl PortOpener for ScriptedOpener {
    fn open(&self, endpoint: &SerialEndpoint) -> Result<Box<dyn CommunicationChannel>, LinkError> {
        self.opened.lock().unwrap().push(endpoint.port_name.clone());
        if let Some(stop) = self.stop_on_open.lock().unwrap().as_ref() {
            stop.trigger();
        }
        let next = self
            .channels
            .lock()
            .unwrap()
            .get_mut(&endpoint.port_name)
            .and_then(|queue| queue.pop_front());
        match next {
            Some(channel) => Ok(Box::new(channel)),
            None => Err(LinkError::SerialError(format!(
                "{}: no such device",
                endpoint.port_name
            ))),
        }
    }
}

/// Records requested delays and returns immediately
#[derive(Clone, Default)]
pub struct RecordingSleeper {
    delays: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration, stop: &StopSignal) -> bool {
        self.delays.lock().unwrap().push(duration);
        stop.is_stopped()
    }
}

/// One instrument answer line plus its trailing prompt
pub fn reading(line: &str) -> String {
    format!("{line}\r\n=>\r\n")
}
