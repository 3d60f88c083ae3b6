//! Instrument link
//!
//! Owns one communication channel to a multimeter: the prompt handshake
//! that proves the instrument is there, and the pipelined sample cycle that
//! keeps one `MEAS1?` request outstanding at all times.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::time::Duration;

use super::commands::{prompt_kind, PromptKind};
use super::{
    is_prompt, parse_voltage, read_line, CommunicationChannel, LinkError, BREAK,
    DEFAULT_BAUD_RATE, DEFAULT_PROBE_TIMEOUT_MS, DEFAULT_TIMEOUT_MS, MEASURE_COMMAND,
    SETUP_COMMAND,
};
use crate::config::LinkSettings;

/// Where and how the instrument is reached
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialEndpoint {
    /// Serial port name
    pub port_name: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Operating read timeout
    pub read_timeout: Duration,
}

impl SerialEndpoint {
    /// Endpoint at the instrument's fixed baud rate and default timeout
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }

    /// Endpoint using configured link settings
    pub fn with_settings(port_name: impl Into<String>, settings: &LinkSettings) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate: settings.baud_rate,
            read_timeout: settings.read_timeout(),
        }
    }
}

/// Handshake and recovery tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkOptions {
    /// Read timeout while waiting for the probe prompt
    pub probe_timeout: Duration,
    /// Upper bound on extra lines read to get past stray prompts
    pub max_desync_reads: u32,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_millis(DEFAULT_PROBE_TIMEOUT_MS),
            max_desync_reads: 3,
        }
    }
}

impl From<&LinkSettings> for LinkOptions {
    fn from(settings: &LinkSettings) -> Self {
        Self {
            probe_timeout: settings.probe_timeout(),
            max_desync_reads: settings.max_desync_reads,
        }
    }
}

/// Protocol state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkState {
    /// No usable channel
    Disconnected,
    /// Probe / identification in progress
    Handshaking,
    /// Request outstanding, responses aligned
    Synced,
    /// Recovering from a prompt where data was expected
    Desynced,
}

/// One voltage reading as returned by the instrument
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    /// Reading in volts
    pub volts: f64,
    /// Wall-clock capture time
    pub captured_at: DateTime<Utc>,
}

impl RawSample {
    /// Reading in millivolts
    pub fn millivolts(&self) -> f64 {
        self.volts * 1000.0
    }
}

/// Outcome of one sample cycle that kept the link alive
#[derive(Debug, Clone, PartialEq)]
pub enum SampleRead {
    /// A parsed voltage
    Sample(RawSample),
    /// The data line did not parse; the raw text is kept for logging
    Malformed(String),
}

/// Link counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkStats {
    /// Parsed samples
    pub samples: u64,
    /// Sample cycles that recovered from a stray prompt
    pub desyncs_recovered: u64,
    /// Data lines that failed to parse
    pub malformed: u64,
}

/// Live connection to one multimeter
pub struct InstrumentLink {
    endpoint: SerialEndpoint,
    channel: Option<Box<dyn CommunicationChannel>>,
    state: LinkState,
    identification: Option<String>,
    pending_request: bool,
    options: LinkOptions,
    stats: LinkStats,
}

impl InstrumentLink {
    /// Wrap an opened channel (not yet handshaked)
    pub fn new(
        endpoint: SerialEndpoint,
        channel: Box<dyn CommunicationChannel>,
        options: LinkOptions,
    ) -> Self {
        Self {
            endpoint,
            channel: Some(channel),
            state: LinkState::Disconnected,
            identification: None,
            pending_request: false,
            options,
            stats: LinkStats::default(),
        }
    }

    /// Open a link and run the handshake in one step
    pub fn establish(
        endpoint: SerialEndpoint,
        channel: Box<dyn CommunicationChannel>,
        options: LinkOptions,
    ) -> Result<Self, LinkError> {
        let mut link = Self::new(endpoint, channel, options);
        link.handshake()?;
        Ok(link)
    }

    /// Current protocol state
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Identification string reported by `*IDN?`
    pub fn identification(&self) -> Option<&str> {
        self.identification.as_deref()
    }

    /// Endpoint this link talks to
    pub fn endpoint(&self) -> &SerialEndpoint {
        &self.endpoint
    }

    /// Whether a measurement request is awaiting its answer
    pub fn has_pending_request(&self) -> bool {
        self.pending_request
    }

    /// Link counters
    pub fn stats(&self) -> LinkStats {
        self.stats
    }

    /// Close the channel
    pub fn close(&mut self) {
        if self.channel.take().is_some() {
            tracing::debug!(port = %self.endpoint.port_name, "closing instrument link");
        }
        self.pending_request = false;
        self.state = LinkState::Disconnected;
    }

    /// Probe for the instrument and put it into DC-volts polling mode
    ///
    /// Sends the break byte and expects a prompt within the probe timeout,
    /// then selects `VDC; RATE S`, records the `*IDN?` reply and issues the
    /// first measurement request. On failure the channel is closed.
    pub fn handshake(&mut self) -> Result<(), LinkError> {
        if self.state == LinkState::Synced {
            return Err(LinkError::AlreadySynced);
        }
        if self.channel.is_none() {
            return Err(LinkError::NotConnected);
        }

        self.state = LinkState::Handshaking;
        match self.run_handshake() {
            Ok(identification) => {
                tracing::info!(
                    port = %self.endpoint.port_name,
                    instrument = %identification,
                    "instrument link synced"
                );
                self.identification = Some(identification);
                self.state = LinkState::Synced;
                Ok(())
            }
            Err(e) => {
                tracing::debug!(port = %self.endpoint.port_name, "handshake failed: {e}");
                self.close();
                Err(e)
            }
        }
    }

    fn run_handshake(&mut self) -> Result<String, LinkError> {
        let probe_timeout = self.options.probe_timeout;
        let read_timeout = self.endpoint.read_timeout;

        self.channel_mut()?.set_timeout(probe_timeout)?;
        self.send(&[BREAK])?;
        let reply = self.next_line()?;
        if !is_prompt(&reply) {
            return Err(LinkError::HandshakeFailed(format!(
                "no prompt after break (got {reply:?})"
            )));
        }

        self.channel_mut()?.set_timeout(read_timeout)?;
        self.send(SETUP_COMMAND)?;
        let identification = self.next_line()?;
        if identification.trim().is_empty() {
            return Err(LinkError::HandshakeFailed(
                "no identification reply".to_string(),
            ));
        }
        if let Some(kind) = prompt_kind(&identification) {
            return Err(LinkError::HandshakeFailed(format!(
                "setup command answered with {kind:?} prompt"
            )));
        }

        let prompt = self.next_line()?;
        match prompt_kind(&prompt) {
            Some(PromptKind::Accepted) => {}
            Some(kind) => tracing::warn!(
                port = %self.endpoint.port_name,
                "setup command answered with {kind:?} prompt, continuing"
            ),
            None => tracing::debug!(
                port = %self.endpoint.port_name,
                "expected prompt after identification, got {prompt:?}"
            ),
        }

        self.request_measurement()?;
        Ok(identification.trim().to_string())
    }

    /// Run one sample cycle
    ///
    /// Reads the answer to the outstanding request and its trailing prompt,
    /// reads past stray prompts (at most `max_desync_reads` lines), then
    /// immediately issues the next request. An unparsable data line keeps
    /// the link and yields [`SampleRead::Malformed`]; I/O failures, an empty
    /// answer and unrecoverable desync close the link.
    pub fn read_sample(&mut self) -> Result<SampleRead, LinkError> {
        if self.channel.is_none()
            || !matches!(self.state, LinkState::Synced | LinkState::Desynced)
        {
            return Err(LinkError::NotConnected);
        }

        match self.run_sample_cycle() {
            Ok(read) => Ok(read),
            Err(e) => {
                tracing::warn!(port = %self.endpoint.port_name, "instrument link lost: {e}");
                self.close();
                Err(e)
            }
        }
    }

    fn run_sample_cycle(&mut self) -> Result<SampleRead, LinkError> {
        if !self.pending_request {
            self.request_measurement()?;
        }

        let mut answer = self.next_line()?;
        let trailing = self.next_line()?;
        self.pending_request = false;
        if !is_prompt(&trailing) {
            tracing::trace!(port = %self.endpoint.port_name, "discarded non-prompt line {trailing:?}");
        }

        let mut extra_reads = 0;
        while is_prompt(&answer) {
            if extra_reads >= self.options.max_desync_reads {
                return Err(LinkError::Desync {
                    reads: extra_reads,
                    last: answer,
                });
            }
            self.state = LinkState::Desynced;
            extra_reads += 1;
            tracing::warn!(
                port = %self.endpoint.port_name,
                "prompt {answer:?} where data was expected, reading another line"
            );
            answer = self.next_line()?;
        }
        if extra_reads > 0 {
            self.stats.desyncs_recovered += 1;
        }
        self.state = LinkState::Synced;

        if answer.trim().is_empty() {
            return Err(LinkError::Timeout);
        }

        self.request_measurement()?;

        match parse_voltage(&answer) {
            Some(volts) => {
                self.stats.samples += 1;
                tracing::trace!(port = %self.endpoint.port_name, "reading {answer:?}");
                Ok(SampleRead::Sample(RawSample {
                    volts,
                    captured_at: Utc::now(),
                }))
            }
            None => {
                self.stats.malformed += 1;
                tracing::debug!(port = %self.endpoint.port_name, "unparsable reading {answer:?}");
                Ok(SampleRead::Malformed(answer))
            }
        }
    }

    fn request_measurement(&mut self) -> Result<(), LinkError> {
        self.send(MEASURE_COMMAND)?;
        self.pending_request = true;
        Ok(())
    }

    fn channel_mut(&mut self) -> Result<&mut Box<dyn CommunicationChannel>, LinkError> {
        self.channel.as_mut().ok_or(LinkError::NotConnected)
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        let channel = self.channel_mut()?;
        channel.write_all(bytes)?;
        channel.flush()?;
        Ok(())
    }

    fn next_line(&mut self) -> Result<String, LinkError> {
        let channel = self.channel_mut()?;
        Ok(read_line(channel.as_mut())?)
    }
}

impl Drop for InstrumentLink {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io::{self, Read};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Wire {
        input: VecDeque<u8>,
        output: Vec<u8>,
    }

    #[derive(Clone, Default)]
    struct MockChannel {
        wire: Arc<Mutex<Wire>>,
    }

    impl MockChannel {
        fn with_input(input: &str) -> Self {
            let mock = Self::default();
            mock.wire.lock().unwrap().input.extend(input.bytes());
            mock
        }

        fn written(&self) -> String {
            String::from_utf8_lossy(&self.wire.lock().unwrap().output).to_string()
        }
    }

    impl Read for MockChannel {
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

    impl Write for MockChannel {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.wire.lock().unwrap().output.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl CommunicationChannel for MockChannel {
        fn set_timeout(&mut self, _timeout: Duration) -> io::Result<()> {
            Ok(())
        }

        fn name(&self) -> String {
            "mock".into()
        }
    }

    const HANDSHAKE: &str = "=>\r\nFLUKE, 45, 0, 1.6 D1.0\r\n=>\r\n";

    #[test]
    fn test_new_link_is_disconnected() {
        let link = InstrumentLink::new(
            SerialEndpoint::new("mock"),
            Box::new(MockChannel::default()),
            LinkOptions::default(),
        );
        assert_eq!(link.state(), LinkState::Disconnected);
        assert!(link.identification().is_none());
        assert!(!link.has_pending_request());
    }

    #[test]
    fn test_handshake_records_identification() {
        let mock = MockChannel::with_input(HANDSHAKE);
        let link = InstrumentLink::establish(
            SerialEndpoint::new("mock"),
            Box::new(mock.clone()),
            LinkOptions::default(),
        )
        .unwrap();

        assert_eq!(link.state(), LinkState::Synced);
        assert_eq!(link.identification(), Some("FLUKE, 45, 0, 1.6 D1.0"));
        assert!(link.has_pending_request());
        assert_eq!(mock.written(), "\x03VDC; RATE S; *IDN?\r\nMEAS1?\r\n");
    }

    #[test]
    fn test_second_handshake_rejected_while_synced() {
        let mock = MockChannel::with_input(HANDSHAKE);
        let mut link = InstrumentLink::establish(
            SerialEndpoint::new("mock"),
            Box::new(mock),
            LinkOptions::default(),
        )
        .unwrap();
        assert!(matches!(link.handshake(), Err(LinkError::AlreadySynced)));
    }

    #[test]
    fn test_setup_rejected_by_prompt() {
        let mock = MockChannel::with_input("=>\r\n?>\r\n");
        let err = InstrumentLink::establish(
            SerialEndpoint::new("mock"),
            Box::new(mock),
            LinkOptions::default(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, LinkError::HandshakeFailed(_)));
    }

    #[test]
    fn test_read_before_handshake_fails() {
        let mut link = InstrumentLink::new(
            SerialEndpoint::new("mock"),
            Box::new(MockChannel::default()),
            LinkOptions::default(),
        );
        assert!(matches!(link.read_sample(), Err(LinkError::NotConnected)));
    }

    #[test]
    fn test_close_drops_channel() {
        let mock = MockChannel::with_input(HANDSHAKE);
        let mut link = InstrumentLink::establish(
            SerialEndpoint::new("mock"),
            Box::new(mock),
            LinkOptions::default(),
        )
        .unwrap();
        link.close();
        assert_eq!(link.state(), LinkState::Disconnected);
        assert!(matches!(link.handshake(), Err(LinkError::NotConnected)));
    }

    #[test]
    fn test_raw_sample_millivolts() {
        let sample = RawSample {
            volts: 1.234e-3,
            captured_at: Utc::now(),
        };
        assert!((sample.millivolts() - 1.234).abs() < 1e-12);
    }
}
