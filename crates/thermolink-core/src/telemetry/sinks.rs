//! Bundled sinks

use std::io::Write;
use std::time::Duration;

use crossbeam_channel::Sender;

use super::{Sink, SinkError, TelemetryRecord};
use crate::config::ForwardSettings;
use crate::protocol::{
    configure_port, open_port, read_line, CommunicationChannel, LinkError, SerialChannel,
};

/// Read timeout on the forward link outside echo reads
const FORWARD_TIMEOUT: Duration = Duration::from_millis(1000);

/// How long to wait for the receiver's echo before moving on
const FORWARD_ECHO_WAIT: Duration = Duration::from_millis(10);

/// Human-readable line per record
///
/// ```text
/// 14:03:07  52.2 °C  (+1.234E-3 VDC)
/// 14:03:08  54.0 °C  (+3.307E-3 VDC) limited
/// ```
pub struct ConsoleSink<W: Write + Send> {
    out: W,
}

impl<W: Write + Send> ConsoleSink<W> {
    /// Write to `out`
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// Recover the writer
    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> Sink for ConsoleSink<W> {
    fn name(&self) -> &str {
        "console"
    }

    fn publish(&mut self, record: &TelemetryRecord) -> Result<(), SinkError> {
        let unit = if record.temperature.is_valid() { " °C" } else { "" };
        write!(
            self.out,
            "{}  {}{}  ({:+.3E} VDC)",
            record.timestamp.format("%H:%M:%S"),
            record.temperature,
            unit,
            record.raw_volts
        )?;
        if record.limited {
            write!(self.out, " limited")?;
        }
        writeln!(self.out)?;
        self.out.flush()?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.out.flush()?;
        Ok(())
    }
}

/// One JSON object per line
pub struct JsonLinesSink<W: Write + Send> {
    out: W,
}

impl<W: Write + Send> JsonLinesSink<W> {
    /// Write to `out`
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// Recover the writer
    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> Sink for JsonLinesSink<W> {
    fn name(&self) -> &str {
        "json"
    }

    fn publish(&mut self, record: &TelemetryRecord) -> Result<(), SinkError> {
        serde_json::to_writer(&mut self.out, record)?;
        self.out.write_all(b"\n")?;
        self.out.flush()?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.out.flush()?;
        Ok(())
    }
}

/// Hands records to an in-process channel
pub struct ChannelSink {
    sender: Sender<TelemetryRecord>,
}

impl ChannelSink {
    /// Send every record to `sender`
    pub fn new(sender: Sender<TelemetryRecord>) -> Self {
        Self { sender }
    }
}

impl Sink for ChannelSink {
    fn name(&self) -> &str {
        "channel"
    }

    fn publish(&mut self, record: &TelemetryRecord) -> Result<(), SinkError> {
        self.sender
            .send(record.clone())
            .map_err(|_| SinkError::Closed)
    }
}

/// Repeats valid temperatures to a downstream device as `52.2\r\n`
///
/// Out-of-range and invalid readings are not forwarded. With `read_echo`
/// the receiver's reply line is read back and compared at debug level.
pub struct ForwardSink {
    channel: Box<dyn CommunicationChannel>,
    read_echo: bool,
}

impl ForwardSink {
    /// Wrap an already opened channel
    pub fn new(channel: Box<dyn CommunicationChannel>, read_echo: bool) -> Self {
        Self { channel, read_echo }
    }

    /// Open the configured serial port (8N1, no flow control)
    pub fn open(settings: &ForwardSettings) -> Result<Self, LinkError> {
        let mut port = open_port(&settings.port, settings.baud_rate, FORWARD_TIMEOUT)?;
        configure_port(port.as_mut())?;
        tracing::info!(port = %settings.port, baud = settings.baud_rate, "forward link open");
        Ok(Self::new(
            Box::new(SerialChannel::new(port)),
            settings.read_echo,
        ))
    }
}

impl Sink for ForwardSink {
    fn name(&self) -> &str {
        "forward"
    }

    fn publish(&mut self, record: &TelemetryRecord) -> Result<(), SinkError> {
        if !record.temperature.is_valid() {
            return Ok(());
        }

        let sent = format!("{:.1}", record.temperature.celsius);
        self.channel.write_all(format!("{sent}\r\n").as_bytes())?;
        self.channel.flush()?;

        if self.read_echo {
            self.channel.set_timeout(FORWARD_ECHO_WAIT)?;
            let echo = read_line(self.channel.as_mut());
            self.channel.set_timeout(FORWARD_TIMEOUT)?;
            let echo = echo?;
            match (echo.trim().parse::<f64>(), sent.parse::<f64>()) {
                _ if echo.is_empty() => tracing::debug!("no forward echo"),
                (Ok(received), Ok(sent_value)) => tracing::debug!(
                    "forward echo {received:.1}, difference {:.1}",
                    received - sent_value
                ),
                _ => tracing::debug!("forward echo {echo:?}"),
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.channel.flush()?;
        Ok(())
    }
}
