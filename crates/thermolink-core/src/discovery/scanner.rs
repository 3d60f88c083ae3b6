//! Port scanning
//!
//! Tries the probe handshake on each candidate port until one answers.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::LinkSettings;
use crate::protocol::{
    clear_buffers, configure_port, list_ports, open_port, CommunicationChannel, InstrumentLink,
    LinkError, LinkOptions, SerialChannel, SerialEndpoint,
};
use crate::shutdown::StopSignal;

/// Order in which candidate ports are tried
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanOrder {
    /// Most recently enumerated first (a freshly plugged adapter wins)
    #[default]
    NewestFirst,
    /// Exactly as listed
    AsListed,
}

/// Supplies candidate port names for one scan
pub trait PortSource: Send {
    /// Candidate ports in discovery order
    fn candidates(&mut self) -> Vec<String>;
}

/// Enumerates the system's serial ports on every scan
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPorts;

impl PortSource for SystemPorts {
    fn candidates(&mut self) -> Vec<String> {
        list_ports().into_iter().map(|p| p.name).collect()
    }
}

/// A fixed, configured list of ports
#[derive(Debug, Clone)]
pub struct FixedPorts(pub Vec<String>);

impl PortSource for FixedPorts {
    fn candidates(&mut self) -> Vec<String> {
        self.0.clone()
    }
}

/// Opens a channel for an endpoint
pub trait PortOpener: Send {
    /// Open the port; the returned channel has not been probed yet
    fn open(&self, endpoint: &SerialEndpoint) -> Result<Box<dyn CommunicationChannel>, LinkError>;
}

/// Opens real serial ports (8N1, no flow control)
#[derive(Debug, Clone)]
pub struct SerialOpener {
    settle_delay: Duration,
}

impl SerialOpener {
    /// Create an opener that waits `settle_delay` after opening each port
    pub fn new(settle_delay: Duration) -> Self {
        Self { settle_delay }
    }
}

impl PortOpener for SerialOpener {
    fn open(&self, endpoint: &SerialEndpoint) -> Result<Box<dyn CommunicationChannel>, LinkError> {
        let mut port = open_port(
            &endpoint.port_name,
            endpoint.baud_rate,
            endpoint.read_timeout,
        )?;
        configure_port(port.as_mut())?;
        clear_buffers(port.as_mut())?;

        // USB adapters drop the first bytes written right after open
        if !self.settle_delay.is_zero() {
            std::thread::sleep(self.settle_delay);
        }

        Ok(Box::new(SerialChannel::new(port)))
    }
}

/// Runs the handshake across candidate ports
pub struct PortScanner {
    opener: Box<dyn PortOpener>,
    settings: LinkSettings,
    order: ScanOrder,
}

impl PortScanner {
    /// Create a scanner
    pub fn new(opener: Box<dyn PortOpener>, settings: LinkSettings, order: ScanOrder) -> Self {
        Self {
            opener,
            settings,
            order,
        }
    }

    /// Find the instrument among `candidates`
    ///
    /// Each port gets one handshake attempt; open errors and handshake
    /// failures move on to the next port. Returns the first synced link,
    /// or [`LinkError::NotFound`] once every candidate has been tried.
    /// `stop` is checked before each port; a stopped scan reports
    /// [`LinkError::NotFound`] with the ports tried so far.
    /// Callers must not scan while they still hold a synced link.
    pub fn acquire_link(
        &self,
        candidates: &[String],
        stop: &StopSignal,
    ) -> Result<InstrumentLink, LinkError> {
        let ordered: Vec<&String> = match self.order {
            ScanOrder::NewestFirst => candidates.iter().rev().collect(),
            ScanOrder::AsListed => candidates.iter().collect(),
        };

        let options = LinkOptions::from(&self.settings);
        for (tried, name) in ordered.into_iter().enumerate() {
            if stop.is_stopped() {
                tracing::debug!("scan stopped after {tried} port(s)");
                return Err(LinkError::NotFound { tried });
            }
            tracing::debug!("trying port {name}");
            let endpoint = SerialEndpoint::with_settings(name.clone(), &self.settings);

            let channel = match self.opener.open(&endpoint) {
                Ok(channel) => channel,
                Err(e) => {
                    tracing::debug!("cannot open {name}: {e}");
                    continue;
                }
            };

            match InstrumentLink::establish(endpoint, channel, options) {
                Ok(link) => {
                    tracing::info!("connected to {name}");
                    return Ok(link);
                }
                Err(e) => tracing::debug!("no instrument on {name}: {e}"),
            }
        }

        Err(LinkError::NotFound {
            tried: candidates.len(),
        })
    }
}
