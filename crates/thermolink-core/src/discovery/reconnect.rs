//! Reconnect loop

use std::sync::Arc;
use std::time::Duration;

use super::{Backoff, FixedPorts, PortScanner, PortSource, SerialOpener, SystemPorts};
use crate::config::MonitorConfig;
use crate::protocol::InstrumentLink;
use crate::shutdown::{Sleeper, StopSignal};

/// Drives rescans with backoff until the instrument comes back
///
/// There is no retry limit: an absent instrument is an expected state for
/// an unattended monitor.
pub struct Reconnector {
    scanner: PortScanner,
    source: Box<dyn PortSource>,
    backoff: Backoff,
    sleeper: Arc<dyn Sleeper>,
    failed_scans: u64,
    absence_reported: bool,
}

impl Reconnector {
    /// Create a reconnector
    pub fn new(
        scanner: PortScanner,
        source: Box<dyn PortSource>,
        backoff: Backoff,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            scanner,
            source,
            backoff,
            sleeper,
            failed_scans: 0,
            absence_reported: false,
        }
    }

    /// Build the real serial reconnector described by `config`
    ///
    /// Uses the configured port list when present, otherwise enumerates
    /// system ports before every scan.
    pub fn from_config(config: &MonitorConfig, sleeper: Arc<dyn Sleeper>) -> Self {
        let opener = SerialOpener::new(config.link.settle_delay());
        let scanner = PortScanner::new(Box::new(opener), config.link.clone(), config.scan.order);
        let source: Box<dyn PortSource> = match &config.scan.ports {
            Some(ports) => Box::new(FixedPorts(ports.clone())),
            None => Box::new(SystemPorts),
        };
        let backoff = Backoff::new(
            Duration::from_millis(config.backoff.after_loss_ms),
            config.backoff.policy.clone(),
        );
        Self::new(scanner, source, backoff, sleeper)
    }

    /// Scans that found nothing since the instrument was last seen
    pub fn failed_scans(&self) -> u64 {
        self.failed_scans
    }

    /// Record that the active link dropped; the next wait is the short one
    pub fn notify_link_lost(&mut self) {
        self.backoff.reset();
    }

    /// Wait out the current backoff delay, then scan once
    ///
    /// Returns `None` when the scan found nothing or `stop` fired during
    /// the wait or the scan.
    pub fn next_attempt(&mut self, stop: &StopSignal) -> Option<InstrumentLink> {
        let delay = self.backoff.next_delay();
        if self.sleeper.sleep(delay, stop) {
            return None;
        }

        let candidates = self.source.candidates();
        match self.scanner.acquire_link(&candidates, stop) {
            Ok(link) => {
                if self.failed_scans > 0 {
                    tracing::info!(
                        "instrument found after {} unsuccessful scan(s)",
                        self.failed_scans
                    );
                }
                self.failed_scans = 0;
                self.absence_reported = false;
                self.backoff.reset();
                Some(link)
            }
            Err(_) if stop.is_stopped() => None,
            Err(e) => {
                self.failed_scans += 1;
                if self.absence_reported {
                    tracing::debug!("multimeter still not found (scan {}): {e}", self.failed_scans);
                } else {
                    tracing::warn!("multimeter not found: {e}; retrying");
                    self.absence_reported = true;
                }
                None
            }
        }
    }
}
