//! Serial port handling
//!
//! Port enumeration and low-level port setup for the multimeter and the
//! downstream forward link.

use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::fs;
use std::time::Duration;

use super::LinkError;

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0" or "COM3")
    pub name: String,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Product name (if available)
    pub product: Option<String>,
}

impl PortInfo {
    fn bare(name: String) -> Self {
        Self {
            name,
            vid: None,
            pid: None,
            product: None,
        }
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let (vid, pid, product) = match info.port_type {
            SerialPortType::UsbPort(usb_info) => {
                (Some(usb_info.vid), Some(usb_info.pid), usb_info.product)
            }
            _ => (None, None, None),
        };

        Self {
            name: info.port_name,
            vid,
            pid,
            product,
        }
    }
}

/// Sort key giving the order ports appeared in:
///  - COMn ports by number
///  - ttyS* built-in UARTs
///  - ttyUSB* then ttyACM* adapters, each by number
///  - anything else by name
///
/// Newer USB adapters end up last, which is what newest-first scanning
/// reverses.
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    let numbered = |prefix: &str| {
        basename
            .strip_prefix(prefix)
            .map(|rest| rest.parse::<usize>().unwrap_or(usize::MAX))
    };
    if let Some(num) = numbered("COM") {
        return (0, num, basename.to_string());
    }
    if let Some(num) = numbered("ttyS") {
        return (1, num, basename.to_string());
    }
    if let Some(num) = numbered("ttyUSB") {
        return (2, num, basename.to_string());
    }
    if let Some(num) = numbered("ttyACM") {
        return (3, num, basename.to_string());
    }
    (4, 0, basename.to_string())
}

/// List all available serial ports, with /dev fallbacks and deterministic ordering
pub fn list_ports() -> Vec<PortInfo> {
    let mut map: HashMap<String, PortInfo> = HashMap::new();
    match serialport::available_ports() {
        Ok(ports) => {
            for info in ports {
                let p = PortInfo::from(info);
                map.entry(p.name.clone()).or_insert(p);
            }
        }
        Err(e) => tracing::debug!("serial port enumeration failed: {e}"),
    }

    // Linux-only: USB adapters the enumeration API missed
    #[cfg(target_os = "linux")]
    if let Ok(entries) = fs::read_dir("/dev") {
        for entry in entries.flatten() {
            if let Some(fname) = entry.file_name().to_str() {
                if fname.starts_with("ttyACM") || fname.starts_with("ttyUSB") {
                    let full = format!("/dev/{}", fname);
                    map.entry(full.clone())
                        .or_insert_with(|| PortInfo::bare(full));
                }
            }
        }
    }

    let mut v: Vec<PortInfo> = map.into_values().collect();
    v.sort_by_key(|p| port_sort_key(&p.name));
    v
}

/// Open a serial port at `baud_rate` with the given read timeout
pub fn open_port(
    name: &str,
    baud_rate: u32,
    timeout: Duration,
) -> Result<Box<dyn SerialPort>, LinkError> {
    serialport::new(name, baud_rate)
        .timeout(timeout)
        .open()
        .map_err(|e| LinkError::SerialError(format!("{name}: {e}")))
}

/// Configure a serial port as 8N1 without flow control
pub fn configure_port(port: &mut dyn SerialPort) -> Result<(), LinkError> {
    port.set_data_bits(serialport::DataBits::Eight)
        .map_err(|e| LinkError::SerialError(e.to_string()))?;
    port.set_parity(serialport::Parity::None)
        .map_err(|e| LinkError::SerialError(e.to_string()))?;
    port.set_stop_bits(serialport::StopBits::One)
        .map_err(|e| LinkError::SerialError(e.to_string()))?;
    port.set_flow_control(serialport::FlowControl::None)
        .map_err(|e| LinkError::SerialError(e.to_string()))?;
    Ok(())
}

/// Clear the serial port buffers
pub fn clear_buffers(port: &mut dyn SerialPort) -> Result<(), LinkError> {
    port.clear(serialport::ClearBuffer::All)
        .map_err(|e| LinkError::SerialError(e.to_string()))
}
