use serialport::{SerialPortInfo, SerialPortType};

use crate::serial_daq::SerialDaq;

/// USB vendor IDs of DAQ adapters recognised without an explicit filter.
const KNOWN_VENDOR_IDS: [u16; 3] = [
    0x0683, // DATAQ Instruments
    0x0403, // FTDI
    0x2341, // Arduino
];

#[derive(Debug, Clone, PartialEq)]
pub struct DaqDevice {
    pub name: String,
    pub port: String,
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
}

impl DaqDevice {
    fn from_port_info(info: &SerialPortInfo) -> Self {
        match &info.port_type {
            SerialPortType::UsbPort(usb) => Self {
                name: usb
                    .product
                    .clone()
                    .unwrap_or_else(|| format!("USB {:04x}:{:04x}", usb.vid, usb.pid)),
                port: info.port_name.clone(),
                vendor_id: Some(usb.vid),
                product_id: Some(usb.pid),
            },
            _ => Self {
                name: info.port_name.clone(),
                port: info.port_name.clone(),
                vendor_id: None,
                product_id: None,
            },
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DaqConnectorError {
    #[error("Serial port error: {0}")]
    SerialPort(#[from] serialport::Error),

    #[error("Port {port} is not a DAQ device")]
    InvalidPort { port: String },

    #[error("No DAQ device {name} found. Please connect a device or specify the port manually")]
    DeviceNotFound { name: String },
}

/// Which serial ports count as DAQ devices.
#[derive(Debug, Clone)]
pub struct DeviceFilter {
    pub vendor_ids: Vec<u16>,
    /// Substring the USB product name must contain.
    pub name: Option<String>,
}

impl Default for DeviceFilter {
    fn default() -> Self {
        Self {
            vendor_ids: KNOWN_VENDOR_IDS.to_vec(),
            name: None,
        }
    }
}

impl DeviceFilter {
    pub fn named(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Self::default()
        }
    }

    /// Accept any USB serial port.
    pub fn any_usb() -> Self {
        Self {
            vendor_ids: Vec::new(),
            name: None,
        }
    }

    pub fn matches(&self, device: &DaqDevice) -> bool {
        let Some(vendor_id) = device.vendor_id else {
            return false;
        };
        if !self.vendor_ids.is_empty() && !self.vendor_ids.contains(&vendor_id) {
            return false;
        }
        match &self.name {
            Some(name) => device.name.contains(name.as_str()),
            None => true,
        }
    }
}

pub struct DaqConnector;

impl DaqConnector {
    /// Locate a DAQ device and return an unconnected transport for it.
    ///
    /// With an explicit `port` the port must exist and match the filter.
    /// Without one, the first matching device is used.
    pub fn locate(
        port: Option<&str>,
        filter: &DeviceFilter,
    ) -> Result<SerialDaq, DaqConnectorError> {
        let devices = Self::available_devices(filter)?;

        let port = if let Some(port) = port {
            log::debug!("Validating DAQ port {}", port);
            if !devices.iter().any(|d| d.port == port) {
                return Err(DaqConnectorError::InvalidPort {
                    port: port.to_string(),
                });
            }
            port.to_string()
        } else {
            let device = devices
                .into_iter()
                .next()
                .ok_or_else(|| DaqConnectorError::DeviceNotFound {
                    name: filter.name.clone().unwrap_or_else(|| "DAQ".to_string()),
                })?;
            log::debug!("Found DAQ device {} at {}", device.name, device.port);
            device.port
        };

        Ok(SerialDaq::new(port))
    }

    /// All serial ports that pass `filter`.
    pub fn available_devices(filter: &DeviceFilter) -> Result<Vec<DaqDevice>, DaqConnectorError> {
        let devices = serialport::available_ports()?
            .iter()
            .map(DaqDevice::from_port_info)
            .filter(|device| filter.matches(device))
            .collect();
        Ok(devices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usb(vid: u16, product: Option<&str>) -> DaqDevice {
        DaqDevice {
            name: product.map_or_else(|| format!("USB {vid:04x}:2108"), str::to_string),
            port: "/dev/ttyACM0".to_string(),
            vendor_id: Some(vid),
            product_id: Some(0x2108),
        }
    }

    #[test]
    fn test_filter_by_vendor_and_name() {
        let dataq = usb(0x0683, Some("DI-2108"));
        assert!(DeviceFilter::default().matches(&dataq));
        assert!(DeviceFilter::named("2108").matches(&dataq));
        assert!(!DeviceFilter::named("DI-1100").matches(&dataq));

        let other = usb(0x1234, None);
        assert_eq!(other.name, "USB 1234:2108");
        assert!(!DeviceFilter::default().matches(&other));
        assert!(DeviceFilter::any_usb().matches(&other));
    }

    #[test]
    fn test_non_usb_ports_never_match() {
        let device = DaqDevice::from_port_info(&SerialPortInfo {
            port_name: "/dev/ttyS0".to_string(),
            port_type: SerialPortType::Unknown,
        });
        assert_eq!(device.vendor_id, None);
        assert!(!DeviceFilter::any_usb().matches(&device));
    }

    #[test]
    fn test_available_devices() {
        // Depends on what is plugged in; only check shape.
        match DaqConnector::available_devices(&DeviceFilter::any_usb()) {
            Ok(devices) => {
                for device in devices {
                    assert!(!device.port.is_empty());
                    assert!(device.vendor_id.is_some());
                }
            }
            Err(DaqConnectorError::SerialPort(_)) => {
                // Port enumeration unavailable in this environment
            }
            Err(e) => panic!("Unexpected error: {e:?}"),
        }
    }
}
