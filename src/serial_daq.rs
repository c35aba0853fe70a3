use serialport::SerialPort;
use std::io::{Read, Write};
use std::time::{Duration, Instant};

use crate::source::{AcquisitionSource, DeviceSettings, SourceError};

const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Serial transport speaking a line-oriented ASCII protocol.
///
/// Configuration is a handful of text commands (`stop`, `encode 1`,
/// `slist`, `range`, `srate`, `dec`, `start`). After `start` the device
/// sends one line per sample holding one integer ADC code per scanned
/// channel, separated by commas or whitespace.
pub struct SerialDaq {
    port_name: String,
    baud_rate: u32,
    sample_timeout: Duration,
    serial: Option<Box<dyn SerialPort>>,
    expected_channels: Option<usize>,
    line: Vec<u8>,
}

impl SerialDaq {
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            sample_timeout: Duration::from_secs(1),
            serial: None,
            expected_channels: None,
            line: Vec::new(),
        }
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// How long a single `collect_sample` call may wait for a full line.
    pub fn with_sample_timeout(mut self, timeout: Duration) -> Self {
        self.sample_timeout = timeout;
        self
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>, SourceError> {
        self.serial.as_mut().ok_or(SourceError::NotConnected)
    }

    fn send(&mut self, command: &str) -> Result<(), SourceError> {
        log::debug!("-> {}", command);
        let command_with_newline = format!("{command}\r");
        self.port()?.write_all(command_with_newline.as_bytes())?;
        Ok(())
    }

    /// Read bytes until a line terminator or the sample timeout.
    fn read_line(&mut self) -> Result<String, SourceError> {
        let deadline = Instant::now() + self.sample_timeout;
        let serial = self.serial.as_mut().ok_or(SourceError::NotConnected)?;

        loop {
            let mut byte = [0u8; 1];
            match serial.read_exact(&mut byte) {
                Ok(()) => match byte[0] {
                    b'\r' | b'\n' => {
                        if self.line.is_empty() {
                            continue;
                        }
                        let text = String::from_utf8_lossy(&self.line).trim().to_string();
                        self.line.clear();
                        return Ok(text);
                    }
                    b => self.line.push(b),
                },
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                    if Instant::now() >= deadline {
                        return Err(SourceError::Timeout);
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Parse one sample line into raw codes.
pub fn parse_sample_line(line: &str, expected: Option<usize>) -> Result<Vec<f64>, SourceError> {
    let values = line
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|token| !token.is_empty())
        .map(str::parse::<f64>)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| SourceError::Parse {
            line: line.to_string(),
        })?;

    if values.is_empty() {
        return Err(SourceError::Parse {
            line: line.to_string(),
        });
    }
    match expected {
        Some(expected) if expected != values.len() => Err(SourceError::ChannelCount {
            expected,
            actual: values.len(),
        }),
        _ => Ok(values),
    }
}

impl AcquisitionSource for SerialDaq {
    fn connect(&mut self) -> Result<(), SourceError> {
        log::debug!(
            "Opening DAQ on port {} at {} baud",
            self.port_name,
            self.baud_rate
        );
        let serial = serialport::new(&self.port_name, self.baud_rate)
            .timeout(Duration::from_millis(10))
            .open()?;
        self.serial = Some(serial);
        self.line.clear();

        self.send("stop")?;
        self.port()?.clear(serialport::ClearBuffer::All)?;
        Ok(())
    }

    fn configure(&mut self, settings: &DeviceSettings) -> Result<(), SourceError> {
        self.send("stop")?;
        self.send("encode 1")?;
        for (position, (channel, range)) in settings
            .channels
            .iter()
            .zip(&settings.voltage_ranges)
            .enumerate()
        {
            self.send(&format!("slist {position} {channel}"))?;
            self.send(&format!("range {position} {range}"))?;
        }
        self.send(&format!("srate {}", settings.sample_rate_hz))?;
        self.send(&format!("dec {}", settings.decimation))?;
        self.expected_channels = Some(settings.channels.len());

        self.port()?.clear(serialport::ClearBuffer::Input)?;
        self.line.clear();
        self.send("start")?;
        log::debug!(
            "DAQ configured: {} channels at {} Hz, decimation {}",
            settings.channels.len(),
            settings.sample_rate_hz,
            settings.decimation
        );
        Ok(())
    }

    fn collect_sample(&mut self) -> Result<Vec<f64>, SourceError> {
        let line = self.read_line()?;
        parse_sample_line(&line, self.expected_channels)
    }

    fn close(&mut self) -> Result<(), SourceError> {
        if self.serial.is_some() {
            let result = self.send("stop");
            self.serial = None;
            log::debug!("Closed DAQ on port {}", self.port_name);
            result
        } else {
            Ok(())
        }
    }
}
