use std::collections::VecDeque;
use std::thread;
use std::time::Duration;

/// One multi-channel reading, stamped with the time since reading started.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub timestamp: f64,
    pub raw: Vec<f64>,
}

impl Sample {
    pub fn new(timestamp: f64, raw: Vec<f64>) -> Self {
        Self { timestamp, raw }
    }
}

/// Device-side settings applied when a source is configured.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSettings {
    pub channels: Vec<u8>,
    pub voltage_ranges: Vec<f64>,
    pub sample_rate_hz: u32,
    pub decimation: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Serial port error: {0}")]
    SerialPort(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not parse sample line '{line}'")]
    Parse { line: String },

    #[error("Expected {expected} channel values but got {actual}")]
    ChannelCount { expected: usize, actual: usize },

    #[error("Timed out waiting for a sample")]
    Timeout,

    #[error("Source is not connected")]
    NotConnected,

    #[error("Source has no more samples")]
    Exhausted,

    #[error("Device error: {0}")]
    Device(String),
}

/// A device that yields one row of raw ADC codes per call.
///
/// The acquisition loop is the only caller; implementations need not be
/// thread-safe beyond being movable into that loop's thread.
pub trait AcquisitionSource: Send {
    fn connect(&mut self) -> Result<(), SourceError>;

    fn configure(&mut self, settings: &DeviceSettings) -> Result<(), SourceError>;

    fn collect_sample(&mut self) -> Result<Vec<f64>, SourceError>;

    fn close(&mut self) -> Result<(), SourceError>;
}

impl<S: AcquisitionSource + ?Sized> AcquisitionSource for Box<S> {
    fn connect(&mut self) -> Result<(), SourceError> {
        (**self).connect()
    }

    fn configure(&mut self, settings: &DeviceSettings) -> Result<(), SourceError> {
        (**self).configure(settings)
    }

    fn collect_sample(&mut self) -> Result<Vec<f64>, SourceError> {
        (**self).collect_sample()
    }

    fn close(&mut self) -> Result<(), SourceError> {
        (**self).close()
    }
}

type Generator = Box<dyn FnMut(u64) -> Option<Vec<f64>> + Send>;

/// Replays scripted rows or a generator function. Useful for tests,
/// simulation and deterministic playback.
pub struct ScriptedSource {
    generator: Generator,
    index: u64,
    pacing: Option<Duration>,
    /// Connection attempts beyond this many fail.
    connect_limit: Option<usize>,
    failures: VecDeque<u64>,
    connected: bool,
    connect_count: usize,
}

impl ScriptedSource {
    /// Replay `rows` once, then report [`SourceError::Exhausted`].
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Self {
        let mut rows = VecDeque::from(rows);
        Self::from_fn(move |_| rows.pop_front())
    }

    /// Call `generator` with the sample index; `None` ends the script.
    pub fn from_fn(generator: impl FnMut(u64) -> Option<Vec<f64>> + Send + 'static) -> Self {
        Self {
            generator: Box::new(generator),
            index: 0,
            pacing: None,
            connect_limit: None,
            failures: VecDeque::new(),
            connected: false,
            connect_count: 0,
        }
    }

    /// Sleep this long before each sample to mimic the device rate.
    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = Some(pacing);
        self
    }

    /// Every connection attempt fails.
    pub fn refusing_connect(self) -> Self {
        self.with_connect_limit(0)
    }

    /// Only the first `limit` connection attempts succeed.
    pub fn with_connect_limit(mut self, limit: usize) -> Self {
        self.connect_limit = Some(limit);
        self
    }

    /// Fail the read at each of these sample indices once.
    pub fn with_failures_at(mut self, indices: impl IntoIterator<Item = u64>) -> Self {
        self.failures = indices.into_iter().collect();
        self.failures.make_contiguous().sort_unstable();
        self
    }

    pub fn connect_count(&self) -> usize {
        self.connect_count
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }
}

impl AcquisitionSource for ScriptedSource {
    fn connect(&mut self) -> Result<(), SourceError> {
        self.connect_count += 1;
        if self.connect_limit.is_some_and(|limit| self.connect_count > limit) {
            return Err(SourceError::Device("connection refused".to_string()));
        }
        self.connected = true;
        Ok(())
    }

    fn configure(&mut self, _settings: &DeviceSettings) -> Result<(), SourceError> {
        if self.connected {
            Ok(())
        } else {
            Err(SourceError::NotConnected)
        }
    }

    fn collect_sample(&mut self) -> Result<Vec<f64>, SourceError> {
        if !self.connected {
            return Err(SourceError::NotConnected);
        }
        if let Some(pacing) = self.pacing {
            thread::sleep(pacing);
        }
        if self.failures.front() == Some(&self.index) {
            self.failures.pop_front();
            return Err(SourceError::Timeout);
        }
        let row = (self.generator)(self.index).ok_or(SourceError::Exhausted)?;
        self.index += 1;
        Ok(row)
    }

    fn close(&mut self) -> Result<(), SourceError> {
        self.connected = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_rows_then_exhausted() {
        let mut source = ScriptedSource::from_rows(vec![vec![1.0], vec![2.0]]);
        assert!(matches!(
            source.collect_sample(),
            Err(SourceError::NotConnected)
        ));
        source.connect().unwrap();
        assert_eq!(source.collect_sample().unwrap(), vec![1.0]);
        assert_eq!(source.collect_sample().unwrap(), vec![2.0]);
        assert!(matches!(source.collect_sample(), Err(SourceError::Exhausted)));
    }

    #[test]
    fn test_scripted_failures_do_not_consume_rows() {
        let mut source =
            ScriptedSource::from_fn(|i| Some(vec![i as f64])).with_failures_at([1, 1, 0]);
        source.connect().unwrap();
        assert!(source.collect_sample().is_err());
        assert_eq!(source.collect_sample().unwrap(), vec![0.0]);
        assert!(source.collect_sample().is_err());
        assert!(source.collect_sample().is_err());
        assert_eq!(source.collect_sample().unwrap(), vec![1.0]);
    }

    #[test]
    fn test_connect_limit() {
        let mut source = ScriptedSource::from_rows(vec![]).with_connect_limit(1);
        assert!(source.connect().is_ok());
        source.close().unwrap();
        assert!(source.connect().is_err());
        assert!(!source.is_connected());
        assert_eq!(source.connect_count(), 2);
    }

    #[test]
    fn test_refusing_connect() {
        let mut source = ScriptedSource::from_rows(vec![]).refusing_connect();
        assert!(source.connect().is_err());
        assert!(!source.is_connected());
        assert_eq!(source.connect_count(), 1);
    }
}
