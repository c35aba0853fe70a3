//! # DAQ Monitor
//!
//! A Rust library for continuous multi-channel monitoring with serial data
//! acquisition devices.
//!
//! Raw ADC codes flow through a two-thread pipeline: an acquisition loop
//! reads the device and fills a bounded queue, and a processing loop converts
//! the codes to engineering units, tracks a digital trigger channel, splits the
//! stream into measurement cycles and keeps a display window plus a complete
//! session log.
//!
//! ## Features
//!
//! - **Channel roles**: temperature, pressure and inductive trigger channels with
//!   per-role linear calibration
//! - **Trigger tracking**: hysteresis edge detection on the inductive channel
//! - **Cycle segmentation**: numbered cycles with debounce between them
//! - **Bounded queue**: the producer never blocks on a slow consumer; samples are
//!   dropped and counted as failures instead
//! - **DataFrame output**: session logs export to `polars` frames and CSV
//! - **Device discovery**: `serialport`-based enumeration of USB DAQ adapters
//!
//! ## Examples
//!
//! ### Running a session
//!
//! ```rust,no_run
//! use daq_monitor::{DaqConnector, DeviceFilter, Monitor, Notification, SessionConfig};
//! use daq_monitor::notification::notification_channel;
//!
//! let daq = DaqConnector::locate(None, &DeviceFilter::default())?;
//! let (tx, rx) = notification_channel();
//!
//! let mut monitor = Monitor::new(SessionConfig::default(), tx)?;
//! monitor.connect(daq)?;
//! monitor.start_session()?;
//!
//! for notification in rx.iter() {
//!     match notification {
//!         Notification::CycleEnded(cycle) => {
//!             println!("Cycle {} captured {} samples", cycle.cycle, cycle.times.len());
//!             monitor.stop_session();
//!         }
//!         Notification::SessionExport(export) => {
//!             export.write_csv("session.csv")?;
//!             break;
//!         }
//!         _ => {}
//!     }
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ### Processing without threads
//!
//! ```rust
//! use daq_monitor::{ChannelRole, Notification, Processor, Sample, SessionConfig};
//!
//! let config = SessionConfig::with_roles(vec![ChannelRole::Temperature, ChannelRole::Inductive]);
//! let (tx, rx) = crossbeam_channel::unbounded();
//! let mut processor = Processor::new(&config, tx);
//!
//! processor.process(&Sample::new(0.0, vec![1000.0, 0.0]));
//! processor.process(&Sample::new(0.1, vec![1000.0, 30000.0]));
//!
//! assert!(rx.try_iter().any(|n| matches!(n, Notification::CycleStarted { cycle: 1 })));
//! ```
//!
//! ### Device Discovery
//!
//! ```rust,no_run
//! use daq_monitor::{DaqConnector, DeviceFilter};
//!
//! for device in DaqConnector::available_devices(&DeviceFilter::any_usb())? {
//!     println!("Found device: {} at {}", device.name, device.port);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod acquisition;
pub mod channel_model;
pub mod config;
pub mod cycle_segmenter;
pub mod daq_connector;
pub mod display;
pub mod edge_detector;
pub mod monitor;
pub mod notification;
pub mod processing;
pub mod serial_daq;
pub mod session_store;
pub mod source;

// Re-export the main types for convenience
pub use channel_model::{Calibration, ChannelConfig, ChannelModel, ChannelRole, ConvertedValue};

pub use edge_detector::{DigitalLevel, EdgeDetector, EdgeDirection, Thresholds, TransitionEvent};

pub use cycle_segmenter::{CompletedCycle, CyclePhase, CycleSegmenter, SegmentStep};

pub use display::{AxisRanges, AxisTracker, DisplaySnapshot, DisplayWindow};

pub use session_store::{ExportError, SessionExport, SessionRecord, SessionStore};

pub use source::{AcquisitionSource, DeviceSettings, Sample, ScriptedSource, SourceError};

pub use serial_daq::SerialDaq;

pub use daq_connector::{DaqConnector, DaqConnectorError, DaqDevice, DeviceFilter};

pub use config::{ConfigError, PipelineTuning, SessionConfig};

pub use notification::Notification;

pub use acquisition::{AcquisitionHandle, AcquisitionLoop, LinkState};

pub use processing::{ProcessOutcome, ProcessingHandle, ProcessingLoop, Processor};

pub use monitor::{Monitor, MonitorError};
