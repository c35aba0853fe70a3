use std::thread;

use crossbeam_channel::{Receiver, Sender};

use crate::acquisition::{AcquisitionHandle, AcquisitionLoop, AcquisitionTuning};
use crate::config::{ConfigError, SessionConfig};
use crate::edge_detector::DigitalLevel;
use crate::notification::NotificationSender;
use crate::processing::{ProcessingHandle, ProcessingLoop};
use crate::source::{AcquisitionSource, Sample};

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Could not connect to the DAQ device")]
    ConnectionFailed,

    #[error("No DAQ source to connect")]
    NoSource,

    #[error("Acquisition has stopped; reconnect before starting a session")]
    AcquisitionStopped,

    #[error("A session is already running")]
    SessionActive,

    #[error("Trigger is HIGH (raw {raw}); wait for it to drop before starting")]
    TriggerHigh { raw: f64 },

    #[error("Pre-flight read failed: {0}")]
    Probe(String),

    #[error("Device did not come back after {attempts} reconnect attempts")]
    ReconnectFailed { attempts: u32 },
}

/// Wires the acquisition and processing loops together and runs sessions.
///
/// The device connection outlives sessions: one acquisition loop serves any
/// number of consecutive processing loops, each of which delivers its own
/// session export when it stops.
pub struct Monitor<S: AcquisitionSource + 'static> {
    config: SessionConfig,
    acquisition: Option<AcquisitionHandle<S>>,
    processing: Option<ProcessingHandle>,
    /// Source handed back by an acquisition loop that has stopped.
    spare: Option<S>,
    queue_tx: Sender<Sample>,
    queue_rx: Receiver<Sample>,
    notifications: NotificationSender,
}

impl<S: AcquisitionSource + 'static> Monitor<S> {
    /// Validate `config` and prepare the sample queue. Nothing is connected yet.
    pub fn new(
        config: SessionConfig,
        notifications: NotificationSender,
    ) -> Result<Self, MonitorError> {
        config.validate()?;
        let capacity = config.tuning.queue_capacity.max(1);
        let (queue_tx, queue_rx) = crossbeam_channel::bounded(capacity);
        Ok(Self {
            config,
            acquisition: None,
            processing: None,
            spare: None,
            queue_tx,
            queue_rx,
            notifications,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Spawn an acquisition loop on `source` and wait for it to connect.
    ///
    /// Any session is stopped first. The source of a previous acquisition
    /// loop is closed and handed back. On failure the new source is kept so
    /// [`Monitor::retry_connect`] can try again.
    pub fn connect(&mut self, source: S) -> Result<Option<S>, MonitorError> {
        self.stop_session();
        let replaced = match self.acquisition.take() {
            Some(old) => old.join(),
            None => self.spare.take(),
        };
        if replaced.is_some() {
            log::debug!("Replacing previous DAQ source");
        }

        let handle = AcquisitionLoop::spawn(
            source,
            self.config.device_settings(),
            AcquisitionTuning::from(&self.config.tuning),
            self.queue_tx.clone(),
            self.notifications.clone(),
        );

        if handle.wait_connected(self.config.tuning.command_timeout) {
            self.acquisition = Some(handle);
            Ok(replaced)
        } else {
            if replaced.is_some() {
                log::warn!("Previous DAQ source dropped after a failed connect");
            }
            self.spare = handle.join();
            Err(MonitorError::ConnectionFailed)
        }
    }

    /// Bring the device link back after a failed connect, a failed
    /// reconnect or a fatal read error.
    ///
    /// A live acquisition loop that lost its link is asked to reopen the
    /// device; a stopped one is replaced by a fresh loop on the same source.
    /// Does nothing if the link is up.
    pub fn retry_connect(&mut self) -> Result<(), MonitorError> {
        if self.is_connected() {
            return Ok(());
        }
        log::info!("Retrying DAQ connection");

        if let Some(acquisition) = self.acquisition.as_ref().filter(|a| a.is_running()) {
            return if acquisition.reconnect(self.config.tuning.command_timeout) {
                Ok(())
            } else {
                Err(MonitorError::ConnectionFailed)
            };
        }

        if let Some(dead) = self.acquisition.take() {
            self.spare = dead.join();
        }
        let source = self.spare.take().ok_or(MonitorError::NoSource)?;
        self.connect(source).map(|_| ())
    }

    /// True while the acquisition loop holds an open device connection.
    pub fn is_connected(&self) -> bool {
        self.acquisition
            .as_ref()
            .is_some_and(AcquisitionHandle::is_linked)
    }

    pub fn is_session_active(&self) -> bool {
        self.processing
            .as_ref()
            .is_some_and(ProcessingHandle::is_running)
    }

    /// Start a processing loop and begin reading.
    ///
    /// In cycle mode the trigger must read LOW first, otherwise the first
    /// cycle would start mid-stroke.
    pub fn start_session(&mut self) -> Result<(), MonitorError> {
        if self.is_session_active() {
            return Err(MonitorError::SessionActive);
        }
        if let Some(mut finished) = self.processing.take() {
            finished.join();
        }

        let acquisition = self
            .acquisition
            .as_ref()
            .filter(|a| a.is_linked())
            .ok_or(MonitorError::AcquisitionStopped)?;
        let timeout = self.config.tuning.command_timeout;

        if self.config.cycle_mode {
            check_trigger_low(&self.config, acquisition)?;
        }

        let stale = self.queue_rx.try_iter().count();
        if stale > 0 {
            log::debug!("Discarded {} stale samples", stale);
        }

        self.processing = Some(ProcessingLoop::spawn(
            &self.config,
            self.queue_rx.clone(),
            self.notifications.clone(),
        ));
        if !acquisition.start_reading(timeout) {
            log::warn!("Acquisition refused to start reading");
            self.stop_session();
            return Err(MonitorError::AcquisitionStopped);
        }
        log::info!(
            "Session started ({} mode)",
            if self.config.cycle_mode { "cycle" } else { "continuous" }
        );
        Ok(())
    }

    /// Stop reading and end the session. The session export is sent once,
    /// however often this is called.
    ///
    /// Returns after the acquisition loop has acknowledged the stop, so no
    /// sample of this session can reach the queue afterwards.
    pub fn stop_session(&mut self) {
        if let Some(acquisition) = self.acquisition.as_ref().filter(|a| a.is_running()) {
            if !acquisition.stop_reading(self.config.tuning.command_timeout) {
                log::warn!("Acquisition did not acknowledge stop");
            }
        }
        if let Some(mut processing) = self.processing.take() {
            processing.join();
            log::info!("Session stopped");
        }
    }

    /// End the current session and start a fresh one on the same connection.
    pub fn next_session(&mut self) -> Result<(), MonitorError> {
        self.stop_session();

        let acquisition = self
            .acquisition
            .as_ref()
            .ok_or(MonitorError::AcquisitionStopped)?;
        let tuning = &self.config.tuning;
        let attempts = tuning.reconnect_attempts.max(1);

        let mut reconnected = false;
        for attempt in 1..=attempts {
            if acquisition.reconnect(tuning.command_timeout) {
                reconnected = true;
                break;
            }
            log::warn!("Reconnect attempt {}/{} failed", attempt, attempts);
            if attempt < attempts {
                thread::sleep(tuning.reconnect_delay);
            }
        }
        if !reconnected {
            return Err(MonitorError::ReconnectFailed { attempts });
        }

        self.start_session()
    }

    /// Stop everything and hand the source back.
    pub fn shutdown(mut self) -> Option<S> {
        self.stop_session();
        match self.acquisition.take() {
            Some(acquisition) => acquisition.join(),
            None => self.spare.take(),
        }
    }
}

impl<S: AcquisitionSource + 'static> Drop for Monitor<S> {
    fn drop(&mut self) {
        self.stop_session();
    }
}

fn check_trigger_low<S>(
    config: &SessionConfig,
    acquisition: &AcquisitionHandle<S>,
) -> Result<(), MonitorError> {
    let Some(position) = config.inductive_position() else {
        return Ok(());
    };
    let sample = acquisition
        .probe(config.tuning.command_timeout)
        .map_err(MonitorError::Probe)?;
    let raw = sample
        .get(position)
        .copied()
        .ok_or_else(|| MonitorError::Probe(format!("no value for channel {position}")))?;

    if config.calibration.thresholds().classify(raw) == Some(DigitalLevel::High) {
        log::warn!("Refusing to start: trigger is HIGH (raw {})", raw);
        return Err(MonitorError::TriggerHigh { raw });
    }
    Ok(())
}
