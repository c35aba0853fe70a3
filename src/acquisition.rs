use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{
    bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender, TryRecvError,
};

use crate::config::PipelineTuning;
use crate::notification::{Notification, NotificationSender};
use crate::source::{AcquisitionSource, DeviceSettings, Sample, SourceError};

/// Requests the orchestrator sends to a running acquisition loop.
#[derive(Debug)]
pub enum AcquisitionCommand {
    /// Begin a reading run. Answers false unless the device is connected.
    StartReading(Sender<bool>),
    /// Stop reading but keep the device connection. Answered once no further
    /// sample of the run will be enqueued.
    StopReading(Sender<()>),
    /// Read one sample outside a reading run and send it back.
    Probe(Sender<Result<Vec<f64>, String>>),
    /// Close and reopen the device, reporting whether it came back.
    Reconnect(Sender<bool>),
    Disconnect,
    Terminate,
}

/// Connection lifecycle of the acquisition loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    Reading,
    Stopped,
}

/// Timing policies of the producer side.
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionTuning {
    pub enqueue_timeout: Duration,
    pub read_backoff: Duration,
    pub max_consecutive_failures: u32,
    pub idle_poll: Duration,
}

impl From<&PipelineTuning> for AcquisitionTuning {
    fn from(tuning: &PipelineTuning) -> Self {
        Self {
            enqueue_timeout: tuning.enqueue_timeout,
            read_backoff: tuning.read_backoff,
            max_consecutive_failures: tuning.max_consecutive_failures,
            idle_poll: tuning.idle_poll,
        }
    }
}

impl Default for AcquisitionTuning {
    fn default() -> Self {
        Self::from(&PipelineTuning::default())
    }
}

enum ReadOutcome {
    Paused,
    Disconnect,
    Terminate,
    Fatal { failures: u32, last_error: String },
}

/// Producer loop. Sole owner of the device and sole writer of the sample queue.
pub struct AcquisitionLoop<S> {
    source: S,
    settings: DeviceSettings,
    tuning: AcquisitionTuning,
    queue: Sender<Sample>,
    commands: Receiver<AcquisitionCommand>,
    notifications: NotificationSender,
    connected: Sender<bool>,
    linked: Arc<AtomicBool>,
    state: LinkState,
}

impl<S: AcquisitionSource + 'static> AcquisitionLoop<S> {
    /// Start the loop on its own thread. It connects right away; a failed
    /// first connection stops the loop.
    pub fn spawn(
        source: S,
        settings: DeviceSettings,
        tuning: AcquisitionTuning,
        queue: Sender<Sample>,
        notifications: NotificationSender,
    ) -> AcquisitionHandle<S> {
        let (command_tx, command_rx) = crossbeam_channel::unbounded();
        let (connected_tx, connected_rx) = bounded(1);
        let linked = Arc::new(AtomicBool::new(false));

        let worker = Self {
            source,
            settings,
            tuning,
            queue,
            commands: command_rx,
            notifications,
            connected: connected_tx,
            linked: Arc::clone(&linked),
            state: LinkState::Disconnected,
        };
        let thread = thread::spawn(move || worker.run());

        AcquisitionHandle {
            commands: command_tx,
            connected: connected_rx,
            linked,
            thread: Some(thread),
        }
    }

    fn run(mut self) -> S {
        let _span = tracing::info_span!("acquisition").entered();

        let connected = self.open();
        self.connected.send(connected).ok();
        if !connected {
            self.set_state(LinkState::Stopped);
            return self.source;
        }

        loop {
            if self.state == LinkState::Reading {
                match self.read_until_interrupted() {
                    ReadOutcome::Paused => self.set_state(LinkState::Connected),
                    ReadOutcome::Disconnect => self.disconnect(),
                    ReadOutcome::Terminate => break,
                    ReadOutcome::Fatal {
                        failures,
                        last_error,
                    } => {
                        log::error!(
                            "Giving up after {} consecutive read failures: {}",
                            failures,
                            last_error
                        );
                        self.notifications
                            .send(Notification::ReadError {
                                consecutive_failures: failures,
                                last_error,
                            })
                            .ok();
                        break;
                    }
                }
                continue;
            }

            match self.commands.recv_timeout(self.tuning.idle_poll) {
                Ok(AcquisitionCommand::Terminate) | Err(RecvTimeoutError::Disconnected) => break,
                Ok(command) => self.handle_idle(command),
                Err(RecvTimeoutError::Timeout) => {}
            }
        }

        self.disconnect();
        self.set_state(LinkState::Stopped);
        self.source
    }

    fn set_state(&mut self, state: LinkState) {
        if self.state != state {
            log::debug!("Acquisition {:?} -> {:?}", self.state, state);
            self.state = state;
            self.linked.store(
                matches!(state, LinkState::Connected | LinkState::Reading),
                Ordering::Release,
            );
        }
    }

    fn open(&mut self) -> bool {
        self.set_state(LinkState::Connecting);
        let result = self
            .source
            .connect()
            .and_then(|()| self.source.configure(&self.settings));

        match result {
            Ok(()) => {
                log::info!("DAQ connected");
                self.set_state(LinkState::Connected);
                self.notifications
                    .send(Notification::Connection { connected: true })
                    .ok();
                true
            }
            Err(e) => {
                log::error!("DAQ connection error: {}", e);
                self.source.close().ok();
                self.set_state(LinkState::Disconnected);
                self.notifications
                    .send(Notification::ConnectionFailed {
                        reason: e.to_string(),
                    })
                    .ok();
                false
            }
        }
    }

    fn disconnect(&mut self) {
        if matches!(self.state, LinkState::Connected | LinkState::Reading) {
            if let Err(e) = self.source.close() {
                log::warn!("Error closing DAQ: {}", e);
            }
            self.set_state(LinkState::Disconnected);
            self.notifications
                .send(Notification::Connection { connected: false })
                .ok();
        }
    }

    fn handle_idle(&mut self, command: AcquisitionCommand) {
        match command {
            AcquisitionCommand::StartReading(reply) => {
                let ok = self.state == LinkState::Connected;
                if ok {
                    self.set_state(LinkState::Reading);
                } else {
                    log::warn!("Cannot start reading while {:?}", self.state);
                }
                reply.send(ok).ok();
            }
            AcquisitionCommand::StopReading(reply) => {
                reply.send(()).ok();
            }
            AcquisitionCommand::Probe(reply) => {
                let result = if self.state == LinkState::Connected {
                    self.source.collect_sample().map_err(|e| e.to_string())
                } else {
                    Err(SourceError::NotConnected.to_string())
                };
                reply.send(result).ok();
            }
            AcquisitionCommand::Reconnect(reply) => {
                self.disconnect();
                let ok = self.open();
                reply.send(ok).ok();
            }
            AcquisitionCommand::Disconnect => self.disconnect(),
            AcquisitionCommand::Terminate => {}
        }
    }

    fn read_until_interrupted(&mut self) -> ReadOutcome {
        let started = Instant::now();
        let expected = self.settings.channels.len();
        let max_failures = self.tuning.max_consecutive_failures;
        let mut failures = 0u32;
        log::info!("Reading started");

        loop {
            match self.commands.try_recv() {
                Ok(AcquisitionCommand::StopReading(reply)) => {
                    reply.send(()).ok();
                    return ReadOutcome::Paused;
                }
                Ok(AcquisitionCommand::Disconnect) => return ReadOutcome::Disconnect,
                Ok(AcquisitionCommand::Terminate) | Err(TryRecvError::Disconnected) => {
                    return ReadOutcome::Terminate
                }
                Ok(AcquisitionCommand::Probe(reply)) => {
                    reply.send(Err("busy reading".to_string())).ok();
                }
                Ok(AcquisitionCommand::Reconnect(reply)) => {
                    reply.send(false).ok();
                }
                Ok(AcquisitionCommand::StartReading(reply)) => {
                    reply.send(true).ok();
                }
                Err(TryRecvError::Empty) => {}
            }

            let (error, backoff) = match self.source.collect_sample() {
                Ok(raw) if raw.len() == expected => {
                    let sample = Sample::new(started.elapsed().as_secs_f64(), raw);
                    match self.queue.send_timeout(sample, self.tuning.enqueue_timeout) {
                        Ok(()) => {
                            failures = 0;
                            continue;
                        }
                        Err(SendTimeoutError::Timeout(_)) => {
                            ("sample queue full, sample dropped".to_string(), false)
                        }
                        Err(SendTimeoutError::Disconnected(_)) => {
                            log::warn!("Sample queue closed, pausing reads");
                            return ReadOutcome::Paused;
                        }
                    }
                }
                Ok(raw) => (
                    SourceError::ChannelCount {
                        expected,
                        actual: raw.len(),
                    }
                    .to_string(),
                    true,
                ),
                Err(e) => (e.to_string(), true),
            };

            failures += 1;
            log::warn!("Read failure {}/{}: {}", failures, max_failures, error);
            if failures >= max_failures {
                return ReadOutcome::Fatal {
                    failures,
                    last_error: error,
                };
            }
            if backoff {
                thread::sleep(self.tuning.read_backoff);
            }
        }
    }
}

/// Control side of a running [`AcquisitionLoop`].
pub struct AcquisitionHandle<S> {
    commands: Sender<AcquisitionCommand>,
    connected: Receiver<bool>,
    linked: Arc<AtomicBool>,
    thread: Option<JoinHandle<S>>,
}

impl<S> AcquisitionHandle<S> {
    /// Wait for the outcome of the first connection attempt.
    ///
    /// Returns the outcome only once; later calls return false.
    pub fn wait_connected(&self, timeout: Duration) -> bool {
        self.connected.recv_timeout(timeout).unwrap_or(false)
    }

    fn send(&self, command: AcquisitionCommand) -> bool {
        self.commands.send(command).is_ok()
    }

    /// Send a command carrying a reply channel and wait for the answer.
    fn request<T>(
        &self,
        command: impl FnOnce(Sender<T>) -> AcquisitionCommand,
        timeout: Duration,
    ) -> Option<T> {
        let (reply_tx, reply_rx) = bounded(1);
        if !self.send(command(reply_tx)) {
            return None;
        }
        reply_rx.recv_timeout(timeout).ok()
    }

    /// Begin reading. False if the device is not connected or did not answer.
    pub fn start_reading(&self, timeout: Duration) -> bool {
        self.request(AcquisitionCommand::StartReading, timeout)
            .unwrap_or(false)
    }

    /// Pause reading. Once this returns true the loop enqueues nothing more
    /// until reading is started again.
    pub fn stop_reading(&self, timeout: Duration) -> bool {
        self.request(AcquisitionCommand::StopReading, timeout)
            .is_some()
    }

    pub fn disconnect(&self) -> bool {
        self.send(AcquisitionCommand::Disconnect)
    }

    /// Reopen the device. False if it did not come back within `timeout`.
    pub fn reconnect(&self, timeout: Duration) -> bool {
        self.request(AcquisitionCommand::Reconnect, timeout)
            .unwrap_or(false)
    }

    /// Read one sample while connected but not reading.
    pub fn probe(&self, timeout: Duration) -> Result<Vec<f64>, String> {
        self.request(AcquisitionCommand::Probe, timeout)
            .unwrap_or_else(|| Err("acquisition loop did not answer".to_string()))
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// True while the loop is alive and holds an open device connection.
    pub fn is_linked(&self) -> bool {
        self.is_running() && self.linked.load(Ordering::Acquire)
    }

    pub fn terminate(&self) {
        self.send(AcquisitionCommand::Terminate);
    }

    /// Stop the loop and take the source back. `None` if the thread panicked.
    pub fn join(mut self) -> Option<S> {
        self.terminate();
        self.thread.take()?.join().ok()
    }
}

impl<S> Drop for AcquisitionHandle<S> {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.terminate();
        }
    }
}
