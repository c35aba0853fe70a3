use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, TryRecvError};

use crate::channel_model::{ChannelModel, ConvertedValue};
use crate::config::SessionConfig;
use crate::cycle_segmenter::{CycleSegmenter, SegmentStep};
use crate::display::{AxisTracker, DisplayWindow};
use crate::edge_detector::EdgeDetector;
use crate::notification::{Notification, NotificationSender};
use crate::session_store::{SessionRecord, SessionStore};
use crate::source::Sample;

/// Whether processing may continue after a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Continue,
    MonitoringEnded,
}

/// The synchronous core of the processing loop.
///
/// Converts samples, tracks the trigger, segments cycles and keeps the
/// display window and session log. It owns all of that state, so it needs no
/// locking; the loop around it only adds queue draining and display cadence.
pub struct Processor {
    model: ChannelModel,
    edges: Option<EdgeDetector>,
    segmenter: Option<CycleSegmenter>,
    window: DisplayWindow,
    axes: AxisTracker,
    store: SessionStore,
    monitoring_limit: Option<f64>,
    notifications: NotificationSender,
    dirty: bool,
}

impl Processor {
    pub fn new(config: &SessionConfig, notifications: NotificationSender) -> Self {
        let channels = config.channel_configs();
        let channel_count = channels.len();
        let model = ChannelModel::new(channels.clone(), &config.calibration);
        let edges = model
            .inductive_index()
            .map(|_| EdgeDetector::new(model.thresholds()));

        let (segmenter, window, monitoring_limit) = if config.cycle_mode {
            (
                Some(CycleSegmenter::new(
                    channel_count,
                    config.debounce.as_secs_f64(),
                )),
                DisplayWindow::unbounded(channel_count),
                None,
            )
        } else {
            (
                None,
                DisplayWindow::bounded(channel_count, config.display_points),
                Some(config.monitoring_duration.as_secs_f64()),
            )
        };

        Self {
            axes: AxisTracker::new(config.roles.clone(), config.tuning.axis_margin_factor),
            store: SessionStore::new(channels, config.cycle_mode),
            model,
            edges,
            segmenter,
            window,
            monitoring_limit,
            notifications,
            dirty: false,
        }
    }

    fn notify(&self, notification: Notification) {
        self.notifications.send(notification).ok();
    }

    /// Announce the initial state to the consumer.
    pub fn start(&self) {
        if self.segmenter.is_some() {
            self.notify(Notification::CycleWaiting);
        }
        self.notify(Notification::AxisRanges(self.axes.ranges()));
    }

    pub fn recorded(&self) -> usize {
        self.store.len()
    }

    pub fn window(&self) -> &DisplayWindow {
        &self.window
    }

    pub fn edge_detector(&self) -> Option<&EdgeDetector> {
        self.edges.as_ref()
    }

    pub fn segmenter(&self) -> Option<&CycleSegmenter> {
        self.segmenter.as_ref()
    }

    /// Run one sample through conversion, edge detection and segmentation.
    ///
    /// Panics if the sample does not match the configured channel count.
    pub fn process(&mut self, sample: &Sample) -> ProcessOutcome {
        let mut edge = None;
        let mut held = None;
        if let (Some(detector), Some(position)) = (&mut self.edges, self.model.inductive_index())
        {
            held = detector.state();
            edge = detector
                .update(sample.timestamp, sample.raw[position])
                .map(|e| e.direction);
        }

        let converted = self.model.convert(&sample.raw, held);
        let values: Vec<f64> = converted.iter().map(ConvertedValue::as_f64).collect();

        let Some(segmenter) = self.segmenter.as_mut() else {
            self.record(sample, None, sample.timestamp, converted, &values);
            return match self.monitoring_limit {
                Some(limit) if sample.timestamp > limit => ProcessOutcome::MonitoringEnded,
                _ => ProcessOutcome::Continue,
            };
        };

        match segmenter.step(sample.timestamp, edge, &values) {
            SegmentStep::Skip => {}
            SegmentStep::Record {
                cycle,
                local_time,
                started,
            } => {
                if started {
                    self.window.clear();
                    self.dirty = true;
                    self.notify(Notification::CycleStarted { cycle });
                }
                self.record(sample, Some(cycle), local_time, converted, &values);
            }
            SegmentStep::Ended(completed) => {
                self.notify(Notification::CycleEnded(completed));
            }
        }
        ProcessOutcome::Continue
    }

    fn record(
        &mut self,
        sample: &Sample,
        cycle: Option<u32>,
        time: f64,
        converted: Vec<ConvertedValue>,
        values: &[f64],
    ) {
        self.store.push(SessionRecord {
            cycle,
            time,
            converted,
            raw: sample.raw.clone(),
        });
        self.window.push(time, values);
        self.dirty = true;

        if self.axes.observe(values) {
            self.notify(Notification::AxisRanges(self.axes.ranges()));
        }
    }

    /// Send the display window, and the visible trigger edges outside cycle
    /// mode. Does nothing if the window has not changed since the last call.
    pub fn emit_snapshot(&mut self) {
        if !self.dirty {
            return;
        }
        self.dirty = false;
        self.notify(Notification::Snapshot(self.window.snapshot()));

        if self.segmenter.is_none() {
            if let (Some(detector), Some((visible_min, visible_max))) =
                (&self.edges, self.window.time_span())
            {
                if !detector.transitions().is_empty() {
                    self.notify(Notification::Annotations {
                        transitions: detector.transitions_between(visible_min, visible_max),
                        visible_min,
                        visible_max,
                    });
                }
            }
        }
    }

    /// Seal the session log and hand it to the consumer.
    pub fn finish(self) {
        let export = self.store.finish();
        log::info!("Session finished with {} recorded samples", export.len());
        self.notifications
            .send(Notification::SessionExport(export))
            .ok();
    }
}

/// Consumer loop. Sole reader of the sample queue.
pub struct ProcessingLoop {
    processor: Processor,
    queue: Receiver<Sample>,
    stop: Arc<AtomicBool>,
    batch_size: usize,
    idle_sleep: Duration,
    refresh_interval: Duration,
}

impl ProcessingLoop {
    pub fn spawn(
        config: &SessionConfig,
        queue: Receiver<Sample>,
        notifications: NotificationSender,
    ) -> ProcessingHandle {
        let stop = Arc::new(AtomicBool::new(false));
        let worker = Self {
            processor: Processor::new(config, notifications),
            queue,
            stop: Arc::clone(&stop),
            batch_size: config.tuning.batch_size.max(1),
            idle_sleep: config.tuning.consumer_idle_sleep,
            refresh_interval: config.refresh_interval,
        };
        let thread = thread::spawn(move || worker.run());

        ProcessingHandle {
            stop,
            thread: Some(thread),
        }
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    fn run(mut self) {
        let _span = tracing::info_span!("processing").entered();
        self.processor.start();
        let mut last_emit = Instant::now();

        'outer: while !self.stopped() {
            let mut processed = 0usize;
            while processed < self.batch_size {
                match self.queue.try_recv() {
                    Ok(sample) => {
                        processed += 1;
                        if self.processor.process(&sample) == ProcessOutcome::MonitoringEnded {
                            log::info!("Monitoring time ended at t={:.3}s", sample.timestamp);
                            self.processor.emit_snapshot();
                            self.processor
                                .notifications
                                .send(Notification::MonitoringEnded)
                                .ok();
                            break 'outer;
                        }
                        if self.stopped() {
                            break 'outer;
                        }
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        log::info!("Sample queue closed, ending processing");
                        break 'outer;
                    }
                }
            }

            #[cfg(feature = "cpu-profiling")]
            if let Some(client) = tracy_client::Client::running() {
                client.plot(tracy_client::plot_name!("batch_size"), processed as f64);
            }

            if last_emit.elapsed() >= self.refresh_interval {
                self.processor.emit_snapshot();
                last_emit = Instant::now();
            }

            if processed == 0 {
                thread::sleep(self.idle_sleep);
            }
        }

        self.processor.emit_snapshot();
        self.processor.finish();
    }
}

/// Control side of a running [`ProcessingLoop`].
///
/// The session export is sent from the loop's exit path, so it fires exactly
/// once however many times the loop is stopped.
pub struct ProcessingHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ProcessingHandle {
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop the loop and wait for it to deliver its export.
    pub fn join(&mut self) {
        self.stop();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Processing thread panicked");
            }
        }
    }
}

impl Drop for ProcessingHandle {
    fn drop(&mut self) {
        self.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel_model::ChannelRole;
    use crate::notification::NotificationReceiver;
    use crate::session_store::SessionExport;

    const HIGH: f64 = 30000.0;
    const LOW: f64 = 1000.0;

    fn temperature_and_trigger(cycle_mode: bool) -> SessionConfig {
        let mut config =
            SessionConfig::with_roles(vec![ChannelRole::Temperature, ChannelRole::Inductive]);
        config.cycle_mode = cycle_mode;
        config.sample_rate_hz = 10;
        config.display_points = 10;
        config
    }

    fn drain(rx: &NotificationReceiver) -> Vec<Notification> {
        rx.try_iter().collect()
    }

    fn export_of(notifications: &[Notification]) -> Vec<&SessionExport> {
        notifications
            .iter()
            .filter_map(|n| match n {
                Notification::SessionExport(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_six_second_cycle_at_ten_hertz() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut processor = Processor::new(&temperature_and_trigger(true), tx);
        processor.start();

        // 1 s LOW, 6 s HIGH, 3 s LOW
        for i in 0..100 {
            let t = f64::from(i) / 10.0;
            let trigger = if (10..70).contains(&i) { HIGH } else { LOW };
            let outcome = processor.process(&Sample::new(t, vec![1000.0, trigger]));
            assert_eq!(outcome, ProcessOutcome::Continue);
        }
        processor.finish();

        let notifications = drain(&rx);
        assert!(matches!(notifications[0], Notification::CycleWaiting));
        let started: Vec<u32> = notifications
            .iter()
            .filter_map(|n| match n {
                Notification::CycleStarted { cycle } => Some(*cycle),
                _ => None,
            })
            .collect();
        assert_eq!(started, vec![1]);

        let ended: Vec<_> = notifications
            .iter()
            .filter_map(|n| match n {
                Notification::CycleEnded(c) => Some(c),
                _ => None,
            })
            .collect();
        assert_eq!(ended.len(), 1);
        assert_eq!(ended[0].times.len(), 60);

        let exports = export_of(&notifications);
        assert_eq!(exports.len(), 1);
        let export = exports[0];
        assert_eq!(export.len(), 60);
        assert!(export.cycle_numbers().iter().all(|&c| c == 1));
        assert_eq!(export.times()[0], 0.0);
        assert!((export.times()[59] - 5.9).abs() < 1e-9);
        assert!(export.converted().iter().all(|row| row[1] == 1.0));
    }

    #[test]
    fn test_cycle_mode_records_only_inside_cycles() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut processor = Processor::new(&temperature_and_trigger(true), tx);

        let script = [
            (0.0, LOW),
            (1.0, HIGH),
            (2.0, HIGH),
            (3.0, HIGH),
            (4.0, LOW),
            (4.5, HIGH),
            (5.0, LOW),
            (6.5, HIGH),
            (7.0, HIGH),
        ];
        for (t, trigger) in script {
            processor.process(&Sample::new(t, vec![t, trigger]));
        }
        assert_eq!(processor.recorded(), 5);
        assert_eq!(processor.segmenter().unwrap().cycle_number(), 2);
        // Window holds only the running cycle.
        assert_eq!(processor.window().len(), 2);
        processor.finish();

        let notifications = drain(&rx);
        let export = export_of(&notifications)[0];
        assert_eq!(export.cycle_numbers(), vec![1, 1, 1, 2, 2]);
        assert_eq!(export.times(), vec![0.0, 1.0, 2.0, 0.0, 0.5]);
        assert_eq!(export.raw()[3], vec![6.5, HIGH]);
    }

    #[test]
    fn test_free_running_window_and_monitoring_end() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut config = temperature_and_trigger(false);
        config.monitoring_duration = Duration::from_secs(2);
        let mut processor = Processor::new(&config, tx);

        let mut outcome = ProcessOutcome::Continue;
        let mut fed = 0;
        while outcome == ProcessOutcome::Continue {
            let t = f64::from(fed) / 10.0;
            let trigger = if fed % 8 < 4 { LOW } else { HIGH };
            outcome = processor.process(&Sample::new(t, vec![f64::from(fed), trigger]));
            assert!(processor.window().len() <= 10);
            fed += 1;
        }
        assert_eq!(outcome, ProcessOutcome::MonitoringEnded);
        assert_eq!(fed, 22);
        assert_eq!(processor.recorded(), 22);

        let span = processor.window().time_span().unwrap();
        assert!((span.0 - 1.2).abs() < 1e-9);
        processor.emit_snapshot();
        processor.finish();

        let notifications = drain(&rx);
        let annotations = notifications.iter().find_map(|n| match n {
            Notification::Annotations {
                transitions,
                visible_min,
                visible_max,
            } => Some((transitions.clone(), *visible_min, *visible_max)),
            _ => None,
        });
        let (transitions, min, max) = annotations.unwrap();
        assert!(!transitions.is_empty());
        assert!(transitions
            .iter()
            .all(|t| t.timestamp >= min && t.timestamp <= max));

        let export = export_of(&notifications)[0];
        assert!(export.cycle_numbers().is_empty());
        assert!(!export.cycle_mode());
    }

    #[test]
    fn test_axis_updates_only_on_new_extremum() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut processor = Processor::new(&temperature_and_trigger(false), tx);
        for raw in [100.0, 200.0, 150.0, 150.0, 50.0] {
            processor.process(&Sample::new(0.0, vec![raw, LOW]));
        }
        let axis_updates = drain(&rx)
            .into_iter()
            .filter(|n| matches!(n, Notification::AxisRanges(_)))
            .count();
        assert_eq!(axis_updates, 3);
    }

    #[test]
    fn test_snapshot_only_when_changed() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut processor = Processor::new(&temperature_and_trigger(false), tx);
        processor.emit_snapshot();
        processor.process(&Sample::new(0.0, vec![1.0, LOW]));
        processor.emit_snapshot();
        processor.emit_snapshot();
        let snapshots = drain(&rx)
            .into_iter()
            .filter(|n| matches!(n, Notification::Snapshot(_)))
            .count();
        assert_eq!(snapshots, 1);
    }

    #[test]
    fn test_loop_stop_is_idempotent() {
        let (queue_tx, queue_rx) = crossbeam_channel::bounded(64);
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut handle = ProcessingLoop::spawn(&temperature_and_trigger(false), queue_rx, tx);

        for i in 0..5 {
            queue_tx
                .send(Sample::new(f64::from(i) * 0.1, vec![1.0, LOW]))
                .unwrap();
        }
        let deadline = Instant::now() + Duration::from_secs(2);
        while !queue_tx.is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        handle.stop();
        handle.stop();
        handle.join();
        handle.join();
        assert!(!handle.is_running());
        drop(handle);

        let notifications = drain(&rx);
        let exports = export_of(&notifications);
        assert_eq!(exports.len(), 1);
        assert_eq!(exports[0].len(), 5);
    }

    #[test]
    fn test_loop_ends_itself_after_monitoring_duration() {
        let (queue_tx, queue_rx) = crossbeam_channel::bounded(64);
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut config = temperature_and_trigger(false);
        config.monitoring_duration = Duration::from_millis(500);
        let mut handle = ProcessingLoop::spawn(&config, queue_rx, tx);

        for i in 0..10 {
            queue_tx
                .send(Sample::new(f64::from(i) * 0.1, vec![1.0, LOW]))
                .unwrap();
        }
        let deadline = Instant::now() + Duration::from_secs(2);
        while handle.is_running() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!handle.is_running());
        handle.join();

        let notifications = drain(&rx);
        assert!(notifications
            .iter()
            .any(|n| matches!(n, Notification::MonitoringEnded)));
        assert_eq!(export_of(&notifications)[0].len(), 7);
    }

    fn snapshot_lengths(notifications: &[Notification]) -> Vec<usize> {
        notifications
            .iter()
            .filter_map(|n| match n {
                Notification::Snapshot(snapshot) => Some(snapshot.times.len()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_loop_drains_at_most_one_batch_per_wake() {
        let (queue_tx, queue_rx) = crossbeam_channel::bounded(256);
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut config = temperature_and_trigger(false);
        config.display_points = 2000;
        config.refresh_interval = Duration::ZERO;
        config.tuning.batch_size = 20;

        for i in 0..100 {
            queue_tx
                .send(Sample::new(f64::from(i) * 0.01, vec![1.0, LOW]))
                .unwrap();
        }
        let mut handle = ProcessingLoop::spawn(&config, queue_rx, tx);

        let mut lengths = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(2);
        while lengths.last() != Some(&100) && Instant::now() < deadline {
            if let Ok(Notification::Snapshot(snapshot)) =
                rx.recv_timeout(Duration::from_millis(50))
            {
                lengths.push(snapshot.times.len());
            }
        }
        handle.join();

        // A snapshot after every wake shows the batch boundaries.
        assert_eq!(lengths, vec![20, 40, 60, 80, 100]);
    }

    #[test]
    fn test_snapshots_follow_refresh_interval() {
        let (queue_tx, queue_rx) = crossbeam_channel::bounded(1024);
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut config = temperature_and_trigger(false);
        config.display_points = 2000;
        config.refresh_interval = Duration::from_millis(100);
        let mut handle = ProcessingLoop::spawn(&config, queue_rx, tx);

        let samples = 300;
        for i in 0..samples {
            queue_tx
                .send(Sample::new(f64::from(i) * 0.002, vec![1.0, LOW]))
                .unwrap();
            thread::sleep(Duration::from_millis(2));
        }
        // Let one more refresh pick up the tail before stopping.
        thread::sleep(Duration::from_millis(250));
        handle.join();

        let notifications = drain(&rx);
        let lengths = snapshot_lengths(&notifications);
        assert!(lengths.len() >= 2, "only {} snapshots", lengths.len());
        assert!(lengths.len() < samples as usize / 5);
        assert!(lengths.windows(2).all(|w| w[1] > w[0] + 1), "{lengths:?}");
        assert_eq!(lengths.last(), Some(&(samples as usize)));
        assert_eq!(export_of(&notifications)[0].len(), samples as usize);
    }
}
