use crossbeam_channel::{Receiver, Sender};

use crate::cycle_segmenter::CompletedCycle;
use crate::display::{AxisRanges, DisplaySnapshot};
use crate::edge_detector::TransitionEvent;
use crate::session_store::SessionExport;

/// Everything the pipeline tells its presentation consumer.
#[derive(Debug, Clone)]
pub enum Notification {
    /// The device connection came up or went away.
    Connection { connected: bool },
    /// Connecting failed. After the first attempt this also means the
    /// acquisition loop has stopped.
    ConnectionFailed { reason: String },
    /// Too many consecutive read failures; the acquisition loop has stopped.
    ReadError {
        consecutive_failures: u32,
        last_error: String,
    },
    Snapshot(DisplaySnapshot),
    AxisRanges(AxisRanges),
    /// Trigger edges inside the visible time range (non-cycle mode only).
    Annotations {
        transitions: Vec<TransitionEvent>,
        visible_min: f64,
        visible_max: f64,
    },
    CycleWaiting,
    CycleStarted { cycle: u32 },
    CycleEnded(CompletedCycle),
    /// The configured monitoring duration has elapsed.
    MonitoringEnded,
    /// Sent exactly once when a processing loop terminates.
    SessionExport(SessionExport),
}

pub type NotificationSender = Sender<Notification>;
pub type NotificationReceiver = Receiver<Notification>;

/// Unbounded channel for notifications. The pipeline never blocks on its consumer.
pub fn notification_channel() -> (NotificationSender, NotificationReceiver) {
    crossbeam_channel::unbounded()
}
