use crate::edge_detector::EdgeDirection;

/// Phase of the cycle state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    /// No cycle has started yet.
    Waiting,
    Active,
    /// Between cycles.
    Idle,
}

/// A finished cycle, handed out for archival rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedCycle {
    pub cycle: u32,
    /// Times relative to the cycle start.
    pub times: Vec<f64>,
    /// One series per channel.
    pub series: Vec<Vec<f64>>,
}

/// What the caller must do with the sample it just fed in.
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentStep {
    /// Not recorded.
    Skip,
    Record {
        cycle: u32,
        local_time: f64,
        /// This sample opened the cycle.
        started: bool,
    },
    /// The sample closed the cycle and is not recorded.
    Ended(CompletedCycle),
}

/// Turns trigger edges into numbered measurement cycles.
#[derive(Debug, Clone)]
pub struct CycleSegmenter {
    phase: CyclePhase,
    cycle_number: u32,
    cycle_start: f64,
    last_cycle_end: f64,
    debounce: f64,
    channel_count: usize,
    local_times: Vec<f64>,
    local_series: Vec<Vec<f64>>,
}

impl CycleSegmenter {
    /// `debounce` is the minimum number of seconds between the end of a cycle
    /// and the rising edge that may start the next one.
    pub fn new(channel_count: usize, debounce: f64) -> Self {
        Self {
            phase: CyclePhase::Waiting,
            cycle_number: 0,
            cycle_start: 0.0,
            last_cycle_end: 0.0,
            debounce,
            channel_count,
            local_times: Vec::new(),
            local_series: vec![Vec::new(); channel_count],
        }
    }

    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    /// Current cycle number, 0 until the first cycle starts.
    pub fn cycle_number(&self) -> u32 {
        self.cycle_number
    }

    pub fn cycle_start(&self) -> f64 {
        self.cycle_start
    }

    /// Feed one converted sample and the edge the trigger produced on it.
    pub fn step(
        &mut self,
        timestamp: f64,
        edge: Option<EdgeDirection>,
        values: &[f64],
    ) -> SegmentStep {
        match (self.phase, edge) {
            (CyclePhase::Waiting, Some(EdgeDirection::Rising)) => {
                self.begin_cycle(timestamp);
                self.record(timestamp, values, true)
            }
            (CyclePhase::Idle, Some(EdgeDirection::Rising)) => {
                if timestamp - self.last_cycle_end >= self.debounce {
                    self.begin_cycle(timestamp);
                    self.record(timestamp, values, true)
                } else {
                    log::debug!(
                        "Ignoring rising edge at t={:.3}s, {:.3}s after cycle {} ended",
                        timestamp,
                        timestamp - self.last_cycle_end,
                        self.cycle_number
                    );
                    SegmentStep::Skip
                }
            }
            (CyclePhase::Active, Some(EdgeDirection::Falling)) => {
                self.phase = CyclePhase::Idle;
                self.last_cycle_end = timestamp;
                log::info!(
                    "Cycle {} ended at t={:.3}s, duration={:.3}s",
                    self.cycle_number,
                    timestamp,
                    timestamp - self.cycle_start
                );
                SegmentStep::Ended(CompletedCycle {
                    cycle: self.cycle_number,
                    times: std::mem::take(&mut self.local_times),
                    series: std::mem::replace(
                        &mut self.local_series,
                        vec![Vec::new(); self.channel_count],
                    ),
                })
            }
            (CyclePhase::Active, _) => self.record(timestamp, values, false),
            (CyclePhase::Waiting | CyclePhase::Idle, _) => SegmentStep::Skip,
        }
    }

    fn begin_cycle(&mut self, timestamp: f64) {
        self.cycle_number += 1;
        self.cycle_start = timestamp;
        self.phase = CyclePhase::Active;
        self.local_times.clear();
        for series in &mut self.local_series {
            series.clear();
        }
        log::info!("Cycle {} started at t={:.3}s", self.cycle_number, timestamp);
    }

    fn record(&mut self, timestamp: f64, values: &[f64], started: bool) -> SegmentStep {
        let local_time = timestamp - self.cycle_start;
        self.local_times.push(local_time);
        for (series, value) in self.local_series.iter_mut().zip(values) {
            series.push(*value);
        }
        SegmentStep::Record {
            cycle: self.cycle_number,
            local_time,
            started,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(seg: &mut CycleSegmenter, t: f64, edge: Option<EdgeDirection>) -> SegmentStep {
        seg.step(t, edge, &[t, 1.0])
    }

    #[test]
    fn test_waiting_skips_until_rising() {
        let mut seg = CycleSegmenter::new(2, 2.0);
        assert_eq!(seg.phase(), CyclePhase::Waiting);
        assert_eq!(feed(&mut seg, 0.5, None), SegmentStep::Skip);
        assert_eq!(feed(&mut seg, 0.7, Some(EdgeDirection::Falling)), SegmentStep::Skip);
        assert_eq!(seg.cycle_number(), 0);
    }

    #[test]
    fn test_cycle_lifecycle_with_debounce() {
        let mut seg = CycleSegmenter::new(2, 2.0);

        assert_eq!(
            feed(&mut seg, 1.0, Some(EdgeDirection::Rising)),
            SegmentStep::Record {
                cycle: 1,
                local_time: 0.0,
                started: true
            }
        );

        for t in [2.0, 3.0, 3.5] {
            match feed(&mut seg, t, None) {
                SegmentStep::Record {
                    cycle, local_time, ..
                } => {
                    assert_eq!(cycle, 1);
                    assert!((local_time - (t - 1.0)).abs() < 1e-12);
                }
                other => panic!("unexpected step {other:?}"),
            }
        }

        let completed = match feed(&mut seg, 4.0, Some(EdgeDirection::Falling)) {
            SegmentStep::Ended(c) => c,
            other => panic!("unexpected step {other:?}"),
        };
        assert_eq!(completed.cycle, 1);
        assert_eq!(completed.times, vec![0.0, 1.0, 2.0, 2.5]);
        assert_eq!(completed.series.len(), 2);
        assert_eq!(completed.series[1], vec![1.0; 4]);
        assert_eq!(seg.phase(), CyclePhase::Idle);

        assert_eq!(feed(&mut seg, 4.2, None), SegmentStep::Skip);
        // 0.5 s after the end: debounced
        assert_eq!(feed(&mut seg, 4.5, Some(EdgeDirection::Rising)), SegmentStep::Skip);
        assert_eq!(feed(&mut seg, 5.0, Some(EdgeDirection::Falling)), SegmentStep::Skip);
        assert_eq!(seg.cycle_number(), 1);

        assert_eq!(
            feed(&mut seg, 6.5, Some(EdgeDirection::Rising)),
            SegmentStep::Record {
                cycle: 2,
                local_time: 0.0,
                started: true
            }
        );
        assert_eq!(seg.cycle_start(), 6.5);
    }

    #[test]
    fn test_new_cycle_series_starts_empty() {
        let mut seg = CycleSegmenter::new(2, 0.0);
        feed(&mut seg, 0.0, Some(EdgeDirection::Rising));
        feed(&mut seg, 0.1, None);
        feed(&mut seg, 0.2, Some(EdgeDirection::Falling));
        feed(&mut seg, 0.3, Some(EdgeDirection::Rising));
        match feed(&mut seg, 0.4, Some(EdgeDirection::Falling)) {
            SegmentStep::Ended(c) => {
                assert_eq!(c.cycle, 2);
                assert_eq!(c.times.len(), 1);
            }
            other => panic!("unexpected step {other:?}"),
        }
    }
}
