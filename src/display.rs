use std::collections::VecDeque;

use crate::channel_model::ChannelRole;

/// Contents of the display window at one point in time.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DisplaySnapshot {
    pub times: Vec<f64>,
    /// One series per channel, aligned with `times`.
    pub series: Vec<Vec<f64>>,
}

/// Recent samples kept for display.
///
/// Bounded windows evict the oldest entry once full. Unbounded windows grow
/// until cleared, which is how a cycle is shown in full.
#[derive(Debug, Clone)]
pub struct DisplayWindow {
    times: VecDeque<f64>,
    values: Vec<VecDeque<f64>>,
    capacity: Option<usize>,
}

impl DisplayWindow {
    pub fn bounded(channel_count: usize, capacity: usize) -> Self {
        Self {
            times: VecDeque::with_capacity(capacity),
            values: (0..channel_count)
                .map(|_| VecDeque::with_capacity(capacity))
                .collect(),
            capacity: Some(capacity),
        }
    }

    pub fn unbounded(channel_count: usize) -> Self {
        Self {
            times: VecDeque::new(),
            values: vec![VecDeque::new(); channel_count],
            capacity: None,
        }
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn push(&mut self, time: f64, values: &[f64]) {
        if let Some(capacity) = self.capacity {
            if self.times.len() == capacity {
                self.times.pop_front();
                for channel in &mut self.values {
                    channel.pop_front();
                }
            }
        }
        self.times.push_back(time);
        for (channel, value) in self.values.iter_mut().zip(values) {
            channel.push_back(*value);
        }
    }

    pub fn clear(&mut self) {
        self.times.clear();
        for channel in &mut self.values {
            channel.clear();
        }
    }

    /// First and last time currently held.
    pub fn time_span(&self) -> Option<(f64, f64)> {
        Some((*self.times.front()?, *self.times.back()?))
    }

    pub fn snapshot(&self) -> DisplaySnapshot {
        DisplaySnapshot {
            times: self.times.iter().copied().collect(),
            series: self
                .values
                .iter()
                .map(|channel| channel.iter().copied().collect())
                .collect(),
        }
    }
}

/// Suggested y-axis limits, one pair per channel.
#[derive(Debug, Clone, PartialEq)]
pub struct AxisRanges {
    pub mins: Vec<f64>,
    pub maxs: Vec<f64>,
}

/// Historical per-channel extrema, used to size display axes.
#[derive(Debug, Clone)]
pub struct AxisTracker {
    roles: Vec<ChannelRole>,
    mins: Vec<f64>,
    maxs: Vec<f64>,
    margin_factor: f64,
}

impl AxisTracker {
    pub fn new(roles: Vec<ChannelRole>, margin_factor: f64) -> Self {
        let n = roles.len();
        Self {
            roles,
            mins: vec![f64::INFINITY; n],
            maxs: vec![f64::NEG_INFINITY; n],
            margin_factor,
        }
    }

    /// Fold one sample in. Returns true when any extremum moved.
    pub fn observe(&mut self, values: &[f64]) -> bool {
        let mut updated = false;
        for (i, &value) in values.iter().enumerate().take(self.roles.len()) {
            if self.roles[i] == ChannelRole::Inductive {
                continue;
            }
            if value < self.mins[i] {
                self.mins[i] = value;
                updated = true;
            }
            if value > self.maxs[i] {
                self.maxs[i] = value;
                updated = true;
            }
        }
        updated
    }

    pub fn ranges(&self) -> AxisRanges {
        let (mins, maxs) = self
            .roles
            .iter()
            .enumerate()
            .map(|(i, role)| self.range_for(i, *role))
            .unzip();
        AxisRanges { mins, maxs }
    }

    fn range_for(&self, i: usize, role: ChannelRole) -> (f64, f64) {
        if role == ChannelRole::Inductive || !self.mins[i].is_finite() {
            return role.fallback_range();
        }
        let (min, max) = (self.mins[i], self.maxs[i]);
        let span = max - min;
        let margin = if span == 0.0 {
            if max == 0.0 {
                1.0
            } else {
                max.abs() * 0.1
            }
        } else {
            span * (self.margin_factor - 1.0) / 2.0
        };
        (min - margin, max + margin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounded_window_evicts_oldest_first() {
        let mut w = DisplayWindow::bounded(2, 3);
        for i in 0..5 {
            let t = f64::from(i);
            w.push(t, &[t * 10.0, -t]);
            assert!(w.len() <= 3);
        }
        let snap = w.snapshot();
        assert_eq!(snap.times, vec![2.0, 3.0, 4.0]);
        assert_eq!(snap.series[0], vec![20.0, 30.0, 40.0]);
        assert_eq!(snap.series[1], vec![-2.0, -3.0, -4.0]);
        assert_eq!(w.time_span(), Some((2.0, 4.0)));
    }

    #[test]
    fn test_unbounded_window_grows_until_cleared() {
        let mut w = DisplayWindow::unbounded(1);
        for i in 0..1000 {
            w.push(f64::from(i), &[0.0]);
        }
        assert_eq!(w.len(), 1000);
        w.clear();
        assert!(w.is_empty());
        assert_eq!(w.time_span(), None);
        assert_eq!(w.snapshot().series, vec![Vec::<f64>::new()]);
    }

    #[test]
    fn test_axis_fallbacks_before_data() {
        let tracker = AxisTracker::new(
            vec![
                ChannelRole::Temperature,
                ChannelRole::Pressure,
                ChannelRole::Inductive,
            ],
            1.2,
        );
        let ranges = tracker.ranges();
        assert_eq!(ranges.mins, vec![0.0, 0.0, 0.0]);
        assert_eq!(ranges.maxs, vec![100.0, 10.0, 1.0]);
    }

    #[test]
    fn test_axis_updates_only_on_new_extremum() {
        let mut tracker =
            AxisTracker::new(vec![ChannelRole::Temperature, ChannelRole::Inductive], 1.2);
        assert!(tracker.observe(&[20.0, 1.0]));
        assert!(tracker.observe(&[30.0, 0.0]));
        assert!(!tracker.observe(&[25.0, 1.0]));
        assert!(!tracker.observe(&[25.0, 0.0]));

        let ranges = tracker.ranges();
        assert!((ranges.mins[0] - 19.0).abs() < 1e-9);
        assert!((ranges.maxs[0] - 31.0).abs() < 1e-9);
        assert_eq!((ranges.mins[1], ranges.maxs[1]), (0.0, 1.0));
    }

    #[test]
    fn test_axis_flat_signal_margin() {
        let mut tracker = AxisTracker::new(vec![ChannelRole::Pressure], 1.2);
        tracker.observe(&[5.0]);
        let ranges = tracker.ranges();
        assert!((ranges.mins[0] - 4.5).abs() < 1e-9);
        assert!((ranges.maxs[0] - 5.5).abs() < 1e-9);

        let mut zero = AxisTracker::new(vec![ChannelRole::Pressure], 1.2);
        zero.observe(&[0.0]);
        assert_eq!(zero.ranges().mins, vec![-1.0]);
        assert_eq!(zero.ranges().maxs, vec![1.0]);
    }
}
