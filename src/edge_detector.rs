/// Logic level of the trigger channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigitalLevel {
    Low,
    High,
}

impl DigitalLevel {
    pub fn as_bit(&self) -> u8 {
        match self {
            DigitalLevel::Low => 0,
            DigitalLevel::High => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeDirection {
    Rising,
    Falling,
}

impl EdgeDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeDirection::Rising => "UP",
            EdgeDirection::Falling => "DOWN",
        }
    }
}

/// A level change of the trigger channel at a session-relative time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransitionEvent {
    pub timestamp: f64,
    pub direction: EdgeDirection,
}

/// Hysteresis thresholds in raw ADC codes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub low: f64,
    pub high: f64,
}

impl Thresholds {
    /// Thresholds from fractions of the full-scale code, truncated to whole codes.
    pub fn from_fractions(low: f64, high: f64, full_scale_code: f64) -> Self {
        Self {
            low: (low * full_scale_code).trunc(),
            high: (high * full_scale_code).trunc(),
        }
    }

    /// `None` means the value sits inside the hysteresis band.
    pub fn classify(&self, raw: f64) -> Option<DigitalLevel> {
        if raw < self.low {
            Some(DigitalLevel::Low)
        } else if raw > self.high {
            Some(DigitalLevel::High)
        } else {
            None
        }
    }
}

/// Tracks the trigger channel level across samples and records its edges.
#[derive(Debug, Clone)]
pub struct EdgeDetector {
    thresholds: Thresholds,
    state: Option<DigitalLevel>,
    last_raw: Option<f64>,
    transitions: Vec<TransitionEvent>,
}

impl EdgeDetector {
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            thresholds,
            state: None,
            last_raw: None,
            transitions: Vec::new(),
        }
    }

    /// Feed one raw reading. Returns the edge it produced, if any.
    ///
    /// The first reading only establishes the level; a band reading with no
    /// prior level counts as LOW.
    pub fn update(&mut self, timestamp: f64, raw: f64) -> Option<TransitionEvent> {
        let new_state = self
            .thresholds
            .classify(raw)
            .or(self.state)
            .unwrap_or(DigitalLevel::Low);

        let edge = match (self.state, new_state) {
            (Some(DigitalLevel::Low), DigitalLevel::High) => Some(EdgeDirection::Rising),
            (Some(DigitalLevel::High), DigitalLevel::Low) => Some(EdgeDirection::Falling),
            _ => None,
        };

        self.state = Some(new_state);
        self.last_raw = Some(raw);

        edge.map(|direction| {
            let event = TransitionEvent {
                timestamp,
                direction,
            };
            log::debug!(
                "Trigger {} edge at t={:.3}s",
                direction.as_str(),
                timestamp
            );
            self.transitions.push(event);
            event
        })
    }

    /// Current level, LOW before the first reading.
    pub fn level(&self) -> DigitalLevel {
        self.state.unwrap_or(DigitalLevel::Low)
    }

    pub fn state(&self) -> Option<DigitalLevel> {
        self.state
    }

    pub fn last_raw(&self) -> Option<f64> {
        self.last_raw
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    pub fn transitions(&self) -> &[TransitionEvent] {
        &self.transitions
    }

    /// Transitions whose timestamps fall inside `[min, max]`.
    pub fn transitions_between(&self, min: f64, max: f64) -> Vec<TransitionEvent> {
        self.transitions
            .iter()
            .filter(|t| t.timestamp >= min && t.timestamp <= max)
            .copied()
            .collect()
    }
}
