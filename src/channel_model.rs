use crate::edge_detector::{DigitalLevel, Thresholds};

/// Physical role of a configured channel. The role picks the conversion formula.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelRole {
    Temperature,
    Pressure,
    Inductive,
}

impl ChannelRole {
    /// Single-letter code used by the reference configuration (`T`, `P`, `I`).
    pub fn as_code(&self) -> char {
        match self {
            ChannelRole::Temperature => 'T',
            ChannelRole::Pressure => 'P',
            ChannelRole::Inductive => 'I',
        }
    }

    pub fn from_code(code: char) -> Option<Self> {
        match code.to_ascii_uppercase() {
            'T' => Some(ChannelRole::Temperature),
            'P' => Some(ChannelRole::Pressure),
            'I' => Some(ChannelRole::Inductive),
            _ => None,
        }
    }

    /// Column label suffix used when exporting a session.
    pub fn unit_label(&self) -> &'static str {
        match self {
            ChannelRole::Temperature => "Temperature[°C]",
            ChannelRole::Pressure => "Pressure[bar]",
            ChannelRole::Inductive => "Trigger[0/1]",
        }
    }

    /// Axis range shown before any data for this role has been observed.
    pub fn fallback_range(&self) -> (f64, f64) {
        match self {
            ChannelRole::Temperature => (0.0, 100.0),
            ChannelRole::Pressure => (0.0, 10.0),
            ChannelRole::Inductive => (0.0, 1.0),
        }
    }
}

/// Static configuration of one acquisition channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelConfig {
    /// Hardware channel index on the device.
    pub index: u8,
    pub role: ChannelRole,
    /// Full input span in volts.
    pub voltage_range: f64,
}

impl ChannelConfig {
    pub fn new(index: u8, role: ChannelRole, voltage_range: f64) -> Self {
        Self {
            index,
            role,
            voltage_range,
        }
    }

    pub fn column_name(&self) -> String {
        format!("CH{}_{}", self.index, self.role.unit_label())
    }
}

/// Calibration constants shared by all channels of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct Calibration {
    /// ADC code that corresponds to the full input span.
    pub full_scale_code: f64,
    pub degrees_per_volt: f64,
    pub pressure_max_flow: f64,
    /// Pressure channels alternate between these two constants.
    pub pressure_constants: [f64; 2],
    /// Trigger thresholds as fractions of `full_scale_code`.
    pub trigger_low_fraction: f64,
    pub trigger_high_fraction: f64,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            full_scale_code: 32768.0,
            degrees_per_volt: 100.0,
            pressure_max_flow: 20000.0,
            pressure_constants: [2.500, 2.508],
            trigger_low_fraction: 0.20,
            trigger_high_fraction: 0.80,
        }
    }
}

impl Calibration {
    pub fn thresholds(&self) -> Thresholds {
        Thresholds::from_fractions(
            self.trigger_low_fraction,
            self.trigger_high_fraction,
            self.full_scale_code,
        )
    }
}

/// A converted channel reading. The trigger channel yields a digital value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConvertedValue {
    Analog(f64),
    Digital(u8),
}

impl ConvertedValue {
    pub fn as_f64(&self) -> f64 {
        match *self {
            ConvertedValue::Analog(v) => v,
            ConvertedValue::Digital(d) => f64::from(d),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Conversion {
    Linear(f64),
    Digital,
}

/// Per-channel conversion from raw ADC codes to physical units.
///
/// The conversion factors are resolved once from the channel list, so
/// [`ChannelModel::convert`] does no role bookkeeping per sample.
#[derive(Debug, Clone)]
pub struct ChannelModel {
    channels: Vec<ChannelConfig>,
    conversions: Vec<Conversion>,
    inductive: Option<usize>,
    thresholds: Thresholds,
}

impl ChannelModel {
    /// Build the model for a channel list.
    ///
    /// Panics if more than one channel has the `Inductive` role.
    pub fn new(channels: Vec<ChannelConfig>, calibration: &Calibration) -> Self {
        let inductive_count = channels
            .iter()
            .filter(|c| c.role == ChannelRole::Inductive)
            .count();
        assert!(
            inductive_count <= 1,
            "at most one inductive channel is allowed, got {inductive_count}"
        );

        let mut pressure_seen = 0usize;
        let conversions = channels
            .iter()
            .map(|channel| match channel.role {
                ChannelRole::Temperature => Conversion::Linear(
                    channel.voltage_range / calibration.full_scale_code
                        * calibration.degrees_per_volt,
                ),
                ChannelRole::Pressure => {
                    let constant = calibration.pressure_constants[pressure_seen % 2];
                    pressure_seen += 1;
                    Conversion::Linear(
                        calibration.pressure_max_flow / constant / calibration.full_scale_code,
                    )
                }
                ChannelRole::Inductive => Conversion::Digital,
            })
            .collect();

        let inductive = channels
            .iter()
            .position(|c| c.role == ChannelRole::Inductive);

        Self {
            channels,
            conversions,
            inductive,
            thresholds: calibration.thresholds(),
        }
    }

    pub fn channels(&self) -> &[ChannelConfig] {
        &self.channels
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Position of the trigger channel within the channel list, if any.
    pub fn inductive_index(&self) -> Option<usize> {
        self.inductive
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    /// Scale factor applied to a linear channel. `None` for the trigger channel.
    pub fn scale(&self, position: usize) -> Option<f64> {
        match self.conversions.get(position)? {
            Conversion::Linear(scale) => Some(*scale),
            Conversion::Digital => None,
        }
    }

    /// Convert one row of raw codes.
    ///
    /// `held` is the trigger level carried over from the previous sample; it is
    /// used while the trigger reading sits inside the hysteresis band.
    ///
    /// Panics if `raw` does not hold exactly one value per configured channel.
    pub fn convert(&self, raw: &[f64], held: Option<DigitalLevel>) -> Vec<ConvertedValue> {
        assert_eq!(
            raw.len(),
            self.channels.len(),
            "sample carries {} values for {} configured channels",
            raw.len(),
            self.channels.len()
        );

        raw.iter()
            .zip(&self.conversions)
            .map(|(&value, conversion)| match conversion {
                Conversion::Linear(scale) => ConvertedValue::Analog(value * scale),
                Conversion::Digital => {
                    let level = self
                        .thresholds
                        .classify(value)
                        .or(held)
                        .unwrap_or(DigitalLevel::Low);
                    ConvertedValue::Digital(level.as_bit())
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(roles: &[ChannelRole]) -> ChannelModel {
        let channels = roles
            .iter()
            .enumerate()
            .map(|(i, role)| ChannelConfig::new(i as u8, *role, 10.0))
            .collect();
        ChannelModel::new(channels, &Calibration::default())
    }

    #[test]
    fn test_temperature_is_linear() {
        let m = model(&[ChannelRole::Temperature]);
        for x in [0.0, 1.0, 123.0, 16384.0, -2000.0] {
            let single = m.convert(&[x], None)[0].as_f64();
            let double = m.convert(&[2.0 * x], None)[0].as_f64();
            assert!((double - 2.0 * single).abs() < 1e-9);
        }
        assert_eq!(m.convert(&[0.0], None)[0].as_f64(), 0.0);
    }

    #[test]
    fn test_temperature_full_scale_is_thousand_degrees() {
        // 10 V span at 100 °C/V
        let m = model(&[ChannelRole::Temperature]);
        let value = m.convert(&[32768.0], None)[0].as_f64();
        assert!((value - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn test_pressure_constants_alternate_among_pressure_channels() {
        let m = model(&[
            ChannelRole::Pressure,
            ChannelRole::Temperature,
            ChannelRole::Pressure,
            ChannelRole::Inductive,
            ChannelRole::Pressure,
        ]);
        let a = 20000.0 / 2.500 / 32768.0;
        let b = 20000.0 / 2.508 / 32768.0;
        assert!((m.scale(0).unwrap() - a).abs() < 1e-12);
        assert!((m.scale(2).unwrap() - b).abs() < 1e-12);
        assert!((m.scale(4).unwrap() - a).abs() < 1e-12);
        assert_eq!(m.scale(3), None);
    }

    #[test]
    fn test_inductive_uses_thresholds_and_hold() {
        let m = model(&[ChannelRole::Inductive]);
        assert_eq!(m.inductive_index(), Some(0));
        assert_eq!(m.convert(&[1000.0], None)[0], ConvertedValue::Digital(0));
        assert_eq!(m.convert(&[30000.0], None)[0], ConvertedValue::Digital(1));
        assert_eq!(m.convert(&[16000.0], None)[0], ConvertedValue::Digital(0));
        assert_eq!(
            m.convert(&[16000.0], Some(DigitalLevel::High))[0],
            ConvertedValue::Digital(1)
        );
    }

    #[test]
    #[should_panic]
    fn test_channel_count_mismatch_panics() {
        let m = model(&[ChannelRole::Temperature, ChannelRole::Pressure]);
        m.convert(&[1.0], None);
    }

    #[test]
    #[should_panic]
    fn test_two_inductive_channels_rejected() {
        model(&[ChannelRole::Inductive, ChannelRole::Inductive]);
    }

    #[test]
    fn test_role_codes() {
        for role in [
            ChannelRole::Temperature,
            ChannelRole::Pressure,
            ChannelRole::Inductive,
        ] {
            assert_eq!(ChannelRole::from_code(role.as_code()), Some(role));
        }
        assert_eq!(ChannelRole::from_code('x'), None);
        assert_eq!(
            ChannelConfig::new(3, ChannelRole::Pressure, 10.0).column_name(),
            "CH3_Pressure[bar]"
        );
    }
}
