//! Performance dials and the multipliers derived from them

use crate::config::InitialDials;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const DIAL_MIN: f64 = 0.0;
pub const DIAL_MAX: f64 = 100.0;

/// Named tunable dial
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dial {
    Sensitivity,
    AnalysisDepth,
    ProcessingSpeed,
    PatternRecognition,
}

impl Dial {
    pub const ALL: [Dial; 4] = [
        Dial::Sensitivity,
        Dial::AnalysisDepth,
        Dial::ProcessingSpeed,
        Dial::PatternRecognition,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dial::Sensitivity => "sensitivity",
            Dial::AnalysisDepth => "analysis_depth",
            Dial::ProcessingSpeed => "processing_speed",
            Dial::PatternRecognition => "pattern_recognition",
        }
    }
}

impl fmt::Display for Dial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dial {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Dial::ALL
            .into_iter()
            .find(|d| d.as_str() == s)
            .ok_or_else(|| Error::UnknownParameter(s.to_string()))
    }
}

/// The four bounded dials, each in [0, 100]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Dials {
    pub sensitivity: f64,
    pub analysis_depth: f64,
    pub processing_speed: f64,
    pub pattern_recognition: f64,
}

impl Default for Dials {
    fn default() -> Self {
        Self {
            sensitivity: 50.0,
            analysis_depth: 50.0,
            processing_speed: 50.0,
            pattern_recognition: 50.0,
        }
    }
}

impl From<&InitialDials> for Dials {
    fn from(initial: &InitialDials) -> Self {
        let mut dials = Dials::default();
        dials.set_clamped(Dial::Sensitivity, initial.sensitivity);
        dials.set_clamped(Dial::AnalysisDepth, initial.analysis_depth);
        dials.set_clamped(Dial::ProcessingSpeed, initial.processing_speed);
        dials.set_clamped(Dial::PatternRecognition, initial.pattern_recognition);
        dials
    }
}

impl Dials {
    pub fn get(&self, dial: Dial) -> f64 {
        match dial {
            Dial::Sensitivity => self.sensitivity,
            Dial::AnalysisDepth => self.analysis_depth,
            Dial::ProcessingSpeed => self.processing_speed,
            Dial::PatternRecognition => self.pattern_recognition,
        }
    }

    fn slot(&mut self, dial: Dial) -> &mut f64 {
        match dial {
            Dial::Sensitivity => &mut self.sensitivity,
            Dial::AnalysisDepth => &mut self.analysis_depth,
            Dial::ProcessingSpeed => &mut self.processing_speed,
            Dial::PatternRecognition => &mut self.pattern_recognition,
        }
    }

    /// Set a dial, clamping into [0, 100]
    pub fn set_clamped(&mut self, dial: Dial, value: f64) {
        let value = if value.is_nan() { self.get(dial) } else { value };
        *self.slot(dial) = value.clamp(DIAL_MIN, DIAL_MAX);
    }

    /// Set a dial, rejecting values outside [0, 100]
    pub fn set_checked(&mut self, dial: Dial, value: f64) -> Result<()> {
        if !(DIAL_MIN..=DIAL_MAX).contains(&value) {
            return Err(Error::InvalidParameterValue {
                name: dial.as_str().to_string(),
                value,
            });
        }
        *self.slot(dial) = value;
        Ok(())
    }

    /// Add `delta` to a dial, clamping into [0, 100]
    pub fn nudge(&mut self, dial: Dial, delta: f64) {
        let current = self.get(dial);
        self.set_clamped(dial, current + delta);
    }

    pub fn in_bounds(&self) -> bool {
        Dial::ALL
            .iter()
            .all(|d| (DIAL_MIN..=DIAL_MAX).contains(&self.get(*d)))
    }
}

/// Multipliers consumed by the pipeline and collaborators
///
/// Always computed from the dials by [`DerivedMultipliers::from_dials`] and
/// never stored independently of them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DerivedMultipliers {
    /// Minimum detection confidence (1.0 at sensitivity 0, 0.2 at 100)
    pub detection_threshold: f64,
    /// Scales model analysis depth (0.5 to 1.5)
    pub depth_factor: f64,
    /// Scales processing rate versus accuracy (0.5 to 2.0)
    pub speed_factor: f64,
    /// Weight of pattern recognition in scoring (0.0 to 1.0)
    pub pattern_weight: f64,
}

impl DerivedMultipliers {
    pub fn from_dials(dials: &Dials) -> Self {
        Self {
            detection_threshold: 1.0 - 0.8 * dials.sensitivity / DIAL_MAX,
            depth_factor: 0.5 + dials.analysis_depth / DIAL_MAX,
            speed_factor: 0.5 + 1.5 * dials.processing_speed / DIAL_MAX,
            pattern_weight: dials.pattern_recognition / DIAL_MAX,
        }
    }
}

/// Immutable view of the parameters at one revision
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterSnapshot {
    pub dials: Dials,
    pub multipliers: DerivedMultipliers,
    /// Incremented on every change
    pub revision: u64,
}

impl ParameterSnapshot {
    pub fn new(dials: Dials, revision: u64) -> Self {
        Self {
            dials,
            multipliers: DerivedMultipliers::from_dials(&dials),
            revision,
        }
    }
}

impl Default for ParameterSnapshot {
    fn default() -> Self {
        Self::new(Dials::default(), 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dial_names_round_trip() {
        for dial in Dial::ALL {
            assert_eq!(dial.as_str().parse::<Dial>().unwrap(), dial);
        }
        assert!(matches!(
            "creativity".parse::<Dial>(),
            Err(Error::UnknownParameter(_))
        ));
    }

    #[test]
    fn test_set_checked_rejects_out_of_range() {
        let mut dials = Dials::default();
        let err = dials.set_checked(Dial::Sensitivity, 101.0).unwrap_err();
        assert!(matches!(err, Error::InvalidParameterValue { .. }));
        assert!(dials.set_checked(Dial::Sensitivity, -0.5).is_err());
        assert!(dials.set_checked(Dial::Sensitivity, f64::NAN).is_err());
        assert_eq!(dials.sensitivity, 50.0);

        dials.set_checked(Dial::Sensitivity, 100.0).unwrap();
        assert_eq!(dials.sensitivity, 100.0);
    }

    #[test]
    fn test_nudge_clamps() {
        let mut dials = Dials::default();
        dials.nudge(Dial::ProcessingSpeed, -80.0);
        assert_eq!(dials.processing_speed, 0.0);
        dials.nudge(Dial::PatternRecognition, 75.0);
        assert_eq!(dials.pattern_recognition, 100.0);
        assert!(dials.in_bounds());
    }

    #[test]
    fn test_multipliers_are_pure() {
        let dials = Dials {
            sensitivity: 100.0,
            analysis_depth: 0.0,
            processing_speed: 100.0,
            pattern_recognition: 25.0,
        };
        let m = DerivedMultipliers::from_dials(&dials);
        assert!((m.detection_threshold - 0.2).abs() < 1e-12);
        assert_eq!(m.depth_factor, 0.5);
        assert_eq!(m.speed_factor, 2.0);
        assert_eq!(m.pattern_weight, 0.25);
        assert_eq!(m, DerivedMultipliers::from_dials(&dials));

        let snapshot = ParameterSnapshot::new(dials, 3);
        assert_eq!(snapshot.multipliers, m);
    }
}
