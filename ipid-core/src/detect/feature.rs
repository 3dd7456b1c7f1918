//! Per-frame feature extraction and per-window decision rules.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::covert::{DEFAULT_MARKER, is_printable_id};
use crate::detect::window::SlidingWindow;
use crate::error::IpidError;
use crate::frame::ParsedFrame;

pub const DEFAULT_RATIO_THRESHOLD: f64 = 0.8;

/// Configuration-level strategy selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    #[default]
    Marker,
    Ratio,
}

impl FromStr for StrategyKind {
    type Err = IpidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "marker" => Ok(StrategyKind::Marker),
            "ratio" | "printable-ratio" => Ok(StrategyKind::Ratio),
            other => Err(IpidError::Config(format!("unknown detection strategy {other:?}"))),
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::Marker => write!(f, "marker"),
            StrategyKind::Ratio => write!(f, "ratio"),
        }
    }
}

/// How a frame's feature is computed and how a window is judged.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureStrategy {
    /// Feature: payload contains the marker. Decision: any sample has it.
    Marker { marker: Vec<u8> },
    /// Feature: identification is printable ASCII. Decision: the share of
    /// such samples reaches `threshold`.
    PrintableRatio { threshold: f64 },
}

impl Default for FeatureStrategy {
    fn default() -> Self {
        FeatureStrategy::Marker {
            marker: DEFAULT_MARKER.to_vec(),
        }
    }
}

impl FeatureStrategy {
    pub fn marker(marker: impl Into<Vec<u8>>) -> Self {
        FeatureStrategy::Marker {
            marker: marker.into(),
        }
    }

    pub fn printable_ratio(threshold: f64) -> Result<Self, IpidError> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(IpidError::Config(format!(
                "ratio threshold {threshold} outside [0, 1]"
            )));
        }
        Ok(FeatureStrategy::PrintableRatio { threshold })
    }

    pub fn kind(&self) -> StrategyKind {
        match self {
            FeatureStrategy::Marker { .. } => StrategyKind::Marker,
            FeatureStrategy::PrintableRatio { .. } => StrategyKind::Ratio,
        }
    }

    pub fn extract(&self, frame: &ParsedFrame<'_>) -> bool {
        match self {
            FeatureStrategy::Marker { marker } => frame.contains_marker(marker),
            FeatureStrategy::PrintableRatio { .. } => is_printable_id(frame.identification),
        }
    }

    pub fn decide(&self, window: &SlidingWindow) -> bool {
        match self {
            FeatureStrategy::Marker { .. } => window.any_feature(),
            FeatureStrategy::PrintableRatio { threshold } => window.feature_ratio() >= *threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::window::FeatureSample;
    use crate::frame::FrameBuilder;

    #[test]
    fn marker_extraction() {
        let tagged = FrameBuilder::new().payload(b"CovertChannel:x".to_vec()).build();
        let plain = FrameBuilder::new().payload(vec![0u8; 56]).build();
        let s = FeatureStrategy::default();
        assert!(s.extract(&tagged.parse().unwrap()));
        assert!(!s.extract(&plain.parse().unwrap()));
    }

    #[test]
    fn printable_extraction() {
        let s = FeatureStrategy::printable_ratio(0.8).unwrap();
        let printable = FrameBuilder::new().identification(b'A' as u16).build();
        let random = FrameBuilder::new().identification(51234).build();
        assert!(s.extract(&printable.parse().unwrap()));
        assert!(!s.extract(&random.parse().unwrap()));
    }

    #[test]
    fn ratio_decision_threshold_inclusive() {
        let s = FeatureStrategy::printable_ratio(0.75).unwrap();
        let mut w = SlidingWindow::new(4);
        for present in [true, true, true, false] {
            w.push(FeatureSample {
                observed_at: 0.0,
                feature_present: present,
                ground_truth: false,
            });
        }
        assert!(s.decide(&w));
        let strict = FeatureStrategy::printable_ratio(0.8).unwrap();
        assert!(!strict.decide(&w));
    }

    #[test]
    fn threshold_out_of_range() {
        assert!(FeatureStrategy::printable_ratio(1.5).is_err());
        assert!(FeatureStrategy::printable_ratio(-0.1).is_err());
    }

    #[test]
    fn strategy_kind_parses() {
        assert_eq!("Marker".parse::<StrategyKind>().unwrap(), StrategyKind::Marker);
        assert_eq!("ratio".parse::<StrategyKind>().unwrap(), StrategyKind::Ratio);
        assert!("bogus".parse::<StrategyKind>().is_err());
    }
}
