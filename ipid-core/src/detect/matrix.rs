//! Confusion matrix and the rates derived from it.
//!
//! Zero-denominator convention: precision, recall and F1 are `0.0`
//! whenever their denominator is zero (no positive predictions, no
//! positive labels, or `P + R == 0`).

use serde::{Deserialize, Serialize};

/// Which cell a scoring event landed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    TruePositive,
    FalsePositive,
    TrueNegative,
    FalseNegative,
}

impl Outcome {
    pub fn classify(decision: bool, truth: bool) -> Self {
        match (decision, truth) {
            (true, true) => Outcome::TruePositive,
            (true, false) => Outcome::FalsePositive,
            (false, false) => Outcome::TrueNegative,
            (false, true) => Outcome::FalseNegative,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    tp: u64,
    fp: u64,
    tn: u64,
    fn_: u64,
}

impl ConfusionMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment exactly one cell.
    pub fn record(&mut self, decision: bool, truth: bool) -> Outcome {
        let outcome = Outcome::classify(decision, truth);
        match outcome {
            Outcome::TruePositive => self.tp += 1,
            Outcome::FalsePositive => self.fp += 1,
            Outcome::TrueNegative => self.tn += 1,
            Outcome::FalseNegative => self.fn_ += 1,
        }
        outcome
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn tp(&self) -> u64 {
        self.tp
    }

    pub fn fp(&self) -> u64 {
        self.fp
    }

    pub fn tn(&self) -> u64 {
        self.tn
    }

    pub fn fn_(&self) -> u64 {
        self.fn_
    }

    pub fn total(&self) -> u64 {
        self.tp + self.fp + self.tn + self.fn_
    }

    pub fn precision(&self) -> f64 {
        ratio(self.tp, self.tp + self.fp)
    }

    pub fn recall(&self) -> f64 {
        ratio(self.tp, self.tp + self.fn_)
    }

    pub fn f1(&self) -> f64 {
        let p = self.precision();
        let r = self.recall();
        if p + r == 0.0 {
            0.0
        } else {
            2.0 * p * r / (p + r)
        }
    }
}

fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}
