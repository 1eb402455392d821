//! Counters and small statistical helpers shared by the scorers.

use serde::{Deserialize, Serialize};

/// Divides `numerator` by `denominator`, returning 0 when the denominator is 0.
pub fn safe_div(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        return 0.0;
    }
    numerator as f64 / denominator as f64
}

/// Computes the mean of a slice of data.
pub fn mean(data: &[f64]) -> Option<f64> {
    let count = data.len();
    if count == 0 {
        return None;
    }
    Some(data.iter().sum::<f64>() / count as f64)
}

/// A `correct / total` accumulator for one ratio metric.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatioCounter {
    pub correct: usize,
    pub total: usize,
}

impl RatioCounter {
    /// Counts one scored item.
    pub fn record(&mut self, is_correct: bool) {
        self.total += 1;
        if is_correct {
            self.correct += 1;
        }
    }

    /// Counts `count` scored items that were all wrong.
    pub fn miss(&mut self, count: usize) {
        self.total += count;
    }

    pub fn ratio(&self) -> f64 {
        safe_div(self.correct, self.total)
    }
}

/// Confusion counts for relevance detection, where the positive class is
/// "correctly produced no tool call".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelevanceCounts {
    /// Label is not a call and the prediction is not a call.
    pub true_positives: usize,
    /// Label is a call but the prediction is not.
    pub false_positives: usize,
    /// Label is not a call but the prediction is.
    pub false_negatives: usize,
}

impl RelevanceCounts {
    pub fn precision(&self) -> f64 {
        safe_div(
            self.true_positives,
            self.true_positives + self.false_positives,
        )
    }

    pub fn recall(&self) -> f64 {
        safe_div(
            self.true_positives,
            self.true_positives + self.false_negatives,
        )
    }

    pub fn f1(&self) -> f64 {
        let precision = self.precision();
        let recall = self.recall();
        if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        }
    }
}
