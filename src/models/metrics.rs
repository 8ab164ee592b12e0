// 📈 Binary classification metrics (positive class = 1)

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

impl Metrics {
    /// Compare predictions with ground truth. Undefined ratios (no predicted or
    /// no actual positives) are reported as 0.
    pub fn compute(predicted: &[usize], actual: &[usize]) -> Metrics {
        let n = predicted.len().min(actual.len());
        if n == 0 {
            return Metrics::default();
        }

        let (mut tp, mut fp, mut fn_, mut correct) = (0usize, 0usize, 0usize, 0usize);
        for (&p, &a) in predicted.iter().zip(actual) {
            if p == a {
                correct += 1;
            }
            match (p == 1, a == 1) {
                (true, true) => tp += 1,
                (true, false) => fp += 1,
                (false, true) => fn_ += 1,
                (false, false) => {}
            }
        }

        let ratio = |num: usize, den: usize| if den == 0 { 0.0 } else { num as f64 / den as f64 };
        let precision = ratio(tp, tp + fp);
        let recall = ratio(tp, tp + fn_);
        let f1 = if precision + recall == 0.0 {
            0.0
        } else {
            2.0 * precision * recall / (precision + recall)
        };

        Metrics {
            accuracy: ratio(correct, n),
            precision,
            recall,
            f1,
            support: n,
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "accuracy={:.4} precision={:.4} recall={:.4} f1={:.4} (n={})",
            self.accuracy, self.precision, self.recall, self.f1, self.support
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics() {
        let m = Metrics::compute(&[1, 1, 0, 0], &[1, 0, 1, 0]);
        assert_eq!(m.accuracy, 0.5);
        assert_eq!(m.precision, 0.5);
        assert_eq!(m.recall, 0.5);
        assert_eq!(m.f1, 0.5);
        assert_eq!(m.support, 4);
    }

    #[test]
    fn test_no_positive_predictions() {
        let m = Metrics::compute(&[0, 0], &[1, 0]);
        assert_eq!(m.precision, 0.0);
        assert_eq!(m.recall, 0.0);
        assert_eq!(m.f1, 0.0);
        assert_eq!(m.accuracy, 0.5);
    }
}
