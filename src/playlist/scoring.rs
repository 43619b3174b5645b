// Transition cost between two analyzed tracks. Lower is smoother.

use crate::audio::key::Key;
use crate::audio::FeatureRecord;
use crate::config::ScoringWeights;

/// Distance between two keys in `[0, 1]`, scaled by the key weight.
pub trait KeyDistance: Send + Sync {
    fn distance(&self, a: &Key, b: &Key) -> f64;
}

/// Binary compatibility: identical labels cost nothing, anything else costs
/// the full key weight. Two `Unknown` keys count as a match.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactMatch;

impl KeyDistance for ExactMatch {
    fn distance(&self, a: &Key, b: &Key) -> f64 {
        if a == b {
            0.0
        } else {
            1.0
        }
    }
}

/// Camelot-wheel aware distance: one step around the wheel, or the relative
/// major/minor on the same number, costs half.
#[derive(Debug, Clone, Copy, Default)]
pub struct CamelotAdjacent;

impl KeyDistance for CamelotAdjacent {
    fn distance(&self, a: &Key, b: &Key) -> f64 {
        match (a, b) {
            (Key::Camelot(x), Key::Camelot(y)) => {
                if x == y {
                    return 0.0;
                }
                let diff = (x.number() as i32 - y.number() as i32).rem_euclid(12);
                let steps = diff.min(12 - diff);
                let same_ring = x.ring() == y.ring();
                if (same_ring && steps == 1) || (!same_ring && steps == 0) {
                    0.5
                } else {
                    1.0
                }
            }
            _ => ExactMatch.distance(a, b),
        }
    }
}

/// Weighted sum of tempo, key and energy differences.
pub struct Scorer {
    weights: ScoringWeights,
    key_distance: Box<dyn KeyDistance>,
}

impl Default for Scorer {
    fn default() -> Self {
        Self::new(ScoringWeights::default())
    }
}

impl Scorer {
    /// Binary key compatibility.
    pub fn new(weights: ScoringWeights) -> Self {
        Self::with_key_distance(weights, Box::new(ExactMatch))
    }

    pub fn with_key_distance(weights: ScoringWeights, key_distance: Box<dyn KeyDistance>) -> Self {
        Self {
            weights,
            key_distance,
        }
    }

    /// `+inf` when either side is missing or the result is not a finite,
    /// non-negative number.
    pub fn score(&self, a: Option<&FeatureRecord>, b: Option<&FeatureRecord>) -> f64 {
        let (Some(a), Some(b)) = (a, b) else {
            return f64::INFINITY;
        };

        let bpm = self.weights.tempo * (a.bpm - b.bpm).abs();
        let key = self.weights.key * self.key_distance.distance(&a.key, &b.key);
        let energy = self.weights.energy * (a.energy - b.energy).abs();

        let total = bpm + key + energy;
        if total.is_finite() && total >= 0.0 {
            total
        } else {
            f64::INFINITY
        }
    }
}
