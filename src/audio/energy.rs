// Perceived energy: short-time RMS loudness mean plus its variance.
//
// The variance term is additive, so dynamic material scores higher than flat
// material of the same average loudness.

use tracing::debug;

use crate::config::AnalysisConfig;

/// Short-time RMS of centered, zero-padded frames.
pub fn rms_series(samples: &[f32], frame_size: usize, hop_size: usize) -> Vec<f64> {
    if samples.is_empty() || frame_size == 0 || hop_size == 0 {
        return Vec::new();
    }

    let pad = frame_size / 2;
    let n_frames = 1 + samples.len() / hop_size;

    (0..n_frames)
        .map(|t| {
            let start = (t * hop_size) as isize - pad as isize;
            let lo = start.max(0) as usize;
            let hi = ((start + frame_size as isize).max(0) as usize).min(samples.len());
            let sum_sq: f64 = samples[lo.min(hi)..hi]
                .iter()
                .map(|&s| (s as f64) * (s as f64))
                .sum();
            (sum_sq / frame_size as f64).sqrt()
        })
        .collect()
}

/// `mean * mean_weight + variance * variance_weight`, rounded to 3 decimals.
pub fn energy_score(
    rms_mean: f64,
    rms_variance: f64,
    mean_weight: f64,
    variance_weight: f64,
) -> f64 {
    let raw = rms_mean * mean_weight + rms_variance * variance_weight;
    (raw * 1000.0).round() / 1000.0
}

/// Energy of the normalized (not harmonic-separated) signal.
pub fn detect_energy(normalized: &[f32], config: &AnalysisConfig) -> f64 {
    let rms = rms_series(normalized, config.frame_size, config.hop_size);
    if rms.is_empty() {
        return 0.0;
    }

    let n = rms.len() as f64;
    let mean = rms.iter().sum::<f64>() / n;
    let variance = rms.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let energy = energy_score(
        mean,
        variance,
        config.energy_mean_weight,
        config.energy_variance_weight,
    );

    debug!(mean, variance, energy, "Energy calculated");
    energy
}
