// Preprocessor: peak normalization + harmonic/percussive source separation.
//
// HPSS follows the median-filtering approach (Fitzgerald 2010): sustained
// tones form horizontal ridges in the spectrogram, transients form vertical
// ones. Median filtering across time keeps the former, across frequency the
// latter; a soft (Wiener) mask assigns each bin accordingly and the harmonic
// part is resynthesized with an inverse STFT.

use tracing::debug;

use super::stft::{istft, magnitudes, stft};
use crate::config::AnalysisConfig;

/// Output of the preprocessing stage.
#[derive(Debug, Clone, Default)]
pub struct Preprocessed {
    /// Input scaled so the peak absolute amplitude is 1.0
    pub normalized: Vec<f32>,
    /// Harmonic component of `normalized`, percussive part discarded
    pub harmonic: Vec<f32>,
}

pub fn preprocess(samples: &[f32], config: &AnalysisConfig) -> Preprocessed {
    if samples.is_empty() {
        return Preprocessed::default();
    }

    let normalized = normalize_peak(samples);
    let harmonic = harmonic_component(
        &normalized,
        config.frame_size,
        config.hop_size,
        config.hpss_kernel,
    );

    debug!(
        samples = samples.len(),
        harmonic = harmonic.len(),
        "Normalization and HPSS completed"
    );

    Preprocessed {
        normalized,
        harmonic,
    }
}

/// Scale so that max |x| == 1.0. All-zero input is returned unchanged.
pub fn normalize_peak(samples: &[f32]) -> Vec<f32> {
    let peak = samples
        .iter()
        .filter(|s| s.is_finite())
        .fold(0.0f32, |m, s| m.max(s.abs()));
    if peak <= f32::MIN_POSITIVE {
        return samples.to_vec();
    }
    samples
        .iter()
        .map(|&s| if s.is_finite() { s / peak } else { 0.0 })
        .collect()
}

/// Harmonic part of the signal, same length as the input.
pub fn harmonic_component(
    samples: &[f32],
    frame_size: usize,
    hop_size: usize,
    kernel: usize,
) -> Vec<f32> {
    if samples.is_empty() {
        return Vec::new();
    }

    let mut spec = stft(samples, frame_size, hop_size);
    let mag = magnitudes(&spec);
    let n_frames = mag.len();
    let n_bins = mag.first().map_or(0, |f| f.len());

    // Harmonic enhancement: median over time for each bin
    let mut harmonic = vec![vec![0.0f32; n_bins]; n_frames];
    let mut column = vec![0.0f32; n_frames];
    for bin in 0..n_bins {
        for (t, frame) in mag.iter().enumerate() {
            column[t] = frame[bin];
        }
        for (t, value) in median_filter(&column, kernel).into_iter().enumerate() {
            harmonic[t][bin] = value;
        }
    }

    // Percussive enhancement: median over frequency within each frame
    let percussive: Vec<Vec<f32>> = mag.iter().map(|frame| median_filter(frame, kernel)).collect();

    for (t, frame) in spec.iter_mut().enumerate() {
        for (bin, value) in frame.iter_mut().enumerate() {
            let h = harmonic[t][bin] * harmonic[t][bin];
            let p = percussive[t][bin] * percussive[t][bin];
            let total = h + p;
            let mask = if total > f32::MIN_POSITIVE { h / total } else { 0.5 };
            *value *= mask;
        }
    }

    istft(&spec, frame_size, hop_size, samples.len())
}

/// Sliding median with edge samples repeated past the boundaries.
pub fn median_filter(input: &[f32], kernel: usize) -> Vec<f32> {
    if input.is_empty() || kernel <= 1 {
        return input.to_vec();
    }

    let half = kernel / 2;
    let last = input.len() as isize - 1;
    let mut window = Vec::with_capacity(2 * half + 1);

    (0..input.len())
        .map(|i| {
            window.clear();
            for offset in -(half as isize)..=(half as isize) {
                let idx = (i as isize + offset).clamp(0, last) as usize;
                window.push(input[idx]);
            }
            let mid = window.len() / 2;
            let (_, median, _) = window.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
            *median
        })
        .collect()
}
