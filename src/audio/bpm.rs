// Tempo estimation on the harmonic signal.
//
// Two independent estimators run side by side:
//   A. onset envelope (spectral flux) -> windowed autocorrelation tempogram,
//      aggregated across time with the median so isolated onset spikes do not
//      dominate, then weighted by a log-normal tempo prior.
//   B. aubio's tempo tracker fed directly with the harmonic waveform.
//
// Periodicity-based estimators routinely lock onto half or double the true
// tempo. The final BPM is whichever estimate sits closest to a configured
// anchor tempo; this is a deterministic tie-break, not a claim about genre.

use bliss_audio_aubio_rs::{OnsetMode, Tempo};
use rustfft::{num_complex::Complex, FftPlanner};
use tracing::{debug, warn};

use super::stft::{hann_window, stft};
use crate::config::AnalysisConfig;

/// Autocorrelation window for the tempogram, in seconds
const AC_WINDOW_SECONDS: f64 = 8.0;

/// Center and spread (in octaves) of the log-normal tempo prior used by estimate A
const PRIOR_CENTER_BPM: f64 = 120.0;
const PRIOR_STD_OCTAVES: f64 = 1.0;

/// Dynamic range kept by the log-power spectrogram before differencing
const TOP_DB: f32 = 80.0;

/// aubio frame sizes (50% overlap)
const AUBIO_BUF_SIZE: usize = 1024;
const AUBIO_HOP_SIZE: usize = 512;

/// Everything an estimator may look at.
pub struct TempoInput<'a> {
    pub harmonic: &'a [f32],
    pub sample_rate: u32,
    pub onset_envelope: &'a [f32],
    /// Samples per onset-envelope frame
    pub hop_size: usize,
    pub min_bpm: f64,
    pub max_bpm: f64,
}

/// A single tempo estimation strategy.
///
/// Returns `None` when it cannot produce an estimate (too little signal,
/// backend failure); the resolver then ignores it.
pub trait TempoEstimator: Send + Sync {
    fn name(&self) -> &'static str;
    fn estimate(&self, input: &TempoInput<'_>) -> Option<f64>;
}

/// Estimate A: median-aggregated autocorrelation of the onset envelope.
#[derive(Debug, Clone, Copy, Default)]
pub struct OnsetAutocorrelation;

impl TempoEstimator for OnsetAutocorrelation {
    fn name(&self) -> &'static str {
        "onset-autocorrelation"
    }

    fn estimate(&self, input: &TempoInput<'_>) -> Option<f64> {
        let frames_per_second = input.sample_rate as f64 / input.hop_size as f64;
        let win_length = ((AC_WINDOW_SECONDS * frames_per_second).round() as usize).max(1);
        let min_lag = (60.0 * frames_per_second / input.max_bpm).floor().max(1.0) as usize;
        let max_lag = (60.0 * frames_per_second / input.min_bpm).ceil() as usize;
        let max_lag = max_lag.min(win_length.saturating_sub(1));

        if input.onset_envelope.len() < 2 || min_lag > max_lag {
            return None;
        }

        let tempogram = median_tempogram(input.onset_envelope, win_length, max_lag);
        // Flat envelope (silence, pure drone): no periodicity to report
        if tempogram[min_lag..=max_lag].iter().all(|&v| v <= 0.0) {
            return None;
        }

        let (best_lag, _) = (min_lag..=max_lag)
            .map(|lag| {
                let bpm = 60.0 * frames_per_second / lag as f64;
                let prior = -0.5
                    * ((bpm.log2() - PRIOR_CENTER_BPM.log2()) / PRIOR_STD_OCTAVES).powi(2);
                let score = (1e6 * tempogram[lag] as f64).ln_1p() + prior;
                (lag, score)
            })
            .fold((0usize, f64::NEG_INFINITY), |best, cur| {
                if cur.1 > best.1 {
                    cur
                } else {
                    best
                }
            });

        if best_lag == 0 {
            return None;
        }
        Some(60.0 * frames_per_second / best_lag as f64)
    }
}

/// Estimate B: aubio beat tracker on the raw harmonic waveform.
#[derive(Debug, Clone, Copy, Default)]
pub struct AubioTempo;

impl TempoEstimator for AubioTempo {
    fn name(&self) -> &'static str {
        "aubio-tempo"
    }

    fn estimate(&self, input: &TempoInput<'_>) -> Option<f64> {
        let mut tempo = match Tempo::new(
            OnsetMode::SpecFlux,
            AUBIO_BUF_SIZE,
            AUBIO_HOP_SIZE,
            input.sample_rate,
        ) {
            Ok(tempo) => tempo,
            Err(e) => {
                warn!("Failed to create aubio Tempo detector: {:?}", e);
                return None;
            }
        };

        for (i, frame) in input.harmonic.chunks_exact(AUBIO_HOP_SIZE).enumerate() {
            if let Err(e) = tempo.do_result(frame) {
                warn!("aubio tempo error at frame {}: {:?}", i, e);
                return None;
            }
        }

        let bpm = tempo.get_bpm() as f64;
        if bpm.is_finite() && bpm > 0.0 {
            Some(bpm)
        } else {
            None
        }
    }
}

/// Runs a set of estimators and resolves octave ambiguity against an anchor.
pub struct TempoDetector {
    estimators: Vec<Box<dyn TempoEstimator>>,
    anchor_bpm: f64,
}

impl TempoDetector {
    pub fn new(estimators: Vec<Box<dyn TempoEstimator>>, anchor_bpm: f64) -> Self {
        Self {
            estimators,
            anchor_bpm,
        }
    }

    /// Estimate A and estimate B, anchored per the configuration.
    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self::new(
            vec![Box::new(OnsetAutocorrelation), Box::new(AubioTempo)],
            config.tempo_anchor_bpm,
        )
    }

    /// BPM of the harmonic signal, rounded to 2 decimals.
    ///
    /// Empty input returns 0.0 without running any estimator; a signal no
    /// estimator can handle also yields 0.0.
    pub fn detect(&self, harmonic: &[f32], sample_rate: u32, config: &AnalysisConfig) -> f64 {
        if harmonic.is_empty() {
            warn!("Harmonic signal is empty, check audio quality.");
            return 0.0;
        }

        let envelope = onset_strength(harmonic, config.frame_size, config.hop_size);
        let input = TempoInput {
            harmonic,
            sample_rate,
            onset_envelope: &envelope,
            hop_size: config.hop_size,
            min_bpm: config.min_bpm,
            max_bpm: config.max_bpm,
        };

        let estimates: Vec<f64> = self
            .estimators
            .iter()
            .filter_map(|estimator| {
                let estimate = estimator.estimate(&input);
                debug!(estimator = estimator.name(), ?estimate, "Tempo estimate");
                estimate
            })
            .collect();

        let bpm = resolve_octave(&estimates, self.anchor_bpm).unwrap_or(0.0);
        debug!("Final BPM Calculation: {}", bpm);
        round_to(bpm.max(0.0), 2)
    }
}

/// Pick the estimate closest to `anchor`. Earlier estimates win exact ties.
pub fn resolve_octave(estimates: &[f64], anchor: f64) -> Option<f64> {
    estimates
        .iter()
        .copied()
        .filter(|bpm| bpm.is_finite())
        .fold(None, |best: Option<f64>, bpm| match best {
            Some(b) if (b - anchor).abs() <= (bpm - anchor).abs() => Some(b),
            _ => Some(bpm),
        })
}

/// Onset-strength envelope: mean positive change of the log-power spectrum
/// between consecutive frames (half-wave rectified spectral flux).
pub fn onset_strength(samples: &[f32], frame_size: usize, hop_size: usize) -> Vec<f32> {
    let spec = stft(samples, frame_size, hop_size);
    if spec.is_empty() {
        return Vec::new();
    }

    let log_power: Vec<Vec<f32>> = spec
        .iter()
        .map(|frame| {
            frame
                .iter()
                .map(|c| 10.0 * c.norm_sqr().max(1e-10).log10())
                .collect()
        })
        .collect();

    let ceiling = log_power
        .iter()
        .flatten()
        .fold(f32::NEG_INFINITY, |m, &v| m.max(v));
    let floor = ceiling - TOP_DB;

    let mut envelope = Vec::with_capacity(log_power.len());
    envelope.push(0.0);
    for pair in log_power.windows(2) {
        let (prev, cur) = (&pair[0], &pair[1]);
        let flux: f32 = cur
            .iter()
            .zip(prev)
            .map(|(&c, &p)| (c.max(floor) - p.max(floor)).max(0.0))
            .sum();
        envelope.push(flux / cur.len() as f32);
    }
    envelope
}

/// Autocorrelation tempogram aggregated with the median across frames.
///
/// Each frame's window (Hann-weighted, centered on the frame) is autocorrelated
/// via FFT and normalized by its lag-0 value. Returns `max_lag + 1` values.
fn median_tempogram(envelope: &[f32], win_length: usize, max_lag: usize) -> Vec<f32> {
    let window = hann_window(win_length);
    let fft_len = (2 * win_length).next_power_of_two();
    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(fft_len);
    let ifft = planner.plan_fft_inverse(fft_len);
    let half = win_length / 2;

    // per_lag[lag][frame]
    let mut per_lag: Vec<Vec<f32>> = vec![Vec::with_capacity(envelope.len()); max_lag + 1];
    let mut buffer = vec![Complex::new(0.0f32, 0.0); fft_len];

    for t in 0..envelope.len() {
        buffer.iter_mut().for_each(|c| *c = Complex::new(0.0, 0.0));
        for (i, slot) in buffer.iter_mut().take(win_length).enumerate() {
            let idx = t as isize + i as isize - half as isize;
            if idx >= 0 && (idx as usize) < envelope.len() {
                *slot = Complex::new(envelope[idx as usize] * window[i], 0.0);
            }
        }

        fft.process(&mut buffer);
        for c in buffer.iter_mut() {
            *c = Complex::new(c.norm_sqr(), 0.0);
        }
        ifft.process(&mut buffer);

        let zero_lag = buffer[0].re;
        for (lag, values) in per_lag.iter_mut().enumerate() {
            let value = if zero_lag > 1e-12 {
                buffer[lag].re / zero_lag
            } else {
                0.0
            };
            values.push(value);
        }
    }

    per_lag
        .into_iter()
        .map(|mut values| {
            let mid = values.len() / 2;
            if values.is_empty() {
                return 0.0;
            }
            let (_, median, _) = values.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
            *median
        })
        .collect()
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
