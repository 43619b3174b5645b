// Audio processing (DSP)
// Pipeline: decoder -> preprocess (normalize + HPSS) -> {bpm, key, energy}

pub mod bpm;
pub mod decoder;
pub mod energy;
pub mod key;
pub mod preprocess;
pub mod stft;

use serde::Serialize;
use std::path::Path;
use tracing::debug;

use crate::config::AnalysisConfig;
use crate::error::DecodeError;
use bpm::TempoDetector;
use key::Key;

/// The three comparable features of an analyzed track. Immutable once built.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FeatureRecord {
    pub bpm: f64,
    pub key: Key,
    pub energy: f64,
}

/// Run the full feature pipeline on mono samples at `config.sample_rate`.
///
/// Never fails: degenerate input degrades to 0.0 BPM, Unknown key, 0.0 energy.
pub fn analyze_samples(samples: &[f32], config: &AnalysisConfig) -> FeatureRecord {
    let pre = preprocess::preprocess(samples, config);

    let bpm = TempoDetector::from_config(config).detect(&pre.harmonic, config.sample_rate, config);
    let key = key::detect_key(&pre.harmonic, config.sample_rate, config.key_low_confidence);
    let energy = energy::detect_energy(&pre.normalized, config);

    let record = FeatureRecord { bpm, key, energy };
    debug!(bpm, %key, energy, "Feature record");
    record
}

/// Decode a file and analyze it.
pub fn analyze_file(path: &Path, config: &AnalysisConfig) -> Result<FeatureRecord, DecodeError> {
    let audio = decoder::decode_to_mono(path, config.sample_rate)?;
    let record = analyze_samples(&audio.samples, config);
    debug!(
        "File: {}, BPM: {}, Key: {}, Energy: {:.3}",
        path.display(),
        record.bpm,
        record.key,
        record.energy
    );
    Ok(record)
}
