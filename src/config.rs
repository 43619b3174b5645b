// Runtime configuration, loaded from an optional TOML file.
//
// Every field has a default so an empty (or missing) file yields a working
// service. The tempo anchor and scoring weights live here rather than at the
// call sites so they can be tuned without touching the algorithms.

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable consulted when no `--config` flag is given.
pub const CONFIG_ENV: &str = "MIXSORT_CONFIG";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub analysis: AnalysisConfig,
    pub scoring: ScoringWeights,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Request body cap for uploads, in bytes
    pub max_upload_bytes: usize,
    /// Default tracing filter when RUST_LOG is not set
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            max_upload_bytes: 2 * 1024 * 1024 * 1024,
            log_level: "info".to_string(),
        }
    }
}

/// Parameters of the feature-extraction pipeline.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Every decoded file is resampled to this rate before analysis
    pub sample_rate: u32,
    /// STFT window length (samples)
    pub frame_size: usize,
    /// STFT hop length (samples)
    pub hop_size: usize,
    /// Median filter length (in bins and frames) used by HPSS
    pub hpss_kernel: usize,
    /// Octave-error resolver: the estimate closest to this tempo wins
    pub tempo_anchor_bpm: f64,
    pub min_bpm: f64,
    pub max_bpm: f64,
    /// Mean chroma energy under which a C (8B) result is reported as Unknown
    pub key_low_confidence: f64,
    pub energy_mean_weight: f64,
    pub energy_variance_weight: f64,
    /// Files decoded at once per batch (0 = one per CPU core). Each file
    /// holds its full PCM and spectrograms in memory while it is analyzed.
    pub max_parallel: usize,
}

impl AnalysisConfig {
    /// Effective number of files analyzed concurrently, never zero.
    pub fn parallelism(&self) -> usize {
        match self.max_parallel {
            0 => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            n => n,
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            frame_size: 2048,
            hop_size: 512,
            hpss_kernel: 31,
            tempo_anchor_bpm: 125.0,
            min_bpm: 30.0,
            max_bpm: 300.0,
            key_low_confidence: 0.1,
            energy_mean_weight: 10.0,
            energy_variance_weight: 5.0,
            max_parallel: 0,
        }
    }
}

/// Relative importance of each feature in the transition cost.
///
/// With the defaults a full key mismatch costs as much as a 20 BPM gap
/// or a 0.5 energy gap.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub tempo: f64,
    pub key: f64,
    pub energy: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            tempo: 0.5,
            key: 10.0,
            energy: 20.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Parent directory for per-session scratch dirs
    pub scratch_root: PathBuf,
    /// Where exported bundles wait for download
    pub export_dir: PathBuf,
    /// Sessions unused for this long are dropped by the sweeper (0 disables)
    pub session_ttl_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            scratch_root: std::env::temp_dir(),
            export_dir: std::env::temp_dir(),
            session_ttl_secs: 6 * 60 * 60,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl Config {
    /// Load from `path`, or from `$MIXSORT_CONFIG`, falling back to defaults
    /// when neither is set. A path that is set but unreadable is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match std::env::var_os(CONFIG_ENV) {
                Some(p) => PathBuf::from(p),
                None => return Ok(Self::default()),
            },
        };

        let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse { path, source })
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_gives_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.analysis.sample_rate, 44100);
        assert_eq!(config.analysis.tempo_anchor_bpm, 125.0);
        assert_eq!(config.scoring, ScoringWeights::default());
        assert_eq!(config.server.port, 5000);
    }

    #[test]
    fn test_partial_override() {
        let config = Config::from_toml(
            r#"
            [scoring]
            key = 4.0

            [analysis]
            tempo_anchor_bpm = 128.0
            "#,
        )
        .unwrap();
        assert_eq!(config.scoring.key, 4.0);
        assert_eq!(config.scoring.tempo, 0.5);
        assert_eq!(config.analysis.tempo_anchor_bpm, 128.0);
        assert_eq!(config.analysis.hop_size, 512);
    }

    #[test]
    fn test_parallelism_is_never_zero() {
        let mut analysis = AnalysisConfig::default();
        assert!(analysis.parallelism() >= 1);
        analysis.max_parallel = 3;
        assert_eq!(analysis.parallelism(), 3);
    }

    #[test]
    fn test_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = Config::load(Some(&dir.path().join("nope.toml")));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mixsort.toml");
        std::fs::write(&path, "[server]\nport = 8080\n").unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.server.port, 8080);
    }
}
