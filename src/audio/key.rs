// Musical key detection from a chroma profile, reported in Camelot notation.
//
// Algorithm overview:
// 1. Chromagram: slide a Hann-windowed FFT frame over the harmonic signal and
//    fold each bin's magnitude into its pitch class (12-TET, A4 = 440 Hz),
//    keeping only 32.7 Hz (C1) .. 4186 Hz (C8). Each frame is scaled so its
//    strongest pitch class is 1.0.
// 2. Average the frames into one 12-bin profile; the strongest pitch class is
//    the tonal center.
// 3. Map that pitch class onto the major ("B") ring of the Camelot wheel.
// 4. Confidence guard: a C result (8B) over a weak profile is what silence
//    and noise produce, so it is reported as Unknown instead.

use rustfft::{num_complex::Complex, FftPlanner};
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, error, warn};

use super::stft::hann_window;

/// FFT size for the chromagram: ~10 Hz resolution at 44.1 kHz, enough to
/// separate adjacent semitones in the lower octaves.
const FFT_SIZE: usize = 4096;
const HOP_SIZE: usize = 2048;

const MIN_FREQ: f64 = 32.7;
const MAX_FREQ: f64 = 4186.0;

/// Frames whose strongest pitch class is below this are left unscaled.
const FRAME_NORM_FLOOR: f32 = 1e-6;

const PITCH_CLASSES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Camelot number of each major key, indexed by pitch class (0 = C .. 11 = B)
const CAMELOT_MAJOR: [u8; 12] = [8, 3, 10, 5, 12, 7, 2, 9, 4, 11, 6, 1];

/// Pitch class C lands on this label; the low-confidence guard targets it.
const C_MAJOR: Camelot = Camelot {
    number: 8,
    ring: Ring::B,
};

/// Inner (minor) or outer (major) ring of the Camelot wheel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ring {
    A,
    B,
}

/// One of the 24 Camelot labels, `1A`..`12A` / `1B`..`12B`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Camelot {
    number: u8,
    ring: Ring,
}

impl Camelot {
    pub fn new(number: u8, ring: Ring) -> Option<Self> {
        (1..=12).contains(&number).then_some(Self { number, ring })
    }

    /// Major-ring label for a pitch class (0 = C). Indices wrap modulo 12.
    pub fn from_pitch_class(pitch_class: usize) -> Self {
        Self {
            number: CAMELOT_MAJOR[pitch_class % 12],
            ring: Ring::B,
        }
    }

    pub fn number(&self) -> u8 {
        self.number
    }

    pub fn ring(&self) -> Ring {
        self.ring
    }
}

impl fmt::Display for Camelot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let letter = match self.ring {
            Ring::A => 'A',
            Ring::B => 'B',
        };
        write!(f, "{}{}", self.number, letter)
    }
}

/// Detected key, or `Unknown` when detection failed or was not trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    Camelot(Camelot),
    Unknown,
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Camelot(c) => c.fmt(f),
            Key::Unknown => f.write_str("Unknown"),
        }
    }
}

impl Serialize for Key {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("not a Camelot label: {0:?}")]
pub struct ParseKeyError(String);

impl FromStr for Key {
    type Err = ParseKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "Unknown" {
            return Ok(Key::Unknown);
        }
        let err = || ParseKeyError(s.to_string());
        let (number, ring) = if let Some(n) = s.strip_suffix('A') {
            (n, Ring::A)
        } else if let Some(n) = s.strip_suffix('B') {
            (n, Ring::B)
        } else {
            return Err(err());
        };
        let number: u8 = number.parse().map_err(|_| err())?;
        Camelot::new(number, ring).map(Key::Camelot).ok_or_else(err)
    }
}

/// Why a chroma-based key could not be produced.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum KeyDetectionFailure {
    #[error("Chroma feature extraction failed: no frames")]
    NoFrames,
    #[error("Chroma profile is not finite")]
    NonFinite,
}

/// Key of the harmonic signal. Never fails: any problem yields `Key::Unknown`.
pub fn detect_key(harmonic: &[f32], sample_rate: u32, low_confidence: f64) -> Key {
    let chroma = chromagram(harmonic, sample_rate);
    match key_from_chroma(&chroma, low_confidence) {
        Ok(key) => {
            debug!(%key, frames = chroma.len(), "Detected key");
            key
        }
        Err(e) => {
            error!("Key detection error: {}", e);
            Key::Unknown
        }
    }
}

/// Mean profile, tonic pick and low-confidence guard over a precomputed chromagram.
pub fn key_from_chroma(
    chroma: &[[f32; 12]],
    low_confidence: f64,
) -> Result<Key, KeyDetectionFailure> {
    if chroma.is_empty() {
        return Err(KeyDetectionFailure::NoFrames);
    }

    let profile = mean_profile(chroma);
    if profile.iter().any(|v| !v.is_finite()) {
        return Err(KeyDetectionFailure::NonFinite);
    }

    // First maximum wins, so an all-zero profile lands on C
    let tonic = profile
        .iter()
        .enumerate()
        .fold(0usize, |best, (i, &v)| if v > profile[best] { i } else { best });
    let camelot = Camelot::from_pitch_class(tonic);
    let mean_energy = profile.iter().sum::<f64>() / 12.0;
    debug!(tonic = PITCH_CLASSES[tonic], mean_energy, "Chroma profile");

    if camelot == C_MAJOR && mean_energy < low_confidence {
        warn!(
            "Potentially incorrect Key detected: {} (mean chroma {:.3}), adjusting...",
            camelot, mean_energy
        );
        return Ok(Key::Unknown);
    }

    Ok(Key::Camelot(camelot))
}

fn mean_profile(chroma: &[[f32; 12]]) -> [f64; 12] {
    let mut profile = [0.0f64; 12];
    for frame in chroma {
        for (acc, &v) in profile.iter_mut().zip(frame) {
            *acc += v as f64;
        }
    }
    let n = chroma.len() as f64;
    profile.iter_mut().for_each(|v| *v /= n);
    profile
}

/// Per-frame chroma vectors, each scaled so its maximum is 1.0.
///
/// Frames are centered on multiples of the hop with zero padding at both
/// ends, so any non-empty signal yields at least one frame.
pub fn chromagram(samples: &[f32], sample_rate: u32) -> Vec<[f32; 12]> {
    if samples.is_empty() || sample_rate == 0 {
        return Vec::new();
    }

    let window = hann_window(FFT_SIZE);
    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(FFT_SIZE);

    // semitones_from_a = 12 * log2(freq / 440); +9 shifts A to index 9 (C = 0)
    let bin_to_pitch_class: Vec<Option<usize>> = (0..FFT_SIZE / 2 + 1)
        .map(|bin| {
            let freq = bin as f64 * sample_rate as f64 / FFT_SIZE as f64;
            if !(MIN_FREQ..=MAX_FREQ).contains(&freq) {
                return None;
            }
            let semitones_from_a = 12.0 * (freq / 440.0).log2();
            Some(((semitones_from_a.round() as i32 + 9).rem_euclid(12)) as usize)
        })
        .collect();

    let num_frames = 1 + samples.len() / HOP_SIZE;
    let half = FFT_SIZE / 2;
    let mut frames = Vec::with_capacity(num_frames);
    let mut buffer = vec![Complex::new(0.0f32, 0.0); FFT_SIZE];

    for frame_idx in 0..num_frames {
        let center = frame_idx * HOP_SIZE;
        for (i, slot) in buffer.iter_mut().enumerate() {
            let sample = (center + i)
                .checked_sub(half)
                .and_then(|idx| samples.get(idx))
                .copied()
                .unwrap_or(0.0);
            *slot = Complex::new(sample * window[i], 0.0);
        }
        fft.process(&mut buffer);

        let mut chroma = [0.0f32; 12];
        for (bin, pc) in bin_to_pitch_class.iter().enumerate() {
            if let Some(pc) = pc {
                chroma[*pc] += buffer[bin].norm();
            }
        }

        let peak = chroma.iter().cloned().fold(0.0f32, f32::max);
        if peak > FRAME_NORM_FLOOR {
            chroma.iter_mut().for_each(|v| *v /= peak);
        }
        frames.push(chroma);
    }

    frames
}
