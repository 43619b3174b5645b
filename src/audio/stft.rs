// Short-time Fourier transform helpers shared by HPSS, onset detection and chroma.
//
// Frames are centered: the signal is zero-padded by frame_size/2 on both sides,
// so frame t covers samples around t * hop_size.

use rustfft::{num_complex::Complex, FftPlanner};
use std::f32::consts::PI;

/// One row per frame, `frame_size / 2 + 1` bins per row.
pub type Spectrogram = Vec<Vec<Complex<f32>>>;

/// Periodic Hann window (the variant that overlap-adds to a constant).
pub fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / size as f32).cos()))
        .collect()
}

/// Number of centered frames for a signal of `len` samples.
pub fn frame_count(len: usize, hop_size: usize) -> usize {
    if len == 0 || hop_size == 0 {
        0
    } else {
        1 + len / hop_size
    }
}

pub fn stft(samples: &[f32], frame_size: usize, hop_size: usize) -> Spectrogram {
    let n_frames = frame_count(samples.len(), hop_size);
    if n_frames == 0 || frame_size == 0 {
        return Vec::new();
    }

    let window = hann_window(frame_size);
    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(frame_size);
    let pad = frame_size / 2;
    let n_bins = frame_size / 2 + 1;

    let mut frames = Vec::with_capacity(n_frames);
    let mut buffer = vec![Complex::new(0.0f32, 0.0); frame_size];

    for t in 0..n_frames {
        let start = (t * hop_size) as isize - pad as isize;
        for (i, slot) in buffer.iter_mut().enumerate() {
            let idx = start + i as isize;
            let sample = if idx >= 0 && (idx as usize) < samples.len() {
                samples[idx as usize]
            } else {
                0.0
            };
            *slot = Complex::new(sample * window[i], 0.0);
        }
        fft.process(&mut buffer);
        frames.push(buffer[..n_bins].to_vec());
    }

    frames
}

/// Inverse of [`stft`], trimmed (or zero-extended) to `length` samples.
pub fn istft(spec: &Spectrogram, frame_size: usize, hop_size: usize, length: usize) -> Vec<f32> {
    if spec.is_empty() || length == 0 {
        return vec![0.0; length];
    }

    let window = hann_window(frame_size);
    let mut planner = FftPlanner::new();
    let ifft = planner.plan_fft_inverse(frame_size);
    let pad = frame_size / 2;
    let padded_len = frame_size + hop_size * (spec.len() - 1);

    let mut output = vec![0.0f32; padded_len];
    let mut window_sum = vec![0.0f32; padded_len];
    let mut buffer = vec![Complex::new(0.0f32, 0.0); frame_size];
    let scale = 1.0 / frame_size as f32;

    for (t, frame) in spec.iter().enumerate() {
        // Rebuild the full spectrum from the non-negative half (Hermitian symmetry)
        for (k, slot) in buffer.iter_mut().enumerate() {
            *slot = if k < frame.len() {
                frame[k]
            } else {
                frame[frame_size - k].conj()
            };
        }
        ifft.process(&mut buffer);

        let offset = t * hop_size;
        for i in 0..frame_size {
            output[offset + i] += buffer[i].re * scale * window[i];
            window_sum[offset + i] += window[i] * window[i];
        }
    }

    (0..length)
        .map(|i| {
            let idx = i + pad;
            if idx < padded_len && window_sum[idx] > 1e-8 {
                output[idx] / window_sum[idx]
            } else {
                0.0
            }
        })
        .collect()
}

/// Magnitudes of a spectrogram, same layout.
pub fn magnitudes(spec: &Spectrogram) -> Vec<Vec<f32>> {
    spec.iter()
        .map(|frame| frame.iter().map(|c| c.norm()).collect())
        .collect()
}
