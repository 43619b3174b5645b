// Decoder adapter: any supported file -> mono f32 PCM at the analysis rate.
//
// Symphonia handles container/codec probing; channels are averaged to mono
// and the result is resampled with rubato when the native rate differs.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use std::path::Path;
use symphonia::core::audio::{AudioBuffer, AudioBufferRef, Signal};
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::conv::FromSample;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::sample::Sample;
use tracing::{debug, warn};

use crate::error::DecodeError;

/// Decoded audio ready for DSP analysis.
#[derive(Debug, Clone)]
pub struct MonoAudio {
    /// Mono samples, nominally in [-1.0, 1.0]
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl MonoAudio {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }
}

/// Decode a whole file to mono and bring it to `target_rate`.
pub fn decode_to_mono(path: &Path, target_rate: u32) -> Result<MonoAudio, DecodeError> {
    let audio = decode_native(path)?;
    if audio.sample_rate == target_rate || audio.samples.is_empty() {
        return Ok(MonoAudio::new(audio.samples, target_rate));
    }
    let samples = resample(&audio.samples, audio.sample_rate, target_rate)?;
    Ok(MonoAudio::new(samples, target_rate))
}

/// Decode at the file's own sample rate.
fn decode_native(path: &Path) -> Result<MonoAudio, DecodeError> {
    let file = std::fs::File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension() {
        hint.with_extension(&ext.to_string_lossy());
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| DecodeError::Probe(e.to_string()))?;

    let mut format_reader = probed.format;
    let track = format_reader.default_track().ok_or(DecodeError::NoTrack)?;
    let track_id = track.id;
    let sample_rate = track.codec_params.sample_rate.unwrap_or(44100);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| DecodeError::Codec(e.to_string()))?;

    let mut samples: Vec<f32> = Vec::new();

    loop {
        let packet = match format_reader.next_packet() {
            Ok(packet) => packet,
            Err(symphonia::core::errors::Error::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => return Err(DecodeError::Packet(e.to_string())),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => samples.extend(mix_to_mono(&decoded)),
            Err(symphonia::core::errors::Error::DecodeError(msg)) => {
                warn!(path = %path.display(), "Skipping corrupted packet: {}", msg);
            }
            Err(e) => return Err(DecodeError::Packet(e.to_string())),
        }
    }

    debug!(
        path = %path.display(),
        samples = samples.len(),
        sample_rate,
        "Decoded to mono"
    );

    Ok(MonoAudio::new(samples, sample_rate))
}

fn mix_to_mono(decoded: &AudioBufferRef) -> Vec<f32> {
    match decoded {
        AudioBufferRef::F32(buf) => average_channels(buf),
        AudioBufferRef::U8(buf) => average_channels(buf),
        AudioBufferRef::U16(buf) => average_channels(buf),
        AudioBufferRef::U24(buf) => average_channels(buf),
        AudioBufferRef::U32(buf) => average_channels(buf),
        AudioBufferRef::S8(buf) => average_channels(buf),
        AudioBufferRef::S16(buf) => average_channels(buf),
        AudioBufferRef::S24(buf) => average_channels(buf),
        AudioBufferRef::S32(buf) => average_channels(buf),
        AudioBufferRef::F64(buf) => average_channels(buf),
    }
}

fn average_channels<S>(buf: &AudioBuffer<S>) -> Vec<f32>
where
    S: Sample,
    f32: FromSample<S>,
{
    let channels = buf.spec().channels.count();
    let frames = buf.frames();
    if channels == 0 || frames == 0 {
        return Vec::new();
    }

    let mut mono = vec![0.0f32; frames];
    let scale = 1.0 / channels as f32;
    for ch in 0..channels {
        for (out, &sample) in mono.iter_mut().zip(buf.chan(ch)) {
            *out += f32::from_sample(sample) * scale;
        }
    }
    mono
}

/// Resample a mono signal in one pass.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>, DecodeError> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }
    if from_rate == 0 {
        return Err(DecodeError::Resample("source sample rate is 0".to_string()));
    }

    debug!("Resampling from {}Hz to {}Hz", from_rate, to_rate);

    let mut resampler = FastFixedIn::<f32>::new(
        to_rate as f64 / from_rate as f64,
        1.0,
        PolynomialDegree::Septic,
        samples.len(),
        1,
    )
    .map_err(|e| DecodeError::Resample(e.to_string()))?;

    let planar_input = vec![samples.to_vec()];
    let mut output = resampler
        .process(&planar_input, None)
        .map_err(|e| DecodeError::Resample(e.to_string()))?;

    Ok(output.pop().unwrap_or_default())
}
