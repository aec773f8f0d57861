//! WAV decode stage.
//!
//! Parses a little-endian RIFF/WAVE buffer into normalized `f32` samples:
//! - walks chunks until `data`, skipping anything it does not understand
//! - accepts only uncompressed PCM (`audioFormat == 1`)
//! - converts 8/16/24-bit integer and 32-bit float samples to `[-1, 1]`

use crate::error::FormatError;
use crate::resample::resample_linear;

const RIFF_HEADER_LEN: usize = 12;
const CHUNK_HEADER_LEN: usize = 8;
const FMT_MIN_LEN: usize = 16;
const PCM_FORMAT_TAG: u16 = 1;

/// Stream parameters read from the `fmt ` chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WavFormat {
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
}

impl WavFormat {
    pub fn bytes_per_sample(&self) -> usize {
        self.bits_per_sample as usize / 8
    }

    fn block_align(&self) -> usize {
        self.bytes_per_sample() * self.channels as usize
    }
}

/// Decoded interleaved samples at the source rate.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedAudio {
    /// Interleaved samples: `frame0[ch0], frame0[ch1], ..., frame1[ch0], ...`.
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: usize,
}

impl DecodedAudio {
    /// Number of sample frames (samples per channel).
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels
        }
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.frames() as f64 / self.sample_rate as f64
        }
    }

    /// Average all channels into one.
    pub fn into_mono(self) -> Vec<f32> {
        if self.channels <= 1 {
            return self.samples;
        }
        let scale = 1.0 / self.channels as f32;
        self.samples
            .chunks_exact(self.channels)
            .map(|frame| frame.iter().sum::<f32>() * scale)
            .collect()
    }
}

/// Decode a RIFF/WAVE buffer into interleaved `f32` samples.
///
/// Fails with [`FormatError`] when the signature is absent, the codec is not PCM, the bit depth
/// is unsupported, or a chunk runs past the end of the buffer.
pub fn decode_wav(bytes: &[u8]) -> Result<DecodedAudio, FormatError> {
    if bytes.len() < RIFF_HEADER_LEN || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return Err(FormatError::MissingSignature);
    }

    let mut offset = RIFF_HEADER_LEN;
    let mut format: Option<WavFormat> = None;

    while offset < bytes.len() {
        let header = bytes
            .get(offset..offset + CHUNK_HEADER_LEN)
            .ok_or_else(|| FormatError::Truncated("chunk header".to_string()))?;
        let id = &header[0..4];
        let size = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
        let body_start = offset + CHUNK_HEADER_LEN;
        let body = bytes
            .get(body_start..body_start.saturating_add(size))
            .ok_or_else(|| FormatError::Truncated(chunk_name(id)))?;

        match id {
            b"fmt " => format = Some(parse_format(body)?),
            b"data" => {
                let format = format.ok_or(FormatError::DataBeforeFormat)?;
                return Ok(DecodedAudio {
                    samples: extract_samples(body, &format),
                    sample_rate: format.sample_rate,
                    channels: format.channels as usize,
                });
            }
            _ => {}
        }

        // Chunks are word aligned; odd-sized bodies carry one pad byte.
        offset = body_start + size + (size & 1);
    }

    Err(FormatError::MissingData)
}

/// Decode, downmix to mono, and resample to `target_rate` for the playback buffer.
pub fn decode_for_playback(bytes: &[u8], target_rate: u32) -> Result<Vec<f32>, FormatError> {
    let decoded = decode_wav(bytes)?;
    let source_rate = decoded.sample_rate;
    let mono = decoded.into_mono();
    if source_rate == target_rate {
        return Ok(mono);
    }
    tracing::info!(
        from_hz = source_rate,
        to_hz = target_rate,
        samples = mono.len(),
        "resampling speech segment"
    );
    Ok(resample_linear(&mono, 1, source_rate, target_rate))
}

fn parse_format(body: &[u8]) -> Result<WavFormat, FormatError> {
    if body.len() < FMT_MIN_LEN {
        return Err(FormatError::Truncated("fmt ".to_string()));
    }
    let audio_format = u16::from_le_bytes([body[0], body[1]]);
    let channels = u16::from_le_bytes([body[2], body[3]]);
    let sample_rate = u32::from_le_bytes([body[4], body[5], body[6], body[7]]);
    let bits_per_sample = u16::from_le_bytes([body[14], body[15]]);

    tracing::debug!(
        audio_format,
        channels,
        sample_rate,
        bits_per_sample,
        "wav format"
    );

    if audio_format != PCM_FORMAT_TAG {
        return Err(FormatError::UnsupportedCodec(audio_format));
    }
    if channels == 0 {
        return Err(FormatError::InvalidFormat("zero channels"));
    }
    if sample_rate == 0 {
        return Err(FormatError::InvalidFormat("zero sample rate"));
    }
    if !matches!(bits_per_sample, 8 | 16 | 24 | 32) {
        return Err(FormatError::UnsupportedBitDepth(bits_per_sample));
    }

    Ok(WavFormat {
        channels,
        sample_rate,
        bits_per_sample,
    })
}

/// Convert whole frames of `data` to normalized `f32`. A trailing partial frame is dropped.
fn extract_samples(data: &[u8], format: &WavFormat) -> Vec<f32> {
    let bytes_per_sample = format.bytes_per_sample();
    let whole = data.len() / format.block_align() * format.block_align();
    let data = &data[..whole];

    match format.bits_per_sample {
        8 => data.iter().map(|&b| (b as f32 - 128.0) / 128.0).collect(),
        16 => data
            .chunks_exact(bytes_per_sample)
            .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32_768.0)
            .collect(),
        24 => data
            .chunks_exact(bytes_per_sample)
            .map(|b| (i32::from_le_bytes([0, b[0], b[1], b[2]]) >> 8) as f32 / 8_388_608.0)
            .collect(),
        32 => data
            .chunks_exact(bytes_per_sample)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
        _ => Vec::new(),
    }
}

fn chunk_name(id: &[u8]) -> String {
    String::from_utf8_lossy(id).into_owned()
}
