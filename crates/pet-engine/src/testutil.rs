//! Synthetic WAV buffers for tests. Other crates enable the `test-support` feature.

/// Assemble a RIFF/WAVE buffer with a 16-byte `fmt ` chunk and one `data` chunk.
pub fn build_wav(
    audio_format: u16,
    channels: u16,
    sample_rate: u32,
    bits_per_sample: u16,
    data: &[u8],
) -> Vec<u8> {
    build_wav_with_chunks(audio_format, channels, sample_rate, bits_per_sample, &[], data)
}

/// Like [`build_wav`] but inserts `extra` chunks (id, body) between the header and `fmt `.
pub fn build_wav_with_chunks(
    audio_format: u16,
    channels: u16,
    sample_rate: u32,
    bits_per_sample: u16,
    extra: &[(&[u8; 4], &[u8])],
    data: &[u8],
) -> Vec<u8> {
    let block_align = channels * (bits_per_sample / 8);
    let byte_rate = sample_rate * block_align as u32;

    let mut body = Vec::new();
    body.extend_from_slice(b"WAVE");
    for (id, chunk) in extra {
        body.extend_from_slice(*id);
        body.extend_from_slice(&(chunk.len() as u32).to_le_bytes());
        body.extend_from_slice(chunk);
        if chunk.len() % 2 == 1 {
            body.push(0);
        }
    }
    body.extend_from_slice(b"fmt ");
    body.extend_from_slice(&16u32.to_le_bytes());
    body.extend_from_slice(&audio_format.to_le_bytes());
    body.extend_from_slice(&channels.to_le_bytes());
    body.extend_from_slice(&sample_rate.to_le_bytes());
    body.extend_from_slice(&byte_rate.to_le_bytes());
    body.extend_from_slice(&block_align.to_le_bytes());
    body.extend_from_slice(&bits_per_sample.to_le_bytes());
    body.extend_from_slice(b"data");
    body.extend_from_slice(&(data.len() as u32).to_le_bytes());
    body.extend_from_slice(data);

    let mut out = Vec::with_capacity(body.len() + 8);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(&body);
    out
}

/// Mono 16-bit PCM sine tone.
pub fn pcm16_sine_wav(freq_hz: f32, sample_rate: u32, secs: f32, amplitude: f32) -> Vec<u8> {
    let frames = (sample_rate as f32 * secs).round() as usize;
    let mut data = Vec::with_capacity(frames * 2);
    for i in 0..frames {
        let t = i as f32 / sample_rate as f32;
        let v = (t * freq_hz * std::f32::consts::TAU).sin() * amplitude;
        let s = (v * 32767.0) as i16;
        data.extend_from_slice(&s.to_le_bytes());
    }
    build_wav(1, 1, sample_rate, 16, &data)
}
