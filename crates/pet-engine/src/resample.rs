//! Linear-interpolation resampler.
//!
//! Cheap and artifact-prone on sibilants, but speech segments are short and already band
//! limited by the TTS vocoder.

/// Resample interleaved `samples` from `src_rate` to `dst_rate`.
///
/// Each output frame `i` reads source position `i / ratio` (`ratio = dst_rate / src_rate`) and
/// blends the two nearest source frames. Output length is `round(frames * ratio)` frames.
/// Equal rates return the input unchanged.
pub fn resample_linear(samples: &[f32], channels: usize, src_rate: u32, dst_rate: u32) -> Vec<f32> {
    let channels = channels.max(1);
    if src_rate == dst_rate || src_rate == 0 || dst_rate == 0 || samples.is_empty() {
        return samples.to_vec();
    }

    let frames = samples.len() / channels;
    if frames == 0 {
        return Vec::new();
    }
    let ratio = dst_rate as f64 / src_rate as f64;
    let out_frames = (frames as f64 * ratio).round() as usize;
    let last = frames - 1;

    let mut out = Vec::with_capacity(out_frames * channels);
    for i in 0..out_frames {
        let pos = i as f64 / ratio;
        let i1 = (pos.floor() as usize).min(last);
        let i2 = (pos.ceil() as usize).min(last);
        let weight = (pos - i1 as f64) as f32;
        for ch in 0..channels {
            let a = samples[i1 * channels + ch];
            if i1 == i2 {
                out.push(a);
            } else {
                let b = samples[i2 * channels + ch];
                out.push(a * (1.0 - weight) + b * weight);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_rates_are_identity() {
        let input = vec![0.1, -0.2, 0.3];
        assert_eq!(resample_linear(&input, 1, 24_000, 24_000), input);
    }

    #[test]
    fn output_length_is_rounded_ratio() {
        let input = vec![0.0; 1001];
        assert_eq!(resample_linear(&input, 1, 24_000, 48_000).len(), 2002);
        assert_eq!(resample_linear(&input, 1, 48_000, 24_000).len(), 501);
        assert_eq!(resample_linear(&input, 1, 22_050, 48_000).len(), 2179);
        assert_eq!(resample_linear(&[0.0; 7], 1, 3, 2).len(), 5);
    }

    #[test]
    fn upsampling_interpolates_midpoints() {
        let out = resample_linear(&[0.0, 1.0, 0.0], 1, 1_000, 2_000);
        assert_eq!(out.len(), 6);
        assert_eq!(out[0], 0.0);
        assert!((out[1] - 0.5).abs() < 1e-6);
        assert_eq!(out[2], 1.0);
        assert!((out[3] - 0.5).abs() < 1e-6);
        assert_eq!(out[5], 0.0);
    }

    #[test]
    fn downsampling_picks_source_frames() {
        let out = resample_linear(&[0.0, 1.0, 2.0, 3.0], 1, 2_000, 1_000);
        assert_eq!(out, vec![0.0, 2.0]);
    }

    #[test]
    fn channels_stay_separate() {
        let out = resample_linear(&[1.0, -1.0, 1.0, -1.0], 2, 1_000, 2_000);
        assert_eq!(out.len(), 8);
        assert!(out.chunks_exact(2).all(|f| f[0] == 1.0 && f[1] == -1.0));
    }
}
