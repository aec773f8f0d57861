//! Output device discovery and selection.
//!
//! Thin wrappers around CPAL for:
//! - listing output devices
//! - choosing the default device or one matched by name
//! - choosing a stream config close to the speech operating rate

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait};

/// Pick the first output device whose name contains `needle` (case-insensitive), or the host
/// default device when `needle` is `None`.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    if let Some(needle) = needle {
        let mut devices = host.output_devices().context("No output devices")?;
        return devices
            .find(|d| {
                d.description()
                    .ok()
                    .map(|n| matches_device_name(&n.name(), needle))
                    .unwrap_or(false)
            })
            .ok_or_else(|| anyhow!("No output device matched: {needle}"));
    }

    host.default_output_device()
        .ok_or_else(|| anyhow!("No default output device"))
}

/// Pick the supported output config whose rate is closest to `target_rate`.
///
/// Ties go to the better sample format (`f32` first).
pub fn pick_output_config(
    device: &cpal::Device,
    target_rate: u32,
) -> Result<cpal::SupportedStreamConfig> {
    let mut best: Option<(u32, u8, cpal::SupportedStreamConfig)> = None;

    for range in device
        .supported_output_configs()
        .context("query output configs")?
    {
        let rate = pick_rate_for_range(range.min_sample_rate(), range.max_sample_rate(), target_rate);
        let distance = rate.abs_diff(target_rate);
        let rank = sample_format_rank(range.sample_format());
        let replace = match &best {
            None => true,
            Some((b_distance, b_rank, _)) => is_better_candidate(distance, rank, *b_distance, *b_rank),
        };
        if replace {
            best = Some((distance, rank, range.with_sample_rate(rate)));
        }
    }

    best.map(|(_, _, cfg)| cfg)
        .ok_or_else(|| anyhow!("No supported output configs"))
}

/// Ask for device buffers of one loudness block when the device allows it.
///
/// Returns `None` when the device only supports its default buffer size.
pub fn pick_buffer_size(
    config: &cpal::SupportedStreamConfig,
    block_frames: usize,
) -> Option<cpal::BufferSize> {
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            Some(cpal::BufferSize::Fixed(clamp_block(block_frames, *min, *max)))
        }
        cpal::SupportedBufferSize::Unknown => None,
    }
}

/// Names of the host's output devices, in enumeration order.
pub fn list_devices(host: &cpal::Host) -> Result<Vec<String>> {
    let devices = host.output_devices().context("No output devices")?;
    let mut names = Vec::new();
    for d in devices {
        names.push(d.description()?.to_string());
    }
    Ok(names)
}

fn clamp_block(block_frames: usize, min: u32, max: u32) -> u32 {
    let want = u32::try_from(block_frames).unwrap_or(u32::MAX);
    if min > max {
        return min;
    }
    want.clamp(min, max)
}

fn pick_rate_for_range(min: u32, max: u32, target: u32) -> u32 {
    target.clamp(min, max.max(min))
}

fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::F32 => 0,
        cpal::SampleFormat::I32 => 1,
        cpal::SampleFormat::I16 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}

fn is_better_candidate(distance: u32, rank: u8, best_distance: u32, best_rank: u8) -> bool {
    if distance != best_distance {
        distance < best_distance
    } else {
        rank < best_rank
    }
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_name_match_is_case_insensitive() {
        assert!(matches_device_name("USB Headset", "headset"));
        assert!(matches_device_name("usb headset", "USB"));
        assert!(!matches_device_name("USB Headset", "speaker"));
        assert!(!matches_device_name("USB Headset", "  "));
    }

    #[test]
    fn rate_is_clamped_into_range() {
        assert_eq!(pick_rate_for_range(8_000, 48_000, 24_000), 24_000);
        assert_eq!(pick_rate_for_range(44_100, 96_000, 24_000), 44_100);
        assert_eq!(pick_rate_for_range(8_000, 16_000, 24_000), 16_000);
    }

    #[test]
    fn closer_rate_beats_better_format() {
        assert!(is_better_candidate(0, 2, 20_100, 0));
        assert!(!is_better_candidate(24_000, 0, 0, 3));
        assert!(is_better_candidate(100, 0, 100, 2));
    }

    #[test]
    fn block_request_respects_device_limits() {
        assert_eq!(clamp_block(400, 64, 4096), 400);
        assert_eq!(clamp_block(16, 64, 4096), 64);
        assert_eq!(clamp_block(10_000, 64, 4096), 4096);
    }
}
