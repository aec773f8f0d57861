//! Speech output stage (CPAL output stream).
//!
//! The output callback pulls mono speech from the [`StreamingAudioPlayer`] one loudness block at
//! a time, duplicates it to every device channel, and converts to the device sample format.
//! Device buffers larger than a block are split so the loudness envelope keeps its per-block
//! cadence regardless of what buffer size the host granted.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, StreamTrait};

use crate::device;
use crate::stream::StreamingAudioPlayer;

/// Resolved output device and stream config.
pub struct OutputPlan {
    pub device: cpal::Device,
    pub device_name: String,
    pub config: cpal::StreamConfig,
    pub sample_format: cpal::SampleFormat,
}

impl OutputPlan {
    /// Pick a device (by name substring or default) and a config near `rate`.
    pub fn open(needle: Option<&str>, rate: u32, block_frames: usize) -> Result<Self> {
        let host = cpal::default_host();
        let device = device::pick_device(&host, needle)?;
        let device_name = device
            .description()
            .map(|d| d.to_string())
            .unwrap_or_else(|_| "<unknown>".to_string());
        let supported = device::pick_output_config(&device, rate)?;
        let mut config = supported.config();
        if let Some(size) = device::pick_buffer_size(&supported, block_frames) {
            config.buffer_size = size;
        }
        tracing::info!(
            device = %device_name,
            rate_hz = config.sample_rate,
            channels = config.channels,
            format = ?supported.sample_format(),
            "output device selected"
        );
        Ok(Self {
            device,
            device_name,
            config,
            sample_format: supported.sample_format(),
        })
    }

    /// Device sample rate; the speech player must run at this rate.
    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }
}

/// Names of the default host's output devices.
pub fn output_device_names() -> Result<Vec<String>> {
    device::list_devices(&cpal::default_host())
}

/// Owns the live output stream for one [`StreamingAudioPlayer`].
///
/// `cpal::Stream` is not `Send` on every platform, so this stays on the thread that built it.
pub struct AudioOutput {
    player: Arc<StreamingAudioPlayer>,
    plan: OutputPlan,
    stream: Option<cpal::Stream>,
    suspended: bool,
}

impl AudioOutput {
    pub fn new(player: Arc<StreamingAudioPlayer>, plan: OutputPlan) -> Self {
        Self {
            player,
            plan,
            stream: None,
            suspended: false,
        }
    }

    pub fn device_name(&self) -> &str {
        &self.plan.device_name
    }

    /// Make sure the device is running, then open the speech stream.
    ///
    /// Returns `false` if the player was already streaming.
    pub fn start_stream(&mut self) -> Result<bool> {
        self.ensure_running()?;
        Ok(self.player.start_stream())
    }

    /// Suspend the device; buffered audio and cursor are kept.
    pub fn pause(&mut self) -> Result<bool> {
        if !self.player.pause() {
            return Ok(false);
        }
        if let Some(stream) = &self.stream {
            stream.pause().context("pause output stream")?;
            self.suspended = true;
        }
        Ok(true)
    }

    pub fn resume(&mut self) -> Result<bool> {
        self.ensure_running()?;
        Ok(self.player.resume())
    }

    /// Discard buffered speech and release the device. Idempotent.
    pub fn stop(&mut self) {
        self.player.stop();
        if self.stream.take().is_some() {
            tracing::info!(device = %self.plan.device_name, "output stream released");
        }
        self.suspended = false;
    }

    fn ensure_running(&mut self) -> Result<()> {
        match &self.stream {
            Some(stream) if self.suspended => {
                stream.play().context("resume output stream")?;
                self.suspended = false;
            }
            Some(_) => {}
            None => {
                let stream = build_output_stream(&self.plan, &self.player)?;
                stream.play().context("start output stream")?;
                self.stream = Some(stream);
                self.suspended = false;
            }
        }
        Ok(())
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Build a CPAL output stream that drains `player`.
pub fn build_output_stream(
    plan: &OutputPlan,
    player: &Arc<StreamingAudioPlayer>,
) -> Result<cpal::Stream> {
    match plan.sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(plan, player),
        cpal::SampleFormat::I16 => build_stream::<i16>(plan, player),
        cpal::SampleFormat::I32 => build_stream::<i32>(plan, player),
        cpal::SampleFormat::U16 => build_stream::<u16>(plan, player),
        other => Err(anyhow!("Unsupported sample format: {other:?}")),
    }
}

fn build_stream<T>(plan: &OutputPlan, player: &Arc<StreamingAudioPlayer>) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels = plan.config.channels as usize;
    let player = player.clone();
    let mut scratch = vec![0.0f32; player.block_frames()];

    let err_fn = |err| tracing::warn!("output stream error: {err}");

    let stream = plan.device.build_output_stream(
        &plan.config,
        move |data: &mut [T], _| {
            render_into(&player, data, channels, &mut scratch);
        },
        err_fn,
        None,
    )?;
    Ok(stream)
}

/// Fill an interleaved device buffer from `player`, one block (or less) at a time.
///
/// `scratch` sets the block size.
pub fn render_into<T>(
    player: &StreamingAudioPlayer,
    data: &mut [T],
    channels: usize,
    scratch: &mut [f32],
) where
    T: cpal::Sample + cpal::FromSample<f32>,
{
    let channels = channels.max(1);
    let frames = data.len() / channels;
    let mut frame = 0;
    while frame < frames {
        let n = scratch.len().min(frames - frame);
        if n == 0 {
            break;
        }
        player.fill_block(&mut scratch[..n]);
        for (i, &s) in scratch[..n].iter().enumerate() {
            let base = (frame + i) * channels;
            for slot in &mut data[base..base + channels] {
                *slot = <T as cpal::Sample>::from_sample::<f32>(s);
            }
        }
        frame += n;
    }
    for slot in &mut data[frame * channels..] {
        *slot = <T as cpal::Sample>::from_sample::<f32>(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AudioConfig;
    use crate::testutil::build_wav;

    fn player_with(samples: &[i16]) -> StreamingAudioPlayer {
        let player = StreamingAudioPlayer::new(&AudioConfig {
            sample_rate: 8_000,
            block_frames: 4,
            wait_poll_ms: 5,
        });
        player.start_stream();
        let data: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        player.add_segment(&build_wav(1, 1, 8_000, 16, &data)).unwrap();
        player
    }

    #[test]
    fn mono_is_duplicated_to_every_channel() {
        let player = player_with(&[16_384, -16_384, 8_192]);
        let mut scratch = vec![0.0; 4];
        let mut out = vec![1.0f32; 8];
        render_into(&player, &mut out, 2, &mut scratch);
        assert_eq!(out, vec![0.5, 0.5, -0.5, -0.5, 0.25, 0.25, 0.0, 0.0]);
        assert_eq!(player.remaining_duration(), 0.0);
    }

    #[test]
    fn device_buffer_is_split_into_blocks() {
        let player = player_with(&[16_384; 10]);
        let mut scratch = vec![0.0; 4];
        let mut out = vec![0.0f32; 6];
        render_into(&player, &mut out, 1, &mut scratch);
        assert!(out.iter().all(|&s| s == 0.5));
        assert!((player.current_time() - 6.0 / 8_000.0).abs() < 1e-12);
        // Second call covers the rest and pads.
        render_into(&player, &mut out, 1, &mut scratch);
        assert_eq!(&out[..4], &[0.5; 4]);
        assert_eq!(&out[4..], &[0.0; 2]);
    }

    #[test]
    fn converts_to_integer_formats() {
        let player = player_with(&[16_384, -16_384]);
        let mut scratch = vec![0.0; 4];
        let mut out = vec![0i16; 3];
        render_into(&player, &mut out, 1, &mut scratch);
        assert_eq!(out[0], 16_384);
        assert_eq!(out[1], -16_384);
        assert_eq!(out[2], 0);
    }
}
