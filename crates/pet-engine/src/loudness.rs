//! Smoothed loudness envelope used for lip sync.

use std::sync::atomic::{AtomicU32, Ordering};

/// Weight of the new block against the previous envelope value.
pub const SMOOTHING: f32 = 0.5;
const PEAK_WEIGHT: f32 = 0.7;
const GAIN: f32 = 10.0;

/// Raw level of one output block: `max(rms, 0.7 * peak) * 10`.
pub fn block_level(block: &[f32]) -> f32 {
    if block.is_empty() {
        return 0.0;
    }
    let mut sum_sq = 0.0f32;
    let mut peak = 0.0f32;
    for &s in block {
        sum_sq += s * s;
        peak = peak.max(s.abs());
    }
    let rms = (sum_sq / block.len() as f32).sqrt();
    rms.max(peak * PEAK_WEIGHT) * GAIN
}

/// Single-writer, many-reader envelope.
///
/// The output callback is the only writer; animation ticks read the latest value. The value
/// is stored as `f32` bits so readers never take a lock.
#[derive(Debug, Default)]
pub struct LoudnessEnvelope {
    bits: AtomicU32,
}

impl LoudnessEnvelope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }

    /// Fold one output block into the envelope and return the new value.
    pub fn update(&self, block: &[f32]) -> f32 {
        let raw = block_level(block);
        let next = SMOOTHING * raw + (1.0 - SMOOTHING) * self.value();
        let next = if next.is_finite() { next } else { 0.0 };
        self.bits.store(next.to_bits(), Ordering::Relaxed);
        next
    }

    pub fn reset(&self) {
        self.bits.store(0.0f32.to_bits(), Ordering::Relaxed);
    }
}
