//! Streaming speech player.
//!
//! Owns one growing mono sample buffer at the operating rate. Speech arrives in segments
//! (one WAV payload each) and is appended in submission order; the output callback drains the
//! buffer block by block and updates the loudness envelope from every block it emits.
//!
//! ## Completion
//! Every accepted segment records the buffer position where it ends. Callers block in
//! [`StreamingAudioPlayer::wait_until_finish`] on a condition variable that the output callback
//! signals whenever the read cursor moves, so a waiter wakes as soon as its segment has been
//! handed to the device. Stopping the stream wakes all waiters with [`StreamError::Cancelled`].
//!
//! ## Threading
//! Buffer, cursor and segment table live under one mutex. The output callback holds it only
//! for the copy; decoding and resampling run before the lock is taken.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use pet_types::{StreamState, StreamStatus};

use crate::config::AudioConfig;
use crate::decode::decode_for_playback;
use crate::error::StreamError;
use crate::loudness::LoudnessEnvelope;

/// Identifier handed out for each accepted segment. Starts at 1 and never repeats.
pub type SegmentId = u64;

const DATA_URL_PREFIX: &str = "data:audio/wav;base64,";

/// One accepted unit of speech audio.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioSegment {
    pub id: SegmentId,
    /// When the segment was accepted.
    pub submitted_at: Instant,
    /// First sample of the segment inside the playback buffer.
    pub start_sample: usize,
    /// One past the last sample of the segment inside the playback buffer.
    pub end_sample: usize,
    /// Total buffered duration, in seconds, once this segment was appended.
    pub end_time: f64,
}

impl AudioSegment {
    pub fn len_samples(&self) -> usize {
        self.end_sample - self.start_sample
    }
}

struct StreamInner {
    state: StreamState,
    buffer: Vec<f32>,
    position: usize,
    segments: BTreeMap<SegmentId, AudioSegment>,
    next_id: SegmentId,
}

impl StreamInner {
    fn accepts_segments(&self) -> bool {
        matches!(self.state, StreamState::Streaming | StreamState::Paused)
    }
}

/// Streaming speech player shared between the output callback and control code.
pub struct StreamingAudioPlayer {
    sample_rate: u32,
    block_frames: usize,
    wait_poll: Duration,
    inner: Mutex<StreamInner>,
    cv: Condvar,
    loudness: LoudnessEnvelope,
}

impl StreamingAudioPlayer {
    pub fn new(cfg: &AudioConfig) -> Self {
        Self {
            sample_rate: cfg.sample_rate.max(1),
            block_frames: cfg.block_frames.max(1),
            wait_poll: cfg.wait_poll(),
            inner: Mutex::new(StreamInner {
                state: StreamState::Idle,
                buffer: Vec::new(),
                position: 0,
                segments: BTreeMap::new(),
                next_id: 1,
            }),
            cv: Condvar::new(),
            loudness: LoudnessEnvelope::new(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Samples per output block.
    pub fn block_frames(&self) -> usize {
        self.block_frames
    }

    pub fn state(&self) -> StreamState {
        self.lock().state
    }

    /// Begin accepting segments. Returns `false` if a stream is already running.
    pub fn start_stream(&self) -> bool {
        let mut g = self.lock();
        if g.accepts_segments() {
            tracing::warn!("stream is already playing");
            return false;
        }
        g.state = StreamState::Streaming;
        tracing::info!(rate_hz = self.sample_rate, "speech stream started");
        true
    }

    /// Decode a WAV payload, append it to the playback buffer, and return its segment id.
    ///
    /// Rejected payloads leave the buffer untouched; playback of earlier segments continues.
    pub fn add_segment(&self, wav: &[u8]) -> Result<SegmentId, StreamError> {
        if !self.lock().accepts_segments() {
            tracing::warn!("stream not started; segment rejected");
            return Err(StreamError::NotStreaming);
        }

        let samples = decode_for_playback(wav, self.sample_rate).map_err(|e| {
            tracing::warn!("speech segment rejected: {e}");
            StreamError::Format(e)
        })?;

        let mut g = self.lock();
        // stop() may have raced with the decode.
        if !g.accepts_segments() {
            return Err(StreamError::NotStreaming);
        }
        let id = g.next_id;
        g.next_id += 1;
        let start_sample = g.buffer.len();
        g.buffer.extend_from_slice(&samples);
        let end_sample = g.buffer.len();
        let end_time = end_sample as f64 / self.sample_rate as f64;
        g.segments.insert(
            id,
            AudioSegment {
                id,
                submitted_at: Instant::now(),
                start_sample,
                end_sample,
                end_time,
            },
        );
        tracing::info!(
            id,
            samples = samples.len(),
            end_time_s = end_time,
            "speech segment buffered"
        );
        Ok(id)
    }

    /// Like [`StreamingAudioPlayer::add_segment`] for base64 payloads, with or without a
    /// `data:audio/wav;base64,` prefix.
    pub fn add_base64_segment(&self, payload: &str) -> Result<SegmentId, StreamError> {
        let encoded = payload.trim();
        let encoded = encoded.strip_prefix(DATA_URL_PREFIX).unwrap_or(encoded);
        let bytes = STANDARD.decode(encoded)?;
        self.add_segment(&bytes)
    }

    /// Block until segment `id` has been fully handed to the output callback.
    pub fn wait_until_finish(&self, id: SegmentId) -> Result<(), StreamError> {
        self.wait_until_finish_or_cancel(id, None)
    }

    /// Block until segment `id` has played, `cancel` is set, or the stream is stopped.
    ///
    /// Must not be called from the animation tick or the output callback.
    pub fn wait_until_finish_or_cancel(
        &self,
        id: SegmentId,
        cancel: Option<&AtomicBool>,
    ) -> Result<(), StreamError> {
        let mut g = self.lock();
        let end_sample = g
            .segments
            .get(&id)
            .map(|s| s.end_sample)
            .ok_or(StreamError::NotFound(id))?;
        tracing::debug!(
            id,
            current_s = g.position as f64 / self.sample_rate as f64,
            end_s = end_sample as f64 / self.sample_rate as f64,
            "waiting for segment"
        );

        loop {
            if cancel.is_some_and(|c| c.load(Ordering::Relaxed)) {
                return Err(StreamError::Cancelled);
            }
            if !g.segments.contains_key(&id) {
                return Err(StreamError::Cancelled);
            }
            if g.position >= end_sample {
                return Ok(());
            }
            let (ng, _timeout) = self
                .cv
                .wait_timeout(g, self.wait_poll)
                .unwrap_or_else(PoisonError::into_inner);
            g = ng;
        }
    }

    /// Output callback body: fill `out` from the buffer and update the loudness envelope.
    ///
    /// Copies up to `out.len()` samples from the read cursor, zero-fills any shortfall, and
    /// advances the cursor by the number of real samples copied. Outside `Streaming` the block
    /// is silence and the cursor does not move. Returns the number of real samples copied.
    pub fn fill_block(&self, out: &mut [f32]) -> usize {
        let copied = {
            let mut g = self.lock();
            if g.state == StreamState::Streaming {
                let start = g.position;
                let n = out.len().min(g.buffer.len() - start);
                out[..n].copy_from_slice(&g.buffer[start..start + n]);
                out[n..].fill(0.0);
                g.position += n;
                n
            } else {
                out.fill(0.0);
                0
            }
        };
        if copied > 0 {
            self.cv.notify_all();
        }
        self.loudness.update(out);
        copied
    }

    /// Suspend output without discarding buffered audio.
    pub fn pause(&self) -> bool {
        let mut g = self.lock();
        if g.state != StreamState::Streaming {
            return false;
        }
        g.state = StreamState::Paused;
        tracing::info!("speech stream paused");
        true
    }

    /// Continue output from where [`StreamingAudioPlayer::pause`] left it.
    pub fn resume(&self) -> bool {
        let mut g = self.lock();
        if g.state != StreamState::Paused {
            return false;
        }
        g.state = StreamState::Streaming;
        tracing::info!("speech stream resumed");
        true
    }

    /// Discard all audio and segment records and rewind the cursor.
    ///
    /// Safe to call at any time and any number of times. Pending waiters return
    /// [`StreamError::Cancelled`].
    pub fn stop(&self) {
        {
            let mut g = self.lock();
            if g.state != StreamState::Stopped {
                tracing::info!(
                    segments = g.segments.len(),
                    "speech stream stopped"
                );
            }
            g.state = StreamState::Stopped;
            g.position = 0;
            g.buffer = Vec::new();
            g.segments.clear();
        }
        self.cv.notify_all();
    }

    /// Current loudness envelope value (lip-sync input).
    pub fn loudness(&self) -> f32 {
        self.loudness.value()
    }

    /// Seconds of audio handed to the output so far.
    pub fn current_time(&self) -> f64 {
        self.lock().position as f64 / self.sample_rate as f64
    }

    /// Seconds of audio accepted so far.
    pub fn total_duration(&self) -> f64 {
        self.lock().buffer.len() as f64 / self.sample_rate as f64
    }

    /// Seconds of buffered audio not yet played.
    pub fn remaining_duration(&self) -> f64 {
        let g = self.lock();
        (g.buffer.len() - g.position) as f64 / self.sample_rate as f64
    }

    pub fn segment(&self, id: SegmentId) -> Option<AudioSegment> {
        self.lock().segments.get(&id).cloned()
    }

    /// Samples belonging to segment `id`, copied out of the playback buffer.
    pub fn segment_samples(&self, id: SegmentId) -> Option<Vec<f32>> {
        let g = self.lock();
        let seg = g.segments.get(&id)?;
        Some(g.buffer[seg.start_sample..seg.end_sample].to_vec())
    }

    pub fn status(&self) -> StreamStatus {
        let g = self.lock();
        StreamStatus {
            state: g.state,
            sample_rate: self.sample_rate,
            buffered_secs: g.buffer.len() as f64 / self.sample_rate as f64,
            played_secs: g.position as f64 / self.sample_rate as f64,
            segments: g.segments.len(),
            loudness: self.loudness.value(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StreamInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
