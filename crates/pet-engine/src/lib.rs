pub mod blend;
pub mod config;
pub mod decode;
pub mod device;
pub mod engine;
pub mod error;
pub mod expression;
pub mod gesture;
pub mod idle;
pub mod loudness;
pub mod playback;
pub mod resample;
pub mod status;
pub mod stream;

#[cfg(any(test, feature = "test-support"))]
pub mod testutil;

pub use pet_types::{ExpressionTrack, MotionSource, ParameterMap, StreamState, StreamStatus};
