//! Engine status snapshot for hosts.

use pet_types::StreamStatus;
use serde::Serialize;

use crate::idle::IdleState;

/// Point-in-time view of the speech stream and the animation state.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EngineStatus {
    pub stream: StreamStatus,
    /// Recorded expression currently playing.
    pub expression: Option<String>,
    /// Host ticks the current expression has been shown for.
    pub expression_frame: Option<u64>,
    pub idle_state: IdleState,
    /// No expression playing and nothing left to relax.
    pub settled: bool,
    /// Whether the rest pose has been captured (first tick has run).
    pub rest_captured: bool,
    /// Gaze target `(x, y)` in `[-1, 1]`.
    pub focus: (f32, f32),
}

#[cfg(test)]
mod tests {
    use super::*;
    use pet_types::StreamState;

    #[test]
    fn serializes_for_status_reports() {
        let status = EngineStatus {
            stream: StreamStatus {
                state: StreamState::Paused,
                sample_rate: 24_000,
                ..StreamStatus::default()
            },
            expression: Some("wave".into()),
            expression_frame: Some(12),
            idle_state: IdleState::HeadShake,
            settled: false,
            rest_captured: true,
            focus: (0.5, 0.0),
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["stream"]["state"], "paused");
        assert_eq!(json["idle_state"], "head_shake");
        assert_eq!(json["expression"], "wave");
        assert_eq!(json["focus"][0], 0.5);
    }
}
