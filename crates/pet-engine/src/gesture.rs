//! Renderer-native gestures.
//!
//! Some expressions and all motions are baked into the model itself; the engine only maps a
//! public name to the renderer's index and hands the result back to the host.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::expression::ExpressionSequencer;

/// A motion inside the model's motion groups.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotionRef {
    pub group: String,
    pub order: u32,
}

/// How a `set_expression` request was resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExpressionDispatch {
    /// The renderer should switch to its own expression at this index.
    Native(u32),
    /// A recorded track was started.
    Recorded,
    /// Unknown name; nothing changed.
    Ignored,
}

/// Name tables for renderer-native expressions and motions.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct GestureBook {
    /// Expression name to renderer expression index.
    pub native_expressions: HashMap<String, u32>,
    pub motions: HashMap<String, MotionRef>,
}

impl GestureBook {
    pub fn native_expression(&self, name: &str) -> Option<u32> {
        self.native_expressions.get(name).copied()
    }

    pub fn motion(&self, name: &str) -> Option<&MotionRef> {
        self.motions.get(name)
    }

    /// Native expressions win over recorded tracks with the same name.
    pub fn dispatch_expression(
        &self,
        name: &str,
        sequencer: &mut ExpressionSequencer,
    ) -> ExpressionDispatch {
        if let Some(order) = self.native_expression(name) {
            tracing::info!(name, order, "native expression");
            return ExpressionDispatch::Native(order);
        }
        if sequencer.play(name) {
            ExpressionDispatch::Recorded
        } else {
            ExpressionDispatch::Ignored
        }
    }
}
