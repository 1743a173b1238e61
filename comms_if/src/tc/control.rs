//! # Control command
//!
//! Demanded throttle and steering, both normalised to [-1, 1]. On the wire the command is the
//! ASCII text `"throttle,steering"`.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ControlCmd {
    pub throttle: f32,
    pub steering: f32,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ControlCmd {
    /// Zero throttle and steering.
    pub const NEUTRAL: Self = Self {
        throttle: 0.0,
        steering: 0.0,
    };

    /// Create a new command, clamping both axes into [-1, 1].
    pub fn new(throttle: f32, steering: f32) -> Self {
        Self {
            throttle: clamp_axis(throttle),
            steering: clamp_axis(steering),
        }
    }

    /// Parse the command text.
    ///
    /// Missing or unparsable fields are taken as 0, text after the second field is ignored.
    pub fn from_text(text: &str) -> Self {
        let mut fields = text.trim().split(',').map(parse_axis);

        let throttle = fields.next().unwrap_or(0.0);
        let steering = fields.next().unwrap_or(0.0);

        Self::new(throttle, steering)
    }

    pub fn from_payload(payload: &[u8]) -> Self {
        Self::from_text(&String::from_utf8_lossy(payload))
    }

    pub fn to_text(&self) -> String {
        format!("{},{}", self.throttle, self.steering)
    }

    pub fn to_payload(&self) -> Vec<u8> {
        self.to_text().into_bytes()
    }

    pub fn is_neutral(&self) -> bool {
        *self == Self::NEUTRAL
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn parse_axis(field: &str) -> f32 {
    match field.trim().parse::<f32>() {
        Ok(v) if v.is_finite() => v,
        _ => 0.0,
    }
}

fn clamp_axis(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.max(-1.0).min(1.0)
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
