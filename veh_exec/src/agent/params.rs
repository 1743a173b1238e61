//! Line following agent parameters

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::Deserialize;

use super::{pid::DerivativeRef, AgentKind};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for the control agent, loaded from `line_follow.toml`.
#[derive(Deserialize, Debug, Clone)]
pub struct Params {
    /// Which agent to run
    pub kind: AgentKind,

    /// Period of the agent step
    pub step_period_ms: u64,

    /// Colour box the line's pixels must fall inside of
    pub r_min: u8,
    pub r_max: u8,
    pub g_min: u8,
    pub g_max: u8,
    pub b_min: u8,
    pub b_max: u8,

    /// Offset from the right edge of the image of the scanned column
    pub height_offset: u32,

    /// Width the frame is resized to before scanning. The frame is scanned at its native size
    /// if not given.
    #[serde(default)]
    pub scan_width: Option<u32>,

    /// Lateral controller proportional gain
    pub lat_kp: f32,

    /// Lateral controller derivative gain
    pub lat_kd: f32,

    /// Lateral controller integral gain
    pub lat_ki: f32,

    /// Number of past errors kept by the lateral controller
    pub max_lat_history: usize,

    /// Lateral error scaling table, pairs of `[threshold, factor]`
    pub error_scaling: Vec<[f32; 2]>,

    /// Sample the derivative term is taken against
    #[serde(default)]
    pub derivative_ref: DerivativeRef,

    /// Throttle on flat ground
    pub flat_throttle: f32,

    /// Throttle when climbing a ramp
    pub up_throttle: f32,

    /// Throttle when descending a ramp
    pub down_throttle: f32,

    /// Pitch angle beyond which the vehicle is considered to be on a ramp
    pub ramp_angle_threshold_deg: f32,
}

#[cfg(test)]
impl Default for Params {
    fn default() -> Self {
        Self {
            kind: AgentKind::LineFollow,
            step_period_ms: 40,
            r_min: 180,
            r_max: 255,
            g_min: 180,
            g_max: 255,
            b_min: 0,
            b_max: 140,
            height_offset: 10,
            scan_width: None,
            lat_kp: 0.005,
            lat_kd: 0.075,
            lat_ki: 0.0,
            max_lat_history: 10,
            error_scaling: vec![
                [20.0, 0.1],
                [40.0, 0.75],
                [60.0, 1.0],
                [80.0, 1.5],
                [100.0, 1.75],
                [200.0, 3.0],
            ],
            derivative_ref: DerivativeRef::Oldest,
            flat_throttle: 0.25,
            up_throttle: 0.3,
            down_throttle: -0.01,
            ramp_angle_threshold_deg: 5.0,
        }
    }
}
