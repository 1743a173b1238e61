//! # Localisation module
//!
//! Turns raw pose samples from the tracking source into the vehicle state carried on the state
//! channel. Positions are smoothed by averaging each raw sample with the previous smoothed
//! position, velocity is the finite difference of the raw sample against the previous position.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use comms_if::eqpt::VehicleState;
use nalgebra::Vector3;
use serde::Serialize;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Attitude as roll, pitch and yaw in radians.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct EulerAngles {
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
}

/// Vehicle state estimator.
#[derive(Debug, Clone)]
pub struct StateEstimator {
    /// Previous smoothed position and the time it was sampled at
    prev: Option<(Vector3<f32>, f64)>,

    velocity: Vector3<f32>,

    state: VehicleState,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for StateEstimator {
    fn default() -> Self {
        Self {
            prev: None,
            velocity: Vector3::zeros(),
            state: VehicleState::default(),
        }
    }
}

impl StateEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update the estimate with a new pose sample and return the new state.
    ///
    /// The first sample initialises the position with zero velocity. If the sample isn't newer
    /// than the previous one the previous velocity is kept.
    pub fn on_pose_update(
        &mut self,
        position: Vector3<f32>,
        euler: EulerAngles,
        timestamp_s: f64,
    ) -> VehicleState {
        let smoothed = match self.prev {
            None => {
                self.velocity = Vector3::zeros();
                position
            }
            Some((prev_pos, prev_t)) => {
                let dt = timestamp_s - prev_t;
                if dt > 0.0 {
                    self.velocity = (position - prev_pos) / dt as f32;
                }

                (position + prev_pos) / 2.0
            }
        };

        self.prev = Some((smoothed, timestamp_s));

        self.state = VehicleState {
            x: smoothed.x,
            y: smoothed.y,
            z: smoothed.z,
            roll: euler.roll,
            pitch: euler.pitch,
            yaw: euler.yaw,
            vx: self.velocity.x,
            vy: self.velocity.y,
            vz: self.velocity.z,
        };

        self.state
    }

    pub fn state(&self) -> VehicleState {
        self.state
    }

    /// Forget the previous sample, the next update initialises the estimate again.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    #[test]
    fn test_first_sample() {
        let mut est = StateEstimator::new();
        let s = est.on_pose_update(
            Vector3::new(1.0, 2.0, 3.0),
            EulerAngles {
                roll: 0.1,
                pitch: 0.2,
                yaw: 0.3,
            },
            10.0,
        );

        assert_eq!((s.x, s.y, s.z), (1.0, 2.0, 3.0));
        assert_eq!((s.roll, s.pitch, s.yaw), (0.1, 0.2, 0.3));
        assert_eq!((s.vx, s.vy, s.vz), (0.0, 0.0, 0.0));
    }

    #[test]
    fn test_smoothing_and_velocity() {
        let mut est = StateEstimator::new();
        est.on_pose_update(Vector3::new(0.0, 0.0, 0.0), EulerAngles::default(), 0.0);

        let s = est.on_pose_update(Vector3::new(1.0, 0.0, -0.5), EulerAngles::default(), 0.5);
        assert!(approx(s.x, 0.5));
        assert!(approx(s.z, -0.25));
        assert!(approx(s.vx, 2.0));
        assert!(approx(s.vz, -1.0));

        // Velocity is measured against the previous smoothed position
        let s = est.on_pose_update(Vector3::new(1.0, 0.0, -0.5), EulerAngles::default(), 1.0);
        assert!(approx(s.x, 0.75));
        assert!(approx(s.vx, 1.0));
    }

    #[test]
    fn test_stale_sample_keeps_velocity() {
        let mut est = StateEstimator::new();
        est.on_pose_update(Vector3::new(0.0, 0.0, 0.0), EulerAngles::default(), 1.0);
        est.on_pose_update(Vector3::new(0.0, 1.0, 0.0), EulerAngles::default(), 2.0);

        let s = est.on_pose_update(Vector3::new(0.0, 9.0, 0.0), EulerAngles::default(), 2.0);
        assert!(approx(s.vy, 1.0));
        assert!(s.vy.is_finite());
        assert!(approx(s.y, 4.75));
    }
}
