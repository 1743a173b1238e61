//! Vehicle state and pose payloads

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use super::PayloadError;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Encoded length of a [`VehicleState`].
pub const VEHICLE_STATE_LEN: usize = 9 * 4;

/// Encoded length of a [`PoseSample`].
pub const POSE_SAMPLE_LEN: usize = 6 * 4 + 8;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Estimated state of the vehicle.
///
/// Positions in metres, attitude in radians, velocities in metres per second.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct VehicleState {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
    pub vx: f32,
    pub vy: f32,
    pub vz: f32,
}

/// Raw pose sample from a tracking source.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PoseSample {
    pub position: [f32; 3],

    /// Roll, pitch and yaw in radians
    pub euler: [f32; 3],

    /// Timestamp of the sample in seconds
    pub timestamp_s: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl VehicleState {
    pub fn as_array(&self) -> [f32; 9] {
        [
            self.x, self.y, self.z, self.roll, self.pitch, self.yaw, self.vx, self.vy, self.vz,
        ]
    }

    pub fn from_array(a: [f32; 9]) -> Self {
        Self {
            x: a[0],
            y: a[1],
            z: a[2],
            roll: a[3],
            pitch: a[4],
            yaw: a[5],
            vx: a[6],
            vy: a[7],
            vz: a[8],
        }
    }

    /// Magnitude of the velocity vector.
    pub fn speed(&self) -> f32 {
        (self.vx.powi(2) + self.vy.powi(2) + self.vz.powi(2)).sqrt()
    }

    pub fn to_payload(&self) -> Vec<u8> {
        let mut buf = vec![0u8; VEHICLE_STATE_LEN];
        LittleEndian::write_f32_into(&self.as_array(), &mut buf);
        buf
    }

    pub fn from_payload(payload: &[u8]) -> Result<Self, PayloadError> {
        if payload.len() != VEHICLE_STATE_LEN {
            return Err(PayloadError::WrongSize {
                expected: VEHICLE_STATE_LEN,
                found: payload.len(),
            });
        }

        let mut a = [0f32; 9];
        LittleEndian::read_f32_into(payload, &mut a);

        Ok(Self::from_array(a))
    }
}

impl PoseSample {
    pub fn to_payload(&self) -> Vec<u8> {
        let mut buf = vec![0u8; POSE_SAMPLE_LEN];
        LittleEndian::write_f32_into(&self.position, &mut buf[0..12]);
        LittleEndian::write_f32_into(&self.euler, &mut buf[12..24]);
        LittleEndian::write_f64(&mut buf[24..32], self.timestamp_s);
        buf
    }

    pub fn from_payload(payload: &[u8]) -> Result<Self, PayloadError> {
        if payload.len() != POSE_SAMPLE_LEN {
            return Err(PayloadError::WrongSize {
                expected: POSE_SAMPLE_LEN,
                found: payload.len(),
            });
        }

        let mut sample = Self::default();
        LittleEndian::read_f32_into(&payload[0..12], &mut sample.position);
        LittleEndian::read_f32_into(&payload[12..24], &mut sample.euler);
        sample.timestamp_s = LittleEndian::read_f64(&payload[24..32]);

        Ok(sample)
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
