//! # Equipment telemetry
//!
//! Payload layouts for the telemetry produced by the vehicle's equipment. All binary values are
//! little endian.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

pub mod cam;
pub mod depth;
pub mod state;

pub use cam::{CamFrame, CamImage, Intrinsics};
pub use depth::DepthFrame;
pub use state::{PoseSample, VehicleState};

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug)]
pub enum PayloadError {
    #[error("Expected a payload of {expected} bytes but found {found}")]
    WrongSize { expected: usize, found: usize },

    #[error("Expected a payload of at least {min} bytes but found {found}")]
    TooShort { min: usize, found: usize },

    #[error("Payload body of {0} bytes is not a whole number of samples")]
    PartialSample(usize),

    #[error("Image error: {0}")]
    ImageError(#[from] image::ImageError),
}
