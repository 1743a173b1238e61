//! # Telecommands
//!
//! Commands sent to the vehicle.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

pub mod control;

pub use control::ControlCmd;
