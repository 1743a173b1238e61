//! # Communications interface crate.
//!
//! Provides all common communications interfaces for the software: the
//! chunked datagram protocol, UDP links, and the telemetry and control
//! message layouts carried over them.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Control commands sent to the vehicle
pub mod tc;

/// Telemetry payloads produced by the vehicle's equipment (cameras, pose tracking)
pub mod eqpt;

/// Network module
pub mod net;
