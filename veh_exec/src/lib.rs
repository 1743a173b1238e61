//! # Vehicle library.
//!
//! This library allows other crates in the workspace to access items defined inside the vehicle
//! crate.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Actuator client - writes the control cell to the actuator bridge
pub mod act_client;

/// Autonomy agents - turn sensor data into control commands
pub mod agent;

/// Bounded drop-oldest buffer shared between producers and consumers
pub mod buffer;

/// Shared state of the executable
pub mod data_store;

/// Localisation module - provides the vehicle with an idea of where it is in the world
pub mod loc;

/// Executable parameters
pub mod params;

/// Periodic task scheduler
pub mod sched;

/// Sensor feed - entry point for camera, depth and pose data
pub mod sensor_feed;

/// Simulation client - provides sensor data directly from the simulator
pub mod sim_client;

/// Telecommand client - receives control commands from the host
pub mod tc_client;

/// Telemetry server - sends sensor data and state to the host
pub mod tm_server;
