//! # Vehicle Executable Parameters
//!
//! This module provide parameters for the vehicle executable, loaded from `veh_exec.toml`.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Deserialize;

use crate::data_store::DriveMode;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct VehExecParams {
    /// Drive mode at startup
    pub drive_mode: DriveMode,

    /// Treat the session as calibrated from the start. Without this nothing is sent or actuated
    /// until a calibration is performed.
    pub assume_calibrated: bool,

    /// JPEG quality (1-100) of the camera frames sent on the camera channel
    pub jpeg_quality: u8,

    /// Actuator bridge, no actuator is driven if not given
    #[serde(default)]
    pub actuator: Option<ActuatorParams>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActuatorParams {
    /// Network endpoint of the actuator bridge
    pub endpoint: String,

    /// Period of the actuator tick
    pub tick_ms: u64,

    /// Controller range of the throttle demand
    #[serde(default = "default_axis_range")]
    pub throttle_range: [f32; 2],

    /// Controller range of the steering demand
    #[serde(default = "default_axis_range")]
    pub steering_range: [f32; 2],

    /// RPM range both axes are mapped onto
    #[serde(default = "default_rpm_range")]
    pub rpm_range: [f32; 2],
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn default_axis_range() -> [f32; 2] {
    [-1.0, 1.0]
}

fn default_rpm_range() -> [f32; 2] {
    [1000.0, 2000.0]
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse() {
        let params: VehExecParams = util::params::from_str(
            r#"
            drive_mode = "remote"
            assume_calibrated = true
            jpeg_quality = 70

            [actuator]
            endpoint = "127.0.0.1:8890"
            tick_ms = 50
            "#,
        )
        .unwrap();

        assert_eq!(params.drive_mode, DriveMode::Remote);
        let act = params.actuator.unwrap();
        assert_eq!(act.rpm_range, [1000.0, 2000.0]);
        assert_eq!(act.throttle_range, [-1.0, 1.0]);
    }

    /// The parameter files shipped with the software must load.
    #[test]
    fn test_shipped_params() {
        let exec: VehExecParams =
            util::params::from_str(include_str!("../../params/veh_exec.toml")).unwrap();
        assert!(exec.actuator.is_some());

        let agent: crate::agent::Params =
            util::params::from_str(include_str!("../../params/line_follow.toml")).unwrap();
        assert_eq!(agent.error_scaling.len(), 6);
        assert_eq!(agent.step_period_ms, 40);

        let net: comms_if::net::NetParams =
            util::params::from_str(include_str!("../../params/net.toml")).unwrap();
        assert_eq!(net.cam.max_body, 9000);
        assert_eq!(net.state.buffer_capacity, 2);
        assert!(net.sim_endpoint.is_none());
    }
}
