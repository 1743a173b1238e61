//! # Line following agent
//!
//! Steers the vehicle along a coloured line seen by the camera. Each step:
//!
//! 1. Scans one column of the latest frame for pixels inside the line's colour box.
//! 2. If the line is lost, steers hard towards the side the control cell currently steers to,
//!    keeping its throttle.
//! 3. Otherwise scales the lateral error of the line and runs it through the lateral PID to get
//!    the steering demand.
//! 4. Picks the throttle from the ground tilt, driven by the vehicle's roll.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::sync::Arc;

use comms_if::{eqpt::VehicleState, tc::ControlCmd};
use image::RgbImage;
use log::{debug, info, warn};
use serde::Serialize;
use util::maths::sign_or_pos;

use super::{
    detect::{self, ColourBox},
    gain_sched::ErrorScaling,
    params::Params,
    pid::{LatPid, PidOutput},
    Agent, AgentError, StepOutcome,
};
use crate::data_store::{DataStore, DriveMode};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Line following control law, independent of where frames come from and where commands go.
#[derive(Debug, Clone)]
pub struct LineFollower {
    params: Params,
    colour: ColourBox,
    scaling: ErrorScaling,
    pid: LatPid,
}

/// Agent running a [`LineFollower`] against the data store.
pub struct LineFollowAgent {
    follower: LineFollower,
    store: Arc<DataStore>,

    /// Set between `start` and `stop`
    active: bool,
}

/// Everything computed in one step.
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub control: ControlCmd,
    pub line_found: bool,

    /// Number of matching rows in the scanned column
    pub rows: usize,

    pub lateral_error: Option<f32>,
    pub scaled_error: Option<f32>,
    pub pid: Option<PidOutput>,

    pub pitch_angle_deg: f32,
    pub slope: Slope,

    /// Speed of the vehicle, reported only
    pub speed: f32,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Slope {
    Flat,
    Up,
    Down,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl LineFollower {
    pub fn new(params: Params) -> Result<Self, AgentError> {
        let colour = ColourBox::from_params(&params);
        if colour.is_empty() {
            return Err(AgentError::EmptyColourBox);
        }
        if params.scan_width == Some(0) {
            return Err(AgentError::ZeroScanWidth);
        }

        Ok(Self {
            colour,
            scaling: ErrorScaling::new(&params.error_scaling),
            pid: LatPid::new(
                params.lat_kp,
                params.lat_kd,
                params.lat_ki,
                params.max_lat_history,
                params.derivative_ref,
            ),
            params,
        })
    }

    /// Forget the controller history.
    pub fn reset(&mut self) {
        self.pid.reset();
    }

    /// Compute the next command from a frame, the current vehicle state and the command currently
    /// in the control cell.
    pub fn process(
        &mut self,
        frame: &RgbImage,
        state: &VehicleState,
        current: ControlCmd,
    ) -> StepReport {
        let resized = self
            .params
            .scan_width
            .and_then(|w| detect::resize_to_width(frame, w));
        let scanned = resized.as_ref().unwrap_or(frame);

        let detection = detect::scan_column(scanned, self.params.height_offset, &self.colour);

        let (pitch_angle_deg, slope, throttle) = self.longitudinal(state.roll);

        let mut report = StepReport {
            control: current,
            line_found: detection.is_found(),
            rows: detection.rows.len(),
            lateral_error: None,
            scaled_error: None,
            pid: None,
            pitch_angle_deg,
            slope,
            speed: state.speed(),
        };

        if !detection.is_found() {
            let steering = sign_or_pos(current.steering);
            warn!(
                "Line not detected ({} rows), steering {:+.0}",
                detection.rows.len(),
                steering
            );

            report.control = ControlCmd::new(current.throttle, steering);
            return report;
        }

        // Found implies there are rows to average
        let error = detection.lateral_error().unwrap_or(0.0);
        let scaled = self.scaling.apply(error);
        let pid = self.pid.update(scaled);

        report.control = ControlCmd::new(throttle, pid.output);

        debug!(
            "Line error {:.1} (scaled {:.2}), slope {:?}, demand {:?}",
            error, scaled, slope, report.control
        );

        report.lateral_error = Some(error);
        report.scaled_error = Some(scaled);
        report.pid = Some(pid);
        report
    }

    /// Ground tilt from roll, the pose source's roll axis points along the direction of travel
    /// with the camera held upright.
    fn longitudinal(&self, roll_rad: f32) -> (f32, Slope, f32) {
        let pitch_angle_deg = 90.0 + roll_rad.to_degrees();
        let threshold = self.params.ramp_angle_threshold_deg;

        if pitch_angle_deg < -threshold {
            (pitch_angle_deg, Slope::Down, self.params.down_throttle)
        } else if pitch_angle_deg > threshold {
            (pitch_angle_deg, Slope::Up, self.params.up_throttle)
        } else {
            (pitch_angle_deg, Slope::Flat, self.params.flat_throttle)
        }
    }
}

impl LineFollowAgent {
    pub fn new(params: Params, store: Arc<DataStore>) -> Result<Self, AgentError> {
        Ok(Self {
            follower: LineFollower::new(params)?,
            store,
            active: false,
        })
    }
}

impl Agent for LineFollowAgent {
    fn name(&self) -> &'static str {
        "line_follow"
    }

    fn start(&mut self) {
        self.follower.reset();
        self.active = true;
        info!("Line following agent started");
    }

    fn stop(&mut self) {
        self.active = false;
        self.follower.reset();
        self.store.set_control(ControlCmd::NEUTRAL);
        info!("Line following agent stopped");
    }

    fn step(&mut self) -> StepOutcome {
        if !self.active || !self.store.flags.is_active() {
            return StepOutcome::NotReady;
        }

        let frame = match self.store.latest_frame() {
            Some(f) => f,
            None => return StepOutcome::NotReady,
        };

        let report = self.follower.process(
            &frame,
            &self.store.vehicle_state(),
            self.store.control(),
        );

        self.store
            .write_control_as(DriveMode::Autonomous, report.control);

        if report.line_found {
            StepOutcome::Tracking(report)
        } else {
            StepOutcome::LineLost(report)
        }
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::{agent::detect::test::line_image, data_store::SessionFlags};

    fn roll_for_pitch(pitch_deg: f32) -> VehicleState {
        VehicleState {
            roll: (pitch_deg - 90.0).to_radians(),
            ..Default::default()
        }
    }

    fn line_frame() -> RgbImage {
        line_image(64, 48, 10, 10..14)
    }

    fn empty_frame() -> RgbImage {
        line_image(64, 48, 10, 0..0)
    }

    #[test]
    fn test_tracking_step() {
        let mut f = LineFollower::new(Params::default()).unwrap();
        let report = f.process(&line_frame(), &roll_for_pitch(0.0), ControlCmd::NEUTRAL);

        assert!(report.line_found);
        assert_eq!(report.rows, 4);
        assert_eq!(report.lateral_error, Some(12.5));

        // 12.5 falls in the first bucket
        assert!((report.scaled_error.unwrap() - 1.25).abs() < 1e-6);
        assert!((report.control.steering - 0.005 * 1.25).abs() < 1e-6);
        assert_eq!(report.slope, Slope::Flat);
        assert_eq!(report.control.throttle, 0.25);
    }

    #[test]
    fn test_line_lost_keeps_turning() {
        let mut f = LineFollower::new(Params::default()).unwrap();
        let mut cell = ControlCmd::new(0.3, 0.6);

        for _ in 0..5 {
            let report = f.process(&empty_frame(), &roll_for_pitch(20.0), cell);
            assert!(!report.line_found);
            assert_eq!(report.control.steering, 1.0);
            assert_eq!(report.control.throttle, 0.3);
            cell = report.control;
        }

        let report = f.process(
            &empty_frame(),
            &roll_for_pitch(0.0),
            ControlCmd::new(0.1, -0.01),
        );
        assert_eq!(report.control, ControlCmd::new(0.1, -1.0));
    }

    #[test]
    fn test_ramp_throttle() {
        let params = Params::default();
        let mut f = LineFollower::new(params.clone()).unwrap();

        let report = f.process(&line_frame(), &roll_for_pitch(10.0), ControlCmd::NEUTRAL);
        assert_eq!(report.slope, Slope::Up);
        assert_eq!(report.control.throttle, params.up_throttle);
        assert!((report.pitch_angle_deg - 10.0).abs() < 1e-3);

        let report = f.process(&line_frame(), &roll_for_pitch(-10.0), ControlCmd::NEUTRAL);
        assert_eq!(report.slope, Slope::Down);
        assert_eq!(report.control.throttle, params.down_throttle);

        let report = f.process(&line_frame(), &roll_for_pitch(4.0), ControlCmd::NEUTRAL);
        assert_eq!(report.slope, Slope::Flat);
        assert_eq!(report.control.throttle, params.flat_throttle);
    }

    #[test]
    fn test_steering_always_clamped() {
        let params = Params {
            lat_kp: 50.0,
            lat_kd: -80.0,
            lat_ki: 30.0,
            ..Params::default()
        };
        let mut f = LineFollower::new(params).unwrap();

        for rows in [0..4u32, 40..48, 0..48, 20..24, 44..47].iter() {
            let report = f.process(&line_image(64, 48, 10, rows.clone()), &roll_for_pitch(0.0), ControlCmd::NEUTRAL);
            let s = report.control.steering;
            assert!(s >= -1.0 && s <= 1.0);
        }
    }

    #[test]
    fn test_scan_width_resizes() {
        let params = Params {
            scan_width: Some(32),
            height_offset: 5,
            ..Params::default()
        };
        let mut f = LineFollower::new(params).unwrap();

        // A thick band survives the downscale
        let mut frame = RgbImage::from_pixel(64, 48, detect::test::GROUND);
        for x in 50..64 {
            for y in 10..20 {
                frame.put_pixel(x, y, detect::test::LINE);
            }
        }

        let report = f.process(&frame, &roll_for_pitch(0.0), ControlCmd::NEUTRAL);
        assert!(report.line_found);
        assert!(report.lateral_error.unwrap() > 0.0);
    }

    #[test]
    fn test_invalid_params() {
        let params = Params {
            r_min: 200,
            r_max: 100,
            ..Params::default()
        };
        assert!(matches!(
            LineFollower::new(params),
            Err(AgentError::EmptyColourBox)
        ));

        let params = Params {
            scan_width: Some(0),
            ..Params::default()
        };
        assert!(matches!(
            LineFollower::new(params),
            Err(AgentError::ZeroScanWidth)
        ));
    }

    #[test]
    fn test_agent_gating() {
        let store = Arc::new(DataStore::new(
            Arc::new(SessionFlags::new(DriveMode::Autonomous)),
            2,
            2,
        ));
        let mut agent = LineFollowAgent::new(Params::default(), store.clone()).unwrap();
        agent.start();

        // Not calibrated
        store.set_latest_frame(line_frame());
        store.set_vehicle_state(roll_for_pitch(0.0));
        assert!(matches!(agent.step(), StepOutcome::NotReady));

        store.flags.calibrate();
        assert!(matches!(agent.step(), StepOutcome::Tracking(_)));
        assert_eq!(store.control().throttle, 0.25);

        // Remote mode leaves the control cell to the receiver
        store.set_control(ControlCmd::new(-0.5, 0.0));
        store.flags.set_drive_mode(DriveMode::Remote);
        assert!(matches!(agent.step(), StepOutcome::Tracking(_)));
        assert_eq!(store.control(), ControlCmd::new(-0.5, 0.0));

        store.set_latest_frame(empty_frame());
        assert!(matches!(agent.step(), StepOutcome::LineLost(_)));

        agent.stop();
        assert!(store.control().is_neutral());
        assert!(store.flags.is_active());
        assert!(matches!(agent.step(), StepOutcome::NotReady));
    }

    #[test]
    fn test_agent_restart() {
        let store = Arc::new(DataStore::new(
            Arc::new(SessionFlags::new(DriveMode::Autonomous)),
            2,
            2,
        ));
        store.flags.calibrate();
        store.set_latest_frame(line_frame());
        store.set_vehicle_state(roll_for_pitch(0.0));

        let mut agent = LineFollowAgent::new(Params::default(), store.clone()).unwrap();

        // Never started
        assert!(matches!(agent.step(), StepOutcome::NotReady));

        agent.start();
        assert!(matches!(agent.step(), StepOutcome::Tracking(_)));

        agent.stop();
        assert!(matches!(agent.step(), StepOutcome::NotReady));
        assert!(store.control().is_neutral());

        agent.start();
        assert!(matches!(agent.step(), StepOutcome::Tracking(_)));
        assert_eq!(store.control().throttle, 0.25);
    }

    #[test]
    fn test_line_lost_follows_control_cell() {
        let store = Arc::new(DataStore::new(
            Arc::new(SessionFlags::new(DriveMode::Remote)),
            2,
            2,
        ));
        store.flags.calibrate();
        store.set_vehicle_state(roll_for_pitch(0.0));

        let mut agent = LineFollowAgent::new(Params::default(), store.clone()).unwrap();
        agent.start();

        // The agent tracks while remote commands own the cell
        store.set_latest_frame(line_frame());
        assert!(matches!(agent.step(), StepOutcome::Tracking(_)));
        store.set_control(ControlCmd::new(0.2, -0.4));

        // After the switch the fallback follows the cell, not the agent's own last demand
        store.flags.set_drive_mode(DriveMode::Autonomous);
        store.set_latest_frame(empty_frame());
        assert!(matches!(agent.step(), StepOutcome::LineLost(_)));
        assert_eq!(store.control(), ControlCmd::new(0.2, -1.0));
    }
}
