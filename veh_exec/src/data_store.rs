//! # Data Store
//!
//! State shared between the executable's threads: the session flags, the control cell, the
//! latest estimated vehicle state and camera frame, and the telemetry buffers feeding the
//! outgoing channels.
//!
//! ## Control cell race
//!
//! The control cell is written by the agent in autonomous mode and by the control receiver in
//! remote mode. Writers check the drive mode before writing, but the check and the write are not
//! atomic with respect to a mode switch, so a single stale write may land just after the mode
//! changes. The last write wins.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::{
    atomic::{AtomicBool, AtomicU8, Ordering},
    Arc, Mutex,
};

use comms_if::{eqpt::VehicleState, tc::ControlCmd};
use image::RgbImage;
use log::info;
use serde::{Deserialize, Serialize};

use crate::buffer::CircBuffer;

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Who currently owns the control cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriveMode {
    /// The agent drives the vehicle, its output is relayed to the host
    Autonomous,

    /// Commands received from the host drive the vehicle
    Remote,
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Session wide flags, owned by main and shared by `Arc`.
#[derive(Debug)]
pub struct SessionFlags {
    should_calibrate: AtomicBool,
    is_calibrated: AtomicBool,
    is_tracking: AtomicBool,
    actuator_connected: AtomicBool,
    drive_mode: AtomicU8,
}

/// Global data store for the executable.
pub struct DataStore {
    pub flags: Arc<SessionFlags>,

    control: Mutex<ControlCmd>,

    vehicle_state: Mutex<VehicleState>,

    latest_frame: Mutex<Option<Arc<RgbImage>>>,

    last_velocity: Mutex<Option<f32>>,

    /// Encoded camera frames waiting to be sent
    pub cam_buffer: CircBuffer<Vec<u8>>,

    /// Encoded depth frames waiting to be sent
    pub depth_buffer: CircBuffer<Vec<u8>>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl DriveMode {
    fn to_u8(self) -> u8 {
        match self {
            DriveMode::Autonomous => 0,
            DriveMode::Remote => 1,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => DriveMode::Autonomous,
            _ => DriveMode::Remote,
        }
    }
}

impl SessionFlags {
    pub fn new(drive_mode: DriveMode) -> Self {
        Self {
            should_calibrate: AtomicBool::new(false),
            is_calibrated: AtomicBool::new(false),
            is_tracking: AtomicBool::new(false),
            actuator_connected: AtomicBool::new(false),
            drive_mode: AtomicU8::new(drive_mode.to_u8()),
        }
    }

    /// The session is active once calibrated, unless a new calibration has been requested.
    pub fn is_active(&self) -> bool {
        self.is_calibrated() && !self.should_calibrate()
    }

    pub fn should_calibrate(&self) -> bool {
        self.should_calibrate.load(Ordering::Relaxed)
    }

    pub fn set_should_calibrate(&self, value: bool) {
        self.should_calibrate.store(value, Ordering::Relaxed)
    }

    pub fn is_calibrated(&self) -> bool {
        self.is_calibrated.load(Ordering::Relaxed)
    }

    pub fn set_calibrated(&self, value: bool) {
        self.is_calibrated.store(value, Ordering::Relaxed)
    }

    /// Mark calibration as done, clearing any pending request.
    pub fn calibrate(&self) {
        self.set_calibrated(true);
        self.set_should_calibrate(false);
    }

    pub fn is_tracking(&self) -> bool {
        self.is_tracking.load(Ordering::Relaxed)
    }

    pub fn set_tracking(&self, value: bool) {
        self.is_tracking.store(value, Ordering::Relaxed)
    }

    pub fn actuator_connected(&self) -> bool {
        self.actuator_connected.load(Ordering::Relaxed)
    }

    pub fn set_actuator_connected(&self, value: bool) {
        self.actuator_connected.store(value, Ordering::Relaxed)
    }

    pub fn drive_mode(&self) -> DriveMode {
        DriveMode::from_u8(self.drive_mode.load(Ordering::Relaxed))
    }

    pub fn set_drive_mode(&self, mode: DriveMode) {
        let prev = DriveMode::from_u8(self.drive_mode.swap(mode.to_u8(), Ordering::Relaxed));
        if prev != mode {
            info!("Drive mode changed from {:?} to {:?}", prev, mode);
        }
    }
}

impl DataStore {
    pub fn new(flags: Arc<SessionFlags>, cam_capacity: usize, depth_capacity: usize) -> Self {
        Self {
            flags,
            control: Mutex::new(ControlCmd::NEUTRAL),
            vehicle_state: Mutex::new(VehicleState::default()),
            latest_frame: Mutex::new(None),
            last_velocity: Mutex::new(None),
            cam_buffer: CircBuffer::new(cam_capacity),
            depth_buffer: CircBuffer::new(depth_capacity),
        }
    }

    pub fn control(&self) -> ControlCmd {
        *self.control.lock().expect("DataStore: control mutex poisoned")
    }

    /// Unconditionally set the control cell.
    pub fn set_control(&self, cmd: ControlCmd) {
        *self.control.lock().expect("DataStore: control mutex poisoned") = cmd;
    }

    /// Set the control cell only if the vehicle is currently in the writer's drive mode.
    ///
    /// Returns `true` if the command was written.
    pub fn write_control_as(&self, mode: DriveMode, cmd: ControlCmd) -> bool {
        if self.flags.drive_mode() != mode {
            return false;
        }

        self.set_control(cmd);
        true
    }

    pub fn vehicle_state(&self) -> VehicleState {
        *self
            .vehicle_state
            .lock()
            .expect("DataStore: vehicle_state mutex poisoned")
    }

    pub fn set_vehicle_state(&self, state: VehicleState) {
        *self
            .vehicle_state
            .lock()
            .expect("DataStore: vehicle_state mutex poisoned") = state;
    }

    pub fn latest_frame(&self) -> Option<Arc<RgbImage>> {
        self.latest_frame
            .lock()
            .expect("DataStore: latest_frame mutex poisoned")
            .clone()
    }

    pub fn set_latest_frame(&self, frame: RgbImage) {
        *self
            .latest_frame
            .lock()
            .expect("DataStore: latest_frame mutex poisoned") = Some(Arc::new(frame));
    }

    pub fn last_velocity(&self) -> Option<f32> {
        *self
            .last_velocity
            .lock()
            .expect("DataStore: last_velocity mutex poisoned")
    }

    pub fn set_last_velocity(&self, velocity: f32) {
        *self
            .last_velocity
            .lock()
            .expect("DataStore: last_velocity mutex poisoned") = Some(velocity);
    }

    /// Drain the telemetry buffers and put the control cell back to neutral.
    pub fn drain(&self) {
        self.cam_buffer.clear();
        self.depth_buffer.clear();
        self.set_control(ControlCmd::NEUTRAL);
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
