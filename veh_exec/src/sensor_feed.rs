//! # Sensor feed
//!
//! Entry point for data from the pose and camera source. Frames are kept for the agent and
//! encoded into the camera buffer, depth maps go to the depth buffer, and pose updates drive
//! the state estimator.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::{Arc, Mutex};

use chrono::Utc;
use comms_if::eqpt::{
    CamFrame, CamImage, DepthFrame, Intrinsics, PayloadError, PoseSample, VehicleState,
};
use image::DynamicImage;
use log::info;
use nalgebra::Vector3;

use crate::{
    data_store::DataStore,
    loc::{EulerAngles, StateEstimator},
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct SensorFeed {
    store: Arc<DataStore>,
    estimator: Mutex<StateEstimator>,
    jpeg_quality: u8,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SensorFeed {
    pub fn new(store: Arc<DataStore>, jpeg_quality: u8) -> Self {
        Self {
            store,
            estimator: Mutex::new(StateEstimator::new()),
            jpeg_quality: jpeg_quality.max(1).min(100),
        }
    }

    /// Handle a raw camera frame.
    pub fn on_frame(
        &self,
        image: DynamicImage,
        intrinsics: Option<Intrinsics>,
    ) -> Result<(), PayloadError> {
        self.store.set_latest_frame(image.to_rgb8());

        let frame = CamImage {
            timestamp: Utc::now(),
            image,
        }
        .to_cam_frame(self.jpeg_quality, intrinsics)?;

        self.store.cam_buffer.write(frame.to_payload());

        Ok(())
    }

    /// Handle a frame which is already JPEG compressed, it is forwarded without re-encoding.
    pub fn on_cam_frame(&self, frame: CamFrame) -> Result<(), PayloadError> {
        let decoded = frame.decode()?;
        self.store.set_latest_frame(decoded.image.to_rgb8());
        self.store.cam_buffer.write(frame.to_payload());

        Ok(())
    }

    /// Handle a depth map.
    pub fn on_depth(&self, depth: Vec<f32>, intrinsics: Option<Intrinsics>) {
        self.store
            .depth_buffer
            .write(DepthFrame { intrinsics, depth }.to_payload());
    }

    /// Handle a pose update, returning the new vehicle state.
    pub fn on_pose_update(
        &self,
        position: Vector3<f32>,
        euler: EulerAngles,
        timestamp_s: f64,
    ) -> VehicleState {
        let state = self
            .estimator
            .lock()
            .expect("SensorFeed: estimator mutex poisoned")
            .on_pose_update(position, euler, timestamp_s);

        self.store.set_vehicle_state(state);

        if !self.store.flags.is_tracking() {
            info!("Pose tracking started");
            self.store.flags.set_tracking(true);
        }

        state
    }

    /// Handle a pose sample received as a payload.
    pub fn on_pose_sample(&self, sample: &PoseSample) -> VehicleState {
        self.on_pose_update(
            Vector3::from(sample.position),
            EulerAngles {
                roll: sample.euler[0],
                pitch: sample.euler[1],
                yaw: sample.euler[2],
            },
            sample.timestamp_s,
        )
    }

    /// The pose source lost tracking, the next update starts a fresh estimate.
    pub fn on_tracking_lost(&self) {
        if self.store.flags.is_tracking() {
            info!("Pose tracking lost");
        }
        self.store.flags.set_tracking(false);
        self.estimator
            .lock()
            .expect("SensorFeed: estimator mutex poisoned")
            .reset();
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::data_store::{DriveMode, SessionFlags};
    use image::{GenericImageView, Rgb, RgbImage};

    fn feed() -> (Arc<DataStore>, SensorFeed) {
        let store = Arc::new(DataStore::new(
            Arc::new(SessionFlags::new(DriveMode::Autonomous)),
            2,
            2,
        ));
        (store.clone(), SensorFeed::new(store, 80))
    }

    #[test]
    fn test_frame_to_buffer() {
        let (store, feed) = feed();
        let img = RgbImage::from_pixel(16, 8, Rgb([10, 200, 30]));

        feed.on_frame(DynamicImage::ImageRgb8(img), None).unwrap();

        let latest = store.latest_frame().unwrap();
        assert_eq!((latest.width(), latest.height()), (16, 8));

        let payload = store.cam_buffer.read().unwrap();
        let frame = CamFrame::from_payload(&payload).unwrap();
        assert_eq!(frame.intrinsics, None);
        assert_eq!(frame.decode().unwrap().image.width(), 16);
    }

    #[test]
    fn test_depth_to_buffer() {
        let (store, feed) = feed();
        feed.on_depth(vec![1.0, 2.0], None);

        let payload = store.depth_buffer.read().unwrap();
        assert_eq!(DepthFrame::from_payload(&payload).unwrap().depth, vec![1.0, 2.0]);
    }

    #[test]
    fn test_pose_marks_tracking() {
        let (store, feed) = feed();
        assert!(!store.flags.is_tracking());

        feed.on_pose_update(Vector3::new(1.0, 0.0, 0.0), EulerAngles::default(), 0.0);
        let state = feed.on_pose_update(Vector3::new(2.0, 0.0, 0.0), EulerAngles::default(), 1.0);

        assert!(store.flags.is_tracking());
        assert_eq!(store.vehicle_state(), state);
        assert_eq!(state.vx, 1.0);

        feed.on_tracking_lost();
        assert!(!store.flags.is_tracking());
        let state = feed.on_pose_update(Vector3::new(5.0, 0.0, 0.0), EulerAngles::default(), 2.0);
        assert_eq!((state.x, state.vx), (5.0, 0.0));
    }
}
