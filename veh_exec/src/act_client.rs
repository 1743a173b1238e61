//! # Actuator client
//!
//! Sends the control command to the actuator bridge and reads back the measured velocity.
//!
//! The actuator message is the ASCII text `"(throttle_rpm,steering_rpm)"`, each axis linearly
//! mapped from its controller range onto the bridge's RPM range and clamped there. Velocity
//! replies are a single little endian `f32`.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    io,
    net::{ToSocketAddrs, UdpSocket},
    sync::{Arc, Mutex},
};

use byteorder::{ByteOrder, LittleEndian};
use log::{info, trace, warn};
use util::maths::{clamp, lin_map};

use crate::{data_store::DataStore, params::ActuatorParams};

// ------------------------------------------------------------------------------------------------
// TYPES
// ------------------------------------------------------------------------------------------------

/// Actuator sink shared between the actuator tick and the shutdown path.
pub type SharedSink = Arc<Mutex<Box<dyn ActuatorSink>>>;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Something that can drive the vehicle's motors.
pub trait ActuatorSink: Send {
    /// Write normalised throttle and steering demands.
    fn write(&mut self, throttle: f32, steering: f32) -> Result<(), ActuatorError>;

    /// Latest measured velocity, if any has arrived since the last call.
    fn read_velocity(&mut self) -> Option<f32>;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Mapping from controller ranges onto the bridge's RPM range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RpmMap {
    pub throttle_range: (f32, f32),
    pub steering_range: (f32, f32),
    pub rpm_range: (f32, f32),
}

/// Actuator bridge reached over UDP.
pub struct UdpActuator {
    socket: UdpSocket,
    map: RpmMap,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ActuatorError {
    #[error("Could not resolve the actuator endpoint {0}")]
    ResolveError(String),

    #[error("Actuator socket error: {0}")]
    SocketError(io::Error),

    #[error("Could not send demands to the actuator: {0}")]
    SendError(io::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl RpmMap {
    pub fn from_params(params: &ActuatorParams) -> Self {
        Self {
            throttle_range: (params.throttle_range[0], params.throttle_range[1]),
            steering_range: (params.steering_range[0], params.steering_range[1]),
            rpm_range: (params.rpm_range[0], params.rpm_range[1]),
        }
    }

    fn map_axis(&self, range: (f32, f32), value: f32) -> i32 {
        let (lo, hi) = if self.rpm_range.0 <= self.rpm_range.1 {
            self.rpm_range
        } else {
            (self.rpm_range.1, self.rpm_range.0)
        };

        let value = clamp(value, range.0.min(range.1), range.0.max(range.1));

        clamp(lin_map(range, self.rpm_range, value), lo, hi).round() as i32
    }

    /// Build the actuator message for the given demands.
    pub fn message(&self, throttle: f32, steering: f32) -> String {
        format!(
            "({},{})",
            self.map_axis(self.throttle_range, throttle),
            self.map_axis(self.steering_range, steering)
        )
    }
}

impl UdpActuator {
    pub fn new(endpoint: &str, map: RpmMap) -> Result<Self, ActuatorError> {
        let remote = endpoint
            .to_socket_addrs()
            .map_err(|_| ActuatorError::ResolveError(endpoint.into()))?
            .next()
            .ok_or_else(|| ActuatorError::ResolveError(endpoint.into()))?;

        let local = if remote.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };

        let socket = UdpSocket::bind(local).map_err(ActuatorError::SocketError)?;
        socket.connect(remote).map_err(ActuatorError::SocketError)?;
        socket
            .set_nonblocking(true)
            .map_err(ActuatorError::SocketError)?;

        info!("Actuator bridge at {}", remote);

        Ok(Self { socket, map })
    }
}

impl ActuatorSink for UdpActuator {
    fn write(&mut self, throttle: f32, steering: f32) -> Result<(), ActuatorError> {
        let msg = self.map.message(throttle, steering);
        trace!("Actuator demand {}", msg);

        match self.socket.send(msg.as_bytes()) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(ActuatorError::SendError(e)),
        }
    }

    fn read_velocity(&mut self) -> Option<f32> {
        let mut buf = [0u8; 64];
        let mut latest = None;

        // Drain everything queued, only the newest reading matters
        loop {
            match self.socket.recv(&mut buf) {
                Ok(n) if n >= 4 => latest = Some(LittleEndian::read_f32(&buf[..4])),
                Ok(_) => (),
                Err(_) => break,
            }
        }

        latest
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Wrap a sink so it can be shared with [`actuator_task`] and [`write_neutral`].
pub fn share_sink<S: ActuatorSink + 'static>(sink: S) -> SharedSink {
    let sink: Box<dyn ActuatorSink> = Box::new(sink);
    Arc::new(Mutex::new(sink))
}

/// Build the actuator tick, writing the current control cell to the sink and recording the
/// latest velocity.
pub fn actuator_task(sink: SharedSink, store: Arc<DataStore>) -> impl FnMut() + Send + 'static {
    move || {
        let cmd = store.control();
        let mut sink = sink.lock().expect("Actuator sink mutex poisoned");

        match sink.write(cmd.throttle, cmd.steering) {
            Ok(()) => {
                if !store.flags.actuator_connected() {
                    info!("Actuator connected");
                    store.flags.set_actuator_connected(true);
                }
            }
            Err(e) => {
                if store.flags.actuator_connected() {
                    warn!("Actuator connection lost: {}", e);
                    store.flags.set_actuator_connected(false);
                }
            }
        }

        if let Some(v) = sink.read_velocity() {
            store.set_last_velocity(v);
        }
    }
}

/// Stop the motors. Must be called once the actuator tick can no longer run, so the neutral
/// demand is the last one the bridge sees.
pub fn write_neutral(sink: &SharedSink) -> Result<(), ActuatorError> {
    let mut sink = sink.lock().expect("Actuator sink mutex poisoned");
    sink.write(0.0, 0.0)?;
    info!("Neutral demand written to the actuator");
    Ok(())
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::data_store::{DriveMode, SessionFlags};
    use crate::sched::{Scheduler, TaskList};
    use comms_if::tc::ControlCmd;
    use std::{
        thread,
        time::{Duration, Instant},
    };

    fn map() -> RpmMap {
        RpmMap {
            throttle_range: (-1.0, 1.0),
            steering_range: (-1.0, 1.0),
            rpm_range: (1000.0, 2000.0),
        }
    }

    #[test]
    fn test_message() {
        let m = map();
        assert_eq!(m.message(0.0, 0.0), "(1500,1500)");
        assert_eq!(m.message(1.0, -1.0), "(2000,1000)");
        assert_eq!(m.message(0.5, -0.25), "(1750,1375)");

        // Out of range demands are held at the RPM limits
        assert_eq!(m.message(3.0, -7.0), "(2000,1000)");

        // NaN demands stop the motors
        assert_eq!(m.message(f32::NAN, f32::NAN), "(1500,1500)");
    }

    struct MockSink {
        writes: Arc<Mutex<Vec<(f32, f32)>>>,
        fail: bool,
    }

    impl ActuatorSink for MockSink {
        fn write(&mut self, throttle: f32, steering: f32) -> Result<(), ActuatorError> {
            if self.fail {
                return Err(ActuatorError::SendError(io::ErrorKind::ConnectionRefused.into()));
            }
            self.writes.lock().unwrap().push((throttle, steering));
            Ok(())
        }

        fn read_velocity(&mut self) -> Option<f32> {
            Some(0.75)
        }
    }

    #[test]
    fn test_actuator_task() {
        let store = Arc::new(DataStore::new(
            Arc::new(SessionFlags::new(DriveMode::Remote)),
            1,
            1,
        ));
        let writes = Arc::new(Mutex::new(Vec::new()));
        let sink = MockSink {
            writes: writes.clone(),
            fail: false,
        };

        let mut task = actuator_task(share_sink(sink), store.clone());

        store.set_control(ControlCmd::new(0.2, -0.4));
        task();

        assert_eq!(*writes.lock().unwrap(), vec![(0.2, -0.4)]);
        assert!(store.flags.actuator_connected());
        assert_eq!(store.last_velocity(), Some(0.75));

        let mut failing = actuator_task(
            share_sink(MockSink {
                writes,
                fail: true,
            }),
            store.clone(),
        );
        failing();
        assert!(!store.flags.actuator_connected());
    }

    #[test]
    fn test_neutral_on_shutdown() {
        let flags = Arc::new(SessionFlags::new(DriveMode::Remote));
        flags.calibrate();
        let store = Arc::new(DataStore::new(flags.clone(), 1, 1));
        store.set_control(ControlCmd::new(0.6, 0.3));

        let writes = Arc::new(Mutex::new(Vec::new()));
        let sink = share_sink(MockSink {
            writes: writes.clone(),
            fail: false,
        });

        let mut tasks = TaskList::new().with_gate(move || flags.is_active());
        tasks.add(
            "actuator",
            Duration::from_millis(5),
            true,
            actuator_task(sink.clone(), store.clone()),
        );
        let mut sched = Scheduler::start("act_test", tasks).unwrap();

        let start = Instant::now();
        while writes.lock().unwrap().is_empty() && start.elapsed() < Duration::from_secs(2) {
            thread::sleep(Duration::from_millis(5));
        }

        // The cell still holds a moving demand when the ticks stop
        sched.stop();
        write_neutral(&sink).unwrap();

        let writes = writes.lock().unwrap();
        assert!(writes.len() >= 2);
        assert_eq!(writes[0], (0.6, 0.3));
        assert_eq!(*writes.last().unwrap(), (0.0, 0.0));
    }

    #[test]
    fn test_udp_actuator() {
        let bridge = UdpSocket::bind("127.0.0.1:0").unwrap();
        bridge
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();

        let mut act = UdpActuator::new(&bridge.local_addr().unwrap().to_string(), map()).unwrap();
        act.write(1.0, 0.0).unwrap();

        let mut buf = [0u8; 32];
        let (n, peer) = bridge.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"(2000,1500)");

        bridge.send_to(&1.5f32.to_le_bytes(), peer).unwrap();
        bridge.send_to(&2.5f32.to_le_bytes(), peer).unwrap();

        let start = Instant::now();
        let mut v = None;
        while start.elapsed() < Duration::from_secs(2) {
            v = act.read_velocity().or(v);
            if v == Some(2.5) {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(v, Some(2.5));
    }
}
