//! # Simulation Client
//!
//! The SimClient provides simulated sensor data to the vehicle software, so that the executable
//! can run without the real pose and camera source. It is to be used for testing and development
//! of systems rather than actual driving. The SimClient currently provides:
//!
//! - Vehicle pose samples.
//! - Camera frames.
//! - Depth maps.
//!
//! The simulator sends each item as a chunked message on a single UDP port. The first byte of
//! every message gives its kind, the remainder is the item's usual payload.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    io,
    net::{SocketAddr, UdpSocket},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use log::{error, info, trace, warn};
use serde::Serialize;

use comms_if::{
    eqpt::{CamFrame, DepthFrame, PayloadError, PoseSample},
    net::{bind_recv_socket, ChunkError, LinkError, Reassembler},
};

use crate::sensor_feed::SensorFeed;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Number of buffer slots the simulator rotates through.
pub const SIM_NUM_BUFFERS: u32 = 3;

/// Read timeout of the simulator socket.
const SIM_RECV_TIMEOUT: Duration = Duration::from_millis(50);

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct SimClient {
    bg_jh: Option<JoinHandle<()>>,
    bg_run: Arc<AtomicBool>,
    counters: Arc<Counters>,
    local_addr: Option<SocketAddr>,
}

/// Counters for the run report.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SimClientStats {
    pub poses: u64,
    pub frames: u64,
    pub depth_maps: u64,
    pub rejected: u64,
    pub rebinds: u64,
}

#[derive(Default)]
struct Counters {
    poses: AtomicU64,
    frames: AtomicU64,
    depth_maps: AtomicU64,
    rejected: AtomicU64,
    rebinds: AtomicU64,
}

/// What the worker needs to rebind the socket after a receive error.
struct BindOpts {
    addr: String,
    recv_buffer_size: usize,
    timeout: Duration,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SimClientError {
    #[error("Socket error: {0}")]
    SocketError(LinkError),

    #[error("Invalid reassembly configuration: {0}")]
    ChunkError(ChunkError),

    #[error("Could not spawn the simulation client thread: {0}")]
    SpawnError(io::Error),

    #[error("Empty message from the simulator")]
    EmptyMessage,

    #[error("Unknown message kind {0:#04x} from the simulator")]
    UnknownKind(u8),

    #[error("Could not decode the simulator message: {0}")]
    PayloadError(#[from] PayloadError),
}

/// Data from the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimMsgKind {
    Pose,
    Cam,
    Depth,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SimMsgKind {
    pub fn tag(self) -> u8 {
        match self {
            SimMsgKind::Pose => b'P',
            SimMsgKind::Cam => b'C',
            SimMsgKind::Depth => b'D',
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            b'P' => Some(SimMsgKind::Pose),
            b'C' => Some(SimMsgKind::Cam),
            b'D' => Some(SimMsgKind::Depth),
            _ => None,
        }
    }

    /// Build a simulator message from an item payload.
    pub fn message(self, payload: &[u8]) -> Vec<u8> {
        let mut msg = Vec::with_capacity(payload.len() + 1);
        msg.push(self.tag());
        msg.extend_from_slice(payload);
        msg
    }
}

impl SimClient {
    /// Bind to the simulator endpoint and start feeding the sensor feed.
    pub fn start(
        endpoint: &str,
        recv_buffer_size: usize,
        feed: Arc<SensorFeed>,
    ) -> Result<Self, SimClientError> {
        let socket = bind_recv_socket(endpoint, recv_buffer_size, SIM_RECV_TIMEOUT)
            .map_err(SimClientError::SocketError)?;
        let local_addr = socket.local_addr().ok();

        // Rebinds keep the port picked by the first bind
        let opts = BindOpts {
            addr: local_addr.map_or_else(|| endpoint.to_string(), |a| a.to_string()),
            recv_buffer_size,
            timeout: SIM_RECV_TIMEOUT,
        };

        let reassembler =
            Reassembler::new(SIM_NUM_BUFFERS).map_err(SimClientError::ChunkError)?;

        let bg_run = Arc::new(AtomicBool::new(true));
        let counters = Arc::new(Counters::default());

        let bg_run_clone = bg_run.clone();
        let counters_clone = counters.clone();

        let bg_jh = thread::Builder::new()
            .name("sim_client".into())
            .spawn(move || {
                bg_thread(socket, reassembler, opts, feed, bg_run_clone, counters_clone)
            })
            .map_err(SimClientError::SpawnError)?;

        info!("SimClient listening on {}", endpoint);

        Ok(Self {
            bg_jh: Some(bg_jh),
            bg_run,
            counters,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn stats(&self) -> SimClientStats {
        SimClientStats {
            poses: self.counters.poses.load(Ordering::Relaxed),
            frames: self.counters.frames.load(Ordering::Relaxed),
            depth_maps: self.counters.depth_maps.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            rebinds: self.counters.rebinds.load(Ordering::Relaxed),
        }
    }

    pub fn stop(&mut self) {
        if let Some(jh) = self.bg_jh.take() {
            self.bg_run.store(false, Ordering::Relaxed);
            if jh.join().is_err() {
                error!("SimClient thread panicked");
            }
        }
    }
}

impl Drop for SimClient {
    fn drop(&mut self) {
        self.stop();
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Decode a complete simulator message and hand it to the sensor feed.
fn dispatch(msg: &[u8], feed: &SensorFeed, counters: &Counters) -> Result<(), SimClientError> {
    let (tag, payload) = match msg.split_first() {
        Some((t, p)) => (*t, p),
        None => return Err(SimClientError::EmptyMessage),
    };

    match SimMsgKind::from_tag(tag) {
        Some(SimMsgKind::Pose) => {
            feed.on_pose_sample(&PoseSample::from_payload(payload)?);
            counters.poses.fetch_add(1, Ordering::Relaxed);
        }
        Some(SimMsgKind::Cam) => {
            feed.on_cam_frame(CamFrame::from_payload(payload)?)?;
            counters.frames.fetch_add(1, Ordering::Relaxed);
        }
        Some(SimMsgKind::Depth) => {
            let frame = DepthFrame::from_payload(payload)?;
            feed.on_depth(frame.depth, frame.intrinsics);
            counters.depth_maps.fetch_add(1, Ordering::Relaxed);
        }
        None => return Err(SimClientError::UnknownKind(tag)),
    }

    Ok(())
}

/// Receive one datagram into `buf`.
///
/// A receive error drops the socket, and the next call binds a fresh one to the same address.
/// Returns `None` on timeouts, errors and failed rebinds.
fn recv_datagram(
    socket: &mut Option<UdpSocket>,
    opts: &BindOpts,
    buf: &mut [u8],
    counters: &Counters,
) -> Option<usize> {
    if socket.is_none() {
        match bind_recv_socket(&opts.addr, opts.recv_buffer_size, opts.timeout) {
            Ok(s) => {
                info!("Simulator socket rebound to {}", opts.addr);
                counters.rebinds.fetch_add(1, Ordering::Relaxed);
                *socket = Some(s);
            }
            Err(e) => {
                warn!("Could not rebind the simulator socket: {}", e);
                thread::sleep(opts.timeout);
                return None;
            }
        }
    }

    let sock = socket.as_ref()?;

    match sock.recv_from(buf) {
        Ok((n, _)) => Some(n),
        Err(ref e)
            if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut =>
        {
            None
        }
        Err(e) => {
            error!("Error receiving message from the simulator: {}", e);
            *socket = None;
            None
        }
    }
}

/// Background thread, feeds the sensor feed when the simulator sends something new.
fn bg_thread(
    socket: UdpSocket,
    mut reassembler: Reassembler,
    opts: BindOpts,
    feed: Arc<SensorFeed>,
    run: Arc<AtomicBool>,
    counters: Arc<Counters>,
) {
    let mut socket = Some(socket);
    let mut buf = vec![0u8; 65536];

    // While instructed to run
    while run.load(Ordering::Relaxed) {
        let n = match recv_datagram(&mut socket, &opts, &mut buf, &counters) {
            Some(n) => n,
            None => {
                if socket.is_none() {
                    reassembler.clear();
                }
                continue;
            }
        };

        let msg = match reassembler.push(&buf[..n]) {
            Ok(Some(m)) => m,
            Ok(None) => continue,
            Err(e) => {
                trace!("Dropped simulator datagram: {}", e);
                continue;
            }
        };

        if let Err(e) = dispatch(&msg, &feed, &counters) {
            warn!("Rejected simulator message: {}", e);
            counters.rejected.fetch_add(1, Ordering::Relaxed);
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::data_store::{DataStore, DriveMode, SessionFlags};
    use comms_if::net::Chunker;
    use std::time::Instant;

    fn feed() -> (Arc<DataStore>, Arc<SensorFeed>) {
        let store = Arc::new(DataStore::new(
            Arc::new(SessionFlags::new(DriveMode::Autonomous)),
            2,
            2,
        ));
        (store.clone(), Arc::new(SensorFeed::new(store, 80)))
    }

    #[test]
    fn test_dispatch() {
        let (store, feed) = feed();
        let counters = Counters::default();

        let pose = PoseSample {
            position: [1.0, 2.0, 3.0],
            euler: [-1.5, 0.0, 0.2],
            timestamp_s: 4.0,
        };
        dispatch(&SimMsgKind::Pose.message(&pose.to_payload()), &feed, &counters).unwrap();
        assert_eq!(store.vehicle_state().z, 3.0);
        assert_eq!(store.vehicle_state().roll, -1.5);

        let depth = DepthFrame {
            intrinsics: None,
            depth: vec![0.5; 4],
        };
        dispatch(&SimMsgKind::Depth.message(&depth.to_payload()), &feed, &counters).unwrap();
        assert_eq!(store.depth_buffer.len(), 1);

        assert!(matches!(
            dispatch(b"Zjunk", &feed, &counters),
            Err(SimClientError::UnknownKind(b'Z'))
        ));
        assert!(matches!(
            dispatch(b"", &feed, &counters),
            Err(SimClientError::EmptyMessage)
        ));
        assert!(matches!(
            dispatch(b"P123", &feed, &counters),
            Err(SimClientError::PayloadError(_))
        ));

        assert_eq!(counters.poses.load(Ordering::Relaxed), 1);
        assert_eq!(counters.depth_maps.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_loopback_pose() {
        let (store, feed) = feed();
        let mut client = SimClient::start("127.0.0.1:0", 1 << 16, feed).unwrap();
        let addr = client.local_addr().unwrap();

        let sim = UdpSocket::bind("127.0.0.1:0").unwrap();
        let mut chunker = Chunker::new(16, SIM_NUM_BUFFERS).unwrap();

        let pose = PoseSample {
            position: [0.5, 0.0, -0.5],
            euler: [0.0; 3],
            timestamp_s: 1.0,
        };

        // Small bodies force the pose over several chunks
        for d in chunker
            .chunk(&SimMsgKind::Pose.message(&pose.to_payload()))
            .unwrap()
        {
            sim.send_to(&d, addr).unwrap();
        }

        let start = Instant::now();
        while client.stats().poses == 0 && start.elapsed() < Duration::from_secs(2) {
            thread::sleep(Duration::from_millis(5));
        }

        assert!(store.flags.is_tracking());
        assert_eq!(store.vehicle_state().x, 0.5);
        assert_eq!(client.stats().poses, 1);

        client.stop();
    }

    #[test]
    fn test_rebind_after_recv_error() {
        let counters = Counters::default();

        // Nothing listens on this port once the placeholder is dropped
        let closed = UdpSocket::bind("127.0.0.1:0").unwrap().local_addr().unwrap();

        let sock = bind_recv_socket("127.0.0.1:0", 1 << 16, SIM_RECV_TIMEOUT).unwrap();
        let addr = sock.local_addr().unwrap();
        let opts = BindOpts {
            addr: addr.to_string(),
            recv_buffer_size: 1 << 16,
            timeout: SIM_RECV_TIMEOUT,
        };

        // The refusal from the closed port surfaces as an error on the next receive
        sock.connect(closed).unwrap();
        sock.send(b"x").unwrap();

        let mut socket = Some(sock);
        let mut buf = [0u8; 64];
        for _ in 0..20 {
            assert_eq!(recv_datagram(&mut socket, &opts, &mut buf, &counters), None);
            if socket.is_none() {
                break;
            }
        }
        assert!(socket.is_none());

        // The next receive rebinds on the same port and gets data again
        let sim = UdpSocket::bind("127.0.0.1:0").unwrap();
        let mut n = None;
        for _ in 0..20 {
            n = recv_datagram(&mut socket, &opts, &mut buf, &counters);
            if n.is_some() {
                break;
            }
            sim.send_to(b"hello", addr).unwrap();
        }

        assert_eq!(n, Some(5));
        assert_eq!(&buf[..5], b"hello");
        assert_eq!(counters.rebinds.load(Ordering::Relaxed), 1);
        assert_eq!(socket.as_ref().unwrap().local_addr().unwrap(), addr);
    }
}
