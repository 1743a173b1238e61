//! # Telecommand Client
//!
//! Receives control commands from the host. A background worker blocks on a bound UDP socket
//! with a bounded read timeout, reassembles each command and writes it to a single slot command
//! buffer. The control receive tick, run by the scheduler, moves the latest command into the
//! control cell while the vehicle is driven remotely, and asks the worker to recreate its socket
//! every few ticks.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    io,
    net::{SocketAddr, UdpSocket},
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use log::{debug, error, info, trace, warn};
use serde::Serialize;

use comms_if::{
    net::{bind_recv_socket, ChunkError, LinkError, NetParams, Reassembler},
    tc::ControlCmd,
};

use crate::{
    buffer::CircBuffer,
    data_store::{DataStore, DriveMode},
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Telecommand client
pub struct ControlReceiver {
    bg_jh: Option<JoinHandle<()>>,
    bg_run: Arc<AtomicBool>,
    shared: Arc<Shared>,
    local_addr: Option<SocketAddr>,
    recycle_ticks: u32,
}

/// Counters for the run report.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ControlRxStats {
    /// Commands fully received by the worker
    pub received: u64,

    /// Commands moved into the control cell
    pub applied: u64,

    /// Number of times the receive socket was recreated
    pub recycles: u64,
}

/// State shared between the worker and the receive tick.
struct Shared {
    cmd_buffer: CircBuffer<ControlCmd>,
    recycle: AtomicBool,
    ticks: AtomicU32,
    received: AtomicU64,
    applied: AtomicU64,
    recycles: AtomicU64,
}

/// Socket settings used by the worker each time it (re)binds.
#[derive(Clone)]
struct BindOpts {
    addr: String,
    recv_buffer_size: usize,
    timeout: Duration,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ControlRxError {
    #[error("Could not bind the control receive socket: {0}")]
    BindError(LinkError),

    #[error("Invalid control reassembly configuration: {0}")]
    ChunkError(ChunkError),

    #[error("Could not spawn the control receive thread: {0}")]
    SpawnError(io::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ControlReceiver {
    /// Bind the receive socket and start the worker.
    pub fn start(params: &NetParams) -> Result<Self, ControlRxError> {
        let mut opts = BindOpts {
            addr: params.control_rx_endpoint.clone(),
            recv_buffer_size: params.recv_buffer_size,
            timeout: params.recv_timeout(),
        };

        let reassembler =
            Reassembler::new(params.control_rx_num_buffers).map_err(ControlRxError::ChunkError)?;

        // Bind once up front so a bad endpoint fails at startup
        let socket = bind(&opts).map_err(ControlRxError::BindError)?;
        let local_addr = socket.local_addr().ok();

        // Recycled sockets keep the port picked by the first bind
        if let Some(addr) = local_addr {
            opts.addr = addr.to_string();
        }

        let shared = Arc::new(Shared {
            cmd_buffer: CircBuffer::new(1),
            recycle: AtomicBool::new(false),
            ticks: AtomicU32::new(0),
            received: AtomicU64::new(0),
            applied: AtomicU64::new(0),
            recycles: AtomicU64::new(0),
        });

        let bg_run = Arc::new(AtomicBool::new(true));

        let bg_run_clone = bg_run.clone();
        let shared_clone = shared.clone();

        let bg_jh = thread::Builder::new()
            .name("control_rx".into())
            .spawn(move || bg_thread(socket, reassembler, opts, bg_run_clone, shared_clone))
            .map_err(ControlRxError::SpawnError)?;

        info!("Control receiver listening on {}", params.control_rx_endpoint);

        Ok(Self {
            bg_jh: Some(bg_jh),
            bg_run,
            shared,
            local_addr,
            recycle_ticks: params.recv_recycle_ticks,
        })
    }

    /// Address the receive socket was first bound to.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Build the control receive tick for the scheduler.
    pub fn tick_task(&self, store: Arc<DataStore>) -> impl FnMut() + Send + 'static {
        let shared = self.shared.clone();
        let recycle_ticks = self.recycle_ticks;

        move || rx_tick(&shared, &store, recycle_ticks)
    }

    pub fn stats(&self) -> ControlRxStats {
        ControlRxStats {
            received: self.shared.received.load(Ordering::Relaxed),
            applied: self.shared.applied.load(Ordering::Relaxed),
            recycles: self.shared.recycles.load(Ordering::Relaxed),
        }
    }

    /// Stop the worker and wait for it to exit. Calling it more than once has no effect.
    pub fn stop(&mut self) {
        if let Some(jh) = self.bg_jh.take() {
            self.bg_run.store(false, Ordering::Relaxed);
            if jh.join().is_err() {
                error!("Control receive thread panicked");
            }
            self.shared.cmd_buffer.clear();
        }
    }
}

impl Drop for ControlReceiver {
    fn drop(&mut self) {
        self.stop();
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn bind(opts: &BindOpts) -> Result<UdpSocket, LinkError> {
    bind_recv_socket(&opts.addr, opts.recv_buffer_size, opts.timeout)
}

/// Move the latest received command into the control cell and request socket recycling.
fn rx_tick(shared: &Shared, store: &DataStore, recycle_ticks: u32) {
    if let Ok(cmd) = shared.cmd_buffer.read() {
        if store.write_control_as(DriveMode::Remote, cmd) {
            shared.applied.fetch_add(1, Ordering::Relaxed);
        }
    }

    let ticks = shared.ticks.fetch_add(1, Ordering::Relaxed) + 1;
    if recycle_ticks > 0 && ticks % recycle_ticks == 0 {
        shared.recycle.store(true, Ordering::Relaxed);
    }
}

/// Background thread, receives datagrams until told to stop.
fn bg_thread(
    socket: UdpSocket,
    mut reassembler: Reassembler,
    opts: BindOpts,
    run: Arc<AtomicBool>,
    shared: Arc<Shared>,
) {
    let mut socket = Some(socket);
    let mut buf = vec![0u8; 65536];

    while run.load(Ordering::Relaxed) {
        if shared.recycle.swap(false, Ordering::Relaxed) {
            trace!("Recycling control receive socket");
            socket = None;
            reassembler.clear();
            shared.recycles.fetch_add(1, Ordering::Relaxed);
        }

        if socket.is_none() {
            match bind(&opts) {
                Ok(s) => socket = Some(s),
                Err(e) => {
                    warn!("Could not rebind control receive socket: {}", e);
                    thread::sleep(opts.timeout);
                    continue;
                }
            }
        }

        let sock = match socket.as_ref() {
            Some(s) => s,
            None => continue,
        };

        match sock.recv_from(&mut buf) {
            Ok((n, _)) => match reassembler.push(&buf[..n]) {
                Ok(Some(msg)) => {
                    let cmd = ControlCmd::from_payload(&msg);
                    trace!("Control command received: {:?}", cmd);
                    shared.cmd_buffer.write(cmd);
                    shared.received.fetch_add(1, Ordering::Relaxed);
                }
                Ok(None) => (),
                Err(e) => debug!("Dropped control datagram: {}", e),
            },
            Err(ref e)
                if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => {}
            Err(e) => {
                warn!("Control receive error: {}", e);
                socket = None;
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
