//! # Network Module
//!
//! This module provides the UDP networking used between the vehicle and the host. Every message is
//! split into datagrams by the [`chunk`] codec, and outgoing links follow the [`link`] state
//! machine, which is driven by a periodic reconnect watchdog.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

pub mod chunk;
pub mod link;

pub use chunk::{ChunkError, ChunkHeader, Chunker, Reassembler, ReassemblyStats};
pub use link::{Link, LinkAction, LinkEvent, LinkState};

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    io,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket},
    time::Duration,
};

use log::{debug, info, trace, warn};
use serde::{Deserialize, Serialize};
use socket2::{Domain, Protocol, Socket, Type};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Datagram sent to the remote to open a link.
pub const HANDSHAKE: &[u8] = b"hi";

/// Datagram sent back by a host acknowledging the handshake.
pub const HANDSHAKE_ACK: &[u8] = b"ok";

// ------------------------------------------------------------------------------------------------
// MACROS
// ------------------------------------------------------------------------------------------------

macro_rules! set_sockopts {
    ($socket:expr, $(($opt:ident, $val:expr)),+) => {
        $(
            $socket.$opt($val)
                .map_err(|e| LinkError::SocketOptionError(stringify!($opt).into(), e))?;
        )+
    };
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Network parameters, loaded from `net.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct NetParams {
    /// Camera telemetry channel
    pub cam: ChannelParams,

    /// Depth telemetry channel
    pub depth: ChannelParams,

    /// Vehicle state telemetry channel
    pub state: ChannelParams,

    /// Channel relaying the autonomous control command to the host
    pub control_relay: ChannelParams,

    /// Local address the control receiver binds to
    pub control_rx_endpoint: String,

    /// Period of the control receive tick
    pub control_rx_tick_ms: u64,

    /// Number of buffer slots used by the remote control sender
    #[serde(default = "default_control_rx_num_buffers")]
    pub control_rx_num_buffers: u32,

    /// Number of control receive ticks after which the receive socket is recreated
    pub recv_recycle_ticks: u32,

    /// Read timeout of blocking receive sockets
    pub recv_timeout_ms: u64,

    /// Number of times the handshake datagram is sent when a link connects
    pub handshake_repeats: u32,

    /// Number of watchdog ticks a connecting link waits for an acknowledgement
    pub handshake_timeout_ticks: u32,

    /// Period of the reconnect watchdog
    pub watchdog_tick_ms: u64,

    /// Kernel send buffer size for outgoing links
    pub send_buffer_size: usize,

    /// Kernel receive buffer size for bound sockets
    pub recv_buffer_size: usize,

    /// Local address the simulator feed binds to, if a simulator is used
    #[serde(default)]
    pub sim_endpoint: Option<String>,
}

/// Parameters of a single outgoing channel.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelParams {
    /// Remote `host:port` the channel sends to
    pub endpoint: String,

    /// Period between sends
    pub tick_ms: u64,

    /// Number of rotating buffer slots
    pub num_buffers: u32,

    /// Maximum body size of each datagram
    #[serde(default = "default_max_body")]
    pub max_body: usize,

    /// Capacity of the circular buffer feeding this channel
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,

    /// Disabled channels are never opened
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

/// Options applied to a [`UdpLink`] when it (re)connects.
#[derive(Debug, Clone, Copy)]
pub struct LinkOptions {
    pub handshake_repeats: u32,
    pub handshake_timeout_ticks: u32,
    pub send_buffer_size: usize,
}

/// Counters for a single link.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct LinkStats {
    pub messages_sent: u64,
    pub datagrams_sent: u64,
    pub datagrams_dropped: u64,
    pub io_errors: u64,
    pub connects: u64,
}

/// A connected, non-blocking UDP link to one remote endpoint.
///
/// The link owns the chunker for its channel, so buffer slots rotate per link.
pub struct UdpLink {
    name: String,
    remote: SocketAddr,
    socket: Option<UdpSocket>,
    link: Link,
    chunker: Chunker,
    opts: LinkOptions,
    stats: LinkStats,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug)]
pub enum LinkError {
    #[error("Could not resolve endpoint {0}: {1}")]
    ResolveError(String, io::Error),

    #[error("Endpoint {0} resolved to no addresses")]
    NoAddress(String),

    #[error("Error creating the socket: {0}")]
    CreateSocketError(io::Error),

    #[error("Could not set the {0} socket option: {1}")]
    SocketOptionError(String, io::Error),

    #[error("Could not bind the socket to {0}: {1}")]
    BindError(String, io::Error),

    #[error("Could not connect the socket to {0}: {1}")]
    ConnectError(SocketAddr, io::Error),

    #[error("Link is not ready (currently {0:?})")]
    NotReady(LinkState),

    #[error("Could not chunk the message: {0}")]
    ChunkError(#[from] ChunkError),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl NetParams {
    pub fn link_options(&self) -> LinkOptions {
        LinkOptions {
            handshake_repeats: self.handshake_repeats,
            handshake_timeout_ticks: self.handshake_timeout_ticks,
            send_buffer_size: self.send_buffer_size,
        }
    }

    pub fn recv_timeout(&self) -> Duration {
        Duration::from_millis(self.recv_timeout_ms)
    }
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            handshake_repeats: 10,
            handshake_timeout_ticks: 20,
            send_buffer_size: 1 << 20,
        }
    }
}

impl UdpLink {
    /// Create a new link for the given channel.
    ///
    /// The link starts disconnected, no socket is created until the first watchdog tick.
    pub fn new(name: &str, channel: &ChannelParams, opts: LinkOptions) -> Result<Self, LinkError> {
        Ok(Self {
            name: name.into(),
            remote: resolve(&channel.endpoint)?,
            socket: None,
            link: Link::new(),
            chunker: Chunker::new(channel.max_body, channel.num_buffers)?,
            opts,
            stats: LinkStats::default(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> LinkState {
        self.link.state()
    }

    pub fn is_ready(&self) -> bool {
        self.link.is_ready()
    }

    pub fn stats(&self) -> LinkStats {
        self.stats
    }

    /// Advance the reconnect watchdog by one tick.
    ///
    /// Disconnected links reconnect, connecting links check for a handshake acknowledgement and
    /// eventually time out.
    pub fn watchdog_tick(&mut self) {
        if self.link.state() == LinkState::Connecting && self.poll_handshake() {
            self.apply(LinkEvent::HandshakeAck);
            return;
        }

        if let Some(event) = self.link.watchdog(self.opts.handshake_timeout_ticks) {
            if event == LinkEvent::Timeout {
                debug!("{} link handshake timed out", self.name);
            }
            self.apply(event);
        }
    }

    /// Send a message over the link.
    ///
    /// Returns the number of datagrams handed to the socket. Datagrams which fail to send are
    /// logged and dropped, they never change the link state.
    pub fn send_message(&mut self, payload: &[u8]) -> Result<usize, LinkError> {
        if !self.link.is_ready() {
            return Err(LinkError::NotReady(self.link.state()));
        }

        let datagrams = self.chunker.chunk(payload)?;

        let socket = match self.socket.as_ref() {
            Some(s) => s,
            None => return Err(LinkError::NotReady(self.link.state())),
        };

        let mut sent = 0;
        let mut errors = 0;

        for datagram in datagrams.iter() {
            match socket.send(datagram) {
                Ok(_) => sent += 1,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    trace!("{} link send buffer full, datagram dropped", self.name);
                    self.stats.datagrams_dropped += 1;
                }
                Err(e) => {
                    warn!("{} link send error: {}", self.name, e);
                    errors += 1;
                }
            }
        }

        for _ in 0..errors {
            self.apply(LinkEvent::IoError);
        }

        self.stats.messages_sent += 1;
        self.stats.datagrams_sent += sent as u64;

        Ok(sent)
    }

    /// Close the link, it will reconnect on the next watchdog tick.
    pub fn disconnect(&mut self) {
        self.apply(LinkEvent::Disconnect);
    }

    fn apply(&mut self, event: LinkEvent) {
        match self.link.handle(event) {
            LinkAction::SendHandshake => match self.open_socket() {
                Ok(()) => {
                    self.stats.connects += 1;
                    self.send_handshake();
                }
                // Left connecting without a socket, the handshake timeout retries it
                Err(e) => warn!("{} link could not open socket: {}", self.name, e),
            },
            LinkAction::BeginTraffic => info!("{} link ready ({})", self.name, self.remote),
            LinkAction::Close => {
                self.socket = None;
                info!("{} link disconnected", self.name);
            }
            LinkAction::LogError => self.stats.io_errors += 1,
            LinkAction::None => (),
        }
    }

    fn open_socket(&mut self) -> Result<(), LinkError> {
        let socket = Socket::new(
            Domain::for_address(self.remote),
            Type::DGRAM,
            Some(Protocol::UDP),
        )
        .map_err(LinkError::CreateSocketError)?;

        set_sockopts!(
            socket,
            (set_send_buffer_size, self.opts.send_buffer_size),
            (set_nonblocking, true)
        );

        let local: SocketAddr = if self.remote.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };

        socket
            .bind(&local.into())
            .map_err(|e| LinkError::BindError(local.to_string(), e))?;
        socket
            .connect(&self.remote.into())
            .map_err(|e| LinkError::ConnectError(self.remote, e))?;

        self.socket = Some(socket.into());

        Ok(())
    }

    fn send_handshake(&mut self) {
        let socket = match self.socket.as_ref() {
            Some(s) => s,
            None => return,
        };

        let mut errors = 0;
        for _ in 0..self.opts.handshake_repeats {
            if let Err(e) = socket.send(HANDSHAKE) {
                debug!("{} link handshake send failed: {}", self.name, e);
                errors += 1;
            }
        }

        for _ in 0..errors {
            self.apply(LinkEvent::IoError);
        }

        debug!("{} link sent handshake to {}", self.name, self.remote);
    }

    /// Any datagram arriving on a connecting socket counts as the acknowledgement.
    fn poll_handshake(&mut self) -> bool {
        let socket = match self.socket.as_ref() {
            Some(s) => s,
            None => return false,
        };

        let mut buf = [0u8; 64];

        match socket.recv(&mut buf) {
            Ok(_) => true,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => false,
            Err(e) => {
                // Usually ICMP port unreachable while the host isn't listening yet
                trace!("{} link handshake poll error: {}", self.name, e);
                false
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Create a socket bound to `addr` with the given kernel receive buffer size and read timeout.
pub fn bind_recv_socket(
    addr: &str,
    recv_buffer_size: usize,
    timeout: Duration,
) -> Result<UdpSocket, LinkError> {
    let local = resolve(addr)?;

    let socket = Socket::new(Domain::for_address(local), Type::DGRAM, Some(Protocol::UDP))
        .map_err(LinkError::CreateSocketError)?;

    set_sockopts!(
        socket,
        (set_reuse_address, true),
        (set_recv_buffer_size, recv_buffer_size),
        (set_read_timeout, Some(timeout))
    );

    socket
        .bind(&local.into())
        .map_err(|e| LinkError::BindError(addr.into(), e))?;

    Ok(socket.into())
}

fn resolve(endpoint: &str) -> Result<SocketAddr, LinkError> {
    endpoint
        .to_socket_addrs()
        .map_err(|e| LinkError::ResolveError(endpoint.into(), e))?
        .next()
        .ok_or_else(|| LinkError::NoAddress(endpoint.into()))
}

fn default_max_body() -> usize {
    chunk::DEFAULT_MAX_BODY
}

fn default_buffer_capacity() -> usize {
    2
}

fn default_enabled() -> bool {
    true
}

fn default_control_rx_num_buffers() -> u32 {
    1
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    fn channel(endpoint: String) -> ChannelParams {
        ChannelParams {
            endpoint,
            tick_ms: 50,
            num_buffers: 3,
            max_body: 9000,
            buffer_capacity: 2,
            enabled: true,
        }
    }

    #[test]
    fn test_not_ready_send() {
        let mut link = UdpLink::new(
            "test",
            &channel("127.0.0.1:9".into()),
            LinkOptions::default(),
        )
        .unwrap();

        assert!(matches!(
            link.send_message(b"payload"),
            Err(LinkError::NotReady(LinkState::Disconnected))
        ));
    }

    #[test]
    fn test_loopback() {
        let host = bind_recv_socket("127.0.0.1:0", 1 << 20, Duration::from_secs(2)).unwrap();
        let host_addr = host.local_addr().unwrap();

        let opts = LinkOptions {
            handshake_repeats: 3,
            handshake_timeout_ticks: 100,
            send_buffer_size: 1 << 20,
        };
        let mut link = UdpLink::new("test", &channel(host_addr.to_string()), opts).unwrap();

        // First tick opens the socket and sends the handshake
        link.watchdog_tick();
        assert_eq!(link.state(), LinkState::Connecting);

        let mut buf = [0u8; 16];
        let (n, peer) = host.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], HANDSHAKE);
        host.send_to(HANDSHAKE_ACK, peer).unwrap();

        // Wait for the acknowledgement to land on the non-blocking socket
        for _ in 0..200 {
            link.watchdog_tick();
            if link.is_ready() {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(link.is_ready());

        let payload: Vec<u8> = (0..27_500).map(|i| (i % 256) as u8).collect();
        assert_eq!(link.send_message(&payload).unwrap(), 4);

        // Remaining handshake repeats arrive first and are rejected by the reassembler
        let mut reassembler = Reassembler::new(3).unwrap();
        let mut buf = vec![0u8; 65536];
        let mut received = None;
        for _ in 0..16 {
            let (n, _) = host.recv_from(&mut buf).unwrap();
            if let Ok(Some(msg)) = reassembler.push(&buf[..n]) {
                received = Some(msg);
                break;
            }
        }

        assert_eq!(received, Some(payload));
        assert_eq!(link.stats().datagrams_sent, 4);
    }
}
