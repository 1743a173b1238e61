//! # TM Server
//!
//! Outgoing telemetry channels. Each channel owns a [`UdpLink`] and, on every send tick, takes
//! the next payload from its source in the data store and sends it. A shared watchdog tick keeps
//! every link connected.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use log::{debug, info, warn};
use serde::Serialize;

use comms_if::net::{ChannelParams, LinkError, LinkOptions, LinkState, LinkStats, NetParams, UdpLink};

use crate::{
    data_store::{DataStore, DriveMode},
    sched::TaskList,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Telemetry server
pub struct TmServer {
    channels: Vec<Arc<TmChannel>>,
}

/// A single outgoing channel.
pub struct TmChannel {
    source: TmSource,
    tick: Duration,
    link: Mutex<UdpLink>,
    store: Arc<DataStore>,
}

/// Summary of a channel for the run report.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelReport {
    pub name: &'static str,
    pub state: LinkState,
    pub stats: LinkStats,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Where a channel takes its payloads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TmSource {
    /// Oldest encoded frame in the camera buffer
    Cam,

    /// Oldest encoded depth map in the depth buffer
    Depth,

    /// Current vehicle state
    State,

    /// Current control command, only while driving autonomously
    ControlRelay,
}

#[derive(Debug, thiserror::Error)]
pub enum TmServerError {
    #[error("Could not create the {0} channel: {1}")]
    ChannelError(&'static str, LinkError),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl TmSource {
    pub fn name(self) -> &'static str {
        match self {
            TmSource::Cam => "cam",
            TmSource::Depth => "depth",
            TmSource::State => "state",
            TmSource::ControlRelay => "control_relay",
        }
    }
}

impl TmServer {
    /// Create a new instance of the TM Server.
    ///
    /// Links are created disconnected, they connect on the first watchdog tick. Disabled
    /// channels are skipped.
    pub fn new(params: &NetParams, store: Arc<DataStore>) -> Result<Self, TmServerError> {
        let opts = params.link_options();

        let mut channels = Vec::new();

        for (source, channel) in [
            (TmSource::Cam, &params.cam),
            (TmSource::Depth, &params.depth),
            (TmSource::State, &params.state),
            (TmSource::ControlRelay, &params.control_relay),
        ]
        .iter()
        {
            if !channel.enabled {
                info!("{} channel disabled", source.name());
                continue;
            }

            channels.push(Arc::new(TmChannel::new(
                *source,
                channel,
                opts,
                store.clone(),
            )?));
        }

        Ok(Self { channels })
    }

    pub fn channels(&self) -> &[Arc<TmChannel>] {
        &self.channels
    }

    /// Register the channel send ticks, gated on the session being active, and the ungated
    /// reconnect watchdog.
    pub fn register(&self, tasks: &mut TaskList, watchdog_period: Duration) {
        for channel in self.channels.iter() {
            let c = channel.clone();
            tasks.add(
                &format!("{}_send", channel.source.name()),
                channel.tick,
                true,
                move || c.send_tick(),
            );
        }

        let channels = self.channels.clone();
        tasks.add("tm_watchdog", watchdog_period, false, move || {
            for c in channels.iter() {
                c.watchdog_tick();
            }
        });
    }

    pub fn report(&self) -> Vec<ChannelReport> {
        self.channels.iter().map(|c| c.report()).collect()
    }

    /// Close every link.
    pub fn shutdown(&self) {
        for c in self.channels.iter() {
            c.lock_link().disconnect();
        }
    }
}

impl TmChannel {
    pub fn new(
        source: TmSource,
        params: &ChannelParams,
        opts: LinkOptions,
        store: Arc<DataStore>,
    ) -> Result<Self, TmServerError> {
        let link = UdpLink::new(source.name(), params, opts)
            .map_err(|e| TmServerError::ChannelError(source.name(), e))?;

        debug!("{} channel created for {}", source.name(), params.endpoint);

        Ok(Self {
            source,
            tick: Duration::from_millis(params.tick_ms),
            link: Mutex::new(link),
            store,
        })
    }

    pub fn source(&self) -> TmSource {
        self.source
    }

    /// Send the next payload, if the link is ready and there is anything to send.
    pub fn send_tick(&self) {
        let mut link = self.lock_link();

        // Leave buffered data in place while the link is down
        if !link.is_ready() {
            return;
        }

        let payload = match self.next_payload() {
            Some(p) => p,
            None => return,
        };

        match link.send_message(&payload) {
            Ok(_) => (),
            Err(LinkError::NotReady(_)) => (),
            Err(e) => warn!("{} channel send failed: {}", self.source.name(), e),
        }
    }

    pub fn watchdog_tick(&self) {
        self.lock_link().watchdog_tick();
    }

    pub fn report(&self) -> ChannelReport {
        let link = self.lock_link();

        ChannelReport {
            name: self.source.name(),
            state: link.state(),
            stats: link.stats(),
        }
    }

    fn next_payload(&self) -> Option<Vec<u8>> {
        match self.source {
            TmSource::Cam => self.store.cam_buffer.read().ok(),
            TmSource::Depth => self.store.depth_buffer.read().ok(),
            TmSource::State => Some(self.store.vehicle_state().to_payload()),
            TmSource::ControlRelay => match self.store.flags.drive_mode() {
                DriveMode::Autonomous => Some(self.store.control().to_payload()),
                DriveMode::Remote => None,
            },
        }
    }

    fn lock_link(&self) -> std::sync::MutexGuard<UdpLink> {
        self.link.lock().expect("TmChannel: link mutex poisoned")
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::data_store::SessionFlags;
    use comms_if::{
        eqpt::VehicleState,
        net::{bind_recv_socket, Reassembler, HANDSHAKE, HANDSHAKE_ACK},
        tc::ControlCmd,
    };
    use std::{net::UdpSocket, thread};

    fn channel_params(endpoint: String) -> ChannelParams {
        ChannelParams {
            endpoint,
            tick_ms: 10,
            num_buffers: 3,
            max_body: 9000,
            buffer_capacity: 2,
            enabled: true,
        }
    }

    /// Bring a channel's link up against a host socket.
    fn connect(channel: &TmChannel, host: &UdpSocket) {
        channel.watchdog_tick();

        let mut buf = [0u8; 16];
        let (n, peer) = host.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], HANDSHAKE);
        host.send_to(HANDSHAKE_ACK, peer).unwrap();

        for _ in 0..200 {
            channel.watchdog_tick();
            if channel.report().state == LinkState::Ready {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("link never became ready");
    }

    /// Receive datagrams until one completes a message.
    fn recv_message(host: &UdpSocket) -> Vec<u8> {
        let mut reassembler = Reassembler::new(3).unwrap();
        let mut buf = vec![0u8; 65536];
        loop {
            let (n, _) = host.recv_from(&mut buf).unwrap();
            if let Ok(Some(msg)) = reassembler.push(&buf[..n]) {
                return msg;
            }
        }
    }

    fn setup(source: TmSource, mode: DriveMode) -> (Arc<DataStore>, TmChannel, UdpSocket) {
        let host = bind_recv_socket("127.0.0.1:0", 1 << 20, Duration::from_secs(2)).unwrap();
        let store = Arc::new(DataStore::new(Arc::new(SessionFlags::new(mode)), 2, 2));

        let opts = LinkOptions {
            handshake_repeats: 1,
            ..Default::default()
        };
        let channel = TmChannel::new(
            source,
            &channel_params(host.local_addr().unwrap().to_string()),
            opts,
            store.clone(),
        )
        .unwrap();

        (store, channel, host)
    }

    #[test]
    fn test_state_channel() {
        let (store, channel, host) = setup(TmSource::State, DriveMode::Autonomous);

        let state = VehicleState::from_array([1.0, 2.0, 3.0, 0.0, 0.0, 0.0, 0.5, 0.0, 0.0]);
        store.set_vehicle_state(state);

        // Not ready yet, nothing is sent
        channel.send_tick();
        connect(&channel, &host);

        channel.send_tick();
        let msg = recv_message(&host);
        assert_eq!(VehicleState::from_payload(&msg).unwrap(), state);
        assert_eq!(channel.report().stats.messages_sent, 1);
    }

    #[test]
    fn test_cam_channel_drains_buffer() {
        let (store, channel, host) = setup(TmSource::Cam, DriveMode::Autonomous);
        connect(&channel, &host);

        // Empty buffer sends nothing
        channel.send_tick();
        assert_eq!(channel.report().stats.messages_sent, 0);

        store.cam_buffer.write(vec![1; 20_000]);
        store.cam_buffer.write(vec![2; 10]);
        store.cam_buffer.write(vec![3; 10]);

        channel.send_tick();
        assert_eq!(recv_message(&host), vec![2; 10]);
        assert_eq!(store.cam_buffer.len(), 1);
    }

    #[test]
    fn test_control_relay_only_autonomous() {
        let (store, channel, host) = setup(TmSource::ControlRelay, DriveMode::Remote);
        connect(&channel, &host);

        store.set_control(ControlCmd::new(0.25, -0.5));
        channel.send_tick();
        assert_eq!(channel.report().stats.messages_sent, 0);

        store.flags.set_drive_mode(DriveMode::Autonomous);
        channel.send_tick();
        assert_eq!(recv_message(&host), b"0.25,-0.5".to_vec());
    }
}
