//! Simple host side telemetry receiver
//!
//! Answers link handshakes, reassembles chunked messages and prints their sizes. If a control
//! text is given it is sent back to the sender of every completed message.

use std::net::UdpSocket;

use comms_if::{
    net::{Chunker, Reassembler, HANDSHAKE, HANDSHAKE_ACK},
    tc::ControlCmd,
};
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(name = "telem_host")]
struct Opt {
    /// Local address to listen on
    #[structopt(short, long, default_value = "0.0.0.0:8001")]
    bind: String,

    /// Number of buffer slots used by the sender
    #[structopt(short, long, default_value = "3")]
    num_buffers: u32,

    /// Control text ("throttle,steering") to send back
    #[structopt(short, long)]
    control: Option<String>,

    /// Address to send control commands to, defaults to the telemetry sender
    #[structopt(long)]
    control_to: Option<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let opt = Opt::from_args();

    let socket = UdpSocket::bind(&opt.bind)?;
    let mut reassembler = Reassembler::new(opt.num_buffers)?;
    let mut chunker = Chunker::new(comms_if::net::chunk::DEFAULT_MAX_BODY, 1)?;

    let control = opt.control.as_deref().map(ControlCmd::from_text);

    println!("Telemetry host listening on {}", opt.bind);

    let mut buf = vec![0u8; 65536];

    loop {
        let (n, src) = socket.recv_from(&mut buf)?;
        let datagram = &buf[..n];

        if datagram == HANDSHAKE {
            println!("Handshake from {}", src);
            socket.send_to(HANDSHAKE_ACK, src)?;
            continue;
        }

        match reassembler.push(datagram) {
            Ok(Some(msg)) => {
                println!("Received {} byte message from {}", msg.len(), src);

                if let Some(cmd) = control {
                    for d in chunker.chunk(&cmd.to_payload())? {
                        match opt.control_to.as_ref() {
                            Some(to) => socket.send_to(&d, to)?,
                            None => socket.send_to(&d, src)?,
                        };
                    }
                }
            }
            Ok(None) => (),
            Err(e) => println!("Dropped datagram from {}: {}", src, e),
        }
    }
}
