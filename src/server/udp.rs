//! UDP transport with `SO_REUSEPORT` fan-out.
//!
//! Socket readers copy datagrams into a bounded channel; a single parser
//! task drains it onto the process-wide queue. When the OS accepts
//! `SO_REUSEPORT`, eight replica sockets share the address and the kernel
//! spreads datagrams across them, at the cost of cross-socket ordering.

use std::io;
use std::net::SocketAddr;

use bytes::Bytes;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::parser::{self, ParsedFrame};

/// Capacity of the datagram channel between the socket readers and the
/// parser task.
pub(crate) const DATAGRAM_CHANNEL_SIZE: usize = 1024;

/// Number of replica sockets opened when the address is reusable.
pub(crate) const REUSEPORT_REPLICAS: usize = 8;

/// Largest datagram a reader accepts.
const MAX_DATAGRAM: usize = 64 * 1024;

/// Binds the UDP receive sockets: eight replicas when `SO_REUSEPORT` is
/// accepted, otherwise exactly one.
pub(crate) fn bind_udp(addr: SocketAddr) -> io::Result<Vec<std::net::UdpSocket>> {
    let socket = udp_socket(addr)?;
    let reusable = set_reuse_port(&socket);
    socket.bind(&addr.into())?;
    // Replicas bind the resolved address, so a configured port of zero still
    // fans out onto one ephemeral port.
    let bound = socket
        .local_addr()?
        .as_socket()
        .ok_or_else(|| io::Error::other("udp socket has no local address"))?;

    let mut sockets: Vec<std::net::UdpSocket> = vec![socket.into()];
    if reusable {
        debug!(addr = %bound, replicas = REUSEPORT_REPLICAS, "udp address is reusable, opening replicas");
        for _ in 1..REUSEPORT_REPLICAS {
            let socket = udp_socket(addr)?;
            set_reuse_port(&socket);
            socket.bind(&bound.into())?;
            sockets.push(socket.into());
        }
    }
    Ok(sockets)
}

fn udp_socket(addr: SocketAddr) -> io::Result<Socket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_nonblocking(true)?;
    Ok(socket)
}

#[cfg(unix)]
fn set_reuse_port(socket: &Socket) -> bool {
    socket.set_reuse_port(true).is_ok()
}

#[cfg(not(unix))]
fn set_reuse_port(_socket: &Socket) -> bool {
    false
}

pub(crate) fn spawn_udp(
    sockets: Vec<std::net::UdpSocket>,
    queue: mpsc::UnboundedSender<ParsedFrame>,
    shutdown: CancellationToken,
) -> io::Result<Vec<JoinHandle<()>>> {
    let (datagram_tx, datagram_rx) = mpsc::channel(DATAGRAM_CHANNEL_SIZE);
    let mut tasks = Vec::new();
    for socket in sockets {
        let socket = UdpSocket::from_std(socket)?;
        tasks.push(tokio::spawn(read_datagrams(
            socket,
            datagram_tx.clone(),
            shutdown.clone(),
        )));
    }
    drop(datagram_tx);
    tasks.push(tokio::spawn(parse_datagrams(datagram_rx, queue, shutdown)));
    Ok(tasks)
}

async fn read_datagrams(
    socket: UdpSocket,
    datagrams: mpsc::Sender<Bytes>,
    shutdown: CancellationToken,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok((len, _peer)) => {
                    if len == 0 {
                        continue;
                    }
                    if datagrams.send(Bytes::copy_from_slice(&buf[..len])).await.is_err() {
                        break;
                    }
                }
                Err(error) => {
                    warn!(%error, "udp receive failed");
                }
            },
        }
    }
}

pub(crate) async fn parse_datagrams(
    mut datagrams: mpsc::Receiver<Bytes>,
    queue: mpsc::UnboundedSender<ParsedFrame>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            datagram = datagrams.recv() => match datagram {
                Some(datagram) => {
                    if let Some(parsed) = parser::parse_frame(&datagram) {
                        if queue.send(parsed).is_err() {
                            break;
                        }
                    }
                }
                None => break,
            },
        }
    }
}
