//! UNIX datagram transport.
//!
//! Same reader/parser split as the UDP transport: one socket reader feeds
//! the bounded datagram channel, one parser task drains it.

use std::io;
use std::path::Path;

use bytes::Bytes;
use tokio::net::UnixDatagram;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::parser::ParsedFrame;
use super::udp::{self, DATAGRAM_CHANNEL_SIZE};

const MAX_DATAGRAM: usize = 64 * 1024;

/// Binds the datagram socket, removing a stale socket file left behind by a
/// previous run.
pub(crate) fn bind_unixgram(path: &str) -> io::Result<std::os::unix::net::UnixDatagram> {
    let path = Path::new(path);
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    let socket = std::os::unix::net::UnixDatagram::bind(path)?;
    socket.set_nonblocking(true)?;
    Ok(socket)
}

pub(crate) fn spawn_unixgram(
    socket: std::os::unix::net::UnixDatagram,
    queue: mpsc::UnboundedSender<ParsedFrame>,
    shutdown: CancellationToken,
) -> io::Result<Vec<JoinHandle<()>>> {
    let socket = UnixDatagram::from_std(socket)?;
    let (datagram_tx, datagram_rx) = mpsc::channel(DATAGRAM_CHANNEL_SIZE);
    Ok(vec![
        tokio::spawn(read_datagrams(socket, datagram_tx, shutdown.clone())),
        tokio::spawn(udp::parse_datagrams(datagram_rx, queue, shutdown)),
    ])
}

async fn read_datagrams(
    socket: UnixDatagram,
    datagrams: mpsc::Sender<Bytes>,
    shutdown: CancellationToken,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            received = socket.recv(&mut buf) => match received {
                Ok(len) => {
                    if len == 0 {
                        continue;
                    }
                    if datagrams.send(Bytes::copy_from_slice(&buf[..len])).await.is_err() {
                        break;
                    }
                }
                Err(error) => {
                    warn!(%error, "unix datagram receive failed");
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_socket_file_is_replaced() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("syslog.sock");
        let path_str = path.display().to_string();
        let first = bind_unixgram(&path_str).expect("first bind succeeds");
        drop(first);
        // The socket file is still on disk; a rebind must clean it up.
        assert!(path.exists());
        bind_unixgram(&path_str).expect("rebind succeeds");
    }
}
