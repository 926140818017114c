//! Stream transports: plaintext TCP and TCP-over-TLS.
//!
//! Frames are newline-delimited. Every accepted connection gets its own
//! read task; parsed frames go straight onto the process-wide queue.

use std::io;

use futures::StreamExt;
use tokio::io::AsyncRead;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::parser::{self, ParsedFrame};

/// Frames longer than this are discarded rather than buffered without bound.
pub(crate) const MAX_FRAME_LENGTH: usize = 128 * 1024;

pub(crate) fn spawn_tcp(
    listener: std::net::TcpListener,
    tls: Option<TlsAcceptor>,
    queue: mpsc::UnboundedSender<ParsedFrame>,
    shutdown: CancellationToken,
) -> io::Result<JoinHandle<()>> {
    listener.set_nonblocking(true)?;
    let listener = TcpListener::from_std(listener)?;
    Ok(tokio::spawn(accept_loop(listener, tls, queue, shutdown)))
}

async fn accept_loop(
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    queue: mpsc::UnboundedSender<ParsedFrame>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "accepted syslog connection");
                    let queue = queue.clone();
                    let shutdown = shutdown.clone();
                    match tls.clone() {
                        Some(acceptor) => {
                            tokio::spawn(serve_tls(acceptor, stream, queue, shutdown));
                        }
                        None => {
                            tokio::spawn(read_frames(stream, queue, shutdown));
                        }
                    }
                }
                Err(error) => {
                    warn!(%error, "failed to accept syslog connection");
                }
            },
        }
    }
}

async fn serve_tls(
    acceptor: TlsAcceptor,
    stream: tokio::net::TcpStream,
    queue: mpsc::UnboundedSender<ParsedFrame>,
    shutdown: CancellationToken,
) {
    match acceptor.accept(stream).await {
        Ok(stream) => read_frames(stream, queue, shutdown).await,
        Err(error) => warn!(%error, "tls handshake failed"),
    }
}

async fn read_frames<S>(
    stream: S,
    queue: mpsc::UnboundedSender<ParsedFrame>,
    shutdown: CancellationToken,
) where
    S: AsyncRead + Unpin,
{
    let mut frames = FramedRead::new(stream, LinesCodec::new_with_max_length(MAX_FRAME_LENGTH));
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = frames.next() => match frame {
                Some(Ok(line)) => {
                    if let Some(parsed) = parser::parse_frame(line.as_bytes()) {
                        if queue.send(parsed).is_err() {
                            break;
                        }
                    }
                }
                Some(Err(error)) => {
                    warn!(%error, "dropping oversized or unreadable frame");
                }
                None => break,
            },
        }
    }
}
