//! The listener set: one module per transport, supervised by
//! [`SyslogServer`].
//!
//! Every configured transport is bound at construction time and booted by
//! `start`. Parsed frames from all transports converge on one unbounded
//! queue; the receiver owns the draining side.

use std::net::SocketAddr;

use snafu::{ResultExt, Snafu};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::debug;

mod parser;
mod tcp;
mod tls;
mod udp;
#[cfg(unix)]
mod unix;

pub use parser::{ParseError, ParsedFrame, parse_frame};
pub use tls::TlsError;

use crate::config::SyslogConfig;

/// An error raised while binding or booting the listener set.
#[derive(Debug, Snafu)]
pub enum ServerError {
    #[snafu(display("invalid {transport} listener address {addr}: {source}"))]
    BadAddress {
        transport: &'static str,
        addr: String,
        source: std::net::AddrParseError,
    },

    #[snafu(display("failed to bind {transport} listener on {addr}: {source}"))]
    Bind {
        transport: &'static str,
        addr: String,
        source: std::io::Error,
    },

    #[snafu(display("{source}"))]
    Tls { source: TlsError },

    #[snafu(display("failed to start {transport} listener: {source}"))]
    Start {
        transport: &'static str,
        source: std::io::Error,
    },
}

enum BoundListener {
    Tcp {
        listener: std::net::TcpListener,
        tls: Option<TlsAcceptor>,
    },
    Udp {
        sockets: Vec<std::net::UdpSocket>,
    },
    #[cfg(unix)]
    Unix {
        socket: std::os::unix::net::UnixDatagram,
    },
}

impl BoundListener {
    fn transport(&self) -> &'static str {
        match self {
            BoundListener::Tcp { tls: None, .. } => "tcp",
            BoundListener::Tcp { tls: Some(_), .. } => "tcp-tls",
            BoundListener::Udp { .. } => "udp",
            #[cfg(unix)]
            BoundListener::Unix { .. } => "unixgram",
        }
    }
}

/// Owns the concrete transport listeners and the queue they feed.
pub struct SyslogServer {
    listeners: Vec<BoundListener>,
    transports: usize,
    bound: Vec<(&'static str, SocketAddr)>,
    queue_tx: mpsc::UnboundedSender<ParsedFrame>,
    tasks: Vec<JoinHandle<()>>,
    shutdown: CancellationToken,
}

impl SyslogServer {
    /// Binds every configured transport. Transports with an empty address are
    /// skipped; a configured address that cannot be bound is an error. The
    /// TLS transport is additionally skipped when its certificate material is
    /// not configured.
    pub fn bind(
        config: &SyslogConfig,
        queue_tx: mpsc::UnboundedSender<ParsedFrame>,
    ) -> Result<Self, ServerError> {
        let mut listeners = Vec::new();
        let mut bound = Vec::new();

        if !config.addr_tcp.is_empty() {
            let listener = std::net::TcpListener::bind(&config.addr_tcp).context(BindSnafu {
                transport: "tcp",
                addr: config.addr_tcp.clone(),
            })?;
            if let Ok(addr) = listener.local_addr() {
                bound.push(("tcp", addr));
            }
            listeners.push(BoundListener::Tcp {
                listener,
                tls: None,
            });
        }

        if !config.addr_udp.is_empty() {
            let addr: SocketAddr = config.addr_udp.parse().context(BadAddressSnafu {
                transport: "udp",
                addr: config.addr_udp.clone(),
            })?;
            let sockets = udp::bind_udp(addr).context(BindSnafu {
                transport: "udp",
                addr: config.addr_udp.clone(),
            })?;
            if let Some(socket) = sockets.first()
                && let Ok(addr) = socket.local_addr()
            {
                bound.push(("udp", addr));
            }
            listeners.push(BoundListener::Udp { sockets });
        }

        if !config.addr_tcp_tls.is_empty() {
            match tls::tls_acceptor(
                &config.client_cert_path,
                &config.client_key_path,
                &config.root_ca_path,
            )
            .context(TlsSnafu)?
            {
                Some(acceptor) => {
                    let listener =
                        std::net::TcpListener::bind(&config.addr_tcp_tls).context(BindSnafu {
                            transport: "tcp-tls",
                            addr: config.addr_tcp_tls.clone(),
                        })?;
                    if let Ok(addr) = listener.local_addr() {
                        bound.push(("tcp-tls", addr));
                    }
                    listeners.push(BoundListener::Tcp {
                        listener,
                        tls: Some(acceptor),
                    });
                }
                None => {
                    debug!("tls material not configured, tcp-tls listener disabled");
                }
            }
        }

        #[cfg(unix)]
        if !config.uds_path.is_empty() {
            let socket = unix::bind_unixgram(&config.uds_path).context(BindSnafu {
                transport: "unixgram",
                addr: config.uds_path.clone(),
            })?;
            listeners.push(BoundListener::Unix { socket });
        }

        Ok(Self {
            transports: listeners.len(),
            listeners,
            bound,
            queue_tx,
            tasks: Vec::new(),
            shutdown: CancellationToken::new(),
        })
    }

    /// Number of bound transports.
    pub fn transport_count(&self) -> usize {
        self.transports
    }

    /// Resolved address of a bound socket transport (`"tcp"`, `"udp"`,
    /// `"tcp-tls"`), useful when the configured port was zero.
    pub fn local_addr(&self, transport: &str) -> Option<SocketAddr> {
        self.bound
            .iter()
            .find(|(name, _)| *name == transport)
            .map(|(_, addr)| *addr)
    }

    /// Boots the read loops for every bound transport, in order.
    pub fn start(&mut self) -> Result<(), ServerError> {
        for listener in std::mem::take(&mut self.listeners) {
            let transport = listener.transport();
            match listener {
                BoundListener::Tcp { listener, tls } => {
                    let task = tcp::spawn_tcp(
                        listener,
                        tls,
                        self.queue_tx.clone(),
                        self.shutdown.clone(),
                    )
                    .context(StartSnafu { transport })?;
                    self.tasks.push(task);
                }
                BoundListener::Udp { sockets } => {
                    let tasks =
                        udp::spawn_udp(sockets, self.queue_tx.clone(), self.shutdown.clone())
                            .context(StartSnafu { transport })?;
                    self.tasks.extend(tasks);
                }
                #[cfg(unix)]
                BoundListener::Unix { socket } => {
                    let tasks =
                        unix::spawn_unixgram(socket, self.queue_tx.clone(), self.shutdown.clone())
                            .context(StartSnafu { transport })?;
                    self.tasks.extend(tasks);
                }
            }
            debug!(transport, "syslog listener started");
        }
        Ok(())
    }

    /// Stops all listener tasks. Idempotent.
    pub async fn stop(&mut self) {
        self.shutdown.cancel();
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
    }
}
