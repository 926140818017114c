//! The receiver block: supervises the listener set, gates by severity,
//! packs part-maps into pooled messages and forwards them downstream.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use snafu::{ResultExt, Snafu};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::config::{ConfLoader, ConfigError, RECEIVER_CONFIG_NAME, SyslogConfig};
use crate::producer::ProducerHandle;
use crate::record::schema::SEVERITY_KEY;
use crate::record::{LogParts, pool};
use crate::server::{ParsedFrame, ServerError, SyslogServer};

/// An error raised while initializing the receiver.
#[derive(Debug, Snafu)]
pub enum ReceiverError {
    #[snafu(display("{source}"))]
    Config { source: ConfigError },

    #[snafu(display("{source}"))]
    Server { source: ServerError },
}

/// Supervises the syslog listeners and forwards packed records downstream.
///
/// The downstream producer is held in an atomically-swappable slot so it can
/// be installed, or replaced, while the listeners are already running. Frames
/// that arrive before a producer is installed are dropped.
pub struct SyslogReceiver {
    config: SyslogConfig,
    server: SyslogServer,
    queue_rx: Option<mpsc::UnboundedReceiver<ParsedFrame>>,
    sink: Arc<ArcSwapOption<ProducerHandle>>,
    drain: Option<JoinHandle<()>>,
    shutdown: CancellationToken,
}

impl SyslogReceiver {
    /// Reads the receiver configuration from the loader and binds the
    /// listeners.
    pub fn from_loader(conf: &ConfLoader) -> Result<Self, ReceiverError> {
        let config: SyslogConfig = conf.load(RECEIVER_CONFIG_NAME).context(ConfigSnafu)?;
        Self::new(config)
    }

    /// Validates the configuration and binds every configured transport.
    pub fn new(config: SyslogConfig) -> Result<Self, ReceiverError> {
        config.validate().context(ConfigSnafu)?;
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let server = SyslogServer::bind(&config, queue_tx).context(ServerSnafu)?;
        Ok(Self {
            config,
            server,
            queue_rx: Some(queue_rx),
            sink: Arc::new(ArcSwapOption::empty()),
            drain: None,
            shutdown: CancellationToken::new(),
        })
    }

    /// Installs (or replaces) the downstream producer. Safe to call at any
    /// point in the lifecycle.
    pub fn install_producer(&self, handle: ProducerHandle) {
        self.sink.store(Some(Arc::new(handle)));
    }

    /// Resolved address of a bound socket transport, useful when the
    /// configured port was zero.
    pub fn local_addr(&self, transport: &str) -> Option<std::net::SocketAddr> {
        self.server.local_addr(transport)
    }

    /// Boots the listeners and the drain worker.
    ///
    /// # Panics
    ///
    /// Panics when a listener fails to boot. A receiver that cannot listen
    /// is fatal to the process.
    pub fn start(&mut self) {
        if let Err(error) = self.server.start() {
            panic!("syslog receiver failed to start: {error}");
        }
        if let Some(queue_rx) = self.queue_rx.take() {
            self.drain = Some(tokio::spawn(drain_queue(
                queue_rx,
                self.config.severity_level,
                Arc::clone(&self.sink),
                self.shutdown.clone(),
            )));
        }
    }

    /// Stops the drain worker, then the listeners. Idempotent.
    pub async fn stop(&mut self) {
        self.sink.store(None);
        self.shutdown.cancel();
        if let Some(drain) = self.drain.take() {
            let _ = drain.await;
        }
        self.server.stop().await;
    }
}

async fn drain_queue(
    mut queue: mpsc::UnboundedReceiver<ParsedFrame>,
    severity_level: i8,
    sink: Arc<ArcSwapOption<ProducerHandle>>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = queue.recv() => match frame {
                Some(frame) => forward_frame(frame, severity_level, &sink).await,
                None => break,
            },
        }
    }
}

async fn forward_frame(
    frame: ParsedFrame,
    severity_level: i8,
    sink: &ArcSwapOption<ProducerHandle>,
) {
    let ParsedFrame { mut parts, error } = frame;
    // Unparseable frames bypass the gate; they travel as former-messages.
    if error.is_none() && !admits(severity_level, &parts) {
        return;
    }
    let Some(handle) = sink.load_full() else {
        return;
    };
    let mut msg = pool::get();
    let parse_error = error.as_ref().map(|e| e.reason());
    match msg.record_mut().pack(&mut parts, parse_error) {
        Ok(()) => handle.send_log(msg).await,
        Err(pack_error) => {
            error!(%pack_error, "failed to pack syslog record, dropping it");
            pool::put(msg);
        }
    }
}

/// The severity gate. `-1` drops everything; otherwise part-maps without a
/// severity pass, and the rest pass iff their severity does not exceed the
/// configured level.
fn admits(severity_level: i8, parts: &LogParts) -> bool {
    if severity_level == -1 {
        return false;
    }
    match parts.get(SEVERITY_KEY).and_then(|value| value.as_int()) {
        Some(severity) => severity <= i64::from(severity_level),
        None => true,
    }
}
