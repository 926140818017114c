//! The producer block: hands packed records to the pluggable broker client,
//! diverting them to the writer when the broker cannot take them.
//!
//! The run loop owns the `MessageProducer` and serializes all broker calls.
//! The receiver talks to it through a [`ProducerHandle`], whose capacity-one
//! inbox is the pipeline's single backpressure point. A shared atomic
//! `connected` flag lets the hand-off bypass the inbox entirely while the
//! broker is down.

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use snafu::Snafu;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ConfLoader;
use crate::record::{Message, pool};

/// Identity stamped on records this producer diverts to the writer.
pub const PRODUCER_ORIGIN: &str = "syslogproducer";

/// Opaque connection shared by the hosting process with broker plugins.
pub type ServerConnection = Arc<dyn Any + Send + Sync>;

/// An error reported by a broker plugin.
#[derive(Debug, Snafu)]
#[snafu(display("{reason}"))]
pub struct BrokerError {
    reason: String,
}

impl BrokerError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Pluggable downstream broker client.
#[async_trait]
pub trait MessageProducer: Send + 'static {
    /// Establishes the broker session over the shared connection.
    async fn connect(
        &mut self,
        conf: &ConfLoader,
        conn: ServerConnection,
    ) -> Result<(), BrokerError>;

    /// Releases the broker session. Must be safe to call when no session is
    /// open.
    async fn disconnect(&mut self);

    /// Publishes one pooled message. The packed record is reachable through
    /// [`Message::record`].
    async fn produce(&mut self, msg: &Message) -> Result<(), BrokerError>;
}

/// Ingress handle of the diverted-records writer.
///
/// The writer itself lives outside this crate; diversion is fire-and-forget
/// onto this unbounded inbox and the writer owns the message afterwards.
#[derive(Debug, Clone)]
pub struct WriterHandle {
    tx: mpsc::UnboundedSender<Message>,
}

impl WriterHandle {
    /// Creates the handle together with its receiving half.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, msg: Message) -> Result<(), mpsc::error::SendError<Message>> {
        self.tx.send(msg)
    }
}

/// Diverts records to the writer, guarding against writer replay loops.
#[derive(Clone)]
struct Diverter {
    origin: Arc<str>,
    writer: Option<WriterHandle>,
}

impl Diverter {
    /// Sends a record to the writer, tagged with this producer's origin
    /// marker. A record that already carries the marker came back from the
    /// writer once; it is dropped to the pool instead of bouncing forever.
    fn divert(&self, mut msg: Message) {
        if msg.origin() == Some(self.origin.as_ref()) {
            warn!("record was already diverted once, dropping it");
            pool::put(msg);
            return;
        }
        let Some(writer) = &self.writer else {
            pool::put(msg);
            return;
        };
        msg.set_origin(Arc::clone(&self.origin));
        if let Err(returned) = writer.send(msg) {
            pool::put(returned.0);
        }
    }
}

/// Hand-off side of the producer block, installed into the receiver.
#[derive(Clone)]
pub struct ProducerHandle {
    connected: Arc<AtomicBool>,
    log_tx: mpsc::Sender<Message>,
    diverter: Diverter,
}

impl ProducerHandle {
    /// Hands one packed record to the producer. While the broker is
    /// disconnected the record diverts straight to the writer, keeping the
    /// inbox empty; otherwise the send blocks until the run loop takes it.
    pub async fn send_log(&self, msg: Message) {
        if !self.connected.load(Ordering::Acquire) {
            self.diverter.divert(msg);
            return;
        }
        if let Err(rejected) = self.log_tx.send(msg).await {
            self.diverter.divert(rejected.0);
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

/// Control side of the producer block.
pub struct ProducerControl {
    conn_tx: mpsc::Sender<ServerConnection>,
    dscn_tx: mpsc::Sender<()>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl ProducerControl {
    /// Announces a broker connection to the run loop.
    pub async fn connect(&self, conn: ServerConnection) {
        let _ = self.conn_tx.send(conn).await;
    }

    /// Announces that the broker reported a disconnect.
    pub async fn disconnect(&self) {
        let _ = self.dscn_tx.send(()).await;
    }

    /// Stops the run loop and waits until it has released the broker
    /// connection.
    pub async fn stop(self) {
        self.shutdown.cancel();
        let _ = self.task.await;
    }
}

/// Spawns the producer run loop.
///
/// Returns the hand-off handle for the receiver and the control handle for
/// the hosting process. Without a writer, failed publishes are returned to
/// the pool.
pub fn spawn<P: MessageProducer>(
    producer: P,
    conf: ConfLoader,
    writer: Option<WriterHandle>,
) -> (ProducerHandle, ProducerControl) {
    let connected = Arc::new(AtomicBool::new(false));
    let (log_tx, log_rx) = mpsc::channel(1);
    let (conn_tx, conn_rx) = mpsc::channel(1);
    let (dscn_tx, dscn_rx) = mpsc::channel(1);
    let shutdown = CancellationToken::new();
    let diverter = Diverter {
        origin: Arc::from(PRODUCER_ORIGIN),
        writer,
    };

    let task = tokio::spawn(run_loop(
        producer,
        conf,
        Arc::clone(&connected),
        log_rx,
        conn_rx,
        dscn_rx,
        diverter.clone(),
        shutdown.clone(),
    ));

    (
        ProducerHandle {
            connected,
            log_tx,
            diverter,
        },
        ProducerControl {
            conn_tx,
            dscn_tx,
            shutdown,
            task,
        },
    )
}

#[allow(clippy::too_many_arguments)]
async fn run_loop<P: MessageProducer>(
    mut producer: P,
    conf: ConfLoader,
    connected: Arc<AtomicBool>,
    mut log_rx: mpsc::Receiver<Message>,
    mut conn_rx: mpsc::Receiver<ServerConnection>,
    mut dscn_rx: mpsc::Receiver<()>,
    diverter: Diverter,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            Some(conn) = conn_rx.recv() => {
                let ok = match producer.connect(&conf, conn).await {
                    Ok(()) => true,
                    Err(error) => {
                        warn!(%error, "broker connect failed");
                        false
                    }
                };
                connected.store(ok, Ordering::Release);
                if ok {
                    debug!("broker connected");
                }
            }
            Some(()) = dscn_rx.recv() => {
                if connected.load(Ordering::Acquire) {
                    producer.disconnect().await;
                    connected.store(false, Ordering::Release);
                    debug!("broker disconnected");
                }
            }
            Some(msg) = log_rx.recv() => {
                process_log(&mut producer, msg, &diverter).await;
            }
            else => break,
        }
    }
    connected.store(false, Ordering::Release);
    producer.disconnect().await;
}

async fn process_log<P: MessageProducer>(producer: &mut P, mut msg: Message, diverter: &Diverter) {
    match producer.produce(&msg).await {
        Ok(()) => {
            msg.clear_origin();
            pool::put(msg);
        }
        Err(error) => {
            warn!(%error, "publish failed, diverting record to writer");
            diverter.divert(msg);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::schema::FORMER_MESSAGE_KEY;
    use crate::record::{LogParts, PartValue};

    /// Broker stub: publishes into a channel, or fails every publish.
    struct TestProducer {
        published: mpsc::UnboundedSender<String>,
        fail: bool,
    }

    #[async_trait]
    impl MessageProducer for TestProducer {
        async fn connect(
            &mut self,
            _conf: &ConfLoader,
            _conn: ServerConnection,
        ) -> Result<(), BrokerError> {
            Ok(())
        }

        async fn disconnect(&mut self) {}

        async fn produce(&mut self, msg: &Message) -> Result<(), BrokerError> {
            if self.fail {
                return Err(BrokerError::new("broker unavailable"));
            }
            let map = msg.record().clone().unpack_to_map().map_err(|error| {
                BrokerError::new(error.to_string())
            })?;
            let _ = self.published.send(map[FORMER_MESSAGE_KEY].clone());
            Ok(())
        }
    }

    fn packed_message(text: &str) -> Message {
        let mut msg = pool::get();
        let mut parts = LogParts::from([(FORMER_MESSAGE_KEY, PartValue::Text(text.into()))]);
        msg.record_mut()
            .pack(&mut parts, Some("bad frame"))
            .expect("pack succeeds");
        msg
    }

    fn loader() -> ConfLoader {
        ConfLoader::new("/tmp")
    }

    #[tokio::test]
    async fn connect_then_publish() {
        let (published_tx, mut published_rx) = mpsc::unbounded_channel();
        let (handle, control) = spawn(
            TestProducer {
                published: published_tx,
                fail: false,
            },
            loader(),
            None,
        );

        control.connect(Arc::new(())).await;
        // The connect inbox drains asynchronously; wait for the flag.
        while !handle.is_connected() {
            tokio::task::yield_now().await;
        }

        handle.send_log(packed_message("hello")).await;
        let seen = published_rx.recv().await.expect("one publish");
        assert_eq!(seen, "hello");

        control.stop().await;
    }

    #[tokio::test]
    async fn failed_publishes_divert_with_origin_marker() {
        let (published_tx, _published_rx) = mpsc::unbounded_channel();
        let (writer, mut diverted_rx) = WriterHandle::channel();
        let (handle, control) = spawn(
            TestProducer {
                published: published_tx,
                fail: true,
            },
            loader(),
            Some(writer),
        );

        control.connect(Arc::new(())).await;
        while !handle.is_connected() {
            tokio::task::yield_now().await;
        }

        let count = 5;
        for index in 0..count {
            handle.send_log(packed_message(&format!("msg-{index}"))).await;
        }
        for _ in 0..count {
            let diverted = diverted_rx.recv().await.expect("diverted record");
            assert_eq!(diverted.origin(), Some(PRODUCER_ORIGIN));
        }

        control.stop().await;
    }

    #[tokio::test]
    async fn disconnected_handoff_diverts_without_enqueuing() {
        let (published_tx, _published_rx) = mpsc::unbounded_channel();
        let (writer, mut diverted_rx) = WriterHandle::channel();
        let (handle, control) = spawn(
            TestProducer {
                published: published_tx,
                fail: false,
            },
            loader(),
            Some(writer),
        );

        assert!(!handle.is_connected());
        handle.send_log(packed_message("while down")).await;
        let diverted = diverted_rx.recv().await.expect("diverted record");
        assert_eq!(diverted.origin(), Some(PRODUCER_ORIGIN));

        control.stop().await;
    }

    #[tokio::test]
    async fn replayed_records_are_not_rediverted() {
        let (published_tx, _published_rx) = mpsc::unbounded_channel();
        let (writer, mut diverted_rx) = WriterHandle::channel();
        let (handle, control) = spawn(
            TestProducer {
                published: published_tx,
                fail: true,
            },
            loader(),
            Some(writer),
        );

        control.connect(Arc::new(())).await;
        while !handle.is_connected() {
            tokio::task::yield_now().await;
        }

        handle.send_log(packed_message("bounce")).await;
        let replayed = diverted_rx.recv().await.expect("diverted record");
        assert_eq!(replayed.origin(), Some(PRODUCER_ORIGIN));

        // The writer replays it; the broker still fails, but the origin
        // marker stops a second diversion. The capacity-one inbox keeps
        // ordering, so the next diverted record must be the fresh one.
        handle.send_log(replayed).await;
        handle.send_log(packed_message("fresh")).await;
        let mut next = diverted_rx.recv().await.expect("diverted record");
        let map = next.record_mut().unpack_to_map().expect("unpack succeeds");
        assert_eq!(map[FORMER_MESSAGE_KEY], "fresh");

        control.stop().await;
    }

    #[tokio::test]
    async fn successful_publish_clears_origin_marker() {
        let (published_tx, mut published_rx) = mpsc::unbounded_channel();
        let (handle, control) = spawn(
            TestProducer {
                published: published_tx,
                fail: false,
            },
            loader(),
            None,
        );

        control.connect(Arc::new(())).await;
        while !handle.is_connected() {
            tokio::task::yield_now().await;
        }

        let mut msg = packed_message("replayed fine");
        msg.set_origin(Arc::from(PRODUCER_ORIGIN));
        handle.send_log(msg).await;
        assert_eq!(
            published_rx.recv().await.expect("one publish"),
            "replayed fine"
        );

        control.stop().await;
    }
}
