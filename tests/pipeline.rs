//! End-to-end pipeline tests: syslog frames over real sockets, through the
//! receiver and producer, into a channel-backed broker stub.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;

use syslog_sidecar::record::schema::{
    CONTENT_KEY, FORMER_MESSAGE_KEY, HOSTNAME_KEY, MESSAGE_KEY, PRIORITY_KEY, RFC_KEY,
    SEVERITY_KEY,
};
use syslog_sidecar::{
    BrokerError, ConfLoader, Message, MessageProducer, ProducerControl, ProducerHandle,
    ServerConnection, SyslogConfig, SyslogReceiver, producer,
};

type UnpackedRecord = HashMap<&'static str, String>;

/// Broker stub that unpacks every published record into a channel.
struct ChannelProducer {
    published: mpsc::UnboundedSender<UnpackedRecord>,
}

#[async_trait]
impl MessageProducer for ChannelProducer {
    async fn connect(
        &mut self,
        _conf: &ConfLoader,
        _conn: ServerConnection,
    ) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn disconnect(&mut self) {}

    async fn produce(&mut self, msg: &Message) -> Result<(), BrokerError> {
        let map = msg
            .record()
            .clone()
            .unpack_to_map()
            .map_err(|error| BrokerError::new(error.to_string()))?;
        self.published
            .send(map)
            .map_err(|_| BrokerError::new("consumer is gone"))
    }
}

async fn start_pipeline(
    config: SyslogConfig,
) -> (
    SyslogReceiver,
    ProducerControl,
    ProducerHandle,
    mpsc::UnboundedReceiver<UnpackedRecord>,
) {
    let mut receiver = SyslogReceiver::new(config).expect("receiver init");
    let (published_tx, published_rx) = mpsc::unbounded_channel();
    let (handle, control) = producer::spawn(
        ChannelProducer {
            published: published_tx,
        },
        ConfLoader::new("/tmp"),
        None,
    );
    receiver.install_producer(handle.clone());
    receiver.start();

    control.connect(Arc::new(())).await;
    while !handle.is_connected() {
        tokio::task::yield_now().await;
    }
    (receiver, control, handle, published_rx)
}

async fn next_record(rx: &mut mpsc::UnboundedReceiver<UnpackedRecord>) -> UnpackedRecord {
    timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("record arrives in time")
        .expect("pipeline is still running")
}

#[tokio::test]
async fn tcp_frames_reach_the_broker() {
    let config = SyslogConfig {
        addr_tcp: "127.0.0.1:0".into(),
        ..Default::default()
    };
    let (mut receiver, control, _handle, mut published) = start_pipeline(config).await;
    let addr = receiver.local_addr("tcp").expect("tcp is bound");

    let mut stream = TcpStream::connect(addr).await.expect("connect");
    stream
        .write_all(
            b"<165>1 2023-10-11T22:14:15Z mymachine evntslog 1024 ID47 - An application event\n\
              <34>Oct 11 22:14:15 mymachine su: 'su root' failed\n\
              complete garbage, not syslog\n",
        )
        .await
        .expect("write frames");
    stream.flush().await.expect("flush");

    let rfc5424 = next_record(&mut published).await;
    assert_eq!(rfc5424[RFC_KEY], "RFC5424");
    assert_eq!(rfc5424[PRIORITY_KEY], "165");
    assert_eq!(rfc5424[HOSTNAME_KEY], "mymachine");
    assert_eq!(rfc5424[MESSAGE_KEY], "An application event");

    let rfc3164 = next_record(&mut published).await;
    assert_eq!(rfc3164[RFC_KEY], "RFC3164");
    assert_eq!(rfc3164[PRIORITY_KEY], "34");
    assert!(rfc3164[CONTENT_KEY].contains("failed"));

    let former = next_record(&mut published).await;
    assert_eq!(former.len(), 1);
    assert_eq!(former[FORMER_MESSAGE_KEY], "complete garbage, not syslog");

    receiver.stop().await;
    control.stop().await;
}

#[tokio::test]
async fn severity_gate_filters_on_the_wire() {
    let config = SyslogConfig {
        severity_level: 5,
        addr_tcp: "127.0.0.1:0".into(),
        ..Default::default()
    };
    let (mut receiver, control, _handle, mut published) = start_pipeline(config).await;
    let addr = receiver.local_addr("tcp").expect("tcp is bound");

    let mut stream = TcpStream::connect(addr).await.expect("connect");
    // debug (severity 7) is above level 5 and must be dropped; the following
    // notice (severity 5) passes. One connection keeps the order.
    stream
        .write_all(
            b"<167>1 2023-10-11T22:14:15Z host app - - - dropped debug\n\
              <165>1 2023-10-11T22:14:15Z host app - - - kept notice\n",
        )
        .await
        .expect("write frames");
    stream.flush().await.expect("flush");

    let record = next_record(&mut published).await;
    assert_eq!(record[SEVERITY_KEY], "5");
    assert_eq!(record[MESSAGE_KEY], "kept notice");

    receiver.stop().await;
    control.stop().await;
}

#[cfg(unix)]
#[tokio::test]
async fn unix_datagrams_reach_the_broker() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("syslog.sock");
    let config = SyslogConfig {
        uds_path: path.display().to_string(),
        ..Default::default()
    };
    let (mut receiver, control, _handle, mut published) = start_pipeline(config).await;

    let client = std::os::unix::net::UnixDatagram::unbound().expect("client socket");
    client
        .send_to(
            b"<30>Oct 11 22:14:15 gateway dhclient: lease renewed",
            &path,
        )
        .expect("send datagram");

    let record = next_record(&mut published).await;
    assert_eq!(record[RFC_KEY], "RFC3164");
    assert_eq!(record[PRIORITY_KEY], "30");

    receiver.stop().await;
    control.stop().await;
}

#[tokio::test]
async fn udp_datagrams_reach_the_broker() {
    let config = SyslogConfig {
        addr_udp: "127.0.0.1:0".into(),
        ..Default::default()
    };
    let (mut receiver, control, _handle, mut published) = start_pipeline(config).await;
    let addr = receiver.local_addr("udp").expect("udp is bound");

    let client = std::net::UdpSocket::bind("127.0.0.1:0").expect("client socket");
    client
        .send_to(
            b"<165>1 2023-10-11T22:14:15Z host app - - - over udp",
            addr,
        )
        .expect("send datagram");

    let record = next_record(&mut published).await;
    assert_eq!(record[MESSAGE_KEY], "over udp");

    receiver.stop().await;
    control.stop().await;
}
