//! Open transport sessions for a robot endpoint

use robot_link_shared::{LinkError, RobotEndpoint};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use crate::config::{BluetoothConfig, BluetoothMode, LinkConfig};
use crate::transport::tcp::TcpConnector;
use crate::transport::traits::{BoxedStream, TransportConnector};
use crate::wifi::{NetworkHandle, WifiNetworkBinder};

/// Chunked reader over the inbound half of a stream session
pub type ChunkStream = ReaderStream<ReadHalf<BoxedStream>>;

/// Byte stream session (Bluetooth serial, or its TCP stand-in)
pub struct StreamSession {
    peer: String,
    reader: Option<ReadHalf<BoxedStream>>,
    writer: StreamWriter,
}

impl StreamSession {
    pub async fn open(connector: &dyn TransportConnector) -> Result<Self, LinkError> {
        let stream = connector.connect().await.map_err(classify_connect_error)?;
        let peer = stream.peer();
        info!("[BT] {} session open to {}", connector.name(), peer);

        let (reader, writer) = tokio::io::split(stream);
        Ok(Self {
            peer,
            reader: Some(reader),
            writer: StreamWriter {
                inner: Arc::new(Mutex::new(writer)),
                closed: Arc::new(AtomicBool::new(false)),
            },
        })
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Take the inbound half; only the first call returns it
    pub fn take_reader(&mut self) -> Option<ChunkStream> {
        self.reader.take().map(ReaderStream::new)
    }

    pub fn writer(&self) -> StreamWriter {
        self.writer.clone()
    }
}

/// Cloneable handle to the outbound half of a stream session
#[derive(Clone)]
pub struct StreamWriter {
    inner: Arc<Mutex<WriteHalf<BoxedStream>>>,
    closed: Arc<AtomicBool>,
}

impl StreamWriter {
    /// Write and flush `data` in full
    pub async fn write(&self, data: &[u8]) -> Result<(), LinkError> {
        if self.is_closed() {
            return Err(LinkError::NotConnected);
        }
        let mut writer = self.inner.lock().await;
        writer.write_all(data).await?;
        writer.flush().await?;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Shut the stream down; later calls do nothing
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut writer = self.inner.lock().await;
        if let Err(e) = writer.shutdown().await {
            debug!("[BT] Shutdown error ignored: {}", e);
        }
    }
}

/// WiFi session: a bound network plus the robot's HTTP address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSession {
    pub handle: NetworkHandle,
    /// `ip:port` of the robot's HTTP server
    pub target: String,
}

/// A live link to one robot
pub enum TransportSession {
    Stream(StreamSession),
    Network(NetworkSession),
}

impl TransportSession {
    /// Open a session for `endpoint`.
    ///
    /// For WiFi, `fresh` selects the full network request timeout; reconnects
    /// use the shorter rebind timeout.
    pub async fn open(
        endpoint: &RobotEndpoint,
        config: &LinkConfig,
        binder: &WifiNetworkBinder,
        fresh: bool,
    ) -> Result<Self, LinkError> {
        match endpoint {
            RobotEndpoint::Bluetooth { address, .. } => {
                let connector = connector_for(address, &config.bluetooth)?;
                StreamSession::open(connector.as_ref())
                    .await
                    .map(TransportSession::Stream)
            }
            RobotEndpoint::Wifi {
                ssid,
                passphrase,
                target,
                ..
            } => {
                let handle = if fresh {
                    binder
                        .request_and_bind(ssid, passphrase, config.wifi.request_timeout)
                        .await?
                } else {
                    binder.rebind(ssid, passphrase).await?
                };
                info!("[WiFi] Session ready for {} at {}", ssid, target);
                Ok(TransportSession::Network(NetworkSession {
                    handle,
                    target: target.clone(),
                }))
            }
        }
    }

    /// Inbound chunks, for stream sessions
    pub fn take_reader(&mut self) -> Option<ChunkStream> {
        match self {
            TransportSession::Stream(session) => session.take_reader(),
            TransportSession::Network(_) => None,
        }
    }

    /// Release the link. Closing twice is harmless.
    pub async fn close(&self, binder: &WifiNetworkBinder) {
        match self {
            TransportSession::Stream(session) => session.writer.close().await,
            TransportSession::Network(_) => binder.unbind().await,
        }
    }
}

/// Pick the Bluetooth connector for the configured mode
pub fn connector_for(
    address: &str,
    config: &BluetoothConfig,
) -> Result<Arc<dyn TransportConnector>, LinkError> {
    match config.mode {
        BluetoothMode::TcpSimulation => {
            debug!("[BT] Simulating {} over TCP {}", address, config.tcp_address);
            Ok(Arc::new(TcpConnector::new_simulation(config.tcp_address.clone())))
        }
        #[cfg(feature = "rfcomm")]
        BluetoothMode::Rfcomm => {
            let address = crate::transport::bt_service::parse_address(address)
                .map_err(|e| LinkError::ConnectFailed(format!("{:#}", e)))?;
            Ok(Arc::new(crate::transport::rfcomm::RfcommConnector::new(
                crate::transport::rfcomm::RfcommConfig {
                    address,
                    channel: config.channel,
                    verify_service: config.verify_service,
                },
            )))
        }
        #[cfg(not(feature = "rfcomm"))]
        BluetoothMode::Rfcomm => Err(LinkError::Unsupported(
            "built without RFCOMM support".into(),
        )),
    }
}

/// Map a connector failure onto the link error taxonomy
fn classify_connect_error(err: anyhow::Error) -> LinkError {
    let kind = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<io::Error>())
        .map(io::Error::kind);
    match kind {
        Some(io::ErrorKind::PermissionDenied) => LinkError::PermissionDenied(format!("{:#}", err)),
        Some(io::ErrorKind::TimedOut) => LinkError::Timeout(format!("{:#}", err)),
        _ => LinkError::ConnectFailed(format!("{:#}", err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wifi::testing::FakePlatform;
    use futures::StreamExt;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    fn simulation_config(addr: &str) -> LinkConfig {
        let mut config = LinkConfig::default();
        config.bluetooth.mode = BluetoothMode::TcpSimulation;
        config.bluetooth.tcp_address = addr.to_string();
        config
    }

    fn binder(current: Option<&str>) -> WifiNetworkBinder {
        let platform = Arc::new(FakePlatform::new(current));
        WifiNetworkBinder::new(platform, Duration::from_secs(1), Duration::from_secs(5)).0
    }

    #[tokio::test]
    async fn test_stream_session_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let config = simulation_config(&addr);
        let binder = binder(None);

        let endpoint = RobotEndpoint::bluetooth("00:11:22:33:44:55");
        let (session, accepted) = tokio::join!(
            TransportSession::open(&endpoint, &config, &binder, true),
            listener.accept()
        );
        let mut session = session.expect("open");
        let (mut robot, _) = accepted.unwrap();

        let TransportSession::Stream(stream) = &session else {
            panic!("expected stream session");
        };
        assert_eq!(stream.peer(), addr);
        stream.writer().write(b"a").await.expect("write");

        let mut buf = [0u8; 1];
        robot.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"a");

        let mut chunks = session.take_reader().expect("reader");
        assert!(session.take_reader().is_none());

        tokio::io::AsyncWriteExt::write_all(&mut robot, b"OK\n").await.unwrap();
        let chunk = chunks.next().await.expect("chunk").expect("read");
        assert_eq!(&chunk[..], b"OK\n");
    }

    #[tokio::test]
    async fn test_write_after_close_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let connector = TcpConnector::new_simulation(addr);

        let (session, _accepted) = tokio::join!(StreamSession::open(&connector), listener.accept());
        let session = session.expect("open");
        let writer = session.writer();

        writer.close().await;
        writer.close().await;
        assert!(writer.is_closed());
        assert_eq!(writer.write(b"a").await, Err(LinkError::NotConnected));
    }

    fn assert_shareable<T: Send + Sync>() {}

    #[tokio::test]
    async fn test_session_closes_from_spawned_task() {
        assert_shareable::<TransportSession>();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let config = simulation_config(&addr);
        let binder = Arc::new(binder(None));

        let endpoint = RobotEndpoint::bluetooth("00:11:22:33:44:55");
        let (session, accepted) = tokio::join!(
            TransportSession::open(&endpoint, &config, &binder, true),
            listener.accept()
        );
        let session = Arc::new(session.expect("open"));
        let (mut robot, _) = accepted.unwrap();

        let task = tokio::spawn({
            let session = session.clone();
            let binder = binder.clone();
            async move { session.close(&binder).await }
        });
        task.await.expect("close task");

        let mut buf = [0u8; 4];
        let n = tokio::time::timeout(Duration::from_secs(2), robot.read(&mut buf))
            .await
            .expect("robot sees close")
            .unwrap_or(0);
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_unreachable_device_is_connect_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let config = simulation_config(&addr);
        let endpoint = RobotEndpoint::bluetooth("00:11:22:33:44:55");
        let result = TransportSession::open(&endpoint, &config, &binder(None), true).await;
        assert!(matches!(result, Err(LinkError::ConnectFailed(_))));
    }

    #[tokio::test]
    async fn test_wifi_session_uses_existing_association() {
        let binder = binder(Some("Robot_AP"));
        let endpoint = RobotEndpoint::wifi("Robot_AP", "12345678").with_target("127.0.0.1:8888");

        let mut session = TransportSession::open(&endpoint, &LinkConfig::default(), &binder, true)
            .await
            .expect("open");

        let TransportSession::Network(network) = &session else {
            panic!("expected network session");
        };
        assert_eq!(network.target, "127.0.0.1:8888");
        assert_eq!(network.handle, NetworkHandle::unbound("Robot_AP"));
        assert!(session.take_reader().is_none());

        session.close(&binder).await;
        assert!(binder.current().is_none());
    }

    #[test]
    fn test_classify_connect_error() {
        let denied = anyhow::Error::new(io::Error::new(io::ErrorKind::PermissionDenied, "denied"))
            .context("RFCOMM connect failed");
        assert!(matches!(classify_connect_error(denied), LinkError::PermissionDenied(_)));

        let timed_out = anyhow::Error::new(io::Error::new(io::ErrorKind::TimedOut, "slow"));
        assert!(matches!(classify_connect_error(timed_out), LinkError::Timeout(_)));

        let other = anyhow::anyhow!("device not found");
        assert_eq!(
            classify_connect_error(other),
            LinkError::ConnectFailed("device not found".into())
        );
    }

    #[cfg(not(feature = "rfcomm"))]
    #[test]
    fn test_rfcomm_mode_unsupported_without_feature() {
        let config = BluetoothConfig {
            mode: BluetoothMode::Rfcomm,
            ..BluetoothConfig::default()
        };
        assert!(matches!(
            connector_for("00:11:22:33:44:55", &config),
            Err(LinkError::Unsupported(_))
        ));
    }
}
