use std::{net::SocketAddr, time::Duration};

use bytes::BytesMut;
use fastway::wire::auth::AuthResponse;
use fastway::wire::{Frame, FrameCodec, FrameType, HEADER_SIZE};
use fastway::{Gateway, GatewayConfig};
use secrecy::SecretString;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout};

pub const AUTH_KEY: &str = "test-auth-key";
pub const RECV_TIMEOUT: Duration = Duration::from_secs(3);

// Short timeouts, heartbeats off unless a test turns them on.
pub fn test_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.server.auth_key = SecretString::new(AUTH_KEY.to_string().into_boxed_str());
    config.server.auth_timeout = Duration::from_millis(300);
    config.server.ping_interval = Duration::ZERO;
    config.client.ping_interval = Duration::ZERO;
    config
}

// -----------------------------------------------------------------------------
// ----- TestGateway -----------------------------------------------------------

pub struct TestGateway {
    pub gateway: Gateway,
    pub client_addr: SocketAddr,
    pub server_addr: SocketAddr,
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.gateway.stop();
    }
}

pub async fn start_gateway(config: GatewayConfig) -> TestGateway {
    let gateway = Gateway::new(config).expect("valid test config");

    let clients = TcpListener::bind("127.0.0.1:0").await.expect("bind clients");
    let servers = TcpListener::bind("127.0.0.1:0").await.expect("bind servers");
    let client_addr = clients.local_addr().unwrap();
    let server_addr = servers.local_addr().unwrap();

    tokio::spawn({
        let gateway = gateway.clone();
        async move { gateway.serve_clients(clients).await }
    });
    tokio::spawn({
        let gateway = gateway.clone();
        async move { gateway.serve_servers(servers).await }
    });

    TestGateway {
        gateway,
        client_addr,
        server_addr,
    }
}

impl TestGateway {
    pub async fn client(&self) -> TestPeer {
        TestPeer::connect(self.client_addr).await
    }

    /// Connect and authenticate a server, then wait until it is routable.
    pub async fn server(&self, server_id: u32) -> TestPeer {
        let before = self.gateway.selectable_servers().len();
        let peer = connect_server(self.server_addr, server_id, AUTH_KEY.as_bytes()).await;

        let gateway = self.gateway.clone();
        wait_until(move || gateway.selectable_servers().len() > before).await;
        peer
    }
}

// -----------------------------------------------------------------------------
// ----- TestPeer --------------------------------------------------------------

/// A scripted client or server speaking raw frames.
pub struct TestPeer {
    stream: TcpStream,
    codec: FrameCodec,
}

impl TestPeer {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect to gateway");
        stream.set_nodelay(true).unwrap();

        Self {
            stream,
            codec: FrameCodec::default(),
        }
    }

    pub async fn send(&mut self, frame: Frame) {
        let bytes = self.codec.encode(&frame).unwrap();
        self.stream.write_all(&bytes).await.expect("send frame");
    }

    pub async fn recv(&mut self) -> Frame {
        match timeout(RECV_TIMEOUT, self.read_frame()).await {
            Ok(Some(frame)) => frame,
            Ok(None) => panic!("connection closed while waiting for a frame"),
            Err(_) => panic!("no frame within {RECV_TIMEOUT:?}"),
        }
    }

    /// Next frame if one arrives within `wait`.
    pub async fn try_recv(&mut self, wait: Duration) -> Option<Frame> {
        timeout(wait, self.read_frame()).await.ok().flatten()
    }

    /// Skip heartbeat frames until something else arrives or the gateway
    /// hangs up. Returns the pings seen and the closing frame, if any.
    pub async fn recv_until_eof(&mut self) -> (usize, Option<Frame>) {
        let mut pings = 0;
        loop {
            match timeout(RECV_TIMEOUT, self.read_frame()).await {
                Ok(Some(frame)) if frame.kind == FrameType::Ping => pings += 1,
                Ok(Some(frame)) => return (pings, Some(frame)),
                Ok(None) => return (pings, None),
                Err(_) => panic!("gateway did not hang up within {RECV_TIMEOUT:?}"),
            }
        }
    }

    pub async fn expect_eof(&mut self) {
        match timeout(RECV_TIMEOUT, self.read_frame()).await {
            Ok(None) => {}
            Ok(Some(frame)) => panic!("expected EOF, got {frame:?}"),
            Err(_) => panic!("gateway did not hang up within {RECV_TIMEOUT:?}"),
        }
    }

    // None on EOF or a reset.
    async fn read_frame(&mut self) -> Option<Frame> {
        let mut prefix = [0u8; 4];
        self.stream.read_exact(&mut prefix).await.ok()?;

        let total = u32::from_be_bytes(prefix) as usize;
        assert!(total >= HEADER_SIZE, "gateway sent a short frame");

        let mut buf = BytesMut::zeroed(total);
        buf[..4].copy_from_slice(&prefix);
        self.stream.read_exact(&mut buf[4..]).await.ok()?;

        Some(self.codec.decode(&buf).expect("gateway sent a valid frame"))
    }
}

// -----------------------------------------------------------------------------
// ----- Helpers ---------------------------------------------------------------

pub async fn connect_server(addr: SocketAddr, server_id: u32, key: &[u8]) -> TestPeer {
    let mut peer = TestPeer::connect(addr).await;

    let challenge = peer.recv().await;
    assert_eq!(challenge.kind, FrameType::AuthChallenge);

    let response = AuthResponse::respond(&challenge.payload, server_id, key);
    peer.send(Frame::new(
        FrameType::AuthResponse,
        0,
        response.encode().to_vec(),
    ))
    .await;

    peer
}

/// Open virtual id `id` from `client` and complete the handshake on
/// `server`. Returns the server-side id.
#[allow(dead_code)]
pub async fn open_pair(client: &mut TestPeer, server: &mut TestPeer, id: u32) -> u32 {
    client.send(Frame::open(id)).await;

    let open = server.recv().await;
    assert_eq!(open.kind, FrameType::Open);
    server.send(Frame::opened(open.virtual_id)).await;

    assert_eq!(client.recv().await, Frame::opened(id));
    open.virtual_id
}

pub async fn wait_until(cond: impl Fn() -> bool) {
    for _ in 0..150 {
        if cond() {
            return;
        }
        sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not met within 3s");
}
