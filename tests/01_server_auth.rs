mod support;

use std::time::Duration;

use fastway::wire::auth::AuthResponse;
use fastway::wire::{Frame, FrameType};
use support::{TestPeer, connect_server, start_gateway, test_config, wait_until};

#[tokio::test]
async fn authenticated_server_becomes_selectable() {
    let gw = start_gateway(test_config()).await;
    let _server = gw.server(42).await;

    let servers = gw.gateway.selectable_servers();
    assert_eq!(servers.len(), 1);
    assert_eq!(servers[0].server_id(), 42);
    assert_eq!(gw.gateway.stats().servers_accepted, 1);
}

#[tokio::test]
async fn wrong_key_is_disconnected() {
    let gw = start_gateway(test_config()).await;
    let mut server = connect_server(gw.server_addr, 1, b"not-the-key").await;

    server.expect_eof().await;
    assert!(gw.gateway.selectable_servers().is_empty());

    let gateway = gw.gateway.clone();
    wait_until(move || gateway.stats().auth_failures == 1).await;
}

#[tokio::test]
async fn silent_server_times_out() {
    let gw = start_gateway(test_config()).await;
    let mut server = TestPeer::connect(gw.server_addr).await;

    let challenge = server.recv().await;
    assert_eq!(challenge.kind, FrameType::AuthChallenge);
    assert_eq!(challenge.payload.len(), 16);

    server.expect_eof().await;
    assert!(gw.gateway.selectable_servers().is_empty());
}

#[tokio::test]
async fn non_auth_first_frame_is_rejected() {
    let gw = start_gateway(test_config()).await;
    let mut server = TestPeer::connect(gw.server_addr).await;
    let _challenge = server.recv().await;

    server.send(Frame::ping()).await;
    server.expect_eof().await;
    assert!(gw.gateway.selectable_servers().is_empty());
}

#[tokio::test]
async fn failed_servers_never_receive_opens() {
    let gw = start_gateway(test_config()).await;
    let mut bad = TestPeer::connect(gw.server_addr).await;
    let challenge = bad.recv().await;
    let response = AuthResponse::respond(&challenge.payload, 5, b"wrong");
    bad.send(Frame::new(FrameType::AuthResponse, 0, response.encode().to_vec()))
        .await;
    bad.expect_eof().await;

    let mut client = gw.client().await;
    client.send(Frame::open(1)).await;
    assert_eq!(client.recv().await, Frame::close(1));

    let mut good = gw.server(6).await;
    client.send(Frame::open(2)).await;
    let open = good.recv().await;
    assert_eq!(open.kind, FrameType::Open);
    assert!(good.try_recv(Duration::from_millis(100)).await.is_none());
}
