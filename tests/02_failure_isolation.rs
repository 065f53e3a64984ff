mod support;

use std::time::Duration;

use fastway::wire::{Frame, FrameType};
use support::{open_pair, start_gateway, test_config, wait_until};

#[tokio::test]
async fn open_beyond_the_cap_is_rejected() {
    let mut config = test_config();
    config.client.max_virtual_conns = 2;

    let gw = start_gateway(config).await;
    let mut server = gw.server(1).await;
    let mut client = gw.client().await;

    let sid = open_pair(&mut client, &mut server, 1).await;
    open_pair(&mut client, &mut server, 2).await;

    client.send(Frame::open(3)).await;
    assert_eq!(client.recv().await, Frame::close(3));
    assert!(server.try_recv(Duration::from_millis(100)).await.is_none());

    // the first two keep working
    client.send(Frame::data(1, "still-here")).await;
    assert_eq!(server.recv().await, Frame::data(sid, "still-here"));
}

#[tokio::test]
async fn server_crash_closes_each_client_half_exactly_once() {
    const CLIENTS: usize = 5;

    let gw = start_gateway(test_config()).await;
    let mut server = gw.server(1).await;
    let server_conn = gw.gateway.selectable_servers()[0].conn_id();

    let mut clients = Vec::new();
    for _ in 0..CLIENTS {
        let mut client = gw.client().await;
        open_pair(&mut client, &mut server, 1).await;
        clients.push(client);
    }
    assert_eq!(gw.gateway.table().len(), CLIENTS);

    drop(server);

    for client in &mut clients {
        assert_eq!(client.recv().await, Frame::close(1));
    }
    for client in &mut clients {
        assert!(client.try_recv(Duration::from_millis(100)).await.is_none());
    }

    let gateway = gw.gateway.clone();
    wait_until(move || gateway.table().is_empty()).await;
    assert_eq!(gw.gateway.table().references(server_conn), 0);
    assert!(gw.gateway.selectable_servers().is_empty());
}

#[tokio::test]
async fn client_disconnect_closes_its_server_halves() {
    let gw = start_gateway(test_config()).await;
    let mut server = gw.server(1).await;
    let mut client = gw.client().await;

    let a = open_pair(&mut client, &mut server, 1).await;
    let b = open_pair(&mut client, &mut server, 2).await;
    drop(client);

    let mut closed = vec![server.recv().await, server.recv().await];
    closed.sort_by_key(|frame| frame.virtual_id);

    let mut expected = vec![Frame::close(a), Frame::close(b)];
    expected.sort_by_key(|frame| frame.virtual_id);
    assert_eq!(closed, expected);

    // the server session itself is unaffected
    server.send(Frame::ping()).await;
    assert_eq!(server.recv().await, Frame::pong());
}

#[tokio::test]
async fn silent_client_is_dropped_by_heartbeat() {
    let mut config = test_config();
    config.client.ping_interval = Duration::from_millis(100);
    config.heartbeat_missed_threshold = 3;

    let gw = start_gateway(config).await;
    let mut server = gw.server(1).await;
    let mut client = gw.client().await;

    let sid = open_pair(&mut client, &mut server, 1).await;

    // never answer the pings
    let (pings, last) = client.recv_until_eof().await;
    assert!(pings >= 1, "expected at least one PING before the hang-up");
    assert!(last.is_none(), "unexpected frame {last:?}");

    assert_eq!(server.recv().await, Frame::close(sid));

    let gateway = gw.gateway.clone();
    wait_until(move || gateway.stats().heartbeat_timeouts == 1).await;
}

#[tokio::test]
async fn answered_pings_keep_the_client_alive() {
    let mut config = test_config();
    config.client.ping_interval = Duration::from_millis(100);

    let gw = start_gateway(config).await;
    let mut client = gw.client().await;

    for _ in 0..6 {
        let frame = client.recv().await;
        assert_eq!(frame.kind, FrameType::Ping);
        client.send(Frame::pong()).await;
    }

    assert_eq!(gw.gateway.stats().live_clients, 1);
}

#[tokio::test]
async fn stop_disconnects_everyone() {
    let gw = start_gateway(test_config()).await;
    let mut server = gw.server(1).await;
    let mut client = gw.client().await;
    open_pair(&mut client, &mut server, 1).await;

    gw.gateway.stop();

    client.expect_eof().await;
    server.expect_eof().await;

    let gateway = gw.gateway.clone();
    wait_until(move || gateway.registry().all().is_empty()).await;
    assert!(gw.gateway.table().is_empty());
}
