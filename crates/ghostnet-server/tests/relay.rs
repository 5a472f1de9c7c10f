//! End-to-end tests over real TCP and UDP sockets.

use std::net::SocketAddr;
use std::time::Duration;

use ghostnet_config::Config;
use ghostnet_net::{Channel, GhostClient, LocalClient};
use ghostnet_proto::{
    AreaMode, Chat, Frame, FrameConfig, PlayerStatus, Session, SessionState, Update, Vec2,
};
use ghostnet_server::GhostServer;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const WAIT: Duration = Duration::from_secs(3);

async fn start_server() -> (GhostServer, SocketAddr) {
    let mut config = Config::default();
    config.server.bind_address = "127.0.0.1".parse().unwrap();
    config.server.port = 0;
    config.server.session_query_timeout_ms = 1000;
    let mut server = GhostServer::new(config);
    let addr = server.start().await.unwrap();
    (server, addr)
}

async fn connect(addr: SocketAddr) -> GhostClient {
    GhostClient::connect(addr, FrameConfig::default())
        .await
        .unwrap()
}

fn status(name: &str, sid: &str, level: &str) -> Frame {
    Frame::default().with_player(PlayerStatus {
        name: name.to_string(),
        sid: sid.to_string(),
        mode: AreaMode::Normal,
        level: level.to_string(),
    })
}

fn update(index: u32, x: f32) -> Frame {
    Frame::default().with_update(Update::at(index, Vec2::new(x, 0.0)))
}

/// Waits for the first frame matching `predicate`, skipping the rest.
async fn expect(client: &mut GhostClient, predicate: impl Fn(&Frame) -> bool) -> (Channel, Frame) {
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let left = deadline.saturating_duration_since(tokio::time::Instant::now());
        match client.recv_timeout(left).await {
            Some((channel, frame)) if predicate(&frame) => return (channel, frame),
            Some(_) => {}
            None => panic!("no matching frame within {WAIT:?}"),
        }
    }
}

async fn expect_local(client: &mut LocalClient, predicate: impl Fn(&Frame) -> bool) -> Frame {
    tokio::time::timeout(WAIT, async {
        loop {
            match client.recv().await {
                Some((_, frame)) if predicate(&frame) => return frame,
                Some(_) => {}
                None => panic!("local client closed"),
            }
        }
    })
    .await
    .expect("no matching frame in time")
}

/// Sends a status and waits until the server has echoed it back.
async fn join_room(client: &mut GhostClient, name: &str, sid: &str, level: &str) {
    client.send_management(&status(name, sid, level)).unwrap();
    let id = client.player_id();
    expect(client, |f| f.player_id() == Some(id) && f.player.is_some()).await;
}

fn is_update_from(frame: &Frame, id: u32, index: u32) -> bool {
    frame.player_id() == Some(id)
        && frame
            .update
            .as_ref()
            .is_some_and(|update| update.update_index == index)
}

#[tokio::test]
async fn test_remote_clients_get_sequential_ids() {
    let (mut server, addr) = start_server().await;

    let a = connect(addr).await;
    let b = connect(addr).await;
    assert_eq!(a.player_id(), 0);
    assert_eq!(b.player_id(), 1);

    server.stop().await;
}

#[tokio::test]
async fn test_updates_relayed_between_remote_clients() {
    let (mut server, addr) = start_server().await;
    let mut a = connect(addr).await;
    let mut b = connect(addr).await;

    join_room(&mut a, "A", "Celeste/1", "a-00").await;
    join_room(&mut b, "B", "Celeste/1", "a-00").await;

    // Binds B's update path so it receives over UDP.
    b.send_update(&update(0, 0.0)).unwrap();
    expect(&mut a, |f| is_update_from(f, 1, 0)).await;

    a.send_update(&update(1, 10.0)).unwrap();
    let (_, frame) = expect(&mut b, |f| is_update_from(f, 0, 1)).await;
    assert_eq!(frame.update.unwrap().position, Vec2::new(10.0, 0.0));

    server.stop().await;
}

#[tokio::test]
async fn test_chat_and_command_reply() {
    let (mut server, addr) = start_server().await;
    let mut a = connect(addr).await;
    let mut b = connect(addr).await;
    join_room(&mut a, "A", "Celeste/1", "a-00").await;

    a.send_management(&Frame::default().with_chat(Chat::text("hello"))).unwrap();
    let (_, frame) = expect(&mut b, |f| f.chat.is_some()).await;
    let chat = frame.chat.unwrap();
    assert_eq!(chat.text, "hello");
    assert_eq!(chat.tag, "A");
    assert_eq!(frame.head.unwrap().player_id, 0);

    b.send_management(&Frame::default().with_chat(Chat::text("/broadcast hi"))).unwrap();
    let (_, frame) = expect(&mut b, |f| f.chat.is_some()).await;
    assert_eq!(frame.chat.unwrap().text, "You're not OP!");

    server.stop().await;
}

#[tokio::test]
async fn test_disconnect_announced_to_others() {
    let (mut server, addr) = start_server().await;
    let mut a = connect(addr).await;
    let mut b = connect(addr).await;
    join_room(&mut b, "B", "Celeste/1", "a-00").await;

    b.disconnect();
    let (channel, _) = expect(&mut a, |f| {
        f.player_id() == Some(1) && f.player.as_ref().is_some_and(PlayerStatus::is_departure)
    })
    .await;
    assert_eq!(channel, Channel::Management);

    server.stop().await;
}

#[tokio::test]
async fn test_oversized_frame_closes_connection() {
    let (mut server, addr) = start_server().await;
    let mut a = connect(addr).await;

    let mut raw = TcpStream::connect(addr).await.unwrap();
    raw.write_u32_le(10_000_000).await.unwrap();

    let mut buf = Vec::new();
    let read = tokio::time::timeout(WAIT, raw.read_to_end(&mut buf)).await;
    assert!(read.is_ok(), "server kept the connection open");

    expect(&mut a, |f| {
        f.player_id() == Some(1) && f.player.as_ref().is_some_and(PlayerStatus::is_departure)
    })
    .await;

    server.stop().await;
}

#[tokio::test]
async fn test_local_and_remote_clients_share_rooms() {
    let (mut server, addr) = start_server().await;
    let mut local = server.connect_local().unwrap();
    let handshake = expect_local(&mut local, |f| f.server_info.is_some()).await;
    assert_eq!(handshake.player_id(), Some(0));

    let mut remote = connect(addr).await;
    assert_eq!(remote.player_id(), 1);

    local
        .send_management(&status("Host", "Celeste/1", "a-00"))
        .unwrap();
    expect_local(&mut local, |f| f.player_id() == Some(0) && f.player.is_some()).await;
    join_room(&mut remote, "Guest", "Celeste/1", "a-00").await;

    remote.send_update(&update(4, 1.0)).unwrap();
    let frame = expect_local(&mut local, |f| is_update_from(f, 1, 4)).await;
    assert_eq!(frame.update.unwrap().position, Vec2::new(1.0, 0.0));

    local.send_update(&update(2, 5.0)).unwrap();
    expect(&mut remote, |f| is_update_from(f, 0, 2)).await;

    server.stop().await;
}

#[tokio::test]
async fn test_tp_into_other_area_carries_session() {
    let (mut server, addr) = start_server().await;
    let mut a = connect(addr).await;
    let mut b = connect(addr).await;

    join_room(&mut a, "A", "Celeste/1", "a-00").await;
    join_room(&mut b, "B", "Celeste/2", "b-03").await;
    b.send_update(&update(9, 64.0)).unwrap();
    // B's update is not visible to A (other room); give it time to land.
    tokio::time::sleep(Duration::from_millis(100)).await;

    a.send_management(&Frame::default().with_chat(Chat::text("/tp 1"))).unwrap();

    let (_, request) = expect(&mut b, |f| f.request.is_some()).await;
    assert!(request.request.unwrap().wants::<Session>());
    b.send_management(&Frame::default().with_session(Session {
        state: Some(SessionState {
            deaths: 12,
            furthest_seen_level: "b-03".to_string(),
            ..Default::default()
        }),
    }))
    .unwrap();

    let (_, teleport) = expect(&mut a, |f| f.session.is_some()).await;
    let player = teleport.player.unwrap();
    assert_eq!(player.name, "A");
    assert_eq!(player.sid, "Celeste/2");
    assert_eq!(player.level, "b-03");
    assert_eq!(teleport.session.unwrap().state.unwrap().deaths, 12);
    assert_eq!(teleport.update.unwrap().position, Vec2::new(64.0, 0.0));

    let (_, done) = expect(&mut a, |f| f.chat.is_some()).await;
    assert_eq!(done.chat.unwrap().text, "Teleported to B#1");

    server.stop().await;
}
