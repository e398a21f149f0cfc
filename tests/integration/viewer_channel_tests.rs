//! Integration tests for the `/ws/browser` frame channel.

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use pilot_deck::models::action::ViewerInput;
use pilot_deck::models::event::ServerEvent;

use super::test_helpers::{harness, request, serve, test_config, WAIT};

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

async fn next_event(socket: &mut Socket) -> ServerEvent {
    loop {
        let message = tokio::time::timeout(WAIT, socket.next())
            .await
            .expect("message before timeout")
            .expect("socket open")
            .expect("valid frame");
        if let Message::Text(text) = message {
            return serde_json::from_str(text.as_str()).expect("event json");
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn viewer_receives_frames_and_drives_input() {
    let h = harness(test_config());
    let server = serve(&h, None).await;

    h.manager.create_session(request("s-view")).expect("created");
    let mut resources = h.manager.resource_watch("s-view").expect("registered");
    tokio::time::timeout(WAIT, resources.wait_for(Option::is_some))
        .await
        .expect("published")
        .expect("watch open");

    let (mut socket, _) = connect_async(server.ws("/ws/browser?session_id=s-view"))
        .await
        .expect("connect");

    loop {
        if let ServerEvent::Frame { data, url, sequence, .. } = next_event(&mut socket).await {
            assert!(!data.is_empty());
            assert_eq!(url, "https://example.com/live");
            assert!(sequence >= 1);
            break;
        }
    }

    socket
        .send(Message::Text(r#"{"type":"click","x":10,"y":20}"#.into()))
        .await
        .expect("send click");
    socket
        .send(Message::Text(r#"{"type":"ping"}"#.into()))
        .await
        .expect("send ping");

    let mut ack = None;
    let mut pong = false;
    while ack.is_none() || !pong {
        match next_event(&mut socket).await {
            ServerEvent::CommandAck { command, success } => ack = Some((command, success)),
            ServerEvent::Pong { .. } => pong = true,
            _ => {}
        }
    }
    assert_eq!(ack, Some(("click".to_owned(), true)));
    assert_eq!(
        h.browser.inputs.lock().unwrap().as_slice(),
        &[ViewerInput::Click { x: 10, y: 20 }]
    );
    assert_eq!(h.browser.action_count(), 0, "viewer input bypasses the step loop");

    h.finish("s-view").await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn viewer_channel_closes_when_session_ends() {
    let h = harness(test_config());
    let server = serve(&h, None).await;

    h.manager.create_session(request("s-gone")).expect("created");
    let (mut socket, _) = connect_async(server.ws("/ws/browser?session_id=s-gone"))
        .await
        .expect("connect");

    h.finish("s-gone").await;

    let closed = tokio::time::timeout(WAIT, async {
        loop {
            match socket.next().await {
                None | Some(Err(_) | Ok(Message::Close(_))) => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "viewer socket closes after the session is gone");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_session_is_rejected() {
    let h = harness(test_config());
    let server = serve(&h, None).await;

    let outcome = connect_async(server.ws("/ws/browser?session_id=nobody")).await;
    assert!(outcome.is_err());
}
