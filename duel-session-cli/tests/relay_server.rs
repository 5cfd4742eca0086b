use duel_session_cli::infrastructure::{create_relay_route, RelayState};
use duel_session_p2p::infrastructure::{ClientFrame, ServerFrame};
use duel_session_p2p::{ActionData, PeerId};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_relay() -> (String, RelayState) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = RelayState::new();
    let app = create_relay_route(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("ws://{}/ws", addr), state)
}

async fn send(client: &mut Client, frame: ClientFrame) {
    client
        .send(Message::text(frame.to_json().unwrap()))
        .await
        .unwrap();
}

async fn next_frame(client: &mut Client) -> ServerFrame {
    let message = tokio::time::timeout(Duration::from_secs(5), client.next())
        .await
        .expect("timed out waiting for a frame")
        .unwrap()
        .unwrap();
    ServerFrame::from_json(message.to_text().unwrap()).unwrap()
}

async fn join(url: &str, peer_id: PeerId, name: &str) -> (Client, ServerFrame) {
    let (mut client, _) = connect_async(url).await.unwrap();
    send(
        &mut client,
        ClientFrame::Join {
            session_code: "ROOM1".to_string(),
            peer_id,
            name: name.to_string(),
        },
    )
    .await;
    let result = next_frame(&mut client).await;
    (client, result)
}

#[tokio::test]
async fn test_members_see_each_other() {
    let (url, state) = start_relay().await;
    let alice_id = PeerId::random();
    let bob_id = PeerId::random();

    let (mut alice, result) = join(&url, alice_id, "Alice").await;
    assert!(matches!(result, ServerFrame::JoinResult { success: true, ref members, .. } if members.is_empty()));

    let (mut bob, result) = join(&url, bob_id, "Bob").await;
    match result {
        ServerFrame::JoinResult { success, members, .. } => {
            assert!(success);
            assert_eq!(members.len(), 1);
            assert_eq!(members[0].peer_id, alice_id);
        }
        other => panic!("unexpected frame {:?}", other),
    }
    assert_eq!(
        next_frame(&mut alice).await,
        ServerFrame::PeerJoined {
            peer_id: bob_id,
            name: "Bob".to_string()
        }
    );
    assert_eq!(state.room_count(), 1);

    send(
        &mut bob,
        ClientFrame::Message {
            session_code: "ROOM1".to_string(),
            target_peer_id: None,
            data: ActionData::new("chat", json!({ "text": "hi" })).unwrap(),
        },
    )
    .await;
    match next_frame(&mut alice).await {
        ServerFrame::Message { from_peer_id, data } => {
            assert_eq!(from_peer_id, bob_id);
            assert_eq!(data.action, "chat");
        }
        other => panic!("unexpected frame {:?}", other),
    }

    bob.close(None).await.unwrap();
    assert_eq!(
        next_frame(&mut alice).await,
        ServerFrame::PeerLeft { peer_id: bob_id }
    );
}

#[tokio::test]
async fn test_blank_name_is_rejected() {
    let (url, state) = start_relay().await;

    let (_client, result) = join(&url, PeerId::random(), "  ").await;
    assert!(matches!(result, ServerFrame::JoinResult { success: false, .. }));
    assert_eq!(state.room_count(), 0);
}

#[tokio::test]
async fn test_rejoin_takes_over_identity() {
    let (url, state) = start_relay().await;
    let alice_id = PeerId::random();
    let bob_id = PeerId::random();

    let (mut alice, _) = join(&url, alice_id, "Alice").await;
    let (_bob, _) = join(&url, bob_id, "Bob").await;
    next_frame(&mut alice).await;

    let (_bob_again, result) = join(&url, bob_id, "Bob").await;
    match result {
        ServerFrame::JoinResult { success, members, .. } => {
            assert!(success);
            assert_eq!(members.len(), 1);
        }
        other => panic!("unexpected frame {:?}", other),
    }
    assert_eq!(state.room_count(), 1);
}
