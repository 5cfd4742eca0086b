use duel_session_p2p::{
    Envelope, NativeSession, SessionConfig, SessionEvent, WebRtcConnector, WebSocketRelay,
};
use std::time::Duration;

/// Join ROOM1 on a local relay (`duel-cli relay`) and print what happens.
///
/// Run it twice to watch the two seats get assigned.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let name = std::env::args().nth(1).unwrap_or_else(|| "Player".to_string());
    let config = SessionConfig::default();
    let relay = WebSocketRelay::new(config.signaling_url.clone())?;
    let connector = WebRtcConnector::new(config.ice_servers.clone())?;

    let mut session = NativeSession::new(config.clone(), relay, connector)?;
    session.register_handler("chat", |envelope: &Envelope| {
        println!("💬 {}: {}", envelope.sender, envelope.payload["text"]);
    })?;
    session.join("ROOM1", &name)?;

    let mut interval = tokio::time::interval(Duration::from_millis(config.poll_interval_ms));
    let mut greeted = false;
    loop {
        interval.tick().await;
        session.poll();

        for event in session.drain_events() {
            match event {
                SessionEvent::RoleChanged { peer_id, to, .. }
                    if peer_id == session.local_peer_id() =>
                {
                    println!("👑 We are now {}", to);
                }
                SessionEvent::ReadinessChanged(true) if !greeted => {
                    greeted = true;
                    session.send(
                        "chat",
                        serde_json::json!({ "text": format!("{} is ready", name) }),
                        None,
                    )?;
                }
                other => println!("📡 {:?}", other),
            }
        }
    }
}
