use cucumber::{given, then, when};
use duel_session_p2p::DeliveryRoute;
use duel_session_tests::SessionWorld;
use serde_json::Value;

fn parse_json(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|e| panic!("Bad JSON '{}': {}", text, e))
}

#[given(expr = "{string} joins while the channel to {string} is held open")]
async fn join_with_held_channel(world: &mut SessionWorld, name: String, other: String) {
    world.join(&name);
    world.poll(&name);
    let (a, b) = (world.id(&other), world.id(&name));
    world.peers.hold_channel(a, b);
    world.settle();
}

#[given(expr = "{string} starts listening for {string}")]
#[when(expr = "{string} starts listening for {string}")]
async fn start_listening(world: &mut SessionWorld, name: String, action: String) {
    world.listen(&name, &action);
}

#[when(regex = r#"^"(\w+)" sends "([\w/]+)" with (\{.*\})$"#)]
async fn broadcast(world: &mut SessionWorld, name: String, action: String, payload: String) {
    world.last_routes = world
        .session(&name)
        .send(&action, parse_json(&payload), None)
        .expect("send");
    world.settle();
}

#[when(regex = r#"^"(\w+)" sends "([\w/]+)" with (\{.*\}) to "(\w+)"$"#)]
async fn send_to(world: &mut SessionWorld, name: String, action: String, payload: String, to: String) {
    let target = world.id(&to);
    world.last_routes = world
        .session(&name)
        .send(&action, parse_json(&payload), Some(target))
        .expect("send");
    world.settle();
}

#[when("the sessions settle")]
async fn sessions_settle(world: &mut SessionWorld) {
    world.settle();
}

#[when(expr = "the channel between {string} and {string} opens")]
async fn channel_opens(world: &mut SessionWorld, a: String, b: String) {
    let (a, b) = (world.id(&a), world.id(&b));
    world.peers.release_channel(a, b);
    world.settle();
}

#[then(expr = "{string} received {int} {string} message(s)")]
async fn received_count(world: &mut SessionWorld, name: String, count: usize, action: String) {
    assert_eq!(world.received(&name, &action).len(), count);
}

#[then(regex = r#"^"(\w+)" received "([\w/]+)" with (\{.*\}) first$"#)]
async fn received_first(world: &mut SessionWorld, name: String, action: String, payload: String) {
    let received = world.received(&name, &action);
    let first = received.first().expect("Nothing received");
    assert_eq!(first.0, parse_json(&payload));
}

#[then(expr = "the message to {string} went through the relay")]
async fn went_through_relay(world: &mut SessionWorld, name: String) {
    let id = world.id(&name);
    assert_eq!(world.last_routes, vec![(id, DeliveryRoute::Relay)]);
}

#[then(expr = "the message to {string} went directly")]
async fn went_directly(world: &mut SessionWorld, name: String) {
    let id = world.id(&name);
    assert_eq!(world.last_routes, vec![(id, DeliveryRoute::Direct)]);
}
