use cucumber::{given, then, when};
use duel_session_core::SessionStatus;
use duel_session_p2p::ReconnectPolicy;
use duel_session_tests::SessionWorld;
use instant::Duration;

#[given(expr = "reconnects give up after {int} attempts")]
async fn give_up_after(world: &mut SessionWorld, attempts: u32) {
    world.config = world
        .config
        .clone()
        .with_reconnect_policy(ReconnectPolicy::default().with_max_attempts(attempts));
}

#[when("the relay drops every connection")]
async fn relay_drops(world: &mut SessionWorld) {
    world.relay.drop_all();
    world.tick();
}

#[when("the relay goes down for good")]
async fn relay_down(world: &mut SessionWorld) {
    world.relay.set_reachable(false);
    world.relay.drop_all();
    world.tick();
}

#[when(expr = "{int} seconds pass")]
async fn seconds_pass(world: &mut SessionWorld, seconds: u64) {
    for _ in 0..seconds * 10 {
        world.advance(Duration::from_millis(100));
        world.tick();
    }
    world.settle();
}

#[then(expr = "{string} is reconnecting")]
async fn is_reconnecting(world: &mut SessionWorld, name: String) {
    let session = world.session_ref(&name);
    assert_eq!(session.status(), SessionStatus::Connecting);
    assert!(session.state().last_error().is_some());
}

#[then(expr = "{string} is disconnected with an error")]
async fn is_disconnected(world: &mut SessionWorld, name: String) {
    let session = world.session_ref(&name);
    assert_eq!(session.status(), SessionStatus::Disconnected);
    assert!(session.state().last_error().is_some());
}

#[then(expr = "{string} lists {int} participants")]
async fn lists_participants(world: &mut SessionWorld, name: String, count: usize) {
    assert_eq!(world.session_ref(&name).state().participant_count(), count);
}

#[then("every join was repeated with the same identity")]
async fn joins_repeated(world: &mut SessionWorld) {
    let joins = world.relay.joins();
    let members = world.live_names().len();
    assert_eq!(joins.len(), members * 2);
    let (first, repeated) = joins.split_at(members);
    for rejoin in repeated {
        assert!(first.contains(rejoin), "unexpected join {:?}", rejoin);
    }
}
