use cucumber::{then, when};
use duel_session_tests::SessionWorld;

#[when(expr = "{string} asks {string} to swap")]
async fn ask_swap(world: &mut SessionWorld, from: String, to: String) {
    let target = world.id(&to);
    let accepted = world.session(&from).request_swap(target);
    world.last_accepted = Some(accepted);
    world.settle();
}

#[when(expr = "{string} approves the swap")]
async fn approve_swap(world: &mut SessionWorld, name: String) {
    assert!(world.session(&name).respond_swap(true));
    world.settle();
}

#[when(expr = "{string} rejects the swap")]
async fn reject_swap(world: &mut SessionWorld, name: String) {
    assert!(world.session(&name).respond_swap(false));
    world.settle();
}

#[then(expr = "{string} is asked to swap by {string}")]
async fn asked_to_swap(world: &mut SessionWorld, name: String, from: String) {
    let from_id = world.id(&from);
    let pending = world
        .session_ref(&name)
        .pending_swap()
        .cloned()
        .expect("No swap request");
    assert_eq!(pending.from_peer_id, from_id);
    assert_eq!(pending.from_display_name, from);
}

#[then(expr = "{string} has no pending swap")]
async fn no_pending_swap(world: &mut SessionWorld, name: String) {
    assert!(world.session_ref(&name).pending_swap().is_none());
}
