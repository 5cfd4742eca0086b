use super::parse_role;
use cucumber::{then, when};
use duel_session_p2p::SessionEvent;
use duel_session_tests::SessionWorld;

#[then(regex = r#"^it is "(\w+)"'s turn when (\w+) moves$"#)]
async fn is_turn(world: &mut SessionWorld, name: String, mover: String) {
    assert!(world.session_ref(&name).is_my_turn(parse_role(&mover)));
}

#[then(regex = r#"^it is not "(\w+)"'s turn when (\w+) moves$"#)]
async fn is_not_turn(world: &mut SessionWorld, name: String, mover: String) {
    assert!(!world.session_ref(&name).is_my_turn(parse_role(&mover)));
}

#[when(expr = "{string} announces that {word} ran out of time")]
async fn announce_timeout(world: &mut SessionWorld, name: String, loser: String) {
    let accepted = world.session(&name).announce_timeout(parse_role(&loser));
    world.last_accepted = Some(accepted);
    world.settle();
}

#[then(expr = "{string} learns that {word} timed out")]
async fn learns_timeout(world: &mut SessionWorld, name: String, loser: String) {
    let loser = parse_role(&loser);
    let announcements = world
        .events(&name)
        .iter()
        .filter(|e| matches!(e, SessionEvent::TimedOut { loser: l, .. } if *l == loser))
        .count();
    assert_eq!(announcements, 1);
}

#[when(expr = "{string} asks to take back {int} move(s)")]
async fn ask_undo(world: &mut SessionWorld, name: String, moves: u32) {
    let accepted = world.session(&name).request_undo(moves);
    world.last_accepted = Some(accepted);
    world.settle();
}

#[when(expr = "{string} allows the undo")]
async fn allow_undo(world: &mut SessionWorld, name: String) {
    assert!(world.session(&name).respond_undo(true));
    world.settle();
}

#[when(expr = "{string} denies the undo")]
async fn deny_undo(world: &mut SessionWorld, name: String) {
    assert!(world.session(&name).respond_undo(false));
    world.settle();
}

#[then(expr = "{string} takes back {int} move(s)")]
async fn takes_back(world: &mut SessionWorld, name: String, moves: u32) {
    assert!(world
        .events(&name)
        .iter()
        .any(|e| matches!(e, SessionEvent::UndoApplied { moves: m, .. } if *m == moves)));
}

#[then(expr = "{string} hears the undo was declined")]
async fn hears_declined(world: &mut SessionWorld, name: String) {
    assert!(world
        .events(&name)
        .iter()
        .any(|e| matches!(e, SessionEvent::UndoRejected { .. })));
}

#[then(expr = "{string} does not hear about the undo")]
async fn does_not_hear(world: &mut SessionWorld, name: String) {
    assert!(!world.events(&name).iter().any(|e| matches!(
        e,
        SessionEvent::UndoApplied { .. } | SessionEvent::UndoRejected { .. }
    )));
}
