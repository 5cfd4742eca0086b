use super::parse_role;
use cucumber::{given, then, when};
use duel_session_core::Role;
use duel_session_tests::SessionWorld;

// ===== Given / When =====

#[given(expr = "{string} has joined the session")]
#[when(expr = "{string} joins the session")]
async fn member_joins(world: &mut SessionWorld, name: String) {
    world.join_settled(&name);
    world.remember_roles();
}

#[when(regex = r#"^"(\w+)", "(\w+)" and "(\w+)" join the session at the same time$"#)]
async fn members_join_together(world: &mut SessionWorld, a: String, b: String, c: String) {
    for name in [&a, &b, &c] {
        world.join(name);
    }
    world.settle();
}

#[given(expr = "{string} stands up")]
async fn member_stands_up(world: &mut SessionWorld, name: String) {
    assert!(world.session(&name).request_seat(Role::Observer));
    world.settle();
    world.remember_roles();
}

#[when(expr = "{string} and {string} both claim {word}")]
async fn both_claim(world: &mut SessionWorld, first: String, second: String, seat: String) {
    let seat = parse_role(&seat);
    assert!(world.session(&first).request_seat(seat));
    assert!(world.session(&second).request_seat(seat));
    world.settle();
}

#[when(expr = "{string} claims {word}")]
async fn member_claims(world: &mut SessionWorld, name: String, seat: String) {
    let accepted = world.session(&name).request_seat(parse_role(&seat));
    world.last_accepted = Some(accepted);
    world.settle();
}

#[when(expr = "{string} loses the connection")]
async fn member_crashes(world: &mut SessionWorld, name: String) {
    world.crash(&name);
    world.settle();
}

#[when(expr = "{string} and {string} lose the connection together")]
async fn members_crash_together(world: &mut SessionWorld, first: String, second: String) {
    world.crash(&first);
    world.crash(&second);
    world.settle();
}

// ===== Then =====

#[then(expr = "{string} holds {word}")]
async fn member_holds(world: &mut SessionWorld, name: String, role: String) {
    assert_eq!(world.role(&name), parse_role(&role), "{:?}", world);
}

#[then(expr = "{string} sees {string} as {word}")]
async fn member_sees(world: &mut SessionWorld, viewer: String, of: String, role: String) {
    assert_eq!(world.role_seen_by(&viewer, &of), Some(parse_role(&role)));
}

#[then(expr = "exactly one of {string} and {string} holds {word}")]
async fn exactly_one_holds(world: &mut SessionWorld, first: String, second: String, role: String) {
    let role = parse_role(&role);
    let holders = [&first, &second]
        .iter()
        .filter(|name| world.role(name) == role)
        .count();
    assert_eq!(holders, 1, "{:?}", world);
}

#[then("every roster agrees")]
async fn rosters_agree(world: &mut SessionWorld) {
    world.assert_consistent();
}

#[then("every roster has exactly one SeatA and one SeatB")]
async fn seats_unique(world: &mut SessionWorld) {
    for viewer in world.live_names() {
        assert_eq!(world.holders(&viewer, Role::SeatA).len(), 1, "{} SeatA", viewer);
        assert_eq!(world.holders(&viewer, Role::SeatB).len(), 1, "{} SeatB", viewer);
    }
}

#[then(expr = "the session is ready for {string}")]
async fn session_ready(world: &mut SessionWorld, name: String) {
    assert!(world.session_ref(&name).session_ready());
}

#[then(expr = "the session is not ready for {string}")]
async fn session_not_ready(world: &mut SessionWorld, name: String) {
    assert!(!world.session_ref(&name).session_ready());
}

#[then(expr = "{string} no longer lists {string}")]
async fn no_longer_lists(world: &mut SessionWorld, viewer: String, gone: String) {
    let gone = world.id(&gone);
    assert!(world.session_ref(&viewer).state().participant(gone).is_none());
}

#[then("the request is refused")]
async fn request_refused(world: &mut SessionWorld) {
    assert_eq!(world.last_accepted, Some(false));
}

#[then("no role has changed")]
async fn roles_unchanged(world: &mut SessionWorld) {
    for (name, role) in world.remembered_roles.clone() {
        assert_eq!(world.role(&name), role, "{} changed", name);
        for viewer in world.live_names() {
            assert_eq!(world.role_seen_by(&viewer, &name), Some(role));
        }
    }
}
