mod support;

use duel_session_core::{PendingUndo, Role};
use duel_session_p2p::SessionEvent;
use support::SessionFixture;

/// Alice in SeatA, Bob in SeatB, Carol watching
fn table() -> (SessionFixture, usize, usize, usize) {
    let mut fixture = SessionFixture::new();
    let alice = fixture.join_settled("Alice");
    let bob = fixture.join_settled("Bob");
    let carol = fixture.join_settled("Carol");
    for index in [alice, bob, carol] {
        fixture.take_events(index);
    }
    (fixture, alice, bob, carol)
}

#[test]
fn test_turn_is_derived_locally() {
    let (mut fixture, alice, bob, carol) = table();

    assert!(fixture.session(alice).is_my_turn(Role::SeatA));
    assert!(!fixture.session(alice).is_my_turn(Role::SeatB));
    assert!(fixture.session(bob).is_my_turn(Role::SeatB));
    assert!(!fixture.session(bob).is_my_turn(Role::SeatA));
    assert!(!fixture.session(carol).is_my_turn(Role::SeatA));
    assert!(!fixture.session(carol).is_my_turn(Role::SeatB));
}

#[test]
fn test_no_turn_without_an_opponent() {
    let mut fixture = SessionFixture::new();
    let alice = fixture.join_settled("Alice");
    assert!(!fixture.session(alice).is_my_turn(Role::SeatA));
}

#[test]
fn test_timeout_is_announced_to_everyone() {
    let (mut fixture, alice, bob, carol) = table();
    let bob_id = fixture.id(bob);

    assert!(fixture.session(bob).announce_timeout(Role::SeatB));
    fixture.poll_until_stable(100);

    let expected = SessionEvent::TimedOut {
        loser: Role::SeatB,
        announced_by: bob_id,
    };
    for index in [alice, bob, carol] {
        let events = fixture.take_events(index);
        assert_eq!(
            events.iter().filter(|e| **e == expected).count(),
            1,
            "session {}",
            index
        );
    }

    // Decided until the next round
    assert!(!fixture.session(alice).announce_timeout(Role::SeatA));
    assert!(!fixture.session(carol).announce_timeout(Role::SeatA));
    fixture.session(alice).reset_round();
    assert!(fixture.session(alice).announce_timeout(Role::SeatA));
}

#[test]
fn test_approved_undo_applies_everywhere() {
    let (mut fixture, alice, bob, carol) = table();
    let bob_id = fixture.id(bob);

    assert!(fixture.session(bob).request_undo(1));
    assert!(!fixture.session(bob).request_undo(1));
    assert!(!fixture.session(carol).request_undo(1));
    fixture.poll_until_stable(100);

    let request = PendingUndo {
        from: bob_id,
        moves: 1,
    };
    assert_eq!(fixture.session(alice).pending_undo(), Some(&request));
    assert!(fixture
        .take_events(alice)
        .contains(&SessionEvent::UndoRequested(request)));

    assert!(fixture.session(alice).respond_undo(true));
    fixture.poll_until_stable(100);

    let applied = SessionEvent::UndoApplied {
        moves: 1,
        requester: bob_id,
    };
    for index in [alice, bob, carol] {
        assert!(
            fixture.take_events(index).contains(&applied),
            "session {} did not roll back",
            index
        );
    }
    assert!(fixture.session(alice).pending_undo().is_none());
    assert!(fixture.session(bob).request_undo(2));
}

#[test]
fn test_rejected_undo_only_reaches_requester() {
    let (mut fixture, alice, bob, carol) = table();

    assert!(fixture.session(alice).request_undo(2));
    fixture.poll_until_stable(100);
    assert!(fixture.session(bob).respond_undo(false));
    assert!(!fixture.session(bob).respond_undo(false));
    fixture.poll_until_stable(100);

    assert!(fixture
        .take_events(alice)
        .contains(&SessionEvent::UndoRejected { moves: 2 }));
    assert!(!fixture.take_events(carol).iter().any(|e| matches!(
        e,
        SessionEvent::UndoApplied { .. } | SessionEvent::UndoRejected { .. }
    )));
}

#[test]
fn test_pending_undo_cleared_when_requester_leaves() {
    let (mut fixture, alice, bob, _carol) = table();

    assert!(fixture.session(bob).request_undo(1));
    fixture.poll_until_stable(100);
    assert!(fixture.session(alice).pending_undo().is_some());

    fixture.crash(bob);
    fixture.poll_until_stable(100);
    assert!(fixture.session(alice).pending_undo().is_none());
    assert!(!fixture.session(alice).respond_undo(true));
}
