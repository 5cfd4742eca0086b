#![allow(dead_code)]

use duel_session_core::{Role, SessionStatus};
use duel_session_p2p::{
    MemoryPeerNetwork, MemoryRelayNetwork, MemorySession, PeerId, ReconnectPolicy, Session,
    SessionConfig, SessionEvent,
};
use instant::{Duration, Instant};
use std::collections::BTreeMap;

pub const ROOM: &str = "ROOM1";

/// Several sessions sharing one in-memory relay and peer network.
///
/// Time is virtual: [`SessionFixture::advance`] moves the clock used for
/// polling so reconnect backoff can be exercised without sleeping.
pub struct SessionFixture {
    pub relay: MemoryRelayNetwork,
    pub peers: MemoryPeerNetwork,
    pub sessions: Vec<MemorySession>,
    crashed: Vec<bool>,
    events: Vec<Vec<SessionEvent>>,
    now: Instant,
    config: SessionConfig,
}

impl Default for SessionFixture {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionFixture {
    pub fn new() -> Self {
        Self::with_config(SessionConfig::default())
    }

    pub fn with_reconnect_policy(policy: ReconnectPolicy) -> Self {
        Self::with_config(SessionConfig::default().with_reconnect_policy(policy))
    }

    fn with_config(config: SessionConfig) -> Self {
        Self {
            relay: MemoryRelayNetwork::new(),
            peers: MemoryPeerNetwork::new(),
            sessions: Vec::new(),
            crashed: Vec::new(),
            events: Vec::new(),
            now: Instant::now(),
            config,
        }
    }

    /// Add a session that has not joined yet; returns its index
    pub fn add(&mut self) -> usize {
        let session = Session::new(
            self.config.clone(),
            self.relay.connection(),
            self.peers.connector(),
        )
        .expect("session");
        self.sessions.push(session);
        self.crashed.push(false);
        self.events.push(Vec::new());
        self.sessions.len() - 1
    }

    /// Add a session and join it to [`ROOM`]
    pub fn join(&mut self, name: &str) -> usize {
        let index = self.add();
        self.sessions[index].join(ROOM, name).expect("join");
        index
    }

    /// Join, then poll every session until nothing moves
    pub fn join_settled(&mut self, name: &str) -> usize {
        let index = self.join(name);
        self.poll_until_stable(100);
        index
    }

    pub fn session(&mut self, index: usize) -> &mut MemorySession {
        &mut self.sessions[index]
    }

    pub fn id(&self, index: usize) -> PeerId {
        self.sessions[index].local_peer_id()
    }

    pub fn role(&self, index: usize) -> Role {
        self.sessions[index].state().local_role()
    }

    /// Role of `of` as seen by `viewer`
    pub fn role_seen_by(&self, viewer: usize, of: usize) -> Option<Role> {
        self.sessions[viewer]
            .state()
            .participant(self.id(of))
            .map(|p| p.role())
    }

    pub fn roster(&self, index: usize) -> BTreeMap<PeerId, Role> {
        self.sessions[index].state().roles()
    }

    pub fn now(&self) -> Instant {
        self.now
    }

    pub fn advance(&mut self, by: Duration) {
        self.now += by;
    }

    /// Poll one session once
    pub fn poll(&mut self, index: usize) -> usize {
        let processed = self.sessions[index].poll_at(self.now);
        let drained = self.sessions[index].drain_events();
        self.events[index].extend(drained);
        processed
    }

    /// Poll every live session `rounds` times
    pub fn tick(&mut self, rounds: usize) -> usize {
        let mut processed = 0;
        for _ in 0..rounds {
            for index in 0..self.sessions.len() {
                if !self.crashed[index] {
                    processed += self.poll(index);
                }
            }
        }
        processed
    }

    /// Poll until a full round handles no event; returns the rounds taken
    pub fn poll_until_stable(&mut self, max_rounds: usize) -> usize {
        for round in 1..=max_rounds {
            if self.tick(1) == 0 {
                return round;
            }
        }
        panic!("sessions did not settle within {} rounds", max_rounds);
    }

    /// Kill a session without leaving: relay connection and direct links drop
    pub fn crash(&mut self, index: usize) {
        let id = self.id(index);
        self.crashed[index] = true;
        self.relay.drop_peer(id);
        for other in 0..self.sessions.len() {
            if other != index {
                self.peers.fail_link(id, self.id(other));
            }
        }
    }

    pub fn live(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.sessions.len()).filter(|i| !self.crashed[*i])
    }

    /// Events collected for `index` since the last call
    pub fn take_events(&mut self, index: usize) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events[index])
    }

    // Assertions

    /// Every live session sees the same roster with all live members in it
    pub fn assert_consistent(&self) {
        let live: Vec<usize> = self.live().collect();
        let Some(first) = live.first().copied() else {
            return;
        };
        let expected = self.roster(first);
        assert_eq!(expected.len(), live.len(), "roster size of session {}", first);
        for index in &live {
            assert_eq!(
                self.roster(*index),
                expected,
                "session {} disagrees with session {}",
                index,
                first
            );
            assert_eq!(self.sessions[*index].status(), SessionStatus::Connected);
        }
    }

    /// At most one holder per seat in every live roster
    pub fn assert_seats_unique(&self) {
        for index in self.live() {
            for seat in Role::SEATS {
                let holders = self
                    .roster(index)
                    .values()
                    .filter(|role| **role == seat)
                    .count();
                assert!(
                    holders <= 1,
                    "session {} sees {} holders of {}",
                    index,
                    holders,
                    seat
                );
            }
        }
    }

    pub fn count_role(&self, viewer: usize, role: Role) -> usize {
        self.roster(viewer).values().filter(|r| **r == role).count()
    }

    pub fn print_state(&self) {
        for index in 0..self.sessions.len() {
            let state = self.sessions[index].state();
            println!(
                "  [{}] {} {} crashed={}",
                index,
                state.local().display_name(),
                state.local_role(),
                self.crashed[index]
            );
            for participant in state.participants() {
                println!("      {} {}", participant.display_name(), participant.role());
            }
        }
    }
}
