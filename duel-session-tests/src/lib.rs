use cucumber::World;
use duel_session_core::{Role, SessionStatus};
use duel_session_p2p::{
    DeliveryRoute, Envelope, MemoryPeerNetwork, MemoryRelayNetwork, MemorySession, PeerId,
    Session, SessionConfig, SessionEvent,
};
use instant::{Duration, Instant};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex};

pub const ROOM: &str = "ROOM1";

/// Envelopes received by a test handler
pub type Inbox = Arc<Mutex<Vec<(Value, DeliveryRoute)>>>;

/// Participants addressed by display name, all on one in-memory relay
/// and peer network. Time is virtual.
#[derive(World)]
#[world(init = Self::new)]
pub struct SessionWorld {
    pub relay: MemoryRelayNetwork,
    pub peers: MemoryPeerNetwork,
    pub config: SessionConfig,
    sessions: Vec<MemorySession>,
    names: HashMap<String, usize>,
    crashed: Vec<bool>,
    events: Vec<Vec<SessionEvent>>,
    /// Per participant, per action
    pub inboxes: HashMap<(String, String), Inbox>,
    /// Routes of the last `send`, by target name
    pub last_routes: Vec<(PeerId, DeliveryRoute)>,
    /// Result of the last request operation
    pub last_accepted: Option<bool>,
    /// Roles right before a step that should not change them
    pub remembered_roles: BTreeMap<String, Role>,
    now: Instant,
}

impl fmt::Debug for SessionWorld {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut table = f.debug_map();
        for (name, index) in &self.names {
            let state = self.sessions[*index].state();
            table.entry(name, &(state.local_role(), state.status(), self.crashed[*index]));
        }
        table.finish()
    }
}

impl SessionWorld {
    pub fn new() -> Self {
        Self {
            relay: MemoryRelayNetwork::new(),
            peers: MemoryPeerNetwork::new(),
            config: SessionConfig::default(),
            sessions: Vec::new(),
            names: HashMap::new(),
            crashed: Vec::new(),
            events: Vec::new(),
            inboxes: HashMap::new(),
            last_routes: Vec::new(),
            last_accepted: None,
            remembered_roles: BTreeMap::new(),
            now: Instant::now(),
        }
    }

    /// Create a session for `name` and start joining [`ROOM`] without polling
    pub fn join(&mut self, name: &str) {
        let mut session = Session::new(
            self.config.clone(),
            self.relay.connection(),
            self.peers.connector(),
        )
        .expect("session");
        session.join(ROOM, name).expect("join");
        self.sessions.push(session);
        self.crashed.push(false);
        self.events.push(Vec::new());
        self.names.insert(name.to_string(), self.sessions.len() - 1);
    }

    pub fn join_settled(&mut self, name: &str) {
        self.join(name);
        self.settle();
    }

    fn index(&self, name: &str) -> usize {
        *self
            .names
            .get(name)
            .unwrap_or_else(|| panic!("Participant '{}' not found", name))
    }

    pub fn session(&mut self, name: &str) -> &mut MemorySession {
        let index = self.index(name);
        &mut self.sessions[index]
    }

    pub fn session_ref(&self, name: &str) -> &MemorySession {
        &self.sessions[self.index(name)]
    }

    pub fn id(&self, name: &str) -> PeerId {
        self.session_ref(name).local_peer_id()
    }

    pub fn role(&self, name: &str) -> Role {
        self.session_ref(name).state().local_role()
    }

    /// Role of `of` in `viewer`'s roster
    pub fn role_seen_by(&self, viewer: &str, of: &str) -> Option<Role> {
        self.session_ref(viewer)
            .state()
            .participant(self.id(of))
            .map(|p| p.role())
    }

    pub fn live_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .names
            .iter()
            .filter(|(_, index)| !self.crashed[**index])
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn advance(&mut self, by: Duration) {
        self.now += by;
    }

    fn poll_index(&mut self, index: usize) -> usize {
        let processed = self.sessions[index].poll_at(self.now);
        let drained = self.sessions[index].drain_events();
        self.events[index].extend(drained);
        processed
    }

    pub fn poll(&mut self, name: &str) -> usize {
        let index = self.index(name);
        self.poll_index(index)
    }

    pub fn tick(&mut self) -> usize {
        let mut processed = 0;
        for index in 0..self.sessions.len() {
            if !self.crashed[index] {
                processed += self.poll_index(index);
            }
        }
        processed
    }

    /// Poll every live session until a round handles nothing
    pub fn settle(&mut self) {
        for _ in 0..200 {
            if self.tick() == 0 {
                return;
            }
        }
        panic!("sessions did not settle: {:?}", self);
    }

    /// Drop relay membership and every direct link of `name`
    pub fn crash(&mut self, name: &str) {
        let index = self.index(name);
        let id = self.id(name);
        self.crashed[index] = true;
        self.relay.drop_peer(id);
        for (other, session) in self.sessions.iter().enumerate() {
            if other != index {
                self.peers.fail_link(id, session.local_peer_id());
            }
        }
    }

    pub fn events(&self, name: &str) -> &[SessionEvent] {
        &self.events[self.index(name)]
    }

    /// Install a recording handler for `action` at `name`
    pub fn listen(&mut self, name: &str, action: &str) -> usize {
        let inbox: Inbox = Arc::default();
        let sink = inbox.clone();
        let replayed = self
            .session(name)
            .register_handler(action, move |envelope: &Envelope| {
                if let Ok(mut seen) = sink.lock() {
                    seen.push((envelope.payload.clone(), envelope.route));
                }
            })
            .expect("register handler");
        self.inboxes
            .insert((name.to_string(), action.to_string()), inbox);
        replayed
    }

    pub fn received(&self, name: &str, action: &str) -> Vec<(Value, DeliveryRoute)> {
        self.inboxes
            .get(&(name.to_string(), action.to_string()))
            .map(|inbox| inbox.lock().map(|seen| seen.clone()).unwrap_or_default())
            .unwrap_or_default()
    }

    pub fn remember_roles(&mut self) {
        self.remembered_roles = self
            .live_names()
            .into_iter()
            .map(|name| {
                let role = self.role(&name);
                (name, role)
            })
            .collect();
    }

    /// Holders of `seat` in `viewer`'s roster
    pub fn holders(&self, viewer: &str, seat: Role) -> Vec<PeerId> {
        self.session_ref(viewer)
            .state()
            .roles()
            .into_iter()
            .filter(|(_, role)| *role == seat)
            .map(|(id, _)| id)
            .collect()
    }

    /// All live rosters are identical, connected and complete
    pub fn assert_consistent(&self) {
        let live = self.live_names();
        let Some(first) = live.first() else {
            return;
        };
        let expected = self.session_ref(first).state().roles();
        assert_eq!(expected.len(), live.len(), "roster of {}: {:?}", first, self);
        for name in &live {
            let session = self.session_ref(name);
            assert_eq!(session.state().roles(), expected, "{} disagrees with {}", name, first);
            assert_eq!(session.status(), SessionStatus::Connected);
        }
    }
}

impl Default for SessionWorld {
    fn default() -> Self {
        Self::new()
    }
}
