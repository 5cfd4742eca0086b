use crate::application::action_bus::ActionBus;
use crate::application::events::SessionEvent;
use crate::application::peer_links::{ChannelState, LinkEvent, PeerLinkManager};
use crate::application::signaling::{SignalingClient, SignalingEvent, SignalingStatus};
use crate::application::SessionConfig;
use crate::domain::{
    is_reserved, ActionData, DeliveryRoute, Envelope, PeerId, GAME_ACTION, ROLE_ACTION,
};
use crate::infrastructure::error::{P2PError, Result};
use crate::infrastructure::frames::MemberInfo;
use crate::infrastructure::relay::RelayConnection;
use crate::infrastructure::transport::PeerConnector;
use duel_session_core::{
    GameMessage, GameNotice, GameStep, GameSync, Negotiation, PendingSwapRequest, PendingUndo,
    Role, RoleMessage, RoleNegotiator, RoleNotice, SessionState, SessionStatus,
};
use instant::Instant;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

const UNNAMED: &str = "Player";

/// One participant's view of a peer session.
///
/// Owned by the application and driven by calling [`Session::poll`];
/// every state transition happens inside a call on this object.
/// Generic over the relay connection and peer connector so tests can run
/// whole sessions in memory.
pub struct Session<R: RelayConnection, C: PeerConnector> {
    config: SessionConfig,
    state: SessionState,
    signaling: SignalingClient<R>,
    links: PeerLinkManager<C>,
    bus: ActionBus,
    roles: RoleNegotiator,
    game: GameSync,
    peer_id: PeerId,
    events: Vec<SessionEvent>,
    known_roles: BTreeMap<PeerId, Role>,
    was_ready: bool,
    /// Peers whose direct link is being rebuilt after a loss
    relinking: BTreeSet<PeerId>,
}

impl<R: RelayConnection, C: PeerConnector> Session<R, C> {
    pub fn new(config: SessionConfig, relay: R, connector: C) -> Result<Self> {
        let state = SessionState::new(UNNAMED.to_string())?;
        Ok(Self {
            signaling: SignalingClient::new(relay, config.reconnect.clone()),
            links: PeerLinkManager::new(connector),
            bus: ActionBus::with_buffer_limit(config.buffer_limit),
            roles: RoleNegotiator::new(),
            game: GameSync::new(),
            peer_id: PeerId::LOCAL,
            events: Vec::new(),
            known_roles: state.roles(),
            was_ready: false,
            relinking: BTreeSet::new(),
            state,
            config,
        })
    }

    // Queries

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn status(&self) -> SessionStatus {
        self.state.status()
    }

    /// Sentinel until the relay accepted the join
    pub fn local_peer_id(&self) -> PeerId {
        self.state.local_id()
    }

    pub fn session_ready(&self) -> bool {
        self.state.session_ready()
    }

    /// `current_turn` is the seat the game logic says should act now
    pub fn is_my_turn(&self, current_turn: Role) -> bool {
        GameSync::is_my_turn(&self.state, current_turn)
    }

    pub fn pending_swap(&self) -> Option<&PendingSwapRequest> {
        self.roles.pending_swap()
    }

    pub fn pending_undo(&self) -> Option<&PendingUndo> {
        self.game.pending_undo()
    }

    pub fn channel_state(&self, peer: PeerId) -> ChannelState {
        self.links.channel_state(peer)
    }

    pub fn signaling_status(&self) -> SignalingStatus {
        self.signaling.status()
    }

    pub fn relay(&self) -> &R {
        self.signaling.relay()
    }

    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    // Lifecycle

    pub fn join(&mut self, session_code: &str, display_name: &str) -> Result<()> {
        if let Some(code) = self.state.session_code() {
            return Err(P2PError::AlreadyJoined(code.to_string()));
        }
        let session_code = session_code.trim();
        if session_code.is_empty() {
            return Err(P2PError::ConnectionFailed(
                "session code is required".to_string(),
            ));
        }

        let mut state = SessionState::new(display_name.trim().to_string())?;
        state.begin(session_code.to_string());
        self.state = state;
        self.peer_id = PeerId::random();
        self.links.set_local_id(self.peer_id);
        self.clear_protocol_state();
        self.known_roles = self.state.roles();
        self.was_ready = false;

        tracing::info!("🟢 Joining {} as {}", session_code, self.state.local().display_name());
        self.signaling.join(
            session_code.to_string(),
            self.peer_id,
            self.state.local().display_name().to_string(),
            Instant::now(),
        )?;
        self.emit_status(None);
        Ok(())
    }

    /// Tear everything down; registered handlers survive
    pub fn leave(&mut self) {
        if self.state.session_code().is_none() {
            return;
        }
        tracing::info!("🔴 Leaving session");
        self.signaling.leave();
        self.signaling.drain_events();
        self.links.close_all();
        self.clear_protocol_state();
        self.state.reset();
        self.state.set_error(None);
        self.peer_id = PeerId::LOCAL;
        self.emit_status(None);
        self.publish_changes();
    }

    pub fn poll(&mut self) -> usize {
        self.poll_at(Instant::now())
    }

    /// Run every pending transition; returns the number of events handled
    pub fn poll_at(&mut self, now: Instant) -> usize {
        let mut processed = 0;

        self.signaling.poll(now);
        for event in self.signaling.drain_events() {
            processed += 1;
            self.on_signaling_event(event);
        }

        self.links.poll();
        for event in self.links.drain_events() {
            processed += 1;
            self.on_link_event(event);
        }

        self.publish_changes();
        processed
    }

    // Application messages

    /// Send an application action to one peer or, without a target, to all
    pub fn send(
        &mut self,
        action: &str,
        payload: Value,
        target: Option<PeerId>,
    ) -> Result<Vec<(PeerId, DeliveryRoute)>> {
        if is_reserved(action) {
            return Err(P2PError::ReservedAction(action.to_string()));
        }
        if self.state.session_code().is_none() {
            return Err(P2PError::NotJoined);
        }
        let data = ActionData::new(action, payload)?;
        self.bus
            .send(&mut self.links, &mut self.signaling, &data, target)
    }

    /// Returns how many buffered envelopes were replayed into `handler`
    pub fn register_handler<F>(&mut self, action: &str, handler: F) -> Result<usize>
    where
        F: FnMut(&Envelope) + Send + 'static,
    {
        if is_reserved(action) {
            return Err(P2PError::ReservedAction(action.to_string()));
        }
        Ok(self.bus.register_handler(action, Box::new(handler)))
    }

    pub fn unregister_handler(&mut self, action: &str) -> bool {
        self.bus.unregister_handler(action)
    }

    // Seats

    /// Claim a vacant seat, or stand up with `Role::Observer`
    pub fn request_seat(&mut self, role: Role) -> bool {
        let result = self.roles.request_seat(&mut self.state, role);
        self.finish_role_request("Seat request", result)
    }

    pub fn request_swap(&mut self, target: PeerId) -> bool {
        let result = self.roles.request_swap(&self.state, target);
        self.finish_role_request("Swap request", result)
    }

    pub fn respond_swap(&mut self, approve: bool) -> bool {
        let result = self.roles.respond_swap(&mut self.state, approve);
        self.finish_role_request("Swap response", result)
    }

    // Game handshakes

    pub fn announce_timeout(&mut self, loser: Role) -> bool {
        let result = self.game.announce_timeout(&self.state, loser);
        self.finish_game_request("Timeout", result)
    }

    pub fn request_undo(&mut self, moves: u32) -> bool {
        let result = self.game.request_undo(&self.state, moves);
        self.finish_game_request("Undo request", result)
    }

    pub fn respond_undo(&mut self, approve: bool) -> bool {
        let result = self.game.respond_undo(&self.state, approve);
        self.finish_game_request("Undo response", result)
    }

    pub fn reset_round(&mut self) {
        self.game.reset_round();
    }

    // Internals

    fn finish_role_request<E: std::fmt::Display>(
        &mut self,
        what: &str,
        result: std::result::Result<Negotiation, E>,
    ) -> bool {
        match result {
            Ok(step) => {
                self.apply_negotiation(step);
                self.publish_changes();
                true
            }
            Err(e) => {
                tracing::info!("❌ {} refused: {}", what, e);
                false
            }
        }
    }

    fn finish_game_request<E: std::fmt::Display>(
        &mut self,
        what: &str,
        result: std::result::Result<GameStep, E>,
    ) -> bool {
        match result {
            Ok(step) => {
                self.apply_game_step(step);
                true
            }
            Err(e) => {
                tracing::info!("❌ {} refused: {}", what, e);
                false
            }
        }
    }

    fn on_signaling_event(&mut self, event: SignalingEvent) {
        match event {
            SignalingEvent::StatusChanged { status, error } => match status {
                SignalingStatus::Connecting => self.set_status(SessionStatus::Connecting, error),
                SignalingStatus::Disconnected => {
                    self.set_status(SessionStatus::Disconnected, error)
                }
                // Reported as connected once the join is accepted
                SignalingStatus::Connected => {}
            },

            SignalingEvent::Joined { members } => self.on_joined(members),

            SignalingEvent::MembershipRestored { members } => self.on_membership_restored(members),

            SignalingEvent::JoinRejected { reason } => {
                tracing::warn!("❌ Relay refused the join: {}", reason);
                self.links.close_all();
                self.clear_protocol_state();
                self.state.reset();
                self.peer_id = PeerId::LOCAL;
            }

            SignalingEvent::PeerJoined { peer_id, name } => {
                self.add_member(peer_id, &name);
                if !self.links.is_open(peer_id) {
                    if let Err(e) = self.links.create_link(peer_id, &name, true) {
                        tracing::warn!("❌ Could not start link to {}: {}", peer_id, e);
                    }
                }
                let step = self.roles.on_peer_joined(&self.state, peer_id);
                self.apply_negotiation(step);
            }

            SignalingEvent::PeerLeft(peer) => {
                if self.links.is_open(peer) {
                    tracing::debug!("{} left the relay but its direct link is up", peer);
                } else {
                    self.drop_participant(peer);
                }
            }

            SignalingEvent::SetupMessage { from, payload } => {
                if let Err(e) = self.links.handle_setup_message(from, payload) {
                    tracing::warn!("❌ Dropping setup message from {}: {}", from, e);
                }
            }

            SignalingEvent::Message { from, data } => {
                self.on_envelope(Envelope::new(data, from, DeliveryRoute::Relay));
            }
        }
    }

    fn on_joined(&mut self, members: Vec<MemberInfo>) {
        self.state.confirm_local_id(self.peer_id);
        for member in &members {
            self.add_member(member.peer_id, &member.name);
            // The members already present make the offers
            if let Err(e) = self.links.create_link(member.peer_id, &member.name, false) {
                tracing::warn!("❌ Could not prepare link to {}: {}", member.peer_id, e);
            }
        }

        self.set_status(SessionStatus::Connected, None);

        let step = self.roles.on_joined(&mut self.state, !members.is_empty());
        self.apply_negotiation(step);
    }

    fn on_membership_restored(&mut self, members: Vec<MemberInfo>) {
        self.set_status(SessionStatus::Connected, None);

        let listed: BTreeSet<PeerId> = members.iter().map(|m| m.peer_id).collect();
        for peer in self.state.remote_ids() {
            if !listed.contains(&peer) && !self.links.is_open(peer) {
                self.drop_participant(peer);
            }
        }
        for member in &members {
            if self.add_member(member.peer_id, &member.name)
                && !self.links.is_open(member.peer_id)
            {
                if let Err(e) = self.links.create_link(member.peer_id, &member.name, false) {
                    tracing::warn!("❌ Could not prepare link to {}: {}", member.peer_id, e);
                }
            }
        }

        let step = self.roles.on_membership_restored(&self.state);
        self.apply_negotiation(step);
    }

    fn on_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Signal { peer, message } => {
                if let Err(e) = self.signaling.send_setup_message(peer, &message) {
                    tracing::warn!("❌ Could not signal {} to {}: {}", message.kind_name(), peer, e);
                }
            }
            LinkEvent::ChannelOpen(peer) => {
                self.relinking.remove(&peer);
                self.events.push(SessionEvent::LinkOpened(peer));
            }
            LinkEvent::Message { peer, data } => match ActionData::from_bytes(&data) {
                Ok(data) => self.on_envelope(Envelope::new(data, peer, DeliveryRoute::Direct)),
                Err(e) => tracing::warn!("❌ Dropping malformed envelope from {}: {}", peer, e),
            },
            LinkEvent::LinkLost(peer) => {
                self.events.push(SessionEvent::LinkLost(peer));
                let listed = self.signaling.members().get(&peer).cloned();
                match listed {
                    Some(name) => self.relink(peer, &name),
                    None => self.drop_participant(peer),
                }
            }
        }
    }

    fn on_envelope(&mut self, envelope: Envelope) {
        let sender = envelope.sender;
        match envelope.action.as_str() {
            ROLE_ACTION => match serde_json::from_value::<RoleMessage>(envelope.payload) {
                Ok(message) => {
                    tracing::debug!("📥 Role message from {}", sender);
                    let step = self.roles.on_message(&mut self.state, sender, message);
                    self.apply_negotiation(step);
                }
                Err(e) => tracing::warn!("❌ Malformed role message from {}: {}", sender, e),
            },
            GAME_ACTION => match serde_json::from_value::<GameMessage>(envelope.payload) {
                Ok(message) => {
                    let step = self.game.on_message(&self.state, sender, message);
                    self.apply_game_step(step);
                }
                Err(e) => tracing::warn!("❌ Malformed game message from {}: {}", sender, e),
            },
            _ => {
                self.bus.dispatch(envelope);
            }
        }
    }

    /// Start one fresh discovery cycle with a peer the relay still lists.
    ///
    /// The peer keeps its role and traffic falls back to the relay. The
    /// lower id offers. A second loss before the channel reopens leaves the
    /// peer relay-only.
    fn relink(&mut self, peer: PeerId, name: &str) {
        if !self.relinking.insert(peer) {
            tracing::info!("🔴 Direct link to {} lost again, staying on the relay", name);
            return;
        }
        let is_offerer = self.peer_id < peer;
        tracing::info!("🔄 Rebuilding direct link to {}", name);
        if let Err(e) = self.links.create_link(peer, name, is_offerer) {
            tracing::warn!("❌ Could not rebuild link to {}: {}", peer, e);
        }
    }

    /// Returns true if the member was not known yet
    fn add_member(&mut self, peer: PeerId, name: &str) -> bool {
        let added = self.state.upsert_member(peer, name.to_string());
        if added {
            tracing::info!("🟢 {} joined", name);
            self.events.push(SessionEvent::ParticipantJoined {
                peer_id: peer,
                display_name: name.to_string(),
            });
        }
        added
    }

    /// Forget everything tied to the current membership; handlers survive
    fn clear_protocol_state(&mut self) {
        self.bus.clear_buffers();
        self.roles.reset();
        self.game.reset_round();
        self.relinking.clear();
    }

    fn drop_participant(&mut self, peer: PeerId) {
        self.links.close_link(peer);
        self.relinking.remove(&peer);
        let Some(display_name) = self
            .state
            .participant(peer)
            .map(|p| p.display_name().to_string())
        else {
            return;
        };

        tracing::info!("🔴 {} left", display_name);
        let step = self.roles.on_peer_lost(&mut self.state, peer);
        self.events.push(SessionEvent::ParticipantLeft {
            peer_id: peer,
            display_name,
        });
        self.apply_negotiation(step);
        let step = self.game.on_peer_lost(peer);
        self.apply_game_step(step);
    }

    fn apply_negotiation(&mut self, step: Negotiation) {
        for outbound in step.outbound {
            self.send_protocol(ROLE_ACTION, &outbound.message, outbound.to);
        }
        for notice in step.notices {
            self.events.push(match notice {
                RoleNotice::SwapRequested(request) => SessionEvent::SwapRequested(request),
                RoleNotice::SwapResolved { with, approved } => {
                    SessionEvent::SwapResolved { with, approved }
                }
            });
        }
    }

    fn apply_game_step(&mut self, step: GameStep) {
        for outbound in step.outbound {
            self.send_protocol(GAME_ACTION, &outbound.message, outbound.to);
        }
        for notice in step.notices {
            self.events.push(match notice {
                GameNotice::TimedOut {
                    loser,
                    announced_by,
                } => SessionEvent::TimedOut {
                    loser,
                    announced_by,
                },
                GameNotice::UndoRequested(request) => SessionEvent::UndoRequested(request),
                GameNotice::UndoApplied { moves, requester } => {
                    SessionEvent::UndoApplied { moves, requester }
                }
                GameNotice::UndoRejected { moves } => SessionEvent::UndoRejected { moves },
            });
        }
    }

    fn send_protocol<M: Serialize>(&mut self, action: &str, message: &M, to: Option<PeerId>) {
        let payload = match serde_json::to_value(message) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!("❌ Could not encode {} message: {}", action, e);
                return;
            }
        };
        let data = ActionData {
            action: action.to_string(),
            payload,
        };
        if let Err(e) = self
            .bus
            .send(&mut self.links, &mut self.signaling, &data, to)
        {
            tracing::warn!("❌ Failed to send {} message: {}", action, e);
        }
    }

    fn set_status(&mut self, status: SessionStatus, error: Option<String>) {
        let unchanged = self.state.status() == status && error.is_none();
        self.state.set_status(status);
        self.state.set_error(error.clone());
        if !unchanged {
            self.emit_status(error);
        }
    }

    fn emit_status(&mut self, error: Option<String>) {
        self.events.push(SessionEvent::StatusChanged {
            status: self.state.status(),
            error,
        });
    }

    /// Turn roster differences since the last call into events
    fn publish_changes(&mut self) {
        let roles = self.state.roles();
        for (peer, role) in &roles {
            let before = self
                .known_roles
                .get(peer)
                .copied()
                .unwrap_or(Role::Observer);
            if before != *role {
                tracing::info!("👑 {} is now {}", peer, role);
                self.events.push(SessionEvent::RoleChanged {
                    peer_id: *peer,
                    from: before,
                    to: *role,
                });
            }
        }
        self.known_roles = roles;

        let ready = self.state.session_ready();
        if ready != self.was_ready {
            tracing::info!("{} Session ready: {}", if ready { "🟢" } else { "🔴" }, ready);
            self.was_ready = ready;
            self.events.push(SessionEvent::ReadinessChanged(ready));
        }
    }
}
