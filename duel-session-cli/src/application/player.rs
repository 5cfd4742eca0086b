use crate::application::commands::{PlayerCommand, HELP};
use crate::infrastructure::error::Result;
use duel_session_core::Role;
use duel_session_p2p::infrastructure::{PeerConnector, RelayConnection};
use duel_session_p2p::{Envelope, PeerId, Session, SessionEvent};
use serde_json::json;
use std::sync::{Arc, Mutex};

pub const CHAT_ACTION: &str = "chat";
pub const MOVE_ACTION: &str = "move";

/// Interactive participant: turns typed commands into session calls and
/// session events into printable lines.
pub struct Player<R: RelayConnection, C: PeerConnector> {
    session: Session<R, C>,
    inbox: Arc<Mutex<Vec<Envelope>>>,
    quit: bool,
}

impl<R: RelayConnection, C: PeerConnector> Player<R, C> {
    pub fn new(mut session: Session<R, C>) -> Result<Self> {
        let inbox = Arc::new(Mutex::new(Vec::new()));
        for action in [CHAT_ACTION, MOVE_ACTION] {
            let inbox = inbox.clone();
            session.register_handler(action, move |envelope: &Envelope| {
                if let Ok(mut inbox) = inbox.lock() {
                    inbox.push(envelope.clone());
                }
            })?;
        }
        Ok(Self {
            session,
            inbox,
            quit: false,
        })
    }

    pub fn session(&self) -> &Session<R, C> {
        &self.session
    }

    pub fn has_quit(&self) -> bool {
        self.quit
    }

    pub fn join(&mut self, session_code: &str, display_name: &str) -> Result<()> {
        self.session.join(session_code, display_name)?;
        Ok(())
    }

    pub fn execute(&mut self, command: PlayerCommand) -> Vec<String> {
        let refused = |what: &str| vec![format!("❌ {} refused", what)];
        match command {
            PlayerCommand::Say(text) => self.send(CHAT_ACTION, json!({ "text": text })),
            PlayerCommand::Move(text) => self.send(MOVE_ACTION, json!({ "text": text })),
            PlayerCommand::Seat(role) => {
                if self.session.request_seat(role) {
                    vec![format!("👑 Asking for {}", role)]
                } else {
                    refused("Seat request")
                }
            }
            PlayerCommand::Swap(name) => match self.find_by_name(&name) {
                Some(peer) if self.session.request_swap(peer) => {
                    vec![format!("🔄 Asked {} to swap", name)]
                }
                Some(_) => refused("Swap request"),
                None => vec![format!("❌ Nobody called '{}'", name)],
            },
            PlayerCommand::Approve => self.answer_swap(true),
            PlayerCommand::Reject => self.answer_swap(false),
            PlayerCommand::Undo(moves) => {
                if self.session.request_undo(moves) {
                    vec![format!("↩️ Asked to take back {} move(s)", moves)]
                } else {
                    refused("Undo request")
                }
            }
            PlayerCommand::AllowUndo => self.answer_undo(true),
            PlayerCommand::DenyUndo => self.answer_undo(false),
            PlayerCommand::Timeout(loser) => {
                if self.session.announce_timeout(loser) {
                    Vec::new()
                } else {
                    refused("Timeout")
                }
            }
            PlayerCommand::Roster => self.roster(),
            PlayerCommand::Help => HELP.lines().map(str::to_string).collect(),
            PlayerCommand::Quit => {
                self.session.leave();
                self.quit = true;
                vec!["🔴 Left the session".to_string()]
            }
        }
    }

    /// Drive the session once and describe what happened
    pub fn poll(&mut self) -> Vec<String> {
        self.session.poll();
        let mut lines: Vec<String> = self
            .session
            .drain_events()
            .into_iter()
            .filter_map(|event| self.describe(event))
            .collect();

        let received = match self.inbox.lock() {
            Ok(mut inbox) => std::mem::take(&mut *inbox),
            Err(_) => Vec::new(),
        };
        for envelope in received {
            let from = self.name_of(envelope.sender);
            let text = envelope.payload["text"].as_str().unwrap_or_default().to_string();
            lines.push(match envelope.action.as_str() {
                MOVE_ACTION => format!("♟ {} played {}", from, text),
                _ => format!("💬 {}: {}", from, text),
            });
        }
        lines
    }

    pub fn roster(&self) -> Vec<String> {
        let state = self.session.state();
        let mut lines = vec![format!(
            "Session {} ({})",
            state.session_code().unwrap_or("-"),
            state.status()
        )];
        for participant in state.participants() {
            let you = if participant.id() == state.local_id() {
                " (you)"
            } else {
                ""
            };
            lines.push(format!(
                "  {:<9} {}{}",
                participant.role().to_string(),
                participant.display_name(),
                you
            ));
        }
        lines
    }

    fn answer_swap(&mut self, approve: bool) -> Vec<String> {
        if self.session.respond_swap(approve) {
            Vec::new()
        } else {
            vec!["❌ No swap request to answer".to_string()]
        }
    }

    fn answer_undo(&mut self, approve: bool) -> Vec<String> {
        if self.session.respond_undo(approve) {
            Vec::new()
        } else {
            vec!["❌ No undo request to answer".to_string()]
        }
    }

    fn send(&mut self, action: &str, payload: serde_json::Value) -> Vec<String> {
        match self.session.send(action, payload, None) {
            Ok(routes) if routes.is_empty() => vec!["Nobody else is here yet".to_string()],
            Ok(_) => Vec::new(),
            Err(e) => vec![format!("❌ {}", e)],
        }
    }

    fn find_by_name(&self, name: &str) -> Option<PeerId> {
        let state = self.session.state();
        state
            .participants()
            .into_iter()
            .find(|p| p.id() != state.local_id() && p.display_name().eq_ignore_ascii_case(name))
            .map(|p| p.id())
    }

    fn name_of(&self, peer: PeerId) -> String {
        self.session
            .state()
            .participant(peer)
            .map(|p| p.display_name().to_string())
            .unwrap_or_else(|| peer.to_string())
    }

    fn describe(&self, event: SessionEvent) -> Option<String> {
        let line = match event {
            SessionEvent::StatusChanged { status, error } => match error {
                Some(error) => format!("🔄 {} ({})", status, error),
                None => format!("🔄 {}", status),
            },
            SessionEvent::ParticipantJoined { display_name, .. } => {
                format!("🟢 {} joined", display_name)
            }
            SessionEvent::ParticipantLeft { display_name, .. } => {
                format!("🔴 {} left", display_name)
            }
            SessionEvent::RoleChanged { peer_id, to, .. } => {
                format!("👑 {} is now {}", self.name_of(peer_id), to)
            }
            SessionEvent::ReadinessChanged(true) => "🟢 Both seats taken, game on".to_string(),
            SessionEvent::ReadinessChanged(false) => "⏸ Waiting for a second player".to_string(),
            SessionEvent::SwapRequested(request) => format!(
                "🔄 {} ({}) wants your {}: approve or reject",
                request.from_display_name, request.from_role, request.to_role
            ),
            SessionEvent::SwapResolved { with, approved } => format!(
                "🔄 Swap with {} {}",
                self.name_of(with),
                if approved { "done" } else { "declined" }
            ),
            SessionEvent::TimedOut {
                loser,
                announced_by,
            } => format!(
                "⏰ {} ran out of time (called by {})",
                loser,
                self.name_of(announced_by)
            ),
            SessionEvent::UndoRequested(request) => format!(
                "↩️ {} wants to take back {} move(s): allow-undo or deny-undo",
                self.name_of(request.from),
                request.moves
            ),
            SessionEvent::UndoApplied { moves, requester } => format!(
                "↩️ Taking back {} move(s) for {}",
                moves,
                self.name_of(requester)
            ),
            SessionEvent::UndoRejected { moves } => {
                format!("↩️ Undo of {} move(s) declined", moves)
            }
            SessionEvent::LinkOpened(_) | SessionEvent::LinkLost(_) => return None,
        };
        Some(line)
    }

    /// Turn indicator for the prompt
    pub fn turn_hint(&self, current_turn: Role) -> &'static str {
        if self.session.is_my_turn(current_turn) {
            "your move"
        } else {
            ""
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duel_session_p2p::{
        MemoryConnector, MemoryPeerNetwork, MemoryRelay, MemoryRelayNetwork, SessionConfig,
    };

    type MemoryPlayer = Player<MemoryRelay, MemoryConnector>;

    fn player(relay: &MemoryRelayNetwork, peers: &MemoryPeerNetwork, name: &str) -> MemoryPlayer {
        let session =
            Session::new(SessionConfig::default(), relay.connection(), peers.connector()).unwrap();
        let mut player = Player::new(session).unwrap();
        player.join("ROOM1", name).unwrap();
        player
    }

    fn settle(players: &mut [&mut MemoryPlayer]) -> Vec<Vec<String>> {
        let mut output = vec![Vec::new(); players.len()];
        for _ in 0..30 {
            for (index, player) in players.iter_mut().enumerate() {
                output[index].extend(player.poll());
            }
        }
        output
    }

    #[test]
    fn test_chat_and_roster() {
        let relay = MemoryRelayNetwork::new();
        let peers = MemoryPeerNetwork::new();
        let mut alice = player(&relay, &peers, "Alice");
        settle(&mut [&mut alice]);
        let mut bob = player(&relay, &peers, "Bob");
        settle(&mut [&mut alice, &mut bob]);

        assert!(bob.execute(PlayerCommand::Say("hello".into())).is_empty());
        let output = settle(&mut [&mut alice, &mut bob]);
        assert!(output[0].contains(&"💬 Bob: hello".to_string()));

        let roster = alice.execute(PlayerCommand::Roster);
        assert_eq!(roster.len(), 3);
        assert!(roster.iter().any(|l| l.contains("SeatA") && l.contains("Alice (you)")));
        assert!(roster.iter().any(|l| l.contains("SeatB") && l.contains("Bob")));
    }

    #[test]
    fn test_swap_by_name() {
        let relay = MemoryRelayNetwork::new();
        let peers = MemoryPeerNetwork::new();
        let mut alice = player(&relay, &peers, "Alice");
        settle(&mut [&mut alice]);
        let mut bob = player(&relay, &peers, "Bob");
        settle(&mut [&mut alice, &mut bob]);

        assert_eq!(
            alice.execute(PlayerCommand::Swap("carol".into())),
            vec!["❌ Nobody called 'carol'".to_string()]
        );
        alice.execute(PlayerCommand::Swap("bob".into()));
        let output = settle(&mut [&mut alice, &mut bob]);
        assert!(output[1].iter().any(|l| l.contains("wants your SeatB")));

        bob.execute(PlayerCommand::Approve);
        settle(&mut [&mut alice, &mut bob]);
        assert_eq!(alice.session().state().local_role(), Role::SeatB);
        assert_eq!(bob.session().state().local_role(), Role::SeatA);
        assert_eq!(bob.turn_hint(Role::SeatA), "your move");
    }

    #[test]
    fn test_quit_leaves() {
        let relay = MemoryRelayNetwork::new();
        let peers = MemoryPeerNetwork::new();
        let mut alice = player(&relay, &peers, "Alice");
        settle(&mut [&mut alice]);

        alice.execute(PlayerCommand::Quit);
        assert!(alice.has_quit());
        assert!(relay.members("ROOM1").is_empty());
    }
}
