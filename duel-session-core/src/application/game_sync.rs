use super::Outbound;
use crate::domain::{PeerId, Role, SessionState};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Handshakes between the two seats that sit beside the opaque game actions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GameMessage {
    /// The sender's move clock ran out for `loser`
    Timeout { loser: Role },

    /// Ask the opponent to take back the last `moves` moves
    UndoRequest { moves: u32 },

    UndoResponse {
        approved: bool,
        moves: u32,
        requester: PeerId,
    },
}

/// An undo request from the opponent, waiting for our answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingUndo {
    pub from: PeerId,
    pub moves: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GameNotice {
    /// The round was decided by the clock. Not cross-checked between peers.
    TimedOut { loser: Role, announced_by: PeerId },
    UndoRequested(PendingUndo),
    /// Roll back `moves` moves locally
    UndoApplied { moves: u32, requester: PeerId },
    UndoRejected { moves: u32 },
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct GameStep {
    pub outbound: Vec<Outbound<GameMessage>>,
    pub notices: Vec<GameNotice>,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum GameError {
    #[error("Only seated participants can do this")]
    NotSeated,

    #[error("Both seats must be occupied")]
    NotReady,

    #[error("The round was already decided ({0} lost on time)")]
    AlreadyDecided(Role),

    #[error("{0} is not a seat")]
    NotASeat(Role),

    #[error("An undo request is already pending")]
    UndoPending,

    #[error("No undo request to respond to")]
    NoPendingUndo,

    #[error("Undo must cover at least one move")]
    NoMoves,
}

/// Turn predicate plus the timeout and undo handshakes
#[derive(Debug, Default)]
pub struct GameSync {
    decided: Option<Role>,
    /// Opponent asked and number of moves
    outgoing_undo: Option<(PeerId, u32)>,
    incoming_undo: Option<PendingUndo>,
}

impl GameSync {
    pub fn new() -> Self {
        Self::default()
    }

    /// Computed locally from the roster and the turn the game logic reports
    pub fn is_my_turn(state: &SessionState, current_turn: Role) -> bool {
        let local = state.local_role();
        state.session_ready() && local.is_seat() && current_turn == local
    }

    pub fn decided(&self) -> Option<Role> {
        self.decided
    }

    pub fn pending_undo(&self) -> Option<&PendingUndo> {
        self.incoming_undo.as_ref()
    }

    /// Moves we asked to take back, while waiting for the answer
    pub fn outgoing_undo(&self) -> Option<u32> {
        self.outgoing_undo.map(|(_, moves)| moves)
    }

    /// Start a new round
    pub fn reset_round(&mut self) {
        *self = Self::default();
    }

    /// Our clock ran out for `loser`; tell everyone
    pub fn announce_timeout(
        &mut self,
        state: &SessionState,
        loser: Role,
    ) -> Result<GameStep, GameError> {
        if !loser.is_seat() {
            return Err(GameError::NotASeat(loser));
        }
        if !state.local_role().is_seat() {
            return Err(GameError::NotSeated);
        }
        if let Some(decided) = self.decided {
            return Err(GameError::AlreadyDecided(decided));
        }

        tracing::info!("⏰ Time is up for {}", loser);
        self.decided = Some(loser);
        Ok(GameStep {
            outbound: vec![Outbound::broadcast(GameMessage::Timeout { loser })],
            notices: vec![GameNotice::TimedOut {
                loser,
                announced_by: state.local_id(),
            }],
        })
    }

    pub fn request_undo(&mut self, state: &SessionState, moves: u32) -> Result<GameStep, GameError> {
        if moves == 0 {
            return Err(GameError::NoMoves);
        }
        let Some(opponent_role) = state.local_role().opponent() else {
            return Err(GameError::NotSeated);
        };
        if self.outgoing_undo.is_some() || self.incoming_undo.is_some() {
            return Err(GameError::UndoPending);
        }
        let opponent = state
            .occupant(opponent_role)
            .map(|p| p.id())
            .ok_or(GameError::NotReady)?;

        tracing::info!("↩️ Asking {} to take back {} move(s)", opponent, moves);
        self.outgoing_undo = Some((opponent, moves));
        Ok(GameStep {
            outbound: vec![Outbound::to(opponent, GameMessage::UndoRequest { moves })],
            notices: Vec::new(),
        })
    }

    pub fn respond_undo(&mut self, state: &SessionState, approve: bool) -> Result<GameStep, GameError> {
        let request = self.incoming_undo.take().ok_or(GameError::NoPendingUndo)?;
        if !state.contains(request.from) {
            return Err(GameError::NoPendingUndo);
        }
        let response = GameMessage::UndoResponse {
            approved: approve,
            moves: request.moves,
            requester: request.from,
        };

        let mut step = GameStep::default();
        if approve {
            tracing::info!("↩️ Undo of {} move(s) approved", request.moves);
            step.outbound.push(Outbound::broadcast(response));
            step.notices.push(GameNotice::UndoApplied {
                moves: request.moves,
                requester: request.from,
            });
        } else {
            tracing::info!("↩️ Undo of {} move(s) rejected", request.moves);
            step.outbound.push(Outbound::to(request.from, response));
        }
        Ok(step)
    }

    pub fn on_message(&mut self, state: &SessionState, from: PeerId, message: GameMessage) -> GameStep {
        let mut step = GameStep::default();
        match message {
            GameMessage::Timeout { loser } => match self.decided {
                None => {
                    tracing::info!("⏰ {} announced {} lost on time", from, loser);
                    self.decided = Some(loser);
                    step.notices.push(GameNotice::TimedOut {
                        loser,
                        announced_by: from,
                    });
                }
                Some(decided) if decided != loser => {
                    tracing::warn!(
                        "⏰ Clocks disagree: we had {} losing, {} says {}",
                        decided,
                        from,
                        loser
                    );
                }
                Some(_) => {}
            },

            GameMessage::UndoRequest { moves } => {
                let from_opponent = state
                    .local_role()
                    .opponent()
                    .and_then(|seat| state.occupant(seat))
                    .is_some_and(|p| p.id() == from);
                if !from_opponent {
                    tracing::debug!("Undo request from {} who is not our opponent", from);
                    return step;
                }
                if self.incoming_undo.is_some() || self.outgoing_undo.is_some() || moves == 0 {
                    step.outbound.push(Outbound::to(
                        from,
                        GameMessage::UndoResponse {
                            approved: false,
                            moves,
                            requester: from,
                        },
                    ));
                    return step;
                }
                let request = PendingUndo { from, moves };
                self.incoming_undo = Some(request);
                step.notices.push(GameNotice::UndoRequested(request));
            }

            GameMessage::UndoResponse {
                approved,
                moves,
                requester,
            } => {
                if requester == state.local_id() {
                    if !self.outgoing_undo.is_some_and(|(asked, _)| asked == from) {
                        tracing::debug!("Undo response from {} without a request", from);
                        return step;
                    }
                    self.outgoing_undo = None;
                    step.notices.push(if approved {
                        GameNotice::UndoApplied { moves, requester }
                    } else {
                        GameNotice::UndoRejected { moves }
                    });
                } else if approved {
                    step.notices.push(GameNotice::UndoApplied { moves, requester });
                }
            }
        }
        step
    }

    /// Forget requests involving a departed participant
    pub fn on_peer_lost(&mut self, peer: PeerId) -> GameStep {
        let mut step = GameStep::default();
        if self.incoming_undo.is_some_and(|u| u.from == peer) {
            self.incoming_undo = None;
        }
        if let Some((_, moves)) = self.outgoing_undo.filter(|(asked, _)| *asked == peer) {
            self.outgoing_undo = None;
            step.notices.push(GameNotice::UndoRejected { moves });
        }
        step
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Participant, Timestamp};

    fn seated(role: Role) -> (SessionState, PeerId) {
        let mut state = SessionState::new("me".to_string()).unwrap();
        state.begin_at("ROOM1".to_string(), Timestamp::from_millis(100));
        state.confirm_local_id(PeerId::random());
        state.place(state.local_id(), role);

        let other = Participant::provisional(PeerId::random(), "other".to_string())
            .with_joined_at(Timestamp::from_millis(200))
            .with_role(role.opponent().unwrap_or(Role::SeatA));
        let other_id = other.id();
        state.apply_remote(&other);
        (state, other_id)
    }

    #[test]
    fn test_is_my_turn() {
        let (state, _) = seated(Role::SeatA);

        assert!(GameSync::is_my_turn(&state, Role::SeatA));
        assert!(!GameSync::is_my_turn(&state, Role::SeatB));
    }

    #[test]
    fn test_never_my_turn_before_session_ready() {
        let mut state = SessionState::new("me".to_string()).unwrap();
        state.begin("ROOM1".to_string());
        state.confirm_local_id(PeerId::random());
        state.place(state.local_id(), Role::SeatA);

        assert!(!GameSync::is_my_turn(&state, Role::SeatA));
    }

    #[test]
    fn test_observer_never_has_the_turn() {
        let (mut state, _) = seated(Role::SeatA);
        state.place(state.local_id(), Role::Observer);

        assert!(!GameSync::is_my_turn(&state, Role::Observer));
        assert!(!GameSync::is_my_turn(&state, Role::SeatA));
    }

    #[test]
    fn test_timeout_is_announced_once() {
        let (state, other) = seated(Role::SeatA);
        let mut game = GameSync::new();

        let step = game.announce_timeout(&state, Role::SeatB).unwrap();
        assert_eq!(step.outbound.len(), 1);
        assert_eq!(step.outbound[0].to, None);
        assert_eq!(game.decided(), Some(Role::SeatB));

        assert_eq!(
            game.announce_timeout(&state, Role::SeatA).unwrap_err(),
            GameError::AlreadyDecided(Role::SeatB)
        );

        // The other side's late announcement is dropped
        let late = game.on_message(&state, other, GameMessage::Timeout { loser: Role::SeatA });
        assert!(late.notices.is_empty());
    }

    #[test]
    fn test_remote_timeout_is_adopted() {
        let (state, other) = seated(Role::SeatA);
        let mut game = GameSync::new();

        let step = game.on_message(&state, other, GameMessage::Timeout { loser: Role::SeatA });

        assert_eq!(
            step.notices,
            vec![GameNotice::TimedOut {
                loser: Role::SeatA,
                announced_by: other
            }]
        );
        game.reset_round();
        assert_eq!(game.decided(), None);
    }

    #[test]
    fn test_observer_cannot_announce_timeout() {
        let (mut state, _) = seated(Role::SeatA);
        state.place(state.local_id(), Role::Observer);
        let mut game = GameSync::new();

        assert_eq!(
            game.announce_timeout(&state, Role::SeatB).unwrap_err(),
            GameError::NotSeated
        );
        assert_eq!(
            game.announce_timeout(&state, Role::Observer).unwrap_err(),
            GameError::NotASeat(Role::Observer)
        );
    }

    #[test]
    fn test_undo_round_trip_approved() {
        let (state_a, b_id) = seated(Role::SeatA);
        let mut a = GameSync::new();
        let mut b_state = SessionState::new("b".to_string()).unwrap();
        b_state.begin_at("ROOM1".to_string(), Timestamp::from_millis(200));
        b_state.confirm_local_id(b_id);
        b_state.place(b_id, Role::SeatB);
        b_state.apply_remote(&state_a.local().clone());
        let mut b = GameSync::new();

        let request = a.request_undo(&state_a, 2).unwrap();
        assert_eq!(request.outbound[0].to, Some(b_id));

        let received = b.on_message(&b_state, state_a.local_id(), request.outbound[0].message.clone());
        assert_eq!(
            received.notices,
            vec![GameNotice::UndoRequested(PendingUndo {
                from: state_a.local_id(),
                moves: 2
            })]
        );

        let answer = b.respond_undo(&b_state, true).unwrap();
        assert_eq!(answer.outbound[0].to, None);
        assert!(matches!(answer.notices[0], GameNotice::UndoApplied { moves: 2, .. }));

        let applied = a.on_message(&state_a, b_id, answer.outbound[0].message.clone());
        assert!(matches!(applied.notices[0], GameNotice::UndoApplied { moves: 2, .. }));
        assert!(a.outgoing_undo().is_none());
        assert!(b.pending_undo().is_none());
    }

    #[test]
    fn test_undo_rejected_goes_back_to_requester_only() {
        let (state, other) = seated(Role::SeatB);
        let mut game = GameSync::new();

        game.on_message(&state, other, GameMessage::UndoRequest { moves: 1 });
        let answer = game.respond_undo(&state, false).unwrap();

        assert_eq!(answer.outbound[0].to, Some(other));
        assert!(answer.notices.is_empty());
    }

    #[test]
    fn test_undo_request_validation() {
        let (state, other) = seated(Role::SeatA);
        let mut game = GameSync::new();

        assert_eq!(game.request_undo(&state, 0).unwrap_err(), GameError::NoMoves);
        assert!(game.request_undo(&state, 1).is_ok());
        assert_eq!(game.request_undo(&state, 1).unwrap_err(), GameError::UndoPending);
        assert_eq!(game.respond_undo(&state, true).unwrap_err(), GameError::NoPendingUndo);

        let step = game.on_peer_lost(other);
        assert_eq!(step.notices, vec![GameNotice::UndoRejected { moves: 1 }]);
        assert!(game.outgoing_undo().is_none());
    }

    #[test]
    fn test_undo_request_from_observer_is_ignored() {
        let (state, _) = seated(Role::SeatA);
        let mut game = GameSync::new();

        let step = game.on_message(&state, PeerId::random(), GameMessage::UndoRequest { moves: 1 });

        assert!(step.notices.is_empty());
        assert!(game.pending_undo().is_none());
    }

    #[test]
    fn test_observers_apply_approved_undo() {
        let (mut state, _) = seated(Role::SeatA);
        state.place(state.local_id(), Role::Observer);
        let mut game = GameSync::new();

        let step = game.on_message(
            &state,
            PeerId::random(),
            GameMessage::UndoResponse {
                approved: true,
                moves: 1,
                requester: PeerId::random(),
            },
        );
        assert!(matches!(step.notices[0], GameNotice::UndoApplied { moves: 1, .. }));
    }
}
