use super::Outbound;
use crate::domain::{Participant, PeerId, Role, SessionState};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Messages of the seat protocol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoleMessage {
    /// Full roster, sent by an existing member to a newcomer
    Roster { participants: Vec<Participant> },

    /// Request to hold a role
    Claim { claimant: Participant, role: Role },

    /// Answer to a claim: the role the claimant gets
    ClaimResponse { role: Role },

    /// A participant's own record after a role change
    Announce { participant: Participant },

    /// Ask the holder of `to_role` to trade places
    SwapRequest {
        from_role: Role,
        to_role: Role,
        display_name: String,
    },

    /// Outcome of a swap, records are post-swap when approved
    SwapResponse {
        approved: bool,
        requester: Participant,
        responder: Participant,
    },
}

/// A swap proposal received from another participant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSwapRequest {
    pub from_peer_id: PeerId,
    pub from_role: Role,
    pub to_role: Role,
    pub from_display_name: String,
}

/// A swap proposal we sent and are waiting on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapProposal {
    pub target: PeerId,
    pub from_role: Role,
    pub to_role: Role,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RoleNotice {
    SwapRequested(PendingSwapRequest),
    SwapResolved { with: PeerId, approved: bool },
}

/// Output of one protocol step
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Negotiation {
    pub outbound: Vec<Outbound<RoleMessage>>,
    pub notices: Vec<RoleNotice>,
}

impl Negotiation {
    fn send(&mut self, to: PeerId, message: RoleMessage) {
        self.outbound.push(Outbound::to(to, message));
    }

    fn broadcast(&mut self, message: RoleMessage) {
        self.outbound.push(Outbound::broadcast(message));
    }

    fn announce(&mut self, state: &SessionState) {
        self.broadcast(RoleMessage::Announce {
            participant: state.local().clone(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.outbound.is_empty() && self.notices.is_empty()
    }
}

/// Invalid local role requests
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum RoleError {
    #[error("Already holding {0}")]
    AlreadyHolding(Role),

    #[error("{0} is already taken")]
    SeatTaken(Role),

    #[error("A role claim is still waiting for an answer")]
    ClaimPending,

    #[error("A swap request is already pending")]
    SwapPending,

    #[error("Participant not found: {0}")]
    UnknownParticipant(PeerId),

    #[error("Cannot swap with a participant holding the same role")]
    SameRole,

    #[error("No swap request to respond to")]
    NoPendingSwap,

    #[error("Not joined to a session")]
    NotJoined,
}

#[derive(Debug, Clone)]
struct PendingClaim {
    role: Role,
    awaiting: BTreeSet<PeerId>,
}

/// Seat assignment for the local participant.
///
/// Every step takes the current [`SessionState`] explicitly and returns the
/// messages to send; nothing here does I/O.
#[derive(Debug, Default)]
pub struct RoleNegotiator {
    /// The local participant went through its initial seat assignment
    settled: bool,
    pending_claim: Option<PendingClaim>,
    outgoing_swap: Option<SwapProposal>,
    incoming_swap: Option<PendingSwapRequest>,
}

impl RoleNegotiator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_settled(&self) -> bool {
        self.settled
    }

    pub fn pending_claim(&self) -> Option<Role> {
        self.pending_claim.as_ref().map(|c| c.role)
    }

    pub fn pending_swap(&self) -> Option<&PendingSwapRequest> {
        self.incoming_swap.as_ref()
    }

    pub fn outgoing_swap(&self) -> Option<&SwapProposal> {
        self.outgoing_swap.as_ref()
    }

    /// Drop all negotiation state (leaving the session)
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// The relay accepted our join. The first member seats itself.
    pub fn on_joined(&mut self, state: &mut SessionState, others_present: bool) -> Negotiation {
        if !others_present {
            state.place(state.local_id(), Role::SeatA);
            self.settled = true;
            tracing::info!("👑 First member of the session, taking SeatA");
        } else {
            tracing::debug!("Waiting for a roster before claiming a role");
        }
        Negotiation::default()
    }

    /// Membership came back after a signaling reconnect
    pub fn on_membership_restored(&mut self, state: &SessionState) -> Negotiation {
        let mut step = Negotiation::default();
        if self.settled {
            step.announce(state);
        }
        step
    }

    /// A new member arrived; existing members hand it the roster
    pub fn on_peer_joined(&mut self, state: &SessionState, peer: PeerId) -> Negotiation {
        let mut step = Negotiation::default();
        if !self.settled {
            return step;
        }

        let participants = state
            .participants()
            .into_iter()
            .filter(|p| p.id() != peer)
            .cloned()
            .collect();
        step.send(peer, RoleMessage::Roster { participants });
        step
    }

    pub fn on_message(
        &mut self,
        state: &mut SessionState,
        from: PeerId,
        message: RoleMessage,
    ) -> Negotiation {
        match message {
            RoleMessage::Roster { participants } => self.handle_roster(state, from, participants),
            RoleMessage::Claim { claimant, role } => self.handle_claim(state, from, claimant, role),
            RoleMessage::ClaimResponse { role } => self.handle_claim_response(state, from, role),
            RoleMessage::Announce { participant } => {
                let mut step = Negotiation::default();
                self.absorb(state, &participant, &mut step);
                step
            }
            RoleMessage::SwapRequest {
                from_role,
                to_role,
                display_name,
            } => self.handle_swap_request(state, from, from_role, to_role, display_name),
            RoleMessage::SwapResponse {
                approved,
                requester,
                responder,
            } => self.handle_swap_response(state, from, approved, requester, responder),
        }
    }

    /// Claim `role` for the local participant and ask `responders` to confirm.
    ///
    /// The role is adopted right away; the first response decides the final
    /// role. With nobody to ask the claim stands as is.
    pub fn claim(
        &mut self,
        state: &mut SessionState,
        role: Role,
        responders: Vec<PeerId>,
    ) -> Negotiation {
        let mut step = Negotiation::default();
        state.place(state.local_id(), role);

        let awaiting: BTreeSet<PeerId> = responders.into_iter().collect();
        if awaiting.is_empty() {
            self.settled = true;
            self.pending_claim = None;
            return step;
        }

        tracing::info!("📤 Claiming {} from {} peer(s)", role, awaiting.len());
        let claim = RoleMessage::Claim {
            claimant: state.local().clone(),
            role,
        };
        if awaiting.len() == 1 {
            for peer in &awaiting {
                step.send(*peer, claim.clone());
            }
        } else {
            step.broadcast(claim);
        }
        self.pending_claim = Some(PendingClaim { role, awaiting });
        step
    }

    /// Local request to take a seat or to stand up
    pub fn request_seat(
        &mut self,
        state: &mut SessionState,
        role: Role,
    ) -> Result<Negotiation, RoleError> {
        if state.local_id().is_local_sentinel() {
            return Err(RoleError::NotJoined);
        }
        if self.pending_claim.is_some() {
            return Err(RoleError::ClaimPending);
        }
        if state.local_role() == role {
            return Err(RoleError::AlreadyHolding(role));
        }

        if !role.is_seat() {
            let mut step = Negotiation::default();
            state.place(state.local_id(), Role::Observer);
            self.settled = true;
            step.announce(state);
            return Ok(step);
        }

        if state.occupant(role).is_some() {
            return Err(RoleError::SeatTaken(role));
        }

        let responders = state.remote_ids();
        Ok(self.claim(state, role, responders))
    }

    /// Propose trading roles with `target`
    pub fn request_swap(
        &mut self,
        state: &SessionState,
        target: PeerId,
    ) -> Result<Negotiation, RoleError> {
        if self.outgoing_swap.is_some() || self.incoming_swap.is_some() {
            return Err(RoleError::SwapPending);
        }
        if self.pending_claim.is_some() {
            return Err(RoleError::ClaimPending);
        }
        let other = state
            .participant(target)
            .filter(|p| p.id() != state.local_id())
            .ok_or(RoleError::UnknownParticipant(target))?;
        if other.role() == state.local_role() {
            return Err(RoleError::SameRole);
        }

        let proposal = SwapProposal {
            target,
            from_role: state.local_role(),
            to_role: other.role(),
        };
        tracing::info!(
            "🔄 Asking {} to swap {} for {}",
            other.display_name(),
            proposal.from_role,
            proposal.to_role
        );

        let mut step = Negotiation::default();
        step.send(
            target,
            RoleMessage::SwapRequest {
                from_role: proposal.from_role,
                to_role: proposal.to_role,
                display_name: state.local().display_name().to_string(),
            },
        );
        self.outgoing_swap = Some(proposal);
        Ok(step)
    }

    /// Answer the pending swap request
    pub fn respond_swap(
        &mut self,
        state: &mut SessionState,
        approve: bool,
    ) -> Result<Negotiation, RoleError> {
        let request = self.incoming_swap.take().ok_or(RoleError::NoPendingSwap)?;
        let requester = request.from_peer_id;
        let mut step = Negotiation::default();

        let still_valid = state.local_role() == request.to_role
            && state
                .participant(requester)
                .is_some_and(|p| p.role() == request.from_role);
        let approved = approve && still_valid;

        if approved {
            state.exchange_roles(state.local_id(), requester);
            tracing::info!("🔄 Swap with {} approved, now {}", requester, state.local_role());
        } else {
            tracing::info!("🔄 Swap with {} rejected", requester);
        }

        let Some(requester_record) = state.participant(requester).cloned() else {
            return Ok(step);
        };
        let response = RoleMessage::SwapResponse {
            approved,
            requester: requester_record,
            responder: state.local().clone(),
        };
        if approved {
            step.broadcast(response);
        } else {
            step.send(requester, response);
        }
        step.notices.push(RoleNotice::SwapResolved {
            with: requester,
            approved,
        });
        Ok(step)
    }

    /// A participant is gone (relay left, or link lost with no relay presence)
    pub fn on_peer_lost(&mut self, state: &mut SessionState, peer: PeerId) -> Negotiation {
        let mut step = Negotiation::default();
        let removed = state.remove(peer);

        if let Some(claim) = self.pending_claim.as_mut() {
            claim.awaiting.remove(&peer);
            if claim.awaiting.is_empty() {
                tracing::info!("👑 No one left to answer our claim, keeping {}", claim.role);
                self.pending_claim = None;
                self.settled = true;
                step.announce(state);
            }
        }

        if self.outgoing_swap.is_some_and(|s| s.target == peer) {
            self.outgoing_swap = None;
            step.notices.push(RoleNotice::SwapResolved {
                with: peer,
                approved: false,
            });
        }
        if self
            .incoming_swap
            .as_ref()
            .is_some_and(|s| s.from_peer_id == peer)
        {
            self.incoming_swap = None;
        }

        if !self.settled && self.pending_claim.is_none() && state.remote_ids().is_empty() {
            tracing::info!("👑 Everyone else left before we got a roster, taking SeatA");
            let claim = self.claim(state, Role::SeatA, Vec::new());
            step.outbound.extend(claim.outbound);
            return step;
        }

        if let Some(removed) = removed {
            self.fill_vacancy(state, &removed, &mut step);
        }
        step
    }

    /// Claim a free seat if we are now the senior observer. Runs after every
    /// departure: an observer may only become senior once a later departure
    /// is processed.
    fn fill_vacancy(
        &mut self,
        state: &mut SessionState,
        removed: &Participant,
        step: &mut Negotiation,
    ) {
        if !self.settled || self.pending_claim.is_some() || !state.is_senior_observer() {
            return;
        }
        let vacated = removed.role();
        let seat = if vacated.is_seat() && state.occupant(vacated).is_none() {
            vacated
        } else {
            match state.first_vacant_seat() {
                Some(seat) => seat,
                None => return,
            }
        };

        tracing::info!(
            "👑 {} left, promoting ourselves to {}",
            removed.display_name(),
            seat
        );
        let responders = state.remote_ids();
        let promotion = self.claim(state, seat, responders);
        step.outbound.extend(promotion.outbound);
        if self.pending_claim.is_none() {
            step.announce(state);
        }
    }

    fn handle_roster(
        &mut self,
        state: &mut SessionState,
        from: PeerId,
        participants: Vec<Participant>,
    ) -> Negotiation {
        let mut step = Negotiation::default();
        tracing::debug!("📥 Roster of {} from {}", participants.len(), from);
        for record in &participants {
            self.absorb(state, record, &mut step);
        }

        if !self.settled && self.pending_claim.is_none() {
            let desired = state.first_vacant_seat().unwrap_or(Role::Observer);
            let claim = self.claim(state, desired, vec![from]);
            step.outbound.extend(claim.outbound);
        }
        step
    }

    fn handle_claim(
        &mut self,
        state: &mut SessionState,
        from: PeerId,
        claimant: Participant,
        role: Role,
    ) -> Negotiation {
        let mut step = Negotiation::default();
        if claimant.id() != from {
            tracing::warn!("❌ Claim for {} relayed by {}, ignoring", claimant.id(), from);
            return step;
        }

        // Learn who is asking without letting the claim itself seat them
        state.apply_remote(&claimant.clone().with_role(Role::Observer));

        let granted = if !role.is_seat() {
            Role::Observer
        } else {
            match state.occupant(role) {
                None => role,
                Some(_) => state.first_vacant_seat().unwrap_or(Role::Observer),
            }
        };
        let placed = state
            .place(from, granted)
            .map(|p| p.role)
            .unwrap_or(Role::Observer);

        tracing::info!(
            "👑 {} claimed {}, answering {}",
            claimant.display_name(),
            role,
            placed
        );
        step.send(from, RoleMessage::ClaimResponse { role: placed });
        step
    }

    fn handle_claim_response(
        &mut self,
        state: &mut SessionState,
        from: PeerId,
        role: Role,
    ) -> Negotiation {
        let mut step = Negotiation::default();
        let Some(claim) = self.pending_claim.as_ref() else {
            tracing::debug!("Late claim response from {}, ignoring", from);
            return step;
        };
        if !claim.awaiting.contains(&from) {
            tracing::debug!("Claim response from unexpected peer {}", from);
            return step;
        }

        let claimed = claim.role;
        self.pending_claim = None;
        self.settled = true;

        // The first answer wins, whatever it says
        let placed = state
            .place(state.local_id(), role)
            .map(|p| p.role)
            .unwrap_or(Role::Observer);
        if placed != claimed {
            tracing::info!("👑 Claimed {}, got {}", claimed, placed);
        } else {
            tracing::info!("👑 Confirmed as {}", placed);
        }
        step.announce(state);
        step
    }

    fn handle_swap_request(
        &mut self,
        state: &SessionState,
        from: PeerId,
        from_role: Role,
        to_role: Role,
        display_name: String,
    ) -> Negotiation {
        let mut step = Negotiation::default();
        let busy = self.incoming_swap.is_some() || self.outgoing_swap.is_some();
        let matches_view = state.local_role() == to_role
            && state
                .participant(from)
                .is_some_and(|p| p.role() == from_role);

        if busy || !matches_view || from_role == to_role {
            tracing::info!(
                "🔄 Declining swap from {} (busy: {}, valid: {})",
                display_name,
                busy,
                matches_view
            );
            if let Some(requester) = state.participant(from).cloned() {
                step.send(
                    from,
                    RoleMessage::SwapResponse {
                        approved: false,
                        requester,
                        responder: state.local().clone(),
                    },
                );
            }
            return step;
        }

        let request = PendingSwapRequest {
            from_peer_id: from,
            from_role,
            to_role,
            from_display_name: display_name,
        };
        tracing::info!(
            "🔄 {} wants to swap {} for our {}",
            request.from_display_name,
            from_role,
            to_role
        );
        self.incoming_swap = Some(request.clone());
        step.notices.push(RoleNotice::SwapRequested(request));
        step
    }

    fn handle_swap_response(
        &mut self,
        state: &mut SessionState,
        from: PeerId,
        approved: bool,
        requester: Participant,
        responder: Participant,
    ) -> Negotiation {
        let mut step = Negotiation::default();
        if responder.id() != from {
            tracing::warn!("❌ Swap response for {} sent by {}", responder.id(), from);
            return step;
        }

        if requester.id() == state.local_id() {
            if !self.outgoing_swap.is_some_and(|s| s.target == from) {
                tracing::debug!("Swap response from {} without a request", from);
                return step;
            }
            self.outgoing_swap = None;
            if approved {
                state.exchange_roles(state.local_id(), from);
                state.apply_exchange(&requester, &responder);
                tracing::info!("🔄 Swap approved, now {}", state.local_role());
            }
            step.notices.push(RoleNotice::SwapResolved {
                with: from,
                approved,
            });
        } else if approved {
            state.apply_exchange(&requester, &responder);
        }
        step
    }

    /// Merge a remote record; if it costs us our seat, tell everyone
    fn absorb(&mut self, state: &mut SessionState, record: &Participant, step: &mut Negotiation) {
        let local = state.local_id();
        if let Some(placement) = state.apply_remote(record) {
            if placement.displaced == Some(local) {
                tracing::info!("👑 Yielding our seat to {}", record.display_name());
                if self.pending_claim.is_some() {
                    self.pending_claim = None;
                    self.settled = true;
                }
                step.announce(state);
            }
        }
    }
}
