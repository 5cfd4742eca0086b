use crate::application::ReconnectPolicy;
use crate::domain::{ActionData, Backoff, PeerId, SetupMessage};
use crate::infrastructure::error::{P2PError, Result};
use crate::infrastructure::frames::{ClientFrame, MemberInfo, ServerFrame};
use crate::infrastructure::relay::{RelayConnection, RelayEvent};
use instant::Instant;
use serde_json::Value;
use std::collections::BTreeMap;

/// State of the relay connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingStatus {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the signaling client
#[derive(Debug, Clone, PartialEq)]
pub enum SignalingEvent {
    /// `error` carries the reason while retrying or after giving up
    StatusChanged {
        status: SignalingStatus,
        error: Option<String>,
    },
    /// First successful join; members exclude ourselves
    Joined { members: Vec<MemberInfo> },
    /// Join repeated after a reconnect succeeded
    MembershipRestored { members: Vec<MemberInfo> },
    JoinRejected { reason: String },
    PeerJoined { peer_id: PeerId, name: String },
    PeerLeft(PeerId),
    SetupMessage { from: PeerId, payload: Value },
    Message { from: PeerId, data: ActionData },
}

#[derive(Debug, Clone)]
struct Identity {
    session_code: String,
    peer_id: PeerId,
    name: String,
}

/// Keeps the session membership alive on the relay.
///
/// The connection is re-established with capped exponential backoff and
/// the join is repeated with the same identity every time it comes back.
pub struct SignalingClient<R: RelayConnection> {
    relay: R,
    policy: ReconnectPolicy,
    backoff: Backoff,
    status: SignalingStatus,
    identity: Option<Identity>,
    has_joined: bool,
    members: BTreeMap<PeerId, String>,
    failed_attempts: u32,
    retry_at: Option<Instant>,
    events: Vec<SignalingEvent>,
}

impl<R: RelayConnection> SignalingClient<R> {
    pub fn new(relay: R, policy: ReconnectPolicy) -> Self {
        Self {
            relay,
            backoff: policy.backoff(),
            policy,
            status: SignalingStatus::Disconnected,
            identity: None,
            has_joined: false,
            members: BTreeMap::new(),
            failed_attempts: 0,
            retry_at: None,
            events: Vec::new(),
        }
    }

    pub fn status(&self) -> SignalingStatus {
        self.status
    }

    /// Connected and the relay accepted our join
    pub fn is_joined(&self) -> bool {
        self.status == SignalingStatus::Connected && self.has_joined
    }

    pub fn is_member(&self, peer: PeerId) -> bool {
        self.members.contains_key(&peer)
    }

    /// Other members as last reported by the relay
    pub fn members(&self) -> &BTreeMap<PeerId, String> {
        &self.members
    }

    pub fn next_retry_at(&self) -> Option<Instant> {
        self.retry_at
    }

    pub fn relay(&self) -> &R {
        &self.relay
    }

    pub fn drain_events(&mut self) -> Vec<SignalingEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn join(
        &mut self,
        session_code: String,
        peer_id: PeerId,
        name: String,
        now: Instant,
    ) -> Result<()> {
        if let Some(identity) = &self.identity {
            return Err(P2PError::AlreadyJoined(identity.session_code.clone()));
        }

        tracing::info!("📤 Joining session {} as {} ({})", session_code, name, peer_id);
        self.identity = Some(Identity {
            session_code,
            peer_id,
            name,
        });
        self.has_joined = false;
        self.members.clear();
        self.failed_attempts = 0;
        self.backoff.reset();

        if self.status == SignalingStatus::Connected {
            self.send_join();
        } else {
            self.connect(now);
        }
        Ok(())
    }

    pub fn leave(&mut self) {
        if let Some(identity) = self.identity.take() {
            if self.status == SignalingStatus::Connected {
                let frame = ClientFrame::Leave {
                    session_code: identity.session_code,
                    peer_id: identity.peer_id,
                };
                if let Err(e) = self.relay.send(frame) {
                    tracing::debug!("Leave frame not sent: {}", e);
                }
            }
        }
        self.relay.close();
        self.has_joined = false;
        self.members.clear();
        self.retry_at = None;
        self.set_status(SignalingStatus::Disconnected, None);
    }

    pub fn send_setup_message(&mut self, target: PeerId, message: &SetupMessage) -> Result<()> {
        let session_code = self.joined_code()?;
        let signal = serde_json::to_value(message)?;
        tracing::debug!("📤 {} to {} via relay", message.kind_name(), target);
        self.relay.send(ClientFrame::Signal {
            session_code,
            target_peer_id: target,
            signal,
        })
    }

    /// Relay an application message; `None` reaches every other member
    pub fn relay_message(&mut self, target: Option<PeerId>, data: ActionData) -> Result<()> {
        let session_code = self.joined_code()?;
        self.relay.send(ClientFrame::Message {
            session_code,
            target_peer_id: target,
            data,
        })
    }

    /// Process relay events and run a due reconnect
    pub fn poll(&mut self, now: Instant) {
        if self.status == SignalingStatus::Connecting
            && self.retry_at.is_some_and(|at| now >= at)
        {
            self.retry_at = None;
            tracing::info!("🔄 Reconnecting to relay (attempt {})", self.failed_attempts + 1);
            self.open_relay(now);
        }

        // Handling an event may produce more (join -> join-result)
        loop {
            let events = self.relay.poll_events();
            if events.is_empty() {
                break;
            }
            for event in events {
                match event {
                    RelayEvent::Opened => self.on_opened(),
                    RelayEvent::Frame(frame) => self.on_frame(frame),
                    RelayEvent::Closed { reason } => self.on_closed(reason, now),
                }
            }
        }
    }

    fn joined_code(&self) -> Result<String> {
        let identity = self.identity.as_ref().ok_or(P2PError::NotJoined)?;
        if !self.is_joined() {
            return Err(P2PError::SendFailed("relay not connected".to_string()));
        }
        Ok(identity.session_code.clone())
    }

    fn connect(&mut self, now: Instant) {
        self.set_status(SignalingStatus::Connecting, None);
        self.open_relay(now);
    }

    fn open_relay(&mut self, now: Instant) {
        if let Err(e) = self.relay.open() {
            self.on_closed(e.to_string(), now);
        }
    }

    fn send_join(&mut self) {
        let Some(identity) = &self.identity else {
            return;
        };
        let frame = ClientFrame::Join {
            session_code: identity.session_code.clone(),
            peer_id: identity.peer_id,
            name: identity.name.clone(),
        };
        if let Err(e) = self.relay.send(frame) {
            tracing::warn!("❌ Failed to send join: {}", e);
        }
    }

    fn on_opened(&mut self) {
        if self.identity.is_none() {
            self.relay.close();
            return;
        }
        tracing::info!("🟢 Connected to relay");
        self.failed_attempts = 0;
        self.backoff.reset();
        self.set_status(SignalingStatus::Connected, None);
        self.send_join();
    }

    fn on_closed(&mut self, reason: String, now: Instant) {
        if self.identity.is_none() {
            self.set_status(SignalingStatus::Disconnected, None);
            return;
        }

        if self.status == SignalingStatus::Connecting {
            self.failed_attempts += 1;
        }
        if let Some(max) = self.policy.max_attempts {
            if self.failed_attempts >= max {
                let error = format!(
                    "gave up after {} reconnect attempts: {}",
                    self.failed_attempts, reason
                );
                tracing::error!("❌ {}", error);
                self.identity = None;
                self.has_joined = false;
                self.members.clear();
                self.retry_at = None;
                self.relay.close();
                self.set_status(SignalingStatus::Disconnected, Some(error));
                return;
            }
        }

        let delay = self.backoff.next_delay();
        tracing::warn!("🔴 Relay connection lost ({}), retrying in {:?}", reason, delay);
        self.retry_at = Some(now + delay);
        self.status = SignalingStatus::Connecting;
        self.events.push(SignalingEvent::StatusChanged {
            status: SignalingStatus::Connecting,
            error: Some(reason),
        });
    }

    fn on_frame(&mut self, frame: ServerFrame) {
        let Some(own_id) = self.identity.as_ref().map(|i| i.peer_id) else {
            return;
        };

        match frame {
            ServerFrame::JoinResult {
                success: true,
                members,
                ..
            } => {
                let members: Vec<MemberInfo> =
                    members.into_iter().filter(|m| m.peer_id != own_id).collect();
                self.members = members
                    .iter()
                    .map(|m| (m.peer_id, m.name.clone()))
                    .collect();

                if self.has_joined {
                    tracing::info!("🔄 Membership restored ({} others)", members.len());
                    self.events
                        .push(SignalingEvent::MembershipRestored { members });
                } else {
                    tracing::info!("📥 Joined session ({} others)", members.len());
                    self.has_joined = true;
                    self.events.push(SignalingEvent::Joined { members });
                }
            }

            ServerFrame::JoinResult { error, .. } => {
                let reason = error.unwrap_or_else(|| "join rejected".to_string());
                tracing::error!("❌ Join rejected: {}", reason);
                self.identity = None;
                self.has_joined = false;
                self.relay.close();
                self.events.push(SignalingEvent::JoinRejected {
                    reason: reason.clone(),
                });
                self.set_status(SignalingStatus::Disconnected, Some(reason));
            }

            ServerFrame::PeerJoined { peer_id, name } => {
                if peer_id == own_id || !self.has_joined {
                    return;
                }
                tracing::debug!("📥 {} ({}) joined", name, peer_id);
                self.members.insert(peer_id, name.clone());
                self.events
                    .push(SignalingEvent::PeerJoined { peer_id, name });
            }

            ServerFrame::PeerLeft { peer_id } => {
                if self.members.remove(&peer_id).is_some() {
                    tracing::debug!("📥 {} left", peer_id);
                    self.events.push(SignalingEvent::PeerLeft(peer_id));
                }
            }

            ServerFrame::Signal {
                from_peer_id,
                signal,
            } => {
                self.events.push(SignalingEvent::SetupMessage {
                    from: from_peer_id,
                    payload: signal,
                });
            }

            ServerFrame::Message { from_peer_id, data } => {
                if let Err(e) = data.validate() {
                    tracing::warn!("❌ Dropping relayed message from {}: {}", from_peer_id, e);
                    return;
                }
                self.events.push(SignalingEvent::Message {
                    from: from_peer_id,
                    data,
                });
            }
        }
    }

    fn set_status(&mut self, status: SignalingStatus, error: Option<String>) {
        if self.status == status && error.is_none() {
            return;
        }
        self.status = status;
        self.events
            .push(SignalingEvent::StatusChanged { status, error });
    }
}
