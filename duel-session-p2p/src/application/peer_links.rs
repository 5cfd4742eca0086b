use crate::domain::{IceCandidate, PeerId, SdpKind, SetupMessage};
use crate::infrastructure::error::{P2PError, Result};
use crate::infrastructure::transport::{PeerConnector, PeerTransport, TransportEvent};
use serde_json::Value;
use std::collections::HashMap;

/// Lifecycle of the data channel of one link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Absent,
    Opening,
    Open,
    Closed,
}

/// Events emitted by the link manager
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// Setup message to forward to the peer through the relay
    Signal { peer: PeerId, message: SetupMessage },
    ChannelOpen(PeerId),
    Message { peer: PeerId, data: Vec<u8> },
    /// The transport failed or closed; the link is gone
    LinkLost(PeerId),
}

/// Direct connection to one remote participant
pub struct PeerLink<T> {
    peer_id: PeerId,
    display_name: String,
    transport: T,
    channel_state: ChannelState,
    is_offerer: bool,
    remote_description_set: bool,
    /// Candidates that arrived before the remote description
    pending_candidates: Vec<IceCandidate>,
}

impl<T: PeerTransport> PeerLink<T> {
    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn channel_state(&self) -> ChannelState {
        self.channel_state
    }

    pub fn is_offerer(&self) -> bool {
        self.is_offerer
    }

    pub fn pending_candidates(&self) -> usize {
        self.pending_candidates.len()
    }

    fn apply_remote_description(&mut self, kind: SdpKind, sdp: String) -> Result<()> {
        self.transport.set_remote_description(kind, sdp)?;
        self.remote_description_set = true;
        for candidate in std::mem::take(&mut self.pending_candidates) {
            if let Err(e) = self.transport.add_ice_candidate(candidate) {
                tracing::warn!("❌ Buffered candidate for {} rejected: {}", self.peer_id, e);
            }
        }
        Ok(())
    }
}

/// Owns one [`PeerLink`] per remote participant and drives the
/// offer/answer/candidate exchange for each.
pub struct PeerLinkManager<C: PeerConnector> {
    connector: C,
    local_id: PeerId,
    links: HashMap<PeerId, PeerLink<C::Transport>>,
    events: Vec<LinkEvent>,
}

impl<C: PeerConnector> PeerLinkManager<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            local_id: PeerId::LOCAL,
            links: HashMap::new(),
            events: Vec::new(),
        }
    }

    pub fn set_local_id(&mut self, id: PeerId) {
        self.local_id = id;
    }

    pub fn link(&self, peer: PeerId) -> Option<&PeerLink<C::Transport>> {
        self.links.get(&peer)
    }

    pub fn peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.links.keys().copied().collect();
        peers.sort();
        peers
    }

    pub fn channel_state(&self, peer: PeerId) -> ChannelState {
        self.links
            .get(&peer)
            .map(|l| l.channel_state)
            .unwrap_or(ChannelState::Absent)
    }

    pub fn is_open(&self, peer: PeerId) -> bool {
        self.channel_state(peer) == ChannelState::Open
    }

    pub fn drain_events(&mut self) -> Vec<LinkEvent> {
        std::mem::take(&mut self.events)
    }

    /// Start a link. The offerer opens the channel and sends the offer;
    /// the answerer waits for both.
    pub fn create_link(&mut self, peer: PeerId, display_name: &str, is_offerer: bool) -> Result<()> {
        self.close_link(peer);

        let mut transport = self.connector.connect(self.local_id, peer)?;
        let channel_state = if is_offerer {
            transport.create_data_channel()?;
            transport.create_offer()?;
            ChannelState::Opening
        } else {
            ChannelState::Absent
        };

        tracing::debug!(
            "🔗 Link to {} created ({})",
            peer,
            if is_offerer { "offerer" } else { "answerer" }
        );
        self.links.insert(
            peer,
            PeerLink {
                peer_id: peer,
                display_name: display_name.to_string(),
                transport,
                channel_state,
                is_offerer,
                remote_description_set: false,
                pending_candidates: Vec::new(),
            },
        );
        Ok(())
    }

    /// Route a setup message received through the relay
    pub fn handle_setup_message(&mut self, peer: PeerId, payload: Value) -> Result<()> {
        let message: SetupMessage = serde_json::from_value(payload)
            .map_err(|e| P2PError::InvalidPayload(format!("setup message: {}", e)))?;
        tracing::debug!("📥 {} from {}", message.kind_name(), peer);

        match message {
            SetupMessage::Offer { sdp } => {
                // A fresh offer always starts a new negotiation
                let (display_name, early_candidates) = match self.links.get_mut(&peer) {
                    Some(link) => (
                        link.display_name.clone(),
                        std::mem::take(&mut link.pending_candidates),
                    ),
                    None => (String::new(), Vec::new()),
                };
                self.create_link(peer, &display_name, false)?;
                let link = self.link_mut(peer)?;
                link.pending_candidates = early_candidates;
                link.apply_remote_description(SdpKind::Offer, sdp)?;
                link.transport.create_answer()?;
                link.channel_state = ChannelState::Opening;
            }

            SetupMessage::Answer { sdp } => {
                let link = self.link_mut(peer)?;
                if !link.is_offerer {
                    return Err(P2PError::InvalidPayload(format!(
                        "answer from {} on a link we did not offer",
                        peer
                    )));
                }
                link.apply_remote_description(SdpKind::Answer, sdp)?;
            }

            SetupMessage::Candidate { candidate } => {
                if !self.links.contains_key(&peer) {
                    self.create_link(peer, "", false)?;
                }
                let link = self.link_mut(peer)?;
                if link.remote_description_set {
                    link.transport.add_ice_candidate(candidate)?;
                } else {
                    link.pending_candidates.push(candidate);
                }
            }
        }
        Ok(())
    }

    pub fn send(&mut self, peer: PeerId, data: Vec<u8>) -> Result<()> {
        let link = self.link_mut(peer)?;
        if link.channel_state != ChannelState::Open {
            return Err(P2PError::ChannelClosed);
        }
        link.transport.send(data)
    }

    /// Release the transport; no `LinkLost` is emitted
    pub fn close_link(&mut self, peer: PeerId) -> bool {
        match self.links.remove(&peer) {
            Some(mut link) => {
                link.transport.close();
                true
            }
            None => false,
        }
    }

    pub fn close_all(&mut self) {
        for (_, mut link) in self.links.drain() {
            link.transport.close();
        }
        self.events.clear();
    }

    /// Pull transport events and tear down links whose transport ended
    pub fn poll(&mut self) {
        let mut lost = Vec::new();

        for (peer, link) in self.links.iter_mut() {
            for event in link.transport.poll_events() {
                match event {
                    TransportEvent::LocalDescription { kind, sdp } => {
                        self.events.push(LinkEvent::Signal {
                            peer: *peer,
                            message: SetupMessage::description(kind, sdp),
                        });
                    }
                    TransportEvent::LocalCandidate(candidate) => {
                        self.events.push(LinkEvent::Signal {
                            peer: *peer,
                            message: SetupMessage::Candidate { candidate },
                        });
                    }
                    TransportEvent::ChannelOpen => {
                        if link.channel_state != ChannelState::Open {
                            tracing::info!("🟢 Direct channel to {} open", peer);
                            link.channel_state = ChannelState::Open;
                            self.events.push(LinkEvent::ChannelOpen(*peer));
                        }
                    }
                    TransportEvent::ChannelClosed => {
                        link.channel_state = ChannelState::Closed;
                        lost.push(*peer);
                    }
                    TransportEvent::Message(data) => {
                        self.events.push(LinkEvent::Message { peer: *peer, data });
                    }
                    TransportEvent::StateChanged(state) => {
                        tracing::debug!("Link to {} is {:?}", peer, state);
                        if state.is_terminal() {
                            lost.push(*peer);
                        }
                    }
                }
            }
        }

        lost.sort();
        lost.dedup();
        for peer in lost {
            if let Some(mut link) = self.links.remove(&peer) {
                tracing::info!("🔴 Direct link to {} lost", peer);
                link.transport.close();
                self.events.push(LinkEvent::LinkLost(peer));
            }
        }
    }

    fn link_mut(&mut self, peer: PeerId) -> Result<&mut PeerLink<C::Transport>> {
        self.links
            .get_mut(&peer)
            .ok_or_else(|| P2PError::PeerNotFound(peer.to_string()))
    }
}
