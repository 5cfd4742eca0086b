//! In-process relay and peer network.
//!
//! Both sides are deterministic: nothing happens until the owning
//! session polls. Used by the integration tests and the BDD suite, and
//! handy for trying the protocol without a network.

use crate::domain::{IceCandidate, PeerId, SdpKind};
use crate::infrastructure::error::{P2PError, Result};
use crate::infrastructure::frames::{ClientFrame, MemberInfo, ServerFrame};
use crate::infrastructure::relay::{RelayConnection, RelayEvent};
use crate::infrastructure::relay_hub::{ConnectionId, FrameSink, RelayHub};
use crate::infrastructure::transport::{LinkState, PeerConnector, PeerTransport, TransportEvent};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// Relay

#[derive(Clone, Default)]
struct MemorySink(Arc<Mutex<VecDeque<RelayEvent>>>);

impl MemorySink {
    fn push(&self, event: RelayEvent) {
        lock(&self.0).push_back(event);
    }

    fn drain(&self) -> Vec<RelayEvent> {
        lock(&self.0).drain(..).collect()
    }
}

impl FrameSink for MemorySink {
    fn deliver(&self, frame: ServerFrame) -> bool {
        self.push(RelayEvent::Frame(frame));
        true
    }
}

/// A join frame as seen by the relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRecord {
    pub session_code: String,
    pub peer_id: PeerId,
    pub name: String,
}

struct RelayNetworkInner {
    hub: RelayHub<MemorySink>,
    open: HashMap<ConnectionId, MemorySink>,
    reachable: bool,
    joins: Vec<JoinRecord>,
}

/// Shared in-memory relay service
#[derive(Clone)]
pub struct MemoryRelayNetwork {
    inner: Arc<Mutex<RelayNetworkInner>>,
}

impl Default for MemoryRelayNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRelayNetwork {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(RelayNetworkInner {
                hub: RelayHub::new(),
                open: HashMap::new(),
                reachable: true,
                joins: Vec::new(),
            })),
        }
    }

    /// A fresh client connection (not yet opened)
    pub fn connection(&self) -> MemoryRelay {
        MemoryRelay {
            network: self.clone(),
            connection: None,
            sink: MemorySink::default(),
        }
    }

    /// While unreachable, every connection attempt fails
    pub fn set_reachable(&self, reachable: bool) {
        lock(&self.inner).reachable = reachable;
    }

    /// Cut every open connection, as if the relay restarted
    pub fn drop_all(&self) {
        let mut inner = lock(&self.inner);
        let open: Vec<(ConnectionId, MemorySink)> = inner.open.drain().collect();
        for (conn, sink) in open {
            inner.hub.disconnect(conn);
            sink.push(RelayEvent::Closed {
                reason: "relay connection lost".to_string(),
            });
        }
    }

    /// Cut the connection holding `peer`'s membership
    pub fn drop_peer(&self, peer: PeerId) -> bool {
        let mut inner = lock(&self.inner);
        let Some(conn) = inner.hub.connection_of(peer) else {
            return false;
        };
        inner.hub.disconnect(conn);
        if let Some(sink) = inner.open.remove(&conn) {
            sink.push(RelayEvent::Closed {
                reason: "relay connection lost".to_string(),
            });
        }
        true
    }

    pub fn members(&self, session_code: &str) -> Vec<MemberInfo> {
        lock(&self.inner).hub.members(session_code)
    }

    /// Every join the relay received, in order
    pub fn joins(&self) -> Vec<JoinRecord> {
        lock(&self.inner).joins.clone()
    }
}

/// One client connection to a [`MemoryRelayNetwork`]
pub struct MemoryRelay {
    network: MemoryRelayNetwork,
    connection: Option<ConnectionId>,
    sink: MemorySink,
}

impl RelayConnection for MemoryRelay {
    fn open(&mut self) -> Result<()> {
        self.close();
        let mut inner = lock(&self.network.inner);
        if !inner.reachable {
            self.sink.push(RelayEvent::Closed {
                reason: "relay unreachable".to_string(),
            });
            return Ok(());
        }
        let conn = inner.hub.next_connection_id();
        // A fresh sink so events of the previous connection are not mixed in
        self.sink = MemorySink::default();
        inner.open.insert(conn, self.sink.clone());
        self.connection = Some(conn);
        self.sink.push(RelayEvent::Opened);
        Ok(())
    }

    fn send(&mut self, frame: ClientFrame) -> Result<()> {
        let conn = self.connection.ok_or(P2PError::ChannelClosed)?;
        let mut inner = lock(&self.network.inner);
        if !inner.open.contains_key(&conn) {
            return Err(P2PError::ChannelClosed);
        }
        if let ClientFrame::Join {
            session_code,
            peer_id,
            name,
        } = &frame
        {
            inner.joins.push(JoinRecord {
                session_code: session_code.clone(),
                peer_id: *peer_id,
                name: name.clone(),
            });
        }
        inner.hub.handle(conn, &self.sink, frame);
        Ok(())
    }

    fn poll_events(&mut self) -> Vec<RelayEvent> {
        self.sink.drain()
    }

    fn close(&mut self) {
        if let Some(conn) = self.connection.take() {
            let mut inner = lock(&self.network.inner);
            inner.open.remove(&conn);
            inner.hub.disconnect(conn);
        }
    }
}

// Peer links

type Pair = (PeerId, PeerId);

fn unordered(a: PeerId, b: PeerId) -> Pair {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

#[derive(Default)]
struct Endpoint {
    generation: u64,
    has_local_description: bool,
    has_remote_description: bool,
    /// Generation of the remote endpoint this one is connected to
    paired_with: Option<u64>,
    open: bool,
    candidates_applied: usize,
    events: VecDeque<TransportEvent>,
}

#[derive(Default)]
struct PeerNetworkInner {
    endpoints: HashMap<Pair, Endpoint>,
    next_generation: u64,
    held: HashSet<Pair>,
    waiting: HashSet<Pair>,
}

impl PeerNetworkInner {
    fn endpoint(&mut self, local: PeerId, remote: PeerId, generation: u64) -> Result<&mut Endpoint> {
        self.endpoints
            .get_mut(&(local, remote))
            .filter(|e| e.generation == generation)
            .ok_or(P2PError::ChannelClosed)
    }

    fn open_pair(&mut self, pair: Pair) {
        for key in [(pair.0, pair.1), (pair.1, pair.0)] {
            if let Some(endpoint) = self.endpoints.get_mut(&key) {
                endpoint.open = true;
                endpoint
                    .events
                    .push_back(TransportEvent::StateChanged(LinkState::Connected));
                endpoint.events.push_back(TransportEvent::ChannelOpen);
            }
        }
    }
}

/// Shared in-memory peer network
#[derive(Clone, Default)]
pub struct MemoryPeerNetwork {
    inner: Arc<Mutex<PeerNetworkInner>>,
}

impl MemoryPeerNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector {
            network: self.clone(),
        }
    }

    /// Keep the channel between `a` and `b` from opening until released
    pub fn hold_channel(&self, a: PeerId, b: PeerId) {
        lock(&self.inner).held.insert(unordered(a, b));
    }

    pub fn release_channel(&self, a: PeerId, b: PeerId) {
        let mut inner = lock(&self.inner);
        let pair = unordered(a, b);
        inner.held.remove(&pair);
        if inner.waiting.remove(&pair) {
            inner.open_pair(pair);
        }
    }

    /// Fail the transport on both ends
    pub fn fail_link(&self, a: PeerId, b: PeerId) {
        let mut inner = lock(&self.inner);
        for key in [(a, b), (b, a)] {
            if let Some(endpoint) = inner.endpoints.get_mut(&key) {
                endpoint.open = false;
                endpoint.paired_with = None;
                endpoint
                    .events
                    .push_back(TransportEvent::StateChanged(LinkState::Failed));
            }
        }
    }

    pub fn is_open(&self, a: PeerId, b: PeerId) -> bool {
        let inner = lock(&self.inner);
        [(a, b), (b, a)]
            .iter()
            .all(|key| inner.endpoints.get(key).is_some_and(|e| e.open))
    }

    /// Remote candidates `local` applied on its link to `remote`
    pub fn candidates_applied(&self, local: PeerId, remote: PeerId) -> usize {
        lock(&self.inner)
            .endpoints
            .get(&(local, remote))
            .map(|e| e.candidates_applied)
            .unwrap_or(0)
    }
}

pub struct MemoryConnector {
    network: MemoryPeerNetwork,
}

impl PeerConnector for MemoryConnector {
    type Transport = MemoryTransport;

    fn connect(&mut self, local: PeerId, remote: PeerId) -> Result<MemoryTransport> {
        let mut inner = lock(&self.network.inner);
        inner.next_generation += 1;
        let generation = inner.next_generation;
        inner.endpoints.insert(
            (local, remote),
            Endpoint {
                generation,
                ..Default::default()
            },
        );
        inner.waiting.remove(&unordered(local, remote));
        Ok(MemoryTransport {
            network: self.network.clone(),
            local,
            remote,
            generation,
        })
    }
}

/// One end of an in-memory link
pub struct MemoryTransport {
    network: MemoryPeerNetwork,
    local: PeerId,
    remote: PeerId,
    generation: u64,
}

impl MemoryTransport {
    fn push_description(&self, kind: SdpKind) -> Result<()> {
        let mut inner = lock(&self.network.inner);
        let endpoint = inner.endpoint(self.local, self.remote, self.generation)?;
        endpoint.has_local_description = true;
        let label = match kind {
            SdpKind::Offer => "offer",
            SdpKind::Answer => "answer",
        };
        endpoint.events.push_back(TransportEvent::LocalDescription {
            kind,
            sdp: format!("memory-{} {} #{}", label, self.local, self.generation),
        });
        let mut candidate = IceCandidate::new(format!("candidate:memory {}", self.local));
        candidate.sdp_mid = Some("0".to_string());
        candidate.sdp_m_line_index = Some(0);
        endpoint
            .events
            .push_back(TransportEvent::LocalCandidate(candidate));
        Ok(())
    }
}

impl PeerTransport for MemoryTransport {
    fn create_data_channel(&mut self) -> Result<()> {
        let mut inner = lock(&self.network.inner);
        inner.endpoint(self.local, self.remote, self.generation)?;
        Ok(())
    }

    fn create_offer(&mut self) -> Result<()> {
        self.push_description(SdpKind::Offer)
    }

    fn create_answer(&mut self) -> Result<()> {
        {
            let mut inner = lock(&self.network.inner);
            let endpoint = inner.endpoint(self.local, self.remote, self.generation)?;
            if !endpoint.has_remote_description {
                return Err(P2PError::Transport("no remote offer to answer".to_string()));
            }
        }
        self.push_description(SdpKind::Answer)
    }

    fn set_remote_description(&mut self, kind: SdpKind, _sdp: String) -> Result<()> {
        let mut inner = lock(&self.network.inner);
        let endpoint = inner.endpoint(self.local, self.remote, self.generation)?;
        endpoint.has_remote_description = true;
        if kind == SdpKind::Offer {
            return Ok(());
        }

        // The answer completes the handshake for both ends
        let remote_generation = inner
            .endpoints
            .get(&(self.remote, self.local))
            .filter(|e| e.has_local_description)
            .map(|e| e.generation)
            .ok_or_else(|| P2PError::Transport("answering side is gone".to_string()))?;
        if let Some(local) = inner.endpoints.get_mut(&(self.local, self.remote)) {
            local.paired_with = Some(remote_generation);
        }
        if let Some(remote) = inner.endpoints.get_mut(&(self.remote, self.local)) {
            remote.paired_with = Some(self.generation);
        }

        let pair = unordered(self.local, self.remote);
        if inner.held.contains(&pair) {
            inner.waiting.insert(pair);
        } else {
            inner.open_pair(pair);
        }
        Ok(())
    }

    fn add_ice_candidate(&mut self, _candidate: IceCandidate) -> Result<()> {
        let mut inner = lock(&self.network.inner);
        let endpoint = inner.endpoint(self.local, self.remote, self.generation)?;
        if !endpoint.has_remote_description {
            return Err(P2PError::Transport(
                "candidate before remote description".to_string(),
            ));
        }
        endpoint.candidates_applied += 1;
        Ok(())
    }

    fn send(&mut self, data: Vec<u8>) -> Result<()> {
        let mut inner = lock(&self.network.inner);
        let endpoint = inner.endpoint(self.local, self.remote, self.generation)?;
        if !endpoint.open {
            return Err(P2PError::ChannelClosed);
        }
        let paired = endpoint.paired_with;
        let remote = inner
            .endpoints
            .get_mut(&(self.remote, self.local))
            .filter(|e| e.open && Some(e.generation) == paired)
            .ok_or(P2PError::ChannelClosed)?;
        remote.events.push_back(TransportEvent::Message(data));
        Ok(())
    }

    fn poll_events(&mut self) -> Vec<TransportEvent> {
        let mut inner = lock(&self.network.inner);
        match inner.endpoint(self.local, self.remote, self.generation) {
            Ok(endpoint) => endpoint.events.drain(..).collect(),
            Err(_) => Vec::new(),
        }
    }

    fn close(&mut self) {
        let mut inner = lock(&self.network.inner);
        let Ok(endpoint) = inner.endpoint(self.local, self.remote, self.generation) else {
            return;
        };
        let was_open = endpoint.open;
        inner.endpoints.remove(&(self.local, self.remote));
        if !was_open {
            return;
        }
        if let Some(remote) = inner
            .endpoints
            .get_mut(&(self.remote, self.local))
            .filter(|e| e.paired_with == Some(self.generation))
        {
            remote.open = false;
            remote.paired_with = None;
            remote.events.push_back(TransportEvent::ChannelClosed);
            remote
                .events
                .push_back(TransportEvent::StateChanged(LinkState::Disconnected));
        }
    }
}
