use crate::application::peer_links::PeerLinkManager;
use crate::application::signaling::SignalingClient;
use crate::domain::{ActionData, DeliveryRoute, Envelope, PeerId};
use crate::infrastructure::error::Result;
use crate::infrastructure::relay::RelayConnection;
use crate::infrastructure::transport::PeerConnector;
use std::collections::{BTreeSet, HashMap, VecDeque};

/// Consumer of one action name
pub type ActionHandler = Box<dyn FnMut(&Envelope) + Send>;

/// Unhandled envelopes kept per sender before the oldest are dropped
pub const DEFAULT_BUFFER_LIMIT: usize = 256;

/// Publish/subscribe by action name over the direct links, with the
/// relay as fallback.
///
/// Envelopes nobody has subscribed to yet are kept per sender and
/// replayed, in arrival order, once a handler for their action registers.
/// Each sender's buffer holds at most `buffer_limit` envelopes.
pub struct ActionBus {
    handlers: HashMap<String, ActionHandler>,
    buffered: HashMap<PeerId, VecDeque<(u64, Envelope)>>,
    arrivals: u64,
    buffer_limit: usize,
}

impl Default for ActionBus {
    fn default() -> Self {
        Self::with_buffer_limit(DEFAULT_BUFFER_LIMIT)
    }
}

impl ActionBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_buffer_limit(buffer_limit: usize) -> Self {
        Self {
            handlers: HashMap::new(),
            buffered: HashMap::new(),
            arrivals: 0,
            buffer_limit: buffer_limit.max(1),
        }
    }

    /// Register `handler` for `action`, replacing any previous one.
    /// Returns how many buffered envelopes were replayed into it.
    pub fn register_handler(&mut self, action: &str, mut handler: ActionHandler) -> usize {
        let mut replay: Vec<(u64, Envelope)> = Vec::new();
        for queue in self.buffered.values_mut() {
            let (matching, rest): (VecDeque<_>, VecDeque<_>) =
                queue.drain(..).partition(|(_, e)| e.action == action);
            *queue = rest;
            replay.extend(matching);
        }
        self.buffered.retain(|_, queue| !queue.is_empty());
        replay.sort_by_key(|(seq, _)| *seq);

        if !replay.is_empty() {
            tracing::debug!("📥 Replaying {} buffered '{}' envelope(s)", replay.len(), action);
        }
        for (_, envelope) in &replay {
            handler(envelope);
        }

        self.handlers.insert(action.to_string(), handler);
        replay.len()
    }

    pub fn unregister_handler(&mut self, action: &str) -> bool {
        self.handlers.remove(action).is_some()
    }

    pub fn has_handler(&self, action: &str) -> bool {
        self.handlers.contains_key(action)
    }

    /// Hand an inbound envelope to its handler or buffer it.
    /// Returns true if a handler consumed it.
    pub fn dispatch(&mut self, envelope: Envelope) -> bool {
        if let Some(handler) = self.handlers.get_mut(&envelope.action) {
            handler(&envelope);
            return true;
        }

        tracing::debug!(
            "No handler for '{}' yet, buffering envelope from {}",
            envelope.action,
            envelope.sender
        );
        self.arrivals += 1;
        let sender = envelope.sender;
        let queue = self.buffered.entry(sender).or_default();
        queue.push_back((self.arrivals, envelope));
        if queue.len() > self.buffer_limit {
            if let Some((_, dropped)) = queue.pop_front() {
                tracing::warn!(
                    "❌ Buffer for {} is full, dropping oldest '{}' envelope",
                    sender,
                    dropped.action
                );
            }
        }
        false
    }

    pub fn buffered_len(&self) -> usize {
        self.buffered.values().map(VecDeque::len).sum()
    }

    pub fn buffered_from(&self, peer: PeerId) -> usize {
        self.buffered.get(&peer).map(VecDeque::len).unwrap_or(0)
    }

    pub fn clear_buffers(&mut self) {
        self.buffered.clear();
    }

    /// Deliver `data` to `target`, or to every known peer when `None`.
    ///
    /// Each peer gets it over its direct channel when that is open and
    /// through the relay otherwise. Returns the route taken per peer.
    pub fn send<R: RelayConnection, C: PeerConnector>(
        &self,
        links: &mut PeerLinkManager<C>,
        signaling: &mut SignalingClient<R>,
        data: &ActionData,
        target: Option<PeerId>,
    ) -> Result<Vec<(PeerId, DeliveryRoute)>> {
        let targets: BTreeSet<PeerId> = match target {
            Some(peer) => BTreeSet::from([peer]),
            None => links
                .peers()
                .into_iter()
                .chain(signaling.members().keys().copied())
                .collect(),
        };

        let bytes = data.to_bytes()?;
        let mut routes = Vec::with_capacity(targets.len());
        for peer in targets {
            if links.is_open(peer) {
                match links.send(peer, bytes.clone()) {
                    Ok(()) => {
                        tracing::trace!("📤 '{}' to {} direct", data.action, peer);
                        routes.push((peer, DeliveryRoute::Direct));
                        continue;
                    }
                    Err(e) => {
                        tracing::warn!("❌ Direct send to {} failed ({}), using relay", peer, e)
                    }
                }
            }
            match signaling.relay_message(Some(peer), data.clone()) {
                Ok(()) => {
                    tracing::trace!("📤 '{}' to {} via relay", data.action, peer);
                    routes.push((peer, DeliveryRoute::Relay));
                }
                // A broadcast still reaches the peers that are reachable
                Err(e) if target.is_none() => {
                    tracing::warn!("❌ '{}' not delivered to {}: {}", data.action, peer, e)
                }
                Err(e) => return Err(e),
            }
        }
        Ok(routes)
    }
}
