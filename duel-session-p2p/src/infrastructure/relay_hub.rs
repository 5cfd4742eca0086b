use crate::domain::PeerId;
use crate::infrastructure::frames::{ClientFrame, MemberInfo, ServerFrame};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Outgoing side of one relay client connection
pub trait FrameSink: Clone {
    /// Returns false once the connection is gone
    fn deliver(&self, frame: ServerFrame) -> bool;
}

/// Identifies a client connection to the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug)]
struct Member<S> {
    name: String,
    connection: ConnectionId,
    sink: S,
}

/// Room table of the reference relay.
///
/// Pure routing: frames come in per connection and are pushed to member
/// sinks. Transport concerns stay with the caller.
#[derive(Debug)]
pub struct RelayHub<S: FrameSink> {
    rooms: HashMap<String, BTreeMap<PeerId, Member<S>>>,
    connections: HashMap<ConnectionId, (String, PeerId)>,
    next_connection: u64,
}

impl<S: FrameSink> Default for RelayHub<S> {
    fn default() -> Self {
        Self {
            rooms: HashMap::new(),
            connections: HashMap::new(),
            next_connection: 1,
        }
    }
}

impl<S: FrameSink> RelayHub<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_connection_id(&mut self) -> ConnectionId {
        let id = ConnectionId(self.next_connection);
        self.next_connection += 1;
        id
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn members(&self, session_code: &str) -> Vec<MemberInfo> {
        self.rooms
            .get(session_code)
            .map(|room| {
                room.iter()
                    .map(|(peer_id, m)| MemberInfo {
                        peer_id: *peer_id,
                        name: m.name.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Connection currently holding the membership of `peer`
    pub fn connection_of(&self, peer: PeerId) -> Option<ConnectionId> {
        self.connections
            .iter()
            .find(|(_, (_, p))| *p == peer)
            .map(|(conn, _)| *conn)
    }

    /// Route one frame received on `connection`
    pub fn handle(&mut self, connection: ConnectionId, sink: &S, frame: ClientFrame) {
        match frame {
            ClientFrame::Join {
                session_code,
                peer_id,
                name,
            } => self.join(connection, sink, session_code, peer_id, name),

            ClientFrame::Leave {
                session_code,
                peer_id,
            } => {
                let owns = self
                    .connections
                    .get(&connection)
                    .is_some_and(|(code, p)| *code == session_code && *p == peer_id);
                if owns {
                    self.disconnect(connection);
                }
            }

            ClientFrame::Signal {
                session_code,
                target_peer_id,
                signal,
            } => {
                let Some(from) = self.sender(connection, &session_code) else {
                    tracing::debug!("Signal from non-member {}", connection);
                    return;
                };
                self.deliver_to(
                    &session_code,
                    target_peer_id,
                    ServerFrame::Signal {
                        from_peer_id: from,
                        signal,
                    },
                );
            }

            ClientFrame::Message {
                session_code,
                target_peer_id,
                data,
            } => {
                let Some(from) = self.sender(connection, &session_code) else {
                    tracing::debug!("Message from non-member {}", connection);
                    return;
                };
                let frame = ServerFrame::Message {
                    from_peer_id: from,
                    data,
                };
                match target_peer_id {
                    Some(target) => self.deliver_to(&session_code, target, frame),
                    None => self.broadcast(&session_code, from, frame),
                }
            }
        }
    }

    /// The connection went away; its membership (if still current) ends
    pub fn disconnect(&mut self, connection: ConnectionId) {
        let Some((code, peer)) = self.connections.remove(&connection) else {
            return;
        };
        let Some(room) = self.rooms.get_mut(&code) else {
            return;
        };
        if room.get(&peer).map(|m| m.connection) != Some(connection) {
            return;
        }

        room.remove(&peer);
        tracing::info!("🔴 {} left room {}", peer, code);
        if room.is_empty() {
            self.rooms.remove(&code);
        } else {
            self.broadcast(&code, peer, ServerFrame::PeerLeft { peer_id: peer });
        }
    }

    fn join(
        &mut self,
        connection: ConnectionId,
        sink: &S,
        session_code: String,
        peer_id: PeerId,
        name: String,
    ) {
        if session_code.trim().is_empty() || name.trim().is_empty() || peer_id.is_local_sentinel()
        {
            sink.deliver(ServerFrame::rejected("session code, peer id and name are required"));
            return;
        }

        // A connection holds one membership at a time
        if let Some((code, peer)) = self.connections.get(&connection).cloned() {
            if code != session_code || peer != peer_id {
                self.disconnect(connection);
            }
        }

        let room = self.rooms.entry(session_code.clone()).or_default();
        let members: Vec<MemberInfo> = room
            .iter()
            .filter(|(id, _)| **id != peer_id)
            .map(|(id, m)| MemberInfo {
                peer_id: *id,
                name: m.name.clone(),
            })
            .collect();

        let previous = room.insert(
            peer_id,
            Member {
                name: name.clone(),
                connection,
                sink: sink.clone(),
            },
        );
        if let Some(previous) = &previous {
            if previous.connection != connection {
                self.connections.remove(&previous.connection);
            }
        }
        self.connections
            .insert(connection, (session_code.clone(), peer_id));

        sink.deliver(ServerFrame::JoinResult {
            success: true,
            members,
            error: None,
        });

        if previous.is_none() {
            tracing::info!("🟢 {} ({}) joined room {}", name, peer_id, session_code);
            self.broadcast(
                &session_code,
                peer_id,
                ServerFrame::PeerJoined { peer_id, name },
            );
        } else {
            tracing::info!("🔄 {} ({}) rejoined room {}", name, peer_id, session_code);
        }
    }

    fn sender(&self, connection: ConnectionId, session_code: &str) -> Option<PeerId> {
        self.connections
            .get(&connection)
            .filter(|(code, _)| code == session_code)
            .map(|(_, peer)| *peer)
    }

    fn deliver_to(&self, session_code: &str, target: PeerId, frame: ServerFrame) {
        match self.rooms.get(session_code).and_then(|r| r.get(&target)) {
            Some(member) => {
                if !member.sink.deliver(frame) {
                    tracing::debug!("Sink of {} is closed", target);
                }
            }
            None => tracing::debug!("No member {} in room {}", target, session_code),
        }
    }

    fn broadcast(&self, session_code: &str, except: PeerId, frame: ServerFrame) {
        let Some(room) = self.rooms.get(session_code) else {
            return;
        };
        for (_, member) in room.iter().filter(|(id, _)| **id != except) {
            member.sink.deliver(frame.clone());
        }
    }
}
