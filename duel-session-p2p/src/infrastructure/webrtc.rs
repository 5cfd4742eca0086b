use crate::domain::{IceCandidate, IceServer, PeerId, SdpKind};
use crate::infrastructure::error::{P2PError, Result};
use crate::infrastructure::transport::{LinkState, PeerConnector, PeerTransport, TransportEvent};
use bytes::Bytes;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

const CHANNEL_LABEL: &str = "duel";

/// Creates WebRTC transports sharing one ICE server list
#[derive(Clone)]
pub struct WebRtcConnector {
    ice_servers: Vec<IceServer>,
    runtime: Handle,
}

impl WebRtcConnector {
    /// Must be called inside a tokio runtime
    pub fn new(ice_servers: Vec<IceServer>) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| P2PError::Transport(format!("no tokio runtime: {}", e)))?;
        let usable: Vec<IceServer> = ice_servers
            .into_iter()
            .filter(|server| {
                let usable = server.is_usable();
                if !usable {
                    tracing::warn!("Ignoring TURN server without credentials: {:?}", server.urls);
                }
                usable
            })
            .collect();
        Ok(Self {
            ice_servers: usable,
            runtime,
        })
    }

    fn configuration(&self) -> RTCConfiguration {
        RTCConfiguration {
            ice_servers: self
                .ice_servers
                .iter()
                .map(|server| RTCIceServer {
                    urls: server.urls.clone(),
                    username: server.username.clone().unwrap_or_default(),
                    credential: server.credential.clone().unwrap_or_default(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }
}

impl PeerConnector for WebRtcConnector {
    type Transport = WebRtcTransport;

    fn connect(&mut self, local: PeerId, remote: PeerId) -> Result<WebRtcTransport> {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        tracing::debug!("🔄 Opening WebRTC transport {} -> {}", local, remote);

        let task = self.runtime.spawn(run_peer(
            self.configuration(),
            commands_rx,
            commands_tx.clone(),
            events_tx,
        ));
        Ok(WebRtcTransport {
            remote,
            commands: commands_tx,
            events: events_rx,
            task: Some(task),
        })
    }
}

enum Command {
    CreateDataChannel,
    CreateOffer,
    CreateAnswer,
    SetRemote(SdpKind, String),
    AddCandidate(IceCandidate),
    Send(Vec<u8>),
    /// Channel announced by the remote side
    Attach(Arc<RTCDataChannel>),
    Close,
}

/// One RTCPeerConnection driven by a background task
pub struct WebRtcTransport {
    remote: PeerId,
    commands: UnboundedSender<Command>,
    events: UnboundedReceiver<TransportEvent>,
    task: Option<JoinHandle<()>>,
}

impl WebRtcTransport {
    fn command(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| P2PError::Transport(format!("transport to {} is gone", self.remote)))
    }
}

impl PeerTransport for WebRtcTransport {
    fn create_data_channel(&mut self) -> Result<()> {
        self.command(Command::CreateDataChannel)
    }

    fn create_offer(&mut self) -> Result<()> {
        self.command(Command::CreateOffer)
    }

    fn create_answer(&mut self) -> Result<()> {
        self.command(Command::CreateAnswer)
    }

    fn set_remote_description(&mut self, kind: SdpKind, sdp: String) -> Result<()> {
        self.command(Command::SetRemote(kind, sdp))
    }

    fn add_ice_candidate(&mut self, candidate: IceCandidate) -> Result<()> {
        self.command(Command::AddCandidate(candidate))
    }

    fn send(&mut self, data: Vec<u8>) -> Result<()> {
        self.command(Command::Send(data))
    }

    fn poll_events(&mut self) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    fn close(&mut self) {
        let _ = self.commands.send(Command::Close);
        self.task = None;
    }
}

impl Drop for WebRtcTransport {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

fn link_state(state: RTCPeerConnectionState) -> Option<LinkState> {
    match state {
        RTCPeerConnectionState::New => Some(LinkState::New),
        RTCPeerConnectionState::Connecting => Some(LinkState::Connecting),
        RTCPeerConnectionState::Connected => Some(LinkState::Connected),
        RTCPeerConnectionState::Disconnected => Some(LinkState::Disconnected),
        RTCPeerConnectionState::Failed => Some(LinkState::Failed),
        RTCPeerConnectionState::Closed => Some(LinkState::Closed),
        _ => None,
    }
}

fn attach_channel(channel: &Arc<RTCDataChannel>, events: &UnboundedSender<TransportEvent>) {
    let on_open = events.clone();
    channel.on_open(Box::new(move || {
        let _ = on_open.send(TransportEvent::ChannelOpen);
        Box::pin(async {})
    }));

    let on_close = events.clone();
    channel.on_close(Box::new(move || {
        let _ = on_close.send(TransportEvent::ChannelClosed);
        Box::pin(async {})
    }));

    let on_message = events.clone();
    channel.on_message(Box::new(move |message: DataChannelMessage| {
        let _ = on_message.send(TransportEvent::Message(message.data.to_vec()));
        Box::pin(async {})
    }));
}

fn register_callbacks(
    pc: &RTCPeerConnection,
    internal: UnboundedSender<Command>,
    events: &UnboundedSender<TransportEvent>,
) {
    let candidates = events.clone();
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        // None marks the end of gathering
        if let Some(candidate) = candidate {
            match candidate.to_json() {
                Ok(init) => {
                    let _ = candidates.send(TransportEvent::LocalCandidate(IceCandidate {
                        candidate: init.candidate,
                        sdp_mid: init.sdp_mid,
                        sdp_m_line_index: init.sdp_mline_index,
                        username_fragment: init.username_fragment,
                    }));
                }
                Err(e) => tracing::warn!("❌ Could not encode local candidate: {}", e),
            }
        }
        Box::pin(async {})
    }));

    let states = events.clone();
    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        tracing::debug!("🔄 Peer connection state: {}", state);
        if let Some(state) = link_state(state) {
            let _ = states.send(TransportEvent::StateChanged(state));
        }
        Box::pin(async {})
    }));

    pc.on_data_channel(Box::new(move |channel: Arc<RTCDataChannel>| {
        let _ = internal.send(Command::Attach(channel));
        Box::pin(async {})
    }));
}

async fn run_peer(
    configuration: RTCConfiguration,
    mut commands: UnboundedReceiver<Command>,
    internal: UnboundedSender<Command>,
    events: UnboundedSender<TransportEvent>,
) {
    let api = APIBuilder::new().build();
    let pc = match api.new_peer_connection(configuration).await {
        Ok(pc) => Arc::new(pc),
        Err(e) => {
            tracing::error!("❌ Could not create peer connection: {}", e);
            let _ = events.send(TransportEvent::StateChanged(LinkState::Failed));
            return;
        }
    };
    register_callbacks(&pc, internal, &events);

    let mut channel: Option<Arc<RTCDataChannel>> = None;
    while let Some(command) = commands.recv().await {
        let result = match command {
            Command::Close => break,
            command => execute(&pc, &mut channel, &events, command).await,
        };
        if let Err(e) = result {
            tracing::warn!("❌ WebRTC operation failed: {}", e);
            let _ = events.send(TransportEvent::StateChanged(LinkState::Failed));
        }
    }

    if let Err(e) = pc.close().await {
        tracing::debug!("Closing peer connection: {}", e);
    }
}

async fn execute(
    pc: &RTCPeerConnection,
    channel: &mut Option<Arc<RTCDataChannel>>,
    events: &UnboundedSender<TransportEvent>,
    command: Command,
) -> std::result::Result<(), webrtc::Error> {
    match command {
        Command::CreateDataChannel => {
            let created = pc
                .create_data_channel(CHANNEL_LABEL, Some(RTCDataChannelInit::default()))
                .await?;
            attach_channel(&created, events);
            *channel = Some(created);
        }
        Command::Attach(remote) => {
            tracing::debug!("📥 Remote opened data channel '{}'", remote.label());
            attach_channel(&remote, events);
            *channel = Some(remote);
        }
        Command::CreateOffer => {
            let offer = pc.create_offer(None).await?;
            let sdp = offer.sdp.clone();
            pc.set_local_description(offer).await?;
            let _ = events.send(TransportEvent::LocalDescription {
                kind: SdpKind::Offer,
                sdp,
            });
        }
        Command::CreateAnswer => {
            let answer = pc.create_answer(None).await?;
            let sdp = answer.sdp.clone();
            pc.set_local_description(answer).await?;
            let _ = events.send(TransportEvent::LocalDescription {
                kind: SdpKind::Answer,
                sdp,
            });
        }
        Command::SetRemote(kind, sdp) => {
            let description = match kind {
                SdpKind::Offer => RTCSessionDescription::offer(sdp)?,
                SdpKind::Answer => RTCSessionDescription::answer(sdp)?,
            };
            pc.set_remote_description(description).await?;
        }
        Command::AddCandidate(candidate) => {
            pc.add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_m_line_index,
                username_fragment: candidate.username_fragment,
            })
            .await?;
        }
        Command::Send(data) => match channel {
            Some(open) => {
                open.send(&Bytes::from(data)).await?;
            }
            None => tracing::warn!("❌ Dropping message, no data channel yet"),
        },
        Command::Close => {}
    }
    Ok(())
}
