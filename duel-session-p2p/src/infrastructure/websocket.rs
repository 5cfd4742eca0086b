use crate::infrastructure::error::{P2PError, Result};
use crate::infrastructure::frames::{ClientFrame, ServerFrame};
use crate::infrastructure::relay::{RelayConnection, RelayEvent};
use futures::{SinkExt, StreamExt};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

type Tagged = (u64, RelayEvent);

/// Relay connection over a WebSocket.
///
/// A tokio task owns the socket; frames cross over unbounded channels so
/// the session can poll without awaiting.
pub struct WebSocketRelay {
    url: String,
    runtime: Handle,
    outgoing: Option<UnboundedSender<ClientFrame>>,
    events_tx: UnboundedSender<Tagged>,
    events_rx: UnboundedReceiver<Tagged>,
    /// Events of older connections are discarded
    generation: u64,
    task: Option<JoinHandle<()>>,
}

impl WebSocketRelay {
    /// Must be called inside a tokio runtime
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| P2PError::ConnectionFailed(format!("no tokio runtime: {}", e)))?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Ok(Self {
            url: url.into(),
            runtime,
            outgoing: None,
            events_tx,
            events_rx,
            generation: 0,
            task: None,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl RelayConnection for WebSocketRelay {
    fn open(&mut self) -> Result<()> {
        self.close();
        self.generation += 1;

        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        self.outgoing = Some(outgoing_tx);
        self.task = Some(self.runtime.spawn(run_connection(
            self.url.clone(),
            self.generation,
            outgoing_rx,
            self.events_tx.clone(),
        )));
        Ok(())
    }

    fn send(&mut self, frame: ClientFrame) -> Result<()> {
        let outgoing = self.outgoing.as_ref().ok_or(P2PError::ChannelClosed)?;
        outgoing.send(frame).map_err(|_| P2PError::ChannelClosed)
    }

    fn poll_events(&mut self) -> Vec<RelayEvent> {
        let mut events = Vec::new();
        while let Ok((generation, event)) = self.events_rx.try_recv() {
            if generation != self.generation || self.outgoing.is_none() {
                continue;
            }
            if matches!(event, RelayEvent::Closed { .. }) {
                self.outgoing = None;
            }
            events.push(event);
        }
        events
    }

    fn close(&mut self) {
        // Dropping the sender makes the task close the socket
        self.outgoing = None;
        if let Some(task) = self.task.take() {
            if task.is_finished() {
                return;
            }
            let runtime = self.runtime.clone();
            runtime.spawn(async move {
                if tokio::time::timeout(std::time::Duration::from_secs(2), task)
                    .await
                    .is_err()
                {
                    tracing::debug!("Relay task did not stop in time");
                }
            });
        }
    }
}

impl Drop for WebSocketRelay {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run_connection(
    url: String,
    generation: u64,
    mut outgoing: UnboundedReceiver<ClientFrame>,
    events: UnboundedSender<Tagged>,
) {
    let report = |event: RelayEvent| {
        let _ = events.send((generation, event));
    };

    let stream = match tokio_tungstenite::connect_async(url.as_str()).await {
        Ok((stream, _)) => stream,
        Err(e) => {
            tracing::warn!("❌ Could not reach relay {}: {}", url, e);
            report(RelayEvent::Closed {
                reason: e.to_string(),
            });
            return;
        }
    };
    tracing::debug!("🟢 WebSocket to {} open", url);
    report(RelayEvent::Opened);

    let (mut write, mut read) = stream.split();
    loop {
        tokio::select! {
            frame = outgoing.recv() => match frame {
                Some(frame) => {
                    let text = match frame.to_json() {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::warn!("❌ Could not encode {} frame: {}", frame.name(), e);
                            continue;
                        }
                    };
                    tracing::trace!("📤 {} frame", frame.name());
                    if let Err(e) = write.send(Message::text(text)).await {
                        report(RelayEvent::Closed { reason: e.to_string() });
                        return;
                    }
                }
                None => {
                    let _ = write.close().await;
                    return;
                }
            },
            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => match ServerFrame::from_json(text.as_str()) {
                    Ok(frame) => report(RelayEvent::Frame(frame)),
                    Err(e) => tracing::warn!("❌ Dropping unreadable relay frame: {}", e),
                },
                Some(Ok(Message::Close(_))) | None => {
                    report(RelayEvent::Closed {
                        reason: "relay closed the connection".to_string(),
                    });
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    report(RelayEvent::Closed { reason: e.to_string() });
                    return;
                }
            },
        }
    }
}
