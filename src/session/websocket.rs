use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use super::link::{LiveChannel, LiveConnector, LiveSetup, ServerEvent, SessionControl};
use super::messages::{RealtimeInputMessage, ServerMessage, SetupMessage};
use crate::audio::pcm::EncodedAudioBlob;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Inbound events buffered between the socket reader and the session
const INBOUND_QUEUE: usize = 64;

/// Time allowed for the writer to flush a close frame
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Connects to the live service over a WebSocket
pub struct WebSocketConnector {
    endpoint: String,
    handshake_timeout: Duration,
}

impl WebSocketConnector {
    pub fn new(endpoint: impl Into<String>, handshake_timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            handshake_timeout,
        }
    }

    fn url(&self, api_key: &str) -> String {
        format!("{}?key={}", self.endpoint, api_key)
    }
}

#[async_trait]
impl LiveConnector for WebSocketConnector {
    async fn connect(
        &self,
        api_key: &str,
        setup: &LiveSetup,
        outbound: mpsc::Receiver<EncodedAudioBlob>,
    ) -> Result<LiveChannel> {
        // The URL carries the key; log the endpoint only
        info!("Connecting to live service: {}", self.endpoint);

        let (mut socket, _response) =
            tokio::time::timeout(self.handshake_timeout, tokio_tungstenite::connect_async(self.url(api_key)))
                .await
                .map_err(|_| anyhow!("Timed out connecting to live service"))?
                .context("Failed to open WebSocket")?;

        let setup_json = serde_json::to_string(&SetupMessage::from_setup(setup))
            .context("Failed to serialize setup message")?;
        socket
            .send(Message::Text(setup_json))
            .await
            .context("Failed to send setup message")?;

        tokio::time::timeout(self.handshake_timeout, await_setup_complete(&mut socket))
            .await
            .map_err(|_| anyhow!("Timed out waiting for setup to complete"))??;

        info!("Live session set up (model: {}, voice: {})", setup.model, setup.voice);

        let (sink, stream) = socket.split();
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE);
        let (close_tx, close_rx) = oneshot::channel();

        let writer = tokio::spawn(write_loop(sink, outbound, close_rx));
        let reader = tokio::spawn(read_loop(stream, inbound_tx));

        Ok(LiveChannel {
            inbound: inbound_rx,
            control: Box::new(WebSocketControl {
                close_tx: Some(close_tx),
                writer: Some(writer),
                reader: Some(reader),
            }),
        })
    }
}

async fn await_setup_complete(socket: &mut Socket) -> Result<()> {
    while let Some(message) = socket.next().await {
        let message = message.context("WebSocket error during setup")?;
        match message {
            Message::Text(text) => {
                if ServerMessage::parse(text.as_bytes())?.is_setup_complete() {
                    return Ok(());
                }
            }
            Message::Binary(bytes) => {
                if ServerMessage::parse(&bytes)?.is_setup_complete() {
                    return Ok(());
                }
            }
            Message::Close(frame) => {
                bail!("Connection closed during setup: {}", describe_close(frame.as_ref()));
            }
            _ => {}
        }
    }

    bail!("Connection ended before setup completed")
}

fn describe_close(frame: Option<&CloseFrame<'_>>) -> String {
    match frame {
        Some(frame) if !frame.reason.is_empty() => format!("{} ({})", frame.reason, frame.code),
        Some(frame) => frame.code.to_string(),
        None => "no close frame".to_string(),
    }
}

async fn write_loop(
    mut sink: SplitSink<Socket, Message>,
    mut outbound: mpsc::Receiver<EncodedAudioBlob>,
    mut close_rx: oneshot::Receiver<()>,
) {
    debug!("WebSocket writer started");

    loop {
        tokio::select! {
            _ = &mut close_rx => break,
            blob = outbound.recv() => {
                let Some(blob) = blob else { break };
                let json = match serde_json::to_string(&RealtimeInputMessage::audio(blob)) {
                    Ok(json) => json,
                    Err(e) => {
                        error!("Failed to serialize audio frame: {}", e);
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(json)).await {
                    warn!("Failed to send audio frame: {}", e);
                    break;
                }
            }
        }
    }

    if let Err(e) = sink.close().await {
        debug!("WebSocket close: {}", e);
    }

    debug!("WebSocket writer stopped");
}

async fn read_loop(mut stream: SplitStream<Socket>, inbound: mpsc::Sender<ServerEvent>) {
    debug!("WebSocket reader started");

    let terminal = loop {
        let message = match stream.next().await {
            Some(Ok(message)) => message,
            Some(Err(e)) => break ServerEvent::Error(e.to_string()),
            None => break ServerEvent::Closed(None),
        };

        let payload = match message {
            Message::Text(text) => text.into_bytes(),
            Message::Binary(bytes) => bytes,
            Message::Close(frame) => {
                break match frame {
                    None => ServerEvent::Closed(None),
                    Some(frame) if frame.code == CloseCode::Normal => {
                        ServerEvent::Closed(Some(frame.reason.into_owned()))
                    }
                    Some(frame) => ServerEvent::Error(describe_close(Some(&frame))),
                };
            }
            _ => continue,
        };

        let parsed = match ServerMessage::parse(&payload) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Ignoring malformed server message: {:#}", e);
                continue;
            }
        };

        if let Some(go_away) = &parsed.go_away {
            warn!(
                "Live service is going away (time left: {})",
                go_away.time_left.as_deref().unwrap_or("unknown")
            );
        }

        for event in parsed.into_events() {
            if inbound.send(event).await.is_err() {
                debug!("WebSocket reader stopped: session dropped inbound queue");
                return;
            }
        }
    };

    info!("Live link ended: {:?}", terminal);
    let _ = inbound.send(terminal).await;

    debug!("WebSocket reader stopped");
}

/// Closes the socket by stopping the writer, which sends the close frame
pub struct WebSocketControl {
    close_tx: Option<oneshot::Sender<()>>,
    writer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
}

#[async_trait]
impl SessionControl for WebSocketControl {
    async fn close(&mut self) -> Result<()> {
        let Some(close_tx) = self.close_tx.take() else {
            bail!("Live link already closed");
        };

        // The writer may have exited on its own already
        let _ = close_tx.send(());

        if let Some(writer) = self.writer.take() {
            if tokio::time::timeout(CLOSE_TIMEOUT, writer).await.is_err() {
                warn!("Timed out closing live link");
            }
        }

        if let Some(reader) = self.reader.take() {
            reader.abort();
        }

        info!("Live link closed");
        Ok(())
    }
}

impl Drop for WebSocketControl {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}
