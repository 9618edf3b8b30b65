//! WebSocket Host Transport
//!
//! Accepts player connections and feeds them to a [`HostSession`] as
//! [`HostEvent`]s. Each connection announces its player id in the upgrade
//! request (`/?player=N`). All session work happens on the run loop, so
//! messages from every connection are applied one at a time in arrival
//! order.

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{StatusCode, Uri};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, instrument, warn};

use crate::config::ServerConfig;
use crate::game::engine::GameEngine;
use crate::game::player::PlayerId;
use crate::network::host::{HostCommand, HostEvent, HostSession};
use crate::network::registry::ConnectionId;
use crate::store::SnapshotStore;

/// Query parameter carrying the connecting player's id.
pub const PLAYER_PARAM: &str = "player";

/// Transport errors.
#[derive(Debug, thiserror::Error)]
pub enum SyncServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    Bind(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Upgrade request was unusable.
    #[error("Handshake rejected: {0}")]
    Handshake(String),

    /// Host address is not a usable URL.
    #[error("Invalid host URL: {0}")]
    Url(#[from] url::ParseError),
}

/// Read the player id from a `?player=N` query.
pub fn player_from_uri(uri: &Uri) -> Option<PlayerId> {
    url::form_urlencoded::parse(uri.query()?.as_bytes())
        .find(|(key, _)| key == PLAYER_PARAM)
        .and_then(|(_, value)| value.parse().ok())
}

/// WebSocket front end of a host session.
pub struct SyncServer {
    config: ServerConfig,
    shutdown_tx: broadcast::Sender<()>,
}

impl SyncServer {
    /// Create a server.
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self { config, shutdown_tx }
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind and serve `session` until shutdown.
    pub async fn run<E: GameEngine, S: SnapshotStore>(
        &self,
        session: HostSession<E, S>,
        commands: mpsc::UnboundedReceiver<HostCommand>,
    ) -> Result<HostSession<E, S>, SyncServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.run_on(listener, session, commands).await
    }

    /// Serve `session` on an already bound listener until shutdown.
    ///
    /// Returns the session so the caller can inspect or persist it.
    #[instrument(skip_all, fields(session = %session.id()))]
    pub async fn run_on<E: GameEngine, S: SnapshotStore>(
        &self,
        listener: TcpListener,
        mut session: HostSession<E, S>,
        mut commands: mpsc::UnboundedReceiver<HostCommand>,
    ) -> Result<HostSession<E, S>, SyncServerError> {
        info!("Host listening on {}", listener.local_addr()?);

        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<HostEvent>();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut next_conn = 0u64;

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            next_conn += 1;
                            debug!("New connection {} from {}", next_conn, addr);
                            self.handle_connection(stream, addr, ConnectionId(next_conn), event_tx.clone());
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                Some(event) = event_rx.recv() => {
                    session.handle_event(event);
                }
                Some(command) = commands.recv() => {
                    session.handle_command(command);
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        Ok(session)
    }

    /// Upgrade a connection and pump its frames into the run loop.
    fn handle_connection(
        &self,
        stream: TcpStream,
        addr: SocketAddr,
        conn: ConnectionId,
        events: mpsc::UnboundedSender<HostEvent>,
    ) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut player = None;
            let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                match player_from_uri(req.uri()) {
                    Some(id) => {
                        player = Some(id);
                        Ok(resp)
                    }
                    None => {
                        let mut reject = ErrorResponse::new(Some(format!(
                            "missing or invalid '{PLAYER_PARAM}' query parameter"
                        )));
                        *reject.status_mut() = StatusCode::BAD_REQUEST;
                        Err(reject)
                    }
                }
            };

            let ws_stream = match accept_hdr_async(stream, callback).await {
                Ok(ws) => ws,
                Err(e) => {
                    warn!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };
            let Some(player) = player else {
                return;
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();

            // Ends when the session drops our sender, closing the socket.
            let writer = tokio::spawn(async move {
                while let Some(text) = out_rx.recv().await {
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        return;
                    }
                }
                let _ = ws_sender.close().await;
            });

            if events.send(HostEvent::Opened { player, conn, sender: out_tx }).is_err() {
                writer.abort();
                return;
            }

            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                if events.send(HostEvent::Message { player, conn, text }).is_err() {
                                    break;
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                let _ = events.send(HostEvent::Closed { player, conn });
                                break;
                            }
                            Some(Err(e)) => {
                                let _ = events.send(HostEvent::Failed { player, conn, error: e.to_string() });
                                break;
                            }
                            Some(Ok(_)) => {}
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }

            writer.abort();
            debug!("Connection {} for player {} ended", conn.0, player);
        });
    }

    /// Handle that stops the run loop and every connection task.
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Stop the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}
