//! WebSocket Client Transport
//!
//! Connects a [`ClientSession`] to a host and drives it: inbound frames,
//! queued outbound RPCs, local commands, and the session's timers. A closed
//! or failed connection ends the run; there is no automatic reconnect.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::game::engine::GameEngine;
use crate::game::player::PlayerId;
use crate::network::client::{ClientCommand, ClientSession};
use crate::network::server::{SyncServerError, PLAYER_PARAM};

/// Build the connect URL for `player` on `host`.
///
/// `host` is either `addr:port` or a full `ws://` / `wss://` URL. Its path
/// and query are kept; any `player` pair already present is replaced.
pub fn connect_url(host: &str, player: PlayerId) -> Result<String, url::ParseError> {
    let mut url = if host.contains("://") {
        Url::parse(host)?
    } else {
        Url::parse(&format!("ws://{host}"))?
    };
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != PLAYER_PARAM)
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair(PLAYER_PARAM, &player.to_string());
    Ok(url.into())
}

/// A client's connection to the host.
#[derive(Debug, Clone)]
pub struct ClientPeer {
    url: String,
    player_id: PlayerId,
}

impl ClientPeer {
    /// Peer for `player_id` on `host`.
    pub fn new(host: &str, player_id: PlayerId) -> Result<Self, SyncServerError> {
        Ok(Self {
            url: connect_url(host, player_id)?,
            player_id,
        })
    }

    /// Connect URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Connect and run `session` until the connection ends or the user leaves.
    ///
    /// `outbound` must be the receiving end of the sender the session was
    /// created with.
    #[instrument(skip_all, fields(player = self.player_id))]
    pub async fn run<E: GameEngine>(
        &self,
        mut session: ClientSession<E>,
        mut outbound: mpsc::UnboundedReceiver<String>,
        mut commands: mpsc::UnboundedReceiver<ClientCommand>,
    ) -> Result<ClientSession<E>, SyncServerError> {
        let (ws, _) = connect_async(self.url.as_str()).await?;
        info!("Connected to {}", self.url);
        let (mut ws_sender, mut ws_receiver) = ws.split();

        if let Err(e) = session.on_open() {
            return Err(SyncServerError::Handshake(e.to_string()));
        }

        loop {
            let deadline = session.next_deadline();

            tokio::select! {
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if let Err(e) = session.on_message(&text, Instant::now()) {
                                warn!(error = %e, "Dropped host message");
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            session.on_close();
                            break;
                        }
                        Some(Err(e)) => {
                            session.on_error(&e.to_string());
                            break;
                        }
                        Some(Ok(_)) => {}
                    }
                }
                Some(text) = outbound.recv() => {
                    if let Err(e) = ws_sender.send(Message::Text(text)).await {
                        session.on_error(&e.to_string());
                        break;
                    }
                }
                Some(command) = commands.recv() => {
                    session.handle_command(command, Instant::now());
                    if session.wants_disconnect() {
                        debug!("Closing connection on request");
                        let _ = ws_sender.close().await;
                        break;
                    }
                }
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    let now = Instant::now();
                    session.poll_resync(now);
                    session.animation_tick(now);
                }
            }
        }

        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ServerConfig, SyncConfig};
    use crate::game::engine::GameCore;
    use crate::game::state::GameStartSettings;
    use crate::game::tile::{Side, SideIndex};
    use crate::network::host::HostSession;
    use crate::network::server::SyncServer;
    use crate::store::MemoryStore;
    use tokio::net::TcpListener;

    #[test]
    fn test_connect_url() {
        assert_eq!(connect_url("127.0.0.1:8080", 1).unwrap(), "ws://127.0.0.1:8080/?player=1");
        assert_eq!(connect_url("ws://example.org/", 3).unwrap(), "ws://example.org/?player=3");
        assert_eq!(connect_url("wss://example.org", 0).unwrap(), "wss://example.org/?player=0");
        assert_eq!(
            connect_url("ws://example.org/lobby?room=7", 2).unwrap(),
            "ws://example.org/lobby?room=7&player=2"
        );
        assert_eq!(
            connect_url("ws://example.org/?player=5&room=a%20b", 2).unwrap(),
            "ws://example.org/?room=a+b&player=2"
        );
        assert!(connect_url("ws://", 1).is_err());
    }

    #[test]
    fn test_connect_url_is_read_back_by_host() {
        let peer = ClientPeer::new("ws://example.org/lobby?room=7", 4).unwrap();
        let uri: tokio_tungstenite::tungstenite::http::Uri = peer.url().parse().unwrap();
        assert_eq!(crate::network::server::player_from_uri(&uri), Some(4));

        assert!(matches!(ClientPeer::new("ws://", 1), Err(SyncServerError::Url(_))));
    }

    #[tokio::test]
    async fn test_client_syncs_and_acts_over_websocket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = SyncServer::new(ServerConfig::default());
        let shutdown = server.shutdown_handle();

        // Player 1 holds the turn so the remote client can act.
        let mut host = HostSession::new(GameCore::default(), MemoryStore::new(), SyncConfig::default());
        let mut start = host.start_game(GameStartSettings::with_players([0, 1])).unwrap();
        start.player_turn = 1;
        host.set_game(start.clone()).unwrap();
        let (_host_cmd_tx, host_cmd_rx) = mpsc::unbounded_channel();

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let session = ClientSession::new(1, GameCore::default(), out_tx, &SyncConfig::default());
        let mut notices = session.subscribe();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let peer = ClientPeer::new(&addr.to_string(), 1).unwrap();

        let driver = async move {
            // First snapshot answers requestGame.
            while !matches!(notices.recv().await, Ok(crate::network::client::ClientNotice::Synced { .. })) {}
            cmd_tx
                .send(ClientCommand::ShiftTiles(SideIndex::new(Side::Top, 0)))
                .unwrap();
            // Second snapshot is the host's broadcast of the shift.
            while !matches!(notices.recv().await, Ok(crate::network::client::ClientNotice::Synced { .. })) {}
            cmd_tx.send(ClientCommand::Finish).unwrap();
        };

        let client = async {
            let session = peer.run(session, out_rx, cmd_rx).await.unwrap();
            let _ = shutdown.send(());
            session
        };

        let (served, session, _) = tokio::join!(server.run_on(listener, host, host_cmd_rx), client, driver);
        let served = served.unwrap();

        let host_state = served.snapshot().cloned().unwrap();
        assert_eq!(host_state.version, start.version + 1);
        assert_eq!(session.mirror(), Some(&host_state));
        assert!(!session.resync().is_armed());
    }
}
