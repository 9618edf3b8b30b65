//! End-to-end synchronization scenarios over in-memory channels.

use std::time::Duration;

use proptest::prelude::*;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::config::SyncConfig;
use crate::game::engine::{GameCore, GameEngine};
use crate::game::player::{PlayerId, Position};
use crate::game::state::{GamePhase, GameStartSettings, GameState};
use crate::game::tile::{Rotation, Side, SideIndex};
use crate::network::client::ClientSession;
use crate::network::host::HostSession;
use crate::network::protocol::{Action, HostMessage};
use crate::network::registry::ConnectionId;
use crate::store::MemoryStore;

struct Remote {
    session: ClientSession<GameCore>,
    /// Client to host.
    uplink: mpsc::UnboundedReceiver<String>,
    /// Host to client.
    downlink: mpsc::UnboundedReceiver<String>,
}

struct Net {
    host: HostSession<GameCore, MemoryStore>,
    remotes: Vec<Remote>,
}

impl Net {
    fn new(players: &[PlayerId]) -> Self {
        let mut host = HostSession::new(GameCore::default(), MemoryStore::new(), SyncConfig::default());
        let settings = GameStartSettings {
            side_length: 7,
            ..GameStartSettings::with_players(players.iter().copied())
        };
        host.start_game(settings).unwrap();
        Self { host, remotes: Vec::new() }
    }

    fn connect(&mut self, player: PlayerId) {
        let (up_tx, uplink) = mpsc::unbounded_channel();
        let (down_tx, downlink) = mpsc::unbounded_channel();
        let mut session = ClientSession::new(player, GameCore::default(), up_tx, &SyncConfig::default());
        self.host.on_open(player, ConnectionId(player as u64), down_tx);
        session.on_open().unwrap();
        self.remotes.push(Remote { session, uplink, downlink });
    }

    fn remote(&mut self, player: PlayerId) -> &mut ClientSession<GameCore> {
        &mut self
            .remotes
            .iter_mut()
            .find(|r| r.session.player_id() == player)
            .unwrap()
            .session
    }

    fn host_state(&self) -> GameState {
        self.host.snapshot().cloned().unwrap()
    }

    /// Deliver everything in flight until the network is quiet.
    fn pump(&mut self, now: Instant) {
        loop {
            let mut moved = false;
            for remote in &mut self.remotes {
                while let Ok(text) = remote.uplink.try_recv() {
                    self.host.handle_message(remote.session.player_id(), &text).unwrap();
                    moved = true;
                }
            }
            for remote in &mut self.remotes {
                while let Ok(text) = remote.downlink.try_recv() {
                    remote.session.on_message(&text, now).unwrap();
                    moved = true;
                }
            }
            if !moved {
                break;
            }
        }
    }
}

fn top0() -> SideIndex {
    SideIndex::new(Side::Top, 0)
}

#[test]
fn test_host_shift_reaches_client() {
    let mut net = Net::new(&[0, 1]);
    net.connect(1);
    let now = Instant::now();
    net.pump(now);

    let shifted = net.host.apply_local(Action::ShiftTiles { side_index: top0() }).unwrap().unwrap();
    assert_eq!(shifted.phase, GamePhase::MovePlayer);
    net.pump(now);

    let mirror = net.remote(1).mirror().cloned().unwrap();
    assert_eq!(mirror.board, shifted.board);
    assert_eq!(mirror.phase, shifted.phase);
    assert_eq!(mirror, net.host_state());
}

#[test]
fn test_client_out_of_turn_sends_nothing() {
    let mut net = Net::new(&[0, 1]);
    net.connect(1);
    let now = Instant::now();
    net.pump(now);
    let before = net.remote(1).mirror().cloned();

    assert_eq!(net.remote(1).move_player(1, 3, 4, now), Ok(false));
    assert_eq!(net.remote(1).mirror().cloned(), before);
    assert!(net.remotes[0].uplink.try_recv().is_err());
}

#[test]
fn test_host_drops_out_of_turn_rpc() {
    let mut net = Net::new(&[0, 1]);
    net.connect(1);
    let now = Instant::now();
    net.pump(now);
    let before = net.host_state();

    net.host
        .handle_message(1, &Action::MovePlayer { x: 3, y: 4 }.to_json().unwrap())
        .unwrap();

    assert_eq!(net.host_state(), before);
    assert!(net.remotes[0].downlink.try_recv().is_err());
}

#[test]
fn test_partition_triggers_single_resync() {
    let mut net = Net::new(&[0, 1]);
    let mut state = net.host_state();
    state.player_turn = 1;
    net.host.set_game(state).unwrap();
    net.connect(1);
    let now = Instant::now();
    net.pump(now);

    assert_eq!(net.remote(1).shift_tiles(top0(), now), Ok(true));

    // The host never hears about it.
    let client = net.remote(1);
    assert!(!client.poll_resync(now + Duration::from_millis(999)));
    assert!(client.poll_resync(now + Duration::from_millis(1000)));
    assert!(!client.poll_resync(now + Duration::from_millis(5000)));

    let mut wire = Vec::new();
    while let Ok(text) = net.remotes[0].uplink.try_recv() {
        wire.push(Action::from_json(&text).unwrap());
    }
    assert_eq!(
        wire,
        vec![Action::ShiftTiles { side_index: top0() }, Action::RequestGame]
    );

    // The resync answer restores the host's view and the watchdog stays quiet.
    let text = HostMessage::snapshot(&net.host_state()).to_json().unwrap();
    net.remote(1).on_message(&text, now).unwrap();
    assert_eq!(net.remote(1).mirror().cloned(), Some(net.host_state()));
    assert!(!net.remote(1).resync().is_armed());
}

#[test]
fn test_repeated_snapshot_is_idempotent() {
    let mut net = Net::new(&[0, 1]);
    net.connect(1);
    let now = Instant::now();
    net.pump(now);

    net.host.apply_local(Action::ShiftTiles { side_index: top0() }).unwrap();
    let here = net.host_state().players[&0].position;
    let moved = net
        .host
        .apply_local(Action::MovePlayer { x: here.x, y: here.y })
        .unwrap()
        .unwrap();
    net.pump(now);

    let text = HostMessage::snapshot(&moved).to_json().unwrap();
    let client = net.remote(1);
    let deadline = client.next_deadline();
    client.on_message(&text, now + Duration::from_millis(50)).unwrap();
    assert_eq!(client.mirror(), Some(&moved));
    assert_eq!(client.next_deadline(), deadline);
}

#[test]
fn test_rejected_remote_action_is_not_broadcast() {
    let mut net = Net::new(&[0, 1]);
    net.connect(1);
    let now = Instant::now();
    net.pump(now);
    let before = net.host_state();

    // Turn holder, but the wrong phase.
    net.host
        .handle_message(0, &Action::MovePlayer { x: 0, y: 0 }.to_json().unwrap())
        .unwrap();
    assert_eq!(net.host_state(), before);
    assert!(net.remotes[0].downlink.try_recv().is_err());
}

/// One step of a random game, resolved against the current state.
fn pick_action(state: &GameState, reachable: &[Position], choice: u8, param: usize) -> Action {
    match state.phase {
        GamePhase::MovePlayer => {
            let target = reachable[param % reachable.len()];
            Action::MovePlayer { x: target.x, y: target.y }
        }
        _ if choice % 4 == 0 => Action::RotateFreeTile,
        _ => {
            let side = Side::ALL[param % 4];
            let index = 2 * ((param / 4) % state.board.side_length.div_ceil(2));
            Action::ShiftTiles { side_index: SideIndex::new(side, index) }
        }
    }
}

fn apply_direct(engine: &mut GameCore, player: PlayerId, action: Action) -> Result<GameState, String> {
    match action {
        Action::RotateFreeTile => engine.rotate_free_tile(Rotation::Ninety),
        Action::ShiftTiles { side_index } => engine.shift_tiles(side_index),
        Action::MovePlayer { x, y } => engine.move_player(player, Position::new(x, y)),
        Action::RequestGame => Err("not mutating".to_string()),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_networked_play_matches_direct_play(
        seed in any::<u64>(),
        steps in prop::collection::vec((any::<u8>(), 0usize..64), 1..40),
    ) {
        let players = [0, 1, 2];
        let settings = GameStartSettings {
            seed,
            ..GameStartSettings::with_players(players)
        };

        let mut net = Net::new(&players);
        net.host.set_game(GameState::new(&settings).unwrap()).unwrap();
        net.connect(1);
        net.connect(2);
        let mut direct = GameCore::default();
        direct.start_game(settings).unwrap();

        let now = Instant::now();
        net.pump(now);

        for (choice, param) in steps {
            let state = net.host_state();
            if state.phase == GamePhase::GameEnd {
                break;
            }
            let reachable = direct.currently_reachable().unwrap();
            let action = pick_action(&state, &reachable, choice, param);
            let turn = state.player_turn;

            let _ = apply_direct(&mut direct, turn, action);
            if turn == net.host.host_player() {
                let _ = net.host.apply_local(action);
            } else {
                let client = net.remote(turn);
                let _ = match action {
                    Action::RotateFreeTile => client.rotate_free_tile(now),
                    Action::ShiftTiles { side_index } => client.shift_tiles(side_index, now),
                    Action::MovePlayer { x, y } => client.move_player(turn, x, y, now),
                    Action::RequestGame => Ok(false),
                };
            }
            net.pump(now);

            let host_state = net.host_state();
            prop_assert_eq!(Some(&host_state), direct.current());
            for remote in &net.remotes {
                prop_assert_eq!(remote.session.mirror(), Some(&host_state));
                prop_assert!(!remote.session.resync().is_armed());
            }
        }
    }
}
