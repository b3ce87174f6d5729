// Connection orchestration: owns the game behind a lock, fans filtered
// snapshots out to sockets, and drives the tick and idle-sweep loops.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::metrics;

use super::config::Tunables;
use super::game::{Audience, ClientCommand, Cue, CueKind, Game, StateSnapshot};

/// Milliseconds since the Unix epoch, the engine's time base.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Outbound wire messages.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Color assignment, sent immediately after the handshake.
    Color { color: String },
    /// Full initial state for a new or restored connection.
    Init {
        player_id: Uuid,
        round_started_at: String,
        state: StateSnapshot,
    },
    /// Per-tick filtered state.
    State(StateSnapshot),
    PlayerJoined { player_id: Uuid },
    PlayerLeft { player_id: Uuid },
    /// Semantic cue, signal only.
    Cue { kind: CueKind },
}

type Outbound = mpsc::UnboundedSender<String>;

/// The single shared server: one game, one lock. Handlers and the tick loop
/// serialize on the game mutex, which is the engine's whole concurrency story.
pub struct GameServer {
    game: Mutex<Game>,
    connections: std::sync::Mutex<HashMap<Uuid, Outbound>>,
    tunables: Tunables,
}

impl GameServer {
    pub fn new(tunables: Tunables) -> Arc<Self> {
        Arc::new(GameServer {
            game: Mutex::new(Game::new(tunables.clone())),
            connections: std::sync::Mutex::new(HashMap::new()),
            tunables,
        })
    }

    fn send_to(&self, conn_id: Uuid, msg: &ServerMessage) {
        if let Ok(text) = serde_json::to_string(msg) {
            let connections = self.connections.lock().unwrap();
            if let Some(tx) = connections.get(&conn_id) {
                // A closed receiver just means the socket is going away.
                let _ = tx.send(text);
            }
        }
    }

    fn broadcast(&self, msg: &ServerMessage, skip: Option<Uuid>) {
        if let Ok(text) = serde_json::to_string(msg) {
            let connections = self.connections.lock().unwrap();
            for (&id, tx) in connections.iter() {
                if Some(id) == skip {
                    continue;
                }
                let _ = tx.send(text.clone());
            }
        }
    }

    fn route_cues(&self, cues: &[Cue]) {
        for cue in cues {
            let msg = ServerMessage::Cue { kind: cue.kind };
            match cue.audience {
                Audience::Everyone => self.broadcast(&msg, None),
                Audience::Player(id) => self.send_to(id, &msg),
            }
        }
    }

    /// Register a handshaken connection: join (or restore) the player, send
    /// the color and initial state, and announce the arrival to everyone else.
    pub async fn connect(
        &self,
        conn_id: Uuid,
        identity: Option<String>,
        name: Option<String>,
        tx: Outbound,
    ) {
        self.connections.lock().unwrap().insert(conn_id, tx);
        metrics::CONNECTED_PLAYERS.set(self.connections.lock().unwrap().len() as i64);

        let now = now_ms();
        let mut game = self.game.lock().await;
        let (color, _restored) = game.connect(conn_id, identity, name, now);
        let init = ServerMessage::Init {
            player_id: conn_id,
            round_started_at: game.round_started_at.clone(),
            state: game.snapshot_for(conn_id, now),
        };
        metrics::ALIVE_PLAYERS.set(game.roster.alive_count() as i64);
        drop(game);

        self.send_to(conn_id, &ServerMessage::Color { color });
        self.send_to(conn_id, &init);
        self.broadcast(
            &ServerMessage::PlayerJoined { player_id: conn_id },
            Some(conn_id),
        );
    }

    /// Tear down a connection (socket closed, errored, or idle-swept).
    pub async fn disconnect(&self, conn_id: Uuid) {
        let removed = self.connections.lock().unwrap().remove(&conn_id).is_some();
        metrics::CONNECTED_PLAYERS.set(self.connections.lock().unwrap().len() as i64);

        let mut game = self.game.lock().await;
        game.disconnect(conn_id, now_ms());
        metrics::ALIVE_PLAYERS.set(game.roster.alive_count() as i64);
        drop(game);

        if removed {
            self.broadcast(&ServerMessage::PlayerLeft { player_id: conn_id }, None);
        }
    }

    /// Dispatch one parsed client command.
    pub async fn handle_command(&self, conn_id: Uuid, cmd: ClientCommand) {
        match cmd {
            ClientCommand::ResetGame => {
                let kicked = {
                    let mut game = self.game.lock().await;
                    game.reset_game(conn_id, now_ms())
                };
                // Dropping the senders ends the kicked sockets' write pumps.
                {
                    let mut connections = self.connections.lock().unwrap();
                    for id in &kicked {
                        connections.remove(id);
                    }
                }
                for id in kicked {
                    self.broadcast(&ServerMessage::PlayerLeft { player_id: id }, None);
                }
            }
            ClientCommand::RequestRestart => {
                let restarted = {
                    let mut game = self.game.lock().await;
                    game.request_restart(conn_id, now_ms())
                };
                if restarted {
                    self.broadcast(
                        &ServerMessage::Cue {
                            kind: CueKind::Restart,
                        },
                        None,
                    );
                }
            }
            other => {
                let mut game = self.game.lock().await;
                game.apply(conn_id, other, now_ms());
            }
        }
    }

    /// One tick: advance the game, route cues, and send every connected
    /// viewer their own filtered snapshot.
    pub async fn tick_once(&self, now: u64) {
        let started = Instant::now();

        let mut game = self.game.lock().await;
        let cues = game.tick(now);
        let viewers: Vec<Uuid> = self.connections.lock().unwrap().keys().copied().collect();
        let snapshots: Vec<(Uuid, StateSnapshot)> = viewers
            .into_iter()
            .map(|id| (id, game.snapshot_for(id, now)))
            .collect();
        metrics::ALIVE_PLAYERS.set(game.roster.alive_count() as i64);
        drop(game);

        self.route_cues(&cues);
        for (id, snapshot) in snapshots {
            self.send_to(id, &ServerMessage::State(snapshot));
        }

        metrics::TICKS_TOTAL.inc();
        metrics::TICK_DURATION_SECONDS.observe(started.elapsed().as_secs_f64());
    }

    /// The fixed-cadence tick loop. Never returns.
    pub async fn run_tick_loop(self: Arc<Self>) {
        let mut interval =
            tokio::time::interval(Duration::from_millis(self.tunables.tick_interval_ms));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            self.tick_once(now_ms()).await;
        }
    }

    /// Periodic sweep: disconnect players idle past the inactivity timeout
    /// and purge expired reconnect snapshots. Never returns.
    pub async fn run_idle_sweep(self: Arc<Self>) {
        let mut interval =
            tokio::time::interval(Duration::from_millis(self.tunables.sweep_interval_ms));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let now = now_ms();
            let idle = {
                let game = self.game.lock().await;
                game.idle_players(now)
            };
            for conn_id in idle {
                tracing::info!(conn_id = %conn_id, "disconnecting idle player");
                self.disconnect(conn_id).await;
            }
            let mut game = self.game.lock().await;
            game.roster.purge_expired(now);
        }
    }

    /// Test and diagnostics access to the game state.
    pub async fn with_game<R>(&self, f: impl FnOnce(&mut Game) -> R) -> R {
        let mut game = self.game.lock().await;
        f(&mut game)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::game::Outcome;

    fn test_server() -> Arc<GameServer> {
        GameServer::new(Tunables {
            destructible_wall_density: 0.0,
            ..Tunables::default()
        })
    }

    async fn attach(server: &GameServer) -> (Uuid, mpsc::UnboundedReceiver<String>) {
        let conn = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        server.connect(conn, None, None, tx).await;
        (conn, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<serde_json::Value> {
        let mut out = Vec::new();
        while let Ok(text) = rx.try_recv() {
            out.push(serde_json::from_str(&text).unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_connect_sends_color_then_init() {
        let server = test_server();
        let (conn, mut rx) = attach(&server).await;
        let msgs = drain(&mut rx);
        assert_eq!(msgs[0]["type"], "color");
        assert!(msgs[0]["color"].as_str().unwrap().starts_with('#'));
        assert_eq!(msgs[1]["type"], "init");
        assert_eq!(msgs[1]["player_id"], conn.to_string());
        assert!(msgs[1]["state"]["players"].is_array());
    }

    #[tokio::test]
    async fn test_join_announced_to_others_only() {
        let server = test_server();
        let (_a, mut rx_a) = attach(&server).await;
        drain(&mut rx_a);
        let (b, mut rx_b) = attach(&server).await;

        let to_a = drain(&mut rx_a);
        assert!(to_a
            .iter()
            .any(|m| m["type"] == "player_joined" && m["player_id"] == b.to_string()));
        let to_b = drain(&mut rx_b);
        assert!(!to_b.iter().any(|m| m["type"] == "player_joined"));
    }

    #[tokio::test]
    async fn test_tick_sends_per_viewer_state() {
        let server = test_server();
        let (a, mut rx_a) = attach(&server).await;
        let (b, mut rx_b) = attach(&server).await;
        drain(&mut rx_a);
        drain(&mut rx_b);

        // Make b invisible: a's snapshot omits them, b's own includes them.
        server
            .with_game(|g| g.roster.players.get_mut(&b).unwrap().invisible_until = u64::MAX)
            .await;
        server.tick_once(now_ms()).await;

        let state_a = drain(&mut rx_a)
            .into_iter()
            .find(|m| m["type"] == "state")
            .unwrap();
        let ids_a: Vec<String> = state_a["players"]
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["id"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(ids_a, vec![a.to_string()]);

        let state_b = drain(&mut rx_b)
            .into_iter()
            .find(|m| m["type"] == "state")
            .unwrap();
        assert_eq!(state_b["players"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_disconnect_announced() {
        let server = test_server();
        let (a, mut rx_a) = attach(&server).await;
        let (b, _rx_b) = attach(&server).await;
        drain(&mut rx_a);

        server.disconnect(b).await;
        let msgs = drain(&mut rx_a);
        assert!(msgs
            .iter()
            .any(|m| m["type"] == "player_left" && m["player_id"] == b.to_string()));
        let remaining = server.with_game(|g| g.roster.players.len()).await;
        assert_eq!(remaining, 1);
    }

    #[tokio::test]
    async fn test_reset_game_drops_other_connections() {
        let server = test_server();
        let (a, mut rx_a) = attach(&server).await;
        let (_b, mut rx_b) = attach(&server).await;
        drain(&mut rx_a);
        drain(&mut rx_b);

        server.handle_command(a, ClientCommand::ResetGame).await;
        // b's sender was dropped, ending its pump.
        assert!(matches!(
            rx_b.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
        let remaining = server.with_game(|g| g.roster.players.len()).await;
        assert_eq!(remaining, 1);
    }

    #[tokio::test]
    async fn test_command_flows_into_game() {
        let server = test_server();
        let (a, _rx) = attach(&server).await;
        server.handle_command(a, ClientCommand::PlaceBomb).await;
        let bombs = server.with_game(|g| g.bombs.len()).await;
        assert_eq!(bombs, 1);
    }

    #[tokio::test]
    async fn test_win_cue_broadcast() {
        let server = test_server();
        let (_a, mut rx_a) = attach(&server).await;
        let (b, mut rx_b) = attach(&server).await;
        drain(&mut rx_a);
        drain(&mut rx_b);

        server
            .with_game(|g| g.roster.players.get_mut(&b).unwrap().alive = false)
            .await;
        server.tick_once(now_ms()).await;

        for rx in [&mut rx_a, &mut rx_b] {
            let msgs = drain(rx);
            assert!(msgs.iter().any(|m| m["type"] == "cue" && m["kind"] == "win"));
        }
        let outcome = server.with_game(|g| g.outcome).await;
        assert!(matches!(outcome, Outcome::Winner { .. }));
    }

    #[tokio::test]
    async fn test_restart_request_broadcasts_cue() {
        let server = test_server();
        let (a, mut rx_a) = attach(&server).await;
        let (b, _rx_b) = attach(&server).await;
        drain(&mut rx_a);

        server.handle_command(a, ClientCommand::RequestRestart).await;
        assert!(!drain(&mut rx_a)
            .iter()
            .any(|m| m["type"] == "cue" && m["kind"] == "restart"));

        server
            .with_game(|g| g.roster.players.get_mut(&b).unwrap().alive = false)
            .await;
        server.tick_once(now_ms()).await;
        drain(&mut rx_a);

        server.handle_command(a, ClientCommand::RequestRestart).await;
        assert!(drain(&mut rx_a)
            .iter()
            .any(|m| m["type"] == "cue" && m["kind"] == "restart"));
    }
}
