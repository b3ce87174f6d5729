// Core simulation: the fixed-stage tick, command dispatch, and per-viewer
// snapshot projection.

use std::collections::{HashSet, VecDeque};

use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::metrics;

use super::config::{grid_size, Tunables, TILE_SCALE};
use super::explosion;
use super::roster::Roster;
use super::world::{Pos, World};

/// A placed bomb. `id` is the engine-wide identity used to deduplicate the
/// chain-reaction worklist.
#[derive(Clone, Debug)]
pub struct Bomb {
    pub id: u64,
    pub x: i32,
    pub y: i32,
    pub placed_ms: u64,
    pub owner: Uuid,
}

/// An active blast tile. Self-expires after the display duration.
#[derive(Clone, Debug)]
pub struct Explosion {
    pub x: i32,
    pub y: i32,
    pub created_ms: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerupKind {
    Invisibility,
    Flame,
    Speed,
}

#[derive(Clone, Debug, Serialize)]
pub struct Powerup {
    pub x: i32,
    pub y: i32,
    pub kind: PowerupKind,
}

/// Round outcome. `Draw` is a distinct sentinel, not the absence of a winner.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Outcome {
    Open,
    Winner { player_id: Uuid },
    Draw,
}

/// Inbound client commands, a closed tagged union dispatched by match.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    /// First message on a connection: connect-or-reconnect.
    Hello {
        identity: Option<String>,
        name: Option<String>,
    },
    MoveStart { x: i32, y: i32 },
    MoveStop,
    PlaceBomb,
    ResetGame,
    RequestRestart,
}

/// Semantic cue events (signals only, no payloads).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CueKind {
    Win,
    Draw,
    Restart,
    Eat,
}

/// Who should receive a cue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Audience {
    Everyone,
    Player(Uuid),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cue {
    pub audience: Audience,
    pub kind: CueKind,
}

// ── Snapshot types (Broadcast Projector output) ──────────────────────

#[derive(Clone, Debug, Serialize)]
pub struct PlayerSnapshot {
    pub id: Uuid,
    pub name: Option<String>,
    pub x: i32,
    pub y: i32,
    pub color: String,
    pub alive: bool,
    pub max_bombs: u32,
    pub active_bombs: u32,
    pub bomb_range: u32,
    pub speed_boosts: u32,
    pub invisible_until: u64,
    pub is_moving: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct BombSnapshot {
    pub x: i32,
    pub y: i32,
    pub placed_ms: u64,
    pub fuse_ms: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct ExplosionSnapshot {
    pub x: i32,
    pub y: i32,
    pub created_ms: u64,
}

/// Destructible wall as clients see it: the hidden-bomb flag is stripped.
#[derive(Clone, Debug, Serialize)]
pub struct WallSnapshot {
    pub x: i32,
    pub y: i32,
}

/// Per-viewer filtered state for one tick.
#[derive(Clone, Debug, Serialize)]
pub struct StateSnapshot {
    pub players: Vec<PlayerSnapshot>,
    pub bomb_pickups: Vec<Pos>,
    pub powerups: Vec<Powerup>,
    pub bombs: Vec<BombSnapshot>,
    pub explosions: Vec<ExplosionSnapshot>,
    pub indestructible_walls: Vec<WallSnapshot>,
    pub destructible_walls: Vec<WallSnapshot>,
    pub outcome: Outcome,
    pub width: i32,
    pub height: i32,
    pub timestamp: u64,
}

/// One live arena session: world, roster, items, and round outcome.
/// All mutation is serialized by the owner (see `server::GameServer`);
/// every operation takes the current engine time in ms.
pub struct Game {
    pub tunables: Tunables,
    pub world: World,
    pub roster: Roster,
    pub bombs: Vec<Bomb>,
    pub explosions: Vec<Explosion>,
    pub bomb_pickups: Vec<Pos>,
    pub powerups: Vec<Powerup>,
    pub outcome: Outcome,
    /// Deadline for the automatic post-draw restart; cleared on restart.
    restart_at: Option<u64>,
    next_bomb_id: u64,
    pub round_started_at: String,
}

impl Game {
    pub fn new(tunables: Tunables) -> Self {
        let (cols, rows) = grid_size(0);
        let world = World::generate(cols, rows, TILE_SCALE, &tunables);
        Game {
            tunables,
            world,
            roster: Roster::new(),
            bombs: Vec::new(),
            explosions: Vec::new(),
            bomb_pickups: Vec::new(),
            powerups: Vec::new(),
            outcome: Outcome::Open,
            restart_at: None,
            next_bomb_id: 0,
            round_started_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    // ── Connection lifecycle ─────────────────────────────────────────

    /// Connect-or-reconnect. Returns the assigned color and whether a
    /// retained identity was restored.
    pub fn connect(
        &mut self,
        conn_id: Uuid,
        identity: Option<String>,
        name: Option<String>,
        now: u64,
    ) -> (String, bool) {
        let (color, restored) = match identity {
            Some(identity) => {
                let (p, restored) = self.roster.resolve(conn_id, identity, name, &self.world, now);
                (p.color.clone(), restored)
            }
            None => {
                let p = self.roster.join(conn_id, None, name, &self.world, now);
                (p.color.clone(), false)
            }
        };
        // A restored position may predate a world regeneration.
        self.revalidate_position(conn_id);
        self.resize_for_population(now);
        tracing::info!(conn_id = %conn_id, restored, "player connected");
        (color, restored)
    }

    /// Drop a connection (client close, error, or idle sweep).
    pub fn disconnect(&mut self, conn_id: Uuid, now: u64) {
        let grace = self.tunables.grace_window_ms;
        if self.roster.leave(conn_id, now, grace).is_some() {
            tracing::info!(conn_id = %conn_id, "player disconnected");
            self.resize_for_population(now);
        }
    }

    /// Move a restored player off any tile that no longer exists or is walled.
    fn revalidate_position(&mut self, conn_id: Uuid) {
        let needs_respawn = match self.roster.players.get(&conn_id) {
            Some(p) => !self.world.in_bounds(p.x, p.y) || self.world.has_wall(p.x, p.y),
            None => false,
        };
        if needs_respawn {
            let spawn = self.roster.pick_spawn(&self.world);
            if let Some(p) = self.roster.players.get_mut(&conn_id) {
                p.x = spawn.x;
                p.y = spawn.y;
            }
        }
    }

    /// Regenerate the world when the population crosses a grid tier.
    /// Replacement is always wholesale: walls, bombs, and items never survive.
    fn resize_for_population(&mut self, now: u64) -> bool {
        let (cols, rows) = grid_size(self.roster.players.len());
        if cols == self.world.cols && rows == self.world.rows {
            return false;
        }
        tracing::info!(
            players = self.roster.players.len(),
            cols,
            rows,
            "population tier changed, regenerating world"
        );
        self.world = World::generate(cols, rows, TILE_SCALE, &self.tunables);
        self.clear_transient();

        // Reposition onto least-loaded spawn points, exactly as at join.
        // The bounded random search only covers a world without spawn points.
        let ids: Vec<Uuid> = self.roster.players.keys().copied().collect();
        for id in ids {
            let pos = if self.world.spawn_points.is_empty() {
                match self.world.random_empty_tile(&HashSet::new()) {
                    Some(p) => p,
                    None => {
                        tracing::warn!("empty-tile search exhausted, placing at origin");
                        Pos { x: 0, y: 0 }
                    }
                }
            } else {
                self.roster.pick_spawn(&self.world)
            };
            if let Some(p) = self.roster.players.get_mut(&id) {
                p.x = pos.x;
                p.y = pos.y;
                p.active_bombs = 0;
            }
        }
        true
    }

    fn clear_transient(&mut self) {
        self.bombs.clear();
        self.explosions.clear();
        self.bomb_pickups.clear();
        self.powerups.clear();
    }

    // ── Command dispatch ─────────────────────────────────────────────

    /// Apply one client command. Rejected intent is silently ignored;
    /// commands for departed players are no-ops.
    pub fn apply(&mut self, conn_id: Uuid, cmd: ClientCommand, now: u64) {
        match cmd {
            // The handshake is consumed by the transport layer.
            ClientCommand::Hello { .. } => {}
            ClientCommand::MoveStart { x, y } => self.move_start(conn_id, x, y, now),
            ClientCommand::MoveStop => self.move_stop(conn_id, now),
            ClientCommand::PlaceBomb => self.place_bomb(conn_id, now),
            // Reset and restart are handled by the server layer because they
            // involve disconnecting other sessions; reaching here is a no-op.
            ClientCommand::ResetGame | ClientCommand::RequestRestart => {}
        }
    }

    fn move_start(&mut self, conn_id: Uuid, x: i32, y: i32, now: u64) {
        if !matches!((x, y), (1, 0) | (-1, 0) | (0, 1) | (0, -1)) {
            return; // malformed direction, rejected silently
        }
        if self.outcome != Outcome::Open {
            return;
        }
        let base_interval = self.tunables.move_interval_ms;
        if let Some(p) = self.roster.players.get_mut(&conn_id) {
            if !p.alive {
                return;
            }
            p.last_activity_ms = now;
            p.direction = Some((x, y));
            // Rewind the move timer so a direction change can step immediately.
            p.last_move_ms = now.saturating_sub(base_interval);
        }
    }

    fn move_stop(&mut self, conn_id: Uuid, now: u64) {
        if let Some(p) = self.roster.players.get_mut(&conn_id) {
            p.last_activity_ms = now;
            p.direction = None;
        }
    }

    fn place_bomb(&mut self, conn_id: Uuid, now: u64) {
        if self.outcome != Outcome::Open {
            return;
        }
        let Some(p) = self.roster.players.get(&conn_id) else {
            return;
        };
        if !p.alive || p.active_bombs >= p.max_bombs {
            return;
        }
        let (x, y) = (p.x, p.y);
        if self.bombs.iter().any(|b| b.x == x && b.y == y) {
            return; // one bomb per tile
        }
        self.next_bomb_id += 1;
        self.bombs.push(Bomb {
            id: self.next_bomb_id,
            x,
            y,
            placed_ms: now,
            owner: conn_id,
        });
        if let Some(p) = self.roster.players.get_mut(&conn_id) {
            p.active_bombs += 1;
            p.last_activity_ms = now;
            p.last_bomb_ms = now;
        }
        metrics::BOMBS_PLACED_TOTAL.inc();
    }

    /// Full round reset requested by one player: everyone else is kicked,
    /// the world regenerates for the shrunken population, and the initiator
    /// restarts with base stats. Returns the kicked connection ids so the
    /// transport can close their sockets.
    pub fn reset_game(&mut self, initiator: Uuid, now: u64) -> Vec<Uuid> {
        let kicked: Vec<Uuid> = self
            .roster
            .players
            .keys()
            .copied()
            .filter(|&id| id != initiator)
            .collect();
        for id in &kicked {
            self.roster.drop_immediate(*id);
        }
        tracing::info!(initiator = %initiator, kicked = kicked.len(), "game reset");
        self.start_new_round(now);
        kicked
    }

    /// Manual restart, only honored once an outcome is recorded.
    pub fn request_restart(&mut self, conn_id: Uuid, now: u64) -> bool {
        if self.outcome == Outcome::Open {
            return false;
        }
        tracing::info!(conn_id = %conn_id, "round restart requested");
        self.start_new_round(now);
        true
    }

    /// Regenerate the world for the current population tier and reset every
    /// connected player to base stats at a fresh spawn.
    fn start_new_round(&mut self, now: u64) {
        let (cols, rows) = grid_size(self.roster.players.len());
        self.world = World::generate(cols, rows, TILE_SCALE, &self.tunables);
        self.clear_transient();
        self.outcome = Outcome::Open;
        self.restart_at = None;
        self.round_started_at = chrono::Utc::now().to_rfc3339();

        let ids: Vec<Uuid> = self.roster.players.keys().copied().collect();
        for id in ids {
            let spawn = self.roster.pick_spawn(&self.world);
            if let Some(p) = self.roster.players.get_mut(&id) {
                p.reset_round(spawn, now);
            }
        }
    }

    // ── The tick ─────────────────────────────────────────────────────

    /// Advance the simulation by one tick. Stages run in a fixed order; the
    /// returned cues are routed to clients by the caller.
    pub fn tick(&mut self, now: u64) -> Vec<Cue> {
        let mut cues = Vec::new();

        match self.outcome {
            // A decided round freezes the world entirely.
            Outcome::Winner { .. } => return cues,
            // A draw freezes simulation but still counts down to the restart.
            Outcome::Draw => {
                if self.restart_at.is_some_and(|at| now >= at) {
                    self.start_new_round(now);
                    cues.push(Cue {
                        audience: Audience::Everyone,
                        kind: CueKind::Restart,
                    });
                }
                return cues;
            }
            Outcome::Open => {}
        }

        self.resolve_explosions(now);
        self.expire_explosions(now);
        self.move_players(now, &mut cues);
        self.apply_deaths();
        self.check_outcome(now, &mut cues);

        let grace = self.tunables.grace_window_ms;
        self.roster.upsert_snapshots(now, grace);
        cues
    }

    /// Stages 2-4: fuse check, iterative chain resolution, and the one-pass
    /// commit of consumed bombs and destroyed walls.
    fn resolve_explosions(&mut self, now: u64) {
        let fuse = self.tunables.bomb_fuse_ms;
        let mut exploded: HashSet<u64> = HashSet::new();
        let mut worklist: VecDeque<u64> = VecDeque::new();

        for b in &self.bombs {
            if now.saturating_sub(b.placed_ms) >= fuse {
                exploded.insert(b.id);
                worklist.push_back(b.id);
            }
        }

        // FIFO worklist, deduplicated by bomb id: termination is bounded by
        // the live bomb count even with adjacency cycles. Never recursive.
        let mut walls_to_destroy: HashSet<(i32, i32)> = HashSet::new();
        while let Some(bomb_id) = worklist.pop_front() {
            let Some(bomb) = self.bombs.iter().find(|b| b.id == bomb_id) else {
                continue;
            };
            let center = Pos { x: bomb.x, y: bomb.y };
            let owner = bomb.owner;
            // A chained bomb always uses its own owner's current range.
            let range = self
                .roster
                .players
                .get(&owner)
                .map(|p| p.bomb_range)
                .unwrap_or(1);

            let det = explosion::detonate(center, range, &self.world, &self.bombs, &mut walls_to_destroy);
            for t in det.tiles {
                self.explosions.push(Explosion {
                    x: t.x,
                    y: t.y,
                    created_ms: now,
                });
            }
            for chained in det.chained {
                if exploded.insert(chained) {
                    worklist.push_back(chained);
                }
            }
            if let Some(p) = self.roster.players.get_mut(&owner) {
                p.active_bombs = p.active_bombs.saturating_sub(1);
            }
            metrics::BOMBS_EXPLODED_TOTAL.inc();
        }

        if !exploded.is_empty() {
            self.bombs.retain(|b| !exploded.contains(&b.id));
        }
        if !walls_to_destroy.is_empty() {
            self.commit_wall_destruction(&walls_to_destroy);
        }
    }

    /// Deferred wall destruction: each destroyed wall yields exactly one of
    /// bomb-pickup, powerup, or nothing. Powerup type uses one roll against
    /// cumulative thresholds in fixed precedence order:
    /// invisibility, then flame, then speed.
    fn commit_wall_destruction(&mut self, walls_to_destroy: &HashSet<(i32, i32)>) {
        let inv = self.tunables.invisibility_powerup_chance;
        let flame = self.tunables.flame_powerup_chance;
        let speed = self.tunables.speed_powerup_chance;
        let mut rng = rand::thread_rng();

        let walls = std::mem::take(&mut self.world.destructible);
        let mut kept = Vec::with_capacity(walls.len());
        for wall in walls {
            if !walls_to_destroy.contains(&(wall.x, wall.y)) {
                kept.push(wall);
                continue;
            }
            metrics::WALLS_DESTROYED_TOTAL.inc();
            if wall.hidden_bomb {
                self.bomb_pickups.push(Pos { x: wall.x, y: wall.y });
                continue;
            }
            let roll: f64 = rng.gen();
            let kind = if roll < inv {
                Some(PowerupKind::Invisibility)
            } else if roll < inv + flame {
                Some(PowerupKind::Flame)
            } else if roll < inv + flame + speed {
                Some(PowerupKind::Speed)
            } else {
                None
            };
            if let Some(kind) = kind {
                self.powerups.push(Powerup {
                    x: wall.x,
                    y: wall.y,
                    kind,
                });
            }
        }
        self.world.destructible = kept;
    }

    /// Stage 5: drop explosions older than the display duration.
    fn expire_explosions(&mut self, now: u64) {
        let ttl = self.tunables.explosion_duration_ms;
        self.explosions
            .retain(|e| now.saturating_sub(e.created_ms) < ttl);
    }

    /// Stage 6: one grid step per due player, then item consumption.
    fn move_players(&mut self, now: u64, cues: &mut Vec<Cue>) {
        let scale = self.world.scale;
        let ids: Vec<Uuid> = self.roster.players.keys().copied().collect();
        for id in ids {
            let Some(p) = self.roster.players.get(&id) else {
                continue;
            };
            if !p.alive {
                continue;
            }
            let Some((dx, dy)) = p.direction else {
                continue;
            };
            if now.saturating_sub(p.last_move_ms) < p.move_interval_ms(&self.tunables) {
                continue;
            }
            let (from_x, from_y) = (p.x, p.y);
            let nx = from_x + dx * scale;
            let ny = from_y + dy * scale;

            if let Some(p) = self.roster.players.get_mut(&id) {
                p.last_move_ms = now;
            }

            if !self.world.in_bounds(nx, ny) || self.world.has_wall(nx, ny) {
                continue;
            }
            // A bomb is solid unless the player is standing on that very bomb
            // (walking off); once vacated it blocks them like anyone else.
            if let Some(bomb) = self.bombs.iter().find(|b| b.x == nx && b.y == ny) {
                if bomb.x != from_x || bomb.y != from_y {
                    continue;
                }
            }

            if let Some(p) = self.roster.players.get_mut(&id) {
                p.x = nx;
                p.y = ny;
            }
            self.consume_items(id, nx, ny, now, cues);
        }
    }

    /// Item pickup on a freshly entered tile.
    fn consume_items(&mut self, id: Uuid, x: i32, y: i32, now: u64, cues: &mut Vec<Cue>) {
        let mut ate = false;

        if let Some(idx) = self.bomb_pickups.iter().position(|p| p.x == x && p.y == y) {
            self.bomb_pickups.swap_remove(idx);
            if let Some(p) = self.roster.players.get_mut(&id) {
                p.max_bombs += 1;
            }
            ate = true;
        }

        if let Some(idx) = self.powerups.iter().position(|p| p.x == x && p.y == y) {
            let powerup = self.powerups.swap_remove(idx);
            let max_boosts = self.tunables.max_speed_boosts;
            let invis_ms = self.tunables.invisibility_duration_ms;
            if let Some(p) = self.roster.players.get_mut(&id) {
                match powerup.kind {
                    PowerupKind::Flame => p.bomb_range += 1,
                    PowerupKind::Speed => {
                        if p.speed_boosts < max_boosts {
                            p.speed_boosts += 1;
                        }
                    }
                    PowerupKind::Invisibility => p.invisible_until = now + invis_ms,
                }
            }
            ate = true;
        }

        if ate {
            cues.push(Cue {
                audience: Audience::Player(id),
                kind: CueKind::Eat,
            });
        }
    }

    /// Stage 7: any living player on an active explosion tile dies.
    /// Self-inflicted and foreign blasts are not distinguished.
    fn apply_deaths(&mut self) {
        for p in self.roster.players.values_mut() {
            if p.alive
                && self
                    .explosions
                    .iter()
                    .any(|e| e.x == p.x && e.y == p.y)
            {
                p.alive = false;
                metrics::PLAYER_DEATHS_TOTAL.inc();
            }
        }
    }

    /// Stage 8: last survivor wins; simultaneous mutual elimination draws
    /// and schedules an automatic restart.
    fn check_outcome(&mut self, now: u64, cues: &mut Vec<Cue>) {
        let total = self.roster.players.len();
        if total <= 1 {
            return;
        }
        let alive: Vec<Uuid> = self
            .roster
            .players
            .values()
            .filter(|p| p.alive)
            .map(|p| p.conn_id)
            .collect();
        match alive.len() {
            1 => {
                let winner = alive[0];
                self.outcome = Outcome::Winner { player_id: winner };
                tracing::info!(winner = %winner, "round won");
                metrics::ROUNDS_WON_TOTAL.inc();
                cues.push(Cue {
                    audience: Audience::Everyone,
                    kind: CueKind::Win,
                });
            }
            0 => {
                self.outcome = Outcome::Draw;
                self.restart_at = Some(now + self.tunables.draw_restart_delay_ms);
                tracing::info!("mutual elimination, round drawn");
                metrics::ROUNDS_DRAWN_TOTAL.inc();
                cues.push(Cue {
                    audience: Audience::Everyone,
                    kind: CueKind::Draw,
                });
            }
            _ => {}
        }
    }

    // ── Broadcast Projector ──────────────────────────────────────────

    /// Build the filtered snapshot one viewer receives: players invisible to
    /// someone other than themselves are omitted, but a viewer always sees
    /// their own entry. The hidden-bomb flag never leaves the server.
    pub fn snapshot_for(&self, viewer: Uuid, now: u64) -> StateSnapshot {
        let players = self
            .roster
            .players
            .values()
            .filter(|p| p.conn_id == viewer || !p.is_invisible(now))
            .map(|p| PlayerSnapshot {
                id: p.conn_id,
                name: p.name.clone(),
                x: p.x,
                y: p.y,
                color: p.color.clone(),
                alive: p.alive,
                max_bombs: p.max_bombs,
                active_bombs: p.active_bombs,
                bomb_range: p.bomb_range,
                speed_boosts: p.speed_boosts,
                invisible_until: p.invisible_until,
                is_moving: p.direction.is_some(),
            })
            .collect();

        StateSnapshot {
            players,
            bomb_pickups: self.bomb_pickups.clone(),
            powerups: self.powerups.clone(),
            bombs: self
                .bombs
                .iter()
                .map(|b| BombSnapshot {
                    x: b.x,
                    y: b.y,
                    placed_ms: b.placed_ms,
                    fuse_ms: self.tunables.bomb_fuse_ms,
                })
                .collect(),
            explosions: self
                .explosions
                .iter()
                .map(|e| ExplosionSnapshot {
                    x: e.x,
                    y: e.y,
                    created_ms: e.created_ms,
                })
                .collect(),
            indestructible_walls: self
                .world
                .indestructible
                .iter()
                .map(|&(x, y)| WallSnapshot { x, y })
                .collect(),
            destructible_walls: self
                .world
                .destructible
                .iter()
                .map(|w| WallSnapshot { x: w.x, y: w.y })
                .collect(),
            outcome: self.outcome,
            width: self.world.width(),
            height: self.world.height(),
            timestamp: now,
        }
    }

    /// Players idle past the inactivity threshold, for the sweep to disconnect.
    pub fn idle_players(&self, now: u64) -> Vec<Uuid> {
        let timeout = self.tunables.inactivity_timeout_ms;
        self.roster
            .players
            .values()
            .filter(|p| now.saturating_sub(p.last_activity_ms) > timeout)
            .map(|p| p.conn_id)
            .collect()
    }
}
