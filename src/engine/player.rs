use uuid::Uuid;

use super::config::Tunables;
use super::world::Pos;

/// One connected (or grace-window retained) player.
///
/// Positions are grid-aligned pixel coordinates. Timestamps are engine
/// milliseconds supplied by the caller, never read from a wall clock here,
/// so tests can drive a synthetic clock.
#[derive(Clone, Debug)]
pub struct Player {
    pub conn_id: Uuid,
    /// Client-held token identifying a human across reconnects.
    pub identity: Option<String>,
    pub name: Option<String>,
    pub x: i32,
    pub y: i32,
    pub color: String,
    pub alive: bool,
    pub max_bombs: u32,
    pub active_bombs: u32,
    pub bomb_range: u32,
    pub speed_boosts: u32,
    /// Timestamp when invisibility expires; 0 = not invisible.
    pub invisible_until: u64,
    /// Standing movement directive; None = standing still.
    pub direction: Option<(i32, i32)>,
    pub last_move_ms: u64,
    pub last_activity_ms: u64,
    pub last_bomb_ms: u64,
}

impl Player {
    pub fn new(
        conn_id: Uuid,
        identity: Option<String>,
        name: Option<String>,
        spawn: Pos,
        color: String,
        now: u64,
    ) -> Self {
        Player {
            conn_id,
            identity,
            name,
            x: spawn.x,
            y: spawn.y,
            color,
            alive: true,
            max_bombs: 1,
            active_bombs: 0,
            bomb_range: 1,
            speed_boosts: 0,
            invisible_until: 0,
            direction: None,
            last_move_ms: now,
            last_activity_ms: now,
            last_bomb_ms: 0,
        }
    }

    /// Reset to base round stats at a fresh spawn (round restart / reset).
    pub fn reset_round(&mut self, spawn: Pos, now: u64) {
        self.x = spawn.x;
        self.y = spawn.y;
        self.alive = true;
        self.max_bombs = 1;
        self.active_bombs = 0;
        self.bomb_range = 1;
        self.speed_boosts = 0;
        self.invisible_until = 0;
        self.direction = None;
        self.last_move_ms = now;
        self.last_activity_ms = now;
    }

    /// Rebind a restored grace-window snapshot to a new connection.
    pub fn rebind(&mut self, conn_id: Uuid, now: u64) {
        self.conn_id = conn_id;
        self.direction = None;
        self.last_move_ms = now;
        self.last_activity_ms = now;
    }

    /// Effective ms between grid steps: each speed boost is 10% faster.
    pub fn move_interval_ms(&self, tunables: &Tunables) -> u64 {
        let mult = 0.9_f64.powi(self.speed_boosts as i32);
        (tunables.move_interval_ms as f64 * mult) as u64
    }

    pub fn is_invisible(&self, now: u64) -> bool {
        self.invisible_until > now
    }
}
