// Session registry: live players, color allocation, spawn balancing, and
// grace-window snapshots for reconnecting identities.

use std::collections::{HashMap, HashSet};

use rand::Rng;
use uuid::Uuid;

use super::config::COLORS;
use super::player::Player;
use super::world::{Pos, World};

/// A disconnected identified player retained for possible restoration.
#[derive(Clone, Debug)]
pub struct RetainedSnapshot {
    pub player: Player,
    pub expires_at: u64,
}

/// Owns every shared session resource: the player map, the color palette,
/// and the reconnect snapshot store. All mutation goes through these methods.
#[derive(Default)]
pub struct Roster {
    pub players: HashMap<Uuid, Player>,
    used_colors: HashSet<String>,
    snapshots: HashMap<String, RetainedSnapshot>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// First unused palette color. On exhaustion the palette degrades to
    /// reusing its first entry — never an error.
    fn allocate_color(&mut self) -> String {
        for color in COLORS {
            if !self.used_colors.contains(color) {
                self.used_colors.insert(color.to_string());
                return color.to_string();
            }
        }
        tracing::warn!("color palette exhausted, reusing first entry");
        COLORS[0].to_string()
    }

    fn release_color(&mut self, color: &str) {
        self.used_colors.remove(color);
    }

    /// Spawn point with the fewest players currently standing on it,
    /// ties broken uniformly at random to spread the population.
    pub fn pick_spawn(&self, world: &World) -> Pos {
        let counts: Vec<usize> = world
            .spawn_points
            .iter()
            .map(|sp| {
                self.players
                    .values()
                    .filter(|p| p.x == sp.x && p.y == sp.y)
                    .count()
            })
            .collect();
        let min = counts.iter().copied().min().unwrap_or(0);
        let candidates: Vec<Pos> = world
            .spawn_points
            .iter()
            .zip(&counts)
            .filter(|(_, &c)| c == min)
            .map(|(sp, _)| *sp)
            .collect();
        let mut rng = rand::thread_rng();
        candidates[rng.gen_range(0..candidates.len())]
    }

    /// Register a brand-new player on a fresh connection.
    pub fn join(
        &mut self,
        conn_id: Uuid,
        identity: Option<String>,
        name: Option<String>,
        world: &World,
        now: u64,
    ) -> &Player {
        let color = self.allocate_color();
        let spawn = self.pick_spawn(world);
        let player = Player::new(conn_id, identity, name, spawn, color, now);
        self.players.insert(conn_id, player);
        &self.players[&conn_id]
    }

    /// Connect-or-reconnect resolution for an identified client.
    ///
    /// A retained, still-alive, unexpired snapshot is restored under the new
    /// connection id (cancelling its pending purge). An identity that is still
    /// live on another connection is taken over. Anything else joins fresh.
    pub fn resolve(
        &mut self,
        conn_id: Uuid,
        identity: String,
        name: Option<String>,
        world: &World,
        now: u64,
    ) -> (&Player, bool) {
        // Take over a still-connected session for the same identity.
        let stale_conn = self
            .players
            .iter()
            .find(|(_, p)| p.identity.as_deref() == Some(identity.as_str()))
            .map(|(&c, _)| c);
        if let Some(old_conn) = stale_conn {
            if let Some(mut player) = self.players.remove(&old_conn) {
                player.rebind(conn_id, now);
                if let Some(n) = name {
                    player.name = Some(n);
                }
                self.players.insert(conn_id, player);
                return (&self.players[&conn_id], true);
            }
        }

        if let Some(snap) = self.snapshots.remove(&identity) {
            if snap.expires_at > now && snap.player.alive {
                let mut player = snap.player;
                player.rebind(conn_id, now);
                if let Some(n) = name {
                    player.name = Some(n);
                }
                tracing::info!(identity = %identity, "restored reconnecting player");
                self.players.insert(conn_id, player);
                return (&self.players[&conn_id], true);
            }
            // Dead or expired snapshot: release its color and fall through.
            self.release_color(&snap.player.color.clone());
        }

        (self.join(conn_id, Some(identity), name, world, now), false)
    }

    /// Drop a connection. Identified players leave a timestamped snapshot
    /// behind (color stays reserved until purge); anonymous players release
    /// their color immediately.
    pub fn leave(&mut self, conn_id: Uuid, now: u64, grace_window_ms: u64) -> Option<Player> {
        let player = self.players.remove(&conn_id)?;
        match &player.identity {
            Some(identity) => {
                self.snapshots.insert(
                    identity.clone(),
                    RetainedSnapshot {
                        player: player.clone(),
                        expires_at: now + grace_window_ms,
                    },
                );
            }
            None => {
                let color = player.color.clone();
                self.release_color(&color);
            }
        }
        Some(player)
    }

    /// Per-tick upsert: persist every live identified player's state so a
    /// reconnect restores the most recent position and stats.
    pub fn upsert_snapshots(&mut self, now: u64, grace_window_ms: u64) {
        let snaps: Vec<(String, Player)> = self
            .players
            .values()
            .filter_map(|p| p.identity.clone().map(|id| (id, p.clone())))
            .collect();
        for (identity, player) in snaps {
            self.snapshots.insert(
                identity,
                RetainedSnapshot {
                    player,
                    expires_at: now + grace_window_ms,
                },
            );
        }
    }

    /// Remove expired snapshots, releasing their colors. Returns how many
    /// were purged.
    pub fn purge_expired(&mut self, now: u64) -> usize {
        let expired: Vec<String> = self
            .snapshots
            .iter()
            .filter(|(identity, s)| {
                // A live connection for the identity keeps the color in use.
                s.expires_at <= now
                    && !self
                        .players
                        .values()
                        .any(|p| p.identity.as_deref() == Some(identity.as_str()))
            })
            .map(|(identity, _)| identity.clone())
            .collect();
        for identity in &expired {
            if let Some(snap) = self.snapshots.remove(identity) {
                self.release_color(&snap.player.color.clone());
                tracing::info!(identity = %identity, "purged expired reconnect snapshot");
            }
        }
        expired.len()
    }

    /// Forcibly remove a player with no grace window: color released, any
    /// retained snapshot dropped. Used when a session is kicked outright.
    pub fn drop_immediate(&mut self, conn_id: Uuid) {
        if let Some(player) = self.players.remove(&conn_id) {
            if let Some(identity) = &player.identity {
                self.snapshots.remove(identity);
            }
            self.release_color(&player.color.clone());
        }
    }

    pub fn has_snapshot(&self, identity: &str) -> bool {
        self.snapshots.contains_key(identity)
    }

    pub fn alive_count(&self) -> usize {
        self.players.values().filter(|p| p.alive).count()
    }
}
