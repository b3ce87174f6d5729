use std::collections::HashSet;

use rand::Rng;
use serde::Serialize;

use super::config::Tunables;

/// A destructible wall tile. `hidden_bomb` is resolved at generation time but
/// only revealed (as a bomb-capacity pickup) when the wall is destroyed.
#[derive(Clone, Debug)]
pub struct DestructibleWall {
    pub x: i32,
    pub y: i32,
    pub hidden_bomb: bool,
}

/// Grid-aligned pixel position, serialized for clients.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct Pos {
    pub x: i32,
    pub y: i32,
}

/// L-shape orientation of a spawn safe zone. Each zone clears the spawn tile
/// plus a 3-tile horizontal arm and a 3-tile vertical arm.
#[derive(Clone, Copy, Debug)]
enum ZonePattern {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

#[derive(Clone, Copy, Debug)]
struct SpawnZone {
    col: i32,
    row: i32,
    pattern: ZonePattern,
}

impl SpawnZone {
    /// Whether (col, row) lies inside this zone's L-shaped clear area.
    fn contains(&self, col: i32, row: i32) -> bool {
        let dx = col - self.col;
        let dy = row - self.row;
        match self.pattern {
            ZonePattern::TopLeft => (0..=3).contains(&dx) && dy == 0 || dx == 0 && (0..=3).contains(&dy),
            ZonePattern::TopRight => (-3..=0).contains(&dx) && dy == 0 || dx == 0 && (0..=3).contains(&dy),
            ZonePattern::BottomLeft => (0..=3).contains(&dx) && dy == 0 || dx == 0 && (-3..=0).contains(&dy),
            ZonePattern::BottomRight => (-3..=0).contains(&dx) && dy == 0 || dx == 0 && (-3..=0).contains(&dy),
        }
    }
}

/// Arena layout for one round: dimensions, walls, and spawn points.
/// Never patched in place — population-tier changes and round resets always
/// replace the whole world via `generate`.
pub struct World {
    pub cols: i32,
    pub rows: i32,
    pub scale: i32,
    pub indestructible: HashSet<(i32, i32)>,
    pub destructible: Vec<DestructibleWall>,
    pub spawn_points: Vec<Pos>,
    zones: Vec<SpawnZone>,
}

impl World {
    /// Generate a fresh arena.
    ///
    /// 1. Eight L-shaped spawn safe zones: four corners + four mid-edges.
    /// 2. Indestructible walls on interior tiles where row and col are both
    ///    even, outside every safe zone. The even/even lattice leaves a
    ///    clearable tile between any two walls, so no region can be sealed off.
    /// 3. Destructible walls rolled per remaining interior tile at
    ///    `destructible_wall_density`, each hiding a bomb pickup at
    ///    `hidden_bomb_chance`.
    pub fn generate(cols: i32, rows: i32, scale: i32, tunables: &Tunables) -> Self {
        let mut rng = rand::thread_rng();

        let zones = vec![
            SpawnZone { col: 0, row: 0, pattern: ZonePattern::TopLeft },
            SpawnZone { col: cols - 1, row: 0, pattern: ZonePattern::TopRight },
            SpawnZone { col: 0, row: rows - 1, pattern: ZonePattern::BottomLeft },
            SpawnZone { col: cols - 1, row: rows - 1, pattern: ZonePattern::BottomRight },
            SpawnZone { col: cols / 2, row: 0, pattern: ZonePattern::TopLeft },
            SpawnZone { col: cols / 2, row: rows - 1, pattern: ZonePattern::BottomLeft },
            SpawnZone { col: 0, row: rows / 2, pattern: ZonePattern::TopLeft },
            SpawnZone { col: cols - 1, row: rows / 2, pattern: ZonePattern::TopRight },
        ];

        let spawn_points = zones
            .iter()
            .map(|z| Pos { x: z.col * scale, y: z.row * scale })
            .collect();

        let in_safe_zone = |col: i32, row: i32| zones.iter().any(|z| z.contains(col, row));

        let mut indestructible = HashSet::new();
        for row in 1..rows - 1 {
            for col in 1..cols - 1 {
                if row % 2 == 0 && col % 2 == 0 && !in_safe_zone(col, row) {
                    indestructible.insert((col * scale, row * scale));
                }
            }
        }

        let mut destructible = Vec::new();
        for row in 1..rows - 1 {
            for col in 1..cols - 1 {
                if in_safe_zone(col, row) {
                    continue;
                }
                if indestructible.contains(&(col * scale, row * scale)) {
                    continue;
                }
                if rng.gen::<f64>() < tunables.destructible_wall_density {
                    destructible.push(DestructibleWall {
                        x: col * scale,
                        y: row * scale,
                        hidden_bomb: rng.gen::<f64>() < tunables.hidden_bomb_chance,
                    });
                }
            }
        }

        tracing::debug!(
            cols,
            rows,
            indestructible = indestructible.len(),
            destructible = destructible.len(),
            "generated world"
        );

        World {
            cols,
            rows,
            scale,
            indestructible,
            destructible,
            spawn_points,
            zones,
        }
    }

    pub fn width(&self) -> i32 {
        self.cols * self.scale
    }

    pub fn height(&self) -> i32 {
        self.rows * self.scale
    }

    /// Whether a pixel position lies on the grid.
    pub fn in_bounds(&self, x: i32, y: i32) -> bool {
        x >= 0 && x < self.width() && y >= 0 && y < self.height()
    }

    pub fn has_indestructible(&self, x: i32, y: i32) -> bool {
        self.indestructible.contains(&(x, y))
    }

    pub fn destructible_at(&self, x: i32, y: i32) -> Option<&DestructibleWall> {
        self.destructible.iter().find(|w| w.x == x && w.y == y)
    }

    pub fn has_wall(&self, x: i32, y: i32) -> bool {
        self.has_indestructible(x, y) || self.destructible_at(x, y).is_some()
    }

    /// Whether a tile (in tile coordinates) is inside any spawn safe zone.
    pub fn in_safe_zone(&self, col: i32, row: i32) -> bool {
        self.zones.iter().any(|z| z.contains(col, row))
    }

    /// Bounded random search for an unoccupied, wall-free tile. `occupied`
    /// holds extra pixel positions to avoid (players, bombs, pickups).
    /// Returns None after 100 failed attempts; callers fall back to
    /// spawn-point placement rather than treating this as fatal.
    pub fn random_empty_tile(&self, occupied: &HashSet<(i32, i32)>) -> Option<Pos> {
        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            let x = rng.gen_range(0..self.cols) * self.scale;
            let y = rng.gen_range(0..self.rows) * self.scale;
            if occupied.contains(&(x, y)) || self.has_wall(x, y) {
                continue;
            }
            return Some(Pos { x, y });
        }
        None
    }
}
