// Blast propagation for a single detonation. Chaining is the clock's job:
// this module never recurses and never mutates the bomb list.

use std::collections::HashSet;

use super::game::Bomb;
use super::world::{Pos, World};

/// Result of one detonation: the tiles now exploding and the ids of bombs
/// sitting on them (candidates for chain detonation).
pub struct Detonation {
    pub tiles: Vec<Pos>,
    pub chained: Vec<u64>,
}

/// Compute the blast of a bomb at `center` with the given range.
///
/// The center tile always explodes. Each of the four axis rays steps outward
/// up to `range` tiles: an off-grid tile or an indestructible wall stops the
/// ray without adding the tile; a destructible wall tile is added, marked for
/// deferred destruction, and stops the ray; an empty tile is added and the
/// ray continues. Wall destruction is deferred through `walls_to_destroy` so
/// simultaneous detonations in one tick see the same wall layout.
pub fn detonate(
    center: Pos,
    range: u32,
    world: &World,
    bombs: &[Bomb],
    walls_to_destroy: &mut HashSet<(i32, i32)>,
) -> Detonation {
    let scale = world.scale;
    let mut tiles = vec![center];

    if world.destructible_at(center.x, center.y).is_some() {
        walls_to_destroy.insert((center.x, center.y));
    }

    for (dx, dy) in [(1, 0), (-1, 0), (0, 1), (0, -1)] {
        for i in 1..=range as i32 {
            let x = center.x + dx * scale * i;
            let y = center.y + dy * scale * i;

            if !world.in_bounds(x, y) || world.has_indestructible(x, y) {
                break;
            }

            if world.destructible_at(x, y).is_some() {
                tiles.push(Pos { x, y });
                walls_to_destroy.insert((x, y));
                break;
            }

            tiles.push(Pos { x, y });
        }
    }

    let chained = bombs
        .iter()
        .filter(|b| tiles.iter().any(|t| t.x == b.x && t.y == b.y))
        .map(|b| b.id)
        .collect();

    Detonation { tiles, chained }
}
