// Gameplay constants and tunable parameters.

/// Base grid dimensions at full population (1.0x tier).
pub const BASE_COLS: i32 = 32;
pub const BASE_ROWS: i32 = 27;

/// Pixels per tile. All positions in the engine are grid-aligned multiples of this.
pub const TILE_SCALE: i32 = 32;

/// Color palette assigned to players in order, first unused wins.
pub const COLORS: [&str; 20] = [
    "#FF0000", "#00FF00", "#0000FF", "#FFFF00", "#FF00FF", "#00FFFF",
    "#FFA500", "#800080", "#FFFFFF", "#008000", "#ADD8E6", "#FFC0CB",
    "#A52A2A", "#808080", "#FFD700", "#40E0D0", "#FA8072", "#90EE90",
    "#E6E6FA", "#D2B48C",
];

/// Tunable gameplay parameters. Defaults are the documented values; tests
/// override individual fields instead of patching constants.
#[derive(Debug, Clone)]
pub struct Tunables {
    /// Simulation tick interval in ms.
    pub tick_interval_ms: u64,
    /// Base ms between grid steps at zero speed boosts.
    pub move_interval_ms: u64,
    /// Bomb fuse duration in ms.
    pub bomb_fuse_ms: u64,
    /// How long an explosion tile stays active, in ms.
    pub explosion_duration_ms: u64,
    /// Fraction of eligible interior tiles that receive a destructible wall.
    pub destructible_wall_density: f64,
    /// Probability that a destructible wall hides a bomb-capacity pickup.
    pub hidden_bomb_chance: f64,
    /// Powerup roll thresholds, checked cumulatively in this order:
    /// invisibility, then flame, then speed.
    pub invisibility_powerup_chance: f64,
    pub flame_powerup_chance: f64,
    pub speed_powerup_chance: f64,
    /// How long invisibility lasts, in ms.
    pub invisibility_duration_ms: u64,
    /// Cap on collected speed boosts.
    pub max_speed_boosts: u32,
    /// Players idle longer than this are disconnected by the sweep.
    pub inactivity_timeout_ms: u64,
    /// How often the idle sweep runs, in ms.
    pub sweep_interval_ms: u64,
    /// How long a disconnected identified player's snapshot is retained, in ms.
    pub grace_window_ms: u64,
    /// Delay between a draw and the automatic round restart, in ms.
    pub draw_restart_delay_ms: u64,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            tick_interval_ms: 100,
            move_interval_ms: 195,
            bomb_fuse_ms: 3000,
            explosion_duration_ms: 500,
            destructible_wall_density: 0.4,
            hidden_bomb_chance: 0.333,
            invisibility_powerup_chance: 0.05,
            flame_powerup_chance: 0.25,
            speed_powerup_chance: 0.25,
            invisibility_duration_ms: 10_000,
            max_speed_boosts: 5,
            inactivity_timeout_ms: 60_000,
            sweep_interval_ms: 5000,
            grace_window_ms: 300_000,
            draw_restart_delay_ms: 5000,
        }
    }
}

/// Grid dimensions for a given live player count. Small lobbies get a compact
/// arena so rounds stay confrontational; the factor is applied to the base
/// grid and floored.
pub fn grid_size(player_count: usize) -> (i32, i32) {
    let factor = if player_count <= 4 {
        0.5
    } else if player_count <= 12 {
        0.75
    } else {
        1.0
    };
    (
        (BASE_COLS as f64 * factor).floor() as i32,
        (BASE_ROWS as f64 * factor).floor() as i32,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_size_tiers() {
        assert_eq!(grid_size(0), (16, 13));
        assert_eq!(grid_size(4), (16, 13));
        assert_eq!(grid_size(5), (24, 20));
        assert_eq!(grid_size(12), (24, 20));
        assert_eq!(grid_size(13), (32, 27));
        assert_eq!(grid_size(20), (32, 27));
    }

    #[test]
    fn test_default_tunables() {
        let t = Tunables::default();
        assert_eq!(t.bomb_fuse_ms, 3000);
        assert_eq!(t.explosion_duration_ms, 500);
        assert_eq!(t.move_interval_ms, 195);
        assert_eq!(t.max_speed_boosts, 5);
        // The three powerup chances must sum below 1.0 so "nothing" stays possible.
        assert!(
            t.invisibility_powerup_chance + t.flame_powerup_chance + t.speed_powerup_chance < 1.0
        );
    }
}
