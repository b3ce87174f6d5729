// Prometheus metrics definitions for the Bombgrid backend.

use lazy_static::lazy_static;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // ── Gauges ───────────────────────────────────────────────────────

    /// Live WebSocket connections.
    pub static ref CONNECTED_PLAYERS: IntGauge =
        IntGauge::new("bombgrid_connected_players", "Live WebSocket connections").unwrap();

    /// Players currently alive in the round.
    pub static ref ALIVE_PLAYERS: IntGauge =
        IntGauge::new("bombgrid_alive_players", "Players currently alive").unwrap();

    // ── Counters ─────────────────────────────────────────────────────

    /// Total simulation ticks processed.
    pub static ref TICKS_TOTAL: IntCounter =
        IntCounter::new("bombgrid_ticks_total", "Total simulation ticks processed").unwrap();

    /// Total bombs placed by players.
    pub static ref BOMBS_PLACED_TOTAL: IntCounter =
        IntCounter::new("bombgrid_bombs_placed_total", "Total bombs placed").unwrap();

    /// Total bombs detonated (fuse or chain).
    pub static ref BOMBS_EXPLODED_TOTAL: IntCounter =
        IntCounter::new("bombgrid_bombs_exploded_total", "Total bombs detonated").unwrap();

    /// Total destructible walls destroyed.
    pub static ref WALLS_DESTROYED_TOTAL: IntCounter = IntCounter::new(
        "bombgrid_walls_destroyed_total",
        "Total destructible walls destroyed",
    )
    .unwrap();

    /// Total player deaths.
    pub static ref PLAYER_DEATHS_TOTAL: IntCounter =
        IntCounter::new("bombgrid_player_deaths_total", "Total player deaths").unwrap();

    /// Rounds that ended with a winner.
    pub static ref ROUNDS_WON_TOTAL: IntCounter =
        IntCounter::new("bombgrid_rounds_won_total", "Rounds ended with a winner").unwrap();

    /// Rounds that ended in mutual elimination.
    pub static ref ROUNDS_DRAWN_TOTAL: IntCounter =
        IntCounter::new("bombgrid_rounds_drawn_total", "Rounds ended in a draw").unwrap();

    // ── Histograms ───────────────────────────────────────────────────

    /// Per-tick processing time in seconds.
    pub static ref TICK_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new("bombgrid_tick_duration_seconds", "Per-tick processing time")
            .buckets(vec![0.0001, 0.0005, 0.001, 0.002, 0.005, 0.01, 0.025, 0.05, 0.1]),
    )
    .unwrap();
}

/// Register all metrics with the custom registry. Call once at startup.
pub fn register_metrics() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(CONNECTED_PLAYERS.clone()),
        Box::new(ALIVE_PLAYERS.clone()),
        Box::new(TICKS_TOTAL.clone()),
        Box::new(BOMBS_PLACED_TOTAL.clone()),
        Box::new(BOMBS_EXPLODED_TOTAL.clone()),
        Box::new(WALLS_DESTROYED_TOTAL.clone()),
        Box::new(PLAYER_DEATHS_TOTAL.clone()),
        Box::new(ROUNDS_WON_TOTAL.clone()),
        Box::new(ROUNDS_DRAWN_TOTAL.clone()),
        Box::new(TICK_DURATION_SECONDS.clone()),
    ];

    for c in collectors {
        REGISTRY.register(c).expect("failed to register metric");
    }
}

/// Serialize all registered metrics to the Prometheus text exposition format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}
