// Application configuration, loaded from environment variables and CLI flags.

use crate::engine::config::Tunables;

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port to bind the HTTP server to.
    pub port: u16,
    /// Gameplay parameters (tick cadence overridable for load testing).
    pub tunables: Tunables,
}

impl Config {
    /// Load configuration from environment variables and CLI arguments.
    ///
    /// Environment variables:
    /// - `PORT` - HTTP server port (default: 3000)
    /// - `BOMBGRID_TICK_MS` - Simulation tick interval in ms (default: 100)
    ///
    /// CLI flags:
    /// - `--port <PORT>` - Override the port
    pub fn load() -> Self {
        let args: Vec<String> = std::env::args().collect();
        Self::from_parts(&args, std::env::var("PORT").ok(), std::env::var("BOMBGRID_TICK_MS").ok())
    }

    fn from_parts(args: &[String], port_env: Option<String>, tick_env: Option<String>) -> Self {
        // Port: CLI flag --port takes precedence, then env var, then default
        let port = Self::parse_cli_value(args, "--port")
            .and_then(|v| v.parse().ok())
            .or_else(|| port_env.and_then(|v| v.parse().ok()))
            .unwrap_or(3000);

        let mut tunables = Tunables::default();
        if let Some(tick_ms) = tick_env.and_then(|v| v.parse().ok()) {
            tunables.tick_interval_ms = tick_ms;
        }

        Config { port, tunables }
    }

    /// Parse a CLI flag value like `--port 8080`.
    fn parse_cli_value(args: &[String], flag: &str) -> Option<String> {
        args.windows(2).find_map(|pair| {
            if pair[0] == flag {
                Some(pair[1].clone())
            } else {
                None
            }
        })
    }
}
