// Game engine: world generation, simulation, and connection orchestration.

pub mod config;
pub mod explosion;
pub mod game;
pub mod player;
pub mod roster;
pub mod server;
pub mod world;
