pub mod config;
pub mod database;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod models;
pub mod queries;
pub mod services;
pub mod state;
pub mod store;
pub mod workers;

pub use config::Config;
pub use database::{DbConn, DbPool};
pub use error::{Error, Result};
pub use state::AppState;

/// Load configuration from environment variables
pub fn load_config() -> std::result::Result<Config, Box<dyn std::error::Error>> {
    Ok(Config::load()?)
}
