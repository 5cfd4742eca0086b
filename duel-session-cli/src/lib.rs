pub mod application;
pub mod infrastructure;

pub use application::{Player, PlayerCommand};
pub use infrastructure::{CliError, LogConfig, Result};
