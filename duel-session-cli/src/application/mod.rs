pub mod commands;
pub mod player;
pub mod schema;

pub use commands::PlayerCommand;
pub use player::Player;
pub use schema::write_schemas;
