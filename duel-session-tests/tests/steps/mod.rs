mod game_steps;
mod messaging_steps;
mod reconnection_steps;
mod seat_steps;
mod swap_steps;

use duel_session_core::Role;

pub fn parse_role(text: &str) -> Role {
    match text {
        "SeatA" => Role::SeatA,
        "SeatB" => Role::SeatB,
        "Observer" => Role::Observer,
        other => panic!("Unknown role '{}'", other),
    }
}
