use duel_session_core::Role;

/// One line typed at the `join` prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerCommand {
    Say(String),
    Move(String),
    Seat(Role),
    Swap(String),
    Approve,
    Reject,
    Undo(u32),
    AllowUndo,
    DenyUndo,
    Timeout(Role),
    Roster,
    Help,
    Quit,
}

pub const HELP: &str = "\
say <text>          chat with everyone
move <text>         send a game move
seat a|b|observer   take a free seat or stand up
swap <name>         ask someone to trade roles
approve | reject    answer a swap request
undo [n]            ask the opponent to take back n moves
allow-undo          approve the opponent's undo request
deny-undo           reject it
timeout a|b         announce that a seat ran out of time
roster              list participants
quit                leave the session";

pub fn parse_role(text: &str) -> Option<Role> {
    match text.to_ascii_lowercase().as_str() {
        "a" | "seat-a" | "seata" => Some(Role::SeatA),
        "b" | "seat-b" | "seatb" => Some(Role::SeatB),
        "o" | "observer" => Some(Role::Observer),
        _ => None,
    }
}

impl PlayerCommand {
    pub fn parse(line: &str) -> Result<Self, String> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        let needs_text = |command: fn(String) -> PlayerCommand| {
            if rest.is_empty() {
                Err(format!("'{}' needs an argument", word))
            } else {
                Ok(command(rest.to_string()))
            }
        };

        match word.to_ascii_lowercase().as_str() {
            "say" => needs_text(PlayerCommand::Say),
            "move" => needs_text(PlayerCommand::Move),
            "swap" => needs_text(PlayerCommand::Swap),
            "seat" => parse_role(rest)
                .map(PlayerCommand::Seat)
                .ok_or_else(|| "usage: seat a|b|observer".to_string()),
            "timeout" => match parse_role(rest) {
                Some(role) if role.is_seat() => Ok(PlayerCommand::Timeout(role)),
                _ => Err("usage: timeout a|b".to_string()),
            },
            "undo" if rest.is_empty() => Ok(PlayerCommand::Undo(1)),
            "undo" => rest
                .parse()
                .map(PlayerCommand::Undo)
                .map_err(|_| "usage: undo [n]".to_string()),
            "approve" => Ok(PlayerCommand::Approve),
            "reject" => Ok(PlayerCommand::Reject),
            "allow-undo" => Ok(PlayerCommand::AllowUndo),
            "deny-undo" => Ok(PlayerCommand::DenyUndo),
            "roster" => Ok(PlayerCommand::Roster),
            "help" | "?" => Ok(PlayerCommand::Help),
            "quit" | "exit" => Ok(PlayerCommand::Quit),
            "" => Err("empty command".to_string()),
            other => Err(format!("unknown command '{}', try 'help'", other)),
        }
    }
}
