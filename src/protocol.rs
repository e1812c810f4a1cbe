//! Command grammar for the line protocol.
//!
//! Each client line is one command. Server replies start with a three-digit
//! status code; multi-line blocks open with a `21x` line, carry one
//! space-prefixed row per entry, and close with a lone `.`.

use std::fmt;

/// Longest accepted game id, in decimal digits.
pub const MAX_GAME_ID_DIGITS: usize = 8;

/// Side a player takes in a game.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    White,
    Black,
}

impl Color {
    /// Parses the color argument of `offer`. Exactly `W` or `B`.
    pub fn parse(token: &str) -> Option<Color> {
        match token {
            "W" => Some(Color::White),
            "B" => Some(Color::Black),
            _ => None,
        }
    }

    pub fn opposite(self) -> Color {
        match self {
            Color::White => Color::Black,
            Color::Black => Color::White,
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Color::White => write!(f, "W"),
            Color::Black => write!(f, "B"),
        }
    }
}

/// One parsed client command.
///
/// Argument validation that maps to a dedicated status code is kept out of
/// the parser: `offer` with a bad color and `accept` with a bad id parse to
/// `None` payloads so the session can answer 405 and 407 respectively.
/// Wrong arity on any other command is simply an unknown command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Quit,
    Me { name: String, password: String },
    Register { name: String, password: String },
    Password { password: String },
    List,
    Ratings,
    Offer { color: Option<Color> },
    Accept { id: Option<u32> },
    Clean,
    Stop,
    Empty,
    Unknown,
}

impl Command {
    /// Parses one line off the wire. Verbs are case-insensitive.
    pub fn parse(line: &str) -> Command {
        let mut words = line.split_whitespace();
        let verb = match words.next() {
            None => return Command::Empty,
            Some(word) => word.to_ascii_lowercase(),
        };
        let args: Vec<&str> = words.collect();

        match (verb.as_str(), args.as_slice()) {
            ("help", []) => Command::Help,
            ("quit", []) => Command::Quit,
            ("me", [name, password]) => Command::Me {
                name: name.to_string(),
                password: password.to_string(),
            },
            ("register", [name, password]) => Command::Register {
                name: name.to_string(),
                password: password.to_string(),
            },
            ("password", [password]) => Command::Password {
                password: password.to_string(),
            },
            ("list", []) => Command::List,
            ("ratings", []) => Command::Ratings,
            ("offer", [color]) => Command::Offer {
                color: Color::parse(color),
            },
            ("offer", _) => Command::Offer { color: None },
            ("accept", [id]) => Command::Accept {
                id: parse_game_id(id),
            },
            ("accept", _) => Command::Accept { id: None },
            ("clean", []) => Command::Clean,
            ("stop", []) => Command::Stop,
            _ => Command::Unknown,
        }
    }
}

/// Parses a game id argument: decimal digits only, at most
/// [`MAX_GAME_ID_DIGITS`] of them.
pub fn parse_game_id(token: &str) -> Option<u32> {
    if token.is_empty() || token.len() > MAX_GAME_ID_DIGITS {
        return None;
    }
    if !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    token.parse().ok()
}

/// Body of the `help` block, one row per line.
pub const HELP_TEXT: &[&str] = &[
    " help                       this summary",
    " me <name> <password>       log in",
    " register <name> <password> create an account and log in",
    " password <password>        change your password",
    " list                       list offered and in-progress games",
    " ratings                    show the best rated players",
    " offer <W|B>                post a game offer playing the given color",
    " accept <id>                accept an offered game",
    " clean                      withdraw all your own offers",
    " stop                       shut the server down (admin only)",
    " quit                       close the connection",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_commands() {
        assert_eq!(Command::parse("help"), Command::Help);
        assert_eq!(Command::parse("quit"), Command::Quit);
        assert_eq!(Command::parse("list"), Command::List);
        assert_eq!(Command::parse("ratings"), Command::Ratings);
        assert_eq!(Command::parse("clean"), Command::Clean);
        assert_eq!(Command::parse("stop"), Command::Stop);
    }

    #[test]
    fn verbs_are_case_insensitive() {
        assert_eq!(Command::parse("LIST"), Command::List);
        assert_eq!(
            Command::parse("Me alice pw"),
            Command::Me {
                name: "alice".to_string(),
                password: "pw".to_string()
            }
        );
    }

    #[test]
    fn empty_line_is_silent() {
        assert_eq!(Command::parse(""), Command::Empty);
        assert_eq!(Command::parse("   "), Command::Empty);
    }

    #[test]
    fn offer_color_must_be_exact() {
        assert_eq!(
            Command::parse("offer W"),
            Command::Offer {
                color: Some(Color::White)
            }
        );
        assert_eq!(
            Command::parse("offer B"),
            Command::Offer {
                color: Some(Color::Black)
            }
        );
        assert_eq!(Command::parse("offer w"), Command::Offer { color: None });
        assert_eq!(Command::parse("offer X"), Command::Offer { color: None });
        assert_eq!(Command::parse("offer"), Command::Offer { color: None });
    }

    #[test]
    fn accept_id_bounds() {
        assert_eq!(Command::parse("accept 1"), Command::Accept { id: Some(1) });
        assert_eq!(
            Command::parse("accept 00000042"),
            Command::Accept { id: Some(42) }
        );
        // nine digits is over the length bound
        assert_eq!(
            Command::parse("accept 123456789"),
            Command::Accept { id: None }
        );
        assert_eq!(Command::parse("accept 12a"), Command::Accept { id: None });
        assert_eq!(Command::parse("accept -3"), Command::Accept { id: None });
        assert_eq!(Command::parse("accept"), Command::Accept { id: None });
    }

    #[test]
    fn wrong_arity_is_unknown() {
        assert_eq!(Command::parse("me alice"), Command::Unknown);
        assert_eq!(Command::parse("register alice pw extra"), Command::Unknown);
        assert_eq!(Command::parse("password"), Command::Unknown);
        assert_eq!(Command::parse("list everything"), Command::Unknown);
        assert_eq!(Command::parse("gibberish"), Command::Unknown);
    }

    #[test]
    fn color_roundtrip() {
        assert_eq!(Color::White.to_string(), "W");
        assert_eq!(Color::Black.to_string(), "B");
        assert_eq!(Color::White.opposite(), Color::Black);
    }
}
