//! Game-play driver.
//!
//! Relays moves between two matched players, keeps both clocks, and writes
//! the transcript. The driver knows nothing about any particular game's
//! rules; it arbitrates turn order, time, resignation, and draw agreement,
//! and reports a white-relative score in {-1, 0, +1}.
//!
//! In-game wire protocol, distinct from the command protocol's status
//! codes: the player on move is prompted with `! your move, <ms> ms
//! remaining` and answers one of
//!
//! - `move <text>`: relayed to the opponent as `< move <text>`,
//! - `resign`: immediate loss,
//! - `draw`: offers a draw, relayed as `< draw`; the game is drawn when the
//!   opponent also sends `draw` on their own turn, and the offer lapses as
//!   soon as the opponent moves.
//!
//! Both players receive a final `= <score> <reason>` line. A clock that
//! runs out loses the game for the player on move.

use crate::conn::Connection;
use crate::gamelog::GameLog;
use crate::protocol::Color;
use log::debug;
use std::io;
use std::time::{Duration, Instant};
use tokio::time::timeout;

/// Per-player clock budget for one game, in milliseconds.
pub const CLOCK_BUDGET_MS: u64 = 300_000;

/// One side of a running game.
pub struct PlayerEnd {
    pub name: String,
    pub color: Color,
    pub conn: Connection,
    pub clock: Duration,
}

impl PlayerEnd {
    pub fn new(name: String, color: Color, conn: Connection) -> PlayerEnd {
        PlayerEnd {
            name,
            color,
            conn,
            clock: Duration::from_millis(CLOCK_BUDGET_MS),
        }
    }
}

/// Score when the given color wins.
fn win_for(color: Color) -> i32 {
    match color {
        Color::White => 1,
        Color::Black => -1,
    }
}

fn score_text(score: i32) -> &'static str {
    match score {
        1 => "+1",
        -1 => "-1",
        _ => "0",
    }
}

/// Runs one game to completion and returns the white-relative score.
///
/// The endpoints are borrowed so the caller keeps both sockets when the
/// game dies with an I/O error and still owes the survivors a reply.
pub async fn play(
    white: &mut PlayerEnd,
    black: &mut PlayerEnd,
    log: &mut GameLog,
) -> io::Result<i32> {
    let mut to_move = Color::White;
    let mut draw_offered_by: Option<Color> = None;

    loop {
        let (mover, other) = match to_move {
            Color::White => (&mut *white, &mut *black),
            Color::Black => (&mut *black, &mut *white),
        };

        mover
            .conn
            .send_line(&format!(
                "! your move, {} ms remaining",
                mover.clock.as_millis()
            ))
            .await?;

        let started = Instant::now();
        let line = match timeout(mover.clock, mover.conn.read_line()).await {
            Err(_) => {
                // flag fell
                mover.clock = Duration::ZERO;
                let score = win_for(other.color);
                let reason = format!("{} out of time", mover.name);
                return conclude(white, black, log, score, &reason).await;
            }
            Ok(read) => match read? {
                None => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("{} disconnected", mover.name),
                    ))
                }
                Some(line) => line,
            },
        };
        mover.clock = mover.clock.saturating_sub(started.elapsed());

        let mut words = line.split_whitespace();
        match words.next() {
            Some("move") => {
                let text = words.collect::<Vec<&str>>().join(" ");
                if text.is_empty() {
                    mover.conn.send_line("! empty move").await?;
                    continue;
                }
                log.append(&format!("{} {}", mover.color, text)).await?;
                other.conn.send_line(&format!("< move {}", text)).await?;
                // moving past an outstanding offer declines it
                if draw_offered_by == Some(other.color) {
                    draw_offered_by = None;
                }
                to_move = to_move.opposite();
            }
            Some("resign") => {
                let score = win_for(other.color);
                other.conn.send_line("< resign").await?;
                let reason = format!("{} resigns", mover.name);
                return conclude(white, black, log, score, &reason).await;
            }
            Some("draw") => {
                if draw_offered_by == Some(other.color) {
                    return conclude(white, black, log, 0, "draw agreed").await;
                }
                if draw_offered_by != Some(mover.color) {
                    draw_offered_by = Some(mover.color);
                    other.conn.send_line("< draw").await?;
                }
            }
            _ => {
                debug!("unrecognized game line from {}: {:?}", mover.name, line);
                mover
                    .conn
                    .send_line("! say: move <text> | resign | draw")
                    .await?;
            }
        }
    }
}

async fn conclude(
    white: &mut PlayerEnd,
    black: &mut PlayerEnd,
    log: &mut GameLog,
    score: i32,
    reason: &str,
) -> io::Result<i32> {
    let result = format!("= {} {}", score_text(score), reason);
    log.append(&result).await?;
    white.conn.send_line(&result).await?;
    black.conn.send_line(&result).await?;
    Ok(score)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scores_are_white_relative() {
        assert_eq!(win_for(Color::White), 1);
        assert_eq!(win_for(Color::Black), -1);
    }

    #[test]
    fn score_text_covers_all_outcomes() {
        assert_eq!(score_text(1), "+1");
        assert_eq!(score_text(-1), "-1");
        assert_eq!(score_text(0), "0");
    }
}
