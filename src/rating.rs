//! Skill rating updates.
//!
//! Classic Elo with a fixed K factor. The update is a pure function of the
//! two old ratings and the game score; the score is white-relative at the
//! call site but this module only sees it from the perspective of the
//! player being updated (+1 win, 0 draw, -1 loss).

/// Rating assigned to newly registered players.
pub const BASE_RATING: i32 = 1200;

const K_FACTOR: f64 = 32.0;

/// Computes a player's new rating after one game against `opponent`.
///
/// `score` is from the updated player's perspective. Values outside
/// {-1, 0, +1} are not clamped; they extrapolate linearly.
pub fn update(own: i32, opponent: i32, score: i32) -> i32 {
    let expected = 1.0 / (1.0 + 10f64.powf(f64::from(opponent - own) / 400.0));
    let actual = (f64::from(score) + 1.0) / 2.0;
    own + (K_FACTOR * (actual - expected)).round() as i32
}
