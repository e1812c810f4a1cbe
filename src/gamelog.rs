//! Per-game transcript files.
//!
//! Each game gets an append-only file `log/<game id>`. The handle is owned
//! by the session driving the game, so writes never interleave between
//! games; process-level logging stays on the `log` crate facade.

use chrono::Utc;
use std::io;
use std::path::Path;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Append-only transcript for a single game.
pub struct GameLog {
    file: File,
    game_id: u32,
}

impl GameLog {
    pub async fn open(log_dir: &Path, game_id: u32) -> io::Result<GameLog> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_dir.join(game_id.to_string()))
            .await?;
        Ok(GameLog { file, game_id })
    }

    /// Appends one line and flushes it.
    pub async fn append(&mut self, message: &str) -> io::Result<()> {
        self.file.write_all(message.as_bytes()).await?;
        self.file.write_all(b"\n").await?;
        self.file.flush().await
    }

    /// Writes the game description header and a UTC timestamp.
    pub async fn header(&mut self, white: &str, black: &str) -> io::Result<()> {
        let started = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
        self.append(&format!(
            "game {}: {} (W) vs {} (B)",
            self.game_id, white, black
        ))
        .await?;
        self.append(&format!("started {}", started)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn header_and_moves_are_appended() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = GameLog::open(dir.path(), 7).await.unwrap();
        log.header("alice", "bob").await.unwrap();
        log.append("W e2e4").await.unwrap();

        let text = std::fs::read_to_string(dir.path().join("7")).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "game 7: alice (W) vs bob (B)");
        assert!(lines[1].starts_with("started "));
        assert_eq!(lines[2], "W e2e4");
    }

    #[tokio::test]
    async fn reopening_appends() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut log = GameLog::open(dir.path(), 3).await.unwrap();
            log.append("first").await.unwrap();
        }
        {
            let mut log = GameLog::open(dir.path(), 3).await.unwrap();
            log.append("second").await.unwrap();
        }
        let text = std::fs::read_to_string(dir.path().join("3")).unwrap();
        assert_eq!(text, "first\nsecond\n");
    }
}
