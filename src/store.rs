//! Versioned on-disk state.
//!
//! Layout under the store root:
//!
//! ```text
//! VERSION           current schema version, single line
//! private/GAMEID    next game id, decimal
//! private/passwd    one `name password rating` record per line
//! log/<game id>     per-game transcripts
//! ```
//!
//! The player file is replaced by writing `passwd.tmp` and renaming it over
//! `passwd` in one step, so readers always see either the old or the new
//! table. `GAMEID` is small enough that it is rewritten in place; a crash
//! mid-write can truncate it, which operators must repair by hand.

use crate::rating::BASE_RATING;
use log::info;
use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Schema version this build reads and writes.
pub const ON_DISK_VERSION: &str = crate::SERVER_VERSION;

/// One row of the player table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerRecord {
    pub name: String,
    pub password: String,
    pub rating: i32,
}

/// Outcome of bringing the on-disk state up to the current schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrateOutcome {
    /// Nothing was on disk; a fresh tree was created.
    Bootstrapped,
    /// An older schema was rewritten in place.
    Upgraded { from: String },
    /// Already at the current version. A predecessor server may own the port.
    Current,
}

/// Handle to the store root directory.
#[derive(Debug, Clone)]
pub struct Store {
    root: PathBuf,
}

impl Store {
    pub fn open(root: impl Into<PathBuf>) -> Store {
        Store { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root.join("log")
    }

    fn private_dir(&self) -> PathBuf {
        self.root.join("private")
    }

    fn version_path(&self) -> PathBuf {
        self.root.join("VERSION")
    }

    fn passwd_path(&self) -> PathBuf {
        self.private_dir().join("passwd")
    }

    fn game_id_path(&self) -> PathBuf {
        self.private_dir().join("GAMEID")
    }

    /// Reads the `VERSION` file. `None` when the store has never been
    /// initialized.
    pub fn read_version(&self) -> io::Result<Option<String>> {
        match fs::read_to_string(self.version_path()) {
            Ok(text) => Ok(Some(text.trim().to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn write_version(&self, version: &str) -> io::Result<()> {
        fs::write(self.version_path(), format!("{version}\n"))
    }

    /// Loads the player table, keyed by name.
    pub fn load_players(&self) -> io::Result<HashMap<String, PlayerRecord>> {
        let text = fs::read_to_string(self.passwd_path())?;
        let mut players = HashMap::new();
        for (lineno, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            let [name, password, rating] = fields.as_slice() else {
                return Err(malformed("passwd", lineno, line));
            };
            let rating: i32 = rating
                .parse()
                .map_err(|_| malformed("passwd", lineno, line))?;
            players.insert(
                name.to_string(),
                PlayerRecord {
                    name: name.to_string(),
                    password: password.to_string(),
                    rating,
                },
            );
        }
        Ok(players)
    }

    /// Writes the player table atomically: `passwd.tmp` is written, synced,
    /// and renamed over `passwd`.
    pub fn save_players(&self, players: &HashMap<String, PlayerRecord>) -> io::Result<()> {
        let mut records: Vec<&PlayerRecord> = players.values().collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));

        let tmp_path = self.private_dir().join("passwd.tmp");
        let mut tmp = fs::File::create(&tmp_path)?;
        for record in records {
            writeln!(tmp, "{} {} {}", record.name, record.password, record.rating)?;
        }
        tmp.sync_all()?;
        drop(tmp);
        fs::rename(&tmp_path, self.passwd_path())
    }

    /// Reads the next game id to hand out.
    pub fn load_next_game_id(&self) -> io::Result<u32> {
        let text = fs::read_to_string(self.game_id_path())?;
        text.trim()
            .parse()
            .map_err(|_| malformed("GAMEID", 0, text.trim()))
    }

    /// Persists the next game id. Rewritten in place (tolerated hazard).
    pub fn save_next_game_id(&self, next: u32) -> io::Result<()> {
        fs::write(self.game_id_path(), format!("{next}\n"))
    }

    /// Brings the on-disk tree to [`ON_DISK_VERSION`], creating it from
    /// nothing if needed. Unknown versions are fatal.
    pub fn migrate(&self) -> io::Result<MigrateOutcome> {
        let found = match self.read_version()? {
            None => {
                self.bootstrap()?;
                info!("initialized fresh store at {}", self.root.display());
                return Ok(MigrateOutcome::Bootstrapped);
            }
            Some(version) => version,
        };

        let mut version = found.clone();
        if version == "2.0" {
            // 2.1 introduced per-game transcripts and the persistent id file
            fs::create_dir_all(self.log_dir())?;
            if !self.game_id_path().exists() {
                self.save_next_game_id(1)?;
            }
            self.write_version("2.1")?;
            version = "2.1".to_string();
        }
        if version == "2.1" {
            // 2.2 added the rating column to passwd
            let players = self.load_legacy_players()?;
            self.save_players(&players)?;
            self.write_version("2.2")?;
            version = "2.2".to_string();
        }

        if version != ON_DISK_VERSION {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "unrecognized on-disk version {found:?} at {} (this build handles {ON_DISK_VERSION})",
                    self.root.display()
                ),
            ));
        }
        if found == ON_DISK_VERSION {
            Ok(MigrateOutcome::Current)
        } else {
            info!("migrated store from version {} to {}", found, version);
            Ok(MigrateOutcome::Upgraded { from: found })
        }
    }

    fn bootstrap(&self) -> io::Result<()> {
        fs::create_dir_all(self.private_dir())?;
        fs::create_dir_all(self.log_dir())?;
        self.save_players(&HashMap::new())?;
        self.save_next_game_id(1)?;
        self.write_version(ON_DISK_VERSION)
    }

    /// Reads a 2-column `name password` passwd, assigning every player the
    /// base rating.
    fn load_legacy_players(&self) -> io::Result<HashMap<String, PlayerRecord>> {
        let text = fs::read_to_string(self.passwd_path())?;
        let mut players = HashMap::new();
        for (lineno, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            let [name, password] = fields.as_slice() else {
                return Err(malformed("passwd", lineno, line));
            };
            players.insert(
                name.to_string(),
                PlayerRecord {
                    name: name.to_string(),
                    password: password.to_string(),
                    rating: BASE_RATING,
                },
            );
        }
        Ok(players)
    }
}

fn malformed(file: &str, lineno: usize, line: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("malformed {file} line {}: {line:?}", lineno + 1),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, password: &str, rating: i32) -> PlayerRecord {
        PlayerRecord {
            name: name.to_string(),
            password: password.to_string(),
            rating,
        }
    }

    #[test]
    fn bootstrap_creates_the_tree() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path());

        assert_eq!(store.migrate().unwrap(), MigrateOutcome::Bootstrapped);
        assert_eq!(store.read_version().unwrap().as_deref(), Some("2.2"));
        assert!(store.load_players().unwrap().is_empty());
        assert_eq!(store.load_next_game_id().unwrap(), 1);
        assert!(store.log_dir().is_dir());

        // second boot finds the tree current
        assert_eq!(store.migrate().unwrap(), MigrateOutcome::Current);
    }

    #[test]
    fn players_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path());
        store.migrate().unwrap();

        let mut players = HashMap::new();
        players.insert("alice".to_string(), record("alice", "pw1", 1216));
        players.insert("bob".to_string(), record("bob", "pw2", 1184));
        store.save_players(&players).unwrap();

        assert_eq!(store.load_players().unwrap(), players);
    }

    #[test]
    fn save_replaces_the_whole_table() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path());
        store.migrate().unwrap();

        let mut players = HashMap::new();
        players.insert("alice".to_string(), record("alice", "pw", 1200));
        store.save_players(&players).unwrap();

        players.remove("alice");
        players.insert("carol".to_string(), record("carol", "pw", 1300));
        store.save_players(&players).unwrap();

        let loaded = store.load_players().unwrap();
        assert!(!loaded.contains_key("alice"));
        assert_eq!(loaded["carol"].rating, 1300);
    }

    #[test]
    fn game_id_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path());
        store.migrate().unwrap();

        store.save_next_game_id(42).unwrap();
        assert_eq!(store.load_next_game_id().unwrap(), 42);
    }

    #[test]
    fn migrates_two_column_passwd() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path());
        fs::create_dir_all(store.private_dir()).unwrap();
        fs::write(store.passwd_path(), "alice secret\nbob hunter2\n").unwrap();
        fs::write(store.version_path(), "2.1\n").unwrap();
        store.save_next_game_id(5).unwrap();
        fs::create_dir_all(store.log_dir()).unwrap();

        assert_eq!(
            store.migrate().unwrap(),
            MigrateOutcome::Upgraded {
                from: "2.1".to_string()
            }
        );
        let players = store.load_players().unwrap();
        assert_eq!(players["alice"].rating, BASE_RATING);
        assert_eq!(players["bob"].password, "hunter2");
        assert_eq!(store.read_version().unwrap().as_deref(), Some("2.2"));
    }

    #[test]
    fn migrates_from_two_zero() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path());
        fs::create_dir_all(store.private_dir()).unwrap();
        fs::write(store.passwd_path(), "alice secret\n").unwrap();
        fs::write(store.version_path(), "2.0\n").unwrap();

        assert_eq!(
            store.migrate().unwrap(),
            MigrateOutcome::Upgraded {
                from: "2.0".to_string()
            }
        );
        assert!(store.log_dir().is_dir());
        assert_eq!(store.load_next_game_id().unwrap(), 1);
        assert_eq!(store.load_players().unwrap()["alice"].rating, BASE_RATING);
    }

    #[test]
    fn unknown_version_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path());
        fs::create_dir_all(store.root()).unwrap();
        fs::write(store.version_path(), "9.9\n").unwrap();

        assert!(store.migrate().is_err());
    }

    #[test]
    fn malformed_passwd_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path());
        store.migrate().unwrap();
        fs::write(store.passwd_path(), "alice pw notanumber\n").unwrap();

        assert!(store.load_players().is_err());
    }
}
