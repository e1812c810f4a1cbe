//! # gamehall
//!
//! A matchmaking and session broker for two-player turn-based games.
//! Clients speak a line-oriented text protocol over TCP: they authenticate,
//! post open game offers, accept other players' offers, and, once two
//! sessions are matched, are handed to a game driver that relays moves,
//! keeps both clocks, records a transcript, and reports a score that feeds
//! the players' ratings.
//!
//! ## Architecture
//!
//! Every accepted connection runs as its own task (`session`). All
//! cross-session coordination goes through two mechanisms:
//!
//! - the service state record (`state`), a single in-memory structure
//!   holding the game id counter, the post list, and the player table,
//!   guarded by one exclusive async mutex, and
//! - one-shot offer mailboxes (`rendezvous`), through which an accepting
//!   session delivers its own connection to the offering session.
//!
//! Player records and the game id counter are persisted under a versioned
//! directory (`store`); the player file is replaced with an atomic rename.
//! Boot (`boot`) migrates older on-disk layouts forward and, when another
//! server instance already owns the port, asks it to shut down over the
//! same wire protocol clients use.
//!
//! ## Shutdown
//!
//! The `stop` command (admin only) cancels every open offer, waits for all
//! in-progress games to wind down, and then tells the accept loop to exit,
//! so the process terminates cleanly with no game cut short.

pub mod boot;
pub mod conn;
pub mod driver;
pub mod gamelog;
pub mod protocol;
pub mod rating;
pub mod rendezvous;
pub mod session;
pub mod state;
pub mod store;

/// Version announced in the connection banner and recorded on disk.
pub const SERVER_VERSION: &str = "2.2";
