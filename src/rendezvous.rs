//! One-shot rendezvous between an offering session and whoever resolves
//! the offer.
//!
//! Every published offer carries the sending half of a oneshot channel, its
//! mailbox. Exactly one message is ever delivered: an accepting session
//! hands over its connection, or a canceller (`clean`, `stop`, or the
//! owner's own disappearance) withdraws the offer. Single-producer is
//! enforced by the state guard: the offer is removed from the post list
//! before anyone sends, so there is never a second sender.

use crate::conn::Connection;
use tokio::sync::oneshot;

/// Message delivered exactly once into an offer's mailbox.
#[derive(Debug)]
pub enum MatchMsg {
    /// Another session took the offer and transfers its connection.
    Accepted {
        accepter: String,
        accepter_client: u64,
        conn: Connection,
    },
    /// The offer was withdrawn.
    Cancelled,
}

/// Sending half, stored with the offer in service state.
pub type Mailbox = oneshot::Sender<MatchMsg>;

/// Receiving half, awaited by the offering session.
pub type MailboxWait = oneshot::Receiver<MatchMsg>;

pub fn mailbox() -> (Mailbox, MailboxWait) {
    oneshot::channel()
}

/// Completion signal for an in-progress game: the playing session fires the
/// sender once the game has fully wound down; `stop` drains the receivers.
pub fn completion() -> (oneshot::Sender<()>, oneshot::Receiver<()>) {
    oneshot::channel()
}
