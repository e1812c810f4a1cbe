//! Shared service state.
//!
//! One record holds everything the sessions coordinate through: the game id
//! counter, the post list (open offers and in-progress games), and the
//! player table. It is shared as [`SharedState`] and mutated only while the
//! mutex is held. Holders must not keep the guard across blocking waits:
//! socket reads, mailbox awaits, and the game driver all happen outside the
//! critical section, with any needed data copied out first.

use crate::protocol::Color;
use crate::rendezvous::Mailbox;
use crate::store::PlayerRecord;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};

pub type SharedState = Arc<Mutex<ServiceState>>;

/// A published offer waiting for an opponent.
#[derive(Debug)]
pub struct Offer {
    pub game_id: u32,
    pub owner: String,
    pub owner_client: u64,
    pub side: Color,
    pub mailbox: Mailbox,
}

/// A game currently being played.
#[derive(Debug)]
pub struct InProgress {
    pub game_id: u32,
    pub white: String,
    pub black: String,
    /// Taken by `stop` so it can await the game's end.
    pub done: Option<oneshot::Receiver<()>>,
}

/// Entry in the post list.
#[derive(Debug)]
pub enum Post {
    Offer(Offer),
    InProgress(InProgress),
}

impl Post {
    fn game_id(&self) -> u32 {
        match self {
            Post::Offer(offer) => offer.game_id,
            Post::InProgress(game) => game.game_id,
        }
    }
}

/// Result of trying to take an offer out of the post list.
pub enum TakeOffer {
    Taken(Offer),
    /// No offer with that id (never existed, already matched, or cancelled).
    Missing,
    /// More than one post carries the id. Broken invariant; internal error.
    Duplicate,
}

/// The process-wide state record.
#[derive(Debug)]
pub struct ServiceState {
    /// Next game id to hand out. Strictly above every id ever issued.
    pub next_game_id: u32,
    posts: Vec<Post>,
    pub players: HashMap<String, PlayerRecord>,
}

impl ServiceState {
    pub fn new(next_game_id: u32, players: HashMap<String, PlayerRecord>) -> ServiceState {
        ServiceState {
            next_game_id,
            posts: Vec::new(),
            players,
        }
    }

    /// Hands out the next game id.
    pub fn allocate_game_id(&mut self) -> u32 {
        let id = self.next_game_id;
        self.next_game_id += 1;
        id
    }

    pub fn publish_offer(&mut self, offer: Offer) {
        debug_assert!(!self.posts.iter().any(|p| p.game_id() == offer.game_id));
        self.posts.push(Post::Offer(offer));
    }

    /// Locates and removes the offer with `game_id`.
    pub fn take_offer(&mut self, game_id: u32) -> TakeOffer {
        if self.posts.iter().filter(|p| p.game_id() == game_id).count() > 1 {
            return TakeOffer::Duplicate;
        }
        let index = self.posts.iter().position(
            |p| matches!(p, Post::Offer(offer) if offer.game_id == game_id),
        );
        match index {
            Some(i) => match self.posts.swap_remove(i) {
                Post::Offer(offer) => TakeOffer::Taken(offer),
                Post::InProgress(_) => unreachable!("position matched an offer"),
            },
            None => TakeOffer::Missing,
        }
    }

    /// Removes and returns every offer owned by `name`.
    pub fn take_offers_owned_by(&mut self, name: &str) -> Vec<Offer> {
        self.drain_offers(|offer| offer.owner == name)
    }

    /// Removes and returns every offer posted by the given client. Used when
    /// a connection goes away without cleaning up after itself.
    pub fn take_offers_of_client(&mut self, client_id: u64) -> Vec<Offer> {
        self.drain_offers(|offer| offer.owner_client == client_id)
    }

    /// Removes and returns every open offer. Used by `stop`.
    pub fn take_all_offers(&mut self) -> Vec<Offer> {
        self.drain_offers(|_| true)
    }

    fn drain_offers(&mut self, mut take_if: impl FnMut(&Offer) -> bool) -> Vec<Offer> {
        let mut taken = Vec::new();
        let mut remaining = Vec::with_capacity(self.posts.len());
        for post in self.posts.drain(..) {
            match post {
                Post::Offer(offer) if take_if(&offer) => taken.push(offer),
                other => remaining.push(other),
            }
        }
        self.posts = remaining;
        taken
    }

    pub fn begin_game(&mut self, game: InProgress) {
        debug_assert!(!self.posts.iter().any(|p| p.game_id() == game.game_id));
        self.posts.push(Post::InProgress(game));
    }

    /// Drops the in-progress post for `game_id`. Returns false if it was
    /// already gone.
    pub fn finish_game(&mut self, game_id: u32) -> bool {
        let index = self.posts.iter().position(
            |p| matches!(p, Post::InProgress(game) if game.game_id == game_id),
        );
        match index {
            Some(i) => {
                self.posts.swap_remove(i);
                true
            }
            None => false,
        }
    }

    /// Takes the completion receiver of every in-progress game. The posts
    /// stay in the list; only the signals move to the caller.
    pub fn take_completion_signals(&mut self) -> Vec<oneshot::Receiver<()>> {
        self.posts
            .iter_mut()
            .filter_map(|post| match post {
                Post::InProgress(game) => game.done.take(),
                Post::Offer(_) => None,
            })
            .collect()
    }

    pub fn rating_of(&self, name: &str) -> Option<i32> {
        self.players.get(name).map(|record| record.rating)
    }

    /// Formats the `list` block rows, one per post.
    pub fn list_rows(&self) -> Vec<String> {
        self.posts
            .iter()
            .map(|post| match post {
                Post::Offer(offer) => format!(
                    " {} {} {} {} [offer]",
                    offer.game_id,
                    offer.owner,
                    offer.side,
                    rating_text(self.rating_of(&offer.owner)),
                ),
                Post::InProgress(game) => format!(
                    " {} {} {} ({}/{})  [in-progress]",
                    game.game_id,
                    game.white,
                    game.black,
                    rating_text(self.rating_of(&game.white)),
                    rating_text(self.rating_of(&game.black)),
                ),
            })
            .collect()
    }

    /// Formats the `ratings` block rows: the ten best players by rating,
    /// plus the caller's own row when they are named, on file, and not
    /// already shown.
    pub fn ratings_rows(&self, caller: Option<&str>) -> Vec<String> {
        let mut records: Vec<&PlayerRecord> = self.players.values().collect();
        records.sort_by(|a, b| b.rating.cmp(&a.rating).then(a.name.cmp(&b.name)));

        let top: Vec<&PlayerRecord> = records.iter().take(10).copied().collect();
        let mut rows: Vec<String> = top
            .iter()
            .map(|record| format!(" {} {}", record.name, record.rating))
            .collect();

        if let Some(name) = caller {
            if !top.iter().any(|record| record.name == name) {
                if let Some(record) = self.players.get(name) {
                    rows.push(format!(" {} {}", record.name, record.rating));
                }
            }
        }
        rows
    }
}

fn rating_text(rating: Option<i32>) -> String {
    match rating {
        Some(r) => r.to_string(),
        None => "?".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rendezvous;

    fn offer(game_id: u32, owner: &str, client: u64, side: Color) -> (Offer, rendezvous::MailboxWait) {
        let (mailbox, wait) = rendezvous::mailbox();
        (
            Offer {
                game_id,
                owner: owner.to_string(),
                owner_client: client,
                side,
                mailbox,
            },
            wait,
        )
    }

    fn player(name: &str, rating: i32) -> PlayerRecord {
        PlayerRecord {
            name: name.to_string(),
            password: "pw".to_string(),
            rating,
        }
    }

    fn state_with_players(players: &[(&str, i32)]) -> ServiceState {
        let table = players
            .iter()
            .map(|(name, rating)| (name.to_string(), player(name, *rating)))
            .collect();
        ServiceState::new(1, table)
    }

    #[test]
    fn game_ids_are_monotonic() {
        let mut state = ServiceState::new(5, HashMap::new());
        assert_eq!(state.allocate_game_id(), 5);
        assert_eq!(state.allocate_game_id(), 6);
        assert_eq!(state.next_game_id, 7);
    }

    #[test]
    fn take_offer_removes_exactly_one() {
        let mut state = state_with_players(&[("alice", 1200)]);
        let (o1, _w1) = offer(1, "alice", 10, Color::White);
        let (o2, _w2) = offer(2, "alice", 11, Color::Black);
        state.publish_offer(o1);
        state.publish_offer(o2);

        assert!(matches!(state.take_offer(1), TakeOffer::Taken(o) if o.game_id == 1));
        assert!(matches!(state.take_offer(1), TakeOffer::Missing));
        assert_eq!(state.list_rows().len(), 1);
    }

    #[test]
    fn duplicate_posts_are_flagged() {
        let mut state = state_with_players(&[]);
        let (o1, _w1) = offer(7, "alice", 1, Color::White);
        let (o2, _w2) = offer(7, "bob", 2, Color::Black);
        state.posts.push(Post::Offer(o1));
        state.posts.push(Post::Offer(o2));

        assert!(matches!(state.take_offer(7), TakeOffer::Duplicate));
    }

    #[test]
    fn clean_takes_only_the_owners_offers() {
        let mut state = state_with_players(&[("alice", 1200), ("bob", 1200)]);
        let (o1, _w1) = offer(2, "alice", 1, Color::White);
        let (o2, _w2) = offer(3, "alice", 2, Color::White);
        let (o3, _w3) = offer(4, "bob", 3, Color::Black);
        state.publish_offer(o1);
        state.publish_offer(o2);
        state.publish_offer(o3);

        let taken = state.take_offers_owned_by("alice");
        assert_eq!(taken.len(), 2);
        // idempotent: nothing left to take
        assert!(state.take_offers_owned_by("alice").is_empty());
        assert_eq!(state.list_rows(), vec![" 4 bob B 1200 [offer]"]);
    }

    #[test]
    fn list_rows_cover_both_post_kinds() {
        let mut state = state_with_players(&[("alice", 1216), ("bob", 1184)]);
        let (o, _w) = offer(1, "alice", 1, Color::White);
        state.publish_offer(o);
        state.begin_game(InProgress {
            game_id: 2,
            white: "bob".to_string(),
            black: "ghost".to_string(),
            done: None,
        });

        let rows = state.list_rows();
        assert_eq!(rows[0], " 1 alice W 1216 [offer]");
        assert_eq!(rows[1], " 2 bob ghost (1184/?)  [in-progress]");
    }

    #[test]
    fn finish_game_drops_the_post() {
        let mut state = state_with_players(&[]);
        state.begin_game(InProgress {
            game_id: 9,
            white: "a".to_string(),
            black: "b".to_string(),
            done: None,
        });
        assert!(state.finish_game(9));
        assert!(!state.finish_game(9));
        assert!(state.list_rows().is_empty());
    }

    #[test]
    fn completion_signals_are_taken_once() {
        let mut state = state_with_players(&[]);
        let (_tx, rx) = rendezvous::completion();
        state.begin_game(InProgress {
            game_id: 1,
            white: "a".to_string(),
            black: "b".to_string(),
            done: Some(rx),
        });

        assert_eq!(state.take_completion_signals().len(), 1);
        assert!(state.take_completion_signals().is_empty());
        // the post itself is still listed
        assert_eq!(state.list_rows().len(), 1);
    }

    #[test]
    fn ratings_rows_are_sorted_and_capped() {
        let names: Vec<String> = (0..12).map(|i| format!("p{i:02}")).collect();
        let players: Vec<(&str, i32)> = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), 1000 + i as i32 * 10))
            .collect();
        let state = state_with_players(&players);

        let rows = state.ratings_rows(None);
        assert_eq!(rows.len(), 10);
        assert_eq!(rows[0], " p11 1110");
        assert_eq!(rows[9], " p02 1020");

        // a low-rated caller gets their own row appended
        let rows = state.ratings_rows(Some("p00"));
        assert_eq!(rows.len(), 11);
        assert_eq!(rows[10], " p00 1000");

        // a caller already in the top ten is not duplicated
        let rows = state.ratings_rows(Some("p11"));
        assert_eq!(rows.len(), 10);

        // an unknown caller adds nothing
        let rows = state.ratings_rows(Some("nobody"));
        assert_eq!(rows.len(), 10);
    }

    #[test]
    fn ratings_ties_break_by_name() {
        let state = state_with_players(&[("zed", 1200), ("ann", 1200), ("mid", 1200)]);
        let rows = state.ratings_rows(None);
        assert_eq!(rows, vec![" ann 1200", " mid 1200", " zed 1200"]);
    }
}
