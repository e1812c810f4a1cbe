//! Per-connection command sessions and the listener accept loop.
//!
//! Each accepted connection runs one [`Session`] task. A session starts
//! anonymous, gains a name through `me` or `register`, and from there can
//! inspect state, post an offer (blocking on its mailbox until someone
//! resolves it), or accept an offer (handing its connection to the offerer
//! and ending its own command loop). The session that posted the offer
//! drives the matched game and owns both connections until it ends.
//!
//! The state guard is never held across a socket read, a mailbox await, or
//! the game driver; the tolerated exception is the small `passwd`/`GAMEID`
//! writes inside a critical section.

use crate::conn::Connection;
use crate::driver::{self, PlayerEnd};
use crate::gamelog::GameLog;
use crate::protocol::{Color, Command, HELP_TEXT};
use crate::rating;
use crate::rendezvous::{self, MatchMsg};
use crate::state::{InProgress, Offer, SharedState, TakeOffer};
use crate::store::{PlayerRecord, Store};
use crate::SERVER_VERSION;
use log::{debug, error, info, warn};
use std::io;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// Accepts connections and spawns a session task per client. Returns once
/// an admin `stop` has drained the server.
pub async fn serve(listener: TcpListener, state: SharedState, store: Arc<Store>) -> io::Result<()> {
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
    let mut next_client_id: u64 = 1;

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                info!("client {} connected from {}", next_client_id, peer);
                let session = Session::new(
                    next_client_id,
                    state.clone(),
                    store.clone(),
                    shutdown_tx.clone(),
                );
                next_client_id += 1;
                tokio::spawn(session.run(Connection::new(stream, peer)));
            }
            _ = shutdown_rx.recv() => {
                info!("accept loop shutting down");
                break;
            }
        }
    }
    Ok(())
}

/// How an offer wait ended, from the offering session's point of view.
enum AfterOffer {
    /// Someone accepted; the accepter's connection came through the mailbox.
    Matched {
        game_id: u32,
        owner: String,
        side: Color,
        accepter: String,
        accepter_conn: Connection,
    },
    /// The offer was cancelled; the session stays in its command loop.
    Countermanded,
    /// The command was refused (not named, bad color); nothing was posted.
    Refused,
    /// The client vanished while the offer was open.
    Gone,
}

/// State for a single client connection.
pub struct Session {
    client_id: u64,
    state: SharedState,
    store: Arc<Store>,
    shutdown: mpsc::Sender<()>,
    name: Option<String>,
}

impl Session {
    pub fn new(
        client_id: u64,
        state: SharedState,
        store: Arc<Store>,
        shutdown: mpsc::Sender<()>,
    ) -> Session {
        Session {
            client_id,
            state,
            store,
            shutdown,
            name: None,
        }
    }

    /// Runs the command loop until the client leaves, the connection is
    /// transferred to an offerer, or this session starts driving a game.
    pub async fn run(mut self, mut conn: Connection) {
        if let Err(e) = conn
            .send_line(&format!("100 imcs {}", SERVER_VERSION))
            .await
        {
            debug!("client {}: banner failed: {}", self.client_id, e);
            return;
        }

        loop {
            let line = match conn.read_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    debug!("client {}: read error: {}", self.client_id, e);
                    break;
                }
            };
            debug!("client {} -> {:?}", self.client_id, line);

            let result = match Command::parse(&line) {
                Command::Empty => Ok(()),
                Command::Help => conn.send_block("210 command summary", &help_rows()).await,
                Command::Quit => {
                    let _ = conn.send_line("200 goodbye").await;
                    break;
                }
                Command::Me { name, password } => self.cmd_me(&mut conn, name, password).await,
                Command::Register { name, password } => {
                    self.cmd_register(&mut conn, name, password).await
                }
                Command::Password { password } => self.cmd_password(&mut conn, password).await,
                Command::List => self.cmd_list(&mut conn).await,
                Command::Ratings => self.cmd_ratings(&mut conn).await,
                Command::Offer { color } => match self.cmd_offer(&mut conn, color).await {
                    Ok(AfterOffer::Matched {
                        game_id,
                        owner,
                        side,
                        accepter,
                        accepter_conn,
                    }) => {
                        self.play(game_id, owner, side, accepter, conn, accepter_conn)
                            .await;
                        return;
                    }
                    Ok(AfterOffer::Countermanded | AfterOffer::Refused) => Ok(()),
                    Ok(AfterOffer::Gone) => break,
                    Err(e) => Err(e),
                },
                Command::Accept { id } => match self.cmd_accept(conn, id).await {
                    Ok(Some(returned)) => {
                        conn = returned;
                        Ok(())
                    }
                    // connection transferred to the offerer
                    Ok(None) => return,
                    Err(e) => {
                        debug!("client {}: {}", self.client_id, e);
                        return;
                    }
                },
                Command::Clean => self.cmd_clean(&mut conn).await,
                Command::Stop => match self.cmd_stop(&mut conn).await {
                    Ok(true) => break,
                    Ok(false) => Ok(()),
                    Err(e) => Err(e),
                },
                Command::Unknown => conn.send_line("501 unknown command").await,
            };

            if let Err(e) = result {
                debug!("client {}: {}", self.client_id, e);
                break;
            }
        }

        self.sweep_offers().await;
        info!("client {} disconnected", self.client_id);
    }

    async fn cmd_me(
        &mut self,
        conn: &mut Connection,
        name: String,
        password: String,
    ) -> io::Result<()> {
        let found = {
            let state = self.state.lock().await;
            state
                .players
                .get(&name)
                .map(|record| record.password == password)
        };
        match found {
            None => conn.send_line("400 no such user").await,
            Some(false) => conn.send_line("401 wrong password").await,
            Some(true) => {
                info!("client {} logged in as {}", self.client_id, name);
                let reply = format!("201 hello {}", name);
                self.name = Some(name);
                conn.send_line(&reply).await
            }
        }
    }

    async fn cmd_register(
        &mut self,
        conn: &mut Connection,
        name: String,
        password: String,
    ) -> io::Result<()> {
        enum Outcome {
            Exists,
            Saved,
            SaveFailed,
        }
        let outcome = {
            let mut state = self.state.lock().await;
            if state.players.contains_key(&name) {
                Outcome::Exists
            } else {
                state.players.insert(
                    name.clone(),
                    PlayerRecord {
                        name: name.clone(),
                        password,
                        rating: rating::BASE_RATING,
                    },
                );
                match self.store.save_players(&state.players) {
                    Ok(()) => Outcome::Saved,
                    Err(e) => {
                        error!("failed to persist player table: {}", e);
                        state.players.remove(&name);
                        Outcome::SaveFailed
                    }
                }
            }
        };
        match outcome {
            Outcome::Exists => conn.send_line("402 user already exists").await,
            Outcome::SaveFailed => conn.send_line("499 internal error").await,
            Outcome::Saved => {
                info!("client {} registered {}", self.client_id, name);
                let reply = format!("202 hello new user {}", name);
                self.name = Some(name);
                conn.send_line(&reply).await
            }
        }
    }

    async fn cmd_password(&mut self, conn: &mut Connection, password: String) -> io::Result<()> {
        let Some(name) = self.name.clone() else {
            return conn.send_line("403 not logged in").await;
        };
        enum Outcome {
            Vanished,
            Saved,
            SaveFailed,
        }
        let outcome = {
            let mut state = self.state.lock().await;
            match state.players.get_mut(&name) {
                None => Outcome::Vanished,
                Some(record) => {
                    record.password = password;
                    match self.store.save_players(&state.players) {
                        Ok(()) => Outcome::Saved,
                        Err(e) => {
                            error!("failed to persist player table: {}", e);
                            Outcome::SaveFailed
                        }
                    }
                }
            }
        };
        match outcome {
            Outcome::Vanished => {
                error!("record for logged-in user {} is gone", name);
                conn.send_line("500 no record for your name").await
            }
            Outcome::SaveFailed => conn.send_line("499 internal error").await,
            Outcome::Saved => conn.send_line("203 password changed").await,
        }
    }

    async fn cmd_list(&mut self, conn: &mut Connection) -> io::Result<()> {
        let rows = {
            let state = self.state.lock().await;
            state.list_rows()
        };
        let opener = format!("211 {} games", rows.len());
        conn.send_block(&opener, &rows).await
    }

    async fn cmd_ratings(&mut self, conn: &mut Connection) -> io::Result<()> {
        let rows = {
            let state = self.state.lock().await;
            state.ratings_rows(self.name.as_deref())
        };
        conn.send_block("212 ratings", &rows).await
    }

    async fn cmd_offer(
        &mut self,
        conn: &mut Connection,
        color: Option<Color>,
    ) -> io::Result<AfterOffer> {
        let Some(owner) = self.name.clone() else {
            conn.send_line("404 name not set").await?;
            return Ok(AfterOffer::Refused);
        };
        let Some(side) = color else {
            conn.send_line("405 bad color, offer W or B").await?;
            return Ok(AfterOffer::Refused);
        };

        let (mailbox, mut wait) = rendezvous::mailbox();
        let game_id = {
            let mut state = self.state.lock().await;
            let id = state.allocate_game_id();
            // persisted before first use, so a restart never reissues an id
            if let Err(e) = self.store.save_next_game_id(state.next_game_id) {
                error!("failed to persist next game id: {}", e);
            }
            state.publish_offer(Offer {
                game_id: id,
                owner: owner.clone(),
                owner_client: self.client_id,
                side,
                mailbox,
            });
            id
        };
        conn.send_line(&format!("101 game {} waiting for offer acceptance", game_id))
            .await?;
        info!(
            "client {} offered game {} as {} ({})",
            self.client_id, game_id, owner, side
        );

        // Block on the mailbox, watching our own socket so a vanished
        // client withdraws its offer instead of leaving it forever.
        let mut socket_dead = false;
        let message = loop {
            if socket_dead {
                break (&mut wait).await.ok();
            }
            tokio::select! {
                biased;
                msg = &mut wait => break msg.ok(),
                read = conn.read_line() => match read {
                    Ok(Some(line)) => {
                        if !line.trim().is_empty() {
                            debug!(
                                "client {} sent {:?} while offering, ignored",
                                self.client_id, line
                            );
                        }
                    }
                    Ok(None) | Err(_) => {
                        let withdrawn = {
                            let mut state = self.state.lock().await;
                            matches!(state.take_offer(game_id), TakeOffer::Taken(_))
                        };
                        if withdrawn {
                            info!(
                                "client {} vanished, offer {} withdrawn",
                                self.client_id, game_id
                            );
                            return Ok(AfterOffer::Gone);
                        }
                        // an accepter won the race; take its message
                        socket_dead = true;
                    }
                },
            }
        };

        match message {
            Some(MatchMsg::Accepted {
                accepter,
                accepter_client,
                conn: accepter_conn,
            }) => {
                // ignore a send failure here: the game must still run so
                // the accepter learns about a dead offerer through 420
                let _ = conn.send_line("102 received acceptance").await;
                info!(
                    "game {}: {} (client {}) accepted",
                    game_id, accepter, accepter_client
                );
                Ok(AfterOffer::Matched {
                    game_id,
                    owner,
                    side,
                    accepter,
                    accepter_conn,
                })
            }
            Some(MatchMsg::Cancelled) | None => {
                conn.send_line("421 offer countermanded").await?;
                Ok(AfterOffer::Countermanded)
            }
        }
    }

    /// Handles `accept`. Returns the connection unless it was transferred
    /// into the offerer's mailbox.
    async fn cmd_accept(
        &mut self,
        mut conn: Connection,
        id: Option<u32>,
    ) -> io::Result<Option<Connection>> {
        let Some(accepter) = self.name.clone() else {
            conn.send_line("406 name not set").await?;
            return Ok(Some(conn));
        };
        let Some(game_id) = id else {
            conn.send_line("407 bad game id").await?;
            return Ok(Some(conn));
        };

        let taken = {
            let mut state = self.state.lock().await;
            state.take_offer(game_id)
        };
        let offer = match taken {
            TakeOffer::Missing => {
                conn.send_line("408 no such game").await?;
                return Ok(Some(conn));
            }
            TakeOffer::Duplicate => {
                error!("duplicate posts for game id {}", game_id);
                conn.send_line("499 internal error").await?;
                return Ok(Some(conn));
            }
            TakeOffer::Taken(offer) => offer,
        };

        if let Err(e) = conn.send_line("103 accepting offer").await {
            // the accepter's socket just died; put the offer back on the
            // wire as a cancellation so the offerer is not left hanging
            let _ = offer.mailbox.send(MatchMsg::Cancelled);
            return Err(e);
        }
        info!(
            "client {} ({}) accepts game {}",
            self.client_id, accepter, game_id
        );

        match offer.mailbox.send(MatchMsg::Accepted {
            accepter,
            accepter_client: self.client_id,
            conn,
        }) {
            Ok(()) => Ok(None),
            Err(message) => {
                // the offering session died without withdrawing; recover
                // our connection and keep serving this client
                warn!("offerer for game {} is gone", game_id);
                let MatchMsg::Accepted { conn: mut returned, .. } = message else {
                    unreachable!("we just sent an acceptance");
                };
                returned.send_line("421 offer countermanded").await?;
                Ok(Some(returned))
            }
        }
    }

    async fn cmd_clean(&mut self, conn: &mut Connection) -> io::Result<()> {
        let Some(name) = self.name.clone() else {
            return conn.send_line("406 name not set").await;
        };
        let offers = {
            let mut state = self.state.lock().await;
            state.take_offers_owned_by(&name)
        };
        let count = offers.len();
        for offer in offers {
            let _ = offer.mailbox.send(MatchMsg::Cancelled);
        }
        info!("client {} cleaned {} offers", self.client_id, count);
        conn.send_line(&format!("204 {} games cleaned", count)).await
    }

    /// Handles `stop`. Returns true when the server is going down and this
    /// session should end.
    async fn cmd_stop(&mut self, conn: &mut Connection) -> io::Result<bool> {
        let Some(name) = self.name.clone() else {
            conn.send_line("406 name not set").await?;
            return Ok(false);
        };
        if name != "admin" {
            conn.send_line("502 admin only").await?;
            return Ok(false);
        }

        conn.send_line("205 server stopping, goodbye").await?;
        let (offers, signals) = {
            let mut state = self.state.lock().await;
            (state.take_all_offers(), state.take_completion_signals())
        };
        info!(
            "stop: cancelling {} offers, waiting on {} games",
            offers.len(),
            signals.len()
        );
        for offer in offers {
            let _ = offer.mailbox.send(MatchMsg::Cancelled);
        }
        for signal in signals {
            let _ = signal.await;
        }
        let _ = self.shutdown.send(()).await;
        Ok(true)
    }

    /// Drives a matched game from the offerer's side: both connections are
    /// owned here until the game ends, and both are closed afterwards.
    async fn play(
        self,
        game_id: u32,
        owner: String,
        side: Color,
        accepter: String,
        own_conn: Connection,
        accepter_conn: Connection,
    ) {
        let (white_name, black_name, white_conn, black_conn) = match side {
            Color::White => (owner.clone(), accepter, own_conn, accepter_conn),
            Color::Black => (accepter, owner.clone(), accepter_conn, own_conn),
        };
        let mut white = PlayerEnd::new(white_name.clone(), Color::White, white_conn);
        let mut black = PlayerEnd::new(black_name.clone(), Color::Black, black_conn);

        let (done_tx, done_rx) = rendezvous::completion();
        {
            let mut state = self.state.lock().await;
            state.begin_game(InProgress {
                game_id,
                white: white_name.clone(),
                black: black_name.clone(),
                done: Some(done_rx),
            });
        }
        info!(
            "game {} started: {} (W) vs {} (B)",
            game_id, white_name, black_name
        );

        let result = match GameLog::open(&self.store.log_dir(), game_id).await {
            Ok(mut log) => match log.header(&white_name, &black_name).await {
                Ok(()) => driver::play(&mut white, &mut black, &mut log).await,
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };

        match result {
            Ok(score) => {
                let mut state = self.state.lock().await;
                let old = (state.rating_of(&white_name), state.rating_of(&black_name));
                if let (Some(white_old), Some(black_old)) = old {
                    if let Some(record) = state.players.get_mut(&white_name) {
                        record.rating = rating::update(white_old, black_old, score);
                    }
                    if let Some(record) = state.players.get_mut(&black_name) {
                        record.rating = rating::update(black_old, white_old, -score);
                    }
                    if let Err(e) = self.store.save_players(&state.players) {
                        error!("failed to persist ratings for game {}: {}", game_id, e);
                    }
                } else {
                    error!("player records vanished during game {}", game_id);
                }
                drop(state);
                info!("game {} finished, score {}", game_id, score);
            }
            Err(e) => {
                warn!("game {}: fatal IO error: {}", game_id, e);
                let _ = white.conn.send_line("420 fatal IO error: exiting").await;
                let _ = black.conn.send_line("420 fatal IO error: exiting").await;
            }
        }

        // both player connections close here
        drop(white);
        drop(black);
        {
            let mut state = self.state.lock().await;
            state.finish_game(game_id);
        }
        let _ = done_tx.send(());
        debug!("client {}: game session {} wound down", self.client_id, game_id);
    }

    /// Removes any offers this client left behind.
    async fn sweep_offers(&self) {
        let orphans = {
            let mut state = self.state.lock().await;
            state.take_offers_of_client(self.client_id)
        };
        if !orphans.is_empty() {
            info!(
                "client {}: swept {} orphaned offers",
                self.client_id,
                orphans.len()
            );
        }
    }
}

fn help_rows() -> Vec<String> {
    HELP_TEXT.iter().map(|row| row.to_string()).collect()
}
