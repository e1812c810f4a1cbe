//! Boot sequence: schema migration, admin provisioning, and graceful
//! takeover of a predecessor server.
//!
//! Runs before the listener binds. When the on-disk state is already at
//! the current version, another server instance may still own the port; in
//! that case this module connects to it as an ordinary client, logs in as
//! `admin`, and issues `stop`. The predecessor drains its games and exits,
//! after which the caller can bind.

use crate::conn::Connection;
use crate::rating::BASE_RATING;
use crate::state::ServiceState;
use crate::store::{MigrateOutcome, PlayerRecord, Store};
use log::{debug, info};
use std::io;
use tokio::net::TcpStream;

/// Prepares the store and returns the initial service state. Fatal errors
/// (unknown on-disk version, takeover protocol deviation) abort the boot.
pub async fn init_service(
    store: &Store,
    port: u16,
    admin_password: &str,
) -> io::Result<ServiceState> {
    if store.migrate()? == MigrateOutcome::Current {
        // a same-version predecessor may still be serving this directory
        takeover(port, admin_password).await?;
    }

    let mut players = store.load_players()?;
    provision_admin(&mut players, admin_password);
    store.save_players(&players)?;

    let next_game_id = store.load_next_game_id()?;
    Ok(ServiceState::new(next_game_id, players))
}

/// Makes sure the `admin` account exists and carries the configured
/// password. An existing record keeps its rating.
fn provision_admin(players: &mut std::collections::HashMap<String, PlayerRecord>, password: &str) {
    match players.get_mut("admin") {
        Some(record) => {
            if record.password != password {
                info!("updating admin password from command line");
                record.password = password.to_string();
            }
        }
        None => {
            info!("creating admin account");
            players.insert(
                "admin".to_string(),
                PlayerRecord {
                    name: "admin".to_string(),
                    password: password.to_string(),
                    rating: BASE_RATING,
                },
            );
        }
    }
}

/// Asks a predecessor on the loopback interface to shut down. A missing
/// predecessor is fine; a predecessor that deviates from the protocol is
/// fatal.
async fn takeover(port: u16, admin_password: &str) -> io::Result<()> {
    let stream = match TcpStream::connect(("127.0.0.1", port)).await {
        Ok(stream) => stream,
        Err(e) => {
            debug!("no predecessor on port {}: {}", port, e);
            return Ok(());
        }
    };
    let peer = stream.peer_addr()?;
    info!("predecessor found on port {}, requesting shutdown", port);

    let mut conn = Connection::new(stream, peer);
    expect(&mut conn, "100").await?;
    conn.send_line(&format!("me admin {}", admin_password))
        .await?;
    expect(&mut conn, "201").await?;
    conn.send_line("stop").await?;
    expect(&mut conn, "205").await?;
    info!("predecessor acknowledged stop");
    Ok(())
}

async fn expect(conn: &mut Connection, code: &str) -> io::Result<()> {
    match conn.read_line().await? {
        Some(line) if line == code || line.starts_with(&format!("{code} ")) => Ok(()),
        Some(line) => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("takeover: expected {code} from predecessor, got {line:?}"),
        )),
        None => Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "takeover: predecessor closed the connection",
        )),
    }
}
