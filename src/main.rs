use clap::Parser;
use gamehall::boot;
use gamehall::session;
use gamehall::store::Store;
use log::info;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Mutex;

/// Matchmaking and session broker for two-player turn-based games.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// TCP port to listen on
    port: u16,

    /// Password for the `admin` account
    admin_password: String,

    /// Address to bind
    #[clap(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// Directory holding VERSION, private/ and log/
    #[clap(short, long, default_value = ".")]
    data_dir: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Warning: RUST_LOG environment variable not set. Set it to display logs!");
        eprintln!("Recommended: RUST_LOG=info cargo run");
    }

    let args = Args::parse();
    let store = Store::open(&args.data_dir);
    let state = boot::init_service(&store, args.port, &args.admin_password).await?;

    let addr = format!("{}:{}", args.host, args.port);
    let listener = bind_with_retry(&addr).await?;
    info!("listening on {}", addr);

    session::serve(listener, Arc::new(Mutex::new(state)), Arc::new(store)).await?;
    info!("server exited cleanly");
    Ok(())
}

/// Binds the listener, retrying while a stopping predecessor drains its
/// games and still holds the port.
async fn bind_with_retry(addr: &str) -> std::io::Result<TcpListener> {
    let mut attempts = 0;
    loop {
        match TcpListener::bind(addr).await {
            Ok(listener) => return Ok(listener),
            Err(e) if attempts < 10 && e.kind() == std::io::ErrorKind::AddrInUse => {
                attempts += 1;
                info!("port still in use, retrying bind ({}/10)", attempts);
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
            Err(e) => return Err(e),
        }
    }
}
