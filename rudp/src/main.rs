//! Entry point for `rudp`.
//!
//! Parses CLI arguments and dispatches into either **server** or **client** mode.
//! All actual protocol work is delegated to library modules; `main.rs` owns only
//! process setup (logging, argument parsing) and the echo demo.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use rudp::{ConnError, Config, Connection, Error, Listener};

/// Reliable, ordered messages over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,

    #[command(flatten)]
    tuning: Tuning,
}

#[derive(Subcommand)]
enum Mode {
    /// Run an echo server, accepting sessions from any number of peers.
    Server {
        /// Local address to bind (e.g. 0.0.0.0:9000).
        #[arg(short, long, default_value = "0.0.0.0:9000")]
        bind: SocketAddr,
    },
    /// Send messages to an echo server and print the replies.
    Client {
        /// Remote server address (e.g. 127.0.0.1:9000).
        #[arg(short, long)]
        server: SocketAddr,
        /// Message to send.
        #[arg(short, long, default_value = "hello")]
        message: String,
        /// How many times to send it.
        #[arg(short, long, default_value_t = 1)]
        count: u32,
    },
}

/// Session tunables; unspecified values keep their defaults.
#[derive(Args)]
struct Tuning {
    /// Milliseconds per engine tick.
    #[arg(long, global = true)]
    tick_ms: Option<u64>,
    /// Ticks without input before a session times out (0 disables).
    #[arg(long, global = true)]
    corrupt_timeout: Option<u64>,
    /// Ticks between retransmission-history sweeps.
    #[arg(long, global = true)]
    expiry_interval: Option<u64>,
    /// Maximum datagram size in bytes.
    #[arg(long, global = true)]
    max_datagram: Option<usize>,
}

impl Tuning {
    fn into_config(self) -> anyhow::Result<Config> {
        let mut config = Config::default();
        if let Some(ms) = self.tick_ms {
            config.tick = Duration::from_millis(ms);
        }
        if let Some(ticks) = self.corrupt_timeout {
            config.corrupt_timeout = ticks;
        }
        if let Some(ticks) = self.expiry_interval {
            config.expiry_interval = ticks;
        }
        if let Some(bytes) = self.max_datagram {
            config.max_datagram = bytes;
        }
        config.validate().context("invalid tuning flags")?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();
    let config = cli.tuning.into_config()?;

    match cli.mode {
        Mode::Server { bind } => run_server(bind, config).await,
        Mode::Client {
            server,
            message,
            count,
        } => run_client(server, config, message, count).await,
    }
}

async fn run_server(bind: SocketAddr, config: Config) -> anyhow::Result<()> {
    let mut listener = Listener::bind(bind, config)
        .await
        .with_context(|| format!("binding {bind}"))?;
    log::info!("Echo server on {}", listener.local_addr());

    loop {
        let conn = listener.accept().await?;
        log::info!("Session from {}", conn.peer_addr());
        tokio::spawn(echo(conn));
    }
}

async fn echo(mut conn: Connection) {
    let peer = conn.peer_addr();
    loop {
        match conn.recv().await {
            Ok(message) => {
                if conn.send(message).await.is_err() {
                    break;
                }
            }
            Err(ConnError::Engine(Error::RemoteClose)) => {
                log::info!("{peer} closed");
                break;
            }
            Err(e) => {
                log::warn!("{peer}: {e}");
                break;
            }
        }
    }
    let _ = conn.close().await;
}

async fn run_client(
    server: SocketAddr,
    config: Config,
    message: String,
    count: u32,
) -> anyhow::Result<()> {
    let mut conn = Connection::connect(server, config).await?;
    log::info!("Connected {} → {server}", conn.local_addr());

    for _ in 0..count {
        conn.send(message.clone().into_bytes()).await?;
    }
    for i in 0..count {
        let reply = conn.recv().await.context("waiting for echo")?;
        if reply != message.as_bytes() {
            bail!("echo {i} does not match what was sent");
        }
        println!("{}", String::from_utf8_lossy(&reply));
    }

    conn.close().await?;
    Ok(())
}
