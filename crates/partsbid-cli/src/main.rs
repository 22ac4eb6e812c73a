// partsbid entry point.
//
// `partsbid watch` startup sequence:
// 1. Initialize tracing (log to file, stdout carries the board)
// 2. Load config
// 3. Open the auth token store
// 4. Build the REST client and the bid channel connector
// 5. Spawn the live bid session and the board printer
// 6. Forward stdin commands until quit, EOF or Ctrl+C
// 7. Shut the session down and wait for it to release the channel

mod input;
mod render;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use partsbid_core::api::RestClient;
use partsbid_core::auth::{AuthContext, FileAuth};
use partsbid_core::config::{self, ClientConfig};
use partsbid_core::protocol::{LineItemId, RfqId, Role};
use partsbid_core::session::{LiveBidSession, SessionCommand, SessionParams};
use partsbid_core::stream::TungsteniteConnector;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::input::{parse_line, Input, HELP};

#[derive(Parser)]
#[command(name = "partsbid")]
#[command(about = "Live bidding client for the auto-parts RFQ marketplace", long_about = None)]
struct Cli {
    /// Config file (defaults to config/client.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch live bids on an RFQ and award selected bids
    Watch(WatchArgs),

    /// Manage the stored session token
    Token {
        #[command(subcommand)]
        cmd: TokenCmd,
    },
}

#[derive(Args)]
struct WatchArgs {
    /// RFQ to watch
    rfq_id: u64,

    /// View as a vendor (own bids only, no awarding)
    #[arg(long)]
    vendor: bool,

    /// Line items that already have an order; their bids are hidden
    #[arg(long = "exclude", value_name = "LINE_ITEM_ID")]
    exclude: Vec<u64>,
}

#[derive(Subcommand)]
enum TokenCmd {
    /// Store a token issued by the backend
    Set { token: String },
    /// Forget the stored token
    Clear,
    /// Show where the token is stored and whether one is present
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 1. Initialize tracing
    init_tracing()?;
    info!("partsbid starting up");

    // 2. Load config
    let config =
        config::load_config(cli.config.as_deref()).context("failed to load configuration")?;
    info!("Config loaded: api={}", config.api.base_url);

    // 3. Open the token store
    let auth = open_auth(&config).context("failed to open token store")?;

    match cli.cmd {
        Commands::Watch(args) => watch(config, Arc::new(auth), args).await,
        Commands::Token { cmd } => token(&auth, cmd),
    }
}

fn open_auth(config: &ClientConfig) -> anyhow::Result<FileAuth> {
    let auth = match &config.auth.token_file {
        Some(path) => FileAuth::open(path)?,
        None => FileAuth::open_default()?,
    };
    Ok(auth)
}

fn token(auth: &FileAuth, cmd: TokenCmd) -> anyhow::Result<()> {
    match cmd {
        TokenCmd::Set { token } => {
            auth.set_token(token).context("failed to store token")?;
            println!("Token stored at {}", auth.path().display());
        }
        TokenCmd::Clear => {
            auth.clear_token().context("failed to clear token")?;
            println!("Token cleared");
        }
        TokenCmd::Show => match auth.token() {
            Some(token) => println!("{} ({})", mask(&token), auth.path().display()),
            None => println!("No token stored ({})", auth.path().display()),
        },
    }
    Ok(())
}

fn mask(token: &str) -> String {
    let visible: String = token.chars().take(4).collect();
    format!("{visible}****")
}

async fn watch(config: ClientConfig, auth: Arc<FileAuth>, args: WatchArgs) -> anyhow::Result<()> {
    if auth.token().is_none() {
        warn!("No auth token stored; requests will be anonymous");
        eprintln!("warning: no token stored, run `partsbid token set <TOKEN>` first");
    }

    // 4. REST client and channel connector
    let client = RestClient::new(&config.api, auth).context("failed to build API client")?;
    let api_base = client.base_url().clone();
    let connector = TungsteniteConnector::new(config.stream.connect_timeout());
    let session = LiveBidSession::new(Arc::new(client), Arc::new(connector), api_base)
        .with_award_timeout(config.api.award_timeout())
        .with_group_by(config.view.group_by);

    let role = if args.vendor { Role::Vendor } else { Role::Workshop };
    let params = SessionParams::new(RfqId(args.rfq_id), role)
        .with_excluded(args.exclude.into_iter().map(LineItemId));

    // 5. Session and printer
    let (cmd_tx, cmd_rx) = mpsc::channel(16);
    let (ui_tx, mut ui_rx) = mpsc::channel(64);
    let session_handle = tokio::spawn(session.run(params, cmd_rx, ui_tx));
    let printer = tokio::spawn(async move {
        while let Some(update) = ui_rx.recv().await {
            println!("{}", render::render_update(&update));
        }
    });

    // 6. Stdin commands
    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down");
                None
            }
        };
        let Some(line) = line else {
            break;
        };

        match parse_line(&line) {
            Ok(Input::Command(SessionCommand::Shutdown)) => break,
            Ok(Input::Command(cmd)) => {
                if cmd_tx.send(cmd).await.is_err() {
                    warn!("Session ended unexpectedly");
                    break;
                }
            }
            Ok(Input::Help) => println!("{HELP}"),
            Ok(Input::Nothing) => {}
            Err(e) => eprintln!("{e}"),
        }
    }

    // 7. Cleanup
    let _ = cmd_tx.send(SessionCommand::Shutdown).await;
    session_handle.await.context("session task panicked")??;
    let _ = printer.await;

    info!("partsbid shut down cleanly");
    Ok(())
}

/// Initialize tracing to log to a file (stdout carries the board).
fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = std::env::current_dir()?.join("logs");
    std::fs::create_dir_all(&log_dir)?;

    let log_file = std::fs::File::create(log_dir.join("partsbid.log"))?;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("partsbid=info,partsbid_core=info,warn")),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .with_target(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
