//! Veilleur - a status-broadcast watcher bot for chat messaging accounts.
//!
//! This is the main entry point for the Veilleur bot, which restores a
//! messaging session from a remotely provisioned credential bundle, watches
//! the account's incoming messages for status broadcasts, and acknowledges
//! them automatically.
//!
//! # Overview
//!
//! Veilleur keeps one messaging account signed in without any interactive
//! login: session credentials are fetched once from an upload service (or
//! reused from local storage), handed to the messaging transport, and
//! persisted again every time the transport rotates them. While connected,
//! the bot inspects every incoming message and performs configurable side
//! effects on status broadcasts.
//!
//! # Features
//!
//! - **Session Restore**: Fetches a serialized credential bundle from a
//!   remote upload service when `SESSION_ID` names one
//! - **Durable Credentials**: Persists every credential rotation so the
//!   session survives restarts
//! - **Status Watching**: Detects status broadcasts by their reserved
//!   origin suffix
//! - **Auto-Read**: Marks status broadcasts as read
//! - **Auto-Like**: Optionally reacts to status broadcasts with a
//!   configurable emoji
//! - **Reconnect Supervision**: Restarts the whole session flow on
//!   unexpected connection drops, with bounded exponential backoff
//!
//! # Configuration
//!
//! All control is through environment variables, each with a default:
//!
//! ```bash
//! export SESSION_ID="X-KING-u2oknAjC"   # remote bundle identifier
//! export AUTO_STATUS=true               # watch status broadcasts at all
//! export AUTO_READ_STATUS=true          # mark status broadcasts as read
//! export AUTO_LIKE_STATUS=false         # react to status broadcasts
//! export AUTO_LIKE_EMOJI="✨"           # emoji used for reactions
//! ```
//!
//! # Usage
//!
//! ```bash
//! veilleur
//! ```
//!
//! Session state lives in `./session` next to the working directory:
//! `creds.json` holds the primary credential record, further files belong to
//! the transport's own persistence.
//!
//! # Architecture
//!
//! The bot consists of several modules:
//!
//! - [`bot`] - Event routing and the reconnect supervisor
//! - [`config`] - Environment-sourced runtime configuration
//! - [`session`] - Credential bundle storage and remote provisioning
//! - [`transport`] - The messaging transport capability surface and its
//!   Matrix-backed implementation
//! - [`watcher`] - Status broadcast classification and side effects
//!
//! # Runtime Behavior
//!
//! Once started, the bot runs indefinitely: it provisions and restores the
//! session, then routes transport events one at a time. An unexpected
//! connection close re-enters the whole startup flow; a close caused by
//! invalidated credentials ends the process, since the account must be
//! re-authenticated out of band.
//!
//! # Environment Variables
//!
//! - `RUST_LOG` - Controls logging level (default: `info`)
//!   - Set to `debug` for verbose output
//!   - Set to `warn` or `error` for minimal logging

use env_logger::Env;
use log::{error, info};

use crate::{
    bot::Bot,
    config::{Config, DEFAULT_SESSION_DIR},
    session::{DEFAULT_ENDPOINT, Provisioner, SessionStore},
    transport::MatrixTransport,
};

mod bot;
mod config;
mod session;
mod transport;
mod watcher;

/// Main entry point for the Veilleur bot.
///
/// Initializes logging, loads the environment configuration, constructs the
/// bot's collaborators and runs the supervisor until it ends.
///
/// # Error Handling
///
/// Startup failures (unparsable configuration, no establishable session)
/// and terminal session ends are logged to standard error and the process
/// exits with status 1. Everything recoverable is handled inside
/// [`Bot::run`].
#[tokio::main]
async fn main() {
    // Put logger at info level by default
    let env = Env::default().filter_or("RUST_LOG", "info");
    env_logger::init_from_env(env);

    info!("Starting veilleur {}...", env!("CARGO_PKG_VERSION"));

    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let store = SessionStore::new(DEFAULT_SESSION_DIR);
    let provisioner = Provisioner::new(DEFAULT_ENDPOINT, &config.session_id);
    let transport = MatrixTransport::new();

    let bot = Bot::new(&config, store, provisioner, transport);
    if let Err(e) = bot.run().await {
        error!("Bot stopped: {:#}", e);
        std::process::exit(1);
    }
}
