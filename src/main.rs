//! FinderNate calls - call signaling and session coordination core
//!
//! Listens for incoming calls on the socket and push channels and runs them
//! through a single call coordinator, driven from the terminal.

mod api;
mod auth;
mod calling;
mod config;
mod push;
mod socket;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::wrappers::WatchStream;
use tokio_stream::StreamExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::api::{ApiClient, CachedCredentials};
use crate::auth::Identity;
use crate::calling::coordinator::{self, CallHandle, Collaborators, Timing};
use crate::calling::machine::CallSnapshot;
use crate::calling::navigation::MemoryNavigator;
use crate::config::Config;

#[derive(Parser)]
#[command(name = "findernate-calls")]
#[command(about = "Call signaling and session coordination for FinderNate", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Store the access token issued by the FinderNate login flow
    Login {
        /// Your FinderNate user id
        #[arg(short, long)]
        user_id: String,

        /// Bearer access token
        #[arg(short, long)]
        token: String,

        /// Token lifetime in seconds, if known
        #[arg(short, long)]
        expires_in: Option<u64>,
    },

    /// Log out and clear cached credentials
    Logout,

    /// Show current authentication status
    Status,

    /// Show the call the backend still considers active
    Active,

    /// End any call left active by a previous session
    Cleanup,

    /// Listen for calls and answer them from the terminal
    Run {
        /// Route the app is showing when calls arrive
        #[arg(short, long, default_value = "/feed")]
        route: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match cli.command {
        Commands::Login {
            user_id,
            token,
            expires_in,
        } => {
            auth::login(&user_id, &token, expires_in)?;
        }
        Commands::Logout => {
            tracing::info!("Logging out...");
            auth::logout()?;
        }
        Commands::Status => {
            auth::status()?;
        }
        Commands::Active => {
            let (_, _, client) = connect()?;
            api::show_active_call(&client).await?;
        }
        Commands::Cleanup => {
            let (_, _, client) = connect()?;
            match calling::janitor::sweep(&client).await? {
                Some(call_id) => println!("Ended stale call {}", call_id),
                None => println!("No stale call."),
            }
        }
        Commands::Run { route } => {
            run(route).await?;
        }
    }

    Ok(())
}

/// Load config and identity and build the REST client.
fn connect() -> Result<(Config, Identity, ApiClient)> {
    let config = Config::load()?;
    let identity = Identity::from_config(&config)
        .context("Not logged in. Run 'findernate-calls login' first.")?;
    let client = ApiClient::new(&config, &identity)?;
    Ok((config, identity, client))
}

async fn run(route: String) -> Result<()> {
    let (config, identity, client) = connect()?;
    let client = Arc::new(client);

    let collaborators = Collaborators {
        backend: client.clone(),
        credentials: Arc::new(CachedCredentials::new(client.clone())),
        rooms: client,
        navigator: Arc::new(MemoryNavigator::new(route)),
    };
    let handle = coordinator::spawn(
        identity.user_id.clone(),
        collaborators,
        Timing::from_config(&config),
    );

    let socket_task = tokio::spawn(socket::run(handle.clone()));
    let push_task = {
        let addr = config.push_listen_addr.clone();
        let handle = handle.clone();
        tokio::spawn(async move {
            if let Err(e) = push::listen(addr, handle).await {
                tracing::error!("Push channel stopped: {:#}", e);
            }
        })
    };
    let view_task = tokio::spawn(show_changes(handle.clone()));

    println!("Commands: a = accept, d = decline, e = end, s = state, q = quit");
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = stdin.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                match line.trim() {
                    "a" => handle.accept_call(),
                    "d" => handle.decline_call(),
                    "e" => handle.end_call(),
                    "s" => print_snapshot(&handle.snapshot()),
                    "q" => break,
                    "" => {}
                    other => println!("Unknown command {:?}", other),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
        }
    }

    socket_task.abort();
    push_task.abort();
    view_task.abort();
    Ok(())
}

/// Print every published state change.
async fn show_changes(handle: CallHandle) {
    let mut changes = WatchStream::new(handle.subscribe());
    while let Some(snapshot) = changes.next().await {
        print_snapshot(&snapshot);
    }
}

fn print_snapshot(s: &CallSnapshot) {
    if let Some(ref offer) = s.incoming_call {
        let status = if s.is_accepting { "connecting" } else { "ringing" };
        println!(
            "[{}] {} call from {} ({})",
            status,
            offer.call_type.as_str(),
            offer.caller_name,
            offer.call_id
        );
    }
    if let Some(ref call) = s.current_call {
        println!(
            "[in call] {} room {} ({})",
            call.call_id,
            call.room_id.as_deref().unwrap_or("-"),
            if s.is_call_ui_open { "call screen open" } else { "call screen closed" }
        );
    }
    if s.incoming_call.is_none() && s.current_call.is_none() {
        println!("[idle]");
    }
    if let Some(ref err) = s.last_error {
        println!("Last error: {}", err);
    }
}
