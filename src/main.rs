//! Command line client driven by the relay synchronization engine. Supports
//! key generation, watching the reconstructed timeline, and publishing notes.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use weavr::client::Client;
use weavr::config::Settings;
use weavr::event::{EventTemplate, KIND_TEXT_NOTE};
use weavr::keys::Keys;
use weavr::thread::Marker;

/// Command line interface entry point.
#[derive(Parser)]
#[command(name = "weavr", author, version, about = "Nostr relay sync client")]
struct Cli {
    /// Path to the `.env` configuration file.
    #[arg(long, default_value = ".env")]
    env: String,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Generate a fresh identity and print the key pair.
    Keygen,
    /// Connect to the configured relays and print the timeline as it grows.
    Watch,
    /// Publish a text note to the configured relays.
    Post {
        /// Note content.
        content: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Keygen => {
            let keys = Keys::generate();
            println!("secret: {}", keys.secret_hex());
            println!("public: {}", keys.public_key());
        }
        Commands::Watch => watch(&cli.env).await?,
        Commands::Post { content } => post(&cli.env, content).await?,
    }
    Ok(())
}

fn load_keys(cfg: &Settings) -> Result<Keys> {
    match &cfg.secret_key {
        Some(secret) => Keys::from_secret_hex(secret),
        None => Ok(Keys::generate()),
    }
}

fn spawn_client(cfg: Settings) -> Result<Client> {
    if cfg.relays.is_empty() {
        bail!("no relays configured; set RELAYS in the env file");
    }
    let keys = load_keys(&cfg)?;
    let (client, _task) = Client::spawn(keys, cfg.relays, cfg.following, cfg.socks_proxy);
    Ok(client)
}

/// Print root notes (and their direct replies) as the store grows, until
/// interrupted.
async fn watch(env_path: &str) -> Result<()> {
    let cfg = Settings::from_env(env_path)?;
    let client = spawn_client(cfg)?;
    let mut changes = client.changes();
    let mut printed: HashSet<String> = HashSet::new();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                let snap = client.snapshot().await;
                for note in snap.root_notes() {
                    if !printed.insert(note.id.clone()) {
                        continue;
                    }
                    let author = snap
                        .profile(&note.pubkey)
                        .and_then(|p| p.name.clone())
                        .unwrap_or_else(|| note.pubkey.chars().take(8).collect());
                    println!("[{}] {}: {}", note.created_at, author, note.content);
                    for reply in snap.replies_of(&note.id, Marker::Root) {
                        println!("    > {}", reply.content);
                    }
                }
            }
        }
    }
    client.shutdown();
    Ok(())
}

/// Publish one text note, waiting for at least one connection to open first
/// since sends to closed connections are silently skipped.
async fn post(env_path: &str, content: String) -> Result<()> {
    let cfg = Settings::from_env(env_path)?;
    let client = spawn_client(cfg)?;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let open = client.connected_relays().await;
        if !open.is_empty() {
            println!("publishing to {} relay(s)", open.len());
            break;
        }
        if tokio::time::Instant::now() >= deadline {
            bail!("no relay connection could be opened");
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    client.publish(
        EventTemplate {
            kind: KIND_TEXT_NOTE,
            tags: vec![],
            content,
            created_at: None,
        },
        None,
    );
    // Give the connection writers a moment to flush before exiting.
    tokio::time::sleep(Duration::from_millis(500)).await;
    client.shutdown();
    Ok(())
}
