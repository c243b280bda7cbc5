use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use pinclip::backend::ArboardBackend;
use pinclip::history::SHORTCUT_SLOTS;
use pinclip::hotkeys::{GlobalHotkeys, HotkeyRegistrar, NoHotkeys};
use pinclip::idle::{IdleSource, NoIdleSource, SystemIdle};
use pinclip::reader::ClipboardReader;
use pinclip::scheduler::TokioScheduler;
use pinclip::{ClipboardApp, ClipboardWatcher, Config, InboundMessage};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "pinclip")]
#[command(version)]
#[command(about = "clipboard history with pinning and Ctrl+1..9 recall")]
struct Cli {
    /// Config file to use instead of the per-user one
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the clipboard watcher
    Daemon,
    /// Print the daemon's clipboard history
    List {
        /// Only show entries containing this text
        #[arg(long)]
        search: Option<String>,
    },
    /// Put a history entry back on the clipboard
    Recall { index: usize },
    /// Pin or unpin a history entry
    Pin { index: usize },
    /// Clear the history and the clipboard
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load().context("Failed to load configuration")?,
    };
    config.validate()?;

    match cli.command {
        Commands::Daemon => run_daemon(config).await,
        Commands::List { search } => print_history(&config, search.as_deref()).await,
        Commands::Recall { index } => send(&config, InboundMessage::SetClipboard(index)).await,
        Commands::Pin { index } => send(&config, InboundMessage::PinEntry(index)).await,
        Commands::Clear => {
            send(&config, InboundMessage::ClearHistory).await?;
            println!("Clipboard history cleared");
            Ok(())
        }
    }
}

async fn run_daemon(config: Config) -> Result<()> {
    #[cfg(target_os = "linux")]
    {
        if std::env::var("DISPLAY").is_err() && std::env::var("WAYLAND_DISPLAY").is_err() {
            anyhow::bail!("No display server available (neither X11 nor Wayland)");
        }
    }

    let backend = Arc::new(ArboardBackend::new().context("Failed to open clipboard")?);
    let watcher = Arc::new(ClipboardWatcher::new(
        ClipboardReader::new(backend),
        Arc::new(TokioScheduler::current()),
        Duration::from_millis(config.poll_interval_ms),
    ));

    let (inbound_tx, inbound_rx) = mpsc::channel(32);
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

    let hotkeys: Box<dyn HotkeyRegistrar> = if config.register_hotkeys {
        match GlobalHotkeys::new(inbound_tx.clone()) {
            Ok(hotkeys) => Box::new(hotkeys),
            Err(e) => {
                warn!("running without shortcuts: {}", e);
                Box::new(NoHotkeys)
            }
        }
    } else {
        Box::new(NoHotkeys)
    };

    let idle: Box<dyn IdleSource> = match SystemIdle::new() {
        Ok(idle) => Box::new(idle),
        Err(e) => {
            warn!("idle pause disabled: {}", e);
            Box::new(NoIdleSource)
        }
    };

    #[cfg(unix)]
    let ipc_handle = {
        let server = pinclip::ipc::IpcServer::bind(&config.socket_path)?;
        tokio::spawn(server.serve(inbound_tx, outbound_rx))
    };
    #[cfg(not(unix))]
    let _unused = (inbound_tx, outbound_rx);

    let mut app = ClipboardApp::new(
        &config,
        watcher,
        hotkeys,
        idle,
        outbound_tx,
    );

    app.run(inbound_rx, async {
        let _ = signal::ctrl_c().await;
        info!("shutting down");
    })
    .await;

    #[cfg(unix)]
    ipc_handle.abort();

    Ok(())
}

#[cfg(unix)]
async fn send(config: &Config, msg: InboundMessage) -> Result<()> {
    pinclip::ipc::send_message(&config.socket_path, &msg).await
}

#[cfg(unix)]
async fn print_history(config: &Config, search: Option<&str>) -> Result<()> {
    let entries = pinclip::ipc::fetch_history(&config.socket_path).await?;

    for (index, entry) in entries.iter().enumerate() {
        if let Some(query) = search {
            if !entry.matches(query) {
                continue;
            }
        }
        let shortcut = if index < SHORTCUT_SLOTS {
            format!("C-{}", index + 1)
        } else {
            "   ".to_string()
        };
        let pin = if entry.is_pinned { '*' } else { ' ' };
        println!("{:>3} {} {} {}", index, shortcut, pin, entry.summary());
    }
    Ok(())
}

#[cfg(not(unix))]
async fn send(_config: &Config, _msg: InboundMessage) -> Result<()> {
    anyhow::bail!("talking to the daemon needs a unix socket")
}

#[cfg(not(unix))]
async fn print_history(_config: &Config, _search: Option<&str>) -> Result<()> {
    anyhow::bail!("talking to the daemon needs a unix socket")
}
