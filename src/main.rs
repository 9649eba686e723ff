use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

mod admin;
mod app;
mod config;
mod db;
mod dispatch;
mod error;
mod ingest;
mod models;
mod services;
mod source;

use app::App;
use config::Config;
use error::Result;
use models::ChannelId;

#[derive(Debug, Parser)]
#[command(name = "announce-relay", version, about = "Relay department announcements into forum threads")]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Default log level when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Refresh and deliver on the configured interval until Ctrl-C
    Run {
        /// Do not read admin commands from stdin
        #[arg(long)]
        no_console: bool,
    },
    /// Run a single refresh and delivery cycle
    Once,
    /// Scrape sources into the store without delivering
    Refresh,
    /// Register a forum channel as a destination
    Register { channel_id: ChannelId },
    /// Remove a destination and its pending deliveries
    Unregister { channel_id: ChannelId },
    /// List registered destinations
    Destinations,
    /// Show store counts
    Status,
    /// Show one stored item and its delivery state per destination
    Show { item_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load(cli.config.as_deref())?;
    tracing::debug!(db_path = %config.db_path, "loaded configuration");
    let app = App::new(config)?;

    match cli.command.unwrap_or(Command::Run { no_console: false }) {
        Command::Run { no_console } => run(&app, !no_console).await?,
        Command::Once => {
            let report = app.dispatcher()?.run_cycle().await?;
            println!("{}", report);
        }
        Command::Refresh => {
            let summary = app.refresh().await?;
            println!(
                "{} items: {} created, {} updated, {} unchanged, {} failed ({} delivery tasks queued)",
                summary.total(),
                summary.created,
                summary.updated,
                summary.unchanged,
                summary.failed,
                summary.tasks_queued
            );
        }
        Command::Register { channel_id } => match app.dispatcher()?.register_destination(channel_id).await? {
            Some(queued) => println!("Registered {} ({} items queued)", channel_id, queued),
            None => println!("{} is already registered", channel_id),
        },
        Command::Unregister { channel_id } => {
            if app.unregister(channel_id).await? {
                println!("Unregistered {}", channel_id);
            } else {
                println!("{} was not registered", channel_id);
            }
        }
        Command::Destinations => {
            for channel_id in app.open_store().await?.list_destinations().await? {
                println!("{}", channel_id);
            }
        }
        Command::Status => {
            let stats = app.open_store().await?.stats().await?;
            println!("Store:        {}", app.config().db_path);
            println!("Items:        {}", stats.items);
            println!("Destinations: {}", stats.destinations);
            println!("Pending:      {}", stats.pending_tasks);
            println!("Delivered:    {}", stats.delivered);
        }
        Command::Show { item_id } => show(&app, &item_id).await?,
    }

    Ok(())
}

async fn show(app: &App, item_id: &str) -> Result<()> {
    let repository = app.open_store().await?;
    let Some(item) = repository.get_item(item_id).await? else {
        println!("No item with id {}", item_id);
        return Ok(());
    };

    println!("{}", item.title);
    println!("  url:         {}", item.url);
    println!("  published:   {}", item.timestamp.to_rfc3339());
    println!("  fingerprint: {}", item.content_hash);

    for channel_id in repository.list_destinations().await? {
        let state = if let Some(record) = repository.delivery_record(channel_id, item_id).await? {
            format!("thread {} posted {}", record.thread_id, record.posted_at.to_rfc3339())
        } else if repository.has_task(channel_id, item_id).await? {
            "pending".to_string()
        } else {
            "not queued".to_string()
        };
        println!("  {}: {}", channel_id, state);
    }
    Ok(())
}

async fn run(app: &App, console: bool) -> Result<()> {
    let dispatcher = Arc::new(app.dispatcher()?);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let worker = {
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move { dispatcher.run(shutdown_rx).await })
    };

    if console {
        tokio::spawn(admin::console(Arc::clone(&dispatcher), shutdown_tx.clone()));
    }

    tracing::info!(
        interval_minutes = app.config().refresh_interval_minutes,
        "Relay started"
    );

    let mut stop = shutdown_tx.subscribe();
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("Ctrl-C received, finishing the current cycle");
        }
        _ = stop.changed() => {}
    }

    let _ = shutdown_tx.send(true);
    worker.await?;
    Ok(())
}
