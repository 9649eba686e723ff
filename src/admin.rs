//! Line-oriented admin console used while the relay runs.

use std::io::BufRead;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::models::ChannelId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    Register(ChannelId),
    Unregister(ChannelId),
    Destinations,
    Status,
    Sync,
    Help,
    Quit,
}

pub const HELP: &str = "commands: register <channel_id> | unregister <channel_id> | destinations | status | sync | help | quit";

impl AdminCommand {
    pub fn parse(line: &str) -> std::result::Result<Self, String> {
        let mut words = line.split_whitespace();
        let command = words.next().unwrap_or_default().to_ascii_lowercase();
        let channel = |arg: Option<&str>| -> std::result::Result<ChannelId, String> {
            arg.ok_or_else(|| format!("{command} needs a channel id"))?
                .parse::<ChannelId>()
                .map_err(|_| "channel id must be a number".to_string())
        };

        match command.as_str() {
            "register" | "add" => channel(words.next()).map(AdminCommand::Register),
            "unregister" | "remove" => channel(words.next()).map(AdminCommand::Unregister),
            "destinations" | "list" => Ok(AdminCommand::Destinations),
            "status" => Ok(AdminCommand::Status),
            "sync" => Ok(AdminCommand::Sync),
            "help" | "?" => Ok(AdminCommand::Help),
            "quit" | "exit" => Ok(AdminCommand::Quit),
            other => Err(format!("unknown command '{other}'")),
        }
    }
}

async fn execute(dispatcher: &Dispatcher, command: AdminCommand) -> Result<String> {
    let reply = match command {
        AdminCommand::Register(channel_id) => match dispatcher.register_destination(channel_id).await? {
            Some(queued) => format!("registered {channel_id}, {queued} items queued"),
            None => format!("{channel_id} is already registered"),
        },
        AdminCommand::Unregister(channel_id) => {
            if dispatcher.unregister_destination(channel_id).await? {
                format!("unregistered {channel_id}")
            } else {
                format!("{channel_id} was not registered")
            }
        }
        AdminCommand::Destinations => {
            let ids = dispatcher.destinations().await?;
            if ids.is_empty() {
                "no destinations registered".to_string()
            } else {
                ids.iter().map(ChannelId::to_string).collect::<Vec<_>>().join("\n")
            }
        }
        AdminCommand::Status => {
            let stats = dispatcher.stats().await?;
            format!(
                "{} items, {} destinations, {} pending, {} delivered",
                stats.items, stats.destinations, stats.pending_tasks, stats.delivered
            )
        }
        AdminCommand::Sync => dispatcher.run_cycle().await?.to_string(),
        AdminCommand::Help => HELP.to_string(),
        AdminCommand::Quit => String::new(),
    };
    Ok(reply)
}

/// Read commands from stdin. `quit` shuts the relay down; end of input only
/// closes the console. Stdin is read on a plain thread so it never holds up
/// runtime shutdown.
pub async fn console(dispatcher: Arc<Dispatcher>, shutdown: watch::Sender<bool>) {
    let (tx, mut rx) = mpsc::channel::<String>(8);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    println!("{HELP}");
    while let Some(line) = rx.recv().await {
        if line.trim().is_empty() {
            continue;
        }
        let command = match AdminCommand::parse(&line) {
            Ok(command) => command,
            Err(message) => {
                println!("{message}");
                continue;
            }
        };
        if command == AdminCommand::Quit {
            tracing::info!("Quit requested from console");
            let _ = shutdown.send(true);
            return;
        }

        match execute(&dispatcher, command).await {
            Ok(reply) => println!("{reply}"),
            Err(e) => {
                tracing::warn!("Admin command failed: {}", e);
                println!("error: {e}");
            }
        }
    }

    tracing::debug!("stdin closed, admin console stopped");
}
