//! Legion CLI
//!
//! Terminal host for the client engine: list sessions, follow one live,
//! and send messages, permission answers or interrupts.

mod render;

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use legion_client::{
    data_dir, init_logging, ClientConfig, ConnectionStatus, EngineHandle, HttpApi,
    PermissionAnswer, StoreEvent, ToolStatus,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::info;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Parser)]
#[command(name = "legion")]
#[command(about = "Follow and drive Legion agent sessions", version)]
struct Cli {
    /// Config file (defaults to LEGION_CONFIG, then <data dir>/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory for config and logs
    #[arg(long, global = true, env = "LEGION_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Backend base URL, overrides the config file
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Debug-level logs for the client crates
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List sessions
    Sessions,
    /// Select a session and stream it until Ctrl-C
    Watch {
        session_id: String,
        /// Print change events as JSON lines instead of rendering them
        #[arg(long)]
        json: bool,
    },
    /// Send a chat message to a session
    Send { session_id: String, content: String },
    /// Answer a pending permission request
    Respond {
        session_id: String,
        request_id: String,
        #[arg(long, conflicts_with = "deny")]
        allow: bool,
        #[arg(long)]
        deny: bool,
        /// Reason shown to the agent on denial
        #[arg(long)]
        reason: Option<String>,
        #[arg(long)]
        clarification: Option<String>,
    },
    /// Interrupt the agent's current turn
    Interrupt { session_id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let data_dir = data_dir(cli.data_dir.as_deref());
    let logging = init_logging(&data_dir, cli.verbose).context("failed to initialize logging")?;
    info!(
        component = "cli",
        event = "cli.started",
        data_dir = %data_dir.display(),
        log_path = %logging.log_path.display(),
    );

    let mut config = ClientConfig::load(cli.config.as_deref(), &data_dir)?;
    if let Some(url) = cli.base_url {
        config.base_url = url;
    }
    let api = HttpApi::new(&config)?;
    let engine = EngineHandle::spawn(config, Arc::new(api));

    let result = match cli.command {
        Commands::Sessions => list_sessions(&engine).await,
        Commands::Watch { session_id, json } => watch(&engine, &session_id, json).await,
        Commands::Send {
            session_id,
            content,
        } => {
            open_session(&engine, &session_id).await?;
            let id = engine.send_message(content).await?;
            println!("  {} {}", render::dim("sent"), id);
            Ok(())
        }
        Commands::Respond {
            session_id,
            request_id,
            allow,
            deny,
            reason,
            clarification,
        } => {
            if allow == deny {
                bail!("pass exactly one of --allow or --deny");
            }
            open_session(&engine, &session_id).await?;
            let mut answer = if allow {
                PermissionAnswer::allow(request_id)
            } else {
                PermissionAnswer::deny(request_id, reason)
            };
            answer.clarification = clarification;
            engine.respond_permission(answer).await?;
            println!("  {}", render::dim("permission answered"));
            Ok(())
        }
        Commands::Interrupt { session_id } => {
            open_session(&engine, &session_id).await?;
            engine.interrupt_session().await?;
            println!("  {}", render::dim("interrupt sent"));
            Ok(())
        }
    };

    engine.shutdown().await?;
    result
}

async fn list_sessions(engine: &EngineHandle) -> anyhow::Result<()> {
    engine.refresh_sessions().await?;
    let snapshot = engine.snapshot();
    if snapshot.sessions.is_empty() {
        println!("  No sessions.");
        return Ok(());
    }
    println!("{}", render::sessions_table(&snapshot.sessions));
    Ok(())
}

/// Select the session and wait for its socket to come up.
async fn open_session(engine: &EngineHandle, session_id: &str) -> anyhow::Result<()> {
    let mut events = engine.subscribe();
    engine
        .select_session(session_id)
        .await
        .with_context(|| format!("failed to open session {session_id}"))?;

    let connected = async {
        loop {
            if engine.snapshot().connections.session == ConnectionStatus::Connected {
                return Ok(());
            }
            match events.recv().await {
                Ok(StoreEvent::ConnectionChanged {
                    status: ConnectionStatus::Failed,
                    ..
                }) if engine.snapshot().connections.session == ConnectionStatus::Failed => {
                    bail!("session channel gave up reconnecting");
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => bail!("engine stopped"),
            }
        }
    };
    tokio::time::timeout(CONNECT_TIMEOUT, connected)
        .await
        .context("timed out waiting for the session channel")?
}

async fn watch(engine: &EngineHandle, session_id: &str, json: bool) -> anyhow::Result<()> {
    let mut events = engine.subscribe();
    engine.connect_ui().await?;
    engine
        .select_session(session_id)
        .await
        .with_context(|| format!("failed to open session {session_id}"))?;

    let mut printer = Printer::default();
    if !json {
        printer.catch_up(engine);
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(event) if json => println!("{}", serde_json::to_string(&event)?),
                Ok(event) => printer.on_event(engine, &event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        component = "cli",
                        event = "watch.lagged",
                        skipped,
                    );
                    if !json {
                        printer.catch_up(engine);
                    }
                }
                Err(RecvError::Closed) => break,
            }
        }
    }
    Ok(())
}

/// Prints what changed since the last call, diffing against the snapshot.
#[derive(Default)]
struct Printer {
    seen_ids: HashSet<String>,
    tools: HashMap<String, (ToolStatus, bool)>,
}

impl Printer {
    fn catch_up(&mut self, engine: &EngineHandle) {
        self.print_messages(engine);
        self.print_tools(engine);
    }

    fn on_event(&mut self, engine: &EngineHandle, event: &StoreEvent) {
        match event {
            StoreEvent::MessagesChanged { .. } | StoreEvent::HistoryLoaded { .. } => {
                self.print_messages(engine)
            }
            StoreEvent::ToolCallsChanged { .. } | StoreEvent::ToolsOrphaned { .. } => {
                self.print_tools(engine)
            }
            StoreEvent::PermissionRequested {
                session_id,
                request_id,
                tool_use_id,
            } => println!("{}", render::permission_hint(session_id, request_id, tool_use_id.as_deref())),
            StoreEvent::SessionChanged { session_id, state } => {
                println!("  {} {} → {}", render::dim("session"), session_id, state.as_str())
            }
            StoreEvent::ConnectionChanged { channel, status } => {
                println!("  {}", render::connection(*channel, *status))
            }
            StoreEvent::SyncCompleted { report, .. } if report.synced > 0 || report.truncated => {
                let note = if report.truncated { " (gap truncated)" } else { "" };
                println!("  {} {} missed messages{note}", render::dim("synced"), report.synced);
            }
            StoreEvent::SyncFailed { error, .. } => {
                println!("  {} {error}", render::warn("sync failed:"))
            }
            StoreEvent::ServerError { message, .. } => {
                println!("  {} {message}", render::warn("server:"))
            }
            _ => {}
        }
    }

    fn print_messages(&mut self, engine: &EngineHandle) {
        let snapshot = engine.snapshot();
        // Late messages can land before the tail, so dedupe by id.
        for message in snapshot.messages.iter() {
            if self.seen_ids.insert(message.message_id.clone()) {
                println!("{}", render::message(message));
            }
        }
    }

    fn print_tools(&mut self, engine: &EngineHandle) {
        let snapshot = engine.snapshot();
        for call in snapshot.tool_calls_ordered() {
            let seen = (call.effective_status(), call.orphaned);
            if self.tools.get(&call.tool_use_id) == Some(&seen) {
                continue;
            }
            self.tools.insert(call.tool_use_id.clone(), seen);
            println!("{}", render::tool_call(call));
        }
    }
}
