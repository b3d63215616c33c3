//! Parley application binary - composition root.
//!
//! Ties the Parley crates together into a terminal chat client:
//! 1. Load configuration from TOML, then env and CLI overrides
//! 2. Open local storage and, unless offline, the SQLite backend
//! 3. Build the inference client when an endpoint is configured
//! 4. Log observability events in the background
//! 5. Drive the widget from stdin

mod cli;
mod repl;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;

use parley_core::config::ParleyConfig;
use parley_core::events::{EventBus, WidgetEvent};
use parley_storage::{Database, DurableBackend, FileKeyValueStore, SqliteBackend};
use parley_widget::{
    HttpInferenceClient, InferenceClient, LoggingNavigator, Navigator, QuickActionOutcome,
    TurnOutcome, WidgetController, WidgetDeps, WidgetError,
};

use cli::CliArgs;
use repl::{Command, TranscriptPrinter, HELP};

/// Navigator that prints the URI for the user to open.
struct TerminalNavigator {
    inner: LoggingNavigator,
}

#[async_trait]
impl Navigator for TerminalNavigator {
    async fn open(&self, uri: &str) -> Result<(), WidgetError> {
        self.inner.open(uri).await?;
        println!("  -> open {}", uri);
        Ok(())
    }
}

/// Log every widget event until the bus closes.
async fn event_logger(mut rx: broadcast::Receiver<WidgetEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                let payload = serde_json::to_string(&event).unwrap_or_default();
                tracing::info!(
                    event = event.event_name(),
                    conversation_id = %event.conversation_id(),
                    payload = %payload,
                    "Widget event"
                );
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event logger lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Open the durable backend, or `None` to run offline.
fn open_backend(config: &ParleyConfig, data_dir: &Path) -> Option<Arc<dyn DurableBackend>> {
    if !config.storage.durable_enabled {
        tracing::info!("Durable storage disabled, running offline");
        return None;
    }
    let db_path = data_dir.join(&config.storage.database_file);
    match Database::new(&db_path) {
        Ok(db) => {
            tracing::info!(path = %db_path.display(), "SQLite database opened");
            Some(Arc::new(SqliteBackend::new(Arc::new(db))))
        }
        Err(e) => {
            tracing::warn!(path = %db_path.display(), error = %e, "Database unavailable, running offline");
            None
        }
    }
}

fn build_inference(config: &ParleyConfig) -> Option<Arc<dyn InferenceClient>> {
    let endpoint = config.inference.endpoint.as_deref()?;
    let timeout = std::time::Duration::from_millis(config.inference.timeout_ms);
    match HttpInferenceClient::new(endpoint, timeout) {
        Ok(client) => {
            tracing::info!(endpoint, "Inference client ready");
            Some(Arc::new(client))
        }
        Err(e) => {
            tracing::error!(endpoint, error = %e, "Failed to build inference client");
            None
        }
    }
}

fn print_lines(printer: &mut TranscriptPrinter, controller: &WidgetController) {
    for line in printer.update(&controller.snapshot()) {
        println!("{}", line);
    }
}

fn report_turn(outcome: Option<TurnOutcome>) {
    match outcome {
        Some(TurnOutcome::Fallback { error }) => {
            tracing::debug!(error = %error, "Turn ended in fallback");
        }
        Some(TurnOutcome::Replied { escalated_now: true }) => {
            tracing::debug!("Turn escalated the conversation");
        }
        _ => {}
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config.
    let config_file = args.resolve_config_path();
    let mut config = ParleyConfig::load_or_default(&config_file);
    config.apply_env_overrides();
    if let Some(dir) = args.resolve_data_dir() {
        config.general.data_dir = dir;
    }
    if let Some(endpoint) = &args.endpoint {
        config.inference.endpoint = Some(endpoint.clone());
    }
    if let Some(level) = &args.log_level {
        config.general.log_level = level.clone();
    }
    if args.offline {
        config.storage.durable_enabled = false;
    }

    // Tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.general.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Starting Parley v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), "Configuration resolved");

    // Storage.
    let data_dir = config.general.resolved_data_dir();
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::error!(path = %data_dir.display(), error = %e, "Failed to create data directory");
        return Err(e.into());
    }
    let local_store = Arc::new(FileKeyValueStore::new(
        data_dir.join(&config.storage.local_store_file),
    ));
    let backend = open_backend(&config, &data_dir);

    // Events.
    let events = EventBus::default();
    tokio::spawn(event_logger(events.subscribe()));

    // Widget.
    let mut deps = WidgetDeps::new(local_store)
        .with_navigator(Arc::new(TerminalNavigator {
            inner: LoggingNavigator,
        }))
        .with_events(events);
    if let Some(backend) = backend {
        deps = deps.with_backend(backend);
    }
    if let Some(client) = build_inference(&config) {
        deps = deps.with_inference(client);
    } else {
        tracing::warn!("No inference endpoint configured, every reply will be the fallback");
    }
    let controller = WidgetController::new(&config, deps);

    let mut printer = TranscriptPrinter::default();
    controller.initialize().await;
    print_lines(&mut printer, &controller);
    println!("(type /help for commands)");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let result = match repl::parse_command(&line) {
            Command::Empty => continue,
            Command::Quit => break,
            Command::Help => {
                println!("{}", HELP);
                continue;
            }
            Command::Unknown(input) => {
                println!("unknown command: {}", input);
                continue;
            }
            Command::Retry => {
                controller.reset().await;
                Ok(())
            }
            Command::Send(text) => controller.send_message(&text, None).await.map(report_turn),
            Command::Attach { path, text } => match repl::file_meta(Path::new(&path)) {
                Ok(meta) => controller
                    .send_message(&text, Some(meta))
                    .await
                    .map(report_turn),
                Err(e) => {
                    println!("cannot attach {}: {}", path, e);
                    continue;
                }
            },
            Command::Quick(n) => {
                let actions = controller.snapshot().quick_actions;
                match actions.get(n - 1) {
                    Some(action) => controller.select_quick_action(action).await.map(|o| {
                        if let QuickActionOutcome::Sent(turn) = o {
                            report_turn(turn);
                        }
                    }),
                    None => {
                        println!("no quick action {}", n);
                        continue;
                    }
                }
            }
        };

        if let Err(e) = result {
            println!("! {}", e);
        }
        print_lines(&mut printer, &controller);
        if controller.lead().escalated {
            println!("({})", controller.snapshot().input_placeholder);
        }
    }

    controller.flush_persistence().await;
    if let Some(queue) = controller.persistence() {
        if queue.failures() > 0 {
            tracing::warn!(failures = queue.failures(), "Some messages were not persisted");
        }
    }
    tracing::info!("Parley stopped");
    Ok(())
}
