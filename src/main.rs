mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use cli::Cli;
use fsnotifier::{
    CancellationToken, Event, EventHandler, EventType, HandlerRef, Notifier, RunOptions,
    WatchOptions,
};
use parking_lot::Mutex;
use std::{collections::BTreeMap, sync::Arc};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Logs every event and keeps a count per event type.
#[derive(Default)]
struct LoggingHandler {
    seen: Mutex<BTreeMap<String, usize>>,
}

impl EventHandler for LoggingHandler {
    fn can_handle_event_type(&self, _event_type: EventType) -> bool {
        true
    }

    fn handle_event(&self, event: &Event) {
        info!(
            path = ?event.file_path(),
            kind = ?event.event_type(),
            cookie = event.cookie(),
            is_dir = event.is_directory(),
            "fs event"
        );
        *self
            .seen
            .lock()
            .entry(format!("{:?}", event.event_type()))
            .or_default() += 1;
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let cli = Cli::parse();

    let only = cli
        .only
        .iter()
        .fold(EventType::empty(), |acc, &event_type| acc | event_type);
    let options = WatchOptions::default()
        .with_event_types(if only.is_empty() { EventType::ALL } else { only })
        .with_follow_symlinks(!cli.no_follow)
        .with_directory_only(cli.dir_only)
        .with_oneshot(cli.oneshot);

    let handler = Arc::new(LoggingHandler::default());
    let mut notifier = Notifier::new().context("create notifier failed")?;
    for path in &cli.paths {
        notifier
            .add_watch(path, [handler.clone() as HandlerRef], options)
            .with_context(|| format!("watch {} failed", path.display()))?;
    }

    let stop = CancellationToken::new();
    let ctrlc_stop = stop.clone();
    ctrlc::set_handler(move || ctrlc_stop.cancel()).context("install Ctrl-C handler failed")?;

    let run_options = RunOptions::default()
        .with_handle_once(cli.handle_once)
        .with_warn_unhandled(!cli.quiet_unhandled);
    let result = notifier.run(Some(&stop), run_options).await;
    // Release the descriptor whether or not the loop failed.
    notifier.close().context("close notifier failed")?;
    result.context("dispatch loop failed")?;

    for (kind, count) in handler.seen.lock().iter() {
        info!(kind = %kind, count = *count, "summary");
    }
    Ok(())
}
