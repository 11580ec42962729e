//! Progress reporting from blocking library calls
//!
//! Library operations run on a blocking worker; their progress events are
//! sent over a channel and printed to stderr by an async task.

use anyhow::{Context, Result};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use modhub_core::repositories::{Progress, RepositorySet};
use modhub_core::ModhubConfig;

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Progress { value: f64, message: String },
    Error(String),
}

/// Forwards progress events to the printer task
pub struct ChannelProgress {
    sender: UnboundedSender<ProgressEvent>,
}

impl ChannelProgress {
    pub fn new(sender: UnboundedSender<ProgressEvent>) -> Self {
        Self { sender }
    }
}

impl Progress for ChannelProgress {
    fn progress(&self, value: f64, message: &str) {
        // The printer only goes away once the worker is done
        let _ = self.sender.send(ProgressEvent::Progress {
            value,
            message: message.to_string(),
        });
    }

    fn error(&self, message: &str) {
        let _ = self.sender.send(ProgressEvent::Error(message.to_string()));
    }
}

pub fn render(event: &ProgressEvent) -> String {
    match event {
        ProgressEvent::Progress { value, message } => {
            format!("[{:>3.0}%] {}", (value * 100.0).clamp(0.0, 100.0), message)
        }
        ProgressEvent::Error(message) => format!("Error: {message}"),
    }
}

async fn print_events(mut receiver: UnboundedReceiver<ProgressEvent>, quiet: bool) {
    while let Some(event) = receiver.recv().await {
        // Errors are always shown, plain progress only when asked for
        if quiet && matches!(event, ProgressEvent::Progress { .. }) {
            continue;
        }
        eprintln!("{}", render(&event));
    }
}

/// Open the repositories of `config` and run `operation` on a blocking worker
///
/// Repositories are fetched first when the sources list was just created.
pub async fn with_repositories<T, F>(config: ModhubConfig, quiet: bool, operation: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&mut RepositorySet, &dyn Progress) -> modhub_core::Result<T> + Send + 'static,
{
    let (sender, receiver) = unbounded_channel();
    let printer = tokio::spawn(print_events(receiver, quiet));

    let result = tokio::task::spawn_blocking(move || {
        let progress = ChannelProgress::new(sender);
        let mut set = config.open_repositories()?;
        if set.is_first_run() {
            tracing::info!("First run, fetching repositories");
            set.update_repositories(&progress)?;
        }
        operation(&mut set, &progress)
    })
    .await
    .context("Repository worker stopped unexpectedly")?;

    printer.await.context("Progress printer stopped unexpectedly")?;
    Ok(result?)
}
