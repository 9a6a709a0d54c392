use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use notebook_sync_lib::models::{CellRecord, ConflictAction, ConflictPrompt, NotebookInfo};
use notebook_sync_lib::{
    init_tracing, load_settings, update_settings, ConflictDecision, DebugPanel, DirtyFlag, EventStore,
    FileTransport, HttpTransport, NotebookDocument, SyncHost, SyncPoller, SyncSettings,
    SyncTransport, Toast, ToastKind, Toaster,
};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::Duration;

#[derive(Parser)]
#[command(version, about = "Keeps an open notebook in sync with changes made on disk", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// YAML settings file
    #[arg(long, global = true, env = "NOTEBOOK_SYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Write JSON logs to this directory instead of stderr
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// JSON merge patch applied on top of the settings file, e.g. '{"pollIntervalMs": 1000}'
    #[arg(long = "set", global = true, value_name = "JSON")]
    overrides: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct SourceArgs {
    /// Notebook file to watch directly
    path: Option<PathBuf>,

    /// Notebook server base url (defaults to serverUrl from settings)
    #[arg(long, conflicts_with = "path")]
    server: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll for external changes and resolve conflicts interactively
    Watch {
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Run a single update check and exit
    Check {
        #[command(flatten)]
        source: SourceArgs,
    },
}

/// Prints what a page would render and keeps the working copy of the notebook.
struct TerminalHost {
    document: Mutex<NotebookDocument>,
    toaster: Toaster,
}

impl TerminalHost {
    fn snapshot(&self) -> NotebookDocument {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, NotebookDocument> {
        self.document
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The toast still on screen, if it has not been dismissed yet.
    fn status_line(&self) -> Option<String> {
        self.toaster.current().map(|toast| match toast.kind {
            ToastKind::Success => format!("toast: {}", toast.message),
            ToastKind::Error => format!("toast (error): {}", toast.message),
        })
    }
}

impl SyncHost for TerminalHost {
    fn render_cells(&self, cells: &[CellRecord]) {
        self.lock().cells = cells.to_vec();
        for cell in cells {
            let first_line = cell.source.lines().next().unwrap_or("");
            println!("  [{}] {} {}", cell.cell_type.as_str(), cell.id, first_line);
        }
    }

    fn refresh_info(&self, info: &NotebookInfo) {
        println!(
            "{}: {} cells ({} code, {} markdown, {} executed)",
            info.name, info.cell_count, info.code_count, info.md_count, info.executed_count
        );
    }

    fn show_conflict_dialog(&self, prompt: &ConflictPrompt) {
        println!("\n== {} ==\n{}", prompt.title, prompt.message);
        for line in action_lines(prompt) {
            println!("{}", line);
        }
    }

    fn close_conflict_dialog(&self) {
        println!("== conflict closed ==");
    }

    fn mark_saved(&self) {
        println!("(saved)");
    }

    fn show_toast(&self, toast: Toast) {
        let marker = match toast.kind {
            ToastKind::Success => "ok",
            ToastKind::Error => "error",
        };
        println!("[{}] {}", marker, toast.message);
        self.toaster.show(toast);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = resolve_settings(cli.config.as_deref(), cli.overrides.as_deref())?;
    let log_dir = cli
        .log_dir
        .clone()
        .or_else(|| settings.log_dir.as_ref().map(PathBuf::from));
    init_tracing(log_dir.as_deref()).context("failed to initialise logging")?;

    match cli.command {
        Commands::Watch { source } => watch(source, settings).await,
        Commands::Check { source } => check(source, settings).await,
    }
}

/// One line per offered action, keyed by the stdin command that picks it.
fn action_lines(prompt: &ConflictPrompt) -> Vec<String> {
    prompt
        .actions
        .iter()
        .map(|action| {
            let key = match action {
                ConflictAction::Reload => 'r',
                ConflictAction::KeepMine => 'k',
            };
            format!("  [{}] {}", key, action.label())
        })
        .collect()
}

fn resolve_settings(config: Option<&Path>, overrides: Option<&str>) -> Result<SyncSettings> {
    let settings = load_settings(config).context("failed to load settings")?;
    let Some(overrides) = overrides else {
        return Ok(settings);
    };
    let patch: serde_json::Value =
        serde_json::from_str(overrides).context("--set expects a JSON object")?;
    update_settings(&settings, patch).context("invalid --set override")
}

async fn check(source: SourceArgs, settings: SyncSettings) -> Result<()> {
    let transport: Arc<dyn SyncTransport> = match source.path {
        Some(path) => Arc::new(FileTransport::new(path)),
        None => {
            let server = source.server.unwrap_or(settings.server_url);
            Arc::new(HttpTransport::new(&server)?)
        }
    };
    let response = transport.check_updates().await?;
    println!("{}", serde_json::to_string(&response)?);
    Ok(())
}

async fn open_source(
    source: SourceArgs,
    settings: &SyncSettings,
) -> Result<(Arc<dyn SyncTransport>, NotebookDocument)> {
    if let Some(path) = source.path {
        let transport = Arc::new(FileTransport::new(&path));
        let document = transport
            .load()
            .await
            .with_context(|| format!("failed to open {}", path.display()))?;
        transport
            .watcher()
            .spawn(Duration::from_millis(settings.file_watch_interval_ms));
        let transport: Arc<dyn SyncTransport> = transport;
        return Ok((transport, document));
    }

    let server = source.server.unwrap_or_else(|| settings.server_url.clone());
    let transport = Arc::new(HttpTransport::new(&server)?);
    let payload = transport
        .reload()
        .await
        .with_context(|| format!("failed to load notebook from {}", server))?;
    let mut document = NotebookDocument::new(
        payload
            .metadata
            .as_ref()
            .and_then(|metadata| metadata.get("name"))
            .and_then(|name| name.as_str())
            .unwrap_or("Untitled"),
    );
    document.cells = payload.cells.unwrap_or_default();
    let transport: Arc<dyn SyncTransport> = transport;
    Ok((transport, document))
}

async fn watch(source: SourceArgs, settings: SyncSettings) -> Result<()> {
    let (transport, document) = open_source(source, &settings).await?;
    let events = EventStore::new(settings.event_capacity);
    let panel = DebugPanel::attach(&events);
    let host = Arc::new(TerminalHost {
        document: Mutex::new(document),
        toaster: Toaster::new(Duration::from_millis(settings.toast_duration_ms)),
    });
    let dirty = DirtyFlag::new();
    let poller = SyncPoller::new(
        transport,
        host.clone(),
        Arc::new(dirty.clone()),
        &settings,
        Some(events.clone()),
    );

    host.refresh_info(&host.snapshot().info());
    print_help();
    poller.start();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut visible = true;
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
        match command {
            "" => {}
            "r" | "k" | "c" => {
                let decision = match command {
                    "r" => ConflictDecision::Reload,
                    "k" => ConflictDecision::Keep,
                    _ => ConflictDecision::Cancel,
                };
                if let Err(error) = poller.resolver().resolve(decision).await {
                    tracing::warn!(error = %error, "conflict decision not applied");
                }
            }
            "e" => {
                let mut document = host.lock();
                let id = format!("cell_{}", document.cells.len() + 1);
                document.cells.push(CellRecord::code(id, rest));
                dirty.mark_dirty();
                println!("(modified)");
            }
            "s" => {
                let document = host.snapshot();
                // Failures are already reported through a toast.
                let _ = poller.save_notebook(&document).await;
            }
            "v" => {
                visible = !visible;
                poller.set_visible(visible);
                println!("(visible: {})", visible);
            }
            "p" => {
                panel.set_paused(!panel.is_paused());
                println!("(debug panel paused: {})", panel.is_paused());
            }
            "d" => {
                print!("{}", panel.render_text());
                if let Some(status) = host.status_line() {
                    println!("{}", status);
                }
            }
            "?" | "h" => print_help(),
            "q" => break,
            other => println!("unknown command {:?}, type ? for help", other),
        }
    }

    poller.stop();
    panel.refresh();
    print!("{}", panel.render_text());
    Ok(())
}

fn print_help() {
    println!(
        "commands: e <source> add cell | s save | r reload / k keep mine / c dismiss conflict | v toggle visibility | \
         d dump events | p pause event view | q quit"
    );
}
