//! `Taskboard` demo: two clients sharing one in-process backend.
//!
//! Runs a scripted session (invite, concurrent edits, a drag between
//! columns, presence, board deletion) and prints the board as each client
//! sees it. Configuration via CLI flags, environment variables, or config
//! file (`~/.config/taskboard/config.toml`).
//!
//! ```bash
//! cargo run --bin taskboard -- --email ada@example.com
//! TASKBOARD_LOG=debug cargo run --bin taskboard
//! ```

use std::error::Error;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::mpsc;
use tracing_appender::non_blocking::WorkerGuard;

use taskboard::backend::memory::MemoryBackend;
use taskboard::boards::BoardDirectory;
use taskboard::config::{CliArgs, ClientConfig};
use taskboard::dnd::Rect;
use taskboard::events::SessionEvent;
use taskboard::identity::Identity;
use taskboard::members::InviteInbox;
use taskboard::session::BoardSession;
use taskboard_proto::feed::Table;
use taskboard_proto::ids::UserId;
use taskboard_proto::member::Profile;
use taskboard_proto::task::{NewTask, TaskPriority, TaskStatus};

/// Column width of the demo layout.
const COLUMN_WIDTH: f64 = 300.0;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = CliArgs::parse();

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config file: {e}");
            ClientConfig::default()
        }
    };

    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());
    tracing::info!("taskboard demo starting");

    let result = run_demo(&config).await;

    tracing::info!("taskboard demo exiting");
    result
}

/// Initialize file-based logging.
///
/// Returns a [`WorkerGuard`] that must be held until shutdown to ensure all
/// buffered log entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("taskboard.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_env("TASKBOARD_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

/// Lets background settlement and feed pumps catch up.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(25)).await;
}

fn seed_profile(backend: &MemoryBackend, identity: &Identity, name: &str) -> Result<(), Box<dyn Error>> {
    let profile = Profile {
        id: identity.user_id,
        email: identity.email.clone(),
        full_name: Some(name.to_string()),
    };
    backend.seed(Table::Profiles, serde_json::to_value(&profile)?);
    Ok(())
}

fn print_board(label: &str, session: &BoardSession<MemoryBackend>) {
    println!("--- {label}: {} ---", session.board().title);
    for (status, tasks) in session.columns() {
        println!("  {status}");
        for task in tasks {
            let editors: Vec<String> = session
                .editors_of(&task.id)
                .into_iter()
                .map(|u| u.email)
                .collect();
            let badge = if editors.is_empty() {
                String::new()
            } else {
                format!("  (editing: {})", editors.join(", "))
            };
            println!("    [{}] {}{badge}", task.priority, task.title);
        }
    }
    let online: Vec<String> = session.active_users().into_iter().map(|u| u.email).collect();
    println!("  online: {}", online.join(", "));
}

fn drain_notices(label: &str, rx: &mut mpsc::UnboundedReceiver<SessionEvent>) {
    while let Ok(event) = rx.try_recv() {
        if let Some(notice) = event.notice() {
            println!("  {label} notice: {notice}");
        }
    }
}

async fn run_demo(config: &ClientConfig) -> Result<(), Box<dyn Error>> {
    let backend = Arc::new(MemoryBackend::new());
    let sync = &config.sync;

    let ada = config.identity()?;
    let bob = Identity::new(UserId::new(), "bob@example.com");
    seed_profile(&backend, &ada, "Ada")?;
    seed_profile(&backend, &bob, "Bob")?;

    let directory = BoardDirectory::new(Arc::clone(&backend), ada.clone(), sync.mutation_timeout);
    let board = directory.create("Launch plan").await?;

    let (ada_view, mut ada_events) =
        BoardSession::open(Arc::clone(&backend), ada.clone(), board.id, sync).await?;
    ada_view.invite(&bob.email).await?;

    let inbox = InviteInbox::new(Arc::clone(&backend), bob.clone(), sync.mutation_timeout);
    for invite in inbox.pending().await? {
        inbox.accept(&invite).await?;
    }

    let (bob_view, mut bob_events) =
        BoardSession::open(Arc::clone(&backend), bob.clone(), board.id, sync).await?;
    for (i, status) in TaskStatus::ALL.into_iter().enumerate() {
        let x = COLUMN_WIDTH * f64::from(u32::try_from(i)?);
        bob_view.register_column(status, Rect::new(x, 0.0, COLUMN_WIDTH - 1.0, 800.0));
    }

    let write_docs = NewTask::new("Write release notes").with_priority(TaskPriority::High);
    let docs_id = write_docs.id;
    ada_view.create_task(write_docs)?;
    ada_view.create_task(NewTask::new("Tag the release"))?;
    ada_view
        .create_task(NewTask::new("Announce").with_status(TaskStatus::InProgress))?
        .settled()
        .await?;
    settle().await;

    if bob_view.start_drag(&docs_id) {
        bob_view.move_pointer(450.0, 120.0);
        let outcome = bob_view.end_drag(2.0 * COLUMN_WIDTH + 10.0, 120.0);
        tracing::info!(?outcome, "bob dropped a card");
    }
    let _ = ada_view.on_task_press(docs_id);
    settle().await;

    print_board("ada", &ada_view);
    print_board("bob", &bob_view);
    let assignees = bob_view.assignees().await?;
    let names: Vec<String> = assignees
        .iter()
        .map(|a| format!("{} ({})", a.name, a.initials))
        .collect();
    println!("  assignable: {}", names.join(", "));

    directory.delete(board.id).await?;
    settle().await;
    drain_notices("ada", &mut ada_events);
    drain_notices("bob", &mut bob_events);
    println!("bob session closed: {}", bob_view.is_closed());
    Ok(())
}
