//! Command-line front end and daemon for tasksync.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tasksync::{
    Difficulty, Importance, NewTask, RemoteStore, Status, SyncConfig, Task, TaskSync,
    TaskSyncBuilder,
};
use tokio::sync::broadcast::error::RecvError;

/// Offline-first task list kept in sync with a remote to-do service.
#[derive(Parser)]
#[command(name = "tasksync", version, about)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long, env = "TASKSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Local SQLite database URL.
    #[arg(long, env = "TASKSYNC_DATABASE_URL")]
    database_url: Option<String>,

    /// Root URL of the remote to-do API.
    #[arg(long, env = "TASKSYNC_REMOTE_URL")]
    remote_url: Option<String>,

    /// Owner whose tasks are synchronised.
    #[arg(long, env = "TASKSYNC_OWNER")]
    owner: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Keep reconciling in the background until Ctrl-C.
    Run,

    /// Run a single reconciliation pass.
    Sync,

    /// Add a task.
    Add {
        name: String,
        #[arg(long, value_enum, default_value_t = DifficultyArg::Normal)]
        difficulty: DifficultyArg,
        #[arg(long, value_enum, default_value_t = ImportanceArg::Medium)]
        importance: ImportanceArg,
        /// Deadline in seconds since the Unix epoch.
        #[arg(long)]
        deadline: Option<i64>,
    },

    /// List local tasks.
    List,

    /// Rename a task.
    Rename { local_id: String, name: String },

    /// Mark a task completed.
    Done { local_id: String },

    /// Mark a task active again.
    Undo { local_id: String },

    /// Delete a task.
    Rm { local_id: String },

    /// Show local and remote sync state.
    Status,
}

#[derive(Clone, Copy, ValueEnum)]
enum DifficultyArg {
    Easy,
    Normal,
    Hard,
}

impl From<DifficultyArg> for Difficulty {
    fn from(arg: DifficultyArg) -> Self {
        match arg {
            DifficultyArg::Easy => Difficulty::Easy,
            DifficultyArg::Normal => Difficulty::Normal,
            DifficultyArg::Hard => Difficulty::Hard,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ImportanceArg {
    Low,
    Medium,
    High,
}

impl From<ImportanceArg> for Importance {
    fn from(arg: ImportanceArg) -> Self {
        match arg {
            ImportanceArg::Low => Importance::Low,
            ImportanceArg::Medium => Importance::Medium,
            ImportanceArg::High => Importance::High,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("tasksync=info")).init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let builder = TaskSyncBuilder::from_config(&config)?;

    match cli.command {
        Command::Run => run(builder).await,
        Command::Sync => {
            let sync = builder.build().await?;
            if !sync.probe_now().await {
                println!("Remote unreachable; nothing synchronised.");
                return Ok(());
            }
            match sync.reconciler().reconcile().await? {
                Some(report) => println!("{report}"),
                None => println!("A pass is already running."),
            }
            Ok(())
        }
        Command::Add {
            name,
            difficulty,
            importance,
            deadline,
        } => {
            let sync = connect(builder).await?;
            let mut new = NewTask::new(name)
                .with_difficulty(difficulty.into())
                .with_importance(importance.into());
            if let Some(deadline) = deadline {
                new = new.with_deadline(deadline);
            }
            let task = sync.reconciler().add_task(new).await?;
            print_task(&task);
            Ok(())
        }
        Command::List => {
            let sync = builder.build().await?;
            for task in sync.reconciler().list_tasks().await? {
                print_task(&task);
            }
            Ok(())
        }
        Command::Rename { local_id, name } => {
            let sync = connect(builder).await?;
            print_task(&sync.reconciler().rename_task(&local_id, name).await?);
            Ok(())
        }
        Command::Done { local_id } => {
            let sync = connect(builder).await?;
            print_task(&sync.reconciler().set_status(&local_id, Status::Completed).await?);
            Ok(())
        }
        Command::Undo { local_id } => {
            let sync = connect(builder).await?;
            print_task(&sync.reconciler().set_status(&local_id, Status::Active).await?);
            Ok(())
        }
        Command::Rm { local_id } => {
            let sync = connect(builder).await?;
            match sync.reconciler().delete_task(&local_id).await? {
                Some(task) => println!("Deleted {} ({})", task.local_id, task.name),
                None => println!("No task {local_id}"),
            }
            Ok(())
        }
        Command::Status => status(builder).await,
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<SyncConfig> {
    let mut config = match &cli.config {
        Some(path) => SyncConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => SyncConfig::default(),
    };
    if let Some(url) = &cli.database_url {
        config.database_url = url.clone();
    }
    if let Some(url) = &cli.remote_url {
        config.remote_url = url.clone();
    }
    if let Some(owner) = &cli.owner {
        config.owner = owner.clone();
    }
    config.validate()?;
    Ok(config)
}

/// Build and probe once, so one-shot commands propagate when the remote is up.
async fn connect(builder: TaskSyncBuilder) -> anyhow::Result<TaskSync> {
    let sync = builder.build().await?;
    if !sync.probe_now().await {
        log::info!("Remote unreachable; changes stay local until the next sync");
    }
    Ok(sync)
}

async fn run(builder: TaskSyncBuilder) -> anyhow::Result<()> {
    let sync = builder
        .with_probe(true)
        .with_background_sync(true)
        .build()
        .await?;
    let mut changes = sync.local().change_rx();
    println!("Syncing tasks for {}. Press Ctrl-C to stop.", sync.reconciler().owner());

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                log::info!("Received Ctrl-C, shutting down");
                break;
            }
            change = changes.recv() => match change {
                Ok(change) => log::info!("Local {:?} of task {}", change.kind, change.local_id),
                Err(RecvError::Lagged(skipped)) => log::debug!("Skipped {skipped} change events"),
                Err(RecvError::Closed) => break,
            },
        }
    }
    Ok(())
}

async fn status(builder: TaskSyncBuilder) -> anyhow::Result<()> {
    let sync = builder.build().await?;
    let reconciler = sync.reconciler();
    let tasks = reconciler.list_tasks().await?;
    let pending = tasks.iter().filter(|t| t.remote_id.is_none()).count();

    println!("owner:          {}", reconciler.owner());
    println!("local tasks:    {}", tasks.len());
    println!("not yet synced: {pending}");
    match sync.local().last_change().await? {
        Some(at) => println!("last change:    {at}"),
        None => println!("last change:    never"),
    }

    if sync.probe_now().await {
        let remote = reconciler.remote().count_by_owner(reconciler.owner()).await?;
        println!("remote tasks:   {remote}");
    } else {
        println!("remote tasks:   unknown (offline)");
    }
    Ok(())
}

fn print_task(task: &Task) {
    let done = match task.status {
        Status::Completed => "x",
        Status::Active => " ",
    };
    let remote = task
        .remote_id
        .map_or_else(|| "pending".to_string(), |id| format!("#{id}"));
    println!("[{done}] {}  {}  ({remote})", task.local_id, task.name);
}
