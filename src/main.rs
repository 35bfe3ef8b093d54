use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};

use devlog_storage::models::{DevlogPriority, DevlogStatus, DevlogType, NoteCategory};

mod cmd;

#[derive(Parser)]
#[command(name = "devlog")]
#[command(version, about = "Inspect and edit devlog entries in the configured storage")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Workspace to operate on (defaults to the default workspace)
    #[arg(long, global = true, env = "DEVLOG_WORKSPACE")]
    pub workspace: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List entries
    List {
        #[arg(long)]
        status: Vec<DevlogStatus>,
        #[arg(long = "type")]
        entry_type: Vec<DevlogType>,
        #[arg(long)]
        priority: Vec<DevlogPriority>,
        /// Full-text query
        #[arg(short, long)]
        search: Option<String>,
        /// Show archived entries instead of active ones
        #[arg(long)]
        archived: bool,
        #[arg(long, default_value = "1")]
        page: u32,
        #[arg(long, default_value = "20")]
        limit: u32,
    },
    /// Print one entry as JSON
    Show { id: i64 },
    /// Create an entry
    Create {
        title: String,
        #[arg(long = "type", default_value = "task")]
        entry_type: DevlogType,
        #[arg(long)]
        priority: Option<DevlogPriority>,
        #[arg(short, long)]
        description: Option<String>,
    },
    /// Update fields of an entry
    Update {
        id: i64,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        status: Option<DevlogStatus>,
        #[arg(long)]
        priority: Option<DevlogPriority>,
        #[arg(long = "type")]
        entry_type: Option<DevlogType>,
        #[arg(short, long)]
        description: Option<String>,
    },
    /// Append a note to an entry
    Note {
        id: i64,
        content: String,
        #[arg(short, long, default_value = "progress")]
        category: NoteCategory,
    },
    /// Archive an entry
    Archive { id: i64 },
    /// Aggregate counts for active entries
    Stats,
    /// Daily created/completed series
    Timeseries {
        #[arg(long)]
        days: Option<u32>,
        #[arg(long)]
        from: Option<NaiveDate>,
        #[arg(long)]
        to: Option<NaiveDate>,
    },
    /// Print change events as JSON lines until interrupted
    Watch,
    /// List configured workspaces
    Workspaces,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    devlog_storage::logging::init(cli.verbose)?;

    let ctx = cmd::Context::open(cli.workspace.as_deref()).await?;
    let outcome = cmd::dispatch(&ctx, cli.command).await;
    ctx.shutdown().await;
    outcome
}
