//! CLI command implementations.
//!
//! | Module    | Commands handled                                         |
//! |-----------|----------------------------------------------------------|
//! | `entries` | `List`, `Show`, `Create`, `Update`, `Note`, `Archive`    |
//! | `report`  | `Stats`, `Timeseries`, `Workspaces`                      |
//! | `watch`   | `Watch`                                                  |

pub mod entries;
pub mod report;
pub mod watch;

use std::sync::Arc;

use anyhow::{Context as _, Result};
use serde::Serialize;

use devlog_storage::events::EventBus;
use devlog_storage::manager::DevlogManager;
use devlog_storage::models::{DevlogFilter, PaginationOptions, TimeSeriesRequest};
use devlog_storage::workspace::{WorkspaceManager, WorkspaceSession};

use crate::Commands;

/// Everything a command needs: the workspace layer and the session bound
/// to the selected workspace.
pub struct Context {
    pub manager: Arc<WorkspaceManager>,
    pub session: WorkspaceSession,
    pub bus: EventBus,
}

impl Context {
    pub async fn open(workspace: Option<&str>) -> Result<Self> {
        let manager = Arc::new(WorkspaceManager::from_env().context("Failed to load storage configuration")?);
        let bus = EventBus::default();
        let session = WorkspaceSession::new(manager.clone(), bus.clone());
        if let Some(id) = workspace {
            session
                .switch_to_workspace(id)
                .await
                .with_context(|| format!("Failed to open workspace {}", id))?;
        }
        Ok(Self { manager, session, bus })
    }

    pub async fn devlogs(&self) -> Result<DevlogManager> {
        let provider = self.session.provider().await.context("Failed to open storage")?;
        Ok(DevlogManager::new(provider))
    }

    pub async fn shutdown(&self) {
        self.session.close().await;
        self.manager.shutdown().await;
    }
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn dispatch(ctx: &Context, command: Commands) -> Result<()> {
    match command {
        Commands::List {
            status,
            entry_type,
            priority,
            search,
            archived,
            page,
            limit,
        } => {
            let filter = DevlogFilter {
                status,
                entry_type,
                priority,
                archived: Some(archived),
                pagination: Some(PaginationOptions::new(page, limit)),
                ..DevlogFilter::default()
            };
            entries::cmd_list(ctx, &filter, search.as_deref()).await
        }
        Commands::Show { id } => entries::cmd_show(ctx, id).await,
        Commands::Create {
            title,
            entry_type,
            priority,
            description,
        } => entries::cmd_create(ctx, title, entry_type, priority, description).await,
        Commands::Update {
            id,
            title,
            status,
            priority,
            entry_type,
            description,
        } => {
            let update = devlog_storage::manager::UpdateDevlogRequest {
                title,
                status,
                priority,
                entry_type,
                description,
                ..Default::default()
            };
            entries::cmd_update(ctx, id, update).await
        }
        Commands::Note { id, content, category } => entries::cmd_note(ctx, id, category, content).await,
        Commands::Archive { id } => entries::cmd_archive(ctx, id).await,
        Commands::Stats => report::cmd_stats(ctx).await,
        Commands::Timeseries { days, from, to } => {
            report::cmd_timeseries(ctx, &TimeSeriesRequest { days, from, to }).await
        }
        Commands::Workspaces => report::cmd_workspaces(ctx).await,
        Commands::Watch => watch::cmd_watch(ctx).await,
    }
}
