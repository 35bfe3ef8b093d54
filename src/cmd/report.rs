use anyhow::Result;

use devlog_storage::models::{DevlogFilter, TimeSeriesRequest};

use super::{Context, print_json};

pub async fn cmd_stats(ctx: &Context) -> Result<()> {
    let stats = ctx.devlogs().await?.get_stats(&DevlogFilter::default()).await?;
    print_json(&stats)
}

pub async fn cmd_timeseries(ctx: &Context, request: &TimeSeriesRequest) -> Result<()> {
    let series = ctx.devlogs().await?.get_time_series_stats(request).await?;
    print_json(&series)
}

pub async fn cmd_workspaces(ctx: &Context) -> Result<()> {
    let workspaces = ctx.manager.list_workspaces().await?;
    let default_id = ctx.manager.default_workspace_id().await?;
    for workspace in &workspaces {
        let marker = if workspace.id == default_id { "*" } else { " " };
        println!("{} {:<16} {}", marker, workspace.id, workspace.name);
    }
    Ok(())
}
