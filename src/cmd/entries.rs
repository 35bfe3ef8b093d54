//! Entry commands: list, show, create, update, note, archive.

use anyhow::{Result, bail};

use devlog_storage::manager::{CreateDevlogRequest, UpdateDevlogRequest};
use devlog_storage::models::{
    DevlogEntry, DevlogFilter, DevlogId, DevlogNote, DevlogPriority, DevlogType, NoteCategory,
};

use super::{Context, print_json};

fn print_line(entry: &DevlogEntry) {
    let id = entry.id.map(|id| id.to_string()).unwrap_or_else(|| "-".into());
    println!(
        "{:>6}  {:<12} {:<8} {:<9} {}",
        id,
        entry.status.as_str(),
        entry.priority.as_str(),
        entry.entry_type.as_str(),
        entry.title
    );
}

pub async fn cmd_list(ctx: &Context, filter: &DevlogFilter, search: Option<&str>) -> Result<()> {
    let devlogs = ctx.devlogs().await?;
    let result = match search.map(str::trim).filter(|q| !q.is_empty()) {
        Some(query) => devlogs.search_devlogs(query, filter).await?,
        None => devlogs.list_devlogs(filter).await?,
    };

    if result.items.is_empty() {
        println!("No devlog entries found.");
        return Ok(());
    }
    for entry in &result.items {
        print_line(entry);
    }
    let meta = &result.pagination;
    println!();
    println!("Page {}/{} ({} total)", meta.page, meta.total_pages.max(1), meta.total);
    Ok(())
}

pub async fn cmd_show(ctx: &Context, id: DevlogId) -> Result<()> {
    match ctx.devlogs().await?.get_devlog(id).await? {
        Some(entry) => print_json(&entry),
        None => bail!("Devlog entry {} not found", id),
    }
}

pub async fn cmd_create(
    ctx: &Context,
    title: String,
    entry_type: DevlogType,
    priority: Option<DevlogPriority>,
    description: Option<String>,
) -> Result<()> {
    let mut request = CreateDevlogRequest::new(title, entry_type);
    request.priority = priority;
    if let Some(description) = description {
        request = request.with_description(description);
    }
    let entry = ctx.devlogs().await?.create_devlog(request).await?;
    print_json(&entry)
}

pub async fn cmd_update(ctx: &Context, id: DevlogId, update: UpdateDevlogRequest) -> Result<()> {
    let entry = ctx.devlogs().await?.update_devlog(id, update).await?;
    print_json(&entry)
}

pub async fn cmd_note(ctx: &Context, id: DevlogId, category: NoteCategory, content: String) -> Result<()> {
    let entry = ctx
        .devlogs()
        .await?
        .add_note(id, DevlogNote::new(category, content))
        .await?;
    print_json(&entry)
}

pub async fn cmd_archive(ctx: &Context, id: DevlogId) -> Result<()> {
    ctx.devlogs().await?.archive_devlog(id).await?;
    println!("Archived devlog entry {}", id);
    Ok(())
}
