use anyhow::Result;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use super::Context;

/// Streams the current workspace's change events to stdout until Ctrl-C.
pub async fn cmd_watch(ctx: &Context) -> Result<()> {
    let mut rx = ctx.bus.subscribe();
    // Subscribes the session (remote providers subscribe on first use).
    ctx.session.provider().await?;
    let workspace = ctx.session.current_workspace_id().await.unwrap_or_default();
    eprintln!("Watching workspace {} (Ctrl-C to stop)", workspace);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            received = rx.recv() => match received {
                Ok(event) => println!("{}", serde_json::to_string(&event)?),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "watcher fell behind, events dropped"),
                Err(RecvError::Closed) => break,
            },
        }
    }
    Ok(())
}
