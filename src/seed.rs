//! Loading exported dashboard data (bots, assignments, message rows) into
//! the store.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

use crate::{
    directory::Bot,
    message::{transform_rows, RawMessageRow},
    store::Store,
};

#[derive(Debug, Deserialize)]
struct Assignment {
    user_id: String,
    bot_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Export {
    bots: Vec<Bot>,
    assignments: Vec<Assignment>,
    messages: Vec<RawMessageRow>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub bots: usize,
    pub assignments: usize,
    pub messages: usize,
}

pub async fn import_file(store: &Store, path: impl AsRef<Path>) -> Result<ImportSummary> {
    let path = path.as_ref();
    let json = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read seed file {}", path.display()))?;
    import_json(store, &json).await
}

/// Rows already present are left as they are, so re-importing is harmless.
pub async fn import_json(store: &Store, json: &str) -> Result<ImportSummary> {
    let export: Export = serde_json::from_str(json).context("Invalid seed file")?;
    // Reject the whole file before writing anything if a row is malformed.
    let messages = transform_rows(export.messages)?;

    for bot in &export.bots {
        store.upsert_bot(bot).await?;
    }
    for assignment in &export.assignments {
        store.assign_bot(&assignment.user_id, &assignment.bot_id).await?;
    }
    for message in &messages {
        store.insert_message(message).await?;
    }

    let summary = ImportSummary {
        bots: export.bots.len(),
        assignments: export.assignments.len(),
        messages: messages.len(),
    };
    info!(
        "Imported {} bots, {} assignments, {} messages",
        summary.bots, summary.assignments, summary.messages
    );
    Ok(summary)
}
