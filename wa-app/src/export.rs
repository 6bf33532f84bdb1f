//! Transcript export to a timestamped plain-text file.

use anyhow::Result;
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use wa_llm::{Turn, export_text};

/// `chat-export-20260101-093000.txt`
pub fn export_filename(now: DateTime<Local>) -> String {
    format!("chat-export-{}.txt", now.format("%Y%m%d-%H%M%S"))
}

/// Writes the transcript into `dir` and returns the created path.
///
/// Refuses an empty conversation and never overwrites an existing file.
pub async fn write_transcript(dir: &Path, turns: &[Turn]) -> Result<PathBuf> {
    write_transcript_at(dir, turns, Local::now()).await
}

pub async fn write_transcript_at(
    dir: &Path,
    turns: &[Turn],
    now: DateTime<Local>,
) -> Result<PathBuf> {
    if turns.is_empty() {
        return Err(anyhow::anyhow!(
            "nothing to export; the conversation is empty"
        ));
    }

    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| anyhow::anyhow!("create export dir {}: {e}", dir.display()))?;

    let target = dir.join(export_filename(now));
    if tokio::fs::try_exists(&target).await.unwrap_or(false) {
        return Err(anyhow::anyhow!(
            "export file {} already exists; try again in a second",
            target.display()
        ));
    }

    tokio::fs::write(&target, export_text(turns))
        .await
        .map_err(|e| anyhow::anyhow!("write export {}: {e}", target.display()))?;
    tracing::info!(path = %target.display(), turns = turns.len(), "transcript exported");
    Ok(target)
}
