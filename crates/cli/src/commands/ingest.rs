//! `tether ingest` — Index a plain-text file.

use std::path::Path;

use tether_context::{IngestRequest, IngestStatus};

use super::runtime::Runtime;

pub async fn run(
    explicit: Option<&Path>,
    collection: &str,
    path: &Path,
    max_tokens: usize,
    user_id: Option<i64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| format!("{} is not a file path", path.display()))?;

    let runtime = Runtime::open(explicit).await?;
    let collection = runtime.collection(collection).await?;

    let mut request = IngestRequest::new(collection.id, file_name, text);
    request.max_chunk_tokens = max_tokens;
    request.user_id = user_id;
    let report = runtime.indexer().ingest_text(request).await?;

    match report.status {
        IngestStatus::Created => println!(
            "✅ Indexed {} into '{}' ({} chunks)",
            report.file.file_name, collection.name, report.chunks
        ),
        IngestStatus::Replaced => println!(
            "✅ Re-indexed changed file {} ({} chunks)",
            report.file.file_name, report.chunks
        ),
        IngestStatus::Unchanged => println!(
            "  {} is unchanged ({} chunks), nothing to do",
            report.file.file_name, report.chunks
        ),
    }
    Ok(())
}
