//! `tether search` — Query a collection.

use std::path::Path;

use tether_context::SearchRequest;
use tether_core::SearchMode;
use tether_core::store::ChunkStore;

use super::runtime::Runtime;

pub struct SearchOptions {
    pub mode: Option<SearchMode>,
    pub top_k: Option<usize>,
    pub file: Option<String>,
    pub include_questions: bool,
    pub json: bool,
}

pub async fn run(
    explicit: Option<&Path>,
    collection: &str,
    query: &str,
    options: SearchOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = Runtime::open(explicit).await?;
    let collection = runtime.collection(collection).await?;

    let mut request =
        SearchRequest::new(query, collection.id).include_questions(options.include_questions);
    if let Some(mode) = options.mode {
        request = request.mode(mode);
    }
    if let Some(top_k) = options.top_k {
        request = request.top_k(top_k);
    }
    if let Some(file_name) = &options.file {
        let file = runtime
            .store
            .get_file_by_name(collection.id, file_name)
            .await?
            .ok_or_else(|| format!("No file named '{file_name}' in '{}'", collection.name))?;
        request = request.file(file.id);
    }

    let results = runtime.retriever().search_scored(&request).await?;

    if options.json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    let mode = options.mode.unwrap_or(runtime.config.retrieval.default_mode);
    println!("🔍 {mode} search in '{}' for: \"{query}\"", collection.name);
    println!();
    if results.is_empty() {
        println!("   No matching chunks.");
        return Ok(());
    }
    for (i, result) in results.iter().enumerate() {
        let text = result.chunk.content.primary_text.replace('\n', " ");
        let preview: String = text.chars().take(80).collect();
        match result.distance {
            Some(d) => println!("  {:>2}. [{d:.3} via {}] {preview}", i + 1, result.field),
            None => println!("  {:>2}. [keyword] {preview}", i + 1),
        }
    }
    Ok(())
}
