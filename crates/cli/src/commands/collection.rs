//! `tether collection` — Collection management commands.

use std::path::Path;

use tether_core::store::ChunkStore;

use super::runtime::Runtime;

pub async fn create(
    explicit: Option<&Path>,
    name: &str,
    model: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = Runtime::open(explicit).await?;
    let collection = runtime.indexer().create_collection(name, model).await?;
    println!(
        "✅ Created collection '{}' (id {}, model {}, {} dims)",
        collection.name,
        collection.id,
        collection.embedding_model_name,
        collection.embedding_dimensions
    );
    Ok(())
}

pub async fn list(explicit: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = Runtime::open(explicit).await?;
    let collections = runtime.store.list_collections().await?;

    if collections.is_empty() {
        println!("No collections yet. Create one with `tether collection create <name>`.");
        return Ok(());
    }

    println!("{:<6} {:<24} {:<28} {:>6}", "ID", "NAME", "MODEL", "FILES");
    for collection in &collections {
        let files = runtime.store.list_files(collection.id).await?;
        println!(
            "{:<6} {:<24} {:<28} {:>6}",
            collection.id,
            collection.name,
            collection.embedding_model_name,
            files.len()
        );
    }
    Ok(())
}

pub async fn files(explicit: Option<&Path>, name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = Runtime::open(explicit).await?;
    let collection = runtime.collection(name).await?;
    let files = runtime.store.list_files(collection.id).await?;

    if files.is_empty() {
        println!("Collection '{name}' has no files.");
        return Ok(());
    }

    println!("{:<6} {:<32} {:>7}  {}", "ID", "FILE", "CHUNKS", "SHA-256");
    for file in &files {
        let chunks = runtime
            .store
            .list_chunks(collection.id, Some(file.id))
            .await?;
        println!(
            "{:<6} {:<32} {:>7}  {}",
            file.id,
            file.file_name,
            chunks.len(),
            &file.file_hash[..file.file_hash.len().min(12)]
        );
    }
    Ok(())
}
