//! `tether init` — First-time setup.

use std::path::Path;

use tether_config::AppConfig;

use super::runtime::{Runtime, config_path};

pub async fn run(explicit: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = config_path(explicit);

    println!("Tether — First-Time Setup");
    println!("=========================\n");

    if let Some(config_dir) = config_path.parent()
        && !config_dir.as_os_str().is_empty()
        && !config_dir.exists()
    {
        std::fs::create_dir_all(config_dir)?;
        println!("✅ Created config directory: {}", config_dir.display());
    }

    if config_path.exists() {
        println!("  Config file exists: {}", config_path.display());
    } else {
        std::fs::write(&config_path, AppConfig::default_toml())?;
        println!("✅ Created config file: {}", config_path.display());
    }

    // Opening the store creates the database and runs migrations.
    let runtime = Runtime::open(explicit).await?;
    println!("✅ Database ready: {}", runtime.config.store.resolved_path());
    println!(
        "   Default embedding model: {}",
        runtime.embeddings.default_model()
    );

    println!("\nNext steps:");
    println!("  tether collection create docs");
    println!("  tether ingest docs ./notes.txt");
    println!("  tether search docs \"your question\"");

    Ok(())
}
