//! `tether config` — Configuration management commands.

use std::path::Path;

use tether_config::{AppConfig, EmbeddingProviderConfig};

use super::runtime::{config_path, load_config};

pub async fn validate(explicit: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Validating configuration...");

    let path = config_path(explicit);
    match AppConfig::load_with_env(&path) {
        Ok(config) => {
            println!("   ✅ Config parsed successfully");

            let mut warnings = Vec::new();
            for model in &config.embedding.models {
                if matches!(model.provider, EmbeddingProviderConfig::OpenaiCompat { .. })
                    && model.provider.resolve_api_key().is_none()
                {
                    warnings.push(format!("No API key found for embedding model '{}'", model.name));
                }
            }
            if config.store.is_in_memory() {
                warnings.push("store.path is \":memory:\", nothing will persist".to_string());
            }

            if warnings.is_empty() {
                println!("   ✅ All checks passed");
            } else {
                println!();
                for w in &warnings {
                    println!("   ⚠️  {w}");
                }
            }

            println!();
            println!("   Store:       {}", config.store.resolved_path());
            println!("   Embedding:   {}", config.embedding.default_model);
            println!("   Models:      {}", config.embedding.models.len());
            println!(
                "   Retrieval:   {} (top_k={}, questions={})",
                config.retrieval.default_mode, config.retrieval.top_k, config.retrieval.include_questions
            );
            println!(
                "   History:     {} tokens",
                config.conversation.max_history_tokens
            );
        }
        Err(e) => {
            println!("   ❌ Config error: {e}");
            return Err(e.into());
        }
    }

    Ok(())
}

pub async fn show(explicit: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(explicit)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

pub async fn path(explicit: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", config_path(explicit).display());
    Ok(())
}
