//! `tether history` / `say` / `forget` — Conversation commands.

use std::path::Path;

use tether_context::ConversationMemory;
use tether_core::message::{ConversationId, Role};

use super::runtime::Runtime;

async fn open(
    explicit: Option<&Path>,
    conversation: &str,
) -> Result<(Runtime, ConversationMemory), Box<dyn std::error::Error>> {
    let runtime = Runtime::open(explicit).await?;
    let memory = ConversationMemory::load(
        runtime.store.clone(),
        runtime.counter.clone(),
        runtime.locks.clone(),
        ConversationId::from(conversation),
    )
    .await?;
    Ok((runtime, memory))
}

pub async fn history(
    explicit: Option<&Path>,
    conversation: &str,
    limit_tokens: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (runtime, memory) = open(explicit, conversation).await?;
    let limit = limit_tokens.unwrap_or(runtime.config.conversation.max_history_tokens);

    let view = memory.bounded_view(limit);
    println!(
        "💬 {conversation}: {} of {} messages fit in {limit} tokens ({} total)",
        view.len(),
        memory.len(),
        memory.total_tokens()
    );
    println!();
    for message in view {
        println!(
            "  #{:<5} {:<9} {}",
            message.id,
            message.role.as_str(),
            message.text.replace('\n', " ")
        );
    }
    Ok(())
}

pub async fn say(
    explicit: Option<&Path>,
    conversation: &str,
    role: Role,
    text: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let (_, mut memory) = open(explicit, conversation).await?;
    let message = memory.append(role, text).await?;
    println!("✅ Stored message #{} ({})", message.id, message.role);
    Ok(())
}

pub async fn forget(
    explicit: Option<&Path>,
    conversation: &str,
    message_id: i64,
) -> Result<(), Box<dyn std::error::Error>> {
    let (_, mut memory) = open(explicit, conversation).await?;
    if memory.soft_delete(message_id).await? {
        println!("🗑️  Message #{message_id} removed from {conversation}.");
    } else {
        println!("   No live message #{message_id} in {conversation}.");
    }
    Ok(())
}
