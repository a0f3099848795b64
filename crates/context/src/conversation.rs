//! Conversation memory: a token-bounded view over an append-only log.
//!
//! [`ConversationMemory`] holds the non-deleted messages of one conversation,
//! oldest first, rebuilt from the store on [`load`](ConversationMemory::load).
//! Windowing happens at read time only: [`bounded_view`] drops the oldest
//! messages until the rest fit a token ceiling and never touches storage.
//!
//! Writes for a conversation are serialized through [`ConversationLocks`], so
//! two tasks appending to the same conversation cannot interleave and
//! reorder its history.
//!
//! [`bounded_view`]: ConversationMemory::bounded_view

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tether_core::error::StoreError;
use tether_core::message::{ConversationId, Message, NewMessage, Role};
use tether_core::store::MessageStore;
use tracing::debug;

use crate::token::{TokenCounter, message_tokens};

/// Process-wide single-writer guards, one per conversation id.
///
/// Owned by the composition root and cloned into every
/// [`ConversationMemory`]; clones share the same guards.
#[derive(Clone, Default)]
pub struct ConversationLocks {
    inner: Arc<Mutex<HashMap<ConversationId, Arc<tokio::sync::Mutex<()>>>>>,
}

impl ConversationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The writer guard for a conversation, created on first use.
    pub fn lock_for(&self, conversation_id: &ConversationId) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(map.entry(conversation_id.clone()).or_default())
    }

    /// Number of conversations that have had a writer.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The in-memory window of one conversation.
pub struct ConversationMemory {
    conversation_id: ConversationId,
    store: Arc<dyn MessageStore>,
    counter: Arc<dyn TokenCounter>,
    locks: ConversationLocks,
    messages: Vec<Message>,
    /// Token cost of each message, parallel to `messages`
    costs: Vec<usize>,
}

impl ConversationMemory {
    /// Load the non-deleted messages of `conversation_id`, oldest first.
    pub async fn load(
        store: Arc<dyn MessageStore>,
        counter: Arc<dyn TokenCounter>,
        locks: ConversationLocks,
        conversation_id: ConversationId,
    ) -> Result<Self, StoreError> {
        let messages = store.load_messages(&conversation_id).await?;
        let costs = messages
            .iter()
            .map(|m| message_tokens(counter.as_ref(), m))
            .collect();
        debug!(
            conversation = %conversation_id,
            messages = messages.len(),
            "Loaded conversation"
        );
        Ok(Self {
            conversation_id,
            store,
            counter,
            locks,
            messages,
            costs,
        })
    }

    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    /// Every loaded message, oldest first.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Token cost of the whole loaded history.
    pub fn total_tokens(&self) -> usize {
        self.costs.iter().sum()
    }

    /// The longest suffix of the history whose token cost is at most
    /// `limit_tokens`.
    ///
    /// Messages are only ever dropped from the front. A newest message that
    /// alone exceeds the limit yields an empty view.
    pub fn bounded_view(&self, limit_tokens: usize) -> &[Message] {
        let start = bounded_suffix_start(&self.costs, limit_tokens);
        &self.messages[start..]
    }

    /// Persist a message, then add it to the in-memory tail.
    ///
    /// Never rejected for size: overflow is a windowing decision made by
    /// [`bounded_view`](Self::bounded_view).
    pub async fn append(&mut self, role: Role, text: impl Into<String>) -> Result<&Message, StoreError> {
        let guard = self.locks.lock_for(&self.conversation_id);
        let _writer = guard.lock().await;

        let stored = self
            .store
            .append_message(NewMessage::new(self.conversation_id.clone(), role, text))
            .await?;
        let cost = message_tokens(self.counter.as_ref(), &stored);
        debug!(
            conversation = %self.conversation_id,
            message_id = stored.id,
            tokens = cost,
            "Appended message"
        );

        self.costs.push(cost);
        self.messages.push(stored);
        let last = self.messages.len() - 1;
        Ok(&self.messages[last])
    }

    /// Soft-delete a message in storage and drop it from the window.
    ///
    /// Returns `false` if the message is not part of this conversation's
    /// loaded history.
    pub async fn soft_delete(&mut self, message_id: i64) -> Result<bool, StoreError> {
        let Some(position) = self.messages.iter().position(|m| m.id == message_id) else {
            return Ok(false);
        };

        let guard = self.locks.lock_for(&self.conversation_id);
        let _writer = guard.lock().await;

        let deleted = self.store.soft_delete_message(message_id).await?;
        self.messages.remove(position);
        self.costs.remove(position);
        Ok(deleted)
    }

    /// Rebuild the window from the store, picking up writes from other
    /// holders of the same conversation.
    pub async fn reload(&mut self) -> Result<(), StoreError> {
        let messages = self.store.load_messages(&self.conversation_id).await?;
        self.costs = messages
            .iter()
            .map(|m| message_tokens(self.counter.as_ref(), m))
            .collect();
        self.messages = messages;
        Ok(())
    }
}

/// Index of the first message kept when windowing `costs` to `limit`.
fn bounded_suffix_start(costs: &[usize], limit: usize) -> usize {
    let mut total: usize = costs.iter().sum();
    let mut start = 0;
    while total > limit && start < costs.len() {
        total -= costs[start];
        start += 1;
    }
    start
}
