use std::collections::HashSet;

use crate::models::Draft;

/// Conversations that already have a draft, plus messages handled this cycle
///
/// Built once per cycle from the mailbox's drafts and extended as the cycle
/// creates new ones, so a second unread message in a conversation drafted
/// earlier in the same cycle is skipped.
#[derive(Debug, Default, Clone)]
pub struct DeduplicationIndex {
    conversations: HashSet<String>,
    messages: HashSet<String>,
}

impl DeduplicationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_drafts(drafts: &[Draft]) -> Self {
        Self {
            conversations: drafts.iter().map(|d| d.conversation_id.clone()).collect(),
            messages: HashSet::new(),
        }
    }

    pub fn has_conversation(&self, conversation_id: &str) -> bool {
        self.conversations.contains(conversation_id)
    }

    pub fn has_message(&self, message_id: &str) -> bool {
        self.messages.contains(message_id)
    }

    /// True when the message must not be drafted again
    pub fn covers(&self, message_id: &str, conversation_id: &str) -> bool {
        self.has_message(message_id) || self.has_conversation(conversation_id)
    }

    pub fn insert(&mut self, message_id: &str, conversation_id: &str) {
        self.messages.insert(message_id.to_string());
        self.conversations.insert(conversation_id.to_string());
    }

    pub fn conversation_count(&self) -> usize {
        self.conversations.len()
    }
}
