//! Thread aggregation: bucketing canonical messages by conversation and
//! deriving per-thread duration, counts and transcript.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::message::Message;

/// Messages bucketed by `thread_id`, in arrival order within each bucket.
pub type ThreadMap = BTreeMap<String, Vec<Message>>;

pub const ZERO_DURATION: &str = "00:00:00";

/// Single pass grouping. Buckets keep the order the rows arrived in.
pub fn group_by_thread(messages: impl IntoIterator<Item = Message>) -> ThreadMap {
    let mut threads = ThreadMap::new();
    for message in messages {
        threads
            .entry(message.thread_id.clone())
            .or_default()
            .push(message);
    }
    threads
}

/// Elapsed time between the first and last message of a thread as `HH:MM:SS`.
///
/// Only messages with content count; when none have any, all are used.
pub fn calculate_duration(messages: &[Message]) -> String {
    let mut timestamps: Vec<_> = messages
        .iter()
        .filter(|m| m.has_content())
        .map(|m| m.created_at)
        .collect();
    if timestamps.is_empty() {
        timestamps = messages.iter().map(|m| m.created_at).collect();
    }
    timestamps.sort();

    let (Some(first), Some(last)) = (timestamps.first(), timestamps.last()) else {
        return ZERO_DURATION.to_string();
    };
    if timestamps.len() < 2 || first == last {
        return ZERO_DURATION.to_string();
    }

    let millis = (*last - *first).num_milliseconds();
    format_duration(millis.max(0) / 1000)
}

pub fn format_duration(total_seconds: i64) -> String {
    let total_seconds = total_seconds.max(0);
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}

/// A conversation derived from its bucket of messages. Never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct Thread {
    pub id: String,
    /// Chronological, oldest first.
    pub messages: Vec<Message>,
    pub duration: String,
    pub total_messages: usize,
}

impl Thread {
    pub fn new(id: impl Into<String>, messages: &[Message]) -> Self {
        let mut sorted = messages.to_vec();
        // Feeds may arrive newest-first; sort is stable for equal timestamps.
        sorted.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        Self {
            id: id.into(),
            duration: calculate_duration(&sorted),
            total_messages: sorted.len(),
            messages: sorted,
        }
    }

    pub fn from_map(threads: &ThreadMap) -> Vec<Thread> {
        threads
            .iter()
            .map(|(id, messages)| Thread::new(id.clone(), messages))
            .collect()
    }

    /// The chronologically first message; holds thread-level fields.
    pub fn anchor(&self) -> Option<&Message> {
        self.messages.first()
    }

    pub fn bot_id(&self) -> Option<&str> {
        self.messages.iter().find_map(|m| m.bot_id.as_deref())
    }

    pub fn has_callback(&self) -> bool {
        self.messages.iter().any(Message::has_callback_info)
    }

    pub fn has_email(&self) -> bool {
        self.messages
            .iter()
            .any(|m| m.user_email.as_deref().is_some_and(|e| !e.trim().is_empty()))
    }

    /// Any callback value captured anywhere in the thread.
    pub fn callback(&self) -> Option<&str> {
        self.messages.iter().find_map(Message::callback_value)
    }

    /// Conversation rendered as `User:`/`Bot:` lines for sentiment scoring.
    pub fn transcript(&self) -> String {
        let mut lines = Vec::new();
        for message in &self.messages {
            if let Some(text) = message.user_message.as_deref().map(str::trim) {
                if !text.is_empty() {
                    lines.push(format!("User: {}", text));
                }
            }
            if let Some(text) = message.bot_message.as_deref().map(str::trim) {
                if !text.is_empty() {
                    lines.push(format!("Bot: {}", text));
                }
            }
        }

        if lines.is_empty() {
            return self
                .anchor()
                .and_then(|m| m.chat_history.clone())
                .unwrap_or_default();
        }
        lines.join("\n")
    }
}
