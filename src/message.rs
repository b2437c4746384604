use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DashboardError, Result};

/// A message row as delivered by the store or by an upstream export.
///
/// Column names drifted over time (`typebot_id` vs `bot_id`,
/// `suggested_message` vs `suggested_question`), so both spellings are kept
/// and reconciled by [`transform_rows`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawMessageRow {
    pub id: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub typebot_id: Option<String>,
    pub bot_id: Option<String>,
    pub thread_id: Option<String>,
    pub user_message: Option<String>,
    pub bot_message: Option<String>,
    pub user_email: Option<String>,
    pub user_name: Option<String>,
    pub user_phone: Option<String>,
    pub user_company: Option<String>,
    pub user_callback_message: Option<String>,
    pub suggested_message: Option<String>,
    pub suggested_question: Option<String>,
    pub sentiment_analysis: Option<i64>,
    pub sentiment_analysis_justification: Option<String>,
    pub sentiment_analysis_prompt: Option<String>,
    pub chat_history: Option<String>,
    pub callback_spare1: Option<String>,
    pub callback_spare2: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub bot_id: Option<String>,
    pub thread_id: String,
    pub user_message: Option<String>,
    pub bot_message: Option<String>,
    pub user_email: Option<String>,
    pub user_name: Option<String>,
    pub user_phone: Option<String>,
    pub user_company: Option<String>,
    pub user_callback_message: Option<String>,
    pub suggested_question: Option<String>,
    pub sentiment_score: Option<i64>,
    pub sentiment_justification: Option<String>,
    pub chat_history: Option<String>,
    pub sentiment_prompt: Option<String>,
    pub callback: Option<String>,
}

fn filled(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

/// First non-blank value, mirroring `a || b` on nullable text columns.
fn first_filled(a: Option<String>, b: Option<String>) -> Option<String> {
    if filled(&a) {
        a
    } else if filled(&b) {
        b
    } else {
        a.or(b)
    }
}

impl Message {
    /// True when the row carries conversational text or contact details
    /// rather than bookkeeping only.
    pub fn has_content(&self) -> bool {
        filled(&self.user_message)
            || filled(&self.bot_message)
            || filled(&self.suggested_question)
            || self.has_callback_info()
    }

    pub fn has_callback_info(&self) -> bool {
        filled(&self.user_name)
            || filled(&self.user_email)
            || filled(&self.user_phone)
            || filled(&self.user_company)
            || filled(&self.user_callback_message)
    }

    /// The first captured callback value on this row, if any.
    pub fn callback_value(&self) -> Option<&str> {
        [
            &self.user_callback_message,
            &self.callback,
            &self.user_email,
            &self.user_phone,
            &self.user_name,
            &self.user_company,
        ]
        .into_iter()
        .find(|v| filled(v))
        .and_then(|v| v.as_deref())
    }
}

impl TryFrom<RawMessageRow> for Message {
    type Error = DashboardError;

    fn try_from(row: RawMessageRow) -> Result<Self> {
        let id = row
            .id
            .filter(|id| !id.is_empty())
            .ok_or(DashboardError::MalformedRecord { field: "id" })?;
        let created_at = row
            .created_at
            .ok_or(DashboardError::MalformedRecord { field: "created_at" })?;
        let thread_id = row
            .thread_id
            .filter(|id| !id.is_empty())
            .ok_or(DashboardError::MalformedRecord { field: "thread_id" })?;

        Ok(Self {
            id,
            created_at,
            bot_id: first_filled(row.typebot_id, row.bot_id),
            thread_id,
            user_message: row.user_message,
            bot_message: row.bot_message,
            user_email: row.user_email,
            user_name: row.user_name,
            user_phone: row.user_phone,
            user_company: row.user_company,
            user_callback_message: row.user_callback_message,
            suggested_question: first_filled(row.suggested_message, row.suggested_question),
            sentiment_score: row.sentiment_analysis,
            sentiment_justification: row.sentiment_analysis_justification,
            chat_history: row.chat_history,
            sentiment_prompt: row.sentiment_analysis_prompt,
            callback: first_filled(row.callback_spare1, row.callback_spare2),
        })
    }
}

/// Normalize raw rows into canonical messages.
///
/// A row lacking `id`, `created_at` or `thread_id` fails the whole batch.
pub fn transform_rows(rows: impl IntoIterator<Item = RawMessageRow>) -> Result<Vec<Message>> {
    rows.into_iter().map(Message::try_from).collect()
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: serde_json::Value) -> RawMessageRow {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn legacy_column_names_are_reconciled() {
        let rows = vec![raw(json!({
            "id": "m1",
            "created_at": "2024-03-01T10:00:00Z",
            "typebot_id": "bot-a",
            "thread_id": "t1",
            "suggested_message": "Want a demo?",
            "callback_spare2": "call me"
        }))];

        let messages = transform_rows(rows).unwrap();
        assert_eq!(messages[0].bot_id.as_deref(), Some("bot-a"));
        assert_eq!(messages[0].suggested_question.as_deref(), Some("Want a demo?"));
        assert_eq!(messages[0].callback.as_deref(), Some("call me"));
        assert_eq!(messages[0].user_message, None);
    }

    #[test]
    fn empty_typebot_id_falls_back_to_bot_id() {
        let row = raw(json!({
            "id": "m1",
            "created_at": "2024-03-01T10:00:00Z",
            "typebot_id": "",
            "bot_id": "bot-b",
            "thread_id": "t1"
        }));
        let message = Message::try_from(row).unwrap();
        assert_eq!(message.bot_id.as_deref(), Some("bot-b"));
    }

    #[test]
    fn timestamp_and_thread_are_preserved() {
        let row = raw(json!({
            "id": "m1",
            "created_at": "2024-03-01T10:00:00.250Z",
            "thread_id": "thread-xyz"
        }));
        let message = Message::try_from(row).unwrap();
        assert_eq!(message.thread_id, "thread-xyz");
        assert_eq!(message.created_at.to_rfc3339(), "2024-03-01T10:00:00.250+00:00");
    }

    #[test]
    fn missing_required_fields_are_rejected() {
        let no_thread = raw(json!({ "id": "m1", "created_at": "2024-03-01T10:00:00Z" }));
        assert!(matches!(
            Message::try_from(no_thread),
            Err(DashboardError::MalformedRecord { field: "thread_id" })
        ));

        let no_time = raw(json!({ "id": "m1", "thread_id": "t1" }));
        assert!(matches!(
            Message::try_from(no_time),
            Err(DashboardError::MalformedRecord { field: "created_at" })
        ));

        let batch = vec![
            raw(json!({ "id": "m1", "created_at": "2024-03-01T10:00:00Z", "thread_id": "t1" })),
            raw(json!({ "created_at": "2024-03-01T10:00:00Z", "thread_id": "t1" })),
        ];
        assert!(matches!(
            transform_rows(batch),
            Err(DashboardError::MalformedRecord { field: "id" })
        ));
    }

    #[test]
    fn content_and_callback_detection() {
        let mut message = fixtures::message("m1", "t1", "bot", 0);
        assert!(message.has_content());
        assert!(!message.has_callback_info());

        message.user_message = Some("   ".into());
        message.bot_message = None;
        assert!(!message.has_content());

        message.user_phone = Some("555-0100".into());
        assert!(message.has_content());
        assert!(message.has_callback_info());
        assert_eq!(message.callback_value(), Some("555-0100"));
    }
}
