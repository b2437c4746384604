//! Presentation rows for the messages, threads and callbacks views.
//!
//! All formatters are pure and re-check the directory ACL, so a row for a bot
//! the caller is not assigned to can never be produced.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    directory::BotDirectory,
    message::Message,
    scoring::normalize_for_display,
    thread::{Thread, ThreadMap},
};

/// `YYYY-MM-DD HH:MM:SS`, UTC.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MessageRow {
    pub id: String,
    pub created_at: String,
    pub thread_id: String,
    pub bot_id: String,
    pub bot_name: String,
    pub user_message: Option<String>,
    pub bot_message: Option<String>,
    pub suggested_question: Option<String>,
    pub user_email: Option<String>,
    pub user_name: Option<String>,
    pub user_phone: Option<String>,
    pub user_company: Option<String>,
    pub user_callback_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ThreadRow {
    pub thread_id: String,
    pub created_at: String,
    pub bot_id: String,
    pub bot_name: String,
    pub duration: String,
    pub total_messages: usize,
    pub has_callback: bool,
    pub callback: Option<String>,
    pub sentiment_score: Option<i64>,
    pub sentiment_ratio: Option<f64>,
    pub sentiment_justification: Option<String>,
    pub has_sentiment_prompt: bool,
    pub transcript: String,
}

fn message_row(message: &Message, bot_id: &str, bot_name: String) -> MessageRow {
    MessageRow {
        id: message.id.clone(),
        created_at: format_timestamp(message.created_at),
        thread_id: message.thread_id.clone(),
        bot_id: bot_id.to_string(),
        bot_name,
        user_message: message.user_message.clone(),
        bot_message: message.bot_message.clone(),
        suggested_question: message.suggested_question.clone(),
        user_email: message.user_email.clone(),
        user_name: message.user_name.clone(),
        user_phone: message.user_phone.clone(),
        user_company: message.user_company.clone(),
        user_callback_message: message.user_callback_message.clone(),
    }
}

/// Every visible message with content, threads in map order and messages
/// oldest first.
pub fn message_rows(threads: &ThreadMap, directory: &BotDirectory) -> Vec<MessageRow> {
    Thread::from_map(threads)
        .iter()
        .flat_map(|thread| thread.messages.iter())
        .filter(|m| m.has_content())
        .filter_map(|m| {
            let bot_id = m.bot_id.as_deref().filter(|id| directory.permits(Some(*id)))?;
            Some(message_row(m, bot_id, directory.display_name(bot_id)))
        })
        .collect()
}

/// One row per visible thread, described by its anchor message.
pub fn thread_rows(threads: &ThreadMap, directory: &BotDirectory) -> Vec<ThreadRow> {
    Thread::from_map(threads)
        .into_iter()
        .filter_map(|thread| {
            let bot_id = thread.bot_id().filter(|id| directory.permits(Some(*id)))?;
            let anchor = thread.anchor()?;
            // Scores are persisted on the anchor only.
            let score = anchor.sentiment_score;

            Some(ThreadRow {
                thread_id: thread.id.clone(),
                created_at: format_timestamp(anchor.created_at),
                bot_id: bot_id.to_string(),
                bot_name: directory.display_name(bot_id),
                duration: thread.duration.clone(),
                total_messages: thread.total_messages,
                has_callback: thread.has_callback(),
                callback: thread.callback().map(str::to_string),
                sentiment_score: score,
                sentiment_ratio: score.map(normalize_for_display),
                sentiment_justification: anchor.sentiment_justification.clone(),
                has_sentiment_prompt: thread
                    .messages
                    .iter()
                    .any(|m| m.sentiment_prompt.as_deref().is_some_and(|p| !p.trim().is_empty())),
                transcript: thread.transcript(),
            })
        })
        .collect()
}

/// Messages of threads where the visitor left contact details including an
/// email, newest first within each thread.
pub fn callback_rows(
    threads: &ThreadMap,
    directory: &BotDirectory,
    thread_filter: Option<&str>,
) -> Vec<MessageRow> {
    let single = directory.single_bot();

    Thread::from_map(threads)
        .iter()
        .filter(|thread| thread_filter.map_or(true, |id| thread.id == id))
        .filter(|thread| thread.has_callback() && thread.has_email())
        .flat_map(|thread| thread.messages.iter().rev())
        .filter(|m| m.has_content())
        .filter_map(|m| {
            let bot_id = m.bot_id.as_deref().filter(|id| directory.permits(Some(*id)))?;
            let bot_name = match &single {
                Some(entry) => entry.bot_name.clone(),
                None => directory.display_name(bot_id),
            };
            Some(message_row(m, bot_id, bot_name))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::Bot;
    use crate::message::fixtures::message;
    use crate::thread::group_by_thread;

    fn directory_for(assigned: &[&str]) -> BotDirectory {
        let bots = [
            Bot::new("bot-a", Some("Support"), None),
            Bot::new("bot-b", Some("Sales"), None),
            Bot::new("bot-x", Some("Secret"), None),
        ];
        BotDirectory::new(assigned.iter().map(|s| s.to_string()), &bots)
    }

    fn sample() -> ThreadMap {
        let mut contact = message("m3", "t1", "bot-a", 60);
        contact.user_message = None;
        contact.bot_message = None;
        contact.user_email = Some("ada@example.com".into());
        contact.user_callback_message = Some("call after 5".into());

        let mut scored = message("m1", "t1", "bot-a", 0);
        scored.sentiment_score = Some(75);
        scored.sentiment_justification = Some("polite".into());

        group_by_thread(vec![
            contact,
            message("m2", "t1", "bot-a", 30),
            scored,
            message("m4", "t2", "bot-b", 0),
            message("m5", "t3", "bot-x", 0),
            message("m6", "t3", "bot-x", 10),
        ])
    }

    #[test]
    fn unassigned_bots_never_surface() {
        let threads = sample();
        let directory = directory_for(&["bot-a", "bot-b"]);

        assert!(message_rows(&threads, &directory).iter().all(|r| r.bot_id != "bot-x"));
        assert!(thread_rows(&threads, &directory).iter().all(|r| r.bot_id != "bot-x"));
        assert!(callback_rows(&threads, &directory, None)
            .iter()
            .all(|r| r.bot_id != "bot-x"));

        let nobody = directory_for(&[]);
        assert!(message_rows(&threads, &nobody).is_empty());
        assert!(thread_rows(&threads, &nobody).is_empty());
    }

    #[test]
    fn message_rows_carry_names_and_dates() {
        let rows = message_rows(&sample(), &directory_for(&["bot-a", "bot-b"]));
        let ids: Vec<_> = rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["m1", "m2", "m3", "m4"]);
        assert_eq!(rows[0].bot_name, "Support");
        assert_eq!(rows[3].bot_name, "Sales");
        assert_eq!(rows[0].created_at, "2023-11-14 22:13:20");
    }

    #[test]
    fn thread_rows_aggregate_per_thread() {
        let rows = thread_rows(&sample(), &directory_for(&["bot-a", "bot-b"]));
        assert_eq!(rows.len(), 2);

        let t1 = &rows[0];
        assert_eq!(t1.thread_id, "t1");
        assert_eq!(t1.duration, "00:01:00");
        assert_eq!(t1.total_messages, 3);
        assert!(t1.has_callback);
        assert_eq!(t1.callback.as_deref(), Some("call after 5"));
        assert_eq!(t1.sentiment_score, Some(75));
        assert_eq!(t1.sentiment_justification.as_deref(), Some("polite"));
        assert!(t1.transcript.starts_with("User: question m1"));

        let t2 = &rows[1];
        assert_eq!(t2.duration, "00:00:00");
        assert!(!t2.has_callback);
        assert_eq!(t2.sentiment_ratio, None);
    }

    #[test]
    fn score_and_justification_come_from_the_anchor() {
        let mut stale = message("late", "t1", "bot-a", 90);
        stale.sentiment_score = Some(10);
        stale.sentiment_justification = Some("stale".into());
        let unscored = group_by_thread(vec![message("first", "t1", "bot-a", 0), stale.clone()]);

        let rows = thread_rows(&unscored, &directory_for(&["bot-a"]));
        assert_eq!(rows[0].sentiment_score, None);
        assert_eq!(rows[0].sentiment_justification, None);

        let mut anchor = message("first", "t1", "bot-a", 0);
        anchor.sentiment_score = Some(80);
        anchor.sentiment_justification = Some("warm".into());
        let rows = thread_rows(&group_by_thread(vec![stale, anchor]), &directory_for(&["bot-a"]));
        assert_eq!(rows[0].sentiment_score, Some(80));
        assert_eq!(rows[0].sentiment_justification.as_deref(), Some("warm"));
    }

    #[test]
    fn callback_rows_are_newest_first_and_filterable() {
        let threads = sample();
        let directory = directory_for(&["bot-a", "bot-b"]);

        let rows = callback_rows(&threads, &directory, None);
        let ids: Vec<_> = rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["m3", "m2", "m1"]);

        assert!(callback_rows(&threads, &directory, Some("t2")).is_empty());
        assert_eq!(callback_rows(&threads, &directory, Some("t1")).len(), 3);
    }

    #[test]
    fn single_bot_users_see_their_bot_name() {
        let rows = callback_rows(&sample(), &directory_for(&["bot-a"]), None);
        assert!(rows.iter().all(|r| r.bot_name == "Support"));
    }

    #[test]
    fn formatters_do_not_mutate_input() {
        let threads = sample();
        let before = threads.clone();
        let directory = directory_for(&["bot-a"]);
        let _ = message_rows(&threads, &directory);
        let _ = thread_rows(&threads, &directory);
        let _ = callback_rows(&threads, &directory, None);
        assert_eq!(threads, before);
    }
}
