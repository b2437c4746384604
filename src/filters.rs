use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use crate::{message::Message, thread::ThreadMap};

/// Time window for the dashboard views. Rows are windowed one by one, threads
/// by their first message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum TimeFilter {
    Today,
    ThisWeek,
    Last30Days,
    #[default]
    All,
}

impl From<String> for TimeFilter {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl TimeFilter {
    /// Unknown names mean no filtering.
    pub fn parse(value: &str) -> Self {
        match value {
            "today" => Self::Today,
            "thisWeek" => Self::ThisWeek,
            "last30Days" => Self::Last30Days,
            _ => Self::All,
        }
    }

    pub fn matches(&self, created_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self {
            Self::Today => created_at.date_naive() == now.date_naive(),
            Self::ThisWeek => created_at >= now - Duration::days(7),
            Self::Last30Days => created_at >= now - Duration::days(30),
            Self::All => true,
        }
    }

    /// Keep individual rows inside the window; threads left empty are dropped.
    pub fn apply(&self, threads: ThreadMap, now: DateTime<Utc>) -> ThreadMap {
        if *self == Self::All {
            return threads;
        }
        threads
            .into_iter()
            .filter_map(|(id, messages)| {
                let kept: Vec<Message> = messages
                    .into_iter()
                    .filter(|m| self.matches(m.created_at, now))
                    .collect();
                (!kept.is_empty()).then_some((id, kept))
            })
            .collect()
    }

    /// Keep or drop whole threads by when they started. Kept threads retain
    /// every row, so their duration and counts are unaffected by the window.
    pub fn retain_threads(&self, threads: ThreadMap, now: DateTime<Utc>) -> ThreadMap {
        if *self == Self::All {
            return threads;
        }
        threads
            .into_iter()
            .filter(|(_, messages)| {
                messages
                    .iter()
                    .map(|m| m.created_at)
                    .min()
                    .is_some_and(|started| self.matches(started, now))
            })
            .collect()
    }
}
