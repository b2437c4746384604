use std::{collections::BTreeMap, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    error::{DashboardError, Result},
    message::Message,
    store::Store,
};

/// A configured chatbot as listed in `client_table`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bot {
    pub bot_id: String,
    pub bot_name: Option<String>,
    #[serde(skip_serializing, alias = "sentiment_analysis_prompt")]
    pub sentiment_prompt: Option<String>,
}

impl Bot {
    #[cfg(test)]
    pub fn new(
        bot_id: impl Into<String>,
        bot_name: Option<&str>,
        sentiment_prompt: Option<&str>,
    ) -> Self {
        Self {
            bot_id: bot_id.into(),
            bot_name: bot_name.map(str::to_string),
            sentiment_prompt: sentiment_prompt.map(str::to_string),
        }
    }

    /// Trimmed name, or the id when the name is blank.
    pub fn display_name(&self) -> String {
        match self.bot_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => self.bot_id.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DirectoryEntry {
    pub bot_id: String,
    pub bot_name: String,
}

/// Where assignments and directory rows are read from.
#[async_trait]
pub trait DirectorySource: Send + Sync {
    async fn assigned_bot_ids(&self, user_id: &str) -> Result<Vec<String>>;
    async fn bot_names(&self, bot_ids: &[String]) -> Result<Vec<Bot>>;
}

#[async_trait]
impl DirectorySource for Store {
    async fn assigned_bot_ids(&self, user_id: &str) -> Result<Vec<String>> {
        Store::assigned_bot_ids(self, user_id).await
    }

    async fn bot_names(&self, bot_ids: &[String]) -> Result<Vec<Bot>> {
        Store::bot_names(self, bot_ids).await
    }
}

/// The bots one user may see, with their display names.
///
/// This is the visibility ACL: anything whose `bot_id` is not in here must
/// not reach that user.
#[derive(Debug, Clone, Default)]
pub struct BotDirectory {
    names: BTreeMap<String, String>,
}

impl BotDirectory {
    /// Build a directory from the user's assignments and the directory rows
    /// fetched for them. Rows for unassigned bots are ignored.
    pub fn new(assigned: impl IntoIterator<Item = String>, bots: &[Bot]) -> Self {
        let mut names: BTreeMap<String, String> = assigned
            .into_iter()
            .filter(|id| !id.trim().is_empty())
            .map(|id| (id.clone(), id))
            .collect();

        for bot in bots {
            if let Some(name) = names.get_mut(&bot.bot_id) {
                *name = bot.display_name();
            }
        }

        Self { names }
    }

    /// Assignments first, then names for exactly those ids, all under one
    /// deadline.
    pub async fn load<S: DirectorySource>(
        source: &S,
        user_id: &str,
        deadline: Duration,
    ) -> Result<Self> {
        let fetch = async {
            let assigned = source.assigned_bot_ids(user_id).await?;
            let bots = source.bot_names(&assigned).await?;
            Ok::<_, DashboardError>(Self::new(assigned, &bots))
        };

        match tokio::time::timeout(deadline, fetch).await {
            Ok(directory) => {
                let directory = directory?;
                if directory.is_empty() {
                    warn!("User {} has no bot assignments", user_id);
                }
                debug!("Loaded {} bots for user {}", directory.len(), user_id);
                Ok(directory)
            }
            Err(_) => {
                warn!("Bot directory fetch for {} exceeded {:?}", user_id, deadline);
                Err(DashboardError::timeout("bot directory fetch"))
            }
        }
    }

    pub fn permits(&self, bot_id: Option<&str>) -> bool {
        bot_id.is_some_and(|id| self.names.contains_key(id))
    }

    pub fn display_name(&self, bot_id: &str) -> String {
        self.names
            .get(bot_id)
            .cloned()
            .unwrap_or_else(|| bot_id.to_string())
    }

    pub fn bot_ids(&self) -> Vec<String> {
        self.names.keys().cloned().collect()
    }

    /// Drop every message outside the ACL.
    pub fn filter_permitted(&self, messages: Vec<Message>) -> Vec<Message> {
        messages
            .into_iter()
            .filter(|m| self.permits(m.bot_id.as_deref()))
            .collect()
    }

    /// The only bot, when the user has exactly one assignment.
    pub fn single_bot(&self) -> Option<DirectoryEntry> {
        if self.names.len() != 1 {
            return None;
        }
        self.entries().into_iter().next()
    }

    pub fn entries(&self) -> Vec<DirectoryEntry> {
        self.names
            .iter()
            .map(|(bot_id, bot_name)| DirectoryEntry {
                bot_id: bot_id.clone(),
                bot_name: bot_name.clone(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::fixtures::message;

    #[test]
    fn blank_names_fall_back_to_id() {
        let bots = [
            Bot::new("bot-a", Some("  Support  "), None),
            Bot::new("bot-b", Some("   "), None),
            Bot::new("bot-c", None, None),
        ];
        let directory = BotDirectory::new(
            ["bot-a", "bot-b", "bot-c"].map(String::from),
            &bots,
        );
        assert_eq!(directory.display_name("bot-a"), "Support");
        assert_eq!(directory.display_name("bot-b"), "bot-b");
        assert_eq!(directory.display_name("bot-c"), "bot-c");
    }

    #[test]
    fn unassigned_directory_rows_are_not_permitted() {
        let bots = [Bot::new("bot-a", Some("A"), None), Bot::new("bot-x", Some("X"), None)];
        let directory = BotDirectory::new(["bot-a".to_string()], &bots);

        assert!(directory.permits(Some("bot-a")));
        assert!(!directory.permits(Some("bot-x")));
        assert!(!directory.permits(None));

        let visible = directory.filter_permitted(vec![
            message("m1", "t1", "bot-a", 0),
            message("m2", "t2", "bot-x", 0),
        ]);
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].id, "m1");
    }

    #[test]
    fn single_bot_only_for_exactly_one_assignment() {
        let one = BotDirectory::new(["bot-a".to_string()], &[Bot::new("bot-a", Some("A"), None)]);
        assert_eq!(one.single_bot().unwrap().bot_name, "A");

        let two = BotDirectory::new(["bot-a".to_string(), "bot-b".to_string()], &[]);
        assert!(two.single_bot().is_none());
    }

    #[tokio::test]
    async fn load_resolves_assignments_then_names() {
        let store = Store::in_memory().await.unwrap();
        store.upsert_bot(&Bot::new("bot-a", Some("Sales"), None)).await.unwrap();
        store.upsert_bot(&Bot::new("bot-b", Some("Other"), None)).await.unwrap();
        store.assign_bot("user-1", "bot-a").await.unwrap();

        let directory = BotDirectory::load(&store, "user-1", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(directory.bot_ids(), ["bot-a"]);
        assert_eq!(directory.display_name("bot-a"), "Sales");
    }

    /// Directory backend that answers only after a delay.
    struct SlowSource(Duration);

    #[async_trait]
    impl DirectorySource for SlowSource {
        async fn assigned_bot_ids(&self, _user_id: &str) -> Result<Vec<String>> {
            tokio::time::sleep(self.0).await;
            Ok(vec!["bot-a".to_string()])
        }

        async fn bot_names(&self, _bot_ids: &[String]) -> Result<Vec<Bot>> {
            tokio::time::sleep(self.0).await;
            Ok(vec![Bot::new("bot-a", Some("Sales"), None)])
        }
    }

    #[tokio::test]
    async fn load_gives_up_after_deadline() {
        let source = SlowSource(Duration::from_millis(100));

        // Each step fits the deadline on its own, both together do not.
        let err = BotDirectory::load(&source, "user-1", Duration::from_millis(150))
            .await
            .unwrap_err();
        assert!(matches!(err, DashboardError::RequestTimeout(_)));
        assert_eq!(err.to_string(), "Request timeout: bot directory fetch");

        let directory = BotDirectory::load(&source, "user-1", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(directory.display_name("bot-a"), "Sales");
    }

    #[tokio::test]
    async fn load_for_user_without_assignments_is_empty() {
        let store = Store::in_memory().await.unwrap();
        let directory = BotDirectory::load(&store, "nobody", Duration::from_secs(5))
            .await
            .unwrap();
        assert!(directory.is_empty());
    }
}
