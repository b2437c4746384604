//! Score-then-persist workflow for a single thread.
//!
//! Every failure is folded into a [`SentimentAnalysisResult`]; callers render
//! the error text instead of handling an `Err`. A result with a score but
//! `success: false` means the thread was scored but the score was not saved.

use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    error::{DashboardError, Result},
    scoring::{ScoreOutcome, Scorer},
    store::{SentimentUpdate, Store},
};

#[derive(Debug, Clone)]
pub struct SentimentAnalysisRequest {
    pub thread_id: String,
    pub message_history: String,
    pub prompt: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisState {
    Idle,
    Validating,
    Scoring,
    Persisting,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SentimentAnalysisResult {
    pub score: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub justification: Option<String>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    pub state: AnalysisState,
}

/// Where a validated score is written.
#[async_trait]
pub trait SentimentSink: Send + Sync {
    async fn persist(
        &self,
        thread_id: &str,
        outcome: &ScoreOutcome,
        message_history: &str,
    ) -> Result<SentimentUpdate>;
}

#[async_trait]
impl SentimentSink for Store {
    async fn persist(
        &self,
        thread_id: &str,
        outcome: &ScoreOutcome,
        message_history: &str,
    ) -> Result<SentimentUpdate> {
        self.update_thread_sentiment(
            thread_id,
            outcome.score,
            outcome.justification.as_deref(),
            Some(message_history),
        )
        .await
    }
}

/// Tracks and logs the state of one analysis run.
struct Run<'a> {
    thread_id: &'a str,
    state: AnalysisState,
}

impl<'a> Run<'a> {
    fn new(thread_id: &'a str) -> Self {
        Self {
            thread_id,
            state: AnalysisState::Idle,
        }
    }

    fn advance(&mut self, next: AnalysisState) {
        debug!("Sentiment[{}]: {:?} -> {:?}", self.thread_id, self.state, next);
        self.state = next;
    }

    fn fail(
        mut self,
        err: DashboardError,
        scored: Option<ScoreOutcome>,
    ) -> SentimentAnalysisResult {
        match &scored {
            Some(outcome) => error!(
                "Sentiment[{}]: scored {} but failed in {:?}: {}",
                self.thread_id, outcome.score, self.state, err
            ),
            None => warn!("Sentiment[{}]: failed in {:?}: {}", self.thread_id, self.state, err),
        }
        self.advance(AnalysisState::Failed);

        let (score, justification) = match scored {
            Some(outcome) => (Some(outcome.score), outcome.justification),
            None => (None, None),
        };
        SentimentAnalysisResult {
            score,
            justification,
            success: false,
            error: Some(err.to_string()),
            state: self.state,
        }
    }

    fn done(mut self, outcome: ScoreOutcome) -> SentimentAnalysisResult {
        self.advance(AnalysisState::Done);
        SentimentAnalysisResult {
            score: Some(outcome.score),
            justification: outcome.justification,
            success: true,
            error: None,
            state: self.state,
        }
    }
}

/// Marks a thread as being analysed until dropped.
struct InFlight<'a> {
    pending: &'a Mutex<HashMap<String, Uuid>>,
    thread_id: String,
    token: Uuid,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if pending.get(&self.thread_id) == Some(&self.token) {
            pending.remove(&self.thread_id);
        }
    }
}

pub struct SentimentOrchestrator {
    scorer: Arc<dyn Scorer>,
    sink: Arc<dyn SentimentSink>,
    scoring_timeout: Duration,
    persist_timeout: Duration,
    pending: Mutex<HashMap<String, Uuid>>,
}

impl SentimentOrchestrator {
    pub fn new(
        scorer: Arc<dyn Scorer>,
        sink: Arc<dyn SentimentSink>,
        scoring_timeout: Duration,
        persist_timeout: Duration,
    ) -> Self {
        Self {
            scorer,
            sink,
            scoring_timeout,
            persist_timeout,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub async fn analyze(&self, request: &SentimentAnalysisRequest) -> SentimentAnalysisResult {
        let mut run = Run::new(&request.thread_id);

        run.advance(AnalysisState::Validating);
        if let Err(err) = validate(request) {
            return run.fail(err, None);
        }

        let _in_flight = match self.claim(&request.thread_id) {
            Ok(guard) => guard,
            Err(err) => return run.fail(err, None),
        };

        run.advance(AnalysisState::Scoring);
        let scoring = self.scorer.score(&request.message_history, &request.prompt);
        let outcome =
            match with_deadline(self.scoring_timeout, "sentiment scoring", scoring).await {
                Ok(outcome) => outcome,
                Err(err) => return run.fail(err, None),
            };

        run.advance(AnalysisState::Persisting);
        let persisting = self
            .sink
            .persist(&request.thread_id, &outcome, &request.message_history);
        match with_deadline(self.persist_timeout, "sentiment persistence", persisting).await {
            Ok(update) => {
                info!(
                    "Saved sentiment {} for thread {} on message {}",
                    update.score, update.thread_id, update.message_id
                );
                run.done(outcome)
            }
            Err(err) => run.fail(err, Some(outcome)),
        }
    }

    fn claim(&self, thread_id: &str) -> Result<InFlight<'_>> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if pending.contains_key(thread_id) {
            return Err(DashboardError::AnalysisInFlight(thread_id.to_string()));
        }

        let token = Uuid::new_v4();
        pending.insert(thread_id.to_string(), token);
        Ok(InFlight {
            pending: &self.pending,
            thread_id: thread_id.to_string(),
            token,
        })
    }
}

fn validate(request: &SentimentAnalysisRequest) -> Result<()> {
    if request.thread_id.trim().is_empty() {
        return Err(DashboardError::validation("Thread ID is required"));
    }
    if request.message_history.trim().is_empty() {
        return Err(DashboardError::validation("Message history is required"));
    }
    if request.prompt.trim().is_empty() {
        return Err(DashboardError::validation("Sentiment prompt is required"));
    }
    Ok(())
}

pub(crate) async fn with_deadline<T>(
    limit: Duration,
    what: &str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| DashboardError::timeout(format!("{} exceeded {:?}", what, limit)))?
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scorer returning a fixed score (or failing) after an optional delay.
    pub struct FakeScorer {
        pub outcome: Option<ScoreOutcome>,
        pub delay: Duration,
        pub calls: AtomicUsize,
    }

    impl FakeScorer {
        pub fn scoring(score: i64) -> Self {
            Self {
                outcome: Some(ScoreOutcome {
                    score,
                    justification: Some("steady tone".into()),
                }),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn failing() -> Self {
            Self {
                outcome: None,
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn slow(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Scorer for FakeScorer {
        async fn score(&self, _history: &str, _prompt: &str) -> Result<ScoreOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.outcome
                .clone()
                .ok_or_else(|| DashboardError::external("Failed to analyze sentiment"))
        }
    }

    /// Sink that records writes, or fails like a 500 from the store.
    pub struct FakeSink {
        pub fail_with: Option<String>,
        pub delay: Duration,
        pub writes: Mutex<Vec<(String, i64)>>,
    }

    impl FakeSink {
        pub fn ok() -> Self {
            Self {
                fail_with: None,
                delay: Duration::ZERO,
                writes: Mutex::new(Vec::new()),
            }
        }

        pub fn failing(msg: &str) -> Self {
            Self {
                fail_with: Some(msg.to_string()),
                ..Self::ok()
            }
        }

        pub fn slow(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        pub fn writes(&self) -> Vec<(String, i64)> {
            self.writes.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SentimentSink for FakeSink {
        async fn persist(
            &self,
            thread_id: &str,
            outcome: &ScoreOutcome,
            _history: &str,
        ) -> Result<SentimentUpdate> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if let Some(msg) = &self.fail_with {
                return Err(DashboardError::external(msg.clone()));
            }
            self.writes
                .lock()
                .unwrap()
                .push((thread_id.to_string(), outcome.score));
            Ok(SentimentUpdate {
                message_id: format!("{thread_id}-anchor"),
                thread_id: thread_id.to_string(),
                score: outcome.score,
            })
        }
    }
}
