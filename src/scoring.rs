//! Sentiment scoring: the LLM client and the rules for turning its free-form
//! reply into a validated score.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info};

use crate::{
    config::LlmConfig,
    error::{DashboardError, Result},
};

/// Inclusive bounds of a valid sentiment score.
pub const MIN_SCORE: i64 = 1;
pub const MAX_SCORE: i64 = 100;

/// Appended to every bot prompt so the model answers on the scale we validate.
pub const SCORE_CONTRACT: &str = "Respond only with a JSON object of the form \
{\"score\": <integer from 1 to 100, where 1 is very negative and 100 is very positive>, \
\"justification\": \"<one or two sentences>\"}.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreOutcome {
    pub score: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub justification: Option<String>,
}

#[async_trait]
pub trait Scorer: Send + Sync {
    async fn score(&self, message_history: &str, prompt: &str) -> Result<ScoreOutcome>;
}

fn json_span() -> &'static Regex {
    static SPAN: OnceLock<Regex> = OnceLock::new();
    // Greedy: first '{' through last '}'.
    SPAN.get_or_init(|| Regex::new(r"\{[\s\S]*\}").expect("valid regex"))
}

/// Parse an LLM reply into a score: whole reply as JSON first, then the
/// outermost `{...}` span embedded in prose.
pub fn parse_score_response(text: &str) -> Result<ScoreOutcome> {
    let value: Value = match serde_json::from_str(text.trim()) {
        Ok(value) => value,
        Err(_) => {
            let span = json_span().find(text).ok_or_else(|| {
                DashboardError::score_parse("Could not parse JSON from LLM response")
            })?;
            serde_json::from_str(span.as_str())
                .map_err(|e| DashboardError::score_parse(e.to_string()))?
        }
    };

    let score = match value.get("score") {
        None | Some(Value::Null) => return Err(DashboardError::MissingScoreField),
        Some(raw) => coerce_score(raw)?,
    };

    let justification = value
        .get("justification")
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(ScoreOutcome {
        score: validate_score(score)?,
        justification,
    })
}

/// Numbers must be integral; strings are read as base-10 integers.
pub fn coerce_score(raw: &Value) -> Result<i64> {
    match raw {
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => Ok(i),
            (None, Some(f)) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Ok(f as i64),
            _ => Err(DashboardError::out_of_range(n)),
        },
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| DashboardError::out_of_range(format!("{:?}", s))),
        other => Err(DashboardError::out_of_range(other)),
    }
}

pub fn validate_score(score: i64) -> Result<i64> {
    if (MIN_SCORE..=MAX_SCORE).contains(&score) {
        Ok(score)
    } else {
        Err(DashboardError::out_of_range(score))
    }
}

/// Position of a score on the canonical scale, 0.0 (worst) to 1.0 (best).
pub fn normalize_for_display(score: i64) -> f64 {
    let clamped = score.clamp(MIN_SCORE, MAX_SCORE);
    (clamped - MIN_SCORE) as f64 / (MAX_SCORE - MIN_SCORE) as f64
}

// -----------------------------------------------------------------------------
// OpenAI-compatible chat completions (Groq)
// -----------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct CompletionMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<CompletionMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

pub struct LlmScorer {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl LlmScorer {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| DashboardError::external(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }

    /// Raw completion text for the given history under the bot's prompt.
    pub async fn complete(&self, message_history: &str, prompt: &str) -> Result<String> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| DashboardError::external("GROQ_API_KEY not set"))?;

        let system = format!("{}\n\n{}", prompt.trim_end(), SCORE_CONTRACT);
        let request = CompletionRequest {
            model: &self.model,
            messages: vec![
                CompletionMessage {
                    role: "system",
                    content: &system,
                },
                CompletionMessage {
                    role: "user",
                    content: message_history,
                },
            ],
            temperature: 0.0,
        };

        debug!(
            "Requesting sentiment score from {} ({} chars of history)",
            self.model,
            message_history.len()
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| DashboardError::external(format!("HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("LLM API error {}: {}", status, body);
            return Err(DashboardError::external(format!("API error {}: {}", status, body)));
        }

        let completion: CompletionResponse = response
            .json()
            .await
            .map_err(|e| DashboardError::external(format!("Failed to parse response: {}", e)))?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| DashboardError::external("No response from LLM API"))
    }
}

#[async_trait]
impl Scorer for LlmScorer {
    async fn score(&self, message_history: &str, prompt: &str) -> Result<ScoreOutcome> {
        let text = self.complete(message_history, prompt).await?;
        let outcome = parse_score_response(&text).map_err(|e| {
            error!("Error parsing LLM response: {} Raw response: {}", e, text);
            e
        })?;
        info!("LLM scored conversation at {}", outcome.score);
        Ok(outcome)
    }
}
