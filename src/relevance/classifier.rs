use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{Config, CLASSIFIER_TIMEOUT_SECS, OPENAI_API_URL};
use crate::error::{AppError, Result};
use crate::types::{RelevanceDecision, TopicTier};

/// Decides whether a topic is worth covering and how valuable it is.
#[async_trait]
pub trait RelevanceClassifier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn classify(&self, topic: &str) -> Result<RelevanceDecision>;
}

/// OpenAI when a key is configured, keyword lists otherwise.
pub fn from_config(cfg: &Config) -> Result<Arc<dyn RelevanceClassifier>> {
    match cfg.openai_api_key.as_deref() {
        Some(key) => {
            info!("Relevance classifier: openai ({})", cfg.openai_model);
            Ok(Arc::new(OpenAiClassifier::new(key, &cfg.openai_model)?))
        }
        None => {
            info!("Relevance classifier: keywords (OPENAI_API_KEY not set)");
            Ok(Arc::new(KeywordClassifier::default()))
        }
    }
}

// ---------------------------------------------------------------------------
// Keyword lists
// ---------------------------------------------------------------------------

const HIGH_VALUE_KEYWORDS: &[&str] = &[
    // sports
    "nfl", "nba", "mlb", "nhl", "lebron", "mahomes", "curry", "world cup", "super bowl",
    "playoffs", "championship", "finals",
    // entertainment
    "taylor swift", "drake", "beyonce", "marvel", "star wars", "disney", "netflix", "hbo",
    "game of thrones",
    // gaming
    "gta 6", "grand theft auto", "call of duty", "fortnite", "minecraft", "playstation",
    "xbox", "nintendo",
    // awards
    "oscars", "grammys", "emmys", "academy award", "golden globe",
    // elections
    "election", "president", "senate", "congress",
];

const LOW_VALUE_KEYWORDS: &[&str] = &[
    "weather", "temperature", "snowfall", "cryptocurrency", "bitcoin", "local", "county",
    "municipal",
];

/// Offline classifier: high-value keywords are tier S, low-value keywords are
/// irrelevant, anything else is relevant at tier A.
#[derive(Debug, Default)]
pub struct KeywordClassifier;

impl KeywordClassifier {
    /// Decide from the keyword lists alone. `None` means no list matched.
    pub fn screen(topic: &str) -> Option<RelevanceDecision> {
        let lower = topic.to_lowercase();
        if let Some(kw) = HIGH_VALUE_KEYWORDS.iter().find(|kw| lower.contains(*kw)) {
            return Some(RelevanceDecision {
                is_relevant: true,
                topic_tier: TopicTier::S,
                reasoning: format!("High-value topic: {kw}"),
            });
        }
        if let Some(kw) = LOW_VALUE_KEYWORDS.iter().find(|kw| lower.contains(*kw)) {
            return Some(RelevanceDecision {
                is_relevant: false,
                topic_tier: TopicTier::C,
                reasoning: format!("Low-value topic: {kw}"),
            });
        }
        None
    }
}

#[async_trait]
impl RelevanceClassifier for KeywordClassifier {
    fn name(&self) -> &'static str {
        "keywords"
    }

    async fn classify(&self, topic: &str) -> Result<RelevanceDecision> {
        Ok(Self::screen(topic).unwrap_or_else(|| RelevanceDecision {
            is_relevant: true,
            topic_tier: TopicTier::A,
            reasoning: "No keyword match, default moderate relevance".to_string(),
        }))
    }
}

// ---------------------------------------------------------------------------
// OpenAI
// ---------------------------------------------------------------------------

const SYSTEM_PROMPT: &str =
    "You are a content strategist analyzing prediction market topics for sports and entertainment news sites.";

const MAX_TOKENS: usize = 150;
const TEMPERATURE: f64 = 0.3;

/// Chat Completions classifier. Keyword lists are consulted first so obvious
/// topics never cost a request.
#[derive(Debug)]
pub struct OpenAiClassifier {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl OpenAiClassifier {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(CLASSIFIER_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            endpoint: OPENAI_API_URL.to_string(),
            api_key: api_key.into(),
            model: model.into(),
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn prompt(topic: &str) -> String {
        format!(
            "Analyze this prediction market for content relevance:\n\n\
             Market: \"{topic}\"\n\n\
             The audience follows major sports, entertainment (movies, music, TV, celebrities), \
             major video game releases and pop culture events such as awards shows.\n\n\
             Determine:\n\
             1. Is this topic relevant for that audience? (YES or NO)\n\
             2. What tier is it?\n   \
                S = A-list topic with high search demand\n   \
                A = Popular but not top-tier\n   \
                C = Niche or unknown, low search potential\n\
             3. Brief reason (one sentence)\n\n\
             Format your response EXACTLY as:\n\
             RELEVANT: YES/NO\n\
             TIER: S/A/C\n\
             REASON: [one sentence]"
        )
    }
}

#[derive(Serialize)]
struct Request {
    model: String,
    max_tokens: usize,
    temperature: f64,
    messages: Vec<Message>,
}

#[derive(Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct Response {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[async_trait]
impl RelevanceClassifier for OpenAiClassifier {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn classify(&self, topic: &str) -> Result<RelevanceDecision> {
        if let Some(decision) = KeywordClassifier::screen(topic) {
            return Ok(decision);
        }

        let request = Request {
            model: self.model.clone(),
            max_tokens: MAX_TOKENS,
            temperature: TEMPERATURE,
            messages: vec![
                Message { role: "system", content: SYSTEM_PROMPT.to_string() },
                Message { role: "user", content: Self::prompt(topic) },
            ],
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| AppError::Classification(format!("openai request failed: {e}")))?
            .json::<Response>()
            .await
            .map_err(|e| AppError::Classification(format!("openai response unreadable: {e}")))?;

        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        debug!(topic, "[RELEVANCE] openai replied: {text:?}");
        parse_completion(&text)
    }
}

/// Parse the `RELEVANT / TIER / REASON` reply. A missing tier defaults to A and
/// a missing reason to generic text; an empty reply is an error.
pub fn parse_completion(text: &str) -> Result<RelevanceDecision> {
    let text = text.trim();
    if text.is_empty() {
        return Err(AppError::Classification("empty completion".to_string()));
    }

    let field = |name: &str| {
        text.lines().find_map(|line| {
            let line = line.trim();
            let (key, value) = line.split_once(':')?;
            key.trim().eq_ignore_ascii_case(name).then(|| value.trim().to_string())
        })
    };

    let is_relevant = match field("RELEVANT") {
        Some(v) => v.to_ascii_uppercase().starts_with("YES"),
        None => text.lines().next().unwrap_or_default().to_ascii_uppercase().contains("YES"),
    };

    let topic_tier = field("TIER")
        .and_then(|v| v.chars().next().and_then(|c| TopicTier::parse(&c.to_string())))
        .unwrap_or(TopicTier::A);

    let reasoning = field("REASON")
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| "AI analysis completed".to_string());

    Ok(RelevanceDecision { is_relevant, topic_tier, reasoning })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn keywords_grade_topics() {
        let c = KeywordClassifier;
        let s = c.classify("Will the Chiefs win the Super Bowl?").await.unwrap();
        assert!(s.is_relevant);
        assert_eq!(s.topic_tier, TopicTier::S);

        let low = c.classify("NYC snowfall over 30 inches this winter?").await.unwrap();
        assert!(!low.is_relevant);
        assert_eq!(low.topic_tier, TopicTier::C);

        let default = c.classify("Will the Fed cut rates in December?").await.unwrap();
        assert!(default.is_relevant);
        assert_eq!(default.topic_tier, TopicTier::A);
    }

    #[test]
    fn high_value_wins_over_low_value() {
        let d = KeywordClassifier::screen("Will bitcoin be mentioned in the presidential debate?").unwrap();
        assert_eq!(d.topic_tier, TopicTier::S);
    }

    #[test]
    fn parses_well_formed_completion() {
        let d = parse_completion("RELEVANT: YES\nTIER: s\nREASON: Huge search demand.").unwrap();
        assert!(d.is_relevant);
        assert_eq!(d.topic_tier, TopicTier::S);
        assert_eq!(d.reasoning, "Huge search demand.");
    }

    #[test]
    fn missing_fields_take_defaults() {
        let d = parse_completion("RELEVANT: NO").unwrap();
        assert!(!d.is_relevant);
        assert_eq!(d.topic_tier, TopicTier::A);
        assert_eq!(d.reasoning, "AI analysis completed");

        let loose = parse_completion("Yes, definitely\nTier: C").unwrap();
        assert!(loose.is_relevant);
        assert_eq!(loose.topic_tier, TopicTier::C);
    }

    #[test]
    fn empty_completion_is_classification_error() {
        assert!(matches!(parse_completion("  \n"), Err(AppError::Classification(_))));
    }

    #[test]
    fn request_serializes_chat_messages() {
        let request = Request {
            model: "gpt-4o-mini".to_string(),
            max_tokens: MAX_TOKENS,
            temperature: TEMPERATURE,
            messages: vec![Message { role: "user", content: "hi".to_string() }],
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "gpt-4o-mini");
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["max_tokens"], 150);
    }

    #[tokio::test]
    async fn openai_prescreen_skips_the_network() {
        let c = OpenAiClassifier::new("sk-test", "gpt-4o-mini")
            .unwrap()
            .with_endpoint("http://127.0.0.1:9/unreachable");
        let d = c.classify("Will LeBron retire this season?").await.unwrap();
        assert_eq!(d.topic_tier, TopicTier::S);
    }

    #[tokio::test]
    async fn openai_transport_failure_is_classification_error() {
        let c = OpenAiClassifier::new("sk-test", "gpt-4o-mini")
            .unwrap()
            .with_endpoint("http://127.0.0.1:9/unreachable");
        let err = c.classify("Will the Fed cut rates in December?").await.unwrap_err();
        assert!(matches!(err, AppError::Classification(_)), "got {err:?}");
    }
}
