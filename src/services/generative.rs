use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{AppError, AppResult};
use crate::models::{ContextKind, RecommendationContext, UserProfileSnapshot};
use crate::services::quota::GenerationQuota;

/// The single function the model is allowed to answer with
const FUNCTION_NAME: &str = "submit_recommendations";

const SYSTEM_PROMPT: &str = "You are the recommendation engine of an anime catalog. \
You know catalog ids for well-known titles. You must answer every request by calling \
the submit_recommendations function with an array of catalog id strings, ordered from \
best to worst fit. Never answer in free text. Never suggest a title the user has \
already seen or favorited.";

/// Transport to the generative model
///
/// Returns the structured function-call arguments when the model produced
/// one; free-text completions are not a valid output channel and come back
/// as `None`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatModelClient: Send + Sync {
    async fn request_ids(&self, system_prompt: &str, user_prompt: &str)
        -> AppResult<Option<String>>;
}

/// Client for an OpenAI-compatible chat-completions endpoint
#[derive(Clone)]
pub struct OpenAiChatClient {
    http_client: HttpClient,
    api_url: String,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
}

#[derive(Deserialize)]
struct ToolCall {
    function: FunctionCall,
}

#[derive(Deserialize)]
struct FunctionCall {
    name: String,
    arguments: String,
}

impl OpenAiChatClient {
    pub fn new(
        api_url: String,
        api_key: String,
        model: String,
        timeout: Duration,
    ) -> AppResult<Self> {
        let http_client = HttpClient::builder().timeout(timeout).build()?;

        Ok(Self {
            http_client,
            api_url,
            api_key,
            model,
        })
    }
}

#[async_trait]
impl ChatModelClient for OpenAiChatClient {
    async fn request_ids(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> AppResult<Option<String>> {
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system_prompt },
                { "role": "user", "content": user_prompt },
            ],
            "tools": [{
                "type": "function",
                "function": {
                    "name": FUNCTION_NAME,
                    "description": "Submit the recommended catalog ids",
                    "parameters": {
                        "type": "object",
                        "properties": {
                            "ids": {
                                "type": "array",
                                "items": { "type": "string" },
                                "description": "Catalog ids of the recommended titles"
                            }
                        },
                        "required": ["ids"]
                    }
                }
            }],
            "tool_choice": {
                "type": "function",
                "function": { "name": FUNCTION_NAME }
            }
        });

        let response = self
            .http_client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ModelApi(format!(
                "model API returned status {status}: {body}"
            )));
        }

        let parsed: ChatResponse = response.json().await?;

        let arguments = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.tool_calls.into_iter().next())
            .filter(|call| call.function.name == FUNCTION_NAME)
            .map(|call| call.function.arguments);

        Ok(arguments)
    }
}

/// Parses function-call arguments of the shape `{"ids": ["123", ...]}`
///
/// Anything that is not a well-formed id array is an empty result, not an
/// error; the pipeline tolerates a useless model answer. String and numeric
/// elements are both accepted, everything else is dropped.
pub fn parse_id_arguments(arguments: &str) -> Vec<i64> {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(arguments) else {
        tracing::debug!("Model arguments were not valid JSON");
        return Vec::new();
    };

    let Some(entries) = value.get("ids").and_then(|ids| ids.as_array()) else {
        tracing::debug!("Model arguments missing ids array");
        return Vec::new();
    };

    let mut seen = std::collections::HashSet::new();
    entries
        .iter()
        .filter_map(|entry| match entry {
            serde_json::Value::String(s) => s.trim().parse::<i64>().ok(),
            serde_json::Value::Number(n) => n.as_i64(),
            _ => None,
        })
        .filter(|&id| id > 0)
        .filter(|&id| seen.insert(id))
        .collect()
}

/// Builds the natural-language instruction for one request
fn build_user_prompt(
    ctx: &RecommendationContext,
    profile: &UserProfileSnapshot,
    grounding_titles: &[String],
) -> String {
    let mut lines = Vec::new();

    match ctx.kind {
        ContextKind::ItemSimilarity => {
            if let Some(item) = &ctx.current_item {
                if item.title.is_empty() {
                    lines.push(format!(
                        "Recommend anime similar to the catalog item with id {}.",
                        item.id
                    ));
                } else {
                    lines.push(format!(
                        "Recommend anime similar to \"{}\" (catalog id {}).",
                        item.title, item.id
                    ));
                }
            }
        }
        ContextKind::Mood => {
            if let Some(text) = &ctx.free_text {
                lines.push(format!("Recommend anime matching this mood: {text}."));
            }
        }
        ContextKind::ProfileGeneral => {
            lines.push("Recommend anime this user is likely to enjoy next.".to_string());
        }
    }

    if !profile.favorite_genres.is_empty() {
        lines.push(format!(
            "The user's favorite genres: {}.",
            profile.favorite_genres.join(", ")
        ));
    }
    if !profile.favorite_studios.is_empty() {
        lines.push(format!(
            "Favorite studios: {}.",
            profile.favorite_studios.join(", ")
        ));
    }
    if let Some(format) = &profile.preferred_format {
        lines.push(format!("Preferred format: {format}."));
    }
    if let Some(frequency) = &profile.watch_frequency {
        lines.push(format!("Watch frequency: {frequency}."));
    }
    if let Some(level) = &profile.fanatic_level {
        lines.push(format!("Fan level: {level}."));
    }
    if !profile.recent_searches.is_empty() {
        lines.push(format!(
            "Recent searches: {}.",
            profile.recent_searches.join(", ")
        ));
    }

    if let Some(focus) = &ctx.focus {
        lines.push(format!("Bias the picks toward: {focus}."));
    }
    if ctx.parental_control {
        lines.push("Only family-safe titles; nothing rated R17 or above.".to_string());
    }

    if !grounding_titles.is_empty() {
        lines.push(format!(
            "Candidate pool from a similarity service, ranked by popularity: {}. \
             Prefer ids of titles you are certain about; you may go outside this pool.",
            grounding_titles.join("; ")
        ));
    }

    let mut never = profile.excluded_titles();
    if let Some(item) = &ctx.current_item {
        if !item.title.is_empty() {
            never.push(item.title.clone());
        }
    }
    if !never.is_empty() {
        lines.push(format!(
            "Hard rule: never suggest any of these, the user knows them already: {}.",
            never.join("; ")
        ));
    }

    lines.push(format!(
        "Call {} with up to {} catalog id strings.",
        FUNCTION_NAME, ctx.desired_count
    ));

    lines.join("\n")
}

/// Quota-metered wrapper around the generative model
///
/// Owns the increment so one model invocation always costs exactly one
/// quota unit, whether or not the answer parsed.
pub struct GenerativeRecommender {
    model: Arc<dyn ChatModelClient>,
    quota: Arc<dyn GenerationQuota>,
}

impl GenerativeRecommender {
    pub fn new(model: Arc<dyn ChatModelClient>, quota: Arc<dyn GenerationQuota>) -> Self {
        Self { model, quota }
    }

    /// Invokes the model once and returns whatever catalog ids it produced
    ///
    /// Callers gate this on `GenerationQuota::can_use`. A degraded model
    /// answer (error, free text, malformed arguments) is an empty list.
    pub async fn suggest(
        &self,
        ctx: &RecommendationContext,
        profile: &UserProfileSnapshot,
        grounding_titles: &[String],
    ) -> Vec<i64> {
        let user_prompt = build_user_prompt(ctx, profile, grounding_titles);

        // The cost is committed before the await: a caller-side cancellation
        // mid-flight must still count the invocation.
        self.quota.record_use().await;

        let response = self.model.request_ids(SYSTEM_PROMPT, &user_prompt).await;

        match response {
            Ok(Some(arguments)) => {
                let ids = parse_id_arguments(&arguments);
                tracing::debug!(suggested = ids.len(), "Generative model answered");
                ids
            }
            Ok(None) => {
                tracing::debug!("Generative model produced no function call");
                Vec::new()
            }
            Err(e) => {
                tracing::warn!(error = %e, "Generative model call failed");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContextKind, ItemRef};
    use crate::services::quota::MockGenerationQuota;

    fn context() -> RecommendationContext {
        RecommendationContext {
            kind: ContextKind::ItemSimilarity,
            current_item: Some(ItemRef {
                id: 42,
                title: "Vinland Saga".to_string(),
            }),
            free_text: None,
            desired_count: 10,
            focus: Some("hidden gems".to_string()),
            parental_control: true,
            user: None,
        }
    }

    #[test]
    fn test_parse_id_arguments_strings() {
        assert_eq!(
            parse_id_arguments(r#"{"ids": ["1", "5114", "42"]}"#),
            vec![1, 5114, 42]
        );
    }

    #[test]
    fn test_parse_id_arguments_accepts_numbers() {
        assert_eq!(parse_id_arguments(r#"{"ids": [7, "8"]}"#), vec![7, 8]);
    }

    #[test]
    fn test_parse_id_arguments_drops_garbage_entries() {
        assert_eq!(
            parse_id_arguments(r#"{"ids": ["1", "not-an-id", null, {"x":1}, "-3", "2"]}"#),
            vec![1, 2]
        );
    }

    #[test]
    fn test_parse_id_arguments_dedupes_preserving_order() {
        assert_eq!(
            parse_id_arguments(r#"{"ids": ["9", "1", "9", "1"]}"#),
            vec![9, 1]
        );
    }

    #[test]
    fn test_parse_id_arguments_malformed_is_empty() {
        assert!(parse_id_arguments("not json").is_empty());
        assert!(parse_id_arguments(r#"{"items": [1]}"#).is_empty());
        assert!(parse_id_arguments(r#"{"ids": "1,2,3"}"#).is_empty());
    }

    #[test]
    fn test_prompt_carries_taste_exclusions_and_grounding() {
        let ctx = context();
        let mut profile = UserProfileSnapshot::anonymous();
        profile.favorites.push(ItemRef {
            id: 100,
            title: "Mushishi".to_string(),
        });

        let prompt = build_user_prompt(
            &ctx,
            &profile,
            &["Berserk".to_string(), "Kingdom".to_string()],
        );

        assert!(prompt.contains("Vinland Saga"));
        assert!(prompt.contains("hidden gems"));
        assert!(prompt.contains("Mushishi"));
        assert!(prompt.contains("Berserk; Kingdom"));
        assert!(prompt.contains("family-safe"));
        assert!(prompt.contains("up to 10"));
    }

    #[tokio::test]
    async fn test_suggest_increments_quota_on_success() {
        let mut model = MockChatModelClient::new();
        model
            .expect_request_ids()
            .times(1)
            .returning(|_, _| Ok(Some(r#"{"ids": ["1", "2"]}"#.to_string())));

        let mut quota = MockGenerationQuota::new();
        quota.expect_record_use().times(1).returning(|| ());

        let recommender = GenerativeRecommender::new(Arc::new(model), Arc::new(quota));
        let ids = recommender
            .suggest(&context(), &UserProfileSnapshot::anonymous(), &[])
            .await;

        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_suggest_increments_quota_even_on_model_failure() {
        let mut model = MockChatModelClient::new();
        model
            .expect_request_ids()
            .times(1)
            .returning(|_, _| Err(AppError::ModelApi("boom".to_string())));

        let mut quota = MockGenerationQuota::new();
        quota.expect_record_use().times(1).returning(|| ());

        let recommender = GenerativeRecommender::new(Arc::new(model), Arc::new(quota));
        let ids = recommender
            .suggest(&context(), &UserProfileSnapshot::anonymous(), &[])
            .await;

        assert!(ids.is_empty());
    }

    #[tokio::test]
    async fn test_quota_recorded_even_when_call_is_cancelled_mid_flight() {
        struct HangingClient;

        #[async_trait]
        impl ChatModelClient for HangingClient {
            async fn request_ids(
                &self,
                _system_prompt: &str,
                _user_prompt: &str,
            ) -> AppResult<Option<String>> {
                std::future::pending().await
            }
        }

        let mut quota = MockGenerationQuota::new();
        quota.expect_record_use().times(1).returning(|| ());

        let recommender = GenerativeRecommender::new(Arc::new(HangingClient), Arc::new(quota));
        let ctx = context();
        let profile = UserProfileSnapshot::anonymous();

        // Cancel the suggestion while the model call is in flight; the quota
        // mock verifies the use was still recorded.
        let cancelled = tokio::time::timeout(
            Duration::from_millis(20),
            recommender.suggest(&ctx, &profile, &[]),
        )
        .await;
        assert!(cancelled.is_err());
    }

    #[test]
    fn test_client_construction_with_timeout_succeeds() {
        let client = OpenAiChatClient::new(
            "https://api.openai.com/v1/chat/completions".to_string(),
            "key".to_string(),
            "gpt-4o-mini".to_string(),
            Duration::from_secs(5),
        );
        assert!(client.is_ok());
    }

    #[tokio::test]
    async fn test_suggest_treats_missing_function_call_as_empty() {
        let mut model = MockChatModelClient::new();
        model
            .expect_request_ids()
            .times(1)
            .returning(|_, _| Ok(None));

        let mut quota = MockGenerationQuota::new();
        quota.expect_record_use().times(1).returning(|| ());

        let recommender = GenerativeRecommender::new(Arc::new(model), Arc::new(quota));
        let ids = recommender
            .suggest(&context(), &UserProfileSnapshot::anonymous(), &[])
            .await;

        assert!(ids.is_empty());
    }
}
