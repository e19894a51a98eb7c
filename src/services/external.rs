use async_trait::async_trait;
use reqwest::Client as HttpClient;
use std::collections::HashSet;
use std::time::Duration;

use crate::error::AppResult;
use crate::models::{ApiRecommendation, ApiRecommendationsResponse, ExternalCandidates, ItemRef};

/// Candidates kept from one third-party call
pub const MAX_EXTERNAL_CANDIDATES: usize = 20;

/// Third-party similarity recommender keyed by a known catalog id
///
/// Every failure mode (non-2xx, malformed body, network error, timeout)
/// yields an `ExternalCandidates` carrying the error message; this call
/// never fails the pipeline.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SimilarityApi: Send + Sync {
    async fn similar_to(&self, anchor_id: i64) -> ExternalCandidates;
}

/// Client for a MyAnimeList-compatible recommendations endpoint
#[derive(Clone)]
pub struct MalRecommenderClient {
    http_client: HttpClient,
    api_url: String,
}

impl MalRecommenderClient {
    pub fn new(api_url: String, timeout: Duration) -> AppResult<Self> {
        let http_client = HttpClient::builder().timeout(timeout).build()?;

        Ok(Self {
            http_client,
            api_url,
        })
    }
}

/// Orders raw candidates by the service's vote signal, drops the anchor and
/// duplicates, and truncates to the bounded top-N
fn rank_candidates(mut data: Vec<ApiRecommendation>, anchor_id: i64) -> Vec<ItemRef> {
    data.sort_by(|a, b| b.votes.cmp(&a.votes));

    let mut seen = HashSet::new();
    data.into_iter()
        .filter(|rec| rec.entry.mal_id != anchor_id)
        .filter(|rec| seen.insert(rec.entry.mal_id))
        .map(ItemRef::from)
        .take(MAX_EXTERNAL_CANDIDATES)
        .collect()
}

#[async_trait]
impl SimilarityApi for MalRecommenderClient {
    async fn similar_to(&self, anchor_id: i64) -> ExternalCandidates {
        let url = format!("{}/anime/{}/recommendations", self.api_url, anchor_id);

        let response = match self.http_client.get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(anchor_id, error = %e, "External recommender request failed");
                return ExternalCandidates::failed(e.to_string());
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            tracing::warn!(anchor_id, status = %status, "External recommender returned non-success");
            return ExternalCandidates::failed(format!(
                "recommendation API returned status {status}"
            ));
        }

        let body: ApiRecommendationsResponse = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(anchor_id, error = %e, "External recommender body did not parse");
                return ExternalCandidates::failed(format!("malformed response body: {e}"));
            }
        };

        let entries = rank_candidates(body.data, anchor_id);
        tracing::debug!(anchor_id, candidates = entries.len(), "External candidates fetched");

        ExternalCandidates {
            entries,
            error: None,
        }
    }
}
