use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::time::timeout;

use crate::db::redis::cache::ANSWER_TTL_SECONDS;
use crate::db::RecommendationCache;
use crate::error::AppResult;
use crate::models::{
    CatalogRecord, ExternalCandidates, ItemRef, RecommendationContext, UserProfileSnapshot,
};
use crate::services::catalog::CatalogGateway;
use crate::services::exclusions::ExclusionSet;
use crate::services::external::SimilarityApi;
use crate::services::generative::{ChatModelClient, GenerativeRecommender};
use crate::services::profile::ProfileStore;
use crate::services::quota::GenerationQuota;
use crate::services::strategy;

/// Sequences the recommendation pipeline
///
/// Stage order: seed exclusions, quota-gated generative, external fallback,
/// strategy fallback. Each stage only runs while the accepted set is short of
/// `desired_count` and the request deadline has time left. A degraded stage
/// contributes nothing; an empty final answer is valid.
pub struct RecommendationOrchestrator {
    catalog: Arc<dyn CatalogGateway>,
    profiles: Arc<dyn ProfileStore>,
    external: Arc<dyn SimilarityApi>,
    generative: GenerativeRecommender,
    quota: Arc<dyn GenerationQuota>,
    cache: Arc<dyn RecommendationCache>,
    request_deadline: Duration,
    rng: Mutex<StdRng>,
}

impl RecommendationOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        catalog: Arc<dyn CatalogGateway>,
        profiles: Arc<dyn ProfileStore>,
        external: Arc<dyn SimilarityApi>,
        model: Arc<dyn ChatModelClient>,
        quota: Arc<dyn GenerationQuota>,
        cache: Arc<dyn RecommendationCache>,
        request_deadline: Duration,
    ) -> Self {
        Self {
            catalog,
            profiles,
            external,
            generative: GenerativeRecommender::new(model, Arc::clone(&quota)),
            quota,
            cache,
            request_deadline,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Pins the shuffle order; used by tests to make runs reproducible
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    /// The one inbound operation of this subsystem
    pub async fn get_recommendations(
        &self,
        ctx: &RecommendationContext,
    ) -> AppResult<Vec<CatalogRecord>> {
        let signature = ctx.signature();

        if let Some(cached) = self.cache.get_records(&signature).await {
            tracing::debug!(signature = %signature, records = cached.len(), "Serving cached recommendations");
            return Ok(cached);
        }

        let deadline = Instant::now() + self.request_deadline;
        let target = ctx.desired_count;

        // Profile and external grounding are independent when the anchor is
        // explicit, so fetch them concurrently in that case.
        let (profile, mut external) = match &ctx.current_item {
            Some(item) => {
                let (profile, candidates) = tokio::join!(
                    self.profiles.snapshot(ctx.user.as_deref()),
                    self.external.similar_to(item.id)
                );
                (profile, Some(candidates))
            }
            None => (self.profiles.snapshot(ctx.user.as_deref()).await, None),
        };

        // Stage 1: seed exclusions
        let mut exclusions = ExclusionSet::default();
        if let Some(item) = &ctx.current_item {
            exclusions.insert(item.id);
        }
        exclusions.extend(profile.excluded_ids());

        // Without an explicit anchor, fall back to one of the user's favorites
        let anchor = match ctx.current_item.clone() {
            Some(item) => Some(item),
            None => {
                let favorite = self.pick_favorite_anchor(&profile);
                if let Some(item) = &favorite {
                    if time_left(deadline).is_some() {
                        external = Some(self.external.similar_to(item.id).await);
                    }
                }
                favorite
            }
        };

        if let Some(err) = external.as_ref().and_then(|e| e.error.as_ref()) {
            tracing::warn!(
                signature = %signature,
                anchor_id = anchor.as_ref().map(|a| a.id),
                error = %err,
                "External recommender degraded, continuing without it"
            );
        }

        let mut accepted: Vec<CatalogRecord> = Vec::new();

        // Stage 2: generative, gated by quota and deadline
        if accepted.len() < target {
            match time_left(deadline) {
                Some(remaining) => {
                    if self.quota.can_use().await {
                        let grounding = external.as_ref().map(ExternalCandidates::titles);
                        let stage = self.generative_stage(
                            ctx,
                            &profile,
                            grounding.as_deref().unwrap_or(&[]),
                            &mut exclusions,
                            &mut accepted,
                        );
                        if timeout(remaining, stage).await.is_err() {
                            tracing::warn!(stage = "generative", signature = %signature, "Stage cut off at request deadline");
                        }
                    } else {
                        tracing::debug!(signature = %signature, "Generative stage skipped, daily quota exhausted");
                    }
                }
                None => {
                    tracing::warn!(stage = "generative", signature = %signature, "Deadline reached, stage skipped");
                }
            }
        }

        // Stage 3: unused external candidates
        if accepted.len() < target && time_left(deadline).is_some() {
            if let Some(candidates) = &external {
                self.external_fallback_stage(candidates, ctx, &mut exclusions, &mut accepted)
                    .await;
            }
        }

        // Stage 4: strategy fallback always runs while short, anchored or not
        if accepted.len() < target {
            match time_left(deadline) {
                Some(remaining) => {
                    let order = {
                        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
                        strategy::shuffled_strategies(&mut *rng)
                    };
                    let stage = strategy::top_up(
                        self.catalog.as_ref(),
                        &order,
                        &mut exclusions,
                        &mut accepted,
                        target,
                        ctx.parental_control,
                    );
                    if timeout(remaining, stage).await.is_err() {
                        tracing::warn!(stage = "strategy_fallback", signature = %signature, "Stage cut off at request deadline");
                    }
                }
                None => {
                    tracing::warn!(stage = "strategy_fallback", signature = %signature, "Deadline reached, returning partial results");
                }
            }
        }

        accepted.truncate(target);

        tracing::info!(
            signature = %signature,
            kind = %ctx.kind,
            records = accepted.len(),
            target,
            "Recommendations assembled"
        );

        self.cache
            .store_records(&signature, &accepted, ANSWER_TTL_SECONDS);

        Ok(accepted)
    }

    fn pick_favorite_anchor(&self, profile: &UserProfileSnapshot) -> Option<ItemRef> {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        profile.favorites.choose(&mut *rng).cloned()
    }

    /// Runs the model and accepts whatever resolves in the catalog
    ///
    /// Ids the catalog does not know (hallucinations) drop out at resolution;
    /// the strategy stage covers any shortfall they leave.
    async fn generative_stage(
        &self,
        ctx: &RecommendationContext,
        profile: &UserProfileSnapshot,
        grounding_titles: &[String],
        exclusions: &mut ExclusionSet,
        accepted: &mut Vec<CatalogRecord>,
    ) {
        let suggested = self.generative.suggest(ctx, profile, grounding_titles).await;
        if suggested.is_empty() {
            return;
        }

        let fresh: Vec<i64> = suggested
            .into_iter()
            .filter(|id| !exclusions.contains(*id))
            .collect();
        if fresh.is_empty() {
            return;
        }

        let records = self.catalog.find_by_ids(&fresh, ctx.parental_control).await;
        let resolved = records.len();

        for record in records {
            if accepted.len() >= ctx.desired_count {
                break;
            }
            if exclusions.insert(record.id) {
                accepted.push(record);
            }
        }

        tracing::debug!(
            stage = "generative",
            suggested = fresh.len(),
            resolved,
            total = accepted.len(),
            "Generative stage done"
        );
    }

    /// Accepts leftover external candidates, shuffled to avoid positional bias
    async fn external_fallback_stage(
        &self,
        candidates: &ExternalCandidates,
        ctx: &RecommendationContext,
        exclusions: &mut ExclusionSet,
        accepted: &mut Vec<CatalogRecord>,
    ) {
        let mut leftover: Vec<i64> = candidates
            .ids()
            .into_iter()
            .filter(|id| !exclusions.contains(*id))
            .collect();
        if leftover.is_empty() {
            return;
        }

        {
            let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
            leftover.shuffle(&mut *rng);
        }
        leftover.truncate(ctx.desired_count.saturating_sub(accepted.len()));

        let records = self
            .catalog
            .find_by_ids(&leftover, ctx.parental_control)
            .await;

        let mut taken = 0;
        for record in records {
            if accepted.len() >= ctx.desired_count {
                break;
            }
            if exclusions.insert(record.id) {
                accepted.push(record);
                taken += 1;
            }
        }

        tracing::debug!(
            stage = "external_fallback",
            taken,
            total = accepted.len(),
            "External fallback done"
        );
    }
}

fn time_left(deadline: Instant) -> Option<Duration> {
    let now = Instant::now();
    if now < deadline {
        Some(deadline - now)
    } else {
        None
    }
}
