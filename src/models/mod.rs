use serde::{Deserialize, Serialize};

mod context;
mod profile;

pub use context::{ContextKind, ItemRef, RecommendationContext, DEFAULT_DESIRED_COUNT};
pub use profile::UserProfileSnapshot;

/// Content ratings hidden when parental control is active
pub const RESTRICTED_RATINGS: &[&str] = &["r17", "r_plus", "rx"];

/// Returns true when a record with this rating may be shown under parental control
pub fn is_family_safe(rating: Option<&str>) -> bool {
    match rating {
        Some(r) => !RESTRICTED_RATINGS.contains(&r),
        None => true,
    }
}

/// A fully resolved catalog item returned to the client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct CatalogRecord {
    pub id: i64,
    pub title: String,
    pub score: Option<f64>,
    pub status: Option<String>,
    pub rating: Option<String>,
    pub image_url: Option<String>,
    pub genres: Vec<String>,
}

impl CatalogRecord {
    /// Parental-control predicate for this record
    pub fn is_family_safe(&self) -> bool {
        is_family_safe(self.rating.as_deref())
    }
}

/// Result of one third-party similarity call
///
/// Ordered by the external service's own vote signal. An empty list with an
/// error message is a valid, non-fatal value; the orchestrator degrades to
/// the next stage.
#[derive(Debug, Clone, Default)]
pub struct ExternalCandidates {
    pub entries: Vec<ItemRef>,
    pub error: Option<String>,
}

impl ExternalCandidates {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            entries: Vec::new(),
            error: Some(message.into()),
        }
    }

    pub fn ids(&self) -> Vec<i64> {
        self.entries.iter().map(|e| e.id).collect()
    }

    pub fn titles(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.title.clone()).collect()
    }
}

// ============================================================================
// Third-party recommendation API types
// ============================================================================

/// Raw response from GET /anime/{id}/recommendations
#[derive(Debug, Clone, Deserialize)]
pub struct ApiRecommendationsResponse {
    #[serde(default)]
    pub data: Vec<ApiRecommendation>,
}

/// One recommended entry with the service's popularity signal
#[derive(Debug, Clone, Deserialize)]
pub struct ApiRecommendation {
    pub entry: ApiRecommendationEntry,
    #[serde(default)]
    pub votes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiRecommendationEntry {
    pub mal_id: i64,
    pub title: String,
}

impl From<ApiRecommendation> for ItemRef {
    fn from(rec: ApiRecommendation) -> Self {
        ItemRef {
            id: rec.entry.mal_id,
            title: rec.entry.title,
        }
    }
}
