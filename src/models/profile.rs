use serde::{Deserialize, Serialize};

use super::ItemRef;

/// Read-only projection of a user, used only to bias the generative and
/// strategy stages
///
/// Fetched once per request and never persisted by this subsystem. Requests
/// without a signed-in user get the fixed anonymous profile.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserProfileSnapshot {
    pub username: Option<String>,
    pub favorites: Vec<ItemRef>,
    pub favorite_genres: Vec<String>,
    pub favorite_studios: Vec<String>,
    pub preferred_format: Option<String>,
    pub watch_frequency: Option<String>,
    pub fanatic_level: Option<String>,
    pub recent_searches: Vec<String>,
    pub watched_ids: Vec<i64>,
}

impl UserProfileSnapshot {
    /// Fixed default profile for anonymous requests
    pub fn anonymous() -> Self {
        Self {
            username: None,
            favorites: Vec::new(),
            favorite_genres: vec![
                "action".to_string(),
                "adventure".to_string(),
                "fantasy".to_string(),
            ],
            favorite_studios: Vec::new(),
            preferred_format: Some("tv".to_string()),
            watch_frequency: Some("weekly".to_string()),
            fanatic_level: None,
            recent_searches: Vec::new(),
            watched_ids: Vec::new(),
        }
    }

    /// Ids that must never be recommended back to this user
    pub fn excluded_ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.favorites
            .iter()
            .map(|f| f.id)
            .chain(self.watched_ids.iter().copied())
    }

    /// Titles the model must never re-suggest
    pub fn excluded_titles(&self) -> Vec<String> {
        self.favorites.iter().map(|f| f.title.clone()).collect()
    }
}
