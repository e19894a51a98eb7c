use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Default number of records returned when the caller does not ask for one
pub const DEFAULT_DESIRED_COUNT: usize = 24;

/// What the request is anchored on
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ContextKind {
    /// "More like this one" for a known catalog item
    ItemSimilarity,
    /// Free-text mood or query
    Mood,
    /// General picks for a user profile
    ProfileGeneral,
}

impl Display for ContextKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContextKind::ItemSimilarity => write!(f, "item-similarity"),
            ContextKind::Mood => write!(f, "mood"),
            ContextKind::ProfileGeneral => write!(f, "profile-general"),
        }
    }
}

/// Lightweight id/title pair used for anchors, favorites and external candidates
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ItemRef {
    pub id: i64,
    pub title: String,
}

/// Normalized, immutable per-request context
///
/// Built once by the context builder and never mutated afterwards. Two
/// requests with an equivalent normalized context share a `signature()` and
/// therefore a cached answer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecommendationContext {
    pub kind: ContextKind,
    pub current_item: Option<ItemRef>,
    pub free_text: Option<String>,
    pub desired_count: usize,
    pub focus: Option<String>,
    pub parental_control: bool,
    pub user: Option<String>,
}

impl RecommendationContext {
    /// Deterministic cache key for this context
    ///
    /// Lowercased, whitespace-collapsed free text keeps trivially different
    /// spellings of the same request on one cache entry.
    pub fn signature(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}:{}:{}",
            self.kind,
            self.user.as_deref().unwrap_or("anon"),
            self.current_item
                .as_ref()
                .map(|item| item.id.to_string())
                .unwrap_or_else(|| "-".to_string()),
            self.desired_count,
            if self.parental_control { "pc" } else { "open" },
            normalize_fragment(self.focus.as_deref()),
            normalize_fragment(self.free_text.as_deref()),
        )
    }
}

fn normalize_fragment(text: Option<&str>) -> String {
    match text {
        Some(t) if !t.trim().is_empty() => t
            .trim()
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("-"),
        _ => "-".to_string(),
    }
}
