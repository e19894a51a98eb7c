use serde::Deserialize;

use crate::models::{ContextKind, ItemRef, RecommendationContext, DEFAULT_DESIRED_COUNT};

/// Upper bound on the number of records one request may ask for
const MAX_DESIRED_COUNT: usize = 100;

/// Raw, untrusted request parameters as the web layer hands them over
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRecommendationRequest {
    pub kind: Option<String>,
    pub item_id: Option<String>,
    pub item_title: Option<String>,
    pub query: Option<String>,
    pub count: Option<String>,
    pub focus: Option<String>,
    pub parental_control: Option<String>,
    pub user: Option<String>,
}

/// Normalizes raw request parameters into a `RecommendationContext`
///
/// Never fails: malformed numerics fall back to defaults, blank strings are
/// dropped, and a missing parental-control flag defaults to the safe side.
pub fn build(raw: RawRecommendationRequest) -> RecommendationContext {
    let current_item = raw
        .item_id
        .as_deref()
        .and_then(|id| id.trim().parse::<i64>().ok())
        .map(|id| ItemRef {
            id,
            title: clean(raw.item_title.as_deref()).unwrap_or_default(),
        });

    let free_text = clean(raw.query.as_deref());

    let kind = match raw.kind.as_deref().map(str::trim) {
        Some("item-similarity") => ContextKind::ItemSimilarity,
        Some("mood") => ContextKind::Mood,
        Some("profile-general") => ContextKind::ProfileGeneral,
        // Unknown or absent: infer from what the caller actually sent
        _ if current_item.is_some() => ContextKind::ItemSimilarity,
        _ if free_text.is_some() => ContextKind::Mood,
        _ => ContextKind::ProfileGeneral,
    };

    let desired_count = raw
        .count
        .as_deref()
        .and_then(|c| c.trim().parse::<usize>().ok())
        .filter(|&c| c > 0)
        .map(|c| c.min(MAX_DESIRED_COUNT))
        .unwrap_or(DEFAULT_DESIRED_COUNT);

    let parental_control = match raw.parental_control.as_deref().map(str::trim) {
        Some("false") | Some("0") | Some("no") | Some("off") => false,
        // Unspecified or anything unrecognized stays restricted
        _ => true,
    };

    RecommendationContext {
        kind,
        current_item,
        free_text,
        desired_count,
        focus: clean(raw.focus.as_deref()),
        parental_control,
        user: clean(raw.user.as_deref()),
    }
}

fn clean(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_request_gets_safe_defaults() {
        let ctx = build(RawRecommendationRequest::default());

        assert_eq!(ctx.kind, ContextKind::ProfileGeneral);
        assert_eq!(ctx.current_item, None);
        assert_eq!(ctx.desired_count, DEFAULT_DESIRED_COUNT);
        assert!(ctx.parental_control);
        assert_eq!(ctx.free_text, None);
    }

    #[test]
    fn test_item_id_implies_item_similarity() {
        let ctx = build(RawRecommendationRequest {
            item_id: Some("42".to_string()),
            item_title: Some("Steins;Gate".to_string()),
            ..Default::default()
        });

        assert_eq!(ctx.kind, ContextKind::ItemSimilarity);
        assert_eq!(
            ctx.current_item,
            Some(ItemRef {
                id: 42,
                title: "Steins;Gate".to_string()
            })
        );
    }

    #[test]
    fn test_query_implies_mood() {
        let ctx = build(RawRecommendationRequest {
            query: Some("  slow burn romance ".to_string()),
            ..Default::default()
        });

        assert_eq!(ctx.kind, ContextKind::Mood);
        assert_eq!(ctx.free_text.as_deref(), Some("slow burn romance"));
    }

    #[test]
    fn test_malformed_count_falls_back_to_default() {
        for bad in ["abc", "-5", "0", ""] {
            let ctx = build(RawRecommendationRequest {
                count: Some(bad.to_string()),
                ..Default::default()
            });
            assert_eq!(ctx.desired_count, DEFAULT_DESIRED_COUNT, "count={bad:?}");
        }
    }

    #[test]
    fn test_oversized_count_is_capped() {
        let ctx = build(RawRecommendationRequest {
            count: Some("5000".to_string()),
            ..Default::default()
        });
        assert_eq!(ctx.desired_count, MAX_DESIRED_COUNT);
    }

    #[test]
    fn test_malformed_item_id_is_dropped() {
        let ctx = build(RawRecommendationRequest {
            item_id: Some("not-a-number".to_string()),
            ..Default::default()
        });
        assert_eq!(ctx.current_item, None);
        assert_eq!(ctx.kind, ContextKind::ProfileGeneral);
    }

    #[test]
    fn test_parental_control_only_disabled_explicitly() {
        let off = build(RawRecommendationRequest {
            parental_control: Some("false".to_string()),
            ..Default::default()
        });
        assert!(!off.parental_control);

        let garbage = build(RawRecommendationRequest {
            parental_control: Some("maybe".to_string()),
            ..Default::default()
        });
        assert!(garbage.parental_control);
    }

    #[test]
    fn test_explicit_kind_wins_over_inference() {
        let ctx = build(RawRecommendationRequest {
            kind: Some("profile-general".to_string()),
            query: Some("mecha".to_string()),
            ..Default::default()
        });
        assert_eq!(ctx.kind, ContextKind::ProfileGeneral);
    }
}
