use rand::seq::SliceRandom;
use rand::Rng;
use std::fmt::Display;

use crate::models::CatalogRecord;
use crate::services::catalog::CatalogGateway;
use crate::services::exclusions::ExclusionSet;

/// Upper bound on how many candidates one strategy is asked for per round
pub const STRATEGY_BATCH_CAP: usize = 40;

/// A named, parameterized catalog ranking rule used as a fallback source
///
/// Each variant is a pure filter+order description; the catalog gateway maps
/// it onto the storage engine. Thresholds live with the gateway's mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryStrategy {
    /// Order by score desc, score > 7.5
    HighScore,
    /// Order by member count desc, members > 50,000
    Popular,
    /// Order by release year desc, year > 2020
    Recent,
    /// Order by score desc, members < 30,000 and score > 7.0
    HiddenGems,
}

impl QueryStrategy {
    pub const ALL: [QueryStrategy; 4] = [
        QueryStrategy::HighScore,
        QueryStrategy::Popular,
        QueryStrategy::Recent,
        QueryStrategy::HiddenGems,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            QueryStrategy::HighScore => "high_score",
            QueryStrategy::Popular => "popular",
            QueryStrategy::Recent => "recent",
            QueryStrategy::HiddenGems => "hidden_gems",
        }
    }
}

impl Display for QueryStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Randomized strategy order for one fallback invocation
///
/// Shuffling keeps repeated top-ups from systematically draining one
/// strategy. The rng is injected so tests can pin the order.
pub fn shuffled_strategies(rng: &mut impl Rng) -> Vec<QueryStrategy> {
    let mut order = QueryStrategy::ALL.to_vec();
    order.shuffle(rng);
    order
}

/// Round-robin top-up over the given strategy order
///
/// Each strategy contributes up to `2 x remaining` candidates (capped at
/// [`STRATEGY_BATCH_CAP`]) that are not already excluded. A strategy whose
/// query degrades contributes nothing and the round continues.
pub async fn top_up(
    catalog: &dyn CatalogGateway,
    order: &[QueryStrategy],
    exclusions: &mut ExclusionSet,
    accepted: &mut Vec<CatalogRecord>,
    target: usize,
    parental_control: bool,
) {
    for strategy in order {
        let remaining = target.saturating_sub(accepted.len());
        if remaining == 0 {
            return;
        }

        let batch = (remaining * 2).min(STRATEGY_BATCH_CAP);
        let excluded = exclusions.to_vec();
        let rows = catalog
            .find_by_strategy(*strategy, &excluded, batch as i64, parental_control)
            .await;

        let mut taken = 0;
        for row in rows {
            if accepted.len() >= target {
                break;
            }
            if exclusions.insert(row.id) {
                accepted.push(row);
                taken += 1;
            }
        }

        tracing::debug!(
            strategy = %strategy,
            batch,
            taken,
            total = accepted.len(),
            "Strategy fallback round"
        );
    }
}
