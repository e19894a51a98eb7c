use async_trait::async_trait;
use sqlx::PgPool;

use crate::models::{CatalogRecord, RESTRICTED_RATINGS};
use crate::services::strategy::QueryStrategy;

const RECORD_COLUMNS: &str = "id, title, score, status, rating, image_url, genres";

/// Thin contract over the catalog store
///
/// Both operations apply the parental-control predicate inside the store
/// (never trusting caller-side filtering alone) and degrade to an empty,
/// logged result on storage failure instead of propagating.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CatalogGateway: Send + Sync {
    /// Resolves a set of catalog ids to full records
    async fn find_by_ids(&self, ids: &[i64], parental_control: bool) -> Vec<CatalogRecord>;

    /// Runs one ranking strategy, excluding the given ids
    async fn find_by_strategy(
        &self,
        strategy: QueryStrategy,
        excluded_ids: &[i64],
        limit: i64,
        parental_control: bool,
    ) -> Vec<CatalogRecord>;
}

/// Maps a strategy description onto SQL filter and order fragments
///
/// Fragments are static strings; all request data travels through binds.
fn strategy_sql(strategy: QueryStrategy) -> (&'static str, &'static str) {
    match strategy {
        QueryStrategy::HighScore => ("score > 7.5", "score DESC"),
        QueryStrategy::Popular => ("members > 50000", "members DESC"),
        QueryStrategy::Recent => ("year > 2020", "year DESC"),
        QueryStrategy::HiddenGems => ("members < 30000 AND score > 7.0", "score DESC"),
    }
}

pub struct PostgresCatalogGateway {
    pool: PgPool,
}

impl PostgresCatalogGateway {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn restricted_ratings() -> Vec<String> {
        RESTRICTED_RATINGS.iter().map(|r| r.to_string()).collect()
    }
}

#[async_trait]
impl CatalogGateway for PostgresCatalogGateway {
    async fn find_by_ids(&self, ids: &[i64], parental_control: bool) -> Vec<CatalogRecord> {
        if ids.is_empty() {
            return Vec::new();
        }

        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM anime \
             WHERE id = ANY($1) \
             AND ($2 = false OR rating IS NULL OR rating != ALL($3))"
        );

        let result = sqlx::query_as::<_, CatalogRecord>(&sql)
            .bind(ids)
            .bind(parental_control)
            .bind(Self::restricted_ratings())
            .fetch_all(&self.pool)
            .await;

        match result {
            Ok(records) => records,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    requested = ids.len(),
                    "Catalog lookup by ids failed, degrading to empty"
                );
                Vec::new()
            }
        }
    }

    async fn find_by_strategy(
        &self,
        strategy: QueryStrategy,
        excluded_ids: &[i64],
        limit: i64,
        parental_control: bool,
    ) -> Vec<CatalogRecord> {
        let (filter, order) = strategy_sql(strategy);
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM anime \
             WHERE {filter} \
             AND id != ALL($1) \
             AND ($2 = false OR rating IS NULL OR rating != ALL($3)) \
             ORDER BY {order} \
             LIMIT $4"
        );

        let result = sqlx::query_as::<_, CatalogRecord>(&sql)
            .bind(excluded_ids)
            .bind(parental_control)
            .bind(Self::restricted_ratings())
            .bind(limit)
            .fetch_all(&self.pool)
            .await;

        match result {
            Ok(records) => records,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    strategy = %strategy,
                    "Strategy query failed, degrading to empty"
                );
                Vec::new()
            }
        }
    }
}
