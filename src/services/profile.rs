use async_trait::async_trait;
use sqlx::PgPool;

use crate::error::AppResult;
use crate::models::{ItemRef, UserProfileSnapshot};

/// Read-only access to persisted user profiles
///
/// One snapshot per request. Unknown users and storage failures both degrade
/// to the fixed anonymous profile; a broken profile store must never block
/// recommendations.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn snapshot<'a>(&self, username: Option<&'a str>) -> UserProfileSnapshot;
}

pub struct PostgresProfileStore {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct ProfileRow {
    username: String,
    favorite_genres: Vec<String>,
    favorite_studios: Vec<String>,
    preferred_format: Option<String>,
    watch_frequency: Option<String>,
    fanatic_level: Option<String>,
    recent_searches: Vec<String>,
}

#[derive(sqlx::FromRow)]
struct FavoriteRow {
    id: i64,
    title: String,
}

impl PostgresProfileStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load(&self, username: &str) -> AppResult<Option<UserProfileSnapshot>> {
        let row = sqlx::query_as::<_, ProfileRow>(
            "SELECT username, favorite_genres, favorite_studios, preferred_format, \
                    watch_frequency, fanatic_level, recent_searches \
             FROM user_profiles WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let favorites = sqlx::query_as::<_, FavoriteRow>(
            "SELECT a.id, a.title \
             FROM user_favorites f JOIN anime a ON a.id = f.anime_id \
             WHERE f.username = $1",
        )
        .bind(username)
        .fetch_all(&self.pool)
        .await?;

        let watched_ids: Vec<i64> =
            sqlx::query_scalar("SELECT anime_id FROM user_watched WHERE username = $1")
                .bind(username)
                .fetch_all(&self.pool)
                .await?;

        Ok(Some(UserProfileSnapshot {
            username: Some(row.username),
            favorites: favorites
                .into_iter()
                .map(|f| ItemRef {
                    id: f.id,
                    title: f.title,
                })
                .collect(),
            favorite_genres: row.favorite_genres,
            favorite_studios: row.favorite_studios,
            preferred_format: row.preferred_format,
            watch_frequency: row.watch_frequency,
            fanatic_level: row.fanatic_level,
            recent_searches: row.recent_searches,
            watched_ids,
        }))
    }
}

#[async_trait]
impl ProfileStore for PostgresProfileStore {
    async fn snapshot<'a>(&self, username: Option<&'a str>) -> UserProfileSnapshot {
        let Some(name) = username else {
            return UserProfileSnapshot::anonymous();
        };

        match self.load(name).await {
            Ok(Some(profile)) => profile,
            Ok(None) => {
                tracing::debug!(user = %name, "No stored profile, using anonymous defaults");
                UserProfileSnapshot::anonymous()
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    user = %name,
                    "Profile load failed, degrading to anonymous profile"
                );
                UserProfileSnapshot::anonymous()
            }
        }
    }
}
