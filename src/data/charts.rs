//! Read-only queries over the `charts` table (joined with `songs`).

use crate::data::models::Chart;
use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(sqlx::FromRow)]
struct ChartRow {
    id: Uuid,
    difficulty: String,
    rating: i32,
    song_id: String,
    song_name: String,
}

impl ChartRow {
    fn into_chart(self) -> Result<Chart> {
        let difficulty = self
            .difficulty
            .parse()
            .with_context(|| format!("chart {} has an unknown difficulty tier", self.id))?;
        Ok(Chart {
            id: self.id,
            difficulty,
            rating: self.rating,
            song_id: self.song_id,
            song_name: self.song_name,
        })
    }
}

/// Fetch one page of charts ordered by chart id.
///
/// The stable ordering makes successive `(offset, limit)` windows
/// non-overlapping; an empty result means pagination is done.
pub async fn list_page(pool: &PgPool, offset: i64, limit: i64) -> Result<Vec<Chart>> {
    let rows = sqlx::query_as::<_, ChartRow>(
        r#"
        SELECT charts.id, charts.difficulty, charts.rating, songs.song_id, songs.song_name
        FROM charts
        INNER JOIN songs ON charts.song_id = songs.id
        ORDER BY charts.id
        OFFSET $1 LIMIT $2
        "#,
    )
    .bind(offset)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("failed to fetch chart page")?;

    rows.into_iter().map(ChartRow::into_chart).collect()
}

/// Charts for one mode and numeric rating, for the leaderboard read side.
pub async fn list_by_mode_and_rating(
    pool: &PgPool,
    tiers: &[&str],
    rating: i32,
) -> Result<Vec<Chart>> {
    let tiers: Vec<String> = tiers.iter().map(|t| (*t).to_owned()).collect();
    let rows = sqlx::query_as::<_, ChartRow>(
        r#"
        SELECT charts.id, charts.difficulty, charts.rating, songs.song_id, songs.song_name
        FROM charts
        INNER JOIN songs ON charts.song_id = songs.id
        WHERE charts.rating = $1 AND charts.difficulty = ANY($2)
        ORDER BY songs.song_name, charts.difficulty
        "#,
    )
    .bind(rating)
    .bind(&tiers)
    .fetch_all(pool)
    .await
    .context("failed to fetch charts by mode and rating")?;

    rows.into_iter().map(ChartRow::into_chart).collect()
}
