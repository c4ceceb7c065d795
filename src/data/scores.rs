//! Writes to the `scores` table and reads over the ranked view.

use crate::data::models::ScoreRow;
use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

/// Batch upsert score rows for one chart.
///
/// Keyed on `(chart_id, username)`; conflicts overwrite score, lamp and the
/// update timestamp, so re-running a refresh with unchanged upstream data is
/// a no-op in effect. Returns the number of rows written.
pub async fn batch_upsert(pool: &PgPool, chart_id: Uuid, rows: &[ScoreRow]) -> Result<u64> {
    if rows.is_empty() {
        return Ok(0);
    }

    let usernames: Vec<&str> = rows.iter().map(|r| r.username.as_str()).collect();
    let scores: Vec<i32> = rows.iter().map(|r| r.score).collect();
    let lamps: Vec<i16> = rows.iter().map(|r| r.lamp).collect();

    let result = sqlx::query(
        r#"
        INSERT INTO scores (chart_id, username, score, lamp, updated_at)
        SELECT $1, username, score, lamp, now()
        FROM UNNEST($2::text[], $3::int[], $4::smallint[]) AS r(username, score, lamp)
        ON CONFLICT (chart_id, username)
        DO UPDATE SET score = EXCLUDED.score, lamp = EXCLUDED.lamp, updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(chart_id)
    .bind(&usernames)
    .bind(&scores)
    .bind(&lamps)
    .execute(pool)
    .await
    .context("failed to batch upsert scores")?;

    Ok(result.rows_affected())
}

/// Recompute the server-maintained `scores_with_rank` view.
///
/// The view is never updated incrementally; after a bulk refresh it is
/// recomputed wholesale so readers see a consistent snapshot.
pub async fn refresh_rank_view(pool: &PgPool) -> Result<()> {
    sqlx::query("SELECT refresh_scores_with_rank()")
        .execute(pool)
        .await
        .context("failed to refresh the ranked score view")?;
    Ok(())
}

/// A player's ranked score for one chart.
#[derive(Debug, sqlx::FromRow)]
pub struct RankedScore {
    pub chart_id: Uuid,
    pub score: i32,
    pub lamp: i16,
    pub rank: i64,
}

/// Ranked scores for one player across the given charts.
pub async fn ranked_for_player(
    pool: &PgPool,
    username: &str,
    chart_ids: &[Uuid],
) -> Result<Vec<RankedScore>> {
    let rows = sqlx::query_as::<_, RankedScore>(
        r#"
        SELECT chart_id, score, lamp, rank
        FROM scores_with_rank
        WHERE username = $1 AND chart_id = ANY($2)
        "#,
    )
    .bind(username)
    .bind(chart_ids)
    .fetch_all(pool)
    .await
    .context("failed to fetch ranked scores for player")?;
    Ok(rows)
}

/// The Nth-place score per chart (the "target score to beat").
#[derive(Debug, sqlx::FromRow)]
pub struct TargetScore {
    pub chart_id: Uuid,
    pub score: i32,
}

/// Fetch the score held by the player at `place` on each of the given charts.
/// Charts with fewer than `place` entries are simply absent from the result.
pub async fn targets_at_place(
    pool: &PgPool,
    chart_ids: &[Uuid],
    place: i64,
) -> Result<Vec<TargetScore>> {
    let rows = sqlx::query_as::<_, TargetScore>(
        r#"
        SELECT chart_id, score
        FROM scores_with_rank
        WHERE row_number = $1 AND chart_id = ANY($2)
        "#,
    )
    .bind(place)
    .bind(chart_ids)
    .fetch_all(pool)
    .await
    .context("failed to fetch target scores")?;
    Ok(rows)
}
