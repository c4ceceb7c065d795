//! Leaderboard read side: per-player score tables with derived statistics.
//!
//! Read-only over `charts`/`songs` and the ranked view; every filter is a
//! bound query parameter.

use crate::data::models::Mode;
use crate::data::{charts, scores};
use crate::state::AppState;
use crate::web::error::ApiError;
use axum::extract::{Path, Query, State};
use axum::response::Json;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Score thresholds bounding the six progress tiers.
pub const CUTOFFS: [i32; 5] = [900_000, 950_000, 975_000, 990_000, 999_000];

fn default_target_place() -> i64 {
    100
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoresQuery {
    /// `single` or `double`.
    mode: String,
    /// Numeric chart rating (1-19).
    rating: i32,
    /// Leaderboard place whose score becomes the target-to-beat.
    #[serde(default = "default_target_place")]
    target_place: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreEntry {
    pub chart_id: Uuid,
    pub song: String,
    pub difficulty: String,
    pub rating: i32,
    pub score: Option<i32>,
    pub rank: Option<i64>,
    pub lamp: Option<i16>,
    /// Progress tier 0-5, present only when the chart has been played.
    pub cutoff: Option<u8>,
    pub target_score: Option<i32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreSummary {
    pub total_charts: usize,
    pub played: usize,
    pub mean: Option<f64>,
    pub median: Option<f64>,
    /// Chart count per progress tier, index 0 (below 900k) through 5 (999k+).
    pub cutoff_counts: [usize; 6],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoresResponse {
    pub username: String,
    pub mode: Mode,
    pub rating: i32,
    pub rows: Vec<ScoreEntry>,
    pub summary: ScoreSummary,
}

/// `GET /api/players/{username}/scores?mode=single&rating=14`
///
/// Charts for one mode/rating, left-joined with the player's ranked scores
/// and the Nth-place target score, plus summary statistics.
pub(super) async fn player_scores(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Query(query): Query<ScoresQuery>,
) -> Result<Json<ScoresResponse>, ApiError> {
    let mode: Mode = query
        .mode
        .parse()
        .map_err(|_| ApiError::bad_request("mode must be 'single' or 'double'"))?;
    if query.target_place < 1 {
        return Err(ApiError::bad_request("targetPlace must be >= 1"));
    }

    let chart_list = charts::list_by_mode_and_rating(&state.db_pool, mode.tiers(), query.rating)
        .await
        .map_err(|e| ApiError::db("Chart lookup failed", e))?;
    let chart_ids: Vec<Uuid> = chart_list.iter().map(|c| c.id).collect();

    let ranked = scores::ranked_for_player(&state.db_pool, &username, &chart_ids)
        .await
        .map_err(|e| ApiError::db("Score lookup failed", e))?;
    let ranked_by_chart: HashMap<Uuid, &scores::RankedScore> =
        ranked.iter().map(|s| (s.chart_id, s)).collect();

    let targets = scores::targets_at_place(&state.db_pool, &chart_ids, query.target_place)
        .await
        .map_err(|e| ApiError::db("Target score lookup failed", e))?;
    let target_by_chart: HashMap<Uuid, i32> =
        targets.iter().map(|t| (t.chart_id, t.score)).collect();

    let mut rows: Vec<ScoreEntry> = chart_list
        .into_iter()
        .map(|chart| {
            let ranked = ranked_by_chart.get(&chart.id);
            ScoreEntry {
                chart_id: chart.id,
                song: chart.song_name,
                difficulty: chart.difficulty.as_str().to_owned(),
                rating: chart.rating,
                score: ranked.map(|s| s.score),
                rank: ranked.map(|s| s.rank),
                lamp: ranked.map(|s| s.lamp),
                cutoff: ranked.map(|s| cutoff_tier(s.score)),
                target_score: target_by_chart.get(&chart.id).copied(),
            }
        })
        .collect();

    // Best-ranked charts last, unplayed charts first, as the dashboard
    // renders worst-to-best.
    rows.sort_by_key(|row| std::cmp::Reverse(row.rank.unwrap_or(-1)));

    let summary = summarize(&rows);

    Ok(Json(ScoresResponse {
        username,
        mode,
        rating: query.rating,
        rows,
        summary,
    }))
}

/// Progress tier for a score: the number of cutoffs at or below it (0-5).
fn cutoff_tier(score: i32) -> u8 {
    CUTOFFS.iter().filter(|c| score >= **c).count() as u8
}

fn summarize(rows: &[ScoreEntry]) -> ScoreSummary {
    let mut played_scores: Vec<i32> = rows.iter().filter_map(|r| r.score).collect();
    played_scores.sort_unstable();

    let mut cutoff_counts = [0usize; 6];
    for score in &played_scores {
        cutoff_counts[cutoff_tier(*score) as usize] += 1;
    }

    ScoreSummary {
        total_charts: rows.len(),
        played: played_scores.len(),
        mean: mean(&played_scores),
        median: median(&played_scores),
        cutoff_counts,
    }
}

fn mean(sorted: &[i32]) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    Some(sorted.iter().map(|s| f64::from(*s)).sum::<f64>() / sorted.len() as f64)
}

/// Median of an already-sorted slice.
fn median(sorted: &[i32]) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Some(f64::from(sorted[mid]))
    } else {
        Some((f64::from(sorted[mid - 1]) + f64::from(sorted[mid])) / 2.0)
    }
}
