//! Client for the 3icecream chart-ranking API.
//!
//! One POST per chart, addressed by the song's external id plus the play
//! mode and difficulty index derived from the chart's difficulty tier.

use crate::data::models::{Difficulty, ScoreRow};
use anyhow::Result;
use serde::Serialize;
use std::time::Duration;
use tracing::warn;

/// Upstream ranking endpoint. Fixed; the service has no other deployments.
const CHART_RANKING_URL: &str = "https://3icecream.com/api/chart_ranking";

/// Per-call timeout. A hung upstream call is treated as a failed call for
/// that chart rather than stalling the whole refresh.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum RankingApiError {
    #[error("ranking request for song {song_id} failed")]
    RequestFailed {
        song_id: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("ranking service returned status {status} for song {song_id}")]
    BadStatus { song_id: String, status: u16 },
}

/// Request body for the chart-ranking endpoint.
#[derive(Debug, Serialize)]
struct ChartRankingRequest<'a> {
    song_id: &'a str,
    #[serde(rename = "SP_or_DP")]
    sp_or_dp: u8,
    difficulty: u8,
}

/// Client for fetching per-chart score rankings.
pub struct RankingApi {
    http: reqwest::Client,
}

impl RankingApi {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { http })
    }

    /// Fetch the full (unranked) score list for one chart.
    ///
    /// A malformed payload degrades to zero usable rows rather than an
    /// error: the upstream occasionally serves partial garbage and one bad
    /// chart must not look like a network failure.
    pub async fn chart_ranking(
        &self,
        song_id: &str,
        difficulty: Difficulty,
    ) -> Result<Vec<ScoreRow>, RankingApiError> {
        let body = ChartRankingRequest {
            song_id,
            sp_or_dp: difficulty.mode().wire_flag(),
            difficulty: difficulty.index(),
        };

        let response = self
            .http
            .post(CHART_RANKING_URL)
            .json(&body)
            .send()
            .await
            .map_err(|source| RankingApiError::RequestFailed {
                song_id: song_id.to_owned(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RankingApiError::BadStatus {
                song_id: song_id.to_owned(),
                status: status.as_u16(),
            });
        }

        let payload: serde_json::Value =
            response
                .json()
                .await
                .map_err(|source| RankingApiError::RequestFailed {
                    song_id: song_id.to_owned(),
                    source,
                })?;

        Ok(decode_rows(payload, song_id))
    }
}

/// Decode a ranking payload leniently: a non-array payload yields zero rows,
/// and individually malformed elements are skipped, both with a warning.
fn decode_rows(payload: serde_json::Value, song_id: &str) -> Vec<ScoreRow> {
    let Some(elements) = payload.as_array() else {
        warn!(song_id, "ranking payload is not an array, treating as empty");
        return Vec::new();
    };

    let total = elements.len();
    let rows: Vec<ScoreRow> = elements
        .iter()
        .filter_map(|element| serde_json::from_value(element.clone()).ok())
        .collect();

    if rows.len() < total {
        warn!(
            song_id,
            skipped = total - rows.len(),
            total,
            "skipped malformed ranking rows"
        );
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_rows_accepts_well_formed_payload() {
        let payload = json!([
            { "username": "PLAYER1", "score": 999_850, "lamp": 6 },
            { "username": "PLAYER2", "score": 987_200, "lamp": 2 },
        ]);
        let rows = decode_rows(payload, "abc123");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].username, "PLAYER1");
        assert_eq!(rows[0].score, 999_850);
        assert_eq!(rows[1].lamp, 2);
    }

    #[test]
    fn decode_rows_treats_non_array_as_empty() {
        assert!(decode_rows(json!({ "error": "maintenance" }), "abc123").is_empty());
        assert!(decode_rows(json!("nope"), "abc123").is_empty());
    }

    #[test]
    fn decode_rows_skips_malformed_elements() {
        let payload = json!([
            { "username": "OK", "score": 900_000, "lamp": 0 },
            { "username": "MISSING_SCORE", "lamp": 1 },
            { "score": 950_000, "lamp": 1 },
            "not even an object",
        ]);
        let rows = decode_rows(payload, "abc123");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].username, "OK");
    }

    #[test]
    fn request_body_uses_upstream_field_names() {
        let body = ChartRankingRequest {
            song_id: "abc123",
            sp_or_dp: 1,
            difficulty: 7,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(
            value,
            json!({ "song_id": "abc123", "SP_or_DP": 1, "difficulty": 7 })
        );
    }
}
