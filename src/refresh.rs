//! The ranking refresh job.
//!
//! Walks the chart table in fixed-size pages, fetches the upstream ranking
//! for every chart, and upserts the results. Chart work runs in a
//! bounded-concurrency pool: page N's charts are in flight while page N+1 is
//! being read, and a join barrier over every outstanding task gates the
//! final recomputation of the ranked view.
//!
//! Failure policy: a chart that still fails after bounded retries is
//! recorded and skipped without touching its siblings; a page read or the
//! rank recomputation failing after retries is fatal to the whole job.

use crate::data::models::{Chart, Difficulty, ScoreRow};
use crate::data::{charts, scores};
use crate::ranking::{RankingApi, RankingApiError};
use anyhow::Result;
use async_trait::async_trait;
use rand::Rng;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Page size used when the trigger doesn't specify one. Large enough to
/// sweep the full chart table in a handful of pages.
pub const DEFAULT_PAGE_SIZE: i64 = 500;

/// Charts fetched/upserted at once across all pages.
const MAX_CONCURRENT_CHARTS: usize = 16;

/// Attempts per chart before it is recorded as failed.
const CHART_ATTEMPTS: u32 = 3;

/// Attempts per page read before the whole job fails.
const PAGE_ATTEMPTS: u32 = 3;

const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// Read access to the chart table and write access to scores.
///
/// Seam between the job and Postgres so the job's control flow is testable
/// without a database.
#[async_trait]
pub trait ChartStore: Send + Sync + 'static {
    async fn list_page(&self, offset: i64, limit: i64) -> Result<Vec<Chart>>;
    async fn upsert_scores(&self, chart_id: Uuid, rows: &[ScoreRow]) -> Result<u64>;
    async fn refresh_rank_view(&self) -> Result<()>;
}

/// Outbound ranking lookups, keyed by a song's external id and difficulty.
#[async_trait]
pub trait RankingClient: Send + Sync + 'static {
    async fn chart_ranking(
        &self,
        song_id: &str,
        difficulty: Difficulty,
    ) -> Result<Vec<ScoreRow>, RankingApiError>;
}

/// Production store backed by the Postgres pool.
pub struct PgChartStore {
    pool: PgPool,
}

impl PgChartStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChartStore for PgChartStore {
    async fn list_page(&self, offset: i64, limit: i64) -> Result<Vec<Chart>> {
        charts::list_page(&self.pool, offset, limit).await
    }

    async fn upsert_scores(&self, chart_id: Uuid, rows: &[ScoreRow]) -> Result<u64> {
        scores::batch_upsert(&self.pool, chart_id, rows).await
    }

    async fn refresh_rank_view(&self) -> Result<()> {
        scores::refresh_rank_view(&self.pool).await
    }
}

#[async_trait]
impl RankingClient for RankingApi {
    async fn chart_ranking(
        &self,
        song_id: &str,
        difficulty: Difficulty,
    ) -> Result<Vec<ScoreRow>, RankingApiError> {
        RankingApi::chart_ranking(self, song_id, difficulty).await
    }
}

/// Parameters for one refresh run, both overridable from the trigger.
#[derive(Debug, Clone, Copy)]
pub struct RefreshParams {
    /// Starting row offset into the chart table.
    pub offset: i64,
    pub page_size: i64,
}

impl Default for RefreshParams {
    fn default() -> Self {
        Self {
            offset: 0,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Summary of a completed refresh run.
#[derive(Debug, Default)]
pub struct RefreshOutcome {
    /// Non-empty pages read.
    pub pages: u64,
    /// Charts whose scores were fetched and upserted.
    pub charts_processed: u64,
    /// Labels of charts that exhausted their retries.
    pub charts_failed: Vec<String>,
    pub rows_upserted: u64,
}

/// Fatal refresh failures; per-chart failures are carried in the outcome
/// instead.
#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    #[error("failed to read chart page at offset {offset}")]
    Pagination {
        offset: i64,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to recompute the ranked score view ({charts_failed} charts had already failed)")]
    RankRefresh {
        charts_failed: usize,
        #[source]
        source: anyhow::Error,
    },
}

impl RefreshError {
    /// Which step of the job failed, for the trigger's error payload.
    pub fn step(&self) -> &'static str {
        match self {
            RefreshError::Pagination { .. } => "pagination",
            RefreshError::RankRefresh { .. } => "rank_refresh",
        }
    }

    pub fn charts_failed(&self) -> usize {
        match self {
            RefreshError::Pagination { .. } => 0,
            RefreshError::RankRefresh { charts_failed, .. } => *charts_failed,
        }
    }
}

/// Result of one chart's fetch-and-upsert task.
struct ChartOutcome {
    label: String,
    rows_upserted: u64,
    failed: bool,
}

/// Orchestrates pagination, per-chart fan-out, and the final rank refresh.
pub struct RefreshJob<S, C> {
    store: Arc<S>,
    client: Arc<C>,
}

impl<S: ChartStore, C: RankingClient> RefreshJob<S, C> {
    pub fn new(store: Arc<S>, client: Arc<C>) -> Self {
        Self { store, client }
    }

    /// Run a full refresh pass.
    ///
    /// The rank view is recomputed exactly once, strictly after every
    /// chart's upsert has completed, regardless of per-chart failures.
    pub async fn run(&self, params: RefreshParams) -> Result<RefreshOutcome, RefreshError> {
        let page_size = params.page_size.max(1);
        let limiter = Arc::new(Semaphore::new(MAX_CONCURRENT_CHARTS));
        let mut tasks: JoinSet<ChartOutcome> = JoinSet::new();

        let mut outcome = RefreshOutcome::default();
        let mut offset = params.offset.max(0);

        loop {
            let page = self.fetch_page_with_retry(offset, page_size).await?;
            if page.is_empty() {
                break;
            }

            debug!(
                offset,
                count = page.len(),
                "chart page fetched, dispatching"
            );
            outcome.pages += 1;

            for chart in page {
                let store = self.store.clone();
                let client = self.client.clone();
                let limiter = limiter.clone();
                tasks.spawn(async move {
                    let permit = match limiter.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => {
                            // Semaphore is never closed while tasks are live.
                            return ChartOutcome {
                                label: chart.label(),
                                rows_upserted: 0,
                                failed: true,
                            };
                        }
                    };
                    let result = process_chart(&*store, &*client, &chart).await;
                    drop(permit);
                    result
                });
            }

            // The next page read proceeds while this page's charts are
            // still in flight.
            offset += page_size;
        }

        // Join barrier: every upsert must complete before the rank refresh.
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(chart_outcome) => {
                    if chart_outcome.failed {
                        outcome.charts_failed.push(chart_outcome.label);
                    } else {
                        outcome.charts_processed += 1;
                        outcome.rows_upserted += chart_outcome.rows_upserted;
                    }
                }
                Err(e) => {
                    error!(error = ?e, "chart task aborted");
                    outcome.charts_failed.push("(task aborted)".to_owned());
                }
            }
        }

        if let Err(source) = self.store.refresh_rank_view().await {
            return Err(RefreshError::RankRefresh {
                charts_failed: outcome.charts_failed.len(),
                source,
            });
        }

        info!(
            pages = outcome.pages,
            charts = outcome.charts_processed,
            failed = outcome.charts_failed.len(),
            rows = outcome.rows_upserted,
            "refresh complete, rank view recomputed"
        );
        Ok(outcome)
    }

    async fn fetch_page_with_retry(
        &self,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Chart>, RefreshError> {
        let mut attempt = 1;
        loop {
            match self.store.list_page(offset, limit).await {
                Ok(page) => return Ok(page),
                Err(source) if attempt >= PAGE_ATTEMPTS => {
                    return Err(RefreshError::Pagination { offset, source });
                }
                Err(e) => {
                    warn!(
                        offset,
                        attempt,
                        max_attempts = PAGE_ATTEMPTS,
                        error = ?e,
                        "chart page read failed, retrying"
                    );
                    time::sleep(backoff_delay(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Fetch one chart's ranking and upsert it, with bounded retries.
///
/// Each attempt covers the fetch+upsert unit so a write failure re-fetches
/// rather than re-using a stale response. Exhausting retries marks the
/// chart failed; siblings are unaffected.
async fn process_chart<S: ChartStore + ?Sized, C: RankingClient + ?Sized>(
    store: &S,
    client: &C,
    chart: &Chart,
) -> ChartOutcome {
    let label = chart.label();

    for attempt in 1..=CHART_ATTEMPTS {
        let result = async {
            let rows = client
                .chart_ranking(&chart.song_id, chart.difficulty)
                .await?;
            let written = if rows.is_empty() {
                0
            } else {
                store.upsert_scores(chart.id, &rows).await?
            };
            Ok::<u64, anyhow::Error>(written)
        }
        .await;

        match result {
            Ok(rows_upserted) => {
                debug!(chart = %label, rows = rows_upserted, "chart refreshed");
                return ChartOutcome {
                    label,
                    rows_upserted,
                    failed: false,
                };
            }
            Err(e) if attempt < CHART_ATTEMPTS => {
                warn!(
                    chart = %label,
                    attempt,
                    max_attempts = CHART_ATTEMPTS,
                    error = ?e,
                    "chart refresh failed, retrying"
                );
                time::sleep(backoff_delay(attempt)).await;
            }
            Err(e) => {
                error!(chart = %label, error = ?e, "chart refresh failed permanently");
            }
        }
    }

    ChartOutcome {
        label,
        rows_upserted: 0,
        failed: true,
    }
}

/// Exponential backoff with jitter: 500ms, 1s, 2s... plus up to half again.
fn backoff_delay(attempt: u32) -> Duration {
    let base = RETRY_BASE_DELAY * 2u32.saturating_pow(attempt.saturating_sub(1));
    let jitter_ms = rand::rng().random_range(0..=base.as_millis() as u64 / 2);
    base + Duration::from_millis(jitter_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Everything the mocks record, in call order.
    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        Page { offset: i64, limit: i64 },
        Upsert { chart_id: Uuid },
        RankRefresh,
    }

    #[derive(Default)]
    struct MockStore {
        charts: Vec<Chart>,
        events: Mutex<Vec<Event>>,
        /// (chart_id, username) -> (score, lamp); mirrors the upsert key.
        stored: Mutex<HashMap<(Uuid, String), (i32, i16)>>,
        fail_pages: bool,
        fail_rank_refresh: bool,
    }

    impl MockStore {
        fn with_charts(charts: Vec<Chart>) -> Self {
            Self {
                charts,
                ..Default::default()
            }
        }

        fn events(&self) -> Vec<Event> {
            self.events.lock().unwrap().clone()
        }

        fn upsert_count(&self) -> usize {
            self.events()
                .iter()
                .filter(|e| matches!(e, Event::Upsert { .. }))
                .count()
        }

        fn page_offsets(&self) -> Vec<i64> {
            self.events()
                .iter()
                .filter_map(|e| match e {
                    Event::Page { offset, .. } => Some(*offset),
                    _ => None,
                })
                .collect()
        }
    }

    #[async_trait]
    impl ChartStore for MockStore {
        async fn list_page(&self, offset: i64, limit: i64) -> Result<Vec<Chart>> {
            self.events
                .lock()
                .unwrap()
                .push(Event::Page { offset, limit });
            if self.fail_pages {
                anyhow::bail!("connection refused");
            }
            let start = (offset.max(0) as usize).min(self.charts.len());
            let end = (start + limit as usize).min(self.charts.len());
            Ok(self.charts[start..end].to_vec())
        }

        async fn upsert_scores(&self, chart_id: Uuid, rows: &[ScoreRow]) -> Result<u64> {
            self.events.lock().unwrap().push(Event::Upsert { chart_id });
            let mut stored = self.stored.lock().unwrap();
            for row in rows {
                stored.insert((chart_id, row.username.clone()), (row.score, row.lamp));
            }
            Ok(rows.len() as u64)
        }

        async fn refresh_rank_view(&self) -> Result<()> {
            self.events.lock().unwrap().push(Event::RankRefresh);
            if self.fail_rank_refresh {
                anyhow::bail!("refresh_scores_with_rank() raised");
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockClient {
        /// song_id -> response rows.
        responses: Mutex<HashMap<String, Vec<ScoreRow>>>,
        /// Song ids whose calls always fail.
        failing: Vec<String>,
        /// Song id whose call sleeps before responding.
        slow: Option<(String, Duration)>,
        calls: Mutex<Vec<String>>,
    }

    impl MockClient {
        fn respond(&self, song_id: &str, rows: Vec<ScoreRow>) {
            self.responses
                .lock()
                .unwrap()
                .insert(song_id.to_owned(), rows);
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl RankingClient for MockClient {
        async fn chart_ranking(
            &self,
            song_id: &str,
            _difficulty: Difficulty,
        ) -> Result<Vec<ScoreRow>, RankingApiError> {
            self.calls.lock().unwrap().push(song_id.to_owned());
            if let Some((slow_id, delay)) = &self.slow {
                if slow_id == song_id {
                    time::sleep(*delay).await;
                }
            }
            if self.failing.iter().any(|id| id == song_id) {
                return Err(RankingApiError::BadStatus {
                    song_id: song_id.to_owned(),
                    status: 503,
                });
            }
            Ok(self
                .responses
                .lock()
                .unwrap()
                .get(song_id)
                .cloned()
                .unwrap_or_default())
        }
    }

    fn make_chart(n: u32, difficulty: Difficulty) -> Chart {
        Chart {
            id: Uuid::new_v4(),
            difficulty,
            rating: 14,
            song_id: format!("song-{n}"),
            song_name: format!("Song {n}"),
        }
    }

    fn row(username: &str, score: i32, lamp: i16) -> ScoreRow {
        ScoreRow {
            username: username.to_owned(),
            score,
            lamp,
        }
    }

    fn params(offset: i64, page_size: i64) -> RefreshParams {
        RefreshParams { offset, page_size }
    }

    #[tokio::test(start_paused = true)]
    async fn end_to_end_three_charts_page_size_two() {
        let charts: Vec<Chart> = (0..3).map(|n| make_chart(n, Difficulty::ESP)).collect();
        let store = Arc::new(MockStore::with_charts(charts.clone()));
        let client = Arc::new(MockClient::default());
        for chart in &charts {
            client.respond(&chart.song_id, vec![row("PLAYER", 990_000, 4)]);
        }

        let outcome = RefreshJob::new(store.clone(), client.clone())
            .run(params(0, 2))
            .await
            .unwrap();

        // Offsets [0,2) then [2,4) (one chart) then [4,6) (empty, stop).
        assert_eq!(store.page_offsets(), vec![0, 2, 4]);
        assert_eq!(outcome.pages, 2);
        assert_eq!(outcome.charts_processed, 3);
        assert!(outcome.charts_failed.is_empty());
        assert_eq!(client.call_count(), 3);
        assert!(store.upsert_count() <= 3);

        // Recompute exactly once, strictly after every upsert.
        let events = store.events();
        let refreshes: Vec<usize> = events
            .iter()
            .enumerate()
            .filter_map(|(i, e)| (*e == Event::RankRefresh).then_some(i))
            .collect();
        assert_eq!(refreshes.len(), 1);
        assert_eq!(refreshes[0], events.len() - 1);
    }

    #[tokio::test]
    async fn pagination_visits_every_chart_exactly_once() {
        let charts: Vec<Chart> = (0..5).map(|n| make_chart(n, Difficulty::BSP)).collect();
        let store = Arc::new(MockStore::with_charts(charts));
        let client = Arc::new(MockClient::default());

        let outcome = RefreshJob::new(store.clone(), client.clone())
            .run(params(0, 2))
            .await
            .unwrap();

        assert_eq!(store.page_offsets(), vec![0, 2, 4, 6]);
        assert_eq!(outcome.pages, 3);
        assert_eq!(outcome.charts_processed, 5);

        let mut calls = client.calls.lock().unwrap().clone();
        calls.sort();
        calls.dedup();
        assert_eq!(calls.len(), 5);
    }

    #[tokio::test]
    async fn empty_chart_table_terminates_immediately() {
        let store = Arc::new(MockStore::with_charts(Vec::new()));
        let client = Arc::new(MockClient::default());

        let outcome = RefreshJob::new(store.clone(), client.clone())
            .run(RefreshParams::default())
            .await
            .unwrap();

        assert_eq!(outcome.pages, 0);
        assert_eq!(outcome.charts_processed, 0);
        assert_eq!(client.call_count(), 0);
        // A refresh pass still leaves the view consistent with storage.
        assert_eq!(store.events().last(), Some(&Event::RankRefresh));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_chart_does_not_abort_siblings() {
        let charts: Vec<Chart> = (0..4).map(|n| make_chart(n, Difficulty::CSP)).collect();
        let store = Arc::new(MockStore::with_charts(charts.clone()));
        let mut client = MockClient::default();
        client.failing.push(charts[1].song_id.clone());
        for chart in &charts {
            client.respond(&chart.song_id, vec![row("PLAYER", 950_000, 2)]);
        }
        let client = Arc::new(client);

        let outcome = RefreshJob::new(store.clone(), client.clone())
            .run(params(0, 2))
            .await
            .unwrap();

        assert_eq!(outcome.charts_processed, 3);
        assert_eq!(outcome.charts_failed, vec![charts[1].label()]);
        assert_eq!(store.upsert_count(), 3);
        // The failing chart was retried up to the attempt limit.
        let failing_calls = client
            .calls
            .lock()
            .unwrap()
            .iter()
            .filter(|id| **id == charts[1].song_id)
            .count();
        assert_eq!(failing_calls, 3);
        // Per-chart failure never blocks the final recompute.
        assert_eq!(store.events().last(), Some(&Event::RankRefresh));
    }

    #[tokio::test(start_paused = true)]
    async fn rank_refresh_waits_for_slow_chart() {
        let charts: Vec<Chart> = (0..3).map(|n| make_chart(n, Difficulty::EDP)).collect();
        let store = Arc::new(MockStore::with_charts(charts.clone()));
        let mut client = MockClient::default();
        client.slow = Some((charts[2].song_id.clone(), Duration::from_secs(30)));
        for chart in &charts {
            client.respond(&chart.song_id, vec![row("PLAYER", 999_500, 5)]);
        }
        let client = Arc::new(client);

        let outcome = RefreshJob::new(store.clone(), client)
            .run(params(0, 2))
            .await
            .unwrap();
        assert_eq!(outcome.charts_processed, 3);

        let events = store.events();
        let slow_upsert = events
            .iter()
            .position(|e| {
                *e == Event::Upsert {
                    chart_id: charts[2].id,
                }
            })
            .expect("slow chart was upserted");
        let refresh = events
            .iter()
            .position(|e| *e == Event::RankRefresh)
            .expect("rank view was refreshed");
        assert!(slow_upsert < refresh);
        assert_eq!(refresh, events.len() - 1);
    }

    #[tokio::test(start_paused = true)]
    async fn page_read_failure_is_fatal_after_bounded_retries() {
        let mut store = MockStore::with_charts(vec![make_chart(0, Difficulty::DSP)]);
        store.fail_pages = true;
        let store = Arc::new(store);
        let client = Arc::new(MockClient::default());

        let err = RefreshJob::new(store.clone(), client)
            .run(RefreshParams::default())
            .await
            .unwrap_err();

        assert_eq!(err.step(), "pagination");
        assert_eq!(store.page_offsets().len(), PAGE_ATTEMPTS as usize);
        // Fatal pagination failure: the view is left as-is.
        assert!(!store.events().contains(&Event::RankRefresh));
    }

    #[tokio::test]
    async fn rank_refresh_failure_is_fatal_and_distinct() {
        let charts = vec![make_chart(0, Difficulty::bSP)];
        let mut store = MockStore::with_charts(charts.clone());
        store.fail_rank_refresh = true;
        let store = Arc::new(store);
        let client = Arc::new(MockClient::default());
        client.respond(&charts[0].song_id, vec![row("PLAYER", 901_000, 1)]);

        let err = RefreshJob::new(store, client)
            .run(RefreshParams::default())
            .await
            .unwrap_err();

        assert_eq!(err.step(), "rank_refresh");
        assert_eq!(err.charts_failed(), 0);
    }

    #[tokio::test]
    async fn second_run_overwrites_on_the_composite_key() {
        let charts = vec![make_chart(0, Difficulty::ESP)];
        let store = Arc::new(MockStore::with_charts(charts.clone()));
        let client = Arc::new(MockClient::default());
        let job = RefreshJob::new(store.clone(), client.clone());

        client.respond(&charts[0].song_id, vec![row("PLAYER", 950_000, 2)]);
        job.run(RefreshParams::default()).await.unwrap();

        client.respond(&charts[0].song_id, vec![row("PLAYER", 975_000, 4)]);
        job.run(RefreshParams::default()).await.unwrap();

        let stored = store.stored.lock().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(
            stored.get(&(charts[0].id, "PLAYER".to_owned())),
            Some(&(975_000, 4))
        );
    }

    #[tokio::test]
    async fn unchanged_upstream_data_is_a_no_op_in_effect() {
        let charts = vec![make_chart(0, Difficulty::ESP)];
        let store = Arc::new(MockStore::with_charts(charts.clone()));
        let client = Arc::new(MockClient::default());
        client.respond(
            &charts[0].song_id,
            vec![row("A", 999_000, 5), row("B", 980_500, 3)],
        );
        let job = RefreshJob::new(store.clone(), client);

        job.run(RefreshParams::default()).await.unwrap();
        let first = store.stored.lock().unwrap().clone();

        job.run(RefreshParams::default()).await.unwrap();
        let second = store.stored.lock().unwrap().clone();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn empty_ranking_response_skips_the_upsert() {
        let charts = vec![make_chart(0, Difficulty::DDP)];
        let store = Arc::new(MockStore::with_charts(charts));
        let client = Arc::new(MockClient::default());

        let outcome = RefreshJob::new(store.clone(), client)
            .run(RefreshParams::default())
            .await
            .unwrap();

        assert_eq!(outcome.charts_processed, 1);
        assert_eq!(outcome.rows_upserted, 0);
        assert_eq!(store.upsert_count(), 0);
    }

    #[tokio::test]
    async fn starting_offset_skips_earlier_charts() {
        let charts: Vec<Chart> = (0..4).map(|n| make_chart(n, Difficulty::BDP)).collect();
        let store = Arc::new(MockStore::with_charts(charts));
        let client = Arc::new(MockClient::default());

        let outcome = RefreshJob::new(store.clone(), client.clone())
            .run(params(2, 2))
            .await
            .unwrap();

        assert_eq!(store.page_offsets(), vec![2, 4]);
        assert_eq!(outcome.charts_processed, 2);
        assert_eq!(client.call_count(), 2);
    }
}
