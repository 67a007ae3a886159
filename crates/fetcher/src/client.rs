//! The upstream client. One instance serves one load task and owns its
//! own pacing timer, UA/auth fallback flags, and running statistics.

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, AUTHORIZATION, USER_AGENT};
use serde::Serialize;
use serde_json::{json, Value};

use vh_auth::{AuthRegistry, PURPOSE_DOWNLOAD};
use vh_domain::config::ApiConfig;
use vh_domain::{Error, Result};
use vh_store::Store;

use crate::backoff::Backoff;
use crate::params::{max_pages_hint, normalize_filter_params};

/// Fallback User-Agent applied once after the first HTTP 400.
const SAFE_BROWSER_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// A page with fewer items than this is treated as the last one.
const LAST_PAGE_THRESHOLD: usize = 50;

/// Upstream hard cap on addressable results (pages of 100).
const UPSTREAM_PAGE_CAP: u32 = 2000;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Reports
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct FetchChunkParams {
    pub page_start: u32,
    /// Exclusive upper bound.
    pub page_end: u32,
    pub filter: Value,
    pub task_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PageError {
    pub page: u32,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChunkReport {
    /// Records that were new or changed (unchanged saves do not count).
    pub loaded_count: u64,
    pub processed_pages: u32,
    pub errors: Vec<PageError>,
    /// Last page fetched successfully; `page_start - 1` when none were.
    pub last_page: i64,
    pub stats: FetchStats,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FetchStats {
    pub requests_made: u64,
    pub vacancies_loaded: u64,
    pub errors_count: u64,
    pub pages_processed: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fetcher
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Fetcher {
    client: reqwest::Client,
    base_url: String,
    store: Arc<Store>,
    auth: Arc<AuthRegistry>,
    user_agent: String,
    /// Current Authorization header value; dropped once on 401/403.
    auth_header: Option<String>,
    auth_provider: Option<String>,
    min_delay: Duration,
    max_retries: u32,
    backoff_base: Duration,
    last_request: Option<Instant>,
    ua_fallback_used: bool,
    auth_drop_used: bool,
    stats: FetchStats,
}

impl Fetcher {
    pub fn new(config: &ApiConfig, store: Arc<Store>, auth: Arc<AuthRegistry>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Transport(format!("building HTTP client: {e}")))?;

        let auth_header = auth
            .headers(PURPOSE_DOWNLOAD)
            .remove("Authorization");
        let auth_provider = auth.choose_provider(PURPOSE_DOWNLOAD).map(|p| p.name);
        if let Some(name) = &auth_provider {
            tracing::debug!(provider = %name, "fetcher using auth provider");
        }

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            store,
            auth,
            user_agent: config.user_agent.clone(),
            auth_header,
            auth_provider,
            min_delay: Duration::from_secs_f64(config.rate_limit_delay_sec.max(1.0)),
            max_retries: config.max_retries,
            backoff_base: Duration::from_secs(1),
            last_request: None,
            ua_fallback_used: false,
            auth_drop_used: false,
            stats: FetchStats::default(),
        })
    }

    pub fn stats(&self) -> &FetchStats {
        &self.stats
    }

    /// Fetch pages `[page_start, page_end)` for one filter, persisting
    /// every record and reporting progress after each page.
    ///
    /// Request-level errors on a page are recorded and the loop moves on;
    /// anything else (store failures, malformed payloads) ends the chunk
    /// early with the partial counts intact.
    pub async fn fetch_chunk(&mut self, params: FetchChunkParams) -> ChunkReport {
        let filter_id = params
            .filter
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_owned);

        let mut page_end = params.page_end;
        if let Some(max_pages) = max_pages_hint(&params.filter) {
            page_end = page_end.min(params.page_start + max_pages);
        }

        let mut loaded_count = 0u64;
        let mut processed_pages = 0u32;
        let mut errors = Vec::new();
        let mut last_page = i64::from(params.page_start) - 1;

        tracing::debug!(
            page_start = params.page_start,
            page_end,
            filter_id = filter_id.as_deref().unwrap_or("-"),
            "starting chunk"
        );

        for page in params.page_start..page_end {
            let items = match self.fetch_page(&params.filter, page).await {
                Ok(items) => items,
                Err(e) if matches!(
                    e,
                    Error::Transport(_)
                        | Error::UpstreamRejected { .. }
                        | Error::UpstreamServer { .. }
                ) =>
                {
                    tracing::error!(page, error = %e, "page fetch failed, continuing chunk");
                    errors.push(PageError {
                        page,
                        error: e.to_string(),
                    });
                    self.stats.errors_count += 1;
                    continue;
                }
                Err(e) => {
                    tracing::error!(page, error = %e, "unexpected error, aborting chunk");
                    errors.push(PageError {
                        page,
                        error: e.to_string(),
                    });
                    self.stats.errors_count += 1;
                    break;
                }
            };

            if items.is_empty() {
                tracing::debug!(page, "empty page, stopping chunk");
                break;
            }

            let mut saved = 0u64;
            for item in &items {
                match self.store.save_vacancy(item, filter_id.as_deref()) {
                    Ok(outcome) if outcome.changed() => {
                        saved += 1;
                        self.stats.vacancies_loaded += 1;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::error!(
                            hh_id = item.get("id").and_then(serde_json::Value::as_str).unwrap_or("?"),
                            error = %e,
                            "failed to save vacancy"
                        );
                        self.stats.errors_count += 1;
                    }
                }
            }

            loaded_count += saved;
            processed_pages += 1;
            last_page = i64::from(page);
            self.stats.pages_processed += 1;

            if let Some(task_id) = &params.task_id {
                self.report_progress(task_id, page, params.page_start, page_end, processed_pages, loaded_count);
            }

            if items.len() < LAST_PAGE_THRESHOLD {
                tracing::debug!(page, count = items.len(), "short page, stopping chunk");
                break;
            }
        }

        tracing::info!(
            loaded_count,
            processed_pages,
            errors = errors.len(),
            "chunk completed"
        );

        ChunkReport {
            loaded_count,
            processed_pages,
            errors,
            last_page,
            stats: self.stats.clone(),
        }
    }

    /// One minimal query against the upstream to size a filter: pages of
    /// 100, bounded by the upstream result cap. Falls back to a small
    /// default when the probe fails.
    pub async fn estimate_total_pages(&mut self, filter: &Value) -> u32 {
        let mut query = vec![
            ("page".to_string(), "0".to_string()),
            ("per_page".to_string(), "1".to_string()),
        ];
        query.extend(normalize_filter_params(filter));

        match self.get_json("/vacancies", &query).await {
            Ok(body) => {
                let found = body.get("found").and_then(Value::as_u64).unwrap_or(0);
                let pages = found.div_ceil(100) as u32;
                pages.min(UPSTREAM_PAGE_CAP)
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to estimate pages, assuming 20");
                20
            }
        }
    }

    /// Fetch one employer; 404 yields `None`, success persists the payload.
    pub async fn fetch_employer(&mut self, hh_id: &str) -> Result<Option<Value>> {
        match self.get_json(&format!("/employers/{hh_id}"), &[]).await {
            Ok(payload) => {
                self.store.save_employer(&payload).map_err(vh_domain::Error::from)?;
                Ok(Some(payload))
            }
            Err(Error::UpstreamRejected { status: 404 }) => {
                tracing::debug!(hh_id, "employer not found");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    // ── Internals ─────────────────────────────────────────────────────

    async fn fetch_page(&mut self, filter: &Value, page: u32) -> Result<Vec<Value>> {
        let mut query = vec![
            ("page".to_string(), page.to_string()),
            ("per_page".to_string(), "100".to_string()),
        ];
        query.extend(normalize_filter_params(filter));

        let body = self.get_json("/vacancies", &query).await?;
        let items = body
            .get("items")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        tracing::debug!(
            page,
            count = items.len(),
            found = body.get("found").and_then(serde_json::Value::as_u64).unwrap_or(0),
            "page fetched"
        );
        Ok(items)
    }

    /// GET with pacing, backoff retries, the one-shot UA fallback on 400,
    /// and the one-shot auth drop (plus provider failure) on 401/403.
    async fn get_json(&mut self, path: &str, query: &[(String, String)]) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let mut backoff = Backoff::new(self.backoff_base, self.max_retries, true);

        loop {
            self.pace().await;
            let error = match self.attempt(&url, query).await {
                Ok(body) => return Ok(body),
                Err(e) => e,
            };

            match &error {
                Error::UpstreamRejected { status: 400 } if !self.ua_fallback_used => {
                    self.ua_fallback_used = true;
                    tracing::warn!(
                        from = %self.user_agent,
                        "HTTP 400, switching to safe browser User-Agent and retrying"
                    );
                    self.user_agent = SAFE_BROWSER_UA.to_string();
                    continue;
                }
                Error::UpstreamRejected { status }
                    if matches!(status, 401 | 403)
                        && self.auth_header.is_some()
                        && !self.auth_drop_used =>
                {
                    self.auth_drop_used = true;
                    self.auth_header = None;
                    if let Some(name) = self.auth_provider.clone() {
                        self.auth.mark_provider_failed(&name);
                    }
                    tracing::warn!(
                        status,
                        "dropping Authorization header and retrying unauthenticated"
                    );
                    continue;
                }
                Error::UpstreamRejected { status: 429 } => {
                    // Extra cooldown on top of the backoff delay.
                    tracing::warn!("rate limited by upstream, extra sleep");
                    tokio::time::sleep(self.backoff_base.saturating_mul(5)).await;
                }
                _ => {}
            }

            if backoff.should_retry(&error) {
                let delay = backoff.wait_and_increment().await;
                tracing::warn!(
                    error = %error,
                    retry = backoff.retry_count(),
                    delay_ms = delay.as_millis() as u64,
                    "retrying upstream request"
                );
                continue;
            }
            return Err(error);
        }
    }

    async fn attempt(&mut self, url: &str, query: &[(String, String)]) -> Result<Value> {
        let mut request = self
            .client
            .get(url)
            .query(query)
            .header(USER_AGENT, &self.user_agent)
            .header(ACCEPT, "application/json")
            .header(ACCEPT_LANGUAGE, "ru");
        if let Some(auth) = &self.auth_header {
            request = request.header(AUTHORIZATION, auth);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        self.stats.requests_made += 1;

        let status = response.status();
        if status.is_success() {
            response
                .json()
                .await
                .map_err(|e| Error::Transport(format!("invalid JSON body: {e}")))
        } else if status.is_server_error() {
            Err(Error::UpstreamServer {
                status: status.as_u16(),
            })
        } else {
            Err(Error::UpstreamRejected {
                status: status.as_u16(),
            })
        }
    }

    async fn pace(&mut self) {
        if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            if elapsed < self.min_delay {
                tokio::time::sleep(self.min_delay - elapsed).await;
            }
        }
        self.last_request = Some(Instant::now());
    }

    fn report_progress(
        &self,
        task_id: &str,
        page: u32,
        page_start: u32,
        page_end: u32,
        processed_pages: u32,
        loaded_count: u64,
    ) {
        let progress = json!({
            "current_page": page,
            "pages_processed": processed_pages,
            "vacancies_loaded": loaded_count,
            "chunk_progress": format!("{}/{}", page - page_start + 1, page_end - page_start),
            "stats": self.stats,
        });
        if let Err(e) = self.store.update_task_progress(task_id, &progress) {
            tracing::error!(task_id, error = %e, "failed to update task progress");
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn listing(id: usize) -> Value {
        json!({
            "id": format!("v{id}"),
            "name": format!("Vacancy {id}"),
            "employer": {"id": "e1", "name": "Acme"},
            "area": {"name": "Moscow"},
            "published_at": "2024-06-01T10:00:00+0300",
            "alternate_url": format!("https://example/vacancy/{id}")
        })
    }

    fn page_body(count: usize, found: u64) -> Value {
        json!({
            "items": (0..count).map(listing).collect::<Vec<_>>(),
            "found": found,
            "pages": found.div_ceil(100),
        })
    }

    fn page_body_offset(offset: usize, count: usize, found: u64) -> Value {
        json!({
            "items": (offset..offset + count).map(listing).collect::<Vec<_>>(),
            "found": found,
            "pages": found.div_ceil(100),
        })
    }

    async fn fetcher_for(server: &MockServer) -> (Fetcher, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            Store::open_at(&dir.path().join("test.sqlite3"), 5, true).unwrap(),
        );
        let config = ApiConfig {
            base_url: server.uri(),
            user_agent: "test-agent/1.0".into(),
            max_retries: 4,
            rate_limit_delay_sec: 1.0,
        };
        let mut fetcher =
            Fetcher::new(&config, store, Arc::new(AuthRegistry::empty())).unwrap();
        // Tests run against a local stub: no pacing, millisecond backoff.
        fetcher.min_delay = Duration::ZERO;
        fetcher.backoff_base = Duration::from_millis(2);
        (fetcher, dir)
    }

    fn chunk(filter: Value) -> FetchChunkParams {
        FetchChunkParams {
            page_start: 0,
            page_end: 10,
            filter,
            task_id: None,
        }
    }

    #[tokio::test]
    async fn full_page_then_short_page_stops_the_chunk() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/vacancies"))
            .and(query_param("page", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page_body(100, 120)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/vacancies"))
            .and(query_param("page", "1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(page_body_offset(100, 20, 120)),
            )
            .mount(&server)
            .await;

        let (mut fetcher, _dir) = fetcher_for(&server).await;
        let report = fetcher
            .fetch_chunk(chunk(json!({"id": "f1", "params": {"text": "rust"}})))
            .await;

        assert_eq!(report.loaded_count, 120);
        assert_eq!(report.processed_pages, 2);
        assert_eq!(report.last_page, 1);
        assert!(report.errors.is_empty());
        assert_eq!(fetcher.store.count_vacancies().unwrap(), 120);
    }

    #[tokio::test]
    async fn rerun_against_same_data_loads_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/vacancies"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page_body(20, 20)))
            .mount(&server)
            .await;

        let (mut fetcher, _dir) = fetcher_for(&server).await;
        let filter = json!({"id": "f1", "params": {"text": "rust"}});
        let first = fetcher.fetch_chunk(chunk(filter.clone())).await;
        assert_eq!(first.loaded_count, 20);

        let second = fetcher.fetch_chunk(chunk(filter)).await;
        assert_eq!(second.loaded_count, 0);
        assert_eq!(fetcher.store.count_vacancies().unwrap(), 20);
    }

    #[tokio::test]
    async fn empty_page_stops_immediately() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/vacancies"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page_body(0, 0)))
            .mount(&server)
            .await;

        let (mut fetcher, _dir) = fetcher_for(&server).await;
        let report = fetcher.fetch_chunk(chunk(json!({"id": "f1"}))).await;
        assert_eq!(report.loaded_count, 0);
        assert_eq!(report.processed_pages, 0);
        assert_eq!(report.last_page, -1);
    }

    #[tokio::test]
    async fn http_400_triggers_one_shot_safe_ua_fallback() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/vacancies"))
            .respond_with(ResponseTemplate::new(400))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/vacancies"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page_body(10, 10)))
            .mount(&server)
            .await;

        let (mut fetcher, _dir) = fetcher_for(&server).await;
        let report = fetcher.fetch_chunk(chunk(json!({"id": "f1"}))).await;

        assert_eq!(report.loaded_count, 10);
        assert!(fetcher.ua_fallback_used);
        assert_eq!(fetcher.user_agent, SAFE_BROWSER_UA);

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 2);
        let second_ua = requests[1].headers.get("user-agent").unwrap();
        assert_eq!(second_ua.to_str().unwrap(), SAFE_BROWSER_UA);
    }

    #[tokio::test]
    async fn http_403_drops_auth_header_and_marks_provider_failed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/vacancies"))
            .respond_with(ResponseTemplate::new(403))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/vacancies"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page_body(5, 5)))
            .mount(&server)
            .await;

        let (mut fetcher, _dir) = fetcher_for(&server).await;
        // Simulate a configured provider.
        fetcher.auth_header = Some("Bearer stale-token".into());
        fetcher.auth_provider = Some("primary".into());

        let report = fetcher.fetch_chunk(chunk(json!({"id": "f1"}))).await;
        assert_eq!(report.loaded_count, 5);
        assert!(fetcher.auth_drop_used);
        assert!(fetcher.auth_header.is_none());

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].headers.get("authorization").is_some());
        assert!(requests[1].headers.get("authorization").is_none());
    }

    #[tokio::test]
    async fn server_errors_are_retried_until_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/vacancies"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/vacancies"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page_body(3, 3)))
            .mount(&server)
            .await;

        let (mut fetcher, _dir) = fetcher_for(&server).await;
        let report = fetcher.fetch_chunk(chunk(json!({"id": "f1"}))).await;

        assert_eq!(report.loaded_count, 3);
        assert!(report.errors.is_empty());
        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_record_a_page_error_and_continue() {
        let server = MockServer::start().await;
        // Page 0 always fails; page 1 succeeds with a short page.
        Mock::given(method("GET"))
            .and(path("/vacancies"))
            .and(query_param("page", "0"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/vacancies"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page_body(4, 4)))
            .mount(&server)
            .await;

        let (mut fetcher, _dir) = fetcher_for(&server).await;
        let mut params = chunk(json!({"id": "f1"}));
        params.page_end = 2;
        let report = fetcher.fetch_chunk(params).await;

        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].page, 0);
        assert_eq!(report.loaded_count, 4);
        assert_eq!(report.processed_pages, 1);
    }

    #[tokio::test]
    async fn max_pages_hint_limits_the_chunk() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/vacancies"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page_body(100, 1000)))
            .mount(&server)
            .await;

        let (mut fetcher, _dir) = fetcher_for(&server).await;
        let report = fetcher
            .fetch_chunk(chunk(json!({"id": "f1", "params": {"max_pages": 2}})))
            .await;
        assert_eq!(report.processed_pages, 2);
    }

    #[tokio::test]
    async fn progress_is_written_for_every_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/vacancies"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page_body(10, 10)))
            .mount(&server)
            .await;

        let (mut fetcher, _dir) = fetcher_for(&server).await;
        fetcher
            .store
            .create_task("t1", "load_vacancies", &json!({}), None, 300)
            .unwrap();

        let mut params = chunk(json!({"id": "f1"}));
        params.task_id = Some("t1".into());
        fetcher.fetch_chunk(params).await;

        let task = fetcher.store.get_task("t1").unwrap().unwrap();
        let progress = task.progress.unwrap();
        assert_eq!(progress["current_page"], 0);
        assert_eq!(progress["vacancies_loaded"], 10);
        assert_eq!(progress["chunk_progress"], "1/10");
    }

    #[tokio::test]
    async fn estimate_total_pages_rounds_up_and_caps() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/vacancies"))
            .and(query_param("per_page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [], "found": 250, "pages": 3
            })))
            .mount(&server)
            .await;

        let (mut fetcher, _dir) = fetcher_for(&server).await;
        assert_eq!(
            fetcher.estimate_total_pages(&json!({"params": {"text": "x"}})).await,
            3
        );
    }

    #[tokio::test]
    async fn estimate_falls_back_on_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/vacancies"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let (mut fetcher, _dir) = fetcher_for(&server).await;
        assert_eq!(fetcher.estimate_total_pages(&json!({})).await, 20);
    }

    #[tokio::test]
    async fn employer_fetch_persists_and_404_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/employers/55"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "55", "name": "Acme", "alternate_url": "https://example/employer/55"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/employers/77"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let (mut fetcher, _dir) = fetcher_for(&server).await;
        let found = fetcher.fetch_employer("55").await.unwrap();
        assert!(found.is_some());
        assert!(fetcher.fetch_employer("77").await.unwrap().is_none());

        // Persisted through the store.
        assert!(fetcher
            .store
            .get_missing_employer_ids(10)
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn standard_headers_are_sent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/vacancies"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page_body(1, 1)))
            .mount(&server)
            .await;

        let (mut fetcher, _dir) = fetcher_for(&server).await;
        fetcher.fetch_chunk(chunk(json!({"id": "f1"}))).await;

        let requests = server.received_requests().await.unwrap();
        let headers = &requests[0].headers;
        assert_eq!(headers.get("accept").unwrap(), "application/json");
        assert_eq!(headers.get("accept-language").unwrap(), "ru");
        assert_eq!(headers.get("user-agent").unwrap(), "test-agent/1.0");
        assert_eq!(
            requests[0].url.query_pairs().find(|(k, _)| k == "per_page").unwrap().1,
            "100"
        );
    }
}
