//! Concurrent chunk downloader with quota-abort and resumable placement.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::NaiveDate;
use reqwest::Client;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use parcelpipe_shared::config::CrawlerConfig;
use parcelpipe_shared::{PipelineError, Result};

use crate::plan::{Chunk, ChunkOutcome, PropertyType, build_plan, month_ranges};

/// The portal expects browser-shaped requests.
const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

const MAIN_PAGE_PATH: &str = "/pt/xls/xls.do?mobileAt=";
const DOWNLOAD_PATH: &str = "/pt/xls/ptXlsExcelDown.do";

/// Marker inside the portal's JSON error body signalling the daily download
/// allowance is exhausted.
const QUOTA_MARKER: &str = "다운로드 횟수";

/// Responses smaller than this are empty result sets, not spreadsheets.
const MIN_FILE_BYTES: usize = 100;

// ---------------------------------------------------------------------------
// CrawlReport
// ---------------------------------------------------------------------------

/// Summary of a completed crawl run: one terminal outcome per chunk, in plan
/// order, so a re-run can resume correctly.
#[derive(Debug, Default)]
pub struct CrawlReport {
    /// (destination file name, outcome) per chunk.
    pub outcomes: Vec<(String, ChunkOutcome)>,
    /// Whether the daily quota marker was observed during this run.
    pub quota_hit: bool,
}

impl CrawlReport {
    pub fn completed(&self) -> usize {
        self.count(|o| matches!(o, ChunkOutcome::Completed))
    }

    pub fn skipped_existing(&self) -> usize {
        self.count(|o| matches!(o, ChunkOutcome::SkippedExisting))
    }

    pub fn no_data(&self) -> usize {
        self.count(|o| matches!(o, ChunkOutcome::NoData))
    }

    pub fn aborted(&self) -> usize {
        self.count(|o| matches!(o, ChunkOutcome::Aborted))
    }

    pub fn failed(&self) -> Vec<(&str, &str)> {
        self.outcomes
            .iter()
            .filter_map(|(name, outcome)| match outcome {
                ChunkOutcome::Failed(reason) => Some((name.as_str(), reason.as_str())),
                _ => None,
            })
            .collect()
    }

    fn count(&self, predicate: impl Fn(&ChunkOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| predicate(o)).count()
    }
}

// ---------------------------------------------------------------------------
// Crawler
// ---------------------------------------------------------------------------

/// Transaction spreadsheet crawler.
pub struct Crawler {
    config: CrawlerConfig,
    client: Client,
}

impl Crawler {
    /// Create a crawler with the given configuration.
    pub fn new(config: CrawlerConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .cookie_store(true)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PipelineError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    /// Crawl the requested date range for the given property types, writing
    /// one spreadsheet per (property, kind, month) into `output_dir`.
    ///
    /// Chunks whose destination file already exists are skipped without a
    /// network request. Once a quota-exceeded response is observed, no
    /// further requests are issued by any worker and every remaining chunk
    /// ends [`ChunkOutcome::Aborted`].
    #[instrument(skip_all, fields(start = %start, end = %end))]
    pub async fn run(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        types: &[PropertyType],
        sale_only: bool,
        output_dir: &Path,
    ) -> Result<CrawlReport> {
        let ranges = month_ranges(start, end);
        let chunks = build_plan(types, sale_only, &ranges);

        std::fs::create_dir_all(output_dir).map_err(|e| PipelineError::io(output_dir, e))?;

        info!(
            chunks = chunks.len(),
            months = ranges.len(),
            types = types.len(),
            concurrency = self.config.concurrency,
            "starting crawl"
        );

        // Session priming: the portal hands out the download session here.
        let main_page = format!("{}{}", self.config.base_url, MAIN_PAGE_PATH);
        let init = self
            .client
            .get(&main_page)
            .send()
            .await
            .map_err(|e| PipelineError::Network(format!("session init: {e}")))?;
        if !init.status().is_success() {
            return Err(PipelineError::Network(format!(
                "session init: HTTP {}",
                init.status()
            )));
        }

        let quota_hit = Arc::new(AtomicBool::new(false));
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1) as usize));

        let mut outcomes: Vec<(String, Option<ChunkOutcome>)> = chunks
            .iter()
            .map(|c| (c.file_name(), None))
            .collect();
        let mut handles = Vec::new();

        for (index, chunk) in chunks.iter().enumerate() {
            let dest = output_dir.join(chunk.file_name());
            if file_present(&dest) {
                debug!(file = %dest.display(), "already downloaded, skipping");
                outcomes[index].1 = Some(ChunkOutcome::SkippedExisting);
                continue;
            }

            let client = self.client.clone();
            let sem = semaphore.clone();
            let quota = quota_hit.clone();
            let chunk = chunk.clone();
            let base_url = self.config.base_url.clone();
            let delay = Duration::from_millis(self.config.delay_ms);
            let backoff = Duration::from_millis(self.config.retry_backoff_ms);
            let max_retries = self.config.max_retries.max(1);

            handles.push((index, tokio::spawn(async move {
                let _permit = sem.acquire().await.expect("semaphore closed");

                // Quota exhaustion is global to the day: once observed, no
                // worker issues another request.
                if quota.load(Ordering::Relaxed) {
                    return ChunkOutcome::Aborted;
                }
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }

                download_chunk(&client, &base_url, &chunk, &dest, &quota, max_retries, backoff)
                    .await
            })));
        }

        for (index, handle) in handles {
            let outcome = handle
                .await
                .unwrap_or_else(|e| ChunkOutcome::Failed(format!("task panicked: {e}")));
            outcomes[index].1 = Some(outcome);
        }

        let report = CrawlReport {
            outcomes: outcomes
                .into_iter()
                .map(|(name, outcome)| (name, outcome.expect("every chunk resolved")))
                .collect(),
            quota_hit: quota_hit.load(Ordering::Relaxed),
        };

        info!(
            completed = report.completed(),
            skipped = report.skipped_existing(),
            no_data = report.no_data(),
            aborted = report.aborted(),
            failed = report.failed().len(),
            quota_hit = report.quota_hit,
            "crawl finished"
        );
        Ok(report)
    }
}

/// A destination counts as present only when it has real content; tiny files
/// are failed/empty downloads from an earlier run.
fn file_present(path: &Path) -> bool {
    std::fs::metadata(path).is_ok_and(|m| m.len() > MIN_FILE_BYTES as u64)
}

// ---------------------------------------------------------------------------
// Chunk download
// ---------------------------------------------------------------------------

async fn download_chunk(
    client: &Client,
    base_url: &str,
    chunk: &Chunk,
    dest: &PathBuf,
    quota: &AtomicBool,
    max_retries: u32,
    backoff: Duration,
) -> ChunkOutcome {
    let form = build_form_data(chunk);
    let url = format!("{base_url}{DOWNLOAD_PATH}");
    let referer = format!("{base_url}{MAIN_PAGE_PATH}");

    let mut last_error = String::new();
    for attempt in 1..=max_retries {
        if quota.load(Ordering::Relaxed) {
            return ChunkOutcome::Aborted;
        }

        let response = match client
            .post(&url)
            .header("Referer", &referer)
            .form(&form)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                // Timeouts and transport errors are transient; retry with a
                // longer pause for timeouts.
                let pause = if e.is_timeout() { backoff * 2 } else { backoff };
                last_error = e.to_string();
                warn!(chunk = %dest.display(), attempt, error = %last_error, "request failed");
                if attempt < max_retries {
                    tokio::time::sleep(pause).await;
                }
                continue;
            }
        };

        let status = response.status();
        if !status.is_success() {
            last_error = format!("HTTP {status}");
            warn!(chunk = %dest.display(), attempt, %status, "non-success response");
            if attempt < max_retries {
                tokio::time::sleep(backoff).await;
            }
            continue;
        }

        let content_type = header_string(&response, "content-type");
        let content_disposition = header_string(&response, "content-disposition");
        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => {
                last_error = format!("body read: {e}");
                if attempt < max_retries {
                    tokio::time::sleep(backoff).await;
                }
                continue;
            }
        };

        if is_spreadsheet(&content_type, &content_disposition) {
            if bytes.len() < MIN_FILE_BYTES {
                debug!(chunk = %dest.display(), len = bytes.len(), "empty result");
                return ChunkOutcome::NoData;
            }
            if let Some(parent) = dest.parent() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    return ChunkOutcome::Failed(format!("create dir: {e}"));
                }
            }
            return match std::fs::write(dest, &bytes) {
                Ok(()) => {
                    debug!(chunk = %dest.display(), bytes = bytes.len(), "saved");
                    ChunkOutcome::Completed
                }
                Err(e) => ChunkOutcome::Failed(format!("write failed: {e}")),
            };
        }

        // Not a spreadsheet: the portal answers JSON for errors and empty
        // result sets.
        if let Ok(body) = serde_json::from_slice::<serde_json::Value>(&bytes) {
            if let Some(message) = body.get("error").and_then(|e| e.as_str()) {
                if message.contains(QUOTA_MARKER) {
                    warn!(chunk = %dest.display(), "daily download quota exhausted");
                    quota.store(true, Ordering::Relaxed);
                    return ChunkOutcome::Aborted;
                }
                last_error = format!("portal error: {message}");
            } else if body.get("cnt").and_then(|c| c.as_i64()) == Some(0) {
                return ChunkOutcome::NoData;
            } else {
                last_error = format!("unexpected JSON response: {body}");
            }
        } else {
            last_error = format!("unexpected response (content-type: {content_type})");
        }

        warn!(chunk = %dest.display(), attempt, error = %last_error, "malformed response");
        if attempt < max_retries {
            tokio::time::sleep(backoff).await;
        }
    }

    ChunkOutcome::Failed(last_error)
}

fn header_string(response: &reqwest::Response, name: &str) -> String {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase()
}

fn is_spreadsheet(content_type: &str, content_disposition: &str) -> bool {
    content_type.contains("spreadsheet")
        || content_type.contains("vnd.ms-excel")
        || content_type.contains("octet-stream")
        || content_disposition.contains(".xls")
}

/// The portal's download form, nationwide scope, as the browser submits it.
fn build_form_data(chunk: &Chunk) -> Vec<(&'static str, String)> {
    vec![
        ("srhThingNo", chunk.property.code().to_string()),
        ("srhDelngSecd", chunk.kind.code().to_string()),
        ("srhAddrGbn", "1".to_string()),
        ("srhLfstsSecd", "1".to_string()),
        ("srhFromDt", chunk.from.format("%Y-%m-%d").to_string()),
        ("srhToDt", chunk.to.format("%Y-%m-%d").to_string()),
        ("srhSidoCd", String::new()),
        ("srhSggCd", String::new()),
        ("srhEmdCd", String::new()),
        ("srhHsmpCd", String::new()),
        ("srhArea", String::new()),
        ("srhLrArea", String::new()),
        ("srhFromAmount", String::new()),
        ("srhToAmount", String::new()),
        ("srhNewRonSecd", chunk.kind.new_contract_flag().to_string()),
        ("srhRoadNm", String::new()),
        ("srhLoadCd", String::new()),
        ("mobileAt", String::new()),
        ("sidoNm", "전체".to_string()),
        ("sggNm", "전체".to_string()),
        ("emdNm", "전체".to_string()),
        ("loadNm", "전체".to_string()),
        ("areaNm", "전체".to_string()),
        ("hsmpNm", "전체".to_string()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn test_config(base_url: String) -> CrawlerConfig {
        CrawlerConfig {
            base_url,
            delay_ms: 0,
            concurrency: 2,
            max_retries: 2,
            timeout_secs: 5,
            retry_backoff_ms: 5,
            output_dir: "transactions".into(),
        }
    }

    async fn mock_main_page(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/pt/xls/xls.do"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>form</html>"))
            .mount(server)
            .await;
    }

    fn excel_response() -> ResponseTemplate {
        ResponseTemplate::new(200)
            .insert_header(
                "content-type",
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            )
            .insert_header("content-disposition", "attachment; filename=data.xlsx")
            .set_body_bytes(vec![0x50u8; 4096])
    }

    #[tokio::test]
    async fn downloads_chunks_and_resumes_without_refetching() {
        let server = MockServer::start().await;
        mock_main_page(&server).await;
        Mock::given(method("POST"))
            .and(path(DOWNLOAD_PATH))
            .respond_with(excel_response())
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let crawler = Crawler::new(test_config(server.uri())).unwrap();

        let report = crawler
            .run(
                date(2024, 1, 1),
                date(2024, 2, 29),
                &[PropertyType::Apartment],
                true,
                dir.path(),
            )
            .await
            .unwrap();

        assert_eq!(report.completed(), 2);
        assert!(!report.quota_hit);
        assert!(dir.path().join("apartment_sale_202401.xlsx").exists());
        assert!(dir.path().join("apartment_sale_202402.xlsx").exists());

        // Second run: both files present, no download requests issued.
        let report = crawler
            .run(
                date(2024, 1, 1),
                date(2024, 2, 29),
                &[PropertyType::Apartment],
                true,
                dir.path(),
            )
            .await
            .unwrap();
        assert_eq!(report.skipped_existing(), 2);
        assert_eq!(report.completed(), 0);

        let downloads = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|r| r.url.path() == DOWNLOAD_PATH)
            .count();
        assert_eq!(downloads, 2);
    }

    #[tokio::test]
    async fn quota_marker_aborts_every_remaining_chunk() {
        let server = MockServer::start().await;
        mock_main_page(&server).await;
        Mock::given(method("POST"))
            .and(path(DOWNLOAD_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/json")
                    .set_body_string(r#"{"error": "일일 다운로드 횟수를 초과했습니다"}"#),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let crawler = Crawler::new(test_config(server.uri())).unwrap();

        let report = crawler
            .run(
                date(2024, 1, 1),
                date(2024, 6, 30),
                &[PropertyType::Apartment, PropertyType::Land],
                true,
                dir.path(),
            )
            .await
            .unwrap();

        assert!(report.quota_hit);
        assert_eq!(report.aborted(), report.outcomes.len());
        assert_eq!(report.completed(), 0);
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());

        // Far fewer requests than chunks: workers stop issuing requests once
        // the marker is seen.
        let downloads = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|r| r.url.path() == DOWNLOAD_PATH)
            .count();
        assert!(downloads <= 2, "expected an early halt, got {downloads} requests");
    }

    #[tokio::test]
    async fn empty_months_are_no_data() {
        let server = MockServer::start().await;
        mock_main_page(&server).await;
        Mock::given(method("POST"))
            .and(path(DOWNLOAD_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/json")
                    .set_body_string(r#"{"cnt": 0}"#),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let crawler = Crawler::new(test_config(server.uri())).unwrap();
        let report = crawler
            .run(
                date(2024, 3, 1),
                date(2024, 3, 31),
                &[PropertyType::Land],
                true,
                dir.path(),
            )
            .await
            .unwrap();

        assert_eq!(report.no_data(), 1);
        assert!(!dir.path().join("land_sale_202403.xlsx").exists());
    }

    #[tokio::test]
    async fn server_errors_fail_the_chunk_but_not_the_run() {
        let server = MockServer::start().await;
        mock_main_page(&server).await;
        Mock::given(method("POST"))
            .and(path(DOWNLOAD_PATH))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let crawler = Crawler::new(test_config(server.uri())).unwrap();
        let report = crawler
            .run(
                date(2024, 1, 1),
                date(2024, 2, 29),
                &[PropertyType::Officetel],
                true,
                dir.path(),
            )
            .await
            .unwrap();

        let failed = report.failed();
        assert_eq!(failed.len(), 2);
        assert!(failed[0].1.contains("HTTP 500"));

        // Bounded retries: 2 chunks × 2 attempts.
        let downloads = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|r| r.url.path() == DOWNLOAD_PATH)
            .count();
        assert_eq!(downloads, 4);
    }

    #[tokio::test]
    async fn undersized_spreadsheet_is_no_data() {
        let server = MockServer::start().await;
        mock_main_page(&server).await;
        Mock::given(method("POST"))
            .and(path(DOWNLOAD_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/octet-stream")
                    .set_body_bytes(vec![0u8; 10]),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let crawler = Crawler::new(test_config(server.uri())).unwrap();
        let report = crawler
            .run(
                date(2024, 5, 1),
                date(2024, 5, 31),
                &[PropertyType::Apartment],
                true,
                dir.path(),
            )
            .await
            .unwrap();
        assert_eq!(report.no_data(), 1);
    }
}
