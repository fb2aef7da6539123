use std::cell::Cell;
use std::thread::sleep;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, FixedOffset};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde_json::Value;

use crate::config::{Credentials, env_value};
use crate::model::{PageSummary, parse_api_timestamp};

const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_RETRIES: usize = 2;
const DEFAULT_RETRY_DELAY_MS: u64 = 350;
const MIN_REQUEST_SPACING_MS: u64 = 100;

const CONTENT_PATH: &str = "/rest/api/content";
const AUDIT_PATH: &str = "/rest/api/audit";
const LISTING_EXPAND: &str = "version,history.lastUpdated,space,_links";

/// Top-level analytics fields consulted when the payload carries no `views`
/// array. Checked in order; the first parseable one wins.
const VIEW_DATE_FALLBACK_FIELDS: [&str; 4] = ["lastViewDate", "lastAccessed", "viewDate", "date"];

/// The Confluence operations the pipeline needs. Implemented over HTTP by
/// [`ConfluenceClient`] and by in-memory fakes in tests.
pub trait ConfluenceApi {
    /// One batch of the space's page listing starting at offset `start`.
    fn content_batch(&self, space_key: &str, start: usize, limit: usize)
    -> Result<Vec<PageSummary>>;

    /// Best-effort last-view lookup. `None` means the backend could not
    /// answer for this page; it is never an abort condition.
    fn last_viewed(&self, page_id: &str) -> Option<DateTime<FixedOffset>>;
}

pub struct ConfluenceClient {
    client: Client,
    credentials: Credentials,
    retries: usize,
    retry_delay_ms: u64,
    last_request_at: Cell<Option<Instant>>,
}

impl ConfluenceClient {
    pub fn new(credentials: Credentials) -> Result<Self> {
        let timeout_ms = env_value("CONFLUENCE_HTTP_TIMEOUT_MS")
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_MS);
        let retries = env_value("CONFLUENCE_HTTP_RETRIES")
            .and_then(|value| value.parse::<usize>().ok())
            .unwrap_or(DEFAULT_RETRIES);
        let retry_delay_ms = env_value("CONFLUENCE_HTTP_RETRY_DELAY_MS")
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(DEFAULT_RETRY_DELAY_MS);
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            credentials,
            retries,
            retry_delay_ms,
            last_request_at: Cell::new(None),
        })
    }

    fn pace(&self) {
        if let Some(last) = self.last_request_at.get() {
            let min_spacing = Duration::from_millis(MIN_REQUEST_SPACING_MS);
            let elapsed = last.elapsed();
            if elapsed < min_spacing {
                sleep(min_spacing - elapsed);
            }
        }
    }

    /// GET with basic auth and bounded retries. Transport errors and 5xx
    /// responses retry with a linearly scaled delay; 401/403 and other 4xx
    /// fail immediately since retrying cannot help. A 404 comes back as
    /// `None` so the caller can decide what an absent resource means.
    fn request_json(&self, path: &str, params: &[(&str, String)]) -> Result<Option<Value>> {
        let url = format!("{}{}", self.credentials.base_url, path);
        let mut last_error = None::<String>;
        for attempt in 0..=self.retries {
            self.pace();
            let response = self
                .client
                .get(&url)
                .basic_auth(&self.credentials.username, Some(&self.credentials.password))
                .query(params)
                .send();
            self.last_request_at.set(Some(Instant::now()));

            match response {
                Ok(response) => {
                    let status = response.status();
                    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                        bail!("authentication rejected by {url}: HTTP {status}");
                    }
                    if status == StatusCode::NOT_FOUND {
                        return Ok(None);
                    }
                    if status.is_client_error() {
                        bail!("HTTP {status} from {url}");
                    }
                    if !status.is_success() {
                        last_error = Some(format!("HTTP {status} from {url}"));
                        if attempt < self.retries {
                            sleep(Duration::from_millis(
                                self.retry_delay_ms.saturating_mul(attempt as u64 + 1),
                            ));
                            continue;
                        }
                        break;
                    }
                    return response
                        .json()
                        .map(Some)
                        .with_context(|| format!("failed to decode JSON response from {url}"));
                }
                Err(error) => {
                    last_error = Some(error.to_string());
                    if attempt < self.retries {
                        sleep(Duration::from_millis(
                            self.retry_delay_ms.saturating_mul(attempt as u64 + 1),
                        ));
                        continue;
                    }
                }
            }
        }
        let message = last_error.unwrap_or_else(|| "request failed".to_string());
        bail!("{message}")
    }

    /// Single attempt, any failure collapses to `None`. Used for endpoints
    /// many backends disable, where an error carries no signal worth
    /// aborting or retrying for.
    fn request_json_best_effort(&self, path: &str, params: &[(&str, String)]) -> Option<Value> {
        let url = format!("{}{}", self.credentials.base_url, path);
        self.pace();
        let response = self
            .client
            .get(&url)
            .basic_auth(&self.credentials.username, Some(&self.credentials.password))
            .query(params)
            .send();
        self.last_request_at.set(Some(Instant::now()));
        let response = response.ok()?;
        if !response.status().is_success() {
            return None;
        }
        response.json().ok()
    }
}

impl ConfluenceApi for ConfluenceClient {
    fn content_batch(
        &self,
        space_key: &str,
        start: usize,
        limit: usize,
    ) -> Result<Vec<PageSummary>> {
        let payload = self.request_json(
            CONTENT_PATH,
            &[
                ("spaceKey", space_key.to_string()),
                ("type", "page".to_string()),
                ("start", start.to_string()),
                ("limit", limit.to_string()),
                ("expand", LISTING_EXPAND.to_string()),
            ],
        )?;
        // Some deployments answer 404 for an unknown space key; that is the
        // empty-report case, not a failure.
        match payload {
            Some(payload) => parse_content_batch(&payload, &self.credentials.base_url),
            None => Ok(Vec::new()),
        }
    }

    fn last_viewed(&self, page_id: &str) -> Option<DateTime<FixedOffset>> {
        let views_path = format!("/rest/api/analytics/content/{page_id}/views");
        if let Some(payload) = self.request_json_best_effort(&views_path, &[])
            && let Some(parsed) = extract_view_timestamp(&payload)
        {
            return Some(parsed);
        }
        // Analytics unavailable; the audit log is the Cloud-side fallback.
        let payload = self.request_json_best_effort(
            AUDIT_PATH,
            &[
                ("searchString", page_id.to_string()),
                ("limit", "1".to_string()),
            ],
        )?;
        extract_audit_timestamp(&payload)
    }
}

fn parse_content_batch(payload: &Value, base_url: &str) -> Result<Vec<PageSummary>> {
    let results = payload
        .get("results")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow::anyhow!("invalid content listing shape: missing `results`"))?;

    let mut pages = Vec::with_capacity(results.len());
    for page in results {
        let id = match page.get("id") {
            Some(Value::String(id)) => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => continue,
        };
        let title = match page.get("title").and_then(Value::as_str) {
            Some(title) => title.to_string(),
            None => continue,
        };
        let url = page_url(page, base_url, &id);
        let version_when = page
            .get("version")
            .and_then(|version| version.get("when"))
            .and_then(Value::as_str)
            .and_then(parse_api_timestamp);
        pages.push(PageSummary {
            id,
            title,
            url,
            version_when,
        });
    }
    Ok(pages)
}

/// Web UI link when the listing provides one, else the classic
/// `/display/<SPACE>/<id>` form.
fn page_url(page: &Value, base_url: &str, id: &str) -> String {
    if let Some(webui) = page
        .get("_links")
        .and_then(|links| links.get("webui"))
        .and_then(Value::as_str)
        && !webui.trim().is_empty()
    {
        return format!("{base_url}{webui}");
    }
    let space_key = page
        .get("space")
        .and_then(|space| space.get("key"))
        .and_then(Value::as_str)
        .unwrap_or("");
    format!("{base_url}/display/{space_key}/{id}")
}

fn extract_view_timestamp(payload: &Value) -> Option<DateTime<FixedOffset>> {
    if let Some(views) = payload.get("views").and_then(Value::as_array) {
        let latest = views
            .iter()
            .filter_map(|view| view.get("date").and_then(Value::as_str))
            .filter_map(parse_api_timestamp)
            .max();
        if latest.is_some() {
            return latest;
        }
    }
    for field in VIEW_DATE_FALLBACK_FIELDS {
        if let Some(raw) = payload.get(field).and_then(Value::as_str)
            && let Some(parsed) = parse_api_timestamp(raw)
        {
            return Some(parsed);
        }
    }
    None
}

fn extract_audit_timestamp(payload: &Value) -> Option<DateTime<FixedOffset>> {
    payload
        .get("results")
        .and_then(Value::as_array)
        .and_then(|results| results.first())
        .and_then(|entry| entry.get("creationDate"))
        .and_then(Value::as_str)
        .and_then(parse_api_timestamp)
}
