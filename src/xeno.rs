use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Deserializer};

use crate::config::FetchConfig;
use crate::error::XenoError;
use crate::output::{ProgressEvent, ProgressSink};
use crate::retry::{self, AttemptOutcome, FailureKind, NextStep, RetryPolicy, RetryState};
use crate::throttle::Throttle;

/// One page of the catalog's `recordings` response. The API serializes most
/// numbers as strings, so the numeric fields accept both forms.
#[derive(Debug, Clone, Deserialize)]
pub struct RecordingsPage {
    #[serde(rename = "numRecordings", default, deserialize_with = "flexible_u32")]
    pub num_recordings: u32,
    #[serde(rename = "numSpecies", default, deserialize_with = "flexible_u32")]
    pub num_species: u32,
    #[serde(default, deserialize_with = "flexible_u32")]
    pub page: u32,
    #[serde(rename = "numPages", default, deserialize_with = "flexible_u32")]
    pub num_pages: u32,
    #[serde(default)]
    pub recordings: Vec<Recording>,
}

impl RecordingsPage {
    pub fn from_slice(payload: &[u8]) -> Result<Self, XenoError> {
        serde_json::from_slice(payload).map_err(|err| XenoError::PayloadParse(err.to_string()))
    }
}

/// One recording entry as returned by the API. Only the fields the pipeline
/// consumes are modeled; the cache keeps the full payload verbatim.
#[derive(Debug, Clone, Deserialize)]
pub struct Recording {
    #[serde(default, deserialize_with = "flexible_string")]
    pub id: String,
    #[serde(default, rename = "gen")]
    pub genus: Option<String>,
    #[serde(default, rename = "sp")]
    pub species: Option<String>,
    #[serde(default)]
    pub en: Option<String>,
    #[serde(default)]
    pub loc: Option<String>,
    #[serde(default, rename = "q")]
    pub quality: Option<String>,
    #[serde(default, rename = "file")]
    pub file_url: Option<String>,
    #[serde(default, rename = "file-name")]
    pub file_name: Option<String>,
}

impl Recording {
    pub fn species_label(&self) -> String {
        match (&self.genus, &self.species) {
            (Some(genus), Some(species)) if !genus.is_empty() => format!("{genus} {species}"),
            _ => self.en.clone().unwrap_or_else(|| "unknown".to_string()),
        }
    }
}

fn flexible_u32<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(u32),
        Str(String),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Num(value) => Ok(value),
        Raw::Str(value) => value.trim().parse().map_err(serde::de::Error::custom),
    }
}

fn flexible_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(i64),
        Str(String),
    }
    Ok(match Raw::deserialize(deserializer)? {
        Raw::Num(value) => value.to_string(),
        Raw::Str(value) => value,
    })
}

/// Result of one executed page request: the verbatim body for the cache,
/// the parsed view, and the waiting the attempt loop accrued.
#[derive(Debug)]
pub struct PageFetch {
    pub raw: Vec<u8>,
    pub page: RecordingsPage,
    pub rate_limit_waits: u32,
    pub waited: Duration,
}

/// Seam between the fetch controller and the real catalog; tests substitute
/// a scripted implementation.
pub trait CatalogClient {
    fn recordings_page(
        &mut self,
        query: &str,
        page: u32,
        sink: &dyn ProgressSink,
    ) -> Result<PageFetch, XenoError>;
}

pub struct XenoHttpClient {
    client: Client,
    throttle: Throttle,
    policy: RetryPolicy,
    base_url: String,
    api_key: String,
    per_page: u32,
}

impl XenoHttpClient {
    pub fn new(config: &FetchConfig) -> Result<Self, XenoError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("xenofetch/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| XenoError::Network(err.to_string()))?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| XenoError::Network(err.to_string()))?;

        Ok(Self {
            client,
            throttle: Throttle::new(config.request_delay, config.hourly_request_ceiling),
            policy: RetryPolicy::from_config(config),
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            per_page: config.per_page,
        })
    }
}

impl CatalogClient for XenoHttpClient {
    fn recordings_page(
        &mut self,
        query: &str,
        page: u32,
        sink: &dyn ProgressSink,
    ) -> Result<PageFetch, XenoError> {
        let url = self.base_url.clone();
        let client = self.client.clone();
        let api_key = self.api_key.clone();
        let per_page = self.per_page.to_string();
        let page_param = page.to_string();
        let query_param = query.to_string();

        let executed = execute_with_policy(
            &self.policy,
            &mut self.throttle,
            &format!("{url} query={query} page={page}"),
            sink,
            move || {
                let response = client
                    .get(&url)
                    .query(&[
                        ("query", query_param.as_str()),
                        ("key", api_key.as_str()),
                        ("per_page", per_page.as_str()),
                        ("page", page_param.as_str()),
                    ])
                    .send()
                    .map_err(|err| err.to_string())?;
                let status = response.status().as_u16();
                let body = response.bytes().map_err(|err| err.to_string())?.to_vec();
                Ok(RawResponse { status, body })
            },
        )?;

        let parsed = RecordingsPage::from_slice(&executed.body)?;
        Ok(PageFetch {
            raw: executed.body,
            page: parsed,
            rate_limit_waits: executed.rate_limit_waits,
            waited: executed.waited,
        })
    }
}

/// One raw HTTP exchange, reduced to what classification needs.
pub(crate) struct RawResponse {
    pub(crate) status: u16,
    pub(crate) body: Vec<u8>,
}

#[derive(Debug)]
pub(crate) struct ExecutedRequest {
    pub(crate) body: Vec<u8>,
    pub(crate) rate_limit_waits: u32,
    pub(crate) waited: Duration,
}

/// Drives one logical request through the throttle and retry policy. The
/// attempt closure performs a single exchange; transport failures come back
/// as `Err(message)`.
pub(crate) fn execute_with_policy<F>(
    policy: &RetryPolicy,
    throttle: &mut Throttle,
    target: &str,
    sink: &dyn ProgressSink,
    mut attempt_fn: F,
) -> Result<ExecutedRequest, XenoError>
where
    F: FnMut() -> Result<RawResponse, String>,
{
    let mut state = RetryState::new(policy);
    let mut waited = Duration::ZERO;
    let mut last_failure = String::new();
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        waited += throttle.wait_if_needed();

        let (outcome, response) = match attempt_fn() {
            Ok(response) => {
                if (500..=599).contains(&response.status) {
                    last_failure = format!("HTTP {}", response.status);
                }
                (retry::classify_status(response.status), Some(response))
            }
            Err(message) => {
                last_failure = message;
                (AttemptOutcome::Transient, None)
            }
        };

        match &response {
            Some(resp) => sink.event(ProgressEvent::new(format!(
                "request attempt {attempt} -> HTTP {} ({target})",
                resp.status
            ))),
            None => sink.event(ProgressEvent::new(format!(
                "request attempt {attempt} -> {last_failure} ({target})"
            ))),
        }

        match state.next_step(outcome, policy) {
            NextStep::Done => {
                let Some(response) = response else {
                    return Err(XenoError::Network(format!(
                        "{target}: succeeded without a response body"
                    )));
                };
                return Ok(ExecutedRequest {
                    body: response.body,
                    rate_limit_waits: state.rate_limit_waits(),
                    waited,
                });
            }
            NextStep::RetryAfter(delay) => {
                tracing::warn!(
                    target_url = target,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retrying after wait"
                );
                thread::sleep(delay);
                waited += delay;
            }
            NextStep::GiveUp(kind) => {
                return Err(match kind {
                    FailureKind::Auth => XenoError::InvalidApiKey,
                    FailureKind::RateLimit => XenoError::RateLimitExceeded {
                        waits: state.rate_limit_waits(),
                        context: target.to_string(),
                    },
                    FailureKind::Network => {
                        XenoError::Network(format!("{target}: {last_failure}"))
                    }
                    FailureKind::Unexpected(status) => {
                        let message = response
                            .map(|resp| String::from_utf8_lossy(&resp.body).into_owned())
                            .unwrap_or_default();
                        XenoError::UnexpectedStatus { status, message }
                    }
                });
            }
        }
    }
}
