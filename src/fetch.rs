use std::thread;
use std::time::{Duration, Instant};

use crate::cache::{CacheKey, CacheStore};
use crate::config::FetchConfig;
use crate::domain::{SpeciesKey, SpeciesQuery};
use crate::error::XenoError;
use crate::output::{ProgressEvent, ProgressSink};
use crate::xeno::{CatalogClient, RecordingsPage};

/// Terminal state of one species' fetch run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    /// All declared pages obtained (or the catalog returned no recordings).
    Completed,
    /// Stopped early because the per-species recording cap was reached.
    Capped,
    /// Aborted after exhausting 429 cooldown retries.
    RateLimited,
    /// Aborted on an unrecoverable per-species error.
    Errored(String),
}

impl RunStatus {
    pub fn as_str(&self) -> &str {
        match self {
            RunStatus::Completed => "completed",
            RunStatus::Capped => "capped",
            RunStatus::RateLimited => "rate_limited",
            RunStatus::Errored(_) => "error",
        }
    }
}

/// Per-species fetch bookkeeping, aggregated into the run summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRunStats {
    pub species: SpeciesKey,
    /// Pages fetched over the network this run.
    pub pages_requested: u32,
    /// Pages served from the cache this run.
    pub pages_cached: u32,
    /// Recordings obtained, truncated to the configured cap.
    pub recordings: u32,
    pub rate_limit_waits: u32,
    pub waited: Duration,
    pub status: RunStatus,
}

impl FetchRunStats {
    fn new(species: SpeciesKey) -> Self {
        Self {
            species,
            pages_requested: 0,
            pages_cached: 0,
            recordings: 0,
            rate_limit_waits: 0,
            waited: Duration::ZERO,
            status: RunStatus::Completed,
        }
    }

    /// Total pages obtained, independent of whether they came from the
    /// cache. This is what the summary reports so reruns reproduce it.
    pub fn pages_total(&self) -> u32 {
        self.pages_requested + self.pages_cached
    }
}

/// Cache-first paginated fetch for one species: consult the store, hit the
/// network only on a miss, persist every fetched page before moving on.
pub struct FetchController<'a, C: CatalogClient> {
    client: &'a mut C,
    cache: &'a CacheStore,
    config: &'a FetchConfig,
}

impl<'a, C: CatalogClient> FetchController<'a, C> {
    pub fn new(client: &'a mut C, cache: &'a CacheStore, config: &'a FetchConfig) -> Self {
        Self {
            client,
            cache,
            config,
        }
    }

    /// Runs the page loop for one species. `Err` is reserved for conditions
    /// that invalidate the whole batch (bad credential); everything else is
    /// folded into the returned stats.
    pub fn fetch_species(
        &mut self,
        query: &SpeciesQuery,
        sink: &dyn ProgressSink,
    ) -> Result<FetchRunStats, XenoError> {
        let cap = self.config.max_recordings_per_species;
        let search = query.search_string();
        let mut stats = FetchRunStats::new(query.key().clone());
        let mut collected = 0u32;
        let mut page_number = 1u32;

        loop {
            let key = CacheKey::new(query.key().clone(), page_number);
            let page = match self.obtain_page(&key, &search, &mut stats, sink) {
                Ok(page) => page,
                Err(XenoError::InvalidApiKey) => return Err(XenoError::InvalidApiKey),
                Err(XenoError::RateLimitExceeded { waits, .. }) => {
                    tracing::warn!(
                        species = %stats.species,
                        page = page_number,
                        "aborting species: rate limit exhausted"
                    );
                    stats.rate_limit_waits += waits;
                    stats.status = RunStatus::RateLimited;
                    break;
                }
                Err(err) => {
                    tracing::error!(
                        species = %stats.species,
                        page = page_number,
                        error = %err,
                        "aborting species"
                    );
                    stats.status = RunStatus::Errored(err.to_string());
                    break;
                }
            };

            let page_recordings = page.recordings.len() as u32;
            if page_recordings == 0 {
                break;
            }
            collected += page_recordings;

            sink.event(ProgressEvent::new(format!(
                "{}: page {}/{} - {} recordings (total {})",
                query.scientific_name(),
                page_number,
                page.num_pages,
                page_recordings,
                collected
            )));

            // Stopping conditions, in order: declared page count, then cap.
            if page.num_pages != 0 && page_number >= page.num_pages {
                break;
            }
            if collected >= cap {
                sink.event(ProgressEvent::new(format!(
                    "{}: recording cap {} reached",
                    query.scientific_name(),
                    cap
                )));
                stats.status = RunStatus::Capped;
                break;
            }

            page_number += 1;
        }

        stats.recordings = collected.min(cap);
        Ok(stats)
    }

    /// Cache-first page acquisition. Unreadable cached pages are treated as
    /// misses and refetched; fetched pages are persisted before returning.
    fn obtain_page(
        &mut self,
        key: &CacheKey,
        search: &str,
        stats: &mut FetchRunStats,
        sink: &dyn ProgressSink,
    ) -> Result<RecordingsPage, XenoError> {
        if self.cache.exists(key) {
            match self
                .cache
                .read(key)
                .and_then(|bytes| RecordingsPage::from_slice(&bytes))
            {
                Ok(page) => {
                    stats.pages_cached += 1;
                    sink.event(ProgressEvent::new(format!("cache hit: {key}")));
                    return Ok(page);
                }
                Err(err) => {
                    tracing::warn!(%key, error = %err, "unreadable cached page, refetching");
                }
            }
        }

        let fetched = self.client.recordings_page(search, key.page, sink)?;
        self.cache.write(key, &fetched.raw)?;
        stats.pages_requested += 1;
        stats.rate_limit_waits += fetched.rate_limit_waits;
        stats.waited += fetched.waited;
        Ok(fetched.page)
    }
}

/// Outcome of one whole batch run, one row per input species.
#[derive(Debug, Clone)]
pub struct BatchSummary {
    pub rows: Vec<FetchRunStats>,
    pub api_calls: u32,
    pub elapsed: Duration,
}

/// Iterates the species list in input order, fetching each in turn. A bad
/// credential aborts everything; any other per-species failure is recorded
/// and the batch moves on (after the cooldown when rate-limited).
pub fn run_batch<C: CatalogClient>(
    client: &mut C,
    cache: &CacheStore,
    config: &FetchConfig,
    species: &[SpeciesQuery],
    sink: &dyn ProgressSink,
) -> Result<BatchSummary, XenoError> {
    cache.ensure_root()?;
    let started = Instant::now();
    let total = species.len();
    let mut rows = Vec::with_capacity(total);
    let mut api_calls = 0u32;

    for (index, query) in species.iter().enumerate() {
        sink.event(ProgressEvent::new(format!(
            "[{}/{}] processing: {}",
            index + 1,
            total,
            query.scientific_name()
        )));

        let mut controller = FetchController::new(client, cache, config);
        let stats = controller.fetch_species(query, sink)?;
        api_calls += stats.pages_requested;
        let rate_limited = stats.status == RunStatus::RateLimited;
        rows.push(stats);

        let elapsed = started.elapsed();
        let hours = elapsed.as_secs_f64() / 3600.0;
        let rate = if hours > 0.0 {
            api_calls as f64 / hours
        } else {
            0.0
        };
        sink.event(ProgressEvent::with_elapsed(
            format!(
                "progress: {}/{} species, {} API calls, {:.1} calls/hour",
                index + 1,
                total,
                api_calls,
                rate
            ),
            elapsed,
        ));

        if rate_limited && index + 1 < total {
            sink.event(ProgressEvent::new(format!(
                "cooling down {}s before next species",
                config.rate_limit_cooldown.as_secs()
            )));
            thread::sleep(config.rate_limit_cooldown);
        }
    }

    Ok(BatchSummary {
        rows,
        api_calls,
        elapsed: started.elapsed(),
    })
}
