use std::fs;
use std::io::{Read, Write};
use std::thread;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::cache::{CacheKey, CacheStore};
use crate::config::FetchConfig;
use crate::error::XenoError;
use crate::output::{ProgressEvent, ProgressSink};
use crate::xeno::{Recording, RecordingsPage};

/// Extension of the marker file left next to a destination whose transfer
/// exceeded the size limit; honored on rerun so the recording is not
/// refetched forever.
const SIZE_LIMIT_MARKER_EXT: &str = "size_limit_exceeded";

/// Derived, read-only view of one downloadable recording. Re-derived from
/// cached pages on demand, never stored separately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingRecord {
    pub id: String,
    pub species: String,
    pub url: String,
    pub quality: Option<String>,
}

impl RecordingRecord {
    /// Recordings without an audio URL cannot be downloaded.
    pub fn from_recording(recording: &Recording) -> Option<Self> {
        let url = recording.file_url.clone().filter(|url| !url.is_empty())?;
        Some(Self {
            id: recording.id.clone(),
            species: recording.species_label(),
            url,
            quality: recording.quality.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    AlreadyPresent,
    Downloaded(u64),
    SizeExceeded,
    Failed(String),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DownloadStats {
    pub downloaded: u32,
    pub already_present: u32,
    pub size_exceeded: u32,
    pub failed: u32,
}

/// Result of one audio transfer attempt against the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchedAudio {
    Written(u64),
    TooLarge,
}

/// Seam between the download stage and the real file host.
pub trait AudioSource {
    fn fetch_audio(
        &mut self,
        url: &str,
        dest: &Utf8Path,
        max_bytes: u64,
    ) -> Result<FetchedAudio, XenoError>;
}

pub struct HttpAudioSource {
    client: Client,
}

impl HttpAudioSource {
    pub fn new() -> Result<Self, XenoError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("xenofetch/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| XenoError::Download(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| XenoError::Download(err.to_string()))?;
        Ok(Self { client })
    }
}

impl AudioSource for HttpAudioSource {
    /// Streams the body into a temp file in the destination directory and
    /// renames it into place only on a complete transfer, so an interrupted
    /// run never leaves a partial file under the final name.
    fn fetch_audio(
        &mut self,
        url: &str,
        dest: &Utf8Path,
        max_bytes: u64,
    ) -> Result<FetchedAudio, XenoError> {
        let mut response = self
            .client
            .get(url)
            .send()
            .map_err(|err| XenoError::Download(err.to_string()))?;
        if !response.status().is_success() {
            return Err(XenoError::Download(format!(
                "HTTP {} for {url}",
                response.status().as_u16()
            )));
        }

        if let Some(length) = response.content_length() {
            if length > max_bytes {
                return Ok(FetchedAudio::TooLarge);
            }
        }

        let parent = dest
            .parent()
            .ok_or_else(|| XenoError::Download(format!("no parent directory for {dest}")))?;
        let mut temp = tempfile::Builder::new()
            .prefix(".xenofetch-")
            .suffix(".part")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| XenoError::Filesystem(err.to_string()))?;

        let mut written = 0u64;
        let mut buffer = [0u8; 8192];
        loop {
            let read = response
                .read(&mut buffer)
                .map_err(|err| XenoError::Download(err.to_string()))?;
            if read == 0 {
                break;
            }
            written += read as u64;
            if written > max_bytes {
                // Temp file is removed on drop; no partial artifact remains.
                return Ok(FetchedAudio::TooLarge);
            }
            temp.write_all(&buffer[..read])
                .map_err(|err| XenoError::Filesystem(err.to_string()))?;
        }

        if written == 0 {
            return Err(XenoError::Download(format!("empty body for {url}")));
        }
        temp.flush()
            .map_err(|err| XenoError::Filesystem(err.to_string()))?;
        temp.persist(dest.as_std_path())
            .map_err(|err| XenoError::Filesystem(err.to_string()))?;
        Ok(FetchedAudio::Written(written))
    }
}

/// Reads every cached page and materializes audio files on disk. The cache
/// is the sole data source; no metadata request is ever made here.
pub struct DownloadStage<'a, S: AudioSource> {
    source: &'a mut S,
    cache: &'a CacheStore,
    config: &'a FetchConfig,
}

impl<'a, S: AudioSource> DownloadStage<'a, S> {
    pub fn new(source: &'a mut S, cache: &'a CacheStore, config: &'a FetchConfig) -> Self {
        Self {
            source,
            cache,
            config,
        }
    }

    pub fn run(&mut self, sink: &dyn ProgressSink) -> Result<DownloadStats, XenoError> {
        let pages = self.cache.all_pages()?;
        if pages.is_empty() {
            tracing::warn!(cache = %self.cache.root(), "no cached pages found, run fetch first");
            return Ok(DownloadStats::default());
        }

        let mut stats = DownloadStats::default();
        for (species, page_numbers) in pages {
            let species_dir = self.config.audio_dir.join(species.as_str());
            fs::create_dir_all(species_dir.as_std_path())
                .map_err(|err| XenoError::Filesystem(err.to_string()))?;
            sink.event(ProgressEvent::new(format!(
                "processing species: {}",
                species.display_name()
            )));

            for page_number in page_numbers {
                let key = CacheKey::new(species.clone(), page_number);
                let page = match self
                    .cache
                    .read(&key)
                    .and_then(|bytes| RecordingsPage::from_slice(&bytes))
                {
                    Ok(page) => page,
                    Err(err) => {
                        tracing::warn!(%key, error = %err, "skipping unreadable cached page");
                        continue;
                    }
                };

                for recording in &page.recordings {
                    let Some(record) = RecordingRecord::from_recording(recording) else {
                        tracing::warn!(id = %recording.id, "no audio URL for recording");
                        stats.failed += 1;
                        continue;
                    };

                    match self.process_recording(&record, &species_dir, sink) {
                        DownloadOutcome::AlreadyPresent => stats.already_present += 1,
                        DownloadOutcome::SizeExceeded => stats.size_exceeded += 1,
                        DownloadOutcome::Failed(message) => {
                            tracing::error!(id = %record.id, url = %record.url, %message, "download failed");
                            stats.failed += 1;
                        }
                        DownloadOutcome::Downloaded(bytes) => {
                            sink.event(ProgressEvent::new(format!(
                                "downloaded {} ({bytes} bytes, quality {})",
                                record.id,
                                record.quality.as_deref().unwrap_or("unknown")
                            )));
                            stats.downloaded += 1;
                            // Pace only actual transfers; skips are free.
                            thread::sleep(self.config.request_delay);
                        }
                    }
                }
            }
        }

        sink.event(ProgressEvent::new(format!(
            "download summary: {} downloaded, {} already present, {} size-limited, {} failed",
            stats.downloaded, stats.already_present, stats.size_exceeded, stats.failed
        )));
        Ok(stats)
    }

    fn process_recording(
        &mut self,
        record: &RecordingRecord,
        species_dir: &Utf8Path,
        sink: &dyn ProgressSink,
    ) -> DownloadOutcome {
        let dest = destination_path(species_dir, &record.id);

        // Non-empty final file means a prior run completed this transfer.
        if let Ok(meta) = fs::metadata(dest.as_std_path()) {
            if meta.len() > 0 {
                return DownloadOutcome::AlreadyPresent;
            }
        }

        let marker = dest.with_extension(SIZE_LIMIT_MARKER_EXT);
        if marker.as_std_path().exists() {
            return DownloadOutcome::SizeExceeded;
        }

        sink.event(ProgressEvent::new(format!("downloading: {}", record.id)));
        match self
            .source
            .fetch_audio(&record.url, &dest, self.config.max_audio_bytes)
        {
            Ok(FetchedAudio::Written(bytes)) => DownloadOutcome::Downloaded(bytes),
            Ok(FetchedAudio::TooLarge) => {
                tracing::warn!(id = %record.id, url = %record.url, "recording exceeds size limit");
                if let Err(err) = fs::write(marker.as_std_path(), b"") {
                    tracing::warn!(%marker, error = %err, "failed to write size-limit marker");
                }
                DownloadOutcome::SizeExceeded
            }
            Err(err) => DownloadOutcome::Failed(err.to_string()),
        }
    }
}

fn destination_path(species_dir: &Utf8Path, id: &str) -> Utf8PathBuf {
    species_dir.join(format!("{id}.mp3"))
}
