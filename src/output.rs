use std::sync::Mutex;
use std::time::Duration;

use camino::Utf8Path;
use serde::Serialize;

use crate::error::XenoError;
use crate::fetch::FetchRunStats;

/// A structured observability event emitted by the pipeline components.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

impl ProgressEvent {
    pub fn new(message: String) -> Self {
        Self {
            message,
            elapsed: None,
        }
    }

    pub fn with_elapsed(message: String, elapsed: Duration) -> Self {
        Self {
            message,
            elapsed: Some(elapsed),
        }
    }
}

/// Injected logging capability: components emit events, the caller decides
/// where they go. Tests capture them instead of parsing log text.
pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Forwards progress events to the tracing subscriber.
pub struct LogSink;

impl ProgressSink for LogSink {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => {
                tracing::info!(elapsed_ms = elapsed.as_millis() as u64, "{}", event.message)
            }
            None => tracing::info!("{}", event.message),
        }
    }
}

/// Records every event message; the test-facing sink.
#[derive(Default)]
pub struct CapturingSink {
    messages: Mutex<Vec<String>>,
}

impl CapturingSink {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

impl ProgressSink for CapturingSink {
    fn event(&self, event: ProgressEvent) {
        self.messages.lock().unwrap().push(event.message);
    }
}

#[derive(Debug, Serialize)]
struct SummaryRow<'a> {
    species: &'a str,
    pages_fetched: u32,
    recordings: u32,
    status: &'a str,
}

/// Writes the per-species run summary CSV consumed by the availability
/// tracking tools.
pub fn write_summary(path: &Utf8Path, rows: &[FetchRunStats]) -> Result<(), XenoError> {
    let mut writer = csv::Writer::from_path(path.as_std_path())
        .map_err(|err| XenoError::Summary(format!("{path}: {err}")))?;
    for stats in rows {
        writer
            .serialize(SummaryRow {
                species: stats.species.as_str(),
                pages_fetched: stats.pages_total(),
                recordings: stats.recordings,
                status: stats.status.as_str(),
            })
            .map_err(|err| XenoError::Summary(err.to_string()))?;
    }
    writer
        .flush()
        .map_err(|err| XenoError::Summary(err.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use camino::Utf8PathBuf;

    use super::*;
    use crate::fetch::RunStatus;

    #[test]
    fn summary_rows_use_total_pages_and_status_labels() {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join("summary.csv")).unwrap();

        let rows = vec![
            FetchRunStats {
                species: "Cossypha_caffra".parse().unwrap(),
                pages_requested: 1,
                pages_cached: 2,
                recordings: 30,
                rate_limit_waits: 0,
                waited: Duration::ZERO,
                status: RunStatus::Capped,
            },
            FetchRunStats {
                species: "Turdus_merula".parse().unwrap(),
                pages_requested: 0,
                pages_cached: 0,
                recordings: 0,
                rate_limit_waits: 1,
                waited: Duration::from_secs(60),
                status: RunStatus::RateLimited,
            },
        ];

        write_summary(&path, &rows).unwrap();
        let content = std::fs::read_to_string(path.as_std_path()).unwrap();
        let mut lines = content.lines();
        assert_eq!(
            lines.next().unwrap(),
            "species,pages_fetched,recordings,status"
        );
        assert_eq!(lines.next().unwrap(), "Cossypha_caffra,3,30,capped");
        assert_eq!(lines.next().unwrap(), "Turdus_merula,0,0,rate_limited");
    }

    #[test]
    fn capturing_sink_keeps_messages_in_order() {
        let sink = CapturingSink::default();
        sink.event(ProgressEvent::new("one".to_string()));
        sink.event(ProgressEvent::with_elapsed(
            "two".to_string(),
            Duration::from_secs(1),
        ));
        assert_eq!(sink.messages(), vec!["one", "two"]);
    }
}
