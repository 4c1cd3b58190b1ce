//! Import progress reporting.
//!
//! `mdash import` can run for minutes against a rate-limited API. Progress
//! goes to **stderr** so the summary on stdout stays parseable.

use std::io::Write;

/// A single progress event for one import source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ImportProgressEvent {
    /// Pages are being read from the API. Total unknown.
    Fetching { source: String, library: String },
    /// Entries are being written: n processed out of total.
    Storing { source: String, n: u64, total: u64 },
    /// Source committed.
    Finished {
        source: String,
        inserted: u64,
        ignored: u64,
        skipped: u64,
    },
}

/// Receives import progress. Implementations write to stderr (human or JSON).
pub trait ImportProgressReporter: Send + Sync {
    fn report(&self, event: ImportProgressEvent);
}

/// Human-friendly progress: "import sex  storing  1,234 / 5,000 entries".
pub struct StderrProgress;

impl ImportProgressReporter for StderrProgress {
    fn report(&self, event: ImportProgressEvent) {
        let line = match &event {
            ImportProgressEvent::Fetching { source, library } => {
                format!("import {}  fetching library {}...\n", source, library)
            }
            ImportProgressEvent::Storing { source, n, total } => format!(
                "import {}  storing  {} / {} entries\n",
                source,
                format_number(*n),
                format_number(*total)
            ),
            ImportProgressEvent::Finished {
                source,
                inserted,
                ignored,
                skipped,
            } => format!(
                "import {}  done  +{} new, {} existing, {} skipped\n",
                source,
                format_number(*inserted),
                format_number(*ignored),
                format_number(*skipped)
            ),
        };
        let mut err = std::io::stderr().lock();
        let _ = err.write_all(line.as_bytes());
        let _ = err.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl JsonProgress {
    fn to_json(event: &ImportProgressEvent) -> serde_json::Value {
        match event {
            ImportProgressEvent::Fetching { source, library } => serde_json::json!({
                "event": "progress",
                "source": source,
                "library": library,
                "phase": "fetching"
            }),
            ImportProgressEvent::Storing { source, n, total } => serde_json::json!({
                "event": "progress",
                "source": source,
                "phase": "storing",
                "n": n,
                "total": total
            }),
            ImportProgressEvent::Finished {
                source,
                inserted,
                ignored,
                skipped,
            } => serde_json::json!({
                "event": "done",
                "source": source,
                "inserted": inserted,
                "ignored": ignored,
                "skipped": skipped
            }),
        }
    }
}

impl ImportProgressReporter for JsonProgress {
    fn report(&self, event: ImportProgressEvent) {
        if let Ok(line) = serde_json::to_string(&Self::to_json(&event)) {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{}", line);
            let _ = err.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ImportProgressReporter for NoProgress {
    fn report(&self, _event: ImportProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ImportProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn json_events() {
        let v = JsonProgress::to_json(&ImportProgressEvent::Storing {
            source: "sex".into(),
            n: 3,
            total: 10,
        });
        assert_eq!(v["phase"], "storing");
        assert_eq!(v["total"], 10);

        let v = JsonProgress::to_json(&ImportProgressEvent::Finished {
            source: "sex".into(),
            inserted: 2,
            ignored: 1,
            skipped: 0,
        });
        assert_eq!(v["event"], "done");
        assert_eq!(v["inserted"], 2);
    }
}
