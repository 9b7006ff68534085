//! Transcript logging for reconciliation runs.
//!
//! Every run writes a timestamped transcript recording each step's outcome.
//! The transcript is pure observability output; it is never read back by
//! the tool. By default it lands in the deployment context's log directory
//! (the task-sequence log path, or the OS temp directory) as
//! `iis-certbind-YYYYMMDD-HHMMSS.log`.
//!
//! Entries are plain text or JSON lines:
//!
//! ```text
//! [2026-08-29T14:03:12Z] [INFO] step completed step=import-certificate
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;

use crate::error::Result;

/// Severity of a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    /// Informational.
    Info,
    /// Something unexpected that did not fail the step.
    Warn,
    /// A step failure.
    Error,
}

impl Level {
    fn as_str(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Output format for transcript entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TranscriptFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// A single transcript entry.
#[derive(Debug, Clone)]
pub struct Entry {
    /// UTC timestamp, RFC 3339.
    pub timestamp: String,
    /// Entry severity.
    pub level: Level,
    /// Message text.
    pub message: String,
    /// Structured key/value fields.
    pub fields: Vec<(String, String)>,
}

impl Entry {
    /// New entry stamped with the current time.
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            level,
            message: message.into(),
            fields: Vec::new(),
        }
    }

    /// Attach a field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((key.into(), value.into()));
        self
    }

    fn format_text(&self) -> String {
        let mut parts = vec![
            format!("[{}]", self.timestamp),
            format!("[{}]", self.level),
            self.message.clone(),
        ];
        for (k, v) in &self.fields {
            parts.push(format!("{}={}", k, v));
        }
        parts.join(" ")
    }

    fn format_json(&self) -> String {
        let mut obj = serde_json::Map::new();
        obj.insert("timestamp".into(), self.timestamp.clone().into());
        obj.insert("level".into(), self.level.as_str().into());
        obj.insert("message".into(), self.message.clone().into());
        for (k, v) in &self.fields {
            obj.insert(k.clone(), v.clone().into());
        }
        serde_json::Value::Object(obj).to_string()
    }
}

enum Sink {
    File(BufWriter<File>),
    Stdout(io::Stdout),
}

/// Transcript writer for one run.
pub struct Transcript {
    format: TranscriptFormat,
    path: Option<PathBuf>,
    sink: Mutex<Sink>,
}

impl Transcript {
    /// Create a timestamped transcript file under `dir`.
    ///
    /// The directory is created if it does not exist.
    pub fn create_in(dir: &Path, format: TranscriptFormat) -> Result<Self> {
        fs::create_dir_all(dir)?;

        let name = format!("iis-certbind-{}.log", Utc::now().format("%Y%m%d-%H%M%S"));
        let path = dir.join(name);

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            format,
            path: Some(path),
            sink: Mutex::new(Sink::File(BufWriter::new(file))),
        })
    }

    /// Transcript that writes to stdout instead of a file.
    pub fn stdout(format: TranscriptFormat) -> Self {
        Self {
            format,
            path: None,
            sink: Mutex::new(Sink::Stdout(io::stdout())),
        }
    }

    /// Path of the transcript file, if file-backed.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Write an entry.
    pub fn log(&self, entry: &Entry) -> Result<()> {
        let line = match self.format {
            TranscriptFormat::Text => entry.format_text(),
            TranscriptFormat::Json => entry.format_json(),
        };

        let mut sink = self.sink.lock().unwrap_or_else(|e| e.into_inner());
        match &mut *sink {
            Sink::File(writer) => {
                writeln!(writer, "{}", line)?;
                writer.flush()?;
            }
            Sink::Stdout(stdout) => {
                writeln!(stdout, "{}", line)?;
            }
        }
        Ok(())
    }

    /// Write an info entry.
    pub fn info(&self, message: impl Into<String>) -> Result<()> {
        self.log(&Entry::new(Level::Info, message))
    }

    /// Write a warning entry.
    pub fn warn(&self, message: impl Into<String>) -> Result<()> {
        self.log(&Entry::new(Level::Warn, message))
    }

    /// Write an error entry.
    pub fn error(&self, message: impl Into<String>) -> Result<()> {
        self.log(&Entry::new(Level::Error, message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_format() {
        let entry = Entry {
            timestamp: "2026-08-29T14:03:12Z".to_string(),
            level: Level::Info,
            message: "step completed".to_string(),
            fields: vec![("step".to_string(), "import-certificate".to_string())],
        };
        assert_eq!(
            entry.format_text(),
            "[2026-08-29T14:03:12Z] [INFO] step completed step=import-certificate"
        );
    }

    #[test]
    fn test_json_format_is_valid_json() {
        let entry = Entry::new(Level::Error, "binding \"removal\" failed")
            .with_field("step", "remove-binding");
        let parsed: serde_json::Value = serde_json::from_str(&entry.format_json()).unwrap();
        assert_eq!(parsed["level"], "ERROR");
        assert_eq!(parsed["step"], "remove-binding");
    }

    #[test]
    fn test_file_transcript_writes_lines() {
        let dir = tempfile::tempdir().unwrap();
        let transcript = Transcript::create_in(dir.path(), TranscriptFormat::Text).unwrap();
        transcript.info("run started").unwrap();
        transcript.error("step failed").unwrap();

        let contents = fs::read_to_string(transcript.path().unwrap()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("[INFO] run started"));
        assert!(lines[1].contains("[ERROR] step failed"));
    }

    #[test]
    fn test_create_in_makes_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("logs").join("certbind");
        let transcript = Transcript::create_in(&nested, TranscriptFormat::Text).unwrap();
        assert!(transcript.path().unwrap().starts_with(&nested));
    }
}
