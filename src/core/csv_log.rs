//! Append-only CSV log of sampled serial lines.
//!
//! Each entry is one line:
//!
//! ```text
//! 2020-08-17T21:26:00.123456;17/08/20;21:26:00;<raw serial line>
//! ```
//!
//! All three timestamp columns come from the same instant. The file is
//! opened and closed around every write so that another process can move
//! or truncate it between samples.

use std::{
    fs::{self, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Local};

use super::error::SerialError;

pub const SEPARATOR: char = ';';

/// Payload recorded instead of a line that is not ASCII.
pub const DECODE_ERROR: &str = "decode error";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub timestamp: String,
    pub date: String,
    pub time: String,
    pub payload: String,
}

impl LogEntry {
    pub fn new(now: DateTime<Local>, payload: impl Into<String>) -> Self {
        Self {
            timestamp: now.format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
            date: now.format("%d/%m/%y").to_string(),
            time: now.format("%H:%M:%S").to_string(),
            payload: payload.into(),
        }
    }

    /// Decodes a raw serial line as ASCII, dropping its line terminator.
    /// Anything else becomes a `decode error` entry.
    pub fn from_raw(now: DateTime<Local>, raw: &[u8]) -> Self {
        if !raw.is_ascii() {
            return Self::new(now, DECODE_ERROR);
        }
        let line = String::from_utf8_lossy(raw);
        Self::new(now, line.trim_end_matches(['\r', '\n']))
    }

    pub fn is_decode_error(&self) -> bool {
        self.payload == DECODE_ERROR
    }

    /// The entry as written, newline included.
    pub fn to_line(&self) -> String {
        format!(
            "{}{SEPARATOR}{}{SEPARATOR}{}{SEPARATOR}{}\n",
            self.timestamp, self.date, self.time, self.payload
        )
    }
}

#[derive(Debug, Clone)]
pub struct CsvLog {
    path: PathBuf,
}

impl CsvLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one entry, creating the file and its parent directory if
    /// needed. The handle is dropped before returning.
    pub fn append(&self, entry: &LogEntry) -> Result<(), SerialError> {
        let write_err = |source: io::Error| SerialError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_err)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(write_err)?;
        file.write_all(entry.to_line().as_bytes())
            .map_err(write_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use tempfile::TempDir;

    use super::*;

    fn instant() -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2020, 8, 17, 21, 26, 5)
            .single()
            .unwrap()
    }

    #[test]
    fn test_entry_format() {
        let entry = LogEntry::from_raw(instant(), b"512,300,29.43\r\n");
        assert_eq!(
            entry.to_line(),
            "2020-08-17T21:26:05.000000;17/08/20;21:26:05;512,300,29.43\n"
        );
    }

    #[test]
    fn test_non_ascii_is_decode_error() {
        let entry = LogEntry::from_raw(instant(), &[0x35, 0xff, 0x0a]);
        assert!(entry.is_decode_error());
        assert!(entry.to_line().ends_with(";21:26:05;decode error\n"));
    }

    #[test]
    fn test_append_creates_parent_and_keeps_order() {
        let dir = TempDir::new().unwrap();
        let log = CsvLog::new(dir.path().join("GarduinoOutput/garduinoOutputV2_00.csv"));

        log.append(&LogEntry::new(instant(), "first")).unwrap();
        log.append(&LogEntry::new(instant(), "second")).unwrap();

        let content = fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(";first"));
        assert!(lines[1].ends_with(";second"));
    }

    #[test]
    fn test_append_to_directory_fails() {
        let dir = TempDir::new().unwrap();
        let log = CsvLog::new(dir.path());
        assert!(matches!(
            log.append(&LogEntry::new(instant(), "x")),
            Err(SerialError::Write { .. })
        ));
    }
}
