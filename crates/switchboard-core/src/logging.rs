//! Raw engine stream logs.
//!
//! One append-only file per session under the configured log directory. Each
//! line records the direction (STDIN/STDOUT/STDERR/EXIT) and a UTC timestamp.

use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::Path,
    sync::{Arc, Mutex},
};

use chrono::{SecondsFormat, Utc};

/// Shared handle to a session log. `None` inside means logging is off.
pub type LogHandle = Arc<Mutex<Option<File>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Stdin,
    Stdout,
    Stderr,
    Exit,
}

impl Direction {
    fn as_str(&self) -> &'static str {
        match self {
            Direction::Stdin => "STDIN",
            Direction::Stdout => "STDOUT",
            Direction::Stderr => "STDERR",
            Direction::Exit => "EXIT",
        }
    }
}

pub fn disabled() -> LogHandle {
    Arc::new(Mutex::new(None))
}

/// Append a timestamped line (no-op when logging is off).
pub fn log_line(handle: &LogHandle, direction: Direction, data: &str) {
    if let Ok(mut guard) = handle.lock() {
        if let Some(ref mut file) = *guard {
            let ts = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
            let _ = writeln!(file, "[{}] {}: {}", ts, direction.as_str(), data);
            let _ = file.flush();
        }
    }
}

/// Open (or create) `{log_dir}/{log_id}.log`. Failures disable logging.
pub fn open_log_file(log_dir: Option<&Path>, log_id: &str) -> LogHandle {
    let file = log_dir.and_then(|dir| {
        std::fs::create_dir_all(dir).ok()?;
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(format!("{}.log", log_id)))
            .map_err(|e| log::warn!("Could not open stream log in {}: {}", dir.display(), e))
            .ok()
    });
    Arc::new(Mutex::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_log_file_creates_file() {
        let dir = tempdir().unwrap();
        let handle = open_log_file(Some(dir.path()), "session-1");
        assert!(handle.lock().unwrap().is_some());
        assert!(dir.path().join("session-1.log").exists());
    }

    #[test]
    fn open_log_file_none_dir() {
        let handle = open_log_file(None, "session-1");
        assert!(handle.lock().unwrap().is_none());
    }

    #[test]
    fn log_line_writes_direction_and_timestamp() {
        let dir = tempdir().unwrap();
        let handle = open_log_file(Some(dir.path()), "s");
        log_line(&handle, Direction::Stdout, r#"{"type":"result"}"#);
        log_line(&handle, Direction::Exit, "code=0");

        let contents = std::fs::read_to_string(dir.path().join("s.log")).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains(r#"STDOUT: {"type":"result"}"#));
        assert!(lines[0].starts_with('['));
        assert!(lines[0].contains("Z]"));
        assert!(lines[1].ends_with("EXIT: code=0"));
    }

    #[test]
    fn log_line_handles_disabled_handle() {
        log_line(&disabled(), Direction::Stdin, "ignored");
    }
}
