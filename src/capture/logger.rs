//! Per-port traffic logger.
//!
//! # Layout
//! ```text
//! {root}/{port}.log                    access log (console mirror via tracing)
//! {root}/{port}-{mtime}.log            previous run's access log
//! {root}/{port}/{ts}-req               request dumps
//! {root}/{port}/{ts}-resp              response dumps
//! ```
//!
//! # Design Decisions
//! - Rotation happens once, at creation (restart), never on size
//! - One mutex around the access-log file; each line is a single write
//! - Dump files are distinct per exchange and written whole
//! - Async callers go through [`TrafficLogger::append`] and
//!   [`TrafficLogger::save_dump`], which run the file I/O on the blocking
//!   pool instead of a runtime worker

use std::fmt::Display;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Local};
use thiserror::Error;

use crate::capture::correlation::Timestamp;

/// Failure creating the logger's directory or files.
#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("failed to create log directory {path}: {source}")]
    Directory { path: PathBuf, source: io::Error },
    #[error("failed to create log file {path}: {source}")]
    File { path: PathBuf, source: io::Error },
}

/// Which side of an exchange a dump holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpKind {
    Request,
    Response,
}

impl DumpKind {
    fn suffix(self) -> &'static str {
        match self {
            DumpKind::Request => "req",
            DumpKind::Response => "resp",
        }
    }
}

/// Access-log and dump sink for one proxy instance.
#[derive(Debug)]
pub struct TrafficLogger {
    port: u16,
    dump_dir: PathBuf,
    log_path: PathBuf,
    file: Mutex<File>,
}

impl TrafficLogger {
    /// Ensure `{root}/{port}/` exists, rotate any previous `{port}.log`,
    /// and open a fresh one.
    pub fn open(root: &Path, port: u16) -> Result<Self, LoggerError> {
        let dump_dir = root.join(port.to_string());
        fs::create_dir_all(&dump_dir).map_err(|source| LoggerError::Directory {
            path: dump_dir.clone(),
            source,
        })?;

        let log_path = root.join(format!("{}.log", port));
        match rotate(&log_path, root, port) {
            Ok(Some(rotated)) => {
                tracing::info!(port, from = ?log_path, to = ?rotated, "Rotated previous access log");
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(port, path = ?log_path, error = %e, "Failed to rotate access log");
            }
        }

        let file = File::create(&log_path).map_err(|source| LoggerError::File {
            path: log_path.clone(),
            source,
        })?;

        Ok(Self {
            port,
            dump_dir,
            log_path,
            file: Mutex::new(file),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Directory holding this port's dump files.
    pub fn dump_dir(&self) -> &Path {
        &self.dump_dir
    }

    /// Path of the current access-log file.
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Append one access-log line to the file and mirror it to the console.
    pub fn access(&self, line: impl Display) {
        let line = format!("{}\n", line);
        tracing::info!(target: "hdproxy::access", port = self.port, "{}", line.trim_end());

        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = file.write_all(line.as_bytes()) {
            tracing::error!(port = self.port, error = %e, "Failed to write access log");
        }
    }

    /// Path a dump for `ts` would be written to.
    pub fn dump_path(&self, ts: Timestamp, kind: DumpKind) -> PathBuf {
        self.dump_dir.join(format!("{}-{}", ts, kind.suffix()))
    }

    /// Write `summary` followed by the raw `wire` dump to `{ts}-{req|resp}`.
    pub fn write_dump(&self, ts: Timestamp, kind: DumpKind, summary: &str, wire: &[u8]) -> io::Result<PathBuf> {
        let path = self.dump_path(ts, kind);
        let mut file = File::create(&path)?;
        file.write_all(summary.as_bytes())?;
        file.write_all(wire)?;
        Ok(path)
    }

    /// [`TrafficLogger::access`] on the blocking pool.
    pub async fn append(self: &Arc<Self>, line: impl Display) {
        let line = line.to_string();
        let logger = Arc::clone(self);
        if let Err(e) = tokio::task::spawn_blocking(move || logger.access(line)).await {
            tracing::error!(port = self.port, error = %e, "Access log task failed");
        }
    }

    /// [`TrafficLogger::write_dump`] on the blocking pool.
    pub async fn save_dump(
        self: &Arc<Self>,
        ts: Timestamp,
        kind: DumpKind,
        summary: String,
        wire: Vec<u8>,
    ) -> io::Result<PathBuf> {
        let logger = Arc::clone(self);
        tokio::task::spawn_blocking(move || logger.write_dump(ts, kind, &summary, &wire))
            .await
            .map_err(io::Error::other)?
    }
}

/// Rename a non-empty `{port}.log` to `{port}-{mtime}.log`.
fn rotate(log_path: &Path, root: &Path, port: u16) -> io::Result<Option<PathBuf>> {
    let meta = match fs::metadata(log_path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    if meta.len() == 0 {
        return Ok(None);
    }

    let modified: DateTime<Local> = meta.modified()?.into();
    let rotated = root.join(format!("{}-{}.log", port, modified.format("%Y%m%d%H%M%S")));
    fs::rename(log_path, &rotated)?;
    Ok(Some(rotated))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_directory_and_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let logger = TrafficLogger::open(dir.path(), 8080).unwrap();

        assert!(dir.path().join("8080").is_dir());
        assert_eq!(logger.log_path(), dir.path().join("8080.log"));
        assert!(logger.log_path().is_file());
    }

    #[test]
    fn rotates_non_empty_log_on_restart() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("9000.log"), "old line\n").unwrap();

        let logger = TrafficLogger::open(dir.path(), 9000).unwrap();

        let rotated: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with("9000-") && name.ends_with(".log"))
            .collect();
        assert_eq!(rotated.len(), 1);
        assert_eq!(rotated[0].len(), "9000-20260101000000.log".len());
        assert_eq!(
            fs::read_to_string(dir.path().join(&rotated[0])).unwrap(),
            "old line\n"
        );
        assert_eq!(fs::read_to_string(logger.log_path()).unwrap(), "");
    }

    #[test]
    fn empty_log_is_not_rotated() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("7000.log"), "").unwrap();

        TrafficLogger::open(dir.path(), 7000).unwrap();

        let count = fs::read_dir(dir.path()).unwrap().count();
        // 7000.log + 7000/
        assert_eq!(count, 2);
    }

    #[test]
    fn access_lines_append() {
        let dir = tempfile::tempdir().unwrap();
        let logger = TrafficLogger::open(dir.path(), 8081).unwrap();

        logger.access("first");
        logger.access(format_args!("second {}", 2));

        assert_eq!(
            fs::read_to_string(logger.log_path()).unwrap(),
            "first\nsecond 2\n"
        );
    }

    #[test]
    fn concurrent_access_lines_never_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let logger = std::sync::Arc::new(TrafficLogger::open(dir.path(), 8082).unwrap());

        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let logger = std::sync::Arc::clone(&logger);
                std::thread::spawn(move || {
                    for i in 0..200 {
                        logger.access(format!("worker-{}-line-{}-{}", worker, i, "x".repeat(64)));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let contents = fs::read_to_string(logger.log_path()).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 800);
        assert!(lines.iter().all(|l| l.starts_with("worker-") && l.ends_with(&"x".repeat(64))));
    }

    #[test]
    fn dump_files_named_by_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let logger = TrafficLogger::open(dir.path(), 8083).unwrap();
        let ts = Timestamp::from(1_700_000_000_000_000_001);

        let req = logger.write_dump(ts, DumpKind::Request, "summary\n", b"GET / HTTP/1.1\r\n\r\n").unwrap();
        let resp = logger.write_dump(ts, DumpKind::Response, "summary\n", b"HTTP/1.1 200 OK\r\n\r\n").unwrap();

        assert_eq!(req, dir.path().join("8083").join("1700000000000000001-req"));
        assert_eq!(resp, dir.path().join("8083").join("1700000000000000001-resp"));
        assert_eq!(
            fs::read_to_string(req).unwrap(),
            "summary\nGET / HTTP/1.1\r\n\r\n"
        );
    }

    #[tokio::test]
    async fn async_writes_land_before_returning() {
        let dir = tempfile::tempdir().unwrap();
        let logger = Arc::new(TrafficLogger::open(dir.path(), 8084).unwrap());
        let ts = Timestamp::from(1_700_000_000_000_000_002);

        logger.append("one").await;
        logger.append(format!("two {}", 2)).await;
        let path = logger
            .save_dump(ts, DumpKind::Request, "summary\n".into(), b"GET / HTTP/1.1\r\n\r\n".to_vec())
            .await
            .unwrap();

        assert_eq!(fs::read_to_string(logger.log_path()).unwrap(), "one\ntwo 2\n");
        assert!(fs::read_to_string(path).unwrap().starts_with("summary\nGET /"));
    }

    #[tokio::test]
    async fn save_dump_reports_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let logger = Arc::new(TrafficLogger::open(dir.path(), 8085).unwrap());
        fs::remove_dir_all(logger.dump_dir()).unwrap();

        let result = logger
            .save_dump(Timestamp::from(1), DumpKind::Response, String::new(), Vec::new())
            .await;
        assert!(result.is_err());
    }
}
