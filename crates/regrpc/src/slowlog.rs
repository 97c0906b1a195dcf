//! # Slow-call log
//!
//! JSON lines describing calls that exceeded the slow threshold, written to a
//! size-rotated file. The sink is opened lazily on the first entry and stays
//! open for the life of the `SlowLog`; concurrent writers are serialized.
//!
//! Each line looks like:
//!
//! ```text
//! {"level":"warn","ts":"...","msg":"rpc monitor","cost":120,
//!  "service":{...},"request":...,"response":...}
//! ```

use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::OnceLock;

use chrono::SecondsFormat;
use serde::Serialize;
use tracing::error;
use tracing::info;
use tracing::warn;
use wirerpc::Payload;

use crate::monitor::MonitorRecord;
use crate::rotate::RotatingFile;
use crate::rotate::RotationPolicy;

const SLOW_MESSAGE: &str = "rpc monitor";

static SHARED: OnceLock<Arc<SlowLog>> = OnceLock::new();

#[derive(Serialize)]
struct SlowEntry<'a> {
    level: &'static str,
    ts: String,
    msg: &'static str,
    cost: u64,
    service: &'a MonitorRecord,
    request: &'a Payload,
    response: Option<&'a Payload>,
}

#[derive(Debug)]
pub struct SlowLog {
    path: PathBuf,
    policy: RotationPolicy,
    // `None` once opening failed; the log then stays disabled.
    sink: OnceLock<Option<Mutex<RotatingFile>>>,
}

impl SlowLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_policy(path, RotationPolicy::default())
    }

    pub fn with_policy(path: impl Into<PathBuf>, policy: RotationPolicy) -> Self {
        Self {
            path: path.into(),
            policy,
            sink: OnceLock::new(),
        }
    }

    /// The process-wide slow-call log. The first caller picks the path.
    pub fn shared(path: impl AsRef<Path>) -> Arc<SlowLog> {
        let path = path.as_ref();
        let log = SHARED.get_or_init(|| Arc::new(SlowLog::new(path)));
        if log.path != path {
            warn!(
                requested = %path.display(),
                active = %log.path.display(),
                "slow-call log already initialised with another path"
            );
        }
        log.clone()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the sink has been opened (or failed to open).
    pub fn is_initialized(&self) -> bool {
        self.sink.get().is_some()
    }

    fn sink(&self) -> Option<&Mutex<RotatingFile>> {
        self.sink
            .get_or_init(|| match RotatingFile::open(&self.path, self.policy.clone()) {
                Ok(file) => {
                    info!(path = %self.path.display(), "slow-call log opened");
                    Some(Mutex::new(file))
                }
                Err(e) => {
                    error!(
                        path = %self.path.display(),
                        error = %e,
                        "opening slow-call log failed"
                    );
                    None
                }
            })
            .as_ref()
    }

    /// Appends one entry; returns whether it was written.
    pub fn write(
        &self,
        record: &MonitorRecord,
        request: &Payload,
        response: Option<&Payload>,
    ) -> bool {
        let Some(sink) = self.sink() else {
            return false;
        };
        let entry = SlowEntry {
            level: "warn",
            ts: chrono::Local::now().to_rfc3339_opts(SecondsFormat::Millis, false),
            msg: SLOW_MESSAGE,
            cost: record.cost_time,
            service: record,
            request,
            response,
        };
        let mut line = match serde_json::to_vec(&entry) {
            Ok(line) => line,
            Err(e) => {
                error!(error = %e, "encoding slow-call entry failed");
                return false;
            }
        };

        line.push(b'\n');

        // One buffer per entry so a rotation never lands inside a line.
        let mut file = sink.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match file.write_all(&line).and_then(|_| file.flush()) {
            Ok(()) => true,
            Err(e) => {
                error!(
                    path = %self.path.display(),
                    error = %e,
                    "writing slow-call entry failed"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;
    use serde_json::json;

    use super::*;

    fn record() -> MonitorRecord {
        MonitorRecord {
            registry_host: "127.0.0.1:8500".into(),
            service_name: "Calculator".into(),
            method_name: "Add".into(),
            cost_time: 120,
            ..MonitorRecord::default()
        }
    }

    #[test]
    fn test_lazy_open_and_entry_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slow.log");
        let log = SlowLog::new(&path);
        assert!(!log.is_initialized());
        assert!(!path.exists());

        assert!(log.write(&record(), &json!([3, 4]), Some(&json!(7))));
        assert!(log.is_initialized());

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 1);

        let entry: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(entry["msg"], "rpc monitor");
        assert_eq!(entry["level"], "warn");
        assert_eq!(entry["cost"], 120);
        assert_eq!(entry["service"]["service_name"], "Calculator");
        assert_eq!(entry["request"], json!([3, 4]));
        assert_eq!(entry["response"], json!(7));
    }

    #[test]
    fn test_unopenable_path_disables_log() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where a directory is expected.
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"x").unwrap();

        let log = SlowLog::new(blocker.join("slow.log"));
        assert!(!log.write(&record(), &json!(null), None));
        assert!(log.is_initialized());
        assert!(!log.write(&record(), &json!(null), None));
    }

    #[test]
    fn test_concurrent_writers_produce_whole_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(SlowLog::new(dir.path().join("slow.log")));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let log = log.clone();
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        log.write(&record(), &json!({ "writer": i }), None);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let text = std::fs::read_to_string(log.path()).unwrap();
        assert_eq!(text.lines().count(), 200);
        for line in text.lines() {
            serde_json::from_str::<Value>(line).unwrap();
        }
    }

    #[test]
    fn test_rotation_keeps_lines_whole() {
        let dir = tempfile::tempdir().unwrap();

        // Entries for the same record have a fixed length.
        let sizing = SlowLog::new(dir.path().join("sizing/slow.log"));
        sizing.write(&record(), &json!("req"), None);
        let entry_len = std::fs::metadata(sizing.path()).unwrap().len();

        // Two entries overshoot the limit by exactly their trailing newline.
        let policy = RotationPolicy {
            max_size: 2 * entry_len - 1,
            max_age: std::time::Duration::ZERO,
            max_backups: 0,
            compress: false,
        };
        let path = dir.path().join("rotating/slow.log");
        let log = SlowLog::with_policy(&path, policy);
        for _ in 0..3 {
            assert!(log.write(&record(), &json!("req"), None));
        }

        let mut lines = 0;
        for entry in std::fs::read_dir(path.parent().unwrap()).unwrap() {
            let text = std::fs::read_to_string(entry.unwrap().path()).unwrap();
            assert!(text.ends_with('\n'), "file ends mid-entry: {:?}", text);
            for line in text.lines() {
                assert!(!line.is_empty());
                serde_json::from_str::<Value>(line).unwrap();
                lines += 1;
            }
        }
        assert_eq!(lines, 3);
    }
}
