use serde::{Deserialize, Serialize};
use std::path::Path;

/// Result artifact written as `result.json` next to a job's stdout/stderr.
///
/// Timestamps are unix seconds so the scheduler-side batch script can write
/// the same record with nothing but `date` and `printf`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub index: usize,
    /// Absent when the process was killed before it could exit on its own.
    pub exit_code: Option<i32>,
    pub started_at: i64,
    pub finished_at: i64,
}

impl JobResult {
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn duration_secs(&self) -> i64 {
        self.finished_at - self.started_at
    }

    pub fn write_to_file(&self, path: &Path) -> Result<(), std::io::Error> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        std::fs::write(path, json)
    }

    pub fn read_from_file(path: &Path) -> Result<Self, std::io::Error> {
        let data = std::fs::read_to_string(path)?;
        serde_json::from_str(&data)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}
