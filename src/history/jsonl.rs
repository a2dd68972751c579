//! JSONL-backed history log.
//!
//! One file per agent at `{root}/{session_id}/{agent_id}.jsonl`, one JSON
//! object per line. Uses synchronous `std::fs` inside the async trait since
//! writes are small, appended, and flushed per record -- no async I/O
//! complexity needed for append-only logging.

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{HistoryLog, HistoryRecord};

pub struct JsonlHistoryLog {
    root: PathBuf,
}

impl JsonlHistoryLog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, session_id: &str, agent_id: &str) -> PathBuf {
        self.root.join(session_id).join(format!("{agent_id}.jsonl"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl HistoryLog for JsonlHistoryLog {
    async fn append(
        &self,
        session_id: &str,
        agent_id: &str,
        record: &HistoryRecord,
    ) -> anyhow::Result<()> {
        let path = self.path_for(session_id, agent_id);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        serde_json::to_writer(&mut file, record)?;
        file.write_all(b"\n")?;
        file.flush()?;
        Ok(())
    }

    async fn read_all(&self, session_id: &str, agent_id: &str) -> anyhow::Result<Vec<HistoryRecord>> {
        let path = self.path_for(session_id, agent_id);
        let file = match fs::File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for (lineno, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: HistoryRecord = serde_json::from_str(&line).map_err(|e| {
                anyhow::anyhow!("{}: invalid record on line {}: {e}", path.display(), lineno + 1)
            })?;
            records.push(record);
        }
        Ok(records)
    }
}
