//! In-memory history log for tests and single-process embedding.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{HistoryLog, HistoryRecord};

#[derive(Default)]
pub struct MemoryHistoryLog {
    records: Mutex<HashMap<(String, String), Vec<HistoryRecord>>>,
}

impl MemoryHistoryLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryLog for MemoryHistoryLog {
    async fn append(
        &self,
        session_id: &str,
        agent_id: &str,
        record: &HistoryRecord,
    ) -> anyhow::Result<()> {
        self.records
            .lock()
            .unwrap()
            .entry((session_id.to_string(), agent_id.to_string()))
            .or_default()
            .push(record.clone());
        Ok(())
    }

    async fn read_all(&self, session_id: &str, agent_id: &str) -> anyhow::Result<Vec<HistoryRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .get(&(session_id.to_string(), agent_id.to_string()))
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::AgentMessage;

    #[tokio::test]
    async fn append_preserves_order() {
        let log = MemoryHistoryLog::new();
        let first = HistoryRecord::Message {
            message: AgentMessage::user("one"),
        };
        let second = HistoryRecord::Message {
            message: AgentMessage::user("two"),
        };
        log.append("s", "a", &first).await.unwrap();
        log.append("s", "a", &second).await.unwrap();

        assert_eq!(log.read_all("s", "a").await.unwrap(), vec![first, second]);
        assert!(log.read_all("s", "other").await.unwrap().is_empty());
    }
}
