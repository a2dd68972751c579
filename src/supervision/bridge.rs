//! Approval bridge: delivery of an escalated tool call to a human reviewer.
//!
//! The trait is transport-agnostic; [`ChannelBridge`] is the in-process
//! default -- a typed oneshot request/response channel per call id. The
//! requesting side blocks (bounded) on the receiver; the embedding UI calls
//! [`ChannelBridge::resolve`] when the reviewer decides. A timed-out entry is
//! removed so a late `resolve` returns false instead of completing a request
//! nobody is waiting on.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot;

/// Outcome of delivering an approval request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AckStatus {
    Success,
    Timeout,
    Error,
}

/// Acknowledgment returned by the bridge. On `Success`, `output` carries the
/// reviewer's decision text.
#[derive(Clone, Debug)]
pub struct BridgeAck {
    pub status: AckStatus,
    pub output: Option<String>,
    pub error_text: Option<String>,
}

#[async_trait]
pub trait ApprovalBridge: Send + Sync {
    async fn request(&self, call_id: &str, timeout_secs: u64) -> BridgeAck;
}

/// Announcement pushed to the UI when a request starts waiting.
#[derive(Clone, Debug)]
pub struct ApprovalPrompt {
    pub call_id: String,
    pub timeout_secs: u64,
}

/// In-process bridge backed by oneshot channels keyed by call id.
pub struct ChannelBridge {
    pending: Mutex<HashMap<String, oneshot::Sender<String>>>,
    notify_tx: Option<UnboundedSender<ApprovalPrompt>>,
}

impl ChannelBridge {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            notify_tx: None,
        }
    }

    /// Bridge that announces each new pending request on the given channel.
    pub fn with_notifications(notify_tx: UnboundedSender<ApprovalPrompt>) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            notify_tx: Some(notify_tx),
        }
    }

    /// Deliver the reviewer's decision for a waiting call.
    ///
    /// Returns false when no request is waiting under that id (unknown,
    /// already resolved, or timed out).
    pub fn resolve(&self, call_id: &str, decision: &str) -> bool {
        let sender = self.pending.lock().unwrap().remove(call_id);
        match sender {
            Some(tx) => tx.send(decision.to_string()).is_ok(),
            None => false,
        }
    }

    /// Call ids currently awaiting a decision.
    pub fn pending_ids(&self) -> Vec<String> {
        self.pending.lock().unwrap().keys().cloned().collect()
    }
}

impl Default for ChannelBridge {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ApprovalBridge for ChannelBridge {
    async fn request(&self, call_id: &str, timeout_secs: u64) -> BridgeAck {
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap()
            .insert(call_id.to_string(), tx);

        if let Some(notify) = &self.notify_tx {
            let _ = notify.send(ApprovalPrompt {
                call_id: call_id.to_string(),
                timeout_secs,
            });
        }

        match tokio::time::timeout(Duration::from_secs(timeout_secs), rx).await {
            Ok(Ok(decision)) => BridgeAck {
                status: AckStatus::Success,
                output: Some(decision),
                error_text: None,
            },
            Ok(Err(_)) => {
                // Sender dropped without a decision; treat as transport error.
                self.pending.lock().unwrap().remove(call_id);
                BridgeAck {
                    status: AckStatus::Error,
                    output: None,
                    error_text: Some("approval channel closed without a decision".to_string()),
                }
            }
            Err(_) => {
                self.pending.lock().unwrap().remove(call_id);
                BridgeAck {
                    status: AckStatus::Timeout,
                    output: None,
                    error_text: None,
                }
            }
        }
    }
}
