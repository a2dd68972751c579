//! Tiered supervision gate for candidate tool calls.
//!
//! Decision pipeline for a single gated call:
//!
//! 1. Deterministic rules ([`super::rules::RuleSet`]) -- allowlists and
//!    read-only command matching. Approves or falls through.
//! 2. Model judgment -- an optional [`TextModel`] is asked to judge the
//!    request; its reply must contain a `{"decision": ..., "reason": ...}`
//!    JSON object somewhere in the text. Anything unparseable escalates,
//!    never approves.
//! 3. Human escalation -- a bounded wait on the [`ApprovalBridge`]. Timeout
//!    and transport failure are errors, distinct from an explicit denial.

use std::sync::Arc;

use serde::Deserialize;

use super::bridge::{AckStatus, ApprovalBridge};
use super::rules::RuleSet;
use crate::error::ApprovalError;
use crate::runner::TextModel;

/// A candidate tool call presented to the gate.
#[derive(Clone, Debug)]
pub struct SupervisionRequest {
    pub tool_name: String,
    pub arguments: serde_json::Value,
    pub task_id: String,
    pub task_name: String,
    pub task_description: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Reject,
    Escalate,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SupervisionDecision {
    pub decision: Decision,
    pub reason: String,
}

impl SupervisionDecision {
    fn approve(reason: impl Into<String>) -> Self {
        Self {
            decision: Decision::Approve,
            reason: reason.into(),
        }
    }

    fn reject(reason: impl Into<String>) -> Self {
        Self {
            decision: Decision::Reject,
            reason: reason.into(),
        }
    }

    fn escalate(reason: impl Into<String>) -> Self {
        Self {
            decision: Decision::Escalate,
            reason: reason.into(),
        }
    }
}

/// Final outcome after all tiers, applied to the tool call part in place.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedApproval {
    pub approved: bool,
    pub reason: String,
}

/// Reason attached when a model reply yields no usable decision.
pub const UNPARSEABLE_DECISION_REASON: &str =
    "could not parse a decision from the supervisor model; escalating to human review";

#[derive(Deserialize)]
struct DecisionJson {
    decision: String,
    #[serde(default)]
    reason: String,
}

/// Extract a supervision decision from free-form model text.
///
/// Scans for the first parseable JSON object containing a `decision` field
/// anywhere in the text. A missing object, a parse failure, or an
/// unrecognized decision value all default to escalate.
pub fn parse_decision(text: &str) -> SupervisionDecision {
    for (idx, ch) in text.char_indices() {
        if ch != '{' {
            continue;
        }
        let mut values = serde_json::Deserializer::from_str(&text[idx..]).into_iter::<DecisionJson>();
        let Some(Ok(parsed)) = values.next() else {
            continue;
        };
        return match parsed.decision.to_ascii_lowercase().as_str() {
            "approve" | "approved" => SupervisionDecision::approve(parsed.reason),
            "reject" | "rejected" | "deny" | "denied" => SupervisionDecision::reject(parsed.reason),
            "escalate" => SupervisionDecision::escalate(if parsed.reason.is_empty() {
                "supervisor model requested human review".to_string()
            } else {
                parsed.reason
            }),
            _ => SupervisionDecision::escalate(UNPARSEABLE_DECISION_REASON),
        };
    }
    SupervisionDecision::escalate(UNPARSEABLE_DECISION_REASON)
}

fn judgment_prompt(req: &SupervisionRequest) -> String {
    format!(
        "You supervise tool calls made by an autonomous sub-agent. Judge whether this call \
         is safe and consistent with the agent's task.\n\n\
         Task: {} ({})\nTask description: {}\n\nTool: {}\nArguments: {}\n\n\
         Reply with a JSON object: {{\"decision\": \"approve\"|\"reject\"|\"escalate\", \
         \"reason\": \"...\"}}. Escalate when uncertain.",
        req.task_name, req.task_id, req.task_description, req.tool_name, req.arguments
    )
}

/// Tiered decision engine. Construct once per engine and share.
pub struct SupervisionService {
    rules: RuleSet,
    model: Option<Arc<dyn TextModel>>,
}

impl SupervisionService {
    /// Build the service with an optional tier-2 judgment model.
    pub fn new(model: Option<Arc<dyn TextModel>>) -> anyhow::Result<Self> {
        let rules = RuleSet::new()
            .map_err(|e| anyhow::anyhow!("Failed to compile read-only command patterns: {e}"))?;
        Ok(Self { rules, model })
    }

    /// Run tiers 1 and 2. Never blocks on a human.
    pub async fn evaluate(&self, req: &SupervisionRequest) -> SupervisionDecision {
        // Tier 1: deterministic rules.
        if let Some((matched, reason)) = self.rules.evaluate(&req.tool_name, &req.arguments) {
            tracing::debug!(
                tool = %req.tool_name,
                category = matched.category(),
                "tool call auto-approved by rule tier"
            );
            return SupervisionDecision::approve(format!("{}: {reason}", matched.category()));
        }

        // Tier 2: model judgment, skipped when no model is configured.
        let Some(model) = &self.model else {
            return SupervisionDecision::escalate(
                "no supervisor model configured; escalating to human review",
            );
        };

        match model.complete(&judgment_prompt(req)).await {
            Ok(text) => parse_decision(&text),
            Err(e) => {
                tracing::warn!(tool = %req.tool_name, error = %e, "supervisor model failed");
                SupervisionDecision::escalate(format!("supervisor model error: {e}"))
            }
        }
    }

    /// Run the full pipeline for one gated call, including the bounded human
    /// wait on escalation.
    ///
    /// An explicit rejection (tier 2 or reviewer) resolves to a denial; a
    /// bridge timeout or transport failure is an [`ApprovalError`] so the
    /// caller can tell "denied" from "broke".
    pub async fn resolve(
        &self,
        req: &SupervisionRequest,
        bridge: &dyn ApprovalBridge,
        call_id: &str,
        timeout_secs: u64,
    ) -> Result<ResolvedApproval, ApprovalError> {
        let decision = self.evaluate(req).await;
        match decision.decision {
            Decision::Approve => Ok(ResolvedApproval {
                approved: true,
                reason: decision.reason,
            }),
            Decision::Reject => Ok(ResolvedApproval {
                approved: false,
                reason: decision.reason,
            }),
            Decision::Escalate => {
                tracing::info!(call_id, tool = %req.tool_name, "escalating tool call to human review");
                let ack = bridge.request(call_id, timeout_secs).await;
                match ack.status {
                    AckStatus::Success => {
                        let output = ack.output.unwrap_or_default();
                        Ok(reviewer_decision(&output))
                    }
                    AckStatus::Timeout => Err(ApprovalError::Timeout {
                        call_id: call_id.to_string(),
                        timeout_secs,
                    }),
                    AckStatus::Error => Err(ApprovalError::Bridge {
                        call_id: call_id.to_string(),
                        message: ack
                            .error_text
                            .unwrap_or_else(|| "unspecified bridge failure".to_string()),
                    }),
                }
            }
        }
    }
}

/// Interpret the reviewer's free-text decision from a successful ack.
fn reviewer_decision(output: &str) -> ResolvedApproval {
    let normalized = output.trim().to_ascii_lowercase();
    if matches!(normalized.as_str(), "approve" | "approved" | "yes" | "allow") {
        ResolvedApproval {
            approved: true,
            reason: "approved by reviewer".to_string(),
        }
    } else {
        ResolvedApproval {
            approved: false,
            reason: if output.trim().is_empty() {
                "denied by reviewer".to_string()
            } else {
                format!("denied by reviewer: {}", output.trim())
            },
        }
    }
}
