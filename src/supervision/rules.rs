//! Tier-1 deterministic rules for the approval gate.
//!
//! Two allowlists of tool names auto-approve outright; shell-style tools
//! auto-approve only when the command is conservatively read-only. The
//! `RegexSet` is compiled once at construction for efficient multi-pattern
//! matching. Anything unmatched falls through to the next tier -- tier 1
//! never denies.

use regex::RegexSet;

/// Tools that only observe state and never mutate anything.
pub const READ_ONLY_TOOLS: &[&str] = &[
    "read_file",
    "list_directory",
    "search_files",
    "glob",
    "web_fetch",
];

/// Tools agents use to coordinate with each other; gating these would
/// deadlock multi-agent work.
pub const COLLABORATION_TOOLS: &[&str] = &[
    "agent_status",
    "agent_wait",
    "agent_result",
    "agent_list",
    "agent_send_message",
];

/// Shell-style tools whose command argument is inspected instead of the
/// tool name.
pub const SHELL_TOOLS: &[&str] = &["shell_exec", "bash", "run_command"];

/// Leading-word patterns for commands considered read-only.
const READ_ONLY_COMMAND_PATTERNS: &[&str] = &[
    r"^\s*ls(\s|$)",
    r"^\s*cat\s",
    r"^\s*head(\s|$)",
    r"^\s*tail(\s|$)",
    r"^\s*grep\s",
    r"^\s*rg\s",
    r"^\s*find\s",
    r"^\s*wc(\s|$)",
    r"^\s*pwd\s*$",
    r"^\s*stat\s",
    r"^\s*file\s",
    r"^\s*which\s",
    r"^\s*du(\s|$)",
    r"^\s*df(\s|$)",
    r"^\s*git\s+(status|log|diff|show|branch)(\s|$)",
];

/// Which rule category approved a call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RuleMatch {
    ReadOnlyTool,
    CollaborationTool,
    ReadOnlyCommand,
}

impl RuleMatch {
    /// Human-readable category name used in decision reasons.
    pub fn category(&self) -> &'static str {
        match self {
            RuleMatch::ReadOnlyTool => "read-only tool",
            RuleMatch::CollaborationTool => "agent collaboration tool",
            RuleMatch::ReadOnlyCommand => "read-only command",
        }
    }
}

pub struct RuleSet {
    read_only_commands: RegexSet,
}

impl RuleSet {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            read_only_commands: RegexSet::new(READ_ONLY_COMMAND_PATTERNS)?,
        })
    }

    /// Evaluate a candidate tool call against the deterministic rules.
    ///
    /// Returns the matched category and a reason on auto-approval, `None`
    /// when the call falls through to tier 2.
    pub fn evaluate(
        &self,
        tool_name: &str,
        arguments: &serde_json::Value,
    ) -> Option<(RuleMatch, String)> {
        if READ_ONLY_TOOLS.contains(&tool_name) {
            return Some((
                RuleMatch::ReadOnlyTool,
                format!("'{tool_name}' matched the read-only tool allowlist"),
            ));
        }

        if COLLABORATION_TOOLS.contains(&tool_name) {
            return Some((
                RuleMatch::CollaborationTool,
                format!("'{tool_name}' matched the agent collaboration tool allowlist"),
            ));
        }

        if SHELL_TOOLS.contains(&tool_name) {
            let command = arguments.get("command").and_then(|c| c.as_str())?;
            if self.is_read_only_command(command) {
                return Some((
                    RuleMatch::ReadOnlyCommand,
                    format!("command matched a read-only command pattern: `{command}`"),
                ));
            }
        }

        None
    }

    /// Conservative check: any shell metacharacter disqualifies the command
    /// outright (pipes, redirection, chaining, substitution), then the
    /// leading word must match a read-only pattern.
    fn is_read_only_command(&self, command: &str) -> bool {
        if command
            .chars()
            .any(|c| matches!(c, ';' | '&' | '|' | '>' | '<' | '`' | '$' | '\n'))
        {
            return false;
        }
        self.read_only_commands.is_match(command)
    }
}
