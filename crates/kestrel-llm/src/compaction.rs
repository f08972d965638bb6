//! Context compaction: rewriting a conversation to fit a shrinking window.
//!
//! Two strategies share the safe-split and post-validation machinery:
//! summarization (default) condenses the older part of the conversation via
//! an auxiliary LLM call, truncation simply drops it. Both guarantee that an
//! assistant-with-tool-calls message is never separated from its tool
//! results.

use std::sync::Arc;

use async_trait::async_trait;

use kestrel_types::{ContentPart, Message, MessageContent, Role};

use crate::error::Result;
use crate::provider::{CompletionParams, LlmProvider};

/// Default fraction of the non-system region to summarize.
const DEFAULT_SUMMARIZE_RATIO: f32 = 0.75;

/// Minimum non-system messages before summarization kicks in.
const DEFAULT_MIN_MESSAGES: usize = 10;

/// Default number of recent messages the truncation strategy keeps.
const DEFAULT_KEEP_COUNT: usize = 50;

const SUMMARY_SYSTEM_PROMPT: &str = "\
You are an AI assistant tasked with creating a concise summary of a conversation history.

Your goal is to preserve:
1. All key information, decisions made, and actions taken
2. Important context and background information
3. Tool execution results and their outcomes
4. Any errors or issues encountered
5. The current state of any ongoing tasks

Focus on:
- What was accomplished
- What is currently in progress
- Important data or results that were discovered
- Any user preferences or requirements stated

Create a clear, structured summary that allows the conversation to continue seamlessly.
The summary should be in markdown format with clear sections.";

// ─────────────────────────────────────────────────────────────────────────────
// Shared helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Maximum output tokens per model, with prefix matching.
fn max_output_tokens(model: &str) -> u32 {
    const TABLE: &[(&str, u32)] = &[
        ("gpt-4o-mini", 16384),
        ("gpt-4o", 16384),
        ("gpt-5", 32768),
        ("claude-sonnet-4-5", 16384),
        ("claude-3-5-sonnet", 8192),
        ("claude-3-opus", 4096),
        ("gemini-2.0-flash", 8192),
        ("gemini-2.5-pro", 65536),
        ("gemini-2.5-flash", 65536),
    ];

    for (prefix, tokens) in TABLE {
        if model.starts_with(prefix) {
            return *tokens;
        }
    }
    8192
}

/// Find a split index that does not break tool-call/tool-result pairing.
///
/// Starting from `target`, walk backwards: while the message before the split
/// is an assistant with tool calls, or the message at the split is a tool
/// result, move the split earlier.
pub fn find_safe_split_point(messages: &[Message], target: usize) -> usize {
    if target == 0 {
        return 0;
    }
    if target >= messages.len() {
        return messages.len();
    }

    let mut split = target;
    while split > 0 {
        if messages[split - 1].has_tool_calls() {
            split -= 1;
            continue;
        }
        if messages[split].role == Role::Tool {
            split -= 1;
            continue;
        }
        break;
    }
    split
}

/// Drop tool messages whose call id has no matching assistant tool call, and
/// assistant messages with neither content nor tool calls.
pub fn validate_message_structure(messages: Vec<Message>) -> Vec<Message> {
    let valid_ids: std::collections::HashSet<String> = messages
        .iter()
        .filter(|m| m.has_tool_calls())
        .flat_map(|m| m.tool_calls.as_deref().unwrap_or_default())
        .map(|c| c.id.clone())
        .collect();

    messages
        .into_iter()
        .filter(|msg| {
            if msg.role == Role::Tool {
                let keep = msg
                    .tool_call_id
                    .as_deref()
                    .is_some_and(|id| valid_ids.contains(id));
                if !keep {
                    tracing::warn!(
                        tool_call_id = ?msg.tool_call_id,
                        "removing orphaned tool result"
                    );
                }
                return keep;
            }
            if msg.role == Role::Assistant
                && msg.content.is_none()
                && !msg.has_tool_calls()
            {
                tracing::warn!("removing empty assistant message");
                return false;
            }
            true
        })
        .collect()
}

/// Split a conversation into its leading system messages and the rest.
fn split_system_prefix(messages: Vec<Message>) -> (Vec<Message>, Vec<Message>) {
    let mut system = Vec::new();
    let mut rest = Vec::new();
    for msg in messages {
        if msg.role == Role::System && rest.is_empty() {
            system.push(msg);
        } else {
            rest.push(msg);
        }
    }
    (system, rest)
}

fn truncate_to_last(messages: Vec<Message>, keep_count: usize) -> Vec<Message> {
    let (system, rest) = split_system_prefix(messages);
    if rest.len() <= keep_count {
        let mut out = system;
        out.extend(rest);
        return out;
    }

    let cutoff = find_safe_split_point(&rest, rest.len() - keep_count);
    let mut out = system;
    out.extend(rest.into_iter().skip(cutoff));
    validate_message_structure(out)
}

// ─────────────────────────────────────────────────────────────────────────────
// Trait
// ─────────────────────────────────────────────────────────────────────────────

/// A strategy for rewriting a message list to fit the model's context window.
#[async_trait]
pub trait CompactionProvider: Send + Sync {
    /// Rewrite `messages` into a shorter, structurally valid list.
    ///
    /// Leading system messages are always preserved, and the trailing run of
    /// tool-call/tool-result pairs is never split.
    async fn compact(
        &self,
        messages: Vec<Message>,
        system_prompt: &str,
        model: &str,
    ) -> Result<Vec<Message>>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Summarization strategy
// ─────────────────────────────────────────────────────────────────────────────

/// Compaction via LLM summarization of the older conversation region.
pub struct SummarizationCompaction {
    provider: Arc<dyn LlmProvider>,
    summarize_ratio: f32,
    min_messages: usize,
}

impl SummarizationCompaction {
    /// Create the strategy with default ratio and threshold.
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider,
            summarize_ratio: DEFAULT_SUMMARIZE_RATIO,
            min_messages: DEFAULT_MIN_MESSAGES,
        }
    }

    /// Override the summarize ratio.
    pub fn with_ratio(mut self, ratio: f32) -> Self {
        self.summarize_ratio = ratio;
        self
    }

    /// Override the minimum message threshold.
    pub fn with_min_messages(mut self, min: usize) -> Self {
        self.min_messages = min;
        self
    }

    async fn summarize(&self, messages: &[Message], model: &str) -> Result<String> {
        let transcript = serde_json::to_string_pretty(messages)?;

        let params = CompletionParams::new(
            vec![
                Message::system(SUMMARY_SYSTEM_PROMPT),
                Message::user(format!(
                    "Please summarize the following conversation history:\n\n{transcript}"
                )),
            ],
            model,
        )
        .with_temperature(0.3)
        .with_max_tokens(std::cmp::min(8192, max_output_tokens(model) / 4));

        let response = self.provider.completion(params).await?;
        Ok(response.content.unwrap_or_default())
    }
}

#[async_trait]
impl CompactionProvider for SummarizationCompaction {
    async fn compact(
        &self,
        messages: Vec<Message>,
        _system_prompt: &str,
        model: &str,
    ) -> Result<Vec<Message>> {
        let total = messages.len();
        let (system, rest) = split_system_prefix(messages);

        if rest.len() < self.min_messages {
            tracing::info!(
                messages = rest.len(),
                min = self.min_messages,
                "not enough messages to summarize"
            );
            let mut out = system;
            out.extend(rest);
            return Ok(out);
        }

        let target = (rest.len() as f32 * self.summarize_ratio) as usize;
        let split = find_safe_split_point(&rest, target);
        let (to_summarize, to_keep) = rest.split_at(split);

        tracing::info!(
            target,
            split,
            summarizing = to_summarize.len(),
            keeping = to_keep.len(),
            "starting summarization compaction"
        );

        match self.summarize(to_summarize, model).await {
            Ok(summary) => {
                let handoff = Message {
                    role: Role::System,
                    content: Some(MessageContent::Parts(vec![ContentPart::Text {
                        text: format!(
                            "[CONVERSATION HANDOFF - {} messages summarized]\n\n{}",
                            to_summarize.len(),
                            summary
                        ),
                        cache_control: Some(serde_json::json!({"type": "ephemeral"})),
                    }])),
                    name: None,
                    tool_calls: None,
                    tool_call_id: None,
                };

                let mut out = system;
                out.push(handoff);
                out.extend(to_keep.iter().cloned());
                let out = validate_message_structure(out);

                tracing::info!(before = total, after = out.len(), "summarization complete");
                Ok(out)
            }
            Err(e) => {
                tracing::error!(error = %e, "summarization failed, falling back to truncation");
                let mut all = system;
                all.extend(to_summarize.iter().cloned());
                all.extend(to_keep.iter().cloned());
                Ok(truncate_to_last(all, DEFAULT_KEEP_COUNT))
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Truncation strategy
// ─────────────────────────────────────────────────────────────────────────────

/// Compaction by dropping everything but the most recent messages.
pub struct TruncationCompaction {
    keep_count: usize,
}

impl TruncationCompaction {
    /// Create the strategy keeping the default message count.
    pub fn new() -> Self {
        Self {
            keep_count: DEFAULT_KEEP_COUNT,
        }
    }

    /// Override how many recent messages to keep.
    pub fn with_keep_count(mut self, keep_count: usize) -> Self {
        self.keep_count = keep_count;
        self
    }
}

impl Default for TruncationCompaction {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CompactionProvider for TruncationCompaction {
    async fn compact(
        &self,
        messages: Vec<Message>,
        _system_prompt: &str,
        _model: &str,
    ) -> Result<Vec<Message>> {
        let before = messages.len();
        let out = truncate_to_last(messages, self.keep_count);
        tracing::info!(before, after = out.len(), "truncation compaction complete");
        Ok(out)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
