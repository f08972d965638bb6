//! History sanitization.
//!
//! Providers reject tool messages whose `tool_call_id` has no matching tool
//! call on the most recent assistant message. Histories accumulate such
//! orphans when runs are interrupted mid-round; they are dropped before the
//! history reaches the model.

use kestrel_types::{Message, Role};

/// Drop orphan tool messages from a history.
///
/// Walks the list keeping a set of tool-call ids from the most recent
/// assistant message that carried tool calls. A tool message survives iff its
/// id is in the set (each id satisfiable once). Any other message resets the
/// set.
pub fn sanitize_messages(messages: Vec<Message>) -> Vec<Message> {
    let mut sanitized = Vec::with_capacity(messages.len());
    let mut valid_ids: std::collections::HashSet<String> = std::collections::HashSet::new();

    for msg in messages {
        if msg.has_tool_calls() {
            valid_ids = msg
                .tool_calls
                .as_deref()
                .unwrap_or_default()
                .iter()
                .map(|c| c.id.clone())
                .collect();
            sanitized.push(msg);
        } else if msg.role == Role::Tool {
            let id = msg.tool_call_id.clone();
            let keep = id.as_ref().map(|id| valid_ids.remove(id)).unwrap_or(false);
            if keep {
                sanitized.push(msg);
            } else {
                tracing::warn!(
                    tool_call_id = ?id,
                    name = ?msg.name,
                    "skipping orphan tool message"
                );
            }
        } else {
            valid_ids.clear();
            sanitized.push(msg);
        }
    }

    sanitized
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_types::ToolCall;

    #[test]
    fn test_orphan_tool_message_dropped() {
        let messages = vec![
            Message::user("hi"),
            Message::assistant_tool_calls(None, vec![ToolCall::function("a", "run", "{}")]),
            Message::tool("out-a", "a", "run"),
            Message::tool("out-b", "b", "run"),
            Message::user("next"),
        ];

        let sanitized = sanitize_messages(messages);
        assert_eq!(sanitized.len(), 4);
        assert_eq!(sanitized[0].role, Role::User);
        assert!(sanitized[1].has_tool_calls());
        assert_eq!(sanitized[2].tool_call_id.as_deref(), Some("a"));
        assert_eq!(sanitized[3].role, Role::User);
    }

    #[test]
    fn test_reset_on_plain_message() {
        // A user message between the assistant and the tool result orphans it.
        let messages = vec![
            Message::assistant_tool_calls(None, vec![ToolCall::function("a", "run", "{}")]),
            Message::user("interruption"),
            Message::tool("late", "a", "run"),
        ];

        let sanitized = sanitize_messages(messages);
        assert_eq!(sanitized.len(), 2);
        assert!(sanitized.iter().all(|m| m.role != Role::Tool));
    }

    #[test]
    fn test_each_id_satisfiable_once() {
        let messages = vec![
            Message::assistant_tool_calls(None, vec![ToolCall::function("a", "run", "{}")]),
            Message::tool("first", "a", "run"),
            Message::tool("duplicate", "a", "run"),
        ];

        let sanitized = sanitize_messages(messages);
        assert_eq!(sanitized.len(), 2);
        assert_eq!(sanitized[1].text(), "first");
    }

    #[test]
    fn test_idempotent() {
        let messages = vec![
            Message::user("hi"),
            Message::assistant_tool_calls(
                None,
                vec![
                    ToolCall::function("a", "run", "{}"),
                    ToolCall::function("b", "run", "{}"),
                ],
            ),
            Message::tool("out-a", "a", "run"),
            Message::tool("orphan", "c", "run"),
            Message::assistant("done"),
        ];

        let once = sanitize_messages(messages);
        let twice = sanitize_messages(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_clean_history_untouched() {
        let messages = vec![
            Message::system("sys"),
            Message::user("hi"),
            Message::assistant("hello"),
        ];
        assert_eq!(sanitize_messages(messages.clone()), messages);
    }
}
