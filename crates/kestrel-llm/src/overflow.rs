//! Provider-agnostic detection of "context too long" errors.

use crate::error::LlmError;

/// Check whether an error message indicates a context-length overflow.
///
/// Covers the known signatures of the Anthropic/Bedrock, OpenAI, and
/// Google/Gemini families plus the generic phrasings seen in the wild. The
/// check is case-insensitive.
pub fn is_context_overflow_message(message: &str) -> bool {
    let msg = message.to_lowercase();

    // Anthropic/Bedrock
    if msg.contains("prompt is too long") && msg.contains("tokens") {
        return true;
    }
    if msg.contains("input is too long") {
        return true;
    }
    if msg.contains("input length and")
        && msg.contains("max_tokens")
        && msg.contains("exceed context limit")
    {
        return true;
    }

    // OpenAI
    if msg.contains("context_length_exceeded") {
        return true;
    }
    if msg.contains("maximum context length") {
        return true;
    }
    if msg.contains("token limit") {
        return true;
    }

    // Google/Gemini
    if msg.contains("exceeds the maximum") && msg.contains("token") {
        return true;
    }

    // Generic
    if msg.contains("too many tokens") {
        return true;
    }
    if msg.contains("exceeds maximum") && msg.contains("tokens") {
        return true;
    }

    false
}

/// Check whether an [`LlmError`] indicates a context-length overflow.
///
/// Applies the message predicate to the error's display form and, for
/// provider errors carrying a structured body, to the body as well.
pub fn is_context_overflow(error: &LlmError) -> bool {
    if is_context_overflow_message(&error.to_string()) {
        return true;
    }
    if let LlmError::Provider {
        body: Some(body), ..
    } = error
    {
        return is_context_overflow_message(body);
    }
    false
}
