//! Model-family inference from model identifiers.
//!
//! Routing, parameter discipline, and virtual-key selection all key off the
//! family the model name implies.

use kestrel_types::VirtualKeys;

/// The provider family behind a model identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelFamily {
    /// OpenAI models (`gpt-*`, `o1*`).
    OpenAi,
    /// Anthropic models (`claude-*`, `*sonnet*`, `*opus*`, `*haiku*`).
    Anthropic,
    /// Google models (`gemini-*`).
    Google,
    /// Anything we cannot classify; routed as OpenAI with a warning.
    Unknown,
}

impl ModelFamily {
    /// Infer the family from a model identifier.
    ///
    /// Case-insensitive substring match, mirroring what the gateway itself
    /// does for routing.
    pub fn infer(model: &str) -> Self {
        let lower = model.to_lowercase();
        if lower.contains("gpt") || lower.contains("o1") {
            Self::OpenAi
        } else if lower.contains("claude")
            || lower.contains("sonnet")
            || lower.contains("opus")
            || lower.contains("haiku")
        {
            Self::Anthropic
        } else if lower.contains("gemini") {
            Self::Google
        } else {
            Self::Unknown
        }
    }

    /// Short name used in headers and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Google => "google",
            Self::Unknown => "unknown",
        }
    }

    /// Pick this family's virtual key, falling back to the first configured
    /// key with a warning.
    pub fn select_virtual_key<'a>(&self, keys: &'a VirtualKeys) -> Option<&'a str> {
        let key = match self {
            Self::OpenAi | Self::Unknown => keys.openai.as_deref(),
            Self::Anthropic => keys.anthropic.as_deref(),
            Self::Google => keys.google.as_deref(),
        };

        match key {
            Some(k) => Some(k),
            None => {
                let fallback = keys.first_available();
                if let Some(f) = fallback {
                    tracing::warn!(
                        family = self.as_str(),
                        "no virtual key for family, falling back to first available"
                    );
                    Some(f)
                } else {
                    None
                }
            }
        }
    }
}
