//! Thread records and the claim configuration payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A persistent conversation thread.
///
/// Messages in a thread are totally ordered by creation time; a thread has at
/// most one active sandbox binding at a time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Thread {
    /// Thread id.
    pub id: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Owning user, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Agent profile this thread belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kafka_profile_id: Option<String>,
    /// Bound sandbox, if one has been provisioned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sandbox_id: Option<String>,
    /// Free-form metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub metadata: Option<serde_json::Value>,
}

/// Per-family opaque gateway virtual keys for a thread's profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct VirtualKeys {
    /// Key for the OpenAI family.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub openai: Option<String>,
    /// Key for the Anthropic family.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anthropic: Option<String>,
    /// Key for the Google family.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub google: Option<String>,
    /// Key for the Bedrock family.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bedrock: Option<String>,
}

impl VirtualKeys {
    /// First configured key in family order, used as a routing fallback.
    pub fn first_available(&self) -> Option<&str> {
        self.openai
            .as_deref()
            .or(self.anthropic.as_deref())
            .or(self.google.as_deref())
            .or(self.bedrock.as_deref())
    }
}

/// The full claim payload for a thread, as stored alongside its profile.
///
/// Missing fields fall through to process-environment defaults when the
/// sandbox claim config is built.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ThreadConfig {
    /// Owning user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Agent profile id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kafka_profile_id: Option<String>,
    /// DSN of the profile's memory database.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_dsn: Option<String>,
    /// Per-family gateway virtual keys.
    #[serde(default)]
    pub virtual_keys: VirtualKeys,
    /// Provisioned VM API key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vm_api_key: Option<String>,
    /// Profile-level prompt appended to the system prompt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub global_prompt: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_virtual_keys_fallback_order() {
        let keys = VirtualKeys {
            google: Some("vk-g".to_string()),
            bedrock: Some("vk-b".to_string()),
            ..Default::default()
        };
        assert_eq!(keys.first_available(), Some("vk-g"));
        assert_eq!(VirtualKeys::default().first_available(), None);
    }

    #[test]
    fn test_thread_config_defaults() {
        let config: ThreadConfig = serde_json::from_str("{}").unwrap();
        assert!(config.user_id.is_none());
        assert!(config.virtual_keys.openai.is_none());
    }
}
