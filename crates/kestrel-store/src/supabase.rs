//! Supabase (PostgREST) thread store.
//!
//! Production backend over the hosted tables: `threads`, `oai_messages`,
//! `kafka_profiles`, `profiles`, and `vm_api_keys`. Message bodies live in
//! the `message` JSON column of `oai_messages`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use uuid::Uuid;

use kestrel_types::{Message, Role, Thread, ThreadConfig, VirtualKeys};

use crate::error::{Result, StoreError};
use crate::ThreadStore;

/// Configuration for [`SupabaseStore`].
#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    /// Project base URL (`https://<ref>.supabase.co`).
    pub url: String,
    /// Service key used for both `apikey` and bearer auth.
    pub key: String,
    /// Messages table name.
    pub messages_table: String,
    /// Threads table name.
    pub threads_table: String,
}

impl SupabaseConfig {
    /// Create a config with the default table names.
    pub fn new(url: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            key: key.into(),
            messages_table: "oai_messages".to_string(),
            threads_table: "threads".to_string(),
        }
    }

    /// Read `SUPABASE_URL` / `SUPABASE_KEY` from the environment.
    pub fn from_env() -> Result<Self> {
        let url = std::env::var("SUPABASE_URL")
            .map_err(|_| StoreError::Config("SUPABASE_URL not set".to_string()))?;
        let key = std::env::var("SUPABASE_KEY")
            .map_err(|_| StoreError::Config("SUPABASE_KEY not set".to_string()))?;
        Ok(Self::new(url, key))
    }
}

/// PostgREST-backed [`ThreadStore`].
pub struct SupabaseStore {
    client: reqwest::Client,
    config: SupabaseConfig,
}

impl SupabaseStore {
    /// Create a store with the given configuration.
    pub fn new(config: SupabaseConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    /// Create a store from environment configuration.
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(SupabaseConfig::from_env()?))
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.config.url.trim_end_matches('/'), table)
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("apikey", &self.config.key)
            .header("authorization", format!("Bearer {}", self.config.key))
            .header("content-type", "application/json")
    }

    async fn select(&self, table: &str, query: &[(&str, String)]) -> Result<Vec<Value>> {
        let response = self
            .request(self.client.get(self.table_url(table)).query(query))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(StoreError::Remote(format!("HTTP {status}: {body}")));
        }
        Ok(serde_json::from_str(&body)?)
    }

    async fn insert(&self, table: &str, rows: Value) -> Result<Vec<Value>> {
        let response = self
            .request(self.client.post(self.table_url(table)))
            .header("prefer", "return=representation")
            .json(&rows)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(StoreError::Remote(format!("HTTP {status}: {body}")));
        }
        Ok(serde_json::from_str(&body)?)
    }

    fn parse_message(row: &Value) -> Result<Message> {
        let raw = row
            .get("message")
            .cloned()
            .ok_or_else(|| StoreError::Remote("message row without message column".to_string()))?;
        Ok(serde_json::from_value(raw)?)
    }
}

#[async_trait]
impl ThreadStore for SupabaseStore {
    async fn get_thread_messages(
        &self,
        thread_id: &str,
        limit: Option<usize>,
        include_system: bool,
    ) -> Result<Vec<Message>> {
        let mut query = vec![
            ("select", "message".to_string()),
            ("thread_id", format!("eq.{thread_id}")),
            ("order", "created_at.asc".to_string()),
        ];
        if let Some(limit) = limit {
            query.push(("limit", limit.to_string()));
        }

        let rows = self.select(&self.config.messages_table, &query).await?;
        let mut messages = Vec::with_capacity(rows.len());
        for row in &rows {
            let message = Self::parse_message(row)?;
            if !include_system && message.role == Role::System {
                continue;
            }
            messages.push(message);
        }
        Ok(messages)
    }

    async fn add_message(&self, thread_id: &str, message: &Message) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        self.insert(
            &self.config.messages_table,
            json!([{
                "id": id,
                "thread_id": thread_id,
                "message": message,
            }]),
        )
        .await?;
        Ok(id)
    }

    async fn add_messages(&self, thread_id: &str, messages: &[Message]) -> Result<Vec<String>> {
        if messages.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = messages
            .iter()
            .map(|_| Uuid::new_v4().to_string())
            .collect();
        let rows: Vec<Value> = messages
            .iter()
            .zip(&ids)
            .map(|(message, id)| {
                json!({
                    "id": id,
                    "thread_id": thread_id,
                    "message": message,
                })
            })
            .collect();

        self.insert(&self.config.messages_table, Value::Array(rows))
            .await?;
        Ok(ids)
    }

    async fn create_thread(
        &self,
        thread_id: Option<&str>,
        user_id: Option<&str>,
        kafka_profile_id: Option<&str>,
        system_message: Option<&str>,
    ) -> Result<Thread> {
        let id = thread_id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let rows = self
            .insert(
                &self.config.threads_table,
                json!([{
                    "id": id,
                    "user_id": user_id,
                    "kafka_profile_id": kafka_profile_id,
                }]),
            )
            .await?;

        let created_at = rows
            .first()
            .and_then(|row| row.get("created_at"))
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        if let Some(system) = system_message {
            self.add_message(&id, &Message::system(system)).await?;
        }

        Ok(Thread {
            id,
            created_at,
            user_id: user_id.map(str::to_string),
            kafka_profile_id: kafka_profile_id.map(str::to_string),
            sandbox_id: None,
            metadata: None,
        })
    }

    async fn thread_exists(&self, thread_id: &str) -> Result<bool> {
        let rows = self
            .select(
                &self.config.threads_table,
                &[
                    ("select", "id".to_string()),
                    ("id", format!("eq.{thread_id}")),
                ],
            )
            .await?;
        Ok(!rows.is_empty())
    }

    async fn get_thread(&self, thread_id: &str) -> Result<Option<Thread>> {
        let rows = self
            .select(
                &self.config.threads_table,
                &[
                    ("select", "*".to_string()),
                    ("id", format!("eq.{thread_id}")),
                ],
            )
            .await?;

        let Some(row) = rows.first() else {
            return Ok(None);
        };

        let created_at = row
            .get("created_at")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        let as_string =
            |key: &str| row.get(key).and_then(Value::as_str).map(str::to_string);

        Ok(Some(Thread {
            id: thread_id.to_string(),
            created_at,
            user_id: as_string("user_id"),
            kafka_profile_id: as_string("kafka_profile_id"),
            sandbox_id: as_string("sandbox_id"),
            metadata: row.get("metadata").filter(|m| !m.is_null()).cloned(),
        }))
    }

    async fn delete_thread_messages(&self, thread_id: &str) -> Result<usize> {
        let response = self
            .request(
                self.client
                    .delete(self.table_url(&self.config.messages_table))
                    .query(&[("thread_id", format!("eq.{thread_id}"))]),
            )
            .header("prefer", "return=representation")
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(StoreError::Remote(format!("HTTP {status}: {body}")));
        }
        let rows: Vec<Value> = serde_json::from_str(&body)?;
        Ok(rows.len())
    }

    async fn get_thread_sandbox_id(&self, thread_id: &str) -> Result<Option<String>> {
        let rows = self
            .select(
                &self.config.threads_table,
                &[
                    ("select", "sandbox_id".to_string()),
                    ("id", format!("eq.{thread_id}")),
                ],
            )
            .await?;
        Ok(rows
            .first()
            .and_then(|row| row.get("sandbox_id"))
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    async fn update_thread_sandbox_id(&self, thread_id: &str, sandbox_id: &str) -> Result<()> {
        let response = self
            .request(
                self.client
                    .patch(self.table_url(&self.config.threads_table))
                    .query(&[("id", format!("eq.{thread_id}"))]),
            )
            .json(&json!({"sandbox_id": sandbox_id}))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Remote(format!("HTTP {status}: {body}")));
        }
        Ok(())
    }

    async fn get_thread_config(&self, thread_id: &str) -> Result<Option<ThreadConfig>> {
        // Thread row with embedded kafka_profile and vm_api_key.
        let rows = self
            .select(
                &self.config.threads_table,
                &[
                    (
                        "select",
                        "user_id, kafka_profile_id, \
                         kafka_profiles!threads_kp_fkey(user_id, memory_dsn, global_prompt), \
                         vm_api_keys!threads_vm_api_key_id_fkey(api_key)"
                            .to_string(),
                    ),
                    ("id", format!("eq.{thread_id}")),
                ],
            )
            .await?;

        let Some(row) = rows.first() else {
            return Ok(None);
        };

        let kafka_profile = row.get("kafka_profiles").cloned().unwrap_or(Value::Null);
        let vm_api_key_row = row.get("vm_api_keys").cloned().unwrap_or(Value::Null);

        // The provider virtual keys live on the profile of the kafka
        // profile's owner.
        let mut virtual_keys = VirtualKeys::default();
        if let Some(profile_user) = kafka_profile.get("user_id").and_then(Value::as_str) {
            let profiles = self
                .select(
                    "profiles",
                    &[
                        (
                            "select",
                            "openai_pk_virtual_key, anthropic_pk_virtual_key, \
                             gemini_pk_virtual_key, bedrock_pk_virtual_key"
                                .to_string(),
                        ),
                        ("id", format!("eq.{profile_user}")),
                    ],
                )
                .await?;
            if let Some(profile) = profiles.first() {
                let take = |key: &str| {
                    profile
                        .get(key)
                        .and_then(Value::as_str)
                        .map(str::to_string)
                };
                virtual_keys.openai = take("openai_pk_virtual_key");
                virtual_keys.anthropic = take("anthropic_pk_virtual_key");
                virtual_keys.google = take("gemini_pk_virtual_key");
                virtual_keys.bedrock = take("bedrock_pk_virtual_key");
            }
        }

        let as_string = |v: &Value, key: &str| {
            v.get(key).and_then(Value::as_str).map(str::to_string)
        };

        Ok(Some(ThreadConfig {
            user_id: as_string(row, "user_id"),
            kafka_profile_id: as_string(row, "kafka_profile_id"),
            memory_dsn: as_string(&kafka_profile, "memory_dsn"),
            virtual_keys,
            vm_api_key: as_string(&vm_api_key_row, "api_key"),
            global_prompt: as_string(&kafka_profile, "global_prompt"),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_table_defaults() {
        let config = SupabaseConfig::new("https://x.supabase.co", "key");
        assert_eq!(config.messages_table, "oai_messages");
        assert_eq!(config.threads_table, "threads");
    }

    #[test]
    fn test_table_url_trims_slash() {
        let store = SupabaseStore::new(SupabaseConfig::new("https://x.supabase.co/", "key"));
        assert_eq!(
            store.table_url("threads"),
            "https://x.supabase.co/rest/v1/threads"
        );
    }

    #[test]
    fn test_parse_message_row() {
        let row = json!({"message": {"role": "user", "content": "hi"}});
        let message = SupabaseStore::parse_message(&row).unwrap();
        assert_eq!(message.role, Role::User);
        assert_eq!(message.text(), "hi");
    }
}
