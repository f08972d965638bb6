//! Thread persistence for Kestrel.
//!
//! One [`ThreadStore`] trait over two backends: a local SQLite database for
//! development and a Supabase REST client for production. The agent session
//! and the sandbox manager only ever see the trait.

pub mod error;
pub mod local;
pub mod supabase;

pub use error::{Result, StoreError};
pub use local::LocalStore;
pub use supabase::{SupabaseConfig, SupabaseStore};

use std::sync::Arc;

use async_trait::async_trait;

use kestrel_types::{Message, Thread, ThreadConfig};

/// Storage operations the runtime needs per thread.
#[async_trait]
pub trait ThreadStore: Send + Sync {
    /// All messages of a thread, ordered by creation time.
    async fn get_thread_messages(
        &self,
        thread_id: &str,
        limit: Option<usize>,
        include_system: bool,
    ) -> Result<Vec<Message>>;

    /// Append one message. Returns the generated message id.
    async fn add_message(&self, thread_id: &str, message: &Message) -> Result<String>;

    /// Append several messages in order. Returns the generated ids.
    async fn add_messages(&self, thread_id: &str, messages: &[Message]) -> Result<Vec<String>>;

    /// Create a thread. Generates an id when none is given.
    async fn create_thread(
        &self,
        thread_id: Option<&str>,
        user_id: Option<&str>,
        kafka_profile_id: Option<&str>,
        system_message: Option<&str>,
    ) -> Result<Thread>;

    /// Whether a thread exists.
    async fn thread_exists(&self, thread_id: &str) -> Result<bool>;

    /// Fetch a thread record.
    async fn get_thread(&self, thread_id: &str) -> Result<Option<Thread>>;

    /// Delete all messages of a thread, keeping the thread itself.
    /// Returns the number of deleted messages.
    async fn delete_thread_messages(&self, thread_id: &str) -> Result<usize>;

    /// The sandbox currently bound to a thread, if any.
    async fn get_thread_sandbox_id(&self, thread_id: &str) -> Result<Option<String>>;

    /// Bind a sandbox to a thread.
    async fn update_thread_sandbox_id(&self, thread_id: &str, sandbox_id: &str) -> Result<()>;

    /// The full claim payload for a thread, or `None` when the backend has no
    /// profile data (callers fall back to process environment defaults).
    async fn get_thread_config(&self, thread_id: &str) -> Result<Option<ThreadConfig>>;
}

/// A store that can be shared across tasks.
pub type SharedStore = Arc<dyn ThreadStore>;
