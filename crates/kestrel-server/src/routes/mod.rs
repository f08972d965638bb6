//! HTTP route handlers.

mod agent_run;
mod chat;
mod health;
mod models;
mod threads;

pub use agent_run::{agent_run_handler, thread_agent_run_handler};
pub use chat::{chat_handler, thread_chat_handler, ChatCompletionResponse};
pub use health::health_handler;
pub use models::models_handler;
pub use threads::{
    add_message_handler, create_thread_handler, delete_messages_handler, get_messages_handler,
};
