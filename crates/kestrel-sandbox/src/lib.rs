//! Remote code-execution sandboxes for Kestrel threads.
//!
//! A [`SandboxHandle`] abstracts one remote VM exposing `/health`, `/run`
//! (SSE), and `/claim`. The [`SandboxManager`] binds sandboxes to threads:
//! non-blocking lookup, supervised background provisioning, blocking
//! ensure-with-restart, and claim-config construction. The [`LazySandbox`]
//! lets the model start streaming while provisioning proceeds.

pub mod error;
pub mod handle;
pub mod lazy;
pub mod manager;
pub mod provider;
pub mod warm;

pub use error::{Result, SandboxError};
pub use handle::{
    HealthStatus, RemoteSandbox, SandboxHandle, SandboxState, SharedHandle, ToolEvent,
    ToolEventStream,
};
pub use lazy::LazySandbox;
pub use manager::SandboxManager;
pub use provider::{DaytonaProvider, SandboxProvider};
pub use warm::WarmPool;
