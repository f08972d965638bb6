//! Error types for the sandbox crate.

use thiserror::Error;

/// Result type alias using the sandbox error type.
pub type Result<T> = std::result::Result<T, SandboxError>;

/// Error type for sandbox operations.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// The sandbox did not become healthy in time.
    #[error("sandbox {sandbox_id} did not become live within {timeout_secs}s (last: {last_error})")]
    HealthTimeout {
        /// Sandbox id.
        sandbox_id: String,
        /// Timeout that elapsed.
        timeout_secs: u64,
        /// The last failure observed while polling.
        last_error: String,
    },

    /// A `/run` call failed.
    #[error("tool execution failed{}: {message}", sandbox_suffix(.sandbox_id))]
    Run {
        /// Sandbox id, when known.
        sandbox_id: Option<String>,
        /// Failure detail.
        message: String,
    },

    /// A `/claim` call failed.
    #[error("claim failed{}: {message}", sandbox_suffix(.sandbox_id))]
    Claim {
        /// Sandbox id, when known.
        sandbox_id: Option<String>,
        /// Failure detail.
        message: String,
    },

    /// Provisioning (create/connect/restart) failed.
    #[error("provisioning failed{}: {message}", sandbox_suffix(.sandbox_id))]
    Provision {
        /// Sandbox id, when known.
        sandbox_id: Option<String>,
        /// Failure detail.
        message: String,
    },

    /// A lazy handle timed out waiting for the real sandbox.
    #[error("timed out waiting for sandbox for thread {thread_id}")]
    ResolveTimeout {
        /// Thread the lazy handle belongs to.
        thread_id: String,
    },

    /// Thread store failure while binding or claiming.
    #[error(transparent)]
    Store(#[from] kestrel_store::StoreError),
}

fn sandbox_suffix(sandbox_id: &Option<String>) -> String {
    match sandbox_id {
        Some(id) => format!(" (sandbox {id})"),
        None => String::new(),
    }
}

impl SandboxError {
    /// Create a run error.
    pub fn run(sandbox_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Run {
            sandbox_id: Some(sandbox_id.into()),
            message: message.into(),
        }
    }

    /// Create a claim error.
    pub fn claim(sandbox_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Claim {
            sandbox_id: Some(sandbox_id.into()),
            message: message.into(),
        }
    }

    /// Create a provisioning error.
    pub fn provision(message: impl Into<String>) -> Self {
        Self::Provision {
            sandbox_id: None,
            message: message.into(),
        }
    }
}
