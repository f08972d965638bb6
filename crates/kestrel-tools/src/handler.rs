//! Local tool handlers.
//!
//! The three calling conventions a local tool can have, selected at
//! registration: a plain function, an async function, or an async function
//! producing a stream of output fragments.

use std::pin::Pin;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::Stream;
use serde_json::Value;

/// Output of a handler call: `Ok` payload or an error message.
pub type HandlerResult = std::result::Result<Value, String>;

/// A stream of output fragments from a streaming handler.
pub type HandlerStream = Pin<Box<dyn Stream<Item = String> + Send + 'static>>;

/// The invocable behind a local tool.
#[derive(Clone)]
pub enum LocalHandler {
    /// Synchronous function.
    Sync(Arc<dyn Fn(Value) -> HandlerResult + Send + Sync>),
    /// Async function.
    Async(Arc<dyn Fn(Value) -> BoxFuture<'static, HandlerResult> + Send + Sync>),
    /// Async function yielding output fragments.
    Stream(Arc<dyn Fn(Value) -> HandlerStream + Send + Sync>),
}

impl LocalHandler {
    /// Wrap a synchronous function.
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(Value) -> HandlerResult + Send + Sync + 'static,
    {
        Self::Sync(Arc::new(f))
    }

    /// Wrap an async function.
    pub fn async_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = HandlerResult> + Send + 'static,
    {
        Self::Async(Arc::new(move |args| Box::pin(f(args))))
    }

    /// Wrap a function returning a stream of output fragments.
    pub fn stream<F, S>(f: F) -> Self
    where
        F: Fn(Value) -> S + Send + Sync + 'static,
        S: Stream<Item = String> + Send + 'static,
    {
        Self::Stream(Arc::new(move |args| Box::pin(f(args))))
    }
}

impl std::fmt::Debug for LocalHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Self::Sync(_) => "Sync",
            Self::Async(_) => "Async",
            Self::Stream(_) => "Stream",
        };
        f.debug_tuple("LocalHandler").field(&kind).finish()
    }
}

/// Render a handler's JSON return for the model: strings pass through, other
/// values serialize compactly.
pub(crate) fn render_output(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn test_sync_handler() {
        let handler = LocalHandler::sync(|args| {
            let location = args
                .get("location")
                .and_then(Value::as_str)
                .unwrap_or("nowhere");
            Ok(Value::String(format!("Weather in {location}: sunny")))
        });

        match handler {
            LocalHandler::Sync(f) => {
                let out = f(serde_json::json!({"location": "Tokyo"})).unwrap();
                assert_eq!(render_output(&out), "Weather in Tokyo: sunny");
            }
            _ => panic!("expected sync"),
        }
    }

    #[tokio::test]
    async fn test_async_handler() {
        let handler = LocalHandler::async_fn(|_args| async { Ok(Value::from(42)) });
        match handler {
            LocalHandler::Async(f) => {
                let out = f(Value::Null).await.unwrap();
                assert_eq!(render_output(&out), "42");
            }
            _ => panic!("expected async"),
        }
    }

    #[tokio::test]
    async fn test_stream_handler() {
        let handler = LocalHandler::stream(|_args| {
            futures::stream::iter(vec!["one".to_string(), "two".to_string()])
        });
        match handler {
            LocalHandler::Stream(f) => {
                let fragments: Vec<String> = f(Value::Null).collect().await;
                assert_eq!(fragments, vec!["one", "two"]);
            }
            _ => panic!("expected stream"),
        }
    }

    #[test]
    fn test_render_output_shapes() {
        assert_eq!(render_output(&Value::String("raw".into())), "raw");
        assert_eq!(render_output(&Value::Null), "");
        assert_eq!(
            render_output(&serde_json::json!({"status": "idle"})),
            r#"{"status":"idle"}"#
        );
    }
}
